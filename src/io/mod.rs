//! Trajectory input/output.

pub mod trajectory;

pub use trajectory::{read_trajectory, TrajectoryRow, TrajectoryWriter};
