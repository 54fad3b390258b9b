pub mod config;
pub mod geometry;
pub mod io;
pub mod optimizer;
pub mod tracking;
