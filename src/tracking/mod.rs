//! Frame-to-frame stereo tracking.
//!
//! This module covers one tracking cycle:
//! - Stereo point and line features held per frame
//! - Descriptor matching and track association between consecutive frames
//! - Relative pose estimation with outlier purge and refinement
//! - Frame lifecycle and persistent track IDs

pub mod association;
pub mod frame;
pub mod handler;
pub mod matching;
pub mod result;
pub mod state;
pub mod synthetic;

pub use handler::{FeatureExtractor, KeyFrameRef, SharedHandler, StereoFrameHandler};
pub use result::{CycleSummary, PoseOutcome};
pub use state::TrackingState;
