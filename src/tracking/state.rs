//! Tracking state of the frame handler.

use crate::tracking::result::PoseOutcome;

/// State of the frame-to-frame tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingState {
    /// No frame inserted yet.
    #[default]
    NotInitialized,
    /// Last pose estimate was accepted.
    Ok,
    /// Last pose estimate fell back to identity motion.
    Lost,
}

impl TrackingState {
    pub fn after(outcome: PoseOutcome) -> Self {
        match outcome {
            PoseOutcome::Converged => Self::Ok,
            _ => Self::Lost,
        }
    }
}
