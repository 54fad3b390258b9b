//! Per-cycle tracking results.
//!
//! These types describe what happened while estimating the motion of a
//! single frame:
//! - how the pose estimate ended (accepted or which fallback fired)
//! - correspondence and inlier counts per modality
//! - solver iterations and final error

use std::fmt;

/// How a pose optimization ended.
///
/// Every variant other than `Converged` leaves an identity relative pose
/// and the rejected-error sentinel on the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoseOutcome {
    Converged,
    /// Inliers at or below the minimum, before or after outlier removal.
    InsufficientCorrespondences,
    /// Solver produced NaN or Inf in the transform.
    NonFiniteSolution,
    /// Final normalized error at or above the ceiling.
    ExcessiveResidualError,
}

impl PoseOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Converged)
    }
}

impl fmt::Display for PoseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Converged => "converged",
            Self::InsufficientCorrespondences => "insufficient correspondences",
            Self::NonFiniteSolution => "non-finite solution",
            Self::ExcessiveResidualError => "excessive residual error",
        };
        f.write_str(s)
    }
}

/// Summary of one association + optimization cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSummary {
    pub frame_idx: u64,
    pub outcome: PoseOutcome,
    pub matched_pt: usize,
    pub matched_ls: usize,
    /// Point inliers after the last pass.
    pub inliers_pt: usize,
    pub inliers_ls: usize,
    /// Removed by the MAD filter between passes.
    pub outliers_removed: usize,
    /// Solver iterations summed over both passes.
    pub iterations: usize,
    /// Stored normalized error, negative when rejected.
    pub err_norm: f64,
}

impl CycleSummary {
    pub fn n_inliers(&self) -> usize {
        self.inliers_pt + self.inliers_ls
    }
}
