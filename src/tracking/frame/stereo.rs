use nalgebra::{Matrix6, Vector6};

use crate::geometry::SE3;
use crate::tracking::frame::features::{LineFeature, PointFeature};

/// Error value stored on a frame whose pose estimate was rejected.
pub const REJECTED_ERROR: f64 = -1.0;

/// One rectified stereo capture: an owning arena of point and line
/// features plus the pose outputs written by the optimizer.
///
/// Correspondence sets refer to features by index into `stereo_pt` and
/// `stereo_ls`, so the arenas must not be reordered while a cycle runs.
#[derive(Debug, Clone)]
pub struct StereoFrame {
    pub frame_idx: u64,
    pub stereo_pt: Vec<PointFeature>,
    pub stereo_ls: Vec<LineFeature>,
    /// Relative pose to the predecessor (current → previous camera).
    pub dt: SE3,
    /// Accumulated pose, frame to world.
    pub t_fw: SE3,
    /// Covariance of `dt` in twist coordinates `[v; ω]`.
    pub dt_cov: Matrix6<f64>,
    /// Eigenvalues of `dt_cov`, ascending.
    pub dt_cov_eig: Vector6<f64>,
    /// Normalized optimization error, or [`REJECTED_ERROR`].
    pub err_norm: f64,
}

impl StereoFrame {
    pub fn new(frame_idx: u64, stereo_pt: Vec<PointFeature>, stereo_ls: Vec<LineFeature>) -> Self {
        Self {
            frame_idx,
            stereo_pt,
            stereo_ls,
            dt: SE3::identity(),
            t_fw: SE3::identity(),
            dt_cov: Matrix6::zeros(),
            dt_cov_eig: Vector6::zeros(),
            err_norm: 0.0,
        }
    }

    /// True when the last pose estimate for this frame was rejected.
    pub fn is_rejected(&self) -> bool {
        self.err_norm < 0.0
    }

    /// True when every feature carries a persistent track ID.
    pub fn all_tracked(&self) -> bool {
        self.stereo_pt.iter().all(|p| p.track_id.is_some())
            && self.stereo_ls.iter().all(|l| l.track_id.is_some())
    }
}
