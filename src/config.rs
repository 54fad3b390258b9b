//! Tracker settings.
//!
//! One immutable [`VoConfig`] value describes a run: the stereo camera,
//! the association thresholds and the optimizer parameters. It is loaded
//! from YAML (missing keys fall back to the defaults below) and handed to
//! the frame handler at construction.

use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::tracking::frame::PinholeStereoCamera;

/// Complete settings for a stereo odometry run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoConfig {
    pub camera: CameraConfig,
    pub features: FeatureConfig,
    pub optimizer: OptimizerConfig,
}

/// Rectified stereo camera calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// [fx, fy, cx, cy] intrinsics in pixels.
    pub intrinsics: [f64; 4],
    /// Stereo baseline in meters.
    pub baseline: f64,
    /// [width, height] in pixels.
    pub resolution: [u32; 2],
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            intrinsics: [435.2, 435.2, 367.2, 252.2],
            baseline: 0.11,
            resolution: [752, 480],
        }
    }
}

impl CameraConfig {
    pub fn to_camera(&self) -> PinholeStereoCamera {
        let [fx, fy, cx, cy] = self.intrinsics;
        let [width, height] = self.resolution;
        PinholeStereoCamera::new(fx, fy, cx, cy, self.baseline, width, height)
    }
}

/// Frame-to-frame association parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub has_points: bool,
    pub has_lines: bool,
    /// Require mutual best matches (runs both matching directions).
    pub best_lr_matches: bool,
    /// Run the two matching directions on separate threads.
    pub lr_in_parallel: bool,
    /// Points: accept when best / second-best distance exceeds this.
    pub min_ratio_12_p: f64,
    /// Lines: multiplier on the MAD of (second - best) distance gaps.
    pub desc_th_l: f64,
    /// Max point flow between frames, as a fraction of the image width.
    pub max_f2f_disp: f64,
    /// Max orientation change of a matched segment (radians).
    pub max_f2f_ang_diff: f64,
    /// Max segment midpoint flow (pixels).
    pub f2f_flow_th: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            has_points: true,
            has_lines: true,
            best_lr_matches: true,
            lr_in_parallel: true,
            min_ratio_12_p: 0.1,
            desc_th_l: 0.1,
            max_f2f_disp: 0.04,
            max_f2f_ang_diff: 0.1,
            f2f_flow_th: 10.0,
        }
    }
}

/// Pose optimization parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Optimization runs only with strictly more inliers than this.
    pub min_features: usize,
    pub use_lev_marquardt: bool,
    pub max_iters: usize,
    /// Iterations of the refinement pass after outlier removal.
    pub max_iters_ref: usize,
    pub min_error: f64,
    pub min_error_change: f64,
    /// Final errors at or above this are rejected.
    pub max_optim_error: f64,
    /// Residual norms at or below this are degenerate.
    pub homog_th: f64,
    pub robust_cost: bool,
    pub use_uncertainty: bool,
    /// Pixel noise standard deviation for uncertainty weighting.
    pub sigma_px: f64,
    /// Balance point and line contributions by their residual scales.
    pub scale_points_lines: bool,
    /// Outlier threshold in MADs.
    pub inlier_k: f64,
    pub motion_prior: bool,
    /// Initial Levenberg-Marquardt damping.
    pub lambda_lm: f64,
    /// Levenberg-Marquardt damping update factor.
    pub lambda_k: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            min_features: 10,
            use_lev_marquardt: false,
            max_iters: 10,
            max_iters_ref: 5,
            min_error: 1e-7,
            min_error_change: 1e-7,
            max_optim_error: 1e7,
            homog_th: 1e-7,
            robust_cost: true,
            use_uncertainty: false,
            sigma_px: 0.1,
            scale_points_lines: false,
            inlier_k: 4.0,
            motion_prior: false,
            lambda_lm: 1e-4,
            lambda_k: 10.0,
        }
    }
}

impl VoConfig {
    /// Load settings from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        let config: VoConfig = serde_yaml::from_reader(file)
            .with_context(|| format!("Failed to parse settings in {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Load settings from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: VoConfig = serde_yaml::from_str(yaml).context("Failed to parse settings")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the tracker cannot run with.
    pub fn validate(&self) -> Result<()> {
        let cam = &self.camera;
        if cam.intrinsics[0] <= 0.0 || cam.intrinsics[1] <= 0.0 {
            bail!("focal lengths must be positive, got {:?}", cam.intrinsics);
        }
        if cam.baseline <= 0.0 {
            bail!("stereo baseline must be positive, got {}", cam.baseline);
        }
        if cam.resolution[0] == 0 || cam.resolution[1] == 0 {
            bail!("image resolution must be non-zero, got {:?}", cam.resolution);
        }

        let f = &self.features;
        if !f.has_points && !f.has_lines {
            bail!("at least one of points or lines must be enabled");
        }
        for (name, value) in [
            ("min_ratio_12_p", f.min_ratio_12_p),
            ("desc_th_l", f.desc_th_l),
            ("max_f2f_disp", f.max_f2f_disp),
            ("max_f2f_ang_diff", f.max_f2f_ang_diff),
            ("f2f_flow_th", f.f2f_flow_th),
        ] {
            if !(value >= 0.0) {
                bail!("features.{} must be non-negative, got {}", name, value);
            }
        }

        let o = &self.optimizer;
        if o.max_iters == 0 {
            bail!("optimizer.max_iters must be at least 1");
        }
        if o.max_iters_ref == 0 {
            bail!("optimizer.max_iters_ref must be at least 1");
        }
        for (name, value) in [
            ("min_error", o.min_error),
            ("min_error_change", o.min_error_change),
            ("homog_th", o.homog_th),
            ("inlier_k", o.inlier_k),
            ("lambda_lm", o.lambda_lm),
        ] {
            if !(value >= 0.0) {
                bail!("optimizer.{} must be non-negative, got {}", name, value);
            }
        }
        if !(o.sigma_px > 0.0) {
            bail!("optimizer.sigma_px must be positive, got {}", o.sigma_px);
        }
        if !(o.lambda_k > 0.0) {
            bail!("optimizer.lambda_k must be positive, got {}", o.lambda_k);
        }
        if !(o.max_optim_error > 0.0) {
            bail!("optimizer.max_optim_error must be positive, got {}", o.max_optim_error);
        }
        Ok(())
    }
}
