//! Stereo frame handler: frame lifecycle and two-stage pose estimation.
//!
//! One cycle runs synchronously:
//! 1. `insert_stereo_pair` extracts features and associates them with the
//!    previous frame
//! 2. `optimize_pose` estimates the relative motion, purges outliers and
//!    refines, then writes pose, covariance and error on the current frame
//! 3. `update_frame` makes the current frame the previous one
//!
//! The handler owns both frames and the correspondence set for the whole
//! cycle. Share it across threads only through [`SharedHandler`].

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use nalgebra::{Matrix6, Vector6};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::VoConfig;
use crate::geometry::SE3;
use crate::optimizer::{covariance_eigenvalues, MotionEstimator, MotionPrior, OutlierFilter, ResidualModel, SolverResult};
use crate::tracking::association::{Correspondences, TrackAssociator, TrackIdCounters};
use crate::tracking::frame::{PinholeStereoCamera, StereoFrame, REJECTED_ERROR};
use crate::tracking::result::{CycleSummary, PoseOutcome};
use crate::tracking::state::TrackingState;

/// Produces stereo features from a rectified image pair.
pub trait FeatureExtractor {
    type Image: ?Sized;

    fn extract(&mut self, left: &Self::Image, right: &Self::Image, frame_idx: u64) -> Result<StereoFrame>;
}

/// Handler behind a single coarse lock.
pub type SharedHandler<E> = Arc<Mutex<StereoFrameHandler<E>>>;

/// Snapshot of the last keyframe chosen by the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyFrameRef {
    pub frame_idx: u64,
    /// Keyframe to world.
    pub t_fw: SE3,
    /// Track ID counters when the keyframe was taken.
    pub counters: TrackIdCounters,
}

pub struct StereoFrameHandler<E: FeatureExtractor> {
    config: VoConfig,
    camera: PinholeStereoCamera,
    extractor: E,
    associator: TrackAssociator,
    estimator: MotionEstimator,
    outlier_filter: OutlierFilter,

    counters: TrackIdCounters,
    prev_frame: Option<StereoFrame>,
    curr_frame: Option<StereoFrame>,
    correspondences: Correspondences,

    prior: Option<MotionPrior>,
    keyframe: Option<KeyFrameRef>,
    state: TrackingState,
    last_summary: Option<CycleSummary>,
}

impl<E: FeatureExtractor> StereoFrameHandler<E> {
    pub fn new(config: VoConfig, extractor: E) -> Result<Self> {
        config.validate()?;
        let camera = config.camera.to_camera();
        let model = ResidualModel::new(
            camera,
            &config.optimizer,
            config.features.has_points,
            config.features.has_lines,
        );

        Ok(Self {
            associator: TrackAssociator::new(&config.features, &camera),
            estimator: MotionEstimator::new(model, &config.optimizer),
            outlier_filter: OutlierFilter::new(config.optimizer.inlier_k),
            camera,
            config,
            extractor,
            counters: TrackIdCounters::new(),
            prev_frame: None,
            curr_frame: None,
            correspondences: Correspondences::default(),
            prior: None,
            keyframe: None,
            state: TrackingState::NotInitialized,
            last_summary: None,
        })
    }

    pub fn into_shared(self) -> SharedHandler<E> {
        Arc::new(Mutex::new(self))
    }

    pub fn is_initialized(&self) -> bool {
        self.prev_frame.is_some()
    }

    fn extract(&mut self, left: &E::Image, right: &E::Image, frame_idx: u64) -> Result<StereoFrame> {
        let mut frame = self
            .extractor
            .extract(left, right, frame_idx)
            .with_context(|| format!("Failed to extract features for frame {}", frame_idx))?;
        frame.frame_idx = frame_idx;
        Ok(frame)
    }

    /// Start a new track at identity pose with fresh ID counters.
    pub fn initialize(&mut self, left: &E::Image, right: &E::Image, frame_idx: u64) -> Result<()> {
        let mut frame = self.extract(left, right, frame_idx)?;
        self.counters = TrackIdCounters::new();
        self.counters.assign_missing(&mut frame);
        frame.dt = SE3::identity();
        frame.t_fw = SE3::identity();

        info!(
            frame = frame_idx,
            points = frame.stereo_pt.len(),
            lines = frame.stereo_ls.len(),
            "tracker initialized"
        );

        self.keyframe = Some(KeyFrameRef {
            frame_idx,
            t_fw: frame.t_fw,
            counters: self.counters,
        });
        self.prev_frame = Some(frame);
        self.curr_frame = None;
        self.correspondences.clear();
        self.prior = None;
        self.last_summary = None;
        self.state = TrackingState::Ok;
        Ok(())
    }

    /// Extract the next frame and associate it with the previous one.
    pub fn insert_stereo_pair(&mut self, left: &E::Image, right: &E::Image, frame_idx: u64) -> Result<()> {
        let prev_idx = self
            .prev_frame
            .as_ref()
            .map(|f| f.frame_idx)
            .context("insert_stereo_pair called before initialize")?;
        if frame_idx <= prev_idx {
            bail!("Frame index {} does not follow previous frame {}", frame_idx, prev_idx);
        }

        self.curr_frame = Some(self.extract(left, right, frame_idx)?);
        self.f2f_tracking()
    }

    /// Associate the current frame with the previous one.
    pub fn f2f_tracking(&mut self) -> Result<()> {
        let (Some(prev), Some(curr)) = (self.prev_frame.as_mut(), self.curr_frame.as_mut()) else {
            bail!("f2f_tracking needs a previous and a current frame");
        };
        self.correspondences = self.associator.associate(prev, curr, &mut self.counters);
        Ok(())
    }

    /// Estimate the relative pose, warm-started from the previous motion.
    pub fn optimize_pose(&mut self) -> Result<PoseOutcome> {
        let warm_start = self
            .prev_frame
            .as_ref()
            .map(|f| f.dt.inverse())
            .context("optimize_pose called before initialize")?;
        self.optimize_pose_from(warm_start)
    }

    /// Estimate the relative pose starting from `initial`.
    ///
    /// `initial` maps previous-camera coordinates into the current camera.
    /// Fallbacks never fail the call: they store an identity relative pose
    /// and [`REJECTED_ERROR`] on the current frame.
    pub fn optimize_pose_from(&mut self, initial: SE3) -> Result<PoseOutcome> {
        let (Some(prev), Some(curr)) = (self.prev_frame.as_mut(), self.curr_frame.as_mut()) else {
            bail!("optimize_pose needs a previous and a current frame");
        };
        let opt = &self.config.optimizer;
        let corr = &mut self.correspondences;
        let prior = if opt.motion_prior { self.prior.as_ref() } else { None };

        let mut iterations = 0;
        let mut outliers_removed = 0;
        let (outcome, solution): (PoseOutcome, Option<SolverResult>) = 'estimate: {
            if corr.n_inliers() <= opt.min_features {
                break 'estimate (PoseOutcome::InsufficientCorrespondences, None);
            }

            let first = self.estimator.optimize(initial, prev, corr, opt.max_iters, prior);
            iterations += first.iterations;
            if !first.pose.is_finite() {
                break 'estimate (PoseOutcome::NonFiniteSolution, None);
            }

            let stats = self.outlier_filter.remove_outliers(&first.pose, &self.camera, prev, corr);
            outliers_removed = stats.points_removed + stats.lines_removed;
            if corr.n_inliers() <= opt.min_features {
                break 'estimate (PoseOutcome::InsufficientCorrespondences, None);
            }

            let refined = self.estimator.optimize(first.pose, prev, corr, opt.max_iters_ref, prior);
            iterations += refined.iterations;
            let outcome = if !refined.pose.is_finite() {
                PoseOutcome::NonFiniteSolution
            } else if !(refined.error < opt.max_optim_error) {
                PoseOutcome::ExcessiveResidualError
            } else {
                PoseOutcome::Converged
            };
            (outcome, Some(refined))
        };

        match (outcome, &solution) {
            (PoseOutcome::Converged, Some(sol)) => {
                curr.dt = sol.pose.inverse();
                curr.dt_cov = sol.covariance;
                curr.dt_cov_eig = covariance_eigenvalues(&sol.covariance);
                curr.err_norm = sol.error;
            }
            _ => {
                warn!(frame = curr.frame_idx, %outcome, "pose estimate rejected, assuming no motion");
                curr.dt = SE3::identity();
                curr.dt_cov = Matrix6::zeros();
                curr.dt_cov_eig = solution
                    .as_ref()
                    .map_or_else(|| Vector6::zeros(), |sol| covariance_eigenvalues(&sol.covariance));
                curr.err_norm = REJECTED_ERROR;
            }
        }
        curr.t_fw = prev.t_fw.compose(&curr.dt);

        let summary = CycleSummary {
            frame_idx: curr.frame_idx,
            outcome,
            matched_pt: corr.matched_pt.len(),
            matched_ls: corr.matched_ls.len(),
            inliers_pt: corr.n_inliers_pt(),
            inliers_ls: corr.n_inliers_ls(),
            outliers_removed,
            iterations,
            err_norm: curr.err_norm,
        };
        debug!(
            frame = summary.frame_idx,
            matched_pt = summary.matched_pt,
            matched_ls = summary.matched_ls,
            inliers = summary.n_inliers(),
            outliers_removed,
            iterations,
            err = summary.err_norm,
            "pose optimized"
        );

        self.state = TrackingState::after(outcome);
        self.last_summary = Some(summary);
        Ok(outcome)
    }

    /// Bias the next Gauss-Newton estimate towards `increment`.
    ///
    /// Only used when `optimizer.motion_prior` is enabled; cleared by
    /// [`update_frame`](Self::update_frame).
    pub fn set_motion_prior(&mut self, increment: Vector6<f64>, covariance: Matrix6<f64>) -> Result<()> {
        let prior = MotionPrior::new(increment, covariance).context("Motion prior covariance is not invertible")?;
        if !self.config.optimizer.motion_prior {
            debug!("motion prior ignored: disabled in configuration");
        }
        self.prior = Some(prior);
        Ok(())
    }

    pub fn clear_motion_prior(&mut self) {
        self.prior = None;
    }

    /// Advance the window: the current frame becomes the previous one.
    pub fn update_frame(&mut self) -> Result<()> {
        let curr = self
            .curr_frame
            .take()
            .context("update_frame called without a current frame")?;
        self.prev_frame = Some(curr);
        self.correspondences.clear();
        self.prior = None;
        Ok(())
    }

    /// Record the most recent frame as the reference keyframe.
    pub fn set_keyframe(&mut self) -> Result<KeyFrameRef> {
        let frame = self.latest_frame().context("set_keyframe called before initialize")?;
        let keyframe = KeyFrameRef {
            frame_idx: frame.frame_idx,
            t_fw: frame.t_fw,
            counters: self.counters,
        };
        self.keyframe = Some(keyframe);
        Ok(keyframe)
    }

    /// Run one full cycle. The first call initializes and returns `None`.
    pub fn track(&mut self, left: &E::Image, right: &E::Image, frame_idx: u64) -> Result<Option<CycleSummary>> {
        if !self.is_initialized() {
            self.initialize(left, right, frame_idx)?;
            return Ok(None);
        }
        self.insert_stereo_pair(left, right, frame_idx)?;
        self.optimize_pose()?;
        let summary = self.last_summary.clone();
        self.update_frame()?;
        Ok(summary)
    }

    pub fn config(&self) -> &VoConfig {
        &self.config
    }

    pub fn camera(&self) -> &PinholeStereoCamera {
        &self.camera
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn previous_frame(&self) -> Option<&StereoFrame> {
        self.prev_frame.as_ref()
    }

    pub fn current_frame(&self) -> Option<&StereoFrame> {
        self.curr_frame.as_ref()
    }

    /// Current frame if a cycle is in progress, else the previous one.
    pub fn latest_frame(&self) -> Option<&StereoFrame> {
        self.curr_frame.as_ref().or(self.prev_frame.as_ref())
    }

    /// World pose of the latest frame.
    pub fn pose(&self) -> Option<SE3> {
        self.latest_frame().map(|f| f.t_fw)
    }

    pub fn correspondences(&self) -> &Correspondences {
        &self.correspondences
    }

    pub fn counters(&self) -> &TrackIdCounters {
        &self.counters
    }

    pub fn keyframe(&self) -> Option<&KeyFrameRef> {
        self.keyframe.as_ref()
    }

    pub fn last_summary(&self) -> Option<&CycleSummary> {
        self.last_summary.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    use crate::tracking::synthetic::{PrecomputedExtractor, SceneConfig, SyntheticScene, SyntheticView};

    fn step() -> SE3 {
        SE3::exp(&Vector6::new(0.02, -0.01, 0.05, 0.004, -0.008, 0.003))
    }

    fn view(k: u32) -> SyntheticView {
        let mut t_wc = SE3::identity();
        for _ in 0..k {
            t_wc = t_wc.compose(&step());
        }
        SyntheticView { t_wc }
    }

    fn handler_with(config: VoConfig, scene: SceneConfig) -> StereoFrameHandler<SyntheticScene> {
        let camera = config.camera.to_camera();
        StereoFrameHandler::new(config, SyntheticScene::new(camera, scene)).unwrap()
    }

    fn track_views(handler: &mut StereoFrameHandler<SyntheticScene>, views: &[SyntheticView]) -> Vec<CycleSummary> {
        views
            .iter()
            .enumerate()
            .filter_map(|(k, v)| handler.track(v, v, k as u64).unwrap())
            .collect()
    }

    #[test]
    fn test_tracks_ground_truth_with_both_solvers() {
        for use_lev_marquardt in [false, true] {
            let mut config = VoConfig::default();
            config.optimizer.use_lev_marquardt = use_lev_marquardt;
            let mut handler = handler_with(config, SceneConfig::default());
            let views: Vec<SyntheticView> = (0..4).map(view).collect();

            let summaries = track_views(&mut handler, &views);

            assert_eq!(summaries.len(), 3);
            assert!(summaries.iter().all(|s| s.outcome == PoseOutcome::Converged));
            assert_eq!(handler.state(), TrackingState::Ok);

            let last = handler.previous_frame().unwrap();
            let expected_dt = SyntheticScene::relative_motion(&views[2].t_wc, &views[3].t_wc).inverse();
            assert_relative_eq!(last.dt.log(), expected_dt.log(), epsilon = 1e-2);
            assert_relative_eq!(last.t_fw.log(), views[3].t_wc.log(), epsilon = 3e-2);
            assert!(last.err_norm >= 0.0);
            assert!(last.dt_cov.iter().all(|v| v.is_finite()));
            assert!(last.dt_cov_eig.iter().zip(last.dt_cov_eig.iter().skip(1)).all(|(a, b)| a <= b));
        }
    }

    #[test]
    fn test_same_pose_gives_near_identity() {
        let mut handler = handler_with(VoConfig::default(), SceneConfig::default());
        let summaries = track_views(&mut handler, &[view(0), view(0)]);

        assert_eq!(summaries[0].outcome, PoseOutcome::Converged);
        let frame = handler.previous_frame().unwrap();
        assert!(frame.dt.log().norm() < 5e-3);
        assert!(frame.err_norm >= 0.0 && frame.err_norm < 0.5);
    }

    #[test]
    fn test_duplicate_frames_fall_back_to_identity() {
        let mut scene = SyntheticScene::new(VoConfig::default().camera.to_camera(), SceneConfig::default());
        let frame = scene.render(&SE3::identity(), 0);
        let extractor = PrecomputedExtractor::new(vec![frame.clone(), frame]);
        let mut handler = StereoFrameHandler::new(VoConfig::default(), extractor).unwrap();

        handler.track(&(), &(), 0).unwrap();
        let summary = handler.track(&(), &(), 1).unwrap().unwrap();

        // Zero residuals are degenerate, so nothing is left to estimate from.
        assert_eq!(summary.outcome, PoseOutcome::InsufficientCorrespondences);
        let frame = handler.previous_frame().unwrap();
        assert_eq!(frame.dt, SE3::identity());
        assert!(frame.is_rejected());
        assert_eq!(handler.state(), TrackingState::Lost);
    }

    #[test]
    fn test_excessive_error_discards_estimate() {
        let mut config = VoConfig::default();
        config.optimizer.max_optim_error = 1e-9;
        let mut handler = handler_with(config, SceneConfig::default());

        let summaries = track_views(&mut handler, &[view(0), view(1)]);

        let summary = &summaries[0];
        assert_eq!(summary.outcome, PoseOutcome::ExcessiveResidualError);
        assert!(summary.iterations > 0);
        assert_eq!(summary.err_norm, REJECTED_ERROR);
        let frame = handler.previous_frame().unwrap();
        assert_eq!(frame.dt, SE3::identity());
        assert_eq!(frame.t_fw, SE3::identity());
        assert_eq!(frame.dt_cov, Matrix6::zeros());
        assert!(frame.dt_cov_eig.iter().all(|v| v.is_finite()));
        assert!(frame.dt_cov_eig.iter().any(|v| *v > 0.0));
        assert_eq!(frame.err_norm, REJECTED_ERROR);
        assert_eq!(handler.state(), TrackingState::Lost);
    }

    #[test]
    fn test_non_finite_estimate_skips_outlier_pass() {
        let nan_pose = SE3 {
            rotation: nalgebra::UnitQuaternion::identity(),
            translation: nalgebra::Vector3::new(f64::NAN, 0.0, 0.0),
        };
        for use_lev_marquardt in [false, true] {
            let mut config = VoConfig::default();
            config.optimizer.use_lev_marquardt = use_lev_marquardt;
            let mut handler = handler_with(config, SceneConfig::default());
            handler.initialize(&view(0), &view(0), 0).unwrap();
            handler.insert_stereo_pair(&view(1), &view(1), 1).unwrap();

            let outcome = handler.optimize_pose_from(nan_pose).unwrap();

            assert_eq!(outcome, PoseOutcome::NonFiniteSolution);
            let summary = handler.last_summary().unwrap();
            assert_eq!(summary.outliers_removed, 0);
            assert_eq!(summary.iterations, 1);
            assert_eq!(summary.err_norm, REJECTED_ERROR);
            let frame = handler.current_frame().unwrap();
            assert_eq!(frame.dt, SE3::identity());
            assert!(frame.t_fw.is_finite());
            assert_eq!(frame.dt_cov, Matrix6::zeros());
            assert_eq!(frame.dt_cov_eig, Vector6::zeros());
            assert_eq!(handler.state(), TrackingState::Lost);
        }
    }

    #[test]
    fn test_insufficient_features_yield_identity_for_both_solvers() {
        for use_lev_marquardt in [false, true] {
            let mut config = VoConfig::default();
            config.optimizer.use_lev_marquardt = use_lev_marquardt;
            let scene = SceneConfig {
                n_points: 6,
                n_lines: 3,
                ..Default::default()
            };
            let mut handler = handler_with(config, scene);

            let summaries = track_views(&mut handler, &[view(0), view(1)]);

            assert_eq!(summaries[0].outcome, PoseOutcome::InsufficientCorrespondences);
            assert_eq!(summaries[0].iterations, 0);
            let frame = handler.previous_frame().unwrap();
            assert_eq!(frame.dt, SE3::identity());
            assert_eq!(frame.dt_cov, Matrix6::zeros());
            assert_eq!(frame.dt_cov_eig, Vector6::zeros());
            assert_eq!(frame.err_norm, REJECTED_ERROR);
            assert_eq!(frame.t_fw, SE3::identity());
        }
    }

    #[test]
    fn test_uncertainty_weighting_tracks() {
        let mut config = VoConfig::default();
        config.optimizer.use_uncertainty = true;
        let mut handler = handler_with(config, SceneConfig::default());

        let summaries = track_views(&mut handler, &[view(0), view(1)]);

        assert_eq!(summaries[0].outcome, PoseOutcome::Converged);
        let frame = handler.previous_frame().unwrap();
        assert_relative_eq!(frame.dt.log(), step().log(), epsilon = 2e-2);
    }

    #[test]
    fn test_ids_and_inlier_counts_stay_consistent() {
        let scene = SceneConfig {
            outlier_fraction: 0.05,
            ..Default::default()
        };
        let mut handler = handler_with(VoConfig::default(), scene);
        handler.initialize(&view(0), &view(0), 0).unwrap();
        let first_ids: Vec<_> = handler
            .previous_frame()
            .unwrap()
            .stereo_pt
            .iter()
            .map(|p| p.track_id)
            .collect();

        for k in 1..4u32 {
            let issued = (handler.counters().points_issued(), handler.counters().lines_issued());
            handler.insert_stereo_pair(&view(k), &view(k), k as u64).unwrap();
            let corr = handler.correspondences();
            assert_eq!(corr.n_inliers(), corr.n_inliers_pt() + corr.n_inliers_ls());

            handler.optimize_pose().unwrap();
            let corr = handler.correspondences();
            let prev = handler.previous_frame().unwrap();
            assert_eq!(corr.count_flags(prev), (corr.n_inliers_pt(), corr.n_inliers_ls()));
            assert_eq!(corr.n_inliers(), corr.n_inliers_pt() + corr.n_inliers_ls());

            let curr = handler.current_frame().unwrap();
            assert!(curr.all_tracked());
            assert!(handler.counters().points_issued() >= issued.0);
            assert!(handler.counters().lines_issued() >= issued.1);
            if k == 1 {
                let carried = curr
                    .stereo_pt
                    .iter()
                    .filter(|p| first_ids.contains(&p.track_id))
                    .count();
                assert!(carried > 50);
            }
            handler.update_frame().unwrap();
        }
    }

    #[test]
    fn test_injected_outliers_are_removed() {
        let scene = SceneConfig {
            outlier_fraction: 0.1,
            outlier_offset_px: 12.0,
            ..Default::default()
        };
        let mut handler = handler_with(VoConfig::default(), scene);

        let summaries = track_views(&mut handler, &[view(0), view(1)]);

        assert_eq!(summaries[0].outcome, PoseOutcome::Converged);
        assert!(summaries[0].outliers_removed > 0);
        let frame = handler.previous_frame().unwrap();
        assert_relative_eq!(frame.dt.log(), step().log(), epsilon = 1e-2);
    }

    #[test]
    fn test_motion_prior_biases_gauss_newton() {
        let mut config = VoConfig::default();
        config.optimizer.motion_prior = true;
        let mut handler = handler_with(config, SceneConfig::default());
        handler.track(&view(0), &view(0), 0).unwrap();

        // A very tight prior on zero motion overrides the image evidence.
        handler
            .set_motion_prior(Vector6::zeros(), Matrix6::identity() * 1e-12)
            .unwrap();
        handler.track(&view(1), &view(1), 1).unwrap();
        assert!(handler.previous_frame().unwrap().dt.log().norm() < 1e-3);

        // The prior is consumed by the cycle.
        handler.track(&view(2), &view(2), 2).unwrap();
        let expected = SyntheticScene::relative_motion(&view(1).t_wc, &view(2).t_wc).inverse();
        assert_relative_eq!(handler.previous_frame().unwrap().dt.log(), expected.log(), epsilon = 1e-2);
    }

    #[test]
    fn test_motion_prior_ignored_when_disabled() {
        let mut handler = handler_with(VoConfig::default(), SceneConfig::default());
        handler.track(&view(0), &view(0), 0).unwrap();
        handler
            .set_motion_prior(Vector6::zeros(), Matrix6::identity() * 1e-12)
            .unwrap();
        handler.track(&view(1), &view(1), 1).unwrap();

        assert_relative_eq!(handler.previous_frame().unwrap().dt.log(), step().log(), epsilon = 1e-2);
    }

    #[test]
    fn test_lifecycle_misuse_is_an_error() {
        let mut handler = handler_with(VoConfig::default(), SceneConfig::default());
        assert!(handler.insert_stereo_pair(&view(0), &view(0), 0).is_err());
        assert!(handler.optimize_pose().is_err());
        assert!(handler.update_frame().is_err());
        assert!(handler.set_keyframe().is_err());

        handler.initialize(&view(0), &view(0), 5).unwrap();
        assert!(handler.insert_stereo_pair(&view(1), &view(1), 5).is_err());
        assert!(handler.optimize_pose().is_err());
        assert!(handler
            .set_motion_prior(Vector6::zeros(), Matrix6::zeros())
            .is_err());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = VoConfig::default();
        config.optimizer.max_iters = 0;
        let camera = config.camera.to_camera();
        assert!(StereoFrameHandler::new(config, SyntheticScene::new(camera, SceneConfig::default())).is_err());
    }

    #[test]
    fn test_keyframe_snapshot() {
        let mut handler = handler_with(VoConfig::default(), SceneConfig::default());
        handler.track(&view(0), &view(0), 0).unwrap();
        assert_eq!(handler.keyframe().unwrap().frame_idx, 0);

        handler.track(&view(1), &view(1), 1).unwrap();
        assert_eq!(handler.keyframe().unwrap().frame_idx, 0);

        let kf = handler.set_keyframe().unwrap();
        assert_eq!(kf.frame_idx, 1);
        assert_eq!(kf.counters, *handler.counters());
        assert_eq!(kf.t_fw, handler.pose().unwrap());
    }

    #[test]
    fn test_shared_handler_across_threads() {
        let shared = handler_with(VoConfig::default(), SceneConfig::default()).into_shared();
        let worker = Arc::clone(&shared);

        std::thread::spawn(move || {
            let mut handler = worker.lock();
            handler.track(&view(0), &view(0), 0).unwrap();
            handler.track(&view(1), &view(1), 1).unwrap();
        })
        .join()
        .unwrap();

        let handler = shared.lock();
        assert_eq!(handler.previous_frame().unwrap().frame_idx, 1);
        assert_eq!(handler.state(), TrackingState::Ok);
    }
}
