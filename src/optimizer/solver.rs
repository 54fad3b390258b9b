//! Iterative relative-pose solvers over the [`ResidualModel`].
//!
//! Both solvers update the hypothesis as `T ← exp(δ)⁻¹ · T` with
//! `H δ = g`, and stop when the error change or the error itself falls
//! below its floor, when the step vanishes, or after `max_iters`.

use nalgebra::{Matrix6, Vector6};
use tracing::trace;

use crate::config::OptimizerConfig;
use crate::geometry::SE3;
use crate::tracking::association::Correspondences;
use crate::tracking::frame::StereoFrame;

use super::residuals::ResidualModel;

/// Error assumed before the first iteration.
const INITIAL_ERROR: f64 = 999_999_999.9;

/// Gaussian prior on the relative motion, in twist coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionPrior {
    /// Expected relative motion `[v; ω]`.
    pub increment: Vector6<f64>,
    pub covariance: Matrix6<f64>,
    information: Matrix6<f64>,
}

impl MotionPrior {
    /// Returns `None` when the covariance cannot be inverted.
    pub fn new(increment: Vector6<f64>, covariance: Matrix6<f64>) -> Option<Self> {
        let information = covariance.try_inverse()?;
        information.iter().all(|v| v.is_finite()).then_some(Self {
            increment,
            covariance,
            information,
        })
    }

    pub fn information(&self) -> &Matrix6<f64> {
        &self.information
    }
}

/// Outcome of one solver run.
#[derive(Debug, Clone)]
pub struct SolverResult {
    pub pose: SE3,
    /// Inverse of the final (possibly damped) Hessian.
    pub covariance: Matrix6<f64>,
    /// Normalized error at `pose`.
    pub error: f64,
    pub iterations: usize,
}

/// Solve the symmetric system `H x = g`.
///
/// Tries Cholesky first and falls back to LU for indefinite systems.
fn solve_symmetric(h: &Matrix6<f64>, g: &Vector6<f64>) -> Option<Vector6<f64>> {
    match h.cholesky() {
        Some(chol) => Some(chol.solve(g)),
        None => h.lu().solve(g),
    }
}

/// Covariance from the final Hessian.
///
/// Cholesky inverse when H is positive definite, otherwise the SVD
/// pseudo-inverse; zeros when neither succeeds or H is not finite.
pub fn invert_hessian(h: &Matrix6<f64>) -> Matrix6<f64> {
    if !h.iter().all(|v| v.is_finite()) {
        return Matrix6::zeros();
    }
    if let Some(chol) = h.cholesky() {
        return chol.inverse();
    }
    h.svd(true, true)
        .pseudo_inverse(1e-12)
        .unwrap_or_else(|_| Matrix6::zeros())
}

/// Eigenvalues of a covariance in ascending order; zeros when the matrix
/// is not finite or the decomposition does not converge.
pub fn covariance_eigenvalues(cov: &Matrix6<f64>) -> Vector6<f64> {
    if !cov.iter().all(|v| v.is_finite()) {
        return Vector6::zeros();
    }
    match cov.try_symmetric_eigen(f64::EPSILON, 200) {
        Some(eig) => {
            let mut values: Vec<f64> = eig.eigenvalues.iter().copied().collect();
            values.sort_by(f64::total_cmp);
            Vector6::from_vec(values)
        }
        None => Vector6::zeros(),
    }
}

/// Gauss-Newton and Levenberg-Marquardt over one correspondence set.
#[derive(Debug, Clone)]
pub struct MotionEstimator {
    model: ResidualModel,
    use_lev_marquardt: bool,
    min_error: f64,
    min_error_change: f64,
    lambda_lm: f64,
    lambda_k: f64,
}

impl MotionEstimator {
    pub fn new(model: ResidualModel, config: &OptimizerConfig) -> Self {
        Self {
            model,
            use_lev_marquardt: config.use_lev_marquardt,
            min_error: config.min_error,
            min_error_change: config.min_error_change,
            lambda_lm: config.lambda_lm,
            lambda_k: config.lambda_k,
        }
    }

    /// Run the configured solver. The prior only affects Gauss-Newton.
    pub fn optimize(
        &self,
        initial: SE3,
        frame: &mut StereoFrame,
        corr: &mut Correspondences,
        max_iters: usize,
        prior: Option<&MotionPrior>,
    ) -> SolverResult {
        if self.use_lev_marquardt {
            self.levenberg_marquardt(initial, frame, corr, max_iters)
        } else {
            self.gauss_newton(initial, frame, corr, max_iters, prior)
        }
    }

    fn converged(&self, err: f64, err_prev: f64) -> bool {
        (err - err_prev).abs() < self.min_error_change || err < self.min_error
    }

    pub fn gauss_newton(
        &self,
        initial: SE3,
        frame: &mut StereoFrame,
        corr: &mut Correspondences,
        max_iters: usize,
        prior: Option<&MotionPrior>,
    ) -> SolverResult {
        let mut pose = initial;
        let mut h = Matrix6::zeros();
        let mut err = 0.0;
        let mut err_prev = INITIAL_ERROR;
        let mut iterations = 0;
        let mut stale = true;

        for iter in 0..max_iters {
            iterations = iter + 1;
            let eqs = self.model.build(&pose, frame, corr);
            h = eqs.hessian;
            err = eqs.error;
            stale = false;
            let mut g = eqs.gradient;
            if let Some(prior) = prior {
                h += prior.information();
            }
            if self.converged(err, err_prev) {
                break;
            }

            if let Some(prior) = prior {
                g += prior.information() * (pose.log() - prior.increment);
            }

            let Some(inc) = solve_symmetric(&h, &g) else {
                trace!(iter, "singular normal equations");
                break;
            };
            pose = SE3::exp(&inc).inverse().compose(&pose);
            stale = true;
            trace!(iter, err, step = inc.norm(), "gauss-newton");

            if inc.norm() < f64::EPSILON {
                break;
            }
            err_prev = err;
        }

        if stale {
            let eqs = self.model.evaluate(&pose, frame, corr);
            h = eqs.hessian;
            err = eqs.error;
            if let Some(prior) = prior {
                h += prior.information();
            }
        }

        SolverResult {
            pose,
            covariance: invert_hessian(&h),
            error: err,
            iterations,
        }
    }

    /// Levenberg-Marquardt with multiplicative damping `H + λ diag(H)`.
    ///
    /// A step that increases the error is discarded and λ is divided by
    /// `lambda_k`; an accepted step multiplies λ by `lambda_k`.
    pub fn levenberg_marquardt(
        &self,
        initial: SE3,
        frame: &mut StereoFrame,
        corr: &mut Correspondences,
        max_iters: usize,
    ) -> SolverResult {
        let mut pose = initial;
        let mut h = Matrix6::zeros();
        let mut err = 0.0;
        let mut err_prev = INITIAL_ERROR;
        let mut lambda = self.lambda_lm;
        let mut iterations = 0;
        let mut stale = true;

        for iter in 0..max_iters {
            iterations = iter + 1;
            let eqs = self.model.build(&pose, frame, corr);
            err = eqs.error;
            stale = false;
            if self.converged(err, err_prev) {
                h = eqs.hessian;
                break;
            }

            h = eqs.hessian + Matrix6::from_diagonal(&eqs.hessian.diagonal()) * lambda;
            let Some(inc) = solve_symmetric(&h, &eqs.gradient) else {
                trace!(iter, "singular normal equations");
                break;
            };
            let candidate = SE3::exp(&inc).inverse().compose(&pose);
            let err_candidate = self.model.evaluate_error(&candidate, frame, corr);

            if err_candidate <= err {
                lambda *= self.lambda_k;
                pose = candidate;
                stale = true;
            } else {
                lambda /= self.lambda_k;
            }
            trace!(iter, err, err_candidate, lambda, "levenberg-marquardt");

            if inc.norm() < f64::EPSILON {
                break;
            }
            err_prev = err;
        }

        if stale {
            let eqs = self.model.evaluate(&pose, frame, corr);
            h = eqs.hessian;
            err = eqs.error;
        }

        SolverResult {
            pose,
            covariance: invert_hessian(&h),
            error: err,
            iterations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Vector2, Vector3};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::tracking::frame::{BinaryDescriptor, LineFeature, PinholeStereoCamera, PointFeature};

    fn camera() -> PinholeStereoCamera {
        PinholeStereoCamera::new(450.0, 450.0, 320.0, 240.0, 0.12, 640, 480)
    }

    fn noise(rng: &mut StdRng, sigma: f64) -> Vector2<f64> {
        Vector2::new(rng.gen_range(-sigma..sigma), rng.gen_range(-sigma..sigma))
    }

    /// Previous-frame features observed in the current frame after `motion`.
    fn problem(motion: &SE3, seed: u64) -> (StereoFrame, Correspondences) {
        let cam = camera();
        let mut rng = StdRng::seed_from_u64(seed);
        let points: Vec<PointFeature> = (0..60)
            .map(|_| {
                let p = Vector3::new(rng.gen_range(-2.0..2.0), rng.gen_range(-1.5..1.5), rng.gen_range(3.0..9.0));
                let mut f = PointFeature::new(cam.projection(&p), cam.disparity_of(&p), p, BinaryDescriptor::default());
                f.pl_obs = cam.projection(&motion.transform_point(&p)) + noise(&mut rng, 0.5);
                f
            })
            .collect();
        let lines: Vec<LineFeature> = (0..20)
            .map(|_| {
                let sp = Vector3::new(rng.gen_range(-2.0..2.0), rng.gen_range(-1.5..1.5), rng.gen_range(3.0..9.0));
                let ep = sp + Vector3::new(rng.gen_range(-0.5..0.5), rng.gen_range(0.3..0.8), rng.gen_range(-0.3..0.3));
                let mut l = LineFeature::new(
                    cam.projection(&sp),
                    cam.projection(&ep),
                    cam.disparity_of(&sp),
                    cam.disparity_of(&ep),
                    sp,
                    ep,
                    BinaryDescriptor::default(),
                );
                let s_obs = cam.projection(&motion.transform_point(&sp)) + noise(&mut rng, 0.5);
                let e_obs = cam.projection(&motion.transform_point(&ep)) + noise(&mut rng, 0.5);
                l.le_obs = crate::tracking::frame::line_equation(&s_obs, &e_obs);
                l
            })
            .collect();
        let corr = Correspondences::from_matches((0..points.len()).collect(), (0..lines.len()).collect());
        (StereoFrame::new(0, points, lines), corr)
    }

    fn estimator(lm: bool) -> MotionEstimator {
        let config = OptimizerConfig {
            use_lev_marquardt: lm,
            max_iters: 20,
            ..Default::default()
        };
        MotionEstimator::new(ResidualModel::new(camera(), &config, true, true), &config)
    }

    fn truth() -> SE3 {
        SE3::exp(&Vector6::new(0.04, -0.02, 0.08, 0.01, -0.015, 0.005))
    }

    #[test]
    fn test_gauss_newton_converges() {
        let (mut frame, mut corr) = problem(&truth(), 1);
        let result = estimator(false).gauss_newton(SE3::identity(), &mut frame, &mut corr, 20, None);

        assert!(result.pose.is_finite());
        assert_relative_eq!(result.pose.log(), truth().log(), epsilon = 5e-3);
        assert!(result.error < 1.0);
        assert!(result.covariance.iter().all(|v| v.is_finite()));
        assert!(result.covariance.diagonal().iter().all(|v| *v > 0.0));
    }

    #[test]
    fn test_levenberg_marquardt_agrees_with_gauss_newton() {
        let (mut frame_gn, mut corr_gn) = problem(&truth(), 2);
        let (mut frame_lm, mut corr_lm) = problem(&truth(), 2);

        let gn = estimator(false).optimize(SE3::identity(), &mut frame_gn, &mut corr_gn, 20, None);
        let lm = estimator(true).optimize(SE3::identity(), &mut frame_lm, &mut corr_lm, 20, None);

        assert_relative_eq!(lm.pose.log(), truth().log(), epsilon = 5e-3);
        assert_relative_eq!(lm.pose.log(), gn.pose.log(), epsilon = 5e-3);
    }

    #[test]
    fn test_prior_at_truth_keeps_solution() {
        let (mut frame, mut corr) = problem(&truth(), 3);
        let prior = MotionPrior::new(truth().log(), Matrix6::identity() * 1e-4).unwrap();

        let result = estimator(false).gauss_newton(SE3::identity(), &mut frame, &mut corr, 20, Some(&prior));

        assert_relative_eq!(result.pose.log(), truth().log(), epsilon = 5e-3);
    }

    #[test]
    fn test_error_describes_returned_pose() {
        let est = estimator(false);
        for lm in [false, true] {
            let (mut frame, mut corr) = problem(&truth(), 4);
            let result = estimator(lm).optimize(SE3::identity(), &mut frame, &mut corr, 1, None);

            assert_ne!(result.pose, SE3::identity());
            assert_relative_eq!(
                result.error,
                est.model.evaluate_error(&result.pose, &frame, &corr),
                epsilon = 1e-12
            );
        }

        let (mut frame, mut corr) = problem(&truth(), 4);
        let unrefined = est.gauss_newton(SE3::identity(), &mut frame, &mut corr, 0, None);
        assert_eq!(unrefined.iterations, 0);
        assert_eq!(unrefined.pose, SE3::identity());
        assert_relative_eq!(
            unrefined.error,
            est.model.evaluate_error(&SE3::identity(), &frame, &corr),
            epsilon = 1e-12
        );
        assert!(unrefined.error > est.model.evaluate_error(&truth(), &frame, &corr));
        assert!(unrefined.covariance.diagonal().iter().all(|v| *v > 0.0));
    }

    #[test]
    fn test_singular_prior_rejected() {
        assert!(MotionPrior::new(Vector6::zeros(), Matrix6::zeros()).is_none());
    }

    #[test]
    fn test_empty_problem_keeps_initial_pose() {
        let mut frame = StereoFrame::new(0, Vec::new(), Vec::new());
        let mut corr = Correspondences::default();
        let initial = truth();

        for lm in [false, true] {
            let result = estimator(lm).optimize(initial, &mut frame, &mut corr, 5, None);
            assert_eq!(result.pose, initial);
            assert_eq!(result.error, 0.0);
            assert_eq!(result.covariance, Matrix6::zeros());
        }
    }

    #[test]
    fn test_covariance_eigenvalues_sorted() {
        let cov = Matrix6::from_diagonal(&Vector6::new(3.0, 1.0, 6.0, 2.0, 5.0, 4.0));
        let eig = covariance_eigenvalues(&cov);
        assert_relative_eq!(eig, Vector6::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0), epsilon = 1e-9);
        assert_eq!(covariance_eigenvalues(&Matrix6::zeros()), Vector6::zeros());
    }

    #[test]
    fn test_invert_hessian_fallbacks() {
        let spd = Matrix6::identity() * 4.0;
        assert_relative_eq!(invert_hessian(&spd), Matrix6::identity() * 0.25, epsilon = 1e-12);

        let mut singular = Matrix6::zeros();
        singular[(0, 0)] = 2.0;
        let pinv = invert_hessian(&singular);
        assert_relative_eq!(pinv[(0, 0)], 0.5, epsilon = 1e-12);
        assert_relative_eq!(pinv[(1, 1)], 0.0, epsilon = 1e-12);

        let mut nan = Matrix6::identity();
        assert_eq!(covariance_eigenvalues(&nan.map(|_| f64::NAN)), Vector6::zeros());
        nan[(2, 3)] = f64::NAN;
        assert_eq!(invert_hessian(&nan), Matrix6::zeros());
    }
}
