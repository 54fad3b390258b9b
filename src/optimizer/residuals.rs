//! Normal equations of the frame-to-frame reprojection problem.
//!
//! Each matched previous-frame feature is transformed by the relative pose
//! hypothesis and projected into the current image:
//! - points contribute the pixel distance to the observed location
//! - lines contribute the signed distances of both reprojected endpoints
//!   to the observed line equation
//!
//! The scalar residual is the norm of that 2-vector; its gradient w.r.t. a
//! left perturbation `exp(ξ) · T` gives a rank-one Hessian contribution.

use nalgebra::{Matrix2, Matrix2x3, Matrix3, Matrix6, RowVector3, Vector2, Vector3, Vector6};
use tracing::trace;

use crate::config::OptimizerConfig;
use crate::geometry::SE3;
use crate::tracking::association::Correspondences;
use crate::tracking::frame::{LineFeature, PinholeStereoCamera, PointFeature, StereoFrame};

use super::outliers::mad_scale;

/// Lower clamp on squared depth in the projection Jacobian.
const MIN_DEPTH_SQ: f64 = 1e-7;
/// Lower clamp on the residual norm dividing the Jacobian.
const MIN_RESIDUAL_NORM: f64 = 1e-7;

/// Reprojection error of a matched point: `π(T p) - observed`.
pub fn point_residual(pose: &SE3, camera: &PinholeStereoCamera, point: &PointFeature) -> Vector2<f64> {
    camera.projection(&pose.transform_point(&point.p)) - point.pl_obs
}

/// Endpoint-to-line distances of a matched segment under `pose`.
pub fn line_residual(pose: &SE3, camera: &PinholeStereoCamera, line: &LineFeature) -> Vector2<f64> {
    endpoint_distances(camera, &pose.transform_point(&line.sp), &pose.transform_point(&line.ep), &line.le_obs)
}

/// Signed distances of two projected camera-frame endpoints to line `l`.
fn endpoint_distances(
    camera: &PinholeStereoCamera,
    s_cam: &Vector3<f64>,
    e_cam: &Vector3<f64>,
    l: &Vector3<f64>,
) -> Vector2<f64> {
    let s = camera.projection(s_cam);
    let e = camera.projection(e_cam);
    Vector2::new(l.x * s.x + l.y * s.y + l.z, l.x * e.x + l.y * e.y + l.z)
}

/// Gradient of `dirᵀ π(exp(ξ) p)` at ξ = 0 for a camera-frame point `p`.
///
/// Layout `[v; ω]`: the translational block is `a = (∂π/∂p)ᵀ dir` and the
/// rotational block is `p × a`.
pub fn projection_jacobian(camera: &PinholeStereoCamera, p: &Vector3<f64>, dir: &Vector2<f64>) -> Vector6<f64> {
    let gz2 = (p.z * p.z).max(MIN_DEPTH_SQ);
    let a = Vector3::new(
        camera.fx * p.z * dir.x / gz2,
        camera.fy * p.z * dir.y / gz2,
        -(camera.fx * p.x * dir.x + camera.fy * p.y * dir.y) / gz2,
    );
    let w = p.cross(&a);
    Vector6::new(a.x, a.y, a.z, w.x, w.y, w.z)
}

/// First-order covariance of a triangulated point, up to the
/// `(f b σ)` disparity-noise factor.
fn triangulation_covariance(camera: &PinholeStereoCamera, pixel: &Vector2<f64>, disp: f64) -> Matrix3<f64> {
    let f = camera.fx;
    let px = pixel.x - camera.cx;
    let py = pixel.y - camera.cy;
    let d2 = disp * disp;
    Matrix3::new(
        d2 + 2.0 * px * px, 2.0 * px * py, 2.0 * f * px,
        2.0 * px * py, d2 + 2.0 * py * py, 2.0 * f * py,
        2.0 * f * px, 2.0 * f * py, 2.0 * f * f,
    ) / (d2 * d2)
}

/// Assembled Gauss-Newton system for one pose hypothesis.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalEquations {
    pub hessian: Matrix6<f64>,
    pub gradient: Vector6<f64>,
    /// Weighted squared error normalized by `n_residuals` (0 when empty).
    pub error: f64,
    pub n_residuals: usize,
    /// Whether point and line blocks were rescaled by their residual MADs.
    pub balanced: bool,
}

impl NormalEquations {
    pub fn zero() -> Self {
        Self {
            hessian: Matrix6::zeros(),
            gradient: Vector6::zeros(),
            error: 0.0,
            n_residuals: 0,
            balanced: false,
        }
    }
}

/// Per-modality accumulator.
#[derive(Debug)]
struct ModalitySums {
    h: Matrix6<f64>,
    g: Vector6<f64>,
    e: f64,
    n: usize,
    /// Weighted squared residuals, for the balancing scale.
    r: Vec<f64>,
}

impl ModalitySums {
    fn new() -> Self {
        Self {
            h: Matrix6::zeros(),
            g: Vector6::zeros(),
            e: 0.0,
            n: 0,
            r: Vec::new(),
        }
    }

    fn add(&mut self, j: &Vector6<f64>, norm: f64, weight: f64) {
        self.h += j * j.transpose() * weight;
        self.g += j * norm * weight;
        let e = norm * norm * weight;
        self.e += e;
        self.n += 1;
        self.r.push(e);
    }
}

/// Indices whose residual was degenerate under the current hypothesis.
#[derive(Debug, Default)]
struct Rejected {
    points: Vec<usize>,
    lines: Vec<usize>,
}

/// Builds Hessian, gradient and error over the inlier correspondences.
///
/// Two weighting modes: uniform (optionally Cauchy-like robust,
/// `w = 1 / (1 + ‖r‖²)`) and uncertainty-weighted, where stereo
/// triangulation noise is propagated through the projection into a
/// per-residual confidence multiplied into the robust weight.
#[derive(Debug, Clone)]
pub struct ResidualModel {
    camera: PinholeStereoCamera,
    has_points: bool,
    has_lines: bool,
    homog_th: f64,
    robust_cost: bool,
    use_uncertainty: bool,
    scale_points_lines: bool,
    sigma_px: f64,
    /// `f b σ`, the disparity noise factor of the triangulation covariance.
    bsigma: f64,
}

impl ResidualModel {
    pub fn new(camera: PinholeStereoCamera, config: &OptimizerConfig, has_points: bool, has_lines: bool) -> Self {
        Self {
            camera,
            has_points,
            has_lines,
            homog_th: config.homog_th,
            robust_cost: config.robust_cost,
            use_uncertainty: config.use_uncertainty,
            scale_points_lines: config.scale_points_lines,
            sigma_px: config.sigma_px,
            bsigma: camera.fx * camera.baseline * config.sigma_px,
        }
    }

    /// Build the normal equations at `pose`.
    ///
    /// Features whose residual is degenerate (norm at or below the
    /// homogeneity threshold, or non-finite uncertainty) are flagged
    /// outlier in `frame` and removed from the inlier counts.
    pub fn build(&self, pose: &SE3, frame: &mut StereoFrame, corr: &mut Correspondences) -> NormalEquations {
        let (eqs, rejected) = self.accumulate(pose, frame, corr);
        for i in rejected.points {
            corr.reject_point(&mut frame.stereo_pt[i]);
        }
        for i in rejected.lines {
            corr.reject_line(&mut frame.stereo_ls[i]);
        }
        eqs
    }

    /// Normal equations at `pose` without touching any inlier flag.
    /// Degenerate residuals are skipped instead of flagged.
    pub fn evaluate(&self, pose: &SE3, frame: &StereoFrame, corr: &Correspondences) -> NormalEquations {
        self.accumulate(pose, frame, corr).0
    }

    /// Normalized error at `pose` without touching any inlier flag.
    pub fn evaluate_error(&self, pose: &SE3, frame: &StereoFrame, corr: &Correspondences) -> f64 {
        self.evaluate(pose, frame, corr).error
    }

    fn robust_weight(&self, norm: f64) -> f64 {
        if self.robust_cost {
            1.0 / (1.0 + norm * norm)
        } else {
            1.0
        }
    }

    fn accumulate(&self, pose: &SE3, frame: &StereoFrame, corr: &Correspondences) -> (NormalEquations, Rejected) {
        let rotation = pose.rotation_matrix();
        let mut rejected = Rejected::default();

        let mut pts = ModalitySums::new();
        for &i in &corr.matched_pt {
            let point = &frame.stereo_pt[i];
            if !point.inlier {
                continue;
            }
            let p_cam = pose.transform_point(&point.p);
            let err = self.camera.projection(&p_cam) - point.pl_obs;
            let norm = err.norm();
            if !(norm > self.homog_th) {
                rejected.points.push(i);
                continue;
            }

            let j = projection_jacobian(&self.camera, &p_cam, &err) / norm.max(MIN_RESIDUAL_NORM);
            let wunc = if self.use_uncertainty {
                match self.point_information(&rotation, &p_cam, point, &err) {
                    Some(w) => w,
                    None => {
                        trace!(idx = i, "degenerate point uncertainty");
                        rejected.points.push(i);
                        continue;
                    }
                }
            } else {
                1.0
            };
            pts.add(&j, norm, wunc * self.robust_weight(norm));
        }

        let mut lns = ModalitySums::new();
        for &i in &corr.matched_ls {
            let line = &frame.stereo_ls[i];
            if !line.inlier {
                continue;
            }
            let s_cam = pose.transform_point(&line.sp);
            let e_cam = pose.transform_point(&line.ep);
            let l = &line.le_obs;
            let err = endpoint_distances(&self.camera, &s_cam, &e_cam, l);
            let norm = err.norm();
            if !(norm > self.homog_th) {
                rejected.lines.push(i);
                continue;
            }

            let dir = Vector2::new(l.x, l.y);
            let js = projection_jacobian(&self.camera, &s_cam, &dir);
            let je = projection_jacobian(&self.camera, &e_cam, &dir);
            let j = (js * err.x + je * err.y) / norm.max(MIN_RESIDUAL_NORM);

            let wunc = if self.use_uncertainty {
                let cov_p = self.endpoint_information(&rotation, &s_cam, &line.spl, line.sdisp, l);
                let cov_q = self.endpoint_information(&rotation, &e_cam, &line.epl, line.edisp, l);
                let w = (err.x * err.x * cov_p + err.y * err.y * cov_q) / (norm * norm);
                if !(cov_p.is_finite() && cov_q.is_finite() && w.is_finite()) {
                    trace!(idx = i, "degenerate line uncertainty");
                    rejected.lines.push(i);
                    continue;
                }
                w
            } else {
                1.0
            };
            lns.add(&j, norm, wunc * self.robust_weight(norm));
        }

        (self.combine(pts, lns), rejected)
    }

    /// Information of a point residual along its own direction:
    /// `rᵀ Σ⁻¹ r / rᵀ r`, with Σ the propagated pixel covariance.
    fn point_information(
        &self,
        rotation: &Matrix3<f64>,
        p_cam: &Vector3<f64>,
        point: &PointFeature,
        err: &Vector2<f64>,
    ) -> Option<f64> {
        let cov_p = triangulation_covariance(&self.camera, &point.pl, point.disp);
        let (gx, gy, gz) = (p_cam.x, p_cam.y, p_cam.z);
        let jhg = Matrix2x3::new(gz, 0.0, -gx, 0.0, gz, -gy) * rotation;
        let gz4 = gz.powi(4);
        let sigma2 = self.sigma_px * self.sigma_px;
        let cov = (jhg * cov_p * jhg.transpose()) / gz4 * self.bsigma + Matrix2::identity() * sigma2;
        if !cov.iter().all(|v| v.is_finite()) {
            return None;
        }

        let info = cov.try_inverse()?;
        let w = err.dot(&(info * err)) / err.norm_squared();
        w.is_finite().then_some(w)
    }

    /// Information of one segment endpoint's distance to the observed line.
    ///
    /// NaN when the propagated variance is not finite.
    fn endpoint_information(
        &self,
        rotation: &Matrix3<f64>,
        p_cam: &Vector3<f64>,
        pixel: &Vector2<f64>,
        disp: f64,
        l: &Vector3<f64>,
    ) -> f64 {
        let cov_p = triangulation_covariance(&self.camera, pixel, disp);
        let nh = self.camera.projection_nh(p_cam);
        let lxpz = l.x * nh.z;
        let lypz = l.y * nh.z;
        let j_ep = RowVector3::new(
            lxpz * self.camera.fx,
            lypz * self.camera.fy,
            lxpz * self.camera.cx + lypz * self.camera.cy - l.x * nh.x - l.y * nh.y,
        ) * rotation;
        let var = (j_ep * cov_p * j_ep.transpose())[(0, 0)];
        if !var.is_finite() {
            return f64::NAN;
        }
        nh.z.powi(4) / var * 0.5 / self.bsigma
    }

    /// Sum both modalities, balancing them by their residual scales when
    /// both are present and non-degenerate.
    fn combine(&self, pts: ModalitySums, lns: ModalitySums) -> NormalEquations {
        let n = pts.n + lns.n;
        if n == 0 {
            return NormalEquations::zero();
        }

        let (s_p, s_l) = if self.scale_points_lines {
            (mad_scale(&pts.r), mad_scale(&lns.r))
        } else {
            (0.0, 0.0)
        };
        let balanced = self.scale_points_lines
            && self.has_points
            && self.has_lines
            && s_p > self.homog_th
            && s_l > self.homog_th;

        let (k_p, k_l) = if balanced {
            let s_p_inv = 1.0 / s_p;
            let s_l_inv = 1.0 / s_l;
            ((s_p_inv + s_l_inv) / s_l_inv, (s_p_inv + s_l_inv) / s_p_inv)
        } else {
            (1.0, 1.0)
        };

        NormalEquations {
            hessian: pts.h * k_p + lns.h * k_l,
            gradient: pts.g * k_p + lns.g * k_l,
            error: (pts.e * k_p + lns.e * k_l) / n as f64,
            n_residuals: n,
            balanced,
        }
    }
}
