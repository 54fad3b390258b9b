//! SO(3) helpers used by the SE(3) exponential and logarithm maps.
//!
//! Rotations themselves are handled by nalgebra's `UnitQuaternion`; the
//! left Jacobian Jl(φ) of a rotation vector φ couples the translational
//! part of an SE(3) twist to its rotation.

use nalgebra::{Matrix3, Vector3};

/// Below this angle the closed forms lose precision and the series is used.
const SMALL_ANGLE_THRESHOLD: f64 = 1e-6;

/// Constructs the skew-symmetric matrix [v]× such that [v]× u = v × u.
///
/// ```text
/// [v]× = |  0   -v_z   v_y |
///        |  v_z   0   -v_x |
///        | -v_y  v_x    0  |
/// ```
#[inline]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y,
        v.z, 0.0, -v.x,
        -v.y, v.x, 0.0,
    )
}

/// Left Jacobian Jl(φ) of SO(3).
///
/// ```text
/// Jl(φ) = I + (1 - cos θ)/θ² [φ]× + (θ - sin θ)/θ³ [φ]×²
/// ```
///
/// For small angles:
/// ```text
/// Jl(φ) ≈ I + 0.5 [φ]×
/// ```
pub fn left_jacobian_so3(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    let skew_phi = skew(phi);

    if theta < SMALL_ANGLE_THRESHOLD {
        return Matrix3::identity() + 0.5 * skew_phi;
    }

    let theta_sq = theta * theta;
    let theta_cu = theta_sq * theta;

    Matrix3::identity()
        + ((1.0 - theta.cos()) / theta_sq) * skew_phi
        + ((theta - theta.sin()) / theta_cu) * skew_phi * skew_phi
}

/// Inverse of the left Jacobian Jl⁻¹(φ).
///
/// ```text
/// Jl⁻¹(φ) = I - 0.5 [φ]× + (1/θ² - (1 + cos θ)/(2θ sin θ)) [φ]×²
/// ```
pub fn left_jacobian_so3_inv(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    let skew_phi = skew(phi);

    if theta < SMALL_ANGLE_THRESHOLD {
        return Matrix3::identity() - 0.5 * skew_phi + (1.0 / 12.0) * skew_phi * skew_phi;
    }

    let theta_sq = theta * theta;
    let coeff = 1.0 / theta_sq - (1.0 + theta.cos()) / (2.0 * theta * theta.sin());

    Matrix3::identity() - 0.5 * skew_phi + coeff * skew_phi * skew_phi
}
