//! SE3: rigid 6-DOF transformation (rotation + translation).
//!
//! Tangent-space twists are ordered `[v; ω]`: translation first, rotation
//! second. `exp(ξ) · p ≈ p + v + ω × p` for small ξ, which is the
//! perturbation the residual Jacobians are written against.

use nalgebra::{Matrix3, UnitQuaternion, Vector3, Vector6};

use super::so3::{left_jacobian_so3, left_jacobian_so3_inv};

/// Rigid transformation p' = R * p + t.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    /// Inverse: [Rᵀ | -Rᵀ t].
    pub fn inverse(&self) -> Self {
        let rot_inv = self.rotation.inverse();
        Self {
            rotation: rot_inv,
            translation: -(rot_inv * self.translation),
        }
    }

    /// Compose two transforms: self ∘ other.
    pub fn compose(&self, other: &SE3) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    /// Exponential map of a twist `[v; ω]`.
    pub fn exp(xi: &Vector6<f64>) -> Self {
        let v = xi.fixed_rows::<3>(0).into_owned();
        let omega = xi.fixed_rows::<3>(3).into_owned();
        Self {
            rotation: UnitQuaternion::from_scaled_axis(omega),
            translation: left_jacobian_so3(&omega) * v,
        }
    }

    /// Logarithm map to a twist `[v; ω]`.
    pub fn log(&self) -> Vector6<f64> {
        let omega = self.rotation.scaled_axis();
        let v = left_jacobian_so3_inv(&omega) * self.translation;
        let mut xi = Vector6::zeros();
        xi.fixed_rows_mut::<3>(0).copy_from(&v);
        xi.fixed_rows_mut::<3>(3).copy_from(&omega);
        xi
    }

    /// True when no component of the transform is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.rotation.coords.iter().all(|c| c.is_finite())
            && self.translation.iter().all(|c| c.is_finite())
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}
