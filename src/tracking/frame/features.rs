//! Stereo point and line-segment features with binary descriptors.
//!
//! Features are produced by an external extractor and stored by value in a
//! [`StereoFrame`](super::StereoFrame). Association writes the matched
//! observation (`*_obs`) into the previous-frame feature and the optimizer
//! and outlier filter toggle its `inlier` flag in place.

use std::f64::consts::PI;

use nalgebra::{Vector2, Vector3};

use super::camera::line_equation;

/// Length of an ORB / LBD binary descriptor in bytes (256 bits).
pub const DESCRIPTOR_BYTES: usize = 32;

/// Persistent identifier of a feature track.
///
/// Point and line tracks draw from independent counters, so the same
/// numeric value may name one point track and one line track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub u64);

impl TrackId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// 256-bit binary descriptor compared with the Hamming distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryDescriptor(pub [u8; DESCRIPTOR_BYTES]);

impl BinaryDescriptor {
    /// Number of differing bits between two descriptors.
    #[inline]
    pub fn distance(&self, other: &BinaryDescriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    /// Copy of this descriptor with the given bit indices flipped.
    pub fn with_flipped_bits(&self, bits: &[usize]) -> Self {
        let mut out = *self;
        for &bit in bits {
            let bit = bit % (DESCRIPTOR_BYTES * 8);
            out.0[bit / 8] ^= 1 << (bit % 8);
        }
        out
    }
}

impl Default for BinaryDescriptor {
    fn default() -> Self {
        Self([0; DESCRIPTOR_BYTES])
    }
}

/// Stereo point feature.
#[derive(Debug, Clone)]
pub struct PointFeature {
    /// Left-image pixel location.
    pub pl: Vector2<f64>,
    /// Stereo disparity in pixels.
    pub disp: f64,
    /// Triangulated position in the camera frame.
    pub p: Vector3<f64>,
    pub desc: BinaryDescriptor,
    /// `None` until association assigns a track.
    pub track_id: Option<TrackId>,
    pub inlier: bool,
    /// Location observed in the next frame, valid once matched.
    pub pl_obs: Vector2<f64>,
}

impl PointFeature {
    pub fn new(pl: Vector2<f64>, disp: f64, p: Vector3<f64>, desc: BinaryDescriptor) -> Self {
        Self {
            pl,
            disp,
            p,
            desc,
            track_id: None,
            inlier: true,
            pl_obs: pl,
        }
    }
}

/// Stereo line-segment feature.
#[derive(Debug, Clone)]
pub struct LineFeature {
    /// Left-image start pixel.
    pub spl: Vector2<f64>,
    /// Left-image end pixel.
    pub epl: Vector2<f64>,
    /// Segment orientation in radians, in (-π, π].
    pub angle: f64,
    pub sdisp: f64,
    pub edisp: f64,
    /// Triangulated start point (camera frame).
    pub sp: Vector3<f64>,
    /// Triangulated end point (camera frame).
    pub ep: Vector3<f64>,
    /// Normalized line equation through `spl` and `epl`.
    pub le: Vector3<f64>,
    pub desc: BinaryDescriptor,
    pub track_id: Option<TrackId>,
    pub inlier: bool,
    pub spl_obs: Vector2<f64>,
    pub epl_obs: Vector2<f64>,
    pub le_obs: Vector3<f64>,
}

impl LineFeature {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        spl: Vector2<f64>,
        epl: Vector2<f64>,
        sdisp: f64,
        edisp: f64,
        sp: Vector3<f64>,
        ep: Vector3<f64>,
        desc: BinaryDescriptor,
    ) -> Self {
        let le = line_equation(&spl, &epl);
        Self {
            spl,
            epl,
            angle: (epl.y - spl.y).atan2(epl.x - spl.x),
            sdisp,
            edisp,
            sp,
            ep,
            le,
            desc,
            track_id: None,
            inlier: true,
            spl_obs: spl,
            epl_obs: epl,
            le_obs: le,
        }
    }

    /// Sum of both endpoints, i.e. twice the segment midpoint.
    pub fn endpoint_sum(&self) -> Vector2<f64> {
        self.spl + self.epl
    }
}

/// Absolute angular difference wrapped to [0, π].
pub fn angle_diff(a: f64, b: f64) -> f64 {
    let mut d = (a - b) % (2.0 * PI);
    if d > PI {
        d -= 2.0 * PI;
    } else if d < -PI {
        d += 2.0 * PI;
    }
    d.abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_descriptor_distance_counts_bits() {
        let a = BinaryDescriptor::default();
        let b = a.with_flipped_bits(&[0, 9, 255]);

        assert_eq!(a.distance(&b), 3);
        assert_eq!(b.distance(&a), 3);
        assert_eq!(a.distance(&a), 0);
    }

    #[test]
    fn test_angle_diff_wraps() {
        assert_relative_eq!(angle_diff(PI - 0.1, -PI + 0.1), 0.2, epsilon = 1e-12);
        assert_relative_eq!(angle_diff(0.1, 0.3), 0.2, epsilon = 1e-12);
        assert_relative_eq!(angle_diff(0.3, 0.1), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_line_feature_geometry() {
        let l = LineFeature::new(
            Vector2::new(0.0, 0.0),
            Vector2::new(0.0, 10.0),
            5.0,
            5.0,
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.0, 1.0, 1.0),
            BinaryDescriptor::default(),
        );

        assert_relative_eq!(l.angle, PI / 2.0, epsilon = 1e-12);
        assert!(l.track_id.is_none());
        assert_relative_eq!(l.le.x * 4.0 + l.le.y * 2.0 + l.le.z, -4.0, epsilon = 1e-12);
    }
}
