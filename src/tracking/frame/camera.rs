//! Rectified pinhole stereo camera.

use nalgebra::{Vector2, Vector3};

/// Disparities below this (pixels) are treated as points at infinity.
pub const MIN_DISPARITY: f64 = 0.5;

/// Rectified stereo pair with a shared pinhole model for both views.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinholeStereoCamera {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    /// Stereo baseline in meters.
    pub baseline: f64,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
}

impl PinholeStereoCamera {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64, baseline: f64, width: u32, height: u32) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            baseline,
            width,
            height,
        }
    }

    /// Project a camera-frame point to pixel coordinates.
    pub fn projection(&self, p: &Vector3<f64>) -> Vector2<f64> {
        Vector2::new(
            self.fx * p.x / p.z + self.cx,
            self.fy * p.y / p.z + self.cy,
        )
    }

    /// Projection without the perspective division: `(fx x + cx z, fy y + cy z, z)`.
    pub fn projection_nh(&self, p: &Vector3<f64>) -> Vector3<f64> {
        Vector3::new(
            self.fx * p.x + self.cx * p.z,
            self.fy * p.y + self.cy * p.z,
            p.z,
        )
    }

    /// Triangulate a left-image pixel with its stereo disparity.
    ///
    /// Returns `None` for disparities below [`MIN_DISPARITY`].
    pub fn back_projection(&self, u: f64, v: f64, disparity: f64) -> Option<Vector3<f64>> {
        if disparity < MIN_DISPARITY {
            return None;
        }
        let z = self.fx * self.baseline / disparity;
        let x = (u - self.cx) * z / self.fx;
        let y = (v - self.cy) * z / self.fy;
        Some(Vector3::new(x, y, z))
    }

    /// Triangulate both endpoints of a segment; `None` if either fails.
    pub fn back_projection_line(
        &self,
        start: &Vector2<f64>,
        end: &Vector2<f64>,
        sdisp: f64,
        edisp: f64,
    ) -> Option<(Vector3<f64>, Vector3<f64>)> {
        let sp = self.back_projection(start.x, start.y, sdisp)?;
        let ep = self.back_projection(end.x, end.y, edisp)?;
        Some((sp, ep))
    }

    /// Disparity a camera-frame point would produce in the right image.
    pub fn disparity_of(&self, p: &Vector3<f64>) -> f64 {
        self.fx * self.baseline / p.z
    }

    /// True when the pixel lies inside the image bounds.
    pub fn is_in_image(&self, uv: &Vector2<f64>) -> bool {
        uv.x >= 0.0 && uv.y >= 0.0 && uv.x < self.width as f64 && uv.y < self.height as f64
    }
}

/// Line through two pixels as `(a, b, c)` with `a² + b² = 1`, so
/// `a u + b v + c` is the signed distance from `(u, v)` to the line.
pub fn line_equation(start: &Vector2<f64>, end: &Vector2<f64>) -> Vector3<f64> {
    let l = Vector3::new(start.x, start.y, 1.0).cross(&Vector3::new(end.x, end.y, 1.0));
    let n = (l.x * l.x + l.y * l.y).sqrt();
    if n > f64::EPSILON {
        l / n
    } else {
        l
    }
}
