//! Synthetic stereo feature generator with known ground-truth motion.
//!
//! A fixed world of 3-D points and segments, each with a random binary
//! descriptor, is rendered through a [`PinholeStereoCamera`] at a given
//! camera pose. Rendering perturbs pixels, disparities and descriptor bits
//! so consecutive frames look like real stereo extraction, and can inject
//! gross pixel outliers.

use std::collections::VecDeque;

use anyhow::{Context, Result};
use nalgebra::{Vector2, Vector3};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};

use crate::geometry::SE3;
use crate::tracking::frame::features::DESCRIPTOR_BYTES;
use crate::tracking::frame::{BinaryDescriptor, LineFeature, PinholeStereoCamera, PointFeature, StereoFrame};
use crate::tracking::handler::FeatureExtractor;

/// Shortest rendered segment, in pixels.
const MIN_SEGMENT_PX: f64 = 15.0;

/// Parameters of a [`SyntheticScene`].
#[derive(Debug, Clone, PartialEq)]
pub struct SceneConfig {
    pub n_points: usize,
    pub n_lines: usize,
    /// Half-width of the uniform pixel and disparity noise.
    pub pixel_noise: f64,
    /// Descriptor bits flipped independently in every rendered frame.
    pub descriptor_noise_bits: usize,
    /// Fraction of rendered features displaced by `outlier_offset_px`.
    pub outlier_fraction: f64,
    pub outlier_offset_px: f64,
    pub seed: u64,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            n_points: 150,
            n_lines: 40,
            pixel_noise: 0.3,
            descriptor_noise_bits: 12,
            outlier_fraction: 0.0,
            outlier_offset_px: 8.0,
            seed: 42,
        }
    }
}

/// Pose of the camera to render, frame to world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticView {
    pub t_wc: SE3,
}

#[derive(Debug, Clone, Copy)]
struct WorldPoint {
    p: Vector3<f64>,
    desc: BinaryDescriptor,
}

#[derive(Debug, Clone, Copy)]
struct WorldLine {
    sp: Vector3<f64>,
    ep: Vector3<f64>,
    desc: BinaryDescriptor,
}

fn random_descriptor(rng: &mut StdRng) -> BinaryDescriptor {
    let mut d = [0u8; DESCRIPTOR_BYTES];
    rng.fill(&mut d[..]);
    BinaryDescriptor(d)
}

fn jitter(rng: &mut StdRng, half_width: f64) -> f64 {
    if half_width > 0.0 {
        rng.gen_range(-half_width..half_width)
    } else {
        0.0
    }
}

/// Static world observed by a moving stereo camera.
#[derive(Debug, Clone)]
pub struct SyntheticScene {
    camera: PinholeStereoCamera,
    config: SceneConfig,
    points: Vec<WorldPoint>,
    lines: Vec<WorldLine>,
    rng: StdRng,
}

impl SyntheticScene {
    /// Scatter features in a box in front of the world origin.
    pub fn new(camera: PinholeStereoCamera, config: SceneConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let sample = |rng: &mut StdRng| {
            Vector3::new(rng.gen_range(-4.0..4.0), rng.gen_range(-3.0..3.0), rng.gen_range(4.0..12.0))
        };

        let points = (0..config.n_points)
            .map(|_| WorldPoint {
                p: sample(&mut rng),
                desc: random_descriptor(&mut rng),
            })
            .collect();
        let lines = (0..config.n_lines)
            .map(|_| {
                let sp = sample(&mut rng);
                let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
                let dir = Vector3::new(
                    sign * rng.gen_range(0.4..1.5),
                    rng.gen_range(-1.5..1.5),
                    rng.gen_range(-0.3..0.3),
                );
                WorldLine {
                    sp,
                    ep: sp + dir,
                    desc: random_descriptor(&mut rng),
                }
            })
            .collect();

        Self {
            camera,
            config,
            points,
            lines,
            rng,
        }
    }

    pub fn camera(&self) -> &PinholeStereoCamera {
        &self.camera
    }

    /// Relative motion mapping previous-camera coordinates into the
    /// current camera, i.e. the transform the optimizer estimates.
    pub fn relative_motion(t_wc_prev: &SE3, t_wc_curr: &SE3) -> SE3 {
        t_wc_curr.inverse().compose(t_wc_prev)
    }

    fn observe(&mut self, desc: &BinaryDescriptor) -> BinaryDescriptor {
        let k = self.config.descriptor_noise_bits.min(DESCRIPTOR_BYTES * 8);
        let bits = index::sample(&mut self.rng, DESCRIPTOR_BYTES * 8, k).into_vec();
        desc.with_flipped_bits(&bits)
    }

    fn pixel_offset(&mut self) -> Vector2<f64> {
        let sigma = self.config.pixel_noise;
        let mut offset = Vector2::new(jitter(&mut self.rng, sigma), jitter(&mut self.rng, sigma));
        if self.config.outlier_fraction > 0.0 && self.rng.gen_bool(self.config.outlier_fraction.min(1.0)) {
            let angle = self.rng.gen_range(0.0..std::f64::consts::TAU);
            offset += Vector2::new(angle.cos(), angle.sin()) * self.config.outlier_offset_px;
        }
        offset
    }

    /// Project a camera-frame point with noise; `None` when not visible.
    fn measure(&mut self, p_cam: &Vector3<f64>, offset: Vector2<f64>) -> Option<(Vector2<f64>, f64)> {
        if p_cam.z <= 0.0 {
            return None;
        }
        let uv = self.camera.projection(p_cam);
        if !self.camera.is_in_image(&uv) {
            return None;
        }
        let disp = self.camera.disparity_of(p_cam) + jitter(&mut self.rng, self.config.pixel_noise);
        Some((uv + offset, disp))
    }

    /// Render every visible feature at camera pose `t_wc`.
    ///
    /// Features keep the order of the world lists, so index `i` in two
    /// renders of overlapping views usually refers to the same landmark.
    pub fn render(&mut self, t_wc: &SE3, frame_idx: u64) -> StereoFrame {
        let t_cw = t_wc.inverse();

        let mut stereo_pt = Vec::new();
        for k in 0..self.points.len() {
            let landmark = self.points[k];
            let offset = self.pixel_offset();
            let Some((uv, disp)) = self.measure(&t_cw.transform_point(&landmark.p), offset) else {
                continue;
            };
            let Some(p) = self.camera.back_projection(uv.x, uv.y, disp) else {
                continue;
            };
            let desc = self.observe(&landmark.desc);
            stereo_pt.push(PointFeature::new(uv, disp, p, desc));
        }

        let mut stereo_ls = Vec::new();
        for k in 0..self.lines.len() {
            let landmark = self.lines[k];
            let offset = self.pixel_offset();
            let s = self.measure(&t_cw.transform_point(&landmark.sp), offset);
            let noise = Vector2::new(
                jitter(&mut self.rng, self.config.pixel_noise),
                jitter(&mut self.rng, self.config.pixel_noise),
            );
            let e = self.measure(&t_cw.transform_point(&landmark.ep), offset + noise);
            let (Some((spl, sdisp)), Some((epl, edisp))) = (s, e) else {
                continue;
            };
            if (epl - spl).norm() < MIN_SEGMENT_PX {
                continue;
            }
            let Some((sp, ep)) = self.camera.back_projection_line(&spl, &epl, sdisp, edisp) else {
                continue;
            };
            let desc = self.observe(&landmark.desc);
            stereo_ls.push(LineFeature::new(spl, epl, sdisp, edisp, sp, ep, desc));
        }

        StereoFrame::new(frame_idx, stereo_pt, stereo_ls)
    }
}

impl FeatureExtractor for SyntheticScene {
    type Image = SyntheticView;

    fn extract(&mut self, left: &SyntheticView, _right: &SyntheticView, frame_idx: u64) -> Result<StereoFrame> {
        Ok(self.render(&left.t_wc, frame_idx))
    }
}

/// Replays frames whose features were extracted elsewhere.
#[derive(Debug, Clone, Default)]
pub struct PrecomputedExtractor {
    frames: VecDeque<StereoFrame>,
}

impl PrecomputedExtractor {
    pub fn new(frames: impl IntoIterator<Item = StereoFrame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    pub fn push(&mut self, frame: StereoFrame) {
        self.frames.push_back(frame);
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FeatureExtractor for PrecomputedExtractor {
    type Image = ();

    fn extract(&mut self, _left: &(), _right: &(), frame_idx: u64) -> Result<StereoFrame> {
        let mut frame = self
            .frames
            .pop_front()
            .with_context(|| format!("No precomputed features left for frame {}", frame_idx))?;
        frame.frame_idx = frame_idx;
        Ok(frame)
    }
}
