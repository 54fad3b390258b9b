//! Robust-scale outlier rejection for matched features.

use tracing::debug;

use crate::geometry::SE3;
use crate::tracking::association::Correspondences;
use crate::tracking::frame::{PinholeStereoCamera, StereoFrame};

use super::residuals::{line_residual, point_residual};

/// Consistency constant turning a MAD into a Gaussian standard deviation.
const MAD_TO_SIGMA: f64 = 1.4826;

/// Robust standard deviation: `1.4826 · median(|x - median(x)|)`.
///
/// The median is the element at index `n / 2` after sorting. Returns 0 for
/// an empty slice.
pub fn mad_scale(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let median = sorted[sorted.len() / 2];

    let mut deviations: Vec<f64> = sorted.iter().map(|v| (v - median).abs()).collect();
    deviations.sort_by(f64::total_cmp);
    MAD_TO_SIGMA * deviations[deviations.len() / 2]
}

/// Outliers removed by one filter pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OutlierStats {
    pub points_removed: usize,
    pub lines_removed: usize,
    /// Residual threshold used for points (pixels).
    pub point_threshold_px: f64,
    pub line_threshold_px: f64,
}

/// Rejects matches whose residual under a pose hypothesis exceeds
/// `inlier_k` robust standard deviations of their modality.
#[derive(Debug, Clone, Copy)]
pub struct OutlierFilter {
    pub inlier_k: f64,
}

impl OutlierFilter {
    pub fn new(inlier_k: f64) -> Self {
        Self { inlier_k }
    }

    /// Flag outliers among the current inliers of `corr`.
    ///
    /// Entries stay in the correspondence set; only their `inlier` flag and
    /// the inlier counters change.
    pub fn remove_outliers(
        &self,
        pose: &SE3,
        camera: &PinholeStereoCamera,
        frame: &mut StereoFrame,
        corr: &mut Correspondences,
    ) -> OutlierStats {
        let res_p: Vec<(usize, f64)> = corr
            .matched_pt
            .iter()
            .filter(|&&i| frame.stereo_pt[i].inlier)
            .map(|&i| (i, point_residual(pose, camera, &frame.stereo_pt[i]).norm()))
            .collect();
        let res_l: Vec<(usize, f64)> = corr
            .matched_ls
            .iter()
            .filter(|&&i| frame.stereo_ls[i].inlier)
            .map(|&i| (i, line_residual(pose, camera, &frame.stereo_ls[i]).norm()))
            .collect();

        let th_p = self.inlier_k * mad_scale(&res_p.iter().map(|r| r.1).collect::<Vec<_>>());
        let th_l = self.inlier_k * mad_scale(&res_l.iter().map(|r| r.1).collect::<Vec<_>>());

        let mut stats = OutlierStats {
            point_threshold_px: th_p,
            line_threshold_px: th_l,
            ..Default::default()
        };
        for &(i, r) in &res_p {
            if r > th_p {
                corr.reject_point(&mut frame.stereo_pt[i]);
                stats.points_removed += 1;
            }
        }
        for &(i, r) in &res_l {
            if r > th_l {
                corr.reject_line(&mut frame.stereo_ls[i]);
                stats.lines_removed += 1;
            }
        }

        debug!(
            points_removed = stats.points_removed,
            lines_removed = stats.lines_removed,
            th_p,
            th_l,
            "outlier removal"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Vector2, Vector3};

    use crate::tracking::frame::{BinaryDescriptor, LineFeature, PointFeature};

    #[test]
    fn test_mad_scale() {
        assert_eq!(mad_scale(&[]), 0.0);
        assert_eq!(mad_scale(&[3.0, 3.0, 3.0]), 0.0);
        // median 3, deviations {2, 1, 0, 1, 7} -> sorted median 1
        assert_relative_eq!(mad_scale(&[1.0, 2.0, 3.0, 4.0, 10.0]), 1.4826, epsilon = 1e-12);
        // even count uses the upper middle element
        assert_relative_eq!(mad_scale(&[1.0, 2.0, 4.0, 8.0]), 1.4826 * 3.0, epsilon = 1e-12);
    }

    fn camera() -> PinholeStereoCamera {
        PinholeStereoCamera::new(450.0, 450.0, 320.0, 240.0, 0.12, 640, 480)
    }

    /// Points observed exactly under the identity pose, with small offsets.
    fn frame_with_offsets(offsets: &[f64]) -> StereoFrame {
        let cam = camera();
        let points = offsets
            .iter()
            .enumerate()
            .map(|(i, &off)| {
                let p = Vector3::new(-1.0 + 0.2 * i as f64, 0.3 - 0.05 * i as f64, 4.0 + 0.1 * i as f64);
                let uv = cam.projection(&p);
                let mut f = PointFeature::new(uv, cam.disparity_of(&p), p, BinaryDescriptor::default());
                f.pl_obs = uv + Vector2::new(off, 0.0);
                f
            })
            .collect();
        StereoFrame::new(0, points, Vec::new())
    }

    #[test]
    fn test_injected_outlier_flipped() {
        let offsets = [0.1, -0.2, 0.3, -0.4, 0.5, -0.6, 0.7, -0.8, 0.9, 60.0];
        let mut frame = frame_with_offsets(&offsets);
        let mut corr = Correspondences::from_matches((0..offsets.len()).collect(), Vec::new());
        let before = (corr.n_inliers_pt(), corr.n_inliers());

        let stats = OutlierFilter::new(4.0).remove_outliers(&SE3::identity(), &camera(), &mut frame, &mut corr);

        assert_eq!(stats.points_removed, 1);
        assert!(!frame.stereo_pt[9].inlier);
        assert!(frame.stereo_pt[..9].iter().all(|p| p.inlier));
        assert_eq!(corr.n_inliers_pt(), before.0 - 1);
        assert_eq!(corr.n_inliers(), before.1 - 1);
        assert_eq!(corr.count_flags(&frame), (corr.n_inliers_pt(), corr.n_inliers_ls()));
        // entries are kept in the set
        assert_eq!(corr.matched_pt.len(), offsets.len());
    }

    #[test]
    fn test_line_outlier_flipped() {
        let cam = camera();
        let lines = (0..8)
            .map(|i| {
                let sp = Vector3::new(-1.0 + 0.25 * i as f64, -0.5, 5.0);
                let ep = Vector3::new(-0.8 + 0.25 * i as f64, 0.5, 5.5);
                let (spl, epl) = (cam.projection(&sp), cam.projection(&ep));
                let mut l = LineFeature::new(
                    spl,
                    epl,
                    cam.disparity_of(&sp),
                    cam.disparity_of(&ep),
                    sp,
                    ep,
                    BinaryDescriptor::default(),
                );
                let shift = if i == 3 { 40.0 } else { 0.3 * (i as f64 - 3.5) };
                l.le_obs.z += shift;
                l
            })
            .collect();
        let mut frame = StereoFrame::new(0, Vec::new(), lines);
        let mut corr = Correspondences::from_matches(Vec::new(), (0..8).collect());

        let stats = OutlierFilter::new(4.0).remove_outliers(&SE3::identity(), &cam, &mut frame, &mut corr);

        assert_eq!(stats.lines_removed, 1);
        assert!(!frame.stereo_ls[3].inlier);
        assert_eq!(corr.n_inliers_ls(), 7);
        assert_eq!(corr.n_inliers(), 7);
    }
}
