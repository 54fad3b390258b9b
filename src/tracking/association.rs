//! Frame-to-frame data association for point and line features.
//!
//! Previous-frame features are matched against the current frame with the
//! Hamming kNN matcher, filtered by a mutual check, a ratio test and
//! geometric gates, and written into [`Correspondences`] as indices into
//! the previous frame's feature arenas. Every current-frame feature leaves
//! association with a persistent [`TrackId`].

use tracing::debug;

use crate::config::FeatureConfig;
use crate::optimizer::outliers::mad_scale;
use crate::tracking::frame::{
    angle_diff, BinaryDescriptor, LineFeature, PinholeStereoCamera, PointFeature, StereoFrame,
    TrackId,
};
use crate::tracking::matching::DescriptorMatcher;

/// Monotone counters handing out point and line track IDs.
///
/// IDs are never reused; point and line tracks use independent spaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackIdCounters {
    next_pt: u64,
    next_ls: u64,
}

impl TrackIdCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_point_id(&mut self) -> TrackId {
        let id = TrackId::new(self.next_pt);
        self.next_pt += 1;
        id
    }

    pub fn next_line_id(&mut self) -> TrackId {
        let id = TrackId::new(self.next_ls);
        self.next_ls += 1;
        id
    }

    /// Number of point IDs handed out so far.
    pub fn points_issued(&self) -> u64 {
        self.next_pt
    }

    /// Number of line IDs handed out so far.
    pub fn lines_issued(&self) -> u64 {
        self.next_ls
    }

    /// Give IDs to every feature of `frame` that has none yet.
    pub fn assign_missing(&mut self, frame: &mut StereoFrame) {
        for pt in frame.stereo_pt.iter_mut().filter(|p| p.track_id.is_none()) {
            pt.track_id = Some(self.next_point_id());
        }
        for ls in frame.stereo_ls.iter_mut().filter(|l| l.track_id.is_none()) {
            ls.track_id = Some(self.next_line_id());
        }
    }
}

/// Matched previous-frame features for one tracking cycle.
///
/// Holds indices into the previous frame's `stereo_pt` / `stereo_ls`. The
/// inlier counters track the features whose `inlier` flag is set; callers
/// must flip flags through [`reject_point`](Self::reject_point) and
/// [`reject_line`](Self::reject_line) so the two never diverge. The set is
/// rebuilt every cycle and is not meant to be shared across threads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Correspondences {
    pub matched_pt: Vec<usize>,
    pub matched_ls: Vec<usize>,
    n_inliers_pt: usize,
    n_inliers_ls: usize,
}

impl Correspondences {
    /// Build from matched indices whose features are all flagged inlier.
    pub fn from_matches(matched_pt: Vec<usize>, matched_ls: Vec<usize>) -> Self {
        Self {
            n_inliers_pt: matched_pt.len(),
            n_inliers_ls: matched_ls.len(),
            matched_pt,
            matched_ls,
        }
    }

    pub fn clear(&mut self) {
        self.matched_pt.clear();
        self.matched_ls.clear();
        self.n_inliers_pt = 0;
        self.n_inliers_ls = 0;
    }

    pub fn n_inliers_pt(&self) -> usize {
        self.n_inliers_pt
    }

    pub fn n_inliers_ls(&self) -> usize {
        self.n_inliers_ls
    }

    /// Total inliers: points plus lines.
    pub fn n_inliers(&self) -> usize {
        self.n_inliers_pt + self.n_inliers_ls
    }

    /// Flag a matched point outlier, keeping the counters in step.
    pub fn reject_point(&mut self, point: &mut PointFeature) {
        if point.inlier {
            point.inlier = false;
            self.n_inliers_pt = self.n_inliers_pt.saturating_sub(1);
        }
    }

    /// Flag a matched line outlier, keeping the counters in step.
    pub fn reject_line(&mut self, line: &mut LineFeature) {
        if line.inlier {
            line.inlier = false;
            self.n_inliers_ls = self.n_inliers_ls.saturating_sub(1);
        }
    }

    /// Count the flagged inliers in `frame` directly: `(points, lines)`.
    pub fn count_flags(&self, frame: &StereoFrame) -> (usize, usize) {
        let pt = self
            .matched_pt
            .iter()
            .filter(|&&i| frame.stereo_pt[i].inlier)
            .count();
        let ls = self
            .matched_ls
            .iter()
            .filter(|&&i| frame.stereo_ls[i].inlier)
            .count();
        (pt, ls)
    }
}

/// Associates features of consecutive frames and propagates track IDs.
#[derive(Debug, Clone)]
pub struct TrackAssociator {
    config: FeatureConfig,
    matcher: DescriptorMatcher,
    /// Point flow gate in pixels.
    disp_th: f64,
}

impl TrackAssociator {
    pub fn new(config: &FeatureConfig, camera: &PinholeStereoCamera) -> Self {
        Self {
            config: config.clone(),
            matcher: DescriptorMatcher::new(config.best_lr_matches, config.lr_in_parallel),
            disp_th: config.max_f2f_disp * camera.width as f64,
        }
    }

    /// Match `prev` against `curr`.
    ///
    /// Accepted matches copy the current observation into the previous
    /// feature and the previous track ID onto the current feature. Every
    /// other current feature receives a fresh ID from `counters`.
    pub fn associate(
        &self,
        prev: &mut StereoFrame,
        curr: &mut StereoFrame,
        counters: &mut TrackIdCounters,
    ) -> Correspondences {
        let matched_pt = if self.config.has_points
            && !prev.stereo_pt.is_empty()
            && !curr.stereo_pt.is_empty()
        {
            self.associate_points(&mut prev.stereo_pt, &mut curr.stereo_pt, counters)
        } else {
            Vec::new()
        };

        let matched_ls = if self.config.has_lines
            && !prev.stereo_ls.is_empty()
            && !curr.stereo_ls.is_empty()
        {
            self.associate_lines(&mut prev.stereo_ls, &mut curr.stereo_ls, counters)
        } else {
            Vec::new()
        };

        counters.assign_missing(curr);

        debug!(
            frame = curr.frame_idx,
            points = matched_pt.len(),
            lines = matched_ls.len(),
            "f2f association"
        );

        Correspondences::from_matches(matched_pt, matched_ls)
    }

    fn associate_points(
        &self,
        prev: &mut [PointFeature],
        curr: &mut [PointFeature],
        counters: &mut TrackIdCounters,
    ) -> Vec<usize> {
        let prev_desc: Vec<BinaryDescriptor> = prev.iter().map(|p| p.desc).collect();
        let curr_desc: Vec<BinaryDescriptor> = curr.iter().map(|p| p.desc).collect();
        let matches = self.matcher.match_descriptors(&prev_desc, &curr_desc);

        let mut matched = Vec::new();
        for m in &matches.forward {
            let (qdx, tdx) = (m.query_idx, m.best.train_idx);
            let ratio_ok = m
                .distance_ratio()
                .map_or(true, |ratio| ratio > self.config.min_ratio_12_p);

            let (p, c) = (&prev[qdx], &curr[tdx]);
            let disp_l = (c.pl.x - p.pl.x).abs();
            let disp_r = ((c.pl.x - c.disp) - (p.pl.x - p.disp)).abs();

            if matches.is_mutual(m) && ratio_ok && disp_l <= self.disp_th && disp_r <= self.disp_th
            {
                let id = *prev[qdx]
                    .track_id
                    .get_or_insert_with(|| counters.next_point_id());
                let point = &mut prev[qdx];
                point.pl_obs = curr[tdx].pl;
                point.inlier = true;
                curr[tdx].track_id = Some(id);
                matched.push(qdx);
            } else if curr[tdx].track_id.is_none() {
                curr[tdx].track_id = Some(counters.next_point_id());
            }
        }
        matched
    }

    fn associate_lines(
        &self,
        prev: &mut [LineFeature],
        curr: &mut [LineFeature],
        counters: &mut TrackIdCounters,
    ) -> Vec<usize> {
        let prev_desc: Vec<BinaryDescriptor> = prev.iter().map(|l| l.desc).collect();
        let curr_desc: Vec<BinaryDescriptor> = curr.iter().map(|l| l.desc).collect();
        let matches = self.matcher.match_descriptors(&prev_desc, &curr_desc);

        // Adaptive gap threshold from the first-pass distance gaps.
        let gaps: Vec<f64> = matches
            .forward
            .iter()
            .filter_map(|m| m.distance_gap())
            .collect();
        let nn12_th = mad_scale(&gaps) * self.config.desc_th_l;
        let flow_th = 2.0 * self.config.f2f_flow_th;

        let mut matched = Vec::new();
        for m in &matches.forward {
            let (qdx, tdx) = (m.query_idx, m.best.train_idx);
            let gap_ok = m.distance_gap().map_or(true, |gap| gap > nn12_th);

            let (p, c) = (&prev[qdx], &curr[tdx]);
            let ang_ok = angle_diff(p.angle, c.angle) < self.config.max_f2f_ang_diff;
            let flow_ok = (c.endpoint_sum() - p.endpoint_sum()).norm() < flow_th;

            if matches.is_mutual(m) && gap_ok && ang_ok && flow_ok {
                let id = *prev[qdx]
                    .track_id
                    .get_or_insert_with(|| counters.next_line_id());
                let (spl, epl, le) = (curr[tdx].spl, curr[tdx].epl, curr[tdx].le);
                let line = &mut prev[qdx];
                line.spl_obs = spl;
                line.epl_obs = epl;
                line.le_obs = le;
                line.inlier = true;
                curr[tdx].track_id = Some(id);
                matched.push(qdx);
            } else if curr[tdx].track_id.is_none() {
                curr[tdx].track_id = Some(counters.next_line_id());
            }
        }
        matched
    }
}
