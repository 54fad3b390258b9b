//! Brute-force Hamming descriptor matching between consecutive frames.
//!
//! Matching is read-only over both descriptor sets. When both directions
//! are requested they may run as a fork-join pair of scoped threads; no
//! result is consumed before both have been joined.

use std::thread;

use crate::tracking::frame::BinaryDescriptor;

/// One candidate in a k-nearest-neighbour list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbour {
    pub train_idx: usize,
    pub distance: u32,
}

/// Two nearest neighbours of one query descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnnMatch {
    pub query_idx: usize,
    pub best: Neighbour,
    /// `None` when the train set holds a single descriptor.
    pub second: Option<Neighbour>,
}

impl KnnMatch {
    /// Best / second-best distance ratio, `None` without a second neighbour.
    pub fn distance_ratio(&self) -> Option<f64> {
        self.second
            .map(|s| self.best.distance as f64 / s.distance as f64)
    }

    /// Second-best minus best distance, `None` without a second neighbour.
    pub fn distance_gap(&self) -> Option<f64> {
        self.second
            .map(|s| s.distance as f64 - self.best.distance as f64)
    }
}

/// k=2 nearest neighbours of every query in `train`, ordered by query index.
///
/// Ties keep the lowest train index. Returns an empty list when either
/// set is empty.
pub fn knn_match(query: &[BinaryDescriptor], train: &[BinaryDescriptor]) -> Vec<KnnMatch> {
    if train.is_empty() {
        return Vec::new();
    }

    query
        .iter()
        .enumerate()
        .map(|(query_idx, q)| {
            let mut best: Option<Neighbour> = None;
            let mut second: Option<Neighbour> = None;
            for (train_idx, t) in train.iter().enumerate() {
                let candidate = Neighbour {
                    train_idx,
                    distance: q.distance(t),
                };
                match best {
                    Some(b) if candidate.distance >= b.distance => {
                        if second.map_or(true, |s| candidate.distance < s.distance) {
                            second = Some(candidate);
                        }
                    }
                    _ => {
                        second = best;
                        best = Some(candidate);
                    }
                }
            }
            KnnMatch {
                query_idx,
                // train is non-empty, so the first iteration always sets best.
                best: best.unwrap_or(Neighbour {
                    train_idx: 0,
                    distance: u32::MAX,
                }),
                second,
            }
        })
        .collect()
}

/// Result of matching previous → current and, optionally, current → previous.
#[derive(Debug, Clone, Default)]
pub struct BidirectionalMatches {
    /// previous → current, ordered by previous-frame index.
    pub forward: Vec<KnnMatch>,
    /// current → previous, ordered by current-frame index.
    pub backward: Option<Vec<KnnMatch>>,
}

impl BidirectionalMatches {
    /// True when `m` is the best match in both directions.
    ///
    /// Always true when only the forward direction was computed.
    pub fn is_mutual(&self, m: &KnnMatch) -> bool {
        match &self.backward {
            Some(backward) => backward
                .get(m.best.train_idx)
                .is_some_and(|b| b.best.train_idx == m.query_idx),
            None => true,
        }
    }
}

/// Hamming matcher configured for one or both matching directions.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorMatcher {
    pub bidirectional: bool,
    pub parallel: bool,
}

impl DescriptorMatcher {
    pub fn new(bidirectional: bool, parallel: bool) -> Self {
        Self {
            bidirectional,
            parallel,
        }
    }

    /// Match previous-frame descriptors against current-frame descriptors.
    pub fn match_descriptors(
        &self,
        prev: &[BinaryDescriptor],
        curr: &[BinaryDescriptor],
    ) -> BidirectionalMatches {
        if !self.bidirectional {
            return BidirectionalMatches {
                forward: knn_match(prev, curr),
                backward: None,
            };
        }

        let (forward, backward) = if self.parallel {
            thread::scope(|s| {
                let backward = s.spawn(|| knn_match(curr, prev));
                let forward = knn_match(prev, curr);
                let backward = backward
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
                (forward, backward)
            })
        } else {
            (knn_match(prev, curr), knn_match(curr, prev))
        };

        BidirectionalMatches {
            forward,
            backward: Some(backward),
        }
    }
}
