//! Matching of many frame pairs at once.
//!
//! Pairs are independent, so they run in parallel and a failing pair never
//! aborts the others.

use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::TrackingConfig;
use crate::error::MatchError;
use crate::frame::Frame;
use crate::matching::{match_frame_pair, MatchResult};

/// Results keyed by `(frame index, frame index)`.
#[derive(Debug, Clone, Default)]
pub struct PairwiseMatches {
    pub matches: BTreeMap<(usize, usize), MatchResult>,
    pub failures: BTreeMap<(usize, usize), MatchError>,
}

impl PairwiseMatches {
    pub fn get(&self, frame_a: usize, frame_b: usize) -> Option<&MatchResult> {
        self.matches.get(&(frame_a, frame_b))
    }

    pub fn insert(&mut self, frame_a: usize, frame_b: usize, result: MatchResult) {
        self.matches.insert((frame_a, frame_b), result);
    }

    pub fn num_matches(&self) -> usize {
        self.matches.values().map(MatchResult::len).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Matches every consecutive pair of `frames`.
pub fn match_all_adjacent_frames(frames: &[Frame], config: &TrackingConfig) -> PairwiseMatches {
    let pairs: Vec<(usize, usize)> = (1..frames.len()).map(|i| (i - 1, i)).collect();
    match_frame_pairs(frames, &pairs, config)
}

/// Matches the given pairs of positions in `frames`, in parallel.
///
/// A frame without points yields an empty result for its pairs. Any other
/// error is logged and recorded under the pair; positions out of range are
/// skipped.
pub fn match_frame_pairs(
    frames: &[Frame],
    pairs: &[(usize, usize)],
    config: &TrackingConfig,
) -> PairwiseMatches {
    let codec = config.stitching.codec();
    let outcomes: Vec<((usize, usize), Result<MatchResult, MatchError>)> = pairs
        .par_iter()
        .filter_map(|&(a, b)| Some((frames.get(a)?, frames.get(b)?)))
        .map(|(f0, f1)| {
            let key = (f0.index, f1.index);
            match match_frame_pair(f0, f1, &config.matching, &codec) {
                Err(MatchError::NoPoints { frame }) => {
                    warn!(frame0 = key.0, frame1 = key.1, frame, "frame has no points");
                    (key, Ok(MatchResult::empty()))
                }
                outcome => (key, outcome),
            }
        })
        .collect();

    let mut pairwise = PairwiseMatches::default();
    for (key, outcome) in outcomes {
        match outcome {
            Ok(result) => {
                pairwise.matches.insert(key, result);
            }
            Err(err) => {
                warn!(frame0 = key.0, frame1 = key.1, error = %err, "matching failed");
                pairwise.failures.insert(key, err);
            }
        }
    }
    info!(
        n_pairs = pairwise.matches.len(),
        n_failed = pairwise.failures.len(),
        n_matches = pairwise.num_matches(),
        "matched frame pairs"
    );
    pairwise
}
