//! Pairwise matchers between the points of two frames.
//!
//! Every backend returns a [`MatchResult`] whose indices are the original
//! local point indices of the two frames, with one confidence per match and
//! an unfiltered copy of the matches for diagnostics.

pub mod graph;
pub mod hungarian;
pub mod icp;
pub mod learned;
pub mod nearest_neighbor;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::candidates::{CandidateAggregator, CandidateMatch};
use crate::config::{MatcherBackend, MatchingConfig};
use crate::confidence::filter_by_confidence;
use crate::error::MatchError;
use crate::frame::Frame;
use crate::frame_index::FrameIndexCodec;

pub use graph::bipartite_graph_matches;
pub use hungarian::{bipartite_from_candidates, bipartite_from_positions};
pub use icp::{icp_matches, icp_register, IcpParams, IcpRegistration};
pub use learned::{mutual_score_matches, softmax_embedding_matches};
pub use nearest_neighbor::nearest_neighbor_matches;

/*-----------------------------------------------------------------------------
MatchResult
-----------------------------------------------------------------------------*/

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// `(point in frame 0, point in frame 1)`
    pub matches: Vec<(usize, usize)>,
    /// Parallel to `matches`.
    pub confidences: Vec<f64>,
    /// Matches before any confidence or distance filtering.
    pub raw_matches: Vec<(usize, usize)>,
}

impl MatchResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ((usize, usize), f64)> + '_ {
        self.matches
            .iter()
            .copied()
            .zip(self.confidences.iter().copied())
    }

    /// True if no point appears twice on either side.
    pub fn is_injective(&self) -> bool {
        let mut seen_a = HashSet::with_capacity(self.len());
        let mut seen_b = HashSet::with_capacity(self.len());
        self.matches
            .iter()
            .all(|&(a, b)| seen_a.insert(a) && seen_b.insert(b))
    }

    /// Swaps the two sides, e.g. for backends that report `(query, template)`.
    pub fn swapped(self) -> Self {
        let flip = |v: Vec<(usize, usize)>| v.into_iter().map(|(a, b)| (b, a)).collect();
        Self {
            matches: flip(self.matches),
            confidences: self.confidences,
            raw_matches: flip(self.raw_matches),
        }
    }

    pub(crate) fn sorted(mut self) -> Self {
        let mut pairs: Vec<_> = self
            .matches
            .into_iter()
            .zip(self.confidences)
            .collect();
        pairs.sort_by_key(|&(m, _)| m);
        let (matches, confidences): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
        self.matches = matches;
        self.confidences = confidences;
        self.raw_matches.sort_unstable();
        self
    }
}

/*-----------------------------------------------------------------------------
Backend dispatch
-----------------------------------------------------------------------------*/

/// Matches the points of `frame0` to those of `frame1` with the configured
/// backend, then applies `match_confidence_threshold`.
///
/// [`MatchError::NoPoints`] raised here names the frame index, not the side
/// of the pair.
pub fn match_frame_pair(
    frame0: &Frame,
    frame1: &Frame,
    config: &MatchingConfig,
    codec: &FrameIndexCodec,
) -> Result<MatchResult, MatchError> {
    let result = run_backend(frame0, frame1, config, codec).map_err(|err| match err {
        MatchError::NoPoints { frame: 0 } => MatchError::NoPoints {
            frame: frame0.index,
        },
        MatchError::NoPoints { .. } => MatchError::NoPoints {
            frame: frame1.index,
        },
        other => other,
    })?;

    debug!(
        frame0 = frame0.index,
        frame1 = frame1.index,
        backend = config.backend.name(),
        n_matches = result.len(),
        "matched frame pair"
    );
    Ok(filter_by_confidence(result, config.match_confidence_threshold))
}

fn run_backend(
    frame0: &Frame,
    frame1: &Frame,
    config: &MatchingConfig,
    codec: &FrameIndexCodec,
) -> Result<MatchResult, MatchError> {
    frame0.check_embedding()?;
    frame1.check_embedding()?;
    Ok(match config.backend {
        MatcherBackend::GraphMaxWeight => {
            let candidates = geometric_candidates(frame0, frame1, config)?;
            bipartite_graph_matches(&candidates, codec)?
        }
        MatcherBackend::Hungarian => {
            let mut aggregator = CandidateAggregator::new(
                frame0.index,
                frame1.index,
                config.min_confidence_before_sum,
                config.min_confidence_after_sum,
            );
            let (geometric, embedded) = rayon::join(
                || geometric_candidates(frame0, frame1, config),
                || embedding_candidates(frame0, frame1),
            );
            aggregator.extend(geometric?)?;
            if let Some(embedded) = embedded {
                aggregator.extend(embedded?)?;
            }
            aggregator.resolve()?
        }
        MatcherBackend::Positions => bipartite_from_positions(
            frame0.zxy.view(),
            frame1.zxy.view(),
            config.positions_max_dist(),
            config.gamma,
        )?,
        MatcherBackend::NearestNeighbor => nearest_neighbor_matches(
            frame0.zxy.view(),
            frame1.zxy.view(),
            config.max_dist,
            config.n_neighbors,
            config.gamma,
        )?,
        MatcherBackend::Icp => icp_matches(
            frame0.zxy.view(),
            frame1.zxy.view(),
            &config.icp_params(),
            config.gamma,
        )?,
        MatcherBackend::Embedding => {
            let (Some(e0), Some(e1)) = (&frame0.embedding, &frame1.embedding) else {
                return Err(MatchError::MissingEmbedding(config.backend.name()));
            };
            softmax_embedding_matches(e1.view(), e0.view())
                .map_err(query_is_frame1)?
                .swapped()
                .sorted()
        }
    })
}

fn geometric_candidates(
    frame0: &Frame,
    frame1: &Frame,
    config: &MatchingConfig,
) -> Result<Vec<CandidateMatch>, MatchError> {
    let result = nearest_neighbor_matches(
        frame0.zxy.view(),
        frame1.zxy.view(),
        config.max_dist,
        config.n_neighbors,
        config.gamma,
    )?;
    Ok(CandidateMatch::from_match_result(frame0.index, frame1.index, &result))
}

fn embedding_candidates(
    frame0: &Frame,
    frame1: &Frame,
) -> Option<Result<Vec<CandidateMatch>, MatchError>> {
    let (e0, e1) = (frame0.embedding.as_ref()?, frame1.embedding.as_ref()?);
    Some(
        softmax_embedding_matches(e1.view(), e0.view())
            .map_err(query_is_frame1)
            .map(|result| {
                CandidateMatch::from_match_result(frame0.index, frame1.index, &result.swapped())
            }),
    )
}

/// Embedding matching takes frame 1 as its query side.
fn query_is_frame1(err: MatchError) -> MatchError {
    match err {
        MatchError::NoPoints { frame } => MatchError::NoPoints { frame: 1 - frame },
        other => other,
    }
}
