//! Linear-sum-assignment matchers.

use nalgebra::DMatrix;
use ndarray::ArrayView2;
use tracing::warn;

use super::MatchResult;
use crate::candidates::CandidateMatch;
use crate::confidence::{confidence_from_distance_matrix, summed_confidence};
use crate::error::MatchError;
use crate::frame::pairwise_distances;
use crate::lapjv::{linear_sum_assignment, linear_sum_assignment_maximize};

/// Globally optimal matching from an over-complete, possibly duplicated
/// candidate list.
///
/// Confidences above `min_confidence_before_sum` are summed into a dense
/// `(max_a + 1, max_b + 1)` matrix, sums below `min_confidence_after_sum`
/// are zeroed, and total confidence is maximized. Accepted pairs get
/// `tanh(sum)` and are kept only while still above
/// `min_confidence_after_sum`.
///
/// # Errors
/// [`MatchError::NoCandidates`] for an empty candidate list.
pub fn bipartite_from_candidates(
    candidates: &[CandidateMatch],
    min_confidence_before_sum: f64,
    min_confidence_after_sum: f64,
) -> Result<MatchResult, MatchError> {
    if candidates.is_empty() {
        return Err(MatchError::NoCandidates);
    }

    // TODO: a sparse matrix would avoid sizing by the largest index
    let n0 = candidates.iter().map(|c| c.point_a).max().unwrap_or(0) + 1;
    let n1 = candidates.iter().map(|c| c.point_b).max().unwrap_or(0) + 1;
    let mut conf_matrix = DMatrix::<f64>::zeros(n0, n1);
    for c in candidates {
        if c.confidence > min_confidence_before_sum {
            conf_matrix[(c.point_a, c.point_b)] += c.confidence;
        }
    }
    conf_matrix.apply(|c| {
        if *c < min_confidence_after_sum {
            *c = 0.0;
        }
    });

    let raw_matches = linear_sum_assignment_maximize(&conf_matrix)?;

    let mut matches = Vec::with_capacity(raw_matches.len());
    let mut confidences = Vec::with_capacity(raw_matches.len());
    for &(i, j) in &raw_matches {
        let conf = summed_confidence(conf_matrix[(i, j)]);
        if conf > min_confidence_after_sum {
            matches.push((i, j));
            confidences.push(conf);
        }
    }

    if matches.is_empty() {
        warn!(
            n_candidates = candidates.len(),
            "bipartite matching removed all candidates"
        );
    }

    Ok(MatchResult {
        matches,
        confidences,
        raw_matches,
    })
}

/// Linear assignment minimizing total Euclidean distance between two point
/// clouds of any (equal) dimension.
///
/// `max_dist` is an optional post-filter; `raw_matches` always holds the
/// full assignment.
pub fn bipartite_from_positions(
    zxy0: ArrayView2<f64>,
    zxy1: ArrayView2<f64>,
    max_dist: Option<f64>,
    gamma: f64,
) -> Result<MatchResult, MatchError> {
    if zxy0.nrows() == 0 {
        return Err(MatchError::NoPoints { frame: 0 });
    }
    if zxy1.nrows() == 0 {
        return Err(MatchError::NoPoints { frame: 1 });
    }

    let cost_matrix = pairwise_distances(zxy0, zxy1)?;
    let raw_matches = linear_sum_assignment(&cost_matrix)?;

    let matches: Vec<(usize, usize)> = match max_dist {
        Some(max_dist) => raw_matches
            .iter()
            .copied()
            .filter(|&(i, j)| cost_matrix[(i, j)] <= max_dist)
            .collect(),
        None => raw_matches.clone(),
    };
    let confidences = confidence_from_distance_matrix(&cost_matrix, &matches, gamma);

    Ok(MatchResult {
        matches,
        confidences,
        raw_matches,
    })
}
