//! Matching on the outputs of learned models: log-score matrices from a
//! graph matching network and per-point feature embeddings.

use nalgebra::DMatrix;
use ndarray::ArrayView2;

use super::MatchResult;
use crate::error::MatchError;
use crate::frame::pairwise_distances;
use crate::lapjv::linear_sum_assignment_maximize;

/// Index of the first largest value; NaN never wins.
fn argmax<I: Iterator<Item = f64>>(values: I) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, v) in values.enumerate() {
        if v.is_nan() {
            continue;
        }
        if best.map_or(true, |(_, b)| v > b) {
            best = Some((i, v));
        }
    }
    best.map(|(i, _)| i)
}

/// Mutual arg-max matches of an `(n0, n1)` log-score matrix.
///
/// `(i, j)` is kept when `j` is the best column of row `i`, `i` the best row
/// of column `j`, and `exp(score) > match_threshold`. Any dustbin row and
/// column must be removed beforehand. Confidence is `exp(score)`;
/// `raw_matches` holds every mutual pair regardless of the threshold.
pub fn mutual_score_matches(log_scores: &DMatrix<f64>, match_threshold: f64) -> MatchResult {
    let best_col: Vec<Option<usize>> = log_scores
        .row_iter()
        .map(|row| argmax(row.iter().copied()))
        .collect();
    let best_row: Vec<Option<usize>> = log_scores
        .column_iter()
        .map(|col| argmax(col.iter().copied()))
        .collect();

    let mut result = MatchResult::empty();
    for (i, j) in best_col.iter().enumerate() {
        let Some(j) = *j else { continue };
        if best_row[j] != Some(i) {
            continue;
        }
        result.raw_matches.push((i, j));
        let score = log_scores[(i, j)].exp();
        if score > match_threshold {
            result.matches.push((i, j));
            result.confidences.push(score);
        }
    }
    result
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Assignment between query and template points from their embeddings.
///
/// For every template point, `sigmoid(1 / distance)` to each query point is
/// softmax-normalized across the query points, and the assignment maximizing
/// the total is taken. Matches are `(query, template)`, sorted by query
/// index, with the softmax value as confidence.
///
/// # Errors
/// [`MatchError::NoPoints`] with `frame: 0` for an empty query, `frame: 1`
/// for an empty template.
pub fn softmax_embedding_matches(
    query: ArrayView2<f64>,
    template: ArrayView2<f64>,
) -> Result<MatchResult, MatchError> {
    if query.nrows() == 0 {
        return Err(MatchError::NoPoints { frame: 0 });
    }
    if template.nrows() == 0 {
        return Err(MatchError::NoPoints { frame: 1 });
    }

    // rows: template, columns: query
    let mut scores = pairwise_distances(template, query)?;
    scores.apply(|d| *d = sigmoid(1.0 / *d));
    for mut row in scores.row_iter_mut() {
        let max = row.max();
        row.apply(|v| *v = (*v - max).exp());
        let total = row.sum();
        row /= total;
    }

    let assignment = linear_sum_assignment_maximize(&scores)?;
    let mut pairs: Vec<((usize, usize), f64)> = assignment
        .into_iter()
        .map(|(t, q)| ((q, t), scores[(t, q)]))
        .collect();
    pairs.sort_by_key(|&(m, _)| m);

    let (matches, confidences): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
    Ok(MatchResult {
        raw_matches: matches.clone(),
        matches,
        confidences,
    })
}
