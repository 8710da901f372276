use kiddo::{ImmutableKdTree, SquaredEuclidean};
use ndarray::ArrayView2;

use super::MatchResult;
use crate::confidence::distance_to_confidence;
use crate::error::MatchError;
use crate::frame::{zxy_rows, Zxy};

/// Stand-in for NaN coordinates; far enough to fail any sane `max_dist`.
pub const NAN_SENTINEL: f64 = 1e6;

pub(crate) fn sentinel(point: Zxy) -> Zxy {
    point.map(|v| if v.is_nan() { NAN_SENTINEL } else { v })
}

/// K-d tree over the finite points of a frame.
///
/// Built in one go as an immutable tree, which copes with any number of
/// points sharing a coordinate (a whole z-slice, say). Sentineled points
/// are left out since none of them can be a match.
pub(crate) struct PointIndex {
    tree: Option<ImmutableKdTree<f64, 3>>,
    /// Frame row of each indexed point, in tree item order.
    rows: Vec<usize>,
}

impl PointIndex {
    pub(crate) fn new(points: &[Zxy]) -> Self {
        let (rows, indexed): (Vec<usize>, Vec<Zxy>) = points
            .iter()
            .enumerate()
            .filter(|(_, p)| p.iter().all(|v| v.is_finite() && v.abs() < NAN_SENTINEL))
            .map(|(j, p)| (j, *p))
            .unzip();
        let tree = (!indexed.is_empty()).then(|| ImmutableKdTree::new_from_slice(&indexed));
        Self { tree, rows }
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Up to `k` nearest indexed points as `(row, squared distance)`,
    /// closest first.
    pub(crate) fn nearest_n(&self, query: &Zxy, k: usize) -> Vec<(usize, f64)> {
        let Some(tree) = &self.tree else {
            return Vec::new();
        };
        if k == 0 {
            return Vec::new();
        }
        tree.nearest_n::<SquaredEuclidean>(query, k.min(self.len()))
            .into_iter()
            .filter_map(|n| Some((*self.rows.get(n.item as usize)?, n.distance)))
            .collect()
    }
}

/// For every point of `zxy0`, its `n_neighbors` nearest points of `zxy1`
/// closer than `max_dist`.
///
/// With `n_neighbors > 1` a source point may be matched several times, so
/// the result is a candidate list rather than an assignment. Matches are
/// ordered by source index, then by distance.
pub fn nearest_neighbor_matches(
    zxy0: ArrayView2<f64>,
    zxy1: ArrayView2<f64>,
    max_dist: f64,
    n_neighbors: usize,
    gamma: f64,
) -> Result<MatchResult, MatchError> {
    if zxy0.nrows() == 0 {
        return Err(MatchError::NoPoints { frame: 0 });
    }
    if zxy1.nrows() == 0 {
        return Err(MatchError::NoPoints { frame: 1 });
    }
    let queries: Vec<Zxy> = zxy_rows(zxy0)?.into_iter().map(sentinel).collect();
    let targets: Vec<Zxy> = zxy_rows(zxy1)?.into_iter().map(sentinel).collect();

    let index = PointIndex::new(&targets);
    let k = n_neighbors.min(index.len());

    let mut result = MatchResult::empty();
    if k == 0 {
        return Ok(result);
    }
    for (i, q) in queries.iter().enumerate() {
        for (j, dist_sq) in index.nearest_n(q, k) {
            let dist = dist_sq.sqrt();
            let pair = (i, j);
            result.raw_matches.push(pair);
            if dist < max_dist {
                result.matches.push(pair);
                result.confidences.push(distance_to_confidence(dist, gamma));
            }
        }
    }
    Ok(result)
}
