use nalgebra::DMatrix;
use ndarray::{Array2, ArrayView2};

use crate::error::MatchError;

/// A `(z, x, y)` coordinate.
pub type Zxy = [f64; 3];

/*------------------------------------------------------------------------------
Frame struct
------------------------------------------------------------------------------*/

/// Detections of one volume: an `(N, 3)` zxy array and optional `(N, D)`
/// feature embeddings, row `i` describing local point `i`.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: usize,
    pub zxy: Array2<f64>,
    pub embedding: Option<Array2<f64>>,
}

impl Frame {
    pub fn new(index: usize, zxy: Array2<f64>) -> Self {
        Self {
            index,
            zxy,
            embedding: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Array2<f64>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn from_points(index: usize, points: &[Zxy]) -> Self {
        let flat: Vec<f64> = points.iter().flatten().copied().collect();
        // (n, 3) always matches the flattened length
        let zxy = Array2::from_shape_vec((points.len(), 3), flat)
            .unwrap_or_else(|_| Array2::zeros((0, 3)));
        Self::new(index, zxy)
    }

    pub fn num_points(&self) -> usize {
        self.zxy.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.num_points() == 0
    }

    /// Embeddings, when present, need one row per point.
    pub fn check_embedding(&self) -> Result<(), MatchError> {
        match &self.embedding {
            Some(e) if e.nrows() != self.num_points() => Err(MatchError::EmbeddingRowMismatch {
                frame: self.index,
                points: self.num_points(),
                embeddings: e.nrows(),
            }),
            _ => Ok(()),
        }
    }

    pub fn position(&self, point_index: usize) -> Option<Zxy> {
        if point_index >= self.num_points() || self.zxy.ncols() != 3 {
            return None;
        }
        let row = self.zxy.row(point_index);
        Some([row[0], row[1], row[2]])
    }
}

/// Rows of an `(N, 3)` array as fixed-size points.
pub(crate) fn zxy_rows(points: ArrayView2<f64>) -> Result<Vec<Zxy>, MatchError> {
    if points.ncols() != 3 {
        return Err(MatchError::DimensionMismatch {
            expected: 3,
            found: points.ncols(),
        });
    }
    Ok(points
        .outer_iter()
        .map(|row| [row[0], row[1], row[2]])
        .collect())
}

/// Dense Euclidean distance matrix between the rows of `a` and `b`.
pub fn pairwise_distances(
    a: ArrayView2<f64>,
    b: ArrayView2<f64>,
) -> Result<DMatrix<f64>, MatchError> {
    if a.ncols() != b.ncols() {
        return Err(MatchError::DimensionMismatch {
            expected: a.ncols(),
            found: b.ncols(),
        });
    }
    Ok(DMatrix::from_fn(a.nrows(), b.nrows(), |i, j| {
        a.row(i)
            .iter()
            .zip(b.row(j).iter())
            .map(|(p, q)| (p - q) * (p - q))
            .sum::<f64>()
            .sqrt()
    }))
}
