//! Conversion of distances and summed evidence into comparable confidences.

use nalgebra::DMatrix;
use num::Float;

use crate::matching::MatchResult;

/// Maps a Euclidean distance to a confidence in `(0, 1]`.
///
/// `exp(-d / gamma)`: 1 at zero distance, strictly decreasing. Non-finite
/// distances (NaN sentinels, infinities) score 0.
pub fn distance_to_confidence<T: Float>(distance: T, gamma: T) -> T {
    if !distance.is_finite() {
        return T::zero();
    }
    (-distance.abs() / gamma).exp()
}

pub fn distances_to_confidences<T: Float>(distances: &[T], gamma: T) -> Vec<T> {
    distances
        .iter()
        .map(|&d| distance_to_confidence(d, gamma))
        .collect()
}

/// Confidence of each matched pair, looked up in a dense distance matrix.
pub fn confidence_from_distance_matrix(
    distances: &DMatrix<f64>,
    matches: &[(usize, usize)],
    gamma: f64,
) -> Vec<f64> {
    matches
        .iter()
        .map(|&(i, j)| distance_to_confidence(distances[(i, j)], gamma))
        .collect()
}

/// Saturating transform applied to confidences summed over duplicate
/// candidates. Range `(-1, 1)`.
pub fn summed_confidence<T: Float>(sum: T) -> T {
    sum.tanh()
}

/// Drops matches whose confidence is below `threshold`.
///
/// `raw_matches` is left untouched so the unfiltered result stays available.
pub fn filter_by_confidence(result: MatchResult, threshold: f64) -> MatchResult {
    let MatchResult {
        matches,
        confidences,
        raw_matches,
    } = result;
    let (matches, confidences) = matches
        .into_iter()
        .zip(confidences)
        .filter(|&(_, c)| c >= threshold)
        .unzip();
    MatchResult {
        matches,
        confidences,
        raw_matches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nearly_eq::assert_nearly_eq;

    #[test]
    fn test_distance_to_confidence() {
        assert_eq!(distance_to_confidence(0.0_f64, 1.0), 1.0);
        assert_nearly_eq!(distance_to_confidence(1.0_f64, 1.0), 0.36787944, 1e-6);
        assert_nearly_eq!(distance_to_confidence(2.0_f32, 2.0), 0.36787944, 1e-6);
        assert_eq!(distance_to_confidence(f64::NAN, 1.0), 0.0);
        assert_eq!(distance_to_confidence(f64::INFINITY, 1.0), 0.0);
    }

    #[test]
    fn test_confidence_is_monotone() {
        let d = [0.0, 0.5, 1.0, 3.0, 10.0, 100.0];
        let c = distances_to_confidences(&d, 1.5);
        for w in c.windows(2) {
            assert!(w[0] > w[1] || (w[0] == 0.0 && w[1] == 0.0));
        }
        assert!(c.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_summed_confidence_saturates() {
        assert_nearly_eq!(summed_confidence(1.4_f64), 0.88535165, 1e-6);
        assert_nearly_eq!(summed_confidence(0.8_f64), 0.66403677, 1e-6);
        assert!(summed_confidence(50.0_f64) < 1.0 + f64::EPSILON);
        assert_eq!(summed_confidence(0.0_f64), 0.0);
    }

    #[test]
    fn test_confidence_from_distance_matrix() {
        let d = DMatrix::from_row_slice(2, 2, &[0.0, 4.0, 4.0, 1.0]);
        let c = confidence_from_distance_matrix(&d, &[(0, 0), (1, 1)], 1.0);
        assert_eq!(c.len(), 2);
        assert_eq!(c[0], 1.0);
        assert_nearly_eq!(c[1], (-1.0_f64).exp(), 1e-12);
    }

    #[test]
    fn test_filter_by_confidence_keeps_raw() {
        let result = MatchResult {
            matches: vec![(0, 1), (1, 0), (2, 2)],
            confidences: vec![0.9, 0.1, 0.5],
            raw_matches: vec![(0, 1), (1, 0), (2, 2)],
        };
        let filtered = filter_by_confidence(result, 0.5);
        assert_eq!(filtered.matches, vec![(0, 1), (2, 2)]);
        assert_eq!(filtered.confidences, vec![0.9, 0.5]);
        assert_eq!(filtered.raw_matches.len(), 3);
    }
}
