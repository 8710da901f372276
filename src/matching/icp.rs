//! Point-to-point rigid ICP between two frames.
//!
//! The registration aligns frame 0 onto frame 1; the correspondences found
//! under the final transform are the matches.

use nalgebra::{Isometry3, Matrix3, Point3, Rotation3, Translation3, UnitQuaternion, Vector3};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::nearest_neighbor::{sentinel, PointIndex};
use super::MatchResult;
use crate::confidence::distance_to_confidence;
use crate::error::MatchError;
use crate::frame::{zxy_rows, Zxy};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcpParams {
    pub max_correspondence_distance: f64,
    pub max_iterations: usize,
    /// Stop once fitness changes by less than this between iterations...
    pub relative_fitness: f64,
    /// ...and inlier RMSE by less than this.
    pub relative_rmse: f64,
}

impl Default for IcpParams {
    fn default() -> Self {
        Self {
            max_correspondence_distance: 5.0,
            max_iterations: 30,
            relative_fitness: 1e-6,
            relative_rmse: 1e-6,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IcpRegistration {
    pub result: MatchResult,
    /// Maps frame-0 coordinates onto frame 1.
    pub transform: Isometry3<f64>,
    /// Share of frame-0 points with a correspondence.
    pub fitness: f64,
    pub inlier_rmse: f64,
    pub iterations: usize,
}

impl IcpRegistration {
    fn empty() -> Self {
        Self {
            result: MatchResult::empty(),
            transform: Isometry3::identity(),
            fitness: 0.0,
            inlier_rmse: 0.0,
            iterations: 0,
        }
    }
}

/*-----------------------------------------------------------------------------
Correspondences
-----------------------------------------------------------------------------*/

struct Correspondences {
    /// `(source, target, squared distance)`, at most one per source point
    pairs: Vec<(usize, usize, f64)>,
    fitness: f64,
    inlier_rmse: f64,
}

fn to_point(p: &Zxy) -> Point3<f64> {
    Point3::new(p[0], p[1], p[2])
}

fn find_correspondences(
    source: &[Zxy],
    index: &PointIndex,
    transform: &Isometry3<f64>,
    max_dist: f64,
) -> Correspondences {
    let max_dist_sq = max_dist * max_dist;
    let mut pairs = Vec::new();
    for (i, p) in source.iter().enumerate() {
        if !p.iter().all(|v| v.is_finite()) {
            continue;
        }
        let moved = transform.transform_point(&to_point(p));
        let query = [moved.x, moved.y, moved.z];
        let Some(&(j, dist_sq)) = index.nearest_n(&query, 1).first() else {
            continue;
        };
        if dist_sq <= max_dist_sq {
            pairs.push((i, j, dist_sq));
        }
    }

    let fitness = if source.is_empty() {
        0.0
    } else {
        pairs.len() as f64 / source.len() as f64
    };
    let inlier_rmse = if pairs.is_empty() {
        0.0
    } else {
        (pairs.iter().map(|&(_, _, d2)| d2).sum::<f64>() / pairs.len() as f64).sqrt()
    };
    Correspondences {
        pairs,
        fitness,
        inlier_rmse,
    }
}

/// Least-squares rigid transform taking the `from` points onto the `to`
/// points (Kabsch). `None` below three pairs or if the SVD fails.
fn estimate_rigid_transform(from: &[Point3<f64>], to: &[Point3<f64>]) -> Option<Isometry3<f64>> {
    if from.len() < 3 || from.len() != to.len() {
        return None;
    }
    let n = from.len() as f64;
    let centroid = |points: &[Point3<f64>]| {
        points.iter().fold(Vector3::<f64>::zeros(), |acc, p| acc + p.coords) / n
    };
    let (c_from, c_to) = (centroid(from), centroid(to));

    let mut h = Matrix3::<f64>::zeros();
    for (p, q) in from.iter().zip(to) {
        h += (p.coords - c_from) * (q.coords - c_to).transpose();
    }
    let svd = h.svd(true, true);
    let weakest = svd.singular_values.imin();
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return None;
    };
    let mut v = v_t.transpose();
    let mut r = v * u.transpose();
    if r.determinant() < 0.0 {
        // reflection; flip the axis of the smallest singular value
        v.column_mut(weakest).neg_mut();
        r = v * u.transpose();
    }

    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    let translation = Translation3::from(c_to - rotation * c_from);
    Some(Isometry3::from_parts(translation, rotation))
}

/*-----------------------------------------------------------------------------
Registration
-----------------------------------------------------------------------------*/

/// Registers `zxy0` onto `zxy1` and returns the final correspondences along
/// with the transform and its quality.
///
/// Each frame-0 point is matched at most once; frame-1 points may repeat.
/// Confidences come from the distance between the matched points' original
/// coordinates. Empty input gives an empty registration.
pub fn icp_register(
    zxy0: ArrayView2<f64>,
    zxy1: ArrayView2<f64>,
    params: &IcpParams,
    gamma: f64,
) -> Result<IcpRegistration, MatchError> {
    if zxy0.nrows() == 0 || zxy1.nrows() == 0 {
        return Ok(IcpRegistration::empty());
    }
    let source: Vec<Zxy> = zxy_rows(zxy0)?.into_iter().map(sentinel).collect();
    let target: Vec<Zxy> = zxy_rows(zxy1)?.into_iter().map(sentinel).collect();
    let index = PointIndex::new(&target);
    if index.is_empty() {
        return Ok(IcpRegistration::empty());
    }
    let max_dist = params.max_correspondence_distance;

    let mut transform = Isometry3::identity();
    let mut corr = find_correspondences(&source, &index, &transform, max_dist);
    let mut iterations = 0;
    while iterations < params.max_iterations {
        let from: Vec<Point3<f64>> = corr
            .pairs
            .iter()
            .map(|&(i, _, _)| transform.transform_point(&to_point(&source[i])))
            .collect();
        let to: Vec<Point3<f64>> = corr.pairs.iter().map(|&(_, j, _)| to_point(&target[j])).collect();
        let Some(step) = estimate_rigid_transform(&from, &to) else {
            break;
        };
        transform = step * transform;
        iterations += 1;

        let next = find_correspondences(&source, &index, &transform, max_dist);
        let converged = (next.fitness - corr.fitness).abs() < params.relative_fitness
            && (next.inlier_rmse - corr.inlier_rmse).abs() < params.relative_rmse;
        corr = next;
        if converged {
            break;
        }
    }
    debug!(
        iterations,
        fitness = corr.fitness,
        inlier_rmse = corr.inlier_rmse,
        "icp registration finished"
    );

    let matches: Vec<(usize, usize)> = corr.pairs.iter().map(|&(i, j, _)| (i, j)).collect();
    let confidences = matches
        .iter()
        .map(|&(i, j)| {
            let d = (to_point(&source[i]) - to_point(&target[j])).norm();
            distance_to_confidence(d, gamma)
        })
        .collect();
    Ok(IcpRegistration {
        result: MatchResult {
            raw_matches: matches.clone(),
            matches,
            confidences,
        },
        transform,
        fitness: corr.fitness,
        inlier_rmse: corr.inlier_rmse,
        iterations,
    })
}

/// [`icp_register`] without the registration details.
pub fn icp_matches(
    zxy0: ArrayView2<f64>,
    zxy1: ArrayView2<f64>,
    params: &IcpParams,
    gamma: f64,
) -> Result<MatchResult, MatchError> {
    Ok(icp_register(zxy0, zxy1, params, gamma)?.result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};
    use nearly_eq::assert_nearly_eq;

    fn cloud() -> Array2<f64> {
        array![
            [0.0, 0.0, 0.0],
            [10.0, 0.0, 0.0],
            [0.0, 12.0, 0.0],
            [0.0, 0.0, 15.0],
            [11.0, 9.0, 3.0],
            [-8.0, 4.0, 10.0],
        ]
    }

    fn moved(points: &Array2<f64>, transform: &Isometry3<f64>) -> Array2<f64> {
        let mut out = points.clone();
        for mut row in out.outer_iter_mut() {
            let p = transform.transform_point(&Point3::new(row[0], row[1], row[2]));
            row[0] = p.x;
            row[1] = p.y;
            row[2] = p.z;
        }
        out
    }

    #[test]
    fn test_recovers_small_rigid_motion() {
        let truth = Isometry3::new(Vector3::new(0.5, -0.3, 0.2), Vector3::new(0.0, 0.0, 0.05));
        let zxy0 = cloud();
        let zxy1 = moved(&zxy0, &truth);

        let reg = icp_register(zxy0.view(), zxy1.view(), &IcpParams::default(), 1.0).unwrap();
        let n = zxy0.nrows();
        assert_eq!(reg.result.matches, (0..n).map(|i| (i, i)).collect::<Vec<_>>());
        assert_nearly_eq!(reg.fitness, 1.0, 1e-12);
        assert!(reg.inlier_rmse < 1e-6);
        for (p0, p1) in zxy0.outer_iter().zip(zxy1.outer_iter()) {
            let p = reg.transform.transform_point(&Point3::new(p0[0], p0[1], p0[2]));
            assert_nearly_eq!(p.x, p1[0], 1e-6);
            assert_nearly_eq!(p.y, p1[1], 1e-6);
            assert_nearly_eq!(p.z, p1[2], 1e-6);
        }
    }

    #[test]
    fn test_confidence_uses_original_coordinates() {
        let truth = Isometry3::translation(1.0, 0.0, 0.0);
        let zxy0 = cloud();
        let zxy1 = moved(&zxy0, &truth);
        let result = icp_matches(zxy0.view(), zxy1.view(), &IcpParams::default(), 1.0).unwrap();
        // registration is exact, but the points are still one unit apart
        for &c in &result.confidences {
            assert_nearly_eq!(c, (-1.0_f64).exp(), 1e-9);
        }
    }

    #[test]
    fn test_far_points_stay_unmatched() {
        let mut zxy0 = cloud();
        zxy0[[5, 0]] = 500.0;
        let zxy1 = cloud();
        let reg = icp_register(zxy0.view(), zxy1.view(), &IcpParams::default(), 1.0).unwrap();
        assert_eq!(reg.result.len(), 5);
        assert!(reg.result.matches.iter().all(|&(i, _)| i != 5));
        assert_nearly_eq!(reg.fitness, 5.0 / 6.0, 1e-12);
    }

    #[test]
    fn test_too_few_points_keep_identity() {
        let zxy0 = array![[0.0, 0.0, 0.0], [0.0, 0.0, 10.0]];
        let zxy1 = array![[0.0, 1.0, 0.0], [0.0, 1.0, 10.0]];
        let reg = icp_register(zxy0.view(), zxy1.view(), &IcpParams::default(), 1.0).unwrap();
        assert_eq!(reg.iterations, 0);
        assert_eq!(reg.transform, Isometry3::identity());
        assert_eq!(reg.result.matches, vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn test_empty_input_is_not_an_error() {
        let empty = Array2::<f64>::zeros((0, 3));
        let zxy = cloud();
        let result = icp_matches(empty.view(), zxy.view(), &IcpParams::default(), 1.0).unwrap();
        assert!(result.is_empty());
        assert!(result.raw_matches.is_empty());
        let result = icp_matches(zxy.view(), empty.view(), &IcpParams::default(), 1.0).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_registers_a_single_z_slice() {
        // 40 neurons at z = 0 on an 8 by 5 grid
        let grid = |dx: f64| {
            Array2::from_shape_fn((40, 3), |(i, c)| match c {
                0 => 0.0,
                1 => 10.0 * (i % 8) as f64 + dx,
                _ => 10.0 * (i / 8) as f64,
            })
        };
        let (zxy0, zxy1) = (grid(0.0), grid(0.5));
        let reg = icp_register(zxy0.view(), zxy1.view(), &IcpParams::default(), 1.0).unwrap();
        assert_eq!(reg.result.matches, (0..40).map(|i| (i, i)).collect::<Vec<_>>());
        assert_nearly_eq!(reg.fitness, 1.0, 1e-12);
        assert!(reg.inlier_rmse < 1e-6);
    }

    #[test]
    fn test_estimate_rigid_transform_rejects_reflection() {
        let from = [
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(1.0, 1.0, 1.0),
        ];
        let mirrored: Vec<Point3<f64>> = from.iter().map(|p| Point3::new(-p.x, p.y, p.z)).collect();
        let t = estimate_rigid_transform(&from, &mirrored).unwrap();
        assert_nearly_eq!(t.rotation.to_rotation_matrix().matrix().determinant(), 1.0, 1e-9);
    }
}
