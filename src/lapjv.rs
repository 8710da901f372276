use nalgebra::DMatrix;

use crate::error::MatchError;

/* -----------------------------------------------------------------------------
 * lapjv.rs - Jonker-Volgenant linear assignment on dense square matrices
 * ----------------------------------------------------------------------------- */

const LARGE: f64 = 1e9;

/// Working state of one dense LAPJV solve.
///
/// `x[i]` is the column assigned to row `i`, `y[j]` the row assigned to
/// column `j`, `-1` while unassigned. `v` holds the column potentials.
struct DenseSolver<'a> {
    n: usize,
    cost: &'a DMatrix<f64>,
    x: Vec<isize>,
    y: Vec<isize>,
    v: Vec<f64>,
    free_rows: Vec<usize>,
}

impl<'a> DenseSolver<'a> {
    fn new(cost: &'a DMatrix<f64>) -> Self {
        let n = cost.nrows();
        Self {
            n,
            cost,
            x: vec![-1; n],
            y: vec![0; n],
            v: vec![LARGE; n],
            free_rows: vec![0; n],
        }
    }

    #[inline]
    fn c(&self, i: usize, j: usize) -> f64 {
        self.cost[(i, j)]
    }

    /// Column reduction and reduction transfer. Returns the number of free
    /// rows left over.
    fn column_reduction(&mut self) -> usize {
        let n = self.n;
        for i in 0..n {
            for j in 0..n {
                let c = self.c(i, j);
                if c < self.v[j] {
                    self.v[j] = c;
                    self.y[j] = i as isize;
                }
            }
        }

        let mut unique = vec![true; n];
        for j in (0..n).rev() {
            let i = self.y[j] as usize;
            if self.x[i] < 0 {
                self.x[i] = j as isize;
            } else {
                unique[i] = false;
                self.y[j] = -1;
            }
        }

        let mut n_free = 0;
        for i in 0..n {
            if self.x[i] < 0 {
                self.free_rows[n_free] = i;
                n_free += 1;
            } else if unique[i] {
                let j = self.x[i] as usize;
                let min = (0..n)
                    .filter(|&j2| j2 != j)
                    .map(|j2| self.c(i, j2) - self.v[j2])
                    .fold(LARGE, f64::min);
                self.v[j] -= min;
            }
        }
        n_free
    }

    /// Augmenting row reduction over the current free rows.
    fn augmenting_row_reduction(&mut self, n_free: usize) -> usize {
        let n = self.n;
        let mut current = 0;
        let mut new_free = 0;
        let mut rr_cnt = 0;

        while current < n_free {
            rr_cnt += 1;
            let free_i = self.free_rows[current];
            current += 1;

            let mut j1: isize = 0;
            let mut j2: isize = -1;
            let mut u1 = self.c(free_i, 0) - self.v[0];
            let mut u2 = LARGE;
            for j in 1..n {
                let h = self.c(free_i, j) - self.v[j];
                if h < u2 {
                    if h >= u1 {
                        u2 = h;
                        j2 = j as isize;
                    } else {
                        u2 = u1;
                        u1 = h;
                        j2 = j1;
                        j1 = j as isize;
                    }
                }
            }

            let mut i0 = self.y[j1 as usize];
            let v1_new = self.v[j1 as usize] - (u2 - u1);
            let v1_lowers = v1_new < self.v[j1 as usize];

            if rr_cnt < current * n {
                if v1_lowers {
                    self.v[j1 as usize] = v1_new;
                } else if i0 >= 0 && j2 >= 0 {
                    j1 = j2;
                    i0 = self.y[j2 as usize];
                }
                if i0 >= 0 {
                    if v1_lowers {
                        current -= 1;
                        self.free_rows[current] = i0 as usize;
                    } else {
                        self.free_rows[new_free] = i0 as usize;
                        new_free += 1;
                    }
                }
            } else if i0 >= 0 {
                self.free_rows[new_free] = i0 as usize;
                new_free += 1;
            }
            self.x[free_i] = j1;
            self.y[j1 as usize] = free_i as isize;
        }
        new_free
    }

    /// Moves every column of minimal reduced cost to the front of `cols`
    /// starting at `lo`. Returns the end of that block.
    fn find_minimal_columns(&self, lo: usize, d: &[f64], cols: &mut [usize]) -> usize {
        let mut hi = lo + 1;
        let mut mind = d[cols[lo]];
        for k in hi..self.n {
            let j = cols[k];
            if d[j] <= mind {
                if d[j] < mind {
                    hi = lo;
                    mind = d[j];
                }
                cols[k] = cols[hi];
                cols[hi] = j;
                hi += 1;
            }
        }
        hi
    }

    fn scan(
        &self,
        lo: &mut usize,
        hi: &mut usize,
        d: &mut [f64],
        cols: &mut [usize],
        pred: &mut [usize],
    ) -> Option<usize> {
        let mut l = *lo;
        let mut h = *hi;
        while l != h {
            let j = cols[l];
            l += 1;
            let i = self.y[j] as usize;
            let mind = d[j];
            let shift = self.c(i, j) - self.v[j] - mind;
            for k in h..self.n {
                let jk = cols[k];
                let reduced = self.c(i, jk) - self.v[jk] - shift;
                if reduced < d[jk] {
                    d[jk] = reduced;
                    pred[jk] = i;
                    if reduced == mind {
                        if self.y[jk] < 0 {
                            return Some(jk);
                        }
                        cols[k] = cols[h];
                        cols[h] = jk;
                        h += 1;
                    }
                }
            }
        }
        *lo = l;
        *hi = h;
        None
    }

    /// Dijkstra-like shortest augmenting path from `start_i`.
    fn find_path(&mut self, start_i: usize, pred: &mut [usize]) -> usize {
        let n = self.n;
        let mut lo = 0;
        let mut hi = 0;
        let mut n_ready = 0;
        let mut cols: Vec<usize> = (0..n).collect();
        let mut d: Vec<f64> = (0..n).map(|j| self.c(start_i, j) - self.v[j]).collect();
        pred.iter_mut().for_each(|p| *p = start_i);

        let final_j = loop {
            if lo == hi {
                n_ready = lo;
                hi = self.find_minimal_columns(lo, &d, &mut cols);
                if let Some(j) = cols[lo..hi].iter().rev().copied().find(|&j| self.y[j] < 0) {
                    break j;
                }
            }
            if let Some(j) = self.scan(&mut lo, &mut hi, &mut d, &mut cols, pred) {
                break j;
            }
        };

        let mind = d[cols[lo]];
        for &j in &cols[..n_ready] {
            self.v[j] += d[j] - mind;
        }
        final_j
    }

    fn augment(&mut self, n_free: usize) {
        let mut pred = vec![0; self.n];
        for row in 0..n_free {
            let free_row = self.free_rows[row];
            let mut j = self.find_path(free_row, &mut pred) as isize;
            let mut i = -1isize;
            while i != free_row as isize {
                i = pred[j as usize] as isize;
                self.y[j as usize] = i;
                std::mem::swap(&mut j, &mut self.x[i as usize]);
            }
        }
    }
}

/// Solves the square assignment problem, minimizing total cost.
///
/// Returns `(x, y)`: `x[row] = col` and `y[col] = row`.
pub(crate) fn lapjv(cost: &DMatrix<f64>) -> Result<(Vec<usize>, Vec<usize>), MatchError> {
    let n = cost.nrows();
    if n == 0 {
        return Err(MatchError::Lapjv(format!(
            "cost.nrows() must be greater than 0, but cost.nrows() = {}",
            n
        )));
    }
    if n != cost.ncols() {
        return Err(MatchError::Lapjv(format!(
            "cost matrix must be square, but got {} x {}",
            n,
            cost.ncols()
        )));
    }
    if let Some((idx, _)) = cost.iter().enumerate().find(|(_, c)| !c.is_finite()) {
        // column-major storage
        return Err(MatchError::NonFiniteCost {
            row: idx % n,
            col: idx / n,
        });
    }

    let mut solver = DenseSolver::new(cost);
    let mut n_free = solver.column_reduction();
    let mut pass = 0;
    while n_free > 0 && pass < 2 {
        n_free = solver.augmenting_row_reduction(n_free);
        pass += 1;
    }
    if n_free > 0 {
        solver.augment(n_free);
    }

    let to_index = |v: &[isize], what: &str| -> Result<Vec<usize>, MatchError> {
        v.iter()
            .map(|&k| {
                usize::try_from(k).map_err(|_| {
                    MatchError::Lapjv(format!("{} left unassigned after augmentation", what))
                })
            })
            .collect()
    };
    Ok((to_index(&solver.x, "row")?, to_index(&solver.y, "column")?))
}

/// Rectangular linear sum assignment, minimizing total cost.
///
/// The short side is padded with a constant, which does not change which
/// real pairs are optimal; every row (or column, whichever side is
/// shorter) is assigned. Pairs come back sorted by row.
pub fn linear_sum_assignment(cost: &DMatrix<f64>) -> Result<Vec<(usize, usize)>, MatchError> {
    let (n_rows, n_cols) = cost.shape();
    if n_rows == 0 || n_cols == 0 {
        return Ok(Vec::new());
    }
    let n = n_rows.max(n_cols);
    let square = if n_rows == n_cols {
        cost.clone()
    } else {
        let mut padded = DMatrix::zeros(n, n);
        padded.view_mut((0, 0), (n_rows, n_cols)).copy_from(cost);
        padded
    };

    let (x, _) = lapjv(&square)?;
    Ok(x
        .into_iter()
        .enumerate()
        .filter(|&(i, j)| i < n_rows && j < n_cols)
        .collect())
}

/// Same as [`linear_sum_assignment`], but maximizing total weight.
pub fn linear_sum_assignment_maximize(
    weights: &DMatrix<f64>,
) -> Result<Vec<(usize, usize)>, MatchError> {
    linear_sum_assignment(&weights.map(|w| -w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::{Arbitrary, Gen};
    use rand::{self, Rng};

    fn solve(rows: &[Vec<f64>]) -> (Vec<usize>, Vec<usize>) {
        let n = rows.len();
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        let cost = DMatrix::from_row_slice(n, n, &flat);
        lapjv(&cost).unwrap()
    }

    #[test]
    fn test_lapjv_3x3() {
        let (x, y) = solve(&[
            vec![1.0, 2.0, 3.0],
            vec![4.0, 5.0, 6.0],
            vec![7.0, 8.0, 9.0],
        ]);
        assert_eq!(x, vec![2, 0, 1]);
        assert_eq!(y, vec![1, 2, 0]);
    }

    #[test]
    fn test_lapjv_4x4() {
        let (x, y) = solve(&[
            vec![1., 2., 3., 4.],
            vec![5., 6., 7., 8.],
            vec![9., 10., 11., 12.],
            vec![13., 14., 15., 16.],
        ]);
        assert_eq!(x, vec![3, 0, 1, 2]);
        assert_eq!(y, vec![1, 2, 3, 0]);
    }

    #[test]
    fn test_lapjv_5x5() {
        let (x, y) = solve(&[
            vec![1., 2., 3., 4., 1.],
            vec![5., 6., 7., 8., 2.],
            vec![9., 10., 11., 12., 3.],
            vec![13., 14., 15., 16., 4.],
            vec![17., 18., 19., 20., 5.],
        ]);
        assert_eq!(x, vec![0, 2, 1, 3, 4]);
        assert_eq!(y, vec![0, 2, 1, 3, 4]);
    }

    #[test]
    fn test_lapjv_finds_optimum() {
        // distinct optimum: the anti-diagonal
        let (x, _) = solve(&[
            vec![9.0, 9.0, 1.0],
            vec![9.0, 1.0, 9.0],
            vec![1.0, 9.0, 9.0],
        ]);
        assert_eq!(x, vec![2, 1, 0]);
    }

    #[test]
    fn test_lapjv_rejects_empty_and_nan() {
        assert!(lapjv(&DMatrix::zeros(0, 0)).is_err());
        let cost = DMatrix::from_row_slice(2, 2, &[0.0, f64::NAN, 1.0, 2.0]);
        assert_eq!(
            lapjv(&cost),
            Err(MatchError::NonFiniteCost { row: 0, col: 1 })
        );
    }

    #[test]
    fn test_linear_sum_assignment_rectangular() {
        // 2 rows, 3 columns
        let cost = DMatrix::from_row_slice(2, 3, &[5.0, 1.0, 9.0, 1.0, 8.0, 9.0]);
        assert_eq!(linear_sum_assignment(&cost).unwrap(), vec![(0, 1), (1, 0)]);

        // 3 rows, 2 columns
        let cost = cost.transpose();
        let pairs = linear_sum_assignment(&cost).unwrap();
        assert_eq!(pairs, vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn test_linear_sum_assignment_maximize() {
        let w = DMatrix::from_row_slice(2, 2, &[0.1, 0.9, 0.8, 0.2]);
        assert_eq!(
            linear_sum_assignment_maximize(&w).unwrap(),
            vec![(0, 1), (1, 0)]
        );
    }

    fn brute_force_min(cost: &DMatrix<f64>) -> f64 {
        fn permute(k: usize, perm: &mut Vec<usize>, cost: &DMatrix<f64>, best: &mut f64) {
            let n = perm.len();
            if k == n {
                let total: f64 = (0..n).map(|i| cost[(i, perm[i])]).sum();
                if total < *best {
                    *best = total;
                }
                return;
            }
            for i in k..n {
                perm.swap(k, i);
                permute(k + 1, perm, cost, best);
                perm.swap(k, i);
            }
        }
        let mut perm: Vec<usize> = (0..cost.nrows()).collect();
        let mut best = f64::INFINITY;
        permute(0, &mut perm, cost, &mut best);
        best
    }

    /// Square cost matrix of side 1..=6 with integer costs below 1000.
    #[derive(Debug, Clone)]
    struct SquareCost(DMatrix<f64>);

    impl Arbitrary for SquareCost {
        fn arbitrary(g: &mut Gen) -> Self {
            let n = 1 + usize::arbitrary(g) % 6;
            SquareCost(DMatrix::from_fn(n, n, |_, _| (u16::arbitrary(g) % 1000) as f64))
        }

        fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
            // drop the last row and column
            let n = self.0.nrows();
            if n <= 1 {
                return Box::new(std::iter::empty());
            }
            let smaller = self.0.view((0, 0), (n - 1, n - 1)).into_owned();
            Box::new(std::iter::once(SquareCost(smaller)))
        }
    }

    #[test]
    fn test_quickcheck_lapjv_is_optimal_permutation() {
        fn prop(cost: SquareCost) -> bool {
            let SquareCost(cost) = cost;
            let n = cost.nrows();
            let Ok((x, y)) = lapjv(&cost) else {
                return false;
            };
            let is_perm = (0..n).all(|i| y[x[i]] == i);
            let total: f64 = (0..n).map(|i| cost[(i, x[i])]).sum();
            is_perm && (total - brute_force_min(&cost)).abs() < 1e-9
        }
        quickcheck::quickcheck(prop as fn(SquareCost) -> bool);
    }

    #[test]
    fn test_random_rectangular_assignment_is_injective() {
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let (rows, cols) = (rng.gen_range(1..=8), rng.gen_range(1..=8));
            let cost = DMatrix::from_fn(rows, cols, |_, _| rng.gen_range(0.0..10.0));
            let pairs = linear_sum_assignment(&cost).unwrap();
            assert_eq!(pairs.len(), rows.min(cols));
            let mut used: Vec<usize> = pairs.iter().map(|&(_, j)| j).collect();
            used.sort_unstable();
            used.dedup();
            assert_eq!(used.len(), pairs.len());
        }
    }
}
