use nalgebra::DMatrix;
use pathfinding::kuhn_munkres::kuhn_munkres_min;
use pathfinding::matrix::Matrix;

const F64_I64_MULT: f64 = 1_000_000.0;

/// Cost used for NaN, infinite and oversized entries. Such pairs are only chosen when no
/// other complete assignment exists.
///
pub const UNMATCHABLE_COST: f64 = 1_000_000.0;

/// Solution of a (rectangular) linear sum assignment problem.
///
/// `rows[k]` is assigned to `cols[k]`; rows are sorted ascending. `costs[k]` keeps the
/// original (unclamped) cost of the pair.
///
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignment {
    pub rows: Vec<usize>,
    pub cols: Vec<usize>,
    pub costs: Vec<f64>,
}

impl Assignment {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.rows.iter().copied().zip(self.cols.iter().copied())
    }

    pub fn total_cost(&self) -> f64 {
        self.costs.iter().sum()
    }

    /// Column assigned to `row`, if any
    pub fn col_of(&self, row: usize) -> Option<usize> {
        self.rows
            .iter()
            .position(|r| *r == row)
            .map(|pos| self.cols[pos])
    }
}

fn scaled(cost: f64) -> i64 {
    let cost = if cost.is_finite() {
        cost.clamp(-UNMATCHABLE_COST, UNMATCHABLE_COST)
    } else {
        UNMATCHABLE_COST
    };
    (cost * F64_I64_MULT).round() as i64
}

/// Minimal-cost assignment of `min(rows, cols)` pairs.
///
/// Every row is assigned when `rows <= cols`, every column otherwise. Costs are scaled to
/// integers before solving with the Kuhn-Munkres algorithm, so differences below `1e-6`
/// are not distinguished.
///
pub fn linear_sum_assignment(costs: &DMatrix<f64>) -> Assignment {
    let (nrows, ncols) = costs.shape();
    if nrows == 0 || ncols == 0 {
        return Assignment::default();
    }

    let transposed = nrows > ncols;
    let (r, c) = if transposed {
        (ncols, nrows)
    } else {
        (nrows, ncols)
    };

    let mut weights = Matrix::new(r, c, 0i64);
    for i in 0..r {
        for j in 0..c {
            let cost = if transposed {
                costs[(j, i)]
            } else {
                costs[(i, j)]
            };
            weights[(i, j)] = scaled(cost);
        }
    }

    let (_, solution) = kuhn_munkres_min(&weights);

    let mut pairs = solution
        .into_iter()
        .enumerate()
        .map(|(i, j)| if transposed { (j, i) } else { (i, j) })
        .collect::<Vec<_>>();
    pairs.sort_unstable();

    let mut assignment = Assignment::default();
    for (row, col) in pairs {
        assignment.rows.push(row);
        assignment.cols.push(col);
        assignment.costs.push(costs[(row, col)]);
    }
    assignment
}

/// Optimal assignment with pairs costing more than `threshold` (or non-finite) removed
///
pub fn linear_sum_assignment_with_threshold(costs: &DMatrix<f64>, threshold: f64) -> Assignment {
    let full = linear_sum_assignment(costs);
    let mut assignment = Assignment::default();
    for ((row, col), cost) in full.pairs().zip(full.costs.iter().copied()) {
        if cost.is_finite() && cost <= threshold {
            assignment.rows.push(row);
            assignment.cols.push(col);
            assignment.costs.push(cost);
        }
    }
    assignment
}

#[cfg(test)]
mod tests {
    use crate::utils::linear_sum_assignment::{
        linear_sum_assignment, linear_sum_assignment_with_threshold,
    };
    use crate::EPS;
    use itertools::Itertools;
    use nalgebra::DMatrix;

    fn brute_force(costs: &DMatrix<f64>) -> f64 {
        let (r, c) = costs.shape();
        if r <= c {
            (0..c)
                .permutations(r)
                .map(|perm| perm.iter().enumerate().map(|(i, j)| costs[(i, *j)]).sum::<f64>())
                .fold(f64::INFINITY, f64::min)
        } else {
            brute_force(&costs.transpose())
        }
    }

    #[test]
    fn square() {
        let m = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 3.0, 2.0, 0.0, 5.0, 3.0, 2.0, 2.0]);
        let a = linear_sum_assignment(&m);
        assert_eq!(a.rows, vec![0, 1, 2]);
        assert_eq!(a.cols, vec![1, 0, 2]);
        assert!((a.total_cost() - 5.0).abs() < EPS);
    }

    #[test]
    fn rectangular_both_ways() {
        let m = DMatrix::from_row_slice(
            2,
            4,
            &[7.0, 3.5, 9.0, 0.25, 1.0, 8.0, 0.5, 0.75],
        );
        let a = linear_sum_assignment(&m);
        assert_eq!(a.len(), 2);
        assert!((a.total_cost() - brute_force(&m)).abs() < EPS);
        assert_eq!(a.col_of(0), Some(3));
        assert_eq!(a.col_of(1), Some(2));

        let t = m.transpose();
        let a = linear_sum_assignment(&t);
        assert_eq!(a.len(), 2);
        assert_eq!(a.rows, vec![2, 3]);
        assert_eq!(a.cols, vec![1, 0]);
        assert!((a.total_cost() - brute_force(&t)).abs() < EPS);
    }

    #[test]
    fn optimal_on_small_matrices() {
        let values = [
            0.3, 2.7, 1.1, 9.0, 4.4, 0.2, 3.3, 7.5, 5.5, 6.1, 0.9, 2.2, 8.8, 1.7, 4.0, 3.9, 2.5,
            6.6, 0.1, 5.0,
        ];
        for (r, c) in [(4, 5), (5, 4), (2, 10), (10, 2), (4, 4)] {
            let m = DMatrix::from_row_slice(r, c, &values[..r * c]);
            let a = linear_sum_assignment(&m);
            assert_eq!(a.len(), r.min(c));
            assert!(a.rows.iter().all_unique());
            assert!(a.cols.iter().all_unique());
            assert!((a.total_cost() - brute_force(&m)).abs() < EPS);
        }
    }

    #[test]
    fn empty_dimensions() {
        assert!(linear_sum_assignment(&DMatrix::zeros(0, 4)).is_empty());
        assert!(linear_sum_assignment(&DMatrix::zeros(3, 0)).is_empty());
    }

    #[test]
    fn non_finite_costs() {
        let m = DMatrix::from_row_slice(
            2,
            3,
            &[f64::NAN, 1.0, f64::INFINITY, 2.0, f64::NAN, f64::NAN],
        );
        let a = linear_sum_assignment(&m);
        assert_eq!(a.cols, vec![1, 0]);
        assert!((a.total_cost() - 3.0).abs() < EPS);

        let m = DMatrix::from_element(2, 2, f64::NAN);
        let a = linear_sum_assignment(&m);
        assert_eq!(a.len(), 2);
        assert!(linear_sum_assignment_with_threshold(&m, 10.0).is_empty());
    }

    #[test]
    fn threshold() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 50.0, 50.0, 20.0]);
        let a = linear_sum_assignment_with_threshold(&m, 10.0);
        assert_eq!(a.rows, vec![0]);
        assert_eq!(a.cols, vec![0]);
    }
}
