use ndarray::{Array2, ArrayView2};

/// Minimum-cost one-to-one assignment (Kuhn-Munkres with row/column potentials).
pub struct AssignmentSolver;

impl AssignmentSolver {
    /// Solves the rectangular assignment problem over `cost`.
    ///
    /// Returns, for every row, the column it is assigned to. When there are
    /// more rows than columns the surplus rows stay unassigned. Entries are
    /// expected to be finite; callers encode forbidden pairs with a large
    /// sentinel and filter them from the result.
    pub fn solve(cost: ArrayView2<f64>) -> Vec<Option<usize>> {
        let (rows, cols) = cost.dim();
        if rows == 0 || cols == 0 {
            return vec![None; rows];
        }
        if rows <= cols {
            return Self::solve_wide(cost);
        }

        let transposed: Array2<f64> = cost.t().to_owned();
        let by_column = Self::solve_wide(transposed.view());
        let mut by_row = vec![None; rows];
        for (col, row) in by_column.into_iter().enumerate() {
            if let Some(row) = row {
                by_row[row] = Some(col);
            }
        }
        by_row
    }

    /// Sum of the costs of an assignment, for diagnostics and tests.
    pub fn total_cost(cost: ArrayView2<f64>, assignment: &[Option<usize>]) -> f64 {
        assignment
            .iter()
            .enumerate()
            .filter_map(|(row, col)| col.map(|col| cost[[row, col]]))
            .sum()
    }

    // Requires rows <= cols. Indices are 1-based internally, column 0 is the
    // virtual source of each augmenting path.
    fn solve_wide(cost: ArrayView2<f64>) -> Vec<Option<usize>> {
        let (rows, cols) = cost.dim();
        let mut u = vec![0.0_f64; rows + 1];
        let mut v = vec![0.0_f64; cols + 1];
        let mut owner = vec![0_usize; cols + 1];
        let mut way = vec![0_usize; cols + 1];

        for row in 1..=rows {
            owner[0] = row;
            let mut col0 = 0;
            let mut min_slack = vec![f64::INFINITY; cols + 1];
            let mut used = vec![false; cols + 1];

            loop {
                used[col0] = true;
                let row0 = owner[col0];
                let mut delta = f64::INFINITY;
                let mut col1 = 0;

                for col in 1..=cols {
                    if used[col] {
                        continue;
                    }
                    let reduced = cost[[row0 - 1, col - 1]] - u[row0] - v[col];
                    if reduced < min_slack[col] {
                        min_slack[col] = reduced;
                        way[col] = col0;
                    }
                    if min_slack[col] < delta {
                        delta = min_slack[col];
                        col1 = col;
                    }
                }

                for col in 0..=cols {
                    if used[col] {
                        u[owner[col]] += delta;
                        v[col] -= delta;
                    } else {
                        min_slack[col] -= delta;
                    }
                }

                col0 = col1;
                if owner[col0] == 0 {
                    break;
                }
            }

            loop {
                let prev = way[col0];
                owner[col0] = owner[prev];
                col0 = prev;
                if col0 == 0 {
                    break;
                }
            }
        }

        let mut assignment = vec![None; rows];
        for col in 1..=cols {
            if owner[col] != 0 {
                assignment[owner[col] - 1] = Some(col - 1);
            }
        }
        assignment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn square_problem_finds_global_optimum() {
        let cost = array![[4.0, 1.0, 3.0], [2.0, 0.0, 5.0], [3.0, 2.0, 2.0]];
        let assignment = AssignmentSolver::solve(cost.view());
        assert_eq!(assignment, vec![Some(1), Some(0), Some(2)]);
        assert_eq!(AssignmentSolver::total_cost(cost.view(), &assignment), 5.0);
    }

    #[test]
    fn greedy_choice_is_not_taken_when_it_costs_more() {
        // Greedy would give row 0 column 0 (1.0) and force row 1 onto 10.0.
        let cost = array![[1.0, 2.0], [1.5, 10.0]];
        let assignment = AssignmentSolver::solve(cost.view());
        assert_eq!(assignment, vec![Some(1), Some(0)]);
    }

    #[test]
    fn tall_problem_leaves_surplus_rows_unassigned() {
        let cost = array![[5.0], [1.0], [3.0]];
        let assignment = AssignmentSolver::solve(cost.view());
        assert_eq!(assignment, vec![None, Some(0), None]);
    }

    #[test]
    fn empty_problem_is_empty() {
        let cost = Array2::<f64>::zeros((2, 0));
        assert_eq!(AssignmentSolver::solve(cost.view()), vec![None, None]);
    }
}
