//! Permutation-indexed dense linear system used to find a first feasible point.
//!
//! Cells are always addressed as `matrix[row_indices[i]][column_indices[j]]`, so
//! swapping rows or columns only touches the index vectors. The right-hand side
//! is stored by row position and moves with row swaps.

use crate::linalg::{self, Matrix, fuzzy_equals};

#[derive(Debug, Clone)]
pub struct EquationSystem {
    matrix: Matrix,
    b: Vec<f64>,
    row_indices: Vec<usize>,
    column_indices: Vec<usize>,
    rows: usize,
    columns: usize,
}

impl EquationSystem {
    pub fn new(rows: usize, columns: usize) -> Self {
        Self {
            matrix: Matrix::zeros(rows, columns),
            b: vec![0.0; rows],
            row_indices: (0..rows).collect(),
            column_indices: (0..columns).collect(),
            rows,
            columns,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Shrink the active row count; rows at or after `rows` are ignored
    pub fn set_rows(&mut self, rows: usize) {
        self.rows = rows.min(self.row_indices.len());
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn a(&self, row: usize, column: usize) -> f64 {
        self.matrix[(self.row_indices[row], self.column_indices[column])]
    }

    pub fn set_a(&mut self, row: usize, column: usize, value: f64) {
        let cell = (self.row_indices[row], self.column_indices[column]);
        self.matrix[cell] = value;
    }

    pub fn b(&self, row: usize) -> f64 {
        self.b[row]
    }

    pub fn set_b(&mut self, row: usize, value: f64) {
        self.b[row] = value;
    }

    pub fn swap_row(&mut self, i: usize, j: usize) {
        self.row_indices.swap(i, j);
        self.b.swap(i, j);
    }

    pub fn swap_column(&mut self, i: usize, j: usize) {
        self.column_indices.swap(i, j);
    }

    /// Reduce to upper triangular form with a unit diagonal.
    ///
    /// Returns false if some row has no usable pivot in any remaining column.
    pub fn gaussian_elimination(&mut self) -> bool {
        for i in 0..self.rows {
            if i >= self.columns {
                return false;
            }

            let mut swap_row = (i..self.rows).find(|&r| !fuzzy_equals(self.a(r, i), 0.0));

            if swap_row.is_none() {
                // nothing below in this column; pull a later column of this row forward
                let swap_column =
                    (i + 1..self.columns).find(|&c| !fuzzy_equals(self.a(i, c), 0.0));
                let Some(swap_column) = swap_column else {
                    return false;
                };
                self.swap_column(i, swap_column);
                swap_row = Some(i);
            }

            if let Some(r) = swap_row {
                if r != i {
                    self.swap_row(i, r);
                }
            }

            self.eliminate_column(i, i + 1, self.rows);
        }
        true
    }

    /// Gaussian elimination followed by upward elimination: reduced row echelon form
    pub fn gauss_jordan(&mut self) -> bool {
        if !self.gaussian_elimination() {
            return false;
        }
        for i in (0..self.rows).rev() {
            self.eliminate_column(i, 0, i);
        }
        true
    }

    /// Drop rows that are linear combinations of others, keeping the
    /// independent rows in their current relative order
    pub fn remove_linearly_dependent_rows(&mut self) {
        let mut temp = Matrix::zeros(self.rows, self.columns);
        for r in 0..self.rows {
            for c in 0..self.columns {
                temp[(r, c)] = self.a(r, c);
            }
        }

        let (count, independent) = linalg::compute_dependencies(&mut temp);
        if count == self.rows {
            return;
        }

        let (kept, dropped): (Vec<usize>, Vec<usize>) =
            (0..self.rows).partition(|&r| independent[r]);
        let order: Vec<usize> = kept.into_iter().chain(dropped).collect();
        let row_indices: Vec<usize> = order.iter().map(|&r| self.row_indices[r]).collect();
        let b: Vec<f64> = order.iter().map(|&r| self.b[r]).collect();
        self.row_indices[..self.rows].copy_from_slice(&row_indices);
        self.b[..self.rows].copy_from_slice(&b);
        self.rows = count;
    }

    /// Move columns with no nonzero coefficient in any row to the end and
    /// shrink the column count past them
    pub fn remove_unused_variables(&mut self) {
        let mut c = 0;
        while c < self.columns {
            let used = (0..self.rows).any(|r| !fuzzy_equals(self.a(r, c), 0.0));
            if used {
                c += 1;
                continue;
            }
            self.swap_column(c, self.columns - 1);
            self.columns -= 1;
        }
    }

    /// Write the basic solution into `results`, indexed by original column.
    ///
    /// The column at position `i < rows` is the pivot of row `i` and takes
    /// `b[i]`; every other column is free and left at zero.
    pub fn results(&self, results: &mut [f64]) {
        results.fill(0.0);
        for i in 0..self.rows.min(self.columns) {
            let index = self.column_indices[i];
            if index < results.len() {
                results[index] = self.b[i];
            }
        }
    }

    /// Normalize the pivot row `column` and eliminate its column from the rows
    /// in `start_row..end_row`
    fn eliminate_column(&mut self, column: usize, start_row: usize, end_row: usize) {
        let pivot_row = self.row_indices[column];
        let value = self.a(column, column);
        if value != 1.0 {
            for j in column..self.columns {
                let cell = (pivot_row, self.column_indices[j]);
                self.matrix[cell] /= value;
            }
            self.b[column] /= value;
        }

        for r in start_row..end_row {
            if r == column {
                continue;
            }
            let q = -self.a(r, column);
            // the system is typically sparse
            if fuzzy_equals(q, 0.0) {
                continue;
            }
            let row = self.row_indices[r];
            for c in column..self.columns {
                let col = self.column_indices[c];
                let delta = self.matrix[(pivot_row, col)] * q;
                self.matrix[(row, col)] += delta;
            }
            let delta = self.b[column] * q;
            self.b[r] += delta;
        }
    }
}

impl std::fmt::Display for EquationSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for r in 0..self.rows {
            for c in 0..self.columns {
                write!(f, "{:.1} ", self.a(r, c))?;
            }
            writeln!(f, "= {:.1}", self.b[r])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system(rows: &[(&[f64], f64)], columns: usize) -> EquationSystem {
        let mut es = EquationSystem::new(rows.len(), columns);
        for (r, (coefficients, rhs)) in rows.iter().enumerate() {
            for (c, &value) in coefficients.iter().enumerate() {
                es.set_a(r, c, value);
            }
            es.set_b(r, *rhs);
        }
        es
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
    }

    #[test]
    fn test_gauss_jordan_unique_solution() {
        // x + y = 3, x - y = 1
        let mut es = system(&[(&[1.0, 1.0], 3.0), (&[1.0, -1.0], 1.0)], 2);
        assert!(es.gauss_jordan());
        let mut x = [0.0; 2];
        es.results(&mut x);
        assert_close(x[0], 2.0);
        assert_close(x[1], 1.0);
    }

    #[test]
    fn test_gaussian_elimination_swaps_rows() {
        // leading zero in row 0 forces a row swap
        let mut es = system(&[(&[0.0, 2.0], 4.0), (&[3.0, 0.0], 6.0)], 2);
        assert!(es.gauss_jordan());
        let mut x = [0.0; 2];
        es.results(&mut x);
        assert_close(x[0], 2.0);
        assert_close(x[1], 2.0);
    }

    #[test]
    fn test_gaussian_elimination_swaps_columns() {
        // column 0 is empty, so row 0 pivots on column 1 and column 0 stays free
        let mut es = system(&[(&[0.0, 1.0, 0.0], 5.0), (&[0.0, 0.0, 2.0], 8.0)], 3);
        assert!(es.gauss_jordan());
        let mut x = [9.0; 3];
        es.results(&mut x);
        assert_close(x[0], 0.0);
        assert_close(x[1], 5.0);
        assert_close(x[2], 4.0);
    }

    #[test]
    fn test_gaussian_elimination_fails_on_zero_row() {
        let mut es = system(&[(&[1.0, 0.0], 1.0), (&[0.0, 0.0], 1.0)], 2);
        assert!(!es.gaussian_elimination());
    }

    #[test]
    fn test_remove_linearly_dependent_rows() {
        let mut es = system(
            &[(&[1.0, 1.0], 2.0), (&[2.0, 2.0], 4.0), (&[1.0, -1.0], 0.0)],
            2,
        );
        es.remove_linearly_dependent_rows();
        assert_eq!(es.rows(), 2);
        assert!(es.gauss_jordan());
        let mut x = [0.0; 2];
        es.results(&mut x);
        assert_close(x[0], 1.0);
        assert_close(x[1], 1.0);
    }

    #[test]
    fn test_remove_unused_variables() {
        // columns 1 and 3 never appear
        let mut es = system(&[(&[1.0, 0.0, 1.0, 0.0], 4.0), (&[0.0, 0.0, 1.0, 0.0], 1.0)], 4);
        es.remove_unused_variables();
        assert_eq!(es.columns(), 2);
        assert!(es.gauss_jordan());
        let mut x = [0.0; 4];
        es.results(&mut x);
        assert_close(x[0], 3.0);
        assert_close(x[1], 0.0);
        assert_close(x[2], 1.0);
        assert_close(x[3], 0.0);
    }

    #[test]
    fn test_slack_columns_stay_at_zero() {
        // x1 + s1 = 108, x2 - s2 = 113
        let mut es = system(
            &[(&[1.0, 0.0, 1.0, 0.0], 108.0), (&[0.0, 1.0, 0.0, -1.0], 113.0)],
            4,
        );
        es.remove_linearly_dependent_rows();
        es.remove_unused_variables();
        assert!(es.gauss_jordan());
        let mut x = [f64::NAN; 4];
        es.results(&mut x);
        assert_eq!(x, [108.0, 113.0, 0.0, 0.0]);
    }

    #[test]
    fn test_set_rows_ignores_trailing_rows() {
        let mut es = system(&[(&[1.0], 2.0), (&[0.0], 0.0)], 1);
        es.set_rows(1);
        assert!(es.gauss_jordan());
        let mut x = [0.0];
        es.results(&mut x);
        assert_close(x[0], 2.0);
    }
}
