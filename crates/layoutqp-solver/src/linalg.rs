//! Dense row-major linear algebra used by the equation system and the optimizer.
//!
//! Everything here works on small, dense matrices. All zero tests go through
//! [`fuzzy_equals`] with the crate-wide [`EPSILON`].

use std::ops::{Index, IndexMut};

use crate::solution::SolveError;

/// Tolerance for every floating point comparison in the crate
pub const EPSILON: f64 = 1e-6;

pub fn fuzzy_equals(a: f64, b: f64) -> bool {
    (a - b).abs() < EPSILON
}

/// True if every component is within [`EPSILON`] of zero
pub fn is_zero(v: &[f64]) -> bool {
    v.iter().all(|&x| fuzzy_equals(x, 0.0))
}

/// Dense matrix with contiguous row-major storage
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n, n);
        for i in 0..n {
            m[(i, i)] = 1.0;
        }
        m
    }

    /// Build from a slice of equally long rows
    pub fn from_rows(rows: &[Vec<f64>]) -> Self {
        let cols = rows.first().map_or(0, Vec::len);
        let mut m = Self::zeros(rows.len(), cols);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row.len(), cols, "row {} has {} columns, expected {}", i, row.len(), cols);
            m.row_mut(i).copy_from_slice(row);
        }
        m
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [f64] {
        &mut self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn zero(&mut self) {
        self.data.fill(0.0);
    }

    /// Overwrite this matrix with the contents of `other`, adopting its shape
    pub fn copy_from(&mut self, other: &Matrix) {
        self.rows = other.rows;
        self.cols = other.cols;
        self.data.clear();
        self.data.extend_from_slice(&other.data);
    }

    pub fn transpose(&self) -> Matrix {
        let mut t = Matrix::zeros(self.cols, self.rows);
        for i in 0..self.rows {
            for k in 0..self.cols {
                t[(k, i)] = self[(i, k)];
            }
        }
        t
    }

    /// `self * other`
    pub fn multiply(&self, other: &Matrix) -> Matrix {
        assert_eq!(self.cols, other.rows, "shape mismatch in multiply");
        let mut c = Matrix::zeros(self.rows, other.cols);
        for i in 0..self.rows {
            for k in 0..self.cols {
                let a = self[(i, k)];
                if a == 0.0 {
                    continue;
                }
                for j in 0..other.cols {
                    c[(i, j)] += a * other[(k, j)];
                }
            }
        }
        c
    }

    /// `self * v`
    pub fn multiply_vector(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(self.cols, v.len(), "shape mismatch in multiply_vector");
        (0..self.rows)
            .map(|i| self.row(i).iter().zip(v).map(|(a, b)| a * b).sum())
            .collect()
    }

    /// Copy of the columns `start..cols`
    pub fn columns_from(&self, start: usize) -> Matrix {
        let width = self.cols - start;
        let mut m = Matrix::zeros(self.rows, width);
        for i in 0..self.rows {
            m.row_mut(i).copy_from_slice(&self.row(i)[start..]);
        }
        m
    }

    /// Drop every row at or after `rows`
    pub fn truncate_rows(&mut self, rows: usize) {
        if rows < self.rows {
            self.rows = rows;
            self.data.truncate(rows * self.cols);
        }
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    fn index(&self, (i, j): (usize, usize)) -> &f64 {
        &self.data[i * self.cols + j]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut f64 {
        &mut self.data[i * self.cols + j]
    }
}

/// Solve the square system `a x = b` by Gaussian elimination with partial
/// pivoting. Rows are permuted through an index vector, never moved.
pub fn solve(mut a: Matrix, mut b: Vec<f64>) -> Result<Vec<f64>, SolveError> {
    let n = a.rows();
    assert_eq!(a.cols(), n, "solve needs a square matrix");
    assert_eq!(b.len(), n, "right-hand side length mismatch");

    let mut indices: Vec<usize> = (0..n).collect();

    // forward elimination
    for i in 0..n {
        let mut pivot = i;
        let mut pivot_value = a[(indices[i], i)].abs();
        for j in i + 1..n {
            let value = a[(indices[j], i)].abs();
            if value > pivot_value {
                pivot = j;
                pivot_value = value;
            }
        }

        if fuzzy_equals(pivot_value, 0.0) {
            return Err(SolveError::SingularSystem);
        }

        if pivot != i {
            indices.swap(i, pivot);
            b.swap(i, pivot);
        }
        let p = indices[i];

        for j in i + 1..n {
            let row = indices[j];
            let q = -a[(row, i)] / a[(p, i)];
            if q == 0.0 {
                continue;
            }
            a[(row, i)] = 0.0;
            for k in i + 1..n {
                let delta = a[(p, k)] * q;
                a[(row, k)] += delta;
            }
            let delta = b[i] * q;
            b[j] += delta;
        }
    }

    // back substitution
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let row = indices[i];
        let mut sum = b[i];
        for j in i + 1..n {
            sum -= a[(row, j)] * x[j];
        }
        x[i] = sum / a[(row, i)];
    }
    Ok(x)
}

/// Forward elimination that records which rows are linearly independent.
///
/// Destroys `a`. Returns the number of independent rows and a mask over the
/// original row order. A column whose remaining rows are all zero is skipped,
/// so the count is the numerical rank.
pub fn compute_dependencies(a: &mut Matrix) -> (usize, Vec<bool>) {
    let m = a.rows();
    let n = a.cols();

    let mut indices: Vec<usize> = (0..m).collect();
    let mut independent = vec![false; m];

    let mut rank = 0;
    let mut column = 0;
    while rank < m && column < n {
        let mut pivot = rank;
        let mut pivot_value = a[(indices[rank], column)].abs();
        for j in rank + 1..m {
            let value = a[(indices[j], column)].abs();
            if value > pivot_value {
                pivot = j;
                pivot_value = value;
            }
        }

        if fuzzy_equals(pivot_value, 0.0) {
            column += 1;
            continue;
        }

        indices.swap(rank, pivot);
        let p = indices[rank];
        independent[p] = true;

        for j in rank + 1..m {
            let row = indices[j];
            let q = -a[(row, column)] / a[(p, column)];
            a[(row, column)] = 0.0;
            for k in column + 1..n {
                let delta = a[(p, k)] * q;
                a[(row, k)] += delta;
            }
        }

        rank += 1;
        column += 1;
    }

    (rank, independent)
}

/// Compact `a` in place to its independent rows, keeping their relative
/// order. Returns the independence mask over the original rows.
pub fn remove_linearly_dependent_rows(a: &mut Matrix) -> Vec<bool> {
    let mut temp = a.clone();
    let (count, independent) = compute_dependencies(&mut temp);
    if count == a.rows() {
        return independent;
    }

    let mut index = 0;
    for i in 0..a.rows() {
        if !independent[i] {
            continue;
        }
        if index < i {
            let cols = a.cols();
            a.data.copy_within(i * cols..(i + 1) * cols, index * cols);
        }
        index += 1;
    }
    a.truncate_rows(count);
    independent
}

/// Orthogonal factor and the diagonal of `R` from a Householder QR
#[derive(Debug, Clone)]
pub struct QrDecomposition {
    /// Full `m x m` orthogonal factor
    pub q: Matrix,
    /// Diagonal of the upper triangular factor
    pub r_diagonal: Vec<f64>,
}

/// Householder QR of an `m x n` matrix with `m >= n`.
///
/// `Q` is accumulated by right-multiplying each reflector, so its trailing
/// `m - n` columns span the orthogonal complement of the range of `a`.
pub fn qr_decomposition(mut a: Matrix) -> Result<QrDecomposition, SolveError> {
    let m = a.rows();
    let n = a.cols();
    if m < n {
        return Err(SolveError::QrDecomposition);
    }

    let mut q = Matrix::identity(m);
    let mut d = vec![0.0; n];

    for j in 0..n {
        // squared norm of the first column of the (j, j) minor
        let tail: f64 = (j + 1..m).map(|i| a[(i, j)] * a[(i, j)]).sum();
        let norm_sq = tail + a[(j, j)] * a[(j, j)];
        let norm = norm_sq.sqrt();
        if fuzzy_equals(norm, 0.0) {
            return Err(SolveError::QrDecomposition);
        }

        // alpha has the opposite sign of x_1 to avoid cancellation
        let alpha = if a[(j, j)] < 0.0 { norm } else { -norm };
        d[j] = alpha;

        let beta = 1.0 / (alpha * a[(j, j)] - norm_sq);

        // u = x - alpha * e_1, stored in column j
        a[(j, j)] -= alpha;

        for k in j + 1..n {
            let mut sum = 0.0;
            for i in j..m {
                sum += a[(i, j)] * a[(i, k)];
            }
            sum *= beta;
            for i in j..m {
                let delta = a[(i, j)] * sum;
                a[(i, k)] += delta;
            }
        }

        // Q <- Q (I - 2 v v^T), v = u / |u|
        let beta2 = -2.0 / (tail + a[(j, j)] * a[(j, j)]);
        for k in 0..m {
            let mut sum = 0.0;
            for i in j..m {
                sum += q[(k, i)] * a[(i, j)];
            }
            sum *= beta2;
            for i in j..m {
                let delta = sum * a[(i, j)];
                q[(k, i)] += delta;
            }
        }
    }

    Ok(QrDecomposition { q, r_diagonal: d })
}
