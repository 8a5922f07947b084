//! Dense row-major matrices, just enough for small OLS problems.

use crate::error::HedonicError;

const PIVOT_EPSILON: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self { rows, cols, data: vec![0.0; rows * cols] }
    }

    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n, n);
        for i in 0..n {
            m.set(i, i, 1.0);
        }
        m
    }

    /// Build from equal-length rows
    pub fn from_rows(rows: &[Vec<f64>]) -> Self {
        let cols = rows.first().map_or(0, Vec::len);
        debug_assert!(rows.iter().all(|r| r.len() == cols));
        Self { rows: rows.len(), cols, data: rows.iter().flatten().copied().collect() }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.cols + col] = value;
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn column(&self, col: usize) -> Vec<f64> {
        (0..self.rows).map(|r| self.get(r, col)).collect()
    }

    pub fn transpose(&self) -> Matrix {
        let mut t = Matrix::zeros(self.cols, self.rows);
        for r in 0..self.rows {
            for c in 0..self.cols {
                t.set(c, r, self.get(r, c));
            }
        }
        t
    }

    pub fn mul(&self, other: &Matrix) -> Matrix {
        assert_eq!(self.cols, other.rows, "matrix dimensions do not agree");
        let mut out = Matrix::zeros(self.rows, other.cols);
        for r in 0..self.rows {
            for k in 0..self.cols {
                let a = self.get(r, k);
                if a == 0.0 {
                    continue;
                }
                for c in 0..other.cols {
                    out.data[r * other.cols + c] += a * other.get(k, c);
                }
            }
        }
        out
    }

    pub fn mul_vec(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(self.cols, v.len(), "matrix and vector dimensions do not agree");
        (0..self.rows).map(|r| dot(self.row(r), v)).collect()
    }

    /// `XᵀX`
    pub fn gram(&self) -> Matrix {
        self.transpose().mul(self)
    }

    /// Gauss-Jordan inversion with partial pivoting
    pub fn inverse(&self) -> Result<Matrix, HedonicError> {
        if self.rows != self.cols {
            return Err(HedonicError::SingularDesign(format!(
                "cannot invert a {}x{} matrix",
                self.rows, self.cols
            )));
        }
        let n = self.rows;
        let mut a = self.clone();
        let mut inv = Matrix::identity(n);

        for col in 0..n {
            let pivot_row = (col..n)
                .max_by(|&i, &j| a.get(i, col).abs().total_cmp(&a.get(j, col).abs()))
                .unwrap_or(col);
            let pivot = a.get(pivot_row, col);
            if pivot.abs() < PIVOT_EPSILON {
                return Err(HedonicError::SingularDesign(format!(
                    "column {} is linearly dependent on the others",
                    col
                )));
            }
            if pivot_row != col {
                a.swap_rows(pivot_row, col);
                inv.swap_rows(pivot_row, col);
            }

            let scale = 1.0 / a.get(col, col);
            a.scale_row(col, scale);
            inv.scale_row(col, scale);

            for r in 0..n {
                if r == col {
                    continue;
                }
                let factor = a.get(r, col);
                if factor != 0.0 {
                    a.add_row_multiple(r, col, -factor);
                    inv.add_row_multiple(r, col, -factor);
                }
            }
        }
        Ok(inv)
    }

    fn swap_rows(&mut self, i: usize, j: usize) {
        for c in 0..self.cols {
            self.data.swap(i * self.cols + c, j * self.cols + c);
        }
    }

    fn scale_row(&mut self, row: usize, factor: f64) {
        for c in 0..self.cols {
            self.data[row * self.cols + c] *= factor;
        }
    }

    /// `row[target] += factor * row[source]`
    fn add_row_multiple(&mut self, target: usize, source: usize, factor: f64) {
        for c in 0..self.cols {
            let v = self.get(source, c);
            self.data[target * self.cols + c] += factor * v;
        }
    }
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
