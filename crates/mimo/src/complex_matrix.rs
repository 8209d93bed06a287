use num::complex::Complex64;
use std::ops::{Index, IndexMut};

/// A dense complex matrix stored row major.
/// Used for the per subcarrier channel matrices and combining weights.
#[derive(Debug, Clone, PartialEq)]
pub struct ComplexMatrix {
    rows: usize,
    cols: usize,
    data: Vec<Complex64>,
}

impl ComplexMatrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![Complex64::default(); rows*cols],
        }
    }

    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n, n);
        for i in 0..n {
            m[(i,i)] = Complex64::new(1.0, 0.0);
        }
        m
    }

    /// Creates a matrix from row major data.
    pub fn from_row_major(rows: usize, cols: usize, data: Vec<Complex64>) -> Self {
        assert!(data.len() == rows*cols, "Expected {}x{} = {} values but got {}", rows, cols, rows*cols, data.len());
        Self { rows, cols, data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Returns the row major data.
    pub fn as_slice(&self) -> &[Complex64] {
        &self.data
    }

    pub fn row(&self, r: usize) -> &[Complex64] {
        &self.data[r*self.cols..(r+1)*self.cols]
    }

    /// Conjugate transpose.
    pub fn hermitian(&self) -> Self {
        let mut out = Self::zeros(self.cols, self.rows);
        for r in 0..self.rows {
            for c in 0..self.cols {
                out[(c,r)] = self[(r,c)].conj();
            }
        }
        out
    }

    pub fn mul(&self, other: &Self) -> Self {
        assert!(self.cols == other.rows, "Cannot multiply {}x{} with {}x{}", self.rows, self.cols, other.rows, other.cols);
        let mut out = Self::zeros(self.rows, other.cols);
        for r in 0..self.rows {
            for k in 0..self.cols {
                let a = self[(r,k)];
                if a == Complex64::default() {
                    continue;
                }
                for c in 0..other.cols {
                    out[(r,c)] += a * other[(k,c)];
                }
            }
        }
        out
    }

    /// Computes the Gram matrix A^H A without forming the conjugate transpose.
    pub fn gram(&self) -> Self {
        let n = self.cols;
        let mut out = Self::zeros(n, n);
        for i in 0..n {
            for j in i..n {
                let sum: Complex64 = (0..self.rows)
                    .map(|r| self[(r,i)].conj() * self[(r,j)])
                    .sum();
                out[(i,j)] = sum;
                out[(j,i)] = sum.conj();
            }
        }
        out
    }

    pub fn add_to_diagonal(&mut self, value: f64) {
        let n = self.rows.min(self.cols);
        for i in 0..n {
            self[(i,i)] += value;
        }
    }

    /// Sum of the real part of the diagonal.
    pub fn trace_re(&self) -> f64 {
        (0..self.rows.min(self.cols)).map(|i| self[(i,i)].re).sum()
    }

    /// Maximum absolute column sum.
    pub fn norm_1(&self) -> f64 {
        (0..self.cols)
            .map(|c| (0..self.rows).map(|r| self[(r,c)].norm()).sum::<f64>())
            .fold(0.0, f64::max)
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|x| x.re.is_finite() && x.im.is_finite())
    }

    /// Inverts a square matrix using Gauss-Jordan elimination with partial pivoting.
    /// Returns None when a zero or non-finite pivot is encountered.
    pub fn inverse(&self) -> Option<Self> {
        assert!(self.rows == self.cols, "Only square matrices can be inverted but got {}x{}", self.rows, self.cols);
        let n = self.rows;
        let mut a = self.data.clone();
        let mut inv = Self::identity(n).data;

        for col in 0..n {
            let (pivot_row, pivot_magnitude) = (col..n)
                .map(|r| (r, a[r*n+col].norm()))
                .max_by(|(_, x), (_, y)| x.total_cmp(y))?;

            if !pivot_magnitude.is_finite() || pivot_magnitude <= 0.0 {
                return None;
            }

            if pivot_row != col {
                for c in 0..n {
                    a.swap(col*n+c, pivot_row*n+c);
                    inv.swap(col*n+c, pivot_row*n+c);
                }
            }

            let pivot_inverse = a[col*n+col].inv();
            for c in 0..n {
                a[col*n+c] *= pivot_inverse;
                inv[col*n+c] *= pivot_inverse;
            }

            for r in 0..n {
                if r == col {
                    continue;
                }
                let factor = a[r*n+col];
                if factor == Complex64::default() {
                    continue;
                }
                for c in 0..n {
                    let a_pivot = a[col*n+c];
                    let inv_pivot = inv[col*n+c];
                    a[r*n+c] -= factor * a_pivot;
                    inv[r*n+c] -= factor * inv_pivot;
                }
            }
        }

        let inverse = Self { rows: n, cols: n, data: inv };
        if !inverse.is_finite() {
            return None;
        }
        Some(inverse)
    }

    /// Reciprocal condition number in the 1-norm given the matrix inverse.
    /// This is 1 for perfectly conditioned matrices and approaches 0 as the matrix becomes singular.
    pub fn reciprocal_condition(&self, inverse: &Self) -> f64 {
        let product = self.norm_1() * inverse.norm_1();
        if !product.is_finite() || product <= 0.0 {
            return 0.0;
        }
        1.0 / product
    }
}

impl Index<(usize, usize)> for ComplexMatrix {
    type Output = Complex64;
    fn index(&self, (r, c): (usize, usize)) -> &Self::Output {
        assert!(r < self.rows && c < self.cols);
        &self.data[r*self.cols + c]
    }
}

impl IndexMut<(usize, usize)> for ComplexMatrix {
    fn index_mut(&mut self, (r, c): (usize, usize)) -> &mut Self::Output {
        assert!(r < self.rows && c < self.cols);
        &mut self.data[r*self.cols + c]
    }
}
