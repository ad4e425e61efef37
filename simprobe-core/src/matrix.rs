//! Dense row-major matrices for feature and transform data.

use crate::error::{ProbeError, ProbeResult};
use std::path::Path;

/// Dense `rows x cols` matrix of `f64`, stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> ProbeResult<Self> {
        if data.len() != rows * cols {
            return Err(ProbeError::shape(format!(
                "expected {rows}x{cols} = {} values, got {}",
                rows * cols,
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Build from nested rows, which must all have the same length.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> ProbeResult<Self> {
        let n = rows.len();
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        let mut data = Vec::with_capacity(n * cols);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != cols {
                return Err(ProbeError::shape(format!(
                    "row {i} has {} columns, expected {cols}",
                    row.len()
                )));
            }
            data.extend(row);
        }
        Ok(Self {
            rows: n,
            cols,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [f64] {
        &mut self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.cols + j]
    }

    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self.data[i * self.cols + j] = value;
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// `self @ other`.
    pub fn matmul(&self, other: &Matrix) -> ProbeResult<Matrix> {
        if self.cols != other.rows {
            return Err(ProbeError::shape(format!(
                "cannot multiply {}x{} by {}x{}",
                self.rows, self.cols, other.rows, other.cols
            )));
        }
        let mut out = Matrix::zeros(self.rows, other.cols);
        for i in 0..self.rows {
            let lhs = self.row(i);
            let out_row = out.row_mut(i);
            for (k, &a) in lhs.iter().enumerate() {
                if a == 0.0 {
                    continue;
                }
                for (o, &b) in out_row.iter_mut().zip(other.row(k)) {
                    *o += a * b;
                }
            }
        }
        Ok(out)
    }

    pub fn frobenius_norm_sq(&self) -> f64 {
        self.data.iter().map(|v| v * v).sum()
    }

    /// Mean and population standard deviation over every entry.
    pub fn global_moments(&self) -> (f64, f64) {
        if self.data.is_empty() {
            return (0.0, 0.0);
        }
        let n = self.data.len() as f64;
        let mean = self.data.iter().sum::<f64>() / n;
        let var = self.data.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        (mean, var.sqrt())
    }

    /// Z-score every entry with one global mean and standard deviation.
    ///
    /// A constant matrix is centered but left unscaled.
    pub fn standardize_global(&mut self) -> (f64, f64) {
        let (mean, std) = self.global_moments();
        if std > 0.0 {
            self.data.iter_mut().for_each(|v| *v = (*v - mean) / std);
        } else {
            tracing::warn!("feature matrix has zero variance; centering without scaling");
            self.data.iter_mut().for_each(|v| *v -= mean);
        }
        (mean, std)
    }

    /// Subtract each column's mean.
    pub fn center_columns(&mut self) {
        if self.rows == 0 {
            return;
        }
        let mut means = vec![0.0; self.cols];
        for i in 0..self.rows {
            for (m, v) in means.iter_mut().zip(self.row(i)) {
                *m += v;
            }
        }
        let n = self.rows as f64;
        means.iter_mut().for_each(|m| *m /= n);
        for i in 0..self.rows {
            for (v, m) in self.row_mut(i).iter_mut().zip(&means) {
                *v -= m;
            }
        }
    }

    /// Serialize as a flat little-endian `f64` array, row-major, without a header.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.data.len() * 8);
        for v in &self.data {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes
    }

    pub fn from_le_bytes(rows: usize, cols: usize, bytes: &[u8]) -> ProbeResult<Self> {
        if bytes.len() != rows * cols * 8 {
            return Err(ProbeError::shape(format!(
                "expected {} bytes for a {rows}x{cols} f64 array, got {}",
                rows * cols * 8,
                bytes.len()
            )));
        }
        let data = bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(chunk);
                f64::from_le_bytes(buf)
            })
            .collect();
        Self::new(rows, cols, data)
    }

    pub fn read_flat(path: &Path, rows: usize, cols: usize) -> ProbeResult<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_le_bytes(rows, cols, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matmul() {
        let a = Matrix::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        let b = Matrix::from_rows(vec![vec![5.0], vec![6.0]]).unwrap();
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.shape(), (2, 1));
        assert_eq!(c.as_slice(), &[17.0, 39.0]);
        assert!(b.matmul(&b).is_err());
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let result = Matrix::from_rows(vec![vec![1.0, 2.0], vec![3.0]]);
        assert!(matches!(result, Err(ProbeError::Shape(_))));
    }

    #[test]
    fn test_standardize_global() {
        let mut m = Matrix::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        let (mean, std) = m.standardize_global();
        assert!((mean - 2.5).abs() < 1e-12);
        assert!((std - 1.25f64.sqrt()).abs() < 1e-12);
        let (new_mean, new_std) = m.global_moments();
        assert!(new_mean.abs() < 1e-12);
        assert!((new_std - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_standardize_constant_matrix() {
        let mut m = Matrix::new(2, 2, vec![3.0; 4]).unwrap();
        m.standardize_global();
        assert!(m.as_slice().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_center_columns() {
        let mut m = Matrix::from_rows(vec![vec![1.0, 10.0], vec![3.0, 20.0]]).unwrap();
        m.center_columns();
        assert_eq!(m.as_slice(), &[-1.0, -5.0, 1.0, 5.0]);
    }

    #[test]
    fn test_flat_bytes_layout() {
        let m = Matrix::from_rows(vec![vec![1.5, -2.0], vec![0.25, 8.0]]).unwrap();
        let bytes = m.to_le_bytes();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[8..16], &(-2.0f64).to_le_bytes());
        let back = Matrix::from_le_bytes(2, 2, &bytes).unwrap();
        assert_eq!(back, m);
        assert!(Matrix::from_le_bytes(3, 2, &bytes).is_err());
    }
}
