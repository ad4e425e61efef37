//! Representational similarity analysis.
//!
//! A model's representational dissimilarity matrix (RDM) is compared with a
//! human one over the strict upper triangle only, so the trivially constant
//! diagonal never inflates the correlation.

use crate::choice::dot;
use crate::config::RdmMethod;
use crate::error::{ProbeError, ProbeResult};
use crate::matrix::Matrix;
use serde::{Deserialize, Serialize};

/// Largest asymmetry accepted when building an [`Rdm`] from a square matrix.
const SYMMETRY_TOLERANCE: f64 = 1e-9;

/// Square, symmetric matrix of pairwise (dis)similarities between objects.
#[derive(Debug, Clone, PartialEq)]
pub struct Rdm {
    matrix: Matrix,
}

impl Rdm {
    pub fn new(matrix: Matrix) -> ProbeResult<Self> {
        let (rows, cols) = matrix.shape();
        if rows != cols {
            return Err(ProbeError::shape(format!("RDM must be square, got {rows}x{cols}")));
        }
        if !matrix.is_finite() {
            return Err(ProbeError::invalid_input("RDM contains non-finite values"));
        }
        let scale = matrix.as_slice().iter().fold(1.0f64, |m, v| m.max(v.abs()));
        for i in 0..rows {
            for j in (i + 1)..rows {
                if (matrix.get(i, j) - matrix.get(j, i)).abs() > SYMMETRY_TOLERANCE * scale {
                    return Err(ProbeError::invalid_input(format!(
                        "RDM is not symmetric at ({i}, {j})"
                    )));
                }
            }
        }
        Ok(Self { matrix })
    }

    /// Expand a condensed upper-triangle vector, ordered `(0,1), (0,2), ..., (1,2), ...`,
    /// into a full matrix with a zero diagonal.
    pub fn from_condensed(values: &[f64]) -> ProbeResult<Self> {
        let n = condensed_size(values.len()).ok_or_else(|| {
            ProbeError::shape(format!(
                "{} is not a valid condensed distance vector length",
                values.len()
            ))
        })?;
        let mut matrix = Matrix::zeros(n, n);
        let mut entries = values.iter();
        for i in 0..n {
            for j in (i + 1)..n {
                if let Some(&v) = entries.next() {
                    matrix.set(i, j, v);
                    matrix.set(j, i, v);
                }
            }
        }
        Self::new(matrix)
    }

    /// Element-wise mean of several same-sized matrices, e.g. one per subject.
    pub fn mean(rdms: &[Rdm]) -> ProbeResult<Self> {
        let first = rdms
            .first()
            .ok_or_else(|| ProbeError::invalid_input("cannot average zero RDMs"))?;
        let mut sum = Matrix::zeros(first.size(), first.size());
        for rdm in rdms {
            if rdm.size() != first.size() {
                return Err(ProbeError::shape(format!(
                    "cannot average RDMs of size {} and {}",
                    first.size(),
                    rdm.size()
                )));
            }
            for (acc, v) in sum.as_mut_slice().iter_mut().zip(rdm.matrix.as_slice()) {
                *acc += v;
            }
        }
        let n = rdms.len() as f64;
        sum.as_mut_slice().iter_mut().for_each(|v| *v /= n);
        Ok(Self { matrix: sum })
    }

    /// Number of objects.
    pub fn size(&self) -> usize {
        self.matrix.rows()
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.matrix.get(i, j)
    }

    pub fn as_matrix(&self) -> &Matrix {
        &self.matrix
    }

    /// Strict upper triangle, row by row.
    pub fn upper_triangle(&self) -> Vec<f64> {
        let n = self.size();
        let mut out = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for i in 0..n {
            out.extend_from_slice(&self.matrix.row(i)[i + 1..]);
        }
        out
    }
}

/// `n` such that `n * (n - 1) / 2 == len`.
fn condensed_size(len: usize) -> Option<usize> {
    let n = ((1.0 + (1.0 + 8.0 * len as f64).sqrt()) / 2.0).round() as usize;
    (n >= 2 && n * (n - 1) / 2 == len).then_some(n)
}

/// Correlation coefficient used to compare two RDMs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Correlation {
    Spearman,
    Pearson,
}

/// Both coefficients for one model/human comparison.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RsaScores {
    pub spearman: f64,
    pub pearson: f64,
}

/// Subtract each feature's mean over objects.
pub fn center_features(features: &Matrix) -> Matrix {
    let mut centered = features.clone();
    centered.center_columns();
    centered
}

/// Pairwise dissimilarity of object rows.
///
/// `Correlation` is `1 - r` between rows, `Cosine` is `1 - cos`, and
/// `Euclidean` is the L2 distance. Rows with zero variance (or zero norm)
/// are treated as uncorrelated with everything.
pub fn compute_rdm(features: &Matrix, method: RdmMethod) -> ProbeResult<Rdm> {
    if !features.is_finite() {
        return Err(ProbeError::invalid_input("features contain non-finite values"));
    }
    let n = features.rows();
    let mut out = Matrix::zeros(n, n);
    match method {
        RdmMethod::Correlation | RdmMethod::Cosine => {
            let rows: Vec<Vec<f64>> = (0..n)
                .map(|i| {
                    let row = features.row(i);
                    match method {
                        RdmMethod::Correlation => unit(&center(row)),
                        _ => unit(row),
                    }
                })
                .collect();
            for i in 0..n {
                for j in (i + 1)..n {
                    let d = 1.0 - dot(&rows[i], &rows[j]);
                    out.set(i, j, d);
                    out.set(j, i, d);
                }
            }
        }
        RdmMethod::Euclidean => {
            for i in 0..n {
                for j in (i + 1)..n {
                    let d = features
                        .row(i)
                        .iter()
                        .zip(features.row(j))
                        .map(|(a, b)| (a - b).powi(2))
                        .sum::<f64>()
                        .sqrt();
                    out.set(i, j, d);
                    out.set(j, i, d);
                }
            }
        }
    }
    Rdm::new(out)
}

/// Representational similarity matrix: Pearson correlation between the rows
/// of the column-centered features. Compare against human similarity matrices.
pub fn correlation_matrix(features: &Matrix) -> ProbeResult<Rdm> {
    if !features.is_finite() {
        return Err(ProbeError::invalid_input("features contain non-finite values"));
    }
    let centered = center_features(features);
    let n = centered.rows();
    let rows: Vec<Vec<f64>> = (0..n).map(|i| unit(&center(centered.row(i)))).collect();
    let mut out = Matrix::zeros(n, n);
    for i in 0..n {
        out.set(i, i, 1.0);
        for j in (i + 1)..n {
            let s = dot(&rows[i], &rows[j]).clamp(-1.0, 1.0);
            out.set(i, j, s);
            out.set(j, i, s);
        }
    }
    Rdm::new(out)
}

/// Correlate the strict upper triangles of two same-sized matrices.
pub fn correlate_rdms(a: &Rdm, b: &Rdm, correlation: Correlation) -> ProbeResult<f64> {
    if a.size() != b.size() {
        return Err(ProbeError::shape(format!(
            "cannot correlate RDMs of size {} and {}",
            a.size(),
            b.size()
        )));
    }
    if a.size() < 3 {
        return Err(ProbeError::invalid_input(
            "RSA needs at least three objects for two independent entries",
        ));
    }
    let (x, y) = (a.upper_triangle(), b.upper_triangle());
    Ok(match correlation {
        Correlation::Pearson => pearson(&x, &y),
        Correlation::Spearman => spearman(&x, &y),
    })
}

/// Spearman and Pearson correlation between a model and a human matrix.
pub fn rsa(model: &Rdm, human: &Rdm) -> ProbeResult<RsaScores> {
    let scores = RsaScores {
        spearman: correlate_rdms(model, human, Correlation::Spearman)?,
        pearson: correlate_rdms(model, human, Correlation::Pearson)?,
    };
    tracing::debug!(spearman = scores.spearman, pearson = scores.pearson, "rsa");
    Ok(scores)
}

/// Pearson correlation. NaN if either input is constant.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return f64::NAN;
    }
    let mx = x[..n].iter().sum::<f64>() / n as f64;
    let my = y[..n].iter().sum::<f64>() / n as f64;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        let (dx, dy) = (a - mx, b - my);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return f64::NAN;
    }
    (sxy / (sxx.sqrt() * syy.sqrt())).clamp(-1.0, 1.0)
}

/// Spearman rank correlation, with tied values given their average rank.
pub fn spearman(x: &[f64], y: &[f64]) -> f64 {
    pearson(&average_ranks(x), &average_ranks(y))
}

/// 1-based ranks; ties share the mean of the ranks they span.
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // Positions start..end hold ranks start+1..=end.
        let rank = (start + 1 + end) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = rank;
        }
        start = end;
    }
    ranks
}

fn center(row: &[f64]) -> Vec<f64> {
    if row.is_empty() {
        return Vec::new();
    }
    let mean = row.iter().sum::<f64>() / row.len() as f64;
    row.iter().map(|v| v - mean).collect()
}

fn unit(row: &[f64]) -> Vec<f64> {
    let norm = dot(row, row).sqrt();
    if norm == 0.0 {
        return vec![0.0; row.len()];
    }
    row.iter().map(|v| v / norm).collect()
}
