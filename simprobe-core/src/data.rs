//! File loaders for features, triplets and human similarity matrices.
//!
//! Two formats are accepted: a JSON array of rows, or plain text with one
//! whitespace-separated row per line (blank lines and `#` comments ignored).

use crate::error::{ProbeError, ProbeResult};
use crate::eval::Rdm;
use crate::matrix::Matrix;
use crate::triplets::{Triplet, TripletSet};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::str::FromStr;

/// Parse rows from JSON or whitespace-separated text.
pub fn parse_rows<T>(content: &str) -> ProbeResult<Vec<Vec<T>>>
where
    T: FromStr + DeserializeOwned,
{
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }

    let mut rows = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let row = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|tok| !tok.is_empty())
            .map(|tok| {
                tok.parse::<T>().map_err(|_| {
                    ProbeError::invalid_input(format!(
                        "line {}: cannot parse '{tok}'",
                        lineno + 1
                    ))
                })
            })
            .collect::<ProbeResult<Vec<T>>>()?;
        rows.push(row);
    }
    Ok(rows)
}

/// Load an `n_objects x d` feature matrix. Non-finite values are rejected.
pub fn load_features(path: &Path) -> ProbeResult<Matrix> {
    let content = std::fs::read_to_string(path)?;
    let matrix = Matrix::from_rows(parse_rows::<f64>(&content)?)?;
    if !matrix.is_finite() {
        return Err(ProbeError::invalid_input(format!(
            "{} contains non-finite feature values",
            path.display()
        )));
    }
    tracing::debug!(
        path = %path.display(),
        rows = matrix.rows(),
        cols = matrix.cols(),
        "loaded features"
    );
    Ok(matrix)
}

/// Parse triplets from text content and validate them against the universe.
pub fn parse_triplets(content: &str, n_objects: usize) -> ProbeResult<TripletSet> {
    let rows = parse_rows::<usize>(content)?;
    let triplets = rows
        .into_iter()
        .enumerate()
        .map(|(idx, row)| match row.as_slice() {
            [i, j, k] => Ok(Triplet::new(*i, *j, *k)),
            _ => Err(ProbeError::invalid_input(format!(
                "triplet {idx} has {} entries, expected 3",
                row.len()
            ))),
        })
        .collect::<ProbeResult<Vec<_>>>()?;
    TripletSet::new(n_objects, triplets)
}

pub fn load_triplets(path: &Path, n_objects: usize) -> ProbeResult<TripletSet> {
    let content = std::fs::read_to_string(path)?;
    let set = parse_triplets(&content, n_objects)?;
    tracing::debug!(path = %path.display(), triplets = set.len(), "loaded triplets");
    Ok(set)
}

/// Parse a human RDM: a square matrix, or a condensed upper-triangle vector
/// given as a single text row or a flat JSON array.
pub fn parse_rdm(content: &str) -> ProbeResult<Rdm> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        if let Ok(condensed) = serde_json::from_str::<Vec<f64>>(trimmed) {
            return Rdm::from_condensed(&condensed);
        }
    }
    let mut rows = parse_rows::<f64>(content)?;
    match rows.len() {
        0 => Err(ProbeError::invalid_input("empty RDM")),
        1 => Rdm::from_condensed(&rows.remove(0)),
        _ => Rdm::new(Matrix::from_rows(rows)?),
    }
}

pub fn load_rdm(path: &Path) -> ProbeResult<Rdm> {
    let content = std::fs::read_to_string(path)?;
    let rdm = parse_rdm(&content)?;
    tracing::debug!(path = %path.display(), objects = rdm.size(), "loaded RDM");
    Ok(rdm)
}
