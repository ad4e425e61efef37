//! Linear probe: a trainable `d x p` transform over frozen features.

use crate::choice::{ChoiceModel, ChoiceSummary, Similarities, dot, triplet_similarities};
use crate::error::{ProbeError, ProbeResult};
use crate::matrix::Matrix;
use crate::triplets::Triplet;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::sync::Arc;

/// How probe-space similarities are turned into a loss.
///
/// Fixed for the whole run; every fold of a cross-validation uses the same
/// objective.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeObjective {
    pub choice: ChoiceModel,
    /// L2-normalize each embedding row before taking inner products.
    pub normalize_embeddings: bool,
    /// Coefficient of `||W||_F^2` added to the training loss.
    pub lambda: f64,
}

impl Default for ProbeObjective {
    fn default() -> Self {
        Self {
            choice: ChoiceModel::default(),
            normalize_embeddings: false,
            lambda: 0.0,
        }
    }
}

/// Projected embeddings of every object, plus the row norms needed to
/// backpropagate through normalization.
struct Projection {
    embedding: Matrix,
    norms: Option<Vec<f64>>,
}

/// Frozen features and the one trainable transform.
pub struct LinearProbe {
    features: Arc<Matrix>,
    transform: Matrix,
    objective: ProbeObjective,
}

impl LinearProbe {
    /// Initialize the transform with entries drawn from `N(0, init_std^2)`.
    pub fn new<R: Rng + ?Sized>(
        features: Arc<Matrix>,
        transform_dim: usize,
        init_std: f64,
        objective: ProbeObjective,
        rng: &mut R,
    ) -> ProbeResult<Self> {
        if transform_dim == 0 {
            return Err(ProbeError::config("transform_dim must be positive"));
        }
        let normal = Normal::new(0.0, init_std)
            .map_err(|e| ProbeError::config(format!("invalid init_std {init_std}: {e}")))?;
        let d = features.cols();
        let data = (0..d * transform_dim).map(|_| normal.sample(rng)).collect();
        let transform = Matrix::new(d, transform_dim, data)?;
        Self::with_transform(features, transform, objective)
    }

    /// Wrap an existing transform, e.g. one loaded from disk.
    pub fn with_transform(
        features: Arc<Matrix>,
        transform: Matrix,
        objective: ProbeObjective,
    ) -> ProbeResult<Self> {
        if transform.rows() != features.cols() {
            return Err(ProbeError::shape(format!(
                "transform has {} rows but features have {} columns",
                transform.rows(),
                features.cols()
            )));
        }
        Ok(Self {
            features,
            transform,
            objective,
        })
    }

    pub fn transform(&self) -> &Matrix {
        &self.transform
    }

    pub fn transform_mut(&mut self) -> &mut Matrix {
        &mut self.transform
    }

    pub fn into_transform(self) -> Matrix {
        self.transform
    }

    pub fn objective(&self) -> &ProbeObjective {
        &self.objective
    }

    pub fn n_objects(&self) -> usize {
        self.features.rows()
    }

    /// `features @ transform`, computed once per call, with optional row
    /// normalization.
    fn project(&self) -> ProbeResult<Projection> {
        let mut embedding = self.features.matmul(&self.transform)?;
        let norms = if self.objective.normalize_embeddings {
            let mut norms = Vec::with_capacity(embedding.rows());
            for r in 0..embedding.rows() {
                let row = embedding.row_mut(r);
                let norm = dot(row, row).sqrt();
                if norm > 0.0 {
                    row.iter_mut().for_each(|v| *v /= norm);
                }
                norms.push(norm);
            }
            Some(norms)
        } else {
            None
        };
        Ok(Projection { embedding, norms })
    }

    /// Probe-space embedding of every object.
    pub fn embed(&self) -> ProbeResult<Matrix> {
        Ok(self.project()?.embedding)
    }

    /// Embeddings of the batch's triplet members, stacked as
    /// `[t0.i, t0.j, t0.k, t1.i, ...]`.
    pub fn forward(&self, triplets: &[Triplet]) -> ProbeResult<Matrix> {
        let projection = self.project()?;
        gather(&projection.embedding, triplets)
    }

    /// Pairwise similarities for each triplet of the batch.
    pub fn similarities(&self, triplets: &[Triplet]) -> ProbeResult<Vec<Similarities>> {
        let stacked = self.forward(triplets)?;
        let (anchor, positive, negative) = unbind(&stacked)?;
        Ok((0..anchor.rows())
            .map(|b| triplet_similarities(anchor.row(b), positive.row(b), negative.row(b)))
            .collect())
    }

    /// Cross-entropy, accuracy, entropy and choices on a set of triplets.
    pub fn evaluate(&self, triplets: &[Triplet]) -> ProbeResult<ChoiceSummary> {
        let sims = self.similarities(triplets)?;
        Ok(self.objective.choice.summarize(&sims))
    }

    pub fn penalty(&self) -> f64 {
        self.objective.lambda * self.transform.frobenius_norm_sq()
    }

    /// Mean cross-entropy plus penalty on a batch, and its gradient with respect
    /// to the transform. Only the transform is differentiated; the features
    /// never change.
    pub fn loss_and_gradient(&self, triplets: &[Triplet]) -> ProbeResult<(f64, Matrix)> {
        let (d, p) = self.transform.shape();
        let mut grad = Matrix::zeros(d, p);
        for (g, w) in grad.as_mut_slice().iter_mut().zip(self.transform.as_slice()) {
            *g = 2.0 * self.objective.lambda * w;
        }
        if triplets.is_empty() {
            return Ok((self.penalty(), grad));
        }
        let n = self.n_objects();
        if let Some(t) = triplets.iter().find(|t| t.objects().iter().any(|&o| o >= n)) {
            return Err(ProbeError::invalid_input(format!(
                "triplet {t:?} outside embedding with {n} rows"
            )));
        }

        let projection = self.project()?;
        let embedding = &projection.embedding;
        let scale = 1.0 / triplets.len() as f64;
        let mut grad_embedding = Matrix::zeros(n, p);
        let mut touched = vec![false; n];
        let mut loss = 0.0;

        for t in triplets {
            let (a, pos, neg) = (embedding.row(t.i), embedding.row(t.j), embedding.row(t.k));
            let sims = triplet_similarities(a, pos, neg);
            let (nll, g) = self.objective.choice.nll_with_grad(sims);
            loss += nll * scale;
            let [g0, g1, g2] = g.map(|v| v * scale);
            for c in 0..p {
                let (av, pv, nv) = (a[c], pos[c], neg[c]);
                grad_embedding.as_mut_slice()[t.i * p + c] += g0 * pv + g1 * nv;
                grad_embedding.as_mut_slice()[t.j * p + c] += g0 * av + g2 * nv;
                grad_embedding.as_mut_slice()[t.k * p + c] += g1 * av + g2 * pv;
            }
            touched[t.i] = true;
            touched[t.j] = true;
            touched[t.k] = true;
        }

        for r in (0..n).filter(|&r| touched[r]) {
            if let Some(norms) = &projection.norms {
                // d(z/|z|)/dz = (I - e e^T) / |z|
                let norm = norms[r];
                let e = embedding.row(r);
                let ge = grad_embedding.row_mut(r);
                if norm > 0.0 {
                    let proj = dot(e, ge);
                    for (gv, ev) in ge.iter_mut().zip(e) {
                        *gv = (*gv - ev * proj) / norm;
                    }
                } else {
                    ge.iter_mut().for_each(|gv| *gv = 0.0);
                }
            }
            let x = self.features.row(r);
            let ge = grad_embedding.row(r);
            for (a, &xa) in x.iter().enumerate() {
                if xa == 0.0 {
                    continue;
                }
                for (gw, gv) in grad.row_mut(a).iter_mut().zip(ge) {
                    *gw += xa * gv;
                }
            }
        }

        Ok((loss + self.penalty(), grad))
    }
}

/// Rows of `embedding` for every triplet member, three rows per triplet.
pub fn gather(embedding: &Matrix, triplets: &[Triplet]) -> ProbeResult<Matrix> {
    let p = embedding.cols();
    let mut data = Vec::with_capacity(triplets.len() * 3 * p);
    for t in triplets {
        for object in t.objects() {
            if object >= embedding.rows() {
                return Err(ProbeError::invalid_input(format!(
                    "object {object} outside embedding with {} rows",
                    embedding.rows()
                )));
            }
            data.extend_from_slice(embedding.row(object));
        }
    }
    Matrix::new(triplets.len() * 3, p, data)
}

/// Split `3 * batch` stacked rows into batch-aligned anchor, positive and
/// negative matrices, preserving within-batch order.
pub fn unbind(stacked: &Matrix) -> ProbeResult<(Matrix, Matrix, Matrix)> {
    if stacked.rows() % 3 != 0 {
        return Err(ProbeError::shape(format!(
            "cannot unbind {} rows into triplets",
            stacked.rows()
        )));
    }
    let batch = stacked.rows() / 3;
    let p = stacked.cols();
    let mut parts = [
        Vec::with_capacity(batch * p),
        Vec::with_capacity(batch * p),
        Vec::with_capacity(batch * p),
    ];
    for r in 0..stacked.rows() {
        parts[r % 3].extend_from_slice(stacked.row(r));
    }
    let [anchor, positive, negative] = parts;
    Ok((
        Matrix::new(batch, p, anchor)?,
        Matrix::new(batch, p, positive)?,
        Matrix::new(batch, p, negative)?,
    ))
}
