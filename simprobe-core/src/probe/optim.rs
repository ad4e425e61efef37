//! First-order optimizers for the probe transform.
//!
//! Each optimizer owns its state (moments, step counter), so a probe and its
//! optimizer are always created together and never shared between folds.

use crate::config::OptimizerKind;

/// A parameter update rule over a flat parameter vector.
pub trait Optimizer: Send {
    fn step(&mut self, params: &mut [f64], grad: &[f64]);

    fn kind(&self) -> OptimizerKind;
}

/// Plain stochastic gradient descent.
#[derive(Debug, Clone)]
pub struct Sgd {
    pub lr: f64,
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &mut [f64], grad: &[f64]) {
        for (p, g) in params.iter_mut().zip(grad) {
            *p -= self.lr * g;
        }
    }

    fn kind(&self) -> OptimizerKind {
        OptimizerKind::Sgd
    }
}

/// Adam, optionally with decoupled weight decay (AdamW).
#[derive(Debug, Clone)]
pub struct Adam {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    /// Decoupled weight decay; zero for plain Adam.
    pub weight_decay: f64,
    m: Vec<f64>,
    v: Vec<f64>,
    t: i32,
}

impl Adam {
    pub fn new(lr: f64, n_params: usize) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
            m: vec![0.0; n_params],
            v: vec![0.0; n_params],
            t: 0,
        }
    }

    pub fn adamw(lr: f64, n_params: usize) -> Self {
        Self {
            weight_decay: 1e-2,
            ..Self::new(lr, n_params)
        }
    }

    pub fn steps_taken(&self) -> i32 {
        self.t
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [f64], grad: &[f64]) {
        self.t += 1;
        let bias1 = 1.0 - self.beta1.powi(self.t);
        let bias2 = 1.0 - self.beta2.powi(self.t);
        for (idx, (p, g)) in params.iter_mut().zip(grad).enumerate() {
            if self.weight_decay > 0.0 {
                *p -= self.lr * self.weight_decay * *p;
            }
            self.m[idx] = self.beta1 * self.m[idx] + (1.0 - self.beta1) * g;
            self.v[idx] = self.beta2 * self.v[idx] + (1.0 - self.beta2) * g * g;
            let m_hat = self.m[idx] / bias1;
            let v_hat = self.v[idx] / bias2;
            *p -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
        }
    }

    fn kind(&self) -> OptimizerKind {
        if self.weight_decay > 0.0 {
            OptimizerKind::AdamW
        } else {
            OptimizerKind::Adam
        }
    }
}

/// Fresh optimizer state for `n_params` parameters.
pub fn build_optimizer(kind: OptimizerKind, lr: f64, n_params: usize) -> Box<dyn Optimizer> {
    match kind {
        OptimizerKind::Adam => Box::new(Adam::new(lr, n_params)),
        OptimizerKind::AdamW => Box::new(Adam::adamw(lr, n_params)),
        OptimizerKind::Sgd => Box::new(Sgd { lr }),
    }
}

/// Rescale `grad` in place so its L2 norm is at most `max_norm`.
/// Returns the norm before clipping.
pub fn clip_grad_norm(grad: &mut [f64], max_norm: f64) -> f64 {
    let norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
    let coef = max_norm / (norm + 1e-6);
    if coef < 1.0 {
        grad.iter_mut().for_each(|g| *g *= coef);
    }
    norm
}
