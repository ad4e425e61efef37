//! Linear probing of a frozen feature space.

pub mod linear;
pub mod optim;

pub use linear::{LinearProbe, ProbeObjective, gather, unbind};
pub use optim::{Adam, Optimizer, Sgd, build_optimizer, clip_grad_norm};
