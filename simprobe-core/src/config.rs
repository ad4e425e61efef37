//! Configuration for probing runs and zero-shot evaluation.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI
//! overrides. Every section rejects unknown keys, so a typo in a config file or an
//! environment variable fails the run instead of being silently ignored.

use crate::error::{ProbeError, ProbeResult};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Environment variable prefix, e.g. `SIMPROBE_PROBING__N_FOLDS=4`.
pub const ENV_PREFIX: &str = "SIMPROBE_";

/// Sections read from the environment. Other `SIMPROBE_*` variables, such as
/// logging settings, are left to their own consumers.
const ENV_SECTIONS: [&str; 2] = ["probing__", "evaluation__"];

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimprobeConfig {
    /// Linear probe optimization and cross-validation.
    #[serde(default)]
    pub probing: ProbingConfig,
    /// Zero-shot choice evaluation and RSA.
    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

impl SimprobeConfig {
    pub fn validate(&self) -> ProbeResult<()> {
        self.probing.validate()
    }
}

/// Optimizer used to learn the probe transform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerKind {
    #[default]
    #[serde(alias = "adam", alias = "ADAM")]
    Adam,
    #[serde(rename = "AdamW", alias = "adamw", alias = "ADAMW", alias = "Adamw")]
    AdamW,
    #[serde(rename = "SGD", alias = "sgd", alias = "Sgd")]
    Sgd,
}

impl OptimizerKind {
    /// Lowercase name as used in results tables and artifact paths.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Adam => "adam",
            Self::AdamW => "adamw",
            Self::Sgd => "sgd",
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OptimizerKind {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "adam" => Ok(Self::Adam),
            "adamw" => Ok(Self::AdamW),
            "sgd" => Ok(Self::Sgd),
            other => Err(ProbeError::config(format!(
                "unknown optimizer '{other}', use Adam, AdamW or SGD"
            ))),
        }
    }
}

/// Hyperparameters for learning a linear transform under cross-validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbingConfig {
    #[serde(default)]
    pub optimizer: OptimizerKind,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Coefficient of the squared Frobenius norm penalty on the transform.
    #[serde(default = "default_lambda")]
    pub lambda: f64,
    #[serde(default = "default_n_folds")]
    pub n_folds: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_epochs")]
    pub max_epochs: usize,
    #[serde(default = "default_min_epochs")]
    pub min_epochs: usize,
    /// Validation checks without improvement before training stops.
    #[serde(default = "default_patience")]
    pub patience: usize,
    /// Minimum decrease of the validation loss that counts as an improvement.
    #[serde(default = "default_min_delta")]
    pub min_delta: f64,
    /// L2-normalize probe embeddings and scale similarities by the model temperature.
    #[serde(default)]
    pub apply_normalization: bool,
    /// Softmax temperature used when `apply_normalization` is off.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Output dimension of the transform. Defaults to the feature dimension.
    #[serde(default)]
    pub transform_dim: Option<usize>,
    /// Global L2 norm the gradient is clipped to before each update.
    #[serde(default = "default_gradient_clip_norm")]
    pub gradient_clip_norm: Option<f64>,
    /// Standard deviation of the normal distribution the transform is drawn from.
    #[serde(default = "default_init_std")]
    pub init_std: f64,
}

impl Default for ProbingConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerKind::default(),
            learning_rate: default_learning_rate(),
            lambda: default_lambda(),
            n_folds: default_n_folds(),
            batch_size: default_batch_size(),
            max_epochs: default_max_epochs(),
            min_epochs: default_min_epochs(),
            patience: default_patience(),
            min_delta: default_min_delta(),
            apply_normalization: false,
            temperature: default_temperature(),
            seed: default_seed(),
            transform_dim: None,
            gradient_clip_norm: default_gradient_clip_norm(),
            init_std: default_init_std(),
        }
    }
}

impl ProbingConfig {
    /// Reject values the training loop cannot run with.
    pub fn validate(&self) -> ProbeResult<()> {
        if !(2..=5).contains(&self.n_folds) {
            return Err(ProbeError::config(format!(
                "n_folds must be one of 2, 3, 4, 5 (got {})",
                self.n_folds
            )));
        }
        if self.batch_size == 0 {
            return Err(ProbeError::config("batch_size must be positive"));
        }
        if self.max_epochs == 0 {
            return Err(ProbeError::config("max_epochs must be positive"));
        }
        if self.min_epochs > self.max_epochs {
            return Err(ProbeError::config(format!(
                "min_epochs ({}) exceeds max_epochs ({})",
                self.min_epochs, self.max_epochs
            )));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(ProbeError::config("learning_rate must be positive"));
        }
        if !(self.temperature > 0.0 && self.temperature.is_finite()) {
            return Err(ProbeError::config("temperature must be positive"));
        }
        if !(self.lambda >= 0.0 && self.lambda.is_finite()) {
            return Err(ProbeError::config("lambda must be non-negative"));
        }
        if self.min_delta < 0.0 {
            return Err(ProbeError::config("min_delta must be non-negative"));
        }
        if !(self.init_std > 0.0 && self.init_std.is_finite()) {
            return Err(ProbeError::config("init_std must be positive"));
        }
        if let Some(clip) = self.gradient_clip_norm {
            if !(clip > 0.0) {
                return Err(ProbeError::config("gradient_clip_norm must be positive"));
            }
        }
        if self.transform_dim == Some(0) {
            return Err(ProbeError::config("transform_dim must be positive"));
        }
        Ok(())
    }
}

fn default_learning_rate() -> f64 {
    1e-3
}

fn default_lambda() -> f64 {
    1e-3
}

fn default_n_folds() -> usize {
    3
}

fn default_batch_size() -> usize {
    256
}

fn default_max_epochs() -> usize {
    100
}

fn default_min_epochs() -> usize {
    10
}

fn default_patience() -> usize {
    10
}

fn default_min_delta() -> f64 {
    1e-4
}

fn default_temperature() -> f64 {
    1.0
}

fn default_seed() -> u64 {
    42
}

fn default_gradient_clip_norm() -> Option<f64> {
    Some(1.0)
}

fn default_init_std() -> f64 {
    0.01
}

/// Similarity used to predict the odd-one-out from a fixed embedding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distance {
    #[default]
    Cosine,
    Euclidean,
}

/// How a representational dissimilarity matrix is computed from features.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RdmMethod {
    #[default]
    Correlation,
    Cosine,
    Euclidean,
}

/// Zero-shot evaluation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvaluationConfig {
    #[serde(default)]
    pub distance: Distance,
    #[serde(default)]
    pub rdm_method: RdmMethod,
    /// Key under `temperature` in the model registry.
    #[serde(default = "default_temperature_objective")]
    pub temperature_objective: String,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            distance: Distance::default(),
            rdm_method: RdmMethod::default(),
            temperature_objective: default_temperature_objective(),
        }
    }
}

fn default_temperature_objective() -> String {
    "cosine".to_string()
}

/// Command-line overrides for the probing section. Unset fields leave the
/// lower layers untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProbingOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimizer: Option<OptimizerKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learning_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lambda: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_folds: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_epochs: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_epochs: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patience: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apply_normalization: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Load configuration from layered sources and validate it.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides
/// 2. Environment variables (prefixed with `SIMPROBE_`, sections split by `__`)
/// 3. The TOML file at `path`, if given
/// 4. Built-in defaults
pub fn load_config(
    path: Option<&Path>,
    overrides: Option<&ProbingOverrides>,
) -> ProbeResult<SimprobeConfig> {
    let mut figment = Figment::from(Serialized::defaults(SimprobeConfig::default()));

    if let Some(path) = path {
        if !path.exists() {
            return Err(ProbeError::not_found(format!(
                "config file {}",
                path.display()
            )));
        }
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(
        Env::prefixed(ENV_PREFIX)
            .filter(|key| {
                let key = key.as_str().to_ascii_lowercase();
                ENV_SECTIONS.iter().any(|section| key.starts_with(section))
            })
            .split("__"),
    );

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::default("probing", overrides));
    }

    let config: SimprobeConfig = figment.extract().map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}
