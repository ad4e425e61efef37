//! Result rows, append-only results tables and probe artifacts.
//!
//! Each command appends one summary row to a JSON results table; a probing run
//! also writes its per-fold transforms to a directory keyed by the run's
//! configuration.

use crate::config::{Distance, OptimizerKind, ProbingConfig};
use crate::cv::CrossValidationResult;
use crate::error::{ProbeError, ProbeResult};
use crate::eval::{RsaScores, ZeroShotEvaluation};
use crate::matrix::Matrix;
use crate::registry::ModelFamily;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Default file names under the results directory.
pub const PROBING_RESULTS_FILE: &str = "probing_results.json";
pub const ZERO_SHOT_RESULTS_FILE: &str = "zero_shot_results.json";
pub const RSA_RESULTS_FILE: &str = "rsa_results.json";

const MANIFEST_FILE: &str = "manifest.json";
const CHOICES_FILE: &str = "choices.json";

/// Identifies the evaluated model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelKey {
    pub model: String,
    pub module: String,
    pub source: String,
}

impl ModelKey {
    pub fn new(model: impl Into<String>, module: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            module: module.into(),
            source: source.into(),
        }
    }

    pub fn family(&self) -> ModelFamily {
        ModelFamily::classify(&self.model)
    }
}

/// One cross-validated probing run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbingRecord {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    /// Mean validation accuracy over trained folds.
    #[serde(with = "nullable_f64")]
    pub probing: f64,
    pub module: String,
    pub family: ModelFamily,
    pub source: String,
    pub l2_reg: f64,
    pub optim: OptimizerKind,
    pub lr: f64,
    pub n_folds: usize,
    pub normalization: bool,
    pub temperature: f64,
    #[serde(with = "nullable_f64_vec")]
    pub fold_accuracies: Vec<f64>,
}

impl ProbingRecord {
    pub fn new(key: &ModelKey, config: &ProbingConfig, result: &CrossValidationResult) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            model: key.model.clone(),
            probing: result.mean_accuracy,
            module: key.module.clone(),
            family: key.family(),
            source: key.source.clone(),
            l2_reg: config.lambda,
            optim: config.optimizer,
            lr: config.learning_rate,
            n_folds: config.n_folds,
            normalization: config.apply_normalization,
            temperature: result.temperature,
            fold_accuracies: result.folds.iter().map(|f| f.val_accuracy).collect(),
        }
    }
}

/// Zero-shot choice accuracy of one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZeroShotRecord {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    #[serde(with = "nullable_f64")]
    pub accuracy: f64,
    #[serde(with = "nullable_f64")]
    pub entropy: f64,
    pub module: String,
    pub family: ModelFamily,
    pub source: String,
    pub distance: Distance,
    pub temperature: f64,
}

impl ZeroShotRecord {
    pub fn new(key: &ModelKey, evaluation: &ZeroShotEvaluation) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            model: key.model.clone(),
            accuracy: evaluation.accuracy,
            entropy: evaluation.mean_entropy,
            module: key.module.clone(),
            family: key.family(),
            source: key.source.clone(),
            distance: evaluation.distance,
            temperature: evaluation.temperature,
        }
    }
}

/// RSA of one model against one human dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RsaRecord {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    #[serde(with = "nullable_f64")]
    pub spearman: f64,
    #[serde(with = "nullable_f64")]
    pub pearson: f64,
    pub module: String,
    pub family: ModelFamily,
    pub source: String,
    pub dataset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl RsaRecord {
    pub fn new(key: &ModelKey, dataset: impl Into<String>, category: Option<String>, scores: RsaScores) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            model: key.model.clone(),
            spearman: scores.spearman,
            pearson: scores.pearson,
            module: key.module.clone(),
            family: key.family(),
            source: key.source.clone(),
            dataset: dataset.into(),
            category,
        }
    }
}

// JSON has no NaN: undefined scores (empty folds, constant RDMs) are stored as null.
mod nullable_f64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_some(value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}

mod nullable_f64_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|v| v.is_finite().then_some(*v)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let values = Vec::<Option<f64>>::deserialize(deserializer)?;
        Ok(values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }
}

/// Append-only table of result rows persisted as a JSON array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultsTable<R> {
    rows: Vec<R>,
}

impl<R> Default for ResultsTable<R> {
    fn default() -> Self {
        Self { rows: Vec::new() }
    }
}

impl<R: Serialize + DeserializeOwned> ResultsTable<R> {
    /// Load a table, or start an empty one if the file does not exist yet.
    pub fn load(path: &Path) -> ProbeResult<Self> {
        Ok(read_json(path)?.unwrap_or_default())
    }

    pub fn save(&self, path: &Path) -> ProbeResult<()> {
        write_json(path, self)
    }

    /// Load, append `row`, and save. Returns the new row count.
    pub fn append_to(path: &Path, row: R) -> ProbeResult<usize> {
        let mut table = Self::load(path)?;
        table.push(row);
        table.save(path)?;
        tracing::info!(path = %path.display(), rows = table.len(), "results table updated");
        Ok(table.len())
    }

    pub fn push(&mut self, row: R) {
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// `root/source/model/module/n_folds/lambda/optimizer/lr`. Path separators in
/// model and module names are replaced so each stays one path segment.
pub fn artifact_dir(
    root: &Path,
    key: &ModelKey,
    n_folds: usize,
    lambda: f64,
    optimizer: OptimizerKind,
    learning_rate: f64,
) -> PathBuf {
    root.join(path_segment(&key.source))
        .join(path_segment(&key.model))
        .join(path_segment(&key.module))
        .join(n_folds.to_string())
        .join(lambda.to_string())
        .join(optimizer.as_str())
        .join(learning_rate.to_string())
}

fn path_segment(name: &str) -> String {
    name.replace(['/', '\\'], "_")
}

/// Shape and file of one stored transform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformEntry {
    pub fold: usize,
    pub file: String,
    pub rows: usize,
    pub cols: usize,
}

/// Index of the transforms written for one probing run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformManifest {
    pub dtype: String,
    pub byte_order: String,
    pub transforms: Vec<TransformEntry>,
}

fn transform_file(fold: usize) -> String {
    format!("transform_fold_{fold:02}.bin")
}

/// Write every trained fold's transform as a flat little-endian `f64` array,
/// the manifest describing their shapes, and the held-out choices.
pub fn save_artifacts(dir: &Path, result: &CrossValidationResult) -> ProbeResult<TransformManifest> {
    let mut transforms = Vec::new();
    for (fold, transform) in result.transforms() {
        let file = transform_file(fold);
        replace_file(&dir.join(&file), &transform.to_le_bytes())?;
        transforms.push(TransformEntry {
            fold,
            file,
            rows: transform.rows(),
            cols: transform.cols(),
        });
    }
    let manifest = TransformManifest {
        dtype: "f64".to_string(),
        byte_order: "little".to_string(),
        transforms,
    };
    write_json(&dir.join(MANIFEST_FILE), &manifest)?;
    write_json(&dir.join(CHOICES_FILE), &result.choices())?;
    tracing::info!(
        dir = %dir.display(),
        transforms = manifest.transforms.len(),
        "saved probe artifacts"
    );
    Ok(manifest)
}

/// Read back the transforms listed in a directory's manifest.
pub fn load_transforms(dir: &Path) -> ProbeResult<Vec<(usize, Matrix)>> {
    let manifest: TransformManifest = read_json(&dir.join(MANIFEST_FILE))?.ok_or_else(|| {
        ProbeError::not_found(format!("no transform manifest in {}", dir.display()))
    })?;
    manifest
        .transforms
        .iter()
        .map(|entry| {
            let matrix = Matrix::read_flat(&dir.join(&entry.file), entry.rows, entry.cols)?;
            Ok((entry.fold, matrix))
        })
        .collect()
}

/// Stage `bytes` in a hidden sibling file and rename it over `path`, so readers
/// of a results table or manifest never see a partial write.
fn replace_file(path: &Path, bytes: &[u8]) -> ProbeResult<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir)?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ProbeError::invalid_input(format!("{} is not a file path", path.display())))?;
    let staging = dir.join(format!(".{name}.{}.partial", Uuid::new_v4().simple()));
    std::fs::write(&staging, bytes)?;
    if let Err(e) = std::fs::rename(&staging, path) {
        let _ = std::fs::remove_file(&staging);
        return Err(e.into());
    }
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> ProbeResult<()> {
    replace_file(path, serde_json::to_string_pretty(value)?.as_bytes())
}

/// `None` when `path` does not exist.
fn read_json<T: DeserializeOwned>(path: &Path) -> ProbeResult<Option<T>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cv::{FoldResult, FoldStatus};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn key() -> ModelKey {
        ModelKey::new("clip_ViT-B/32", "penultimate", "custom")
    }

    fn fold(index: usize, accuracy: f64, transform: Option<Matrix>) -> FoldResult {
        FoldResult {
            fold: index,
            status: if transform.is_some() {
                FoldStatus::Trained
            } else {
                FoldStatus::Empty
            },
            n_train_objects: 4,
            n_val_objects: 2,
            n_train_triplets: 3,
            n_val_triplets: 1,
            n_dropped_triplets: 2,
            val_loss: 1.0,
            val_accuracy: accuracy,
            val_entropy: 1.0,
            choices: vec![2],
            training: None,
            transform,
        }
    }

    fn result() -> CrossValidationResult {
        let t1 = Matrix::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]).unwrap();
        let t2 = Matrix::from_rows(vec![vec![-1.0, 0.5], vec![0.0, 0.25], vec![7.0, 8.0]]).unwrap();
        CrossValidationResult {
            folds: vec![fold(1, 0.5, Some(t1)), fold(2, 0.7, Some(t2)), fold(3, f64::NAN, None)],
            mean_accuracy: 0.6,
            mean_loss: 1.0,
            temperature: 1.0,
        }
    }

    #[test]
    fn test_artifact_dir() {
        let dir = artifact_dir(Path::new("/tmp/results"), &key(), 3, 0.001, OptimizerKind::Adam, 0.001);
        assert_eq!(
            dir,
            PathBuf::from("/tmp/results/custom/clip_ViT-B_32/penultimate/3/0.001/adam/0.001")
        );
    }

    #[test]
    fn test_results_table_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(PROBING_RESULTS_FILE);
        let config = ProbingConfig::default();
        let record = ProbingRecord::new(&key(), &config, &result());
        assert_eq!(record.family, ModelFamily::Clip);
        assert_eq!(record.probing, 0.6);

        assert_eq!(ResultsTable::append_to(&path, record.clone()).unwrap(), 1);
        assert_eq!(ResultsTable::append_to(&path, record.clone()).unwrap(), 2);
        let table: ResultsTable<ProbingRecord> = ResultsTable::load(&path).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[0].model, "clip_ViT-B/32");
        assert_eq!(table.rows()[1].optim, OptimizerKind::Adam);
        let folds = &table.rows()[0].fold_accuracies;
        assert_eq!(&folds[..2], &[0.5, 0.7]);
        assert!(folds[2].is_nan());
    }

    #[test]
    fn test_tables_are_replaced_without_leftovers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(RSA_RESULTS_FILE);
        let scores = RsaScores {
            spearman: 0.1,
            pearson: 0.2,
        };
        for _ in 0..3 {
            ResultsTable::append_to(&path, RsaRecord::new(&key(), "toy", None, scores)).unwrap();
        }
        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from(RSA_RESULTS_FILE)]);
    }

    #[test]
    fn test_corrupt_table_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(ZERO_SHOT_RESULTS_FILE);
        std::fs::write(&path, "[{").unwrap();
        let result: ProbeResult<ResultsTable<ZeroShotRecord>> = ResultsTable::load(&path);
        assert!(matches!(result, Err(ProbeError::Serde(_))));
    }

    #[test]
    fn test_missing_table_is_empty() {
        let dir = TempDir::new().unwrap();
        let table: ResultsTable<RsaRecord> = ResultsTable::load(&dir.path().join("none.json")).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_rsa_record() {
        let scores = RsaScores {
            spearman: 0.4,
            pearson: 0.35,
        };
        let record = RsaRecord::new(&key(), "free-arrangement", Some("animals".into()), scores);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["dataset"], "free-arrangement");
        assert_eq!(json["family"], "CLIP");
    }

    #[test]
    fn test_save_and_load_transforms() {
        let dir = TempDir::new().unwrap();
        let result = result();
        let manifest = save_artifacts(dir.path(), &result).unwrap();
        assert_eq!(manifest.transforms.len(), 2);
        assert_eq!(manifest.transforms[1].file, "transform_fold_02.bin");
        assert_eq!(
            std::fs::metadata(dir.path().join("transform_fold_01.bin")).unwrap().len(),
            6 * 8
        );

        let loaded = load_transforms(dir.path()).unwrap();
        let expected: Vec<(usize, Matrix)> = result.transforms().map(|(f, t)| (f, t.clone())).collect();
        assert_eq!(loaded, expected);

        let choices: Vec<i64> = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("choices.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(choices, vec![2, 2, 2]);
    }
}
