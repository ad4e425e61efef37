//! End-to-end cross-validation over files on disk.

use pretty_assertions::assert_eq;
use simprobe_core::config::{Distance, OptimizerKind, ProbingConfig};
use simprobe_core::cv::{CrossValidator, FoldStatus};
use simprobe_core::data::{load_features, load_triplets};
use simprobe_core::eval::evaluate_embedding;
use simprobe_core::results::{ModelKey, ProbingRecord, ResultsTable, artifact_dir, load_transforms, save_artifacts};
use simprobe_core::{Matrix, Triplet, TripletSet};
use tempfile::TempDir;

const N_OBJECTS: usize = 12;

// No jitter is the mean of two others, so no two cross-cluster distances tie.
const JITTER: [f64; 4] = [0.0, 0.01, 0.03, 0.07];

/// Three well-separated clusters of four objects in four dimensions.
fn clustered_features() -> Vec<Vec<f64>> {
    (0..N_OBJECTS)
        .map(|o| {
            let cluster = o / 4;
            let jitter = JITTER[o % 4];
            (0..4)
                .map(|d| if d == cluster { 2.0 + jitter } else { jitter - 0.5 })
                .collect()
        })
        .collect()
}

/// Humans pair two objects of the same cluster and leave out a third one.
fn cluster_triplets() -> Vec<Triplet> {
    let mut triplets = Vec::new();
    for a in 0..N_OBJECTS {
        for b in (a + 1)..N_OBJECTS {
            if a / 4 != b / 4 {
                continue;
            }
            for odd in 0..N_OBJECTS {
                if odd / 4 != a / 4 && (a + b + odd) % 3 == 0 {
                    triplets.push(Triplet::new(a, b, odd));
                }
            }
        }
    }
    triplets
}

fn write_inputs(dir: &TempDir) -> (Matrix, TripletSet) {
    let features_path = dir.path().join("features.txt");
    let text: String = clustered_features()
        .iter()
        .map(|row| row.iter().map(f64::to_string).collect::<Vec<_>>().join(" ") + "\n")
        .collect();
    std::fs::write(&features_path, text).unwrap();

    let triplets_path = dir.path().join("triplets.json");
    std::fs::write(&triplets_path, serde_json::to_string(&cluster_triplets()).unwrap()).unwrap();

    let features = load_features(&features_path).unwrap();
    let triplets = load_triplets(&triplets_path, features.rows()).unwrap();
    (features, triplets)
}

fn config() -> ProbingConfig {
    ProbingConfig {
        optimizer: OptimizerKind::Adam,
        learning_rate: 0.01,
        n_folds: 2,
        batch_size: 8,
        min_epochs: 1,
        max_epochs: 5,
        patience: 2,
        seed: 7,
        ..Default::default()
    }
}

#[test]
fn cross_validation_end_to_end() {
    let dir = TempDir::new().unwrap();
    let (features, triplets) = write_inputs(&dir);
    let result = CrossValidator::new(config()).unwrap().run(&features, &triplets).unwrap();

    assert_eq!(result.folds.len(), 2);
    for fold in &result.folds {
        assert_eq!(
            fold.n_train_triplets + fold.n_val_triplets + fold.n_dropped_triplets,
            triplets.len()
        );
        assert_eq!(fold.n_train_objects + fold.n_val_objects, N_OBJECTS);
        match fold.status {
            FoldStatus::Trained => {
                assert_eq!(fold.transform.as_ref().map(Matrix::shape), Some((4, 4)));
                assert_eq!(fold.choices.len(), fold.n_val_triplets);
                assert!((0.0..=1.0).contains(&fold.val_accuracy));
                let metrics = fold.training.as_ref().unwrap();
                assert!(metrics.epochs_completed >= 1 && metrics.epochs_completed <= 5);
            }
            FoldStatus::Empty => {
                assert!(fold.transform.is_none());
                assert!(fold.val_accuracy.is_nan());
            }
        }
    }

    let trained_val: usize = result
        .folds
        .iter()
        .filter(|f| f.status == FoldStatus::Trained)
        .map(|f| f.n_val_triplets)
        .sum();
    assert_eq!(result.choices().len(), trained_val);
    assert_eq!(result.transforms().count(), result.trained_folds());
}

#[test]
fn cross_validation_is_deterministic() {
    let dir = TempDir::new().unwrap();
    let (features, triplets) = write_inputs(&dir);
    let cv = CrossValidator::new(config()).unwrap();
    let a = cv.run(&features, &triplets).unwrap();
    let b = cv.run(&features, &triplets).unwrap();

    assert_eq!(a.choices(), b.choices());
    let transforms_a: Vec<_> = a.transforms().map(|(f, t)| (f, t.clone())).collect();
    let transforms_b: Vec<_> = b.transforms().map(|(f, t)| (f, t.clone())).collect();
    assert_eq!(transforms_a, transforms_b);
    assert_eq!(a.mean_accuracy.to_bits(), b.mean_accuracy.to_bits());
}

#[test]
fn normalized_probing_uses_model_temperature() {
    let dir = TempDir::new().unwrap();
    let (features, triplets) = write_inputs(&dir);
    let config = ProbingConfig {
        apply_normalization: true,
        ..config()
    };
    let result = CrossValidator::new(config)
        .unwrap()
        .with_model_temperature(0.1)
        .run(&features, &triplets)
        .unwrap();
    assert_eq!(result.temperature, 0.1);
}

#[test]
fn artifacts_and_results_persist() {
    let dir = TempDir::new().unwrap();
    let (features, triplets) = write_inputs(&dir);
    let config = config();
    let result = CrossValidator::new(config.clone()).unwrap().run(&features, &triplets).unwrap();

    let key = ModelKey::new("vgg16", "penultimate", "torchvision");
    let out = artifact_dir(
        &dir.path().join("results"),
        &key,
        config.n_folds,
        config.lambda,
        config.optimizer,
        config.learning_rate,
    );
    let manifest = save_artifacts(&out, &result).unwrap();
    assert_eq!(manifest.transforms.len(), result.trained_folds());

    let loaded = load_transforms(&out).unwrap();
    let expected: Vec<_> = result.transforms().map(|(f, t)| (f, t.clone())).collect();
    assert_eq!(loaded, expected);

    let table_path = dir.path().join("results").join("probing_results.json");
    ResultsTable::append_to(&table_path, ProbingRecord::new(&key, &config, &result)).unwrap();
    let table: ResultsTable<ProbingRecord> = ResultsTable::load(&table_path).unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(table.rows()[0].n_folds, 2);
}

#[test]
fn zero_shot_prefers_same_cluster() {
    let dir = TempDir::new().unwrap();
    let (features, triplets) = write_inputs(&dir);
    let eval = evaluate_embedding(&features, &triplets, 1.0, Distance::Euclidean).unwrap();
    assert_eq!(eval.accuracy, 1.0);
    assert!(eval.failures.is_empty());
}
