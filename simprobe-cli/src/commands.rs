//! Subcommand handlers.

use crate::{Commands, ConfigAction, ModelArgs, ProbeArgs};
use anyhow::Context;
use simprobe_core::config::{ProbingOverrides, SimprobeConfig, load_config};
use simprobe_core::cv::{CrossValidationResult, CrossValidator, FoldStatus};
use simprobe_core::data::{load_features, load_rdm, load_triplets};
use simprobe_core::eval::{Rdm, center_features, compute_rdm, correlation_matrix, evaluate_embedding, rsa};
use simprobe_core::registry::{DEFAULT_TEMPERATURE, ModelRegistry};
use simprobe_core::results::{
    ModelKey, PROBING_RESULTS_FILE, ProbingRecord, RSA_RESULTS_FILE, ResultsTable, RsaRecord,
    ZERO_SHOT_RESULTS_FILE, ZeroShotRecord, artifact_dir, save_artifacts,
};
use std::path::Path;

pub fn handle_command(command: Commands, config_path: Option<&Path>) -> anyhow::Result<()> {
    match command {
        Commands::Probe {
            features,
            triplets,
            model,
            results_dir,
            overrides,
            json,
        } => handle_probe(
            config_path,
            &features,
            &triplets,
            &model,
            &results_dir,
            &overrides,
            json,
        ),
        Commands::Eval {
            features,
            triplets,
            module,
            source,
            registry,
            distance,
            results_dir,
        } => {
            let config = load(config_path, None)?;
            let distance = distance.map_or(config.evaluation.distance, Into::into);
            let registry = registry.as_deref().map(load_registry).transpose()?;
            let results = results_dir.join(ZERO_SHOT_RESULTS_FILE);
            for path in &features {
                let key = ModelKey::new(model_name(path)?, module.as_str(), source.as_str());
                if let Some(registry) = &registry {
                    let module_name = registry.module_name(&key.model, &key.module)?;
                    tracing::info!(model = %key.model, module = %key.module, %module_name, "resolved module");
                }
                let temperature = registry.as_ref().map_or(DEFAULT_TEMPERATURE, |r| {
                    r.temperature(&key.model, &key.module, &config.evaluation.temperature_objective)
                });
                let matrix = load_features(path)?;
                let triplet_set = load_triplets(&triplets, matrix.rows())?;
                let evaluation = evaluate_embedding(&matrix, &triplet_set, temperature, distance)?;
                println!(
                    "{:<32} accuracy {:.4}  entropy {:.4}  failures {}",
                    key.model,
                    evaluation.accuracy,
                    evaluation.mean_entropy,
                    evaluation.n_failures()
                );
                ResultsTable::append_to(&results, ZeroShotRecord::new(&key, &evaluation))?;
            }
            Ok(())
        }
        Commands::Rsa {
            features,
            human,
            model,
            dataset,
            category,
            method,
            similarities,
            results_dir,
        } => {
            let config = load(config_path, None)?;
            let key = resolve_model(&model)?;
            let features = center_features(&load_features(&features)?);
            let human = load_rdm(&human)?;
            if human.size() != features.rows() {
                anyhow::bail!(
                    "human matrix covers {} objects but features have {} rows",
                    human.size(),
                    features.rows()
                );
            }
            let model_rdm: Rdm = if similarities {
                correlation_matrix(&features)?
            } else {
                compute_rdm(&features, method.map_or(config.evaluation.rdm_method, Into::into))?
            };
            let scores = rsa(&model_rdm, &human)?;
            println!(
                "{}: Spearman {:.4}  Pearson {:.4}",
                key.model, scores.spearman, scores.pearson
            );
            ResultsTable::append_to(
                &results_dir.join(RSA_RESULTS_FILE),
                RsaRecord::new(&key, dataset, category, scores),
            )?;
            Ok(())
        }
        Commands::Config { action } => handle_config(action, config_path),
    }
}

fn handle_probe(
    config_path: Option<&Path>,
    features: &Path,
    triplets: &Path,
    model: &ModelArgs,
    results_dir: &Path,
    overrides: &ProbeArgs,
    json: bool,
) -> anyhow::Result<()> {
    let config = load(config_path, Some(&ProbingOverrides::from(overrides)))?;
    let probing = config.probing;
    let key = resolve_model(model)?;

    let features = load_features(features)?;
    let triplets = load_triplets(triplets, features.rows())?;
    tracing::info!(
        model = %key.model,
        objects = features.rows(),
        dims = features.cols(),
        triplets = triplets.len(),
        "starting cross-validation"
    );

    let mut validator = CrossValidator::new(probing.clone())?;
    if probing.apply_normalization {
        match &model.registry {
            Some(path) => {
                let temperature = load_registry(path)?.temperature(
                    &key.model,
                    &key.module,
                    &config.evaluation.temperature_objective,
                );
                validator = validator.with_model_temperature(temperature);
            }
            None => tracing::warn!("--normalize without --registry; using temperature 1.0"),
        }
    }
    let result = validator.run(&features, &triplets)?;

    let out = artifact_dir(
        results_dir,
        &key,
        probing.n_folds,
        probing.lambda,
        probing.optimizer,
        probing.learning_rate,
    );
    save_artifacts(&out, &result)?;
    ResultsTable::append_to(
        &results_dir.join(PROBING_RESULTS_FILE),
        ProbingRecord::new(&key, &probing, &result),
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&key, &result);
    }
    Ok(())
}

fn print_summary(key: &ModelKey, result: &CrossValidationResult) {
    println!("{} / {} ({})", key.model, key.module, key.family());
    for fold in &result.folds {
        match fold.status {
            FoldStatus::Trained => println!(
                "  fold {:02}: accuracy {:.4}  loss {:.4}  train {} / val {} / dropped {}",
                fold.fold,
                fold.val_accuracy,
                fold.val_loss,
                fold.n_train_triplets,
                fold.n_val_triplets,
                fold.n_dropped_triplets
            ),
            FoldStatus::Empty => println!(
                "  fold {:02}: skipped (train {} / val {})",
                fold.fold, fold.n_train_triplets, fold.n_val_triplets
            ),
        }
    }
    println!("  probing accuracy: {:.4}", result.mean_accuracy);
}

fn handle_config(action: ConfigAction, config_path: Option<&Path>) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init { path } => {
            if path.exists() {
                println!("Configuration file already exists at: {}", path.display());
                return Ok(());
            }
            let toml_str = toml::to_string_pretty(&SimprobeConfig::default())?;
            std::fs::write(&path, &toml_str)?;
            println!("Created default configuration at: {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(config_path, None)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn load(path: Option<&Path>, overrides: Option<&ProbingOverrides>) -> anyhow::Result<SimprobeConfig> {
    load_config(path, overrides).map_err(|e| anyhow::anyhow!("Configuration error: {}", e))
}

fn load_registry(path: &Path) -> anyhow::Result<ModelRegistry> {
    ModelRegistry::load(path).with_context(|| format!("loading model registry {}", path.display()))
}

/// Build the model key, checking the registry entry when one is given.
fn resolve_model(args: &ModelArgs) -> anyhow::Result<ModelKey> {
    if let Some(path) = &args.registry {
        let module_name = load_registry(path)?
            .module_name(&args.model, &args.module)?
            .to_string();
        tracing::info!(model = %args.model, module = %args.module, %module_name, "resolved module");
    }
    Ok(ModelKey::new(
        args.model.as_str(),
        args.module.as_str(),
        args.source.as_str(),
    ))
}

fn model_name(path: &Path) -> anyhow::Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .with_context(|| format!("cannot derive a model name from {}", path.display()))
}
