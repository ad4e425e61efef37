//! simprobe CLI: probe, evaluate and compare object embeddings against
//! human odd-one-out judgments.

mod commands;

use clap::{Parser, ValueEnum};
use simprobe_core::config::{Distance, OptimizerKind, ProbingOverrides, RdmMethod};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// simprobe: how well do embeddings predict human similarity judgments?
#[derive(Parser, Debug)]
#[command(name = "simprobe", version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Identifies the model whose features are evaluated.
#[derive(clap::Args, Debug, Clone)]
struct ModelArgs {
    /// Model name, used for the family and in result rows
    #[arg(long)]
    model: String,

    /// Module (layer) key of the model
    #[arg(long, default_value = "penultimate")]
    module: String,

    /// Source the model comes from (e.g. torchvision, custom)
    #[arg(long, default_value = "custom")]
    source: String,

    /// Model registry JSON with module names and temperatures
    #[arg(long)]
    registry: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Learn a linear probe under object-disjoint k-fold cross-validation
    Probe {
        /// Feature matrix (one row per object; text or JSON)
        #[arg(long)]
        features: PathBuf,

        /// Triplets (i, j, k) where k is the human odd-one-out
        #[arg(long)]
        triplets: PathBuf,

        #[command(flatten)]
        model: ModelArgs,

        /// Directory for results tables and transforms
        #[arg(long, default_value = "results")]
        results_dir: PathBuf,

        #[command(flatten)]
        overrides: ProbeArgs,

        /// Print the fold summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Zero-shot odd-one-out accuracy and entropy of fixed embeddings
    Eval {
        /// Feature files; the file stem is used as the model name
        #[arg(required = true)]
        features: Vec<PathBuf>,

        /// Triplets (i, j, k) where k is the human odd-one-out
        #[arg(long)]
        triplets: PathBuf,

        #[arg(long, default_value = "penultimate")]
        module: String,

        #[arg(long, default_value = "custom")]
        source: String,

        /// Model registry JSON with module names and temperatures
        #[arg(long)]
        registry: Option<PathBuf>,

        /// Similarity used to predict the odd-one-out
        #[arg(long, value_enum)]
        distance: Option<DistanceArg>,

        #[arg(long, default_value = "results")]
        results_dir: PathBuf,
    },
    /// Correlate a model RDM with a human RDM
    Rsa {
        /// Feature matrix (one row per object; text or JSON)
        #[arg(long)]
        features: PathBuf,

        /// Human RDM: square matrix or condensed upper triangle
        #[arg(long)]
        human: PathBuf,

        #[command(flatten)]
        model: ModelArgs,

        /// Name of the human dataset, stored in the result row
        #[arg(long)]
        dataset: String,

        /// Optional stimulus category, stored in the result row
        #[arg(long)]
        category: Option<String>,

        /// How the model RDM is computed
        #[arg(long, value_enum)]
        method: Option<RdmMethodArg>,

        /// The human matrix holds similarities, not dissimilarities
        #[arg(long)]
        similarities: bool,

        #[arg(long, default_value = "results")]
        results_dir: PathBuf,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Command-line overrides for the probing section of the configuration.
#[derive(clap::Args, Debug, Clone, Default)]
struct ProbeArgs {
    /// Optimizer: adam, adamw or sgd
    #[arg(long)]
    optimizer: Option<OptimizerKind>,

    #[arg(long)]
    learning_rate: Option<f64>,

    /// Weight of the L2 penalty on the transform
    #[arg(long)]
    lambda: Option<f64>,

    /// Number of folds (2-5)
    #[arg(long)]
    n_folds: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    max_epochs: Option<usize>,

    #[arg(long)]
    min_epochs: Option<usize>,

    #[arg(long)]
    patience: Option<usize>,

    /// L2-normalize probe embeddings and use the model's registry temperature
    #[arg(long)]
    normalize: bool,

    #[arg(long)]
    seed: Option<u64>,
}

impl From<&ProbeArgs> for ProbingOverrides {
    fn from(args: &ProbeArgs) -> Self {
        Self {
            optimizer: args.optimizer,
            learning_rate: args.learning_rate,
            lambda: args.lambda,
            n_folds: args.n_folds,
            batch_size: args.batch_size,
            max_epochs: args.max_epochs,
            min_epochs: args.min_epochs,
            patience: args.patience,
            apply_normalization: args.normalize.then_some(true),
            seed: args.seed,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum DistanceArg {
    Cosine,
    Euclidean,
}

impl From<DistanceArg> for Distance {
    fn from(arg: DistanceArg) -> Self {
        match arg {
            DistanceArg::Cosine => Distance::Cosine,
            DistanceArg::Euclidean => Distance::Euclidean,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum RdmMethodArg {
    Correlation,
    Cosine,
    Euclidean,
}

impl From<RdmMethodArg> for RdmMethod {
    fn from(arg: RdmMethodArg) -> Self {
        match arg {
            RdmMethodArg::Correlation => RdmMethod::Correlation,
            RdmMethodArg::Cosine => RdmMethod::Cosine,
            RdmMethodArg::Euclidean => RdmMethod::Euclidean,
        }
    }
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create a default configuration file
    Init {
        #[arg(default_value = "simprobe.toml")]
        path: PathBuf,
    },
    /// Show the effective configuration
    Show,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "simprobe", "simprobe")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "simprobe.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    commands::handle_command(cli.command, cli.config.as_deref())
}
