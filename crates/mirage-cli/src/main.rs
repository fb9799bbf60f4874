//! Mirage CLI
//!
//! Command-line driver for black-box substitute attacks.
//!
//! # Commands
//!
//! - `mirage run --data-dir <dir>` - Attack an oracle trained on MNIST
//! - `mirage run --synthetic` - Attack an oracle trained on generated data
//! - `mirage config` - Print the effective configuration as JSON
//!
//! Configuration is layered: built-in defaults, then `--config <file.json>`,
//! then individual flags.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use mirage_attack::{run_experiment, ExperimentReport};
use mirage_core::{AttackConfig, AugmentationLayout, OptimizerKind};
use mirage_data::{load_mnist, synthetic, Dataset, SyntheticSpec};
use mirage_nn::{oracle_cnn, substitute_mlp};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mirage")]
#[command(about = "Black-box substitute training and transfer attacks")]
#[command(version)]
struct Cli {
    /// Log at debug level (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train an oracle, attack it through a substitute and report accuracies
    Run {
        /// Directory with the four MNIST IDX files (plain or .gz)
        #[arg(long, conflicts_with = "synthetic")]
        data_dir: Option<PathBuf>,
        /// Use a generated dataset instead of MNIST
        #[arg(long)]
        synthetic: bool,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Print the effective configuration
    Config {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

/// Overrides applied on top of the defaults and the config file.
#[derive(Args, Debug, Default)]
struct ConfigArgs {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Oracle training epochs
    #[arg(long)]
    nb_epochs: Option<usize>,
    #[arg(long)]
    batch_size: Option<usize>,
    /// Test samples handed to the adversary
    #[arg(long)]
    holdout: Option<usize>,
    #[arg(long)]
    nb_classes: Option<usize>,
    /// Substitute training rounds
    #[arg(long)]
    nb_epochs_s: Option<usize>,
    #[arg(long, allow_negative_numbers = true)]
    learning_rate: Option<f32>,
    /// Jacobian augmentation step
    #[arg(long, allow_negative_numbers = true)]
    lmbda: Option<f32>,
    /// Training passes per substitute round
    #[arg(long)]
    sub_train_epochs: Option<usize>,
    #[arg(long, allow_negative_numbers = true)]
    fgsm_eps: Option<f32>,
    /// Clamp adversarial examples to [MIN, MAX]
    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"], allow_negative_numbers = true)]
    clip: Option<Vec<f32>>,
    /// interleaved, stacked or appended
    #[arg(long)]
    layout: Option<AugmentationLayout>,
    /// sgd or adadelta
    #[arg(long)]
    optimizer: Option<OptimizerKind>,
    /// Evaluate augmentation gradients on the rayon pool
    #[arg(long)]
    parallel_augmentation: bool,
    #[arg(long)]
    seed: Option<u64>,
    /// Save the trained oracle here (.gz to compress)
    #[arg(long)]
    checkpoint: Option<PathBuf>,
}

impl ConfigArgs {
    fn resolve(&self) -> anyhow::Result<AttackConfig> {
        let mut config = match &self.config {
            Some(path) => AttackConfig::from_json_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => AttackConfig::default(),
        };

        macro_rules! apply {
            ($($field:ident),*) => {
                $(if let Some(value) = self.$field {
                    config.$field = value;
                })*
            };
        }
        apply!(
            nb_epochs,
            batch_size,
            holdout,
            nb_classes,
            nb_epochs_s,
            learning_rate,
            lmbda,
            sub_train_epochs,
            fgsm_eps,
            layout,
            optimizer,
            seed
        );
        if let Some(clip) = &self.clip {
            config.clip = Some((clip[0], clip[1]));
        }
        if self.parallel_augmentation {
            config.parallel_augmentation = true;
        }
        if let Some(path) = &self.checkpoint {
            config.checkpoint = Some(path.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_dataset(
    data_dir: Option<PathBuf>,
    use_synthetic: bool,
    config: &AttackConfig,
) -> anyhow::Result<Dataset> {
    match (data_dir, use_synthetic) {
        (Some(dir), _) => {
            load_mnist(&dir).with_context(|| format!("loading MNIST from {}", dir.display()))
        }
        (None, true) => {
            let spec = SyntheticSpec {
                num_classes: config.nb_classes,
                seed: config.seed,
                ..Default::default()
            };
            info!(
                "generating synthetic data: {} train, {} test, {}",
                spec.train_size, spec.test_size, spec.shape
            );
            Ok(synthetic(&spec)?)
        }
        (None, false) => bail!("pass --data-dir <dir> or --synthetic"),
    }
}

fn run(dataset: &Dataset, config: &AttackConfig) -> anyhow::Result<ExperimentReport> {
    let oracle = oracle_cnn(dataset.shape, config.nb_classes, config.seed)?;
    let substitute = substitute_mlp(
        dataset.shape.len(),
        config.nb_classes,
        config.seed.wrapping_add(2),
    )?;
    let outcome = run_experiment(dataset, config, oracle, substitute)?;
    Ok(outcome.report)
}

fn print_report(report: &ExperimentReport) {
    println!(
        "Test accuracy of black-box on legitimate test examples: {:.4}",
        report.oracle_accuracy
    );
    println!(
        "Test accuracy of substitute on legitimate test examples: {:.4}",
        report.substitute_accuracy
    );
    println!(
        "Substitute training set sizes: {:?} ({} oracle queries)",
        report.substitute_set_sizes, report.oracle_queries
    );
    println!(
        "Test accuracy of oracle on adversarial examples generated using the substitute: {:.4}",
        report.adversarial_accuracy
    );
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            data_dir,
            synthetic,
            json,
            config,
        } => {
            let config = config.resolve()?;
            let dataset = load_dataset(data_dir, synthetic, &config)?;
            let report = run(&dataset, &config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        Commands::Config { config } => {
            println!("{}", config.resolve()?.to_json()?);
        }
    }
    Ok(())
}
