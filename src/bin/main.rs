//! PHOW Command Line Interface
//!
//! Train and evaluate pyramid-histogram-of-visual-words classifiers on image
//! directories laid out as one sub-directory per class.

use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::{error, info};
use phow::api::Pipeline;
use phow::config::PipelineConfig;
use phow::core::{PhowError, Result};
use phow::data::GroupedDataset;
use phow::evaluation::EvaluationReport;
use phow::persistence::ModelFile;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(name = "phow")]
#[command(about = "Image classification with pyramid histograms of visual words")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a dataset, train on one part and evaluate on the other
    Run(RunArgs),
    /// Train a model on the training split and save it
    Train(TrainArgs),
    /// Evaluate a saved model on the test split
    Evaluate(EvaluateArgs),
    /// Display model information
    Info(InfoArgs),
    /// Write the default configuration as JSON
    InitConfig(InitConfigArgs),
}

/// Options shared by every command that builds a pipeline
#[derive(Args)]
struct PipelineArgs {
    /// Dataset root with one sub-directory per class
    #[arg(long)]
    data: PathBuf,

    /// JSON configuration file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Cache directory for the vocabulary and feature vectors
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Worker threads for feature extraction
    #[arg(short, long)]
    workers: Option<usize>,

    /// Vocabulary size
    #[arg(short = 'k', long)]
    codewords: Option<usize>,

    /// Number of classes to sample from the dataset
    #[arg(long)]
    groups: Option<usize>,

    /// Use every class in the dataset
    #[arg(long, conflicts_with = "groups")]
    all_groups: bool,

    /// Regularization parameter C
    #[arg(short = 'C', long)]
    c: Option<f64>,

    /// Seed for group sampling and splitting
    #[arg(long)]
    seed: Option<u64>,

    /// Classify raw histograms without the kernel map
    #[arg(long)]
    no_kernel_map: bool,
}

impl PipelineArgs {
    fn config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(dir) = &self.cache {
            config.cache_dir = Some(dir.clone());
        }
        if let Some(workers) = self.workers {
            config.workers = Some(workers);
        }
        if let Some(k) = self.codewords {
            config.vocabulary.k = k;
        }
        if let Some(groups) = self.groups {
            config.split.groups = Some(groups);
        }
        if self.all_groups {
            config.split.groups = None;
        }
        if let Some(c) = self.c {
            config.classifier.solver.c = c;
        }
        if let Some(seed) = self.seed {
            config.split.seed = seed;
        }
        if self.no_kernel_map {
            config.kernel_map = None;
        }
        config.validate()?;
        Ok(config)
    }

    fn load(&self) -> Result<(Pipeline, GroupedDataset)> {
        let pipeline = Pipeline::new(self.config()?)?;
        info!("Loading dataset from {:?}", self.data);
        let dataset = GroupedDataset::from_directory(&self.data)?;
        Ok((pipeline, dataset))
    }
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    pipeline: PipelineArgs,

    /// Also save the trained model
    #[arg(long)]
    model_out: Option<PathBuf>,

    /// Write the evaluation report as JSON
    #[arg(long)]
    report_json: Option<PathBuf>,
}

#[derive(Args)]
struct TrainArgs {
    #[command(flatten)]
    pipeline: PipelineArgs,

    /// Output model file
    #[arg(short, long)]
    output: PathBuf,
}

#[derive(Args)]
struct EvaluateArgs {
    #[command(flatten)]
    pipeline: PipelineArgs,

    /// Trained model file
    #[arg(short, long)]
    model: PathBuf,

    /// Write the evaluation report as JSON
    #[arg(long)]
    report_json: Option<PathBuf>,
}

#[derive(Args)]
struct InfoArgs {
    /// Model file
    model: PathBuf,
}

#[derive(Args)]
struct InitConfigArgs {
    /// Output file (prints to stdout if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    let result = match cli.command {
        Commands::Run(args) => run_command(args),
        Commands::Train(args) => train_command(args),
        Commands::Evaluate(args) => evaluate_command(args),
        Commands::Info(args) => info_command(args),
        Commands::InitConfig(args) => init_config_command(args),
    };

    if let Err(e) = result {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(args: RunArgs) -> Result<()> {
    let (pipeline, dataset) = args.pipeline.load()?;
    let outcome = pipeline.run(&dataset)?;

    print_report(&outcome.report);
    let stats = &outcome.cache_stats;
    info!(
        "Feature cache: {} hits, {} misses, {} extractions",
        stats.hits, stats.misses, stats.extractions
    );

    if let Some(path) = &args.report_json {
        write_report(path, &outcome.report)?;
    }
    if let Some(path) = &args.model_out {
        outcome.trained.to_model_file().save_to_file(path)?;
        info!("Model saved to: {path:?}");
    }
    Ok(())
}

fn train_command(args: TrainArgs) -> Result<()> {
    let (pipeline, dataset) = args.pipeline.load()?;
    if pipeline.config().cache_dir.is_none() {
        return Err(PhowError::InvalidParameter(
            "--cache is required so the vocabulary can be reused for evaluation".to_string(),
        ));
    }

    let split = pipeline.prepare(&dataset)?;
    let trained = pipeline.fit(&split.train)?;
    info!("Training completed successfully");

    trained.to_model_file().save_to_file(&args.output)?;
    println!(
        "Model with {} classes saved to {:?}",
        trained.model().labels().len(),
        args.output
    );
    Ok(())
}

fn evaluate_command(args: EvaluateArgs) -> Result<()> {
    let (pipeline, dataset) = args.pipeline.load()?;
    let model_file = ModelFile::load_from_file(&args.model)?;

    let vocabulary = pipeline.cached_vocabulary()?;
    let trained = pipeline.restore(&model_file, vocabulary)?;

    let split = pipeline.prepare(&dataset)?;
    let report = trained.evaluate(&split.test)?;
    print_report(&report);

    if let Some(path) = &args.report_json {
        write_report(path, &report)?;
    }
    Ok(())
}

fn info_command(args: InfoArgs) -> Result<()> {
    let model = ModelFile::load_from_file(&args.model)?;
    model.print_summary();
    Ok(())
}

fn init_config_command(args: InitConfigArgs) -> Result<()> {
    let config = PipelineConfig::default();
    match &args.output {
        Some(path) => {
            config.save_to_file(path)?;
            println!("Default configuration written to {path:?}");
        }
        None => println!("{}", serde_json::to_string_pretty(&config)?),
    }
    Ok(())
}

fn print_report(report: &EvaluationReport) {
    println!("=== Evaluation Report ===");
    print!("{report}");
}

fn write_report(path: &Path, report: &EvaluationReport) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(report)?)?;
    info!("Report written to: {path:?}");
    Ok(())
}
