use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use solitude_forest::{Distribution, IsolationForest, IsolationForestConfig, MaxRuntime, ProblemStyle};
use solitude_io::{ExperimentName, FrameReader, ResultWriter};

#[derive(Parser)]
#[command(name = "solitude")]
#[command(about = "Isolation-forest anomaly detection for tabular CSV data")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// RNG seed for reproducibility (a fresh seed is drawn and reported if unset)
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Enable verbose (debug-level) logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Number of threads for parallel computation (defaults to all cores)
    #[arg(long, global = true)]
    threads: Option<usize>,
}

/// Forest tuning parameters.
#[derive(Args, Debug, Clone)]
struct ForestArgs {
    /// Number of trees
    #[arg(long, default_value_t = 50)]
    ntrees: usize,

    /// Maximum tree depth (0 grows single-leaf trees)
    #[arg(long, default_value_t = 8)]
    max_depth: usize,

    /// Columns tried per node: -2 all, -1 auto, otherwise 1..=features
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    mtries: i32,

    /// Rows sampled per tree (used when --sample-rate is not set)
    #[arg(long, default_value_t = 256)]
    sample_size: i64,

    /// Fraction of rows sampled per tree, in (0, 1]
    #[arg(long)]
    sample_rate: Option<f64>,

    /// Fraction of columns each tree may split on, in (0, 1]
    #[arg(long, default_value_t = 1.0)]
    col_sample_rate_per_tree: f64,

    /// Minimum in-bag rows on each side of a split
    #[arg(long, default_value_t = 1.0)]
    min_rows: f64,

    /// Minimum numeric histogram bins per node
    #[arg(long, default_value_t = 20)]
    nbins: usize,

    /// Numeric histogram bins at the root
    #[arg(long, default_value_t = 1024)]
    nbins_top_level: usize,

    /// Maximum categorical histogram bins
    #[arg(long, default_value_t = 1024)]
    nbins_cats: usize,

    /// Rows per parallel work chunk
    #[arg(long, default_value_t = 4096)]
    chunk_rows: usize,

    /// Rule behind --mtries -1: "regression" (features/3) or "classification" (sqrt)
    #[arg(long, default_value = "regression")]
    problem_style: String,

    /// Loss distribution: only "auto" and "gaussian" are accepted
    #[arg(long, default_value = "auto")]
    distribution: String,

    /// Stop adding trees once this many seconds have elapsed
    #[arg(long)]
    max_runtime_secs: Option<f64>,
}

#[derive(Subcommand)]
enum Command {
    /// Train an isolation forest on a CSV file
    Train {
        /// Path to the input CSV file
        #[arg(long)]
        data: PathBuf,

        /// Column holding row identifiers, excluded from the features
        #[arg(long)]
        id_column: Option<String>,

        /// Experiment name for output files (must match [a-zA-Z0-9_-]+)
        #[arg(long)]
        experiment: String,

        /// Output directory for result files
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,

        #[command(flatten)]
        forest: ForestArgs,
    },

    /// Score rows of a CSV file with a trained model
    Score {
        /// Path to the trained model binary
        #[arg(long)]
        model: PathBuf,

        /// Path to the CSV file to score
        #[arg(long)]
        data: PathBuf,

        /// Column holding row identifiers
        #[arg(long)]
        id_column: Option<String>,

        /// Experiment name for output files
        #[arg(long)]
        experiment: String,

        /// Output directory for result files
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Export the node graph of one tree, or of every tree
    Graph {
        /// Path to the trained model binary
        #[arg(long)]
        model: PathBuf,

        /// Tree index (all trees if not set)
        #[arg(long)]
        tree: Option<usize>,

        /// Experiment name for output files
        #[arg(long)]
        experiment: String,

        /// Output directory for result files
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },
}

// --- JSON stdout output structs ---

#[derive(Serialize)]
struct TrainOutput {
    experiment: String,
    n_rows: usize,
    n_features: usize,
    ntrees_trained: usize,
    cancelled: bool,
    seed: u64,
    mean_anomaly_score: Option<f64>,
    model_path: PathBuf,
    report_path: PathBuf,
}

#[derive(Serialize)]
struct ScoreOutput {
    experiment: String,
    n_rows: usize,
    model_ntrees: usize,
    mean_score: f64,
    max_score: f64,
    scores_path: PathBuf,
}

#[derive(Serialize)]
struct GraphOutput {
    experiment: String,
    tree: Option<usize>,
    ntrees: usize,
    graph_path: PathBuf,
}

fn parse_problem_style(s: &str) -> Result<ProblemStyle> {
    match s {
        "regression" => Ok(ProblemStyle::Regression),
        "classification" => Ok(ProblemStyle::Classification),
        other => anyhow::bail!("unknown problem style: {other} (expected regression or classification)"),
    }
}

fn parse_distribution(s: &str) -> Result<Distribution> {
    match s {
        "auto" => Ok(Distribution::Auto),
        "gaussian" => Ok(Distribution::Gaussian),
        "bernoulli" => Ok(Distribution::Bernoulli),
        "multinomial" => Ok(Distribution::Multinomial),
        "poisson" => Ok(Distribution::Poisson),
        "laplace" => Ok(Distribution::Laplace),
        "huber" => Ok(Distribution::Huber),
        other => anyhow::bail!("unknown distribution: {other}"),
    }
}

fn build_config(args: &ForestArgs, seed: Option<u64>) -> Result<IsolationForestConfig> {
    let mut config = IsolationForestConfig::new(args.ntrees)?
        .with_max_depth(args.max_depth)
        .with_mtries(args.mtries)
        .with_sample_size(args.sample_size)
        .with_sample_rate(args.sample_rate)
        .with_col_sample_rate_per_tree(args.col_sample_rate_per_tree)
        .with_min_rows(args.min_rows)
        .with_nbins(args.nbins)
        .with_nbins_top_level(args.nbins_top_level)
        .with_nbins_cats(args.nbins_cats)
        .with_chunk_rows(args.chunk_rows)
        .with_problem_style(parse_problem_style(&args.problem_style)?)
        .with_distribution(parse_distribution(&args.distribution)?);
    if let Some(seed) = seed {
        config = config.with_seed(seed);
    }
    Ok(config)
}

fn reader_for(data: &Path, id_column: Option<String>) -> FrameReader {
    let reader = FrameReader::new(data);
    match id_column {
        Some(column) => reader.with_id_column(column),
        None => reader,
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match (cli.verbose, cli.quiet) {
        (true, _) => "debug",
        (_, true) => "error",
        _ => "info",
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Configure Rayon thread pool
    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("failed to configure thread pool")?;
        info!(threads, "thread pool configured");
    }

    match cli.command {
        Command::Train {
            data,
            id_column,
            experiment,
            output_dir,
            forest,
        } => {
            let experiment_name = ExperimentName::new(experiment.clone())?;
            let config = build_config(&forest, cli.seed)?;

            let dataset = reader_for(&data, id_column)
                .read()
                .context("failed to read input CSV")?;

            let result = match forest.max_runtime_secs {
                Some(secs) => {
                    let budget = Duration::try_from_secs_f64(secs)
                        .with_context(|| format!("invalid --max-runtime-secs {secs}"))?;
                    config.fit_with_observer(dataset.frame(), &mut MaxRuntime::new(budget))
                }
                None => config.fit(dataset.frame()),
            }
            .context("training failed")?;

            let writer = ResultWriter::new(&output_dir, experiment_name)?;
            let model_path = writer.model_path();
            result
                .model()
                .save(&model_path)
                .context("failed to save model")?;
            let report_path = writer.write_training(&result)?;

            let metadata = result.metadata();
            let output = TrainOutput {
                experiment,
                n_rows: metadata.n_rows,
                n_features: metadata.n_features,
                ntrees_trained: metadata.ntrees_trained,
                cancelled: metadata.cancelled,
                seed: metadata.seed,
                mean_anomaly_score: result.history().last().and_then(|e| e.mean_anomaly_score),
                model_path,
                report_path,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Command::Score {
            model,
            data,
            id_column,
            experiment,
            output_dir,
        } => {
            let experiment_name = ExperimentName::new(experiment.clone())?;
            let forest = IsolationForest::load(&model).context("failed to load model")?;
            info!(ntrees = forest.ntrees(), n_features = forest.n_features(), "model loaded");

            let dataset = reader_for(&data, id_column)
                .read_for_model(&forest)
                .context("failed to read input CSV")?;
            let scores = forest
                .score_frame(dataset.frame())
                .context("scoring failed")?;

            let writer = ResultWriter::new(&output_dir, experiment_name)?;
            let scores_path = writer.write_scores(&forest, dataset.row_ids(), &scores)?;

            let mean_score = scores.iter().map(|s| s.normalized).sum::<f64>() / scores.len() as f64;
            let max_score = scores.iter().map(|s| s.normalized).fold(f64::NEG_INFINITY, f64::max);
            let output = ScoreOutput {
                experiment,
                n_rows: dataset.n_rows(),
                model_ntrees: forest.ntrees(),
                mean_score,
                max_score,
                scores_path,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Command::Graph {
            model,
            tree,
            experiment,
            output_dir,
        } => {
            let experiment_name = ExperimentName::new(experiment.clone())?;
            let forest = IsolationForest::load(&model).context("failed to load model")?;
            if let Some(index) = tree {
                forest.tree(index)?;
            }

            let writer = ResultWriter::new(&output_dir, experiment_name)?;
            let graph_path = writer.write_graph(&forest, tree)?;

            let output = GraphOutput {
                experiment,
                tree,
                ntrees: forest.ntrees(),
                graph_path,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
