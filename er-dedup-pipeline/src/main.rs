mod blocking;
mod cleaning;
mod clustering;
mod config;
mod evaluation;
mod matching;
mod pruning;
mod util;
mod workflow;

use blocking::{BlockingStrategy, DEFAULT_Q};
use cleaning::{PurgingStrategy, DEFAULT_MAX_BLOCK_FRACTION, DEFAULT_SMOOTHING_FACTOR};
use clap::{Parser, ValueEnum};
use clustering::ClusteringStrategy;
use config::{FailurePolicy, ResolutionConfig, WorkflowConfig};
use er_dedup::error::ServiceError;
use er_dedup::report::{make_report_payload, DatasetReport, DatasetStatus};
use er_dedup::util::{check_writable, get_env_var};
use evaluation::GroundTruthIndex;
use matching::{RepresentationModel, SimilarityMetric};
use pruning::{PruningStrategy, WeightingScheme};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use workflow::Workflow;

const CONFIG_ENV_VAR: &str = "ER_DEDUP_CONFIG";

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Preset {
    /// Q-gram blocking, weighted node pruning, center clustering at 0.5.
    QgramCenter,
    /// Token blocking, cardinality node pruning, connected components at 0.8.
    TokenComponents,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BlockingArg {
    Token,
    QGrams,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum PurgingArg {
    Comparisons,
    Size,
    Disabled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum PruningArg {
    CardinalityNode,
    WeightedNode,
    WeightedEdge,
}

/// Detects duplicate records in headered CSV datasets.
#[derive(Debug, Parser)]
#[command(name = "er-dedup-pipeline", version)]
struct Args {
    /// Input dataset; repeat for several. Defaults to X1.csv and X2.csv.
    #[arg(short = 'x', long = "input", value_name = "PATH")]
    inputs: Vec<PathBuf>,
    /// Ground-truth pairs; every input is evaluated against it.
    #[arg(long = "gt", value_name = "PATH")]
    ground_truth: Option<PathBuf>,
    #[arg(short = 'o', long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// JSON configuration file, also read from ER_DEDUP_CONFIG.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    #[arg(long, value_enum)]
    preset: Option<Preset>,
    #[arg(long, value_name = "NAME")]
    id_column: Option<String>,
    #[arg(long, value_enum)]
    blocking: Option<BlockingArg>,
    /// Q-gram length for q-gram blocking.
    #[arg(long)]
    q: Option<usize>,
    #[arg(long, value_enum)]
    purging: Option<PurgingArg>,
    #[arg(long)]
    keep_fraction: Option<f64>,
    #[arg(long, value_enum)]
    pruning: Option<PruningArg>,
    #[arg(long, value_enum)]
    weighting: Option<WeightingScheme>,
    /// For example `character-bigrams` or `token-unigrams-tf-idf`.
    #[arg(long, value_name = "NAME")]
    representation: Option<RepresentationModel>,
    #[arg(long, value_enum)]
    similarity: Option<SimilarityMetric>,
    #[arg(long, value_enum)]
    clustering: Option<ClusteringStrategy>,
    #[arg(long)]
    threshold: Option<f64>,
    #[arg(long, value_enum)]
    failure_policy: Option<FailurePolicy>,
    /// Where to write the JSON run report.
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

impl Args {
    ///
    /// Layers defaults, the configuration file, the preset and finally the
    /// individual flags, each overriding the one before.
    ///
    fn into_config(self) -> Result<ResolutionConfig, ServiceError> {
        let config_path = match self.config.clone() {
            Some(path) => Some(path),
            None => get_env_var(CONFIG_ENV_VAR).ok().map(PathBuf::from),
        };
        let mut config = match config_path {
            Some(path) => ResolutionConfig::from_json_file(&path)?,
            None => ResolutionConfig::default(),
        };
        match self.preset {
            Some(Preset::QgramCenter) => config.workflow = WorkflowConfig::default(),
            Some(Preset::TokenComponents) => config.workflow = WorkflowConfig::token_components(),
            None => {}
        }

        if !self.inputs.is_empty() {
            config.inputs = self.inputs;
        }
        if let Some(path) = self.ground_truth {
            config.ground_truth = Some(path);
        }
        if let Some(path) = self.output {
            config.output = path;
        }
        if let Some(path) = self.report {
            config.report = Some(path);
        }
        if let Some(column) = self.id_column {
            config.id_column = column;
        }
        if let Some(policy) = self.failure_policy {
            config.failure_policy = policy;
        }

        let workflow = &mut config.workflow;
        match self.blocking {
            Some(BlockingArg::Token) => workflow.blocking = BlockingStrategy::Token,
            Some(BlockingArg::QGrams) => {
                let q = match workflow.blocking {
                    BlockingStrategy::QGrams { q } => q,
                    BlockingStrategy::Token => DEFAULT_Q,
                };
                workflow.blocking = BlockingStrategy::QGrams { q };
            }
            None => {}
        }
        if let Some(q) = self.q {
            match workflow.blocking {
                BlockingStrategy::QGrams { .. } => workflow.blocking = BlockingStrategy::QGrams { q },
                BlockingStrategy::Token => {
                    return Err(ServiceError::configuration(
                        "--q only applies to q-gram blocking",
                    ))
                }
            }
        }
        if let Some(purging) = self.purging {
            workflow.purging = match purging {
                PurgingArg::Comparisons => PurgingStrategy::Comparisons {
                    smoothing_factor: DEFAULT_SMOOTHING_FACTOR,
                },
                PurgingArg::Size => PurgingStrategy::Size {
                    max_fraction: DEFAULT_MAX_BLOCK_FRACTION,
                },
                PurgingArg::Disabled => PurgingStrategy::Disabled,
            };
        }
        if let Some(keep_fraction) = self.keep_fraction {
            workflow.keep_fraction = keep_fraction;
        }
        let scheme = self.weighting.unwrap_or_else(|| workflow.pruning.scheme());
        workflow.pruning = match self.pruning {
            Some(PruningArg::CardinalityNode) => PruningStrategy::CardinalityNode { scheme },
            Some(PruningArg::WeightedNode) => PruningStrategy::WeightedNode { scheme },
            Some(PruningArg::WeightedEdge) => PruningStrategy::WeightedEdge { scheme },
            None => match workflow.pruning {
                PruningStrategy::CardinalityNode { .. } => {
                    PruningStrategy::CardinalityNode { scheme }
                }
                PruningStrategy::WeightedNode { .. } => PruningStrategy::WeightedNode { scheme },
                PruningStrategy::WeightedEdge { .. } => PruningStrategy::WeightedEdge { scheme },
            },
        };
        if let Some(representation) = self.representation {
            workflow.representation = representation;
        }
        if let Some(similarity) = self.similarity {
            workflow.similarity = similarity;
        }
        if let Some(clustering) = self.clustering {
            workflow.clustering = clustering;
        }
        if let Some(threshold) = self.threshold {
            workflow.threshold = threshold;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = Args::parse().into_config().and_then(|config| resolve(&config));
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::from(err.kind.code())
        }
    }
}

///
/// Runs every input dataset through the workflow and writes one combined
/// output file. Returns the run report.
///
/// Under `FailFast` the first failing dataset aborts the run before anything
/// is written. Under `Isolate` it is recorded as failed and the run goes on.
/// An unreadable ground-truth file fails the run before any dataset.
///
fn resolve(config: &ResolutionConfig) -> Result<Value, ServiceError> {
    check_writable(&config.output)?;
    if let Some(report) = &config.report {
        check_writable(report)?;
    }
    let ground_truth = match &config.ground_truth {
        Some(path) => {
            let pairs = util::pull_ground_truth(path)?;
            info!("Loaded {} ground-truth pairs from {}", pairs.len(), path.display());
            Some(pairs)
        }
        None => None,
    };
    info!("Configuration: {:?}", config.workflow);

    let start = Instant::now();
    let workflow = Workflow::new(config.workflow.clone());
    let mut reports = Vec::with_capacity(config.inputs.len());
    let mut duplicates = Vec::new();
    for path in &config.inputs {
        match resolve_dataset(&workflow, path, &config.id_column, ground_truth.as_deref()) {
            Ok((report, found)) => {
                duplicates.extend(found);
                reports.push(report);
            }
            Err(err) => match config.failure_policy {
                FailurePolicy::FailFast => return Err(err),
                FailurePolicy::Isolate => {
                    error!("Dataset {} failed: {}", path.display(), err);
                    reports.push(DatasetReport::failed(path.display().to_string(), err));
                }
            },
        }
    }

    util::push_result_file(&config.output, &duplicates)?;
    info!(
        "Wrote {} duplicate pairs to {} in {:.4} secs",
        duplicates.len(),
        config.output.display(),
        start.elapsed().as_secs_f64()
    );
    let payload = make_report_payload(&reports, duplicates.len())?;
    if let Some(report) = &config.report {
        util::push_report_file(report, &payload)?;
    }
    Ok(payload)
}

/// Resolves one dataset into identifier pairs, lower profile index first.
fn resolve_dataset(
    workflow: &Workflow,
    path: &Path,
    id_column: &str,
    ground_truth: Option<&[(String, String)]>,
) -> Result<(DatasetReport, Vec<(String, String)>), ServiceError> {
    let start = Instant::now();
    let dataset = util::pull_data_file(path, id_column)?;
    info!(
        "Loaded {} profiles from {} in {:.4} secs, {} rows skipped",
        dataset.profiles.len(),
        path.display(),
        start.elapsed().as_secs_f64(),
        dataset.skipped_rows
    );
    let profiles = &dataset.profiles;
    let output = workflow.apply(profiles);
    let found: Vec<(String, String)> = output
        .detected_duplicates()
        .iter()
        .map(|pair| {
            (
                profiles[pair.left()].entity_url.clone(),
                profiles[pair.right()].entity_url.clone(),
            )
        })
        .collect();
    info!(
        "Detected {} duplicate pairs in {} ({:.4} secs in workflow)",
        found.len(),
        path.display(),
        output.timings.total_secs()
    );

    let evaluation = ground_truth.map(|pairs| {
        let index = GroundTruthIndex::from_identifier_pairs(profiles, pairs.iter().cloned());
        workflow.evaluate(&output, profiles, &index)
    });

    let report = DatasetReport {
        path: path.display().to_string(),
        status: DatasetStatus::Completed,
        profiles: profiles.len(),
        skipped_rows: dataset.skipped_rows,
        compared_pairs: output.scored.len(),
        detected_duplicates: found.len(),
        timings: output.timings.clone(),
        evaluation,
        error: None,
    };
    Ok((report, found))
}
