use crate::blocking::BlockingStrategy;
use crate::cleaning::{PurgingStrategy, DEFAULT_KEEP_FRACTION};
use crate::clustering::ClusteringStrategy;
use crate::matching::{FeatureModel, RepresentationModel, SimilarityMetric};
use crate::pruning::{PruningStrategy, WeightingScheme};
use clap::ValueEnum;
use er_dedup::error::ServiceError;
use er_dedup::util::read_object;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What happens to the rest of a multi-dataset run when one dataset fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Abort the whole run; no output file is written.
    #[default]
    FailFast,
    /// Record the failure in the report and continue with the next dataset.
    Isolate,
}

/// Algorithm choices of the resolution pipeline.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowConfig {
    pub blocking: BlockingStrategy,
    pub purging: PurgingStrategy,
    /// Fraction of its smallest blocks each profile keeps, in (0, 1].
    pub keep_fraction: f64,
    pub pruning: PruningStrategy,
    pub representation: RepresentationModel,
    pub similarity: SimilarityMetric,
    pub clustering: ClusteringStrategy,
    /// Minimum similarity, in (0, 1], for two profiles to be linked.
    pub threshold: f64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        WorkflowConfig {
            blocking: BlockingStrategy::default(),
            purging: PurgingStrategy::default(),
            keep_fraction: DEFAULT_KEEP_FRACTION,
            pruning: PruningStrategy::default(),
            representation: RepresentationModel::default(),
            similarity: SimilarityMetric::Cosine,
            clustering: ClusteringStrategy::Center,
            threshold: 0.5,
        }
    }
}

impl WorkflowConfig {
    /// Token blocking, cardinality pruning, TF-IDF four-grams with sigma
    /// similarity and connected components at 0.8.
    pub fn token_components() -> Self {
        WorkflowConfig {
            blocking: BlockingStrategy::Token,
            purging: PurgingStrategy::default(),
            keep_fraction: 0.8,
            pruning: PruningStrategy::CardinalityNode {
                scheme: WeightingScheme::Js,
            },
            representation: RepresentationModel {
                features: FeatureModel::CharacterNgrams { n: 4 },
                tf_idf: true,
            },
            similarity: SimilarityMetric::Sigma,
            clustering: ClusteringStrategy::ConnectedComponents,
            threshold: 0.8,
        }
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        if let BlockingStrategy::QGrams { q } = self.blocking {
            if q == 0 {
                return Err(ServiceError::configuration("q-gram length must be positive"));
            }
        }
        match self.purging {
            PurgingStrategy::Comparisons { smoothing_factor } if !(smoothing_factor > 0.0) => {
                return Err(ServiceError::configuration(format!(
                    "smoothing factor must be positive, got {}",
                    smoothing_factor
                )));
            }
            PurgingStrategy::Size { max_fraction } if !(max_fraction > 0.0 && max_fraction <= 1.0) => {
                return Err(ServiceError::configuration(format!(
                    "maximum block fraction must lie in (0, 1], got {}",
                    max_fraction
                )));
            }
            _ => {}
        }
        if !(self.keep_fraction > 0.0 && self.keep_fraction <= 1.0) {
            return Err(ServiceError::configuration(format!(
                "keep fraction must lie in (0, 1], got {}",
                self.keep_fraction
            )));
        }
        let n = match self.representation.features {
            FeatureModel::TokenNgrams { n } | FeatureModel::CharacterNgrams { n } => n,
        };
        if n == 0 {
            return Err(ServiceError::configuration("n-gram length must be positive"));
        }
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(ServiceError::configuration(format!(
                "threshold must lie in (0, 1], got {}",
                self.threshold
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolutionConfig {
    pub inputs: Vec<PathBuf>,
    /// Header of the column holding each row's identifier.
    pub id_column: String,
    pub ground_truth: Option<PathBuf>,
    pub output: PathBuf,
    pub report: Option<PathBuf>,
    pub failure_policy: FailurePolicy,
    #[serde(flatten)]
    pub workflow: WorkflowConfig,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        ResolutionConfig {
            inputs: vec![PathBuf::from("X1.csv"), PathBuf::from("X2.csv")],
            id_column: String::from("instance_id"),
            ground_truth: None,
            output: PathBuf::from("output.csv"),
            report: None,
            failure_policy: FailurePolicy::default(),
            workflow: WorkflowConfig::default(),
        }
    }
}

impl ResolutionConfig {
    /// Reads a JSON configuration file. Absent fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ServiceError> {
        let bytes = read_object(path)?;
        serde_json::from_slice(&bytes).map_err(|err| {
            ServiceError::configuration(format!("Invalid configuration {}: {}", path.display(), err))
        })
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.inputs.is_empty() {
            return Err(ServiceError::configuration("no input dataset given"));
        }
        if self.id_column.trim().is_empty() {
            return Err(ServiceError::configuration("identifier column must not be empty"));
        }
        self.workflow.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use er_dedup::error::ErrorKind;

    #[test]
    fn defaults_are_valid() {
        assert!(ResolutionConfig::default().validate().is_ok());
        assert!(WorkflowConfig::token_components().validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: ResolutionConfig = serde_json::from_str(
            r#"{
                "inputs": ["X3.csv"],
                "blocking": {"type": "token"},
                "pruning": {"type": "cardinality-node", "scheme": "arcs"},
                "representation": "token-bigrams-tf-idf",
                "similarity": "sigma",
                "clustering": "connected-components",
                "threshold": 0.8,
                "failurePolicy": "isolate"
            }"#,
        )
        .unwrap();
        assert_eq!(config.inputs, vec![PathBuf::from("X3.csv")]);
        assert_eq!(config.id_column, "instance_id");
        assert_eq!(config.failure_policy, FailurePolicy::Isolate);
        assert_eq!(config.workflow.blocking, BlockingStrategy::Token);
        assert_eq!(
            config.workflow.pruning,
            PruningStrategy::CardinalityNode {
                scheme: WeightingScheme::Arcs
            }
        );
        assert_eq!(config.workflow.keep_fraction, 0.5);
        assert_eq!(config.workflow.threshold, 0.8);
        assert!(config.workflow.representation.tf_idf);
    }

    #[test]
    fn purging_variants_parse() {
        let config: WorkflowConfig =
            serde_json::from_str(r#"{"purging": {"type": "size", "maxFraction": 0.1}}"#).unwrap();
        assert_eq!(config.purging, PurgingStrategy::Size { max_fraction: 0.1 });
        let config: WorkflowConfig =
            serde_json::from_str(r#"{"purging": {"type": "disabled"}}"#).unwrap();
        assert_eq!(config.purging, PurgingStrategy::Disabled);
    }

    #[test]
    fn out_of_range_values_are_configuration_errors() {
        let cases = vec![
            WorkflowConfig {
                keep_fraction: 0.0,
                ..Default::default()
            },
            WorkflowConfig {
                keep_fraction: 1.5,
                ..Default::default()
            },
            WorkflowConfig {
                threshold: 0.0,
                ..Default::default()
            },
            WorkflowConfig {
                threshold: f64::NAN,
                ..Default::default()
            },
            WorkflowConfig {
                blocking: BlockingStrategy::QGrams { q: 0 },
                ..Default::default()
            },
            WorkflowConfig {
                purging: PurgingStrategy::Size { max_fraction: 0.0 },
                ..Default::default()
            },
            WorkflowConfig {
                representation: RepresentationModel {
                    features: FeatureModel::TokenNgrams { n: 0 },
                    tf_idf: false,
                },
                ..Default::default()
            },
        ];
        for case in cases {
            let err = case.validate().unwrap_err();
            assert_eq!(err.kind, ErrorKind::Configuration, "{:?}", case);
        }
    }

    #[test]
    fn io_options_are_checked() {
        let config = ResolutionConfig {
            inputs: vec![],
            ..Default::default()
        };
        assert_eq!(config.validate().unwrap_err().kind, ErrorKind::Configuration);

        let config = ResolutionConfig {
            id_column: String::from("  "),
            ..Default::default()
        };
        assert_eq!(config.validate().unwrap_err().kind, ErrorKind::Configuration);

        let config = ResolutionConfig {
            ground_truth: Some(PathBuf::from("GT.csv")),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_representation_in_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"representation": "character-twelvegrams"}"#).unwrap();
        let err = ResolutionConfig::from_json_file(&path).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);

        let missing = ResolutionConfig::from_json_file(&dir.path().join("nope.json")).unwrap_err();
        assert_eq!(missing.kind, ErrorKind::ResourceNotFound);
    }
}
