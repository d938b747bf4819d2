use crate::cleaning::filter_blocks;
use crate::config::WorkflowConfig;
use crate::evaluation::{Evaluator, GroundTruthIndex};
use crate::matching::ProfileMatcher;
use er_dedup::dto::{
    detected_duplicates, Block, CandidatePair, EntityProfile, EquivalenceCluster, SimilarityPair,
};
use er_dedup::report::{Evaluation, Timings};
use std::time::Instant;
use tracing::info;

/// Block collection as it stood after one blocking stage.
pub struct BlockStage {
    pub name: &'static str,
    pub blocks: Vec<Block>,
}

/// Everything a run produced for one dataset.
pub struct WorkflowOutput {
    /// Built, purged and filtered blocks, in pipeline order.
    pub stages: Vec<BlockStage>,
    pub pairs: Vec<CandidatePair>,
    pub scored: Vec<SimilarityPair>,
    pub clusters: Vec<EquivalenceCluster>,
    pub timings: Timings,
}

impl WorkflowOutput {
    pub fn detected_duplicates(&self) -> Vec<CandidatePair> {
        detected_duplicates(&self.clusters)
    }
}

/// Fixed chain of blocking, cleaning, pruning, matching and clustering.
pub struct Workflow {
    config: WorkflowConfig,
}

impl Workflow {
    pub fn new(config: WorkflowConfig) -> Self {
        Workflow { config }
    }

    ///
    /// Resolves one dataset. Profile `i` of the slice must carry index `i`.
    ///
    /// Each stage reads the previous stage's output and builds a new one, so
    /// intermediate collections are kept for evaluation.
    ///
    pub fn apply(&self, profiles: &[EntityProfile]) -> WorkflowOutput {
        let config = &self.config;
        let start = Instant::now();
        let built = config.blocking.build_blocks(profiles);
        let purged = config.purging.purge(&built, profiles.len());
        let filtered = filter_blocks(&purged, config.keep_fraction);
        let pairs = config.pruning.prune(&filtered);
        let blocking_secs = start.elapsed().as_secs_f64();
        info!(
            "Blocking: {} built, {} after purging, {} after filtering, {} candidate pairs in {:.4} secs",
            built.len(),
            purged.len(),
            filtered.len(),
            pairs.len(),
            blocking_secs
        );

        let start = Instant::now();
        let matcher = ProfileMatcher::new(profiles, config.representation, config.similarity);
        let scored = matcher.execute_comparisons(&pairs);
        let clusters = config.clustering.get_duplicates(&scored, config.threshold);
        let matching_secs = start.elapsed().as_secs_f64();
        info!(
            "Matching: {} pairs scored, {} clusters in {:.4} secs",
            scored.len(),
            clusters.len(),
            matching_secs
        );

        WorkflowOutput {
            stages: vec![
                BlockStage {
                    name: "built",
                    blocks: built,
                },
                BlockStage {
                    name: "purged",
                    blocks: purged,
                },
                BlockStage {
                    name: "filtered",
                    blocks: filtered,
                },
            ],
            pairs,
            scored,
            clusters,
            timings: Timings {
                blocking_secs,
                matching_secs,
            },
        }
    }

    /// Measures every stage of `output` against the ground truth.
    pub fn evaluate(
        &self,
        output: &WorkflowOutput,
        profiles: &[EntityProfile],
        ground_truth: &GroundTruthIndex,
    ) -> Evaluation {
        let evaluator = Evaluator::new(ground_truth, profiles.len());
        let mut blocking: Vec<_> = output
            .stages
            .iter()
            .map(|stage| evaluator.blocks_stats(stage.name, &stage.blocks))
            .collect();
        blocking.push(evaluator.pairs_stats("pruned", &output.pairs));
        let clustering = evaluator.cluster_stats(&output.clusters);
        info!(
            "Existing duplicates: {}, precision {:.4}, recall {:.4}, F-measure {:.4}",
            ground_truth.existing_duplicates(),
            clustering.precision,
            clustering.recall,
            clustering.f_measure
        );
        Evaluation {
            blocking,
            clustering,
            unresolved_pairs: ground_truth.unresolved(),
        }
    }
}
