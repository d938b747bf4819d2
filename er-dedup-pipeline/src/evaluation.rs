use er_dedup::dto::{detected_duplicates, Block, CandidatePair, EntityProfile, EquivalenceCluster};
use er_dedup::report::{BlockingStats, ClusterStats};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::warn;

/// Known duplicates of a single dataset, keyed by entity index.
#[derive(Debug, Default)]
pub struct GroundTruthIndex {
    duplicates: FxHashMap<usize, FxHashSet<usize>>,
    pairs: Vec<CandidatePair>,
    unresolved: usize,
}

impl GroundTruthIndex {
    ///
    /// Resolves identifier pairs against the loaded profiles. Pairs naming
    /// an unknown identifier, or the same entity twice, are skipped.
    ///
    pub fn from_identifier_pairs<I>(profiles: &[EntityProfile], pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let lookup: FxHashMap<&str, usize> = profiles
            .iter()
            .map(|profile| (profile.entity_url.as_str(), profile.index))
            .collect();
        let mut unresolved = 0;
        let mut resolved = Vec::new();
        for (left, right) in pairs {
            match (lookup.get(left.as_str()), lookup.get(right.as_str())) {
                (Some(&a), Some(&b)) if a != b => resolved.push((a, b)),
                _ => unresolved += 1,
            }
        }
        if unresolved > 0 {
            warn!(
                "{} ground-truth pairs reference unknown identifiers and were skipped",
                unresolved
            );
        }
        let mut index = Self::from_index_pairs(resolved);
        index.unresolved = unresolved;
        index
    }

    pub fn from_index_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (usize, usize)>,
    {
        let mut unique: Vec<CandidatePair> = pairs
            .into_iter()
            .filter_map(|(a, b)| CandidatePair::new(a, b))
            .collect();
        unique.sort_unstable();
        unique.dedup();
        let mut duplicates: FxHashMap<usize, FxHashSet<usize>> = FxHashMap::default();
        for pair in &unique {
            duplicates.entry(pair.left()).or_default().insert(pair.right());
            duplicates.entry(pair.right()).or_default().insert(pair.left());
        }
        GroundTruthIndex {
            duplicates,
            pairs: unique,
            unresolved: 0,
        }
    }

    pub fn is_duplicate(&self, a: usize, b: usize) -> bool {
        self.duplicates_of(a)
            .map_or(false, |known| known.contains(&b))
    }

    pub fn duplicates_of(&self, entity: usize) -> Option<&FxHashSet<usize>> {
        self.duplicates.get(&entity)
    }

    pub fn existing_duplicates(&self) -> usize {
        self.pairs.len()
    }

    pub fn unresolved(&self) -> usize {
        self.unresolved
    }
}

/// Read-only quality measurement of pipeline output. Never feeds back into
/// detection.
pub struct Evaluator<'a> {
    ground_truth: &'a GroundTruthIndex,
    num_entities: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(ground_truth: &'a GroundTruthIndex, num_entities: usize) -> Self {
        Evaluator {
            ground_truth,
            num_entities,
        }
    }

    /// Recall and reduction of a block collection.
    pub fn blocks_stats(&self, stage: &str, blocks: &[Block]) -> BlockingStats {
        let mut entity_blocks: FxHashMap<usize, Vec<usize>> = FxHashMap::default();
        for (block_id, block) in blocks.iter().enumerate() {
            for &entity in &block.entities {
                entity_blocks.entry(entity).or_default().push(block_id);
            }
        }
        let detected = self
            .ground_truth
            .pairs
            .iter()
            .filter(|pair| {
                match (
                    entity_blocks.get(&pair.left()),
                    entity_blocks.get(&pair.right()),
                ) {
                    (Some(a), Some(b)) => share_element(a, b),
                    _ => false,
                }
            })
            .count();
        let comparisons = blocks.iter().map(Block::comparisons).sum();
        let distinct = distinct_comparisons(blocks);
        self.blocking_stats(stage, blocks.len(), comparisons, distinct, detected)
    }

    /// Recall and reduction of the final candidate pairs.
    pub fn pairs_stats(&self, stage: &str, pairs: &[CandidatePair]) -> BlockingStats {
        let detected = pairs
            .iter()
            .filter(|pair| self.ground_truth.is_duplicate(pair.left(), pair.right()))
            .count();
        let comparisons = pairs.len() as u64;
        self.blocking_stats(stage, pairs.len(), comparisons, comparisons, detected)
    }

    fn blocking_stats(
        &self,
        stage: &str,
        blocks: usize,
        comparisons: u64,
        distinct_comparisons: u64,
        detected: usize,
    ) -> BlockingStats {
        let existing = self.ground_truth.existing_duplicates();
        let n = self.num_entities as f64;
        let all_pairs = n * (n - 1.0) / 2.0;
        let pair_completeness = ratio(detected as f64, existing as f64);
        let pairs_quality = ratio(detected as f64, comparisons as f64);
        BlockingStats {
            stage: stage.to_string(),
            blocks,
            comparisons,
            detected_duplicates: detected,
            existing_duplicates: existing,
            pair_completeness,
            pairs_quality,
            reduction_ratio: if all_pairs > 0.0 {
                1.0 - distinct_comparisons as f64 / all_pairs
            } else {
                0.0
            },
            f_measure: f_measure(pair_completeness, pairs_quality),
        }
    }

    /// Precision, recall and F-measure of the pairs implied by `clusters`.
    pub fn cluster_stats(&self, clusters: &[EquivalenceCluster]) -> ClusterStats {
        let reported = detected_duplicates(clusters);
        let true_positives = reported
            .iter()
            .filter(|pair| self.ground_truth.is_duplicate(pair.left(), pair.right()))
            .count();
        let existing = self.ground_truth.existing_duplicates();
        let precision = ratio(true_positives as f64, reported.len() as f64);
        let recall = ratio(true_positives as f64, existing as f64);
        ClusterStats {
            clusters: clusters.len(),
            reported_duplicates: reported.len(),
            true_positives,
            existing_duplicates: existing,
            precision,
            recall,
            f_measure: f_measure(precision, recall),
        }
    }
}

/// Number of different pairs co-occurring in at least one block.
fn distinct_comparisons(blocks: &[Block]) -> u64 {
    let mut pairs: FxHashSet<CandidatePair> = FxHashSet::default();
    for block in blocks {
        for (i, &left) in block.entities.iter().enumerate() {
            for &right in &block.entities[i + 1..] {
                if let Some(pair) = CandidatePair::new(left, right) {
                    pairs.insert(pair);
                }
            }
        }
    }
    pairs.len() as u64
}

/// Whether two ascending lists intersect.
fn share_element(a: &[usize], b: &[usize]) -> bool {
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => return true,
        }
    }
    false
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

fn f_measure(precision: f64, recall: f64) -> f64 {
    ratio(2.0 * precision * recall, precision + recall)
}
