use clap::ValueEnum;
use er_dedup::dto::{Block, CandidatePair};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

/// Edge weight of the blocking graph, derived from block co-occurrence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum WeightingScheme {
    /// Common blocks scheme: number of shared blocks.
    Cbs,
    /// Jaccard similarity of the two block-membership sets.
    Js,
    /// Aggregate reciprocal comparisons: shared small blocks weigh more.
    Arcs,
    /// Common blocks scaled by how selective each entity's memberships are.
    Ecbs,
}

impl Default for WeightingScheme {
    fn default() -> Self {
        WeightingScheme::Js
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PruningStrategy {
    /// Every node keeps its top-k edges; an edge kept by either end survives.
    CardinalityNode { scheme: WeightingScheme },
    /// An edge survives if it reaches the mean weight of either endpoint.
    WeightedNode { scheme: WeightingScheme },
    /// An edge survives if it reaches the mean weight of the whole graph.
    WeightedEdge { scheme: WeightingScheme },
}

impl Default for PruningStrategy {
    fn default() -> Self {
        PruningStrategy::WeightedNode {
            scheme: WeightingScheme::Js,
        }
    }
}

/// Co-occurrence counters of one neighbour.
#[derive(Default, Clone, Copy)]
struct Cooccurrence {
    common_blocks: u32,
    reciprocal_comparisons: f64,
}

/// Reverse index from entity to the blocks it belongs to.
struct EntityIndex<'a> {
    blocks: &'a [Block],
    entity_blocks: Vec<Vec<usize>>,
}

impl<'a> EntityIndex<'a> {
    fn new(blocks: &'a [Block]) -> Self {
        let num_entities = blocks
            .iter()
            .flat_map(|block| block.entities.iter())
            .max()
            .map_or(0, |&max| max + 1);
        let mut entity_blocks = vec![Vec::new(); num_entities];
        for (block_id, block) in blocks.iter().enumerate() {
            for &entity in &block.entities {
                entity_blocks[entity].push(block_id);
            }
        }
        EntityIndex {
            blocks,
            entity_blocks,
        }
    }

    fn num_entities(&self) -> usize {
        self.entity_blocks.len()
    }

    /// Entities with at least one block membership.
    fn active_entities(&self) -> usize {
        self.entity_blocks.iter().filter(|b| !b.is_empty()).count()
    }

    fn total_assignments(&self) -> usize {
        self.entity_blocks.iter().map(Vec::len).sum()
    }

    ///
    /// Weighted edges of `entity`, sorted by neighbour index.
    ///
    /// Shared blocks are visited in block order from either endpoint, so
    /// the weight of an edge does not depend on which end computes it.
    ///
    fn neighbourhood(&self, entity: usize, scheme: WeightingScheme) -> Vec<(usize, f64)> {
        let mut counters: FxHashMap<usize, Cooccurrence> = FxHashMap::default();
        for &block_id in &self.entity_blocks[entity] {
            let block = &self.blocks[block_id];
            let reciprocal = 1.0 / block.comparisons() as f64;
            for &neighbour in &block.entities {
                if neighbour == entity {
                    continue;
                }
                let counter = counters.entry(neighbour).or_default();
                counter.common_blocks += 1;
                counter.reciprocal_comparisons += reciprocal;
            }
        }
        let mut edges: Vec<(usize, f64)> = counters
            .into_iter()
            .map(|(neighbour, counter)| (neighbour, self.weight(entity, neighbour, counter, scheme)))
            .collect();
        edges.sort_unstable_by_key(|&(neighbour, _)| neighbour);
        edges
    }

    fn weight(&self, a: usize, b: usize, counter: Cooccurrence, scheme: WeightingScheme) -> f64 {
        let common = counter.common_blocks as f64;
        let blocks_a = self.entity_blocks[a].len() as f64;
        let blocks_b = self.entity_blocks[b].len() as f64;
        match scheme {
            WeightingScheme::Cbs => common,
            WeightingScheme::Js => common / (blocks_a + blocks_b - common),
            WeightingScheme::Arcs => counter.reciprocal_comparisons,
            WeightingScheme::Ecbs => {
                let total = self.blocks.len() as f64;
                let (low, high) = if a < b {
                    (blocks_a, blocks_b)
                } else {
                    (blocks_b, blocks_a)
                };
                common * ((total / low).ln() * (total / high).ln())
            }
        }
    }
}

impl PruningStrategy {
    pub fn scheme(&self) -> WeightingScheme {
        match self {
            PruningStrategy::CardinalityNode { scheme }
            | PruningStrategy::WeightedNode { scheme }
            | PruningStrategy::WeightedEdge { scheme } => *scheme,
        }
    }

    ///
    /// Reduces the co-occurrence graph of `blocks` to the pairs worth
    /// comparing.
    ///
    /// The result is sorted and every unordered pair appears once, smaller
    /// index first, no matter how many blocks it shared.
    ///
    pub fn prune(&self, blocks: &[Block]) -> Vec<CandidatePair> {
        let index = EntityIndex::new(blocks);
        let scheme = self.scheme();
        let mut neighbourhoods: Vec<Vec<(usize, f64)>> = (0..index.num_entities())
            .into_par_iter()
            .map(|entity| index.neighbourhood(entity, scheme))
            .collect();

        let mut pairs: Vec<CandidatePair> = match self {
            PruningStrategy::CardinalityNode { .. } => {
                let k = (index.total_assignments() / index.active_entities().max(1)).max(1);
                debug!("Cardinality node pruning keeps top {} edges per node", k);
                neighbourhoods
                    .par_iter_mut()
                    .enumerate()
                    .flat_map_iter(|(entity, edges)| {
                        edges.sort_by(|a, b| match b.1.total_cmp(&a.1) {
                            Ordering::Equal => a.0.cmp(&b.0),
                            other => other,
                        });
                        edges
                            .iter()
                            .take(k)
                            .filter_map(move |&(neighbour, _)| CandidatePair::new(entity, neighbour))
                            .collect::<Vec<_>>()
                    })
                    .collect()
            }
            PruningStrategy::WeightedNode { .. } => {
                let averages: Vec<f64> = neighbourhoods.iter().map(|edges| mean_weight(edges)).collect();
                neighbourhoods
                    .par_iter()
                    .enumerate()
                    .flat_map_iter(|(entity, edges)| {
                        let averages = &averages;
                        edges
                            .iter()
                            .filter(move |&&(neighbour, weight)| {
                                entity < neighbour
                                    && (averages[entity] <= weight || averages[neighbour] <= weight)
                            })
                            .filter_map(move |&(neighbour, _)| CandidatePair::new(entity, neighbour))
                    })
                    .collect()
            }
            PruningStrategy::WeightedEdge { .. } => {
                let (sum, count) = neighbourhoods
                    .iter()
                    .enumerate()
                    .flat_map(|(entity, edges)| {
                        edges.iter().filter(move |&&(neighbour, _)| entity < neighbour)
                    })
                    .fold((0.0, 0usize), |(sum, count), &(_, weight)| (sum + weight, count + 1));
                let threshold = if count == 0 { 0.0 } else { sum / count as f64 };
                debug!("Weighted edge pruning threshold {:.6}", threshold);
                neighbourhoods
                    .par_iter()
                    .enumerate()
                    .flat_map_iter(|(entity, edges)| {
                        edges
                            .iter()
                            .filter(move |&&(neighbour, weight)| {
                                entity < neighbour && threshold <= weight
                            })
                            .filter_map(move |&(neighbour, _)| CandidatePair::new(entity, neighbour))
                    })
                    .collect()
            }
        };
        pairs.sort_unstable();
        pairs.dedup();
        debug!("Pruning retained {} candidate pairs", pairs.len());
        pairs
    }
}

fn mean_weight(edges: &[(usize, f64)]) -> f64 {
    if edges.is_empty() {
        0.0
    } else {
        edges.iter().map(|&(_, weight)| weight).sum::<f64>() / edges.len() as f64
    }
}
