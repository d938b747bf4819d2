use er_dedup::dto::Block;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

pub const DEFAULT_SMOOTHING_FACTOR: f64 = 1.025;
pub const DEFAULT_KEEP_FRACTION: f64 = 0.5;
pub const DEFAULT_MAX_BLOCK_FRACTION: f64 = 0.005;

/// Removes oversized blocks, typically those keyed on stop-word-like tokens.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PurgingStrategy {
    /// Cuts at the inflection point of the cumulative comparison distribution.
    #[serde(rename_all = "camelCase")]
    Comparisons { smoothing_factor: f64 },
    /// Drops blocks holding more than `max_fraction` of all profiles.
    #[serde(rename_all = "camelCase")]
    Size { max_fraction: f64 },
    Disabled,
}

impl Default for PurgingStrategy {
    fn default() -> Self {
        PurgingStrategy::Comparisons {
            smoothing_factor: DEFAULT_SMOOTHING_FACTOR,
        }
    }
}

impl PurgingStrategy {
    pub fn purge(&self, blocks: &[Block], num_entities: usize) -> Vec<Block> {
        let retained: Vec<Block> = match self {
            PurgingStrategy::Comparisons { smoothing_factor } => {
                match max_comparisons_per_block(blocks, *smoothing_factor) {
                    Some(max) => blocks
                        .iter()
                        .filter(|block| block.comparisons() <= max)
                        .cloned()
                        .collect(),
                    None => Vec::new(),
                }
            }
            PurgingStrategy::Size { max_fraction } => {
                let max_size = ((max_fraction * num_entities as f64).floor() as usize).max(2);
                blocks
                    .iter()
                    .filter(|block| block.size() <= max_size)
                    .cloned()
                    .collect()
            }
            PurgingStrategy::Disabled => blocks.to_vec(),
        };
        debug!("Purging kept {} of {} blocks", retained.len(), blocks.len());
        retained
    }
}

struct CostLevel {
    comparisons: u64,
    /// Cumulative entity assignments of all blocks up to this level.
    assignments: f64,
    /// Cumulative comparisons of all blocks up to this level.
    total_comparisons: f64,
}

///
/// Largest per-block comparison count that survives purging.
///
/// Blocks are grouped into distinct cost levels, ascending. Walking from the
/// most expensive level down, the walk stops where the ratio of assignments
/// to comparisons stops growing by more than `smoothing_factor`; the cost of
/// the level visited just before is the cutoff. The two cheapest levels
/// always survive, and a single cost level is never purged.
///
fn max_comparisons_per_block(blocks: &[Block], smoothing_factor: f64) -> Option<u64> {
    let mut costs: Vec<(u64, usize)> = blocks
        .iter()
        .map(|block| (block.comparisons(), block.size()))
        .collect();
    costs.sort_unstable();

    let mut levels: Vec<CostLevel> = Vec::new();
    for (comparisons, size) in costs {
        match levels.last_mut() {
            Some(level) if level.comparisons == comparisons => {
                level.assignments += size as f64;
                level.total_comparisons += comparisons as f64;
            }
            _ => {
                let (assignments, total_comparisons) = levels
                    .last()
                    .map_or((0.0, 0.0), |l| (l.assignments, l.total_comparisons));
                levels.push(CostLevel {
                    comparisons,
                    assignments: assignments + size as f64,
                    total_comparisons: total_comparisons + comparisons as f64,
                });
            }
        }
    }

    match levels.len() {
        0 => None,
        1 => Some(levels[0].comparisons),
        len => {
            for i in (0..len - 1).rev() {
                let (current, previous) = (&levels[i], &levels[i + 1]);
                if current.assignments * previous.total_comparisons
                    < smoothing_factor * current.total_comparisons * previous.assignments
                {
                    return Some(previous.comparisons);
                }
            }
            Some(levels[1].comparisons)
        }
    }
}

///
/// Keeps, for every entity, only its memberships in the smallest
/// `keep_fraction` of the blocks it belongs to (rounded half up).
///
/// Blocks are ranked by ascending comparisons, ties broken by key. Blocks
/// left with fewer than two entities are dropped.
///
pub fn filter_blocks(blocks: &[Block], keep_fraction: f64) -> Vec<Block> {
    let mut ranked: Vec<&Block> = blocks.iter().collect();
    ranked.sort_by(|a, b| match a.comparisons().cmp(&b.comparisons()) {
        Ordering::Equal => a.key.cmp(&b.key),
        other => other,
    });

    let num_entities = blocks
        .iter()
        .flat_map(|block| block.entities.iter())
        .max()
        .map_or(0, |&max| max + 1);
    let mut limits = vec![0usize; num_entities];
    for entity in blocks.iter().flat_map(|block| block.entities.iter()) {
        limits[*entity] += 1;
    }
    for limit in limits.iter_mut() {
        *limit = (keep_fraction * *limit as f64 + 0.5).floor() as usize;
    }

    let mut assigned = vec![0usize; num_entities];
    let mut filtered = Vec::with_capacity(ranked.len());
    for block in ranked {
        let entities: Vec<usize> = block
            .entities
            .iter()
            .copied()
            .filter(|&entity| {
                if assigned[entity] < limits[entity] {
                    assigned[entity] += 1;
                    true
                } else {
                    false
                }
            })
            .collect();
        if entities.len() > 1 {
            filtered.push(Block::new(block.key.clone(), entities));
        }
    }
    debug!(
        "Block filtering kept {} of {} blocks",
        filtered.len(),
        blocks.len()
    );
    filtered
}
