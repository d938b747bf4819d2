use clap::ValueEnum;
use er_dedup::dto::{EquivalenceCluster, SimilarityPair};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ClusteringStrategy {
    /// Transitive closure over every pair scoring at least the threshold.
    ConnectedComponents,
    /// Greedy star clustering by descending score, without merges.
    #[default]
    Center,
}

impl ClusteringStrategy {
    ///
    /// Groups scored pairs into clusters of at least two entities.
    ///
    /// ## Arguments
    ///
    /// * `pairs` - Scored candidate pairs, in any order.
    /// * `threshold` - Minimum similarity (inclusive) for a pair to link its entities.
    ///
    /// Clusters are returned ordered by their smallest member.
    ///
    pub fn get_duplicates(&self, pairs: &[SimilarityPair], threshold: f64) -> Vec<EquivalenceCluster> {
        let edges: Vec<&SimilarityPair> = pairs.iter().filter(|p| p.score >= threshold).collect();
        let table = match self {
            ClusteringStrategy::ConnectedComponents => connected_components(&edges),
            ClusteringStrategy::Center => center_clustering(edges),
        };
        table.clusters()
    }
}

///
/// Wraps two mappings to track cluster membership while edges are processed.
///
#[derive(Default)]
struct ClusterTable {
    /// Mapping of cluster id to member entities
    members: FxHashMap<usize, Vec<usize>>,
    /// Reverse lookup to identify the cluster id of an entity
    lookup: FxHashMap<usize, usize>,
}

impl ClusterTable {
    /// Clusters are never removed, so ids stay dense.
    fn new_id(&self) -> usize {
        self.members.len()
    }

    fn add(&mut self, cluster_id: usize, entity: usize) {
        self.members.entry(cluster_id).or_default().push(entity);
        self.lookup.insert(entity, cluster_id);
    }

    fn cluster_id(&self, entity: usize) -> Option<usize> {
        self.lookup.get(&entity).copied()
    }

    fn clusters(self) -> Vec<EquivalenceCluster> {
        let mut clusters: Vec<EquivalenceCluster> = self
            .members
            .into_values()
            .filter(|members| members.len() > 1)
            .map(EquivalenceCluster::new)
            .collect();
        clusters.sort_unstable_by_key(|cluster| cluster.entities[0]);
        clusters
    }
}

/// Union-find over entity indices with path splitting.
struct DisjointSet {
    parent: FxHashMap<usize, usize>,
}

impl DisjointSet {
    fn find(&mut self, entity: usize) -> usize {
        let mut current = *self.parent.entry(entity).or_insert(entity);
        let mut node = entity;
        while current != node {
            let grandparent = self.parent[&current];
            self.parent.insert(node, grandparent);
            node = current;
            current = grandparent;
        }
        node
    }

    fn union(&mut self, a: usize, b: usize) {
        let (root_a, root_b) = (self.find(a), self.find(b));
        if root_a != root_b {
            let (low, high) = (root_a.min(root_b), root_a.max(root_b));
            self.parent.insert(high, low);
        }
    }
}

///
/// Every connected component of the thresholded graph becomes a cluster.
/// Chains propagate: A-B and B-C join A and C even if A-C was never scored.
///
fn connected_components(edges: &[&SimilarityPair]) -> ClusterTable {
    let mut set = DisjointSet {
        parent: FxHashMap::default(),
    };
    for edge in edges {
        set.union(edge.pair.left(), edge.pair.right());
    }
    let mut entities: Vec<usize> = set.parent.keys().copied().collect();
    entities.sort_unstable();

    let mut table = ClusterTable::default();
    for entity in entities {
        let root = set.find(entity);
        table.add(root, entity);
    }
    table
}

///
/// Processes edges by descending score. When both ends are unassigned, the
/// end with the higher mean edge weight becomes a new center and the other
/// its satellite; an unassigned end matching an existing center becomes its
/// satellite. Entities are never reassigned and clusters never merge.
///
fn center_clustering(mut edges: Vec<&SimilarityPair>) -> ClusterTable {
    let mut weight_sums: FxHashMap<usize, (f64, usize)> = FxHashMap::default();
    for edge in &edges {
        for entity in [edge.pair.left(), edge.pair.right()] {
            let entry = weight_sums.entry(entity).or_insert((0.0, 0));
            entry.0 += edge.score;
            entry.1 += 1;
        }
    }
    let mean_weight = |entity: usize| {
        weight_sums
            .get(&entity)
            .map_or(0.0, |&(sum, count)| sum / count as f64)
    };

    edges.sort_by(|a, b| match b.score.total_cmp(&a.score) {
        Ordering::Equal => a.pair.cmp(&b.pair),
        other => other,
    });

    let mut table = ClusterTable::default();
    let mut centers: FxHashMap<usize, usize> = FxHashMap::default();
    for edge in edges {
        let (left, right) = (edge.pair.left(), edge.pair.right());
        match (table.cluster_id(left), table.cluster_id(right)) {
            (None, None) => {
                let (center, satellite) = if mean_weight(right) > mean_weight(left) {
                    (right, left)
                } else {
                    (left, right)
                };
                let cluster_id = table.new_id();
                table.add(cluster_id, center);
                table.add(cluster_id, satellite);
                centers.insert(center, cluster_id);
            }
            (Some(_), None) => {
                if let Some(&cluster_id) = centers.get(&left) {
                    table.add(cluster_id, right);
                }
            }
            (None, Some(_)) => {
                if let Some(&cluster_id) = centers.get(&right) {
                    table.add(cluster_id, left);
                }
            }
            (Some(_), Some(_)) => {}
        }
    }
    table
}
