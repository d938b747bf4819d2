use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

/// A loaded record. `index` is scoped to a single dataset load.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct EntityProfile {
    pub index: usize,
    pub entity_url: String,
    pub attributes: Vec<Attribute>,
}

impl EntityProfile {
    pub fn new(index: usize, entity_url: impl Into<String>) -> Self {
        EntityProfile {
            index,
            entity_url: entity_url.into(),
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_attribute(name, value);
        self
    }

    pub fn add_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.push(Attribute {
            name: name.into(),
            value: value.into(),
        });
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|attr| attr.value.as_str())
    }
}

/// Profiles sharing one blocking key. `entities` is ascending and distinct.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Block {
    pub key: String,
    pub entities: Vec<usize>,
}

impl Block {
    pub fn new(key: impl Into<String>, entities: Vec<usize>) -> Self {
        Block {
            key: key.into(),
            entities,
        }
    }

    pub fn size(&self) -> usize {
        self.entities.len()
    }

    /// Number of pairwise comparisons the block induces.
    pub fn comparisons(&self) -> u64 {
        let n = self.entities.len() as u64;
        n * n.saturating_sub(1) / 2
    }
}

/// An unordered pair of entity indices stored with `left < right`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CandidatePair {
    left: usize,
    right: usize,
}

impl CandidatePair {
    /// Orders the two indices. Returns `None` for a self-pair.
    pub fn new(a: usize, b: usize) -> Option<Self> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(CandidatePair { left: a, right: b }),
            std::cmp::Ordering::Greater => Some(CandidatePair { left: b, right: a }),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn left(&self) -> usize {
        self.left
    }

    pub fn right(&self) -> usize {
        self.right
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SimilarityPair {
    pub pair: CandidatePair,
    pub score: f64,
}

/// A group of profiles judged mutually duplicate. `entities` is ascending.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EquivalenceCluster {
    pub entities: Vec<usize>,
}

impl EquivalenceCluster {
    pub fn new(mut entities: Vec<usize>) -> Self {
        entities.sort_unstable();
        entities.dedup();
        EquivalenceCluster { entities }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    ///
    /// Every 2-combination of the cluster members, lower index first, in
    /// ascending combination order. Assumes transitive closure: pairs are
    /// reported whether or not they were scored directly.
    ///
    pub fn duplicate_pairs(&self) -> impl Iterator<Item = CandidatePair> + '_ {
        self.entities.iter().enumerate().flat_map(move |(i, &left)| {
            self.entities[i + 1..]
                .iter()
                .map(move |&right| CandidatePair { left, right })
        })
    }
}

/// Extracts the detected duplicates of every cluster, in cluster order.
pub fn detected_duplicates(clusters: &[EquivalenceCluster]) -> Vec<CandidatePair> {
    clusters
        .iter()
        .flat_map(|cluster| cluster.duplicate_pairs())
        .collect()
}
