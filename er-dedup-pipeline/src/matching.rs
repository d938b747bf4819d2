use crate::blocking::{qgrams, tokenize};
use clap::ValueEnum;
use er_dedup::dto::{CandidatePair, EntityProfile, SimilarityPair};
use er_dedup::error::ServiceError;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Unit of the per-profile feature bag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeatureModel {
    /// `n` consecutive tokens joined by a single space.
    TokenNgrams { n: usize },
    /// `n` consecutive characters of each whitespace-normalised value.
    CharacterNgrams { n: usize },
}

impl FeatureModel {
    fn terms(&self, profile: &EntityProfile) -> Vec<String> {
        let mut terms = Vec::new();
        for value in profile.values() {
            match *self {
                FeatureModel::CharacterNgrams { n } => {
                    let normalized = value
                        .to_lowercase()
                        .split_whitespace()
                        .collect::<Vec<_>>()
                        .join(" ");
                    if !normalized.is_empty() {
                        terms.extend(qgrams(&normalized, n));
                    }
                }
                FeatureModel::TokenNgrams { n } => {
                    let tokens: Vec<String> = tokenize(value).collect();
                    if tokens.is_empty() {
                        continue;
                    }
                    if tokens.len() <= n {
                        terms.push(tokens.join(" "));
                    } else {
                        terms.extend(tokens.windows(n).map(|w| w.join(" ")));
                    }
                }
            }
        }
        terms
    }
}

///
/// Feature-vector scheme used to compare profiles, named like
/// `character-bigrams` or `token-unigrams-tf-idf`.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepresentationModel {
    pub features: FeatureModel,
    /// Weight term frequencies by corpus-wide inverse document frequency.
    pub tf_idf: bool,
}

impl Default for RepresentationModel {
    fn default() -> Self {
        RepresentationModel {
            features: FeatureModel::CharacterNgrams { n: 2 },
            tf_idf: false,
        }
    }
}

const GRAM_NAMES: [&str; 5] = ["unigrams", "bigrams", "trigrams", "fourgrams", "fivegrams"];

impl fmt::Display for RepresentationModel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (kind, n) = match self.features {
            FeatureModel::TokenNgrams { n } => ("token", n),
            FeatureModel::CharacterNgrams { n } => ("character", n),
        };
        match GRAM_NAMES.get(n.wrapping_sub(1)) {
            Some(grams) => write!(f, "{kind}-{grams}")?,
            None => write!(f, "{kind}-{n}grams")?,
        }
        if self.tf_idf {
            write!(f, "-tf-idf")?;
        }
        Ok(())
    }
}

impl FromStr for RepresentationModel {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        let (name, tf_idf) = match name.strip_suffix("-tf-idf") {
            Some(stripped) => (stripped.to_string(), true),
            None => (name, false),
        };
        let unknown = || ServiceError::configuration(format!("Unknown representation model '{}'", s));
        let (kind, grams) = name.split_once('-').ok_or_else(unknown)?;
        let n = GRAM_NAMES
            .iter()
            .position(|&g| g == grams)
            .map(|i| i + 1)
            .ok_or_else(unknown)?;
        let features = match kind {
            "token" => FeatureModel::TokenNgrams { n },
            "character" => FeatureModel::CharacterNgrams { n },
            _ => return Err(unknown()),
        };
        Ok(RepresentationModel { features, tf_idf })
    }
}

impl TryFrom<String> for RepresentationModel {
    type Error = ServiceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RepresentationModel> for String {
    fn from(model: RepresentationModel) -> Self {
        model.to_string()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    /// Overlap of the two term sets, ignoring weights.
    Jaccard,
    GeneralizedJaccard,
    /// Weight mass of shared terms over the weight mass of all terms.
    Sigma,
}

/// Sparse term weights, sorted by term id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeatureVector {
    terms: Vec<(u32, f64)>,
    norm: f64,
}

impl FeatureVector {
    fn new(terms: Vec<(u32, f64)>) -> Self {
        let norm = terms.iter().map(|&(_, w)| w * w).sum::<f64>().sqrt();
        FeatureVector { terms, norm }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Walks the union of both term lists in term order.
    fn merge<F: FnMut(Option<f64>, Option<f64>)>(&self, other: &FeatureVector, mut visit: F) {
        let (mut i, mut j) = (0, 0);
        while i < self.terms.len() || j < other.terms.len() {
            let order = match (self.terms.get(i), other.terms.get(j)) {
                (Some(a), Some(b)) => a.0.cmp(&b.0),
                (Some(_), None) => Ordering::Less,
                _ => Ordering::Greater,
            };
            match order {
                Ordering::Less => {
                    visit(Some(self.terms[i].1), None);
                    i += 1;
                }
                Ordering::Greater => {
                    visit(None, Some(other.terms[j].1));
                    j += 1;
                }
                Ordering::Equal => {
                    visit(Some(self.terms[i].1), Some(other.terms[j].1));
                    i += 1;
                    j += 1;
                }
            }
        }
    }
}

impl SimilarityMetric {
    ///
    /// Similarity of two vectors in [0, 1]. The score is symmetric and
    /// bit-identical across calls: both vectors are walked in term order.
    ///
    pub fn similarity(&self, a: &FeatureVector, b: &FeatureVector) -> f64 {
        let score = match self {
            SimilarityMetric::Cosine => {
                if a.norm == 0.0 || b.norm == 0.0 {
                    return 0.0;
                }
                let mut dot = 0.0;
                a.merge(b, |x, y| {
                    if let (Some(x), Some(y)) = (x, y) {
                        dot += x * y;
                    }
                });
                dot / (a.norm * b.norm)
            }
            SimilarityMetric::Jaccard => {
                let (mut shared, mut union) = (0usize, 0usize);
                a.merge(b, |x, y| {
                    union += 1;
                    if x.is_some() && y.is_some() {
                        shared += 1;
                    }
                });
                ratio(shared as f64, union as f64)
            }
            SimilarityMetric::GeneralizedJaccard => {
                let (mut minimum, mut maximum) = (0.0, 0.0);
                a.merge(b, |x, y| {
                    let (x, y) = (x.unwrap_or(0.0), y.unwrap_or(0.0));
                    minimum += x.min(y);
                    maximum += x.max(y);
                });
                ratio(minimum, maximum)
            }
            SimilarityMetric::Sigma => {
                let (mut shared, mut total) = (0.0, 0.0);
                a.merge(b, |x, y| match (x, y) {
                    (Some(x), Some(y)) => {
                        shared += x + y;
                        total += x + y;
                    }
                    (x, y) => total += x.or(y).unwrap_or(0.0),
                });
                ratio(shared, total)
            }
        };
        score.clamp(0.0, 1.0)
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Feature vectors of a whole dataset plus the metric that compares them.
pub struct ProfileMatcher {
    vectors: Vec<FeatureVector>,
    metric: SimilarityMetric,
}

impl ProfileMatcher {
    ///
    /// Builds one vector per profile, in profile order.
    ///
    /// Term extraction and weighting run in parallel; interning and document
    /// frequencies are gathered in a single pass over the whole corpus before
    /// any pair is scored, and are read-only afterwards.
    ///
    pub fn new(
        profiles: &[EntityProfile],
        model: RepresentationModel,
        metric: SimilarityMetric,
    ) -> Self {
        let profile_terms: Vec<Vec<String>> = profiles
            .par_iter()
            .map(|profile| model.features.terms(profile))
            .collect();

        let mut vocabulary: FxHashMap<String, u32> = FxHashMap::default();
        let mut document_frequency: Vec<u32> = Vec::new();
        let mut term_counts: Vec<(Vec<(u32, u32)>, u32)> = Vec::with_capacity(profiles.len());
        for terms in profile_terms {
            let total = terms.len() as u32;
            let mut counts: FxHashMap<u32, u32> = FxHashMap::default();
            for term in terms {
                let next_id = vocabulary.len() as u32;
                let id = *vocabulary.entry(term).or_insert(next_id);
                if id == next_id {
                    document_frequency.push(0);
                }
                *counts.entry(id).or_insert(0) += 1;
            }
            let mut counts: Vec<(u32, u32)> = counts.into_iter().collect();
            counts.sort_unstable();
            for &(id, _) in &counts {
                document_frequency[id as usize] += 1;
            }
            term_counts.push((counts, total));
        }
        debug!(
            "Built vocabulary of {} terms over {} profiles",
            vocabulary.len(),
            profiles.len()
        );

        let documents = profiles.len() as f64;
        let vectors: Vec<FeatureVector> = term_counts
            .into_par_iter()
            .map(|(counts, total)| {
                let weights = counts
                    .into_iter()
                    .map(|(id, count)| {
                        let tf = count as f64 / total as f64;
                        let weight = if model.tf_idf {
                            tf * ((documents + 1.0) / document_frequency[id as usize] as f64).ln()
                        } else {
                            tf
                        };
                        (id, weight)
                    })
                    .collect();
                FeatureVector::new(weights)
            })
            .collect();

        ProfileMatcher { vectors, metric }
    }

    pub fn vector(&self, entity: usize) -> Option<&FeatureVector> {
        self.vectors.get(entity)
    }

    /// Similarity of two profiles by index. Unknown indices score 0.
    pub fn similarity(&self, left: usize, right: usize) -> f64 {
        match (self.vector(left), self.vector(right)) {
            (Some(a), Some(b)) => self.metric.similarity(a, b),
            _ => 0.0,
        }
    }

    /// Scores every pair in parallel. Output order follows `pairs`.
    pub fn execute_comparisons(&self, pairs: &[CandidatePair]) -> Vec<SimilarityPair> {
        pairs
            .par_iter()
            .map(|&pair| SimilarityPair {
                pair,
                score: self.similarity(pair.left(), pair.right()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    fn profile(index: usize, text: &str) -> EntityProfile {
        EntityProfile::new(index, format!("id{index}")).with_attribute("title", text)
    }

    fn all_models() -> Vec<RepresentationModel> {
        let mut models = Vec::new();
        for features in [
            FeatureModel::TokenNgrams { n: 1 },
            FeatureModel::TokenNgrams { n: 2 },
            FeatureModel::CharacterNgrams { n: 2 },
            FeatureModel::CharacterNgrams { n: 4 },
        ] {
            for tf_idf in [false, true] {
                models.push(RepresentationModel { features, tf_idf });
            }
        }
        models
    }

    const METRICS: [SimilarityMetric; 4] = [
        SimilarityMetric::Cosine,
        SimilarityMetric::Jaccard,
        SimilarityMetric::GeneralizedJaccard,
        SimilarityMetric::Sigma,
    ];

    #[test]
    fn representation_names_round_trip() {
        for name in [
            "character-bigrams",
            "character-fourgrams-tf-idf",
            "token-unigrams",
            "token-trigrams-tf-idf",
        ] {
            let model: RepresentationModel = name.parse().unwrap();
            assert_eq!(model.to_string(), name);
        }
        let model: RepresentationModel = "CHARACTER-FOURGRAMS-TF-IDF".parse().unwrap();
        assert_eq!(
            model,
            RepresentationModel {
                features: FeatureModel::CharacterNgrams { n: 4 },
                tf_idf: true,
            }
        );
        assert!("character-sixgrams".parse::<RepresentationModel>().is_err());
        assert!("bigrams".parse::<RepresentationModel>().is_err());
    }

    #[test]
    fn representation_serializes_by_name() {
        let json = serde_json::to_string(&RepresentationModel::default()).unwrap();
        assert_eq!(json, r#""character-bigrams""#);
        let model: RepresentationModel = serde_json::from_str(r#""token-bigrams-tf-idf""#).unwrap();
        assert_eq!(model.features, FeatureModel::TokenNgrams { n: 2 });
        assert!(model.tf_idf);
    }

    #[test]
    fn token_ngrams_span_consecutive_tokens() {
        let terms = FeatureModel::TokenNgrams { n: 2 }.terms(&profile(0, "Big red  Dog"));
        assert_eq!(terms, vec!["big red", "red dog"]);
        let short = FeatureModel::TokenNgrams { n: 3 }.terms(&profile(0, "solo"));
        assert_eq!(short, vec!["solo"]);
    }

    #[test]
    fn character_ngrams_normalise_whitespace() {
        let terms = FeatureModel::CharacterNgrams { n: 2 }.terms(&profile(0, " Ab  C "));
        assert_eq!(terms, vec!["ab", "b ", " c"]);
    }

    #[test]
    fn identical_profiles_score_one() {
        let profiles = vec![
            profile(0, "canon eos 5d mark ii"),
            profile(1, "canon eos 5d mark ii"),
            profile(2, "kitchen toaster"),
        ];
        for model in all_models() {
            for metric in METRICS {
                let matcher = ProfileMatcher::new(&profiles, model, metric);
                let score = matcher.similarity(0, 1);
                assert!(score >= 0.95, "{model} {metric:?}: {score}");
                assert!(matcher.similarity(0, 2) < 0.5, "{model} {metric:?}");
            }
        }
    }

    #[test]
    fn terms_in_every_profile_keep_weight() {
        let pair = vec![profile(0, "acme widget"), profile(1, "acme widget")];
        let with_superset = vec![
            profile(0, "acme widget"),
            profile(1, "acme widget"),
            profile(2, "acme widget deluxe edition"),
        ];
        for profiles in [&pair, &with_superset] {
            for model in all_models().into_iter().filter(|m| m.tf_idf) {
                for metric in METRICS {
                    let matcher = ProfileMatcher::new(profiles, model, metric);
                    assert!(!matcher.vector(0).unwrap().is_empty());
                    let score = matcher.similarity(0, 1);
                    assert!(score >= 0.95, "{model} {metric:?}: {score}");
                }
            }
        }
    }

    #[test]
    fn jaccard_counts_term_sets() {
        let profiles = vec![profile(0, "a b c"), profile(1, "b c d")];
        let matcher = ProfileMatcher::new(
            &profiles,
            "token-unigrams".parse().unwrap(),
            SimilarityMetric::Jaccard,
        );
        assert_eq!(matcher.similarity(0, 1), 0.5);
    }

    #[test]
    fn sigma_weighs_shared_mass() {
        let profiles = vec![profile(0, "a b"), profile(1, "b c")];
        let matcher = ProfileMatcher::new(
            &profiles,
            "token-unigrams".parse().unwrap(),
            SimilarityMetric::Sigma,
        );
        // Shared: b (0.5 + 0.5); all: a 0.5, b 1.0, c 0.5.
        assert_eq!(matcher.similarity(0, 1), 0.5);
    }

    #[test]
    fn idf_discounts_ubiquitous_terms() {
        let profiles = vec![
            profile(0, "inc acme"),
            profile(1, "inc acme"),
            profile(2, "inc globex"),
            profile(3, "inc initech"),
        ];
        let matcher = ProfileMatcher::new(
            &profiles,
            "token-unigrams-tf-idf".parse().unwrap(),
            SimilarityMetric::Cosine,
        );
        // "inc" appears everywhere, so 0 and 2 share only a low-weight term.
        assert!(matcher.similarity(0, 2) < 0.1);
        assert!(matcher.similarity(0, 1) > 0.99);
    }

    #[test]
    fn empty_profiles_score_zero() {
        let profiles = vec![
            EntityProfile::new(0, "a").with_attribute("title", ""),
            EntityProfile::new(1, "b").with_attribute("title", "  "),
        ];
        for metric in METRICS {
            let matcher = ProfileMatcher::new(&profiles, RepresentationModel::default(), metric);
            assert!(matcher.vector(0).unwrap().is_empty());
            assert_eq!(matcher.similarity(0, 1), 0.0);
        }
    }

    #[test]
    fn unknown_indices_score_zero() {
        let profiles = vec![profile(0, "x")];
        let matcher = ProfileMatcher::new(
            &profiles,
            RepresentationModel::default(),
            SimilarityMetric::Cosine,
        );
        assert_eq!(matcher.similarity(0, 7), 0.0);
    }

    #[test]
    fn scoring_is_independent_of_pair_order() {
        let profiles: Vec<EntityProfile> = [
            "acme corp widget",
            "acme corporation widgets",
            "globex widget",
            "initech tps report",
            "initech report tps",
            "acme widget deluxe",
        ]
        .iter()
        .enumerate()
        .map(|(i, text)| profile(i, text))
        .collect();
        let mut pairs = Vec::new();
        for i in 0..profiles.len() {
            for j in i + 1..profiles.len() {
                pairs.push(CandidatePair::new(i, j).unwrap());
            }
        }
        let matcher = ProfileMatcher::new(
            &profiles,
            "character-trigrams-tf-idf".parse().unwrap(),
            SimilarityMetric::Cosine,
        );
        let expected = matcher.execute_comparisons(&pairs);

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..5 {
            let mut shuffled = pairs.clone();
            shuffled.shuffle(&mut rng);
            let mut scored = matcher.execute_comparisons(&shuffled);
            scored.sort_by_key(|p| p.pair);
            for (a, b) in scored.iter().zip(&expected) {
                assert_eq!(a.pair, b.pair);
                assert_eq!(a.score.to_bits(), b.score.to_bits());
            }
        }
    }

    proptest! {
        #[test]
        fn scores_are_symmetric_and_bounded(a in "[a-e ]{0,24}", b in "[a-e ]{0,24}", c in "[a-e ]{0,24}") {
            let profiles = vec![profile(0, &a), profile(1, &b), profile(2, &c)];
            for model in all_models() {
                for metric in METRICS {
                    let matcher = ProfileMatcher::new(&profiles, model, metric);
                    let forward = matcher.similarity(0, 1);
                    let backward = matcher.similarity(1, 0);
                    prop_assert_eq!(forward.to_bits(), backward.to_bits());
                    prop_assert!((0.0..=1.0).contains(&forward));
                    let rebuilt = ProfileMatcher::new(&profiles, model, metric);
                    prop_assert_eq!(forward.to_bits(), rebuilt.similarity(0, 1).to_bits());
                }
            }
        }
    }
}
