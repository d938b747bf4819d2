use er_dedup::dto::{Block, EntityProfile};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_Q: usize = 3;

/// How blocking keys are derived from attribute values. Attribute names are
/// ignored, so keys are schema-agnostic.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BlockingStrategy {
    /// One key per distinct lowercase token.
    Token,
    /// One key per contiguous `q`-character substring of every token.
    QGrams { q: usize },
}

impl Default for BlockingStrategy {
    fn default() -> Self {
        BlockingStrategy::QGrams { q: DEFAULT_Q }
    }
}

impl BlockingStrategy {
    /// Distinct blocking keys exhibited by one profile.
    pub fn keys(&self, profile: &EntityProfile) -> FxHashSet<String> {
        let mut keys = FxHashSet::default();
        for token in profile.values().flat_map(tokenize) {
            match self {
                BlockingStrategy::Token => {
                    keys.insert(token);
                }
                BlockingStrategy::QGrams { q } => keys.extend(qgrams(&token, *q)),
            }
        }
        keys
    }

    ///
    /// Groups profile indices into blocks by shared key.
    ///
    /// Keys are extracted in parallel, then merged by a single writer in
    /// profile order, so every block's entity list is ascending. Blocks with
    /// fewer than two entities are discarded. The result is sorted by key.
    ///
    pub fn build_blocks(&self, profiles: &[EntityProfile]) -> Vec<Block> {
        let profile_keys: Vec<(usize, FxHashSet<String>)> = profiles
            .par_iter()
            .map(|profile| (profile.index, self.keys(profile)))
            .collect();

        let mut index: FxHashMap<String, Vec<usize>> = FxHashMap::default();
        for (entity, keys) in profile_keys {
            for key in keys {
                index.entry(key).or_insert_with(Vec::new).push(entity);
            }
        }
        let total_keys = index.len();

        let mut blocks: Vec<Block> = index
            .into_iter()
            .filter(|(_, entities)| entities.len() > 1)
            .map(|(key, mut entities)| {
                entities.sort_unstable();
                entities.dedup();
                Block::new(key, entities)
            })
            .filter(|block| block.size() > 1)
            .collect();
        blocks.sort_unstable_by(|a, b| a.key.cmp(&b.key));
        debug!(
            "Indexed {} keys, {} blocks with at least two entities",
            total_keys,
            blocks.len()
        );
        blocks
    }
}

/// Lowercases `value` and splits it on every non-alphanumeric character.
pub fn tokenize(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
}

/// Contiguous `q`-character substrings of `token`. A token shorter than `q`
/// is its own single gram.
pub fn qgrams(token: &str, q: usize) -> Vec<String> {
    let chars: Vec<char> = token.chars().collect();
    if q == 0 || chars.len() <= q {
        return vec![token.to_string()];
    }
    chars.windows(q).map(|w| w.iter().collect()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(index: usize, text: &str) -> EntityProfile {
        EntityProfile::new(index, format!("id{index}")).with_attribute("title", text)
    }

    fn block_keys(blocks: &[Block]) -> Vec<&str> {
        blocks.iter().map(|b| b.key.as_str()).collect()
    }

    #[test]
    fn tokenize_lowercases_and_splits_on_punctuation() {
        let tokens: Vec<String> = tokenize("Canon EOS-5D, mark_II  (body)").collect();
        assert_eq!(tokens, vec!["canon", "eos", "5d", "mark", "ii", "body"]);
    }

    #[test]
    fn qgrams_of_short_and_long_tokens() {
        assert_eq!(qgrams("ab", 3), vec!["ab"]);
        assert_eq!(qgrams("abc", 3), vec!["abc"]);
        assert_eq!(qgrams("abcde", 3), vec!["abc", "bcd", "cde"]);
        assert_eq!(qgrams("héllo", 4), vec!["héll", "éllo"]);
    }

    #[test]
    fn token_blocking_groups_shared_tokens() {
        let profiles = vec![
            profile(0, "sony camera"),
            profile(1, "Sony Camera"),
            profile(2, "toaster"),
        ];
        let blocks = BlockingStrategy::Token.build_blocks(&profiles);
        assert_eq!(block_keys(&blocks), vec!["camera", "sony"]);
        for block in &blocks {
            assert_eq!(block.entities, vec![0, 1]);
        }
    }

    #[test]
    fn singleton_keys_are_dropped() {
        let profiles = vec![profile(0, "alpha"), profile(1, "beta")];
        assert!(BlockingStrategy::Token.build_blocks(&profiles).is_empty());
    }

    #[test]
    fn repeated_token_counts_once_per_profile() {
        let profiles = vec![profile(0, "acme acme acme"), profile(1, "acme")];
        let blocks = BlockingStrategy::Token.build_blocks(&profiles);
        assert_eq!(blocks, vec![Block::new("acme", vec![0, 1])]);
    }

    #[test]
    fn attributes_are_schema_agnostic() {
        let profiles = vec![
            EntityProfile::new(0, "a").with_attribute("brand", "Nikon"),
            EntityProfile::new(1, "b").with_attribute("title", "nikon d750"),
        ];
        let blocks = BlockingStrategy::Token.build_blocks(&profiles);
        assert_eq!(blocks, vec![Block::new("nikon", vec![0, 1])]);
    }

    #[test]
    fn qgram_blocking_catches_typos() {
        let profiles = vec![
            profile(0, "panasonic"),
            profile(1, "panasonik"),
            profile(2, "xyz"),
        ];
        let blocks = BlockingStrategy::QGrams { q: 3 }.build_blocks(&profiles);
        assert!(blocks.iter().any(|b| b.key == "pan" && b.entities == vec![0, 1]));
        assert!(blocks.iter().all(|b| !b.entities.contains(&2)));
    }

    #[test]
    fn profiles_sharing_a_key_share_a_block() {
        let profiles = vec![
            profile(0, "red apple pie"),
            profile(1, "green apple"),
            profile(2, "pie chart"),
            profile(3, "nothing here"),
        ];
        for strategy in [BlockingStrategy::Token, BlockingStrategy::QGrams { q: 3 }] {
            let blocks = strategy.build_blocks(&profiles);
            for a in &profiles {
                for b in &profiles {
                    if a.index >= b.index {
                        continue;
                    }
                    let shared = strategy.keys(a);
                    let other = strategy.keys(b);
                    for key in shared.intersection(&other) {
                        let block = blocks.iter().find(|block| &block.key == key).unwrap();
                        assert!(block.entities.contains(&a.index));
                        assert!(block.entities.contains(&b.index));
                    }
                }
            }
        }
    }
}
