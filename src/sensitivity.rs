//! Deciding which words need to be hidden.

use std::collections::BTreeSet;

use schemars::JsonSchema;

use crate::{model::EnrichedWord, prelude::*};

/// Default minimum classifier score for a match to count.
pub const DEFAULT_MIN_SCORE: f64 = 0.85;

/// Default entity categories we treat as personally identifying.
pub const DEFAULT_SENSITIVE_CATEGORIES: &[&str] = &[
    "ACCOUNTNUM",
    "EMAIL",
    "GIVENNAME",
    "SURNAME",
    "STREET",
    "TELEPHONENUM",
];

/// Which entity categories are sensitive, and how sure the classifier must be.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SensitivityPolicy {
    /// Category labels, compared exactly against classifier output.
    #[serde(default = "default_categories")]
    pub categories: BTreeSet<String>,

    /// Minimum score, inclusive.
    #[serde(default = "default_min_score")]
    pub min_score: f64,
}

fn default_categories() -> BTreeSet<String> {
    DEFAULT_SENSITIVE_CATEGORIES
        .iter()
        .map(|&c| c.to_owned())
        .collect()
}

fn default_min_score() -> f64 {
    DEFAULT_MIN_SCORE
}

impl Default for SensitivityPolicy {
    fn default() -> Self {
        Self {
            categories: default_categories(),
            min_score: DEFAULT_MIN_SCORE,
        }
    }
}

impl SensitivityPolicy {
    /// Check that the policy makes sense.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(anyhow!(
                "min_score must be between 0.0 and 1.0, not {}",
                self.min_score
            ));
        }
        Ok(())
    }

    /// Does this word carry at least one sensitive entity with a high enough
    /// score? Words without entities never do.
    pub fn is_sensitive(&self, word: &EnrichedWord) -> bool {
        word.entities.iter().any(|entity| {
            entity.score >= self.min_score && self.categories.contains(&entity.category)
        })
    }

    /// Indices of all sensitive words, in word order.
    pub fn sensitive_indices<'a>(
        &'a self,
        words: &'a [EnrichedWord],
    ) -> impl Iterator<Item = usize> + 'a {
        words
            .iter()
            .enumerate()
            .filter(|(_, word)| self.is_sensitive(word))
            .map(|(idx, _)| idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BoundingBox, EntityCheck, EntityMatch, OcrWord};

    fn word_with(entities: &[(&str, f64)]) -> EnrichedWord {
        EnrichedWord {
            word: OcrWord {
                text: "bob@example.com".to_owned(),
                bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
                confidence: Some(91.0),
            },
            entities: entities
                .iter()
                .map(|&(category, score)| EntityMatch {
                    category: category.to_owned(),
                    matched_word: "bob".to_owned(),
                    score,
                    start_offset: 0,
                    end_offset: 3,
                    token_index: None,
                })
                .collect(),
            entity_check: EntityCheck::Checked,
        }
    }

    #[test]
    fn email_above_threshold_is_sensitive() {
        let policy = SensitivityPolicy::default();
        assert!(policy.is_sensitive(&word_with(&[("EMAIL", 0.9)])));
        assert!(!policy.is_sensitive(&word_with(&[("EMAIL", 0.80)])));
    }

    #[test]
    fn threshold_is_inclusive() {
        let policy = SensitivityPolicy::default();
        assert!(policy.is_sensitive(&word_with(&[("EMAIL", DEFAULT_MIN_SCORE)])));
    }

    #[test]
    fn unknown_categories_and_empty_entities_are_not_sensitive() {
        let policy = SensitivityPolicy::default();
        assert!(!policy.is_sensitive(&word_with(&[("MISC", 0.99)])));
        assert!(!policy.is_sensitive(&word_with(&[])));
    }

    #[test]
    fn any_matching_entity_is_enough() {
        let policy = SensitivityPolicy::default();
        let word = word_with(&[("MISC", 0.99), ("EMAIL", 0.3), ("STREET", 0.95)]);
        assert!(policy.is_sensitive(&word));
    }

    #[test]
    fn lowering_threshold_never_unmarks_a_word() {
        let words = [
            word_with(&[("EMAIL", 0.5)]),
            word_with(&[("EMAIL", 0.85)]),
            word_with(&[("GIVENNAME", 0.97), ("MISC", 0.2)]),
            word_with(&[]),
        ];
        let thresholds = [1.0, 0.97, 0.9, 0.85, 0.5, 0.1, 0.0];
        for word in &words {
            for (i, &high) in thresholds.iter().enumerate() {
                let strict = SensitivityPolicy {
                    min_score: high,
                    ..Default::default()
                };
                if !strict.is_sensitive(word) {
                    continue;
                }
                for &low in &thresholds[i..] {
                    let lax = SensitivityPolicy {
                        min_score: low,
                        ..Default::default()
                    };
                    assert!(lax.is_sensitive(word));
                }
            }
        }
    }

    #[test]
    fn sensitive_indices_keeps_word_order() {
        let policy = SensitivityPolicy::default();
        let words = vec![
            word_with(&[("EMAIL", 0.9)]),
            word_with(&[]),
            word_with(&[("TELEPHONENUM", 0.99)]),
        ];
        let indices = policy.sensitive_indices(&words).collect::<Vec<_>>();
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn rejects_out_of_range_min_score() {
        let policy = SensitivityPolicy {
            min_score: 1.5,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }
}
