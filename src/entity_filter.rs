//! Entity quality filter - the precision defense over harvested candidates
//!
//! A stateless predicate over `(canonical, type)`. The harvester consults it
//! inline before creating an entity; after harvesting, `purge` re-runs the
//! rules over the registry and cascades removals to the span list.

use serde::Serialize;

use crate::types::{Entity, EntityType, Span};

/// English personal/demonstrative pronouns. Pronouns never become entities
/// and never appear in alias sets.
pub const PRONOUN_SURFACES: &[&str] = &[
    "he", "him", "his", "she", "her", "hers", "it", "its", "they", "them", "their", "theirs",
    "himself", "herself", "itself", "themselves", "i", "me", "my", "mine", "we", "us", "our",
    "ours", "you", "your", "yours", "this", "that", "these", "those", "who", "whom",
];

/// High-frequency words that cannot stand alone as a canonical name.
const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "of", "in", "at", "on", "to", "from", "with", "by",
    "for", "as", "is", "was", "were", "are", "be", "been", "not", "no", "yes", "there", "here",
    "then", "when", "where", "how", "why", "what", "which", "one", "some", "many", "all",
];

/// Generic relational nouns: real words, but never entities on their own.
const RELATIONAL_NOUNS: &[&str] = &[
    "son", "daughter", "father", "mother", "parent", "child", "children", "brother", "sister",
    "sibling", "wife", "husband", "spouse", "friend", "enemy", "member", "members", "leader",
    "man", "woman", "people", "person", "couple", "king", "queen", "ruler", "company", "family",
    "house", "tribe", "clan", "city", "place", "year", "day", "time",
];

const MONTH_WORDS: &[&str] = &[
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december",
];

/// A failed quality rule, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct FilterViolation {
    pub rule: &'static str,
    pub message: String,
}

/// Configuration for the entity quality filter
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub enabled: bool,
    /// Candidates whose NER confidence falls below this are rejected
    /// (only applies when the parser supplies per-mention confidence)
    pub min_ner_confidence: f64,
    /// Explicit blocklist, case-insensitive
    pub blocklist: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_ner_confidence: 0.4,
            blocklist: Vec::new(),
        }
    }
}

/// Stateless quality predicate over `(canonical, type)`
#[derive(Debug, Clone, Default)]
pub struct EntityQualityFilter {
    config: FilterConfig,
}

impl EntityQualityFilter {
    #[must_use]
    pub const fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    /// Validate one candidate. `Ok(())` means acceptable.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule.
    pub fn validate(
        &self,
        canonical: &str,
        entity_type: EntityType,
        ner_confidence: Option<f64>,
    ) -> Result<(), FilterViolation> {
        if !self.config.enabled {
            return Ok(());
        }

        let trimmed = canonical.trim();
        let lower = trimmed.to_lowercase();

        if trimmed.is_empty() {
            return Err(violation("empty", "canonical is empty"));
        }
        if !trimmed.chars().any(char::is_alphanumeric) {
            return Err(violation("punctuation_only", "no word characters"));
        }
        if trimmed.chars().filter(|c| c.is_alphabetic()).count() < 2
            && entity_type != EntityType::Date
        {
            return Err(violation("too_short", "fewer than two letters"));
        }
        if PRONOUN_SURFACES.contains(&lower.as_str()) {
            return Err(violation("pronoun", "canonical is a pronoun"));
        }
        if STOPWORDS.contains(&lower.as_str()) {
            return Err(violation("stopword", "canonical is a stopword"));
        }
        if RELATIONAL_NOUNS.contains(&lower.as_str()) {
            return Err(violation(
                "relational_noun",
                "generic relational noun cannot name an entity",
            ));
        }
        if lower
            .split_whitespace()
            .all(|w| STOPWORDS.contains(&w) || RELATIONAL_NOUNS.contains(&w))
        {
            return Err(violation("stopword_content", "stopword-only content"));
        }
        if entity_type == EntityType::Date {
            let has_month = lower.split_whitespace().any(|w| MONTH_WORDS.contains(&w));
            let has_number = trimmed.chars().any(|c| c.is_ascii_digit());
            if has_month && !has_number {
                return Err(violation("invalid_date", "month word without a number"));
            }
        } else if !trimmed.chars().any(char::is_uppercase) {
            return Err(violation("no_capital", "no capital letter"));
        }
        if self
            .config
            .blocklist
            .iter()
            .any(|b| b.eq_ignore_ascii_case(trimmed))
        {
            return Err(violation("blocklist", "explicitly blocked"));
        }
        if let Some(conf) = ner_confidence {
            if conf < self.config.min_ner_confidence {
                return Err(violation("low_ner_confidence", "below NER threshold"));
            }
        }

        Ok(())
    }

    /// Re-run the rules over a harvested registry and cascade removals to
    /// the span list. Returns how many entities were removed.
    pub fn purge(&self, entities: &mut Vec<Entity>, spans: &mut Vec<Span>) -> usize {
        if !self.config.enabled {
            return 0;
        }
        let before = entities.len();
        entities.retain(|e| self.validate(&e.canonical, e.entity_type, None).is_ok());
        let kept: std::collections::HashSet<&str> =
            entities.iter().map(|e| e.id.as_str()).collect();
        spans.retain(|s| kept.contains(s.entity_id.as_str()));
        before - entities.len()
    }

    /// Whether `surface` is a pronoun (case-insensitive).
    #[must_use]
    pub fn is_pronoun(surface: &str) -> bool {
        PRONOUN_SURFACES.contains(&surface.to_lowercase().as_str())
    }
}

fn violation(rule: &'static str, message: &str) -> FilterViolation {
    FilterViolation {
        rule,
        message: message.to_string(),
    }
}
