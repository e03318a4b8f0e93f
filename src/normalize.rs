//! Name and lemma normalization
//!
//! - Canonical names: article/possessive stripping with whitespace collapse
//! - Graph-local ids: `slug` crate for robust Unicode handling
//! - Trigger lemmas: `rust-stemmers` so inflections fold onto one key

use rust_stemmers::{Algorithm, Stemmer};
use slug::slugify;
use std::sync::OnceLock;

/// Compute the canonical string for a mention.
///
/// Strips a leading article (`the|a|an`), drops a trailing `'s`, and
/// collapses internal whitespace.
///
/// # Examples
///
/// ```
/// use text_to_graph::normalize::canonicalize_name;
///
/// assert_eq!(canonicalize_name("the Mongol Empire"), "Mongol Empire");
/// assert_eq!(canonicalize_name("Beren's"), "Beren");
/// assert_eq!(canonicalize_name("  Thornhold   Castle "), "Thornhold Castle");
/// ```
#[must_use]
pub fn canonicalize_name(mention: &str) -> String {
    let mut words: Vec<&str> = mention.split_whitespace().collect();

    if let Some(first) = words.first() {
        if matches!(first.to_lowercase().as_str(), "the" | "a" | "an") {
            words.remove(0);
        }
    }

    let mut joined = words.join(" ");
    for suffix in ["'s", "\u{2019}s"] {
        if let Some(stripped) = joined.strip_suffix(suffix) {
            joined = stripped.to_string();
            break;
        }
    }

    joined.trim().to_string()
}

/// Graph-local entity identifier, e.g. `person-aragorn`.
///
/// Unique per `(type, lowercased canonical)` because the harvester enforces
/// canonical uniqueness within a type.
#[must_use]
pub fn entity_id(entity_type: crate::types::EntityType, canonical: &str) -> String {
    slugify(format!("{} {canonical}", entity_type.label()))
}

/// Porter stem of a lemma, used as the trigger-table key.
#[must_use]
pub fn stem(lemma: &str) -> String {
    static STEMMER: OnceLock<Stemmer> = OnceLock::new();
    let stemmer = STEMMER.get_or_init(|| Stemmer::create(Algorithm::English));
    stemmer.stem(&lemma.to_lowercase()).into_owned()
}

/// Case-folded grouping key used by relation deduplication.
#[must_use]
pub fn dedup_key(canonical: &str) -> String {
    canonical.to_lowercase()
}
