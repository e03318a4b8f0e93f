//! Deictic-reference rewriting - "there"/"here" expansion
//!
//! Produces a derived string in which "there" and "here" are replaced by an
//! explicit prepositional phrase naming the most recent PLACE/ORG/HOUSE
//! mention to the left. The derived string is consumed only by the
//! narrative-pattern inducer; substitutions are never exported and original
//! offsets never shift. `DerivedText::map_to_original` converts derived
//! offsets back so evidence always points into the source document.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::types::{Entity, EntityType, Span};

fn deictic_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([Tt]here|[Hh]ere)\b").expect("static regex"))
}

#[derive(Debug, Clone)]
struct Substitution {
    derived_start: usize,
    derived_end: usize,
    orig_start: usize,
    orig_end: usize,
}

/// A deictic-rewritten view of the document with an offset map back to the
/// original string.
#[derive(Debug, Clone)]
pub struct DerivedText {
    pub text: String,
    substitutions: Vec<Substitution>,
    /// Place expansions performed, original offset -> entity id
    pub expansions: Vec<(usize, String)>,
}

impl DerivedText {
    /// Identity view over an unmodified document.
    #[must_use]
    pub fn unchanged(text: &str) -> Self {
        Self {
            text: text.to_string(),
            substitutions: Vec::new(),
            expansions: Vec::new(),
        }
    }

    /// Map a derived offset back into the original text. Positions inside a
    /// substituted region collapse to the start of the original deictic
    /// token.
    #[must_use]
    pub fn map_to_original(&self, derived_pos: usize) -> usize {
        let mut delta: isize = 0;
        for sub in &self.substitutions {
            if derived_pos >= sub.derived_end {
                delta += (sub.derived_end - sub.derived_start) as isize
                    - (sub.orig_end - sub.orig_start) as isize;
            } else if derived_pos >= sub.derived_start {
                return sub.orig_start;
            } else {
                break;
            }
        }
        usize::try_from(derived_pos as isize - delta).unwrap_or(0)
    }

    /// Map a derived half-open range back into the original text.
    #[must_use]
    pub fn map_range(&self, start: usize, end: usize) -> (usize, usize) {
        let a = self.map_to_original(start);
        let b = self.map_to_original(end.saturating_sub(1)) + 1;
        (a, b.max(a + 1))
    }
}

/// Rewrites "there"/"here" into "in <place>" for the narrative inducer.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeicticRewriter;

impl DeicticRewriter {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Build the derived string. `spans` must be the real (non-virtual)
    /// mention spans.
    #[must_use]
    pub fn rewrite(&self, text: &str, entities: &[Entity], spans: &[Span]) -> DerivedText {
        let by_id: HashMap<&str, &Entity> =
            entities.iter().map(|e| (e.id.as_str(), e)).collect();

        // Location-like mentions sorted by position
        let mut locations: Vec<(usize, &Entity)> = spans
            .iter()
            .filter_map(|s| {
                let e = by_id.get(s.entity_id.as_str())?;
                matches!(
                    e.entity_type,
                    EntityType::Place | EntityType::Org | EntityType::House
                )
                .then_some((s.start, *e))
            })
            .collect();
        locations.sort_by_key(|(pos, _)| *pos);

        let mut out = String::with_capacity(text.len());
        let mut substitutions = Vec::new();
        let mut expansions = Vec::new();
        let mut cursor = 0;

        for m in deictic_re().find_iter(text) {
            let antecedent = locations
                .iter()
                .rev()
                .find(|(pos, _)| *pos < m.start())
                .map(|(_, e)| *e);
            let Some(entity) = antecedent else { continue };

            out.push_str(&text[cursor..m.start()]);
            let derived_start = out.len();
            out.push_str("in ");
            out.push_str(&entity.canonical);
            substitutions.push(Substitution {
                derived_start,
                derived_end: out.len(),
                orig_start: m.start(),
                orig_end: m.end(),
            });
            expansions.push((m.start(), entity.id.clone()));
            cursor = m.end();
        }
        out.push_str(&text[cursor..]);

        DerivedText {
            text: out,
            substitutions,
            expansions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn place(name: &str) -> Entity {
        Entity::new(EntityType::Place, name)
    }

    #[test]
    fn test_there_rewritten_to_place() {
        let text = "Aragorn rode to Gondor. He settled there.";
        let gondor = place("Gondor");
        let spans = vec![Span {
            entity_id: gondor.id.clone(),
            start: 16,
            end: 22,
        }];
        let derived = DeicticRewriter::new().rewrite(text, &[gondor], &spans);
        assert_eq!(
            derived.text,
            "Aragorn rode to Gondor. He settled in Gondor."
        );
        assert_eq!(derived.expansions.len(), 1);
    }

    #[test]
    fn test_no_antecedent_keeps_text() {
        let text = "He settled there.";
        let derived = DeicticRewriter::new().rewrite(text, &[], &[]);
        assert_eq!(derived.text, text);
        assert!(derived.expansions.is_empty());
    }

    #[test]
    fn test_antecedent_must_be_left() {
        let text = "He settled there. Gondor was warm.";
        let gondor = place("Gondor");
        let spans = vec![Span {
            entity_id: gondor.id.clone(),
            start: 18,
            end: 24,
        }];
        let derived = DeicticRewriter::new().rewrite(text, &[gondor], &spans);
        assert_eq!(derived.text, text);
    }

    #[test]
    fn test_offset_mapping() {
        let text = "Aragorn rode to Gondor. He settled there.";
        let gondor = place("Gondor");
        let spans = vec![Span {
            entity_id: gondor.id.clone(),
            start: 16,
            end: 22,
        }];
        let derived = DeicticRewriter::new().rewrite(text, &[gondor], &spans);

        // Before the substitution: identity
        assert_eq!(derived.map_to_original(0), 0);
        assert_eq!(derived.map_to_original(16), 16);
        // Inside the substituted region: collapses to the deictic token
        let there_pos = text.find("there").unwrap();
        let in_pos = derived.text.find("in Gondor").unwrap();
        assert_eq!(derived.map_to_original(in_pos), there_pos);
        // After: shifted back by the length delta
        let derived_dot = derived.text.rfind('.').unwrap();
        let orig_dot = text.rfind('.').unwrap();
        assert_eq!(derived.map_to_original(derived_dot), orig_dot);
    }

    #[test]
    fn test_word_boundary_respected() {
        // "thereafter" must not match
        let text = "Gondor prospered thereafter.";
        let gondor = place("Gondor");
        let spans = vec![Span {
            entity_id: gondor.id.clone(),
            start: 0,
            end: 6,
        }];
        let derived = DeicticRewriter::new().rewrite(text, &[gondor], &spans);
        assert_eq!(derived.text, text);
    }
}
