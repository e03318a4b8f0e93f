//! Coreference resolution - Stage 5 of the extraction pipeline
//!
//! Links pronouns and descriptor anaphora ("the wizard") to harvested
//! entities in a single forward pass over the parse. A bounded salience list
//! tracks the most recent named mentions; candidates are filtered by
//! number, animacy and accumulated gender evidence, then ranked by sentence
//! recency, dependency-subject preference and salience weight.
//!
//! Resolved pronouns yield virtual spans consumed by the relation inducers.
//! Unresolved pronouns emit no link. Virtual spans are never exported.

use std::collections::HashMap;

use crate::profile::{pronoun_gender, EntityProfile, Gender};
use crate::types::{
    CorefLink, CorefMethod, Entity, EntityType, Mention, ParsedSentence, PosTag, Span,
};

/// Configuration for the coreference resolver
#[derive(Debug, Clone)]
pub struct CorefConfig {
    /// Maximum distance (in sentences) to look back for antecedents
    pub max_sentence_distance: usize,
    /// Salience list capacity
    pub max_salient: usize,
}

impl Default for CorefConfig {
    fn default() -> Self {
        Self {
            max_sentence_distance: 3,
            max_salient: 24,
        }
    }
}

/// One recent named mention on the salience list
#[derive(Debug, Clone)]
struct Salient {
    entity_id: String,
    canonical: String,
    entity_type: EntityType,
    position: usize,
    sentence_index: usize,
    is_subject: bool,
    mention_count: usize,
}

/// Salience-based pronoun and descriptor resolver
#[derive(Debug, Clone, Default)]
pub struct CorefResolver {
    config: CorefConfig,
}

impl CorefResolver {
    #[must_use]
    pub const fn new(config: CorefConfig) -> Self {
        Self { config }
    }

    /// Resolve anaphora against the harvested registry.
    #[must_use]
    pub fn resolve(
        &self,
        entities: &[Entity],
        spans: &[Span],
        sentences: &[ParsedSentence],
        profiles: &HashMap<String, EntityProfile>,
    ) -> Vec<CorefLink> {
        let by_id: HashMap<&str, &Entity> =
            entities.iter().map(|e| (e.id.as_str(), e)).collect();

        // Spans in document order, annotated with sentence and subject-ness
        let mut ordered: Vec<Salient> = Vec::new();
        for span in spans {
            let Some(entity) = by_id.get(span.entity_id.as_str()) else {
                continue;
            };
            let Some(sentence) = sentences
                .iter()
                .find(|s| s.start <= span.start && span.start < s.end)
            else {
                continue;
            };
            let is_subject = sentence
                .tokens
                .iter()
                .any(|t| t.start >= span.start && t.end <= span.end && t.dep.is_subject());
            ordered.push(Salient {
                entity_id: entity.id.clone(),
                canonical: entity.canonical.clone(),
                entity_type: entity.entity_type,
                position: span.start,
                sentence_index: sentence.index,
                is_subject,
                mention_count: entity.mention_count,
            });
        }
        ordered.sort_by_key(|s| s.position);

        let mut links = Vec::new();
        let mut salience: Vec<Salient> = Vec::new();
        let mut next_span = 0usize;

        for sentence in sentences {
            for token in &sentence.tokens {
                // Admit named mentions that start before this token
                while next_span < ordered.len() && ordered[next_span].position < token.start {
                    salience.retain(|s| s.entity_id != ordered[next_span].entity_id);
                    salience.push(ordered[next_span].clone());
                    if salience.len() > self.config.max_salient {
                        salience.remove(0);
                    }
                    next_span += 1;
                }

                if token.pos == PosTag::Pron {
                    if let Some(link) =
                        self.resolve_pronoun(token.start, token.end, &token.text, sentence.index, &salience, profiles)
                    {
                        links.push(link);
                    }
                } else if token.pos == PosTag::Noun {
                    if let Some(link) = self.resolve_descriptor(
                        token.start,
                        token.end,
                        &token.text,
                        &token.lemma,
                        sentence,
                        sentence.index,
                        &salience,
                        profiles,
                    ) {
                        links.push(link);
                    }
                }
            }
        }

        links
    }

    fn resolve_pronoun(
        &self,
        start: usize,
        end: usize,
        surface: &str,
        sentence_index: usize,
        salience: &[Salient],
        profiles: &HashMap<String, EntityProfile>,
    ) -> Option<CorefLink> {
        let gender = pronoun_gender(surface)?;

        let mut candidates: Vec<&Salient> = salience
            .iter()
            .filter(|s| {
                sentence_index.saturating_sub(s.sentence_index) <= self.config.max_sentence_distance
            })
            .filter(|s| agrees(s, gender, profiles))
            .collect();
        if candidates.is_empty() {
            return None;
        }

        // Sentence recency, then subject preference, then position recency,
        // then salience weight
        candidates.sort_by(|a, b| {
            let da = sentence_index.saturating_sub(a.sentence_index);
            let db = sentence_index.saturating_sub(b.sentence_index);
            da.cmp(&db)
                .then_with(|| b.is_subject.cmp(&a.is_subject))
                .then_with(|| b.position.cmp(&a.position))
                .then_with(|| b.mention_count.cmp(&a.mention_count))
        });

        let winner = candidates[0];
        let gender_confirmed = profiles
            .get(&winner.canonical)
            .is_some_and(|p| p.gender.dominant() == Some(gender));
        let confidence = if candidates.len() == 1 && (gender_confirmed || !is_gendered(gender)) {
            1.0
        } else {
            0.7
        };

        Some(CorefLink {
            mention: Mention {
                text: surface.to_string(),
                start,
                end,
            },
            entity_id: winner.entity_id.clone(),
            method: CorefMethod::Pronoun,
            confidence,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_descriptor(
        &self,
        start: usize,
        end: usize,
        surface: &str,
        lemma: &str,
        sentence: &ParsedSentence,
        sentence_index: usize,
        salience: &[Salient],
        profiles: &HashMap<String, EntityProfile>,
    ) -> Option<CorefLink> {
        // Only definite descriptions: "the wizard"
        let has_the = sentence
            .tokens
            .iter()
            .rev()
            .find(|t| t.end <= start && t.pos != PosTag::Punct)
            .is_some_and(|t| t.text.eq_ignore_ascii_case("the"));
        if !has_the {
            return None;
        }

        let candidates: Vec<&Salient> = salience
            .iter()
            .filter(|s| {
                sentence_index.saturating_sub(s.sentence_index)
                    <= self.config.max_sentence_distance
            })
            .filter(|s| {
                profiles
                    .get(&s.canonical)
                    .is_some_and(|p| p.descriptors.contains(lemma))
            })
            .collect();

        let winner = candidates.iter().max_by_key(|s| s.position)?;
        Some(CorefLink {
            mention: Mention {
                text: surface.to_string(),
                start,
                end,
            },
            entity_id: winner.entity_id.clone(),
            method: CorefMethod::Descriptor,
            confidence: if candidates.len() == 1 { 1.0 } else { 0.7 },
        })
    }
}

fn is_gendered(gender: Gender) -> bool {
    matches!(gender, Gender::Masculine | Gender::Feminine)
}

/// Number, animacy and gender agreement between a pronoun and a candidate.
fn agrees(s: &Salient, gender: Gender, profiles: &HashMap<String, EntityProfile>) -> bool {
    let animate_ok = match gender {
        Gender::Masculine | Gender::Feminine => s.entity_type.is_animate(),
        Gender::Neuter => !s.entity_type.is_animate(),
        Gender::Plural => s.entity_type.is_collective(),
    };
    if !animate_ok {
        return false;
    }
    if is_gendered(gender) {
        if let Some(profile) = profiles.get(&s.canonical) {
            return profile.gender.compatible_with(gender);
        }
    }
    true
}

/// Convert pronoun links into virtual spans for the relation inducers.
#[must_use]
pub fn virtual_spans(links: &[CorefLink]) -> Vec<Span> {
    links
        .iter()
        .filter(|l| matches!(l.method, CorefMethod::Pronoun | CorefMethod::Descriptor))
        .map(|l| Span {
            entity_id: l.entity_id.clone(),
            start: l.mention.start,
            end: l.mention.end,
        })
        .collect()
}
