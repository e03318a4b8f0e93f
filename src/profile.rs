//! Entity profile builder - the context accumulator behind coreference and
//! sense disambiguation
//!
//! Reads entities, spans and parsed sentences and accumulates per-canonical
//! features: mention counts, sentence coverage, titles (`title NAME`),
//! descriptors following the definite article ("the wizard"), gender votes
//! from titles and surrounding pronouns, and co-occurring locations and
//! organizations. Profiles are restartable across documents: callers pass a
//! prior map and it is updated in place.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::types::{DepLabel, Entity, EntityType, ParsedSentence, PosTag, Span};

const MASCULINE_TITLES: &[&str] = &[
    "mr", "sir", "lord", "king", "prince", "duke", "baron", "emperor", "headmaster",
];
const FEMININE_TITLES: &[&str] = &[
    "mrs", "ms", "miss", "lady", "queen", "princess", "duchess", "empress", "headmistress",
];
const NEUTRAL_TITLES: &[&str] = &[
    "dr", "professor", "prof", "captain", "general", "master", "saint", "st",
];

/// Accumulated pronoun-gender evidence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenderVotes {
    pub masculine: u32,
    pub feminine: u32,
    pub neuter: u32,
    pub plural: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Masculine,
    Feminine,
    Neuter,
    Plural,
}

impl GenderVotes {
    /// The winning gender, if any votes were cast.
    #[must_use]
    pub fn dominant(&self) -> Option<Gender> {
        let max = self
            .masculine
            .max(self.feminine)
            .max(self.neuter)
            .max(self.plural);
        if max == 0 {
            return None;
        }
        if self.masculine == max {
            Some(Gender::Masculine)
        } else if self.feminine == max {
            Some(Gender::Feminine)
        } else if self.plural == max {
            Some(Gender::Plural)
        } else {
            Some(Gender::Neuter)
        }
    }

    /// Whether the evidence is compatible with `gender`. Entities with no
    /// votes are compatible with anything.
    #[must_use]
    pub fn compatible_with(&self, gender: Gender) -> bool {
        match self.dominant() {
            None => true,
            Some(d) => d == gender,
        }
    }

    fn vote(&mut self, gender: Gender) {
        match gender {
            Gender::Masculine => self.masculine += 1,
            Gender::Feminine => self.feminine += 1,
            Gender::Neuter => self.neuter += 1,
            Gender::Plural => self.plural += 1,
        }
    }
}

/// Running aggregate of contextual features for one canonical name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityProfile {
    pub canonical: String,
    pub entity_type: Option<EntityType>,
    pub mention_count: usize,
    pub sentence_indices: BTreeSet<usize>,
    /// Title words seen as `title NAME`
    pub titles: BTreeSet<String>,
    /// Descriptor lemmas seen after the definite article
    pub descriptors: BTreeSet<String>,
    pub gender: GenderVotes,
    pub co_locations: BTreeSet<String>,
    pub co_orgs: BTreeSet<String>,
    /// Predicate labels this entity participates in (filled after relation
    /// extraction; consumed by sense disambiguation)
    pub relation_labels: BTreeSet<String>,
}

impl EntityProfile {
    #[must_use]
    pub fn new(canonical: &str, entity_type: EntityType) -> Self {
        Self {
            canonical: canonical.to_string(),
            entity_type: Some(entity_type),
            ..Self::default()
        }
    }
}

/// Builds or extends profiles from one document's entities and parse.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileBuilder;

impl ProfileBuilder {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Accumulate features into `profiles`, keyed by canonical name.
    pub fn build_into(
        &self,
        profiles: &mut HashMap<String, EntityProfile>,
        entities: &[Entity],
        spans: &[Span],
        sentences: &[ParsedSentence],
    ) {
        let by_id: HashMap<&str, &Entity> =
            entities.iter().map(|e| (e.id.as_str(), e)).collect();

        // Sentence occupancy per entity, and per-sentence person census
        let mut persons_in_sentence: HashMap<usize, Vec<&str>> = HashMap::new();
        let mut entities_in_sentence: HashMap<usize, Vec<&str>> = HashMap::new();

        for span in spans {
            let Some(entity) = by_id.get(span.entity_id.as_str()) else {
                continue;
            };
            let Some(sentence) = sentence_at(sentences, span.start) else {
                continue;
            };

            let profile = profiles
                .entry(entity.canonical.clone())
                .or_insert_with(|| EntityProfile::new(&entity.canonical, entity.entity_type));
            profile.entity_type = Some(entity.entity_type);
            profile.mention_count += 1;
            profile.sentence_indices.insert(sentence.index);

            entities_in_sentence
                .entry(sentence.index)
                .or_default()
                .push(entity.id.as_str());
            if entity.entity_type == EntityType::Person {
                persons_in_sentence
                    .entry(sentence.index)
                    .or_default()
                    .push(entity.id.as_str());
            }

            self.collect_titles(profile, entity, span, sentence);
            self.collect_descriptors(profile, span, sentence);
        }

        // Co-occurring locations and organizations
        for ids in entities_in_sentence.values() {
            let places: Vec<&str> = ids
                .iter()
                .filter_map(|id| by_id.get(id))
                .filter(|e| e.entity_type == EntityType::Place)
                .map(|e| e.canonical.as_str())
                .collect();
            let orgs: Vec<&str> = ids
                .iter()
                .filter_map(|id| by_id.get(id))
                .filter(|e| e.entity_type == EntityType::Org)
                .map(|e| e.canonical.as_str())
                .collect();
            for id in ids {
                let Some(entity) = by_id.get(id) else { continue };
                let Some(profile) = profiles.get_mut(&entity.canonical) else {
                    continue;
                };
                for p in &places {
                    if *p != entity.canonical {
                        profile.co_locations.insert((*p).to_string());
                    }
                }
                for o in &orgs {
                    if *o != entity.canonical {
                        profile.co_orgs.insert((*o).to_string());
                    }
                }
            }
        }

        // Pronoun gender votes: when a sentence holds exactly one person,
        // gendered pronouns in that sentence and the next vote for it
        for sentence in sentences {
            let mut sole_person: Option<&str> = None;
            for back in [1usize, 0] {
                let Some(idx) = sentence.index.checked_sub(back) else {
                    continue;
                };
                if let Some(ids) = persons_in_sentence.get(&idx) {
                    let mut unique: Vec<&str> = ids.clone();
                    unique.sort_unstable();
                    unique.dedup();
                    if unique.len() == 1 {
                        sole_person = Some(unique[0]);
                        break;
                    }
                }
            }
            let Some(person_id) = sole_person else { continue };
            let Some(entity) = by_id.get(person_id) else {
                continue;
            };

            for token in &sentence.tokens {
                if token.pos != PosTag::Pron {
                    continue;
                }
                if let Some(gender) = pronoun_gender(&token.text) {
                    if let Some(profile) = profiles.get_mut(&entity.canonical) {
                        profile.gender.vote(gender);
                    }
                }
            }
        }
    }

    fn collect_titles(
        &self,
        profile: &mut EntityProfile,
        entity: &Entity,
        span: &Span,
        sentence: &ParsedSentence,
    ) {
        // Titles embedded in the canonical ("Professor McGonagall")
        if let Some(first_word) = entity.canonical.split_whitespace().next() {
            let lower = first_word.trim_end_matches('.').to_lowercase();
            if let Some(gender) = title_gender(&lower) {
                profile.titles.insert(lower);
                if let Some(g) = gender {
                    profile.gender.vote(g);
                }
                return;
            }
        }
        // Title token immediately before the span
        let before = sentence
            .tokens
            .iter()
            .rev()
            .find(|t| t.end <= span.start && t.pos != PosTag::Punct);
        if let Some(tok) = before {
            let lower = tok.text.trim_end_matches('.').to_lowercase();
            if let Some(gender) = title_gender(&lower) {
                profile.titles.insert(lower);
                if let Some(g) = gender {
                    profile.gender.vote(g);
                }
            }
        }
    }

    /// Descriptors: "NAME, the wizard, ..." appositives and
    /// "NAME was a wizard" copulas.
    fn collect_descriptors(
        &self,
        profile: &mut EntityProfile,
        span: &Span,
        sentence: &ParsedSentence,
    ) {
        let in_span =
            |t: &crate::types::Token| t.start >= span.start && t.end <= span.end;
        let span_is_subject = sentence
            .tokens
            .iter()
            .any(|t| in_span(t) && t.dep.is_subject());

        for token in &sentence.tokens {
            if token.pos != PosTag::Noun {
                continue;
            }
            let appositive_of_span = token.dep == DepLabel::Appos
                && sentence
                    .tokens
                    .get(token.head_index)
                    .is_some_and(|h| in_span(h));
            let copular_attr = token.dep == DepLabel::Attr && span_is_subject;
            if (appositive_of_span || copular_attr) && has_article(sentence, token.index) {
                profile.descriptors.insert(token.lemma.clone());
            }
        }
    }
}

fn has_article(sentence: &ParsedSentence, index: usize) -> bool {
    index > 0
        && sentence.tokens[..index]
            .iter()
            .rev()
            .take(2)
            .any(|t| matches!(t.text.to_lowercase().as_str(), "the" | "a" | "an"))
}

fn sentence_at(sentences: &[ParsedSentence], offset: usize) -> Option<&ParsedSentence> {
    sentences
        .iter()
        .find(|s| s.start <= offset && offset < s.end)
}

fn title_gender(lower: &str) -> Option<Option<Gender>> {
    if MASCULINE_TITLES.contains(&lower) {
        Some(Some(Gender::Masculine))
    } else if FEMININE_TITLES.contains(&lower) {
        Some(Some(Gender::Feminine))
    } else if NEUTRAL_TITLES.contains(&lower) {
        Some(None)
    } else {
        None
    }
}

/// Gender class of a pronoun surface, if it is gendered.
#[must_use]
pub fn pronoun_gender(surface: &str) -> Option<Gender> {
    match surface.to_lowercase().as_str() {
        "he" | "him" | "his" | "himself" => Some(Gender::Masculine),
        "she" | "her" | "hers" | "herself" => Some(Gender::Feminine),
        "it" | "its" | "itself" => Some(Gender::Neuter),
        "they" | "them" | "their" | "theirs" | "themselves" => Some(Gender::Plural),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity_filter::EntityQualityFilter;
    use crate::harvest::Harvester;
    use crate::parser::{Parser, RuleBasedParser};
    use crate::segmenter::Segmenter;

    fn profiles_for(text: &str) -> HashMap<String, EntityProfile> {
        let segments = Segmenter::new().segment("doc", text).unwrap();
        let sentences = RuleBasedParser::new().parse(text).unwrap();
        let harvest = Harvester::default().harvest(
            text,
            &segments,
            &sentences,
            &EntityQualityFilter::default(),
        );
        let mut profiles = HashMap::new();
        ProfileBuilder::new().build_into(&mut profiles, &harvest.entities, &harvest.spans, &sentences);
        profiles
    }

    #[test]
    fn test_mention_count_and_sentences() {
        let profiles = profiles_for("Aragorn slept. Aragorn woke.");
        let p = &profiles["Aragorn"];
        assert_eq!(p.mention_count, 2);
        assert_eq!(p.sentence_indices.len(), 2);
    }

    #[test]
    fn test_title_recorded_with_gender() {
        let profiles = profiles_for("Queen Arwen ruled Gondor.");
        let p = &profiles["Queen Arwen"];
        assert!(p.titles.contains("queen"));
        assert_eq!(p.gender.dominant(), Some(Gender::Feminine));
    }

    #[test]
    fn test_neutral_title_casts_no_gender_vote() {
        let profiles = profiles_for("Professor McGonagall taught Transfiguration.");
        let p = &profiles["Professor McGonagall"];
        assert!(p.titles.contains("professor"));
    }

    #[test]
    fn test_pronoun_votes_for_sole_person() {
        let profiles = profiles_for("Harry trained hard. He defeated Voldemort.");
        // "Harry" is the only person in sentence 0; "He" in sentence 1 votes
        let p = &profiles["Harry"];
        assert!(p.gender.masculine >= 1);
    }

    #[test]
    fn test_co_locations() {
        let profiles = profiles_for("Genghis Khan conquered Samarkand in 1220.");
        let p = &profiles["Genghis Khan"];
        assert!(p.co_locations.contains("Samarkand"));
    }

    #[test]
    fn test_descriptor_from_appositive() {
        let profiles = profiles_for("Gandalf, the wizard, arrived at dawn.");
        let p = &profiles["Gandalf"];
        assert!(p.descriptors.contains("wizard"));
    }

    #[test]
    fn test_profiles_restartable() {
        let text1 = "Aragorn slept.";
        let text2 = "Aragorn woke.";
        let mut profiles = HashMap::new();
        for text in [text1, text2] {
            let segments = Segmenter::new().segment("doc", text).unwrap();
            let sentences = RuleBasedParser::new().parse(text).unwrap();
            let harvest = Harvester::default().harvest(
                text,
                &segments,
                &sentences,
                &EntityQualityFilter::default(),
            );
            ProfileBuilder::new().build_into(
                &mut profiles,
                &harvest.entities,
                &harvest.spans,
                &sentences,
            );
        }
        assert_eq!(profiles["Aragorn"].mention_count, 2);
    }
}
