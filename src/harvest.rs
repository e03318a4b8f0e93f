//! Entity harvester - Stage 3 of the extraction pipeline
//!
//! Produces the deduplicated entity registry with mention spans for a whole
//! document. For each segment a context window of `W` characters on either
//! side selects the sentences whose NER output is considered; candidates
//! whose complete mention does not fall inside the segment itself are
//! discarded, so overlapping windows never double-harvest a mention.
//!
//! Candidates run through span trimming, canonicalization, a PERSON
//! name-overlap merge, the quality validator, and a type corrector before
//! they reach the registry. Two entities of the same type never share a
//! lowercased canonical.

use std::collections::HashMap;

use crate::entity_filter::EntityQualityFilter;
use crate::normalize::{canonicalize_name, stem};
use crate::types::{DepLabel, Entity, EntityType, ParsedSentence, PosTag, Segment, Span, Token};

/// Verb stems whose prepositional object is an institution.
const EDUCATION_STEMS: &[&str] = &["studi", "attend", "graduat", "teach", "enrol", "enroll", "lectur"];

/// Verb stems whose object or prepositional object is a location.
const LOCATION_STEMS: &[&str] = &[
    "live", "dwell", "resid", "settl", "travel", "go", "journey", "ride", "sail", "march",
    "flee", "conquer", "rule", "reign", "govern", "invad",
];

/// Relational-noun lemmas whose `of`-object is an institution.
const INSTITUTION_NOUNS: &[&str] = &[
    "headmaster", "headmistress", "leader", "head", "chief", "member", "dean", "president",
];

/// Output of the harvest pass.
#[derive(Debug, Default)]
pub struct Harvest {
    pub entities: Vec<Entity>,
    pub spans: Vec<Span>,
    /// Entity ids merged away during harvesting, old id -> surviving id.
    /// Applied to relation endpoints by the post-processor.
    pub id_remap: HashMap<String, String>,
    /// Candidates rejected by the inline validator
    pub rejected: usize,
}

impl Harvest {
    /// Look up an entity by graph-local id.
    #[must_use]
    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id == id)
    }
}

/// Entity harvester over parsed sentences.
#[derive(Debug, Clone, Copy)]
pub struct Harvester {
    /// Context window in characters around each segment
    pub context_window: usize,
}

impl Default for Harvester {
    fn default() -> Self {
        Self {
            context_window: 200,
        }
    }
}

impl Harvester {
    #[must_use]
    pub const fn new(context_window: usize) -> Self {
        Self { context_window }
    }

    /// Harvest entities and spans for the document.
    #[must_use]
    pub fn harvest(
        &self,
        text: &str,
        segments: &[Segment],
        sentences: &[ParsedSentence],
        filter: &EntityQualityFilter,
    ) -> Harvest {
        let mut out = Harvest::default();
        let mut registry: HashMap<(EntityType, String), usize> = HashMap::new();
        let mut seq = 0u64;

        for segment in segments {
            let win_start = segment.start.saturating_sub(self.context_window);
            let win_end = (segment.end + self.context_window).min(text.len());

            for sentence in sentences
                .iter()
                .filter(|s| s.start < win_end && s.end > win_start)
            {
                for (first, last) in mention_groups(&sentence.tokens) {
                    let tokens = &sentence.tokens[first..=last];
                    let raw_start = tokens[0].start;
                    let raw_end = tokens[tokens.len() - 1].end;

                    // The complete mention must lie inside the segment
                    if raw_start < segment.start || raw_end > segment.end {
                        continue;
                    }

                    let Some((start, end)) = trim_span(text, raw_start, raw_end) else {
                        continue;
                    };
                    let mention_text = &text[start..end];
                    let canonical = canonicalize_name(mention_text);
                    if canonical.is_empty() {
                        continue;
                    }

                    let guessed = tokens[0].ent_type.unwrap_or(EntityType::Person);
                    let entity_type =
                        corrected_type(guessed, &canonical, sentence, first, last);

                    self.register(
                        &mut out,
                        &mut registry,
                        &mut seq,
                        filter,
                        entity_type,
                        &canonical,
                        mention_text,
                        start,
                        end,
                    );
                }
            }
        }

        out
    }

    #[allow(clippy::too_many_arguments)]
    fn register(
        &self,
        out: &mut Harvest,
        registry: &mut HashMap<(EntityType, String), usize>,
        seq: &mut u64,
        filter: &EntityQualityFilter,
        entity_type: EntityType,
        canonical: &str,
        mention_text: &str,
        start: usize,
        end: usize,
    ) {
        let key = (entity_type, canonical.to_lowercase());

        // 1. Exact-key hit
        if let Some(&idx) = registry.get(&key) {
            let entity = &mut out.entities[idx];
            entity.mention_count += 1;
            let surface = canonicalize_name(mention_text);
            if !surface.is_empty()
                && !entity.answers_to(&surface)
                && !EntityQualityFilter::is_pronoun(&surface)
            {
                entity.aliases.insert(surface);
            }
            out.spans.push(Span {
                entity_id: entity.id.clone(),
                start,
                end,
            });
            return;
        }

        // 2. PERSON name-overlap merge
        if entity_type == EntityType::Person {
            if let Some(idx) = self.overlap_target(out, registry, canonical) {
                let candidate_longer = {
                    let entity = &out.entities[idx];
                    word_count(canonical) > word_count(&entity.canonical)
                };
                let entity = &mut out.entities[idx];
                entity.mention_count += 1;
                if candidate_longer {
                    // Upgrade canonical to the longer, more specific form
                    let old_key = entity.key();
                    registry.remove(&old_key);
                    entity.aliases.insert(entity.canonical.clone());
                    entity.canonical = canonical.to_string();
                    registry.insert(entity.key(), idx);
                } else {
                    entity.aliases.insert(canonical.to_string());
                }
                out.spans.push(Span {
                    entity_id: entity.id.clone(),
                    start,
                    end,
                });
                return;
            }
        }

        // 3. Fresh entity, if the validator accepts it
        if filter.validate(canonical, entity_type, None).is_err() {
            out.rejected += 1;
            return;
        }
        let mut entity = Entity::new(entity_type, canonical);
        entity.mention_count = 1;
        entity.created_at = *seq;
        *seq += 1;
        let id = entity.id.clone();
        registry.insert(entity.key(), out.entities.len());
        out.entities.push(entity);
        out.spans.push(Span {
            entity_id: id,
            start,
            end,
        });
    }

    /// Find an existing PERSON whose canonical shares a word with the
    /// candidate where one name is a proper token-subset of the other.
    fn overlap_target(
        &self,
        out: &Harvest,
        registry: &HashMap<(EntityType, String), usize>,
        canonical: &str,
    ) -> Option<usize> {
        let cand: Vec<String> = canonical
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        registry
            .iter()
            .filter(|((ty, _), _)| *ty == EntityType::Person)
            .map(|(_, &idx)| idx)
            .filter(|&idx| {
                let existing: Vec<String> = out.entities[idx]
                    .canonical
                    .split_whitespace()
                    .map(str::to_lowercase)
                    .collect();
                let shares = cand.iter().any(|w| existing.contains(w));
                let subset = (cand.len() < existing.len()
                    && cand.iter().all(|w| existing.contains(w)))
                    || (existing.len() < cand.len()
                        && existing.iter().all(|w| cand.contains(w)));
                shares && subset
            })
            .min_by_key(|&idx| out.entities[idx].created_at)
    }
}

/// Group consecutive tokens that carry the same NER hint.
fn mention_groups(tokens: &[Token]) -> Vec<(usize, usize)> {
    let mut groups = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let Some(ent) = tokens[i].ent_type else {
            i += 1;
            continue;
        };
        let mut last = i;
        while last + 1 < tokens.len()
            && tokens[last + 1].ent_type == Some(ent)
            && tokens[last + 1].index == tokens[last].index + 1
        {
            last += 1;
        }
        groups.push((i, last));
        i = last + 1;
    }
    groups
}

/// Walk left over non-alphabetic characters and right while word characters
/// continue, recovering clean word boundaries.
fn trim_span(text: &str, start: usize, end: usize) -> Option<(usize, usize)> {
    let mut a = start;
    while a < end {
        let ch = text[a..].chars().next()?;
        if ch.is_alphanumeric() {
            break;
        }
        a += ch.len_utf8();
    }
    if a >= end {
        return None;
    }

    let mut b = end;
    while b < text.len() {
        let ch = text[b..].chars().next()?;
        if ch.is_alphanumeric() || ch == '\'' || ch == '\u{2019}' {
            b += ch.len_utf8();
        } else {
            break;
        }
    }
    // Retreat over trailing non-word characters inside the original span
    while b > a {
        let ch = text[..b].chars().next_back()?;
        if ch.is_alphanumeric() {
            break;
        }
        b -= ch.len_utf8();
    }
    (a < b).then_some((a, b))
}

/// Force a corrected type from lexical markers and the governing context.
///
/// Lexical markers were already applied by the NER run grouping; this
/// corrects the PERSON default using the verb or relational noun that
/// governs the mention.
fn corrected_type(
    guessed: EntityType,
    canonical: &str,
    sentence: &ParsedSentence,
    first: usize,
    last: usize,
) -> EntityType {
    if guessed != EntityType::Person {
        return guessed;
    }
    if let Some(marker) = lexical_override(canonical) {
        return marker;
    }

    // Mention head: the token whose head lies outside the group
    let head = (first..=last)
        .rev()
        .find(|&i| sentence.tokens[i].head_index < first || sentence.tokens[i].head_index > last)
        .unwrap_or(last);
    let head_tok = &sentence.tokens[head];

    match &head_tok.dep {
        DepLabel::Pobj => {
            let prep = sentence.tokens.get(head_tok.head_index);
            let governor = prep.and_then(|p| sentence.tokens.get(p.head_index));
            if let (Some(prep), Some(gov)) = (prep, governor) {
                let prep_lower = prep.text.to_lowercase();
                let gov_stem = stem(&gov.lemma);
                if gov.pos == PosTag::Verb {
                    if EDUCATION_STEMS.contains(&gov_stem.as_str())
                        && matches!(prep_lower.as_str(), "at" | "from" | "in")
                    {
                        return EntityType::Org;
                    }
                    if LOCATION_STEMS.contains(&gov_stem.as_str()) {
                        return EntityType::Place;
                    }
                }
                if gov.pos == PosTag::Noun
                    && INSTITUTION_NOUNS.contains(&gov.lemma.as_str())
                    && prep_lower == "of"
                {
                    return EntityType::Org;
                }
                // "king of X" rules a realm
                if gov.pos == PosTag::Noun
                    && matches!(
                        gov.lemma.as_str(),
                        "king" | "queen" | "ruler" | "emperor" | "empress"
                    )
                    && prep_lower == "of"
                {
                    return EntityType::Place;
                }
            }
            guessed
        }
        DepLabel::Obj | DepLabel::Dobj => {
            let gov = sentence.tokens.get(head_tok.head_index);
            if let Some(gov) = gov {
                if gov.pos == PosTag::Verb
                    && matches!(
                        stem(&gov.lemma).as_str(),
                        "conquer" | "rule" | "invad" | "reign" | "reach"
                    )
                {
                    return EntityType::Place;
                }
            }
            guessed
        }
        _ => guessed,
    }
}

/// Lexical type markers that win over the NER guess.
fn lexical_override(canonical: &str) -> Option<EntityType> {
    let words: Vec<String> = canonical
        .split_whitespace()
        .map(str::to_lowercase)
        .collect();
    let first = words.first().map(String::as_str)?;
    let last = words.last().map(String::as_str)?;

    if last == "family" || first == "house" {
        return Some(EntityType::House);
    }
    if matches!(last, "tribe" | "clan") {
        return Some(EntityType::Tribe);
    }
    if matches!(
        last,
        "river" | "mountain" | "lake" | "forest" | "castle" | "empire" | "kingdom" | "city"
    ) {
        return Some(EntityType::Place);
    }
    None
}

fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{Parser, RuleBasedParser};
    use crate::segmenter::Segmenter;

    fn run(text: &str) -> Harvest {
        let segments = Segmenter::new().segment("doc", text).unwrap();
        let sentences = RuleBasedParser::new().parse(text).unwrap();
        Harvester::default().harvest(text, &segments, &sentences, &EntityQualityFilter::default())
    }

    #[test]
    fn test_basic_harvest() {
        let h = run("Aragorn married Arwen.");
        let names: Vec<&str> = h.entities.iter().map(|e| e.canonical.as_str()).collect();
        assert!(names.contains(&"Aragorn"));
        assert!(names.contains(&"Arwen"));
        assert_eq!(h.spans.len(), 2);
    }

    #[test]
    fn test_mentions_deduplicate() {
        let h = run("Aragorn slept. Aragorn woke. Aragorn left.");
        let aragorn = h
            .entities
            .iter()
            .find(|e| e.canonical == "Aragorn")
            .unwrap();
        assert_eq!(aragorn.mention_count, 3);
        assert_eq!(
            h.spans
                .iter()
                .filter(|s| s.entity_id == aragorn.id)
                .count(),
            3
        );
    }

    #[test]
    fn test_article_stripped_from_canonical() {
        let h = run("He saw the Mongol Empire.");
        let empire = h.entities.iter().find(|e| e.canonical == "Mongol Empire");
        assert!(empire.is_some());
        assert_eq!(empire.unwrap().entity_type, EntityType::Place);
    }

    #[test]
    fn test_person_name_overlap_merge_upgrades() {
        let h = run("Edward lived quietly. Edward Blackwood ruled the valley.");
        let edward = h
            .entities
            .iter()
            .find(|e| e.canonical == "Edward Blackwood")
            .expect("canonical should upgrade to the longer form");
        assert!(edward.aliases.contains("Edward"));
        assert_eq!(edward.mention_count, 2);
        assert_eq!(
            h.entities
                .iter()
                .filter(|e| e.entity_type == EntityType::Person
                    && e.canonical.contains("Edward"))
                .count(),
            1
        );
    }

    #[test]
    fn test_person_name_overlap_merge_shorter_becomes_alias() {
        let h = run("Professor McGonagall taught. McGonagall smiled.");
        let prof = h
            .entities
            .iter()
            .find(|e| e.canonical == "Professor McGonagall")
            .unwrap();
        assert!(prof.aliases.contains("McGonagall"));
        assert_eq!(prof.mention_count, 2);
    }

    #[test]
    fn test_education_object_coerced_to_org() {
        let h = run("Harry studied at Hogwarts.");
        let hogwarts = h.entities.iter().find(|e| e.canonical == "Hogwarts").unwrap();
        assert_eq!(hogwarts.entity_type, EntityType::Org);
    }

    #[test]
    fn test_conquered_object_coerced_to_place() {
        let h = run("Genghis Khan conquered Samarkand in 1220.");
        let samarkand = h
            .entities
            .iter()
            .find(|e| e.canonical == "Samarkand")
            .unwrap();
        assert_eq!(samarkand.entity_type, EntityType::Place);
        let year = h.entities.iter().find(|e| e.canonical == "1220").unwrap();
        assert_eq!(year.entity_type, EntityType::Date);
    }

    #[test]
    fn test_house_marker() {
        let h = run("The Blackwood family lived in Thornhold Castle.");
        let family = h
            .entities
            .iter()
            .find(|e| e.canonical == "Blackwood family")
            .unwrap();
        assert_eq!(family.entity_type, EntityType::House);
    }

    #[test]
    fn test_possessive_dropped() {
        let h = run("Beren's sword gleamed.");
        assert!(h.entities.iter().any(|e| e.canonical == "Beren"));
    }

    #[test]
    fn test_same_canonical_different_type_coexist() {
        let h = run("Avalon sailed west. She reached the Avalon River.");
        let types: Vec<EntityType> = h
            .entities
            .iter()
            .filter(|e| e.canonical.contains("Avalon"))
            .map(|e| e.entity_type)
            .collect();
        assert!(types.contains(&EntityType::Place));
    }

    #[test]
    fn test_unique_canonical_per_type() {
        let h = run("Aragorn met Aragorn.");
        assert_eq!(
            h.entities
                .iter()
                .filter(|e| e.canonical == "Aragorn")
                .count(),
            1
        );
    }
}
