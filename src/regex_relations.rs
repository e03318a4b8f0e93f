//! Surface-pattern relation inducer - the regex fallback
//!
//! A small battery of surface patterns ("X, son of Y", "X married Y", ...)
//! run per segment. Matches are bound to harvested entities through the same
//! canonicalization as the harvester and pass the same type guard as the
//! dependency inducer. Everything emits at confidence 0.7 with
//! `extractor = regex`.

use regex::Regex;
use std::sync::OnceLock;

use crate::normalize::canonicalize_name;
use crate::predicates::Predicate;
use crate::types::{Entity, Evidence, Extractor, Relation, Segment};

/// One surface pattern with its predicate.
struct SurfacePattern {
    regex: Regex,
    pred: Predicate,
}

const REGEX_CONFIDENCE: f64 = 0.7;

/// Capitalized name sequence, optionally joined by "of"/"the".
const NAME: &str = r"[A-Z][\w'\u{2019}-]*(?: (?:of |the )?[A-Z][\w'\u{2019}-]*)*";

fn battery() -> &'static [SurfacePattern] {
    static PATTERNS: OnceLock<Vec<SurfacePattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let mut patterns = Vec::new();
        let mut add = |template: &str, pred: Predicate| {
            let source = template.replace("{N}", NAME);
            patterns.push(SurfacePattern {
                regex: Regex::new(&source).expect("static surface pattern"),
                pred,
            });
        };

        add(r"(?P<a>{N}), (?:the )?(?:son|daughter|child) of (?P<b>{N})", Predicate::ChildOf);
        add(r"(?P<a>{N}) begat (?P<b>{N})", Predicate::ParentOf);
        add(r"(?P<a>{N}) (?:married|wed) (?P<b>{N})", Predicate::MarriedTo);
        add(r"(?P<a>{N}) travell?ed to (?P<b>{N})", Predicate::TraveledTo);
        add(r"(?P<a>{N}) studied at (?P<b>{N})", Predicate::StudiesAt);
        add(r"(?P<a>{N}) (?:attended|graduated from) (?P<b>{N})", Predicate::Attended);
        add(r"(?P<a>{N}) (?:taught|teaches) at (?P<b>{N})", Predicate::TeachesAt);
        add(r"(?P<a>{N}) conquered (?:the )?(?P<b>{N})", Predicate::Rules);
        add(r"(?P<a>{N}) ruled (?:the )?(?P<b>{N})", Predicate::Rules);
        add(
            r"(?P<a>{N}) and (?P<b>{N}) (?:were|are) (?:close )?friends",
            Predicate::FriendsWith,
        );
        add(
            r"(?P<a>{N}) and (?P<b>{N}) (?:were|are) (?:brothers|sisters|siblings|twins)",
            Predicate::SiblingOf,
        );
        add(r"(?P<a>{N}) (?:lived|dwelt|resided) in (?:the )?(?P<b>{N})", Predicate::LivesIn);
        add(r"(?P<a>{N}) (?:defeated|fought|battled) (?P<b>{N})", Predicate::EnemyOf);
        add(r"(?P<a>{N}) invested in (?P<b>{N})", Predicate::InvestedIn);
        patterns
    })
}

/// Diagnostic counters from the regex pass
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexStats {
    pub guard_violations: usize,
    pub emitted: usize,
}

/// Surface-pattern relation inducer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexRelationInducer;

impl RegexRelationInducer {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Run the battery over every segment.
    #[must_use]
    pub fn induce(
        &self,
        doc_id: &str,
        segments: &[Segment],
        entities: &[Entity],
    ) -> (Vec<Relation>, RegexStats) {
        let mut out = Vec::new();
        let mut stats = RegexStats::default();

        for (segment_index, segment) in segments.iter().enumerate() {
            for pattern in battery() {
                for captures in pattern.regex.captures_iter(&segment.text) {
                    let (Some(a), Some(b)) = (captures.name("a"), captures.name("b")) else {
                        continue;
                    };
                    let Some(subj) = bind(entities, a.as_str()) else {
                        continue;
                    };
                    let Some(obj) = bind(entities, b.as_str()) else {
                        continue;
                    };
                    if subj.id == obj.id {
                        continue;
                    }
                    if !pattern.pred.allows(subj.entity_type, obj.entity_type) {
                        stats.guard_violations += 1;
                        continue;
                    }

                    let whole = captures.get(0).map_or(0..0, |m| m.range());
                    out.push(
                        Relation::new(&subj.id, pattern.pred, &obj.id)
                            .with_confidence(REGEX_CONFIDENCE)
                            .with_extractor(Extractor::Regex)
                            .with_evidence(Evidence {
                                doc_id: doc_id.to_string(),
                                start: segment.start + whole.start,
                                end: segment.start + whole.end,
                                sentence_index: segment_index,
                            }),
                    );
                    stats.emitted += 1;
                }
            }
        }

        (out, stats)
    }
}

/// Bind a captured surface form to a harvested entity.
fn bind<'a>(entities: &'a [Entity], surface: &str) -> Option<&'a Entity> {
    let canonical = canonicalize_name(surface);
    if canonical.is_empty() {
        return None;
    }
    entities.iter().find(|e| e.answers_to(&canonical))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity_filter::EntityQualityFilter;
    use crate::harvest::Harvester;
    use crate::parser::{Parser, RuleBasedParser};
    use crate::segmenter::Segmenter;
    use crate::types::EntityType;

    fn run(text: &str) -> (Vec<Relation>, Vec<Entity>) {
        let segments = Segmenter::new().segment("doc", text).unwrap();
        let sentences = RuleBasedParser::new().parse(text).unwrap();
        let harvest = Harvester::default().harvest(
            text,
            &segments,
            &sentences,
            &EntityQualityFilter::default(),
        );
        let (rels, _) =
            RegexRelationInducer::new().induce("doc", &segments, &harvest.entities);
        (rels, harvest.entities)
    }

    fn canonical_of<'a>(entities: &'a [Entity], id: &str) -> &'a str {
        &entities.iter().find(|e| e.id == id).unwrap().canonical
    }

    #[test]
    fn test_son_of_pattern() {
        let (rels, entities) = run("Aragorn, son of Arathorn, married Arwen.");
        let child = rels
            .iter()
            .find(|r| r.pred == Predicate::ChildOf)
            .expect("child_of should match");
        assert_eq!(canonical_of(&entities, &child.subj), "Aragorn");
        assert_eq!(canonical_of(&entities, &child.obj), "Arathorn");
        assert!((child.confidence - 0.7).abs() < f64::EPSILON);
        assert_eq!(child.extractor, Extractor::Regex);
    }

    #[test]
    fn test_married_pattern() {
        let (rels, entities) = run("Aragorn married Arwen.");
        let married = rels
            .iter()
            .find(|r| r.pred == Predicate::MarriedTo)
            .unwrap();
        assert_eq!(canonical_of(&entities, &married.subj), "Aragorn");
        assert_eq!(canonical_of(&entities, &married.obj), "Arwen");
    }

    #[test]
    fn test_friends_pattern() {
        let (rels, _) = run("Frodo and Sam were friends.");
        assert!(rels.iter().any(|r| r.pred == Predicate::FriendsWith));
    }

    #[test]
    fn test_guard_applies() {
        // "married" a place: bound but guarded out
        let (rels, _) = run("Aragorn married Thornhold Castle.");
        assert!(!rels.iter().any(|r| r.pred == Predicate::MarriedTo));
    }

    #[test]
    fn test_evidence_offsets_absolute() {
        let text = "A quiet year passed. Bilbo traveled to Rivendell.";
        let (rels, _) = run(text);
        let travel = rels
            .iter()
            .find(|r| r.pred == Predicate::TraveledTo)
            .unwrap();
        let ev = &travel.evidence[0];
        assert_eq!(&text[ev.start..ev.end], "Bilbo traveled to Rivendell");
    }

    #[test]
    fn test_ruled_pattern_strips_article() {
        let (rels, entities) = run("Genghis Khan ruled the Mongol Empire.");
        let rules = rels.iter().find(|r| r.pred == Predicate::Rules).unwrap();
        assert_eq!(canonical_of(&entities, &rules.obj), "Mongol Empire");
    }

    #[test]
    fn test_unbound_names_skip() {
        let entities = vec![Entity::new(EntityType::Person, "Aragorn")];
        let segments = Segmenter::new()
            .segment("doc", "Boromir married Eowyn.")
            .unwrap();
        let (rels, _) = RegexRelationInducer::new().induce("doc", &segments, &entities);
        assert!(rels.is_empty());
    }
}
