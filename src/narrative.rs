//! Narrative-pattern relation inducer - sentence-anchored safety net
//!
//! Runs over the deictic-rewritten text with knowledge of coreference.
//! Catches what a degraded dependency parse misses: colon/enumeration
//! lists, kinship copulas, deictic residence ("He settled there"), and
//! "the couple"-type anaphora expanded to both partners. Emits with
//! `extractor = narrative` at a flat confidence of 0.75; every candidate
//! passes the same type guard as the other inducers.

use regex::Regex;
use std::sync::OnceLock;

use crate::deixis::DerivedText;
use crate::normalize::{canonicalize_name, stem};
use crate::predicates::{verb_triggers, Predicate};
use crate::types::{
    CorefLink, Entity, EntityType, Evidence, Extractor, Relation, Segment,
};

const NARRATIVE_CONFIDENCE: f64 = 0.75;

const NAME: &str = r"[A-Z][\w'\u{2019}-]*(?: (?:of |the )?[A-Z][\w'\u{2019}-]*)*";

fn re(template: &str) -> Regex {
    Regex::new(&template.replace("{N}", NAME)).expect("static narrative pattern")
}

fn children_list_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        re(r"(?:[Cc]hildren|[Ss]ons|[Dd]aughters) of (?P<p>{N})\s*(?::|include[ds]?)\s*(?P<list>[^.!?\n]+)")
    })
}

fn colon_list_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| re(r"(?P<c>{N}):\s*(?P<list>[^.!?\n]+)"))
}

fn kinship_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        re(r"(?P<a>{N}) and (?P<b>{N}) (?:were|are) (?P<kind>brothers|sisters|siblings|twins|friends|allies|enemies|rivals)")
    })
}

fn residence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        re(r"(?P<a>{N}|[Hh]e|[Ss]he|[Tt]hey) (?:settled|lived|dwelt|remained) in (?:the )?(?P<b>{N})")
    })
}

fn couple_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        re(r"[Tt]he couple (?P<verb>[a-z]+)(?: (?:to|in|at|into))? (?:the )?(?P<obj>{N})")
    })
}

/// Diagnostic counters from the narrative pass
#[derive(Debug, Clone, Copy, Default)]
pub struct NarrativeStats {
    pub guard_violations: usize,
    pub emitted: usize,
}

/// Narrative-pattern inducer over the deictic-rewritten text.
#[derive(Debug, Clone, Copy, Default)]
pub struct NarrativeInducer;

struct NarrativeCtx<'a> {
    doc_id: &'a str,
    derived: &'a DerivedText,
    entities: &'a [Entity],
    links: &'a [CorefLink],
    segments: &'a [Segment],
}

impl NarrativeInducer {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Run the narrative patterns.
    #[must_use]
    pub fn induce(
        &self,
        doc_id: &str,
        derived: &DerivedText,
        entities: &[Entity],
        links: &[CorefLink],
        segments: &[Segment],
    ) -> (Vec<Relation>, NarrativeStats) {
        let ctx = NarrativeCtx {
            doc_id,
            derived,
            entities,
            links,
            segments,
        };
        let mut out = Vec::new();
        let mut stats = NarrativeStats::default();

        self.children_lists(&ctx, &mut out, &mut stats);
        self.kinship_copulas(&ctx, &mut out, &mut stats);
        self.residences(&ctx, &mut out, &mut stats);
        self.couples(&ctx, &mut out, &mut stats);
        self.colon_parts(&ctx, &mut out, &mut stats);

        (out, stats)
    }

    fn children_lists(
        &self,
        ctx: &NarrativeCtx<'_>,
        out: &mut Vec<Relation>,
        stats: &mut NarrativeStats,
    ) {
        for caps in children_list_re().captures_iter(&ctx.derived.text) {
            let (Some(p), Some(list)) = (caps.name("p"), caps.name("list")) else {
                continue;
            };
            let Some(parent) = bind(ctx, p.as_str(), p.start()) else {
                continue;
            };
            let whole = caps.get(0).map_or(0..0, |m| m.range());
            for item in split_list(list.as_str()) {
                let Some(child) = bind(ctx, item, list.start()) else {
                    continue;
                };
                emit(
                    ctx,
                    parent,
                    Predicate::ParentOf,
                    child,
                    whole.clone(),
                    out,
                    stats,
                );
            }
        }
    }

    fn kinship_copulas(
        &self,
        ctx: &NarrativeCtx<'_>,
        out: &mut Vec<Relation>,
        stats: &mut NarrativeStats,
    ) {
        for caps in kinship_re().captures_iter(&ctx.derived.text) {
            let (Some(a), Some(b), Some(kind)) =
                (caps.name("a"), caps.name("b"), caps.name("kind"))
            else {
                continue;
            };
            let pred = match kind.as_str() {
                "friends" | "allies" => Predicate::FriendsWith,
                "enemies" | "rivals" => Predicate::EnemyOf,
                _ => Predicate::SiblingOf,
            };
            let (Some(ea), Some(eb)) = (
                bind(ctx, a.as_str(), a.start()),
                bind(ctx, b.as_str(), b.start()),
            ) else {
                continue;
            };
            let whole = caps.get(0).map_or(0..0, |m| m.range());
            emit(ctx, ea, pred, eb, whole, out, stats);
        }
    }

    fn residences(
        &self,
        ctx: &NarrativeCtx<'_>,
        out: &mut Vec<Relation>,
        stats: &mut NarrativeStats,
    ) {
        for caps in residence_re().captures_iter(&ctx.derived.text) {
            let (Some(a), Some(b)) = (caps.name("a"), caps.name("b")) else {
                continue;
            };
            let (Some(who), Some(place)) = (
                bind(ctx, a.as_str(), a.start()),
                bind(ctx, b.as_str(), b.start()),
            ) else {
                continue;
            };
            let whole = caps.get(0).map_or(0..0, |m| m.range());
            emit(ctx, who, Predicate::LivesIn, place, whole, out, stats);
        }
    }

    /// "The couple traveled to Paris": both partners become subjects. The
    /// partners are the two most recently mentioned distinct persons.
    fn couples(
        &self,
        ctx: &NarrativeCtx<'_>,
        out: &mut Vec<Relation>,
        stats: &mut NarrativeStats,
    ) {
        for caps in couple_re().captures_iter(&ctx.derived.text) {
            let (Some(verb), Some(obj)) = (caps.name("verb"), caps.name("obj")) else {
                continue;
            };
            let Some(trigger) = verb_triggers().get(&stem(verb.as_str())) else {
                continue;
            };
            let Some(object) = bind(ctx, obj.as_str(), obj.start()) else {
                continue;
            };

            let occurrence = ctx.derived.map_to_original(caps.get(0).map_or(0, |m| m.start()));
            let partners = recent_person_pair(ctx, occurrence);
            let Some((first, second)) = partners else {
                continue;
            };
            let whole = caps.get(0).map_or(0..0, |m| m.range());
            for partner in [first, second] {
                emit(
                    ctx,
                    partner,
                    trigger.pred,
                    object,
                    whole.clone(),
                    out,
                    stats,
                );
            }
        }
    }

    fn colon_parts(
        &self,
        ctx: &NarrativeCtx<'_>,
        out: &mut Vec<Relation>,
        stats: &mut NarrativeStats,
    ) {
        for caps in colon_list_re().captures_iter(&ctx.derived.text) {
            let (Some(c), Some(list)) = (caps.name("c"), caps.name("list")) else {
                continue;
            };
            let Some(container) = bind(ctx, c.as_str(), c.start()) else {
                continue;
            };
            if !matches!(
                container.entity_type,
                EntityType::Org | EntityType::Place
            ) {
                continue;
            }
            let whole = caps.get(0).map_or(0..0, |m| m.range());
            for item in split_list(list.as_str()) {
                let Some(part) = bind(ctx, item, list.start()) else {
                    continue;
                };
                emit(
                    ctx,
                    part,
                    Predicate::PartOf,
                    container,
                    whole.clone(),
                    out,
                    stats,
                );
            }
        }
    }
}

/// Split "A, B, and C" into items.
fn split_list(list: &str) -> Vec<&str> {
    list.split(',')
        .flat_map(|part| part.split(" and "))
        .map(str::trim)
        .map(|p| p.strip_prefix("and ").unwrap_or(p))
        .filter(|p| !p.is_empty())
        .collect()
}

/// Bind a surface form to an entity, going through coreference for
/// pronoun surfaces.
fn bind<'a>(ctx: &NarrativeCtx<'a>, surface: &str, derived_pos: usize) -> Option<&'a Entity> {
    let trimmed = surface.trim();
    if matches!(trimmed.to_lowercase().as_str(), "he" | "she" | "they" | "it") {
        let orig = ctx.derived.map_to_original(derived_pos);
        let link = ctx.links.iter().find(|l| l.mention.start == orig)?;
        return ctx.entities.iter().find(|e| e.id == link.entity_id);
    }
    let canonical = canonicalize_name(trimmed);
    if canonical.is_empty() {
        return None;
    }
    ctx.entities.iter().find(|e| e.answers_to(&canonical))
}

/// The two most recently introduced distinct persons before `before`.
fn recent_person_pair<'a>(
    ctx: &NarrativeCtx<'a>,
    before: usize,
) -> Option<(&'a Entity, &'a Entity)> {
    let mut seen: Vec<(&str, usize)> = Vec::new();
    for segment in ctx.segments {
        if segment.start >= before {
            break;
        }
        for entity in ctx.entities {
            if entity.entity_type != EntityType::Person {
                continue;
            }
            let lower = segment.text.to_lowercase();
            if lower.contains(&entity.canonical.to_lowercase()) {
                seen.retain(|(id, _)| *id != entity.id.as_str());
                seen.push((entity.id.as_str(), segment.start));
            }
        }
    }
    if seen.len() < 2 {
        return None;
    }
    let a = ctx.entities.iter().find(|e| e.id == seen[seen.len() - 2].0)?;
    let b = ctx.entities.iter().find(|e| e.id == seen[seen.len() - 1].0)?;
    Some((a, b))
}

fn emit(
    ctx: &NarrativeCtx<'_>,
    subj: &Entity,
    pred: Predicate,
    obj: &Entity,
    derived_range: std::ops::Range<usize>,
    out: &mut Vec<Relation>,
    stats: &mut NarrativeStats,
) {
    if subj.id == obj.id {
        return;
    }
    if !pred.allows(subj.entity_type, obj.entity_type) {
        stats.guard_violations += 1;
        return;
    }
    let (start, end) = ctx
        .derived
        .map_range(derived_range.start, derived_range.end);
    let sentence_index = ctx
        .segments
        .iter()
        .position(|s| s.start <= start && start < s.end)
        .unwrap_or(0);
    out.push(
        Relation::new(&subj.id, pred, &obj.id)
            .with_confidence(NARRATIVE_CONFIDENCE)
            .with_extractor(Extractor::Narrative)
            .with_evidence(Evidence {
                doc_id: ctx.doc_id.to_string(),
                start,
                end,
                sentence_index,
            }),
    );
    stats.emitted += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coref::CorefResolver;
    use crate::deixis::DeicticRewriter;
    use crate::entity_filter::EntityQualityFilter;
    use crate::harvest::Harvester;
    use crate::parser::{Parser, RuleBasedParser};
    use crate::profile::ProfileBuilder;
    use crate::segmenter::Segmenter;

    fn run(text: &str) -> (Vec<Relation>, Vec<Entity>) {
        let segments = Segmenter::new().segment("doc", text).unwrap();
        let sentences = RuleBasedParser::new().parse(text).unwrap();
        let harvest = Harvester::default().harvest(
            text,
            &segments,
            &sentences,
            &EntityQualityFilter::default(),
        );
        let mut profiles = std::collections::HashMap::new();
        ProfileBuilder::new().build_into(
            &mut profiles,
            &harvest.entities,
            &harvest.spans,
            &sentences,
        );
        let links = CorefResolver::default().resolve(
            &harvest.entities,
            &harvest.spans,
            &sentences,
            &profiles,
        );
        let derived = DeicticRewriter::new().rewrite(text, &harvest.entities, &harvest.spans);
        let (rels, _) = NarrativeInducer::new().induce(
            "doc",
            &derived,
            &harvest.entities,
            &links,
            &segments,
        );
        (rels, harvest.entities)
    }

    fn canonical_of<'a>(entities: &'a [Entity], id: &str) -> &'a str {
        &entities.iter().find(|e| e.id == id).unwrap().canonical
    }

    fn has(rels: &[Relation], entities: &[Entity], s: &str, p: Predicate, o: &str) -> bool {
        rels.iter().any(|r| {
            canonical_of(entities, &r.subj) == s
                && r.pred == p
                && canonical_of(entities, &r.obj) == o
        })
    }

    #[test]
    fn test_children_colon_list() {
        let (rels, entities) = run("The children of Beren: Dior, Nimloth, and Elwing.");
        for child in ["Dior", "Nimloth", "Elwing"] {
            assert!(
                has(&rels, &entities, "Beren", Predicate::ParentOf, child),
                "missing parent_of(Beren, {child})"
            );
        }
    }

    #[test]
    fn test_kinship_copula() {
        let (rels, entities) = run("Edward and Edmund were brothers.");
        assert!(has(&rels, &entities, "Edward", Predicate::SiblingOf, "Edmund"));
    }

    #[test]
    fn test_deictic_residence() {
        let (rels, entities) =
            run("Aragorn rode to Gondor. He settled there.");
        assert!(
            has(&rels, &entities, "Aragorn", Predicate::LivesIn, "Gondor"),
            "deictic rewrite plus coref should yield lives_in"
        );
    }

    #[test]
    fn test_couple_expansion() {
        let (rels, entities) =
            run("Aragorn married Arwen. The couple traveled to Rivendell.");
        assert!(has(&rels, &entities, "Aragorn", Predicate::TraveledTo, "Rivendell"));
        assert!(has(&rels, &entities, "Arwen", Predicate::TraveledTo, "Rivendell"));
        for r in &rels {
            if r.pred == Predicate::TraveledTo {
                assert!((r.confidence - NARRATIVE_CONFIDENCE).abs() < f64::EPSILON);
                assert_eq!(r.extractor, Extractor::Narrative);
            }
        }
    }

    #[test]
    fn test_evidence_maps_to_original_text() {
        let text = "Aragorn rode to Gondor. He settled there.";
        let (rels, _) = run(text);
        for r in &rels {
            for ev in &r.evidence {
                assert!(ev.end <= text.len());
                assert!(ev.start < ev.end);
            }
        }
    }
}
