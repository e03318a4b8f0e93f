//! Relation post-processor - the precision layers between induction and
//! the exported graph
//!
//! Applies, in order: entity-ID remap, inverse synthesis, the
//! appositive-vs-coordination filter, semantic conflict suppression,
//! global-pass gating, deduplication, the confidence floor, and
//! dense-narrative entity pruning. Relations are never mutated after this
//! stage; the final list is sorted by `(subj, pred, obj)` for
//! reproducibility.

use std::collections::{HashMap, HashSet};

use crate::normalize::dedup_key;
use crate::predicates::Predicate;
use crate::types::{Entity, Extractor, ExtractionStats, Relation, Span};

/// Dense-narrative pruning thresholds. The defaults match the classic
/// heuristic: graphs with more than 12 entities and at least as many
/// relations shed entities that no relation references and that were
/// mentioned fewer than 3 times.
#[derive(Debug, Clone)]
pub struct PruneConfig {
    pub enabled: bool,
    pub min_entities: usize,
    pub min_mentions: usize,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_entities: 12,
            min_mentions: 3,
        }
    }
}

/// Configuration for the post-processor
#[derive(Debug, Clone)]
pub struct PostProcessConfig {
    /// Final confidence floor
    pub min_confidence: f64,
    pub deduplication_enabled: bool,
    /// Sentence window for marriage/parenthood conflict suppression
    pub conflict_window_sentences: usize,
    /// Character window under which same-object subjects count as
    /// coordination rather than apposition
    pub coordination_window_chars: usize,
    pub prune: PruneConfig,
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.70,
            deduplication_enabled: true,
            conflict_window_sentences: 2,
            coordination_window_chars: 50,
            prune: PruneConfig::default(),
        }
    }
}

/// Post-processing pipeline over the union of all induced relations.
#[derive(Debug, Clone, Default)]
pub struct PostProcessor {
    config: PostProcessConfig,
}

impl PostProcessor {
    #[must_use]
    pub const fn new(config: PostProcessConfig) -> Self {
        Self { config }
    }

    /// Run every layer. `global_relations` is the (possibly empty) output of
    /// the full-document re-run; it is gated before joining the pool.
    #[allow(clippy::too_many_arguments)]
    pub fn process(
        &self,
        entities: &mut Vec<Entity>,
        spans: &mut Vec<Span>,
        relations: Vec<Relation>,
        id_remap: &HashMap<String, String>,
        global_relations: Vec<Relation>,
        stats: &mut ExtractionStats,
    ) -> Vec<Relation> {
        // 1. Entity-ID remap onto the canonical merged ids
        let mut pool = remap(relations, id_remap);

        // 2. Inverse synthesis
        synthesize_inverses(&mut pool);

        // 3. Appositive-vs-coordination filter
        pool = self.appositive_filter(pool, entities, spans);

        // 4. Semantic conflict suppression
        pool = self.suppress_conflicts(pool);

        // 5. Global-pass gating
        let mut gated = self.gate_global_pass(&pool, remap(global_relations, id_remap));
        synthesize_inverses(&mut gated);
        pool.extend(gated);

        // 6. Deduplication
        if self.config.deduplication_enabled {
            pool = self.deduplicate(pool, entities, stats);
        }

        // 7. Confidence floor
        let before = pool.len();
        pool.retain(|r| r.confidence >= self.config.min_confidence - 1e-9);
        stats.low_confidence_drops += before - pool.len();

        // 8. Dense-narrative entity pruning
        self.prune_entities(entities, spans, &mut pool, stats);

        pool.sort_by(|a, b| {
            (&a.subj, a.pred.label(), &a.obj).cmp(&(&b.subj, b.pred.label(), &b.obj))
        });
        pool
    }

    /// For every `(pred, obj)` group with two or more distinct subjects,
    /// keep all subjects when they read as coordination (close together, no
    /// substring containment); otherwise treat the later ones as appositive
    /// clarifications and keep only the first.
    fn appositive_filter(
        &self,
        pool: Vec<Relation>,
        entities: &[Entity],
        spans: &[Span],
    ) -> Vec<Relation> {
        let first_span: HashMap<&str, usize> = entities
            .iter()
            .map(|e| {
                let first = spans
                    .iter()
                    .filter(|s| s.entity_id == e.id)
                    .map(|s| s.start)
                    .min()
                    .unwrap_or(usize::MAX);
                (e.id.as_str(), first)
            })
            .collect();
        let canonical: HashMap<&str, &str> = entities
            .iter()
            .map(|e| (e.id.as_str(), e.canonical.as_str()))
            .collect();

        let mut groups: HashMap<(Predicate, String), Vec<usize>> = HashMap::new();
        for (i, r) in pool.iter().enumerate() {
            groups.entry((r.pred, r.obj.clone())).or_default().push(i);
        }

        let mut dropped: HashSet<usize> = HashSet::new();
        for indices in groups.values() {
            let mut subjects: Vec<&str> = indices
                .iter()
                .map(|&i| pool[i].subj.as_str())
                .collect();
            subjects.sort_unstable();
            subjects.dedup();
            if subjects.len() < 2 {
                continue;
            }
            subjects.sort_by_key(|s| first_span.get(s).copied().unwrap_or(usize::MAX));

            let coordinated = subjects.windows(2).all(|pair| {
                let a = pair[0];
                let b = pair[1];
                let pa = first_span.get(a).copied().unwrap_or(usize::MAX);
                let pb = first_span.get(b).copied().unwrap_or(usize::MAX);
                let close = pb.saturating_sub(pa) < self.config.coordination_window_chars;
                let ca = canonical.get(a).copied().unwrap_or("").to_lowercase();
                let cb = canonical.get(b).copied().unwrap_or("").to_lowercase();
                let contained = ca.contains(&cb) || cb.contains(&ca);
                close && !contained
            });
            if coordinated {
                continue;
            }

            let keep = subjects[0];
            for &i in indices {
                if pool[i].subj != keep {
                    dropped.insert(i);
                }
            }
        }

        pool.into_iter()
            .enumerate()
            .filter(|(i, _)| !dropped.contains(i))
            .map(|(_, r)| r)
            .collect()
    }

    /// A high-confidence marriage within two sentences of a parent/child
    /// candidate over the same pair suppresses the parent/child reading.
    fn suppress_conflicts(&self, pool: Vec<Relation>) -> Vec<Relation> {
        let marriages: Vec<(String, String, Vec<usize>)> = pool
            .iter()
            .filter(|r| r.pred == Predicate::MarriedTo && r.confidence > 0.75)
            .map(|r| {
                (
                    r.subj.clone(),
                    r.obj.clone(),
                    r.evidence.iter().map(|e| e.sentence_index).collect(),
                )
            })
            .collect();
        if marriages.is_empty() {
            return pool;
        }

        pool.into_iter()
            .filter(|r| {
                if !matches!(r.pred, Predicate::ParentOf | Predicate::ChildOf) {
                    return true;
                }
                let near_marriage = marriages.iter().any(|(a, b, sentences)| {
                    let same_pair = (r.subj == *a && r.obj == *b)
                        || (r.subj == *b && r.obj == *a);
                    if !same_pair {
                        return false;
                    }
                    r.evidence.iter().any(|ev| {
                        sentences.iter().any(|&s| {
                            ev.sentence_index.abs_diff(s) <= self.config.conflict_window_sentences
                        })
                    })
                });
                !near_marriage
            })
            .collect()
    }

    /// Gate for the full-document re-run: allow-listed predicates only,
    /// above `max(min_confidence, 0.8)` and above any existing confidence
    /// for the same triple.
    fn gate_global_pass(
        &self,
        existing: &[Relation],
        global: Vec<Relation>,
    ) -> Vec<Relation> {
        let floor = self.config.min_confidence.max(0.8);
        global
            .into_iter()
            .filter(|r| r.pred.global_pass_allowed())
            .filter(|r| {
                let triple_floor = existing
                    .iter()
                    .filter(|e| e.subj == r.subj && e.pred == r.pred && e.obj == r.obj)
                    .map(|e| e.confidence + 0.01)
                    .fold(floor, f64::max);
                r.confidence > triple_floor
            })
            .collect()
    }

    /// Group by `(canonical-lowered subj, pred, canonical-lowered obj)`;
    /// merge evidence uniquely, take the max confidence, choose the
    /// extractor by priority dep > regex > narrative. Direction survives
    /// even for symmetric predicates.
    fn deduplicate(
        &self,
        pool: Vec<Relation>,
        entities: &[Entity],
        stats: &mut ExtractionStats,
    ) -> Vec<Relation> {
        let canonical: HashMap<&str, String> = entities
            .iter()
            .map(|e| (e.id.as_str(), dedup_key(&e.canonical)))
            .collect();

        let mut order: Vec<(String, Predicate, String)> = Vec::new();
        let mut merged: HashMap<(String, Predicate, String), Relation> = HashMap::new();

        for relation in pool {
            let subj_key = canonical
                .get(relation.subj.as_str())
                .cloned()
                .unwrap_or_else(|| relation.subj.clone());
            let obj_key = canonical
                .get(relation.obj.as_str())
                .cloned()
                .unwrap_or_else(|| relation.obj.clone());
            let key = (subj_key, relation.pred, obj_key);

            match merged.get_mut(&key) {
                None => {
                    order.push(key.clone());
                    merged.insert(key, relation);
                }
                Some(existing) => {
                    stats.dedup_groups += 1;
                    for ev in relation.evidence {
                        if !existing.evidence.contains(&ev) {
                            existing.evidence.push(ev);
                        }
                    }
                    for q in relation.qualifiers {
                        if !existing
                            .qualifiers
                            .iter()
                            .any(|x| x.kind == q.kind && x.value == q.value)
                        {
                            existing.qualifiers.push(q);
                        }
                    }
                    if relation.confidence > existing.confidence {
                        existing.confidence = relation.confidence;
                    }
                    if extractor_rank(relation.extractor) < extractor_rank(existing.extractor) {
                        existing.extractor = relation.extractor;
                    }
                }
            }
        }

        order
            .into_iter()
            .filter_map(|key| merged.remove(&key))
            .collect()
    }

    /// Dense-narrative pruning: unreferenced, rarely-mentioned entities are
    /// dropped, with their spans.
    fn prune_entities(
        &self,
        entities: &mut Vec<Entity>,
        spans: &mut Vec<Span>,
        pool: &mut Vec<Relation>,
        stats: &mut ExtractionStats,
    ) {
        let cfg = &self.config.prune;
        if !cfg.enabled
            || entities.len() <= cfg.min_entities
            || pool.len() < entities.len()
        {
            return;
        }

        let referenced: HashSet<&str> = pool
            .iter()
            .flat_map(|r| [r.subj.as_str(), r.obj.as_str()])
            .collect();
        let doomed: HashSet<String> = entities
            .iter()
            .filter(|e| !referenced.contains(e.id.as_str()) && e.mention_count < cfg.min_mentions)
            .map(|e| e.id.clone())
            .collect();
        if doomed.is_empty() {
            return;
        }

        stats.entities_pruned += doomed.len();
        entities.retain(|e| !doomed.contains(&e.id));
        spans.retain(|s| !doomed.contains(&s.entity_id));
        pool.retain(|r| !doomed.contains(&r.subj) && !doomed.contains(&r.obj));
        for relation in pool {
            for qualifier in &mut relation.qualifiers {
                if qualifier
                    .entity_id
                    .as_ref()
                    .is_some_and(|id| doomed.contains(id))
                {
                    qualifier.entity_id = None;
                }
            }
        }
    }
}

/// Apply the harvest-time merge map to relation endpoints.
fn remap(pool: Vec<Relation>, id_remap: &HashMap<String, String>) -> Vec<Relation> {
    if id_remap.is_empty() {
        return pool;
    }
    pool.into_iter()
        .map(|mut r| {
            if let Some(s) = id_remap.get(&r.subj) {
                r.subj.clone_from(s);
            }
            if let Some(o) = id_remap.get(&r.obj) {
                r.obj.clone_from(o);
            }
            r
        })
        .collect()
}

/// For each relation with a declared inverse, append the swapped
/// counterpart with copied evidence and confidence.
fn synthesize_inverses(pool: &mut Vec<Relation>) {
    let mut inverses = Vec::new();
    for r in pool.iter() {
        let Some(inv) = r.pred.inverse() else { continue };
        let mut counterpart = Relation::new(&r.obj, inv, &r.subj)
            .with_confidence(r.confidence)
            .with_extractor(r.extractor);
        counterpart.evidence = r.evidence.clone();
        counterpart.qualifiers = r.qualifiers.clone();
        inverses.push(counterpart);
    }
    pool.extend(inverses);
}

const fn extractor_rank(extractor: Extractor) -> u8 {
    match extractor {
        Extractor::Dep => 0,
        Extractor::Regex => 1,
        Extractor::Narrative => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityType, Evidence};

    fn entity(ty: EntityType, name: &str) -> Entity {
        Entity::new(ty, name)
    }

    fn rel(subj: &str, pred: Predicate, obj: &str, conf: f64, sentence: usize) -> Relation {
        Relation::new(subj, pred, obj)
            .with_confidence(conf)
            .with_extractor(Extractor::Dep)
            .with_evidence(Evidence {
                doc_id: "doc".to_string(),
                start: sentence * 10,
                end: sentence * 10 + 9,
                sentence_index: sentence,
            })
    }

    fn run(
        entities: &mut Vec<Entity>,
        spans: &mut Vec<Span>,
        relations: Vec<Relation>,
    ) -> Vec<Relation> {
        let mut stats = ExtractionStats::default();
        PostProcessor::default().process(
            entities,
            spans,
            relations,
            &HashMap::new(),
            Vec::new(),
            &mut stats,
        )
    }

    #[test]
    fn test_inverse_synthesis() {
        let arathorn = entity(EntityType::Person, "Arathorn");
        let aragorn = entity(EntityType::Person, "Aragorn");
        let rels = vec![rel(&arathorn.id, Predicate::ParentOf, &aragorn.id, 0.9, 0)];
        let mut entities = vec![arathorn.clone(), aragorn.clone()];
        let mut spans = Vec::new();
        let out = run(&mut entities, &mut spans, rels);

        assert!(out
            .iter()
            .any(|r| r.pred == Predicate::ParentOf && r.subj == arathorn.id));
        assert!(out
            .iter()
            .any(|r| r.pred == Predicate::ChildOf && r.subj == aragorn.id));
    }

    #[test]
    fn test_symmetric_duplication_survives_dedup() {
        let a = entity(EntityType::Person, "Aragorn");
        let b = entity(EntityType::Person, "Arwen");
        let rels = vec![rel(&a.id, Predicate::MarriedTo, &b.id, 0.9, 0)];
        let mut entities = vec![a.clone(), b.clone()];
        let mut spans = Vec::new();
        let out = run(&mut entities, &mut spans, rels);

        let forward = out
            .iter()
            .filter(|r| r.pred == Predicate::MarriedTo && r.subj == a.id)
            .count();
        let backward = out
            .iter()
            .filter(|r| r.pred == Predicate::MarriedTo && r.subj == b.id)
            .count();
        assert_eq!(forward, 1);
        assert_eq!(backward, 1);
    }

    #[test]
    fn test_dedup_merges_evidence_and_takes_max() {
        let a = entity(EntityType::Person, "Aragorn");
        let b = entity(EntityType::Person, "Arwen");
        let mut second = rel(&a.id, Predicate::MarriedTo, &b.id, 0.8, 1);
        second.extractor = Extractor::Regex;
        let rels = vec![
            rel(&a.id, Predicate::MarriedTo, &b.id, 0.9, 0),
            second,
        ];
        let mut entities = vec![a.clone(), b.clone()];
        let mut spans = Vec::new();
        let out = run(&mut entities, &mut spans, rels);

        let merged = out
            .iter()
            .find(|r| r.pred == Predicate::MarriedTo && r.subj == a.id)
            .unwrap();
        assert_eq!(merged.evidence.len(), 2);
        assert!((merged.confidence - 0.9).abs() < 1e-9);
        assert_eq!(merged.extractor, Extractor::Dep);
    }

    #[test]
    fn test_confidence_floor() {
        let a = entity(EntityType::Person, "Aragorn");
        let b = entity(EntityType::Place, "Gondor");
        let rels = vec![
            rel(&a.id, Predicate::LivesIn, &b.id, 0.9, 0),
            rel(&a.id, Predicate::TraveledTo, &b.id, 0.5, 0),
        ];
        let mut entities = vec![a, b];
        let mut spans = Vec::new();
        let out = run(&mut entities, &mut spans, rels);
        assert!(out.iter().any(|r| r.pred == Predicate::LivesIn));
        assert!(!out.iter().any(|r| r.pred == Predicate::TraveledTo));
    }

    #[test]
    fn test_marriage_suppresses_parenthood() {
        let a = entity(EntityType::Person, "Aragorn");
        let b = entity(EntityType::Person, "Arwen");
        let rels = vec![
            rel(&a.id, Predicate::MarriedTo, &b.id, 0.9, 1),
            rel(&a.id, Predicate::ParentOf, &b.id, 0.85, 2),
        ];
        let mut entities = vec![a.clone(), b.clone()];
        let mut spans = Vec::new();
        let out = run(&mut entities, &mut spans, rels);
        assert!(out.iter().any(|r| r.pred == Predicate::MarriedTo));
        assert!(!out.iter().any(|r| r.pred == Predicate::ParentOf));
        assert!(!out.iter().any(|r| r.pred == Predicate::ChildOf));
    }

    #[test]
    fn test_distant_parenthood_not_suppressed() {
        let a = entity(EntityType::Person, "Aragorn");
        let b = entity(EntityType::Person, "Arwen");
        let rels = vec![
            rel(&a.id, Predicate::MarriedTo, &b.id, 0.9, 0),
            rel(&a.id, Predicate::ParentOf, &b.id, 0.85, 8),
        ];
        let mut entities = vec![a, b];
        let mut spans = Vec::new();
        let out = run(&mut entities, &mut spans, rels);
        assert!(out.iter().any(|r| r.pred == Predicate::ParentOf));
    }

    #[test]
    fn test_appositive_filter_keeps_coordination() {
        let harry = entity(EntityType::Person, "Harry");
        let ron = entity(EntityType::Person, "Ron");
        let hogwarts = entity(EntityType::Org, "Hogwarts");
        let mut spans = vec![
            Span { entity_id: harry.id.clone(), start: 0, end: 5 },
            Span { entity_id: ron.id.clone(), start: 10, end: 13 },
            Span { entity_id: hogwarts.id.clone(), start: 25, end: 33 },
        ];
        let rels = vec![
            rel(&harry.id, Predicate::StudiesAt, &hogwarts.id, 0.85, 0),
            rel(&ron.id, Predicate::StudiesAt, &hogwarts.id, 0.8, 0),
        ];
        let mut entities = vec![harry.clone(), ron.clone(), hogwarts.clone()];
        let out = run(&mut entities, &mut spans, rels);
        assert_eq!(
            out.iter().filter(|r| r.pred == Predicate::StudiesAt).count(),
            2
        );
    }

    #[test]
    fn test_appositive_filter_drops_clarification() {
        // "Strider, Aragorn, ruled Gondor" style: contained names far apart
        let strider = entity(EntityType::Person, "Aragorn");
        let longer = entity(EntityType::Person, "Lord Aragorn");
        let gondor = entity(EntityType::Place, "Gondor");
        let mut spans = vec![
            Span { entity_id: strider.id.clone(), start: 0, end: 7 },
            Span { entity_id: longer.id.clone(), start: 9, end: 21 },
        ];
        let rels = vec![
            rel(&strider.id, Predicate::Rules, &gondor.id, 0.9, 0),
            rel(&longer.id, Predicate::Rules, &gondor.id, 0.85, 0),
        ];
        let mut entities = vec![strider.clone(), longer, gondor];
        let out = run(&mut entities, &mut spans, rels);
        let rulers: Vec<&str> = out
            .iter()
            .filter(|r| r.pred == Predicate::Rules)
            .map(|r| r.subj.as_str())
            .collect();
        assert_eq!(rulers, vec![strider.id.as_str()]);
    }

    #[test]
    fn test_global_pass_gate() {
        let a = entity(EntityType::Person, "Aragorn");
        let b = entity(EntityType::Place, "Gondor");
        let c = entity(EntityType::Person, "Arwen");
        let existing = vec![rel(&a.id, Predicate::LivesIn, &b.id, 0.9, 0)];
        let global = vec![
            // Duplicate below the existing+0.01 floor: gated out
            rel(&a.id, Predicate::LivesIn, &b.id, 0.85, 0),
            // Allowed predicate above the floor: admitted
            rel(&a.id, Predicate::MarriedTo, &c.id, 0.9, 0),
            // Disallowed predicate: gated out
            rel(&a.id, Predicate::TraveledTo, &b.id, 0.95, 0),
        ];
        let mut entities = vec![a.clone(), b.clone(), c.clone()];
        let mut spans = Vec::new();
        let mut stats = ExtractionStats::default();
        let out = PostProcessor::default().process(
            &mut entities,
            &mut spans,
            existing,
            &HashMap::new(),
            global,
            &mut stats,
        );
        assert!(out.iter().any(|r| r.pred == Predicate::MarriedTo));
        assert!(!out.iter().any(|r| r.pred == Predicate::TraveledTo));
        let lives: Vec<_> = out
            .iter()
            .filter(|r| r.pred == Predicate::LivesIn)
            .collect();
        assert_eq!(lives.len(), 1);
        assert!((lives[0].confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_prune_dense_narrative() {
        let mut entities: Vec<Entity> = (b'A'..=b'N')
            .map(|c| {
                let mut e = entity(EntityType::Person, &format!("Person {}", c as char));
                e.mention_count = 1;
                e
            })
            .collect();
        // Wire 13 relations among the first 13 entities; the last one is
        // unreferenced with a single mention
        let rels: Vec<Relation> = (0..13)
            .map(|i| {
                rel(
                    &entities[i].id,
                    Predicate::FriendsWith,
                    &entities[(i + 1) % 13].id,
                    0.9,
                    i,
                )
            })
            .collect();
        let lonely = entities[13].id.clone();
        let mut spans = vec![Span {
            entity_id: lonely.clone(),
            start: 0,
            end: 5,
        }];
        let out = run(&mut entities, &mut spans, rels);
        assert!(entities.iter().all(|e| e.id != lonely));
        assert!(spans.is_empty());
        assert!(!out.is_empty());
    }

    #[test]
    fn test_output_sorted_and_unique() {
        let a = entity(EntityType::Person, "Aragorn");
        let b = entity(EntityType::Person, "Boromir");
        let c = entity(EntityType::Person, "Cirdan");
        let rels = vec![
            rel(&c.id, Predicate::FriendsWith, &a.id, 0.9, 0),
            rel(&a.id, Predicate::FriendsWith, &b.id, 0.9, 0),
            rel(&a.id, Predicate::FriendsWith, &b.id, 0.8, 1),
        ];
        let mut entities = vec![a, b, c];
        let mut spans = Vec::new();
        let out = run(&mut entities, &mut spans, rels);

        let mut keys: Vec<(String, &str, String)> = out
            .iter()
            .map(|r| (r.subj.clone(), r.pred.label(), r.obj.clone()))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        keys.dedup();
        assert_eq!(keys.len(), out.len());
    }
}
