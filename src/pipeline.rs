//! Extraction pipeline - the engine that wires every stage together
//!
//! ```text
//! text -> segment -> parse -> harvest -> filter -> profiles -> coref
//!      -> deixis -> dep relations (plain + coref-aware) -> regex
//!      -> narrative -> post-process (with optional global pass)
//!      -> stable ids
//! ```
//!
//! The pipeline is single-threaded and synchronous per document; the only
//! suspension point is the parser call. A failed document yields no partial
//! results. Per-document arenas (entities, spans, relations, profiles) are
//! created on entry and released on return; only the identity registry is
//! shared across documents.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::coref::{virtual_spans, CorefConfig, CorefResolver};
use crate::deixis::DeicticRewriter;
use crate::dep_relations::{DepInducerConfig, DepRelationInducer, InducerContext};
use crate::entity_filter::{EntityQualityFilter, FilterConfig};
use crate::error::{Error, Result};
use crate::harvest::Harvester;
use crate::identity::IdentityRegistry;
use crate::narrative::NarrativeInducer;
use crate::parser::{Parser, RuleBasedParser};
use crate::postprocess::{PostProcessConfig, PostProcessor};
use crate::profile::ProfileBuilder;
use crate::regex_relations::RegexRelationInducer;
use crate::segmenter::Segmenter;
use crate::types::{CorefMethod, ExtractionResult, ExtractionStats, Relation, Span};
use crate::ExtractionOptions;

/// Single-document extraction engine.
///
/// Owns the parser collaborator and the shared identity registry. Documents
/// may be processed from multiple threads when the engine is shared behind
/// an `Arc`; the registry serializes briefly at each allocation.
pub struct ExtractionEngine {
    parser: Box<dyn Parser>,
    options: ExtractionOptions,
    registry: Arc<IdentityRegistry>,
}

impl ExtractionEngine {
    /// Engine with the built-in rule-based parser.
    #[must_use]
    pub fn new(options: ExtractionOptions) -> Self {
        Self {
            parser: Box::new(RuleBasedParser::new()),
            options,
            registry: Arc::new(IdentityRegistry::default()),
        }
    }

    /// Engine with an external parser collaborator.
    #[must_use]
    pub fn with_parser(options: ExtractionOptions, parser: Box<dyn Parser>) -> Self {
        Self {
            parser,
            options,
            registry: Arc::new(IdentityRegistry::default()),
        }
    }

    /// Share a persistent identity registry for cross-document merging.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<IdentityRegistry>) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn registry(&self) -> Arc<IdentityRegistry> {
        Arc::clone(&self.registry)
    }

    /// Extract the knowledge graph of one document.
    ///
    /// # Errors
    ///
    /// - `ParserUnavailable` when the parser collaborator fails (fatal)
    /// - `MalformedInput` when segmentation cannot reconcile offsets
    /// - `DeadlineExceeded` when the per-document deadline passes
    /// - `RegistryConflict` when identity assignment keeps failing
    #[allow(clippy::too_many_lines)]
    pub fn extract(&self, doc_id: &str, text: &str) -> Result<ExtractionResult> {
        if text.trim().is_empty() {
            return Ok(ExtractionResult::empty(doc_id));
        }
        let started = Instant::now();
        let mut stats = ExtractionStats::default();

        // C1: segmentation
        let segments = Segmenter::new().segment(doc_id, text)?;
        stats.segments = segments.len();
        self.check_deadline(started, "segmentation")?;

        // C2: the single external collaborator
        let sentences = self.parser.parse(text)?;
        stats.sentences = sentences.len();
        tracing::debug!(doc_id, segments = stats.segments, sentences = stats.sentences, "parsed");
        self.check_deadline(started, "parsing")?;

        // C3: entity harvest
        let filter = EntityQualityFilter::new(FilterConfig {
            enabled: self.options.entity_filter_enabled,
            ..FilterConfig::default()
        });
        let harvester = Harvester::new(self.options.segment_context_window);
        let harvest = harvester.harvest(text, &segments, &sentences, &filter);
        let mut entities = harvest.entities;
        let mut spans = harvest.spans;
        let id_remap = harvest.id_remap;
        stats.entities_harvested = entities.len() + harvest.rejected;
        self.check_deadline(started, "harvest")?;

        // C4: quality purge cascades to spans
        stats.entities_filtered = harvest.rejected + filter.purge(&mut entities, &mut spans);

        // C12: profiles, seeded for cross-document continuity
        let mut profiles = self.options.existing_profiles.clone().unwrap_or_default();
        ProfileBuilder::new().build_into(&mut profiles, &entities, &spans, &sentences);
        self.check_deadline(started, "profiles")?;

        // C5: coreference
        let links = CorefResolver::new(CorefConfig::default())
            .resolve(&entities, &spans, &sentences, &profiles);
        for link in &links {
            match link.method {
                CorefMethod::Pronoun => stats.coref_links_pronoun += 1,
                CorefMethod::Descriptor => stats.coref_links_descriptor += 1,
                CorefMethod::Exact | CorefMethod::Alias => stats.coref_links_lexical += 1,
            }
        }

        // C6: deictic rewrite, consumed only by the narrative inducer
        let derived = DeicticRewriter::new().rewrite(text, &entities, &spans);
        self.check_deadline(started, "coreference")?;

        // C7: dependency relations, plain then coref-aware
        let relation_window = self.options.relation_window();
        let plain_ctx = InducerContext {
            doc_id,
            text,
            entities: &entities,
            spans: &spans,
            sentences: &sentences,
        };
        let dep = DepRelationInducer::new(DepInducerConfig {
            relation_window,
            ..DepInducerConfig::default()
        });
        let (r_dep, dep_stats) = dep.induce(&plain_ctx);

        let mut coref_spans: Vec<Span> = spans.clone();
        coref_spans.extend(virtual_spans(&links));
        coref_spans.sort_by_key(|s| s.start);
        let coref_ctx = InducerContext {
            doc_id,
            text,
            entities: &entities,
            spans: &coref_spans,
            sentences: &sentences,
        };
        let dep_coref = DepRelationInducer::new(DepInducerConfig {
            relation_window: self.options.coref_relation_window(),
            ..DepInducerConfig::default()
        });
        let (r_dep_coref, dep_coref_stats) = dep_coref.induce(&coref_ctx);
        stats.relations_dep = r_dep.len() + r_dep_coref.len();
        stats.guard_violations += dep_stats.guard_violations + dep_coref_stats.guard_violations;
        self.check_deadline(started, "dependency relations")?;

        // C8: regex fallback
        let (r_regex, regex_stats) =
            RegexRelationInducer::new().induce(doc_id, &segments, &entities);
        stats.relations_regex = r_regex.len();
        stats.guard_violations += regex_stats.guard_violations;

        // C9: narrative patterns over the deictic rewrite
        let (r_narr, narr_stats) =
            NarrativeInducer::new().induce(doc_id, &derived, &entities, &links, &segments);
        stats.relations_narrative = r_narr.len();
        stats.guard_violations += narr_stats.guard_violations;
        self.check_deadline(started, "surface relations")?;

        // Optional full-document re-pass, gated later by the post-processor
        let global_relations = if self.global_pass_enabled(text, &segments) {
            let global = DepRelationInducer::new(DepInducerConfig {
                relation_window: text.len(),
                ..DepInducerConfig::default()
            });
            let (r_global, global_stats) = global.induce(&coref_ctx);
            stats.guard_violations += global_stats.guard_violations;
            r_global
        } else {
            Vec::new()
        };
        self.check_deadline(started, "global pass")?;

        // C10: precision layers
        let pool: Vec<Relation> = r_dep
            .into_iter()
            .chain(r_dep_coref)
            .chain(r_regex)
            .chain(r_narr)
            .collect();
        let post = PostProcessor::new(PostProcessConfig {
            min_confidence: self.options.effective_min_confidence(),
            deduplication_enabled: self.options.deduplication_enabled,
            prune: self.options.prune.clone(),
            ..PostProcessConfig::default()
        });
        let relations = post.process(
            &mut entities,
            &mut spans,
            pool,
            &id_remap,
            global_relations,
            &mut stats,
        );
        self.check_deadline(started, "post-processing")?;

        // Relation participation feeds sense disambiguation
        let by_id: HashMap<String, String> = entities
            .iter()
            .map(|e| (e.id.clone(), e.canonical.clone()))
            .collect();
        for relation in &relations {
            for endpoint in [&relation.subj, &relation.obj] {
                if let Some(canonical) = by_id.get(endpoint) {
                    if let Some(profile) = profiles.get_mut(canonical) {
                        profile
                            .relation_labels
                            .insert(relation.pred.label().to_string());
                    }
                }
            }
        }

        // C11: stable identities
        let stable_ids = if self.options.generate_stable_ids {
            Some(self.registry.assign(&mut entities, &profiles)?)
        } else {
            None
        };

        tracing::debug!(
            doc_id,
            entities = entities.len(),
            relations = relations.len(),
            guard_violations = stats.guard_violations,
            "extraction complete"
        );

        Ok(ExtractionResult {
            doc_id: doc_id.to_string(),
            entities,
            spans,
            relations,
            profiles,
            stable_ids,
            stats,
        })
    }

    /// Global pass auto-enables for documents with at least 5 segments,
    /// at least 600 characters, or a blank-line paragraph break.
    fn global_pass_enabled(&self, text: &str, segments: &[crate::types::Segment]) -> bool {
        self.options.global_relation_extraction.unwrap_or_else(|| {
            segments.len() >= 5 || text.len() >= 600 || Segmenter::has_paragraph_break(text)
        })
    }

    fn check_deadline(&self, started: Instant, stage: &str) -> Result<()> {
        if let Some(deadline) = self.options.deadline {
            if started.elapsed() > deadline {
                return Err(Error::DeadlineExceeded(stage.to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicates::Predicate;
    use crate::types::EntityType;

    fn extract(text: &str) -> ExtractionResult {
        ExtractionEngine::new(ExtractionOptions::default())
            .extract("doc", text)
            .unwrap()
    }

    #[test]
    fn test_empty_document() {
        let result = extract("");
        assert!(result.entities.is_empty());
        assert!(result.relations.is_empty());
        assert!(result.spans.is_empty());
    }

    #[test]
    fn test_single_proper_noun_no_verbs() {
        let result = extract("Aragorn.");
        assert_eq!(result.entities.len(), 1);
        assert!(result.relations.is_empty());
    }

    #[test]
    fn test_marriage_yields_both_directions() {
        let result = extract("Aragorn married Arwen.");
        assert_eq!(
            result
                .entities
                .iter()
                .filter(|e| e.entity_type == EntityType::Person)
                .count(),
            2
        );
        assert!(result.has_relation("Aragorn", Predicate::MarriedTo, "Arwen"));
        assert!(result.has_relation("Arwen", Predicate::MarriedTo, "Aragorn"));
    }

    #[test]
    fn test_deterministic_output() {
        let text = "Harry and Ron studied at Hogwarts. He defeated Voldemort.";
        let a = extract(text);
        let b = extract(text);
        let keys = |r: &ExtractionResult| {
            r.relations
                .iter()
                .map(|x| (x.subj.clone(), x.pred, x.obj.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(keys(&a), keys(&b));
    }

    #[test]
    fn test_deadline_zero_aborts() {
        let engine = ExtractionEngine::new(
            ExtractionOptions::default().with_deadline(std::time::Duration::ZERO),
        );
        let err = engine.extract("doc", "Aragorn married Arwen.").unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded(_)));
    }

    #[test]
    fn test_profiles_returned() {
        let result = extract("Queen Arwen ruled Gondor.");
        assert!(result.profiles.contains_key("Queen Arwen"));
    }

    #[test]
    fn test_stable_ids_optional() {
        let engine = ExtractionEngine::new(
            ExtractionOptions::default().with_generate_stable_ids(false),
        );
        let result = engine.extract("doc", "Aragorn married Arwen.").unwrap();
        assert!(result.stable_ids.is_none());
        assert!(result.entities.iter().all(|e| e.eid.is_none()));
    }
}
