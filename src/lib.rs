//! # Text to Graph Library
//!
//! A Rust library for extracting a knowledge graph of canonical entities
//! and typed relations, with character-level evidence spans, from
//! narrative and expository prose.
//!
//! ## Features
//!
//! - Multi-Stage Pipeline: segmentation, windowed entity harvesting,
//!   coreference resolution, deictic rewriting, three relation inducers,
//!   and layered precision defenses
//! - Stable Identities: cross-document EID/AID/sense-path assignment with
//!   profile-based sense disambiguation
//! - Pluggable Parsing: a deterministic built-in parser, or any
//!   spaCy-compatible sidecar behind the [`parser::Parser`] trait
//! - Environment Variable Support: every precision/recall knob can be
//!   tuned without recompiling
//!
//! ## Example
//!
//! ```rust
//! use text_to_graph::{ExtractionEngine, ExtractionOptions};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = ExtractionEngine::new(ExtractionOptions::default());
//!     let result = engine.extract("doc-1", "Aragorn married Arwen.")?;
//!
//!     assert_eq!(result.entities.len(), 2);
//!     println!("{}", serde_json::to_string_pretty(&result)?);
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::env;
use std::time::Duration;

pub mod coref;
pub mod deixis;
pub mod dep_relations;
pub mod entity_filter;
pub mod error;
pub mod harvest;
pub mod identity;
pub mod narrative;
pub mod normalize;
pub mod parser;
pub mod pipeline;
pub mod postprocess;
pub mod predicates;
pub mod profile;
pub mod regex_relations;
pub mod segmenter;
pub mod types;

pub use error::{Error, Result};
pub use identity::{IdentityConfig, IdentityRegistry};
pub use parser::{Parser, ParserConfig, ParserStrategy, RuleBasedParser, SidecarParser};
pub use pipeline::ExtractionEngine;
pub use postprocess::PruneConfig;
pub use predicates::Predicate;
pub use profile::EntityProfile;
pub use types::{
    CorefLink, Entity, EntityType, Evidence, ExtractionResult, ExtractionStats, KnowledgeGraph,
    Qualifier, Relation, Span, StableId,
};

/// Initialize the library by loading a .env file, if present.
pub fn init() {
    dotenvy::dotenv().ok();
}

/// Options for one extraction engine.
///
/// Defaults match the tuned production behavior; every field has an
/// environment override so hosts can trade precision against recall
/// without recompiling.
#[derive(Debug, Clone)]
pub struct ExtractionOptions {
    /// Characters of context around each segment during entity harvesting
    pub segment_context_window: usize,

    /// Maximum subject/object mention distance for relation induction;
    /// defaults to the segment window
    pub relation_context_window: Option<usize>,

    /// Window for the coreference-aware relation pass; defaults to at
    /// least 1000 characters
    pub coref_relation_context_window: Option<usize>,

    /// Force the full-document relation re-pass on or off. `None`
    /// auto-enables for documents with >= 5 segments, >= 600 characters,
    /// or a paragraph break
    pub global_relation_extraction: Option<bool>,

    /// Confidence floor for exported relations
    pub min_confidence: f64,

    /// Strict precision mode raises the effective floor to at least 0.8
    pub strict: bool,

    pub entity_filter_enabled: bool,
    pub deduplication_enabled: bool,
    pub generate_stable_ids: bool,

    /// Dense-narrative pruning thresholds
    pub prune: PruneConfig,

    /// Seed profiles for cross-document continuity
    pub existing_profiles: Option<HashMap<String, EntityProfile>>,

    /// Per-document deadline; passing it aborts the running stage and
    /// discards partial results
    pub deadline: Option<Duration>,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            segment_context_window: 200,
            relation_context_window: None,
            coref_relation_context_window: None,
            global_relation_extraction: None,
            min_confidence: 0.70,
            strict: false,
            entity_filter_enabled: true,
            deduplication_enabled: true,
            generate_stable_ids: true,
            prune: PruneConfig::default(),
            existing_profiles: None,
            deadline: None,
        }
    }
}

impl ExtractionOptions {
    /// Create options with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load options from environment variables.
    ///
    /// Automatically loads a .env file if present. Supported variables:
    /// - `GRAPH_EXTRACTION_SEGMENT_WINDOW`: context window chars (default 200)
    /// - `GRAPH_EXTRACTION_RELATION_WINDOW`: relation window chars
    /// - `GRAPH_EXTRACTION_COREF_WINDOW`: coref-pass window chars
    /// - `GRAPH_EXTRACTION_GLOBAL_PASS`: force the global pass (true/false)
    /// - `GRAPH_EXTRACTION_MIN_CONFIDENCE`: confidence floor (default 0.70)
    /// - `GRAPH_EXTRACTION_STRICT`: strict precision mode (default false)
    /// - `GRAPH_EXTRACTION_ENTITY_FILTER`: entity filter toggle (default true)
    /// - `GRAPH_EXTRACTION_DEDUP`: deduplication toggle (default true)
    /// - `GRAPH_EXTRACTION_STABLE_IDS`: stable-id assignment (default true)
    /// - `GRAPH_EXTRACTION_PRUNE_THRESHOLD`: dense-narrative entity floor
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mut options = Self::default();

        if let Some(v) = read_env::<usize>("GRAPH_EXTRACTION_SEGMENT_WINDOW") {
            options.segment_context_window = v;
        }
        options.relation_context_window = read_env("GRAPH_EXTRACTION_RELATION_WINDOW");
        options.coref_relation_context_window = read_env("GRAPH_EXTRACTION_COREF_WINDOW");
        options.global_relation_extraction = read_env("GRAPH_EXTRACTION_GLOBAL_PASS");
        if let Some(v) = read_env::<f64>("GRAPH_EXTRACTION_MIN_CONFIDENCE") {
            options.min_confidence = v.clamp(0.0, 1.0);
        }
        if let Some(v) = read_env("GRAPH_EXTRACTION_STRICT") {
            options.strict = v;
        }
        if let Some(v) = read_env("GRAPH_EXTRACTION_ENTITY_FILTER") {
            options.entity_filter_enabled = v;
        }
        if let Some(v) = read_env("GRAPH_EXTRACTION_DEDUP") {
            options.deduplication_enabled = v;
        }
        if let Some(v) = read_env("GRAPH_EXTRACTION_STABLE_IDS") {
            options.generate_stable_ids = v;
        }
        if let Some(v) = read_env::<usize>("GRAPH_EXTRACTION_PRUNE_THRESHOLD") {
            options.prune.min_entities = v;
        }

        options
    }

    /// Effective relation window: explicitly set, or the segment window.
    #[must_use]
    pub fn relation_window(&self) -> usize {
        self.relation_context_window
            .unwrap_or(self.segment_context_window)
    }

    /// Effective coref-pass window: at least 1000 characters.
    #[must_use]
    pub fn coref_relation_window(&self) -> usize {
        self.coref_relation_context_window
            .unwrap_or_else(|| self.relation_window().max(1000))
    }

    /// The floor actually applied: strict mode raises it to 0.8.
    #[must_use]
    pub fn effective_min_confidence(&self) -> f64 {
        if self.strict {
            self.min_confidence.max(0.8)
        } else {
            self.min_confidence
        }
    }

    #[must_use]
    pub const fn with_segment_context_window(mut self, chars: usize) -> Self {
        self.segment_context_window = chars;
        self
    }

    #[must_use]
    pub const fn with_relation_context_window(mut self, chars: usize) -> Self {
        self.relation_context_window = Some(chars);
        self
    }

    #[must_use]
    pub const fn with_min_confidence(mut self, floor: f64) -> Self {
        self.min_confidence = floor;
        self
    }

    #[must_use]
    pub const fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    #[must_use]
    pub const fn with_global_relation_extraction(mut self, enabled: bool) -> Self {
        self.global_relation_extraction = Some(enabled);
        self
    }

    #[must_use]
    pub const fn with_entity_filter(mut self, enabled: bool) -> Self {
        self.entity_filter_enabled = enabled;
        self
    }

    #[must_use]
    pub const fn with_deduplication(mut self, enabled: bool) -> Self {
        self.deduplication_enabled = enabled;
        self
    }

    #[must_use]
    pub const fn with_generate_stable_ids(mut self, enabled: bool) -> Self {
        self.generate_stable_ids = enabled;
        self
    }

    #[must_use]
    pub fn with_existing_profiles(mut self, profiles: HashMap<String, EntityProfile>) -> Self {
        self.existing_profiles = Some(profiles);
        self
    }

    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

fn read_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = ExtractionOptions::default();
        assert_eq!(options.segment_context_window, 200);
        assert_eq!(options.relation_window(), 200);
        assert_eq!(options.coref_relation_window(), 1000);
        assert!((options.min_confidence - 0.70).abs() < f64::EPSILON);
        assert!(options.entity_filter_enabled);
        assert!(options.deduplication_enabled);
        assert!(options.generate_stable_ids);
    }

    #[test]
    fn test_options_builder() {
        let options = ExtractionOptions::new()
            .with_segment_context_window(400)
            .with_relation_context_window(1500)
            .with_min_confidence(0.8)
            .with_global_relation_extraction(true);

        assert_eq!(options.segment_context_window, 400);
        assert_eq!(options.relation_window(), 1500);
        assert_eq!(options.coref_relation_window(), 1500);
        assert!((options.min_confidence - 0.8).abs() < f64::EPSILON);
        assert_eq!(options.global_relation_extraction, Some(true));
    }

    #[test]
    fn test_strict_mode_raises_floor() {
        let options = ExtractionOptions::new().with_strict(true);
        assert!((options.effective_min_confidence() - 0.8).abs() < f64::EPSILON);

        let looser = ExtractionOptions::new()
            .with_strict(true)
            .with_min_confidence(0.9);
        assert!((looser.effective_min_confidence() - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_init_is_safe_without_env_file() {
        init();
    }
}
