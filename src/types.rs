//! Core data model: documents, segments, tokens, entities, spans, relations.
//!
//! All spans are half-open byte ranges into the original document text.
//! Derived strings (deictic rewrites) never leak offsets into this model.
//! The (Entity, Relation) structure is a directed multigraph with cycles, so
//! everything cross-references by string ID and side tables rather than by
//! direct pointers: entities own their aliases and attrs, relations own their
//! evidence, the graph owns entities and relations.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::predicates::Predicate;
use crate::profile::EntityProfile;

/// Entity types recognized by the harvester. This set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityType {
    #[serde(rename = "PERSON")]
    Person,
    #[serde(rename = "ORG")]
    Org,
    #[serde(rename = "PLACE")]
    Place,
    #[serde(rename = "DATE")]
    Date,
    #[serde(rename = "WORK")]
    Work,
    #[serde(rename = "ITEM")]
    Item,
    #[serde(rename = "SPECIES")]
    Species,
    #[serde(rename = "HOUSE")]
    House,
    #[serde(rename = "TRIBE")]
    Tribe,
    #[serde(rename = "TITLE")]
    Title,
    #[serde(rename = "EVENT")]
    Event,
}

impl EntityType {
    /// Label as it appears in serialized graphs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Person => "PERSON",
            Self::Org => "ORG",
            Self::Place => "PLACE",
            Self::Date => "DATE",
            Self::Work => "WORK",
            Self::Item => "ITEM",
            Self::Species => "SPECIES",
            Self::House => "HOUSE",
            Self::Tribe => "TRIBE",
            Self::Title => "TITLE",
            Self::Event => "EVENT",
        }
    }

    /// Whether mentions of this type can corefer with animate pronouns.
    #[must_use]
    pub const fn is_animate(self) -> bool {
        matches!(self, Self::Person)
    }

    /// Group-like types that plural pronouns may refer to.
    #[must_use]
    pub const fn is_collective(self) -> bool {
        matches!(self, Self::Org | Self::House | Self::Tribe)
    }

    /// Parse a serialized label (spaCy-compatible NER labels included).
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_uppercase().as_str() {
            "PERSON" | "PER" => Some(Self::Person),
            "ORG" | "ORGANIZATION" => Some(Self::Org),
            "PLACE" | "GPE" | "LOC" | "LOCATION" | "FAC" => Some(Self::Place),
            "DATE" | "TIME" => Some(Self::Date),
            "WORK" | "WORK_OF_ART" => Some(Self::Work),
            "ITEM" | "PRODUCT" => Some(Self::Item),
            "SPECIES" => Some(Self::Species),
            "HOUSE" => Some(Self::House),
            "TRIBE" | "NORP" => Some(Self::Tribe),
            "TITLE" => Some(Self::Title),
            "EVENT" => Some(Self::Event),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Universal POS tags (UD v2, spaCy-compatible subset)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PosTag {
    Adj,
    Adp,
    Adv,
    Aux,
    Cconj,
    Det,
    Intj,
    Noun,
    Num,
    Part,
    Pron,
    Propn,
    Punct,
    Sconj,
    Sym,
    Verb,
    X,
}

impl From<&str> for PosTag {
    fn from(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "ADJ" => Self::Adj,
            "ADP" => Self::Adp,
            "ADV" => Self::Adv,
            "AUX" => Self::Aux,
            "CCONJ" | "CONJ" => Self::Cconj,
            "DET" => Self::Det,
            "INTJ" => Self::Intj,
            "NOUN" => Self::Noun,
            "NUM" => Self::Num,
            "PART" => Self::Part,
            "PRON" => Self::Pron,
            "PROPN" => Self::Propn,
            "PUNCT" => Self::Punct,
            "SCONJ" => Self::Sconj,
            "SYM" => Self::Sym,
            "VERB" => Self::Verb,
            _ => Self::X,
        }
    }
}

impl PosTag {
    /// Tokens that can head or fill an entity mention.
    #[must_use]
    pub const fn is_nominal(self) -> bool {
        matches!(self, Self::Noun | Self::Propn | Self::Pron)
    }
}

/// Universal-Dependencies-style relation labels (spaCy-compatible subset).
///
/// `Other` carries labels the relation inducers never dispatch on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepLabel {
    Root,
    Nsubj,
    Nsubjpass,
    Obj,
    Dobj,
    Iobj,
    Pobj,
    Prep,
    Attr,
    Appos,
    Conj,
    Cc,
    Poss,
    Compound,
    Det,
    Amod,
    Advmod,
    Aux,
    Auxpass,
    Nmod,
    Punct,
    Other(String),
}

impl From<&str> for DepLabel {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "root" => Self::Root,
            "nsubj" => Self::Nsubj,
            "nsubjpass" | "nsubj:pass" => Self::Nsubjpass,
            "obj" => Self::Obj,
            "dobj" => Self::Dobj,
            "iobj" => Self::Iobj,
            "pobj" => Self::Pobj,
            "prep" => Self::Prep,
            "attr" => Self::Attr,
            "appos" => Self::Appos,
            "conj" => Self::Conj,
            "cc" => Self::Cc,
            "poss" => Self::Poss,
            "compound" => Self::Compound,
            "det" => Self::Det,
            "amod" => Self::Amod,
            "advmod" => Self::Advmod,
            "aux" => Self::Aux,
            "auxpass" | "aux:pass" => Self::Auxpass,
            "nmod" => Self::Nmod,
            "punct" => Self::Punct,
            other => Self::Other(other.to_string()),
        }
    }
}

impl DepLabel {
    /// Short label used in dependency-path signatures.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Root => "root",
            Self::Nsubj => "nsubj",
            Self::Nsubjpass => "nsubjpass",
            Self::Obj => "obj",
            Self::Dobj => "dobj",
            Self::Iobj => "iobj",
            Self::Pobj => "pobj",
            Self::Prep => "prep",
            Self::Attr => "attr",
            Self::Appos => "appos",
            Self::Conj => "conj",
            Self::Cc => "cc",
            Self::Poss => "poss",
            Self::Compound => "compound",
            Self::Det => "det",
            Self::Amod => "amod",
            Self::Advmod => "advmod",
            Self::Aux => "aux",
            Self::Auxpass => "auxpass",
            Self::Nmod => "nmod",
            Self::Punct => "punct",
            Self::Other(s) => s,
        }
    }

    /// Whether this label marks the subject slot of its head.
    #[must_use]
    pub fn is_subject(&self) -> bool {
        matches!(self, Self::Nsubj | Self::Nsubjpass)
    }

    /// Whether this label marks a direct-object slot.
    #[must_use]
    pub fn is_object(&self) -> bool {
        matches!(self, Self::Obj | Self::Dobj | Self::Attr)
    }
}

/// A single parsed token. Offsets are absolute within the parsed string;
/// `head_index == index` designates the sentence root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub index: usize,
    pub text: String,
    pub lemma: String,
    pub pos: PosTag,
    /// NER hint from the parser, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ent_type: Option<EntityType>,
    pub head_index: usize,
    pub dep: DepLabel,
    pub start: usize,
    pub end: usize,
}

impl Token {
    /// True for the designated root of its sentence.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.head_index == self.index
    }
}

/// One sentence of a syntactic parse, with absolute offsets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedSentence {
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub tokens: Vec<Token>,
}

impl ParsedSentence {
    /// Index of the root token, if the sentence is non-empty.
    #[must_use]
    pub fn root(&self) -> Option<usize> {
        self.tokens.iter().position(Token::is_root)
    }

    /// Tokens whose span lies inside `[start, end)`.
    pub fn tokens_in(&self, start: usize, end: usize) -> impl Iterator<Item = &Token> {
        self.tokens
            .iter()
            .filter(move |t| t.start >= start && t.end <= end)
    }
}

/// A sentence-level slice of the document, ordered by
/// (`paragraph_index`, `sentence_index`). Offsets are half-open and lie
/// inside the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub doc_id: String,
    pub paragraph_index: usize,
    pub sentence_index: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// A canonical entity in the graph.
///
/// Invariants: `canonical` is non-empty and never a pronoun or stopword;
/// `(entity_type, lowercased canonical)` is unique across the graph;
/// pronouns never appear in `aliases`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Graph-local identifier, e.g. `person-aragorn`
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub canonical: String,
    #[serde(skip_serializing_if = "BTreeSet::is_empty", default)]
    pub aliases: BTreeSet<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub attrs: BTreeMap<String, String>,
    pub mention_count: usize,
    /// Creation sequence number within the document; deterministic given a
    /// deterministic parser
    pub created_at: u64,
    /// Stable cross-document entity id, assigned by the identity registry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eid: Option<u64>,
    /// Stable (surface form -> EID) binding id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aid: Option<u64>,
    /// Sense path distinguishing homonymous entities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sp: Option<Vec<u32>>,
}

impl Entity {
    /// Create an entity with a slug id derived from type and canonical name.
    #[must_use]
    pub fn new(entity_type: EntityType, canonical: impl Into<String>) -> Self {
        let canonical = canonical.into();
        let id = crate::normalize::entity_id(entity_type, &canonical);
        Self {
            id,
            entity_type,
            canonical,
            aliases: BTreeSet::new(),
            attrs: BTreeMap::new(),
            mention_count: 0,
            created_at: 0,
            eid: None,
            aid: None,
            sp: None,
        }
    }

    /// Registry key: type plus case-folded canonical.
    #[must_use]
    pub fn key(&self) -> (EntityType, String) {
        (self.entity_type, self.canonical.to_lowercase())
    }

    /// Whether `surface` names this entity (canonical or alias, case-folded).
    #[must_use]
    pub fn answers_to(&self, surface: &str) -> bool {
        let lower = surface.to_lowercase();
        self.canonical.to_lowercase() == lower
            || self.aliases.iter().any(|a| a.to_lowercase() == lower)
    }
}

/// An entity mention: the substring at `[start, end)` names `entity_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub entity_id: String,
    pub start: usize,
    pub end: usize,
}

/// A raw mention as seen in text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// How a coreference link was established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorefMethod {
    Exact,
    Alias,
    Descriptor,
    Pronoun,
}

/// A resolved anaphoric mention. Pronoun links yield virtual spans consumed
/// by the relation inducers; virtual spans are never exported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorefLink {
    pub mention: Mention,
    pub entity_id: String,
    pub method: CorefMethod,
    pub confidence: f64,
}

/// Which inducer emitted a relation. Dedup priority is dep > regex > narrative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Extractor {
    Dep,
    Regex,
    Narrative,
}

/// Evidence anchoring a relation to the source document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Evidence {
    pub doc_id: String,
    pub start: usize,
    pub end: usize,
    pub sentence_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualifierKind {
    Time,
    Place,
}

/// A time or place qualifier attached to a relation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Qualifier {
    pub kind: QualifierKind,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    pub start: usize,
    pub end: usize,
}

/// A typed subject/predicate/object relation with evidence.
///
/// Invariants: `subj != obj`; the `(subj_type, pred, obj_type)` triple passes
/// the predicate's type guard; at least one evidence span lies in the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,
    pub subj: String,
    pub pred: Predicate,
    pub obj: String,
    pub evidence: Vec<Evidence>,
    pub confidence: f64,
    pub extractor: Extractor,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub qualifiers: Vec<Qualifier>,
}

impl Relation {
    /// Build a relation; the id is derived from the triple.
    #[must_use]
    pub fn new(subj: &str, pred: Predicate, obj: &str) -> Self {
        Self {
            id: format!("{subj}--{}--{obj}", pred.label()),
            subj: subj.to_string(),
            pred,
            obj: obj.to_string(),
            evidence: Vec::new(),
            confidence: 0.0,
            extractor: Extractor::Dep,
            qualifiers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence.push(evidence);
        self
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    #[must_use]
    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = extractor;
        self
    }
}

/// Stable identifiers assigned by the identity registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StableId {
    pub entity_id: String,
    pub eid: u64,
    pub aid: u64,
    pub sp: Vec<u32>,
}

/// Diagnostic counters accumulated during one extraction.
///
/// Guard violations and low-confidence drops never surface as errors; they
/// are only counted here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub segments: usize,
    pub sentences: usize,
    pub entities_harvested: usize,
    pub entities_filtered: usize,
    pub entities_pruned: usize,
    pub coref_links_pronoun: usize,
    pub coref_links_descriptor: usize,
    pub coref_links_lexical: usize,
    pub relations_dep: usize,
    pub relations_regex: usize,
    pub relations_narrative: usize,
    pub guard_violations: usize,
    pub low_confidence_drops: usize,
    pub dedup_groups: usize,
}

/// Output of a successful extraction. A failed document yields no partial
/// result; a succeeded one is always well-formed, possibly empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub doc_id: String,
    pub entities: Vec<Entity>,
    pub spans: Vec<Span>,
    pub relations: Vec<Relation>,
    pub profiles: HashMap<String, EntityProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stable_ids: Option<Vec<StableId>>,
    pub stats: ExtractionStats,
}

impl ExtractionResult {
    /// An empty result for `doc_id` (e.g. empty input text).
    #[must_use]
    pub fn empty(doc_id: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            entities: Vec::new(),
            spans: Vec::new(),
            relations: Vec::new(),
            profiles: HashMap::new(),
            stable_ids: None,
            stats: ExtractionStats::default(),
        }
    }

    /// Look up an entity by graph-local id.
    #[must_use]
    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id == id)
    }

    /// Look up an entity by canonical name, case-insensitively.
    #[must_use]
    pub fn entity_by_canonical(&self, canonical: &str) -> Option<&Entity> {
        let lower = canonical.to_lowercase();
        self.entities
            .iter()
            .find(|e| e.canonical.to_lowercase() == lower)
    }

    /// True when a relation `(subj, pred, obj)` is present, by canonical name.
    #[must_use]
    pub fn has_relation(&self, subj: &str, pred: Predicate, obj: &str) -> bool {
        let (Some(s), Some(o)) = (
            self.entity_by_canonical(subj),
            self.entity_by_canonical(obj),
        ) else {
            return false;
        };
        self.relations
            .iter()
            .any(|r| r.subj == s.id && r.obj == o.id && r.pred == pred)
    }
}

/// A source document entry in the persisted graph layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub doc_id: String,
    pub char_len: usize,
}

/// Persisted multi-document graph: one JSON object with top-level
/// `entities`, `relations`, `documents` arrays. Each relation carries its
/// evidence spans by document id and absolute offsets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
    pub documents: Vec<DocumentRecord>,
}

impl KnowledgeGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a per-document result into the graph.
    ///
    /// Entities are keyed by EID when stable ids were generated, otherwise by
    /// `(type, lowercased canonical)`. Alias sets, attrs and mention counts
    /// merge; relation evidence merges by triple.
    pub fn merge(&mut self, result: &ExtractionResult, text_len: usize) {
        let mut id_map: HashMap<String, String> = HashMap::new();

        for entity in &result.entities {
            let existing = self.entities.iter_mut().find(|e| match (e.eid, entity.eid) {
                (Some(a), Some(b)) => a == b && e.sp == entity.sp,
                _ => e.key() == entity.key(),
            });
            match existing {
                Some(e) => {
                    id_map.insert(entity.id.clone(), e.id.clone());
                    e.mention_count += entity.mention_count;
                    e.aliases.extend(entity.aliases.iter().cloned());
                    for (k, v) in &entity.attrs {
                        e.attrs.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                    // Canonical upgrade to the longer, more specific form
                    if entity.canonical.split_whitespace().count()
                        > e.canonical.split_whitespace().count()
                    {
                        e.aliases.insert(e.canonical.clone());
                        e.canonical = entity.canonical.clone();
                    }
                }
                None => {
                    id_map.insert(entity.id.clone(), entity.id.clone());
                    self.entities.push(entity.clone());
                }
            }
        }

        for relation in &result.relations {
            let (Some(subj), Some(obj)) = (id_map.get(&relation.subj), id_map.get(&relation.obj))
            else {
                continue;
            };
            let found = self
                .relations
                .iter_mut()
                .find(|r| &r.subj == subj && &r.obj == obj && r.pred == relation.pred);
            match found {
                Some(r) => {
                    for ev in &relation.evidence {
                        if !r.evidence.contains(ev) {
                            r.evidence.push(ev.clone());
                        }
                    }
                    if relation.confidence > r.confidence {
                        r.confidence = relation.confidence;
                    }
                }
                None => {
                    let mut r = relation.clone();
                    r.subj = subj.clone();
                    r.obj = obj.clone();
                    self.relations.push(r);
                }
            }
        }

        if !self.documents.iter().any(|d| d.doc_id == result.doc_id) {
            self.documents.push(DocumentRecord {
                doc_id: result.doc_id.clone(),
                char_len: text_len,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_key_is_case_folded() {
        let e = Entity::new(EntityType::Person, "Aragorn");
        assert_eq!(e.key(), (EntityType::Person, "aragorn".to_string()));
        assert_eq!(e.id, "person-aragorn");
    }

    #[test]
    fn test_entity_answers_to_alias() {
        let mut e = Entity::new(EntityType::Person, "Aragorn son of Arathorn");
        e.aliases.insert("Aragorn".to_string());
        assert!(e.answers_to("aragorn"));
        assert!(e.answers_to("Aragorn son of Arathorn"));
        assert!(!e.answers_to("Arathorn"));
    }

    #[test]
    fn test_pos_tag_from_str() {
        assert_eq!(PosTag::from("PROPN"), PosTag::Propn);
        assert_eq!(PosTag::from("propn"), PosTag::Propn);
        assert_eq!(PosTag::from("WEIRD"), PosTag::X);
    }

    #[test]
    fn test_dep_label_round_trip() {
        assert_eq!(DepLabel::from("nsubj"), DepLabel::Nsubj);
        assert_eq!(DepLabel::from("nsubj:pass"), DepLabel::Nsubjpass);
        assert_eq!(DepLabel::from("xcomp"), DepLabel::Other("xcomp".into()));
        assert_eq!(DepLabel::from("xcomp").as_str(), "xcomp");
    }

    #[test]
    fn test_graph_merge_dedups_entities() {
        let mut graph = KnowledgeGraph::new();

        let mut result = ExtractionResult::empty("doc1");
        let mut e = Entity::new(EntityType::Person, "Aragorn");
        e.mention_count = 2;
        result.entities.push(e);
        graph.merge(&result, 100);

        let mut result2 = ExtractionResult::empty("doc2");
        let mut e2 = Entity::new(EntityType::Person, "Aragorn");
        e2.mention_count = 3;
        result2.entities.push(e2);
        graph.merge(&result2, 50);

        assert_eq!(graph.entities.len(), 1);
        assert_eq!(graph.entities[0].mention_count, 5);
        assert_eq!(graph.documents.len(), 2);
    }

    #[test]
    fn test_graph_merge_upgrades_canonical() {
        let mut graph = KnowledgeGraph::new();

        let mut result = ExtractionResult::empty("doc1");
        let mut long = Entity::new(EntityType::Person, "Edward Blackwood");
        long.eid = Some(7);
        long.sp = Some(vec![1]);
        result.entities.push(long);
        graph.merge(&result, 10);

        let mut result2 = ExtractionResult::empty("doc2");
        let mut longer = Entity::new(EntityType::Person, "Lord Edward Blackwood");
        longer.eid = Some(7);
        longer.sp = Some(vec![1]);
        result2.entities.push(longer);
        graph.merge(&result2, 10);

        assert_eq!(graph.entities.len(), 1);
        assert_eq!(graph.entities[0].canonical, "Lord Edward Blackwood");
        assert!(graph.entities[0].aliases.contains("Edward Blackwood"));
    }
}
