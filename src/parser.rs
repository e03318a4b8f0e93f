//! Parser adapter - Stage 2 of the extraction pipeline
//!
//! Wraps the external syntactic parser behind a synchronous [`Parser`]
//! trait. Two strategies ship:
//!
//! 1. **Rule-Based** (default, no external dependencies). A deterministic
//!    lexicon-driven tagger that produces POS, lemmas, UD-style dependency
//!    labels and NER hints. Good enough for narrative prose with clear
//!    structure; used by the test suite.
//! 2. **Sidecar**. POSTs text to a spaCy-compatible HTTP service and maps
//!    the JSON response into [`ParsedSentence`]s. Responses are memoized
//!    for an hour; oversized documents are chunked at sentence boundaries
//!    and token offsets are rebased into the original string.
//!
//! The parser is the single external dependency of the core. If it fails,
//! the pipeline aborts with `ParserUnavailable`.

use cached::proc_macro::cached;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;
use text_splitter::TextSplitter;
use url::Url;

use crate::error::{Error, Result};
use crate::normalize::stem;
use crate::predicates::verb_triggers;
use crate::segmenter::Segmenter;
use crate::types::{DepLabel, EntityType, ParsedSentence, PosTag, Token};

/// Contract for the external syntactic parser.
///
/// Offsets in returned tokens are absolute within the string passed in.
/// Implementations must be deterministic for the same input.
pub trait Parser: Send + Sync {
    /// Parse `text` into sentences with tokens.
    ///
    /// # Errors
    ///
    /// Returns `ParserUnavailable` if the parse cannot be produced.
    fn parse(&self, text: &str) -> Result<Vec<ParsedSentence>>;
}

/// Parser selection strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParserStrategy {
    /// Built-in deterministic tagger
    RuleBased,
    /// spaCy-compatible HTTP sidecar
    Sidecar,
}

/// Configuration for the parser adapter
#[derive(Debug, Clone)]
pub struct ParserConfig {
    pub strategy: ParserStrategy,
    /// URL for the sidecar service (required for `Sidecar`)
    pub sidecar_url: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Documents longer than this are chunked before being sent
    pub max_chunk_chars: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            strategy: ParserStrategy::RuleBased,
            sidecar_url: None,
            timeout_secs: 30,
            max_chunk_chars: 8000,
        }
    }
}

impl ParserConfig {
    /// Load configuration from environment variables.
    ///
    /// Supported variables:
    /// - `PARSER_STRATEGY`: `rule-based` (default) or `sidecar`
    /// - `PARSER_SIDECAR_URL`: base URL of the sidecar service
    /// - `PARSER_TIMEOUT_SECS`: request timeout (default 30)
    /// - `PARSER_MAX_CHUNK_CHARS`: chunking threshold (default 8000)
    ///
    /// # Errors
    ///
    /// Returns a `Config` error when the strategy is `sidecar` but no URL is
    /// configured, or the URL does not parse.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let strategy = std::env::var("PARSER_STRATEGY")
            .ok()
            .and_then(|s| match s.to_lowercase().as_str() {
                "rule-based" | "rule" | "rules" => Some(ParserStrategy::RuleBased),
                "sidecar" | "http" => Some(ParserStrategy::Sidecar),
                _ => None,
            })
            .unwrap_or(ParserStrategy::RuleBased);

        let sidecar_url = std::env::var("PARSER_SIDECAR_URL").ok();
        if strategy == ParserStrategy::Sidecar {
            let raw = sidecar_url
                .as_deref()
                .ok_or_else(|| Error::Config("PARSER_SIDECAR_URL is required".to_string()))?;
            Url::parse(raw).map_err(|e| Error::Config(format!("bad sidecar URL: {e}")))?;
        }

        let timeout_secs = std::env::var("PARSER_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30);

        let max_chunk_chars = std::env::var("PARSER_MAX_CHUNK_CHARS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(8000);

        Ok(Self {
            strategy,
            sidecar_url,
            timeout_secs,
            max_chunk_chars,
        })
    }

    /// Build the configured parser.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if the sidecar strategy is selected without
    /// a URL.
    pub fn build(&self) -> Result<Box<dyn Parser>> {
        match self.strategy {
            ParserStrategy::RuleBased => Ok(Box::new(RuleBasedParser::new())),
            ParserStrategy::Sidecar => Ok(Box::new(SidecarParser::new(self.clone())?)),
        }
    }
}

// ---------------------------------------------------------------------------
// Lexicons for the rule-based tagger
// ---------------------------------------------------------------------------

const PRONOUNS: &[&str] = &[
    "he", "him", "his", "she", "her", "hers", "it", "its", "they", "them", "their", "theirs",
    "himself", "herself", "itself", "themselves", "i", "me", "my", "mine", "we", "us", "our",
    "ours", "you", "your", "yours", "who", "whom",
];

const DETERMINERS: &[&str] = &[
    "the", "a", "an", "this", "that", "these", "those", "no", "any", "each", "every", "either",
    "neither", "both", "all", "some", "many", "several", "few",
];

const PREPOSITIONS: &[&str] = &[
    "in", "at", "on", "of", "from", "to", "with", "by", "for", "into", "onto", "over", "under",
    "near", "through", "between", "among", "within", "against", "during", "after", "before",
    "toward", "towards", "upon", "across", "along", "behind", "beside", "beyond", "off", "out",
    "up", "down", "around", "about",
];

const AUXILIARIES: &[&str] = &[
    "is", "are", "was", "were", "be", "been", "being", "am", "has", "have", "had", "do", "does",
    "did", "will", "would", "shall", "should", "may", "might", "must", "can", "could",
];

const COMMON_VERBS: &[&str] = &[
    "say", "said", "tell", "told", "write", "wrote", "written", "become", "became", "include",
    "includes", "included", "announce", "announced", "serve", "served", "publish", "published",
    "visit", "visited", "name", "named", "call", "called", "bear", "bore", "born", "die", "died",
    "grow", "grew", "make", "made", "take", "took", "give", "gave", "see", "saw", "know", "knew",
    "meet", "met", "win", "won", "lose", "lost", "begin", "began", "start", "started", "return",
    "returned", "arrive", "arrived", "leave", "left", "help", "helped", "seem", "seemed",
    "remain", "remained", "keep", "kept", "hold", "held", "bring", "brought", "send", "sent",
    "stand", "stood", "sit", "sat", "walk", "walked", "speak", "spoke", "declare", "declared",
    "reach", "reached", "smile", "smiled", "open", "opened", "watch", "watched", "look",
    "looked", "find", "found", "feel", "felt", "sleep", "slept", "wake", "woke", "enter",
    "entered", "rest", "rested", "praise", "praised",
];

const TITLES: &[&str] = &[
    "mr", "mrs", "ms", "dr", "professor", "prof", "sir", "lady", "lord", "king", "queen",
    "prince", "princess", "captain", "general", "master", "saint", "st",
];

const MONTHS: &[&str] = &[
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december",
];

/// Words that start sentences without being proper nouns.
const COMMON_STARTERS: &[&str] = &[
    "members", "children", "people", "later", "then", "there", "here", "however", "meanwhile",
    "once", "soon", "now", "today", "yesterday", "finally", "eventually", "suddenly", "although",
    "though", "because", "since", "when", "while", "first", "second", "third", "last", "next",
    "still", "yet", "also", "thus", "therefore", "perhaps", "one", "two", "three", "years",
    "never", "often", "sometimes", "together",
];

const PLACE_SUFFIXES: &[&str] = &[
    "river", "mountain", "mountains", "lake", "forest", "castle", "city", "town", "village",
    "empire", "kingdom", "realm", "valley", "island", "isle", "sea", "bay", "harbor", "keep",
    "hold", "shire", "land", "lands", "hills", "woods", "desert", "plains", "bridge", "tower",
];

const ORG_SUFFIXES: &[&str] = &[
    "university", "school", "academy", "college", "guild", "company", "corporation", "inc",
    "ltd", "council", "order", "bank", "institute", "ministry", "church", "army", "legion",
];

const EVENT_WORDS: &[&str] = &["battle", "war", "siege", "tournament"];

/// First words that absorb an `of`-phrase into one mention:
/// "House of Blackwood", "Battle of Hastings", "University of Paris".
const OF_HEADS: &[&str] = &[
    "house", "university", "college", "school", "battle", "siege", "bank", "order", "kingdom",
    "council", "war",
];

fn irregular_lemmas() -> &'static HashMap<&'static str, &'static str> {
    static TABLE: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| {
        HashMap::from([
            ("went", "go"),
            ("gone", "go"),
            ("taught", "teach"),
            ("fought", "fight"),
            ("was", "be"),
            ("were", "be"),
            ("is", "be"),
            ("are", "be"),
            ("been", "be"),
            ("being", "be"),
            ("am", "be"),
            ("had", "have"),
            ("has", "have"),
            ("did", "do"),
            ("does", "do"),
            ("said", "say"),
            ("told", "tell"),
            ("wrote", "write"),
            ("written", "write"),
            ("became", "become"),
            ("bore", "bear"),
            ("born", "bear"),
            ("died", "die"),
            ("grew", "grow"),
            ("made", "make"),
            ("took", "take"),
            ("gave", "give"),
            ("saw", "see"),
            ("knew", "know"),
            ("met", "meet"),
            ("won", "win"),
            ("lost", "lose"),
            ("began", "begin"),
            ("left", "leave"),
            ("kept", "keep"),
            ("held", "hold"),
            ("brought", "bring"),
            ("sent", "send"),
            ("stood", "stand"),
            ("sat", "sit"),
            ("ran", "run"),
            ("spoke", "speak"),
            ("rode", "ride"),
            ("dwelt", "dwell"),
            ("begat", "beget"),
            ("slew", "slay"),
            ("led", "lead"),
            // Irregular plurals
            ("children", "child"),
            ("men", "man"),
            ("women", "woman"),
            ("wives", "wife"),
            ("people", "person"),
        ])
    })
}

// ---------------------------------------------------------------------------
// Rule-based parser
// ---------------------------------------------------------------------------

/// Deterministic lexicon-driven parser. No external dependencies.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedParser {
    segmenter: Segmenter,
}

impl RuleBasedParser {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            segmenter: Segmenter::new(),
        }
    }
}

impl Parser for RuleBasedParser {
    fn parse(&self, text: &str) -> Result<Vec<ParsedSentence>> {
        let segments = self.segmenter.segment("parse", text)?;
        let mut sentences = Vec::with_capacity(segments.len());

        for (index, seg) in segments.iter().enumerate() {
            let tokens = tag_sentence(&seg.text, seg.start);
            sentences.push(ParsedSentence {
                index,
                start: seg.start,
                end: seg.end,
                tokens,
            });
        }
        Ok(sentences)
    }
}

struct RawTok {
    text: String,
    start: usize,
    end: usize,
}

fn tokenize(sentence: &str, base: usize) -> Vec<RawTok> {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        regex::Regex::new(r"\d+|[A-Za-z]+(?:['\u{2019}][A-Za-z]+)?|[^\sA-Za-z0-9]")
            .expect("static regex")
    });
    re.find_iter(sentence)
        .map(|m| RawTok {
            text: m.as_str().to_string(),
            start: base + m.start(),
            end: base + m.end(),
        })
        .collect()
}

fn is_capitalized(word: &str) -> bool {
    word.chars().next().is_some_and(char::is_uppercase)
}

fn looks_like_year(word: &str) -> bool {
    word.len() == 4 && word.parse::<u32>().is_ok_and(|y| (800..=2200).contains(&y))
}

fn guess_pos(raw: &[RawTok], i: usize) -> PosTag {
    let text = raw[i].text.as_str();
    let lower = text.to_lowercase();
    let base = lower.trim_end_matches("'s").trim_end_matches("\u{2019}s");

    if text.chars().all(|c| !c.is_alphanumeric()) {
        return PosTag::Punct;
    }
    if text.chars().all(|c| c.is_ascii_digit()) {
        return PosTag::Num;
    }
    if PRONOUNS.contains(&lower.as_str()) {
        return PosTag::Pron;
    }
    if DETERMINERS.contains(&lower.as_str()) {
        return PosTag::Det;
    }
    if PREPOSITIONS.contains(&lower.as_str()) {
        return PosTag::Adp;
    }
    if matches!(lower.as_str(), "and" | "or" | "but" | "nor") {
        return PosTag::Cconj;
    }
    if AUXILIARIES.contains(&lower.as_str()) {
        return PosTag::Aux;
    }

    // Irregular pasts ("fought", "taught", "rode") only reveal themselves
    // through their base form
    let base_form = irregular_lemmas()
        .get(lower.as_str())
        .copied()
        .unwrap_or(lower.as_str());
    let verbish = verb_triggers().contains_key(&stem(base_form))
        || COMMON_VERBS.contains(&lower.as_str());
    if verbish && !is_capitalized(text) {
        return PosTag::Verb;
    }

    if is_capitalized(text) {
        let sentence_initial = i == 0
            || raw[..i]
                .iter()
                .all(|t| t.text.chars().all(|c| !c.is_alphanumeric()));
        let title_before_name = TITLES.contains(&base)
            && raw.get(i + 1).is_some_and(|t| is_capitalized(&t.text));
        if title_before_name {
            return PosTag::Propn;
        }
        if sentence_initial {
            if COMMON_STARTERS.contains(&lower.as_str()) {
                return PosTag::Noun;
            }
            if verbish {
                return PosTag::Verb;
            }
        }
        return PosTag::Propn;
    }

    if lower.ends_with("ly") {
        return PosTag::Adv;
    }
    PosTag::Noun
}

fn lemma_of(text: &str, pos: PosTag) -> String {
    let lower = text
        .to_lowercase()
        .trim_end_matches("'s")
        .trim_end_matches("\u{2019}s")
        .to_string();
    if let Some(mapped) = irregular_lemmas().get(lower.as_str()) {
        return (*mapped).to_string();
    }
    match pos {
        PosTag::Verb => {
            if let Some(b) = lower.strip_suffix("ied") {
                return format!("{b}y");
            }
            if let Some(b) = lower.strip_suffix("ed") {
                return restore_stem_base(b, &lower);
            }
            if let Some(b) = lower.strip_suffix("ing") {
                return restore_stem_base(b, &lower);
            }
            if let Some(b) = lower.strip_suffix('s') {
                if !lower.ends_with("ss") {
                    return b.to_string();
                }
            }
            lower
        }
        PosTag::Noun => {
            if let Some(b) = lower.strip_suffix("ies") {
                return format!("{b}y");
            }
            if lower.ends_with('s') && !lower.ends_with("ss") && !lower.ends_with("us") {
                return lower[..lower.len() - 1].to_string();
            }
            lower
        }
        _ => lower,
    }
}

/// Pick the base form whose stem matches the inflected word: "ruled" must
/// lemmatize to "rule", not "rul".
fn restore_stem_base(stripped: &str, original: &str) -> String {
    if stem(stripped) == stem(original) {
        return stripped.to_string();
    }
    let with_e = format!("{stripped}e");
    if stem(&with_e) == stem(original) {
        return with_e;
    }
    stripped.to_string()
}

/// A maximal nominal group with a syntactic head and an optional NER type.
struct Run {
    first: usize,
    last: usize,
    head: usize,
    ent: Option<EntityType>,
}

fn guess_run_type(raw: &[RawTok], first: usize, last: usize) -> EntityType {
    let words: Vec<String> = raw[first..=last]
        .iter()
        .map(|t| t.text.to_lowercase())
        .collect();
    let first_word = words.first().map(String::as_str).unwrap_or("");
    let last_word = words.last().map(String::as_str).unwrap_or("");

    if words
        .iter()
        .any(|w| MONTHS.contains(&w.as_str()) || looks_like_year(w.as_str()))
    {
        return EntityType::Date;
    }
    if last_word == "family" || first_word == "house" {
        return EntityType::House;
    }
    if matches!(last_word, "tribe" | "clan") {
        return EntityType::Tribe;
    }
    if EVENT_WORDS.contains(&first_word) || EVENT_WORDS.contains(&last_word) {
        return EntityType::Event;
    }
    if PLACE_SUFFIXES.contains(&last_word) {
        return EntityType::Place;
    }
    if ORG_SUFFIXES.contains(&last_word) || ORG_SUFFIXES.contains(&first_word) {
        return EntityType::Org;
    }
    EntityType::Person
}

/// Group tokens into nominal runs, absorbing `of`-phrases after known heads
/// and trailing family/tribe markers.
fn group_runs(raw: &[RawTok], pos: &[PosTag]) -> Vec<Run> {
    let mut runs = Vec::new();
    let mut i = 0;
    let n = raw.len();

    while i < n {
        match pos[i] {
            PosTag::Propn => {
                let mut last = i;
                while last + 1 < n && pos[last + 1] == PosTag::Propn {
                    last += 1;
                }
                // Title abbreviation dot: "Dr. McGonagall"
                while last + 2 < n
                    && raw[last + 1].text == "."
                    && TITLES.contains(&raw[last].text.to_lowercase().as_str())
                    && pos[last + 2] == PosTag::Propn
                {
                    last += 2;
                    while last + 1 < n && pos[last + 1] == PosTag::Propn {
                        last += 1;
                    }
                }
                // "House of Blackwood" style absorption
                let first_lower = raw[i].text.to_lowercase();
                if OF_HEADS.contains(&first_lower.as_str())
                    && last + 2 < n
                    && raw[last + 1].text.eq_ignore_ascii_case("of")
                    && pos[last + 2] == PosTag::Propn
                {
                    last += 2;
                    while last + 1 < n && pos[last + 1] == PosTag::Propn {
                        last += 1;
                    }
                }
                // Trailing family/tribe marker: "Blackwood family"
                if last + 1 < n
                    && pos[last + 1] == PosTag::Noun
                    && matches!(
                        raw[last + 1].text.to_lowercase().as_str(),
                        "family" | "tribe" | "clan"
                    )
                {
                    last += 1;
                }
                let ent = guess_run_type(raw, i, last);
                runs.push(Run {
                    first: i,
                    last,
                    head: last,
                    ent: Some(ent),
                });
                i = last + 1;
            }
            PosTag::Num => {
                let ent = looks_like_year(&raw[i].text).then_some(EntityType::Date);
                runs.push(Run {
                    first: i,
                    last: i,
                    head: i,
                    ent,
                });
                i += 1;
            }
            PosTag::Noun | PosTag::Pron => {
                runs.push(Run {
                    first: i,
                    last: i,
                    head: i,
                    ent: None,
                });
                i += 1;
            }
            _ => i += 1,
        }
    }
    runs
}

/// Does a comma-preceded run sit inside an enumeration ("A, B, and C")?
fn in_list_context(raw: &[RawTok], pos: &[PosTag], run_first: usize) -> bool {
    let mut j = run_first;
    while j < raw.len() {
        match pos[j] {
            PosTag::Verb => return false,
            PosTag::Cconj => return true,
            PosTag::Punct if !matches!(raw[j].text.as_str(), "," | ":") => return false,
            _ => j += 1,
        }
    }
    false
}

#[allow(clippy::too_many_lines)]
fn tag_sentence(sentence: &str, base: usize) -> Vec<Token> {
    let raw = tokenize(sentence, base);
    let n = raw.len();
    if n == 0 {
        return Vec::new();
    }

    let pos: Vec<PosTag> = (0..n).map(|i| guess_pos(&raw, i)).collect();
    let runs = group_runs(&raw, &pos);

    // Root: first verb, else first auxiliary, else first nominal, else 0
    let root = (0..n)
        .find(|&i| pos[i] == PosTag::Verb)
        .or_else(|| (0..n).find(|&i| pos[i] == PosTag::Aux))
        .or_else(|| (0..n).find(|&i| pos[i].is_nominal()))
        .unwrap_or(0);

    let mut dep: Vec<DepLabel> = vec![DepLabel::Other("dep".to_string()); n];
    let mut head: Vec<usize> = vec![root; n];
    dep[root] = DepLabel::Root;
    head[root] = root;

    // Function words first
    for i in 0..n {
        if i == root {
            continue;
        }
        match pos[i] {
            PosTag::Adp => {
                // Attach to the nearest preceding content token
                let attach = (0..i)
                    .rev()
                    .find(|&j| {
                        matches!(pos[j], PosTag::Verb | PosTag::Aux | PosTag::Noun | PosTag::Propn)
                    })
                    .unwrap_or(root);
                dep[i] = DepLabel::Prep;
                head[i] = attach;
            }
            PosTag::Punct => {
                dep[i] = DepLabel::Punct;
            }
            PosTag::Aux => {
                dep[i] = DepLabel::Aux;
            }
            PosTag::Adv => {
                dep[i] = DepLabel::Advmod;
            }
            PosTag::Cconj => {
                dep[i] = DepLabel::Cc;
            }
            _ => {}
        }
    }

    // Determiners and adjectives attach to the next run head
    for i in 0..n {
        if matches!(pos[i], PosTag::Det | PosTag::Adj) {
            if let Some(run) = runs.iter().find(|r| r.first > i) {
                dep[i] = if pos[i] == PosTag::Det {
                    DepLabel::Det
                } else {
                    DepLabel::Amod
                };
                head[i] = run.head;
            }
        }
    }

    // Nominal run heads get syntactic roles
    let mut subject_seen = false;
    let mut object_seen = false;
    let mut prev_head: Option<usize> = None;
    let mut conj_anchor: Option<usize> = None;

    for run in &runs {
        let h = run.head;
        if h == root {
            prev_head = Some(h);
            continue;
        }

        // Compound internal tokens
        for t in run.first..run.last {
            dep[t] = DepLabel::Compound;
            head[t] = h;
        }

        // Possessive marker: "Beren's children"
        let possessive = raw[h].text.ends_with("'s") || raw[h].text.ends_with("\u{2019}s");

        // Nearest preceding token, skipping determiners and adjectives so
        // "in the Shire" and "Gandalf, the wizard" still expose the
        // preposition / comma
        let prev_tok = (0..run.first)
            .rev()
            .find(|&j| !matches!(pos[j], PosTag::Det | PosTag::Adj));
        let preceded_by = |p: &str| prev_tok.is_some_and(|j| raw[j].text == p);
        let prep_before = prev_tok.filter(|&j| pos[j] == PosTag::Adp);
        let cconj_before = prev_tok.filter(|&j| pos[j] == PosTag::Cconj);

        if let Some(p) = prep_before {
            dep[h] = DepLabel::Pobj;
            head[h] = p;
        } else if let Some(_c) = cconj_before {
            let anchor = conj_anchor.or(prev_head).unwrap_or(root);
            dep[h] = DepLabel::Conj;
            head[h] = anchor;
            if conj_anchor.is_none() {
                conj_anchor = prev_head;
            }
        } else if preceded_by(",") && in_list_context(&raw, &pos, run.first) {
            let anchor = conj_anchor.or(prev_head).unwrap_or(root);
            dep[h] = DepLabel::Conj;
            head[h] = anchor;
            if conj_anchor.is_none() {
                conj_anchor = prev_head;
            }
        } else if preceded_by(",") && prev_head.is_some() && h < root {
            dep[h] = DepLabel::Appos;
            head[h] = prev_head.unwrap_or(root);
        } else if possessive {
            // Head is the following nominal
            let next = runs.iter().find(|r| r.first > run.last).map_or(root, |r| r.head);
            dep[h] = DepLabel::Poss;
            head[h] = next;
        } else if h < root && !subject_seen {
            dep[h] = DepLabel::Nsubj;
            head[h] = root;
            subject_seen = true;
            conj_anchor = Some(h);
        } else if h > root && !object_seen {
            dep[h] = if pos[root] == PosTag::Aux {
                DepLabel::Attr
            } else {
                DepLabel::Obj
            };
            head[h] = root;
            object_seen = true;
            conj_anchor = Some(h);
        } else {
            dep[h] = DepLabel::Nmod;
            head[h] = root;
        }

        prev_head = Some(h);
    }

    // Materialize tokens
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let ent = runs
            .iter()
            .find(|r| i >= r.first && i <= r.last)
            .and_then(|r| r.ent);
        out.push(Token {
            index: i,
            text: raw[i].text.clone(),
            lemma: lemma_of(&raw[i].text, pos[i]),
            pos: pos[i],
            ent_type: ent,
            head_index: head[i],
            dep: dep[i].clone(),
            start: raw[i].start,
            end: raw[i].end,
        });
    }
    out
}

// ---------------------------------------------------------------------------
// Sidecar parser
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ParseRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct WireToken {
    text: String,
    lemma: String,
    pos: String,
    dep: String,
    head: usize,
    start: usize,
    end: usize,
    #[serde(default)]
    ent_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct WireSentence {
    start: usize,
    end: usize,
    tokens: Vec<WireToken>,
}

/// Parser that calls a spaCy-compatible HTTP sidecar.
pub struct SidecarParser {
    config: ParserConfig,
}

impl SidecarParser {
    /// # Errors
    ///
    /// Returns a `Config` error if no sidecar URL is configured.
    pub fn new(config: ParserConfig) -> Result<Self> {
        if config.sidecar_url.is_none() {
            return Err(Error::Config(
                "sidecar URL required for Sidecar strategy".to_string(),
            ));
        }
        Ok(Self { config })
    }

    fn parse_chunk(&self, text: &str, offset: usize, sent_base: usize) -> Result<Vec<ParsedSentence>> {
        let url = self.config.sidecar_url.as_deref().unwrap_or_default();
        let wire = parse_with_sidecar_cached(
            url.to_string(),
            text.to_string(),
            self.config.timeout_secs,
        )?;

        let mut sentences = Vec::with_capacity(wire.len());
        for (i, ws) in wire.into_iter().enumerate() {
            let tokens = ws
                .tokens
                .into_iter()
                .enumerate()
                .map(|(j, wt)| Token {
                    index: j,
                    lemma: wt.lemma,
                    pos: PosTag::from(wt.pos.as_str()),
                    ent_type: wt.ent_type.as_deref().and_then(EntityType::from_label),
                    head_index: wt.head,
                    dep: DepLabel::from(wt.dep.as_str()),
                    start: wt.start + offset,
                    end: wt.end + offset,
                    text: wt.text,
                })
                .collect();
            sentences.push(ParsedSentence {
                index: sent_base + i,
                start: ws.start + offset,
                end: ws.end + offset,
                tokens,
            });
        }
        Ok(sentences)
    }
}

impl Parser for SidecarParser {
    fn parse(&self, text: &str) -> Result<Vec<ParsedSentence>> {
        if text.len() <= self.config.max_chunk_chars {
            return self.parse_chunk(text, 0, 0);
        }

        // Chunk at sentence boundaries and rebase offsets
        let splitter = TextSplitter::new(self.config.max_chunk_chars);
        let mut sentences = Vec::new();
        for (offset, chunk) in splitter.chunk_indices(text) {
            let parsed = self.parse_chunk(chunk, offset, sentences.len())?;
            sentences.extend(parsed);
        }
        Ok(sentences)
    }
}

/// Memoized sidecar call; responses cached for an hour per (url, text).
#[cached(
    time = 3600,
    result = true,
    key = "String",
    convert = r#"{ format!("{url}-{text}") }"#
)]
fn parse_with_sidecar_cached(
    url: String,
    text: String,
    timeout_secs: u64,
) -> Result<Vec<WireSentence>> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Error::Network(e.to_string()))?;

    let response = client
        .post(format!("{url}/parse"))
        .json(&ParseRequest { text: &text })
        .send()
        .map_err(|e| Error::ParserUnavailable(format!("sidecar request failed: {e}")))?;

    if !response.status().is_success() {
        return Err(Error::ParserUnavailable(format!(
            "sidecar returned {}",
            response.status()
        )));
    }

    response
        .json::<Vec<WireSentence>>()
        .map_err(|e| Error::ParserUnavailable(format!("bad sidecar response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(text: &str) -> ParsedSentence {
        let parsed = RuleBasedParser::new().parse(text).unwrap();
        assert_eq!(parsed.len(), 1, "expected one sentence in {text:?}");
        parsed.into_iter().next().unwrap()
    }

    fn find<'a>(sent: &'a ParsedSentence, text: &str) -> &'a Token {
        sent.tokens
            .iter()
            .find(|t| t.text == text)
            .unwrap_or_else(|| panic!("token {text:?} not found"))
    }

    #[test]
    fn test_simple_svo() {
        let sent = parse_one("Aragorn married Arwen.");
        let subj = find(&sent, "Aragorn");
        let verb = find(&sent, "married");
        let obj = find(&sent, "Arwen");

        assert_eq!(subj.dep, DepLabel::Nsubj);
        assert_eq!(subj.head_index, verb.index);
        assert!(verb.is_root());
        assert_eq!(verb.lemma, "marry");
        assert_eq!(obj.dep, DepLabel::Obj);
        assert_eq!(subj.ent_type, Some(EntityType::Person));
    }

    #[test]
    fn test_appositive_attachment() {
        let sent = parse_one("Aragorn, son of Arathorn, married Arwen.");
        let son = find(&sent, "son");
        let aragorn = find(&sent, "Aragorn");
        let arathorn = find(&sent, "Arathorn");
        let of = find(&sent, "of");

        assert_eq!(son.dep, DepLabel::Appos);
        assert_eq!(son.head_index, aragorn.index);
        assert_eq!(of.head_index, son.index);
        assert_eq!(arathorn.dep, DepLabel::Pobj);
        assert_eq!(arathorn.head_index, of.index);
    }

    #[test]
    fn test_coordination() {
        let sent = parse_one("Harry and Ron studied at Hogwarts.");
        let harry = find(&sent, "Harry");
        let ron = find(&sent, "Ron");
        let hogwarts = find(&sent, "Hogwarts");

        assert_eq!(harry.dep, DepLabel::Nsubj);
        assert_eq!(ron.dep, DepLabel::Conj);
        assert_eq!(ron.head_index, harry.index);
        assert_eq!(hogwarts.dep, DepLabel::Pobj);
    }

    #[test]
    fn test_copular_attr() {
        let sent = parse_one("Edward and Edmund were brothers.");
        let brothers = find(&sent, "brothers");
        assert_eq!(brothers.dep, DepLabel::Attr);
        assert_eq!(brothers.lemma, "brother");
        let edmund = find(&sent, "Edmund");
        assert_eq!(edmund.dep, DepLabel::Conj);
    }

    #[test]
    fn test_family_run_typed_as_house() {
        let sent = parse_one("The Blackwood family lived in Thornhold Castle.");
        let family = find(&sent, "family");
        assert_eq!(family.ent_type, Some(EntityType::House));
        assert_eq!(family.dep, DepLabel::Nsubj);
        let castle = find(&sent, "Castle");
        assert_eq!(castle.ent_type, Some(EntityType::Place));
        assert_eq!(castle.dep, DepLabel::Pobj);
        let blackwood = find(&sent, "Blackwood");
        assert_eq!(blackwood.dep, DepLabel::Compound);
        assert_eq!(blackwood.head_index, family.index);
    }

    #[test]
    fn test_year_is_date() {
        let sent = parse_one("Genghis Khan conquered Samarkand in 1220.");
        let year = find(&sent, "1220");
        assert_eq!(year.ent_type, Some(EntityType::Date));
        let khan = find(&sent, "Khan");
        assert_eq!(khan.dep, DepLabel::Nsubj);
        let samarkand = find(&sent, "Samarkand");
        assert_eq!(samarkand.dep, DepLabel::Obj);
    }

    #[test]
    fn test_pronoun_subject() {
        let sent = parse_one("He defeated Voldemort.");
        let he = find(&sent, "He");
        assert_eq!(he.pos, PosTag::Pron);
        assert_eq!(he.dep, DepLabel::Nsubj);
    }

    #[test]
    fn test_house_of_absorption() {
        let sent = parse_one("Roran joined the House of Blackwood.");
        let house = find(&sent, "House");
        assert_eq!(house.ent_type, Some(EntityType::House));
        let blackwood = find(&sent, "Blackwood");
        assert_eq!(blackwood.ent_type, Some(EntityType::House));
    }

    #[test]
    fn test_title_kept_in_name() {
        let sent = parse_one("Professor McGonagall taught Transfiguration.");
        let prof = find(&sent, "Professor");
        assert_eq!(prof.pos, PosTag::Propn);
        assert_eq!(prof.ent_type, Some(EntityType::Person));
        assert_eq!(prof.dep, DepLabel::Compound);
    }

    #[test]
    fn test_offsets_absolute_across_sentences() {
        let text = "Harry slept. Ron studied at Hogwarts.";
        let parsed = RuleBasedParser::new().parse(text).unwrap();
        assert_eq!(parsed.len(), 2);
        let ron = parsed[1].tokens.iter().find(|t| t.text == "Ron").unwrap();
        assert_eq!(&text[ron.start..ron.end], "Ron");
    }

    #[test]
    fn test_sidecar_requires_url() {
        let config = ParserConfig {
            strategy: ParserStrategy::Sidecar,
            ..Default::default()
        };
        assert!(SidecarParser::new(config).is_err());
    }

    #[test]
    fn test_default_config_is_rule_based() {
        let config = ParserConfig::default();
        assert_eq!(config.strategy, ParserStrategy::RuleBased);
        assert!(config.build().is_ok());
    }
}
