//! Identity registry - stable EID/AID/SP assignment across documents
//!
//! Three collaborating tables behind one writer lock:
//!
//! - **EID table**: canonical name -> stable entity id, insertion-order
//!   integers; `get_or_create` is idempotent.
//! - **AID table**: (surface form, EID) bindings with confidence. A surface
//!   form may bind to multiple EIDs (homonyms).
//! - **Sense table**: per name key, the list of known senses with profile
//!   snapshots. Sense state is monotonic: empty -> first sense ->
//!   disambiguating -> multi-sense; senses are never retracted.
//!
//! Discrimination compares profile attributes (titles, co-locations,
//! descriptors, relations) and Jaro-Winkler surface similarity. Resolution
//! ambiguity between the reuse threshold and certainty mints a new sense:
//! the conservative split.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::profile::EntityProfile;
use crate::types::{Entity, EntityType, StableId};

/// Title words stripped when forming the sense key, so "Professor
/// McGonagall" and "Dr. McGonagall" compete for the same name.
const TITLE_WORDS: &[&str] = &[
    "mr", "mrs", "ms", "miss", "dr", "professor", "prof", "sir", "lady", "lord", "king",
    "queen", "prince", "princess", "captain", "general", "master", "saint", "st",
];

/// Configuration for identity resolution
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Profile similarity at or above which an existing sense is reused
    pub sense_reuse_threshold: f64,
    /// Overall resolution confidence below which a brand-new entity is
    /// assumed instead of a disambiguated sense
    pub resolve_threshold: f64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            sense_reuse_threshold: 0.7,
            resolve_threshold: 0.7,
        }
    }
}

/// The profile attributes kept per sense for later discrimination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub titles: BTreeSet<String>,
    pub descriptors: BTreeSet<String>,
    pub co_locations: BTreeSet<String>,
    pub co_orgs: BTreeSet<String>,
    pub relation_labels: BTreeSet<String>,
}

impl ProfileSnapshot {
    fn from_profile(profile: &EntityProfile) -> Self {
        Self {
            titles: profile.titles.clone(),
            descriptors: profile.descriptors.clone(),
            co_locations: profile.co_locations.clone(),
            co_orgs: profile.co_orgs.clone(),
            relation_labels: profile.relation_labels.clone(),
        }
    }

    fn merge(&mut self, other: &Self) {
        self.titles.extend(other.titles.iter().cloned());
        self.descriptors.extend(other.descriptors.iter().cloned());
        self.co_locations.extend(other.co_locations.iter().cloned());
        self.co_orgs.extend(other.co_orgs.iter().cloned());
        self.relation_labels
            .extend(other.relation_labels.iter().cloned());
    }
}

/// One known sense of a name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenseRecord {
    pub eid: u64,
    pub entity_type: EntityType,
    pub sp: Vec<u32>,
    pub canonical: String,
    pub profile: ProfileSnapshot,
}

/// A (surface form -> EID) binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AidBinding {
    pub surface: String,
    pub eid: u64,
    pub aid: u64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryInner {
    eids: HashMap<String, u64>,
    next_eid: u64,
    aids: Vec<AidBinding>,
    next_aid: u64,
    senses: HashMap<String, Vec<SenseRecord>>,
}

/// Outcome of discrimination, for diagnostics.
#[derive(Debug, Clone)]
pub struct Discrimination {
    pub should_disambiguate: bool,
    pub confidence: f64,
    pub reason: &'static str,
}

/// Process-wide identity registry. Shared across documents; the only
/// cross-document mutable state in the core.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    config: IdentityConfig,
    inner: RwLock<RegistryInner>,
}

impl IdentityRegistry {
    #[must_use]
    pub fn new(config: IdentityConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Restore a checkpointed registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn restore(config: IdentityConfig, path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let inner: RegistryInner = serde_json::from_str(&data)?;
        Ok(Self {
            config,
            inner: RwLock::new(inner),
        })
    }

    /// Serialize the three tables to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error on lock poisoning or I/O failure.
    pub fn checkpoint(&self, path: &Path) -> Result<()> {
        let inner = self
            .inner
            .read()
            .map_err(|_| Error::RegistryConflict("poisoned lock during checkpoint".to_string()))?;
        std::fs::write(path, serde_json::to_string_pretty(&*inner)?)?;
        Ok(())
    }

    /// Idempotently resolve the canonical name to its first EID.
    ///
    /// # Errors
    ///
    /// Returns `RegistryConflict` on lock poisoning.
    pub fn get_or_create(&self, canonical: &str) -> Result<u64> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| Error::RegistryConflict("poisoned lock".to_string()))?;
        Ok(get_or_create_eid(&mut inner, canonical))
    }

    /// Assign EID/AID/SP to every finalized entity, updating the entities
    /// in place and returning the stable-id list.
    ///
    /// Recoverable conflicts are retried a bounded number of times.
    ///
    /// # Errors
    ///
    /// Returns `RegistryConflict` if the writer lock stays poisoned across
    /// all retries.
    pub fn assign(
        &self,
        entities: &mut [Entity],
        profiles: &HashMap<String, EntityProfile>,
    ) -> Result<Vec<StableId>> {
        let mut last_err = None;
        for _ in 0..3 {
            match self.try_assign(entities, profiles) {
                Ok(ids) => return Ok(ids),
                Err(err @ Error::RegistryConflict(_)) => last_err = Some(err),
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::RegistryConflict("exhausted retries".to_string())))
    }

    fn try_assign(
        &self,
        entities: &mut [Entity],
        profiles: &HashMap<String, EntityProfile>,
    ) -> Result<Vec<StableId>> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| Error::RegistryConflict("poisoned lock".to_string()))?;

        // Creation order keeps the allocation deterministic
        let mut order: Vec<usize> = (0..entities.len()).collect();
        order.sort_by_key(|&i| entities[i].created_at);

        let mut out = Vec::with_capacity(entities.len());
        for idx in order {
            let entity = &mut entities[idx];
            let profile = profiles.get(&entity.canonical);
            let snapshot = profile.map(ProfileSnapshot::from_profile).unwrap_or_default();
            let stable = resolve_entity(&mut inner, &self.config, entity, snapshot);

            entity.eid = Some(stable.eid);
            entity.aid = Some(stable.aid);
            entity.sp = Some(stable.sp.clone());
            out.push(stable);
        }
        out.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        Ok(out)
    }

    /// A cloned read-only view of the tables.
    ///
    /// # Errors
    ///
    /// Returns `RegistryConflict` on lock poisoning.
    pub fn snapshot(&self) -> Result<Vec<SenseRecord>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| Error::RegistryConflict("poisoned lock".to_string()))?;
        Ok(inner.senses.values().flatten().cloned().collect())
    }
}

fn get_or_create_eid(inner: &mut RegistryInner, canonical: &str) -> u64 {
    let key = canonical.to_lowercase();
    if let Some(&eid) = inner.eids.get(&key) {
        return eid;
    }
    inner.next_eid += 1;
    let eid = inner.next_eid;
    inner.eids.insert(key, eid);
    eid
}

fn allocate_eid(inner: &mut RegistryInner, canonical: &str) -> u64 {
    let key = canonical.to_lowercase();
    if let std::collections::hash_map::Entry::Vacant(slot) = inner.eids.entry(key) {
        inner.next_eid += 1;
        slot.insert(inner.next_eid);
        return inner.next_eid;
    }
    // Homonym: the canonical already maps to an earlier sense; mint a fresh
    // EID without disturbing the first binding
    inner.next_eid += 1;
    inner.next_eid
}

fn bind_aid(inner: &mut RegistryInner, surface: &str, eid: u64, confidence: f64) -> u64 {
    let lower = surface.to_lowercase();
    if let Some(binding) = inner
        .aids
        .iter()
        .find(|b| b.surface == lower && b.eid == eid)
    {
        return binding.aid;
    }
    inner.next_aid += 1;
    inner.aids.push(AidBinding {
        surface: lower,
        eid,
        aid: inner.next_aid,
        confidence,
    });
    inner.next_aid
}

fn resolve_entity(
    inner: &mut RegistryInner,
    config: &IdentityConfig,
    entity: &Entity,
    snapshot: ProfileSnapshot,
) -> StableId {
    let key = sense_key(&entity.canonical);

    let decision = {
        let candidates = inner.senses.get(&key);
        discriminate(config, entity, &snapshot, candidates.map_or(&[], Vec::as_slice))
    };

    let (eid, sp) = if let (false, Some(sense_idx)) = (decision.should_disambiguate, decision_match(
        inner.senses.get(&key).map_or(&[], Vec::as_slice),
        config,
        entity,
        &snapshot,
    )) {
        // Reuse the matched sense and fold in the new evidence
        let senses = inner.senses.get_mut(&key).expect("matched sense exists");
        let sense = &mut senses[sense_idx];
        sense.profile.merge(&snapshot);
        (sense.eid, sense.sp.clone())
    } else if decision.should_disambiguate {
        // Conservative split: new EID, next sense path
        let eid = allocate_eid(inner, &entity.canonical);
        let next = next_sense_path(inner.senses.get(&key).map_or(&[], Vec::as_slice));
        let record = SenseRecord {
            eid,
            entity_type: entity.entity_type,
            sp: next.clone(),
            canonical: entity.canonical.clone(),
            profile: snapshot,
        };
        inner.senses.entry(key).or_default().push(record);
        (eid, next)
    } else {
        // First sight of this name; the sense path still advances past any
        // senses of a different type sharing the key
        let eid = get_or_create_eid(inner, &entity.canonical);
        let sp = next_sense_path(inner.senses.get(&key).map_or(&[], Vec::as_slice));
        inner.senses.entry(key).or_default().push(SenseRecord {
            eid,
            entity_type: entity.entity_type,
            sp: sp.clone(),
            canonical: entity.canonical.clone(),
            profile: snapshot,
        });
        (eid, sp)
    };

    let aid = bind_aid(inner, &entity.canonical, eid, decision.confidence);
    for alias in &entity.aliases {
        bind_aid(inner, alias, eid, decision.confidence * 0.9);
    }

    StableId {
        entity_id: entity.id.clone(),
        eid,
        aid,
        sp,
    }
}

/// Index of the sense to reuse, if any.
fn decision_match(
    candidates: &[SenseRecord],
    config: &IdentityConfig,
    entity: &Entity,
    snapshot: &ProfileSnapshot,
) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.entity_type == entity.entity_type)
        .filter(|(_, c)| !titles_conflict(&c.profile, snapshot))
        .map(|(i, c)| (i, similarity(entity, c, snapshot)))
        .filter(|(_, sim)| *sim >= config.sense_reuse_threshold)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
}

/// Decide whether the entity is a new sense of an existing name.
fn discriminate(
    config: &IdentityConfig,
    entity: &Entity,
    snapshot: &ProfileSnapshot,
    candidates: &[SenseRecord],
) -> Discrimination {
    let typed: Vec<&SenseRecord> = candidates
        .iter()
        .filter(|c| c.entity_type == entity.entity_type)
        .collect();
    if typed.is_empty() {
        return Discrimination {
            should_disambiguate: false,
            confidence: 1.0,
            reason: "first sense",
        };
    }

    let best = typed
        .iter()
        .map(|c| similarity(entity, c, snapshot))
        .fold(0.0_f64, f64::max);
    if typed.iter().any(|c| titles_conflict(&c.profile, snapshot)) && best < 0.95 {
        return Discrimination {
            should_disambiguate: true,
            confidence: 0.75,
            reason: "title conflict",
        };
    }
    if best >= config.sense_reuse_threshold {
        Discrimination {
            should_disambiguate: false,
            confidence: best,
            reason: "profile match",
        }
    } else if best >= config.resolve_threshold {
        // Ambiguity band: resolved, but not confidently enough to merge
        Discrimination {
            should_disambiguate: true,
            confidence: best,
            reason: "ambiguous resolution",
        }
    } else {
        Discrimination {
            should_disambiguate: true,
            confidence: 0.75,
            reason: "low profile similarity",
        }
    }
}

fn titles_conflict(a: &ProfileSnapshot, b: &ProfileSnapshot) -> bool {
    !a.titles.is_empty() && !b.titles.is_empty() && a.titles.is_disjoint(&b.titles)
}

/// Jaro-Winkler surface similarity blended with feature overlap.
///
/// Contextual attributes (titles, descriptors, co-locations, co-orgs) only
/// weigh in when both sides carry evidence: an absent attribute is not a
/// contradiction. Relation participation only ever adds positive signal,
/// because two honest documents about the same entity can easily state
/// disjoint facts.
fn similarity(entity: &Entity, sense: &SenseRecord, snapshot: &ProfileSnapshot) -> f64 {
    let name_sim = strsim::jaro_winkler(
        &entity.canonical.to_lowercase(),
        &sense.canonical.to_lowercase(),
    );

    let mut weights = 0.0;
    let mut total = 0.0;
    for (a, b) in [
        (&sense.profile.titles, &snapshot.titles),
        (&sense.profile.descriptors, &snapshot.descriptors),
        (&sense.profile.co_locations, &snapshot.co_locations),
        (&sense.profile.co_orgs, &snapshot.co_orgs),
    ] {
        if a.is_empty() || b.is_empty() {
            continue;
        }
        let union = a.union(b).count();
        let inter = a.intersection(b).count();
        #[allow(clippy::cast_precision_loss)]
        let jaccard = inter as f64 / union as f64;
        total += jaccard;
        weights += 1.0;
    }

    let shared_relations = sense
        .profile
        .relation_labels
        .intersection(&snapshot.relation_labels)
        .count();
    if shared_relations > 0 {
        total += 1.0;
        weights += 1.0;
    }

    let feature_sim = if weights == 0.0 {
        name_sim
    } else {
        total / weights
    };
    0.5 * name_sim + 0.5 * feature_sim
}

fn next_sense_path(candidates: &[SenseRecord]) -> Vec<u32> {
    let max = candidates
        .iter()
        .filter_map(|c| c.sp.first())
        .copied()
        .max()
        .unwrap_or(0);
    vec![max + 1]
}

/// Canonical with leading title words removed, lowercased.
fn sense_key(canonical: &str) -> String {
    let words: Vec<&str> = canonical.split_whitespace().collect();
    let mut start = 0;
    while start < words.len().saturating_sub(1) {
        let w = words[start].trim_end_matches('.').to_lowercase();
        if TITLE_WORDS.contains(&w.as_str()) {
            start += 1;
        } else {
            break;
        }
    }
    words[start..].join(" ").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(name: &str) -> Entity {
        Entity::new(EntityType::Person, name)
    }

    fn profile_with_title(name: &str, title: &str) -> HashMap<String, EntityProfile> {
        let mut profile = EntityProfile::new(name, EntityType::Person);
        profile.titles.insert(title.to_string());
        HashMap::from([(name.to_string(), profile)])
    }

    #[test]
    fn test_first_entity_gets_eid_one() {
        let registry = IdentityRegistry::default();
        let mut entities = vec![person("Aragorn")];
        let ids = registry.assign(&mut entities, &HashMap::new()).unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(ids[0].eid, 1);
        assert_eq!(ids[0].sp, vec![1]);
        assert_eq!(entities[0].eid, Some(1));
    }

    #[test]
    fn test_get_or_create_idempotent() {
        let registry = IdentityRegistry::default();
        let first = registry.get_or_create("Aragorn").unwrap();
        let second = registry.get_or_create("aragorn").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_same_profile_reuses_eid_across_documents() {
        let registry = IdentityRegistry::default();
        let profiles = profile_with_title("Professor McGonagall", "professor");

        let mut doc1 = vec![person("Professor McGonagall")];
        let ids1 = registry.assign(&mut doc1, &profiles).unwrap();

        let mut doc2 = vec![person("Professor McGonagall")];
        let ids2 = registry.assign(&mut doc2, &profiles).unwrap();

        assert_eq!(ids1[0].eid, ids2[0].eid);
        assert_eq!(ids1[0].sp, ids2[0].sp);
    }

    #[test]
    fn test_title_conflict_mints_new_sense() {
        let registry = IdentityRegistry::default();

        let mut doc1 = vec![person("Professor McGonagall")];
        let ids1 = registry
            .assign(&mut doc1, &profile_with_title("Professor McGonagall", "professor"))
            .unwrap();
        assert_eq!(ids1[0].eid, 1);
        assert_eq!(ids1[0].sp, vec![1]);

        let mut doc2 = vec![person("Dr. McGonagall")];
        let ids2 = registry
            .assign(&mut doc2, &profile_with_title("Dr. McGonagall", "dr"))
            .unwrap();
        assert_eq!(ids2[0].eid, 2, "title conflict must mint a new EID");
        assert_eq!(ids2[0].sp, vec![2], "and a new sense path");
    }

    #[test]
    fn test_assignment_idempotent_for_same_output() {
        let registry = IdentityRegistry::default();
        let profiles = profile_with_title("Queen Arwen", "queen");

        let mut entities = vec![person("Queen Arwen")];
        let first = registry.assign(&mut entities, &profiles).unwrap();
        let second = registry.assign(&mut entities, &profiles).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_aliases_get_bindings() {
        let registry = IdentityRegistry::default();
        let mut entity = person("Professor McGonagall");
        entity.aliases.insert("McGonagall".to_string());
        let mut entities = vec![entity];
        registry.assign(&mut entities, &HashMap::new()).unwrap();

        let inner = registry.inner.read().unwrap();
        assert!(inner.aids.iter().any(|b| b.surface == "mcgonagall"));
        assert!(inner
            .aids
            .iter()
            .any(|b| b.surface == "professor mcgonagall"));
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let dir = std::env::temp_dir().join("text-to-graph-registry-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("registry.json");

        let registry = IdentityRegistry::default();
        let mut entities = vec![person("Aragorn")];
        registry.assign(&mut entities, &HashMap::new()).unwrap();
        registry.checkpoint(&path).unwrap();

        let restored = IdentityRegistry::restore(IdentityConfig::default(), &path).unwrap();
        let mut again = vec![person("Aragorn")];
        let ids = restored.assign(&mut again, &HashMap::new()).unwrap();
        assert_eq!(ids[0].eid, 1);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_sense_key_strips_titles() {
        assert_eq!(sense_key("Professor McGonagall"), "mcgonagall");
        assert_eq!(sense_key("Dr. McGonagall"), "mcgonagall");
        assert_eq!(sense_key("Aragorn"), "aragorn");
        // A bare title is its own key, not stripped to nothing
        assert_eq!(sense_key("Professor"), "professor");
    }
}
