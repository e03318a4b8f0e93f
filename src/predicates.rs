//! The closed predicate vocabulary: inverses, symmetry, type guards, and the
//! trigger lexicons that map verb/noun lemmas to predicate classes.
//!
//! The lexicons are data, not code: tables from lemma to predicate class,
//! so a language-specific port only swaps tables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::normalize::stem;
use crate::types::EntityType;

/// Closed relation vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    ParentOf,
    ChildOf,
    MarriedTo,
    FriendsWith,
    EnemyOf,
    SiblingOf,
    LivesIn,
    StudiesAt,
    Attended,
    TeachesAt,
    Leads,
    MemberOf,
    PartOf,
    Rules,
    TraveledTo,
    FoughtIn,
    InvestedIn,
    AdvisedBy,
}

use EntityType::{Event, House, Item, Org, Person, Place, Tribe, Work};
use Predicate::{
    AdvisedBy, Attended, ChildOf, EnemyOf, FoughtIn, FriendsWith, InvestedIn, Leads, LivesIn,
    MarriedTo, MemberOf, ParentOf, PartOf, Rules, SiblingOf, StudiesAt, TeachesAt, TraveledTo,
};

/// Types that may appear on either side of `part_of` and similar
/// container relations.
const CONTAINERS: &[EntityType] = &[Place, Org, House, Tribe, Item, Work];
const FACTIONS: &[EntityType] = &[Person, Org, House, Tribe];

impl Predicate {
    /// Serialized label, e.g. `parent_of`.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            ParentOf => "parent_of",
            ChildOf => "child_of",
            MarriedTo => "married_to",
            FriendsWith => "friends_with",
            EnemyOf => "enemy_of",
            SiblingOf => "sibling_of",
            LivesIn => "lives_in",
            StudiesAt => "studies_at",
            Attended => "attended",
            TeachesAt => "teaches_at",
            Leads => "leads",
            MemberOf => "member_of",
            PartOf => "part_of",
            Rules => "rules",
            TraveledTo => "traveled_to",
            FoughtIn => "fought_in",
            InvestedIn => "invested_in",
            AdvisedBy => "advised_by",
        }
    }

    /// The declared inverse, if any. Symmetric predicates are their own
    /// inverse.
    #[must_use]
    pub const fn inverse(self) -> Option<Self> {
        match self {
            ParentOf => Some(ChildOf),
            ChildOf => Some(ParentOf),
            MarriedTo | FriendsWith | EnemyOf | SiblingOf => Some(self),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_symmetric(self) -> bool {
        matches!(self, MarriedTo | FriendsWith | EnemyOf | SiblingOf)
    }

    /// Allowed subject types.
    #[must_use]
    pub fn subject_types(self) -> &'static [EntityType] {
        match self {
            ParentOf | ChildOf | MarriedTo | FriendsWith | SiblingOf | StudiesAt | Attended
            | TeachesAt | Leads | MemberOf | Rules | TraveledTo | AdvisedBy => &[Person],
            EnemyOf => FACTIONS,
            LivesIn => &[Person, House],
            PartOf => CONTAINERS,
            FoughtIn => &[Person, House, Tribe],
            InvestedIn => &[Person, Org],
        }
    }

    /// Allowed object types. The first listed pair is the primary one and
    /// earns the full type bonus during confidence scoring.
    #[must_use]
    pub fn object_types(self) -> &'static [EntityType] {
        match self {
            ParentOf | ChildOf | MarriedTo | FriendsWith | SiblingOf | AdvisedBy => &[Person],
            EnemyOf => FACTIONS,
            LivesIn | TraveledTo => &[Place],
            StudiesAt | TeachesAt => &[Org],
            Attended => &[Org, Event],
            Leads => &[Org, House, Tribe, Place],
            MemberOf => &[Org, House, Tribe],
            PartOf => CONTAINERS,
            Rules => &[Place, Org, House, Tribe],
            FoughtIn => &[Event, Place],
            InvestedIn => &[Org],
        }
    }

    /// Type guard: does `(subj, self, obj)` satisfy the declared signature?
    #[must_use]
    pub fn allows(self, subj: EntityType, obj: EntityType) -> bool {
        self.subject_types().contains(&subj) && self.object_types().contains(&obj)
    }

    /// Whether `(subj, obj)` is the primary signature of this predicate.
    #[must_use]
    pub fn is_primary_signature(self, subj: EntityType, obj: EntityType) -> bool {
        self.subject_types().first() == Some(&subj) && self.object_types().first() == Some(&obj)
    }

    /// Predicates admitted by the global-pass gate: family, marriage,
    /// residence, membership, leadership, part-of.
    #[must_use]
    pub const fn global_pass_allowed(self) -> bool {
        matches!(
            self,
            ParentOf | ChildOf | MarriedTo | SiblingOf | LivesIn | MemberOf | Leads | PartOf
        )
    }

    /// Parse a serialized label back into a predicate.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        ALL.iter().copied().find(|p| p.label() == label)
    }
}

impl std::fmt::Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Every predicate, in declaration order.
pub const ALL: &[Predicate] = &[
    ParentOf, ChildOf, MarriedTo, FriendsWith, EnemyOf, SiblingOf, LivesIn, StudiesAt, Attended,
    TeachesAt, Leads, MemberOf, PartOf, Rules, TraveledTo, FoughtIn, InvestedIn, AdvisedBy,
];

/// How a verb trigger recovers its object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectRoute {
    /// Direct object (dobj/obj) or copular attr
    Direct,
    /// Object of a preposition attached to the trigger
    Preposition(&'static [&'static str]),
    /// Direct object first, preposition as fallback
    DirectOrPreposition(&'static [&'static str]),
}

/// A verb-trigger rule: lemma class -> predicate, with direction and routing.
#[derive(Debug, Clone, Copy)]
pub struct VerbTrigger {
    pub pred: Predicate,
    /// When false, the syntactic subject is the relation's object
    pub subject_first: bool,
    pub route: ObjectRoute,
    pub confidence: f64,
}

/// A relational-noun rule matched on patterns like "son of X" or
/// "advisor to X". `head_is_subject` says whether the noun's governing
/// entity (appositive head or copular subject) is the relation subject.
#[derive(Debug, Clone, Copy)]
pub struct NounTrigger {
    pub pred: Predicate,
    pub head_is_subject: bool,
    pub preps: &'static [&'static str],
    pub confidence: f64,
}

/// Verb lemma -> trigger, keyed by Porter stem so inflections collapse.
pub fn verb_triggers() -> &'static HashMap<String, VerbTrigger> {
    static TABLE: OnceLock<HashMap<String, VerbTrigger>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut t = HashMap::new();
        let mut put = |lemmas: &[&str], trig: VerbTrigger| {
            for lemma in lemmas {
                t.insert(stem(lemma), trig);
            }
        };

        put(
            &["beget"],
            VerbTrigger {
                pred: ParentOf,
                subject_first: true,
                route: ObjectRoute::Direct,
                confidence: 0.9,
            },
        );
        put(
            &["marry", "wed"],
            VerbTrigger {
                pred: MarriedTo,
                subject_first: true,
                route: ObjectRoute::DirectOrPreposition(&["to"]),
                confidence: 0.9,
            },
        );
        put(
            &["work", "join", "hire", "recruit", "employ"],
            VerbTrigger {
                pred: MemberOf,
                subject_first: true,
                route: ObjectRoute::DirectOrPreposition(&["for", "at", "in", "with", "by"]),
                confidence: 0.85,
            },
        );
        put(
            &["found", "create", "establish", "launch", "build"],
            VerbTrigger {
                pred: Leads,
                subject_first: true,
                route: ObjectRoute::Direct,
                confidence: 0.85,
            },
        );
        put(
            &["travel", "go", "journey", "ride", "sail", "march", "flee"],
            VerbTrigger {
                pred: TraveledTo,
                subject_first: true,
                route: ObjectRoute::Preposition(&["to", "toward", "towards", "into"]),
                confidence: 0.85,
            },
        );
        put(
            &["study"],
            VerbTrigger {
                pred: StudiesAt,
                subject_first: true,
                route: ObjectRoute::Preposition(&["at", "in", "under"]),
                confidence: 0.9,
            },
        );
        put(
            &["attend", "graduate", "enroll"],
            VerbTrigger {
                pred: Attended,
                subject_first: true,
                route: ObjectRoute::DirectOrPreposition(&["from", "at", "in"]),
                confidence: 0.9,
            },
        );
        put(
            &["teach", "lecture"],
            VerbTrigger {
                pred: TeachesAt,
                subject_first: true,
                route: ObjectRoute::Preposition(&["at", "in"]),
                confidence: 0.9,
            },
        );
        put(
            &["rule", "conquer", "reign", "govern"],
            VerbTrigger {
                pred: Rules,
                subject_first: true,
                route: ObjectRoute::DirectOrPreposition(&["over"]),
                confidence: 0.9,
            },
        );
        put(
            &["fight", "defeat", "kill", "battle", "slay"],
            VerbTrigger {
                pred: EnemyOf,
                subject_first: true,
                route: ObjectRoute::DirectOrPreposition(&["against", "with"]),
                confidence: 0.85,
            },
        );
        put(
            &["advise", "mentor", "counsel"],
            VerbTrigger {
                pred: AdvisedBy,
                subject_first: false,
                route: ObjectRoute::Direct,
                confidence: 0.85,
            },
        );
        put(
            &["invest"],
            VerbTrigger {
                pred: InvestedIn,
                subject_first: true,
                route: ObjectRoute::Preposition(&["in"]),
                confidence: 0.9,
            },
        );
        put(
            &["live", "dwell", "reside", "settle"],
            VerbTrigger {
                pred: LivesIn,
                subject_first: true,
                route: ObjectRoute::Preposition(&["in", "at", "near", "within"]),
                confidence: 0.9,
            },
        );
        put(
            &["lead", "head", "command"],
            VerbTrigger {
                pred: Leads,
                subject_first: true,
                route: ObjectRoute::Direct,
                confidence: 0.85,
            },
        );
        t
    })
}

/// Relational-noun lemma -> trigger ("son of", "advisor to", ...).
pub fn noun_triggers() -> &'static HashMap<String, NounTrigger> {
    static TABLE: OnceLock<HashMap<String, NounTrigger>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut t = HashMap::new();
        let mut put = |lemmas: &[&str], trig: NounTrigger| {
            for lemma in lemmas {
                t.insert((*lemma).to_string(), trig);
            }
        };

        put(
            &["son", "daughter", "child"],
            NounTrigger {
                pred: ChildOf,
                head_is_subject: true,
                preps: &["of"],
                confidence: 0.9,
            },
        );
        put(
            &["father", "mother", "parent"],
            NounTrigger {
                pred: ParentOf,
                head_is_subject: true,
                preps: &["of"],
                confidence: 0.9,
            },
        );
        put(
            &["husband", "wife", "spouse"],
            NounTrigger {
                pred: MarriedTo,
                head_is_subject: true,
                preps: &["of"],
                confidence: 0.9,
            },
        );
        put(
            &["brother", "sister", "sibling"],
            NounTrigger {
                pred: SiblingOf,
                head_is_subject: true,
                preps: &["of"],
                confidence: 0.9,
            },
        );
        put(
            &["advisor", "adviser", "mentor", "counselor"],
            NounTrigger {
                // "advisor to X": the advisor is the object of advised_by
                pred: AdvisedBy,
                head_is_subject: false,
                preps: &["to", "of"],
                confidence: 0.85,
            },
        );
        put(
            &[
                "headmaster",
                "headmistress",
                "leader",
                "head",
                "chief",
                "captain",
            ],
            NounTrigger {
                pred: Leads,
                head_is_subject: true,
                preps: &["of"],
                confidence: 0.85,
            },
        );
        put(
            &["king", "queen", "ruler", "emperor", "empress", "lord"],
            NounTrigger {
                pred: Rules,
                head_is_subject: true,
                preps: &["of"],
                confidence: 0.85,
            },
        );
        put(
            &["member"],
            NounTrigger {
                pred: MemberOf,
                head_is_subject: true,
                preps: &["of"],
                confidence: 0.85,
            },
        );
        put(
            &["friend", "ally"],
            NounTrigger {
                pred: FriendsWith,
                head_is_subject: true,
                preps: &["of"],
                confidence: 0.85,
            },
        );
        put(
            &["enemy", "rival", "foe"],
            NounTrigger {
                pred: EnemyOf,
                head_is_subject: true,
                preps: &["of"],
                confidence: 0.85,
            },
        );
        t
    })
}

/// Copular plural-kinship lemmas: "X and Y were brothers".
pub fn copular_pair_triggers() -> &'static HashMap<String, Predicate> {
    static TABLE: OnceLock<HashMap<String, Predicate>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut t = HashMap::new();
        for lemma in ["brother", "sister", "sibling", "twin"] {
            t.insert(lemma.to_string(), SiblingOf);
        }
        for lemma in ["friend", "ally", "companion"] {
            t.insert(lemma.to_string(), FriendsWith);
        }
        for lemma in ["enemy", "rival", "foe"] {
            t.insert(lemma.to_string(), EnemyOf);
        }
        t
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse_pairs() {
        assert_eq!(ParentOf.inverse(), Some(ChildOf));
        assert_eq!(ChildOf.inverse(), Some(ParentOf));
        assert_eq!(MarriedTo.inverse(), Some(MarriedTo));
        assert_eq!(LivesIn.inverse(), None);
    }

    #[test]
    fn test_symmetric_set() {
        for p in [MarriedTo, FriendsWith, EnemyOf, SiblingOf] {
            assert!(p.is_symmetric(), "{p} should be symmetric");
            assert_eq!(p.inverse(), Some(p));
        }
        assert!(!ParentOf.is_symmetric());
    }

    #[test]
    fn test_type_guards() {
        assert!(LivesIn.allows(Person, Place));
        assert!(LivesIn.allows(House, Place));
        assert!(!LivesIn.allows(Person, Person));
        assert!(Rules.allows(Person, Place));
        assert!(!Rules.allows(Place, Person));
        assert!(StudiesAt.allows(Person, Org));
        assert!(!StudiesAt.allows(Person, Place));
        assert!(PartOf.allows(Place, Place));
        assert!(!PartOf.allows(Person, Place));
    }

    #[test]
    fn test_verb_trigger_stemming_collapses_inflections() {
        let table = verb_triggers();
        let married = table.get(&stem("married")).expect("married should hit");
        let marries = table.get(&stem("marries")).expect("marries should hit");
        assert_eq!(married.pred, MarriedTo);
        assert_eq!(marries.pred, MarriedTo);
        assert_eq!(table.get(&stem("studied")).unwrap().pred, StudiesAt);
        assert_eq!(table.get(&stem("conquered")).unwrap().pred, Rules);
    }

    #[test]
    fn test_noun_triggers() {
        let table = noun_triggers();
        assert_eq!(table.get("son").unwrap().pred, ChildOf);
        assert!(table.get("son").unwrap().head_is_subject);
        assert!(!table.get("advisor").unwrap().head_is_subject);
    }

    #[test]
    fn test_global_pass_allow_list() {
        assert!(MarriedTo.global_pass_allowed());
        assert!(LivesIn.global_pass_allowed());
        assert!(!TraveledTo.global_pass_allowed());
        assert!(!EnemyOf.global_pass_allowed());
    }

    #[test]
    fn test_label_round_trip() {
        for p in ALL {
            assert_eq!(Predicate::from_label(p.label()), Some(*p));
        }
    }
}
