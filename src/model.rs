//! # Data Model
//!
//! Record identities, candidate edges and the rule catalog that together form
//! the match-resolution graph. Records and edges are addressed by compact
//! handles into the pool's arenas; neither holds a pointer to the other.

use ordered_float::OrderedFloat;
use rustc_hash::{FxHashMap, FxHasher};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Reserved rule name for edges the engine creates on its own.
pub const SYNTHETIC_RULE_NAME: &str = "SYNTHETIC_MATCHES";

/// Compact identifier for source records (index into the pool's record arena)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub u32);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// Compact identifier for match edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub u32);

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

/// Compact identifier for match rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleId(pub u32);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G{}", self.0)
    }
}

/// A scalar column value, as found in a unique-key or display column.
///
/// Values are totally ordered: first by variant (`Null < Integer < Real < Text`),
/// then by value. Traversals rely on this order for deterministic tie-breaking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyValue {
    Null,
    Integer(i64),
    Real(OrderedFloat<f64>),
    Text(String),
}

impl KeyValue {
    pub fn is_null(&self) -> bool {
        matches!(self, KeyValue::Null)
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Null => write!(f, "NULL"),
            KeyValue::Integer(value) => write!(f, "{}", value),
            KeyValue::Real(value) => write!(f, "{}", value),
            KeyValue::Text(value) => write!(f, "{}", value),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        KeyValue::Integer(value)
    }
}

impl From<i32> for KeyValue {
    fn from(value: i32) -> Self {
        KeyValue::Integer(value as i64)
    }
}

impl From<f64> for KeyValue {
    fn from(value: f64) -> Self {
        KeyValue::Real(OrderedFloat(value))
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        KeyValue::Text(value.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        KeyValue::Text(value)
    }
}

impl<T: Into<KeyValue>> From<Option<T>> for KeyValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(KeyValue::Null)
    }
}

/// The composite unique key of one source-table row.
///
/// Equality and ordering look only at the values. The hash is computed once
/// at construction because key lookups sit on the load and traversal paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "Vec<KeyValue>", into = "Vec<KeyValue>")]
pub struct RecordKey {
    values: Vec<KeyValue>,
    hash: u64,
}

impl RecordKey {
    pub fn new(values: Vec<KeyValue>) -> Self {
        let mut hasher = FxHasher::default();
        values.hash(&mut hasher);
        Self {
            hash: hasher.finish(),
            values,
        }
    }

    pub fn values(&self) -> &[KeyValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl PartialEq for RecordKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.values == other.values
    }
}

impl Eq for RecordKey {}

impl Hash for RecordKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl PartialOrd for RecordKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RecordKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.values.cmp(&other.values)
    }
}

impl From<Vec<KeyValue>> for RecordKey {
    fn from(values: Vec<KeyValue>) -> Self {
        RecordKey::new(values)
    }
}

impl From<RecordKey> for Vec<KeyValue> {
    fn from(key: RecordKey) -> Self {
        key.values
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, "]")
    }
}

/// One row of the source table, as a node of the match graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: RecordId,
    pub key: RecordKey,
    /// Human-readable column values; independent of the key.
    pub display_values: Vec<KeyValue>,
    /// Incident edges, in insertion order. A back-reference, not ownership.
    pub(crate) edges: Vec<EdgeId>,
}

impl SourceRecord {
    pub fn new(id: RecordId, key: RecordKey, display_values: Vec<KeyValue>) -> Self {
        Self {
            id,
            key,
            display_values,
            edges: Vec::new(),
        }
    }

    /// The edges incident to this record ("original match edges").
    pub fn edges(&self) -> &[EdgeId] {
        &self.edges
    }

    pub(crate) fn attach(&mut self, edge: EdgeId) {
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
    }

    pub(crate) fn detach(&mut self, edge: EdgeId) {
        self.edges.retain(|candidate| *candidate != edge);
    }
}

impl fmt::Display for SourceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} key={}", self.id, self.key)
    }
}

/// Resolution state of a candidate edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Unmatch,
    Match,
    AutoMatch,
    NoMatch,
}

impl MatchStatus {
    /// The code stored in the `MATCH_STATUS` column.
    pub fn code(self) -> &'static str {
        match self {
            MatchStatus::Unmatch => "UNMATCH",
            MatchStatus::Match => "MATCH",
            MatchStatus::AutoMatch => "AUTOMATCH",
            MatchStatus::NoMatch => "NOMATCH",
        }
    }

    /// Decode a stored status code. `None` (SQL NULL) decodes to `Unmatch`;
    /// an unrecognized code yields `None`.
    pub fn from_code(code: Option<&str>) -> Option<MatchStatus> {
        let Some(code) = code else {
            return Some(MatchStatus::Unmatch);
        };
        match code.trim() {
            "UNMATCH" => Some(MatchStatus::Unmatch),
            "MATCH" => Some(MatchStatus::Match),
            "AUTOMATCH" | "AUTO_MATCH" => Some(MatchStatus::AutoMatch),
            "NOMATCH" | "NO_MATCH" => Some(MatchStatus::NoMatch),
            _ => None,
        }
    }

    /// `MATCH` or `AUTOMATCH`.
    pub fn is_decided(self) -> bool {
        matches!(self, MatchStatus::Match | MatchStatus::AutoMatch)
    }

    pub(crate) fn decided(auto: bool) -> MatchStatus {
        if auto {
            MatchStatus::AutoMatch
        } else {
            MatchStatus::Match
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// What `store()` has to do with an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreState {
    /// Not yet in the result table; will be inserted.
    New,
    /// In the result table but changed since; will be updated.
    Dirty,
    /// Matches the result table.
    Clean,
}

/// Which original side of an edge is the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MasterSide {
    Lhs,
    Rhs,
}

impl MasterSide {
    /// The `DUP1_MASTER_IND` encoding: `Y` when side 1 (lhs) is master.
    pub fn indicator(side: Option<MasterSide>) -> Option<&'static str> {
        side.map(|side| match side {
            MasterSide::Lhs => "Y",
            MasterSide::Rhs => "N",
        })
    }

    /// Any value other than `Y` points at the rhs.
    pub fn from_indicator(indicator: Option<&str>) -> MasterSide {
        match indicator.map(str::trim) {
            Some("Y") | Some("y") => MasterSide::Lhs,
            _ => MasterSide::Rhs,
        }
    }
}

/// A candidate or decided relationship between two source records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchEdge {
    pub id: EdgeId,
    /// Fixed at creation; together with `original_rhs` this is the row key.
    pub original_lhs: RecordId,
    pub original_rhs: RecordId,
    pub rule: RuleId,
    pub match_percent: Option<i64>,
    pub(crate) status: MatchStatus,
    pub(crate) master: Option<MasterSide>,
    pub synthetic: bool,
    pub(crate) store_state: StoreState,
}

impl MatchEdge {
    pub fn new(
        id: EdgeId,
        original_lhs: RecordId,
        original_rhs: RecordId,
        rule: RuleId,
        status: MatchStatus,
    ) -> Self {
        Self {
            id,
            original_lhs,
            original_rhs,
            rule,
            match_percent: None,
            status,
            master: None,
            synthetic: false,
            store_state: StoreState::New,
        }
    }

    pub fn status(&self) -> MatchStatus {
        self.status
    }

    pub fn store_state(&self) -> StoreState {
        self.store_state
    }

    pub fn master_side(&self) -> Option<MasterSide> {
        self.master
    }

    /// The master record, when the edge is decided.
    pub fn master(&self) -> Option<RecordId> {
        self.master.map(|side| match side {
            MasterSide::Lhs => self.original_lhs,
            MasterSide::Rhs => self.original_rhs,
        })
    }

    /// The duplicate record, when the edge is decided.
    pub fn duplicate(&self) -> Option<RecordId> {
        self.master.map(|side| match side {
            MasterSide::Lhs => self.original_rhs,
            MasterSide::Rhs => self.original_lhs,
        })
    }

    pub fn is_decided(&self) -> bool {
        self.status.is_decided()
    }

    pub fn connects(&self, a: RecordId, b: RecordId) -> bool {
        (self.original_lhs == a && self.original_rhs == b)
            || (self.original_lhs == b && self.original_rhs == a)
    }

    /// The endpoint opposite `node`. Self-loops return `node`.
    pub fn other(&self, node: RecordId) -> RecordId {
        if self.original_lhs == node {
            self.original_rhs
        } else {
            self.original_lhs
        }
    }

    pub fn side_of(&self, node: RecordId) -> Option<MasterSide> {
        if self.original_lhs == node {
            Some(MasterSide::Lhs)
        } else if self.original_rhs == node {
            Some(MasterSide::Rhs)
        } else {
            None
        }
    }

    /// Unordered pair key used to enforce one edge per record pair.
    pub fn pair(&self) -> (RecordId, RecordId) {
        ordered_pair(self.original_lhs, self.original_rhs)
    }

    /// Set status and master together, keeping the two consistent.
    /// Returns whether anything changed; a change marks a clean edge dirty.
    pub(crate) fn assign(&mut self, status: MatchStatus, master: Option<MasterSide>) -> bool {
        let master = if status.is_decided() { master } else { None };
        if self.status == status && self.master == master {
            return false;
        }
        self.status = status;
        self.master = master;
        if self.store_state == StoreState::Clean {
            self.store_state = StoreState::Dirty;
        }
        true
    }
}

impl fmt::Display for MatchEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}-{} {} {}",
            self.id, self.original_lhs, self.original_rhs, self.rule, self.status
        )?;
        if let Some(master) = self.master() {
            write!(f, " master={}", master)?;
        }
        if self.synthetic {
            write!(f, " synthetic")?;
        }
        write!(f, ")")
    }
}

pub(crate) fn ordered_pair(a: RecordId, b: RecordId) -> (RecordId, RecordId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// A rule (group of criteria) that proposes candidate pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRule {
    pub name: String,
    /// Score written to `MATCH_PERCENT` for edges this engine inserts.
    #[serde(default)]
    pub match_percent: Option<i64>,
}

impl MatchRule {
    pub fn new(name: impl Into<String>, match_percent: Option<i64>) -> Self {
        Self {
            name: name.into(),
            match_percent,
        }
    }
}

/// Name-to-id lookup for the rules known to a matching session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<MatchRule>", into = "Vec<MatchRule>")]
pub struct RuleCatalog {
    rules: Vec<MatchRule>,
    by_name: FxHashMap<String, RuleId>,
}

impl From<Vec<MatchRule>> for RuleCatalog {
    fn from(rules: Vec<MatchRule>) -> Self {
        RuleCatalog::from_rules(rules)
    }
}

impl From<RuleCatalog> for Vec<MatchRule> {
    fn from(catalog: RuleCatalog) -> Self {
        catalog.rules
    }
}

impl RuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rules(rules: impl IntoIterator<Item = MatchRule>) -> Self {
        let mut catalog = Self::new();
        for rule in rules {
            catalog.register(rule);
        }
        catalog
    }

    /// Add a rule, or return the id of the already registered rule of that name.
    pub fn register(&mut self, rule: MatchRule) -> RuleId {
        if let Some(id) = self.by_name.get(&rule.name) {
            return *id;
        }
        let id = RuleId(self.rules.len() as u32);
        self.by_name.insert(rule.name.clone(), id);
        self.rules.push(rule);
        id
    }

    pub fn rule_by_name(&self, name: &str) -> Option<RuleId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, id: RuleId) -> Option<&MatchRule> {
        self.rules.get(id.0 as usize)
    }

    pub fn name(&self, id: RuleId) -> &str {
        self.get(id).map(|rule| rule.name.as_str()).unwrap_or("")
    }

    /// The synthetic rule, registered on first use.
    pub fn synthetic_rule(&mut self) -> RuleId {
        self.register(MatchRule::new(SYNTHETIC_RULE_NAME, None))
    }

    pub fn iter(&self) -> impl Iterator<Item = (RuleId, &MatchRule)> {
        self.rules
            .iter()
            .enumerate()
            .map(|(index, rule)| (RuleId(index as u32), rule))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
