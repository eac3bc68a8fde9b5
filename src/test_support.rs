//! Seeded pool generators and random operation sequences shared by the
//! integration tests and benchmarks.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::{KeyValue, MatchRule, MatchStatus, RecordId, RecordKey, RuleCatalog};
use crate::pool::{ChangeSet, MatchPool};
use anyhow::Result;

pub const NAME_RULE: &str = "Name";
pub const PHONE_RULE: &str = "Phone";

pub fn default_rules() -> RuleCatalog {
    RuleCatalog::from_rules(vec![
        MatchRule::new(NAME_RULE, Some(90)),
        MatchRule::new(PHONE_RULE, Some(70)),
    ])
}

pub fn integer_key(value: i64) -> RecordKey {
    RecordKey::new(vec![KeyValue::Integer(value)])
}

/// A pool with records keyed `1..=count` and no edges.
pub fn integer_pool(count: u32) -> (MatchPool, Vec<RecordId>) {
    let mut pool = MatchPool::new(default_rules());
    let records = (1..=count as i64)
        .map(|key| pool.add_record(integer_key(key), vec![KeyValue::from(format!("person {key}"))]))
        .collect();
    (pool, records)
}

#[derive(Debug)]
pub struct GeneratedPool {
    pub pool: MatchPool,
    pub records: Vec<RecordId>,
}

/// Random candidate graph: `edge_count` attempts at joining two distinct
/// records under a random rule; about one edge in twenty starts as `NOMATCH`.
pub fn generate_pool(record_count: u32, edge_count: u32, seed: u64) -> GeneratedPool {
    let mut rng = StdRng::seed_from_u64(seed);
    let (mut pool, records) = integer_pool(record_count.max(2));
    let rules = [NAME_RULE, PHONE_RULE];

    for _ in 0..edge_count {
        let a = records[rng.random_range(0..records.len())];
        let b = records[rng.random_range(0..records.len())];
        if a == b || pool.edge_between(a, b).is_some() {
            continue;
        }
        let Some(rule) = pool.rules().rule_by_name(rules[rng.random_range(0..rules.len())]) else {
            continue;
        };
        let status = if rng.random_bool(0.05) {
            MatchStatus::NoMatch
        } else {
            MatchStatus::Unmatch
        };
        if pool.add_edge(a, b, rule, status, None).is_err() {
            continue;
        }
    }

    GeneratedPool { pool, records }
}

/// One public pool operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    DefineMaster {
        master: RecordId,
        duplicate: RecordId,
        auto: bool,
    },
    DefineMasterOfAll(RecordId),
    DefineNoMatch(RecordId, RecordId),
    DefineUnmatched(RecordId, RecordId),
    DefineUnmatchAll(RecordId),
    AutoMatch(&'static str),
    Reset,
}

/// Pick an operation over existing records; edge endpoints are favoured so
/// most operations touch real clusters.
pub fn random_operation(rng: &mut StdRng, pool: &MatchPool) -> Operation {
    let count = pool.record_count().max(1) as u32;
    let pick = |rng: &mut StdRng| RecordId(rng.random_range(0..count));
    let (a, b) = if pool.edge_count() > 0 && rng.random_bool(0.7) {
        let index = rng.random_range(0..pool.edge_count());
        match pool.edges().nth(index) {
            Some(edge) => (edge.original_lhs, edge.original_rhs),
            None => (pick(rng), pick(rng)),
        }
    } else {
        (pick(rng), pick(rng))
    };

    match rng.random_range(0..100) {
        0..=34 => Operation::DefineMaster {
            master: a,
            duplicate: b,
            auto: rng.random_bool(0.3),
        },
        35..=44 => Operation::DefineMasterOfAll(a),
        45..=59 => Operation::DefineNoMatch(a, b),
        60..=79 => Operation::DefineUnmatched(a, b),
        80..=89 => Operation::DefineUnmatchAll(a),
        90..=97 => Operation::AutoMatch(if rng.random_bool(0.5) {
            NAME_RULE
        } else {
            PHONE_RULE
        }),
        _ => Operation::Reset,
    }
}

pub fn apply_operation(pool: &mut MatchPool, operation: &Operation) -> Result<ChangeSet> {
    match operation {
        Operation::DefineMaster {
            master,
            duplicate,
            auto,
        } => pool.define_master(*master, *duplicate, *auto),
        Operation::DefineMasterOfAll(record) => pool.define_master_of_all(*record),
        Operation::DefineNoMatch(lhs, rhs) => pool.define_no_match(*lhs, *rhs),
        Operation::DefineUnmatched(lhs, rhs) => pool.define_unmatched(*lhs, *rhs),
        Operation::DefineUnmatchAll(record) => pool.define_unmatch_all(*record),
        Operation::AutoMatch(rule) => pool.do_auto_match(rule).map(|report| report.changes),
        Operation::Reset => pool.reset_pool(),
    }
}

/// Run `steps` random operations against `pool`, returning them.
pub fn run_random_operations(pool: &mut MatchPool, steps: usize, seed: u64) -> Result<Vec<Operation>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut applied = Vec::with_capacity(steps);
    for _ in 0..steps {
        let operation = random_operation(&mut rng, pool);
        apply_operation(pool, &operation)?;
        applied.push(operation);
    }
    Ok(applied)
}
