//! In-memory graph state rebuilt from the frame log.
//!
//! Statements are first planned into [`LogOp`]s against a read-only view,
//! the ops are made durable, and only then applied. Replay on open applies
//! the same ops, so the live state and the recovered state cannot diverge.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::query::{Filter, Statement, Value};
use crate::types::{Result, UmbraError};

/// Cluster and position of a record, displayed as `#cluster:position`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId {
    /// Cluster owned by the record's class.
    pub cluster: u32,
    /// Position inside the cluster; never reused.
    pub position: u64,
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.cluster, self.position)
    }
}

/// A stored document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Identity.
    pub rid: RecordId,
    /// Class name as declared.
    pub class: String,
    /// Field values.
    pub fields: BTreeMap<String, Value>,
}

impl Record {
    /// Looks up a field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Untagged JSON view: `{"@rid": "#c:p", "@class": ..., fields...}`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("@rid".into(), self.rid.to_string().into());
        map.insert("@class".into(), self.class.clone().into());
        for (k, v) in &self.fields {
            map.insert(k.clone(), v.to_json());
        }
        serde_json::Value::Object(map)
    }
}

/// Rows returned by a query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultSet {
    records: Vec<Record>,
}

impl ResultSet {
    /// Wraps records.
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if no row matched.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates rows in record id order.
    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    /// Borrows all rows.
    pub fn records(&self) -> &[Record] {
        &self.records
    }
}

impl IntoIterator for ResultSet {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Logged mutation. A frame holds the ops of one committed batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LogOp {
    /// A class and its cluster were created.
    CreateClass {
        /// Declared name.
        name: String,
        /// Cluster assigned.
        cluster: u32,
    },
    /// A class and all of its records were removed.
    DropClass {
        /// Declared name.
        name: String,
    },
    /// A record was stored.
    Insert {
        /// The full record.
        record: Record,
    },
    /// Records were removed from a class.
    Delete {
        /// Declared class name.
        class: String,
        /// Positions removed.
        positions: Vec<u64>,
    },
}

#[derive(Clone, Debug)]
struct ClassState {
    name: String,
    cluster: u32,
    next_position: u64,
    records: BTreeMap<u64, Record>,
}

impl ClassState {
    fn matching<'a>(&'a self, filter: &'a Option<Filter>) -> impl Iterator<Item = &'a Record> {
        self.records.values().filter(move |r| match filter {
            Some(f) => r.get(&f.field).is_some_and(|v| v.matches(&f.value)),
            None => true,
        })
    }
}

/// Classes and records of one storage.
#[derive(Clone, Debug, Default)]
pub struct GraphState {
    classes: HashMap<String, ClassState>,
    next_cluster: u32,
}

fn class_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl GraphState {
    /// Empty state.
    pub fn new() -> Self {
        Self::default()
    }

    fn class(&self, name: &str) -> Result<&ClassState> {
        self.classes
            .get(&class_key(name))
            .ok_or_else(|| UmbraError::NotFound(format!("class '{name}'")))
    }

    /// Returns true if a class of that name (any case) exists.
    pub fn has_class(&self, name: &str) -> bool {
        self.classes.contains_key(&class_key(name))
    }

    /// Total records over all classes.
    pub fn record_count(&self) -> u64 {
        self.classes.values().map(|c| c.records.len() as u64).sum()
    }

    /// Number of classes.
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Evaluates a `SELECT`.
    pub fn select(&self, stmt: &Statement) -> Result<ResultSet> {
        let Statement::Select {
            class,
            filter,
            limit,
        } = stmt
        else {
            return Err(UmbraError::Invalid("only SELECT can be evaluated as a query"));
        };
        let state = self.class(class)?;
        let rows = state
            .matching(filter)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(ResultSet::new(rows))
    }

    /// Turns a mutating statement into log ops without changing the state.
    /// Returns the ops and the number of records affected.
    pub fn plan(&self, stmt: &Statement) -> Result<(Vec<LogOp>, u64)> {
        match stmt {
            Statement::CreateClass { name } => {
                if self.has_class(name) {
                    return Err(UmbraError::Schema(format!("class '{name}' already exists")));
                }
                let op = LogOp::CreateClass {
                    name: name.clone(),
                    cluster: self.next_cluster,
                };
                Ok((vec![op], 0))
            }
            Statement::DropClass { name } => {
                let state = self.class(name)?;
                let op = LogOp::DropClass {
                    name: state.name.clone(),
                };
                Ok((vec![op], 0))
            }
            Statement::Insert { class, fields } => {
                let state = self.class(class)?;
                let record = Record {
                    rid: RecordId {
                        cluster: state.cluster,
                        position: state.next_position,
                    },
                    class: state.name.clone(),
                    fields: fields.iter().cloned().collect(),
                };
                Ok((vec![LogOp::Insert { record }], 1))
            }
            Statement::Delete { class, filter } => {
                let state = self.class(class)?;
                let positions: Vec<u64> =
                    state.matching(filter).map(|r| r.rid.position).collect();
                let affected = positions.len() as u64;
                if positions.is_empty() {
                    return Ok((Vec::new(), 0));
                }
                let op = LogOp::Delete {
                    class: state.name.clone(),
                    positions,
                };
                Ok((vec![op], affected))
            }
            Statement::Select { .. } => {
                Err(UmbraError::Invalid("SELECT does not produce log operations"))
            }
        }
    }

    /// Applies a logged op. Ops that reference a missing class are corruption.
    pub fn apply(&mut self, op: LogOp) -> Result<()> {
        match op {
            LogOp::CreateClass { name, cluster } => {
                self.next_cluster = self.next_cluster.max(cluster + 1);
                self.classes.insert(
                    class_key(&name),
                    ClassState {
                        name,
                        cluster,
                        next_position: 0,
                        records: BTreeMap::new(),
                    },
                );
            }
            LogOp::DropClass { name } => {
                self.classes.remove(&class_key(&name));
            }
            LogOp::Insert { record } => {
                let state = self
                    .classes
                    .get_mut(&class_key(&record.class))
                    .ok_or(UmbraError::Corruption("insert into unknown class"))?;
                let position = record.rid.position;
                state.next_position = state.next_position.max(position + 1);
                state.records.insert(position, record);
            }
            LogOp::Delete { class, positions } => {
                let state = self
                    .classes
                    .get_mut(&class_key(&class))
                    .ok_or(UmbraError::Corruption("delete from unknown class"))?;
                for position in positions {
                    state.records.remove(&position);
                }
            }
        }
        Ok(())
    }

    /// Plans and applies a batch on this state, stopping at the first error.
    /// Callers run this on a clone so a failed batch leaves nothing behind.
    pub fn plan_batch(&mut self, stmts: &[Statement]) -> Result<(Vec<LogOp>, u64)> {
        let mut all = Vec::new();
        let mut affected = 0;
        for stmt in stmts {
            let (ops, n) = self.plan(stmt)?;
            for op in &ops {
                self.apply(op.clone())?;
            }
            all.extend(ops);
            affected += n;
        }
        Ok((all, affected))
    }
}
