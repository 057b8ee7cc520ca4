//! Parsed statements of the command language.
//!
//! Statements are also the unit buffered by a transaction, so they are
//! cheap to clone and carry no references into the source text.

use std::fmt;
use std::str::FromStr;

use super::parser;
use super::value::Value;
use crate::types::{Result, UmbraError};

/// Equality predicate from a `WHERE` clause.
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    /// Field name compared.
    pub field: String,
    /// Literal the field must equal.
    pub value: Value,
}

/// A single statement.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    /// `CREATE CLASS <name>`
    CreateClass {
        /// Class name.
        name: String,
    },
    /// `DROP CLASS <name>`
    DropClass {
        /// Class name.
        name: String,
    },
    /// `INSERT INTO <class> SET f = v, ...`
    Insert {
        /// Target class.
        class: String,
        /// Field assignments in source order.
        fields: Vec<(String, Value)>,
    },
    /// `SELECT FROM <class> [WHERE f = v] [LIMIT n]`
    Select {
        /// Source class.
        class: String,
        /// Optional equality filter.
        filter: Option<Filter>,
        /// Optional row limit.
        limit: Option<usize>,
    },
    /// `DELETE FROM <class> [WHERE f = v]`
    Delete {
        /// Target class.
        class: String,
        /// Optional equality filter.
        filter: Option<Filter>,
    },
}

impl Statement {
    /// Parses one statement. A trailing `;` is allowed.
    pub fn parse(sql: &str) -> Result<Self> {
        parser::parse(sql)
    }

    /// Returns true for read-only statements.
    pub fn is_query(&self) -> bool {
        matches!(self, Statement::Select { .. })
    }

    /// Fails with [`UmbraError::Invalid`] unless this is a read-only statement.
    pub fn expect_query(self) -> Result<Self> {
        if self.is_query() {
            Ok(self)
        } else {
            Err(UmbraError::Invalid("query() only accepts SELECT statements"))
        }
    }

    /// Fails with [`UmbraError::Invalid`] for read-only statements.
    pub fn expect_command(self) -> Result<Self> {
        if self.is_query() {
            Err(UmbraError::Invalid("command() does not accept SELECT statements"))
        } else {
            Ok(self)
        }
    }
}

impl FromStr for Statement {
    type Err = UmbraError;

    fn from_str(s: &str) -> Result<Self> {
        Statement::parse(s)
    }
}

fn write_filter(f: &mut fmt::Formatter<'_>, filter: &Option<Filter>) -> fmt::Result {
    match filter {
        Some(filter) => write!(f, " WHERE {} = {}", filter.field, filter.value),
        None => Ok(()),
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::CreateClass { name } => write!(f, "CREATE CLASS {name}"),
            Statement::DropClass { name } => write!(f, "DROP CLASS {name}"),
            Statement::Insert { class, fields } => {
                write!(f, "INSERT INTO {class} SET ")?;
                for (i, (field, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{field} = {value}")?;
                }
                Ok(())
            }
            Statement::Select {
                class,
                filter,
                limit,
            } => {
                write!(f, "SELECT FROM {class}")?;
                write_filter(f, filter)?;
                if let Some(limit) = limit {
                    write!(f, " LIMIT {limit}")?;
                }
                Ok(())
            }
            Statement::Delete { class, filter } => {
                write!(f, "DELETE FROM {class}")?;
                write_filter(f, filter)
            }
        }
    }
}
