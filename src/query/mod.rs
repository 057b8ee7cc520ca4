#![forbid(unsafe_code)]

//! Command language accepted by sessions.
//!
//! The language is deliberately small: class DDL, single-record inserts,
//! equality-filtered selects and deletes. Parsing never touches storage.

/// Statement tree produced by the parser.
pub mod ast;
/// Scalar values carried by records and literals.
pub mod value;

mod parser;

pub use ast::{Filter, Statement};
pub use value::Value;
