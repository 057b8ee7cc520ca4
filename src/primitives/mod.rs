//! Low-level primitives for the storage engine.

/// Positioned file I/O.
pub mod io;
