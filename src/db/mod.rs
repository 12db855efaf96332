//! Durable queue store: SQLite schema access for queued mutations.
//!
//! - `model`: patch and row-level types used by the repository.
//! - `repo`: SQL-only functions that map rows into `MutationRecord`s.
//!
//! Callers import from `offline_sync::db` directly; the repository API is
//! re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::MutationPatch;
