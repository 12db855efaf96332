//! Offline-first mutation queue and sync engine.
//!
//! Writes enter through [`gateway::MutationGateway`]. While offline they are
//! captured in the durable SQLite queue ([`db`]); when connectivity returns the
//! [`sync::SyncOrchestrator`] replays them in order through the
//! [`executor::MutationExecutor`].

pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod model;
pub mod remote;
pub mod sync;
