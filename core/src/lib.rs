//! Household meal-planning data, mirrored locally from a shared remote store.
//!
//! [`Household`] is the entry point: it starts a session, bulk loads every
//! collection into an in-memory mirror, keeps the mirror current from the
//! remote change feed, and applies writes optimistically with rollback.

pub mod error;
pub mod feed;
pub mod mirror;
pub mod models;
pub mod mutator;
pub mod planner;
pub mod remote;
pub mod service;
pub mod session;
pub mod store;

#[cfg(test)]
mod test_support;

pub use error::{Result, SyncError};
pub use mirror::Phase;
pub use remote::{MemoryRemote, RemoteStore, UnconfiguredRemote};
pub use service::Household;
