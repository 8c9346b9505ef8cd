//! Read/write interface to the record store.
//!
//! The engine owns none of the storage machinery. A store hands out a
//! [`StoreSession`], one transaction per run, through which flags are reset,
//! records are read and obsolete flags are written in batches. Dropping a
//! session without calling [`StoreSession::commit`] discards every change
//! made through it.
//!
//! - `MemoryStore` - In-memory store with staged changes and fault injection
//! - `SqliteStore` - SQLite-backed store (requires `persistence`)

pub mod memory;
#[cfg(feature = "persistence")]
pub mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "persistence")]
pub use sqlite::SqliteStore;

use std::collections::BTreeSet;

use crate::{ObsoleteSet, Record, Result, RouteScope};

/// A source of records that can open transactional sessions.
pub trait RecordStore {
    type Session<'a>: StoreSession
    where
        Self: 'a;

    /// Open a transaction covering one run.
    fn begin(&mut self) -> Result<Self::Session<'_>>;

    /// Identifiers currently flagged obsolete (committed state).
    fn flagged_ids(&mut self, scope: &RouteScope) -> Result<ObsoleteSet>;
}

/// One open transaction against a record store.
pub trait StoreSession {
    /// Clear the obsolete flag on every record in scope.
    ///
    /// Returns the number of records whose flag changed.
    fn reset_flags(&mut self, scope: &RouteScope) -> Result<usize>;

    /// Read all non-obsolete records in scope that carry a route identifier.
    fn fetch_active(&mut self, scope: &RouteScope) -> Result<Vec<Record>>;

    /// Identifiers held by more than one record anywhere in the store,
    /// regardless of scope or obsolete flag.
    fn duplicate_ids(&mut self) -> Result<BTreeSet<String>>;

    /// Set the obsolete flag on the given identifiers, touching only rows
    /// whose route is in `scope`.
    ///
    /// Called once per batch; returns the number of rows updated.
    fn flag_obsolete(&mut self, ids: &[String], scope: &RouteScope) -> Result<usize>;

    /// Identifiers flagged obsolete as seen from inside this transaction.
    fn flagged_ids(&mut self, scope: &RouteScope) -> Result<ObsoleteSet>;

    fn commit(self) -> Result<()>;

    fn rollback(self) -> Result<()>;
}
