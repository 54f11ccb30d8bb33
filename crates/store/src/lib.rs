//! Record store for the hybrid allocator projection.
//!
//! The projection engine writes a fixed set of tables (accounts, signers,
//! allocator instances, allocations, attestation authorizations, owner and
//! signer change logs, per-chain statistics and the recent-block ledger).
//! This crate defines those records, the typed per-entity operations the
//! engine is allowed to perform inside one transaction, and a SQLite-backed
//! implementation.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────┐
//! │   hybrid_projection handlers  │
//! └───────────────┬───────────────┘
//!                 │ StoreTx (find / insert / update / delete)
//!         ┌───────▼────────┐
//!         │  RecordStore   │  begin() → one transaction per event or tick
//!         └───────┬────────┘
//!                 │
//!         ┌───────▼────────┐
//!         │  SqliteStore   │  writer connection + r2d2 read pool
//!         └────────────────┘
//! ```

pub mod columns;
pub mod entities;
pub mod error;
pub mod sqlite;

pub use entities::*;
pub use error::{StoreError, StoreResult};
pub use sqlite::{SqliteStore, SqliteTx};

use rusqlite::types::Value;
use rusqlite::Row;

/// Chain identifier as reported by the network (EIP-155 chain id).
pub type ChainId = u64;

/// A table row with a typed primary key.
///
/// `COLUMNS` lists every column in the order produced by [`Entity::to_values`]
/// and consumed by [`Entity::from_row`]. The primary key columns are always the
/// leading `KEY_COLUMNS.len()` entries of `COLUMNS`.
pub trait Entity: Sized + Clone + std::fmt::Debug {
    /// Natural identifier of a row.
    type Key: std::fmt::Debug;

    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];
    const KEY_COLUMNS: &'static [&'static str];

    /// SQL values of the primary key columns, in `KEY_COLUMNS` order.
    fn key_values(key: &Self::Key) -> Vec<Value>;

    /// SQL values of every column, in `COLUMNS` order.
    fn to_values(&self) -> Vec<Value>;

    /// Decode a row selected with `COLUMNS`.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// What to do when an insert hits an existing primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnConflict {
    /// Keep the existing row untouched.
    Ignore,
    /// Overwrite every non-key column of the existing row.
    Replace,
}

/// Result of a single write that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The row was written or removed.
    Applied,
    /// Insert skipped because the key is already present.
    KeyExists,
    /// Update or delete skipped because the key is not present.
    KeyAbsent,
}

impl WriteOutcome {
    pub fn is_applied(self) -> bool {
        matches!(self, WriteOutcome::Applied)
    }
}

/// Operations available inside one store transaction.
///
/// Nothing written through a transaction is visible to readers until
/// [`StoreTx::commit`] succeeds. Dropping a transaction without committing
/// discards every write made through it.
pub trait StoreTx {
    /// Point lookup by primary key.
    fn find<E: Entity>(&self, key: &E::Key) -> StoreResult<Option<E>>;

    /// Insert a row, resolving a primary key conflict with `on_conflict`.
    fn insert<E: Entity>(&mut self, row: &E, on_conflict: OnConflict) -> StoreResult<WriteOutcome>;

    /// Read the row under `key`, apply `mutate`, and write back its non-key columns.
    ///
    /// Returns [`WriteOutcome::KeyAbsent`] without calling `mutate` when no row exists.
    /// Changes `mutate` makes to key fields are not persisted.
    fn update<E, F>(&mut self, key: &E::Key, mutate: F) -> StoreResult<WriteOutcome>
    where
        E: Entity,
        F: FnOnce(&mut E);

    /// Delete the row under `key`.
    fn delete<E: Entity>(&mut self, key: &E::Key) -> StoreResult<WriteOutcome>;

    /// Make every write of this transaction visible atomically.
    fn commit(self) -> StoreResult<()>;
}

/// A transactional store of projected records.
pub trait RecordStore: Send + Sync {
    type Tx<'a>: StoreTx
    where
        Self: 'a;

    /// Open a transaction. Writers are serialized; the returned handle holds
    /// the write lock until it is committed or dropped.
    fn begin(&self) -> StoreResult<Self::Tx<'_>>;
}
