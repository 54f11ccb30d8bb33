//! SQLite-backed record store.
//!
//! `SqliteStore` keeps a dedicated writer connection behind a mutex, so each
//! projection transaction is serialized, and an r2d2 pool of read-only
//! connections for queries. WAL mode lets readers proceed while a projection
//! transaction is open.

use std::path::Path;

use alloy_primitives::Address;
use parking_lot::{Mutex, MutexGuard};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::error::StoreResult;
use crate::{
    columns, AllocatorInstance, ChainId, ChainStatistics, Entity, IndexedBlock, OnConflict,
    RecordStore, SignerChange, StoreTx, WriteOutcome,
};

/// Record store backed by a SQLite database.
pub struct SqliteStore {
    /// Connection pool for read operations (concurrent).
    read_pool: Pool<SqliteConnectionManager>,
    /// Dedicated connection for projection transactions (serialized).
    writer: Mutex<Connection>,
}

/// Configure a connection with standard PRAGMAs for WAL mode.
fn configure_connection(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA busy_timeout=5000;",
    )
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS account (
    address BLOB PRIMARY KEY,
    first_seen_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS signer (
    address BLOB PRIMARY KEY,
    is_active INTEGER NOT NULL DEFAULT 1,
    added_at INTEGER NOT NULL,
    removed_at INTEGER
);

CREATE TABLE IF NOT EXISTS allocator_instance (
    chain_id INTEGER PRIMARY KEY,
    compact_address BLOB NOT NULL,
    owner_address BLOB NOT NULL,
    allocator_id BLOB NOT NULL,
    initialized_at INTEGER NOT NULL,
    block_number INTEGER NOT NULL,
    transaction_hash BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_allocator_instance_owner ON allocator_instance(owner_address);

CREATE TABLE IF NOT EXISTS allocation (
    id TEXT PRIMARY KEY,
    claim_hash BLOB NOT NULL,
    chain_id INTEGER NOT NULL,
    sponsor_address BLOB NOT NULL,
    nonce BLOB NOT NULL,
    expires BLOB NOT NULL,
    commitments TEXT NOT NULL,
    block_number INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    transaction_hash BLOB NOT NULL,
    log_index INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_allocation_claim_hash ON allocation(claim_hash);
CREATE INDEX IF NOT EXISTS idx_allocation_sponsor ON allocation(sponsor_address);
CREATE INDEX IF NOT EXISTS idx_allocation_chain ON allocation(chain_id);
CREATE INDEX IF NOT EXISTS idx_allocation_timestamp ON allocation(timestamp);
CREATE INDEX IF NOT EXISTS idx_allocation_nonce ON allocation(nonce);

CREATE TABLE IF NOT EXISTS attestation_authorization (
    id TEXT PRIMARY KEY,
    nonce BLOB NOT NULL,
    chain_id INTEGER NOT NULL,
    block_number INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    transaction_hash BLOB NOT NULL,
    log_index INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_attestation_nonce ON attestation_authorization(nonce);
CREATE INDEX IF NOT EXISTS idx_attestation_chain ON attestation_authorization(chain_id);
CREATE INDEX IF NOT EXISTS idx_attestation_timestamp ON attestation_authorization(timestamp);

CREATE TABLE IF NOT EXISTS owner_change (
    id TEXT PRIMARY KEY,
    chain_id INTEGER NOT NULL,
    old_owner BLOB NOT NULL,
    new_owner BLOB NOT NULL,
    block_number INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    transaction_hash BLOB NOT NULL,
    log_index INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_owner_change_chain ON owner_change(chain_id);
CREATE INDEX IF NOT EXISTS idx_owner_change_old ON owner_change(old_owner);
CREATE INDEX IF NOT EXISTS idx_owner_change_new ON owner_change(new_owner);
CREATE INDEX IF NOT EXISTS idx_owner_change_timestamp ON owner_change(timestamp);

CREATE TABLE IF NOT EXISTS owner_replacement_proposal (
    id TEXT PRIMARY KEY,
    chain_id INTEGER NOT NULL,
    proposed_owner BLOB NOT NULL,
    block_number INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    transaction_hash BLOB NOT NULL,
    log_index INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_owner_proposal_chain ON owner_replacement_proposal(chain_id);
CREATE INDEX IF NOT EXISTS idx_owner_proposal_owner ON owner_replacement_proposal(proposed_owner);
CREATE INDEX IF NOT EXISTS idx_owner_proposal_timestamp ON owner_replacement_proposal(timestamp);

CREATE TABLE IF NOT EXISTS signer_change (
    id TEXT PRIMARY KEY,
    chain_id INTEGER NOT NULL,
    signer_address BLOB NOT NULL,
    change_type TEXT NOT NULL,
    block_number INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    transaction_hash BLOB NOT NULL,
    log_index INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_signer_change_chain ON signer_change(chain_id);
CREATE INDEX IF NOT EXISTS idx_signer_change_signer ON signer_change(signer_address);
CREATE INDEX IF NOT EXISTS idx_signer_change_type ON signer_change(change_type);
CREATE INDEX IF NOT EXISTS idx_signer_change_timestamp ON signer_change(timestamp);

CREATE TABLE IF NOT EXISTS chain_statistics (
    chain_id INTEGER PRIMARY KEY,
    total_allocations INTEGER NOT NULL DEFAULT 0,
    total_attestation_authorizations INTEGER NOT NULL DEFAULT 0,
    unique_sponsors INTEGER NOT NULL DEFAULT 0,
    last_updated INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS indexed_block (
    block_number INTEGER NOT NULL,
    chain_id INTEGER NOT NULL,
    block_hash BLOB NOT NULL,
    block_timestamp INTEGER NOT NULL,
    indexed_at INTEGER NOT NULL,
    PRIMARY KEY (block_number, chain_id)
);
CREATE INDEX IF NOT EXISTS idx_indexed_block_chain ON indexed_block(chain_id);
CREATE INDEX IF NOT EXISTS idx_indexed_block_hash ON indexed_block(block_hash);
CREATE INDEX IF NOT EXISTS idx_indexed_block_timestamp ON indexed_block(block_timestamp);
";

impl SqliteStore {
    /// Open (or create) an on-disk store.
    pub fn open(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        // Writer first: it creates the file the read-only pool opens.
        let writer = Connection::open(&db_path)?;
        configure_connection(&writer)?;
        writer.execute_batch(SCHEMA)?;

        let manager = SqliteConnectionManager::file(&db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .with_init(|conn| configure_connection(conn));
        let read_pool = Pool::builder().max_size(4).build(manager)?;

        tracing::info!(path = %db_path.as_ref().display(), "record store opened");

        Ok(Self {
            read_pool,
            writer: Mutex::new(writer),
        })
    }

    /// Create an in-memory store for testing.
    ///
    /// In-memory SQLite DBs are per-connection, so the writer and the read pool
    /// share one named database through a shared-cache URI.
    pub fn in_memory() -> StoreResult<Self> {
        let uri = format!("file:hybrid_store_{}?mode=memory&cache=shared", unique_id());
        let writer = Connection::open(&uri)?;
        configure_connection(&writer)?;
        writer.execute_batch(SCHEMA)?;

        let manager =
            SqliteConnectionManager::file(&uri).with_init(|conn| configure_connection(conn));
        let read_pool = Pool::builder().max_size(2).build(manager)?;

        Ok(Self {
            read_pool,
            writer: Mutex::new(writer),
        })
    }

    fn read_conn(&self) -> StoreResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.read_pool.get()?)
    }

    /// Point lookup outside of any projection transaction.
    pub fn get<E: Entity>(&self, key: &E::Key) -> StoreResult<Option<E>> {
        let conn = self.read_conn()?;
        select_by_key(&conn, key)
    }

    /// Number of rows in the entity's table.
    pub fn count<E: Entity>(&self) -> StoreResult<u64> {
        let conn = self.read_conn()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", E::TABLE),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Every row of the entity's table, ordered by primary key.
    pub fn all<E: Entity>(&self) -> StoreResult<Vec<E>> {
        let conn = self.read_conn()?;
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}",
            E::COLUMNS.join(", "),
            E::TABLE,
            E::KEY_COLUMNS.join(", ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows: rusqlite::Result<Vec<E>> = stmt.query_map([], E::from_row)?.collect();
        Ok(rows?)
    }

    /// Signer transitions for one address in emission order.
    pub fn signer_history(&self, signer: Address) -> StoreResult<Vec<SignerChange>> {
        let conn = self.read_conn()?;
        let sql = format!(
            "SELECT {} FROM signer_change WHERE signer_address = ?
             ORDER BY block_number, log_index",
            SignerChange::COLUMNS.join(", ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows: rusqlite::Result<Vec<SignerChange>> = stmt
            .query_map(params![signer.as_slice()], SignerChange::from_row)?
            .collect();
        Ok(rows?)
    }

    /// Block numbers currently tracked for a chain, ascending.
    pub fn indexed_block_numbers(&self, chain_id: ChainId) -> StoreResult<Vec<u64>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(
            "SELECT block_number FROM indexed_block WHERE chain_id = ? ORDER BY block_number",
        )?;
        let numbers: rusqlite::Result<Vec<u64>> = stmt
            .query_map(params![chain_id as i64], |row| columns::u64_at(row, 0))?
            .collect();
        Ok(numbers?)
    }

    /// Chains with at least one tracked block, ascending.
    pub fn indexed_chains(&self) -> StoreResult<Vec<ChainId>> {
        let conn = self.read_conn()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT chain_id FROM indexed_block ORDER BY chain_id")?;
        let chains: rusqlite::Result<Vec<ChainId>> =
            stmt.query_map([], |row| columns::u64_at(row, 0))?.collect();
        Ok(chains?)
    }

    pub fn chain_statistics(&self) -> StoreResult<Vec<ChainStatistics>> {
        self.all::<ChainStatistics>()
    }

    pub fn allocator_instances(&self) -> StoreResult<Vec<AllocatorInstance>> {
        self.all::<AllocatorInstance>()
    }

    /// Most recent tracked block for a chain.
    pub fn latest_indexed_block(&self, chain_id: ChainId) -> StoreResult<Option<IndexedBlock>> {
        let conn = self.read_conn()?;
        let sql = format!(
            "SELECT {} FROM indexed_block WHERE chain_id = ?
             ORDER BY block_number DESC LIMIT 1",
            IndexedBlock::COLUMNS.join(", ")
        );
        Ok(conn
            .query_row(&sql, params![chain_id as i64], IndexedBlock::from_row)
            .optional()?)
    }
}

impl RecordStore for SqliteStore {
    type Tx<'a> = SqliteTx<'a>;

    fn begin(&self) -> StoreResult<SqliteTx<'_>> {
        let conn = self.writer.lock();
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(SqliteTx {
            conn,
            finished: false,
        })
    }
}

/// An open write transaction on a [`SqliteStore`].
///
/// Holds the writer lock for its whole lifetime. Rolled back on drop unless
/// committed.
pub struct SqliteTx<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl StoreTx for SqliteTx<'_> {
    fn find<E: Entity>(&self, key: &E::Key) -> StoreResult<Option<E>> {
        select_by_key(&self.conn, key)
    }

    fn insert<E: Entity>(&mut self, row: &E, on_conflict: OnConflict) -> StoreResult<WriteOutcome> {
        let placeholders = (1..=E::COLUMNS.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let resolution = match on_conflict {
            OnConflict::Ignore => "ON CONFLICT DO NOTHING".to_string(),
            OnConflict::Replace => {
                let assignments = E::COLUMNS[E::KEY_COLUMNS.len()..]
                    .iter()
                    .map(|c| format!("{c} = excluded.{c}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "ON CONFLICT ({}) DO UPDATE SET {assignments}",
                    E::KEY_COLUMNS.join(", ")
                )
            }
        };
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders}) {resolution}",
            E::TABLE,
            E::COLUMNS.join(", ")
        );

        let changed = self
            .conn
            .prepare_cached(&sql)?
            .execute(params_from_iter(row.to_values()))?;
        Ok(if changed == 0 {
            WriteOutcome::KeyExists
        } else {
            WriteOutcome::Applied
        })
    }

    fn update<E, F>(&mut self, key: &E::Key, mutate: F) -> StoreResult<WriteOutcome>
    where
        E: Entity,
        F: FnOnce(&mut E),
    {
        let Some(mut row) = self.find::<E>(key)? else {
            return Ok(WriteOutcome::KeyAbsent);
        };
        mutate(&mut row);

        let key_len = E::KEY_COLUMNS.len();
        let set_columns = &E::COLUMNS[key_len..];
        let assignments = set_columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{c} = ?{}", i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {assignments} WHERE {}",
            E::TABLE,
            key_predicate::<E>(set_columns.len() + 1)
        );

        let mut values = row.to_values().split_off(key_len);
        values.extend(E::key_values(key));
        self.conn
            .prepare_cached(&sql)?
            .execute(params_from_iter(values))?;
        Ok(WriteOutcome::Applied)
    }

    fn delete<E: Entity>(&mut self, key: &E::Key) -> StoreResult<WriteOutcome> {
        let sql = format!("DELETE FROM {} WHERE {}", E::TABLE, key_predicate::<E>(1));
        let changed = self
            .conn
            .prepare_cached(&sql)?
            .execute(params_from_iter(E::key_values(key)))?;
        Ok(if changed == 0 {
            WriteOutcome::KeyAbsent
        } else {
            WriteOutcome::Applied
        })
    }

    fn commit(mut self) -> StoreResult<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for SqliteTx<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.conn.execute_batch("ROLLBACK") {
            tracing::warn!(error = %e, "failed to roll back record store transaction");
        }
    }
}

/// `k1 = ?n AND k2 = ?n+1 ...` over the entity's key columns.
fn key_predicate<E: Entity>(first_param: usize) -> String {
    E::KEY_COLUMNS
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{c} = ?{}", first_param + i))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn select_by_key<E: Entity>(conn: &Connection, key: &E::Key) -> StoreResult<Option<E>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE {}",
        E::COLUMNS.join(", "),
        E::TABLE,
        key_predicate::<E>(1)
    );
    let row = conn
        .prepare_cached(&sql)?
        .query_row(params_from_iter(E::key_values(key)), E::from_row)
        .optional()?;
    Ok(row)
}

/// Generate a unique ID for in-memory shared-cache SQLite databases.
fn unique_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}
