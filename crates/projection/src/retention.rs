//! Bounded ledger of recently indexed blocks.
//!
//! Every fresh block tick records an `indexed_block` row. On ticks whose
//! number is a multiple of `cleanup_interval`, a fixed-size batch of rows just
//! below an estimated cutoff is deleted by primary key. The cutoff comes from
//! block-number arithmetic with a per-chain blocks-per-window estimate, never
//! from a timestamp scan, so retention is approximate: rows slightly older
//! than the window may linger until a later sweep.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use hybrid_store::{BlockKey, ChainId, IndexedBlock, OnConflict, StoreTx};
use serde::{Deserialize, Serialize};

use crate::error::ProjectionResult;
use crate::events::BlockTick;

/// Default freshness window (10 minutes).
pub const DEFAULT_WINDOW_SECS: u64 = 600;
pub const DEFAULT_CLEANUP_INTERVAL: u64 = 1000;
pub const DEFAULT_CLEANUP_BATCH_SIZE: u64 = 100;
/// Blocks per window for chains missing from the table (12 s blocks).
pub const DEFAULT_BLOCKS_PER_WINDOW: u64 = 50;

/// Estimated blocks per 10 minutes for the networks the indexer is deployed on.
const BUILTIN_BLOCKS_PER_WINDOW: &[(ChainId, u64)] = &[
    (1, 50),         // Ethereum mainnet
    (11155111, 50),  // Sepolia
    (8453, 300),     // Base
    (84532, 300),    // Base Sepolia
    (42161, 600),    // Arbitrum One
    (421614, 600),   // Arbitrum Sepolia
    (10, 300),       // Optimism
    (11155420, 300), // Optimism Sepolia
    (130, 600),      // Unichain
    (1301, 600),     // Unichain Sepolia
];

/// Retention policy. Immutable once handed to a [`RetentionTracker`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetentionConfig {
    /// Ticks older than `now - window_secs` are ignored.
    pub window_secs: u64,
    /// Cleanup runs on block numbers divisible by this.
    pub cleanup_interval: u64,
    /// Number of block numbers each sweep tries to delete.
    pub cleanup_batch_size: u64,
    /// Fallback estimate for chains missing from `blocks_per_window`.
    pub default_blocks_per_window: u64,
    /// Per-chain blocks-per-window estimates.
    pub blocks_per_window: BTreeMap<ChainId, u64>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_WINDOW_SECS,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            cleanup_batch_size: DEFAULT_CLEANUP_BATCH_SIZE,
            default_blocks_per_window: DEFAULT_BLOCKS_PER_WINDOW,
            blocks_per_window: BUILTIN_BLOCKS_PER_WINDOW.iter().copied().collect(),
        }
    }
}

impl RetentionConfig {
    pub fn blocks_per_window(&self, chain_id: ChainId) -> u64 {
        self.blocks_per_window
            .get(&chain_id)
            .copied()
            .unwrap_or(self.default_blocks_per_window)
    }
}

/// Source of wall-clock time in Unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> u64 {
        (**self).now()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        // A clock before the epoch reads as 0, which makes every tick fresh.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Manually driven clock for tests and deterministic replays.
#[derive(Debug, Default)]
pub struct FixedClock(AtomicU64);

impl FixedClock {
    pub fn new(now: u64) -> Self {
        Self(AtomicU64::new(now))
    }

    pub fn set(&self, now: u64) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of one cleanup sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    /// Estimated cutoff; the sweep covered block numbers just below it.
    pub cutoff: u64,
    pub attempted: u64,
    pub deleted: u64,
}

/// What handling one block tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Older than the freshness window; the store was not touched.
    Stale,
    Recorded {
        /// `false` when the block was already tracked.
        inserted: bool,
        /// Present on cleanup ticks.
        pruned: Option<PruneReport>,
    },
}

pub struct RetentionTracker<C> {
    config: RetentionConfig,
    clock: C,
}

impl<C: Clock> RetentionTracker<C> {
    pub fn new(config: RetentionConfig, clock: C) -> Self {
        Self { config, clock }
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    /// Whether the tick falls inside the freshness window.
    pub fn is_fresh(&self, tick: &BlockTick) -> bool {
        let horizon = self.clock.now().saturating_sub(self.config.window_secs);
        tick.block_timestamp >= horizon
    }

    /// Record a tick and run the cleanup sweep when it is due.
    ///
    /// Stale ticks return [`TickOutcome::Stale`] without using `tx`.
    pub fn record<T: StoreTx>(
        &self,
        tx: &mut T,
        tick: &BlockTick,
    ) -> ProjectionResult<TickOutcome> {
        if !self.is_fresh(tick) {
            return Ok(TickOutcome::Stale);
        }

        let row = IndexedBlock {
            block_number: tick.block_number,
            chain_id: tick.chain_id,
            block_hash: tick.block_hash,
            block_timestamp: tick.block_timestamp,
            indexed_at: self.clock.now(),
        };
        let inserted = tx.insert(&row, OnConflict::Ignore)?.is_applied();

        let pruned = if self.cleanup_due(tick.block_number) {
            Some(self.prune(tx, tick.chain_id, tick.block_number)?)
        } else {
            None
        };

        Ok(TickOutcome::Recorded { inserted, pruned })
    }

    fn cleanup_due(&self, block_number: u64) -> bool {
        self.config.cleanup_interval != 0 && block_number % self.config.cleanup_interval == 0
    }

    /// Delete `[cutoff - batch, cutoff)` by key, never touching block 0.
    ///
    /// The walk starts one below `cutoff`, so `cutoff` itself is kept. A sweep
    /// that started at `cutoff` would cover `(cutoff - batch, cutoff]` instead.
    fn prune<T: StoreTx>(
        &self,
        tx: &mut T,
        chain_id: ChainId,
        block_number: u64,
    ) -> ProjectionResult<PruneReport> {
        let cutoff = block_number.saturating_sub(self.config.blocks_per_window(chain_id));
        let lowest = cutoff.saturating_sub(self.config.cleanup_batch_size).max(1);

        let mut report = PruneReport {
            cutoff,
            attempted: 0,
            deleted: 0,
        };
        for number in (lowest..cutoff).rev() {
            let key = BlockKey {
                block_number: number,
                chain_id,
            };
            report.attempted += 1;
            if tx.delete::<IndexedBlock>(&key)?.is_applied() {
                report.deleted += 1;
            }
        }

        tracing::info!(
            chain_id,
            block_number,
            cutoff,
            attempted = report.attempted,
            deleted = report.deleted,
            "pruned indexed blocks"
        );
        Ok(report)
    }
}
