//! Per-chain running totals.
//!
//! The aggregator is the only writer of `chain_statistics` rows. Its update is
//! a read-modify-write inside the caller's transaction, which is sound only
//! because each chain's inputs are applied one at a time (see
//! [`ChainDispatcher`](crate::ChainDispatcher)). Another process writing the
//! same row concurrently would race with it.

use hybrid_store::{ChainId, ChainStatistics, OnConflict, StoreTx};

use crate::error::{ProjectionError, ProjectionResult};

/// Increments to apply to a chain's counters. Absent fields are left as is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsDelta {
    pub allocations: Option<u64>,
    pub attestations: Option<u64>,
    /// Only ever changed by an explicit delta; no handler derives it.
    pub unique_sponsors: Option<u64>,
}

impl StatsDelta {
    pub fn allocations(count: u64) -> Self {
        Self {
            allocations: Some(count),
            ..Self::default()
        }
    }

    pub fn attestations(count: u64) -> Self {
        Self {
            attestations: Some(count),
            ..Self::default()
        }
    }

    pub fn unique_sponsors(count: u64) -> Self {
        Self {
            unique_sponsors: Some(count),
            ..Self::default()
        }
    }
}

/// Add `delta` to the chain's counters and stamp `last_updated = timestamp`.
///
/// A missing row counts as all zeros and is created.
pub fn apply_delta<T: StoreTx>(
    tx: &mut T,
    chain_id: ChainId,
    timestamp: u64,
    delta: StatsDelta,
) -> ProjectionResult<ChainStatistics> {
    let prior = tx.find::<ChainStatistics>(&chain_id)?.unwrap_or(ChainStatistics {
        chain_id,
        ..ChainStatistics::default()
    });

    let next = ChainStatistics {
        chain_id,
        total_allocations: add(
            chain_id,
            "totalAllocations",
            prior.total_allocations,
            delta.allocations,
        )?,
        total_attestation_authorizations: add(
            chain_id,
            "totalAttestationAuthorizations",
            prior.total_attestation_authorizations,
            delta.attestations,
        )?,
        unique_sponsors: add(
            chain_id,
            "uniqueSponsors",
            prior.unique_sponsors,
            delta.unique_sponsors,
        )?,
        last_updated: timestamp,
    };

    tx.insert(&next, OnConflict::Replace)?;
    tracing::debug!(
        chain_id,
        total_allocations = next.total_allocations,
        total_attestation_authorizations = next.total_attestation_authorizations,
        "chain statistics updated"
    );
    Ok(next)
}

fn add(
    chain_id: ChainId,
    counter: &'static str,
    prior: u64,
    delta: Option<u64>,
) -> ProjectionResult<u64> {
    match delta {
        None => Ok(prior),
        Some(delta) => prior
            .checked_add(delta)
            .ok_or(ProjectionError::CounterOverflow { chain_id, counter }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hybrid_store::{RecordStore, SqliteStore};

    #[test]
    fn absent_row_starts_from_zero() {
        let store = SqliteStore::in_memory().unwrap();

        let mut tx = store.begin().unwrap();
        let stats = apply_delta(&mut tx, 8453, 1_700_000_000, StatsDelta::allocations(1)).unwrap();
        tx.commit().unwrap();

        assert_eq!(
            stats,
            ChainStatistics {
                chain_id: 8453,
                total_allocations: 1,
                total_attestation_authorizations: 0,
                unique_sponsors: 0,
                last_updated: 1_700_000_000,
            }
        );
        assert_eq!(store.get::<ChainStatistics>(&8453).unwrap(), Some(stats));
    }

    #[test]
    fn only_present_fields_change_and_timestamp_always_moves() {
        let store = SqliteStore::in_memory().unwrap();

        let mut tx = store.begin().unwrap();
        apply_delta(&mut tx, 1, 10, StatsDelta::allocations(2)).unwrap();
        apply_delta(&mut tx, 1, 20, StatsDelta::attestations(3)).unwrap();
        apply_delta(&mut tx, 1, 30, StatsDelta::unique_sponsors(4)).unwrap();
        // Older timestamps still overwrite.
        let stats = apply_delta(&mut tx, 1, 5, StatsDelta::default()).unwrap();
        tx.commit().unwrap();

        assert_eq!(stats.total_allocations, 2);
        assert_eq!(stats.total_attestation_authorizations, 3);
        assert_eq!(stats.unique_sponsors, 4);
        assert_eq!(stats.last_updated, 5);
    }

    #[test]
    fn overflow_fails_without_writing() {
        let store = SqliteStore::in_memory().unwrap();

        let mut tx = store.begin().unwrap();
        apply_delta(&mut tx, 1, 10, StatsDelta::allocations(u64::MAX)).unwrap();
        let err = apply_delta(&mut tx, 1, 11, StatsDelta::allocations(1)).unwrap_err();
        assert!(matches!(
            err,
            ProjectionError::CounterOverflow {
                chain_id: 1,
                counter: "totalAllocations"
            }
        ));
        let stored = tx.find::<ChainStatistics>(&1).unwrap().unwrap();
        assert_eq!(stored.last_updated, 10);
    }

    #[test]
    fn chains_are_counted_separately() {
        let store = SqliteStore::in_memory().unwrap();

        let mut tx = store.begin().unwrap();
        apply_delta(&mut tx, 1, 10, StatsDelta::allocations(1)).unwrap();
        apply_delta(&mut tx, 10, 10, StatsDelta::allocations(1)).unwrap();
        apply_delta(&mut tx, 10, 11, StatsDelta::allocations(1)).unwrap();
        tx.commit().unwrap();

        assert_eq!(store.get::<ChainStatistics>(&1).unwrap().unwrap().total_allocations, 1);
        assert_eq!(store.get::<ChainStatistics>(&10).unwrap().unwrap().total_allocations, 2);
    }
}
