//! Transaction boundary around handlers and the retention tracker.

use std::sync::Arc;

use hybrid_store::{RecordStore, StoreTx};

use crate::error::ProjectionResult;
use crate::events::{validate_chain_id, BlockTick, ChainInput, EventEnvelope};
use crate::handlers::{project_event, EventOutcome};
use crate::retention::{Clock, RetentionConfig, RetentionTracker, TickOutcome};

/// Outcome of applying one [`ChainInput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOutcome {
    Event(EventOutcome),
    Block(TickOutcome),
}

/// Applies events and block ticks to a record store, one transaction each.
///
/// If anything fails the transaction is dropped, which rolls back every
/// mutation of that event or tick.
pub struct Projector<S, C> {
    store: Arc<S>,
    tracker: RetentionTracker<C>,
}

impl<S: RecordStore, C: Clock> Projector<S, C> {
    pub fn new(store: Arc<S>, retention: RetentionConfig, clock: C) -> Self {
        Self {
            store,
            tracker: RetentionTracker::new(retention, clock),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn retention(&self) -> &RetentionConfig {
        self.tracker.config()
    }

    pub fn apply_event(&self, envelope: &EventEnvelope) -> ProjectionResult<EventOutcome> {
        let mut tx = self.store.begin()?;
        let outcome = project_event(&mut tx, envelope)?;
        tx.commit()?;
        Ok(outcome)
    }

    pub fn apply_block(&self, tick: &BlockTick) -> ProjectionResult<TickOutcome> {
        validate_chain_id(tick.chain_id)?;
        // Stale ticks never open a transaction.
        if !self.tracker.is_fresh(tick) {
            tracing::trace!(
                chain_id = tick.chain_id,
                block_number = tick.block_number,
                "stale block tick"
            );
            return Ok(TickOutcome::Stale);
        }

        let mut tx = self.store.begin()?;
        let outcome = self.tracker.record(&mut tx, tick)?;
        tx.commit()?;
        Ok(outcome)
    }

    pub fn apply(&self, input: &ChainInput) -> ProjectionResult<InputOutcome> {
        match input {
            ChainInput::Log(envelope) => self.apply_event(envelope).map(InputOutcome::Event),
            ChainInput::Block(tick) => self.apply_block(tick).map(InputOutcome::Block),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{AllocatorEvent, EventContext};
    use crate::retention::FixedClock;
    use crate::ProjectionError;
    use alloy_primitives::{Address, B256, U256};
    use hybrid_store::{Account, ChainStatistics, IndexedBlock, SqliteStore};

    const NOW: u64 = 1_700_000_000;

    fn projector() -> Projector<SqliteStore, FixedClock> {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        Projector::new(store, RetentionConfig::default(), FixedClock::new(NOW))
    }

    #[test]
    fn failed_event_leaves_no_partial_writes() {
        let projector = projector();
        // Seed a counter at the limit so the next allocation overflows after
        // its allocation and account rows were already written.
        {
            let mut tx = projector.store().begin().unwrap();
            crate::statistics::apply_delta(
                &mut tx,
                1,
                NOW,
                crate::StatsDelta::allocations(u64::MAX),
            )
            .unwrap();
            tx.commit().unwrap();
        }

        let envelope = EventEnvelope {
            context: EventContext {
                chain_id: 1,
                block_number: 1,
                block_timestamp: NOW,
                transaction_hash: B256::repeat_byte(0x01),
                log_index: 0,
            },
            event: AllocatorEvent::Allocated {
                sponsor: Address::repeat_byte(0xaa),
                commitments: vec![],
                nonce: U256::from(1u64),
                expires: U256::from(2u64),
                claim_hash: B256::repeat_byte(0xcc),
            },
        };
        let err = projector.apply_event(&envelope).unwrap_err();

        assert!(matches!(err, ProjectionError::CounterOverflow { .. }));
        let store = projector.store();
        assert_eq!(store.count::<hybrid_store::Allocation>().unwrap(), 0);
        assert_eq!(store.count::<Account>().unwrap(), 0);
        assert_eq!(
            store.get::<ChainStatistics>(&1).unwrap().unwrap().total_allocations,
            u64::MAX
        );
    }

    #[test]
    fn stale_tick_writes_nothing() {
        let projector = projector();
        let tick = BlockTick {
            chain_id: 1,
            block_number: 5,
            block_hash: B256::repeat_byte(0x05),
            block_timestamp: NOW - 700,
        };

        assert_eq!(projector.apply_block(&tick).unwrap(), TickOutcome::Stale);
        assert_eq!(projector.store().count::<IndexedBlock>().unwrap(), 0);
    }

    #[test]
    fn block_tick_for_chain_zero_is_invalid() {
        let projector = projector();
        let tick = BlockTick {
            chain_id: 0,
            block_number: 5,
            block_hash: B256::repeat_byte(0x05),
            block_timestamp: NOW,
        };

        assert!(matches!(
            projector.apply(&ChainInput::Block(tick)),
            Err(ProjectionError::InvalidInput(_))
        ));
    }
}
