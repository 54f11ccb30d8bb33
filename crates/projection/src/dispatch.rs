//! Per-chain sequential dispatch.
//!
//! Each chain gets its own worker, started the first time an input for that
//! chain is submitted. A worker applies its chain's inputs one at a time in
//! submission order, so singleton rows (allocator instance, statistics,
//! signers) never see two writers from the same chain. Different chains run
//! in parallel and share only the record store, whose writer lock serializes
//! the transactions themselves.
//!
//! A failed input is fatal for its chain: the worker stops and reports the
//! error. Retrying is left to whoever feeds the dispatcher.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use hybrid_store::{ChainId, RecordStore};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{DispatchError, ProjectionError};
use crate::events::ChainInput;
use crate::handlers::EventOutcome;
use crate::projector::{InputOutcome, Projector};
use crate::retention::{Clock, TickOutcome};

/// Default capacity of each chain's input channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Work done by one chain's worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainCounters {
    pub events_applied: u64,
    pub duplicates: u64,
    pub blocks_recorded: u64,
    pub stale_blocks: u64,
    pub blocks_pruned: u64,
}

impl ChainCounters {
    fn record(&mut self, outcome: &InputOutcome) {
        match outcome {
            InputOutcome::Event(EventOutcome::Applied) => self.events_applied += 1,
            InputOutcome::Event(EventOutcome::Duplicate) => self.duplicates += 1,
            InputOutcome::Block(TickOutcome::Stale) => self.stale_blocks += 1,
            InputOutcome::Block(TickOutcome::Recorded { inserted, pruned }) => {
                if *inserted {
                    self.blocks_recorded += 1;
                }
                if let Some(report) = pruned {
                    self.blocks_pruned += report.deleted;
                }
            }
        }
    }
}

/// Final state of one chain's worker.
#[derive(Debug)]
pub struct ChainReport {
    pub counters: ChainCounters,
    /// The error that stopped the worker, if any.
    pub failure: Option<ProjectionError>,
}

/// Per-chain results returned by [`ChainDispatcher::shutdown`].
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub chains: BTreeMap<ChainId, ChainReport>,
    /// Workers that panicked or were cancelled. Their counters are lost.
    pub aborted: BTreeMap<ChainId, DispatchError>,
}

impl DispatchReport {
    pub fn failures(&self) -> impl Iterator<Item = (ChainId, &ProjectionError)> {
        self.chains
            .iter()
            .filter_map(|(chain_id, report)| report.failure.as_ref().map(|e| (*chain_id, e)))
    }

    /// Chains that did not finish cleanly, ascending.
    pub fn failed_chains(&self) -> Vec<ChainId> {
        let mut chains: Vec<ChainId> = self
            .failures()
            .map(|(chain_id, _)| chain_id)
            .chain(self.aborted.keys().copied())
            .collect();
        chains.sort_unstable();
        chains
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none() && self.aborted.is_empty()
    }

    pub fn totals(&self) -> ChainCounters {
        self.chains
            .values()
            .fold(ChainCounters::default(), |mut acc, report| {
                acc.events_applied += report.counters.events_applied;
                acc.duplicates += report.counters.duplicates;
                acc.blocks_recorded += report.counters.blocks_recorded;
                acc.stale_blocks += report.counters.stale_blocks;
                acc.blocks_pruned += report.counters.blocks_pruned;
                acc
            })
    }
}

struct ChainWorker {
    sender: mpsc::Sender<ChainInput>,
    handle: JoinHandle<ChainReport>,
}

/// Routes inputs to one sequential worker per chain.
pub struct ChainDispatcher<S, C> {
    projector: Arc<Projector<S, C>>,
    channel_capacity: usize,
    workers: HashMap<ChainId, ChainWorker>,
}

impl<S, C> ChainDispatcher<S, C>
where
    S: RecordStore + 'static,
    C: Clock + 'static,
{
    /// Must be created inside a tokio runtime.
    pub fn new(projector: Arc<Projector<S, C>>, channel_capacity: usize) -> Self {
        Self {
            projector,
            channel_capacity: channel_capacity.max(1),
            workers: HashMap::new(),
        }
    }

    /// Queue `input` on its chain's worker, starting the worker if needed.
    ///
    /// Waits while the chain's channel is full. Fails with
    /// [`DispatchError::Closed`] once the chain's worker has stopped.
    pub async fn submit(&mut self, input: ChainInput) -> Result<(), DispatchError> {
        let chain_id = input.chain_id();
        let projector = &self.projector;
        let capacity = self.channel_capacity;
        let worker = self
            .workers
            .entry(chain_id)
            .or_insert_with(|| spawn_worker(chain_id, Arc::clone(projector), capacity));

        worker
            .sender
            .send(input)
            .await
            .map_err(|_| DispatchError::Closed(chain_id))
    }

    pub fn active_chains(&self) -> usize {
        self.workers.len()
    }

    /// Close every chain's channel and wait for all workers to drain.
    ///
    /// Every worker is awaited even when another one panicked.
    pub async fn shutdown(self) -> DispatchReport {
        let handles: Vec<(ChainId, JoinHandle<ChainReport>)> = self
            .workers
            .into_iter()
            .map(|(chain_id, worker)| {
                drop(worker.sender);
                (chain_id, worker.handle)
            })
            .collect();

        let mut report = DispatchReport::default();
        for (chain_id, handle) in handles {
            match handle.await {
                Ok(chain_report) => {
                    report.chains.insert(chain_id, chain_report);
                }
                Err(e) => {
                    tracing::error!(chain_id, error = %e, "chain worker aborted");
                    report.aborted.insert(
                        chain_id,
                        DispatchError::Worker {
                            chain_id,
                            reason: e.to_string(),
                        },
                    );
                }
            }
        }

        let totals = report.totals();
        tracing::info!(
            chains = report.chains.len(),
            aborted = report.aborted.len(),
            events_applied = totals.events_applied,
            duplicates = totals.duplicates,
            blocks_recorded = totals.blocks_recorded,
            "dispatcher shut down"
        );
        report
    }
}

fn spawn_worker<S, C>(
    chain_id: ChainId,
    projector: Arc<Projector<S, C>>,
    capacity: usize,
) -> ChainWorker
where
    S: RecordStore + 'static,
    C: Clock + 'static,
{
    let (sender, receiver) = mpsc::channel(capacity);
    let handle = tokio::task::spawn_blocking(move || run_worker(chain_id, projector, receiver));
    tracing::info!(chain_id, "chain worker started");
    ChainWorker { sender, handle }
}

/// Worker loop. Store calls are synchronous, so the loop runs on the
/// blocking pool.
fn run_worker<S: RecordStore, C: Clock>(
    chain_id: ChainId,
    projector: Arc<Projector<S, C>>,
    mut receiver: mpsc::Receiver<ChainInput>,
) -> ChainReport {
    let mut counters = ChainCounters::default();

    while let Some(input) = receiver.blocking_recv() {
        match projector.apply(&input) {
            Ok(outcome) => counters.record(&outcome),
            Err(err) => {
                tracing::error!(chain_id, error = %err, "chain input failed; stopping worker");
                return ChainReport {
                    counters,
                    failure: Some(err),
                };
            }
        }
    }

    tracing::info!(chain_id, events_applied = counters.events_applied, "chain worker stopped");
    ChainReport {
        counters,
        failure: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{AllocatorEvent, BlockTick, EventContext, EventEnvelope};
    use crate::retention::{FixedClock, RetentionConfig};
    use alloy_primitives::{Address, B256, U256};
    use hybrid_store::{ChainStatistics, SqliteStore};

    const NOW: u64 = 1_700_000_000;

    fn dispatcher() -> ChainDispatcher<SqliteStore, FixedClock> {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let projector = Projector::new(store, RetentionConfig::default(), FixedClock::new(NOW));
        ChainDispatcher::new(Arc::new(projector), 8)
    }

    fn attestation(chain_id: ChainId, nonce: u64) -> ChainInput {
        ChainInput::Log(EventEnvelope {
            context: EventContext {
                chain_id,
                block_number: nonce,
                block_timestamp: NOW,
                transaction_hash: B256::with_last_byte(nonce as u8),
                log_index: 0,
            },
            event: AllocatorEvent::AttestationAuthorized {
                nonce: U256::from(nonce),
            },
        })
    }

    #[tokio::test]
    async fn counts_per_chain_and_spawns_lazily() {
        let mut dispatcher = dispatcher();
        let store = Arc::clone(dispatcher.projector.store());
        assert_eq!(dispatcher.active_chains(), 0);

        for nonce in 1..=5 {
            dispatcher.submit(attestation(8453, nonce)).await.unwrap();
            dispatcher.submit(attestation(10, nonce)).await.unwrap();
        }
        dispatcher.submit(attestation(10, 1)).await.unwrap();
        dispatcher
            .submit(ChainInput::Block(BlockTick {
                chain_id: 10,
                block_number: 6,
                block_hash: B256::repeat_byte(0x06),
                block_timestamp: NOW,
            }))
            .await
            .unwrap();
        assert_eq!(dispatcher.active_chains(), 2);

        let report = dispatcher.shutdown().await;
        assert!(report.is_clean());
        assert_eq!(report.chains[&8453].counters.events_applied, 5);
        assert_eq!(
            report.chains[&10].counters,
            ChainCounters {
                events_applied: 5,
                duplicates: 1,
                blocks_recorded: 1,
                stale_blocks: 0,
                blocks_pruned: 0,
            }
        );

        let stats = store.get::<ChainStatistics>(&10).unwrap().unwrap();
        assert_eq!(stats.total_attestation_authorizations, 5);
    }

    #[tokio::test]
    async fn failure_stops_only_its_chain() {
        let mut dispatcher = dispatcher();
        let signer = Address::repeat_byte(0x01);

        // Chain 0 is malformed input.
        dispatcher.submit(attestation(0, 1)).await.unwrap();
        dispatcher.submit(attestation(1, 1)).await.unwrap();
        dispatcher
            .submit(ChainInput::Log(EventEnvelope {
                context: EventContext {
                    chain_id: 1,
                    block_number: 2,
                    block_timestamp: NOW,
                    transaction_hash: B256::repeat_byte(0x02),
                    log_index: 0,
                },
                event: AllocatorEvent::SignerAdded { signer },
            }))
            .await
            .unwrap();

        let report = dispatcher.shutdown().await;
        assert!(!report.is_clean());
        let failures: Vec<ChainId> = report.failures().map(|(chain_id, _)| chain_id).collect();
        assert_eq!(failures, vec![0]);
        assert!(matches!(
            report.chains[&0].failure,
            Some(ProjectionError::InvalidInput(_))
        ));
        assert_eq!(report.chains[&1].counters.events_applied, 2);
    }

    /// Panics on every block tick; events never read the clock.
    struct PanickingClock;

    impl Clock for PanickingClock {
        fn now(&self) -> u64 {
            panic!("clock unavailable");
        }
    }

    #[tokio::test]
    async fn aborted_worker_does_not_hide_other_reports() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let projector = Projector::new(store, RetentionConfig::default(), PanickingClock);
        let mut dispatcher = ChainDispatcher::new(Arc::new(projector), 8);

        dispatcher
            .submit(ChainInput::Block(BlockTick {
                chain_id: 7,
                block_number: 1,
                block_hash: B256::repeat_byte(0x07),
                block_timestamp: NOW,
            }))
            .await
            .unwrap();
        for nonce in 1..=3 {
            dispatcher.submit(attestation(8, nonce)).await.unwrap();
            dispatcher.submit(attestation(9, nonce)).await.unwrap();
        }

        let report = dispatcher.shutdown().await;
        assert!(!report.is_clean());
        assert!(matches!(
            report.aborted[&7],
            DispatchError::Worker { chain_id: 7, .. }
        ));
        assert_eq!(report.failed_chains(), vec![7]);
        assert_eq!(report.chains[&8].counters.events_applied, 3);
        assert_eq!(report.chains[&9].counters.events_applied, 3);
    }
}
