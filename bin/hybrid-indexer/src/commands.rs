//! `run` and `status` command bodies.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use hybrid_projection::{ChainCounters, ChainDispatcher, Clock, Projector, SystemClock};
use hybrid_store::{AllocatorInstance, ChainId, ChainStatistics, IndexedBlock, SqliteStore};
use serde::Serialize;

use crate::config::IndexerConfig;
use crate::errors::IndexerError;
use crate::replay::ReplayReader;

/// Totals printed after a replay.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaySummary {
    pub chains: BTreeMap<ChainId, ChainCounters>,
    pub rejected_lines: usize,
    pub failed_chains: Vec<ChainId>,
}

pub fn open_store(config: &IndexerConfig) -> Result<SqliteStore, IndexerError> {
    std::fs::create_dir_all(&config.storage.path).map_err(|e| IndexerError::DataDir {
        path: config.storage.path.clone(),
        source: e,
    })?;
    Ok(SqliteStore::open(config.database_path())?)
}

/// Replay `input` into the configured store using the system clock.
pub async fn run(config: &IndexerConfig, input: &Path) -> Result<ReplaySummary, IndexerError> {
    let store = Arc::new(open_store(config)?);
    replay(config, store, SystemClock, input).await
}

/// Replay every input line through a per-chain dispatcher.
///
/// Unparseable lines and inputs for chains whose worker already stopped are
/// logged and counted, never retried.
pub async fn replay<C: Clock + 'static>(
    config: &IndexerConfig,
    store: Arc<SqliteStore>,
    clock: C,
    input: &Path,
) -> Result<ReplaySummary, IndexerError> {
    let reader = ReplayReader::open(input)?;
    let projector = Arc::new(Projector::new(store, config.retention.clone(), clock));
    let mut dispatcher = ChainDispatcher::new(projector, config.dispatch.channel_capacity);

    tracing::info!(input = %input.display(), "replay started");
    let mut rejected_lines = 0;
    for item in reader {
        match item {
            Ok(chain_input) => {
                if let Err(e) = dispatcher.submit(chain_input).await {
                    tracing::warn!(error = %e, "input dropped");
                }
            }
            Err(rejected) => {
                rejected_lines += 1;
                tracing::error!(
                    line = rejected.line,
                    reason = %rejected.reason,
                    "input line rejected"
                );
            }
        }
    }

    let report = dispatcher.shutdown().await;
    for (chain_id, err) in report.failures() {
        tracing::error!(chain_id, error = %err, "chain stopped early");
    }
    let failed_chains = report.failed_chains();

    Ok(ReplaySummary {
        chains: report
            .chains
            .iter()
            .map(|(chain_id, chain)| (*chain_id, chain.counters))
            .collect(),
        rejected_lines,
        failed_chains,
    })
}

impl ReplaySummary {
    pub fn is_complete(&self) -> bool {
        self.rejected_lines == 0 && self.failed_chains.is_empty()
    }

    pub fn into_result(self) -> Result<Self, IndexerError> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(IndexerError::Incomplete {
                failed_chains: self.failed_chains.len(),
                rejected_lines: self.rejected_lines,
            })
        }
    }
}

/// Read-only snapshot of the projection.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub chain_statistics: Vec<ChainStatistics>,
    pub allocator_instances: Vec<AllocatorInstance>,
    pub latest_indexed_blocks: Vec<IndexedBlock>,
}

pub fn status(store: &SqliteStore) -> Result<Status, IndexerError> {
    let chain_statistics = store.chain_statistics()?;
    let allocator_instances = store.allocator_instances()?;

    let mut chains: Vec<ChainId> = chain_statistics
        .iter()
        .map(|s| s.chain_id)
        .chain(allocator_instances.iter().map(|i| i.chain_id))
        .chain(store.indexed_chains()?)
        .collect();
    chains.sort_unstable();
    chains.dedup();

    let mut latest_indexed_blocks = Vec::new();
    for chain_id in chains {
        if let Some(block) = store.latest_indexed_block(chain_id)? {
            latest_indexed_blocks.push(block);
        }
    }

    Ok(Status {
        chain_statistics,
        allocator_instances,
        latest_indexed_blocks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hybrid_projection::FixedClock;
    use std::io::Write;

    const NOW: u64 = 1_700_000_100;

    fn write_input(dir: &Path, lines: &[&str]) -> std::path::PathBuf {
        let path = dir.join("inputs.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        path
    }

    const ALLOCATED: &str = r#"{"kind":"log","context":{"chainId":8453,"blockNumber":100,"blockTimestamp":1700000000,"transactionHash":"0x0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f","logIndex":0},"event":{"event":"Allocated","sponsor":"0x00000000000000000000000000000000000000aa","commitments":[{"lockTag":"0x010101010101010101010101","token":"0x0000000000000000000000000000000000000022","amount":"1000"}],"nonce":"0x5","expires":"0x2540be3ff","claimHash":"0xcccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc"}}"#;
    const TICK: &str = r#"{"kind":"block","chainId":8453,"blockNumber":100,"blockHash":"0x0101010101010101010101010101010101010101010101010101010101010101","blockTimestamp":1700000000}"#;
    const BAD_CHAIN: &str = r#"{"kind":"block","chainId":0,"blockNumber":1,"blockHash":"0x0101010101010101010101010101010101010101010101010101010101010101","blockTimestamp":1700000000}"#;

    #[tokio::test]
    async fn replay_projects_file_and_reports_status() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), &[ALLOCATED, ALLOCATED, TICK]);
        let config = IndexerConfig::default();
        let store = Arc::new(SqliteStore::in_memory().unwrap());

        let summary = replay(&config, Arc::clone(&store), FixedClock::new(NOW), &input)
            .await
            .unwrap();

        assert!(summary.is_complete());
        let counters = summary.chains[&8453];
        assert_eq!(counters.events_applied, 1);
        assert_eq!(counters.duplicates, 1);
        assert_eq!(counters.blocks_recorded, 1);

        let status = status(&store).unwrap();
        assert_eq!(status.chain_statistics.len(), 1);
        assert_eq!(status.chain_statistics[0].total_allocations, 1);
        assert_eq!(status.latest_indexed_blocks[0].block_number, 100);
        assert!(status.allocator_instances.is_empty());
    }

    #[tokio::test]
    async fn replay_reports_rejected_lines_and_failed_chains() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), &["not json", BAD_CHAIN, TICK]);
        let config = IndexerConfig::default();
        let store = Arc::new(SqliteStore::in_memory().unwrap());

        let summary = replay(&config, store, FixedClock::new(NOW), &input)
            .await
            .unwrap();

        assert_eq!(summary.rejected_lines, 1);
        assert_eq!(summary.failed_chains, vec![0]);
        assert_eq!(summary.chains[&8453].blocks_recorded, 1);
        assert!(matches!(
            summary.into_result(),
            Err(IndexerError::Incomplete {
                failed_chains: 1,
                rejected_lines: 1
            })
        ));
    }

    #[tokio::test]
    async fn status_reports_chains_with_only_block_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), &[TICK]);
        let config = IndexerConfig::default();
        let store = Arc::new(SqliteStore::in_memory().unwrap());

        replay(&config, Arc::clone(&store), FixedClock::new(NOW), &input)
            .await
            .unwrap();

        let status = status(&store).unwrap();
        assert!(status.chain_statistics.is_empty());
        assert!(status.allocator_instances.is_empty());
        assert_eq!(status.latest_indexed_blocks.len(), 1);
        assert_eq!(status.latest_indexed_blocks[0].chain_id, 8453);
        assert_eq!(status.latest_indexed_blocks[0].block_number, 100);
    }

    #[test]
    fn open_store_creates_data_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = IndexerConfig {
            storage: crate::config::StorageConfig {
                path: dir.path().join("nested").display().to_string(),
            },
            ..IndexerConfig::default()
        };

        open_store(&config).unwrap();
        assert!(config.database_path().exists());
    }
}
