//! Decoded inputs consumed by the projection engine.
//!
//! Inputs arrive as camelCase JSON, one [`ChainInput`] per line when replayed
//! from a file:
//!
//! ```text
//! {"kind":"log","context":{...},"event":{"event":"SignerAdded","signer":"0x.."}}
//! {"kind":"block","chainId":8453,"blockNumber":1000,"blockHash":"0x..","blockTimestamp":1700000000}
//! ```

use alloy_primitives::{Address, FixedBytes, B256, U256};
use hybrid_store::{ChainId, Provenance};
use serde::{Deserialize, Serialize};

use crate::error::{ProjectionError, ProjectionResult};

/// Where a contract event was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventContext {
    pub chain_id: ChainId,
    pub block_number: u64,
    /// Block timestamp (Unix seconds).
    pub block_timestamp: u64,
    pub transaction_hash: B256,
    pub log_index: u32,
}

impl EventContext {
    pub fn provenance(&self) -> Provenance {
        Provenance {
            block_number: self.block_number,
            timestamp: self.block_timestamp,
            transaction_hash: self.transaction_hash,
            log_index: self.log_index,
        }
    }

    pub(crate) fn validate(&self) -> ProjectionResult<()> {
        validate_chain_id(self.chain_id)
    }
}

pub(crate) fn validate_chain_id(chain_id: ChainId) -> ProjectionResult<()> {
    if chain_id == 0 {
        return Err(ProjectionError::InvalidInput(
            "chain id must be non-zero".to_string(),
        ));
    }
    Ok(())
}

/// One resource reservation inside an allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commitment {
    pub lock_tag: FixedBytes<12>,
    pub token: Address,
    #[serde(with = "crate::commitments::decimal")]
    pub amount: U256,
}

/// Events emitted by the hybrid allocator contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all_fields = "camelCase")]
pub enum AllocatorEvent {
    Allocated {
        sponsor: Address,
        commitments: Vec<Commitment>,
        nonce: U256,
        expires: U256,
        claim_hash: B256,
    },
    AllocatorInitialized {
        compact: Address,
        owner: Address,
        /// uint96 on chain.
        allocator_id: U256,
    },
    AttestationAuthorized {
        nonce: U256,
    },
    OwnerReplaced {
        old_owner: Address,
        new_owner: Address,
    },
    OwnerReplacementProposed {
        new_owner: Address,
    },
    SignerAdded {
        signer: Address,
    },
    SignerRemoved {
        signer: Address,
    },
}

impl AllocatorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AllocatorEvent::Allocated { .. } => "Allocated",
            AllocatorEvent::AllocatorInitialized { .. } => "AllocatorInitialized",
            AllocatorEvent::AttestationAuthorized { .. } => "AttestationAuthorized",
            AllocatorEvent::OwnerReplaced { .. } => "OwnerReplaced",
            AllocatorEvent::OwnerReplacementProposed { .. } => "OwnerReplacementProposed",
            AllocatorEvent::SignerAdded { .. } => "SignerAdded",
            AllocatorEvent::SignerRemoved { .. } => "SignerRemoved",
        }
    }
}

/// A decoded event together with where it was emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub context: EventContext,
    pub event: AllocatorEvent,
}

/// A finalized block observed on one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockTick {
    pub chain_id: ChainId,
    pub block_number: u64,
    pub block_hash: B256,
    pub block_timestamp: u64,
}

/// Unit of work routed to a chain's worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ChainInput {
    Log(EventEnvelope),
    Block(BlockTick),
}

impl ChainInput {
    pub fn chain_id(&self) -> ChainId {
        match self {
            ChainInput::Log(envelope) => envelope.context.chain_id,
            ChainInput::Block(tick) => tick.chain_id,
        }
    }
}

impl From<EventEnvelope> for ChainInput {
    fn from(envelope: EventEnvelope) -> Self {
        ChainInput::Log(envelope)
    }
}

impl From<BlockTick> for ChainInput {
    fn from(tick: BlockTick) -> Self {
        ChainInput::Block(tick)
    }
}
