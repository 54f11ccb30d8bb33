//! Projected record types, one per table.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, B256, U256};
use rusqlite::types::{Type, Value};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::columns::{self, conversion_failure};
use crate::{ChainId, Entity};

/// Where an event was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub block_number: u64,
    /// Block timestamp (Unix seconds).
    pub timestamp: u64,
    pub transaction_hash: B256,
    pub log_index: u32,
}

impl Provenance {
    fn push_values(&self, values: &mut Vec<Value>) {
        values.push(columns::int(self.block_number));
        values.push(columns::int(self.timestamp));
        values.push(columns::b256(self.transaction_hash));
        values.push(columns::int(u64::from(self.log_index)));
    }

    fn from_row_at(row: &Row<'_>, first: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            block_number: columns::u64_at(row, first)?,
            timestamp: columns::u64_at(row, first + 1)?,
            transaction_hash: columns::b256_at(row, first + 2)?,
            log_index: columns::u32_at(row, first + 3)?,
        })
    }

    /// Identity of the emitting log.
    pub fn log_key(&self) -> LogKey {
        LogKey {
            transaction_hash: self.transaction_hash,
            log_index: self.log_index,
        }
    }
}

// ==================== Keys ====================

/// Key of an [`Allocation`]: rendered as `<claimHash>-<chainId>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AllocationKey {
    pub claim_hash: B256,
    pub chain_id: ChainId,
}

impl fmt::Display for AllocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.claim_hash, self.chain_id)
    }
}

/// Key of an [`AttestationAuthorization`]: rendered as `<nonce>-<chainId>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttestationKey {
    pub nonce: U256,
    pub chain_id: ChainId,
}

impl fmt::Display for AttestationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.nonce, self.chain_id)
    }
}

/// Key of a per-emission log row: rendered as `<transactionHash>-<logIndex>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogKey {
    pub transaction_hash: B256,
    pub log_index: u32,
}

impl fmt::Display for LogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.transaction_hash, self.log_index)
    }
}

/// Key of an [`IndexedBlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockKey {
    pub block_number: u64,
    pub chain_id: ChainId,
}

// ==================== Accounts and signers ====================

/// Any address referenced by an event. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub address: Address,
    pub first_seen_at: u64,
}

impl Entity for Account {
    type Key = Address;

    const TABLE: &'static str = "account";
    const COLUMNS: &'static [&'static str] = &["address", "first_seen_at"];
    const KEY_COLUMNS: &'static [&'static str] = &["address"];

    fn key_values(key: &Address) -> Vec<Value> {
        vec![columns::address(*key)]
    }

    fn to_values(&self) -> Vec<Value> {
        vec![columns::address(self.address), columns::int(self.first_seen_at)]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            address: columns::address_at(row, 0)?,
            first_seen_at: columns::u64_at(row, 1)?,
        })
    }
}

/// Allocator signer, keyed by address across all chains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signer {
    pub address: Address,
    pub is_active: bool,
    pub added_at: u64,
    pub removed_at: Option<u64>,
}

impl Entity for Signer {
    type Key = Address;

    const TABLE: &'static str = "signer";
    const COLUMNS: &'static [&'static str] = &["address", "is_active", "added_at", "removed_at"];
    const KEY_COLUMNS: &'static [&'static str] = &["address"];

    fn key_values(key: &Address) -> Vec<Value> {
        vec![columns::address(*key)]
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            columns::address(self.address),
            columns::boolean(self.is_active),
            columns::int(self.added_at),
            columns::opt_int(self.removed_at),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            address: columns::address_at(row, 0)?,
            is_active: row.get(1)?,
            added_at: columns::u64_at(row, 2)?,
            removed_at: columns::opt_u64_at(row, 3)?,
        })
    }
}

// ==================== Allocator ====================

/// The allocator deployment on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocatorInstance {
    pub chain_id: ChainId,
    pub compact_address: Address,
    pub owner_address: Address,
    /// uint96 allocator id assigned by the compact contract.
    pub allocator_id: U256,
    pub initialized_at: u64,
    pub block_number: u64,
    pub transaction_hash: B256,
}

impl Entity for AllocatorInstance {
    type Key = ChainId;

    const TABLE: &'static str = "allocator_instance";
    const COLUMNS: &'static [&'static str] = &[
        "chain_id",
        "compact_address",
        "owner_address",
        "allocator_id",
        "initialized_at",
        "block_number",
        "transaction_hash",
    ];
    const KEY_COLUMNS: &'static [&'static str] = &["chain_id"];

    fn key_values(key: &ChainId) -> Vec<Value> {
        vec![columns::int(*key)]
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            columns::int(self.chain_id),
            columns::address(self.compact_address),
            columns::address(self.owner_address),
            columns::u256(self.allocator_id),
            columns::int(self.initialized_at),
            columns::int(self.block_number),
            columns::b256(self.transaction_hash),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            chain_id: columns::u64_at(row, 0)?,
            compact_address: columns::address_at(row, 1)?,
            owner_address: columns::address_at(row, 2)?,
            allocator_id: columns::u256_at(row, 3)?,
            initialized_at: columns::u64_at(row, 4)?,
            block_number: columns::u64_at(row, 5)?,
            transaction_hash: columns::b256_at(row, 6)?,
        })
    }
}

/// A registered allocation. `commitments` holds the encoded commitment list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub claim_hash: B256,
    pub chain_id: ChainId,
    pub sponsor_address: Address,
    pub nonce: U256,
    pub expires: U256,
    pub commitments: String,
    #[serde(flatten)]
    pub provenance: Provenance,
}

impl Allocation {
    pub fn key(&self) -> AllocationKey {
        AllocationKey {
            claim_hash: self.claim_hash,
            chain_id: self.chain_id,
        }
    }
}

impl Entity for Allocation {
    type Key = AllocationKey;

    const TABLE: &'static str = "allocation";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "claim_hash",
        "chain_id",
        "sponsor_address",
        "nonce",
        "expires",
        "commitments",
        "block_number",
        "timestamp",
        "transaction_hash",
        "log_index",
    ];
    const KEY_COLUMNS: &'static [&'static str] = &["id"];

    fn key_values(key: &AllocationKey) -> Vec<Value> {
        vec![columns::text(key.to_string())]
    }

    fn to_values(&self) -> Vec<Value> {
        let mut values = vec![
            columns::text(self.key().to_string()),
            columns::b256(self.claim_hash),
            columns::int(self.chain_id),
            columns::address(self.sponsor_address),
            columns::u256(self.nonce),
            columns::u256(self.expires),
            columns::text(self.commitments.clone()),
        ];
        self.provenance.push_values(&mut values);
        values
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            claim_hash: columns::b256_at(row, 1)?,
            chain_id: columns::u64_at(row, 2)?,
            sponsor_address: columns::address_at(row, 3)?,
            nonce: columns::u256_at(row, 4)?,
            expires: columns::u256_at(row, 5)?,
            commitments: row.get(6)?,
            provenance: Provenance::from_row_at(row, 7)?,
        })
    }
}

/// A consumed attestation nonce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationAuthorization {
    pub nonce: U256,
    pub chain_id: ChainId,
    #[serde(flatten)]
    pub provenance: Provenance,
}

impl AttestationAuthorization {
    pub fn key(&self) -> AttestationKey {
        AttestationKey {
            nonce: self.nonce,
            chain_id: self.chain_id,
        }
    }
}

impl Entity for AttestationAuthorization {
    type Key = AttestationKey;

    const TABLE: &'static str = "attestation_authorization";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "nonce",
        "chain_id",
        "block_number",
        "timestamp",
        "transaction_hash",
        "log_index",
    ];
    const KEY_COLUMNS: &'static [&'static str] = &["id"];

    fn key_values(key: &AttestationKey) -> Vec<Value> {
        vec![columns::text(key.to_string())]
    }

    fn to_values(&self) -> Vec<Value> {
        let mut values = vec![
            columns::text(self.key().to_string()),
            columns::u256(self.nonce),
            columns::int(self.chain_id),
        ];
        self.provenance.push_values(&mut values);
        values
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            nonce: columns::u256_at(row, 1)?,
            chain_id: columns::u64_at(row, 2)?,
            provenance: Provenance::from_row_at(row, 3)?,
        })
    }
}

// ==================== Ownership log ====================

/// An effective ownership transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerChange {
    pub chain_id: ChainId,
    pub old_owner: Address,
    pub new_owner: Address,
    #[serde(flatten)]
    pub provenance: Provenance,
}

impl Entity for OwnerChange {
    type Key = LogKey;

    const TABLE: &'static str = "owner_change";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "chain_id",
        "old_owner",
        "new_owner",
        "block_number",
        "timestamp",
        "transaction_hash",
        "log_index",
    ];
    const KEY_COLUMNS: &'static [&'static str] = &["id"];

    fn key_values(key: &LogKey) -> Vec<Value> {
        vec![columns::text(key.to_string())]
    }

    fn to_values(&self) -> Vec<Value> {
        let mut values = vec![
            columns::text(self.provenance.log_key().to_string()),
            columns::int(self.chain_id),
            columns::address(self.old_owner),
            columns::address(self.new_owner),
        ];
        self.provenance.push_values(&mut values);
        values
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            chain_id: columns::u64_at(row, 1)?,
            old_owner: columns::address_at(row, 2)?,
            new_owner: columns::address_at(row, 3)?,
            provenance: Provenance::from_row_at(row, 4)?,
        })
    }
}

/// A proposed, not yet accepted, owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReplacementProposal {
    pub chain_id: ChainId,
    pub proposed_owner: Address,
    #[serde(flatten)]
    pub provenance: Provenance,
}

impl Entity for OwnerReplacementProposal {
    type Key = LogKey;

    const TABLE: &'static str = "owner_replacement_proposal";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "chain_id",
        "proposed_owner",
        "block_number",
        "timestamp",
        "transaction_hash",
        "log_index",
    ];
    const KEY_COLUMNS: &'static [&'static str] = &["id"];

    fn key_values(key: &LogKey) -> Vec<Value> {
        vec![columns::text(key.to_string())]
    }

    fn to_values(&self) -> Vec<Value> {
        let mut values = vec![
            columns::text(self.provenance.log_key().to_string()),
            columns::int(self.chain_id),
            columns::address(self.proposed_owner),
        ];
        self.provenance.push_values(&mut values);
        values
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            chain_id: columns::u64_at(row, 1)?,
            proposed_owner: columns::address_at(row, 2)?,
            provenance: Provenance::from_row_at(row, 3)?,
        })
    }
}

// ==================== Signer log ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerChangeKind {
    Added,
    Removed,
}

impl SignerChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SignerChangeKind::Added => "added",
            SignerChangeKind::Removed => "removed",
        }
    }
}

impl FromStr for SignerChangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "added" => Ok(SignerChangeKind::Added),
            "removed" => Ok(SignerChangeKind::Removed),
            other => Err(format!("unknown signer change type '{other}'")),
        }
    }
}

/// A signer being added to or removed from the allocator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerChange {
    pub chain_id: ChainId,
    pub signer_address: Address,
    pub change_type: SignerChangeKind,
    #[serde(flatten)]
    pub provenance: Provenance,
}

impl Entity for SignerChange {
    type Key = LogKey;

    const TABLE: &'static str = "signer_change";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "chain_id",
        "signer_address",
        "change_type",
        "block_number",
        "timestamp",
        "transaction_hash",
        "log_index",
    ];
    const KEY_COLUMNS: &'static [&'static str] = &["id"];

    fn key_values(key: &LogKey) -> Vec<Value> {
        vec![columns::text(key.to_string())]
    }

    fn to_values(&self) -> Vec<Value> {
        let mut values = vec![
            columns::text(self.provenance.log_key().to_string()),
            columns::int(self.chain_id),
            columns::address(self.signer_address),
            columns::text(self.change_type.as_str()),
        ];
        self.provenance.push_values(&mut values);
        values
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let change_type: String = row.get(3)?;
        Ok(Self {
            chain_id: columns::u64_at(row, 1)?,
            signer_address: columns::address_at(row, 2)?,
            change_type: change_type
                .parse()
                .map_err(|e| conversion_failure(3, Type::Text, e))?,
            provenance: Provenance::from_row_at(row, 4)?,
        })
    }
}

// ==================== Aggregates ====================

/// Running totals for one chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainStatistics {
    pub chain_id: ChainId,
    pub total_allocations: u64,
    pub total_attestation_authorizations: u64,
    pub unique_sponsors: u64,
    pub last_updated: u64,
}

impl Entity for ChainStatistics {
    type Key = ChainId;

    const TABLE: &'static str = "chain_statistics";
    const COLUMNS: &'static [&'static str] = &[
        "chain_id",
        "total_allocations",
        "total_attestation_authorizations",
        "unique_sponsors",
        "last_updated",
    ];
    const KEY_COLUMNS: &'static [&'static str] = &["chain_id"];

    fn key_values(key: &ChainId) -> Vec<Value> {
        vec![columns::int(*key)]
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            columns::int(self.chain_id),
            columns::int(self.total_allocations),
            columns::int(self.total_attestation_authorizations),
            columns::int(self.unique_sponsors),
            columns::int(self.last_updated),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            chain_id: columns::u64_at(row, 0)?,
            total_allocations: columns::u64_at(row, 1)?,
            total_attestation_authorizations: columns::u64_at(row, 2)?,
            unique_sponsors: columns::u64_at(row, 3)?,
            last_updated: columns::u64_at(row, 4)?,
        })
    }
}

/// A recently indexed block, kept for cross-indexer freshness checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedBlock {
    pub block_number: u64,
    pub chain_id: ChainId,
    pub block_hash: B256,
    pub block_timestamp: u64,
    pub indexed_at: u64,
}

impl IndexedBlock {
    pub fn key(&self) -> BlockKey {
        BlockKey {
            block_number: self.block_number,
            chain_id: self.chain_id,
        }
    }
}

impl Entity for IndexedBlock {
    type Key = BlockKey;

    const TABLE: &'static str = "indexed_block";
    const COLUMNS: &'static [&'static str] = &[
        "block_number",
        "chain_id",
        "block_hash",
        "block_timestamp",
        "indexed_at",
    ];
    const KEY_COLUMNS: &'static [&'static str] = &["block_number", "chain_id"];

    fn key_values(key: &BlockKey) -> Vec<Value> {
        vec![columns::int(key.block_number), columns::int(key.chain_id)]
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            columns::int(self.block_number),
            columns::int(self.chain_id),
            columns::b256(self.block_hash),
            columns::int(self.block_timestamp),
            columns::int(self.indexed_at),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            block_number: columns::u64_at(row, 0)?,
            chain_id: columns::u64_at(row, 1)?,
            block_hash: columns::b256_at(row, 2)?,
            block_timestamp: columns::u64_at(row, 3)?,
            indexed_at: columns::u64_at(row, 4)?,
        })
    }
}
