//! Insert-if-absent helpers for addresses referenced by events.

use alloy_primitives::Address;
use hybrid_store::{Account, OnConflict, Signer, StoreResult, StoreTx};

/// Record `address` as seen at `timestamp` unless it is already known.
///
/// Returns `true` when the account row was created.
pub fn ensure_account<T: StoreTx>(
    tx: &mut T,
    address: Address,
    timestamp: u64,
) -> StoreResult<bool> {
    let account = Account {
        address,
        first_seen_at: timestamp,
    };
    let created = tx.insert(&account, OnConflict::Ignore)?.is_applied();
    if created {
        tracing::debug!(%address, first_seen_at = timestamp, "account created");
    }
    Ok(created)
}

/// Create an active signer row for `address` unless one exists.
///
/// An existing row keeps its `added_at` and flag; callers toggle the flag
/// separately.
pub fn ensure_signer<T: StoreTx>(
    tx: &mut T,
    address: Address,
    timestamp: u64,
) -> StoreResult<bool> {
    let signer = Signer {
        address,
        is_active: true,
        added_at: timestamp,
        removed_at: None,
    };
    Ok(tx.insert(&signer, OnConflict::Ignore)?.is_applied())
}
