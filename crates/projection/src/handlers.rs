//! State-transition rules, one per allocator event.
//!
//! Each handler runs inside the caller's transaction and depends only on the
//! event and its context. Redelivery is detected through the event's own log
//! row: that row is inserted first, and if its key is already present the
//! handler stops before touching counters, owners or signer flags.

use alloy_primitives::{Address, B256, U256};
use hybrid_store::{
    Allocation, AllocatorInstance, AttestationAuthorization, OnConflict, OwnerChange,
    OwnerReplacementProposal, Signer, SignerChange, SignerChangeKind, StoreTx, WriteOutcome,
};

use crate::accounts::{ensure_account, ensure_signer};
use crate::commitments::encode_commitments;
use crate::error::ProjectionResult;
use crate::events::{AllocatorEvent, Commitment, EventContext, EventEnvelope};
use crate::statistics::{apply_delta, StatsDelta};

/// What projecting one event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// The event's mutations were applied.
    Applied,
    /// The event was already projected; nothing changed.
    Duplicate,
}

/// Apply the mutations for one event.
pub fn project_event<T: StoreTx>(
    tx: &mut T,
    envelope: &EventEnvelope,
) -> ProjectionResult<EventOutcome> {
    let ctx = &envelope.context;
    ctx.validate()?;

    let outcome = match &envelope.event {
        AllocatorEvent::Allocated {
            sponsor,
            commitments,
            nonce,
            expires,
            claim_hash,
        } => on_allocated(tx, ctx, *sponsor, commitments, *nonce, *expires, *claim_hash)?,
        AllocatorEvent::AllocatorInitialized {
            compact,
            owner,
            allocator_id,
        } => on_allocator_initialized(tx, ctx, *compact, *owner, *allocator_id)?,
        AllocatorEvent::AttestationAuthorized { nonce } => {
            on_attestation_authorized(tx, ctx, *nonce)?
        }
        AllocatorEvent::OwnerReplaced {
            old_owner,
            new_owner,
        } => on_owner_replaced(tx, ctx, *old_owner, *new_owner)?,
        AllocatorEvent::OwnerReplacementProposed { new_owner } => {
            on_owner_replacement_proposed(tx, ctx, *new_owner)?
        }
        AllocatorEvent::SignerAdded { signer } => on_signer_added(tx, ctx, *signer)?,
        AllocatorEvent::SignerRemoved { signer } => on_signer_removed(tx, ctx, *signer)?,
    };

    match outcome {
        EventOutcome::Applied => tracing::debug!(
            event = envelope.event.name(),
            chain_id = ctx.chain_id,
            block_number = ctx.block_number,
            log_index = ctx.log_index,
            "event projected"
        ),
        EventOutcome::Duplicate => tracing::debug!(
            event = envelope.event.name(),
            chain_id = ctx.chain_id,
            tx_hash = %ctx.transaction_hash,
            log_index = ctx.log_index,
            "duplicate delivery skipped"
        ),
    }
    Ok(outcome)
}

fn first_delivery(outcome: WriteOutcome) -> bool {
    outcome != WriteOutcome::KeyExists
}

fn on_allocated<T: StoreTx>(
    tx: &mut T,
    ctx: &EventContext,
    sponsor: Address,
    commitments: &[Commitment],
    nonce: U256,
    expires: U256,
    claim_hash: B256,
) -> ProjectionResult<EventOutcome> {
    let allocation = Allocation {
        claim_hash,
        chain_id: ctx.chain_id,
        sponsor_address: sponsor,
        nonce,
        expires,
        commitments: encode_commitments(commitments)?,
        provenance: ctx.provenance(),
    };
    if !first_delivery(tx.insert(&allocation, OnConflict::Ignore)?) {
        return Ok(EventOutcome::Duplicate);
    }

    ensure_account(tx, sponsor, ctx.block_timestamp)?;
    apply_delta(tx, ctx.chain_id, ctx.block_timestamp, StatsDelta::allocations(1))?;
    Ok(EventOutcome::Applied)
}

fn on_allocator_initialized<T: StoreTx>(
    tx: &mut T,
    ctx: &EventContext,
    compact: Address,
    owner: Address,
    allocator_id: U256,
) -> ProjectionResult<EventOutcome> {
    // The instance row is a singleton, so its provenance doubles as the
    // redelivery key.
    if let Some(existing) = tx.find::<AllocatorInstance>(&ctx.chain_id)? {
        if existing.transaction_hash == ctx.transaction_hash
            && existing.block_number == ctx.block_number
        {
            return Ok(EventOutcome::Duplicate);
        }
    }

    ensure_account(tx, owner, ctx.block_timestamp)?;
    let instance = AllocatorInstance {
        chain_id: ctx.chain_id,
        compact_address: compact,
        owner_address: owner,
        allocator_id,
        initialized_at: ctx.block_timestamp,
        block_number: ctx.block_number,
        transaction_hash: ctx.transaction_hash,
    };
    tx.insert(&instance, OnConflict::Replace)?;
    Ok(EventOutcome::Applied)
}

fn on_attestation_authorized<T: StoreTx>(
    tx: &mut T,
    ctx: &EventContext,
    nonce: U256,
) -> ProjectionResult<EventOutcome> {
    let authorization = AttestationAuthorization {
        nonce,
        chain_id: ctx.chain_id,
        provenance: ctx.provenance(),
    };
    if !first_delivery(tx.insert(&authorization, OnConflict::Ignore)?) {
        return Ok(EventOutcome::Duplicate);
    }

    apply_delta(tx, ctx.chain_id, ctx.block_timestamp, StatsDelta::attestations(1))?;
    Ok(EventOutcome::Applied)
}

fn on_owner_replaced<T: StoreTx>(
    tx: &mut T,
    ctx: &EventContext,
    old_owner: Address,
    new_owner: Address,
) -> ProjectionResult<EventOutcome> {
    let change = OwnerChange {
        chain_id: ctx.chain_id,
        old_owner,
        new_owner,
        provenance: ctx.provenance(),
    };
    if !first_delivery(tx.insert(&change, OnConflict::Ignore)?) {
        return Ok(EventOutcome::Duplicate);
    }

    ensure_account(tx, old_owner, ctx.block_timestamp)?;
    ensure_account(tx, new_owner, ctx.block_timestamp)?;

    let updated = tx.update::<AllocatorInstance, _>(&ctx.chain_id, |instance| {
        instance.owner_address = new_owner;
    })?;
    if updated == WriteOutcome::KeyAbsent {
        tracing::warn!(
            chain_id = ctx.chain_id,
            %new_owner,
            "owner replaced before allocator was initialized; instance left absent"
        );
    }
    Ok(EventOutcome::Applied)
}

fn on_owner_replacement_proposed<T: StoreTx>(
    tx: &mut T,
    ctx: &EventContext,
    new_owner: Address,
) -> ProjectionResult<EventOutcome> {
    let proposal = OwnerReplacementProposal {
        chain_id: ctx.chain_id,
        proposed_owner: new_owner,
        provenance: ctx.provenance(),
    };
    if !first_delivery(tx.insert(&proposal, OnConflict::Ignore)?) {
        return Ok(EventOutcome::Duplicate);
    }

    ensure_account(tx, new_owner, ctx.block_timestamp)?;
    Ok(EventOutcome::Applied)
}

fn record_signer_change<T: StoreTx>(
    tx: &mut T,
    ctx: &EventContext,
    signer: Address,
    change_type: SignerChangeKind,
) -> ProjectionResult<bool> {
    let change = SignerChange {
        chain_id: ctx.chain_id,
        signer_address: signer,
        change_type,
        provenance: ctx.provenance(),
    };
    Ok(first_delivery(tx.insert(&change, OnConflict::Ignore)?))
}

fn on_signer_added<T: StoreTx>(
    tx: &mut T,
    ctx: &EventContext,
    signer: Address,
) -> ProjectionResult<EventOutcome> {
    if !record_signer_change(tx, ctx, signer, SignerChangeKind::Added)? {
        return Ok(EventOutcome::Duplicate);
    }

    ensure_signer(tx, signer, ctx.block_timestamp)?;
    tx.update::<Signer, _>(&signer, |row| {
        row.is_active = true;
        row.removed_at = None;
    })?;
    Ok(EventOutcome::Applied)
}

fn on_signer_removed<T: StoreTx>(
    tx: &mut T,
    ctx: &EventContext,
    signer: Address,
) -> ProjectionResult<EventOutcome> {
    if !record_signer_change(tx, ctx, signer, SignerChangeKind::Removed)? {
        return Ok(EventOutcome::Duplicate);
    }

    let updated = tx.update::<Signer, _>(&signer, |row| {
        row.is_active = false;
        row.removed_at = Some(ctx.block_timestamp);
    })?;
    if updated == WriteOutcome::KeyAbsent {
        tracing::warn!(
            chain_id = ctx.chain_id,
            %signer,
            "signer removed before it was added; no signer row to deactivate"
        );
    }
    Ok(EventOutcome::Applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitments::decode_commitments;
    use crate::error::ProjectionError;
    use alloy_primitives::FixedBytes;
    use hybrid_store::{
        Account, AllocationKey, ChainStatistics, LogKey, RecordStore, SqliteStore,
    };

    fn ctx(chain_id: u64, block_number: u64, tx_byte: u8, log_index: u32) -> EventContext {
        EventContext {
            chain_id,
            block_number,
            block_timestamp: 1_700_000_000 + block_number,
            transaction_hash: B256::repeat_byte(tx_byte),
            log_index,
        }
    }

    fn apply(store: &SqliteStore, context: EventContext, event: AllocatorEvent) -> EventOutcome {
        let mut tx = store.begin().unwrap();
        let outcome = project_event(&mut tx, &EventEnvelope { context, event }).unwrap();
        tx.commit().unwrap();
        outcome
    }

    #[test]
    fn allocated_stores_commitments_in_order() {
        let store = SqliteStore::in_memory().unwrap();
        let commitments = vec![
            Commitment {
                lock_tag: FixedBytes::repeat_byte(0x01),
                token: Address::repeat_byte(0xbb),
                amount: U256::from(1000u64),
            },
            Commitment {
                lock_tag: FixedBytes::repeat_byte(0x02),
                token: Address::repeat_byte(0xdd),
                amount: U256::MAX,
            },
        ];
        let event = AllocatorEvent::Allocated {
            sponsor: Address::repeat_byte(0xaa),
            commitments: commitments.clone(),
            nonce: U256::from(5u64),
            expires: U256::from(9_999_999_999u64),
            claim_hash: B256::repeat_byte(0xcc),
        };

        assert_eq!(apply(&store, ctx(10, 1, 0x01, 0), event), EventOutcome::Applied);

        let key = AllocationKey {
            claim_hash: B256::repeat_byte(0xcc),
            chain_id: 10,
        };
        let allocation = store.get::<Allocation>(&key).unwrap().unwrap();
        assert_eq!(decode_commitments(&allocation.commitments).unwrap(), commitments);
        assert_eq!(allocation.provenance.log_index, 0);
    }

    #[test]
    fn attestation_redelivery_counts_once() {
        let store = SqliteStore::in_memory().unwrap();
        let event = AllocatorEvent::AttestationAuthorized {
            nonce: U256::from(77u64),
        };

        assert_eq!(apply(&store, ctx(1, 5, 0x02, 1), event.clone()), EventOutcome::Applied);
        assert_eq!(apply(&store, ctx(1, 5, 0x02, 1), event), EventOutcome::Duplicate);

        let stats = store.get::<ChainStatistics>(&1).unwrap().unwrap();
        assert_eq!(stats.total_attestation_authorizations, 1);
        assert_eq!(stats.total_allocations, 0);
        assert_eq!(store.count::<AttestationAuthorization>().unwrap(), 1);
    }

    #[test]
    fn owner_replaced_updates_instance_and_logs_change() {
        let store = SqliteStore::in_memory().unwrap();
        let first_owner = Address::repeat_byte(0x01);
        let second_owner = Address::repeat_byte(0x02);

        apply(
            &store,
            ctx(42161, 10, 0x10, 0),
            AllocatorEvent::AllocatorInitialized {
                compact: Address::repeat_byte(0xc0),
                owner: first_owner,
                allocator_id: U256::from(9u64),
            },
        );
        apply(
            &store,
            ctx(42161, 11, 0x11, 4),
            AllocatorEvent::OwnerReplaced {
                old_owner: first_owner,
                new_owner: second_owner,
            },
        );

        let instance = store.get::<AllocatorInstance>(&42161).unwrap().unwrap();
        assert_eq!(instance.owner_address, second_owner);
        assert_eq!(instance.initialized_at, 1_700_000_010);

        let change = store
            .get::<OwnerChange>(&LogKey {
                transaction_hash: B256::repeat_byte(0x11),
                log_index: 4,
            })
            .unwrap()
            .unwrap();
        assert_eq!(change.old_owner, first_owner);
        assert_eq!(change.new_owner, second_owner);
        assert!(store.get::<Account>(&second_owner).unwrap().is_some());
    }

    #[test]
    fn redelivered_initialization_does_not_reset_owner() {
        let store = SqliteStore::in_memory().unwrap();
        let init = AllocatorEvent::AllocatorInitialized {
            compact: Address::repeat_byte(0xc0),
            owner: Address::repeat_byte(0x01),
            allocator_id: U256::from(9u64),
        };

        apply(&store, ctx(1, 10, 0x10, 0), init.clone());
        apply(
            &store,
            ctx(1, 11, 0x11, 0),
            AllocatorEvent::OwnerReplaced {
                old_owner: Address::repeat_byte(0x01),
                new_owner: Address::repeat_byte(0x02),
            },
        );
        assert_eq!(apply(&store, ctx(1, 10, 0x10, 0), init), EventOutcome::Duplicate);

        let instance = store.get::<AllocatorInstance>(&1).unwrap().unwrap();
        assert_eq!(instance.owner_address, Address::repeat_byte(0x02));
    }

    #[test]
    fn redelivered_owner_replacement_does_not_regress_owner() {
        let store = SqliteStore::in_memory().unwrap();
        let owner_a = Address::repeat_byte(0x0a);
        let owner_b = Address::repeat_byte(0x0b);
        let owner_c = Address::repeat_byte(0x0c);
        let a_to_b = AllocatorEvent::OwnerReplaced {
            old_owner: owner_a,
            new_owner: owner_b,
        };

        apply(
            &store,
            ctx(10, 1, 0x20, 0),
            AllocatorEvent::AllocatorInitialized {
                compact: Address::repeat_byte(0xc0),
                owner: owner_a,
                allocator_id: U256::from(1u64),
            },
        );
        assert_eq!(apply(&store, ctx(10, 2, 0x21, 0), a_to_b.clone()), EventOutcome::Applied);
        assert_eq!(
            apply(
                &store,
                ctx(10, 3, 0x22, 0),
                AllocatorEvent::OwnerReplaced {
                    old_owner: owner_b,
                    new_owner: owner_c,
                },
            ),
            EventOutcome::Applied
        );

        assert_eq!(apply(&store, ctx(10, 2, 0x21, 0), a_to_b), EventOutcome::Duplicate);

        let instance = store.get::<AllocatorInstance>(&10).unwrap().unwrap();
        assert_eq!(instance.owner_address, owner_c);
        assert_eq!(store.count::<OwnerChange>().unwrap(), 2);
    }

    #[test]
    fn redelivered_proposal_is_logged_once() {
        let store = SqliteStore::in_memory().unwrap();
        let proposal = AllocatorEvent::OwnerReplacementProposed {
            new_owner: Address::repeat_byte(0x33),
        };

        assert_eq!(apply(&store, ctx(1, 3, 0x03, 2), proposal.clone()), EventOutcome::Applied);
        assert_eq!(apply(&store, ctx(1, 3, 0x03, 2), proposal), EventOutcome::Duplicate);

        assert_eq!(store.count::<OwnerReplacementProposal>().unwrap(), 1);
        assert_eq!(store.count::<Account>().unwrap(), 1);
    }

    #[test]
    fn proposal_is_logged_without_touching_instance() {
        let store = SqliteStore::in_memory().unwrap();
        let proposed = Address::repeat_byte(0x33);

        apply(
            &store,
            ctx(1, 3, 0x03, 2),
            AllocatorEvent::OwnerReplacementProposed { new_owner: proposed },
        );

        let proposal = store
            .get::<OwnerReplacementProposal>(&LogKey {
                transaction_hash: B256::repeat_byte(0x03),
                log_index: 2,
            })
            .unwrap()
            .unwrap();
        assert_eq!(proposal.proposed_owner, proposed);
        assert_eq!(store.count::<AllocatorInstance>().unwrap(), 0);
        assert_eq!(
            store.get::<Account>(&proposed).unwrap().unwrap().first_seen_at,
            1_700_000_003
        );
    }

    #[test]
    fn signer_removed_before_added_is_a_noop_update() {
        let store = SqliteStore::in_memory().unwrap();
        let signer = Address::repeat_byte(0x5e);

        let outcome = apply(&store, ctx(1, 1, 0x01, 0), AllocatorEvent::SignerRemoved { signer });

        assert_eq!(outcome, EventOutcome::Applied);
        assert!(store.get::<Signer>(&signer).unwrap().is_none());
        assert_eq!(store.signer_history(signer).unwrap().len(), 1);
    }

    #[test]
    fn signer_added_reactivates_removed_signer() {
        let store = SqliteStore::in_memory().unwrap();
        let signer = Address::repeat_byte(0x5e);

        apply(&store, ctx(1, 1, 0x01, 0), AllocatorEvent::SignerAdded { signer });
        apply(&store, ctx(1, 2, 0x02, 0), AllocatorEvent::SignerRemoved { signer });
        let removed = store.get::<Signer>(&signer).unwrap().unwrap();
        assert!(!removed.is_active);
        assert_eq!(removed.removed_at, Some(1_700_000_002));

        apply(&store, ctx(1, 3, 0x03, 0), AllocatorEvent::SignerAdded { signer });
        let active = store.get::<Signer>(&signer).unwrap().unwrap();
        assert!(active.is_active);
        assert_eq!(active.removed_at, None);
        assert_eq!(active.added_at, 1_700_000_001);
    }

    #[test]
    fn zero_chain_id_fails_without_writes() {
        let store = SqliteStore::in_memory().unwrap();
        let mut tx = store.begin().unwrap();

        let err = project_event(
            &mut tx,
            &EventEnvelope {
                context: ctx(0, 1, 0x01, 0),
                event: AllocatorEvent::SignerAdded {
                    signer: Address::repeat_byte(0x01),
                },
            },
        )
        .unwrap_err();
        drop(tx);

        assert!(matches!(err, ProjectionError::InvalidInput(_)));
        assert_eq!(store.count::<SignerChange>().unwrap(), 0);
    }
}
