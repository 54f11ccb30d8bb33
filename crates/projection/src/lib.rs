//! Event-to-state projection for the hybrid allocator.
//!
//! Decoded contract events and block ticks come in per chain; the engine turns
//! them into record-store mutations with exactly-once effect under
//! at-least-once delivery.
//!
//! ```text
//!   ChainInput ──► ChainDispatcher ──(one worker per chain)──► Projector
//!                                                                 │
//!                                   ┌─────────────────────────────┤ one transaction
//!                                   ▼                             ▼
//!                         handlers::project_event      RetentionTracker::record
//!                          ├─ accounts::ensure_*          └─ prune sweep
//!                          └─ statistics::apply_delta
//! ```

pub mod accounts;
pub mod commitments;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod handlers;
pub mod projector;
pub mod retention;
pub mod statistics;

pub use commitments::{decode_commitments, encode_commitments};
pub use dispatch::{ChainCounters, ChainDispatcher, ChainReport, DispatchReport};
pub use error::{DispatchError, ProjectionError, ProjectionResult};
pub use events::{AllocatorEvent, BlockTick, ChainInput, Commitment, EventContext, EventEnvelope};
pub use handlers::{project_event, EventOutcome};
pub use projector::{InputOutcome, Projector};
pub use retention::{
    Clock, FixedClock, PruneReport, RetentionConfig, RetentionTracker, SystemClock, TickOutcome,
};
pub use statistics::{apply_delta, StatsDelta};
