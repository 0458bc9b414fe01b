//! Offline operation queue and reconnect sync.
//!
//! Mutations that cannot reach the backend are persisted as
//! [`PendingOperation`]s in a partitioned [`QueueStore`]. One
//! [`OperationQueueManager`] per partition replays them in order, and the
//! [`ReconnectSyncCoordinator`] decides when that happens.
//!
//! Features:
//! - Durable, user-scoped, per-partition FIFO queue
//! - Idempotency keys on every replayed request
//! - Early exit on connectivity failures, per-target ordering on others
//! - Configurable rejection policy with dead letters

mod coordinator;
mod dispatch;
mod manager;
pub mod operation;
mod session;
mod status;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{ReconnectMode, ReconnectSyncCoordinator};
pub use dispatch::{MutationDispatcher, Submission};
pub use manager::OperationQueueManager;
pub use operation::{EntityKind, OperationType, PendingOperation, Partition};
pub use session::{
    OperationOutcome, OperationReport, RejectionPolicy, SkipReason, SyncOutcome, SyncSession,
};
pub use status::{StatusIndicator, SyncStatus};
pub use store::{DeadLetter, QueueStats, QueueStore, SqliteQueueStore};
