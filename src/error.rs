//! Crate-wide error taxonomy.
//!
//! One root enum covers every failure class the engine surfaces. Per-lot
//! failures stay inside the pipeline (logged, retried next tick); only the
//! shared ready-set fetch path escalates to the scheduler.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RobotError {
    /// Any failure talking to the persistence layer: connection, query,
    /// transaction. On the ready-set path this halts the ticker.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    /// A node names an action that is not in the registry. Terminal for that
    /// lot's step this cycle; idempotent, so re-polled next tick.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// Another manager already holds the lease for this order. Semantically
    /// "skip this shard, retry next tick", not a failure.
    #[error("lease already held for order {order_id}")]
    ClaimConflict { order_id: i64 },

    /// The tick's bounded context expired mid-batch.
    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    /// Lifecycle misuse, e.g. starting an already running scheduler.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl RobotError {
    /// Claim conflicts are expected contention, not faults.
    pub fn is_claim_conflict(&self) -> bool {
        matches!(self, RobotError::ClaimConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, RobotError>;
