//! The processing-register capability: every store operation the scheduling
//! engine needs, behind one trait.
//!
//! Mutual exclusion for "who owns this order" is delegated entirely to the
//! store via unique-constraint-backed lease rows; the engine holds no
//! in-process locks over lot state. All write operations are
//! single-statement (or single-transaction) with rollback on error; no
//! transaction is held open across a poll cycle.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{AdvanceInstruction, CurrentStep, EventMatch, ProcessingActivity};

/// Restriction applied to `list_outstanding`.
#[derive(Debug, Clone, Default)]
pub struct OutstandingFilter {
    /// Upper bound on rows returned; `None` fetches the full ready-set.
    pub limit: Option<i64>,
    /// Semaphores newer than this window make their lot ready regardless of
    /// wait state. `None` uses the store's default (24h).
    pub lookback: Option<Duration>,
    /// MultiTiling restriction: only orders with
    /// `order_id % group_count == group_id`.
    pub group: Option<(i32, i32)>,
}

impl OutstandingFilter {
    pub fn with_limit(limit: i64) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn for_group(group_id: i32, group_count: i32) -> Self {
        Self {
            group: Some((group_id, group_count)),
            ..Self::default()
        }
    }
}

/// Store-facing operations of the step-advancement engine.
///
/// Readiness is a pure function of stored state and current time: calling
/// `list_outstanding` twice with no intervening writes returns the same set.
#[async_trait]
pub trait ProcessingRegister: Send + Sync {
    /// Lots eligible for the next tick, ordered by weight descending:
    /// the union of lots whose wait has elapsed and lots with a semaphore
    /// inside the lookback window.
    async fn list_outstanding(&self, filter: &OutstandingFilter) -> Result<Vec<CurrentStep>>;

    /// Semaphore matches for trigger nodes, restricted to `candidates` when
    /// given (a manager's partition), otherwise over all outstanding lots.
    /// The join already applies the ordering guard: the semaphore's event
    /// type must correspond to a trigger node at or after the lot's current
    /// node.
    async fn find_event_matches(&self, candidates: Option<&[i64]>) -> Result<Vec<EventMatch>>;

    /// Successor node: the next node id in ascending graph order, if any.
    async fn find_next_node(&self, after_node_id: i64) -> Result<Option<i64>>;

    /// Insert or update the current-step row for a lot, returning the proc
    /// id. `proc_id = None` is first entry into the graph.
    async fn advance_step(&self, lot_id: i64, proc_id: Option<i64>, node_id: i64) -> Result<i64>;

    /// Remove a current-step row; a lot whose record is deleted has left the
    /// graph and is never listed again.
    async fn delete_step(&self, proc_id: i64) -> Result<()>;

    /// Atomically lease a batch of orders for one manager. Fails the whole
    /// claim with `ClaimConflict` if any order is already leased.
    async fn claim_batch(&self, order_ids: &[i64], group_id: i32, thread_key: Uuid) -> Result<()>;

    /// Drop every lease held under `thread_key`. Called unconditionally when
    /// a manager finishes, success or failure.
    async fn release_batch(&self, thread_key: Uuid) -> Result<()>;

    /// All live leases.
    async fn active_leases(&self) -> Result<Vec<ProcessingActivity>>;

    /// Remove leases older than `ttl` (left behind by crashed managers).
    /// Returns the number of rows reaped.
    async fn reap_expired_leases(&self, ttl: Duration) -> Result<u64>;

    /// Apply one advance instruction produced by the event resolver.
    async fn apply_advance(&self, instruction: &AdvanceInstruction) -> Result<i64> {
        self.advance_step(
            instruction.lot_id,
            Some(instruction.proc_id),
            instruction.node_id,
        )
        .await
    }
}
