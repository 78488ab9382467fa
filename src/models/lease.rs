//! Processing-activity lease rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A claim marking an order as being worked by one manager since
/// `start_time`. While a row exists for an order no other manager may claim
/// it; the store's unique constraint on `order_id` is the lock.
///
/// Leases are recoverable, not permanent: a crashed manager leaves stale
/// rows behind, and the reaper removes any older than the configured TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ProcessingActivity {
    pub thread_key: Uuid,
    pub thread_id: i32,
    pub order_id: i64,
    pub group_id: i32,
    pub start_time: DateTime<Utc>,
}
