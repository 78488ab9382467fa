//! The readiness row the scheduler operates on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::node::NodeType;

/// Threads at or above this value form a reserved/parked lane that normal
/// dispatch must never touch.
pub const RESERVED_THREAD: i32 = 900;

/// The joined readiness row the scheduler operates on: the lot, where it
/// sits, and what kind of node that is. `proc_id` points at the lot's
/// current-step row, of which at most one live one exists per lot (the store
/// enforces this with a uniqueness constraint); `name` is the node's name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CurrentStep {
    pub proc_id: i64,
    pub lot_id: i64,
    pub order_id: i64,
    pub node_id: i64,
    pub thread: i32,
    pub weight: i32,
    pub name: String,
    #[sqlx(rename = "type", try_from = "String")]
    pub node_type: NodeType,
    pub action: Option<String>,
    pub waiting_time: i32,
    pub entry_time: DateTime<Utc>,
}

impl CurrentStep {
    /// Lots in the reserved lane are excluded from every dispatch path.
    pub fn is_reserved(&self) -> bool {
        self.thread >= RESERVED_THREAD
    }
}
