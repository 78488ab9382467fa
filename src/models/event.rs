//! Event-semaphore matches and the advance instructions derived from them.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One semaphore whose event type corresponds to a trigger node at or after
/// the lot's current node. Produced by the register's event-match join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct EventMatch {
    pub proc_id: i64,
    pub lot_id: i64,
    pub event_type_id: i64,
    /// The node the matched event unblocks.
    pub node_id: i64,
    /// The node the lot currently sits at.
    pub prev_node_id: i64,
}

/// Instruction to move one lot to its next node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceInstruction {
    pub proc_id: i64,
    pub lot_id: i64,
    pub node_id: i64,
    pub prev_node_id: i64,
}

impl From<&EventMatch> for AdvanceInstruction {
    fn from(m: &EventMatch) -> Self {
        Self {
            proc_id: m.proc_id,
            lot_id: m.lot_id,
            node_id: m.node_id,
            prev_node_id: m.prev_node_id,
        }
    }
}
