//! Event-semaphore resolution.
//!
//! Computes which lots have incoming events satisfying their node's
//! semaphore condition, producing one advance instruction per lot. Runs
//! every poll cycle, over all outstanding lots or over a manager's
//! partition.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::database::ProcessingRegister;
use crate::error::Result;
use crate::models::{AdvanceInstruction, CurrentStep, EventMatch};

pub struct EventResolver {
    register: Arc<dyn ProcessingRegister>,
}

impl EventResolver {
    pub fn new(register: Arc<dyn ProcessingRegister>) -> Self {
        Self { register }
    }

    /// Advance instructions for every candidate lot whose semaphores unblock
    /// a trigger node. `None` resolves over all outstanding lots.
    pub async fn find_ready(
        &self,
        candidates: Option<&[CurrentStep]>,
    ) -> Result<Vec<AdvanceInstruction>> {
        let lot_ids: Option<Vec<i64>> =
            candidates.map(|steps| steps.iter().map(|s| s.lot_id).collect());

        let matches = self
            .register
            .find_event_matches(lot_ids.as_deref())
            .await?;

        let instructions = resolve_instructions(&matches);
        if !instructions.is_empty() {
            debug!(count = instructions.len(), "event semaphores resolved");
        }
        Ok(instructions)
    }
}

/// Reduce raw semaphore matches to at most one instruction per lot.
///
/// The ordering guard requires the matched semaphore's node to sit at or
/// before the target node in graph order; among several matches for one lot
/// the lowest target wins, so a lot never skips ahead past an intermediate
/// trigger.
pub fn resolve_instructions(matches: &[EventMatch]) -> Vec<AdvanceInstruction> {
    let mut per_lot: HashMap<i64, &EventMatch> = HashMap::new();

    for m in matches {
        if m.prev_node_id > m.node_id {
            continue;
        }
        per_lot
            .entry(m.lot_id)
            .and_modify(|best| {
                if m.node_id < best.node_id {
                    *best = m;
                }
            })
            .or_insert(m);
    }

    let mut instructions: Vec<AdvanceInstruction> =
        per_lot.values().map(|m| AdvanceInstruction::from(*m)).collect();
    instructions.sort_by_key(|i| i.lot_id);
    instructions
}
