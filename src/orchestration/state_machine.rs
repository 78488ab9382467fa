//! Pure per-step decision logic.
//!
//! Given where a lot sits and what kind of node that is, decide the next
//! operation. No I/O happens here; the pipeline interprets the decision.

use chrono::{DateTime, Duration, Utc};

use crate::error::{Result, RobotError};
use crate::models::{CurrentStep, NodeType};

/// The operation a step decision resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Action node: execute the named handler, then attempt the advance.
    RunHandler(String),
    /// Wait node: advance only when the deadline computed from entry time
    /// has elapsed.
    EvaluateWait { ready: bool },
    /// Terminate node: delete the lot's current-step record.
    Terminate,
    /// Trigger and default nodes with no gating: move to the successor.
    Advance,
}

pub struct StepStateMachine;

impl StepStateMachine {
    /// Decide what to do with a lot at its current node, as of `now`.
    ///
    /// Wait readiness is a straight duration comparison against
    /// `entry_time + waiting_time`; never wall-clock second-of-minute
    /// arithmetic.
    pub fn decide(step: &CurrentStep, now: DateTime<Utc>) -> Result<StepAction> {
        match step.node_type {
            NodeType::Action => match step.action.as_deref() {
                Some(name) if !name.is_empty() => Ok(StepAction::RunHandler(name.to_string())),
                _ => Err(RobotError::UnknownAction(format!(
                    "action node {} without handler name",
                    step.node_id
                ))),
            },
            NodeType::Wait => Ok(StepAction::EvaluateWait {
                ready: now >= Self::wait_deadline(step),
            }),
            NodeType::Terminate => Ok(StepAction::Terminate),
            NodeType::Trigger => Ok(StepAction::Advance),
        }
    }

    /// The instant a wait node's lot becomes eligible to advance.
    pub fn wait_deadline(step: &CurrentStep) -> DateTime<Utc> {
        step.entry_time + Duration::seconds(i64::from(step.waiting_time))
    }
}
