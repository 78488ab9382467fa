//! The per-batch step-advancement pipeline.
//!
//! For one batch of candidate lots: resolve incoming events first, then run
//! each lot's step decision. Events must be recorded before advancement so a
//! freshly recorded event is picked up in the same pass. A failing lot is
//! logged and left at its node for the next poll cycle; siblings in the
//! batch are unaffected.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, instrument, warn};

use crate::database::ProcessingRegister;
use crate::error::Result;
use crate::logging::{LogKind, LogSink, TracingLogSink};
use crate::models::CurrentStep;
use crate::registry::ActionRegistry;

use super::event_resolver::EventResolver;
use super::state_machine::{StepAction, StepStateMachine};

/// Index the external sink files step records under.
const STEP_LOG_INDEX: &str = "robot-steps";

pub struct StepPipeline {
    register: Arc<dyn ProcessingRegister>,
    registry: Arc<ActionRegistry>,
    resolver: EventResolver,
    sink: Arc<dyn LogSink>,
    /// Deadline for a single handler invocation.
    action_deadline: Duration,
}

impl StepPipeline {
    pub fn new(
        register: Arc<dyn ProcessingRegister>,
        registry: Arc<ActionRegistry>,
        action_deadline: Duration,
    ) -> Self {
        let resolver = EventResolver::new(register.clone());
        Self {
            register,
            registry,
            resolver,
            sink: Arc::new(TracingLogSink),
            action_deadline,
        }
    }

    /// Replace the default tracing-backed sink with an external one.
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    async fn ship(&self, kind: LogKind, text: &str, step: &CurrentStep) {
        let mut metadata = HashMap::new();
        metadata.insert("lot_id".to_string(), serde_json::json!(step.lot_id));
        metadata.insert("node_id".to_string(), serde_json::json!(step.node_id));
        self.sink
            .log_message(kind, text, STEP_LOG_INDEX, metadata)
            .await;
    }

    /// Run the full pipeline over one batch. Returns the number of lots that
    /// moved (advanced or terminated).
    ///
    /// Only the shared event-match fetch can fail the batch; per-lot errors
    /// are isolated.
    ///
    /// Both phases walk the same listed snapshot: a lot the event phase has
    /// already moved is still stepped from its listed node, and the step
    /// phase's write lands last. The lot is re-polled at its new node next
    /// tick.
    #[instrument(skip_all, fields(batch = candidates.len()))]
    pub async fn run(&self, candidates: &[CurrentStep]) -> Result<usize> {
        let mut moved = self.do_incoming_events(candidates).await?;
        moved += self.do_next_step(candidates).await;
        Ok(moved)
    }

    /// Resolve semaphores and record the resulting advances.
    async fn do_incoming_events(&self, candidates: &[CurrentStep]) -> Result<usize> {
        let instructions = self.resolver.find_ready(Some(candidates)).await?;

        let mut moved = 0;
        for instruction in &instructions {
            match self.register.apply_advance(instruction).await {
                Ok(proc_id) => {
                    debug!(
                        lot_id = instruction.lot_id,
                        node_id = instruction.node_id,
                        proc_id,
                        "event advanced lot"
                    );
                    moved += 1;
                }
                Err(e) => {
                    warn!(lot_id = instruction.lot_id, error = %e, "event advance failed");
                }
            }
        }
        Ok(moved)
    }

    /// Run the step decision for every lot in the batch.
    async fn do_next_step(&self, candidates: &[CurrentStep]) -> usize {
        let mut moved = 0;
        for step in candidates {
            match self.process_one(step).await {
                Ok(true) => moved += 1,
                Ok(false) => {}
                Err(e) => {
                    // The lot stays where it is and is re-discovered next
                    // tick; at-least-once by re-polling.
                    warn!(
                        lot_id = step.lot_id,
                        node_id = step.node_id,
                        error = %e,
                        "step processing failed"
                    );
                    self.ship(LogKind::Warning, &format!("step failed: {e}"), step)
                        .await;
                }
            }
        }
        moved
    }

    /// One lot's step. `Ok(true)` when the lot moved.
    async fn process_one(&self, step: &CurrentStep) -> Result<bool> {
        match StepStateMachine::decide(step, Utc::now())? {
            StepAction::RunHandler(name) => {
                self.registry
                    .invoke(&name, step, self.action_deadline)
                    .await?;
                self.step_to_next_node(step).await
            }
            StepAction::EvaluateWait { ready: true } => self.step_to_next_node(step).await,
            StepAction::EvaluateWait { ready: false } => Ok(false),
            StepAction::Terminate => {
                self.register.delete_step(step.proc_id).await?;
                debug!(lot_id = step.lot_id, proc_id = step.proc_id, "lot terminated");
                self.ship(LogKind::Info, "lot terminated", step).await;
                Ok(true)
            }
            StepAction::Advance => self.step_to_next_node(step).await,
        }
    }

    /// Move the lot to its successor node, if one exists.
    async fn step_to_next_node(&self, step: &CurrentStep) -> Result<bool> {
        match self.register.find_next_node(step.node_id).await? {
            Some(next_node) => {
                let proc_id = self
                    .register
                    .advance_step(step.lot_id, Some(step.proc_id), next_node)
                    .await?;
                debug!(
                    lot_id = step.lot_id,
                    from = step.node_id,
                    to = next_node,
                    proc_id,
                    "lot advanced"
                );
                Ok(true)
            }
            None => {
                // Last node of the graph and not a terminate node: parked.
                debug!(lot_id = step.lot_id, node_id = step.node_id, "no successor node");
                Ok(false)
            }
        }
    }
}
