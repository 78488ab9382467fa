//! Test support: an in-memory processing register with the same contract as
//! the Postgres one, including the unique-constraint semantics that back the
//! current-step register and the lease table.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use lotflow::database::{OutstandingFilter, ProcessingRegister};
use lotflow::models::ProcessingActivity;
use lotflow::{CurrentStep, Node, NodeType, Result, RobotError};

const DEFAULT_LOOKBACK: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
struct LotRow {
    order_id: i64,
    thread: i32,
    weight: i32,
}

#[derive(Debug, Clone)]
struct StepRow {
    lot_id: i64,
    node_id: i64,
    thread: i32,
    entry_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Semaphore {
    lot_id: i64,
    event_type_id: i64,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    nodes: Vec<Node>,
    /// Which event types each node watches.
    watches: Vec<(i64, i64)>,
    lots: HashMap<i64, LotRow>,
    steps: HashMap<i64, StepRow>,
    next_proc_id: i64,
    semaphores: Vec<Semaphore>,
    leases: Vec<ProcessingActivity>,
    /// When set, readiness queries fail with this message.
    poison: Option<String>,
}

#[derive(Default)]
pub struct InMemoryRegister {
    state: Mutex<State>,
}

impl InMemoryRegister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, node: Node) {
        let mut state = self.state.lock();
        state.nodes.push(node);
        state.nodes.sort_by_key(|n| n.node_id);
    }

    pub fn add_watch(&self, node_id: i64, event_type_id: i64) {
        self.state.lock().watches.push((node_id, event_type_id));
    }

    pub fn add_lot(&self, lot_id: i64, order_id: i64, thread: i32, weight: i32) {
        self.state.lock().lots.insert(
            lot_id,
            LotRow {
                order_id,
                thread,
                weight,
            },
        );
    }

    /// Put a lot at a node as of `entry_time`. Panics if the lot already has
    /// a step, same as the store's unique constraint would reject it.
    pub fn place_at(&self, lot_id: i64, node_id: i64, entry_time: DateTime<Utc>) -> i64 {
        let mut state = self.state.lock();
        assert!(
            !state.steps.values().any(|s| s.lot_id == lot_id),
            "lot {lot_id} already has a current step"
        );
        let thread = state.lots.get(&lot_id).map(|l| l.thread).unwrap_or(1);
        state.next_proc_id += 1;
        let proc_id = state.next_proc_id;
        state.steps.insert(
            proc_id,
            StepRow {
                lot_id,
                node_id,
                thread,
                entry_time,
            },
        );
        proc_id
    }

    pub fn place(&self, lot_id: i64, node_id: i64) -> i64 {
        self.place_at(lot_id, node_id, Utc::now())
    }

    pub fn record_semaphore(&self, lot_id: i64, event_type_id: i64, created_at: DateTime<Utc>) {
        self.state.lock().semaphores.push(Semaphore {
            lot_id,
            event_type_id,
            created_at,
        });
    }

    pub fn insert_lease(&self, order_id: i64, thread_key: Uuid, start_time: DateTime<Utc>) {
        self.state.lock().leases.push(ProcessingActivity {
            thread_key,
            thread_id: 0,
            order_id,
            group_id: 0,
            start_time,
        });
    }

    /// Make readiness queries fail until cleared.
    pub fn poison(&self, message: &str) {
        self.state.lock().poison = Some(message.to_string());
    }

    pub fn current_node(&self, lot_id: i64) -> Option<i64> {
        self.state
            .lock()
            .steps
            .values()
            .find(|s| s.lot_id == lot_id)
            .map(|s| s.node_id)
    }

    pub fn lease_count(&self) -> usize {
        self.state.lock().leases.len()
    }

    fn step_row(state: &State, proc_id: i64, step: &StepRow) -> Option<CurrentStep> {
        let lot = state.lots.get(&step.lot_id)?;
        let node = state.nodes.iter().find(|n| n.node_id == step.node_id)?;
        Some(CurrentStep {
            proc_id,
            lot_id: step.lot_id,
            order_id: lot.order_id,
            node_id: node.node_id,
            thread: step.thread,
            weight: lot.weight,
            name: node.name.clone(),
            node_type: node.node_type,
            action: node.action.clone(),
            waiting_time: node.waiting_time,
            entry_time: step.entry_time,
        })
    }
}

#[async_trait]
impl ProcessingRegister for InMemoryRegister {
    async fn list_outstanding(&self, filter: &OutstandingFilter) -> Result<Vec<CurrentStep>> {
        let state = self.state.lock();
        if let Some(message) = &state.poison {
            return Err(RobotError::InvalidState(message.clone()));
        }

        let now = Utc::now();
        let lookback =
            chrono::Duration::from_std(filter.lookback.unwrap_or(DEFAULT_LOOKBACK))
                .map_err(|e| RobotError::Configuration(e.to_string()))?;

        let mut steps: Vec<CurrentStep> = state
            .steps
            .iter()
            .filter_map(|(proc_id, step)| Self::step_row(&state, *proc_id, step))
            .filter(|s| {
                let wait_ok = s.node_type != NodeType::Wait
                    || s.entry_time + chrono::Duration::seconds(i64::from(s.waiting_time)) <= now;
                let recent_semaphore = state
                    .semaphores
                    .iter()
                    .any(|sem| sem.lot_id == s.lot_id && sem.created_at >= now - lookback);
                wait_ok || recent_semaphore
            })
            .filter(|s| match filter.group {
                Some((group_id, group_count)) => {
                    s.order_id % i64::from(group_count) == i64::from(group_id)
                }
                None => true,
            })
            .collect();

        steps.sort_by(|a, b| b.weight.cmp(&a.weight).then(a.lot_id.cmp(&b.lot_id)));
        if let Some(limit) = filter.limit {
            steps.truncate(limit as usize);
        }
        Ok(steps)
    }

    async fn find_event_matches(
        &self,
        candidates: Option<&[i64]>,
    ) -> Result<Vec<lotflow::models::EventMatch>> {
        let state = self.state.lock();

        let mut matches = Vec::new();
        for sem in &state.semaphores {
            if let Some(lot_ids) = candidates {
                if !lot_ids.contains(&sem.lot_id) {
                    continue;
                }
            }
            let Some((proc_id, step)) = state
                .steps
                .iter()
                .find(|(_, s)| s.lot_id == sem.lot_id)
                .map(|(id, s)| (*id, s.clone()))
            else {
                continue;
            };
            // The lot's current node must watch this event type.
            if !state
                .watches
                .iter()
                .any(|&(n, et)| n == step.node_id && et == sem.event_type_id)
            {
                continue;
            }
            for target in state
                .nodes
                .iter()
                .filter(|n| n.event_trigger == Some(sem.event_type_id))
            {
                matches.push(lotflow::models::EventMatch {
                    proc_id,
                    lot_id: sem.lot_id,
                    event_type_id: sem.event_type_id,
                    node_id: target.node_id,
                    prev_node_id: step.node_id,
                });
            }
        }
        Ok(matches)
    }

    async fn find_next_node(&self, after_node_id: i64) -> Result<Option<i64>> {
        let state = self.state.lock();
        Ok(state
            .nodes
            .iter()
            .map(|n| n.node_id)
            .find(|&id| id > after_node_id))
    }

    async fn advance_step(&self, lot_id: i64, proc_id: Option<i64>, node_id: i64) -> Result<i64> {
        let mut state = self.state.lock();
        match proc_id {
            Some(proc_id) => {
                let step = state.steps.get_mut(&proc_id).ok_or_else(|| {
                    RobotError::InvalidState(format!("no step row {proc_id}"))
                })?;
                step.node_id = node_id;
                step.entry_time = Utc::now();
                Ok(proc_id)
            }
            None => {
                if state.steps.values().any(|s| s.lot_id == lot_id) {
                    return Err(RobotError::InvalidState(format!(
                        "lot {lot_id} already has a current step"
                    )));
                }
                state.next_proc_id += 1;
                let proc_id = state.next_proc_id;
                state.steps.insert(
                    proc_id,
                    StepRow {
                        lot_id,
                        node_id,
                        thread: 1,
                        entry_time: Utc::now(),
                    },
                );
                Ok(proc_id)
            }
        }
    }

    async fn delete_step(&self, proc_id: i64) -> Result<()> {
        self.state.lock().steps.remove(&proc_id);
        Ok(())
    }

    async fn claim_batch(&self, order_ids: &[i64], group_id: i32, thread_key: Uuid) -> Result<()> {
        let mut state = self.state.lock();

        // All-or-nothing, like the transactional insert with rollback.
        for &order_id in order_ids {
            if state.leases.iter().any(|l| l.order_id == order_id) {
                return Err(RobotError::ClaimConflict { order_id });
            }
        }
        for &order_id in order_ids {
            state.leases.push(ProcessingActivity {
                thread_key,
                thread_id: 0,
                order_id,
                group_id,
                start_time: Utc::now(),
            });
        }
        Ok(())
    }

    async fn release_batch(&self, thread_key: Uuid) -> Result<()> {
        self.state.lock().leases.retain(|l| l.thread_key != thread_key);
        Ok(())
    }

    async fn active_leases(&self) -> Result<Vec<ProcessingActivity>> {
        let state = self.state.lock();
        if let Some(message) = &state.poison {
            return Err(RobotError::InvalidState(message.clone()));
        }
        Ok(state.leases.clone())
    }

    async fn reap_expired_leases(&self, ttl: Duration) -> Result<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(ttl)
                .map_err(|e| RobotError::Configuration(e.to_string()))?;
        let mut state = self.state.lock();
        let before = state.leases.len();
        state.leases.retain(|l| l.start_time >= cutoff);
        Ok((before - state.leases.len()) as u64)
    }
}

/// Graph node shorthand for tests.
pub fn node(node_id: i64, node_type: NodeType) -> Node {
    Node {
        node_id,
        name: format!("node{node_id}"),
        node_type,
        action: None,
        waiting_time: 0,
        event_trigger: None,
    }
}
