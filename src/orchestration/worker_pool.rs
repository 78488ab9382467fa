//! Dynamic manager pool for the tiling models.
//!
//! Each scheduling tick, the pool watches the lease table: while fewer
//! leases are active than the concurrency budget and no manager is already
//! spinning for a group, it spawns one manager with the remaining capacity.
//! A manager fetches its ready-set, partitions it by distinct order with a
//! round-robin cursor (lots in the reserved thread lane are never
//! dispatched), claims each partition's orders as a lease, runs the step
//! pipeline per partition concurrently, and releases its leases whether the
//! batch succeeded or not. Results come back on a private channel, drained
//! non-blockingly; every spawned manager is joined before the tick returns.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::{RobotConfig, RunModel};
use crate::database::{OutstandingFilter, ProcessingRegister};
use crate::error::Result;
use crate::models::CurrentStep;

use super::pipeline::StepPipeline;

/// Outcome counters for one scheduling tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub managers_spawned: usize,
    pub lots_processed: usize,
    pub leases_reaped: u64,
}

struct ManagerReport {
    processed: usize,
}

struct LiveManager {
    key: Uuid,
    group_id: i32,
    handle: JoinHandle<()>,
    report: oneshot::Receiver<ManagerReport>,
}

pub struct WorkerPool {
    register: Arc<dyn ProcessingRegister>,
    pipeline: Arc<StepPipeline>,
    config: RobotConfig,
}

impl WorkerPool {
    pub fn new(
        register: Arc<dyn ProcessingRegister>,
        pipeline: Arc<StepPipeline>,
        config: RobotConfig,
    ) -> Self {
        Self {
            register,
            pipeline,
            config,
        }
    }

    /// Run one tick of the tiling loop until the collect deadline passes or
    /// a stop is requested. A stop suppresses new manager spawns; in-flight
    /// managers finish their batch and are joined before this returns.
    #[instrument(skip_all)]
    pub async fn run_tick(&self, stop: &AtomicBool) -> Result<TickStats> {
        let deadline = Instant::now() + self.config.max_collect_time;

        let mut stats = TickStats {
            leases_reaped: self.register.reap_expired_leases(self.config.lease_ttl).await?,
            ..TickStats::default()
        };
        if stats.leases_reaped > 0 {
            warn!(count = stats.leases_reaped, "reaped expired leases");
        }

        let group_count = match self.config.model {
            RunModel::MultiTiling => self.config.group_count,
            _ => 1,
        };
        let group_budget = (self.config.max_concurrency / group_count).max(1);

        let mut live: Vec<LiveManager> = Vec::new();

        loop {
            if Instant::now() >= deadline || stop.load(Ordering::Acquire) {
                break;
            }

            // Lease state is the source of truth for capacity; a failure
            // here fails the whole tick.
            let leases = self.register.active_leases().await?;

            for group_id in 0..group_count as i32 {
                let spinning = live.iter().any(|m| m.group_id == group_id);
                let active = leases.iter().filter(|l| l.group_id == group_id).count();

                if !spinning && active < group_budget {
                    let capacity = group_budget - active;
                    live.push(self.spawn_manager(group_id, group_count as i32, capacity));
                    stats.managers_spawned += 1;
                }
            }

            self.drain_finished(&mut live, &mut stats).await;

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(self.config.manager_poll_interval.min(remaining)).await;
        }

        // Join everything still in flight; leases were released by the
        // managers themselves.
        for mut manager in live {
            if let Err(e) = (&mut manager.handle).await {
                warn!(key = %manager.key, error = %e, "manager task failed");
            }
            if let Ok(report) = manager.report.try_recv() {
                stats.lots_processed += report.processed;
            }
        }

        Ok(stats)
    }

    fn spawn_manager(&self, group_id: i32, group_count: i32, capacity: usize) -> LiveManager {
        let (tx, rx) = oneshot::channel();
        let key = Uuid::new_v4();
        let register = self.register.clone();
        let pipeline = self.pipeline.clone();

        debug!(%key, group_id, capacity, "spawning manager");

        let handle = tokio::spawn(run_manager(
            register,
            pipeline,
            key,
            group_id,
            group_count,
            capacity,
            tx,
        ));

        LiveManager {
            key,
            group_id,
            handle,
            report: rx,
        }
    }

    /// Non-blocking sweep of finished managers.
    async fn drain_finished(&self, live: &mut Vec<LiveManager>, stats: &mut TickStats) {
        let mut still_running = Vec::with_capacity(live.len());

        for mut manager in live.drain(..) {
            if !manager.handle.is_finished() {
                still_running.push(manager);
                continue;
            }

            if let Err(e) = (&mut manager.handle).await {
                warn!(key = %manager.key, error = %e, "manager task failed");
            }
            match manager.report.try_recv() {
                Ok(report) => {
                    info!(key = %manager.key, processed = report.processed, "manager finished");
                    stats.lots_processed += report.processed;
                }
                Err(_) => {
                    warn!(key = %manager.key, "manager exited without reporting");
                }
            }
        }

        *live = still_running;
    }
}

/// One manager's run: fetch, partition, claim, process, release, report.
async fn run_manager(
    register: Arc<dyn ProcessingRegister>,
    pipeline: Arc<StepPipeline>,
    key: Uuid,
    group_id: i32,
    group_count: i32,
    capacity: usize,
    report: oneshot::Sender<ManagerReport>,
) {
    // The fetch is capped at the manager's capacity so the leases it takes
    // never push the group past its budget.
    let mut filter = OutstandingFilter::with_limit(capacity as i64);
    if group_count > 1 {
        filter.group = Some((group_id, group_count));
    }

    let ready = match register.list_outstanding(&filter).await {
        Ok(ready) => ready,
        Err(e) => {
            // Nothing was claimed, so there is nothing to release.
            warn!(%key, error = %e, "manager could not fetch ready-set");
            let _ = report.send(ManagerReport { processed: 0 });
            return;
        }
    };

    let shards = divide_lots_by_orders(&ready, capacity);

    let mut claimed: Vec<Vec<CurrentStep>> = Vec::new();
    for shard in shards {
        let orders: Vec<i64> = shard
            .iter()
            .map(|s| s.order_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        match register.claim_batch(&orders, group_id, key).await {
            Ok(()) => claimed.push(shard),
            Err(e) if e.is_claim_conflict() => {
                debug!(%key, error = %e, "shard already claimed, skipping");
            }
            Err(e) => {
                warn!(%key, error = %e, "shard claim failed, skipping");
            }
        }
    }

    let results =
        futures::future::join_all(claimed.iter().map(|shard| pipeline.run(shard))).await;

    let mut processed = 0;
    for result in results {
        match result {
            Ok(moved) => processed += moved,
            Err(e) => warn!(%key, error = %e, "shard batch failed"),
        }
    }

    // Released unconditionally; a failed shard is re-discovered next tick.
    if let Err(e) = register.release_batch(key).await {
        warn!(%key, error = %e, "lease release failed");
    }

    let _ = report.send(ManagerReport { processed });
}

/// Partition a ready-set into at most `max_shards` buckets, round-robin over
/// distinct orders. All lots of one order land in the same bucket, so
/// per-order step dependencies are never split across shards. Lots in the
/// reserved thread lane (`thread >= 900`) are excluded entirely.
pub fn divide_lots_by_orders(steps: &[CurrentStep], max_shards: usize) -> Vec<Vec<CurrentStep>> {
    if max_shards == 0 {
        return Vec::new();
    }

    let mut shard_of_order: HashMap<i64, usize> = HashMap::new();
    let mut shards: Vec<Vec<CurrentStep>> = Vec::new();
    let mut cursor = 0usize;

    for step in steps {
        if step.is_reserved() {
            continue;
        }

        let idx = match shard_of_order.get(&step.order_id) {
            Some(idx) => *idx,
            None => {
                let idx = cursor % max_shards;
                cursor += 1;
                shard_of_order.insert(step.order_id, idx);
                idx
            }
        };

        if shards.len() <= idx {
            shards.resize_with(idx + 1, Vec::new);
        }
        shards[idx].push(step.clone());
    }

    shards
}
