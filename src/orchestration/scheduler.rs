//! The ticking control loop.
//!
//! Lifecycle is `Stopped -> Running -> Draining -> Stopped`. `start` is
//! non-blocking: it launches the tick loop and an interrupt listener and
//! returns. Each tick runs under the `max_collect_time` budget and
//! dispatches to the configured concurrency model. A failed tick stops the
//! ticker: the scheduler goes quiet and the root cause is in the logs.
//! `stop` blocks until the tick loop has exited, so no tick survives it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{RobotConfig, RunModel};
use crate::database::{OutstandingFilter, ProcessingRegister};
use crate::error::{Result, RobotError};
use crate::registry::ActionRegistry;

use super::pipeline::StepPipeline;
use super::worker_pool::WorkerPool;

/// Scheduler lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
    Draining,
}

/// Aggregate counters exposed to the hosting process (health surfaces read
/// these; nothing else is exported).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub lots_processed: u64,
    pub managers_spawned: u64,
}

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    lots_processed: AtomicU64,
    managers_spawned: AtomicU64,
}

struct Inner {
    config: RobotConfig,
    register: Arc<dyn ProcessingRegister>,
    pipeline: Arc<StepPipeline>,
    pool: WorkerPool,
    state: Mutex<SchedulerState>,
    running: AtomicBool,
    stop_notify: Notify,
    counters: Counters,
}

pub struct Scheduler {
    inner: Arc<Inner>,
    tick_handle: Mutex<Option<JoinHandle<()>>>,
    signal_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        config: RobotConfig,
        register: Arc<dyn ProcessingRegister>,
        registry: Arc<ActionRegistry>,
    ) -> Result<Self> {
        config.validate()?;

        let pipeline = Arc::new(StepPipeline::new(
            register.clone(),
            registry,
            config.max_collect_time,
        ));
        let pool = WorkerPool::new(register.clone(), pipeline.clone(), config.clone());

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                register,
                pipeline,
                pool,
                state: Mutex::new(SchedulerState::Stopped),
                running: AtomicBool::new(false),
                stop_notify: Notify::new(),
                counters: Counters::default(),
            }),
            tick_handle: Mutex::new(None),
            signal_handle: Mutex::new(None),
        })
    }

    pub fn state(&self) -> SchedulerState {
        *self.inner.state.lock()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            ticks: self.inner.counters.ticks.load(Ordering::Relaxed),
            lots_processed: self.inner.counters.lots_processed.load(Ordering::Relaxed),
            managers_spawned: self.inner.counters.managers_spawned.load(Ordering::Relaxed),
        }
    }

    /// Launch the tick loop and the interrupt listener. Non-blocking.
    pub fn start(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if *state != SchedulerState::Stopped {
                return Err(RobotError::InvalidState(format!(
                    "scheduler already {state:?}"
                )));
            }
            *state = SchedulerState::Running;
        }
        self.inner.running.store(true, Ordering::Release);

        let inner = self.inner.clone();
        *self.tick_handle.lock() = Some(tokio::spawn(async move {
            inner.tick_loop().await;
        }));

        let inner = self.inner.clone();
        *self.signal_handle.lock() = Some(tokio::spawn(async move {
            tokio::select! {
                _ = inner.stop_notify.notified() => {}
                signal = tokio::signal::ctrl_c() => {
                    if signal.is_ok() {
                        info!("got interrupt signal, aborting");
                        inner.request_stop();
                    }
                }
            }
        }));

        info!(model = self.inner.config.model.as_str(), "robot has started");
        Ok(())
    }

    /// Signal the tick loop and block until it has drained. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if *state == SchedulerState::Stopped {
                return Ok(());
            }
            *state = SchedulerState::Draining;
        }

        self.inner.request_stop();

        let tick_handle = self.tick_handle.lock().take();
        if let Some(handle) = tick_handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "tick loop join failed");
            }
        }

        let signal_handle = self.signal_handle.lock().take();
        if let Some(handle) = signal_handle {
            handle.abort();
            let _ = handle.await;
        }

        *self.inner.state.lock() = SchedulerState::Stopped;
        info!("robot has stopped");
        Ok(())
    }
}

impl Inner {
    fn request_stop(&self) {
        self.running.store(false, Ordering::Release);
        self.stop_notify.notify_waiters();
    }

    async fn tick_loop(&self) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.stop_notify.notified() => break,
                _ = ticker.tick() => {
                    if !self.running.load(Ordering::Acquire) {
                        break;
                    }
                    let tick_time = Utc::now();
                    if let Err(e) = self.do_tick(tick_time).await {
                        // One failed tick halts the scheduler.
                        error!(error = %e, "tick failed, stopping scheduler");
                        self.request_stop();
                        *self.state.lock() = SchedulerState::Stopped;
                        break;
                    }
                    self.counters.ticks.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    #[instrument(skip(self), fields(model = self.config.model.as_str()))]
    async fn do_tick(&self, tick_time: DateTime<Utc>) -> Result<()> {
        match self.config.model {
            RunModel::Iteration => {
                let processed = tokio::time::timeout(self.config.max_collect_time, self.iteration())
                    .await
                    .map_err(|_| RobotError::DeadlineExceeded(self.config.max_collect_time))??;
                self.counters
                    .lots_processed
                    .fetch_add(processed as u64, Ordering::Relaxed);
                debug!(%tick_time, processed, "iteration tick complete");
            }
            RunModel::Tiling | RunModel::MultiTiling => {
                let stats = self.pool.run_tick(&self.running).await?;
                self.counters
                    .lots_processed
                    .fetch_add(stats.lots_processed as u64, Ordering::Relaxed);
                self.counters
                    .managers_spawned
                    .fetch_add(stats.managers_spawned as u64, Ordering::Relaxed);
                debug!(
                    %tick_time,
                    processed = stats.lots_processed,
                    managers = stats.managers_spawned,
                    "tiling tick complete"
                );
            }
        }
        Ok(())
    }

    /// The simple model: process the full ready-set directly, serially when
    /// the concurrency budget is zero, otherwise fanned out across a fixed
    /// number of unpartitioned batches. No leases are taken.
    async fn iteration(&self) -> Result<usize> {
        let lookback = OutstandingFilter {
            lookback: Some(self.config.event_lookback),
            ..OutstandingFilter::default()
        };
        let ready = self.register.list_outstanding(&lookback).await?;
        if ready.is_empty() {
            return Ok(0);
        }

        if self.config.max_concurrency == 0 {
            return match self.pipeline.run(&ready).await {
                Ok(moved) => Ok(moved),
                Err(e) => {
                    warn!(error = %e, "iteration batch failed");
                    Ok(0)
                }
            };
        }

        let chunk_size = ready.len().div_ceil(self.config.max_concurrency);
        let batches: Vec<&[_]> = ready.chunks(chunk_size).collect();
        let results =
            futures::future::join_all(batches.iter().map(|batch| self.pipeline.run(batch))).await;

        let mut moved = 0;
        for result in results {
            match result {
                Ok(n) => moved += n,
                Err(e) => warn!(error = %e, "iteration batch failed"),
            }
        }
        Ok(moved)
    }
}
