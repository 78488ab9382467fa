//! # Scheduling Engine
//!
//! The concurrent step-advancement core: a ticking scheduler polls the
//! processing register for outstanding lots, managers claim order partitions
//! under store-enforced leases, and the step pipeline resolves incoming
//! events before advancing each lot through its node graph.
//!
//! Components:
//! - [`state_machine`]: pure per-step decision logic (action / wait /
//!   trigger / terminate).
//! - [`event_resolver`]: which lots have semaphores satisfying their trigger
//!   node, with the ordering guard against double-firing.
//! - [`pipeline`]: events first, then step advancement, with per-lot error
//!   isolation.
//! - [`worker_pool`]: dynamic managers, round-robin order partitioning,
//!   lease claim/release discipline.
//! - [`scheduler`]: tick loop, lifecycle, concurrency-model dispatch.

pub mod event_resolver;
pub mod pipeline;
pub mod scheduler;
pub mod state_machine;
pub mod worker_pool;

pub use event_resolver::EventResolver;
pub use pipeline::StepPipeline;
pub use scheduler::{Scheduler, SchedulerState, SchedulerStats};
pub use state_machine::{StepAction, StepStateMachine};
pub use worker_pool::{divide_lots_by_orders, TickStats, WorkerPool};
