//! # lotflow
//!
//! A step-advancement engine for manufacturing lots. Lots move through a
//! directed graph of nodes stored in PostgreSQL; each node is an action to
//! execute, a wait to sit out, an event trigger to block on, or a terminate
//! marker. A polling scheduler discovers outstanding lots every tick,
//! resolves event semaphores, and advances each lot one step at a time.
//!
//! ## Architecture
//!
//! - [`orchestration::Scheduler`] owns the tick loop and the
//!   start/stop/drain lifecycle.
//! - [`orchestration::WorkerPool`] runs the tiling models: dynamic managers
//!   claim disjoint order partitions under store-enforced leases.
//! - [`orchestration::StepPipeline`] advances one batch: incoming events
//!   first, then the per-lot step decision.
//! - [`database::ProcessingRegister`] is the store seam; the PostgreSQL
//!   implementation lives in [`database::PgProcessingRegister`].
//! - [`registry::ActionRegistry`] maps action-node names to handlers.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lotflow::{
//!     ActionRegistry, DatabaseConfig, PgProcessingRegister, RobotConfig, Scheduler,
//! };
//!
//! # async fn run() -> lotflow::Result<()> {
//! let pool = lotflow::database::connect(&DatabaseConfig::from_env()?).await?;
//! let register = Arc::new(PgProcessingRegister::new(pool));
//! let registry = Arc::new(ActionRegistry::with_builtins());
//!
//! let scheduler = Scheduler::new(RobotConfig::from_env()?, register, registry)?;
//! scheduler.start()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod registry;

pub use config::{DatabaseConfig, RobotConfig, RunModel};
pub use database::{OutstandingFilter, PgProcessingRegister, ProcessingRegister};
pub use error::{Result, RobotError};
pub use models::{CurrentStep, Node, NodeType};
pub use orchestration::{Scheduler, SchedulerState, SchedulerStats};
pub use registry::{ActionHandler, ActionRegistry};
