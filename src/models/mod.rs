//! # Data Model
//!
//! Typed row structs, one per query shape, decoded once at the store
//! boundary. The engine never passes untyped column maps around.

pub mod event;
pub mod lease;
pub mod node;
pub mod step;

pub use event::{AdvanceInstruction, EventMatch};
pub use lease::ProcessingActivity;
pub use node::{Node, NodeType};
pub use step::{CurrentStep, RESERVED_THREAD};
