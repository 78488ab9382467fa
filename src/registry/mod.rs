//! # Action Registry
//!
//! Resolves the action name an action node declares as data into an
//! invocable handler. Dispatch is a map lookup built at startup; the graph
//! is validated against the registry at configuration-load time so an
//! unknown name is caught before the first tick, not at dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::error::{Result, RobotError};
use crate::models::{CurrentStep, Node, NodeType};

/// A named side-effecting step handler.
///
/// Handlers must return within the deadline the caller passes to
/// [`ActionRegistry::invoke`]; a handler that overruns fails that lot's step
/// with `DeadlineExceeded` and the lot is retried next cycle.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn call(&self, step: &CurrentStep) -> Result<()>;
}

/// Blanket impl so plain async-compatible closures can register as handlers.
#[async_trait]
impl<F> ActionHandler for F
where
    F: Fn(&CurrentStep) -> Result<()> + Send + Sync,
{
    async fn call(&self, step: &CurrentStep) -> Result<()> {
        self(step)
    }
}

/// Static name-to-handler mapping.
#[derive(Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ActionRegistry")
            .field("handlers", &names)
            .finish()
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in init handlers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("FirstInit", Arc::new(FirstInit));
        registry.register("SecondInit", Arc::new(SecondInit));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        let name = name.into();
        if self.handlers.insert(name.clone(), handler).is_some() {
            warn!(action = %name, "action handler replaced");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Execute the named handler under `deadline`.
    #[instrument(skip(self, step), fields(lot_id = step.lot_id, action = name))]
    pub async fn invoke(&self, name: &str, step: &CurrentStep, deadline: Duration) -> Result<()> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| RobotError::UnknownAction(name.to_string()))?;

        tokio::time::timeout(deadline, handler.call(step))
            .await
            .map_err(|_| RobotError::DeadlineExceeded(deadline))?
    }

    /// Check every action node's handler name resolves. Called when the
    /// graph is loaded, so bad configuration fails fast.
    pub fn validate_nodes(&self, nodes: &[Node]) -> Result<()> {
        for node in nodes {
            if node.node_type != NodeType::Action {
                continue;
            }
            match node.action.as_deref() {
                Some(name) if self.contains(name) => {}
                Some(name) => {
                    return Err(RobotError::UnknownAction(format!(
                        "node {} declares unregistered action {name}",
                        node.node_id
                    )))
                }
                None => {
                    return Err(RobotError::Configuration(format!(
                        "action node {} has no action name",
                        node.node_id
                    )))
                }
            }
        }
        Ok(())
    }
}

/// Built-in first-entry initializer.
struct FirstInit;

#[async_trait]
impl ActionHandler for FirstInit {
    async fn call(&self, step: &CurrentStep) -> Result<()> {
        info!(lot_id = step.lot_id, order_id = step.order_id, "FirstInit");
        Ok(())
    }
}

/// Built-in second-stage initializer.
struct SecondInit;

#[async_trait]
impl ActionHandler for SecondInit {
    async fn call(&self, step: &CurrentStep) -> Result<()> {
        info!(lot_id = step.lot_id, order_id = step.order_id, "SecondInit");
        Ok(())
    }
}
