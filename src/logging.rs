//! # Structured Logging
//!
//! Environment-aware `tracing` initialization plus the fire-and-forget
//! `LogSink` capability consumed by the engine. Shipping log records to an
//! external index is out of scope; the default sink writes through the local
//! subscriber and swallows its own failures.

use std::collections::HashMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize the global tracing subscriber once.
///
/// `LOTFLOW_LOG` (or `RUST_LOG`) controls the filter; `LOTFLOW_LOG_JSON=1`
/// switches to JSON output for log shipping environments.
pub fn init_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = std::env::var("LOTFLOW_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| "info".to_string());

        let json = std::env::var("LOTFLOW_LOG_JSON").map(|v| v == "1").unwrap_or(false);

        let registry = tracing_subscriber::registry().with(EnvFilter::new(filter));

        // A subscriber may already be installed (tests, embedding hosts);
        // that is fine, keep the existing one.
        let result = if json {
            registry
                .with(fmt::layer().json().with_target(true))
                .try_init()
        } else {
            registry.with(fmt::layer().with_target(true)).try_init()
        };

        if result.is_err() {
            tracing::debug!("tracing subscriber already installed, reusing it");
        }
    });
}

/// Message classification for the external log sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Info,
    Warning,
    Error,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Info => "info",
            LogKind::Warning => "warning",
            LogKind::Error => "error",
        }
    }
}

/// Fire-and-forget log shipping capability.
///
/// Implementations must never propagate failures to the caller; a sink that
/// cannot deliver logs its own error locally and drops the message.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn log_message(
        &self,
        kind: LogKind,
        text: &str,
        index: &str,
        metadata: HashMap<String, serde_json::Value>,
    );
}

/// Default sink: writes through the local tracing subscriber.
#[derive(Debug, Default, Clone)]
pub struct TracingLogSink;

#[async_trait]
impl LogSink for TracingLogSink {
    async fn log_message(
        &self,
        kind: LogKind,
        text: &str,
        index: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) {
        match kind {
            LogKind::Info => tracing::info!(index, ?metadata, "{text}"),
            LogKind::Warning => tracing::warn!(index, ?metadata, "{text}"),
            LogKind::Error => tracing::error!(index, ?metadata, "{text}"),
        }
    }
}
