//! The robot daemon: wire configuration, database, action handlers and the
//! scheduler together, then run until interrupted.

use std::sync::Arc;

use tracing::{error, info};

use lotflow::logging::init_logging;
use lotflow::{
    ActionRegistry, DatabaseConfig, PgProcessingRegister, Result, RobotConfig, Scheduler,
};

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(e) = run().await {
        error!(error = %e, "robot exited with error");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = RobotConfig::from_env()?;
    let db_config = DatabaseConfig::from_env()?;

    info!(
        model = config.model.as_str(),
        max_concurrency = config.max_concurrency,
        "starting robot"
    );

    let pool = lotflow::database::connect(&db_config).await?;
    let register = Arc::new(PgProcessingRegister::new(pool));

    if std::env::args().any(|arg| arg == "--init-schema") {
        register.init_schema().await?;
        info!("schema applied");
    }

    let registry = Arc::new(ActionRegistry::with_builtins());
    registry.validate_nodes(&register.list_nodes().await?)?;

    let scheduler = Scheduler::new(config, register, registry)?;
    scheduler.start()?;

    // The scheduler installs its own interrupt listener; wait here until the
    // tick loop has gone quiet, then drain.
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| lotflow::RobotError::Configuration(format!("signal handler: {e}")))?;

    scheduler.stop().await?;
    Ok(())
}
