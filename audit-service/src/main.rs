//! Audit service entry point.

use anyhow::Context;
use audit_service::{Config, run, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let config = Config::from_env().context("Failed to load configuration")?;
    telemetry::init(config.service.log_format).context("Failed to initialise tracing")?;

    tracing::info!(
        brokers = %config.transport.brokers,
        table = %config.database.table,
        metrics_addr = %config.service.metrics_addr,
        "Configuration loaded"
    );

    run(config, async {
        if let Err(e) = product_audit_runtime::wait_for_signal().await {
            tracing::error!(error = %e, "Signal handler failed; shutting down");
        }
    })
    .await
    .context("Audit service failed")
}
