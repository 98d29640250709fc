//! Broker Load Sink Connector for Danube Connect
//!
//! Consumes a Danube topic, stages each batch as a text file on shared
//! storage (local disk, S3, GCS or Azure) and bulk-loads it into a
//! Doris/StarRocks table with a `LOAD LABEL ... WITH BROKER` statement.

mod config;
mod connector;
mod record;
mod runtime;

use config::BrokerLoadSinkConfig;
use connector::BrokerLoadSink;
use broker_load_core::ConnectorResult;
use runtime::SinkRuntime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ConnectorResult<()> {
    let config = BrokerLoadSinkConfig::load();

    // Initialize logging
    init_tracing(
        config
            .as_ref()
            .map(|c| c.core.log_level.as_str())
            .unwrap_or("info"),
    );

    tracing::info!("Starting Broker Load Sink Connector");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = config.map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;

    tracing::info!("Configuration loaded successfully");
    tracing::info!(
        "Target: {}.{} via broker {}",
        config.load.database,
        config.load.table,
        config.load.broker
    );
    tracing::info!("Staging: {}", config.load.staging_dir);

    let sink = BrokerLoadSink::connect(config).await?;

    let mut runtime = SinkRuntime::new(sink).await?;

    // Run until shutdown signal
    runtime.run().await?;

    tracing::info!("Broker Load Sink Connector stopped");
    Ok(())
}

/// Initialize tracing/logging; `RUST_LOG` takes precedence over `level`
fn init_tracing(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
