//! Execution of load statements against the database frontend.

use crate::config::DatabaseConfig;
use crate::{ConnectorError, ConnectorResult};
use async_trait::async_trait;
use sqlx::mysql::{MySqlDatabaseError, MySqlPool, MySqlPoolOptions};
use std::io;
use std::time::Duration;
use tracing::{debug, info};

/// MySQL error numbers that mean "ran out of time", not "rejected"
const TIMEOUT_ERROR_NUMBERS: [u16; 3] = [
    1205, // ER_LOCK_WAIT_TIMEOUT
    1317, // ER_QUERY_INTERRUPTED
    3024, // ER_QUERY_TIMEOUT
];

/// Result of issuing one load statement
#[derive(Debug)]
pub enum LoadOutcome {
    /// The database accepted the statement
    Success,
    /// The call ran out of time; the same statement may be issued again
    Timeout(String),
    /// The database rejected the statement or the connection broke
    Fatal(ConnectorError),
}

impl LoadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Runs load statements. Implementations classify failures instead of raising.
#[async_trait]
pub trait LoadExecutor: Send + Sync {
    async fn execute(&self, command: &str) -> LoadOutcome;
}

/// Executor for MySQL-protocol frontends (Doris, StarRocks)
#[derive(Debug, Clone)]
pub struct MySqlLoadExecutor {
    pool: MySqlPool,
    query_timeout: Option<Duration>,
}

impl MySqlLoadExecutor {
    pub async fn connect(config: &DatabaseConfig) -> ConnectorResult<Self> {
        config.validate()?;

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| ConnectorError::fatal_with_source("Failed to connect to database", e))?;

        info!(
            "Connected to database frontend (query timeout: {:?})",
            config.query_timeout()
        );

        Ok(Self::with_pool(pool, config.query_timeout()))
    }

    pub fn with_pool(pool: MySqlPool, query_timeout: Option<Duration>) -> Self {
        Self {
            pool,
            query_timeout,
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
        debug!("Database pool closed");
    }
}

#[async_trait]
impl LoadExecutor for MySqlLoadExecutor {
    async fn execute(&self, command: &str) -> LoadOutcome {
        // LOAD statements cannot be prepared, send them as plain text
        let call = sqlx::raw_sql(command).execute(&self.pool);

        let result = match self.query_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    return LoadOutcome::Timeout(format!(
                        "load statement did not return within {:?}",
                        limit
                    ))
                }
            },
            None => call.await,
        };

        match result {
            Ok(_) => LoadOutcome::Success,
            Err(e) => classify(e),
        }
    }
}

/// Split driver errors into retryable timeouts and everything else
pub fn classify(err: sqlx::Error) -> LoadOutcome {
    if is_timeout(&err) {
        return LoadOutcome::Timeout(err.to_string());
    }
    LoadOutcome::Fatal(ConnectorError::fatal_with_source(
        "Load statement failed",
        err,
    ))
}

fn is_timeout(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Io(e) => e.kind() == io::ErrorKind::TimedOut,
        sqlx::Error::Database(db) => db
            .try_downcast_ref::<MySqlDatabaseError>()
            .map(|e| TIMEOUT_ERROR_NUMBERS.contains(&e.number()))
            .unwrap_or(false),
        _ => false,
    }
}
