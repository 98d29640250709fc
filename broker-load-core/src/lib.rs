//! # Broker Load Core
//!
//! Stage a batch of records as a file on shared storage and bulk-load it into
//! an analytical database (Doris, StarRocks) with a `LOAD LABEL ... WITH BROKER`
//! statement.
//!
//! ## Overview
//!
//! One [`BatchFileLoader`] handles exactly one batch:
//!
//! 1. **open**: remove any stale file for the label, open a fresh staging file
//! 2. **write**: append records verbatim
//! 3. **finalize and load**: flush, sync, close, then issue the load statement,
//!    retrying only on timeouts
//! 4. **cleanup**: delete the staging file once the load is accepted, keep it
//!    when retries ran out so it can be recovered by hand
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use broker_load_core::{BatchFileLoader, LoadConfig, LoadLabel, MySqlLoadExecutor, DatabaseConfig};
//!
//! # async fn run(config: LoadConfig, db: DatabaseConfig) -> broker_load_core::ConnectorResult<()> {
//! let executor = MySqlLoadExecutor::connect(&db).await?;
//! let mut loader = BatchFileLoader::open(&config, LoadLabel::new("orders_batch_42")?).await?;
//! loader.write_record("1,apple,3\n").await?;
//! loader.write_record("2,pear,5\n").await?;
//!
//! let report = loader.finalize_and_load(&executor).await?;
//! loader.cleanup().await?;
//! loader.shutdown().await?;
//! println!("{:?}", report.state);
//! # Ok(())
//! # }
//! ```

mod command;
mod config;
mod error;
mod executor;
mod loader;
mod metrics;
mod retry;

pub mod staging;

// Re-export public API
pub use command::{build_load_command, quote_literal, redact_password, LoadCommandParams, NEGATIVE_KEYWORD};
pub use config::{BrokerCredentials, DatabaseConfig, LoadConfig, LoadLabel, MAX_LABEL_LEN};
pub use error::{ConnectorError, ConnectorResult};
pub use executor::{classify, LoadExecutor, LoadOutcome, MySqlLoadExecutor};
pub use loader::{BatchFileLoader, LoadReport, LoadState};
pub use self::metrics::LoaderMetrics;
pub use retry::{RetryPolicy, RetryState};
pub use staging::{StagingFileSystem, StagingWriter};

// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
