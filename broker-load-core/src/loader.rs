//! The per-batch staging and load lifecycle.
//!
//! ```text
//! Initialized -> Writing -> Flushed -> Loading{attempt} -> Loaded
//!                                                        -> RetainedForRecovery
//! ```
//!
//! Any fatal error moves the loader to `Failed`. A loader is used for exactly
//! one batch; the next batch gets a new loader and a new label.

use crate::command::{build_load_command, redact_password, LoadCommandParams};
use crate::config::{LoadConfig, LoadLabel};
use crate::executor::{LoadExecutor, LoadOutcome};
use crate::metrics::LoaderMetrics;
use crate::retry::RetryPolicy;
use crate::staging::{self, StagingFileSystem, StagingWriter};
use crate::{ConnectorError, ConnectorResult};
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Where a batch is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Initialized,
    Writing,
    Flushed,
    Loading { attempt: u32 },
    Loaded,
    RetainedForRecovery,
    Failed,
}

impl LoadState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Loaded | Self::RetainedForRecovery | Self::Failed
        )
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialized => f.write_str("initialized"),
            Self::Writing => f.write_str("writing"),
            Self::Flushed => f.write_str("flushed"),
            Self::Loading { attempt } => write!(f, "loading (attempt {})", attempt),
            Self::Loaded => f.write_str("loaded"),
            Self::RetainedForRecovery => f.write_str("retained for recovery"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Summary of a finished load
#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub label: LoadLabel,
    pub state: LoadState,
    pub staging_uri: String,
    pub attempts: u32,
    pub timeouts: u32,
    pub backoff_waits: u32,
    pub records_written: u64,
    pub bytes_written: u64,
}

/// Stages one batch as a file and loads it with a broker load.
pub struct BatchFileLoader {
    config: LoadConfig,
    label: LoadLabel,
    fs: Arc<dyn StagingFileSystem>,
    writer: Option<Box<dyn StagingWriter>>,
    staging_uri: String,
    state: LoadState,
    retry: RetryPolicy,
    timeouts: u32,
    records_written: u64,
    bytes_written: u64,
    metrics: LoaderMetrics,
}

impl BatchFileLoader {
    /// Connect to the configured staging location and open the staging file
    pub async fn open(config: &LoadConfig, label: LoadLabel) -> ConnectorResult<Self> {
        config.validate()?;
        let fs = staging::connect(&config.staging_dir, &config.storage_options).await?;
        Self::open_with(config, label, fs).await
    }

    /// Open the staging file on an already connected filesystem.
    ///
    /// A stale file left under the same label is removed first. If setup fails
    /// the filesystem client is released before the error is returned.
    pub async fn open_with(
        config: &LoadConfig,
        label: LoadLabel,
        fs: Arc<dyn StagingFileSystem>,
    ) -> ConnectorResult<Self> {
        config.validate()?;

        let staging_uri = fs.qualify(label.as_str());
        let writer = match prepare_staging_file(fs.as_ref(), &label, &staging_uri).await {
            Ok(writer) => writer,
            Err(e) => {
                if let Err(close_err) = fs.close().await {
                    warn!(
                        "Failed to release staging filesystem after setup error: {}",
                        close_err
                    );
                }
                return Err(e);
            }
        };

        debug!("Opened staging file {} for label {}", staging_uri, label);

        Ok(Self {
            config: config.clone(),
            metrics: LoaderMetrics::new(&config.database, &config.table),
            retry: RetryPolicy::from_config(config),
            label,
            fs,
            writer: Some(writer),
            staging_uri,
            state: LoadState::Initialized,
            timeouts: 0,
            records_written: 0,
            bytes_written: 0,
        })
    }

    pub fn label(&self) -> &LoadLabel {
        &self.label
    }

    pub fn staging_uri(&self) -> &str {
        &self.staging_uri
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Timeouts seen so far in the load phase
    pub fn retry_count(&self) -> u32 {
        self.timeouts
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Append one record verbatim and return its size in bytes.
    ///
    /// No delimiter is added; callers wanting line-delimited files terminate
    /// each record themselves.
    pub async fn write_record(&mut self, content: &str) -> ConnectorResult<usize> {
        if !matches!(self.state, LoadState::Initialized | LoadState::Writing) {
            return Err(ConnectorError::invalid_state(format!(
                "cannot write to {} while {}",
                self.label, self.state
            )));
        }

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| ConnectorError::invalid_state("staging file is not open"))?;

        if let Err(e) = writer.write_all(content.as_bytes()).await {
            self.fail().await;
            return Err(ConnectorError::staging_io("write", &self.staging_uri, e));
        }

        let len = content.len();
        self.state = LoadState::Writing;
        self.records_written += 1;
        self.bytes_written += len as u64;
        self.metrics.record_written(len);

        Ok(len)
    }

    /// Make the staging file durable, then load it.
    ///
    /// Timeouts are retried up to the configured limit. When the limit is hit
    /// the file is kept, a warning is logged and the report carries
    /// [`LoadState::RetainedForRecovery`]; no error is returned in that case.
    /// Any other database failure is returned immediately.
    pub async fn finalize_and_load(
        &mut self,
        executor: &dyn LoadExecutor,
    ) -> ConnectorResult<LoadReport> {
        if !matches!(self.state, LoadState::Initialized | LoadState::Writing) {
            return Err(ConnectorError::invalid_state(format!(
                "cannot finalize {} while {}",
                self.label, self.state
            )));
        }

        self.finalize_staging_file().await?;
        self.state = LoadState::Flushed;
        self.metrics.record_staged(self.bytes_written);

        let credentials = self.config.credentials()?;
        let params = LoadCommandParams::from_config(&self.config, &self.label, &self.staging_uri)?;
        let command = build_load_command(&params);
        info!(
            "Loading {} records ({} bytes) as {}.{}",
            self.records_written, self.bytes_written, self.config.database, self.label
        );
        debug!("Load command: {}", redact_password(&command, &credentials));

        let started = Instant::now();
        let mut retry = self.retry.state();
        let mut attempts = 0;
        let mut backoff_waits = 0;

        loop {
            attempts += 1;
            self.state = LoadState::Loading { attempt: attempts };

            match executor.execute(&command).await {
                LoadOutcome::Success => {
                    self.state = LoadState::Loaded;
                    self.metrics.record_loaded(started.elapsed());
                    info!(
                        "Load {} accepted after {} attempt(s)",
                        self.label, attempts
                    );
                    break;
                }
                LoadOutcome::Timeout(reason) => {
                    let retry_allowed = retry.record_timeout();
                    self.timeouts = retry.timeouts();
                    self.metrics.record_timeout();

                    if !retry_allowed {
                        self.state = LoadState::RetainedForRecovery;
                        self.metrics.record_retained();
                        warn!(
                            "Load {} timed out {} time(s), giving up; staging file retained at {} ({})",
                            self.label, self.timeouts, self.staging_uri, reason
                        );
                        break;
                    }

                    warn!(
                        "Load {} timed out (attempt {}/{}): {}; retrying in {:?}",
                        self.label, attempts, self.retry.max_retries, reason, self.retry.backoff
                    );
                    tokio::time::sleep(self.retry.backoff).await;
                    backoff_waits += 1;
                }
                LoadOutcome::Fatal(e) => {
                    self.state = LoadState::Failed;
                    self.metrics.record_failed("load");
                    error!(
                        "Load {} rejected, staging file left at {}: {}",
                        self.label, self.staging_uri, e
                    );
                    return Err(ConnectorError::load_with_source(
                        self.label.as_str(),
                        "load statement failed",
                        e,
                    ));
                }
            }
        }

        Ok(LoadReport {
            label: self.label.clone(),
            state: self.state,
            staging_uri: self.staging_uri.clone(),
            attempts,
            timeouts: self.timeouts,
            backoff_waits,
            records_written: self.records_written,
            bytes_written: self.bytes_written,
        })
    }

    /// Delete the staging file if it still exists. Safe to call repeatedly.
    ///
    /// Returns whether a file was removed.
    pub async fn delete_staging_file(&self) -> ConnectorResult<bool> {
        let name = self.label.as_str();

        let exists = self.fs.exists(name).await.map_err(|e| {
            error!("Failed to check staging file {}: {}", self.staging_uri, e);
            ConnectorError::staging_io("exists", &self.staging_uri, e)
        })?;
        if !exists {
            return Ok(false);
        }

        self.fs.delete(name).await.map_err(|e| {
            error!("Failed to delete staging file {}: {}", self.staging_uri, e);
            ConnectorError::staging_io("delete", &self.staging_uri, e)
        })?;

        self.metrics.record_staging_deleted();
        debug!("Deleted staging file {}", self.staging_uri);
        Ok(true)
    }

    /// Remove the staging file after a successful load, keep it otherwise
    pub async fn cleanup(&self) -> ConnectorResult<()> {
        match self.state {
            LoadState::Loaded => {
                self.delete_staging_file().await?;
            }
            LoadState::RetainedForRecovery | LoadState::Failed => {
                warn!(
                    "Keeping staging file {} for manual recovery of load {}",
                    self.staging_uri, self.label
                );
            }
            state => {
                return Err(ConnectorError::invalid_state(format!(
                    "cannot clean up {} while {}",
                    self.label, state
                )))
            }
        }
        Ok(())
    }

    /// Release the writer (if still open) and the filesystem client
    pub async fn shutdown(mut self) -> ConnectorResult<()> {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.abort().await {
                warn!("Failed to abort staging file {}: {}", self.staging_uri, e);
            }
        }

        self.fs.close().await.map_err(|e| {
            error!("Failed to release staging filesystem: {}", e);
            ConnectorError::staging_io("release", &self.config.staging_dir, e)
        })
    }

    async fn finalize_staging_file(&mut self) -> ConnectorResult<()> {
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| ConnectorError::invalid_state("staging file is not open"))?;

        let result = async {
            writer.flush().await.map_err(|e| ("flush", e))?;
            writer.sync().await.map_err(|e| ("sync", e))?;
            writer.close().await.map_err(|e| ("close", e))
        }
        .await;

        if let Err((operation, e)) = result {
            if let Err(abort_err) = writer.abort().await {
                warn!(
                    "Failed to abort staging file {} after {} error: {}",
                    self.staging_uri, operation, abort_err
                );
            }
            self.state = LoadState::Failed;
            self.metrics.record_failed("staging");
            return Err(ConnectorError::staging_io(operation, &self.staging_uri, e));
        }

        Ok(())
    }

    /// Drop the writer after a write error
    async fn fail(&mut self) {
        self.state = LoadState::Failed;
        self.metrics.record_failed("staging");
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.abort().await {
                warn!("Failed to abort staging file {}: {}", self.staging_uri, e);
            }
        }
    }
}

async fn prepare_staging_file(
    fs: &dyn StagingFileSystem,
    label: &LoadLabel,
    staging_uri: &str,
) -> ConnectorResult<Box<dyn StagingWriter>> {
    let name = label.as_str();

    let stale = fs
        .exists(name)
        .await
        .map_err(|e| ConnectorError::staging_io("exists", staging_uri, e))?;
    if stale {
        warn!("Removing stale staging file {} from an earlier attempt", staging_uri);
        fs.delete(name)
            .await
            .map_err(|e| ConnectorError::staging_io("delete", staging_uri, e))?;
    }

    fs.create(name)
        .await
        .map_err(|e| ConnectorError::staging_io("create", staging_uri, e))
}
