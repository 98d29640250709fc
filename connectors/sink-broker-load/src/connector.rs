//! Broker Load Sink Connector implementation
//!
//! Every flushed batch becomes one staging file and one load job:
//! records are written as lines, the file is loaded with
//! `LOAD LABEL ... WITH BROKER`, and removed once the load is accepted.

use crate::config::BrokerLoadSinkConfig;
use crate::record::SinkRecord;
use broker_load_core::staging::{self, StagingFileSystem};
use broker_load_core::{
    BatchFileLoader, ConnectorResult, LoadExecutor, LoadLabel, LoadReport, LoadState,
    MySqlLoadExecutor,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Sink that turns Danube batches into broker loads
pub struct BrokerLoadSink {
    config: BrokerLoadSinkConfig,
    fs: Arc<dyn StagingFileSystem>,
    executor: Arc<dyn LoadExecutor>,
    mysql: Option<MySqlLoadExecutor>,
    batches_loaded: u64,
    batches_retained: u64,
}

impl BrokerLoadSink {
    /// Connect to the staging location and the database frontend
    pub async fn connect(config: BrokerLoadSinkConfig) -> ConnectorResult<Self> {
        config.validate()?;

        let fs = staging::connect(&config.load.staging_dir, &config.load.storage_options).await?;
        let mysql = MySqlLoadExecutor::connect(&config.database).await?;

        info!(
            "Broker load sink ready: {}.{} via broker {}, staging at {}",
            config.load.database, config.load.table, config.load.broker, config.load.staging_dir
        );

        let mut sink = Self::with_backends(config, fs, Arc::new(mysql.clone()));
        sink.mysql = Some(mysql);
        Ok(sink)
    }

    /// Build a sink on top of existing staging and database clients
    pub fn with_backends(
        config: BrokerLoadSinkConfig,
        fs: Arc<dyn StagingFileSystem>,
        executor: Arc<dyn LoadExecutor>,
    ) -> Self {
        Self {
            config,
            fs,
            executor,
            mysql: None,
            batches_loaded: 0,
            batches_retained: 0,
        }
    }

    /// Label for the next batch: `<prefix>_<table>_<UTC timestamp>_<uuid>`
    pub fn next_label(&self) -> ConnectorResult<LoadLabel> {
        LoadLabel::new(format!(
            "{}_{}_{}_{}",
            self.config.core.label_prefix,
            self.config.load.table,
            Utc::now().format("%Y%m%d%H%M%S"),
            Uuid::new_v4().simple()
        ))
    }

    /// Stage and load one batch.
    ///
    /// Returns `Ok(None)` when no record of the batch could be encoded.
    /// A retained batch (timeouts exhausted) is reported through the returned
    /// state, not as an error.
    pub async fn write_batch(&mut self, records: &[SinkRecord]) -> ConnectorResult<Option<LoadReport>> {
        let lines: Vec<_> = records
            .iter()
            .filter_map(|record| match record.to_line(&self.config.core.line_delimiter) {
                Ok(line) => Some(line),
                Err(e) => {
                    warn!("Skipping record {}: {}", record.message_id(), e);
                    None
                }
            })
            .collect();

        if lines.is_empty() {
            debug!("Nothing to stage for batch of {} records", records.len());
            return Ok(None);
        }

        let label = self.next_label()?;
        let mut loader =
            BatchFileLoader::open_with(&self.config.load, label, Arc::clone(&self.fs)).await?;

        let report = match self.stage_and_load(&mut loader, &lines).await {
            Ok(report) => report,
            Err(e) => {
                error!("Batch {} failed: {}", loader.label(), e);
                if let Err(shutdown_err) = loader.shutdown().await {
                    warn!("Failed to release loader after error: {}", shutdown_err);
                }
                return Err(e);
            }
        };

        if let Err(e) = loader.cleanup().await {
            // the data is loaded; only the staging file is left behind
            error!("Load {} succeeded but cleanup failed: {}", report.label, e);
        }
        loader.shutdown().await?;

        match report.state {
            LoadState::Loaded => self.batches_loaded += 1,
            LoadState::RetainedForRecovery => {
                self.batches_retained += 1;
                error!(
                    "Batch {} was not loaded; recover it from {}",
                    report.label, report.staging_uri
                );
            }
            _ => {}
        }

        Ok(Some(report))
    }

    async fn stage_and_load(
        &self,
        loader: &mut BatchFileLoader,
        lines: &[std::borrow::Cow<'_, str>],
    ) -> ConnectorResult<LoadReport> {
        for line in lines {
            loader.write_record(line).await?;
        }
        loader.finalize_and_load(self.executor.as_ref()).await
    }

    pub fn config(&self) -> &BrokerLoadSinkConfig {
        &self.config
    }

    /// Release the database pool and the staging client
    pub async fn shutdown(&mut self) -> ConnectorResult<()> {
        info!(
            "Shutting down Broker Load Sink ({} batches loaded, {} retained)",
            self.batches_loaded, self.batches_retained
        );

        if let Some(mysql) = self.mysql.take() {
            mysql.close().await;
        }

        self.fs.close().await.map_err(|e| {
            broker_load_core::ConnectorError::staging_io("release", &self.config.load.staging_dir, e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::record;
    use async_trait::async_trait;
    use broker_load_core::staging::ObjectStoreFileSystem;
    use broker_load_core::{ConnectorError, LoadOutcome, MAX_LABEL_LEN};
    use object_store::memory::InMemory;
    use object_store::path::Path;
    use object_store::ObjectStore;
    use std::sync::Mutex;

    /// Answers every statement the same way, keeping what it was sent
    #[derive(Default)]
    struct RecordingExecutor {
        commands: Mutex<Vec<String>>,
        reject: bool,
        time_out: bool,
    }

    #[async_trait]
    impl LoadExecutor for RecordingExecutor {
        async fn execute(&self, command: &str) -> LoadOutcome {
            self.commands.lock().unwrap().push(command.to_string());
            if self.reject {
                LoadOutcome::Fatal(ConnectorError::fatal("Access denied for user"))
            } else if self.time_out {
                LoadOutcome::Timeout("Lock wait timeout exceeded".to_string())
            } else {
                LoadOutcome::Success
            }
        }
    }

    fn config() -> BrokerLoadSinkConfig {
        BrokerLoadSinkConfig::from_toml(
            r#"
            danube_service_url = "http://localhost:6650"
            connector_name = "orders-loader"
            topic = "/default/orders"
            subscription = "orders-sub"
            label_prefix = "test"

            [load]
            staging_dir = "memory:///staging"
            load_options = "COLUMNS TERMINATED BY \",\""
            credentials = "hdfs,secret"
            broker = "hdfs_broker"
            database = "sales"
            table = "orders"
            retry_backoff_ms = 0

            [database]
            url = "mysql://root@localhost:9030/sales"
            "#,
        )
        .unwrap()
    }

    fn sink(executor: Arc<RecordingExecutor>) -> (Arc<InMemory>, BrokerLoadSink) {
        let store = Arc::new(InMemory::new());
        let fs = Arc::new(ObjectStoreFileSystem::new(
            store.clone(),
            Path::from("staging"),
            "memory:///staging",
        ));
        (store, BrokerLoadSink::with_backends(config(), fs, executor))
    }

    #[test]
    fn test_labels_are_unique_and_valid() {
        let (_, sink) = sink(Arc::new(RecordingExecutor::default()));
        let a = sink.next_label().unwrap();
        let b = sink.next_label().unwrap();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("test_orders_"));
    }

    #[tokio::test]
    async fn test_batch_is_loaded_and_staging_removed() {
        let executor = Arc::new(RecordingExecutor::default());
        let (store, mut sink) = sink(executor.clone());

        let records = vec![
            record(1, b"1,apple"),
            record(2, &[0xff, 0xfe]),
            record(3, b"3,plum\n"),
        ];
        let report = sink.write_batch(&records).await.unwrap().unwrap();

        assert_eq!(report.state, LoadState::Loaded);
        assert_eq!(report.records_written, 2);
        assert_eq!(report.bytes_written, "1,apple\n3,plum\n".len() as u64);

        let commands = executor.commands.lock().unwrap().clone();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].contains(&format!(
            "LOAD LABEL sales.{} (DATA INFILE(\"memory:///staging/{}\")",
            report.label, report.label
        )));

        let staged = store
            .head(&Path::from(format!("staging/{}", report.label)))
            .await;
        assert!(staged.is_err());
    }

    #[tokio::test]
    async fn test_rejected_load_keeps_staging_file() {
        let executor = Arc::new(RecordingExecutor {
            reject: true,
            ..Default::default()
        });
        let (store, mut sink) = sink(executor);

        let err = sink.write_batch(&[record(1, b"1,apple")]).await.unwrap_err();
        assert!(err.is_load());

        let listed = store
            .list_with_delimiter(Some(&Path::from("staging")))
            .await
            .unwrap();
        assert_eq!(listed.objects.len(), 1);
    }

    #[tokio::test]
    async fn test_timed_out_batch_is_retained() {
        let executor = Arc::new(RecordingExecutor {
            time_out: true,
            ..Default::default()
        });
        let (store, mut sink) = sink(executor.clone());

        let report = sink
            .write_batch(&[record(1, b"1,apple"), record(2, b"2,pear")])
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.state, LoadState::RetainedForRecovery);
        assert_eq!(report.attempts, 3);
        assert_eq!(report.timeouts, 3);
        assert_eq!(executor.commands.lock().unwrap().len(), 3);
        assert_eq!(sink.batches_retained, 1);
        assert_eq!(sink.batches_loaded, 0);

        let retained = store
            .get(&Path::from(format!("staging/{}", report.label)))
            .await
            .unwrap();
        assert_eq!(&retained.bytes().await.unwrap()[..], b"1,apple\n2,pear\n");
    }

    #[test]
    fn test_longest_allowed_label() {
        let mut config = config();
        config.core.label_prefix = "p".repeat(30);
        config.load.table = "t".repeat(49);
        assert!(config.validate().is_ok());

        let fs = Arc::new(ObjectStoreFileSystem::new(
            Arc::new(InMemory::new()),
            Path::from("staging"),
            "memory:///staging",
        ));
        let sink = BrokerLoadSink::with_backends(config, fs, Arc::new(RecordingExecutor::default()));
        assert_eq!(sink.next_label().unwrap().as_str().len(), MAX_LABEL_LEN);
    }

    #[tokio::test]
    async fn test_undecodable_batch_is_skipped() {
        let executor = Arc::new(RecordingExecutor::default());
        let (_, mut sink) = sink(executor.clone());

        let report = sink.write_batch(&[record(1, &[0xc3, 0x28])]).await.unwrap();
        assert!(report.is_none());
        assert!(executor.commands.lock().unwrap().is_empty());
        sink.shutdown().await.unwrap();
    }
}
