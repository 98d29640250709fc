//! End-to-end batch lifecycle against an in-memory staging store and a
//! scripted database frontend.

use async_trait::async_trait;
use broker_load_core::staging::ObjectStoreFileSystem;
use broker_load_core::{
    BatchFileLoader, ConnectorError, LoadConfig, LoadExecutor, LoadLabel, LoadOutcome, LoadState,
    StagingFileSystem,
};
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::ObjectStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

/// Times out a fixed number of times, then accepts
struct FlakyFrontend {
    timeouts_left: AtomicU32,
    calls: AtomicU32,
}

impl FlakyFrontend {
    fn new(timeouts: u32) -> Self {
        Self {
            timeouts_left: AtomicU32::new(timeouts),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl LoadExecutor for FlakyFrontend {
    async fn execute(&self, command: &str) -> LoadOutcome {
        assert!(command.starts_with("LOAD LABEL sales.batch42 "));
        self.calls.fetch_add(1, Ordering::SeqCst);

        let left = self.timeouts_left.load(Ordering::SeqCst);
        if left > 0 {
            self.timeouts_left.store(left - 1, Ordering::SeqCst);
            return LoadOutcome::Timeout("Lock wait timeout exceeded".to_string());
        }
        LoadOutcome::Success
    }
}

fn properties() -> HashMap<String, String> {
    [
        ("staging_dir", "s3://warehouse/staging"),
        ("load_options", "COLUMNS TERMINATED BY \",\" (id, item, qty)"),
        ("credentials", "loader,secret"),
        ("broker", "s3_broker"),
        ("database", "sales"),
        ("table", "orders"),
        ("max_retries", "3"),
        ("retry_backoff_ms", "2000"),
        ("max_filter_ratio", "0.5"),
        ("negative", "true"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn staging(store: Arc<InMemory>) -> Arc<dyn StagingFileSystem> {
    Arc::new(ObjectStoreFileSystem::new(
        store,
        Path::from("staging"),
        "s3://warehouse/staging",
    ))
}

#[tokio::test(start_paused = true)]
async fn batch_loads_after_two_timeouts() {
    let config = assert_ok!(LoadConfig::from_properties(&properties()));
    let store = Arc::new(InMemory::new());
    let fs = staging(store.clone());

    let label = assert_ok!(LoadLabel::new("batch42"));
    let mut loader = assert_ok!(BatchFileLoader::open_with(&config, label, fs.clone()).await);
    assert_eq!(loader.staging_uri(), "s3://warehouse/staging/batch42");

    let mut bytes = 0;
    for row in ["1,apple,3\n", "2,pear,5\n", "3,plum,8\n"] {
        bytes += assert_ok!(loader.write_record(row).await);
    }
    assert_eq!(bytes, 28);

    let frontend = FlakyFrontend::new(2);
    let started = tokio::time::Instant::now();
    let report = assert_ok!(loader.finalize_and_load(&frontend).await);

    assert_eq!(report.state, LoadState::Loaded);
    assert_eq!(report.attempts, 3);
    assert_eq!(report.timeouts, 2);
    assert_eq!(report.backoff_waits, 2);
    assert_eq!(report.bytes_written, 28);
    assert_eq!(frontend.calls.load(Ordering::SeqCst), 3);
    assert_eq!(started.elapsed(), Duration::from_secs(4));

    // the staged object held exactly the written rows until cleanup
    let staged = assert_ok!(store.get(&Path::from("staging/batch42")).await);
    assert_eq!(
        &assert_ok!(staged.bytes().await)[..],
        b"1,apple,3\n2,pear,5\n3,plum,8\n"
    );

    assert_ok!(loader.cleanup().await);
    assert!(!assert_ok!(fs.exists("batch42").await));
    assert_ok!(loader.shutdown().await);
}

#[tokio::test(start_paused = true)]
async fn batch_is_retained_when_frontend_keeps_timing_out() {
    let config = assert_ok!(LoadConfig::from_properties(&properties()));
    let fs = staging(Arc::new(InMemory::new()));

    let mut loader = assert_ok!(
        BatchFileLoader::open_with(&config, assert_ok!(LoadLabel::new("batch42")), fs.clone())
            .await
    );
    assert_ok!(loader.write_record("1,apple,3\n").await);

    let frontend = FlakyFrontend::new(u32::MAX);
    let report = assert_ok!(loader.finalize_and_load(&frontend).await);

    assert_eq!(report.state, LoadState::RetainedForRecovery);
    assert_eq!(report.attempts, 3);
    assert_eq!(report.backoff_waits, 2);

    assert_ok!(loader.cleanup().await);
    assert!(assert_ok!(fs.exists("batch42").await));
}

#[tokio::test]
async fn missing_required_option_is_a_configuration_error() {
    let mut props = properties();
    props.remove("credentials");

    let err = assert_err!(LoadConfig::from_properties(&props));
    assert!(matches!(err, ConnectorError::Configuration(_)));
}
