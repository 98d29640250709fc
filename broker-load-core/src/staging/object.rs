//! Staging on an object store.

use super::{StagingFileSystem, StagingWriter};
use crate::{ConnectorError, ConnectorResult};
use async_trait::async_trait;
use object_store::buffered::BufWriter;
use object_store::path::Path;
use object_store::ObjectStore;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use url::Url;

/// Staging location on S3, GCS, Azure Blob Storage or an in-memory store.
///
/// Objects only become visible once their writer is closed, so `sync` is a
/// flush of buffered parts and `close` is the publishing step.
#[derive(Debug, Clone)]
pub struct ObjectStoreFileSystem {
    store: Arc<dyn ObjectStore>,
    prefix: Path,
    base_uri: String,
}

impl ObjectStoreFileSystem {
    pub fn from_url(url: &Url, storage_options: &HashMap<String, String>) -> ConnectorResult<Self> {
        let (store, prefix) = object_store::parse_url_opts(url, storage_options.iter())
            .map_err(|e| {
                ConnectorError::config(format!("unsupported staging location '{}': {}", url, e))
            })?;

        Ok(Self::new(Arc::from(store), prefix, url.as_str()))
    }

    /// Wrap an existing store; `base_uri` is the URI of `prefix` in that store
    pub fn new(store: Arc<dyn ObjectStore>, prefix: Path, base_uri: &str) -> Self {
        Self {
            store,
            prefix,
            base_uri: base_uri.trim_end_matches('/').to_string(),
        }
    }

    fn path(&self, name: &str) -> Path {
        self.prefix.child(name)
    }
}

fn to_io(err: object_store::Error) -> io::Error {
    match err {
        object_store::Error::NotFound { .. } => io::Error::new(io::ErrorKind::NotFound, err),
        other => io::Error::other(other),
    }
}

#[async_trait]
impl StagingFileSystem for ObjectStoreFileSystem {
    fn qualify(&self, name: &str) -> String {
        format!("{}/{}", self.base_uri, name)
    }

    async fn exists(&self, name: &str) -> io::Result<bool> {
        match self.store.head(&self.path(name)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(to_io(e)),
        }
    }

    async fn delete(&self, name: &str) -> io::Result<()> {
        let path = self.path(name);
        // most stores treat deleting a missing key as success
        if !self.exists(name).await? {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", path),
            ));
        }
        self.store.delete(&path).await.map_err(to_io)
    }

    async fn create(&self, name: &str) -> io::Result<Box<dyn StagingWriter>> {
        let writer = BufWriter::new(Arc::clone(&self.store), self.path(name));
        Ok(Box::new(ObjectWriter {
            inner: Some(writer),
        }))
    }

    async fn close(&self) -> io::Result<()> {
        // object_store clients are reference counted and release on drop
        Ok(())
    }
}

struct ObjectWriter {
    inner: Option<BufWriter>,
}

impl ObjectWriter {
    fn inner(&mut self) -> io::Result<&mut BufWriter> {
        self.inner
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "staging object already closed"))
    }
}

#[async_trait]
impl StagingWriter for ObjectWriter {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner()?.write_all(buf).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.inner()?.flush().await
    }

    async fn sync(&mut self) -> io::Result<()> {
        self.inner()?.flush().await
    }

    async fn close(&mut self) -> io::Result<()> {
        match self.inner.take() {
            Some(mut writer) => writer.shutdown().await,
            None => Ok(()),
        }
    }

    async fn abort(&mut self) -> io::Result<()> {
        match self.inner.take() {
            Some(mut writer) => writer.abort().await.map_err(to_io),
            None => Ok(()),
        }
    }
}
