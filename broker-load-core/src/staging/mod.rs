//! Staging filesystems.
//!
//! A staging filesystem is rooted at the configured staging directory and
//! addresses files by name (the load label). Two backends exist:
//!
//! - [`LocalFileSystem`]: a local or network-mounted directory, written with
//!   `tokio::fs` and synced with `fsync`
//! - [`ObjectStoreFileSystem`]: any `object_store` URL (`s3://`, `gs://`,
//!   `az://`, `memory://`)
//!
//! The URI returned by [`StagingFileSystem::qualify`] is what the database
//! broker is told to read, so it always carries scheme, authority and path.

mod local;
mod object;

pub use local::LocalFileSystem;
pub use object::ObjectStoreFileSystem;

use crate::{ConnectorError, ConnectorResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use tracing::info;
use url::Url;

/// Client of the filesystem that holds staging files
#[async_trait]
pub trait StagingFileSystem: Send + Sync {
    /// Absolute URI of `name` as seen by readers of the filesystem
    fn qualify(&self, name: &str) -> String;

    async fn exists(&self, name: &str) -> io::Result<bool>;

    async fn delete(&self, name: &str) -> io::Result<()>;

    /// Open a new file for writing, truncating anything already there
    async fn create(&self, name: &str) -> io::Result<Box<dyn StagingWriter>>;

    /// Release client-side resources. Files already closed stay untouched.
    ///
    /// Backends that hold no client state (local directories, `object_store`
    /// handles released on drop) return immediately; calling it more than
    /// once is allowed.
    async fn close(&self) -> io::Result<()>;
}

/// Write handle on a single staging file
#[async_trait]
pub trait StagingWriter: Send {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Push buffered bytes down to the filesystem client
    async fn flush(&mut self) -> io::Result<()>;

    /// Make flushed bytes durable and visible to other readers
    async fn sync(&mut self) -> io::Result<()>;

    /// Finish the file. No writes are accepted afterwards.
    async fn close(&mut self) -> io::Result<()>;

    /// Drop the handle after a failure without publishing anything more
    async fn abort(&mut self) -> io::Result<()> {
        self.close().await
    }
}

/// Open the staging filesystem for `staging_dir`.
///
/// Plain paths and `file://` URLs map to [`LocalFileSystem`], every other
/// scheme is handed to `object_store`.
pub async fn connect(
    staging_dir: &str,
    storage_options: &HashMap<String, String>,
) -> ConnectorResult<Arc<dyn StagingFileSystem>> {
    match Url::parse(staging_dir) {
        Ok(url) if url.scheme() == "file" => {
            let path = url.to_file_path().map_err(|_| {
                ConnectorError::config(format!("invalid file URL '{}'", staging_dir))
            })?;
            let fs = LocalFileSystem::new(path).await?;
            info!("Using local staging directory {}", fs.root().display());
            Ok(Arc::new(fs))
        }
        // single letter schemes are Windows drive letters
        Ok(url) if url.scheme().len() > 1 => {
            let fs = ObjectStoreFileSystem::from_url(&url, storage_options)?;
            info!("Using object store staging location {}", url);
            Ok(Arc::new(fs))
        }
        _ => {
            let fs = LocalFileSystem::new(staging_dir).await?;
            info!("Using local staging directory {}", fs.root().display());
            Ok(Arc::new(fs))
        }
    }
}
