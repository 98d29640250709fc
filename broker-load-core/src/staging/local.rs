//! Staging on a local or network-mounted directory.

use super::{StagingFileSystem, StagingWriter};
use crate::{ConnectorError, ConnectorResult};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use url::Url;

/// Staging directory on a POSIX filesystem (local disk, NFS, a FUSE mounted HDFS)
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    root: PathBuf,
}

impl LocalFileSystem {
    /// Use `root` as the staging directory, creating it when missing
    pub async fn new(root: impl AsRef<Path>) -> ConnectorResult<Self> {
        let root = std::path::absolute(root.as_ref()).map_err(|e| {
            ConnectorError::staging_io("resolve", root.as_ref().display().to_string(), e)
        })?;

        fs::create_dir_all(&root)
            .await
            .map_err(|e| ConnectorError::staging_io("create_dir", root.display().to_string(), e))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

#[async_trait]
impl StagingFileSystem for LocalFileSystem {
    fn qualify(&self, name: &str) -> String {
        let path = self.path(name);
        Url::from_file_path(&path)
            .map(String::from)
            .unwrap_or_else(|_| format!("file://{}", path.display()))
    }

    async fn exists(&self, name: &str) -> io::Result<bool> {
        fs::try_exists(self.path(name)).await
    }

    async fn delete(&self, name: &str) -> io::Result<()> {
        fs::remove_file(self.path(name)).await
    }

    async fn create(&self, name: &str) -> io::Result<Box<dyn StagingWriter>> {
        let file = File::create(self.path(name)).await?;
        Ok(Box::new(LocalWriter {
            inner: Some(BufWriter::new(file)),
        }))
    }

    async fn close(&self) -> io::Result<()> {
        // tokio::fs keeps no client state beyond open files
        Ok(())
    }
}

struct LocalWriter {
    inner: Option<BufWriter<File>>,
}

impl LocalWriter {
    fn inner(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.inner
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "staging file already closed"))
    }
}

#[async_trait]
impl StagingWriter for LocalWriter {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner()?.write_all(buf).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.inner()?.flush().await
    }

    async fn sync(&mut self) -> io::Result<()> {
        self.inner()?.get_ref().sync_all().await
    }

    async fn close(&mut self) -> io::Result<()> {
        match self.inner.take() {
            Some(mut writer) => {
                writer.shutdown().await?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn abort(&mut self) -> io::Result<()> {
        self.inner.take();
        Ok(())
    }
}
