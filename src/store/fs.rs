//! Filesystem-backed object store.
//!
//! Object keys map directly to paths under a root directory. This is
//! the only store implementation; an S3-backed one would slot in behind
//! the same trait.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::ObjectStore;

pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Recursively walk `dir`, pushing relative keys onto `out`
    fn walk<'a>(
        &'a self,
        dir: PathBuf,
        out: &'a mut Vec<String>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .with_context(|| format!("failed to read directory {}", dir.display()))?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    self.walk(path, out).await?;
                } else {
                    let rel = path
                        .strip_prefix(&self.root)
                        .context("entry escaped store root")?;
                    out.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
            Ok(())
        })
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, key: &str) -> Result<String> {
        let path = self.resolve(key);
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read object {}", key))
    }

    async fn put(&self, key: &str, body: &str) -> Result<()> {
        let path = self.resolve(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create parent for {}", key))?;
        }
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("failed to write object {}", key))?;
        debug!(key, bytes = body.len(), "stored object");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key);
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("failed to delete object {}", key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // A prefix is a path fragment, not necessarily a directory:
        // "input/case-" must match files under input/ starting case-.
        let dir = match prefix.rsplit_once('/') {
            Some((dir, _)) => self.root.join(dir),
            None => self.root.clone(),
        };

        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        self.walk(dir, &mut keys).await?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    /// Same-filesystem rename; atomic where the default copy-then-delete
    /// is not
    async fn move_object(&self, src: &str, dst: &str) -> Result<()> {
        let to = self.resolve(dst);
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create parent for {}", dst))?;
        }
        tokio::fs::rename(self.resolve(src), &to)
            .await
            .with_context(|| format!("failed to move {} to {}", src, dst))
    }
}
