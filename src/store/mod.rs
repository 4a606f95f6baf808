//! Object store interface shared by every pipeline component.
//!
//! Data flows through five areas of a single store: input (staged work
//! items), batches (batch-scoped staging), output (raw model output),
//! report (validated results and summaries), and archive (processed raw
//! output kept for audit). Keys are `area/rest` paths.

pub mod fs;

use anyhow::Result;
use async_trait::async_trait;

pub use fs::FsObjectStore;

/// Storage areas the pipeline moves data through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Area {
    /// Staged work items awaiting dispatch
    Input,

    /// Batch-scoped staging for submitted work items
    Batches,

    /// Raw model output, one object per work item
    Output,

    /// Validated per-item results and run summaries
    Report,

    /// Processed raw output retained for audit
    Archive,

    /// Category descriptions and worked examples for prompt building
    Categories,
}

impl Area {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Batches => "batches",
            Self::Output => "output",
            Self::Report => "report",
            Self::Archive => "archive",
            Self::Categories => "categories",
        }
    }

    /// Build a full object key within this area
    pub fn key(&self, rest: &str) -> String {
        format!("{}/{}", self.prefix(), rest)
    }
}

/// Minimal object-store contract.
///
/// No transactional semantics are assumed. In particular `move_object`
/// is copy-then-delete and is NOT atomic: a crash between the copy and
/// the delete can leave the object present at both keys.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read an object as UTF-8 text
    async fn get(&self, key: &str) -> Result<String>;

    /// Write (or overwrite) an object
    async fn put(&self, key: &str, body: &str) -> Result<()>;

    /// Delete an object; deleting a missing object is an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// List object keys under a prefix, recursively, in sorted order
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Copy-then-delete relocation (not atomic)
    async fn move_object(&self, src: &str, dst: &str) -> Result<()> {
        let body = self.get(src).await?;
        self.put(dst, &body).await?;
        self.delete(src).await
    }
}
