//! Collaborator traits.
//!
//! The orchestrator talks to the cluster and to both result stores only
//! through these traits, so each can be swapped for a test double.

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::ChunkEntity;

// =============================================================================
// REMOTE TRANSPORT
// =============================================================================

/// Captured output of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

impl ExecOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_status: 0,
        }
    }

    pub fn failure(stderr: impl Into<String>, exit_status: i32) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_status,
        }
    }

    /// Trimmed standard output.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Trimmed standard error.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// An authenticated remote-shell and file-transfer session.
///
/// Implementations are not assumed safe for concurrent use; callers obtain
/// exclusive access through a session checkout.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Establish the session. Idempotent.
    ///
    /// Fails with `Error::Connection` on authentication or network failure.
    async fn connect(&self) -> Result<()>;

    /// Run a shell command on the remote host.
    async fn exec(&self, command: &str) -> Result<ExecOutput>;

    /// Copy a local file to the remote host.
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()>;

    /// Copy a remote file to the local host.
    ///
    /// Fails with `Error::NotFound` when the remote file does not exist.
    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<()>;

    /// Delete a remote file. Missing files are not an error.
    async fn remove(&self, remote_path: &str) -> Result<()>;

    /// Create a remote directory (and parents) if it does not exist.
    async fn ensure_dir(&self, remote_path: &str) -> Result<()>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

// =============================================================================
// RESULT STORES
// =============================================================================

/// Vector index receiving embedded chunks.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert a batch of entities, returning the number accepted.
    async fn insert(&self, entities: Vec<ChunkEntity>) -> Result<usize>;

    /// Make previously inserted entities durable and searchable.
    async fn flush(&self) -> Result<()>;
}

/// Graph store holding subject and document-chunk nodes.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create or update a subject node, keyed by name.
    async fn upsert_subject(&self, name: &str, age: u32) -> Result<()>;

    /// Merge a chunk node, link it to its subject and to the chunk with
    /// `chunk_index - 1` of the same document.
    async fn merge_document_chunk(
        &self,
        document_id: &str,
        text: &str,
        subject_name: &str,
        chunk_index: usize,
    ) -> Result<()>;
}
