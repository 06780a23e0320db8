//! Newline-delimited JSON spool stores.
//!
//! Local stand-ins for the vector index and the graph database. Every write
//! becomes one JSON line in a file under the spool directory, to be loaded
//! into the real stores by a separate process.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use hpcrag_core::{ChunkEntity, Error, GraphStore, Result, VectorStore};

async fn append_lines(path: &Path, lines: &[String]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let mut buf = String::new();
    for line in lines {
        buf.push_str(line);
        buf.push('\n');
    }
    file.write_all(buf.as_bytes()).await?;
    file.sync_data().await?;
    Ok(())
}

/// Buffers inserted entities and appends them to `vectors.jsonl` on flush.
pub struct JsonlVectorStore {
    path: PathBuf,
    pending: Mutex<Vec<ChunkEntity>>,
}

impl JsonlVectorStore {
    pub fn new(spool_dir: &Path) -> Self {
        Self {
            path: spool_dir.join("vectors.jsonl"),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl VectorStore for JsonlVectorStore {
    async fn insert(&self, entities: Vec<ChunkEntity>) -> Result<usize> {
        let count = entities.len();
        self.pending.lock().await.extend(entities);
        Ok(count)
    }

    async fn flush(&self) -> Result<()> {
        let mut pending = self.pending.lock().await;
        if pending.is_empty() {
            return Ok(());
        }
        let lines = pending
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        append_lines(&self.path, &lines)
            .await
            .map_err(|e| Error::Store(format!("vector spool {}: {}", self.path.display(), e)))?;
        debug!(entities = lines.len(), path = %self.path.display(), "Flushed vector spool");
        pending.clear();
        Ok(())
    }
}

/// One graph mutation as written to `graph.jsonl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GraphRecord {
    UpsertSubject {
        name: String,
        age: u32,
    },
    MergeChunk {
        document_id: String,
        text: String,
        subject_name: String,
        chunk_index: usize,
    },
}

/// Appends graph mutations to `graph.jsonl` as they happen.
pub struct JsonlGraphStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlGraphStore {
    pub fn new(spool_dir: &Path) -> Self {
        Self {
            path: spool_dir.join("graph.jsonl"),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, record: &GraphRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let _guard = self.write_lock.lock().await;
        append_lines(&self.path, &[line])
            .await
            .map_err(|e| Error::Store(format!("graph spool {}: {}", self.path.display(), e)))
    }
}

#[async_trait]
impl GraphStore for JsonlGraphStore {
    async fn upsert_subject(&self, name: &str, age: u32) -> Result<()> {
        self.append(&GraphRecord::UpsertSubject {
            name: name.to_string(),
            age,
        })
        .await
    }

    async fn merge_document_chunk(
        &self,
        document_id: &str,
        text: &str,
        subject_name: &str,
        chunk_index: usize,
    ) -> Result<()> {
        self.append(&GraphRecord::MergeChunk {
            document_id: document_id.to_string(),
            text: text.to_string(),
            subject_name: subject_name.to_string(),
            chunk_index,
        })
        .await
    }
}
