//! Test helpers for job manager integration tests.
//!
//! Provides an in-memory cluster, recording result stores, and a harness
//! wiring them into a [`JobManager`].

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hpcrag_core::{
    ChunkEntity, Error, ExecOutput, GraphStore, JobRecord, RemoteTransport, Result, VectorStore,
};
use hpcrag_jobs::{JobManager, JobsConfig};
use hpcrag_remote::{RemoteLayout, SessionPool};
use tempfile::TempDir;

pub const WORK_DIR: &str = "/scratch/project_2001/hpcrag";

/// Embedding width used by [`test_config`].
pub const DIMENSION: usize = 4;

pub const SUBMIT_LIMIT_STDERR: &str = "sbatch: error: AssocMaxSubmitJobLimit\n\
    sbatch: error: Batch job submission failed: Job violates accounting/QOS policy \
    (job submit limit, user's size and/or time limits)\n";

// =============================================================================
// MOCK CLUSTER
// =============================================================================

#[derive(Default)]
struct ClusterState {
    sbatch: VecDeque<ExecOutput>,
    squeue: VecDeque<ExecOutput>,
    queue_depth: usize,
    files: HashMap<String, Vec<u8>>,
    commands: Vec<String>,
    offline: bool,
    next_job_id: u64,
}

/// In-memory stand-in for a Slurm login node.
///
/// `sbatch` answers from a scripted queue, falling back to accepting jobs
/// with ids counting up from 777. `squeue -j` answers from a scripted queue
/// and reports the job gone once it runs dry. Files live in a map.
pub struct MockCluster {
    state: Mutex<ClusterState>,
}

impl MockCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ClusterState {
                next_job_id: 777,
                ..Default::default()
            }),
        })
    }

    pub fn push_sbatch(&self, output: ExecOutput) {
        self.state.lock().unwrap().sbatch.push_back(output);
    }

    pub fn push_throttled(&self, times: usize) {
        for _ in 0..times {
            self.push_sbatch(ExecOutput::failure(SUBMIT_LIMIT_STDERR, 1));
        }
    }

    /// Queue `squeue -o %T` answers, one per poll.
    pub fn push_states(&self, states: &[&str]) {
        let mut state = self.state.lock().unwrap();
        for s in states {
            state.squeue.push_back(ExecOutput::success(format!("{}\n", s)));
        }
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.state.lock().unwrap().queue_depth = depth;
    }

    /// While offline every operation fails with a connection error.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    pub fn put_file(&self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.into(), bytes.into());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn file_count(&self) -> usize {
        self.state.lock().unwrap().files.len()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    /// Number of executed commands containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.commands().iter().filter(|c| c.contains(needle)).count()
    }

    fn check_online(&self) -> Result<()> {
        if self.state.lock().unwrap().offline {
            return Err(Error::Connection("mock cluster offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteTransport for MockCluster {
    async fn connect(&self) -> Result<()> {
        self.check_online()
    }

    async fn exec(&self, command: &str) -> Result<ExecOutput> {
        let mut state = self.state.lock().unwrap();
        state.commands.push(command.to_string());
        if state.offline {
            return Err(Error::Connection("mock cluster offline".to_string()));
        }

        let output = if command.contains("sbatch") {
            match state.sbatch.pop_front() {
                Some(output) => output,
                None => {
                    let id = state.next_job_id;
                    state.next_job_id += 1;
                    ExecOutput::success(format!("Submitted batch job {}\n", id))
                }
            }
        } else if command.starts_with("squeue -u") {
            ExecOutput::success(format!("{}\n", state.queue_depth))
        } else if command.starts_with("squeue") {
            state.squeue.pop_front().unwrap_or_default()
        } else {
            ExecOutput::success("")
        };
        Ok(output)
    }

    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        self.check_online()?;
        let bytes = std::fs::read(local_path)?;
        self.put_file(remote_path, bytes);
        Ok(())
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        self.check_online()?;
        let bytes = self
            .file(remote_path)
            .ok_or_else(|| Error::NotFound(remote_path.to_string()))?;
        std::fs::write(local_path, bytes)?;
        Ok(())
    }

    async fn remove(&self, remote_path: &str) -> Result<()> {
        self.check_online()?;
        self.state.lock().unwrap().files.remove(remote_path);
        Ok(())
    }

    async fn ensure_dir(&self, _remote_path: &str) -> Result<()> {
        self.check_online()
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// =============================================================================
// RECORDING STORES
// =============================================================================

#[derive(Default)]
pub struct RecordingVectorStore {
    inserts: Mutex<Vec<Vec<ChunkEntity>>>,
    flushes: AtomicUsize,
    fail: AtomicBool,
}

impl RecordingVectorStore {
    pub fn failing() -> Self {
        let store = Self::default();
        store.fail.store(true, Ordering::SeqCst);
        store
    }

    pub fn insert_calls(&self) -> usize {
        self.inserts.lock().unwrap().len()
    }

    pub fn entities(&self) -> Vec<ChunkEntity> {
        self.inserts.lock().unwrap().iter().flatten().cloned().collect()
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorStore for RecordingVectorStore {
    async fn insert(&self, entities: Vec<ChunkEntity>) -> Result<usize> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Store("vector index unavailable".to_string()));
        }
        let count = entities.len();
        self.inserts.lock().unwrap().push(entities);
        Ok(count)
    }

    async fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedChunk {
    pub document_id: String,
    pub text: String,
    pub subject_name: String,
    pub chunk_index: usize,
}

#[derive(Default)]
pub struct RecordingGraphStore {
    subjects: Mutex<Vec<(String, u32)>>,
    chunks: Mutex<Vec<MergedChunk>>,
    fail: AtomicBool,
}

impl RecordingGraphStore {
    pub fn failing() -> Self {
        let store = Self::default();
        store.fail.store(true, Ordering::SeqCst);
        store
    }

    pub fn subjects(&self) -> Vec<(String, u32)> {
        self.subjects.lock().unwrap().clone()
    }

    pub fn chunks(&self) -> Vec<MergedChunk> {
        self.chunks.lock().unwrap().clone()
    }
}

#[async_trait]
impl GraphStore for RecordingGraphStore {
    async fn upsert_subject(&self, name: &str, age: u32) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Store("graph database unavailable".to_string()));
        }
        self.subjects.lock().unwrap().push((name.to_string(), age));
        Ok(())
    }

    async fn merge_document_chunk(
        &self,
        document_id: &str,
        text: &str,
        subject_name: &str,
        chunk_index: usize,
    ) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Store("graph database unavailable".to_string()));
        }
        self.chunks.lock().unwrap().push(MergedChunk {
            document_id: document_id.to_string(),
            text: text.to_string(),
            subject_name: subject_name.to_string(),
            chunk_index,
        });
        Ok(())
    }
}

// =============================================================================
// HARNESS
// =============================================================================

/// Small embeddings, fast polling, short backoff.
pub fn test_config() -> JobsConfig {
    JobsConfig::default()
        .with_embed_dimension(DIMENSION)
        .with_poll_interval(10)
        .with_submit_retries(3, 100)
        .with_queue_ceiling(50, 1_000)
}

pub struct Harness {
    pub cluster: Arc<MockCluster>,
    pub vectors: Arc<RecordingVectorStore>,
    pub graph: Arc<RecordingGraphStore>,
    pub manager: JobManager,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: JobsConfig) -> Self {
        Self::with_stores(
            config,
            RecordingVectorStore::default(),
            RecordingGraphStore::default(),
        )
    }

    pub fn with_stores(
        config: JobsConfig,
        vectors: RecordingVectorStore,
        graph: RecordingGraphStore,
    ) -> Self {
        let cluster = MockCluster::new();
        let vectors = Arc::new(vectors);
        let graph = Arc::new(graph);
        let manager = JobManager::builder(
            SessionPool::single(cluster.clone()),
            WORK_DIR,
            vectors.clone(),
            graph.clone(),
        )
        .with_config(config)
        .build();

        Self {
            cluster,
            vectors,
            graph,
            manager,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    /// Write a local document named `name`.
    pub fn document(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, b"PK\x03\x04 fake docx body").unwrap();
        path
    }

    /// Place the artifacts an embedding worker would write for `record`.
    pub fn complete_embedding(
        &self,
        record: &JobRecord,
        embeddings: Vec<Vec<f32>>,
        texts: &[&str],
    ) {
        let paths = layout().artifacts(record.kind, &record.input_ref[0]).all();
        self.cluster.put_file(
            paths[0].clone(),
            serde_json::to_vec(&serde_json::json!({ "embeddings": embeddings })).unwrap(),
        );
        self.cluster.put_file(
            paths[1].clone(),
            serde_json::to_vec(&serde_json::json!({ "texts": texts })).unwrap(),
        );
    }

    /// Place the artifact a generation worker would write for `record`.
    pub fn complete_generation(&self, record: &JobRecord, response: &str) {
        let paths = layout().artifacts(record.kind, &record.input_ref[0]).all();
        self.cluster.put_file(
            paths[0].clone(),
            serde_json::to_vec(&serde_json::json!({ "response": response })).unwrap(),
        );
    }
}

pub fn layout() -> RemoteLayout {
    RemoteLayout::new(WORK_DIR)
}

/// `count` embeddings of width `width`, each row filled with its index.
pub fn embeddings(count: usize, width: usize) -> Vec<Vec<f32>> {
    (0..count).map(|i| vec![i as f32 * 0.1; width]).collect()
}
