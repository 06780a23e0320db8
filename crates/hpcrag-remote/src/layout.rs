//! Remote file naming.
//!
//! Output artifacts are correlated with their job purely by file name: the
//! remote worker derives them from the stem of the input it was handed.

use hpcrag_core::{DocumentMetadata, JobKind};
use uuid::Uuid;

/// Deterministic paths inside the remote working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    work_dir: String,
}

/// Output files the worker is expected to write for one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactPaths {
    Embedding { embeddings: String, texts: String },
    Generation { response: String },
}

impl ArtifactPaths {
    pub fn all(&self) -> Vec<String> {
        match self {
            Self::Embedding { embeddings, texts } => vec![embeddings.clone(), texts.clone()],
            Self::Generation { response } => vec![response.clone()],
        }
    }
}

impl RemoteLayout {
    pub fn new(work_dir: impl Into<String>) -> Self {
        let work_dir = work_dir.into();
        let trimmed = work_dir.trim_end_matches('/');
        let work_dir = if trimmed.is_empty() {
            "/".to_string()
        } else {
            trimmed.to_string()
        };
        Self { work_dir }
    }

    pub fn work_dir(&self) -> &str {
        &self.work_dir
    }

    fn join(&self, name: &str) -> String {
        if self.work_dir == "/" {
            format!("/{}", name)
        } else {
            format!("{}/{}", self.work_dir, name)
        }
    }

    /// `<work_dir>/<document_id>_<filename>`
    pub fn embedding_input(&self, metadata: &DocumentMetadata, filename: &str) -> String {
        self.join(&format!("{}_{}", metadata.document_id, filename))
    }

    /// `<work_dir>/llm_input_<job_id>.json`
    pub fn generation_input(&self, job_id: Uuid) -> String {
        self.join(&format!("llm_input_{}.json", job_id))
    }

    /// `<work_dir>/job_<job_id>.sh`
    pub fn script(&self, job_id: Uuid) -> String {
        self.join(&format!("job_{}.sh", job_id))
    }

    /// Artifacts the worker of `kind` writes for `remote_input_path`.
    pub fn artifacts(&self, kind: JobKind, remote_input_path: &str) -> ArtifactPaths {
        let stem = input_stem(remote_input_path);
        match kind {
            JobKind::Embedding => ArtifactPaths::Embedding {
                embeddings: self.join(&format!("embeddings_{}.json", stem)),
                texts: self.join(&format!("texts_{}.json", stem)),
            },
            JobKind::Generation => ArtifactPaths::Generation {
                response: self.join(&format!("response_{}.json", stem)),
            },
        }
    }
}

/// File name of `path` without directory and without its last extension.
pub fn input_stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(dot) => &name[..dot],
    }
}
