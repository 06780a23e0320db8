//! Data models for remote jobs and their results.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::defaults;
use crate::error::Error;

// =============================================================================
// JOB TYPES
// =============================================================================

/// Status of a remote job.
///
/// Moves strictly forward: `Pending < Running < {Completed, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// True for `Completed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` respects the monotonic order.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Kind of remote work; selects the script template and result schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    Embedding,
    Generation,
}

impl JobKind {
    /// Prefix used for scheduler job names.
    pub fn job_name_prefix(&self) -> &'static str {
        match self {
            Self::Embedding => "embed",
            Self::Generation => "llm",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Embedding => write!(f, "embedding"),
            Self::Generation => write!(f, "generation"),
        }
    }
}

impl FromStr for JobKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "embedding" | "embed" => Ok(Self::Embedding),
            "generation" | "llm" => Ok(Self::Generation),
            _ => Err(Error::InvalidInput(format!("unknown job kind: {}", s))),
        }
    }
}

/// Structured identifiers parsed from an input filename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub subject_name: String,
    pub subject_age: u32,
    pub document_id: String,
}

impl DocumentMetadata {
    /// Fallback record for filenames that do not match the naming pattern.
    pub fn unknown() -> Self {
        Self {
            subject_name: defaults::UNKNOWN_SUBJECT.to_string(),
            subject_age: 0,
            document_id: Uuid::new_v4().to_string(),
        }
    }

    /// True when this record came from the fallback path.
    pub fn is_unknown(&self) -> bool {
        self.subject_name == defaults::UNKNOWN_SUBJECT && self.subject_age == 0
    }
}

/// Machine-readable cause of a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// The job left the queue but its output artifacts were not found.
    ResultMissing,
    /// Output artifacts exist but violate the payload schema.
    InvalidResult,
    /// Embedding width differs from the configured dimension.
    DimensionMismatch,
    /// Neither the vector store nor the graph store accepted the results.
    WritebackFailed,
    /// The caller abandoned the job.
    Cancelled,
    /// The job exceeded its wall-clock ceiling.
    TimedOut,
    /// The scheduler could not be queried for too many consecutive polls.
    Unreachable,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ResultMissing => "result_missing",
            Self::InvalidResult => "invalid_result",
            Self::DimensionMismatch => "dimension_mismatch",
            Self::WritebackFailed => "writeback_failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
            Self::Unreachable => "unreachable",
        };
        write!(f, "{}", s)
    }
}

/// Error recorded on a `FAILED` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub cause: FailureCause,
    pub message: String,
}

impl JobFailure {
    pub fn new(cause: FailureCause, message: impl Into<String>) -> Self {
        Self {
            cause,
            message: message.into(),
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.cause, self.message)
    }
}

/// Which of the two result stores a warning refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Vector,
    Graph,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vector => write!(f, "vector"),
            Self::Graph => write!(f, "graph"),
        }
    }
}

/// One store rejected its half of the dual write; the other succeeded.
///
/// The job stays `COMPLETED`. Callers reconcile the failed store externally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialWriteWarning {
    pub store: StoreKind,
    pub message: String,
}

/// Parsed output of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobResultData {
    Embedding {
        embeddings: Vec<Vec<f32>>,
        texts: Vec<String>,
    },
    Generation {
        response: String,
    },
}

impl JobResultData {
    /// Number of chunks (embedding) or 1 (generation).
    pub fn item_count(&self) -> usize {
        match self {
            Self::Embedding { texts, .. } => texts.len(),
            Self::Generation { .. } => 1,
        }
    }
}

/// A tracked remote job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub remote_job_id: String,
    pub status: JobStatus,
    pub kind: JobKind,
    /// Remote paths of the uploaded input artifact(s).
    pub input_ref: Vec<String>,
    /// Remote path of the uploaded submission script.
    pub script_ref: String,
    pub metadata: Option<DocumentMetadata>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResultData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<PartialWriteWarning>,
}

impl JobRecord {
    /// Create a freshly submitted `PENDING` record.
    pub fn pending(
        job_id: Uuid,
        remote_job_id: impl Into<String>,
        kind: JobKind,
        input_ref: Vec<String>,
        script_ref: impl Into<String>,
        metadata: Option<DocumentMetadata>,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            remote_job_id: remote_job_id.into(),
            status: JobStatus::Pending,
            kind,
            input_ref,
            script_ref: script_ref.into(),
            metadata,
            submitted_at: now,
            updated_at: now,
            result: None,
            error: None,
            warning: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// =============================================================================
// PAYLOAD SCHEMAS
// =============================================================================

/// Sampling parameters for a generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: defaults::GEN_MAX_TOKENS,
            temperature: defaults::GEN_TEMPERATURE,
            top_p: defaults::GEN_TOP_P,
        }
    }
}

/// Input payload uploaded for a generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub query: String,
    pub context: String,
    #[serde(default)]
    pub params: GenerationParams,
}

impl GenerationRequest {
    pub fn new(query: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            context: context.into(),
            params: GenerationParams::default(),
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }
}

/// `embeddings_<stem>.json` written by the remote embedding worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingArtifact {
    pub embeddings: Vec<Vec<f32>>,
}

/// `texts_<stem>.json` written by the remote embedding worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextsArtifact {
    pub texts: Vec<String>,
}

/// `response_<stem>.json` written by the remote generation worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationArtifact {
    pub response: String,
}

// =============================================================================
// STORE RECORDS
// =============================================================================

/// One embedded text chunk as written to the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkEntity {
    pub text: String,
    pub embedding: Vec<f32>,
    pub subject_name: String,
    pub subject_age: u32,
    pub document_id: String,
    pub chunk_index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_forward_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn test_status_rejects_backward_and_terminal_moves() {
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn test_status_serializes_uppercase() {
        let json = serde_json::to_string(&JobStatus::Completed).unwrap();
        assert_eq!(json, "\"COMPLETED\"");
        assert_eq!(JobStatus::Running.to_string(), "RUNNING");
    }

    #[test]
    fn test_job_kind_from_str() {
        assert_eq!("embedding".parse::<JobKind>().unwrap(), JobKind::Embedding);
        assert_eq!("LLM".parse::<JobKind>().unwrap(), JobKind::Generation);
        assert!("training".parse::<JobKind>().is_err());
    }

    #[test]
    fn test_unknown_metadata_has_generated_id() {
        let a = DocumentMetadata::unknown();
        let b = DocumentMetadata::unknown();
        assert!(a.is_unknown());
        assert!(!a.document_id.is_empty());
        assert_ne!(a.document_id, b.document_id);
    }

    #[test]
    fn test_failure_cause_codes() {
        assert_eq!(FailureCause::ResultMissing.to_string(), "result_missing");
        assert_eq!(
            serde_json::to_string(&FailureCause::DimensionMismatch).unwrap(),
            "\"dimension_mismatch\""
        );
    }

    #[test]
    fn test_pending_record_is_empty() {
        let record = JobRecord::pending(
            Uuid::now_v7(),
            "777",
            JobKind::Embedding,
            vec!["/scratch/in.docx".into()],
            "/scratch/job.sh",
            None,
        );
        assert_eq!(record.status, JobStatus::Pending);
        assert!(record.result.is_none());
        assert!(record.error.is_none());
        assert!(record.warning.is_none());
        assert!(!record.is_terminal());
    }

    #[test]
    fn test_generation_request_defaults() {
        let req: GenerationRequest =
            serde_json::from_str(r#"{"query": "Kuka on Aino?", "context": "..."}"#).unwrap();
        assert_eq!(req.params.max_tokens, 300);
        assert!((req.params.temperature - 0.1).abs() < f32::EPSILON);
        assert!((req.params.top_p - 0.95).abs() < f32::EPSILON);
    }

    #[test]
    fn test_result_data_tagged_serialization() {
        let data = JobResultData::Generation {
            response: "Hei".into(),
        };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["kind"], "generation");
        assert_eq!(data.item_count(), 1);
    }
}
