//! Centralized default constants for hpcrag.
//!
//! **This module is the single source of truth** for shared default values.
//! Configuration types in the other crates fall back to these constants when
//! a field is missing from the environment or the config file.

// =============================================================================
// EMBEDDING
// =============================================================================

/// Expected embedding vector width (TurkuNLP sbert-cased-finnish-paraphrase).
pub const EMBED_DIMENSION: usize = 768;

/// Entities per vector-store insert call.
pub const VECTOR_INSERT_BATCH: usize = 256;

// =============================================================================
// GENERATION
// =============================================================================

/// Default `max_tokens` for generation jobs.
pub const GEN_MAX_TOKENS: u32 = 300;

/// Default sampling temperature for generation jobs.
pub const GEN_TEMPERATURE: f32 = 0.1;

/// Default nucleus sampling threshold for generation jobs.
pub const GEN_TOP_P: f32 = 0.95;

// =============================================================================
// SUBMISSION
// =============================================================================

/// Maximum `sbatch` attempts when the scheduler throttles submissions.
pub const SUBMIT_MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential submit backoff in milliseconds.
pub const SUBMIT_BACKOFF_BASE_MS: u64 = 5_000;

/// Queued/running job count at which submission waits before `sbatch`.
pub const QUEUE_CEILING: usize = 5;

/// Delay applied when the queue ceiling is reached, in milliseconds.
pub const THROTTLE_WAIT_MS: u64 = 5_000;

/// Settle time after a bulk `scancel`, in milliseconds.
pub const CLEANUP_SETTLE_MS: u64 = 2_000;

// =============================================================================
// POLLING
// =============================================================================

/// Interval between scheduler queue polls in milliseconds.
pub const POLL_INTERVAL_MS: u64 = 10_000;

/// Maximum jobs polled concurrently by the monitor.
pub const MAX_CONCURRENT_POLLS: usize = 4;

/// Consecutive failed polls before a job is declared unreachable.
pub const MAX_POLL_FAILURES: u32 = 5;

/// Default wall-clock ceiling per job in seconds (0 disables).
pub const JOB_TIMEOUT_SECS: u64 = 2 * 60 * 60;

/// Event broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// REMOTE
// =============================================================================

/// Default SSH port.
pub const SSH_PORT: u16 = 22;

/// Timeout for a single remote command in seconds.
pub const REMOTE_CMD_TIMEOUT_SECS: u64 = 120;

/// Seconds allowed for establishing the SSH connection.
pub const SSH_CONNECT_TIMEOUT_SECS: u64 = 15;

/// Seconds an idle multiplexed SSH master connection is kept open.
pub const SSH_CONTROL_PERSIST_SECS: u64 = 600;

/// Number of concurrently usable remote sessions.
pub const REMOTE_SESSIONS: usize = 1;

// =============================================================================
// SCRIPT RESOURCES
// =============================================================================

/// Default Slurm time limit.
pub const SLURM_TIME_LIMIT: &str = "00:15:00";

/// Default Slurm memory request.
pub const SLURM_MEMORY: &str = "4G";

/// Default GPU count.
pub const SLURM_GPU_COUNT: u32 = 1;

/// Default GPU model used in `--gres`.
pub const SLURM_GPU_TYPE: &str = "v100";

/// Default partition.
pub const SLURM_PARTITION: &str = "gputest";

/// Default CPUs per task.
pub const SLURM_CPU_COUNT: u32 = 1;

/// Default task count.
pub const SLURM_NTASKS: u32 = 1;

/// Interpreter used to launch the remote worker programs.
pub const WORKER_INTERPRETER: &str = "python";

/// Subject name recorded when a filename carries no metadata.
pub const UNKNOWN_SUBJECT: &str = "Unknown";
