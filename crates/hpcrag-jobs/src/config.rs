//! Configuration for the job manager and the cluster connection.
//!
//! Configuration is loaded from a TOML file when one exists, otherwise from
//! environment variables.
//!
//! # File
//!
//! Looked up at `$HPCRAG_CONFIG`, falling back to `./hpcrag.toml`. String
//! values may reference environment variables as `${VAR}`.
//!
//! ```toml
//! spool_dir = "./spool"
//!
//! [jobs]
//! poll_interval_ms = 10000
//! cancel_stalled_on_throttle = false
//!
//! [cluster]
//! work_dir = "/scratch/project_2011638/rag"
//! embedding_worker = "/scratch/project_2011638/embedding_script.py"
//! generation_worker = "/scratch/project_2011638/llm_script.py"
//!
//! [cluster.ssh]
//! host = "puhti.csc.fi"
//! username = "${CSC_USER}"
//!
//! [cluster.environment]
//! env_bin = "/scratch/project_2011638/ml_env/bin"
//! hf_home = "/scratch/project_2011638/hf_cache"
//!
//! [cluster.embedding_profile]
//! account = "project_2011638"
//! ```
//!
//! # Environment
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `HPCRAG_SSH_HOST` | required | Cluster login node |
//! | `HPCRAG_SSH_USER` | required | Remote account |
//! | `HPCRAG_SSH_PORT` | `22` | SSH port |
//! | `HPCRAG_SSH_IDENTITY_FILE` | none | Private key path |
//! | `HPCRAG_REMOTE_WORK_DIR` | required | Remote working directory |
//! | `HPCRAG_REMOTE_ENV_BIN` | none | Prepended to `PATH` in job scripts |
//! | `HPCRAG_REMOTE_HF_HOME` | none | HuggingFace cache directory |
//! | `HPCRAG_EMBEDDING_WORKER` | `embedding_script.py` | Embedding worker program |
//! | `HPCRAG_GENERATION_WORKER` | `llm_script.py` | Generation worker program |
//! | `HPCRAG_SLURM_ACCOUNT` | none | `--account` for both job kinds |
//! | `HPCRAG_SLURM_PARTITION` | `gputest` | `--partition` for both job kinds |
//! | `HPCRAG_REMOTE_SESSIONS` | `1` | Concurrent SSH sessions |
//! | `HPCRAG_POLL_INTERVAL_MS` | `10000` | Monitor tick interval |
//! | `HPCRAG_MAX_CONCURRENT_POLLS` | `4` | Jobs polled concurrently |
//! | `HPCRAG_MAX_POLL_FAILURES` | `5` | Failed polls before `unreachable` |
//! | `HPCRAG_JOB_TIMEOUT_SECS` | `7200` | Wall-clock ceiling per job, `0` disables |
//! | `HPCRAG_SUBMIT_MAX_ATTEMPTS` | `3` | `sbatch` attempts under throttling |
//! | `HPCRAG_SUBMIT_BACKOFF_BASE_MS` | `5000` | First backoff delay |
//! | `HPCRAG_QUEUE_CEILING` | `5` | Queue depth that triggers the throttle wait |
//! | `HPCRAG_THROTTLE_WAIT_MS` | `5000` | Throttle wait |
//! | `HPCRAG_CANCEL_STALLED_ON_THROTTLE` | `false` | Bulk-cancel own jobs when throttled |
//! | `HPCRAG_EMBED_DIMENSION` | `768` | Expected embedding width |
//! | `HPCRAG_SPOOL_DIR` | `./hpcrag-spool` | Local spool store directory |

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use hpcrag_core::defaults;
use hpcrag_remote::{ResourceProfile, SshConfig, WorkerEnvironment};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

fn env_required(key: &'static str) -> ConfigResult<String> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::MissingVar(key))
}

// =============================================================================
// JOB MANAGER
// =============================================================================

/// Knobs of the job manager and its background monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub poll_interval_ms: u64,
    pub max_concurrent_polls: usize,
    pub max_poll_failures: u32,
    /// Wall-clock ceiling per job in seconds; `0` disables.
    pub job_timeout_secs: u64,
    pub submit_max_attempts: u32,
    pub submit_backoff_base_ms: u64,
    pub queue_ceiling: usize,
    pub throttle_wait_ms: u64,
    pub cleanup_settle_ms: u64,
    /// Run `scancel -u $USER` when the queue ceiling is hit. This cancels
    /// every job of the account, including ones this process did not submit.
    pub cancel_stalled_on_throttle: bool,
    pub embed_dimension: usize,
    pub vector_insert_batch: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            max_concurrent_polls: defaults::MAX_CONCURRENT_POLLS,
            max_poll_failures: defaults::MAX_POLL_FAILURES,
            job_timeout_secs: defaults::JOB_TIMEOUT_SECS,
            submit_max_attempts: defaults::SUBMIT_MAX_ATTEMPTS,
            submit_backoff_base_ms: defaults::SUBMIT_BACKOFF_BASE_MS,
            queue_ceiling: defaults::QUEUE_CEILING,
            throttle_wait_ms: defaults::THROTTLE_WAIT_MS,
            cleanup_settle_ms: defaults::CLEANUP_SETTLE_MS,
            cancel_stalled_on_throttle: false,
            embed_dimension: defaults::EMBED_DIMENSION,
            vector_insert_batch: defaults::VECTOR_INSERT_BATCH,
        }
    }
}

impl JobsConfig {
    /// Create config from `HPCRAG_*` environment variables (with defaults).
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            poll_interval_ms: env_parse("HPCRAG_POLL_INTERVAL_MS", d.poll_interval_ms),
            max_concurrent_polls: env_parse("HPCRAG_MAX_CONCURRENT_POLLS", d.max_concurrent_polls)
                .max(1),
            max_poll_failures: env_parse("HPCRAG_MAX_POLL_FAILURES", d.max_poll_failures),
            job_timeout_secs: env_parse("HPCRAG_JOB_TIMEOUT_SECS", d.job_timeout_secs),
            submit_max_attempts: env_parse("HPCRAG_SUBMIT_MAX_ATTEMPTS", d.submit_max_attempts),
            submit_backoff_base_ms: env_parse(
                "HPCRAG_SUBMIT_BACKOFF_BASE_MS",
                d.submit_backoff_base_ms,
            ),
            queue_ceiling: env_parse("HPCRAG_QUEUE_CEILING", d.queue_ceiling),
            throttle_wait_ms: env_parse("HPCRAG_THROTTLE_WAIT_MS", d.throttle_wait_ms),
            cleanup_settle_ms: env_parse("HPCRAG_CLEANUP_SETTLE_MS", d.cleanup_settle_ms),
            cancel_stalled_on_throttle: env_flag(
                "HPCRAG_CANCEL_STALLED_ON_THROTTLE",
                d.cancel_stalled_on_throttle,
            ),
            embed_dimension: env_parse("HPCRAG_EMBED_DIMENSION", d.embed_dimension),
            vector_insert_batch: env_parse("HPCRAG_VECTOR_INSERT_BATCH", d.vector_insert_batch),
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_concurrent_polls(mut self, max: usize) -> Self {
        self.max_concurrent_polls = max;
        self
    }

    pub fn with_max_poll_failures(mut self, max: u32) -> Self {
        self.max_poll_failures = max;
        self
    }

    pub fn with_job_timeout(mut self, secs: u64) -> Self {
        self.job_timeout_secs = secs;
        self
    }

    pub fn with_submit_retries(mut self, max_attempts: u32, backoff_base_ms: u64) -> Self {
        self.submit_max_attempts = max_attempts;
        self.submit_backoff_base_ms = backoff_base_ms;
        self
    }

    pub fn with_queue_ceiling(mut self, ceiling: usize, wait_ms: u64) -> Self {
        self.queue_ceiling = ceiling;
        self.throttle_wait_ms = wait_ms;
        self
    }

    pub fn with_cancel_stalled_on_throttle(mut self, enabled: bool) -> Self {
        self.cancel_stalled_on_throttle = enabled;
        self
    }

    pub fn with_embed_dimension(mut self, dimension: usize) -> Self {
        self.embed_dimension = dimension;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        (self.job_timeout_secs > 0).then(|| Duration::from_secs(self.job_timeout_secs))
    }

    /// Delay before retry number `attempt + 1`: `base * 2^(attempt - 1)`.
    pub fn submit_backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.submit_backoff_base_ms.saturating_mul(1u64 << exp))
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "poll_interval_ms must be > 0".to_string(),
            ));
        }
        if self.max_concurrent_polls == 0 {
            return Err(ConfigError::Validation(
                "max_concurrent_polls must be > 0".to_string(),
            ));
        }
        if self.max_poll_failures == 0 {
            return Err(ConfigError::Validation(
                "max_poll_failures must be > 0".to_string(),
            ));
        }
        if self.submit_max_attempts == 0 {
            return Err(ConfigError::Validation(
                "submit_max_attempts must be > 0".to_string(),
            ));
        }
        if self.embed_dimension == 0 {
            return Err(ConfigError::Validation(
                "embed_dimension must be > 0".to_string(),
            ));
        }
        if self.vector_insert_batch == 0 {
            return Err(ConfigError::Validation(
                "vector_insert_batch must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// CLUSTER
// =============================================================================

/// Where and how jobs run on the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub ssh: SshConfig,
    pub work_dir: String,
    #[serde(default)]
    pub environment: WorkerEnvironment,
    #[serde(default = "default_embedding_worker")]
    pub embedding_worker: String,
    #[serde(default = "default_generation_worker")]
    pub generation_worker: String,
    #[serde(default)]
    pub embedding_profile: ResourceProfile,
    #[serde(default)]
    pub generation_profile: ResourceProfile,
    #[serde(default = "default_sessions")]
    pub sessions: usize,
}

fn default_embedding_worker() -> String {
    "embedding_script.py".to_string()
}

fn default_generation_worker() -> String {
    "llm_script.py".to_string()
}

fn default_sessions() -> usize {
    defaults::REMOTE_SESSIONS
}

impl ClusterConfig {
    pub fn new(ssh: SshConfig, work_dir: impl Into<String>) -> Self {
        Self {
            ssh,
            work_dir: work_dir.into(),
            environment: WorkerEnvironment::default(),
            embedding_worker: default_embedding_worker(),
            generation_worker: default_generation_worker(),
            embedding_profile: ResourceProfile::default(),
            generation_profile: ResourceProfile::default(),
            sessions: default_sessions(),
        }
    }

    /// Create config from `HPCRAG_*` environment variables.
    pub fn from_env() -> ConfigResult<Self> {
        let mut ssh = SshConfig::new(
            env_required("HPCRAG_SSH_HOST")?,
            env_required("HPCRAG_SSH_USER")?,
        )
        .with_port(env_parse("HPCRAG_SSH_PORT", defaults::SSH_PORT));
        if let Ok(identity) = env::var("HPCRAG_SSH_IDENTITY_FILE") {
            ssh = ssh.with_identity_file(identity);
        }

        let environment = WorkerEnvironment {
            env_bin: env::var("HPCRAG_REMOTE_ENV_BIN").ok(),
            hf_home: env::var("HPCRAG_REMOTE_HF_HOME").ok(),
            ..WorkerEnvironment::default()
        };

        let mut profile = ResourceProfile::default();
        if let Ok(account) = env::var("HPCRAG_SLURM_ACCOUNT") {
            profile = profile.with_account(account);
        }
        if let Ok(partition) = env::var("HPCRAG_SLURM_PARTITION") {
            profile = profile.with_partition(partition);
        }

        Ok(Self {
            ssh,
            work_dir: env_required("HPCRAG_REMOTE_WORK_DIR")?,
            environment,
            embedding_worker: env::var("HPCRAG_EMBEDDING_WORKER")
                .unwrap_or_else(|_| default_embedding_worker()),
            generation_worker: env::var("HPCRAG_GENERATION_WORKER")
                .unwrap_or_else(|_| default_generation_worker()),
            embedding_profile: profile.clone(),
            generation_profile: profile,
            sessions: env_parse("HPCRAG_REMOTE_SESSIONS", defaults::REMOTE_SESSIONS).max(1),
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.ssh
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        if !self.work_dir.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "work_dir must be an absolute remote path, got {:?}",
                self.work_dir
            )));
        }
        if self.embedding_worker.trim().is_empty() || self.generation_worker.trim().is_empty() {
            return Err(ConfigError::Validation(
                "worker programs must not be empty".to_string(),
            ));
        }
        for profile in [&self.embedding_profile, &self.generation_profile] {
            profile
                .validate()
                .map_err(|e| ConfigError::Validation(e.to_string()))?;
        }
        if self.sessions == 0 {
            return Err(ConfigError::Validation("sessions must be > 0".to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// ROOT
// =============================================================================

/// Complete configuration for the `hpcrag` binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HpcragConfig {
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default = "default_spool_dir")]
    pub spool_dir: PathBuf,
}

fn default_spool_dir() -> PathBuf {
    PathBuf::from("./hpcrag-spool")
}

impl HpcragConfig {
    /// `$HPCRAG_CONFIG`, else `./hpcrag.toml`.
    pub fn default_config_path() -> PathBuf {
        env::var("HPCRAG_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("hpcrag.toml"))
    }

    /// Load from the default path, falling back to environment variables.
    pub fn load() -> ConfigResult<Self> {
        let path = Self::default_config_path();

        if path.exists() {
            info!("Loading hpcrag config from: {}", path.display());
            Self::from_file(&path)
        } else {
            debug!(
                "Config file not found at {}, using environment variables",
                path.display()
            );
            let config = Self::from_env()?;
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let content = substitute_env_vars(&content);
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            cluster: ClusterConfig::from_env()?,
            jobs: JobsConfig::from_env(),
            spool_dir: env::var("HPCRAG_SPOOL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_spool_dir()),
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.cluster.validate()?;
        self.jobs.validate()
    }
}

/// Replace `${VAR}` with the variable's value; unknown variables are kept
/// verbatim.
fn substitute_env_vars(content: &str) -> String {
    static VAR: OnceLock<regex::Regex> = OnceLock::new();
    let re = VAR.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("env var pattern is a valid regex")
    });
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
        [cluster]
        work_dir = "/scratch/project_2011638/rag"

        [cluster.ssh]
        host = "puhti.csc.fi"
        username = "aino"
    "#;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_jobs_config_defaults() {
        let config = JobsConfig::default();
        assert_eq!(config.poll_interval_ms, 10_000);
        assert_eq!(config.submit_max_attempts, 3);
        assert_eq!(config.queue_ceiling, 5);
        assert_eq!(config.embed_dimension, 768);
        assert!(!config.cancel_stalled_on_throttle);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_submit_backoff_is_exponential() {
        let config = JobsConfig::default().with_submit_retries(5, 1_000);
        assert_eq!(config.submit_backoff(1), Duration::from_secs(1));
        assert_eq!(config.submit_backoff(2), Duration::from_secs(2));
        assert_eq!(config.submit_backoff(3), Duration::from_secs(4));
        assert_eq!(config.submit_backoff(0), Duration::from_secs(1));
    }

    #[test]
    fn test_job_timeout_zero_disables() {
        assert!(JobsConfig::default().with_job_timeout(0).job_timeout().is_none());
        assert_eq!(
            JobsConfig::default().with_job_timeout(30).job_timeout(),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_jobs_config_validation() {
        assert!(JobsConfig::default().with_poll_interval(0).validate().is_err());
        assert!(JobsConfig::default()
            .with_max_concurrent_polls(0)
            .validate()
            .is_err());
        assert!(JobsConfig::default()
            .with_submit_retries(0, 10)
            .validate()
            .is_err());
        assert!(JobsConfig::default().with_embed_dimension(0).validate().is_err());
    }

    #[test]
    fn test_from_file_minimal() {
        let file = write_config(MINIMAL);
        let config = HpcragConfig::from_file(file.path()).unwrap();

        assert_eq!(config.cluster.ssh.host, "puhti.csc.fi");
        assert_eq!(config.cluster.ssh.port, 22);
        assert_eq!(config.cluster.work_dir, "/scratch/project_2011638/rag");
        assert_eq!(config.cluster.embedding_worker, "embedding_script.py");
        assert_eq!(config.cluster.embedding_profile, ResourceProfile::default());
        assert_eq!(config.cluster.sessions, 1);
        assert_eq!(config.jobs, JobsConfig::default());
        assert_eq!(config.spool_dir, PathBuf::from("./hpcrag-spool"));
    }

    #[test]
    fn test_from_file_full() {
        let file = write_config(
            r#"
            spool_dir = "/var/lib/hpcrag"

            [jobs]
            poll_interval_ms = 2000
            cancel_stalled_on_throttle = true

            [cluster]
            work_dir = "/scratch/p/rag"
            generation_worker = "/scratch/p/llm_script.py"
            sessions = 2

            [cluster.ssh]
            host = "puhti.csc.fi"
            username = "aino"
            identity_file = "/home/aino/.ssh/id_ed25519"

            [cluster.environment]
            env_bin = "/scratch/p/ml_env/bin"

            [cluster.generation_profile]
            memory = "16G"
            partition = "gpu"
            account = "project_2011638"
            qos = "normal"
            "#,
        );
        let config = HpcragConfig::from_file(file.path()).unwrap();

        assert_eq!(config.jobs.poll_interval_ms, 2000);
        assert!(config.jobs.cancel_stalled_on_throttle);
        assert_eq!(config.jobs.max_poll_failures, 5);
        assert_eq!(config.cluster.sessions, 2);
        assert_eq!(
            config.cluster.environment.env_bin.as_deref(),
            Some("/scratch/p/ml_env/bin")
        );
        assert_eq!(config.cluster.environment.interpreter, "python");
        let profile = &config.cluster.generation_profile;
        assert_eq!(profile.memory, "16G");
        assert_eq!(profile.account.as_deref(), Some("project_2011638"));
        assert!(profile.extra.contains_key("qos"));
        assert_eq!(config.spool_dir, PathBuf::from("/var/lib/hpcrag"));
    }

    #[test]
    fn test_from_file_relative_work_dir_rejected() {
        let file = write_config(&MINIMAL.replace("/scratch/project_2011638/rag", "rag"));
        let err = HpcragConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_from_file_parse_error() {
        let file = write_config("[cluster\nwork_dir = ");
        assert!(matches!(
            HpcragConfig::from_file(file.path()),
            Err(ConfigError::TomlParse(_))
        ));
    }

    #[test]
    fn test_from_file_missing() {
        let err = HpcragConfig::from_file(Path::new("/nonexistent/hpcrag.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead(_)));
    }

    #[test]
    fn test_env_var_substitution() {
        env::set_var("HPCRAG_TEST_SUBSTITUTION_USER", "väinö");
        let result = substitute_env_vars(
            "username = \"${HPCRAG_TEST_SUBSTITUTION_USER}\"\nkey = \"${HPCRAG_TEST_UNSET_12345}\"",
        );
        env::remove_var("HPCRAG_TEST_SUBSTITUTION_USER");

        assert_eq!(
            result,
            "username = \"väinö\"\nkey = \"${HPCRAG_TEST_UNSET_12345}\""
        );
    }

    #[test]
    fn test_missing_var_display() {
        assert_eq!(
            ConfigError::MissingVar("HPCRAG_SSH_HOST").to_string(),
            "Missing required environment variable: HPCRAG_SSH_HOST"
        );
    }
}
