//! Slurm command lines and response parsing.
//!
//! Everything here is pure: commands are built as strings for
//! [`RemoteTransport::exec`](hpcrag_core::RemoteTransport::exec) and outputs
//! are classified without touching the network.

use hpcrag_core::{Error, ExecOutput, Result};

use crate::shell::quote;

/// Stderr fragments Slurm emits when a per-user or per-account submit limit
/// is hit. Matching is case-sensitive except for the generic phrase.
const SUBMIT_LIMIT_SIGNATURES: &[&str] = &["AssocMaxSubmitJobLimit", "QOSMaxSubmitJobPerUser"];
const SUBMIT_LIMIT_PHRASE: &str = "job submit limit";

const INVALID_JOB_ID: &str = "Invalid job id";

// =============================================================================
// COMMANDS
// =============================================================================

/// `cd <work_dir> && sbatch <script>`
pub fn submit_command(work_dir: &str, script_path: &str) -> String {
    format!("cd {} && sbatch {}", quote(work_dir), quote(script_path))
}

/// Queue state of one job, state name only, no header.
pub fn queue_state_command(remote_job_id: &str) -> String {
    format!("squeue -h -j {} -o %T", quote(remote_job_id))
}

/// Number of the current user's queued and running jobs.
pub fn queue_depth_command() -> &'static str {
    "squeue -u $USER -h | wc -l"
}

/// Cancel every job of the current user.
pub fn cancel_all_command() -> &'static str {
    "scancel -u $USER"
}

pub fn cancel_command(remote_job_id: &str) -> String {
    format!("scancel {}", quote(remote_job_id))
}

pub fn mkdir_command(remote_dir: &str) -> String {
    format!("mkdir -p -- {}", quote(remote_dir))
}

pub fn remove_command(remote_path: &str) -> String {
    format!("rm -f -- {}", quote(remote_path))
}

// =============================================================================
// SUBMISSION
// =============================================================================

/// Outcome of a single `sbatch` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Scheduler accepted the script and assigned this id.
    Accepted(String),
    /// Submit limit reached; retrying later may succeed.
    Throttled(String),
    /// Any other scheduler error; retrying will not help.
    Rejected(String),
    /// Command produced no usable job id.
    Unparseable(String),
}

/// True when `stderr` carries a scheduler submit-limit signature.
pub fn is_submit_limit(stderr: &str) -> bool {
    SUBMIT_LIMIT_SIGNATURES.iter().any(|sig| stderr.contains(sig))
        || stderr.to_lowercase().contains(SUBMIT_LIMIT_PHRASE)
}

/// Extract the job id from `sbatch` output.
///
/// Takes the last whitespace-separated token of the last non-empty line and
/// strips an optional `;cluster` suffix (`sbatch --parsable`). The id must be
/// all digits.
pub fn parse_job_id(stdout: &str) -> Option<String> {
    let line = stdout.lines().rev().find(|l| !l.trim().is_empty())?;
    let token = line.split_whitespace().last()?;
    let id = token.split(';').next().unwrap_or(token);
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
        Some(id.to_string())
    } else {
        None
    }
}

/// The single throttling classification used by the submission protocol.
pub fn classify_submit(output: &ExecOutput) -> SubmitOutcome {
    let stderr = output.stderr_trimmed();
    if !stderr.is_empty() {
        if is_submit_limit(stderr) {
            return SubmitOutcome::Throttled(stderr.to_string());
        }
        return SubmitOutcome::Rejected(stderr.to_string());
    }
    if output.exit_status != 0 {
        return SubmitOutcome::Rejected(format!(
            "sbatch exited with status {}",
            output.exit_status
        ));
    }
    match parse_job_id(&output.stdout) {
        Some(id) => SubmitOutcome::Accepted(id),
        None => SubmitOutcome::Unparseable(output.stdout_trimmed().to_string()),
    }
}

// =============================================================================
// QUEUE
// =============================================================================

/// Where a job stands according to `squeue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueState {
    /// Waiting for resources (`PENDING`, `CONFIGURING`).
    Pending,
    /// Any other state while still listed; carries the raw state name.
    Running(String),
    /// No longer listed: finished, failed, or purged by the scheduler.
    Absent,
}

/// Interpret `squeue -h -j <id> -o %T` output.
///
/// An "Invalid job id" error means the scheduler has already forgotten the
/// job. Any other error is returned so the caller can count it.
pub fn parse_queue_state(output: &ExecOutput) -> Result<QueueState> {
    if output.exit_status != 0 {
        let stderr = output.stderr_trimmed();
        if stderr.contains(INVALID_JOB_ID) {
            return Ok(QueueState::Absent);
        }
        return Err(Error::Remote(format!(
            "squeue exited with status {}: {}",
            output.exit_status, stderr
        )));
    }

    let state = match output.stdout.lines().map(str::trim).find(|l| !l.is_empty()) {
        Some(state) => state,
        None => return Ok(QueueState::Absent),
    };

    match state {
        "PENDING" | "CONFIGURING" => Ok(QueueState::Pending),
        other => Ok(QueueState::Running(other.to_string())),
    }
}

/// Parse the output of [`queue_depth_command`].
pub fn parse_queue_depth(output: &ExecOutput) -> Result<usize> {
    if output.exit_status != 0 {
        return Err(Error::Remote(format!(
            "queue count exited with status {}: {}",
            output.exit_status,
            output.stderr_trimmed()
        )));
    }
    output
        .stdout_trimmed()
        .parse::<usize>()
        .map_err(|_| {
            Error::Remote(format!(
                "unexpected queue count {:?}",
                output.stdout_trimmed()
            ))
        })
}
