//! Job lifecycle events.

use uuid::Uuid;

use hpcrag_core::{JobFailure, JobKind, JobStatus, PartialWriteWarning};

/// Event emitted by the job manager and its monitor.
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// A job was accepted by the scheduler.
    Submitted {
        job_id: Uuid,
        kind: JobKind,
        remote_job_id: String,
    },
    /// A job moved forward in its lifecycle.
    StatusChanged {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },
    /// Results were retrieved and written back.
    Completed { job_id: Uuid, kind: JobKind },
    /// A job failed.
    Failed {
        job_id: Uuid,
        kind: JobKind,
        failure: JobFailure,
    },
    /// One result store rejected its write; the job still completed.
    PartialWrite {
        job_id: Uuid,
        warning: PartialWriteWarning,
    },
    /// Monitor started.
    MonitorStarted,
    /// Monitor stopped.
    MonitorStopped,
}

impl JobEvent {
    /// Job this event refers to, if any.
    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            Self::Submitted { job_id, .. }
            | Self::StatusChanged { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::Failed { job_id, .. }
            | Self::PartialWrite { job_id, .. } => Some(*job_id),
            Self::MonitorStarted | Self::MonitorStopped => None,
        }
    }

    /// True for the final event of a job.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}
