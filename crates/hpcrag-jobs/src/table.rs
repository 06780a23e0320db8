//! In-memory job table.
//!
//! Owns every [`JobRecord`]. All status changes go through
//! [`JobTable::transition`], which rejects anything that is not a strictly
//! forward move from a non-terminal state.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use hpcrag_core::{
    Error, JobFailure, JobRecord, JobResultData, JobStatus, PartialWriteWarning, Result,
};

struct JobEntry {
    record: JobRecord,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    poll_failures: u32,
}

/// A requested status change and the data that comes with it.
#[derive(Debug, Clone)]
pub(crate) struct Transition {
    status: JobStatus,
    result: Option<JobResultData>,
    error: Option<JobFailure>,
    warning: Option<PartialWriteWarning>,
}

impl Transition {
    pub(crate) fn to(status: JobStatus) -> Self {
        Self {
            status,
            result: None,
            error: None,
            warning: None,
        }
    }

    pub(crate) fn completed(result: JobResultData, warning: Option<PartialWriteWarning>) -> Self {
        Self {
            status: JobStatus::Completed,
            result: Some(result),
            error: None,
            warning,
        }
    }

    pub(crate) fn failed(failure: JobFailure) -> Self {
        Self {
            status: JobStatus::Failed,
            result: None,
            error: Some(failure),
            warning: None,
        }
    }
}

/// A transition that was accepted.
#[derive(Debug, Clone)]
pub(crate) struct Applied {
    pub previous: JobStatus,
    pub record: JobRecord,
}

/// Exclusive right to poll one job. Released on drop.
pub(crate) struct Claim {
    pub record: JobRecord,
    pub cancel: CancellationToken,
    pub deadline: Option<Instant>,
    claims: Arc<Mutex<HashSet<Uuid>>>,
}

impl Drop for Claim {
    fn drop(&mut self) {
        lock_claims(&self.claims).remove(&self.record.job_id);
    }
}

fn lock_claims(claims: &Mutex<HashSet<Uuid>>) -> MutexGuard<'_, HashSet<Uuid>> {
    claims.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub(crate) struct JobTable {
    entries: RwLock<HashMap<Uuid, JobEntry>>,
    claims: Arc<Mutex<HashSet<Uuid>>>,
}

impl JobTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Track a freshly submitted job; returns its cancellation token.
    pub(crate) async fn insert(
        &self,
        record: JobRecord,
        deadline: Option<Instant>,
    ) -> CancellationToken {
        let cancel = CancellationToken::new();
        let entry = JobEntry {
            record,
            cancel: cancel.clone(),
            deadline,
            poll_failures: 0,
        };
        let mut entries = self.entries.write().await;
        entries.insert(entry.record.job_id, entry);
        cancel
    }

    pub(crate) async fn get(&self, job_id: Uuid) -> Option<JobRecord> {
        let entries = self.entries.read().await;
        entries.get(&job_id).map(|e| e.record.clone())
    }

    /// Snapshots ordered by submission time.
    pub(crate) async fn list(&self) -> Vec<JobRecord> {
        let entries = self.entries.read().await;
        let mut records: Vec<JobRecord> = entries.values().map(|e| e.record.clone()).collect();
        records.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        records
    }

    /// Non-terminal jobs that nobody is polling right now.
    pub(crate) async fn in_flight(&self) -> Vec<Uuid> {
        let entries = self.entries.read().await;
        let claims = lock_claims(&self.claims);
        let mut ids: Vec<Uuid> = entries
            .values()
            .filter(|e| !e.record.is_terminal() && !claims.contains(&e.record.job_id))
            .map(|e| e.record.job_id)
            .collect();
        ids.sort();
        ids
    }

    /// Claim a job for one poll tick.
    ///
    /// Returns `None` when the job is terminal or already being polled.
    pub(crate) async fn claim(&self, job_id: Uuid) -> Result<Option<Claim>> {
        let entries = self.entries.read().await;
        let entry = entries.get(&job_id).ok_or(Error::JobNotFound(job_id))?;
        if entry.record.is_terminal() {
            return Ok(None);
        }
        if !lock_claims(&self.claims).insert(job_id) {
            debug!(%job_id, "Job already being polled");
            return Ok(None);
        }
        Ok(Some(Claim {
            record: entry.record.clone(),
            cancel: entry.cancel.clone(),
            deadline: entry.deadline,
            claims: self.claims.clone(),
        }))
    }

    /// Apply a status change if it respects the monotonic order.
    ///
    /// Returns `Ok(None)` when the change was rejected.
    pub(crate) async fn transition(
        &self,
        job_id: Uuid,
        transition: Transition,
    ) -> Result<Option<Applied>> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&job_id).ok_or(Error::JobNotFound(job_id))?;
        let previous = entry.record.status;

        if !previous.can_transition_to(transition.status) {
            debug!(
                %job_id,
                from = %previous,
                to = %transition.status,
                "Rejected non-forward status transition"
            );
            return Ok(None);
        }

        let record = &mut entry.record;
        record.status = transition.status;
        record.updated_at = Utc::now();
        if transition.status.is_terminal() {
            record.result = transition.result;
            record.error = transition.error;
            record.warning = transition.warning;
        }

        Ok(Some(Applied {
            previous,
            record: record.clone(),
        }))
    }

    /// Count a failed poll; returns the consecutive failure count.
    pub(crate) async fn record_poll_failure(&self, job_id: Uuid) -> u32 {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&job_id) {
            Some(entry) => {
                entry.poll_failures += 1;
                entry.poll_failures
            }
            None => 0,
        }
    }

    pub(crate) async fn reset_poll_failures(&self, job_id: Uuid) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(&job_id) {
            entry.poll_failures = 0;
        }
    }

    pub(crate) async fn cancel_token(&self, job_id: Uuid) -> Result<CancellationToken> {
        let entries = self.entries.read().await;
        entries
            .get(&job_id)
            .map(|e| e.cancel.clone())
            .ok_or(Error::JobNotFound(job_id))
    }

    /// Remove a terminal record.
    pub(crate) async fn remove_terminal(&self, job_id: Uuid) -> Result<JobRecord> {
        let mut entries = self.entries.write().await;
        match entries.get(&job_id) {
            None => Err(Error::JobNotFound(job_id)),
            Some(entry) if !entry.record.is_terminal() => Err(Error::JobNotTerminal(job_id)),
            Some(_) => entries
                .remove(&job_id)
                .map(|e| e.record)
                .ok_or(Error::JobNotFound(job_id)),
        }
    }
}
