//! Job manager: submission, polling, and caller-facing job access.
//!
//! The manager owns the job table. Callers only ever receive snapshots of
//! [`JobRecord`]s; every state change happens inside [`JobManager::poll`]
//! (or the cancellation path, which funnels into it).

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use hpcrag_core::{
    extract_from_filename, DocumentMetadata, EmbeddingArtifact, Error, ExecOutput, FailureCause,
    GenerationArtifact, GenerationRequest, GraphStore, JobFailure, JobKind, JobRecord,
    JobResultData, JobStatus, Result, SubmissionError, TextsArtifact, VectorStore,
};
use hpcrag_remote::scheduler::{
    cancel_all_command, cancel_command, parse_queue_depth, parse_queue_state,
    queue_depth_command, queue_state_command, submit_command,
};
use hpcrag_remote::{
    classify_submit, ArtifactPaths, QueueState, RemoteLayout, ResourceProfile, ScriptGenerator,
    SessionPool, SubmitOutcome, WorkerEnvironment,
};

use crate::config::{ClusterConfig, JobsConfig};
use crate::events::JobEvent;
use crate::reconciler::{ReconcileOutcome, ResultReconciler};
use crate::table::{Claim, JobTable, Transition};

/// Script generator and resources for one job kind.
#[derive(Debug, Clone)]
struct WorkerSpec {
    generator: ScriptGenerator,
    profile: ResourceProfile,
}

impl WorkerSpec {
    fn new(generator: ScriptGenerator, profile: ResourceProfile) -> Self {
        Self { generator, profile }
    }
}

struct ManagerInner {
    config: JobsConfig,
    sessions: SessionPool,
    layout: RemoteLayout,
    embedding: WorkerSpec,
    generation: WorkerSpec,
    reconciler: ResultReconciler,
    table: JobTable,
    event_tx: broadcast::Sender<JobEvent>,
}

/// Submits jobs to the cluster and tracks them to completion.
///
/// Cheap to clone; clones share the same job table.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<ManagerInner>,
}

/// Builder for [`JobManager`].
pub struct JobManagerBuilder {
    config: JobsConfig,
    sessions: SessionPool,
    work_dir: String,
    vector_store: Arc<dyn VectorStore>,
    graph_store: Arc<dyn GraphStore>,
    embedding: WorkerSpec,
    generation: WorkerSpec,
}

impl JobManagerBuilder {
    pub fn with_config(mut self, config: JobsConfig) -> Self {
        self.config = config;
        self
    }

    /// Take work dir, worker programs and profiles from cluster config.
    pub fn with_cluster(mut self, cluster: &ClusterConfig) -> Self {
        self.work_dir = cluster.work_dir.clone();
        self.embedding = WorkerSpec::new(
            ScriptGenerator::new(cluster.environment.clone(), &cluster.embedding_worker),
            cluster.embedding_profile.clone(),
        );
        self.generation = WorkerSpec::new(
            ScriptGenerator::new(cluster.environment.clone(), &cluster.generation_worker),
            cluster.generation_profile.clone(),
        );
        self
    }

    pub fn build(self) -> JobManager {
        let (event_tx, _) = broadcast::channel(hpcrag_core::defaults::EVENT_BUS_CAPACITY);
        let reconciler = ResultReconciler::new(
            self.vector_store,
            self.graph_store,
            self.config.embed_dimension,
            self.config.vector_insert_batch,
        );
        JobManager {
            inner: Arc::new(ManagerInner {
                layout: RemoteLayout::new(self.work_dir),
                config: self.config,
                sessions: self.sessions,
                embedding: self.embedding,
                generation: self.generation,
                reconciler,
                table: JobTable::new(),
                event_tx,
            }),
        }
    }
}

impl JobManager {
    pub fn builder(
        sessions: SessionPool,
        work_dir: impl Into<String>,
        vector_store: Arc<dyn VectorStore>,
        graph_store: Arc<dyn GraphStore>,
    ) -> JobManagerBuilder {
        JobManagerBuilder {
            config: JobsConfig::default(),
            sessions,
            work_dir: work_dir.into(),
            vector_store,
            graph_store,
            embedding: WorkerSpec::new(
                ScriptGenerator::new(WorkerEnvironment::default(), "embedding_script.py"),
                ResourceProfile::default(),
            ),
            generation: WorkerSpec::new(
                ScriptGenerator::new(WorkerEnvironment::default(), "llm_script.py"),
                ResourceProfile::default(),
            ),
        }
    }

    pub fn config(&self) -> &JobsConfig {
        &self.inner.config
    }

    /// Subscribe to job events.
    pub fn events(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.event_tx.subscribe()
    }

    pub(crate) fn emit(&self, event: JobEvent) {
        let _ = self.inner.event_tx.send(event);
    }

    // =========================================================================
    // SUBMISSION
    // =========================================================================

    /// Upload a document and schedule an embedding job for it.
    #[instrument(
        skip(self),
        fields(subsystem = "jobs", component = "manager", op = "submit_embedding")
    )]
    pub async fn submit_embedding(&self, local_input_path: &Path) -> Result<JobRecord> {
        let filename = local_input_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "input path has no file name: {}",
                    local_input_path.display()
                ))
            })?
            .to_string();
        if !tokio::fs::metadata(local_input_path).await?.is_file() {
            return Err(Error::InvalidInput(format!(
                "not a regular file: {}",
                local_input_path.display()
            )));
        }

        self.connect().await?;

        let metadata = extract_from_filename(&filename);
        let job_id = Uuid::now_v7();
        let input_path = self.inner.layout.embedding_input(&metadata, &filename);

        self.submit(
            job_id,
            JobKind::Embedding,
            LocalInput::File(local_input_path),
            input_path,
            Some(metadata),
        )
        .await
    }

    /// Upload a generation request and schedule a generation job for it.
    #[instrument(
        skip(self, request),
        fields(subsystem = "jobs", component = "manager", op = "submit_generation")
    )]
    pub async fn submit_generation(&self, request: &GenerationRequest) -> Result<JobRecord> {
        if request.query.trim().is_empty() {
            return Err(Error::InvalidInput("generation query is empty".to_string()));
        }
        self.connect().await?;

        let job_id = Uuid::now_v7();
        let payload = serde_json::to_vec(request)?;
        let input_path = self.inner.layout.generation_input(job_id);

        self.submit(
            job_id,
            JobKind::Generation,
            LocalInput::Bytes(&payload),
            input_path,
            None,
        )
        .await
    }

    async fn connect(&self) -> Result<()> {
        let session = self.inner.sessions.checkout().await?;
        session.connect().await
    }

    fn worker(&self, kind: JobKind) -> &WorkerSpec {
        match kind {
            JobKind::Embedding => &self.inner.embedding,
            JobKind::Generation => &self.inner.generation,
        }
    }

    /// Steps shared by both job kinds, from staging to the stored record.
    async fn submit(
        &self,
        job_id: Uuid,
        kind: JobKind,
        input: LocalInput<'_>,
        input_path: String,
        metadata: Option<DocumentMetadata>,
    ) -> Result<JobRecord> {
        let script_path = self.inner.layout.script(job_id);
        let worker = self.worker(kind);
        let job_name = format!("{}_{}", kind.job_name_prefix(), job_id);
        let script = worker
            .generator
            .render(&job_name, &worker.profile, &input_path);

        let staged = vec![input_path.clone(), script_path.clone()];
        let submitted = self
            .stage_and_submit(&input, &input_path, &script, &script_path)
            .await;

        let remote_job_id = match submitted {
            Ok(id) => id,
            Err(e) => {
                warn!(%job_id, %kind, error = %e, "Submission failed, purging staged files");
                self.purge(&staged).await;
                return Err(e);
            }
        };

        let record = JobRecord::pending(
            job_id,
            remote_job_id.clone(),
            kind,
            vec![input_path],
            script_path,
            metadata,
        );
        let deadline = self.inner.config.job_timeout().map(|t| Instant::now() + t);
        self.inner.table.insert(record.clone(), deadline).await;

        info!(
            %job_id,
            remote_job_id = %remote_job_id,
            %kind,
            document_id = record.metadata.as_ref().map(|m| m.document_id.as_str()).unwrap_or("-"),
            "Job submitted"
        );
        self.emit(JobEvent::Submitted {
            job_id,
            kind,
            remote_job_id,
        });
        Ok(record)
    }

    async fn stage_and_submit(
        &self,
        input: &LocalInput<'_>,
        input_path: &str,
        script: &str,
        script_path: &str,
    ) -> Result<String> {
        self.stage(input, input_path, script, script_path).await?;
        self.submit_script(script_path).await
    }

    /// Create the work dir and upload input and script.
    async fn stage(
        &self,
        input: &LocalInput<'_>,
        input_path: &str,
        script: &str,
        script_path: &str,
    ) -> Result<()> {
        let session = self.inner.sessions.checkout().await?;
        session.ensure_dir(self.inner.layout.work_dir()).await?;
        match input {
            LocalInput::File(path) => session.upload(path, input_path).await?,
            LocalInput::Bytes(bytes) => {
                let tmp = write_temp(bytes)?;
                session.upload(tmp.path(), input_path).await?;
            }
        }
        let tmp = write_temp(script.as_bytes())?;
        session.upload(tmp.path(), script_path).await?;
        debug!(input_path, script_path, "Staged job files");
        Ok(())
    }

    /// Run `sbatch` with throttling-aware retries; returns the scheduler id.
    async fn submit_script(&self, script_path: &str) -> Result<String> {
        let config = &self.inner.config;
        let command = submit_command(self.inner.layout.work_dir(), script_path);
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.wait_for_queue_room().await?;

            let output = self.exec(&command).await?;

            match classify_submit(&output) {
                SubmitOutcome::Accepted(id) => {
                    debug!(attempt, remote_job_id = %id, "sbatch accepted job");
                    return Ok(id);
                }
                SubmitOutcome::Throttled(stderr) => {
                    if attempt >= config.submit_max_attempts {
                        error!(attempt, "Submit limit still reached, giving up");
                        return Err(SubmissionError::LimitExhausted {
                            attempts: attempt,
                            stderr,
                        }
                        .into());
                    }
                    let delay = config.submit_backoff(attempt);
                    warn!(
                        attempt,
                        max_attempts = config.submit_max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Scheduler submit limit reached, backing off"
                    );
                    sleep(delay).await;
                }
                SubmitOutcome::Rejected(stderr) => {
                    return Err(SubmissionError::Rejected(stderr).into());
                }
                SubmitOutcome::Unparseable(stdout) => {
                    return Err(SubmissionError::InvalidResponse(stdout).into());
                }
            }
        }
    }

    /// Wait out the throttle delay when the account's queue is at the ceiling.
    async fn wait_for_queue_room(&self) -> Result<()> {
        let config = &self.inner.config;
        let output = self.exec(queue_depth_command()).await?;
        let depth = match parse_queue_depth(&output) {
            Ok(depth) => depth,
            Err(e) => {
                warn!(error = %e, "Could not read queue depth, submitting anyway");
                return Ok(());
            }
        };
        if depth < config.queue_ceiling {
            return Ok(());
        }

        warn!(
            depth,
            ceiling = config.queue_ceiling,
            cancel_stalled = config.cancel_stalled_on_throttle,
            "Queue at ceiling before submit"
        );
        if config.cancel_stalled_on_throttle {
            self.cleanup_stalled_jobs().await?;
        }
        sleep(Duration::from_millis(config.throttle_wait_ms)).await;
        Ok(())
    }

    /// Cancel every queued and running job of the remote account.
    ///
    /// This is account-wide: jobs submitted by other processes or by hand
    /// are cancelled too. Jobs tracked here are not marked failed; they
    /// resolve on their next poll.
    #[instrument(
        skip(self),
        fields(subsystem = "jobs", component = "manager", op = "cleanup_stalled_jobs")
    )]
    pub async fn cleanup_stalled_jobs(&self) -> Result<()> {
        let output = self.exec(cancel_all_command()).await?;
        if output.exit_status != 0 {
            return Err(Error::Remote(format!(
                "scancel exited with status {}: {}",
                output.exit_status,
                output.stderr_trimmed()
            )));
        }
        warn!("Cancelled all jobs of the remote account");
        sleep(Duration::from_millis(self.inner.config.cleanup_settle_ms)).await;
        Ok(())
    }

    // =========================================================================
    // POLLING
    // =========================================================================

    /// Ids of non-terminal jobs not currently being polled.
    pub async fn in_flight_jobs(&self) -> Vec<Uuid> {
        self.inner.table.in_flight().await
    }

    /// Run one poll tick for one job and return its status afterwards.
    ///
    /// Never fails because of the remote side: transport errors are counted
    /// on the job and end in `unreachable` once the limit is hit. Errors are
    /// only returned for unknown job ids.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "manager", op = "poll"))]
    pub async fn poll(&self, job_id: Uuid) -> Result<JobStatus> {
        let claim = match self.inner.table.claim(job_id).await? {
            Some(claim) => claim,
            None => return self.status(job_id).await,
        };

        self.tick(&claim).await;
        drop(claim);
        self.status(job_id).await
    }

    async fn status(&self, job_id: Uuid) -> Result<JobStatus> {
        self.inner
            .table
            .get(job_id)
            .await
            .map(|r| r.status)
            .ok_or(Error::JobNotFound(job_id))
    }

    async fn tick(&self, claim: &Claim) {
        let record = &claim.record;
        let job_id = record.job_id;

        if claim.cancel.is_cancelled() {
            self.abandon(record, FailureCause::Cancelled, "cancelled by caller")
                .await;
            return;
        }
        let expired = claim.deadline.is_some_and(|d| Instant::now() >= d);

        let state = match self.query_queue(&record.remote_job_id).await {
            Ok(state) => state,
            Err(_) if expired => {
                self.time_out(record).await;
                return;
            }
            Err(e) => {
                self.poll_failed(job_id, e).await;
                return;
            }
        };

        // A job that already left the queue is collected even past the deadline
        match state {
            QueueState::Pending | QueueState::Running(_) if expired => {
                self.time_out(record).await;
            }
            QueueState::Pending => {
                self.inner.table.reset_poll_failures(job_id).await;
                debug!(%job_id, "Job still pending");
            }
            QueueState::Running(state) => {
                self.inner.table.reset_poll_failures(job_id).await;
                debug!(%job_id, scheduler_state = %state, "Job in queue");
                self.apply(job_id, Transition::to(JobStatus::Running)).await;
            }
            QueueState::Absent => match self.collect(record).await {
                Ok(transition) => {
                    self.inner.table.reset_poll_failures(job_id).await;
                    self.apply(job_id, transition).await;
                }
                Err(e) => self.poll_failed(job_id, e).await,
            },
        }
    }

    async fn time_out(&self, record: &JobRecord) {
        let secs = self.inner.config.job_timeout_secs;
        self.abandon(
            record,
            FailureCause::TimedOut,
            &format!("job exceeded timeout of {}s", secs),
        )
        .await;
    }

    async fn query_queue(&self, remote_job_id: &str) -> Result<QueueState> {
        let output = self.exec(&queue_state_command(remote_job_id)).await?;
        parse_queue_state(&output)
    }

    /// Run one command on a checked-out, connected session.
    async fn exec(&self, command: &str) -> Result<ExecOutput> {
        let session = self.inner.sessions.checkout().await?;
        session.connect().await?;
        session.exec(command).await
    }

    async fn poll_failed(&self, job_id: Uuid, error: Error) {
        let failures = self.inner.table.record_poll_failure(job_id).await;
        let max = self.inner.config.max_poll_failures;
        warn!(%job_id, failures, max_failures = max, error = %error, "Poll failed");
        if failures >= max {
            let failure = JobFailure::new(
                FailureCause::Unreachable,
                format!("{} consecutive poll failures, last: {}", failures, error),
            );
            self.apply(job_id, Transition::failed(failure)).await;
        }
    }

    /// Best-effort `scancel`, then fail the job with `cause`.
    async fn abandon(&self, record: &JobRecord, cause: FailureCause, message: &str) {
        match self.exec(&cancel_command(&record.remote_job_id)).await {
            Ok(output) if output.exit_status == 0 => {}
            Ok(output) => warn!(
                job_id = %record.job_id,
                remote_job_id = %record.remote_job_id,
                stderr = %output.stderr_trimmed(),
                "scancel reported an error"
            ),
            Err(e) => warn!(
                job_id = %record.job_id,
                remote_job_id = %record.remote_job_id,
                error = %e,
                "scancel failed"
            ),
        }
        self.apply(
            record.job_id,
            Transition::failed(JobFailure::new(cause, message)),
        )
        .await;
    }

    /// Download and validate the artifacts of a job that left the queue.
    ///
    /// `Err` means the artifacts could not be fetched for a transport reason
    /// and the tick should count as failed; every verdict about the job itself
    /// is returned as a transition.
    async fn collect(&self, record: &JobRecord) -> Result<Transition> {
        let input_path = record
            .input_ref
            .first()
            .ok_or_else(|| Error::Internal(format!("job {} has no input", record.job_id)))?;
        let artifacts = self.inner.layout.artifacts(record.kind, input_path);
        let dir = tempfile::tempdir()?;

        let mut files = Vec::new();
        for remote in artifacts.all() {
            let local = dir.path().join(
                Path::new(&remote)
                    .file_name()
                    .unwrap_or_else(|| std::ffi::OsStr::new("artifact.json")),
            );
            let fetched = {
                let session = self.inner.sessions.checkout().await?;
                session.download(&remote, &local).await
            };
            match fetched {
                Ok(()) => files.push(tokio::fs::read(&local).await?),
                Err(Error::NotFound(_)) => {
                    return Ok(Transition::failed(JobFailure::new(
                        FailureCause::ResultMissing,
                        format!("job left the queue without writing {}", remote),
                    )));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(match artifacts {
            ArtifactPaths::Embedding { .. } => self.finish_embedding(record, &files).await,
            ArtifactPaths::Generation { .. } => finish_generation(&files),
        })
    }

    async fn finish_embedding(&self, record: &JobRecord, files: &[Vec<u8>]) -> Transition {
        let parsed = match files {
            [embeddings, texts] => serde_json::from_slice::<EmbeddingArtifact>(embeddings)
                .and_then(|e| serde_json::from_slice::<TextsArtifact>(texts).map(|t| (e, t))),
            _ => {
                return Transition::failed(JobFailure::new(
                    FailureCause::InvalidResult,
                    "expected embeddings and texts artifacts",
                ))
            }
        };
        let (embeddings, texts) = match parsed {
            Ok((e, t)) => (e.embeddings, t.texts),
            Err(e) => {
                return Transition::failed(JobFailure::new(
                    FailureCause::InvalidResult,
                    format!("unparseable embedding artifacts: {}", e),
                ))
            }
        };

        let metadata = match &record.metadata {
            Some(metadata) => metadata,
            None => {
                return Transition::failed(JobFailure::new(
                    FailureCause::InvalidResult,
                    "embedding job has no document metadata",
                ))
            }
        };

        match self
            .inner
            .reconciler
            .reconcile(record.job_id, metadata, &embeddings, &texts)
            .await
        {
            ReconcileOutcome::Written => {
                Transition::completed(JobResultData::Embedding { embeddings, texts }, None)
            }
            ReconcileOutcome::Partial(warning) => Transition::completed(
                JobResultData::Embedding { embeddings, texts },
                Some(warning),
            ),
            ReconcileOutcome::Failed(failure) => Transition::failed(failure),
        }
    }

    /// Apply a transition and announce it.
    async fn apply(&self, job_id: Uuid, transition: Transition) {
        let applied = match self.inner.table.transition(job_id, transition).await {
            Ok(Some(applied)) => applied,
            Ok(None) => return,
            Err(e) => {
                error!(%job_id, error = %e, "Failed to apply transition");
                return;
            }
        };
        let record = applied.record;
        let kind = record.kind;

        self.emit(JobEvent::StatusChanged {
            job_id,
            from: applied.previous,
            to: record.status,
        });

        match record.status {
            JobStatus::Running => {
                info!(%job_id, remote_job_id = %record.remote_job_id, "Job running");
            }
            JobStatus::Completed => {
                let elapsed = (record.updated_at - record.submitted_at).num_milliseconds();
                info!(
                    %job_id,
                    remote_job_id = %record.remote_job_id,
                    %kind,
                    items = record.result.as_ref().map(|r| r.item_count()).unwrap_or(0),
                    duration_ms = elapsed.max(0) as u64,
                    "Job completed"
                );
                if let Some(warning) = record.warning.clone() {
                    self.emit(JobEvent::PartialWrite { job_id, warning });
                }
                self.emit(JobEvent::Completed { job_id, kind });
            }
            JobStatus::Failed => {
                if let Some(failure) = record.error.clone() {
                    warn!(
                        %job_id,
                        remote_job_id = %record.remote_job_id,
                        %kind,
                        cause = %failure.cause,
                        error = %failure.message,
                        "Job failed"
                    );
                    self.emit(JobEvent::Failed {
                        job_id,
                        kind,
                        failure,
                    });
                }
            }
            JobStatus::Pending => {}
        }
    }

    // =========================================================================
    // CALLER OPERATIONS
    // =========================================================================

    /// Snapshot of one job.
    pub async fn get(&self, job_id: Uuid) -> Option<JobRecord> {
        self.inner.table.get(job_id).await
    }

    /// Snapshots of every tracked job, oldest first.
    pub async fn list(&self) -> Vec<JobRecord> {
        self.inner.table.list().await
    }

    /// Forget a terminal job and purge its remote files.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "manager", op = "acknowledge"))]
    pub async fn acknowledge(&self, job_id: Uuid) -> Result<JobRecord> {
        let record = self.inner.table.remove_terminal(job_id).await?;

        let mut paths = record.input_ref.clone();
        paths.push(record.script_ref.clone());
        if let Some(input) = record.input_ref.first() {
            paths.extend(self.inner.layout.artifacts(record.kind, input).all());
        }
        self.purge(&paths).await;

        info!(%job_id, status = %record.status, "Job acknowledged");
        Ok(record)
    }

    /// Abandon a job: `scancel` it and record `FAILED/cancelled`.
    ///
    /// If another tick is polling the job right now, the cancellation is
    /// applied on the next tick. Terminal jobs are left unchanged.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "manager", op = "cancel"))]
    pub async fn cancel(&self, job_id: Uuid) -> Result<JobStatus> {
        self.inner.table.cancel_token(job_id).await?.cancel();
        self.poll(job_id).await
    }

    /// Wait until a job is terminal, or `timeout` elapses.
    ///
    /// Relies on something polling the job, usually a running
    /// [`JobMonitor`](crate::JobMonitor).
    pub async fn wait_for_terminal(&self, job_id: Uuid, timeout: Duration) -> Result<JobRecord> {
        let events = self.events();
        tokio::time::timeout(timeout, self.await_terminal(job_id, events))
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "job {} not terminal after {}s",
                    job_id,
                    timeout.as_secs()
                ))
            })?
    }

    async fn await_terminal(
        &self,
        job_id: Uuid,
        mut events: broadcast::Receiver<JobEvent>,
    ) -> Result<JobRecord> {
        loop {
            let record = self.get(job_id).await.ok_or(Error::JobNotFound(job_id))?;
            if record.is_terminal() {
                return Ok(record);
            }
            loop {
                match events.recv().await {
                    Ok(event) if event.job_id() == Some(job_id) && event.is_terminal() => break,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Event receiver lagged, re-reading job");
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(Error::Internal("event channel closed".to_string()));
                    }
                }
            }
        }
    }

    /// Remove remote files, logging but ignoring failures.
    async fn purge(&self, paths: &[String]) {
        let session = match self.inner.sessions.checkout().await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Could not check out a session to purge remote files");
                return;
            }
        };
        for path in paths {
            if let Err(e) = session.remove(path).await {
                warn!(path = %path, error = %e, "Failed to remove remote file");
            }
        }
    }
}

enum LocalInput<'a> {
    File(&'a Path),
    Bytes(&'a [u8]),
}

fn write_temp(bytes: &[u8]) -> Result<tempfile::NamedTempFile> {
    let mut tmp = tempfile::NamedTempFile::new()?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    Ok(tmp)
}

fn finish_generation(files: &[Vec<u8>]) -> Transition {
    let parsed = match files {
        [response] => serde_json::from_slice::<GenerationArtifact>(response),
        _ => {
            return Transition::failed(JobFailure::new(
                FailureCause::InvalidResult,
                "expected one response artifact",
            ))
        }
    };
    match parsed {
        Ok(artifact) => Transition::completed(
            JobResultData::Generation {
                response: artifact.response,
            },
            None,
        ),
        Err(e) => Transition::failed(JobFailure::new(
            FailureCause::InvalidResult,
            format!("unparseable response artifact: {}", e),
        )),
    }
}
