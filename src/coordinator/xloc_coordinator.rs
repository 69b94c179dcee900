//! Replica set reconfiguration coordinator
//!
//! A single task drains a FIFO queue of reconfiguration jobs, one at a time:
//!
//! ```text
//! QUEUED -> INVALIDATING -> RECONCILING -> UPDATING -> INSTALL_SCHEDULED -> DONE
//!                 \              \             \
//!                  +--------------+-------------+----> FAILED
//! ```
//!
//! Invalidation freezes the current replicas and collects their state, the
//! reconciler derives the authoritative state, and the update phase pushes it to
//! enough replicas of the proposed set. Only then is the new set handed to the
//! metadata stage to be installed. A job that fails is never retried; its
//! caller is told why through the error classifier.

use crate::common::metrics::METRICS;
use crate::common::{CoordinatorConfig, Error, Result};
use crate::coordinator::capability::{CapabilityContext, CapabilityIssuer};
use crate::coordinator::classify::{ErrorClassifier, ErrorRecord, ErrorType, Errno};
use crate::coordinator::fanout::{FanOut, Phase};
use crate::coordinator::metadata::MetadataStore;
use crate::coordinator::reconcile::Reconciler;
use crate::coordinator::stage::StageHandle;
use crate::coordinator::transport::{
    AuthoritativeState, FileCredentials, OsdDirectory, ReplicaStatus, ReplicaTransport,
};
use crate::coordinator::xloc::{required_acks, ReplicaSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Commits or rolls back a replica set change on the metadata stage
pub trait XLocSetInstaller: Send + Sync {
    /// Make `proposed` the file's replica set and release the lock, atomically.
    /// `current` is the set the job started from.
    fn install_xloc_set(
        &self,
        store: &MetadataStore,
        file_id: &str,
        proposed: &ReplicaSet,
        current: &ReplicaSet,
    ) -> Result<ReplicaSet>;

    /// Keep `current` after a failed job and release the lock, atomically
    fn reject_xloc_set(&self, store: &MetadataStore, file_id: &str, current: &ReplicaSet) -> Result<()>;
}

pub type JobOutcome = std::result::Result<ReplicaSet, ErrorRecord>;

/// Reports a job's outcome back to whoever requested it
pub struct Completion(oneshot::Sender<JobOutcome>);

impl Completion {
    pub fn channel() -> (Self, oneshot::Receiver<JobOutcome>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    pub fn finish(self, outcome: JobOutcome) {
        if self.0.send(outcome).is_err() {
            tracing::debug!("Requester is gone, dropping job outcome");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    AddReplicas,
    RemoveReplicas,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::AddReplicas => f.write_str("add_replicas"),
            JobKind::RemoveReplicas => f.write_str("remove_replicas"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Invalidating,
    Reconciling,
    Updating,
    InstallScheduled,
    Failed,
}

pub struct Job {
    pub id: u64,
    pub kind: JobKind,
    pub file_id: String,
    pub context: CapabilityContext,
    pub current: ReplicaSet,
    pub proposed: ReplicaSet,
    installer: Arc<dyn XLocSetInstaller>,
    completion: Completion,
    state: JobState,
}

impl Job {
    pub fn state(&self) -> JobState {
        self.state
    }

    fn transition(&mut self, next: JobState) {
        tracing::trace!("{:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

/// Everything needed to submit a replica set change
pub struct JobRequest {
    pub file_id: String,
    pub context: CapabilityContext,
    pub current: ReplicaSet,
    pub proposed: ReplicaSet,
    pub installer: Arc<dyn XLocSetInstaller>,
    pub completion: Completion,
}

/// Cheap handle for submitting jobs to the coordinator task
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<Job>,
    next_id: Arc<AtomicU64>,
}

impl CoordinatorHandle {
    /// Queue an add-replicas job and return its ID without waiting
    pub fn submit_add_replicas(&self, request: JobRequest) -> Result<u64> {
        self.submit(JobKind::AddReplicas, request)
    }

    /// Queue a remove-replicas job and return its ID without waiting
    pub fn submit_remove_replicas(&self, request: JobRequest) -> Result<u64> {
        self.submit(JobKind::RemoveReplicas, request)
    }

    fn submit(&self, kind: JobKind, request: JobRequest) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let job = Job {
            id,
            kind,
            file_id: request.file_id,
            context: request.context,
            current: request.current,
            proposed: request.proposed,
            installer: request.installer,
            completion: request.completion,
            state: JobState::Queued,
        };

        // Counted before sending: the runner may dequeue it immediately
        METRICS.queue_depth.inc();
        if let Err(mpsc::error::SendError(job)) = self.tx.send(job) {
            METRICS.queue_depth.dec();
            let message = "replica set coordinator is not running";
            job.completion.finish(Err(ErrorRecord::internal(message)));
            return Err(Error::Internal(message.into()));
        }

        METRICS.jobs_submitted.inc();
        tracing::debug!("Queued {} job {}", kind, id);
        Ok(id)
    }
}

pub struct XLocSetCoordinator {
    issuer: CapabilityIssuer,
    transport: Arc<dyn ReplicaTransport>,
    reconciler: Arc<dyn Reconciler>,
    directory: Arc<OsdDirectory>,
    classifier: ErrorClassifier,
    stage: StageHandle,
    lease_timeout: Duration,
    rpc_timeout: Duration,
}

impl XLocSetCoordinator {
    pub fn new(
        config: &CoordinatorConfig,
        transport: Arc<dyn ReplicaTransport>,
        reconciler: Arc<dyn Reconciler>,
        stage: StageHandle,
    ) -> Self {
        Self {
            issuer: CapabilityIssuer::from_config(config),
            transport,
            reconciler,
            directory: Arc::new(OsdDirectory::new(config.osds.clone())),
            classifier: ErrorClassifier::new(config.metadata_master.clone()),
            stage,
            lease_timeout: config.lease_timeout(),
            rpc_timeout: config.rpc_timeout(),
        }
    }

    pub fn with_directory(mut self, directory: OsdDirectory) -> Self {
        self.directory = Arc::new(directory);
        self
    }

    /// Spawn the coordinator task. It stops once every handle is dropped.
    pub fn start(self) -> (CoordinatorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = CoordinatorHandle {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<Job>) {
        tracing::info!("XLocSet coordinator started");
        while let Some(job) = rx.recv().await {
            METRICS.queue_depth.dec();
            let span = tracing::info_span!(
                "xloc_job",
                job_id = job.id,
                file_id = %job.file_id,
                kind = %job.kind
            );
            self.process(job).instrument(span).await;
        }
        tracing::info!("XLocSet coordinator stopped");
    }

    async fn process(&self, mut job: Job) {
        let started = Instant::now();
        tracing::info!(
            "Changing replica set of {}: {:?} -> {:?}",
            job.file_id,
            job.current.head_osds(),
            job.proposed.head_osds()
        );

        let result = self.reconfigure(&mut job).await;
        METRICS
            .job_duration
            .observe(started.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok(()) => self.schedule_install(job),
            Err(e) => self.abandon(job, e),
        }
    }

    async fn reconfigure(&self, job: &mut Job) -> Result<()> {
        job.transition(JobState::Invalidating);
        let capability = self.issuer.issue(&job.file_id, &job.context);
        let read_only = job.current.update_policy().is_read_only();

        let credentials = Arc::new(FileCredentials {
            capability: capability.clone(),
            xlocs: job.current.clone(),
        });
        let statuses = self
            .invalidate_replicas(&job.file_id, &job.current, credentials, read_only)
            .await?;

        if read_only {
            tracing::debug!("Read-only replication is coordinated by clients, nothing to push");
            return Ok(());
        }

        job.transition(JobState::Reconciling);
        let heads = job.current.head_osds();
        let mut state = self.reconciler.reconcile(&job.file_id, &heads, &statuses)?;
        if job.kind == JobKind::RemoveReplicas {
            state.exclude(&job.current.heads_missing_from(&job.proposed));
        }

        job.transition(JobState::Updating);
        // Replicas being added only know about themselves through the proposed set
        let xlocs = match job.kind {
            JobKind::AddReplicas => job.proposed.clone(),
            JobKind::RemoveReplicas => job.current.clone(),
        };
        let credentials = Arc::new(FileCredentials { capability, xlocs });
        self.update_replicas(&job.file_id, &job.proposed, credentials, Arc::new(state))
            .await
    }

    /// Invalidate every replica of `current` and return the status slot of each
    async fn invalidate_replicas(
        &self,
        file_id: &str,
        current: &ReplicaSet,
        credentials: Arc<FileCredentials>,
        read_only: bool,
    ) -> Result<Vec<Option<ReplicaStatus>>> {
        let targets = current.head_osds();
        let fan_out = if read_only {
            FanOut::new(Phase::Invalidate, 1, self.rpc_timeout)
        } else {
            FanOut::new(Phase::Invalidate, required_acks(targets.len()), self.rpc_timeout)
                .wait_for_primary(self.lease_timeout)
        };

        let responses = fan_out
            .run(&targets, |osd| {
                let transport = self.transport.clone();
                let directory = self.directory.clone();
                let credentials = credentials.clone();
                let file_id = file_id.to_string();
                async move {
                    let address = directory.resolve(&osd)?;
                    transport.invalidate(&address, &credentials, &file_id).await
                }
            })
            .await?;

        tracing::debug!(
            "Invalidated {} of {} replicas",
            responses.iter().filter(|r| r.is_some()).count(),
            targets.len()
        );
        Ok(responses
            .into_iter()
            .map(|response| response.and_then(|r| r.status))
            .collect())
    }

    /// Push `state` to enough replicas of `proposed` that a quorum of it is up to date
    async fn update_replicas(
        &self,
        file_id: &str,
        proposed: &ReplicaSet,
        credentials: Arc<FileCredentials>,
        state: Arc<AuthoritativeState>,
    ) -> Result<()> {
        let heads = proposed.head_osds();
        let up_to_date = heads.iter().filter(|head| state.holds_all(head)).count();
        let required = required_acks(heads.len()).saturating_sub(up_to_date);
        if required == 0 {
            tracing::debug!(
                "{} of {} proposed replicas already hold the authoritative state",
                up_to_date,
                heads.len()
            );
            return Ok(());
        }

        let targets: Vec<String> = heads
            .into_iter()
            .filter(|head| !state.holds_all(head))
            .collect();
        tracing::debug!("Updating {} of {:?}", required, targets);

        FanOut::new(Phase::Update, required, self.rpc_timeout)
            .run(&targets, |osd| {
                let transport = self.transport.clone();
                let directory = self.directory.clone();
                let credentials = credentials.clone();
                let state = state.clone();
                let file_id = file_id.to_string();
                async move {
                    let address = directory.resolve(&osd)?;
                    transport
                        .fetch_invalidated(&address, &credentials, &file_id, &state)
                        .await
                }
            })
            .await?;
        Ok(())
    }

    fn schedule_install(&self, mut job: Job) {
        job.transition(JobState::InstallScheduled);
        let Job {
            id,
            file_id,
            current,
            proposed,
            installer,
            completion,
            ..
        } = job;
        let classifier = self.classifier.clone();
        let callback_file_id = file_id.clone();

        let scheduled = self.stage.enqueue_internal_callback(file_id, move |store| {
            match installer.install_xloc_set(store, &callback_file_id, &proposed, &current) {
                Ok(installed) => {
                    METRICS.jobs_installed.inc();
                    tracing::info!(
                        "Job {}: installed replica set version {} of {} with {} replicas",
                        id,
                        installed.version(),
                        callback_file_id,
                        installed.len()
                    );
                    completion.finish(Ok(installed));
                }
                Err(e) => {
                    METRICS.jobs_failed.inc();
                    // Replicas are invalidated: keep the current set under a new version
                    if let Err(reject) = installer.reject_xloc_set(store, &callback_file_id, &current) {
                        tracing::warn!(
                            "Job {}: could not release replica set lock of {}: {}",
                            id,
                            callback_file_id,
                            reject
                        );
                    }
                    completion.finish(Err(classifier.report(&callback_file_id, &e)));
                }
            }
        });
        if let Err(e) = scheduled {
            tracing::error!("Job {}: could not schedule install: {}", id, e);
        }
    }

    fn abandon(&self, mut job: Job, err: Error) {
        job.transition(JobState::Failed);
        METRICS.jobs_failed.inc();
        let record = self.classifier.report(&job.file_id, &err);
        match (record.error_type, record.errno) {
            (ErrorType::Redirect, _) => METRICS.jobs_redirected.inc(),
            (ErrorType::Errno, Some(Errno::EPERM)) => METRICS.jobs_permission_denied.inc(),
            _ => {}
        }

        let Job {
            id,
            file_id,
            current,
            installer,
            completion,
            ..
        } = job;
        let callback_file_id = file_id.clone();

        let scheduled = self.stage.enqueue_internal_callback(file_id, move |store| {
            if let Err(e) = installer.reject_xloc_set(store, &callback_file_id, &current) {
                tracing::warn!(
                    "Job {}: could not release replica set lock of {}: {}",
                    id,
                    callback_file_id,
                    e
                );
            }
            completion.finish(Err(record));
        });
        if let Err(e) = scheduled {
            tracing::error!("Job {}: could not report failure: {}", id, e);
        }
    }
}
