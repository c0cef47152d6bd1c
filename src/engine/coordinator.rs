//! Engine coordinator: the public face of the Job Scheduler
//!
//! This module wires the shared components together and exposes the job
//! lifecycle:
//! - Submitting jobs and persisting their frontier
//! - Pause, resume and cancel
//! - Progress queries and per-item inspection
//! - Credential upload and pool inspection
//! - Recovering unfinished jobs after a restart

use crate::config::{validate, validate_credential_spec, validate_job_spec, Config};
use crate::credentials::{
    persist_credentials, spawn_reclaimer, CredentialId, CredentialPool, CredentialSpec,
    CredentialView, PoolStats,
};
use crate::engine::executor::FetchExecutor;
use crate::engine::fetcher::{Fetcher, HttpFetcher};
use crate::engine::runner::{spawn_runner, EngineContext, JobHandle, JobState};
use crate::governor::{RateGovernor, RateLimit};
use crate::job::{JobProgress, JobSpec, ResumeCursor, WorkItem};
use crate::output::{load_job_progress, ResultSink};
use crate::pipeline::{build_stages, FingerprintStore, Pipeline, Stage};
use crate::retry::{CircuitBreaker, RetryPolicy};
use crate::state::{JobStatus, WorkItemState};
use crate::storage::{CheckpointStore, JobRecord, SharedStore, SqliteStore, StorageError};
use crate::{HarvestError, JobId, Result};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct EngineInner {
    ctx: Arc<EngineContext>,
    credentials: Arc<CredentialPool>,
    governor: Arc<RateGovernor>,
    reclaimer: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.ctx.shutdown.cancel();
    }
}

/// The crawl orchestration engine
///
/// Cheap to clone; clones share every job, the credential pool and the
/// rate buckets. Must be created inside a Tokio runtime.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Creates an engine over an opened checkpoint store
    ///
    /// Restores the persisted credential pool and starts the lease
    /// reclaimer. Jobs from a previous process are not resumed until
    /// [`Engine::recover`] is called.
    ///
    /// # Arguments
    ///
    /// * `config` - Validated engine configuration
    /// * `store` - The checkpoint store
    /// * `fetcher` - Network side of every attempt
    /// * `sink` - Where clean items go
    pub fn new(
        config: Config,
        store: SqliteStore,
        fetcher: Arc<dyn Fetcher>,
        sink: Arc<dyn ResultSink>,
    ) -> Result<Self> {
        validate(&config)?;

        let records = store.load_credentials()?;
        let store: SharedStore = Arc::new(Mutex::new(store));

        let credentials = Arc::new(CredentialPool::new(config.credentials.clone()));
        credentials.restore(records);
        credentials.take_dirty();

        let governor = Arc::new(RateGovernor::new(&config.rate));
        let executor = FetchExecutor::new(
            fetcher,
            Arc::clone(&credentials),
            Arc::clone(&governor),
            config.engine.fetch_timeout(),
            config.engine.cancel_grace(),
        );

        let shutdown = CancellationToken::new();
        let reclaimer = spawn_reclaimer(
            Arc::clone(&credentials),
            Arc::clone(&store),
            config.credentials.reclaim_interval(),
            shutdown.clone(),
        );

        let ctx = Arc::new(EngineContext {
            workers: Arc::new(Semaphore::new(config.engine.max_workers as usize)),
            retry: RetryPolicy::new(&config.retry),
            breaker: CircuitBreaker::new(&config.circuit_breaker),
            fingerprints: FingerprintStore::new(),
            config: Arc::new(config),
            store,
            executor,
            sink,
            shutdown,
            jobs: DashMap::new(),
        });

        Ok(Self {
            inner: Arc::new(EngineInner {
                ctx,
                credentials,
                governor,
                reclaimer: Mutex::new(Some(reclaimer)),
            }),
        })
    }

    /// Creates an engine that fetches over HTTP with the configured user agent
    pub fn with_http(config: Config, store: SqliteStore, sink: Arc<dyn ResultSink>) -> Result<Self> {
        let fetcher = HttpFetcher::new(&config.user_agent, config.engine.fetch_timeout())?;
        Self::new(config, store, Arc::new(fetcher), sink)
    }

    /// Submits a job
    ///
    /// Every entry URL is validated up front; one bad URL rejects the whole
    /// submission. The job and its frontier are persisted before this
    /// returns.
    pub fn submit(&self, spec: JobSpec) -> Result<JobId> {
        self.submit_with_stages(spec, Vec::new())
    }

    /// Submits a job whose pipeline ends with caller-provided stages
    ///
    /// The extra stages run after the built-in ones. They are not persisted:
    /// a recovered job runs its built-in stages only.
    pub fn submit_with_stages(&self, spec: JobSpec, extra: Vec<Arc<dyn Stage>>) -> Result<JobId> {
        validate_job_spec(&spec)?;

        let items = spec
            .entry_urls
            .iter()
            .enumerate()
            .map(|(position, url)| WorkItem::new(position, url))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stages = build_stages(&spec)?;
        stages.extend(extra);
        let pipeline = Pipeline::new(stages, spec.fingerprint_fields.clone());

        let id = JobId::new_v4();
        let record = JobRecord::new(id, spec.clone());
        self.inner.ctx.store.lock().unwrap().create_job(&record, &items)?;

        tracing::info!(
            "Submitted job {} '{}' with {} item(s)",
            id,
            spec.name,
            items.len()
        );
        self.start(id, JobState::new(spec, JobStatus::Running, items, ResumeCursor::new()), pipeline)?;
        Ok(id)
    }

    /// Suspends admission of new attempts; in-flight attempts finish
    pub fn pause(&self, job: JobId) -> Result<()> {
        let handle = self.handle(job)?;
        let mut state = handle.state.lock().unwrap();
        match state.status {
            JobStatus::Running | JobStatus::Pending => {
                handle.set_status(&self.inner.ctx.store, &mut state, JobStatus::Paused, None)?;
                tracing::info!("Job {} paused", job);
                Ok(())
            }
            JobStatus::Paused => Ok(()),
            status => Err(HarvestError::JobFinished { job, status }),
        }
    }

    /// Re-admits work from the unfinished frontier
    pub fn resume(&self, job: JobId) -> Result<()> {
        let handle = self.handle(job)?;
        {
            let mut state = handle.state.lock().unwrap();
            match state.status {
                JobStatus::Paused => {
                    handle.set_status(&self.inner.ctx.store, &mut state, JobStatus::Running, None)?;
                    tracing::info!("Job {} resumed", job);
                }
                JobStatus::Running | JobStatus::Pending => return Ok(()),
                status => return Err(HarvestError::JobFinished { job, status }),
            }
        }
        handle.wake.notify_one();
        Ok(())
    }

    /// Cancels a job
    ///
    /// In-flight attempts see the signal at their next suspension point;
    /// unfinished items end up Cancelled. Use [`Engine::wait`] to observe the
    /// final state.
    pub fn cancel(&self, job: JobId) -> Result<()> {
        let handle = self.handle(job)?;
        let status = handle.state.lock().unwrap().status;
        if status.is_terminal() {
            return Err(HarvestError::JobFinished { job, status });
        }
        tracing::info!("Cancelling job {}", job);
        handle.cancel.cancel();
        Ok(())
    }

    /// Current progress of a job
    ///
    /// Jobs from earlier processes that were not recovered are read from the
    /// checkpoint store.
    pub fn status(&self, job: JobId) -> Result<JobProgress> {
        if let Some(handle) = self.inner.ctx.jobs.get(&job) {
            return Ok(handle.progress());
        }

        let store = self.inner.ctx.store.lock().unwrap();
        match store.get_job(job) {
            Ok(record) => Ok(load_job_progress(&*store, &record)?),
            Err(StorageError::JobNotFound(_)) => Err(HarvestError::UnknownJob(job)),
            Err(e) => Err(e.into()),
        }
    }

    /// Per-item state, retry count and last error, in frontier order
    pub fn item_states(&self, job: JobId) -> Result<Vec<WorkItem>> {
        if let Some(handle) = self.inner.ctx.jobs.get(&job) {
            return Ok(handle.state.lock().unwrap().items.clone());
        }

        let store = self.inner.ctx.store.lock().unwrap();
        match store.load_items(job)? {
            items if !items.is_empty() => Ok(items),
            _ => store.get_job(job).map(|_| Vec::new()).map_err(|e| match e {
                StorageError::JobNotFound(_) => HarvestError::UnknownJob(job),
                e => e.into(),
            }),
        }
    }

    /// Waits until a job reaches a terminal status
    ///
    /// A job that already finished and was archived is answered from the
    /// checkpoint store.
    pub async fn wait(&self, job: JobId) -> Result<JobProgress> {
        let handle = match self.handle(job) {
            Ok(handle) => handle,
            Err(HarvestError::JobFinished { .. }) => return self.status(job),
            Err(e) => return Err(e),
        };
        let mut rx = handle.status_tx.subscribe();
        rx.wait_for(|status| status.is_terminal())
            .await
            .map_err(|_| HarvestError::UnknownJob(job))?;
        Ok(handle.progress())
    }

    /// Adds an uploaded credential to the pool and persists it
    pub fn upload_credential(&self, spec: CredentialSpec) -> Result<CredentialId> {
        validate_credential_spec(&spec)?;
        let scope = spec.scope.clone();
        let id = self.inner.credentials.add(spec);
        persist_credentials(&self.inner.credentials, &self.inner.ctx.store)?;
        tracing::info!("Credential {} uploaded for {}", id, scope);
        Ok(id)
    }

    /// Snapshot of every credential; payloads are never exposed
    pub fn credentials(&self) -> Vec<CredentialView> {
        self.inner.credentials.views()
    }

    /// Available, leased and invalid counts per scope
    pub fn credential_stats(&self) -> BTreeMap<String, PoolStats> {
        self.inner.credentials.stats()
    }

    /// Restarts every unfinished job found in the checkpoint store
    ///
    /// Items caught Leased or InFlight by the crash go back to Queued; Done
    /// items, fingerprints and the resume cursor are reloaded so completed
    /// work is never fetched again. Paused jobs come back paused.
    ///
    /// # Returns
    ///
    /// The identifiers of the recovered jobs
    pub fn recover(&self) -> Result<Vec<JobId>> {
        let records = self.inner.ctx.store.lock().unwrap().load_unfinished_jobs()?;
        let mut recovered = Vec::new();

        for record in records {
            if self.inner.ctx.jobs.contains_key(&record.id) {
                continue;
            }

            let (mut items, fingerprints) = {
                let store = self.inner.ctx.store.lock().unwrap();
                (store.load_items(record.id)?, store.load_fingerprints(record.id)?)
            };

            let mut reset = 0;
            for item in items.iter_mut().filter(|item| item.state.is_claimed()) {
                item.state = WorkItemState::Queued;
                item.lease_token = None;
                reset += 1;
            }

            let finished = items
                .iter()
                .filter(|item| item.state.is_terminal())
                .map(|item| item.position);
            let cursor = ResumeCursor::restore(record.resume_cursor, finished);

            let loaded = self.inner.ctx.fingerprints.load(record.id, fingerprints);
            let pipeline = Pipeline::new(build_stages(&record.spec)?, record.spec.fingerprint_fields.clone());

            let status = match record.status {
                JobStatus::Paused => JobStatus::Paused,
                _ => JobStatus::Running,
            };

            tracing::info!(
                "Recovering job {} '{}': resume cursor {}, {} item(s) requeued, {} fingerprint(s)",
                record.id,
                record.name,
                cursor.position(),
                reset,
                loaded
            );

            self.start(record.id, JobState::new(record.spec, status, items, cursor), pipeline)?;
            recovered.push(record.id);
        }

        Ok(recovered)
    }

    /// Stops every runner and the reclaimer, leaving jobs resumable
    ///
    /// Unlike cancel, job status is left as it is, so [`Engine::recover`] in
    /// a later process picks the jobs up again.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down engine");
        self.inner.ctx.shutdown.cancel();

        let handles: Vec<Arc<JobHandle>> = self
            .inner
            .ctx
            .jobs
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for handle in handles {
            let runner = handle.runner.lock().unwrap().take();
            if let Some(runner) = runner {
                if let Err(e) = runner.await {
                    tracing::warn!("Runner of job {} ended abnormally: {}", handle.id, e);
                }
            }
        }

        let reclaimer = self.inner.reclaimer.lock().unwrap().take();
        if let Some(reclaimer) = reclaimer {
            if let Err(e) = reclaimer.await {
                tracing::warn!("Credential reclaimer ended abnormally: {}", e);
            }
        }
    }

    /// Identifiers of the jobs this engine holds
    pub fn jobs(&self) -> Vec<JobId> {
        self.inner.ctx.jobs.iter().map(|entry| *entry.key()).collect()
    }

    /// The live handle of a job
    ///
    /// # Returns
    ///
    /// * `Ok(handle)` - The job has a runner, running or paused
    /// * `Err(JobFinished)` - The job reached a terminal status and was archived
    /// * `Err(UnknownJob)` - No such job, or a stored job not yet recovered
    fn handle(&self, job: JobId) -> Result<Arc<JobHandle>> {
        if let Some(entry) = self.inner.ctx.jobs.get(&job) {
            return Ok(Arc::clone(entry.value()));
        }

        let store = self.inner.ctx.store.lock().unwrap();
        match store.get_job(job) {
            Ok(record) if record.status.is_terminal() => Err(HarvestError::JobFinished {
                job,
                status: record.status,
            }),
            Ok(_) | Err(StorageError::JobNotFound(_)) => Err(HarvestError::UnknownJob(job)),
            Err(e) => Err(e.into()),
        }
    }

    fn start(&self, id: JobId, mut state: JobState, pipeline: Pipeline) -> Result<()> {
        for limit in &state.spec.rate_limits {
            self.inner.governor.set_limit(
                &limit.domain,
                RateLimit {
                    capacity: limit.capacity,
                    refill_per_sec: limit.refill_per_sec,
                },
            );
        }

        let status = state.status;
        state.status = JobStatus::Pending;
        let handle = Arc::new(JobHandle::new(id, state, pipeline));
        {
            let mut state = handle.state.lock().unwrap();
            handle.set_status(&self.inner.ctx.store, &mut state, status, None)?;
        }

        self.inner.ctx.jobs.insert(id, Arc::clone(&handle));
        let runner = spawn_runner(Arc::clone(&self.inner.ctx), Arc::clone(&handle));
        *handle.runner.lock().unwrap() = Some(runner);
        Ok(())
    }
}
