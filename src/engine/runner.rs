//! Job runner: the scheduling loop of one job
//!
//! The runner owns the job's frontier. It claims queued items up to the
//! job's worker limit, spawns one task per attempt, and applies each task's
//! verdict: checkpoint, retry scheduling, dead-lettering and cursor advance.
//! All state changes of an item happen under the job's state lock, so no two
//! workers ever hold the same item.

use crate::config::Config;
use crate::credentials::LeaseToken;
use crate::engine::executor::{AttemptOutcome, FetchExecutor};
use crate::engine::frontier::Frontier;
use crate::job::{ErrorTail, FrontierOrdering, JobProgress, JobSpec, ResumeCursor, WorkItem};
use crate::output::ResultSink;
use crate::pipeline::{FingerprintStore, Item, Pipeline, Processed};
use crate::retry::{AttemptHistory, CircuitBreaker, RetryDecision, RetryPolicy};
use crate::state::{ErrorKind, JobStatus, WorkItemState};
use crate::storage::{CheckpointStore, SharedStore, StorageResult};
use crate::{HarvestError, JobId};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Engine-wide pieces every runner shares
pub(crate) struct EngineContext {
    pub config: Arc<Config>,
    pub store: SharedStore,
    pub executor: FetchExecutor,
    pub sink: Arc<dyn ResultSink>,
    pub fingerprints: FingerprintStore,
    pub retry: RetryPolicy,
    pub breaker: CircuitBreaker,

    /// Engine-wide ceiling on concurrent attempts
    pub workers: Arc<Semaphore>,

    /// Stops runners without touching job status, so jobs stay resumable
    pub shutdown: CancellationToken,

    /// Jobs with a live runner; a runner removes its job on terminal status
    pub jobs: DashMap<JobId, Arc<JobHandle>>,
}

/// Mutable state of one job
pub(crate) struct JobState {
    pub spec: JobSpec,
    pub status: JobStatus,
    pub items: Vec<WorkItem>,
    pub frontier: Frontier,
    pub cursor: ResumeCursor,
    pub duplicates: usize,
    pub errors: ErrorTail,
    pub failure: Option<String>,

    /// Claimed items per domain
    pub busy_domains: HashMap<String, usize>,
}

impl JobState {
    /// State for a job whose queued items all go on the frontier
    pub fn new(spec: JobSpec, status: JobStatus, items: Vec<WorkItem>, cursor: ResumeCursor) -> Self {
        let mut frontier = Frontier::new();
        for item in items.iter().filter(|item| item.state == WorkItemState::Queued) {
            frontier.push(item.position);
        }

        Self {
            spec,
            status,
            items,
            frontier,
            cursor,
            duplicates: 0,
            errors: ErrorTail::default(),
            failure: None,
            busy_domains: HashMap::new(),
        }
    }
}

/// A job as held by the engine
pub(crate) struct JobHandle {
    pub id: JobId,
    pub state: Mutex<JobState>,
    pub pipeline: Pipeline,

    /// Cancel requested by the caller
    pub cancel: CancellationToken,

    /// Wakes the runner after pause/resume
    pub wake: Notify,

    pub status_tx: watch::Sender<JobStatus>,
    pub runner: Mutex<Option<JoinHandle<()>>>,
}

impl JobHandle {
    pub fn new(id: JobId, state: JobState, pipeline: Pipeline) -> Self {
        let (status_tx, _) = watch::channel(state.status);
        Self {
            id,
            state: Mutex::new(state),
            pipeline,
            cancel: CancellationToken::new(),
            wake: Notify::new(),
            status_tx,
            runner: Mutex::new(None),
        }
    }

    pub fn progress(&self) -> JobProgress {
        let state = self.state.lock().unwrap();
        JobProgress::from_items(
            state.status,
            &state.items,
            state.duplicates,
            state.cursor.position(),
            state.errors.to_vec(),
            state.failure.clone(),
        )
    }

    /// Changes the job status, persisting it before anyone can observe it
    pub fn set_status(
        &self,
        store: &SharedStore,
        state: &mut JobState,
        status: JobStatus,
        failure: Option<String>,
    ) -> StorageResult<()> {
        state.status = status;
        if failure.is_some() {
            state.failure = failure;
        }
        let result = store
            .lock()
            .unwrap()
            .update_job_status(self.id, status, state.failure.as_deref());
        self.status_tx.send_replace(status);
        result
    }
}

/// What became of one attempt
#[derive(Debug)]
enum Verdict {
    Done {
        duplicate: bool,
        fingerprint: Option<String>,
    },
    Failed(ErrorKind),
    Cancelled,

    /// Infrastructure fault; fails the job
    Fault(String),
}

/// Why the scheduling loop stopped
enum Exit {
    Finished,
    Cancelled,
    Halted,
    Failed(String),
}

/// Spawns the runner of a job
pub(crate) fn spawn_runner(ctx: Arc<EngineContext>, job: Arc<JobHandle>) -> JoinHandle<()> {
    tokio::spawn(run_job(ctx, job))
}

async fn run_job(ctx: Arc<EngineContext>, job: Arc<JobHandle>) {
    let limit = {
        let state = job.state.lock().unwrap();
        state
            .spec
            .concurrency
            .min(ctx.config.engine.max_job_concurrency)
            .max(1) as usize
    };
    tracing::info!("Job {} running with {} worker(s)", job.id, limit);

    let attempts = CancellationToken::new();
    let mut tasks: JoinSet<(usize, Verdict)> = JoinSet::new();

    let exit = loop {
        let wake = job.wake.notified();
        tokio::pin!(wake);
        wake.as_mut().enable();

        let next_due = {
            let mut state = job.state.lock().unwrap();

            if state.status != JobStatus::Paused {
                state.frontier.promote_due(Instant::now());
                while tasks.len() < limit {
                    let Some(position) = claim_next(&ctx, &mut state) else {
                        break;
                    };
                    let item = &state.items[position];
                    let attempt = Attempt {
                        position,
                        url: item.url.clone(),
                        domain: item.domain.clone(),
                        require_credentials: state.spec.require_credentials,
                    };
                    let (ctx, job, cancel) = (Arc::clone(&ctx), Arc::clone(&job), attempts.clone());
                    tasks.spawn(async move {
                        let verdict = run_attempt(&ctx, &job, &attempt, &cancel).await;
                        (attempt.position, verdict)
                    });
                }
            }

            if tasks.is_empty() && state.frontier.is_empty() {
                break Exit::Finished;
            }
            next_wakeup(&state)
        };

        tokio::select! {
            _ = job.cancel.cancelled() => break Exit::Cancelled,
            _ = ctx.shutdown.cancelled() => break Exit::Halted,
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(reason) = apply_joined(&ctx, &job, joined) {
                    break Exit::Failed(reason);
                }
            }
            _ = &mut wake => {}
            _ = tokio::time::sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => {}
        }
    };

    let archive = !matches!(exit, Exit::Halted);
    attempts.cancel();
    while let Some(joined) = tasks.join_next().await {
        if let Err(reason) = apply_joined(&ctx, &job, joined) {
            tracing::warn!("Job {}: {} while stopping", job.id, reason);
        }
    }

    let mut state = job.state.lock().unwrap();
    let result = match exit {
        Exit::Finished => {
            let dead = state
                .items
                .iter()
                .filter(|item| item.state == WorkItemState::DeadLettered)
                .count();
            tracing::info!(
                "Job {} completed: {} item(s), {} dead-lettered, {} duplicate(s)",
                job.id,
                state.items.len(),
                dead,
                state.duplicates
            );
            job.set_status(&ctx.store, &mut state, JobStatus::Completed, None)
        }
        Exit::Cancelled => {
            let mut cancelled = 0;
            for item in state.items.iter_mut().filter(|item| !item.state.is_terminal()) {
                item.state = WorkItemState::Cancelled;
                item.lease_token = None;
                cancelled += 1;
            }
            state.frontier.clear();
            tracing::info!("Job {} cancelled, {} item(s) left unfinished", job.id, cancelled);

            let stored = ctx.store.lock().unwrap().cancel_items(job.id);
            stored.and_then(|_| job.set_status(&ctx.store, &mut state, JobStatus::Cancelled, None))
        }
        Exit::Halted => {
            tracing::info!("Job {} halted at resume cursor {}", job.id, state.cursor.position());
            Ok(())
        }
        Exit::Failed(reason) => {
            tracing::error!("Job {} failed: {}", job.id, reason);
            job.set_status(&ctx.store, &mut state, JobStatus::Failed, Some(reason))
        }
    };

    drop(state);

    if let Err(e) = result {
        tracing::error!("Failed to record final status of job {}: {}", job.id, e);
    }

    // Terminal jobs are served from the checkpoint store from here on
    if archive {
        ctx.fingerprints.clear_job(job.id);
        ctx.jobs.remove(&job.id);
        tracing::debug!("Job {} archived", job.id);
    }
}

/// When the loop must wake up for a backed-off item
///
/// A paused job admits nothing, so due retries must not wake it.
fn next_wakeup(state: &JobState) -> Option<Instant> {
    if state.status == JobStatus::Paused {
        None
    } else {
        state.frontier.next_due()
    }
}

/// Claims the next item to attempt, moving it Queued → Leased
///
/// Items of a domain whose circuit is open are pushed back until it closes.
/// Under domain-fair ordering, domains with nothing claimed go first.
fn claim_next(ctx: &EngineContext, state: &mut JobState) -> Option<usize> {
    let fair = state.spec.ordering == FrontierOrdering::DomainFair;

    loop {
        let JobState {
            frontier,
            items,
            busy_domains,
            ..
        } = &mut *state;

        let position = if fair {
            frontier
                .pop_where(|p| !busy_domains.contains_key(&items[p].domain))
                .or_else(|| frontier.pop_where(|_| true))
        } else {
            frontier.pop_where(|_| true)
        }?;

        let item = &mut items[position];
        if let Some(until) = ctx.breaker.open_until(&item.domain) {
            tracing::debug!("Deferring {} until the circuit for {} closes", item.url, item.domain);
            frontier.push_delayed(position, until);
            continue;
        }

        if let Err(e) = item.transition(WorkItemState::Leased) {
            tracing::warn!("Skipping item {}: {}", position, e);
            continue;
        }
        *busy_domains.entry(item.domain.clone()).or_default() += 1;
        return Some(position);
    }
}

struct Attempt {
    position: usize,
    url: Url,
    domain: String,
    require_credentials: bool,
}

async fn run_attempt(
    ctx: &EngineContext,
    job: &JobHandle,
    attempt: &Attempt,
    cancel: &CancellationToken,
) -> Verdict {
    let _permit = tokio::select! {
        permit = Arc::clone(&ctx.workers).acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return Verdict::Cancelled,
        },
        _ = cancel.cancelled() => return Verdict::Cancelled,
    };

    let position = attempt.position;
    let on_in_flight = |token: Option<LeaseToken>| -> Result<(), HarvestError> {
        let mut state = job.state.lock().unwrap();
        let item = &mut state.items[position];
        item.transition(WorkItemState::InFlight)?;
        item.lease_token = token;
        Ok(())
    };

    let outcome = match ctx
        .executor
        .attempt(
            &attempt.url,
            &attempt.domain,
            attempt.require_credentials,
            cancel,
            on_in_flight,
        )
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => return Verdict::Fault(e.to_string()),
    };

    let page = match outcome {
        AttemptOutcome::Fetched(page) => page,
        AttemptOutcome::Failed(kind) => return Verdict::Failed(kind),
        AttemptOutcome::Cancelled => return Verdict::Cancelled,
    };

    let item = Item {
        url: attempt.url.to_string(),
        final_url: page.final_url,
        status_code: page.status_code,
        content_type: page.content_type,
        body: page.body,
        fields: serde_json::Map::new(),
    };

    match job.pipeline.process(job.id, item, &ctx.fingerprints) {
        Err(rejection) => {
            tracing::debug!("{} rejected: {}", attempt.url, rejection);
            Verdict::Failed(ErrorKind::ContentError)
        }
        Ok(Processed::Duplicate { .. }) => Verdict::Done {
            duplicate: true,
            fingerprint: None,
        },
        Ok(Processed::Clean { item, fingerprint }) => {
            match ctx.sink.store(job.id, &item).await {
                Ok(()) => Verdict::Done {
                    duplicate: false,
                    fingerprint: Some(fingerprint),
                },
                Err(e) => {
                    // Not stored, so a later attempt may claim the fingerprint
                    ctx.fingerprints.remove(job.id, &fingerprint);
                    Verdict::Fault(format!("result sink failed: {}", e))
                }
            }
        }
    }
}

fn apply_joined(
    ctx: &EngineContext,
    job: &JobHandle,
    joined: Result<(usize, Verdict), tokio::task::JoinError>,
) -> Result<(), String> {
    let (position, verdict) = joined.map_err(|e| format!("worker task failed: {}", e))?;
    apply_verdict(ctx, job, position, verdict).map_err(|e| e.to_string())
}

/// Records the verdict of one attempt
///
/// # Returns
///
/// * `Ok(())` - Verdict applied and checkpointed
/// * `Err(HarvestError)` - Infrastructure fault; the job must fail
fn apply_verdict(
    ctx: &EngineContext,
    job: &JobHandle,
    position: usize,
    verdict: Verdict,
) -> Result<(), HarvestError> {
    let mut guard = job.state.lock().unwrap();
    let state = &mut *guard;

    let domain = state.items[position].domain.clone();
    if let Some(count) = state.busy_domains.get_mut(&domain) {
        *count -= 1;
        if *count == 0 {
            state.busy_domains.remove(&domain);
        }
    }

    match verdict {
        Verdict::Done {
            duplicate,
            fingerprint,
        } => {
            let item = &mut state.items[position];
            item.transition(WorkItemState::Done)?;
            if duplicate {
                state.duplicates += 1;
            }
            let advanced = state.cursor.mark_finished(position);
            ctx.store.lock().unwrap().checkpoint_item(
                job.id,
                &state.items[position],
                fingerprint.as_deref(),
                advanced.then(|| state.cursor.position()),
            )?;
            ctx.breaker.record(&domain, false);
            tracing::debug!("Item {} of job {} done", position, job.id);
        }
        Verdict::Failed(kind) => {
            state.errors.push(kind);
            let item = &mut state.items[position];
            // Failed before the fetch started (no lease, rate-limit denial)
            if item.state == WorkItemState::Leased {
                item.transition(WorkItemState::InFlight)?;
            }
            item.last_error = Some(kind);
            if kind == ErrorKind::ContentError {
                item.content_errors += 1;
            }

            let history = AttemptHistory {
                attempts: item.retry_count + 1,
                content_errors: item.content_errors,
            };
            match ctx.retry.decide(kind, history) {
                RetryDecision::Retry(delay) => {
                    item.transition(WorkItemState::Queued)?;
                    item.retry_count += 1;
                    tracing::info!(
                        "Retrying {} in {:?} after {} (retry {})",
                        item.url,
                        delay,
                        kind,
                        item.retry_count
                    );
                    state.frontier.push_delayed(position, Instant::now() + delay);
                    ctx.store
                        .lock()
                        .unwrap()
                        .checkpoint_item(job.id, &state.items[position], None, None)?;
                }
                RetryDecision::Abandon => {
                    item.transition(WorkItemState::DeadLettered)?;
                    tracing::warn!(
                        "Dead-lettered {} after {} attempt(s): {}",
                        item.url,
                        history.attempts,
                        kind
                    );
                    let advanced = state.cursor.mark_finished(position);
                    ctx.store.lock().unwrap().checkpoint_item(
                        job.id,
                        &state.items[position],
                        None,
                        advanced.then(|| state.cursor.position()),
                    )?;
                    ctx.breaker.record(&domain, true);
                }
            }
        }
        Verdict::Cancelled | Verdict::Fault(_) => {
            // Unfinished: back to the queue, where cancel or recovery finds it
            let item = &mut state.items[position];
            if item.state.is_claimed() {
                item.transition(WorkItemState::Queued)?;
            }
            if let Verdict::Fault(reason) = verdict {
                return Err(HarvestError::Fault(reason));
            }
            if !job.cancel.is_cancelled() && !ctx.shutdown.is_cancelled() {
                state.frontier.push(position);
            }
        }
    }

    Ok(())
}
