//! Stage worker pools.
//!
//! Each worker loops: claim a job, check the store, generate, validate,
//! persist. Failures are retried within the budget and then recorded as a
//! failed status; nothing a job does can take a worker down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use coursesmith_generation::{GenerationClient, StageOutput, generate_validated};
use coursesmith_shared::{
    CoursesmithError, GenerationStatus, Module, OrchestratorConfig, Result, Stage, TopicRef,
};
use coursesmith_storage::{ArtifactData, EntityKey, Storage};

use crate::job::{Job, JobOutcome, JobPayload};
use crate::scheduler::{Enqueued, Scheduler};

// ---------------------------------------------------------------------------
// Pacing
// ---------------------------------------------------------------------------

/// Spaces out job starts: after every `batch_size` starts, the next start
/// waits `delay`. Shared by all workers of a stage, so the pause applies to
/// the whole pool.
pub struct BatchPacer {
    batch_size: usize,
    delay: Duration,
    started: Mutex<usize>,
}

impl BatchPacer {
    pub fn new(batch_size: usize, delay: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            delay,
            started: Mutex::new(0),
        }
    }

    /// Wait for a start slot.
    pub async fn admit(&self) {
        let mut started = self.started.lock().await;
        if *started >= self.batch_size {
            if !self.delay.is_zero() {
                debug!(delay_ms = self.delay.as_millis() as u64, "batch full, pausing");
                // Holding the lock makes every other worker wait out the pause too.
                tokio::time::sleep(self.delay).await;
            }
            *started = 0;
        }
        *started += 1;
    }
}

// ---------------------------------------------------------------------------
// Worker context
// ---------------------------------------------------------------------------

/// Everything a worker needs, shared across pools.
pub struct WorkerContext {
    pub scheduler: Arc<Scheduler>,
    pub storage: Arc<Storage>,
    pub client: Arc<dyn GenerationClient>,
    pub config: OrchestratorConfig,
}

/// Handle to the workers of one stage.
pub struct WorkerPool {
    stage: Stage,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers for `stage`. They exit when `shutdown` flips or
    /// its sender is dropped.
    pub fn spawn(
        stage: Stage,
        count: usize,
        context: Arc<WorkerContext>,
        pacer: Option<Arc<BatchPacer>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let handles = (0..count.max(1))
            .map(|i| {
                let name = format!("{stage}-worker-{i}");
                let span = info_span!("worker", worker.name = %name);
                let worker = run_worker(stage, context.clone(), pacer.clone(), shutdown.clone());
                tokio::spawn(worker.instrument(span))
            })
            .collect();
        Self { stage, handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(error) = handle.await {
                warn!(stage = %self.stage, %error, "worker task panicked");
            }
        }
    }
}

async fn run_worker(
    stage: Stage,
    context: Arc<WorkerContext>,
    pacer: Option<Arc<BatchPacer>>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let job = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            job = next_job(stage, &context, pacer.as_deref()) => job,
        };
        process_job(&context, job).await;
    }
    debug!("worker stopped");
}

/// Wait for a start slot, then claim the next job. The job stays waiting,
/// and can still be escalated or overtaken, until the pause is over.
async fn next_job(stage: Stage, context: &WorkerContext, pacer: Option<&BatchPacer>) -> Job {
    if let Some(pacer) = pacer {
        pacer.admit().await;
    }
    context.scheduler.dequeue(stage).await
}

// ---------------------------------------------------------------------------
// Job processing
// ---------------------------------------------------------------------------

#[instrument(
    skip_all,
    fields(key = %job.key, stage = %job.stage(), tier = %job.tier, attempt = job.attempts)
)]
async fn process_job(context: &WorkerContext, job: Job) {
    let outcome = match attempt(context, &job).await {
        Ok(outcome) => Some(outcome),
        Err(error) => handle_failure(context, &job, error).await,
    };

    // `None` means the job went back to its lane.
    if let Some(outcome) = outcome {
        info!(?outcome, attempts = job.attempts, "job finished");
        context.scheduler.finish(&job, outcome).await;
    }
}

/// One attempt. Errors are classified by [`handle_failure`].
async fn attempt(context: &WorkerContext, job: &Job) -> Result<JobOutcome> {
    let entity = job.payload.entity();
    if context.storage.find_artifact(&entity).await?.is_some() {
        debug!("artifact already stored");
        return Ok(JobOutcome::Duplicate);
    }
    if !context.scheduler.is_current(job).await {
        return Ok(JobOutcome::Cancelled);
    }
    context
        .storage
        .update_status(&entity, GenerationStatus::Generating)
        .await?;

    let shape = context.config.outline_shape;
    let stage_context = job.payload.stage_context(shape);
    let output = generate_validated(context.client.as_ref(), &stage_context, shape).await?;

    if !context.scheduler.is_current(job).await {
        info!("job cancelled during generation, discarding result");
        return Ok(JobOutcome::Cancelled);
    }

    match (&job.payload, output) {
        (JobPayload::Outline { course_title, .. }, StageOutput::Outline(modules)) => {
            let outcome = persist(context, &entity, &ArtifactData::Outline(modules.clone())).await?;
            if outcome == JobOutcome::Completed {
                let created = fan_out_topics(context, job, course_title, &modules).await?;
                info!(topics = created, "outline fanned out");
            }
            Ok(outcome)
        }
        (JobPayload::Topic { .. }, StageOutput::Topic(content)) => {
            persist(context, &entity, &ArtifactData::Topic(content)).await
        }
        (_, other) => Err(CoursesmithError::malformed(format!(
            "{} job produced mismatched output {other:?}",
            job.stage()
        ))),
    }
}

/// Create the artifact; losing a persist race to another writer is benign.
async fn persist(
    context: &WorkerContext,
    entity: &EntityKey,
    data: &ArtifactData,
) -> Result<JobOutcome> {
    match context.storage.create_artifact(entity, data).await {
        Ok(()) => Ok(JobOutcome::Completed),
        Err(CoursesmithError::DuplicateKey(existing)) => {
            debug!(%existing, "artifact written concurrently, keeping existing");
            Ok(JobOutcome::Duplicate)
        }
        Err(e) => Err(e),
    }
}

/// Enqueue a topic job for every topic of a fresh outline that is not
/// already stored, at the outline job's tier. Stops when the outline job is
/// cancelled.
async fn fan_out_topics(
    context: &WorkerContext,
    job: &Job,
    course_title: &str,
    modules: &[Module],
) -> Result<usize> {
    let waiting = job.tier.waiting_status();
    let mut created = 0;

    for module in modules {
        for name in &module.submodules {
            let topic = TopicRef::new(course_title, &module.title, name);
            if context.storage.get_topic(&topic).await?.is_some() {
                continue;
            }

            let payload = JobPayload::Topic {
                course_id: job.payload.course_id(),
                topic: topic.clone(),
            };
            context.storage.set_topic_status(&topic, waiting).await?;
            match context.scheduler.enqueue_child(job, payload, job.tier).await {
                Some(Enqueued::Created) => created += 1,
                Some(Enqueued::Existing(_)) => {}
                None => {
                    info!(created, "outline job cancelled, stopping fan-out");
                    return Ok(created);
                }
            }
        }
    }
    Ok(created)
}

/// Decide what a failed attempt means. `None` means the job was requeued.
async fn handle_failure(
    context: &WorkerContext,
    job: &Job,
    error: CoursesmithError,
) -> Option<JobOutcome> {
    // A cancelled job must not write over whatever replaced its entity.
    if !context.scheduler.is_current(job).await {
        info!(%error, "job cancelled during attempt, dropping failure");
        return Some(JobOutcome::Cancelled);
    }

    let entity = job.payload.entity();
    match error {
        CoursesmithError::EntityNotFound(what) => {
            info!(%what, "entity no longer exists, discarding job");
            Some(JobOutcome::Orphaned)
        }
        CoursesmithError::DuplicateKey(_) => Some(JobOutcome::Duplicate),
        error if job.attempts < context.config.retry_budget => {
            warn!(%error, attempts = job.attempts, "attempt failed, retrying");
            record_status(context, &entity, job.tier.waiting_status()).await;
            if context.scheduler.requeue(job).await {
                None
            } else {
                Some(JobOutcome::Cancelled)
            }
        }
        error => {
            warn!(%error, attempts = job.attempts, "retry budget exhausted");
            record_status(context, &entity, GenerationStatus::Failed).await;
            Some(JobOutcome::Failed)
        }
    }
}

/// Best-effort status write from the failure path.
async fn record_status(context: &WorkerContext, entity: &EntityKey, status: GenerationStatus) {
    match context.storage.update_status(entity, status).await {
        Ok(()) | Err(CoursesmithError::EntityNotFound(_)) => {}
        Err(error) => warn!(%entity, %status, %error, "failed to record status"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn pacer_pauses_after_each_full_batch() {
        let pacer = BatchPacer::new(2, Duration::from_millis(100));
        let start = Instant::now();
        pacer.admit().await;
        pacer.admit().await;
        assert!(start.elapsed() < Duration::from_millis(100));

        pacer.admit().await;
        assert!(start.elapsed() >= Duration::from_millis(100));
        pacer.admit().await;
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn zero_delay_pacer_never_waits() {
        let pacer = BatchPacer::new(1, Duration::ZERO);
        let start = Instant::now();
        for _ in 0..50 {
            pacer.admit().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
