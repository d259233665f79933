//! Request boundary: the handle callers use to ask for course content.
//!
//! Every request is cache-first. A stored artifact is returned immediately;
//! otherwise the request enqueues (or escalates) a job and returns the
//! current status. Results become visible through later requests.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{info, instrument, warn};

use coursesmith_generation::{GenerationClient, StageContext, StageOutput, generate_validated};
use coursesmith_shared::{
    CourseOutline, CoursesmithError, GenerationStatus, Module, OrchestratorConfig, Result, Stage,
    Tier, TopicContent, TopicRef, canonical_title, normalize_identifier,
};
use coursesmith_storage::{DeletedCourse, Storage};

use crate::escalation::Escalator;
use crate::job::{JobEvent, JobPayload};
use crate::keying::JobKey;
use crate::scheduler::{Enqueued, Scheduler};
use crate::worker::{BatchPacer, WorkerContext, WorkerPool};

/// Answer to an outline request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineResponse {
    pub status: GenerationStatus,
    /// Present only when `status` is completed.
    pub modules: Option<Vec<Module>>,
}

/// Answer to a topic request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicResponse {
    pub status: GenerationStatus,
    /// Present only when `status` is completed.
    pub content: Option<TopicContent>,
}

/// What [`Orchestrator::delete_course`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub jobs_cancelled: usize,
    pub removed: DeletedCourse,
}

/// Generation progress of one course.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseProgress {
    pub title: String,
    pub status: GenerationStatus,
    pub modules: usize,
    pub topics_total: usize,
    pub topics_completed: u64,
    /// Outline and topic jobs still waiting or running.
    pub live_jobs: usize,
}

/// Owns the scheduler and the worker pools.
pub struct Orchestrator {
    scheduler: Arc<Scheduler>,
    storage: Arc<Storage>,
    client: Arc<dyn GenerationClient>,
    escalator: Escalator,
    config: OrchestratorConfig,
    shutdown: watch::Sender<bool>,
    pools: Vec<WorkerPool>,
}

impl Orchestrator {
    /// Build the scheduler and spawn one worker pool per queued stage.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(
        config: OrchestratorConfig,
        storage: Arc<Storage>,
        client: Arc<dyn GenerationClient>,
    ) -> Self {
        let scheduler = Arc::new(Scheduler::new());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let context = Arc::new(WorkerContext {
            scheduler: scheduler.clone(),
            storage: storage.clone(),
            client: client.clone(),
            config: config.clone(),
        });
        let pacer = Arc::new(BatchPacer::new(
            config.topic_batch_size,
            config.topic_batch_delay,
        ));

        let pools = vec![
            WorkerPool::spawn(
                Stage::Outline,
                config.outline_workers,
                context.clone(),
                None,
                shutdown_rx.clone(),
            ),
            WorkerPool::spawn(
                Stage::Topic,
                config.topic_workers,
                context,
                Some(pacer),
                shutdown_rx,
            ),
        ];

        info!(
            model = client.model_name(),
            outline_workers = pools[0].len(),
            topic_workers = pools[1].len(),
            retry_budget = config.retry_budget,
            "orchestrator started"
        );

        Self {
            escalator: Escalator::new(scheduler.clone(), storage.clone()),
            scheduler,
            storage,
            client,
            config,
            shutdown,
            pools,
        }
    }

    /// Stop taking jobs, let in-flight jobs finish, and join every worker.
    /// Waiting jobs are dropped with the scheduler.
    pub async fn shutdown(self) {
        // Workers may already be gone.
        let _ = self.shutdown.send(true);
        for pool in self.pools {
            pool.join().await;
        }
        info!(dropped = self.scheduler.live_count(), "orchestrator stopped");
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.scheduler.subscribe()
    }

    /// Resolve once every queued job has finished.
    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await;
    }

    // -----------------------------------------------------------------------
    // Outlines
    // -----------------------------------------------------------------------

    pub async fn request_outline(&self, title: &str) -> Result<OutlineResponse> {
        self.outline_request(title, Tier::Normal).await
    }

    pub async fn request_outline_priority(&self, title: &str) -> Result<OutlineResponse> {
        self.outline_request(title, Tier::Priority).await
    }

    #[instrument(skip(self))]
    async fn outline_request(&self, title: &str, tier: Tier) -> Result<OutlineResponse> {
        let title = canonical_title(title);
        check_title(&title, "course title")?;

        let outline = match self.storage.get_outline(&title).await? {
            Some(outline) if outline.status == GenerationStatus::Completed => {
                let queued = self.rehydrate_topics(&outline, tier).await?;
                if queued > 0 {
                    info!(queued, "re-enqueued missing topics");
                }
                return Ok(OutlineResponse {
                    status: GenerationStatus::Completed,
                    modules: Some(outline.modules),
                });
            }
            Some(outline) => outline,
            None => self.storage.create_outline_placeholder(&title, tier).await?,
        };

        let payload = JobPayload::Outline {
            course_id: outline.id,
            course_title: outline.title,
        };
        let status = self.submit(payload, tier).await?;
        Ok(OutlineResponse {
            status,
            modules: None,
        })
    }

    /// Enqueue topics of a completed outline that are neither stored, live,
    /// nor failed.
    async fn rehydrate_topics(&self, outline: &CourseOutline, tier: Tier) -> Result<usize> {
        let mut queued = 0;
        for module in &outline.modules {
            for name in &module.submodules {
                let topic = TopicRef::new(&outline.title, &module.title, name);
                if self.storage.get_topic(&topic).await?.is_some() {
                    continue;
                }
                if self.storage.get_topic_status(&topic).await? == Some(GenerationStatus::Failed) {
                    continue;
                }

                let payload = JobPayload::Topic {
                    course_id: Some(outline.id),
                    topic: topic.clone(),
                };
                if self.scheduler.snapshot(&payload.key()).await.is_some() {
                    continue;
                }
                self.storage
                    .set_topic_status(&topic, tier.waiting_status())
                    .await?;
                if self.scheduler.enqueue(payload, tier).await.is_created() {
                    queued += 1;
                }
            }
        }
        Ok(queued)
    }

    // -----------------------------------------------------------------------
    // Topics
    // -----------------------------------------------------------------------

    pub async fn request_topic(
        &self,
        course: &str,
        module: &str,
        topic: &str,
    ) -> Result<TopicResponse> {
        self.topic_request(TopicRef::new(course, module, topic), Tier::Normal)
            .await
    }

    pub async fn request_topic_priority(
        &self,
        course: &str,
        module: &str,
        topic: &str,
    ) -> Result<TopicResponse> {
        self.topic_request(TopicRef::new(course, module, topic), Tier::Priority)
            .await
    }

    #[instrument(skip(self, topic), fields(topic = %topic))]
    async fn topic_request(&self, topic: TopicRef, tier: Tier) -> Result<TopicResponse> {
        check_title(&topic.topic, "topic title")?;
        check_title(&topic.course, "course title")?;
        check_title(&topic.module, "module title")?;

        if let Some(detail) = self.storage.get_topic(&topic).await? {
            return Ok(TopicResponse {
                status: GenerationStatus::Completed,
                content: Some(detail.content),
            });
        }

        let course_id = self.storage.get_outline(&topic.course).await?.map(|o| o.id);
        let status = self.submit(JobPayload::Topic { course_id, topic }, tier).await?;
        Ok(TopicResponse {
            status,
            content: None,
        })
    }

    // -----------------------------------------------------------------------
    // Shared request path
    // -----------------------------------------------------------------------

    /// Create a job for `payload`, or escalate the live one for a priority
    /// request, and report the status the caller should see.
    async fn submit(&self, payload: JobPayload, tier: Tier) -> Result<GenerationStatus> {
        let key = payload.key();
        if self.scheduler.snapshot(&key).await.is_none() {
            self.mark_waiting(&payload, tier).await?;
            if let Enqueued::Created = self.scheduler.enqueue(payload.clone(), tier).await {
                return Ok(tier.waiting_status());
            }
        }

        if tier == Tier::Priority {
            self.escalator.escalate(&payload).await?;
        }
        match self.scheduler.snapshot(&key).await {
            Some(snapshot) => Ok(snapshot.status()),
            // Finished in the meantime.
            None => self.stored_status(&payload).await,
        }
    }

    async fn mark_waiting(&self, payload: &JobPayload, tier: Tier) -> Result<()> {
        match payload {
            JobPayload::Outline { course_title, .. } => {
                self.storage
                    .set_outline_status(course_title, tier.waiting_status(), Some(tier.weight()))
                    .await
            }
            JobPayload::Topic { topic, .. } => {
                self.storage
                    .set_topic_status(topic, tier.waiting_status())
                    .await
            }
        }
    }

    async fn stored_status(&self, payload: &JobPayload) -> Result<GenerationStatus> {
        let status = match payload {
            JobPayload::Outline { course_title, .. } => self
                .storage
                .get_outline(course_title)
                .await?
                .map(|outline| outline.status),
            JobPayload::Topic { topic, .. } => self.storage.get_topic_status(topic).await?,
        };
        Ok(status.unwrap_or(GenerationStatus::Queued))
    }

    // -----------------------------------------------------------------------
    // Names, deletion, progress
    // -----------------------------------------------------------------------

    /// Ask the generation service for a course title about `topic`.
    ///
    /// Not queued; retried within the same budget as queued jobs.
    #[instrument(skip(self))]
    pub async fn suggest_course_name(&self, topic: &str) -> Result<String> {
        let topic = canonical_title(topic);
        if topic.is_empty() {
            return Err(CoursesmithError::validation("topic must not be empty"));
        }

        let context = StageContext::Name { topic };
        let mut attempt = 1;
        loop {
            let output =
                generate_validated(self.client.as_ref(), &context, self.config.outline_shape).await;
            match output {
                Ok(StageOutput::Name(suggestion)) => return Ok(suggestion),
                Ok(other) => {
                    return Err(CoursesmithError::malformed(format!(
                        "name request produced {other:?}"
                    )));
                }
                Err(error) if error.is_retryable() && attempt < self.config.retry_budget => {
                    warn!(%error, attempt, "name suggestion failed, retrying");
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Cancel every job of a course, then delete its outline, topics and
    /// topic statuses.
    #[instrument(skip(self))]
    pub async fn delete_course(&self, title: &str) -> Result<DeleteReport> {
        let title = canonical_title(title);
        check_title(&title, "course title")?;

        let course_id = self.storage.get_outline(&title).await?.map(|o| o.id);
        let cancelled = self.scheduler.cancel_course(&title, course_id).await;
        let removed = self.storage.delete_course(&title).await?;

        info!(
            jobs_cancelled = cancelled.len(),
            outline_removed = removed.outline_removed,
            topics_removed = removed.topics_removed,
            "course deleted"
        );
        Ok(DeleteReport {
            jobs_cancelled: cancelled.len(),
            removed,
        })
    }

    /// `None` when no outline exists for `title`.
    pub async fn course_progress(&self, title: &str) -> Result<Option<CourseProgress>> {
        let Some(outline) = self.storage.get_outline(&canonical_title(title)).await? else {
            return Ok(None);
        };

        let status = match self.scheduler.snapshot(&JobKey::outline(&outline.title)).await {
            Some(snapshot) => snapshot.status(),
            None => outline.status,
        };
        Ok(Some(CourseProgress {
            status,
            modules: outline.modules.len(),
            topics_total: outline.modules.iter().map(|m| m.submodules.len()).sum(),
            topics_completed: self.storage.count_topics(&outline.title).await?,
            live_jobs: self.scheduler.count_for_course(&outline.title).await,
            title: outline.title,
        }))
    }
}

/// Titles are keyed by their normalized identifier, which must not be empty.
fn check_title(title: &str, what: &str) -> Result<()> {
    if normalize_identifier(title).is_empty() {
        return Err(CoursesmithError::validation(format!(
            "{what} must contain a letter or digit"
        )));
    }
    Ok(())
}
