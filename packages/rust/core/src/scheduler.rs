//! Dual-priority job scheduler with keyed deduplication.
//!
//! Each stage has two FIFO lanes. A worker always drains the priority lane
//! of its stage before touching the normal lane. Every live job is indexed by
//! its [`JobKey`], so enqueueing a key that is already waiting or running is
//! a no-op.
//!
//! Invariant: a key sits in exactly one lane iff its record is
//! [`JobState::Waiting`].

use std::collections::{HashMap, VecDeque};

use tokio::sync::{Mutex, Notify, broadcast, watch};
use tracing::debug;

use coursesmith_shared::{CourseId, Stage, Tier, normalize_identifier};

use crate::job::{Job, JobEvent, JobOutcome, JobPayload, JobSnapshot, JobState};
use crate::keying::JobKey;

const EVENT_CAPACITY: usize = 1024;

/// Result of [`Scheduler::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// A new job was created.
    Created,
    /// A job with the same key is already live.
    Existing(JobSnapshot),
}

impl Enqueued {
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created)
    }
}

/// Result of [`Scheduler::escalate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Moved from the normal lane to the back of the priority lane.
    Escalated,
    AlreadyPriority,
    /// A worker already holds the job.
    Running,
    /// No live job under this key.
    NotQueued,
}

struct Record {
    payload: JobPayload,
    tier: Tier,
    state: JobState,
    attempts: u32,
    epoch: u64,
}

impl Record {
    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            stage: self.payload.stage(),
            tier: self.tier,
            state: self.state,
            attempts: self.attempts,
        }
    }
}

#[derive(Default)]
struct Lanes {
    priority: VecDeque<JobKey>,
    normal: VecDeque<JobKey>,
}

impl Lanes {
    fn lane_mut(&mut self, tier: Tier) -> &mut VecDeque<JobKey> {
        match tier {
            Tier::Priority => &mut self.priority,
            Tier::Normal => &mut self.normal,
        }
    }

    fn pop(&mut self) -> Option<JobKey> {
        self.priority.pop_front().or_else(|| self.normal.pop_front())
    }

    fn remove(&mut self, key: &JobKey) {
        self.priority.retain(|k| k != key);
        self.normal.retain(|k| k != key);
    }
}

#[derive(Default)]
struct State {
    records: HashMap<JobKey, Record>,
    lanes: HashMap<Stage, Lanes>,
    next_epoch: u64,
}

impl State {
    fn is_current(&self, job: &Job) -> bool {
        self.records
            .get(&job.key)
            .is_some_and(|record| record.epoch == job.epoch)
    }

    fn insert(&mut self, payload: JobPayload, tier: Tier) -> (JobKey, Enqueued) {
        let key = payload.key();
        if let Some(record) = self.records.get(&key) {
            return (key, Enqueued::Existing(record.snapshot()));
        }

        self.next_epoch += 1;
        let stage = payload.stage();
        self.lanes
            .entry(stage)
            .or_default()
            .lane_mut(tier)
            .push_back(key.clone());
        self.records.insert(
            key.clone(),
            Record {
                payload,
                tier,
                state: JobState::Waiting,
                attempts: 0,
                epoch: self.next_epoch,
            },
        );
        (key, Enqueued::Created)
    }

    fn remove(&mut self, key: &JobKey) -> Option<Record> {
        let record = self.records.remove(key)?;
        if let Some(lanes) = self.lanes.get_mut(&record.payload.stage()) {
            lanes.remove(key);
        }
        Some(record)
    }
}

/// In-memory scheduler shared by the request API and every worker.
pub struct Scheduler {
    state: Mutex<State>,
    ready: Notify,
    live: watch::Sender<usize>,
    events: broadcast::Sender<JobEvent>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (live, _) = watch::channel(0);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(State::default()),
            ready: Notify::new(),
            live,
            events,
        }
    }

    fn publish(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn update_live(&self, state: &State) {
        self.live.send_replace(state.records.len());
    }

    /// Add a job at the back of `tier`'s lane unless its key is already live.
    pub async fn enqueue(&self, payload: JobPayload, tier: Tier) -> Enqueued {
        let stage = payload.stage();
        let mut state = self.state.lock().await;
        let (key, outcome) = state.insert(payload, tier);
        if outcome.is_created() {
            self.update_live(&state);
            drop(state);
            debug!(%key, %stage, %tier, "job enqueued");
            self.ready.notify_waiters();
            self.publish(JobEvent::Enqueued { key, stage, tier });
        }
        outcome
    }

    /// Enqueue on behalf of a running `parent`, atomically with checking that
    /// the parent has not been cancelled. `None` when it has.
    pub async fn enqueue_child(
        &self,
        parent: &Job,
        payload: JobPayload,
        tier: Tier,
    ) -> Option<Enqueued> {
        let stage = payload.stage();
        let mut state = self.state.lock().await;
        if !state.is_current(parent) {
            return None;
        }
        let (key, outcome) = state.insert(payload, tier);
        if outcome.is_created() {
            self.update_live(&state);
            drop(state);
            self.ready.notify_waiters();
            self.publish(JobEvent::Enqueued { key, stage, tier });
        }
        Some(outcome)
    }

    /// Claim the next job of `stage` without waiting.
    pub async fn try_dequeue(&self, stage: Stage) -> Option<Job> {
        let mut state = self.state.lock().await;
        let key = state.lanes.get_mut(&stage)?.pop()?;
        let record = state.records.get_mut(&key)?;
        record.state = JobState::Active;
        record.attempts += 1;
        let job = Job {
            key,
            payload: record.payload.clone(),
            tier: record.tier,
            attempts: record.attempts,
            epoch: record.epoch,
        };
        drop(state);

        self.publish(JobEvent::Started {
            key: job.key.clone(),
            stage,
            attempt: job.attempts,
        });
        Some(job)
    }

    /// Claim the next job of `stage`, waiting until one is available.
    ///
    /// Cancel-safe: a dropped call never loses a job.
    pub async fn dequeue(&self, stage: Stage) -> Job {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job) = self.try_dequeue(stage).await {
                return job;
            }
            notified.await;
        }
    }

    /// Move a waiting normal job to the back of the priority lane.
    pub async fn escalate(&self, key: &JobKey) -> Escalation {
        let mut state = self.state.lock().await;
        let Some(record) = state.records.get_mut(key) else {
            return Escalation::NotQueued;
        };
        if record.state == JobState::Active {
            return Escalation::Running;
        }
        if record.tier == Tier::Priority {
            return Escalation::AlreadyPriority;
        }

        record.tier = Tier::Priority;
        let stage = record.payload.stage();
        let lanes = state.lanes.entry(stage).or_default();
        lanes.normal.retain(|k| k != key);
        lanes.priority.push_back(key.clone());
        drop(state);

        debug!(%key, %stage, "job escalated");
        self.publish(JobEvent::Escalated {
            key: key.clone(),
            stage,
        });
        Escalation::Escalated
    }

    /// Put an active job back in its lane for another attempt.
    ///
    /// Returns `false` when the job was cancelled meanwhile.
    pub async fn requeue(&self, job: &Job) -> bool {
        let mut state = self.state.lock().await;
        if !state.is_current(job) {
            return false;
        }
        let Some(record) = state.records.get_mut(&job.key) else {
            return false;
        };
        record.state = JobState::Waiting;
        let tier = record.tier;
        state
            .lanes
            .entry(job.stage())
            .or_default()
            .lane_mut(tier)
            .push_back(job.key.clone());
        drop(state);

        self.ready.notify_waiters();
        self.publish(JobEvent::Retrying {
            key: job.key.clone(),
            stage: job.stage(),
            attempt: job.attempts,
        });
        true
    }

    /// Retire a job. A stale `job` (cancelled, possibly re-enqueued since)
    /// leaves the live record alone.
    pub async fn finish(&self, job: &Job, outcome: JobOutcome) {
        let mut state = self.state.lock().await;
        if state.is_current(job) {
            state.remove(&job.key);
            self.update_live(&state);
        }
        drop(state);

        self.publish(JobEvent::Finished {
            key: job.key.clone(),
            stage: job.stage(),
            outcome,
            attempts: job.attempts,
        });
    }

    /// Drop a live job, waiting or active. An active job's worker sees the
    /// removal through [`Scheduler::is_current`] and discards its result.
    pub async fn remove(&self, key: &JobKey) -> bool {
        let mut state = self.state.lock().await;
        let Some(record) = state.remove(key) else {
            return false;
        };
        self.update_live(&state);
        drop(state);

        self.publish(JobEvent::Cancelled {
            key: key.clone(),
            stage: record.payload.stage(),
        });
        true
    }

    /// Remove every live job that belongs to a course.
    pub async fn cancel_course(
        &self,
        course_title: &str,
        course_id: Option<CourseId>,
    ) -> Vec<JobKey> {
        let course_key = normalize_identifier(course_title);
        let mut state = self.state.lock().await;
        let keys: Vec<JobKey> = state
            .records
            .iter()
            .filter(|(_, record)| record.payload.references_course(&course_key, course_id))
            .map(|(key, _)| key.clone())
            .collect();

        let mut cancelled = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(record) = state.remove(&key) {
                cancelled.push((key, record.payload.stage()));
            }
        }
        self.update_live(&state);
        drop(state);

        for (key, stage) in &cancelled {
            self.publish(JobEvent::Cancelled {
                key: key.clone(),
                stage: *stage,
            });
        }
        cancelled.into_iter().map(|(key, _)| key).collect()
    }

    /// Whether `job` is still the live incarnation of its key.
    pub async fn is_current(&self, job: &Job) -> bool {
        self.state.lock().await.is_current(job)
    }

    pub async fn snapshot(&self, key: &JobKey) -> Option<JobSnapshot> {
        self.state.lock().await.records.get(key).map(Record::snapshot)
    }

    /// Keys waiting in one lane, front first.
    pub async fn waiting(&self, stage: Stage, tier: Tier) -> Vec<JobKey> {
        let mut state = self.state.lock().await;
        state
            .lanes
            .get_mut(&stage)
            .map(|lanes| lanes.lane_mut(tier).iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Live jobs (waiting or active) belonging to a course.
    pub async fn count_for_course(&self, course_title: &str) -> usize {
        let course_key = normalize_identifier(course_title);
        self.state
            .lock()
            .await
            .records
            .values()
            .filter(|record| record.payload.references_course(&course_key, None))
            .count()
    }

    pub fn live_count(&self) -> usize {
        *self.live.borrow()
    }

    /// Resolve once no job is waiting or active.
    pub async fn wait_idle(&self) {
        let mut rx = self.live.subscribe();
        // The sender lives as long as `self`.
        let _ = rx.wait_for(|live| *live == 0).await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursesmith_shared::TopicRef;
    use std::time::Duration;

    fn topic(name: &str) -> JobPayload {
        JobPayload::Topic {
            course_id: None,
            topic: TopicRef::new("Graph Theory Foundations", "Traversal", name),
        }
    }

    fn outline(title: &str) -> JobPayload {
        JobPayload::Outline {
            course_id: CourseId::new(),
            course_title: title.into(),
        }
    }

    async fn drain(scheduler: &Scheduler, stage: Stage) -> Vec<JobKey> {
        let mut order = Vec::new();
        while let Some(job) = scheduler.try_dequeue(stage).await {
            order.push(job.key);
        }
        order
    }

    #[tokio::test]
    async fn priority_lane_drains_first_in_fifo_order() {
        let scheduler = Scheduler::new();
        scheduler.enqueue(topic("A"), Tier::Normal).await;
        scheduler.enqueue(topic("B"), Tier::Normal).await;
        scheduler.enqueue(topic("C"), Tier::Priority).await;
        scheduler.enqueue(topic("D"), Tier::Priority).await;

        let order = drain(&scheduler, Stage::Topic).await;
        let expected: Vec<JobKey> = ["C", "D", "A", "B"]
            .into_iter()
            .map(|name| topic(name).key())
            .collect();
        assert_eq!(order, expected);
    }

    #[tokio::test]
    async fn stages_do_not_share_lanes() {
        let scheduler = Scheduler::new();
        scheduler.enqueue(outline("Graphs"), Tier::Normal).await;
        scheduler.enqueue(topic("BFS"), Tier::Priority).await;

        let job = scheduler.try_dequeue(Stage::Outline).await.unwrap();
        assert_eq!(job.stage(), Stage::Outline);
        assert!(scheduler.try_dequeue(Stage::Outline).await.is_none());
        assert_eq!(scheduler.try_dequeue(Stage::Topic).await.unwrap().key, topic("BFS").key());
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_while_live() {
        let scheduler = Scheduler::new();
        assert!(scheduler.enqueue(topic("BFS"), Tier::Normal).await.is_created());

        match scheduler.enqueue(topic("  bfs "), Tier::Priority).await {
            Enqueued::Existing(snapshot) => {
                assert_eq!(snapshot.tier, Tier::Normal);
                assert_eq!(snapshot.state, JobState::Waiting);
            }
            Enqueued::Created => panic!("duplicate key created a second job"),
        }
        assert_eq!(scheduler.live_count(), 1);

        let job = scheduler.try_dequeue(Stage::Topic).await.unwrap();
        assert!(!scheduler.enqueue(topic("BFS"), Tier::Normal).await.is_created());

        scheduler.finish(&job, JobOutcome::Completed).await;
        assert_eq!(scheduler.live_count(), 0);
        assert!(scheduler.enqueue(topic("BFS"), Tier::Normal).await.is_created());
    }

    #[tokio::test]
    async fn escalate_moves_waiting_normal_job_only() {
        let scheduler = Scheduler::new();
        scheduler.enqueue(topic("A"), Tier::Normal).await;
        scheduler.enqueue(topic("B"), Tier::Normal).await;
        scheduler.enqueue(topic("C"), Tier::Priority).await;

        let b = topic("B").key();
        assert_eq!(scheduler.escalate(&b).await, Escalation::Escalated);
        assert_eq!(scheduler.escalate(&b).await, Escalation::AlreadyPriority);
        assert_eq!(scheduler.waiting(Stage::Topic, Tier::Normal).await, vec![topic("A").key()]);
        assert_eq!(
            scheduler.waiting(Stage::Topic, Tier::Priority).await,
            vec![topic("C").key(), b.clone()]
        );
        assert_eq!(scheduler.live_count(), 3);

        let missing = topic("Z").key();
        assert_eq!(scheduler.escalate(&missing).await, Escalation::NotQueued);
    }

    #[tokio::test]
    async fn escalate_is_noop_for_active_job() {
        let scheduler = Scheduler::new();
        scheduler.enqueue(topic("A"), Tier::Normal).await;
        let job = scheduler.try_dequeue(Stage::Topic).await.unwrap();

        assert_eq!(scheduler.escalate(&job.key).await, Escalation::Running);
        let snapshot = scheduler.snapshot(&job.key).await.unwrap();
        assert_eq!(snapshot.tier, Tier::Normal);
        assert_eq!(snapshot.state, JobState::Active);
    }

    #[tokio::test]
    async fn requeue_returns_job_to_its_lane() {
        let scheduler = Scheduler::new();
        scheduler.enqueue(topic("A"), Tier::Normal).await;
        scheduler.enqueue(topic("B"), Tier::Normal).await;

        let first = scheduler.try_dequeue(Stage::Topic).await.unwrap();
        assert_eq!(first.attempts, 1);
        assert!(scheduler.requeue(&first).await);

        let order = drain(&scheduler, Stage::Topic).await;
        assert_eq!(order, vec![topic("B").key(), topic("A").key()]);
        assert_eq!(scheduler.snapshot(&first.key).await.unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn removed_job_is_stale_for_its_worker() {
        let scheduler = Scheduler::new();
        scheduler.enqueue(topic("A"), Tier::Normal).await;
        let job = scheduler.try_dequeue(Stage::Topic).await.unwrap();

        assert!(scheduler.remove(&job.key).await);
        assert!(!scheduler.is_current(&job).await);
        assert!(!scheduler.requeue(&job).await);

        // Re-enqueued key is a new incarnation; the stale finish leaves it alone.
        scheduler.enqueue(topic("A"), Tier::Normal).await;
        scheduler.finish(&job, JobOutcome::Cancelled).await;
        assert_eq!(scheduler.live_count(), 1);
        assert!(!scheduler.is_current(&job).await);
    }

    #[tokio::test]
    async fn cancel_course_removes_only_that_course() {
        let scheduler = Scheduler::new();
        let graphs = outline("Graph Theory Foundations");
        scheduler.enqueue(graphs.clone(), Tier::Normal).await;
        scheduler.enqueue(topic("BFS"), Tier::Normal).await;
        scheduler.enqueue(outline("Linear Algebra"), Tier::Normal).await;

        let cancelled = scheduler
            .cancel_course("graph theory foundations", graphs.course_id())
            .await;
        assert_eq!(cancelled.len(), 2);
        assert_eq!(scheduler.live_count(), 1);
        assert_eq!(scheduler.count_for_course("Linear Algebra").await, 1);
        assert_eq!(scheduler.count_for_course("Graph Theory Foundations").await, 0);
    }

    #[tokio::test]
    async fn dequeue_wakes_on_enqueue() {
        let scheduler = std::sync::Arc::new(Scheduler::new());
        let waiter = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.dequeue(Stage::Topic).await })
        };
        tokio::task::yield_now().await;

        scheduler.enqueue(topic("A"), Tier::Normal).await;
        let job = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("dequeue woke up")
            .expect("task joined");
        assert_eq!(job.key, topic("A").key());
    }

    #[tokio::test]
    async fn wait_idle_resolves_after_last_finish() {
        let scheduler = Scheduler::new();
        scheduler.enqueue(topic("A"), Tier::Normal).await;
        let job = scheduler.try_dequeue(Stage::Topic).await.unwrap();

        let pending = tokio::time::timeout(Duration::from_millis(50), scheduler.wait_idle()).await;
        assert!(pending.is_err());

        scheduler.finish(&job, JobOutcome::Completed).await;
        tokio::time::timeout(Duration::from_secs(1), scheduler.wait_idle())
            .await
            .expect("idle");
    }

    #[tokio::test]
    async fn events_trace_the_lifecycle() {
        let scheduler = Scheduler::new();
        let mut events = scheduler.subscribe();
        scheduler.enqueue(topic("A"), Tier::Normal).await;
        let job = scheduler.try_dequeue(Stage::Topic).await.unwrap();
        scheduler.finish(&job, JobOutcome::Completed).await;

        let key = topic("A").key();
        assert_eq!(
            events.recv().await.unwrap(),
            JobEvent::Enqueued { key: key.clone(), stage: Stage::Topic, tier: Tier::Normal }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            JobEvent::Started { key: key.clone(), stage: Stage::Topic, attempt: 1 }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            JobEvent::Finished {
                key,
                stage: Stage::Topic,
                outcome: JobOutcome::Completed,
                attempts: 1
            }
        );
    }
}
