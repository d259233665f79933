//! Job orchestration for Coursesmith.
//!
//! Requests enter through the [`Orchestrator`], which deduplicates them by
//! [`JobKey`] into a per-stage dual-priority [`Scheduler`]. Worker pools
//! drain the scheduler, call the generation service, and persist validated
//! artifacts to storage.

pub mod escalation;
pub mod job;
pub mod keying;
pub mod orchestrator;
pub mod scheduler;
pub mod worker;

pub use escalation::Escalator;
pub use job::{Job, JobEvent, JobOutcome, JobPayload, JobSnapshot, JobState};
pub use keying::JobKey;
pub use orchestrator::{CourseProgress, DeleteReport, Orchestrator, OutlineResponse, TopicResponse};
pub use scheduler::{Enqueued, Escalation, Scheduler};
pub use worker::{BatchPacer, WorkerPool};
