//! Job payloads, lifecycle, and events.

use coursesmith_generation::StageContext;
use coursesmith_shared::{
    CourseId, GenerationStatus, OutlineShape, Stage, Tier, TopicRef, normalize_identifier,
};
use coursesmith_storage::EntityKey;

use crate::keying::JobKey;

/// What a job generates. One variant per queued stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPayload {
    Outline {
        course_id: CourseId,
        course_title: String,
    },
    Topic {
        /// Owning outline, when the course has one.
        course_id: Option<CourseId>,
        topic: TopicRef,
    },
}

impl JobPayload {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Outline { .. } => Stage::Outline,
            Self::Topic { .. } => Stage::Topic,
        }
    }

    pub fn key(&self) -> JobKey {
        match self {
            Self::Outline { course_title, .. } => JobKey::outline(course_title),
            Self::Topic { topic, .. } => JobKey::topic(topic),
        }
    }

    /// The stored entity this job produces.
    pub fn entity(&self) -> EntityKey {
        match self {
            Self::Outline { course_title, .. } => EntityKey::Outline(course_title.clone()),
            Self::Topic { topic, .. } => EntityKey::Topic(topic.clone()),
        }
    }

    pub fn course_title(&self) -> &str {
        match self {
            Self::Outline { course_title, .. } => course_title,
            Self::Topic { topic, .. } => &topic.course,
        }
    }

    pub fn course_id(&self) -> Option<CourseId> {
        match self {
            Self::Outline { course_id, .. } => Some(*course_id),
            Self::Topic { course_id, .. } => *course_id,
        }
    }

    /// Whether this job belongs to the course with normalized title
    /// `course_key` or id `course_id`.
    pub fn references_course(&self, course_key: &str, course_id: Option<CourseId>) -> bool {
        let same_id = course_id.is_some() && self.course_id() == course_id;
        same_id || normalize_identifier(self.course_title()) == course_key
    }

    /// Prompt context for one attempt.
    pub fn stage_context(&self, shape: OutlineShape) -> StageContext {
        match self {
            Self::Outline { course_title, .. } => StageContext::Outline {
                course_title: course_title.clone(),
                modules: shape.modules,
                topics: shape.topics,
            },
            Self::Topic { topic, .. } => StageContext::Topic(topic.clone()),
        }
    }
}

/// Where a live job is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// In a lane, waiting for a worker.
    Waiting,
    /// Claimed by a worker.
    Active,
}

/// A claimed job, handed to a worker by the scheduler.
#[derive(Debug, Clone)]
pub struct Job {
    pub key: JobKey,
    pub payload: JobPayload,
    pub tier: Tier,
    /// Attempts so far, this one included.
    pub attempts: u32,
    /// Identifies this incarnation of the key; a cancelled and re-enqueued
    /// key gets a new epoch.
    pub(crate) epoch: u64,
}

impl Job {
    pub fn stage(&self) -> Stage {
        self.payload.stage()
    }
}

/// Read-only view of a live job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSnapshot {
    pub stage: Stage,
    pub tier: Tier,
    pub state: JobState,
    pub attempts: u32,
}

impl JobSnapshot {
    /// Status a caller sees for the entity while this job is live.
    pub fn status(&self) -> GenerationStatus {
        match self.state {
            JobState::Active => GenerationStatus::Generating,
            JobState::Waiting => self.tier.waiting_status(),
        }
    }
}

/// Terminal result of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Artifact generated and persisted.
    Completed,
    /// Artifact already existed, found before generating or on persist.
    Duplicate,
    /// Retry budget exhausted; entity marked failed.
    Failed,
    /// Job was removed while in flight; its result was discarded.
    Cancelled,
    /// The entity the job refers to no longer exists.
    Orphaned,
}

/// Scheduler lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    Enqueued {
        key: JobKey,
        stage: Stage,
        tier: Tier,
    },
    Escalated {
        key: JobKey,
        stage: Stage,
    },
    Started {
        key: JobKey,
        stage: Stage,
        attempt: u32,
    },
    Retrying {
        key: JobKey,
        stage: Stage,
        attempt: u32,
    },
    Finished {
        key: JobKey,
        stage: Stage,
        outcome: JobOutcome,
        attempts: u32,
    },
    Cancelled {
        key: JobKey,
        stage: Stage,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_keys_match_keying() {
        let outline = JobPayload::Outline {
            course_id: CourseId::new(),
            course_title: "Graph Theory Foundations".into(),
        };
        assert_eq!(outline.key(), JobKey::outline("graph theory foundations"));
        assert_eq!(outline.stage(), Stage::Outline);

        let topic = TopicRef::new("Graph Theory Foundations", "Traversal", "BFS");
        let payload = JobPayload::Topic {
            course_id: None,
            topic: topic.clone(),
        };
        assert_eq!(payload.key(), JobKey::topic(&topic));
        assert_eq!(payload.entity(), EntityKey::Topic(topic));
    }

    #[test]
    fn references_course_by_title_or_id() {
        let id = CourseId::new();
        let with_id = JobPayload::Topic {
            course_id: Some(id),
            topic: TopicRef::new("Renamed Course", "M", "T"),
        };
        let without_id = JobPayload::Topic {
            course_id: None,
            topic: TopicRef::new("Graph Theory: Foundations", "M", "T"),
        };

        assert!(with_id.references_course("graph_theory_foundations", Some(id)));
        assert!(without_id.references_course("graph_theory_foundations", Some(id)));
        assert!(!without_id.references_course("linear_algebra", Some(id)));
        assert!(!without_id.references_course("linear_algebra", None));
    }

    #[test]
    fn snapshot_status_follows_state_and_tier() {
        let mut snap = JobSnapshot {
            stage: Stage::Topic,
            tier: Tier::Normal,
            state: JobState::Waiting,
            attempts: 0,
        };
        assert_eq!(snap.status(), GenerationStatus::Queued);
        snap.tier = Tier::Priority;
        assert_eq!(snap.status(), GenerationStatus::Prioritized);
        snap.state = JobState::Active;
        assert_eq!(snap.status(), GenerationStatus::Generating);
    }
}
