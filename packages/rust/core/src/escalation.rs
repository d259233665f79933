//! Priority escalation of waiting jobs.

use std::sync::Arc;

use tracing::info;

use coursesmith_shared::{GenerationStatus, Result, Tier};
use coursesmith_storage::Storage;

use crate::job::JobPayload;
use crate::scheduler::{Escalation, Scheduler};

/// Moves a waiting normal job into its stage's priority lane and mirrors the
/// change into the stored status.
pub struct Escalator {
    scheduler: Arc<Scheduler>,
    storage: Arc<Storage>,
}

impl Escalator {
    pub fn new(scheduler: Arc<Scheduler>, storage: Arc<Storage>) -> Self {
        Self { scheduler, storage }
    }

    /// Escalate the job for `payload`. Anything other than a waiting normal
    /// job is left untouched.
    pub async fn escalate(&self, payload: &JobPayload) -> Result<Escalation> {
        let key = payload.key();
        let escalation = self.scheduler.escalate(&key).await;
        if escalation != Escalation::Escalated {
            return Ok(escalation);
        }

        info!(%key, stage = %payload.stage(), "escalated to priority lane");
        match payload {
            JobPayload::Outline { course_title, .. } => {
                self.storage
                    .set_outline_status(
                        course_title,
                        GenerationStatus::Prioritized,
                        Some(Tier::Priority.weight()),
                    )
                    .await?;
            }
            JobPayload::Topic { topic, .. } => {
                self.storage
                    .set_topic_status(topic, GenerationStatus::Prioritized)
                    .await?;
            }
        }
        Ok(escalation)
    }
}
