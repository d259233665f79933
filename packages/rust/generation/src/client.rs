//! The generation service boundary.

use async_trait::async_trait;

use coursesmith_shared::{Result, Stage, TopicRef};

/// Everything a stage prompt needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageContext {
    /// Suggest a course title for a free-form topic.
    Name { topic: String },
    /// Outline a course into `modules` modules of `topics` topics each.
    Outline {
        course_title: String,
        modules: usize,
        topics: usize,
    },
    /// Write the learning material for one topic.
    Topic(TopicRef),
}

impl StageContext {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Name { .. } => Stage::Name,
            Self::Outline { .. } => Stage::Outline,
            Self::Topic(_) => Stage::Topic,
        }
    }
}

/// A text-generation service.
///
/// Implementations return the raw completion text and fail with
/// [`CoursesmithError::Transport`](coursesmith_shared::CoursesmithError::Transport)
/// on timeouts, rate limiting, or service errors. Structural repair and
/// validation happen downstream.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Generate raw text for one stage request.
    async fn generate(&self, context: &StageContext) -> Result<String>;

    /// Model identifier, for logging.
    fn model_name(&self) -> &str;
}
