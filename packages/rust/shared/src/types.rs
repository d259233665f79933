//! Core domain types for generated course content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Course title used when a topic request names none.
pub const DEFAULT_COURSE_TITLE: &str = "General Course";

/// Module title used when a topic request names none.
pub const DEFAULT_MODULE_TITLE: &str = "General Module";

/// Priority hint stored for user-facing requests.
pub const PRIORITY_WEIGHT: u8 = 1;

/// Priority hint stored for background work.
pub const NORMAL_WEIGHT: u8 = 5;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for course outline identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CourseId(pub Uuid);

impl CourseId {
    /// Generate a new time-sortable course identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for CourseId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CourseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CourseId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Trim and collapse internal whitespace. Used for every title crossing the
/// request boundary so display titles are stable.
pub fn canonical_title(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercase, fold every run of non-alphanumeric characters into one `_`,
/// and trim leading/trailing `_`.
///
/// Storage uniqueness and job keys are both computed over this form, so
/// "Graph Theory: Foundations" and "graph theory foundations" name the same
/// target everywhere.
pub fn normalize_identifier(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;

    for c in raw.chars() {
        if c.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }

    out
}

// ---------------------------------------------------------------------------
// Stage / tier / status
// ---------------------------------------------------------------------------

/// A kind of generation work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Name,
    Outline,
    Topic,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Outline => "outline",
            Self::Topic => "topic",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling class of a job. Priority jobs are always dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Normal,
    Priority,
}

impl Tier {
    /// Weight stored with the entity (lower runs first).
    pub fn weight(&self) -> u8 {
        match self {
            Self::Normal => NORMAL_WEIGHT,
            Self::Priority => PRIORITY_WEIGHT,
        }
    }

    /// Status an entity shows while its job waits in this tier.
    pub fn waiting_status(&self) -> GenerationStatus {
        match self {
            Self::Normal => GenerationStatus::Queued,
            Self::Priority => GenerationStatus::Prioritized,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Priority => "priority",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a course outline or topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Queued,
    Generating,
    Prioritized,
    Completed,
    Failed,
}

impl GenerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Generating => "generating",
            Self::Prioritized => "prioritized",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GenerationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "generating" => Ok(Self::Generating),
            "prioritized" => Ok(Self::Prioritized),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown generation status '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Course outline
// ---------------------------------------------------------------------------

/// One module of an outline: a title and its ordered topic names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub title: String,
    pub submodules: Vec<String>,
}

/// A stored course outline, possibly still a placeholder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseOutline {
    pub id: CourseId,
    /// Display title (first-seen canonical form).
    pub title: String,
    /// Empty until the outline job completes.
    pub modules: Vec<Module>,
    pub status: GenerationStatus,
    /// 1 for priority requests, 5 for background ones.
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Topic detail
// ---------------------------------------------------------------------------

/// A multiple-choice question. `answer` is always one of `options`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mcq {
    pub question: String,
    pub options: Vec<String>,
    pub answer: String,
}

/// Generated learning material for one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicContent {
    /// Ordered paragraphs.
    pub text: Vec<String>,
    /// Ordered video links.
    pub videos: Vec<String>,
    pub mcqs: Vec<Mcq>,
    /// Open-ended discussion questions.
    #[serde(rename = "extraQuestions")]
    pub extra_questions: Vec<String>,
}

/// The composite (course, module, topic) identity of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicRef {
    pub course: String,
    pub module: String,
    pub topic: String,
}

impl TopicRef {
    /// Canonicalize all three titles, defaulting a blank course or module.
    pub fn new(course: &str, module: &str, topic: &str) -> Self {
        let course = canonical_title(course);
        let module = canonical_title(module);
        Self {
            course: if course.is_empty() {
                DEFAULT_COURSE_TITLE.into()
            } else {
                course
            },
            module: if module.is_empty() {
                DEFAULT_MODULE_TITLE.into()
            } else {
                module
            },
            topic: canonical_title(topic),
        }
    }

    /// Normalized `(course, module, topic)` identifiers used for uniqueness.
    pub fn keys(&self) -> (String, String, String) {
        (
            normalize_identifier(&self.course),
            normalize_identifier(&self.module),
            normalize_identifier(&self.topic),
        )
    }
}

impl std::fmt::Display for TopicRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} / {} / {}", self.course, self.module, self.topic)
    }
}

/// A stored topic artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicDetail {
    pub topic: TopicRef,
    pub content: TopicContent,
    pub created_at: DateTime<Utc>,
}
