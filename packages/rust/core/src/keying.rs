//! Deterministic job keys.
//!
//! Every enqueue goes through a [`JobKey`], so two requests for the same
//! stage and target always collapse into one job.

use sha2::{Digest, Sha256};

use coursesmith_shared::{Stage, TopicRef, normalize_identifier};

/// Separates key components inside the hash input so that
/// `("a b", "c")` and `("a", "b c")` never alias.
const UNIT_SEPARATOR: u8 = 0x1f;

/// Hex characters of the digest kept in the rendered key.
const DIGEST_CHARS: usize = 32;

/// Collision-resistant identity of a generation job: `<stage>:<digest>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobKey(String);

impl JobKey {
    /// Key for generating the outline of `course_title`.
    pub fn outline(course_title: &str) -> Self {
        Self::derive(Stage::Outline, &[&normalize_identifier(course_title)])
    }

    /// Key for generating one topic.
    pub fn topic(topic: &TopicRef) -> Self {
        let (course, module, name) = topic.keys();
        Self::derive(Stage::Topic, &[&course, &module, &name])
    }

    fn derive(stage: Stage, parts: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(stage.as_str().as_bytes());
        for part in parts {
            hasher.update([UNIT_SEPARATOR]);
            hasher.update(part.as_bytes());
        }
        let digest = format!("{:x}", hasher.finalize());
        Self(format!("{}:{}", stage.as_str(), &digest[..DIGEST_CHARS]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
