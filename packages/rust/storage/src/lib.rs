//! Turso Embedded / libSQL content store.
//!
//! The [`Storage`] struct wraps a libSQL database holding course outlines,
//! topic details, and per-topic request status.
//!
//! Duplicate prevention lives here: outline titles and topic
//! `(course, module, topic)` triples are unique over their normalized
//! identifiers, and a losing writer gets [`CoursesmithError::DuplicateKey`].
//!
//! **Access rules:**
//! - Orchestrator: read-write via [`Storage::open`]
//! - Status inspection: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use coursesmith_shared::{
    CourseId, CourseOutline, CoursesmithError, GenerationStatus, Module, Result, Tier,
    TopicContent, TopicDetail, TopicRef, normalize_identifier,
};
use libsql::{Connection, Database, params};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Artifact boundary types
// ---------------------------------------------------------------------------

/// Identity of a storable entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    /// A course outline, identified by its title.
    Outline(String),
    /// A topic, identified by its composite key.
    Topic(TopicRef),
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Outline(title) => write!(f, "outline '{title}'"),
            Self::Topic(topic) => write!(f, "topic '{topic}'"),
        }
    }
}

/// Validated content ready to persist.
#[derive(Debug, Clone)]
pub enum ArtifactData {
    Outline(Vec<Module>),
    Topic(TopicContent),
}

/// A completed, persisted artifact.
#[derive(Debug, Clone)]
pub enum Artifact {
    Outline(CourseOutline),
    Topic(TopicDetail),
}

/// What [`Storage::delete_course`] removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletedCourse {
    pub outline_removed: bool,
    pub topics_removed: u64,
    pub statuses_removed: u64,
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CoursesmithError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| CoursesmithError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| CoursesmithError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| CoursesmithError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| CoursesmithError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        CoursesmithError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(CoursesmithError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Artifact boundary
    // -----------------------------------------------------------------------

    /// Look up a completed artifact. Outline placeholders count as absent.
    pub async fn find_artifact(&self, key: &EntityKey) -> Result<Option<Artifact>> {
        match key {
            EntityKey::Outline(title) => Ok(self
                .get_outline(title)
                .await?
                .filter(|o| o.status == GenerationStatus::Completed)
                .map(Artifact::Outline)),
            EntityKey::Topic(topic) => Ok(self.get_topic(topic).await?.map(Artifact::Topic)),
        }
    }

    /// Persist a validated artifact.
    ///
    /// Fails with [`CoursesmithError::DuplicateKey`] when the artifact already
    /// exists, and with [`CoursesmithError::EntityNotFound`] when an outline's
    /// placeholder has been deleted.
    pub async fn create_artifact(&self, key: &EntityKey, data: &ArtifactData) -> Result<()> {
        match (key, data) {
            (EntityKey::Outline(title), ArtifactData::Outline(modules)) => {
                self.complete_outline(title, modules).await
            }
            (EntityKey::Topic(topic), ArtifactData::Topic(content)) => {
                self.insert_topic(topic, content).await
            }
            _ => Err(CoursesmithError::Storage(format!(
                "artifact kind does not match {key}"
            ))),
        }
    }

    /// Set the status of an outline or topic.
    pub async fn update_status(&self, key: &EntityKey, status: GenerationStatus) -> Result<()> {
        match key {
            EntityKey::Outline(title) => self.set_outline_status(title, status, None).await,
            EntityKey::Topic(topic) => self.set_topic_status(topic, status).await,
        }
    }

    // -----------------------------------------------------------------------
    // Course outline operations
    // -----------------------------------------------------------------------

    /// Insert a placeholder outline for `title`, or return the existing row.
    pub async fn create_outline_placeholder(
        &self,
        title: &str,
        tier: Tier,
    ) -> Result<CourseOutline> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let id = CourseId::new().to_string();
        self.conn
            .execute(
                "INSERT INTO course_outlines (id, title, title_key, modules_json, status, priority, created_at, updated_at)
                 VALUES (?1, ?2, ?3, '[]', ?4, ?5, ?6, ?7)
                 ON CONFLICT(title_key) DO NOTHING",
                params![
                    id.as_str(),
                    title,
                    normalize_identifier(title),
                    tier.waiting_status().as_str(),
                    i64::from(tier.weight()),
                    now.as_str(),
                    now.as_str()
                ],
            )
            .await
            .map_err(|e| CoursesmithError::Storage(e.to_string()))?;

        self.get_outline(title)
            .await?
            .ok_or_else(|| CoursesmithError::EntityNotFound(format!("outline '{title}'")))
    }

    /// Get an outline by title, placeholder or not.
    pub async fn get_outline(&self, title: &str) -> Result<Option<CourseOutline>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, title, modules_json, status, priority, created_at, updated_at
                 FROM course_outlines WHERE title_key = ?1",
                params![normalize_identifier(title)],
            )
            .await
            .map_err(|e| CoursesmithError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_outline(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(CoursesmithError::Storage(e.to_string())),
        }
    }

    /// Store generated modules and mark the outline completed.
    pub async fn complete_outline(&self, title: &str, modules: &[Module]) -> Result<()> {
        self.check_writable()?;
        let modules_json = serde_json::to_string(modules)
            .map_err(|e| CoursesmithError::Storage(format!("encode modules: {e}")))?;
        let now = Utc::now().to_rfc3339();

        let changed = self
            .conn
            .execute(
                "UPDATE course_outlines
                 SET modules_json = ?1, status = 'completed', updated_at = ?2
                 WHERE title_key = ?3 AND status != 'completed'",
                params![modules_json, now.as_str(), normalize_identifier(title)],
            )
            .await
            .map_err(|e| CoursesmithError::Storage(e.to_string()))?;

        if changed > 0 {
            return Ok(());
        }
        match self.get_outline(title).await? {
            Some(_) => Err(CoursesmithError::DuplicateKey(format!("outline '{title}'"))),
            None => Err(CoursesmithError::EntityNotFound(format!("outline '{title}'"))),
        }
    }

    /// Update an outline's status, and its priority hint when given.
    ///
    /// A completed outline keeps its status.
    pub async fn set_outline_status(
        &self,
        title: &str,
        status: GenerationStatus,
        priority: Option<u8>,
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn
            .execute(
                "UPDATE course_outlines
                 SET status = ?1, priority = COALESCE(?2, priority), updated_at = ?3
                 WHERE title_key = ?4 AND status != 'completed'",
                params![
                    status.as_str(),
                    priority.map(i64::from),
                    now.as_str(),
                    normalize_identifier(title)
                ],
            )
            .await
            .map_err(|e| CoursesmithError::Storage(e.to_string()))?;

        if changed == 0 && self.get_outline(title).await?.is_none() {
            return Err(CoursesmithError::EntityNotFound(format!("outline '{title}'")));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Topic operations
    // -----------------------------------------------------------------------

    /// Get a topic detail by composite key.
    pub async fn get_topic(&self, topic: &TopicRef) -> Result<Option<TopicDetail>> {
        let (course_key, module_key, topic_key) = topic.keys();
        let mut rows = self
            .conn
            .query(
                "SELECT course_title, module_title, topic_title, content_json, created_at
                 FROM topic_details
                 WHERE course_key = ?1 AND module_key = ?2 AND topic_key = ?3",
                params![course_key, module_key, topic_key],
            )
            .await
            .map_err(|e| CoursesmithError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_topic(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(CoursesmithError::Storage(e.to_string())),
        }
    }

    /// Insert a topic detail and mark the topic completed.
    pub async fn insert_topic(&self, topic: &TopicRef, content: &TopicContent) -> Result<()> {
        self.check_writable()?;
        let (course_key, module_key, topic_key) = topic.keys();
        let content_json = serde_json::to_string(content)
            .map_err(|e| CoursesmithError::Storage(format!("encode topic content: {e}")))?;
        let now = Utc::now().to_rfc3339();

        let inserted = self
            .conn
            .execute(
                "INSERT INTO topic_details (id, course_title, module_title, topic_title, course_key, module_key, topic_key, content_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(course_key, module_key, topic_key) DO NOTHING",
                params![
                    Uuid::now_v7().to_string(),
                    topic.course.as_str(),
                    topic.module.as_str(),
                    topic.topic.as_str(),
                    course_key,
                    module_key,
                    topic_key,
                    content_json,
                    now.as_str()
                ],
            )
            .await
            .map_err(|e| CoursesmithError::Storage(e.to_string()))?;

        self.set_topic_status(topic, GenerationStatus::Completed).await?;

        if inserted == 0 {
            return Err(CoursesmithError::DuplicateKey(format!("topic '{topic}'")));
        }
        Ok(())
    }

    /// Status of the latest request for a topic, if any.
    pub async fn get_topic_status(&self, topic: &TopicRef) -> Result<Option<GenerationStatus>> {
        let (course_key, module_key, topic_key) = topic.keys();
        let mut rows = self
            .conn
            .query(
                "SELECT status FROM topic_status
                 WHERE course_key = ?1 AND module_key = ?2 AND topic_key = ?3",
                params![course_key, module_key, topic_key],
            )
            .await
            .map_err(|e| CoursesmithError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let raw: String = row
                    .get(0)
                    .map_err(|e| CoursesmithError::Storage(e.to_string()))?;
                Ok(Some(parse_status(&raw)?))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(CoursesmithError::Storage(e.to_string())),
        }
    }

    /// Upsert a topic's status. A completed topic keeps its status.
    pub async fn set_topic_status(&self, topic: &TopicRef, status: GenerationStatus) -> Result<()> {
        self.check_writable()?;
        let (course_key, module_key, topic_key) = topic.keys();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO topic_status (course_key, module_key, topic_key, status, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(course_key, module_key, topic_key) DO UPDATE SET
                   status = excluded.status,
                   updated_at = excluded.updated_at
                 WHERE topic_status.status != 'completed'",
                params![course_key, module_key, topic_key, status.as_str(), now.as_str()],
            )
            .await
            .map_err(|e| CoursesmithError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Number of stored topic details for a course.
    pub async fn count_topics(&self, course_title: &str) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM topic_details WHERE course_key = ?1",
                params![normalize_identifier(course_title)],
            )
            .await
            .map_err(|e| CoursesmithError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map(|n| n.max(0) as u64)
                .map_err(|e| CoursesmithError::Storage(e.to_string())),
            Ok(None) => Ok(0),
            Err(e) => Err(CoursesmithError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Course deletion
    // -----------------------------------------------------------------------

    /// Delete an outline with every topic detail and topic status under it.
    pub async fn delete_course(&self, title: &str) -> Result<DeletedCourse> {
        self.check_writable()?;
        let course_key = normalize_identifier(title);

        let topics_removed = self
            .conn
            .execute(
                "DELETE FROM topic_details WHERE course_key = ?1",
                params![course_key.as_str()],
            )
            .await
            .map_err(|e| CoursesmithError::Storage(e.to_string()))?;

        let statuses_removed = self
            .conn
            .execute(
                "DELETE FROM topic_status WHERE course_key = ?1",
                params![course_key.as_str()],
            )
            .await
            .map_err(|e| CoursesmithError::Storage(e.to_string()))?;

        let outlines_removed = self
            .conn
            .execute(
                "DELETE FROM course_outlines WHERE title_key = ?1",
                params![course_key.as_str()],
            )
            .await
            .map_err(|e| CoursesmithError::Storage(e.to_string()))?;

        tracing::info!(
            course = title,
            topics_removed,
            statuses_removed,
            "deleted course content"
        );

        Ok(DeletedCourse {
            outline_removed: outlines_removed > 0,
            topics_removed,
            statuses_removed,
        })
    }
}

fn parse_status(raw: &str) -> Result<GenerationStatus> {
    raw.parse().map_err(CoursesmithError::Storage)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CoursesmithError::Storage(format!("invalid date: {e}")))
}

/// Convert a database row to a [`CourseOutline`].
fn row_to_outline(row: &libsql::Row) -> Result<CourseOutline> {
    let id: String = row
        .get(0)
        .map_err(|e| CoursesmithError::Storage(e.to_string()))?;
    let modules_json: String = row
        .get(2)
        .map_err(|e| CoursesmithError::Storage(e.to_string()))?;
    let status: String = row
        .get(3)
        .map_err(|e| CoursesmithError::Storage(e.to_string()))?;
    let created_at: String = row
        .get(5)
        .map_err(|e| CoursesmithError::Storage(e.to_string()))?;
    let updated_at: String = row
        .get(6)
        .map_err(|e| CoursesmithError::Storage(e.to_string()))?;

    Ok(CourseOutline {
        id: id
            .parse()
            .map_err(|e| CoursesmithError::Storage(format!("invalid course id: {e}")))?,
        title: row
            .get::<String>(1)
            .map_err(|e| CoursesmithError::Storage(e.to_string()))?,
        modules: serde_json::from_str(&modules_json)
            .map_err(|e| CoursesmithError::Storage(format!("invalid modules_json: {e}")))?,
        status: parse_status(&status)?,
        priority: row.get::<i64>(4).map(|p| p as u8).unwrap_or(5),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

/// Convert a database row to a [`TopicDetail`].
fn row_to_topic(row: &libsql::Row) -> Result<TopicDetail> {
    let content_json: String = row
        .get(3)
        .map_err(|e| CoursesmithError::Storage(e.to_string()))?;
    let created_at: String = row
        .get(4)
        .map_err(|e| CoursesmithError::Storage(e.to_string()))?;

    Ok(TopicDetail {
        topic: TopicRef {
            course: row
                .get::<String>(0)
                .map_err(|e| CoursesmithError::Storage(e.to_string()))?,
            module: row
                .get::<String>(1)
                .map_err(|e| CoursesmithError::Storage(e.to_string()))?,
            topic: row
                .get::<String>(2)
                .map_err(|e| CoursesmithError::Storage(e.to_string()))?,
        },
        content: serde_json::from_str(&content_json)
            .map_err(|e| CoursesmithError::Storage(format!("invalid content_json: {e}")))?,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursesmith_shared::Mcq;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("cs_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn modules() -> Vec<Module> {
        vec![
            Module {
                title: "Graphs and Their Representations".into(),
                submodules: vec!["Adjacency Lists".into(), "Adjacency Matrices".into()],
            },
            Module {
                title: "Traversal".into(),
                submodules: vec!["Breadth-First Search".into()],
            },
        ]
    }

    fn content() -> TopicContent {
        TopicContent {
            text: vec!["A graph is a set of vertices joined by edges.".into()],
            videos: vec!["https://www.youtube.com/watch?v=example".into()],
            mcqs: vec![Mcq {
                question: "Which structure uses O(V^2) space?".into(),
                options: vec!["Adjacency list".into(), "Adjacency matrix".into()],
                answer: "Adjacency matrix".into(),
            }],
            extra_questions: vec!["When would you prefer a matrix?".into()],
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("cs_test_{}.db", Uuid::now_v7()));
        let _s1 = Storage::open(&tmp).await.expect("first open");
        drop(_s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn placeholder_is_insert_or_keep() {
        let storage = test_storage().await;

        let first = storage
            .create_outline_placeholder("Graph Theory Foundations", Tier::Normal)
            .await
            .expect("create placeholder");
        assert_eq!(first.status, GenerationStatus::Queued);
        assert_eq!(first.priority, 5);
        assert!(first.modules.is_empty());

        // Same title in a different surface form hits the same row
        let second = storage
            .create_outline_placeholder("graph theory: foundations", Tier::Priority)
            .await
            .expect("existing placeholder");
        assert_eq!(second.id, first.id);
        assert_eq!(second.title, "Graph Theory Foundations");
        assert_eq!(second.status, GenerationStatus::Queued);
    }

    #[tokio::test]
    async fn placeholder_is_not_a_completed_artifact() {
        let storage = test_storage().await;
        let key = EntityKey::Outline("Graph Theory Foundations".into());
        storage
            .create_outline_placeholder("Graph Theory Foundations", Tier::Normal)
            .await
            .unwrap();

        assert!(storage.find_artifact(&key).await.unwrap().is_none());

        storage
            .create_artifact(&key, &ArtifactData::Outline(modules()))
            .await
            .expect("complete outline");

        match storage.find_artifact(&key).await.unwrap() {
            Some(Artifact::Outline(outline)) => {
                assert_eq!(outline.status, GenerationStatus::Completed);
                assert_eq!(outline.modules, modules());
            }
            other => panic!("expected completed outline, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_outline_write_is_duplicate() {
        let storage = test_storage().await;
        storage
            .create_outline_placeholder("Graph Theory Foundations", Tier::Normal)
            .await
            .unwrap();
        storage
            .complete_outline("Graph Theory Foundations", &modules())
            .await
            .unwrap();

        let err = storage
            .complete_outline("Graph Theory Foundations", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, CoursesmithError::DuplicateKey(_)));

        // First write wins
        let outline = storage
            .get_outline("Graph Theory Foundations")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outline.modules.len(), 2);
    }

    #[tokio::test]
    async fn completing_a_deleted_outline_is_not_found() {
        let storage = test_storage().await;
        let err = storage
            .complete_outline("Never Requested", &modules())
            .await
            .unwrap_err();
        assert!(matches!(err, CoursesmithError::EntityNotFound(_)));

        let err = storage
            .set_outline_status("Never Requested", GenerationStatus::Failed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoursesmithError::EntityNotFound(_)));
    }

    #[tokio::test]
    async fn outline_status_updates_and_completed_is_sticky() {
        let storage = test_storage().await;
        let title = "Graph Theory Foundations";
        storage
            .create_outline_placeholder(title, Tier::Normal)
            .await
            .unwrap();

        storage
            .set_outline_status(title, GenerationStatus::Prioritized, Some(1))
            .await
            .unwrap();
        let outline = storage.get_outline(title).await.unwrap().unwrap();
        assert_eq!(outline.status, GenerationStatus::Prioritized);
        assert_eq!(outline.priority, 1);

        storage.complete_outline(title, &modules()).await.unwrap();
        storage
            .update_status(&EntityKey::Outline(title.into()), GenerationStatus::Failed)
            .await
            .unwrap();
        let outline = storage.get_outline(title).await.unwrap().unwrap();
        assert_eq!(outline.status, GenerationStatus::Completed);
    }

    #[tokio::test]
    async fn topic_insert_and_duplicate() {
        let storage = test_storage().await;
        let topic = TopicRef::new("Graph Theory Foundations", "Traversal", "Breadth-First Search");
        let key = EntityKey::Topic(topic.clone());

        assert!(storage.find_artifact(&key).await.unwrap().is_none());
        storage
            .create_artifact(&key, &ArtifactData::Topic(content()))
            .await
            .expect("insert topic");

        let err = storage
            .create_artifact(&key, &ArtifactData::Topic(content()))
            .await
            .unwrap_err();
        assert!(matches!(err, CoursesmithError::DuplicateKey(_)));

        // Lookup is by normalized key
        let alias = TopicRef::new("graph theory foundations", "TRAVERSAL", "breadth first search");
        let detail = storage.get_topic(&alias).await.unwrap().expect("stored topic");
        assert_eq!(detail.topic, topic);
        assert_eq!(detail.content, content());
        assert_eq!(
            storage.get_topic_status(&alias).await.unwrap(),
            Some(GenerationStatus::Completed)
        );
    }

    #[tokio::test]
    async fn topic_status_upsert() {
        let storage = test_storage().await;
        let topic = TopicRef::new("Graph Theory Foundations", "Traversal", "Depth-First Search");

        assert_eq!(storage.get_topic_status(&topic).await.unwrap(), None);
        storage
            .update_status(&EntityKey::Topic(topic.clone()), GenerationStatus::Queued)
            .await
            .unwrap();
        storage
            .set_topic_status(&topic, GenerationStatus::Failed)
            .await
            .unwrap();
        assert_eq!(
            storage.get_topic_status(&topic).await.unwrap(),
            Some(GenerationStatus::Failed)
        );
    }

    #[tokio::test]
    async fn mismatched_artifact_kind_is_rejected() {
        let storage = test_storage().await;
        let err = storage
            .create_artifact(
                &EntityKey::Outline("Graph Theory Foundations".into()),
                &ArtifactData::Topic(content()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoursesmithError::Storage(_)));
    }

    #[tokio::test]
    async fn delete_course_cascades() {
        let storage = test_storage().await;
        let title = "Graph Theory Foundations";
        storage
            .create_outline_placeholder(title, Tier::Normal)
            .await
            .unwrap();
        storage.complete_outline(title, &modules()).await.unwrap();
        for name in ["Adjacency Lists", "Adjacency Matrices"] {
            let topic = TopicRef::new(title, "Graphs and Their Representations", name);
            storage.insert_topic(&topic, &content()).await.unwrap();
        }
        let other = TopicRef::new("Linear Algebra", "Vectors", "Dot Products");
        storage.insert_topic(&other, &content()).await.unwrap();
        assert_eq!(storage.count_topics(title).await.unwrap(), 2);

        let report = storage.delete_course(title).await.unwrap();
        assert_eq!(
            report,
            DeletedCourse {
                outline_removed: true,
                topics_removed: 2,
                statuses_removed: 2,
            }
        );
        assert!(storage.get_outline(title).await.unwrap().is_none());
        assert_eq!(storage.count_topics(title).await.unwrap(), 0);
        // Other courses are untouched
        assert!(storage.get_topic(&other).await.unwrap().is_some());

        let again = storage.delete_course(title).await.unwrap();
        assert_eq!(again, DeletedCourse::default());
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("cs_test_{}.db", Uuid::now_v7()));
        drop(Storage::open(&tmp).await.expect("create db"));

        let ro = Storage::open_readonly(&tmp).await.expect("open readonly");
        let err = ro
            .create_outline_placeholder("Graph Theory Foundations", Tier::Normal)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("read-only"));
        assert!(ro.get_outline("Graph Theory Foundations").await.unwrap().is_none());
    }
}
