//! SQL migration definitions for the Coursesmith content store.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: course_outlines, topic_details",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per course title; a queued placeholder until the outline job completes
CREATE TABLE IF NOT EXISTS course_outlines (
    id           TEXT PRIMARY KEY,
    title        TEXT NOT NULL,
    title_key    TEXT NOT NULL UNIQUE,
    modules_json TEXT NOT NULL DEFAULT '[]',
    status       TEXT NOT NULL,
    priority     INTEGER NOT NULL,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

-- Generated topic content, unique per (course, module, topic)
CREATE TABLE IF NOT EXISTS topic_details (
    id           TEXT PRIMARY KEY,
    course_title TEXT NOT NULL,
    module_title TEXT NOT NULL,
    topic_title  TEXT NOT NULL,
    course_key   TEXT NOT NULL,
    module_key   TEXT NOT NULL,
    topic_key    TEXT NOT NULL,
    content_json TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    UNIQUE(course_key, module_key, topic_key)
);

CREATE INDEX IF NOT EXISTS idx_topic_details_course ON topic_details(course_key);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Per-topic request status",
            sql: r#"
CREATE TABLE IF NOT EXISTS topic_status (
    course_key TEXT NOT NULL,
    module_key TEXT NOT NULL,
    topic_key  TEXT NOT NULL,
    status     TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (course_key, module_key, topic_key)
);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
