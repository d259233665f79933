//! Application configuration for Coursesmith.
//!
//! User config lives at `~/.coursesmith/coursesmith.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoursesmithError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "coursesmith.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".coursesmith";

// ---------------------------------------------------------------------------
// Config structs (matching coursesmith.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Content store location.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Cohere generation service settings.
    #[serde(default)]
    pub cohere: CohereConfig,

    /// Worker pool and retry settings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Topic batch pacing.
    #[serde(default)]
    pub pacing: PacingConfig,

    /// Outline shape enforced after validation.
    #[serde(default)]
    pub outline: OutlineConfig,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the libSQL database file. A leading `~/` expands to the home directory.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "~/.coursesmith/coursesmith.db".into()
}

/// `[cohere]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohereConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Chat model used for every stage.
    #[serde(default = "default_model")]
    pub model: String,

    /// API root; the client posts to `<base_url>/chat`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Timeout for name suggestions, in seconds.
    #[serde(default = "default_name_timeout")]
    pub name_timeout_secs: u64,

    /// Timeout for outline generation, in seconds.
    #[serde(default = "default_outline_timeout")]
    pub outline_timeout_secs: u64,

    /// Timeout for topic generation, in seconds.
    #[serde(default = "default_topic_timeout")]
    pub topic_timeout_secs: u64,
}

impl Default for CohereConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            model: default_model(),
            base_url: default_base_url(),
            name_timeout_secs: default_name_timeout(),
            outline_timeout_secs: default_outline_timeout(),
            topic_timeout_secs: default_topic_timeout(),
        }
    }
}

fn default_api_key_env() -> String {
    "COHERE_API_KEY".into()
}
fn default_model() -> String {
    "command-a-03-2025".into()
}
fn default_base_url() -> String {
    "https://api.cohere.ai/v1".into()
}
fn default_name_timeout() -> u64 {
    15
}
fn default_outline_timeout() -> u64 {
    60
}
fn default_topic_timeout() -> u64 {
    180
}

/// `[queue]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Total attempts per job, first try included.
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,

    /// Concurrent outline workers.
    #[serde(default = "default_outline_workers")]
    pub outline_workers: usize,

    /// Concurrent topic workers.
    #[serde(default = "default_topic_workers")]
    pub topic_workers: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retry_budget: default_retry_budget(),
            outline_workers: default_outline_workers(),
            topic_workers: default_topic_workers(),
        }
    }
}

fn default_retry_budget() -> u32 {
    2
}
fn default_outline_workers() -> usize {
    2
}
fn default_topic_workers() -> usize {
    3
}

/// `[pacing]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Topic jobs started per batch.
    #[serde(default = "default_batch_size")]
    pub topic_batch_size: usize,

    /// Pause between topic batches, in milliseconds.
    #[serde(default = "default_batch_delay")]
    pub topic_batch_delay_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            topic_batch_size: default_batch_size(),
            topic_batch_delay_ms: default_batch_delay(),
        }
    }
}

fn default_batch_size() -> usize {
    5
}
fn default_batch_delay() -> u64 {
    15_000
}

/// `[outline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlineConfig {
    #[serde(default = "default_modules")]
    pub modules_per_course: usize,

    #[serde(default = "default_topics")]
    pub topics_per_module: usize,
}

impl Default for OutlineConfig {
    fn default() -> Self {
        Self {
            modules_per_course: default_modules(),
            topics_per_module: default_topics(),
        }
    }
}

fn default_modules() -> usize {
    6
}
fn default_topics() -> usize {
    5
}

// ---------------------------------------------------------------------------
// Orchestrator config (runtime, derived from the config file)
// ---------------------------------------------------------------------------

/// Fixed number of modules and topics per module an outline is normalized to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutlineShape {
    pub modules: usize,
    pub topics: usize,
}

/// Runtime settings for the scheduler and worker pools.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Total attempts per job before the entity is marked failed.
    pub retry_budget: u32,
    /// Worker tasks pulling outline jobs.
    pub outline_workers: usize,
    /// Worker tasks pulling topic jobs.
    pub topic_workers: usize,
    /// Topic jobs started before the pool pauses.
    pub topic_batch_size: usize,
    /// Pause after each full topic batch.
    pub topic_batch_delay: Duration,
    /// Outline normalization target.
    pub outline_shape: OutlineShape,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for OrchestratorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            retry_budget: config.queue.retry_budget.max(1),
            outline_workers: config.queue.outline_workers.max(1),
            topic_workers: config.queue.topic_workers.max(1),
            topic_batch_size: config.pacing.topic_batch_size.max(1),
            topic_batch_delay: Duration::from_millis(config.pacing.topic_batch_delay_ms),
            outline_shape: OutlineShape {
                modules: config.outline.modules_per_course.max(1),
                topics: config.outline.topics_per_module.max(1),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.coursesmith/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CoursesmithError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.coursesmith/coursesmith.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| CoursesmithError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        CoursesmithError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CoursesmithError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CoursesmithError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CoursesmithError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Resolve `[storage].database_path`, expanding a leading `~/`.
pub fn database_path(config: &AppConfig) -> Result<PathBuf> {
    let raw = config.storage.database_path.as_str();
    match raw.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| CoursesmithError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(raw)),
    }
}

/// Read the Cohere API key from the env var named in the config.
pub fn api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.cohere.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(CoursesmithError::config(format!(
            "Cohere API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://dashboard.cohere.com/api-keys"
        ))),
    }
}

/// Check that the Cohere API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    api_key(config).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("database_path"));
        assert!(toml_str.contains("COHERE_API_KEY"));
        assert!(toml_str.contains("topic_batch_delay_ms"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.queue.retry_budget, 2);
        assert_eq!(parsed.cohere.api_key_env, "COHERE_API_KEY");
        assert_eq!(parsed.cohere.topic_timeout_secs, 180);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[queue]
topic_workers = 8

[pacing]
topic_batch_delay_ms = 0
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.queue.topic_workers, 8);
        assert_eq!(config.queue.outline_workers, 2);
        assert_eq!(config.pacing.topic_batch_size, 5);
        assert_eq!(config.pacing.topic_batch_delay_ms, 0);
        assert_eq!(config.outline.modules_per_course, 6);
    }

    #[test]
    fn orchestrator_config_from_app_config() {
        let mut app = AppConfig::default();
        app.queue.retry_budget = 0;
        let runtime = OrchestratorConfig::from(&app);
        assert_eq!(runtime.retry_budget, 1);
        assert_eq!(runtime.outline_workers, 2);
        assert_eq!(runtime.topic_workers, 3);
        assert_eq!(runtime.topic_batch_delay, Duration::from_secs(15));
        assert_eq!(
            runtime.outline_shape,
            OutlineShape {
                modules: 6,
                topics: 5
            }
        );
    }

    #[test]
    fn database_path_expands_home() {
        let mut config = AppConfig::default();
        config.storage.database_path = "/tmp/cs.db".into();
        assert_eq!(database_path(&config).unwrap(), PathBuf::from("/tmp/cs.db"));

        config.storage.database_path = "~/data/cs.db".into();
        let resolved = database_path(&config).unwrap();
        assert!(resolved.ends_with("data/cs.db"));
        assert!(!resolved.to_string_lossy().contains('~'));
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.cohere.api_key_env = "CS_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
