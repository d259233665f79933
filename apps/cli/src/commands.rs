//! CLI command definitions, routing, and tracing setup.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use coursesmith_core::{JobEvent, JobKey, JobOutcome, Orchestrator};
use coursesmith_generation::CohereClient;
use coursesmith_shared::{
    AppConfig, CourseOutline, GenerationStatus, OrchestratorConfig, Stage, TopicContent, TopicRef,
    database_path, init_config, load_config, validate_api_key,
};
use coursesmith_storage::Storage;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Coursesmith: generate course outlines and lessons on demand.
#[derive(Parser)]
#[command(
    name = "coursesmith",
    version,
    about = "Generate course outlines and topic lessons with a background job queue.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Suggest a course title for a free-form topic.
    Suggest {
        /// What the course should be about.
        topic: String,
    },

    /// Generate (or fetch) a course outline.
    Outline {
        /// Course title.
        title: String,

        /// Jump ahead of background work.
        #[arg(short, long)]
        priority: bool,

        /// Also wait for every topic of the outline to be generated.
        #[arg(long)]
        with_topics: bool,
    },

    /// Generate (or fetch) one topic lesson.
    Topic {
        /// Topic title.
        topic: String,

        /// Course the topic belongs to.
        #[arg(short, long, default_value = "")]
        course: String,

        /// Module the topic belongs to.
        #[arg(short, long, default_value = "")]
        module: String,

        /// Jump ahead of background work.
        #[arg(short, long)]
        priority: bool,
    },

    /// Show generation progress of a course.
    Status {
        /// Course title.
        title: String,
    },

    /// Delete a course outline and all of its topics.
    Delete {
        /// Course title.
        title: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "coursesmith=info",
        1 => "coursesmith=debug",
        _ => "coursesmith=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Suggest { topic } => cmd_suggest(&topic).await,
        Command::Outline {
            title,
            priority,
            with_topics,
        } => cmd_outline(&title, priority, with_topics).await,
        Command::Topic {
            topic,
            course,
            module,
            priority,
        } => cmd_topic(&course, &module, &topic, priority).await,
        Command::Status { title } => cmd_status(&title).await,
        Command::Delete { title } => cmd_delete(&title).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// Open storage and start the orchestrator with the Cohere client.
async fn start_orchestrator() -> Result<(Orchestrator, Arc<Storage>)> {
    let config = load_config()?;
    validate_api_key(&config)?;

    let storage = Arc::new(Storage::open(&database_path(&config)?).await?);
    let client = Arc::new(CohereClient::from_config(&config)?);
    let orchestrator = Orchestrator::start(
        OrchestratorConfig::from(&config),
        storage.clone(),
        client,
    );
    Ok((orchestrator, storage))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_suggest(topic: &str) -> Result<()> {
    let (orchestrator, _storage) = start_orchestrator().await?;
    let progress = CliProgress::new()?;
    progress.set_message("Asking for a course title");

    let suggestion = orchestrator.suggest_course_name(topic).await;
    progress.finish();
    orchestrator.shutdown().await;

    println!();
    println!("  Suggested title: {}", suggestion?);
    println!();
    Ok(())
}

async fn cmd_outline(title: &str, priority: bool, with_topics: bool) -> Result<()> {
    let (orchestrator, storage) = start_orchestrator().await?;
    let mut events = orchestrator.subscribe();

    info!(title, priority, with_topics, "requesting outline");
    let response = if priority {
        orchestrator.request_outline_priority(title).await?
    } else {
        orchestrator.request_outline(title).await?
    };

    let mut progress = CliProgress::new()?;
    if response.status != GenerationStatus::Completed {
        progress.set_message(format!("Outline {}", response.status));
        let target = JobKey::outline(title);
        let outcome = follow(&orchestrator, &mut events, &mut progress, Some(&target)).await;
        if let Some(JobOutcome::Failed) = outcome {
            progress.finish();
            orchestrator.shutdown().await;
            return Err(eyre!(
                "outline generation for '{title}' failed; run the command again to retry"
            ));
        }
    }
    if with_topics {
        progress.set_message("Generating topics");
        follow(&orchestrator, &mut events, &mut progress, None).await;
    }
    progress.finish();

    let outline = storage
        .get_outline(title)
        .await?
        .filter(|outline| outline.status == GenerationStatus::Completed);
    let completed = match &outline {
        Some(outline) => storage.count_topics(&outline.title).await?,
        None => 0,
    };
    orchestrator.shutdown().await;

    let outline = outline.ok_or_else(|| eyre!("no completed outline for '{title}'"))?;
    print_outline(&outline, completed);
    Ok(())
}

async fn cmd_topic(course: &str, module: &str, topic: &str, priority: bool) -> Result<()> {
    let (orchestrator, storage) = start_orchestrator().await?;
    let mut events = orchestrator.subscribe();
    let topic_ref = TopicRef::new(course, module, topic);

    info!(topic = %topic_ref, priority, "requesting topic");
    let response = if priority {
        orchestrator.request_topic_priority(course, module, topic).await?
    } else {
        orchestrator.request_topic(course, module, topic).await?
    };

    let content = match response.content {
        Some(content) => content,
        None => {
            let mut progress = CliProgress::new()?;
            progress.set_message(format!("Topic {}", response.status));
            let target = JobKey::topic(&topic_ref);
            let outcome = follow(&orchestrator, &mut events, &mut progress, Some(&target)).await;
            progress.finish();

            let stored = storage.get_topic(&topic_ref).await?;
            orchestrator.shutdown().await;
            match (stored, outcome) {
                (Some(detail), _) => detail.content,
                (None, Some(JobOutcome::Failed)) => {
                    return Err(eyre!(
                        "topic generation for '{topic_ref}' failed; run the command again to retry"
                    ));
                }
                (None, _) => return Err(eyre!("topic '{topic_ref}' was not generated")),
            }
        }
    };

    print_topic(&topic_ref, &content);
    Ok(())
}

async fn cmd_status(title: &str) -> Result<()> {
    let config = load_config()?;
    let db_path = database_path(&config)?;
    if !db_path.exists() {
        println!("No courses yet ({} does not exist).", db_path.display());
        return Ok(());
    }

    let storage = Storage::open_readonly(&db_path).await?;
    let outline = storage
        .get_outline(title)
        .await?
        .ok_or_else(|| eyre!("no course named '{title}'"))?;
    let completed = storage.count_topics(&outline.title).await?;
    let total: usize = outline.modules.iter().map(|m| m.submodules.len()).sum();

    println!();
    println!("  Course:   {}", outline.title);
    println!("  ID:       {}", outline.id);
    println!("  Outline:  {}", outline.status);
    println!("  Modules:  {}", outline.modules.len());
    println!("  Topics:   {completed}/{total} generated");
    println!("  Updated:  {}", outline.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!();
    Ok(())
}

async fn cmd_delete(title: &str) -> Result<()> {
    let config = load_config()?;
    let storage = Storage::open(&database_path(&config)?).await?;

    info!(title, "deleting course");
    let removed = storage.delete_course(title).await?;
    if !removed.outline_removed && removed.topics_removed == 0 {
        println!("Nothing stored for '{title}'.");
        return Ok(());
    }

    println!();
    println!("  Course deleted: {title}");
    println!("  Outline:  {}", if removed.outline_removed { "removed" } else { "none" });
    println!("  Topics:   {}", removed.topics_removed);
    println!();
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_outline(outline: &CourseOutline, topics_completed: u64) {
    let total: usize = outline.modules.iter().map(|m| m.submodules.len()).sum();

    println!();
    println!("  Course:  {}", outline.title);
    println!("  Topics:  {topics_completed}/{total} generated");
    println!();
    for (i, module) in outline.modules.iter().enumerate() {
        println!("  {}. {}", i + 1, module.title);
        for topic in &module.submodules {
            println!("     - {topic}");
        }
    }
    println!();
}

fn print_topic(topic: &TopicRef, content: &TopicContent) {
    println!();
    println!("  {}", topic.topic);
    println!("  {} / {}", topic.course, topic.module);
    println!();
    for paragraph in &content.text {
        println!("  {paragraph}");
        println!();
    }

    if !content.videos.is_empty() {
        println!("  Videos:");
        for video in &content.videos {
            println!("    {video}");
        }
        println!();
    }

    for (i, mcq) in content.mcqs.iter().enumerate() {
        println!("  Q{}. {}", i + 1, mcq.question);
        for option in &mcq.options {
            let marker = if *option == mcq.answer { "*" } else { " " };
            println!("    {marker} {option}");
        }
        println!();
    }

    if !content.extra_questions.is_empty() {
        println!("  Further questions:");
        for question in &content.extra_questions {
            println!("    - {question}");
        }
        println!();
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Spinner driven by scheduler events.
struct CliProgress {
    spinner: ProgressBar,
    topics_queued: usize,
    topics_done: usize,
}

impl CliProgress {
    fn new() -> Result<Self> {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")?
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        Ok(Self {
            spinner,
            topics_queued: 0,
            topics_done: 0,
        })
    }

    fn set_message(&self, message: impl Into<String>) {
        self.spinner.set_message(message.into());
    }

    fn observe(&mut self, event: &JobEvent) {
        match event {
            JobEvent::Enqueued {
                stage: Stage::Topic, ..
            } => self.topics_queued += 1,
            JobEvent::Started {
                stage: Stage::Outline,
                attempt,
                ..
            } => self.set_message(format!("Generating outline (attempt {attempt})")),
            JobEvent::Retrying { stage, attempt, .. } => {
                self.set_message(format!("Retrying {stage} after attempt {attempt}"));
            }
            JobEvent::Finished {
                stage: Stage::Topic, ..
            } => {
                self.topics_done += 1;
                self.set_message(format!(
                    "Topics [{}/{}]",
                    self.topics_done,
                    self.topics_queued.max(self.topics_done)
                ));
            }
            _ => {}
        }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

/// Feed events to `progress` until `target` finishes, or until the queue
/// drains when there is no target. Returns the target's outcome.
async fn follow(
    orchestrator: &Orchestrator,
    events: &mut broadcast::Receiver<JobEvent>,
    progress: &mut CliProgress,
    target: Option<&JobKey>,
) -> Option<JobOutcome> {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    progress.observe(&event);
                    if let JobEvent::Finished { key, outcome, .. } = &event {
                        if target == Some(key) {
                            return Some(*outcome);
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "progress display fell behind");
                }
                Err(RecvError::Closed) => return None,
            },
            _ = orchestrator.wait_idle(), if target.is_none() => return None,
        }
    }
}
