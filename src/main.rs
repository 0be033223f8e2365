use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use narraforge::checkpoint::CheckpointManager;
use narraforge::config::JobPaths;
use narraforge::memory::MemoryStore;
use narraforge::narraforge_config::{NarraforgeConfig, NarraforgeToml};
use narraforge::orchestrator::Orchestrator;
use narraforge::router::client::HttpModelClient;
use narraforge_common::{Genre, JobId, OrchestratorEvent, ProductionBrief, ProductionType};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "narraforge")]
#[command(version, about = "Batch narrative-production orchestration engine")]
struct Cli {
    /// Directory holding this job's checkpoint database, logs, and output
    /// manifests (created if absent).
    #[arg(long, global = true, default_value = ".")]
    working_dir: PathBuf,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a production brief and run the ten-stage pipeline to completion.
    Produce {
        /// Path to a YAML brief file (production_type, genre, inspiration, ...).
        /// Mutually exclusive with the inline --production-type/--genre/--inspiration flags.
        #[arg(long)]
        brief: Option<PathBuf>,

        #[arg(long)]
        production_type: Option<String>,
        #[arg(long)]
        genre: Option<String>,
        #[arg(long)]
        inspiration: Option<String>,
        #[arg(long)]
        target_words: Option<u32>,

        /// Override `defaults.cost_budget_usd` for this job.
        #[arg(long)]
        cost_budget: Option<f64>,
        /// Override `defaults.coherence_threshold` for this job.
        #[arg(long)]
        coherence_threshold: Option<f64>,
    },
    /// Resume an interrupted job from its last checkpoint.
    Resume {
        job_id: String,
        /// The original brief (NarraForge does not persist the brief itself,
        /// only the interpreted Pipeline Context).
        #[arg(long)]
        brief: PathBuf,
    },
    /// Print a job's checkpointed progress (completed stages, cumulative cost/tokens).
    Status { job_id: String },
    /// List job ids with a written output manifest under the working
    /// directory's output folder.
    Jobs,
    /// View or validate `.narraforge/narraforge.toml`.
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    Show,
    Validate,
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = JobPaths::new(cli.working_dir.clone(), "output")
        .context("failed to resolve working directory layout")?;
    paths.ensure_directories()?;
    let _log_guard = init_tracing(&paths.log_dir, cli.verbose)?;

    match &cli.command {
        Commands::Produce {
            brief,
            production_type,
            genre,
            inspiration,
            target_words,
            cost_budget,
            coherence_threshold,
        } => {
            let brief = load_brief(brief.as_deref(), production_type, genre, inspiration, *target_words)?;
            run_produce(&paths, brief, *cost_budget, *coherence_threshold).await?;
        }
        Commands::Resume { job_id, brief } => {
            let job_id = parse_job_id(job_id)?;
            let brief = load_brief(Some(brief.as_path()), &None, &None, &None, None)?;
            run_resume(&paths, job_id, brief).await?;
        }
        Commands::Status { job_id } => cmd_status(&paths, job_id)?,
        Commands::Jobs => cmd_jobs(&paths)?,
        Commands::Config { command } => cmd_config(&cli.working_dir, command.clone())?,
    }

    Ok(())
}

/// Routes `tracing` output to a daily-rolling JSON log file under
/// `.narraforge/logs`, keeping stdout free for the CLI's own progress
/// narration. Returns the non-blocking writer guard; dropping it flushes
/// remaining log lines.
fn init_tracing(log_dir: &std::path::Path, verbose: bool) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let file_appender = tracing_appender::rolling::daily(log_dir, "narraforge.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .json()
        .init();
    Ok(guard)
}

fn parse_job_id(raw: &str) -> Result<JobId> {
    raw.parse::<uuid::Uuid>().map(JobId).with_context(|| format!("invalid job id: {raw}"))
}

fn parse_production_type(raw: &str) -> Result<ProductionType> {
    match raw {
        "short_story" | "short-story" => Ok(ProductionType::ShortStory),
        "novella" => Ok(ProductionType::Novella),
        "novel" => Ok(ProductionType::Novel),
        "epic_saga" | "epic-saga" => Ok(ProductionType::EpicSaga),
        other => bail!("unknown production_type: {other}"),
    }
}

fn parse_genre(raw: &str) -> Genre {
    match raw {
        "fantasy" => Genre::Fantasy,
        "sci_fi" | "sci-fi" | "scifi" => Genre::SciFi,
        "mystery" => Genre::Mystery,
        "romance" => Genre::Romance,
        "horror" => Genre::Horror,
        "literary" => Genre::Literary,
        "historical" => Genre::Historical,
        "thriller" => Genre::Thriller,
        other => Genre::Other(other.to_string()),
    }
}

/// Builds the `ProductionBrief` either from a YAML file or from the inline
/// `--production-type`/`--genre`/`--inspiration` flags.
fn load_brief(
    path: Option<&std::path::Path>,
    production_type: &Option<String>,
    genre: &Option<String>,
    inspiration: &Option<String>,
    target_words: Option<u32>,
) -> Result<ProductionBrief> {
    if let Some(path) = path {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read brief file: {}", path.display()))?;
        let brief: ProductionBrief =
            serde_yaml::from_str(&content).context("failed to parse brief file as YAML")?;
        return Ok(brief);
    }

    let production_type = parse_production_type(
        production_type.as_deref().context("--brief or --production-type is required")?,
    )?;
    let genre = parse_genre(genre.as_deref().context("--brief or --genre is required")?);
    let inspiration = inspiration.as_deref().context("--brief or --inspiration is required")?;
    let mut brief = ProductionBrief::new(production_type, genre, inspiration);
    brief.target_word_count = target_words;
    Ok(brief)
}

/// Assembles the shared orchestrator plumbing: persistent Triple Memory +
/// Checkpoint backend, the configured model router, and one registered
/// provider. One `MemoryStore` file backs both memory and checkpoints for a
/// working directory, so `status`/`resume` see what a prior `produce`
/// invocation wrote: checkpoints addressable by `(job_id, stage)`
/// survive process restarts.
fn build_orchestrator(
    paths: &JobPaths,
    cost_budget: Option<f64>,
    coherence_threshold: Option<f64>,
) -> Result<Orchestrator> {
    let config = NarraforgeConfig::with_cli_args(&paths.working_dir, cost_budget, coherence_threshold)?;
    let memory = Arc::new(Mutex::new(MemoryStore::new(&paths.db_path)?));
    let checkpoints = CheckpointManager::new(memory.clone(), config.checkpoint_retention());
    if let Ok(stale) = checkpoints.sweep_retention() {
        if !stale.is_empty() {
            info!(count = stale.len(), "swept retention-expired checkpoints");
        }
    }

    let mut orchestrator = Orchestrator::new(config.clone(), memory, checkpoints);
    if let Ok(api_key) = config.api_key() {
        let client = HttpModelClient::new(config.api_base(), api_key, "primary");
        orchestrator.register_provider(Arc::new(client));
    } else {
        eprintln!(
            "warning: no model provider API key found (expected env var matching [provider].api_key_env); \
             model calls will fail until one is configured"
        );
    }
    Ok(orchestrator)
}

/// Spawns a task that drains a job's event stream to stdout, starting from
/// whatever history has already accumulated.
fn spawn_event_printer(
    history: Vec<OrchestratorEvent>,
    mut rx: tokio::sync::broadcast::Receiver<OrchestratorEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        for event in history {
            print_event(&event);
        }
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let terminal = event.is_terminal();
                    print_event(&event);
                    if terminal {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            }
        }
    })
}

fn print_event(event: &OrchestratorEvent) {
    match event {
        OrchestratorEvent::JobStarted { job_id, .. } => println!("[{job_id}] job started"),
        OrchestratorEvent::StageStarted { stage, attempt, .. } => {
            println!("  stage {stage} started (attempt {attempt})")
        }
        OrchestratorEvent::StageProgress { stage, percent, message, .. } => {
            println!("  stage {stage}: {percent:.0}% {message}")
        }
        OrchestratorEvent::StageComplete { stage, cost, tokens, .. } => {
            println!("  stage {stage} complete (${cost:.4}, {} tokens)", tokens.total())
        }
        OrchestratorEvent::StageFailed { stage, attempt, reason, .. } => {
            println!("  stage {stage} failed on attempt {attempt}: {reason}")
        }
        OrchestratorEvent::JobComplete { job_id, .. } => println!("[{job_id}] job complete"),
        OrchestratorEvent::JobFailed { job_id, stage, reason, .. } => {
            println!("[{job_id}] job failed at stage {stage}: {reason}")
        }
        OrchestratorEvent::JobCancelled { job_id, .. } => println!("[{job_id}] job cancelled"),
    }
}

/// Writes the four output-manifest files to
/// `<output_dir>/<job_id>/`.
fn write_manifest(paths: &JobPaths, job_id: JobId, manifest: &narraforge_common::OutputManifest) -> Result<()> {
    let job_dir = paths.job_output_dir(&job_id.to_string());
    std::fs::create_dir_all(&job_dir)?;
    std::fs::write(job_dir.join("narrative.txt"), &manifest.narrative_text)?;
    std::fs::write(job_dir.join("narrative_audiobook.txt"), &manifest.narrative_audiobook_text)?;
    std::fs::write(job_dir.join("metadata.json"), serde_json::to_string_pretty(&manifest.metadata_json)?)?;
    std::fs::write(job_dir.join("expansion.json"), serde_json::to_string_pretty(&manifest.expansion_json)?)?;
    println!("manifest written to {}", job_dir.display());
    Ok(())
}

async fn run_produce(
    paths: &JobPaths,
    brief: ProductionBrief,
    cost_budget: Option<f64>,
    coherence_threshold: Option<f64>,
) -> Result<()> {
    let orchestrator = Arc::new(build_orchestrator(paths, cost_budget, coherence_threshold)?);
    let job_id = JobId::new();
    println!("submitting job {job_id} ({:?}, {:?})", brief.production_type, brief.genre);

    let produce_orchestrator = orchestrator.clone();
    let produce_brief = brief.clone();
    let produce_handle = tokio::spawn(async move { produce_orchestrator.produce_with_id(job_id, produce_brief).await });

    // Cooperative cancellation: Ctrl-C flips the job's flag; it's honoured
    // at the next stage boundary or model-call suspension point, not
    // immediately.
    let cancel_orchestrator = orchestrator.clone();
    let cancel_watch = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\ncancellation requested; will take effect at the next stage boundary");
            cancel_orchestrator.cancel(&job_id);
        }
    });

    // The spawned `produce` task may not have registered the job yet; poll
    // briefly before subscribing so the printer doesn't miss early events.
    let printer = loop {
        if let Some((history, rx)) = orchestrator.subscribe(&job_id) {
            break spawn_event_printer(history, rx);
        }
        if produce_handle.is_finished() {
            break spawn_event_printer(Vec::new(), tokio::sync::broadcast::channel(1).1);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    let result = produce_handle.await.context("produce task panicked")?;
    cancel_watch.abort();
    let _ = printer.await;

    match result {
        Ok(outcome) => {
            write_manifest(paths, outcome.job_id, &outcome.manifest)?;
            if let Some(record) = orchestrator.status(&outcome.job_id) {
                println!(
                    "done: status={:?} cost=${:.4} tokens={}",
                    record.status,
                    record.cumulative_cost,
                    record.cumulative_tokens.total()
                );
            }
            Ok(())
        }
        Err(err) => bail!("job {job_id} failed: {err}"),
    }
}

async fn run_resume(paths: &JobPaths, job_id: JobId, brief: ProductionBrief) -> Result<()> {
    let orchestrator = Arc::new(build_orchestrator(paths, None, None)?);
    println!("resuming job {job_id}");
    let outcome = orchestrator
        .resume(job_id, brief)
        .await
        .map_err(|err| anyhow::anyhow!("job {job_id} failed to resume: {err}"))?;
    write_manifest(paths, outcome.job_id, &outcome.manifest)?;
    Ok(())
}

fn cmd_status(paths: &JobPaths, job_id: &str) -> Result<()> {
    let _ = parse_job_id(job_id)?; // validate shape before hitting the store
    let memory = Arc::new(Mutex::new(MemoryStore::new(&paths.db_path)?));
    let config = NarraforgeConfig::new(&paths.working_dir)?;
    let checkpoints = CheckpointManager::new(memory, config.checkpoint_retention());
    let resume = checkpoints.load_latest(job_id)?;

    println!();
    println!("Job {job_id}");
    match resume.last_completed_stage {
        None => println!("  no checkpoint found — job has not completed any stage yet"),
        Some(stage) => println!("  last completed stage: {stage}"),
    }
    println!("  cumulative cost:   ${:.4}", resume.cumulative_cost);
    println!("  cumulative tokens: {}", resume.cumulative_tokens.total());
    println!("  completed stages:  {}", resume.context.completed_stages().len());
    println!();
    Ok(())
}

fn cmd_jobs(paths: &JobPaths) -> Result<()> {
    let ids = paths.list_job_ids()?;
    if ids.is_empty() {
        println!("no jobs with a written manifest under {}", paths.output_dir.display());
        return Ok(());
    }
    for job_id in ids {
        println!("{job_id}");
    }
    Ok(())
}

fn cmd_config(working_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = working_dir.join(".narraforge").join("narraforge.toml");

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("NarraForge Configuration");
            println!("========================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
                let toml = NarraforgeToml::load(&config_path)?;
                println!("{}", toml::to_string_pretty(&toml)?);
            } else {
                println!("No narraforge.toml found at {}", config_path.display());
                println!();
                println!("Using default configuration:");
                let toml = NarraforgeToml::default();
                println!("{}", toml::to_string_pretty(&toml)?);
                println!("Run 'narraforge config init' to create a narraforge.toml file.");
            }
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            if !config_path.exists() {
                println!("No narraforge.toml found. Using defaults (valid).");
                return Ok(());
            }
            let toml = NarraforgeToml::load(&config_path)?;
            let warnings = toml.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {warning}");
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("narraforge.toml already exists at {}", config_path.display());
                return Ok(());
            }
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            NarraforgeToml::default().save(&config_path)?;
            println!("Created narraforge.toml at {}", config_path.display());
        }
    }

    Ok(())
}
