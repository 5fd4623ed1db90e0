//! Embaixada CLI - inspect and drive the offline sync core.
//!
//! Runs the same stack the mobile app embeds against a persistent store, so
//! pending writes, cached reads and visa drafts survive between invocations.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use embaixada_api::{
    AppointmentCreateRequest, AppointmentType, CancelAppointment, HttpProbe, PendingWrite,
    StaticTokenProvider, VisaCreateRequest, VisaDraft, VisaType,
};
use embaixada_app::{App, AppConfig, StoreConfig, Submission};
use embaixada_sync::{ManualSignal, NetworkSignal, ProcessResult};

/// Environment variable holding the bearer token.
const TOKEN_ENV: &str = "EMBAIXADA_ACCESS_TOKEN";

#[derive(Parser)]
#[command(name = "embaixada")]
#[command(about = "Embaixada - offline sync console")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (JSON).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Treat the network as unavailable.
    #[arg(long, global = true)]
    offline: bool,

    /// Print machine-readable JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show connectivity and queue state.
    Status,

    /// List operations waiting to be sent.
    Pending,

    /// Send a write now, or queue it when offline.
    #[command(subcommand)]
    Submit(SubmitCommand),

    /// Drain the queue once.
    Sync,

    /// Keep draining the queue whenever connectivity returns, until Ctrl-C.
    Watch,

    /// Show the signed-in citizen's profile (cache-first).
    Profile,

    /// Manage the read cache.
    #[command(subcommand)]
    Cache(CacheCommand),

    /// Manage the pending-write queue.
    #[command(subcommand)]
    Queue(QueueCommand),

    /// Manage local visa drafts.
    #[command(subcommand)]
    Drafts(DraftCommand),
}

#[derive(Subcommand)]
enum SubmitCommand {
    /// Apply for a visa.
    Visa {
        /// Visa type as sent to the server (e.g. TURISMO, ESTUDO).
        #[arg(short = 't', long = "type", value_parser = parse_wire::<VisaType>)]
        kind: VisaType,

        /// Travel reason.
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Book an appointment.
    Appointment {
        /// Appointment type as sent to the server (e.g. PASSAPORTE).
        #[arg(short = 't', long = "type", value_parser = parse_wire::<AppointmentType>)]
        kind: AppointmentType,

        /// Slot start, ISO-8601 local time.
        #[arg(short, long)]
        at: String,

        #[arg(short, long)]
        notes: Option<String>,
    },

    /// Cancel an appointment.
    Cancel {
        /// Appointment id.
        #[arg(short, long)]
        id: String,

        #[arg(short, long)]
        reason: String,
    },

    /// Change profile fields.
    Profile {
        /// Field assignment as key=value; values are parsed as JSON when possible.
        #[arg(short, long = "set", value_parser = parse_assignment, required = true)]
        set: Vec<(String, Value)>,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Remove expired entries.
    Evict,
    /// Remove every cached entry.
    Clear,
    /// Show index statistics.
    Stats,
}

#[derive(Subcommand)]
enum QueueCommand {
    /// Drop every pending operation.
    Clear,
}

#[derive(Subcommand)]
enum DraftCommand {
    /// List saved drafts.
    List,
    /// Save a new draft.
    Save {
        #[arg(short = 't', long = "type", value_parser = parse_wire::<VisaType>)]
        kind: VisaType,

        #[arg(short, long)]
        reason: Option<String>,
    },
    /// Submit a draft and delete it on success.
    Submit {
        /// Draft id.
        id: String,
    },
    /// Delete a draft.
    Delete {
        /// Draft id.
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(cli.config.as_deref())?;
    let (app, probe) = build_app(config, cli.offline)?;

    match cli.command {
        Commands::Status => cmd_status(&app, cli.json).await,
        Commands::Pending => cmd_pending(&app, cli.json).await,
        Commands::Submit(command) => cmd_submit(&app, command).await,
        Commands::Sync => cmd_sync(&app, cli.json).await,
        Commands::Watch => cmd_watch(&app, probe.as_ref()).await,
        Commands::Profile => cmd_profile(&app, cli.json).await,
        Commands::Cache(command) => cmd_cache(&app, command).await,
        Commands::Queue(QueueCommand::Clear) => {
            app.queue().clear().await.context("Failed to clear queue")?;
            println!("Queue cleared.");
            Ok(())
        }
        Commands::Drafts(command) => cmd_drafts(&app, command, cli.json).await,
    }
}

/// Parse a value by its wire name.
fn parse_wire<T: DeserializeOwned>(raw: &str) -> std::result::Result<T, String> {
    serde_json::from_value(Value::String(raw.to_uppercase()))
        .map_err(|_| format!("unknown value '{}'", raw))
}

fn parse_assignment(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    if key.is_empty() {
        return Err("field name must not be empty".to_string());
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Config file from the flag or the user config dir, with a persistent store.
fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let default_path = dirs::config_dir().map(|dir| dir.join("embaixada").join("config.json"));
    let path = match path {
        Some(path) => Some(path.to_path_buf()),
        None => default_path.filter(|p| p.exists()),
    };

    let mut config = AppConfig::load(path.as_deref()).context("Failed to load configuration")?;

    // A one-shot process needs state that outlives it
    if config.store == StoreConfig::default() {
        let dir = dirs::data_local_dir()
            .context("No local data directory; set EMBAIXADA_STORE_BACKEND and EMBAIXADA_STORE_PATH")?
            .join("embaixada");
        config.store.backend = "sqlite".to_string();
        config
            .store
            .set_path(&dir.join("store.db").to_string_lossy())?;
    }
    debug!("Using {} store", config.store.backend);
    Ok(config)
}

fn build_app(
    config: AppConfig,
    offline: bool,
) -> Result<(App, Option<Arc<HttpProbe>>)> {
    let probe = if offline {
        None
    } else {
        Some(App::http_probe(&config).context("Invalid health URL")?)
    };
    let signal: Arc<dyn NetworkSignal> = match &probe {
        Some(probe) => Arc::clone(probe) as Arc<dyn NetworkSignal>,
        None => Arc::new(ManualSignal::offline()),
    };

    let tokens = Arc::new(StaticTokenProvider::from_env(TOKEN_ENV));
    let app = App::build(config, signal, tokens).context("Failed to build app")?;
    Ok((app, probe))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_result(result: &ProcessResult) {
    println!("  Sent: {}", result.success);
    println!("  Failed: {}", result.failed);
    if !result.evicted.is_empty() {
        println!("  Dropped:");
        for id in &result.evicted {
            println!("    {}", id.as_str());
        }
    }
}

async fn cmd_status(app: &App, json: bool) -> Result<()> {
    let status = app.processor().status().await?;
    if json {
        return print_json(&status);
    }

    println!("Sync Status:");
    println!("  Online: {}", if status.online { "yes" } else { "no" });
    println!("  Pending: {}", status.pending);
    println!("  API: {}", app.config().sgc_api_url);
    println!("  Store: {}", app.store().name());
    Ok(())
}

async fn cmd_pending(app: &App, json: bool) -> Result<()> {
    let ops = app.queue().get_all().await.context("Failed to read queue")?;
    if json {
        return print_json(&ops);
    }

    if ops.is_empty() {
        println!("Nothing pending.");
        return Ok(());
    }
    println!("Pending operations:");
    for op in ops {
        println!("  {} {} (attempts: {})", op.id.as_str(), op.kind, op.retry_count);
        if let Some(error) = op.last_error {
            println!("      last error: {}", error);
        }
    }
    Ok(())
}

async fn cmd_submit(app: &App, command: SubmitCommand) -> Result<()> {
    let write = match command {
        SubmitCommand::Visa { kind, reason } => {
            let mut request = VisaCreateRequest::new(kind);
            request.travel_reason = reason;
            PendingWrite::CreateVisa(request)
        }
        SubmitCommand::Appointment { kind, at, notes } => {
            PendingWrite::CreateAppointment(AppointmentCreateRequest {
                kind,
                scheduled_at: at,
                notes,
            })
        }
        SubmitCommand::Cancel { id, reason } => {
            PendingWrite::CancelAppointment(CancelAppointment { id, reason })
        }
        SubmitCommand::Profile { set } => {
            PendingWrite::UpdateProfile(set.into_iter().collect::<Map<String, Value>>())
        }
    };

    info!("Submitting {}", write.kind());
    match app.submit(write).await.context("Submission rejected")? {
        Submission::Sent => println!("Sent."),
        Submission::Queued(op) => println!("Queued as {}; will be sent when online.", op.id.as_str()),
    }
    Ok(())
}

async fn cmd_sync(app: &App, json: bool) -> Result<()> {
    let status = app.processor().trigger_sync().await.context("Sync failed")?;
    if json {
        return print_json(&status);
    }

    if !status.online {
        println!("Offline; nothing sent.");
    }
    if let Some(result) = &status.last_result {
        println!("Sync pass:");
        print_result(result);
    }
    println!("  Still pending: {}", status.pending);
    Ok(())
}

async fn cmd_watch(app: &App, probe: Option<&Arc<HttpProbe>>) -> Result<()> {
    if let Some(probe) = probe {
        probe.spawn()?;
    }
    app.start()?;
    println!("Watching for connectivity changes (Ctrl-C to stop)...");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    app.shutdown().await;
    if let Some(probe) = probe {
        probe.stop();
    }
    if let Some(result) = app.processor().status().await?.last_result {
        println!("Last sync pass:");
        print_result(&result);
    }
    Ok(())
}

async fn cmd_profile(app: &App, json: bool) -> Result<()> {
    let state = app.profile_query().refresh().await;
    let Some(citizen) = state.data else {
        match state.error {
            Some(error) => anyhow::bail!("Profile unavailable: {}", error),
            None => anyhow::bail!("Profile unavailable offline and not cached"),
        }
    };
    if json {
        return print_json(&citizen);
    }

    println!("Citizen Profile:");
    println!("  Name: {} {}", citizen.first_name, citizen.last_name);
    println!("  Email: {}", citizen.email);
    println!("  Phone: {}", citizen.phone);
    if let Some(city) = &citizen.city {
        println!("  City: {}", city);
    }
    if state.is_stale {
        println!("(cached copy, may be outdated)");
    } else if let Some(error) = state.error {
        println!("(cached copy; refresh failed: {})", error);
    }
    Ok(())
}

async fn cmd_cache(app: &App, command: CacheCommand) -> Result<()> {
    let cache = app.cache();
    match command {
        CacheCommand::Evict => {
            let evicted = cache.evict_expired().await.context("Eviction failed")?;
            println!("Evicted {} entries.", evicted);
        }
        CacheCommand::Clear => {
            cache.clear().await.context("Failed to clear cache")?;
            println!("Cache cleared.");
        }
        CacheCommand::Stats => {
            let stats = cache.stats().await?;
            println!("Cache:");
            println!("  Entries: {}", stats.tracked_keys);
            println!("  Size: {} bytes", stats.total_size);
        }
    }
    Ok(())
}

async fn cmd_drafts(app: &App, command: DraftCommand, json: bool) -> Result<()> {
    let drafts = app.drafts();
    match command {
        DraftCommand::List => {
            let saved = drafts.list().await?;
            if json {
                return print_json(&saved);
            }
            if saved.is_empty() {
                println!("No drafts.");
            }
            for draft in saved {
                println!("  {} {:?}", draft.draft_id, draft.request.kind);
            }
        }
        DraftCommand::Save { kind, reason } => {
            let mut request = VisaCreateRequest::new(kind);
            request.travel_reason = reason;
            let draft = VisaDraft::new(request);
            let id = draft.draft_id.clone();
            drafts.save(draft).await.context("Failed to save draft")?;
            println!("Draft saved: {}", id);
        }
        DraftCommand::Submit { id } => {
            let visa = drafts
                .submit(&id, &app.visas())
                .await
                .context("Failed to submit draft")?;
            println!("Visa application created: {} ({})", visa.id, visa.reference);
        }
        DraftCommand::Delete { id } => {
            drafts.delete(&id).await?;
            println!("Draft deleted: {}", id);
        }
    }
    Ok(())
}
