//! Relay Daemon - session runtime and message state core
//!
//! Drives the session store against real agent transcripts from the
//! command line.
//!
//! # Usage
//!
//! ```bash
//! # Hydrate a session from its transcript and print the session view
//! relayd hydrate --session s-1 --external-session 3f2a... --project-path ~/code/app
//!
//! # Hydrate, simulate a crash, and print the resulting event stream
//! relayd replay-exit --session s-1 --external-session 3f2a... --code 137
//!
//! # Show the effective configuration
//! relayd config
//!
//! # Enable debug logging
//! RUST_LOG=relayd=debug relayd hydrate ...
//! ```

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use relay_core::SessionId;
use relay_protocol::SnapshotReason;
use tokio::sync::broadcast;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use relayd::collab::Collaborators;
use relayd::config::RelayConfig;
use relayd::history::JsonlHistoryLoader;
use relayd::store::{spawn_store, HydrationTarget, StoreEvent, StoreHandle};

/// How long `replay-exit` waits for the post-exit rehydration.
const REHYDRATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Relay daemon - coding-agent session runtime
#[derive(Parser, Debug)]
#[command(name = "relayd", version, about)]
struct Args {
    /// Config file (defaults to $RELAY_CONFIG or <config_dir>/relay/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the agent's project transcripts
    #[arg(long, global = true)]
    history_root: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Hydrate a session and print its view as JSON
    Hydrate(SessionArgs),
    /// Hydrate, simulate a process exit, and print the events as JSON lines
    ReplayExit {
        #[command(flatten)]
        session: SessionArgs,

        /// Exit code to report; omit for a signal-style exit
        #[arg(long)]
        code: Option<i32>,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[derive(ClapArgs, Debug)]
struct SessionArgs {
    /// Relay session id
    #[arg(long)]
    session: String,

    /// The agent's own session id (names the transcript file)
    #[arg(long)]
    external_session: String,

    /// Working directory the agent runs in
    #[arg(long)]
    project_path: Option<String>,
}

impl SessionArgs {
    fn session_id(&self) -> SessionId {
        SessionId::new(self.session.clone())
    }

    fn target(&self) -> HydrationTarget {
        HydrationTarget::new(
            Some(self.external_session.clone()),
            self.project_path.clone(),
        )
    }
}

fn load_config(args: &Args) -> Result<RelayConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let mut config = RelayConfig::from_file(path)?
                .with_context(|| format!("Config file not found: {}", path.display()))?;
            config.apply_env(|key| std::env::var(key).ok());
            config
        }
        None => RelayConfig::load().context("Failed to load configuration")?,
    };

    if let Some(root) = &args.history_root {
        config.history_root = root.clone();
    }
    if let Some(filter) = &args.log_filter {
        config.log_filter = filter.clone();
    }
    Ok(config)
}

fn init_logging(config: &RelayConfig) -> Result<()> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::try_new(&config.log_filter)
            .with_context(|| format!("Invalid log filter: {}", config.log_filter))?,
    };

    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn spawn(config: &RelayConfig) -> StoreHandle {
    let loader = JsonlHistoryLoader::new(config.history_root.clone());
    spawn_store(config.store_config(), Collaborators::new(Arc::new(loader)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    if let Command::Config = args.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    init_logging(&config)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        history_root = %config.history_root.display(),
        "Relay starting"
    );

    match args.command {
        Command::Hydrate(session) => run_hydrate(&config, &session).await,
        Command::ReplayExit { session, code } => run_replay_exit(&config, &session, code).await,
        Command::Config => Ok(()),
    }
}

async fn run_hydrate(config: &RelayConfig, args: &SessionArgs) -> Result<()> {
    let store = spawn(config);
    let session_id = args.session_id();

    let outcome = store
        .ensure_hydrated(session_id.clone(), args.target())
        .await
        .context("Hydration failed")?;
    debug!(outcome = ?outcome, "Hydration finished");

    let view = store
        .get_session(session_id)
        .await?
        .context("Session vanished after hydration")?;
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

async fn run_replay_exit(config: &RelayConfig, args: &SessionArgs, code: Option<i32>) -> Result<()> {
    let store = spawn(config);
    let session_id = args.session_id();

    store
        .ensure_hydrated(session_id.clone(), args.target())
        .await
        .context("Initial hydration failed")?;

    let mut events = store.subscribe();
    store
        .process_exited(session_id.clone(), code)
        .await
        .context("Failed to apply process exit")?;

    tokio::time::timeout(REHYDRATE_TIMEOUT, print_until_rehydrated(&mut events, &session_id))
        .await
        .with_context(|| {
            format!(
                "No rehydration snapshot within {}s",
                REHYDRATE_TIMEOUT.as_secs()
            )
        })?
}

/// Prints a session's events until the post-exit rehydration lands.
async fn print_until_rehydrated(
    events: &mut broadcast::Receiver<StoreEvent>,
    session_id: &SessionId,
) -> Result<()> {
    loop {
        match events.recv().await {
            Ok(event) => {
                if event.session_id() != session_id {
                    continue;
                }
                println!("{}", event.to_outbound().to_json_line()?);
                if let StoreEvent::Snapshot {
                    reason: SnapshotReason::ProcessExitRehydrate,
                    ..
                } = event
                {
                    return Ok(());
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped = skipped, "Event stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => bail!("Store stopped"),
        }
    }
}
