//! # Smartlock Console
//!
//! Operator console for the smartlock tag list.
//!
//! ## Session
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  $ smartlock-console --broker-url mqtt://10.0.0.5                       │
//! │  ● connected                                                            │
//! │  Tags (2)                                                               │
//! │    04A1B2C3                                                             │
//! │    04D5E6F7                                                             │
//! │  > delete 04D5E6F7                                                      │
//! │  Delete tag 04D5E6F7? [y/N] y                                           │
//! │    04D5E6F7  Deleting...                                                │
//! │  Tags (1)                                                               │
//! │    04A1B2C3                                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod emitter;
mod repl;

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use smartlock_core::Confirmation;
use smartlock_sync::{AgentHandle, SyncResult, TagSyncAgentBuilder, TagSyncConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::emitter::{render_status, render_tags, ConsoleEmitter};
use crate::repl::{is_yes, ReplCommand, HELP};

/// Time given to the transport to send DISCONNECT before exit.
const DISCONNECT_GRACE: Duration = Duration::from_millis(250);

/// Operator console for the smartlock tag list.
#[derive(Parser)]
#[command(name = "smartlock-console")]
#[command(about = "Manage the tags enrolled on a smartlock over MQTT", long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Broker URL, overrides config and environment
    #[arg(long)]
    broker_url: Option<String>,

    /// MQTT client id, overrides config and environment
    #[arg(long)]
    client_id: Option<String>,

    /// Write a default config file to PATH and exit
    #[arg(long, value_name = "PATH")]
    write_default_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if let Some(path) = cli.write_default_config {
        TagSyncConfig::default()
            .save(Some(path.clone()))
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Wrote default config to {}", path.display());
        return Ok(());
    }

    let mut config = TagSyncConfig::load(cli.config).context("loading configuration")?;
    if let Some(url) = cli.broker_url {
        config.broker.url = url;
    }
    if let Some(id) = cli.client_id {
        config.client.id = id;
    }

    let started = TagSyncAgentBuilder::new(config)
        .with_emitter(Arc::new(ConsoleEmitter::new()))
        .start();
    let agent = match started {
        Ok(agent) => agent,
        Err(e) if e.is_config_error() => {
            return Err(e).context("invalid configuration, check --broker-url or the config file")
        }
        Err(e) => return Err(e).context("starting tag sync agent"),
    };

    println!("{}", HELP);
    run_repl(&agent).await?;

    if let Err(e) = agent.shutdown().await {
        error!(error = %e, "Agent already stopped");
    }
    tokio::time::sleep(DISCONNECT_GRACE).await;
    info!("Console exiting");
    Ok(())
}

/// Reads commands until `quit`, end of input or Ctrl-C.
async fn run_repl(agent: &AgentHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                break;
            }
        };

        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<ReplCommand>() {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        match command {
            ReplCommand::Quit => break,
            ReplCommand::Help => println!("{}", HELP),
            ReplCommand::List => println!("{}", render_tags(&agent.status().await)),
            ReplCommand::Status => println!("{}", render_status(&agent.status().await)),
            ReplCommand::Add => report(agent.add_tag().await, "Add mode requested"),
            ReplCommand::Open => report(agent.open_door().await, "Door opened"),
            ReplCommand::Refresh => report(agent.refresh().await, "Tag list requested"),
            ReplCommand::Delete(tag) => {
                print!("Delete tag {}? [y/N] ", tag);
                std::io::stdout().flush()?;

                let answer = lines.next_line().await?.unwrap_or_default();
                let confirmation = Confirmation::from(is_yes(&answer));
                report(agent.delete_tag(tag, confirmation).await, "Delete requested");
            }
        }
    }

    Ok(())
}

fn report(result: SyncResult<()>, accepted: &str) {
    match result {
        Ok(()) => println!("{}", accepted),
        Err(e) if e.is_rejection() => println!("! {}", e),
        Err(e) => {
            error!(error = %e, "Request failed");
            println!("! {}", e);
        }
    }
}

/// Initializes the tracing subscriber for structured logging.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=smartlock_sync=trace` - Trace the agent and transport only
/// - Default: INFO, DEBUG for smartlock crates, WARN for rumqttc
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,smartlock=debug,rumqttc=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
