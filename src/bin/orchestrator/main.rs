mod console;
mod face;
mod hotkey;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use securefill::Config;
use securefill::coordinator::{Coordinator, HostLink, RunOutcome, TcpHostLink, Timings};
use securefill::listener::ScanListener;
use securefill::planner::{PlanGenerator, PlanSource, model};
use securefill::protocol::Command;
use securefill::store::StoreFile;
use tokio::sync::mpsc;

/// A request to start a fill run, from the hotkey or the web UI.
pub struct Activation {
    pub prompt: Option<String>,
}

#[derive(Debug, Parser)]
#[command(version, about = "SecureFill orchestrator: scans, plans and fills web forms")]
struct Cli {
    /// Path to config.yaml
    #[arg(long, env = "SECUREFILL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Stay resident and start a run on every hotkey press or web UI prompt (default)
    Serve {
        /// Do not register the global Ctrl+Shift+F hotkey
        #[arg(long)]
        no_hotkey: bool,
    },
    /// Fill the current page once and exit
    Run {
        /// Fill instruction; asked on the terminal when omitted
        #[arg(short, long)]
        prompt: Option<String>,
    },
    /// Ask the extension to scan the current page
    Scan,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    securefill::logging::init("securefill=info,orchestrator=info");

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.mode.unwrap_or(Mode::Serve { no_hotkey: false }) {
        Mode::Serve { no_hotkey } => serve(&config, no_hotkey).await,
        Mode::Run { prompt } => run_once(&config, prompt).await,
        Mode::Scan => {
            TcpHostLink::new(config.host_addr())
                .send(&Command::Scan)
                .await
                .with_context(|| format!("host not reachable on {}", config.host_addr()))?;
            tracing::info!("scan requested, results go to the resident orchestrator");
            Ok(())
        }
    }
}

async fn serve(config: &Config, no_hotkey: bool) -> Result<()> {
    let listener = bind_listener(config)?;
    let (scan_tx, scan_rx) = mpsc::channel(4);
    tokio::spawn(listener.serve(scan_tx));

    let (activation_tx, mut activations) = mpsc::channel::<Activation>(8);
    let ui = face::start_server(config.ui_port, activation_tx.clone()).await?;
    if !no_hotkey {
        hotkey::spawn_listener(activation_tx.clone());
    }

    let coordinator = Arc::new(Coordinator::new(
        ui,
        Arc::new(TcpHostLink::new(config.host_addr())),
        build_planner(config),
        scan_rx,
        timings(config),
    ));

    tracing::info!("orchestrator ready, press Ctrl+Shift+F on a form");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                return Ok(());
            }
            Some(activation) = activations.recv() => {
                let coordinator = Arc::clone(&coordinator);
                tokio::spawn(async move {
                    let outcome = coordinator.activate(activation.prompt).await;
                    tracing::info!(?outcome, "run finished");
                });
            }
        }
    }
}

async fn run_once(config: &Config, prompt: Option<String>) -> Result<()> {
    let listener = bind_listener(config)?;
    let (scan_tx, scan_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let fields = listener.accept_once().await;
        let _ = scan_tx.send(fields).await;
    });

    let coordinator = Arc::new(Coordinator::new(
        Arc::new(console::ConsoleUi::stdin()),
        Arc::new(TcpHostLink::new(config.host_addr())),
        build_planner(config),
        scan_rx,
        timings(config),
    ));

    match coordinator.activate(prompt).await {
        RunOutcome::Failed(reason) => bail!(reason),
        outcome => {
            tracing::info!(?outcome, "run finished");
            Ok(())
        }
    }
}

fn bind_listener(config: &Config) -> Result<ScanListener> {
    ScanListener::bind(config.orchestrator_addr())
        .with_context(|| format!("failed to bind scan port {}", config.orchestrator_port))
}

fn build_planner(config: &Config) -> Arc<dyn PlanSource> {
    if config.model.api_key.is_none() {
        tracing::warn!("no model API key configured; requests will likely be rejected");
    }

    let mut generator = PlanGenerator::new(model::from_config(&config.model))
        .with_primary_context(config.primary_context.clone());
    if config.retrieval.enabled {
        generator = generator.with_retriever(
            Arc::new(StoreFile::new(config.data_store_path())),
            config.retrieval.top_k,
        );
    }
    Arc::new(generator)
}

fn timings(config: &Config) -> Timings {
    Timings {
        prompt_timeout: config.prompt_timeout(),
        scan_timeout: config.scan_timeout(),
        error_grace: config.error_grace(),
    }
}
