use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use securefill::Config;
use securefill::relay::HostRelay;

/// Native-messaging host. Started by the browser, talks to the extension
/// over stdin/stdout and to the orchestrator over loopback TCP.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to config.yaml
    #[arg(long, env = "SECUREFILL_CONFIG")]
    config: Option<PathBuf>,

    /// Launch arguments passed by the browser (extension origin, parent window).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, hide = true)]
    browser_args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    // stdout belongs to the browser, so nothing may be printed there.
    // The log file comes from the config, so its source is logged afterwards.
    let source = Config::resolve_path(cli.config.as_deref());
    let config = Config::load(source.as_deref())?;
    securefill::logging::init_to_file("securefill=info,host=info", &config.host_log_path())?;

    match &source {
        Some(path) => tracing::info!(path = %path.display(), "loaded config"),
        None => tracing::info!("no config file found, using defaults"),
    }
    tracing::info!(args = ?cli.browser_args, "host started by browser");

    let relay = HostRelay::bind(config.host_addr(), config.orchestrator_addr())
        .with_context(|| format!("failed to bind command port {}", config.host_port))?;
    relay.run(tokio::io::stdin(), tokio::io::stdout()).await?;

    tracing::info!("browser disconnected, host exiting");
    Ok(())
}
