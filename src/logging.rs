use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

fn filter(default_directives: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives))
}

/// Log to stderr. `RUST_LOG` overrides `default_directives`.
pub fn init(default_directives: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(filter(default_directives))
        .with_writer(std::io::stderr)
        .init();
}

/// Log to an append-only file, for processes whose stdout is a protocol
/// stream.
pub fn init_to_file(default_directives: &str, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log dir {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter(default_directives))
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
    Ok(())
}
