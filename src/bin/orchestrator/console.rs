use std::io::BufRead;

use async_trait::async_trait;
use securefill::coordinator::{PromptUi, RunState};
use tokio::sync::{Mutex, mpsc};

/// Terminal prompt for one-shot runs.
///
/// Lines come from a detached reader thread; an abandoned prompt never
/// holds the runtime open at shutdown.
pub struct ConsoleUi {
    lines: Mutex<mpsc::Receiver<String>>,
}

impl ConsoleUi {
    pub fn stdin() -> Self {
        Self::reading(|| std::io::stdin().lock())
    }

    /// Read prompts line by line from whatever `open` returns, on its own
    /// thread.
    fn reading<R, F>(open: F) -> Self
    where
        R: BufRead,
        F: FnOnce() -> R + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);
        let spawned = std::thread::Builder::new()
            .name("prompt-reader".into())
            .spawn(move || {
                for line in open().lines() {
                    match line {
                        Ok(line) => {
                            if tx.blocking_send(line).is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "could not read the prompt");
                            return;
                        }
                    }
                }
            });
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "no prompt reader; prompts will be cancelled");
        }
        Self {
            lines: Mutex::new(rx),
        }
    }
}

#[async_trait]
impl PromptUi for ConsoleUi {
    async fn request_prompt(&self) -> Option<String> {
        eprintln!("What would you like to do? (Enter for primary data, Ctrl+D to cancel)");
        // None once stdin hits EOF
        let line = self.lines.lock().await.recv().await?;
        Some(line.trim().to_string())
    }

    fn show_status(&self, state: &RunState, message: &str) {
        match state {
            RunState::Idle | RunState::AwaitingPrompt => {}
            RunState::Error(_) => eprintln!("[SecureFill] failed: {message}"),
            _ => eprintln!("[SecureFill] {message}"),
        }
    }

    fn close(&self) {}
}
