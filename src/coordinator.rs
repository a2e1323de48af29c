//! One fill run: prompt → scan → plan → sanitize → execute.
//!
//! At most one run is active at a time. Failures end the run in
//! [`RunState::Error`] with a short status for the UI; they never take the
//! process or its listeners down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};

use crate::planner::{PlanResult, PlanSource};
use crate::protocol::{Command, ScanResult};
use crate::sanitize::sanitize_with_report;
use crate::wire::{self, WireError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    AwaitingPrompt,
    Scanning,
    Planning,
    Sanitizing,
    Executing,
    Done,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Executed { actions: usize },
    NothingToFill,
    Cancelled,
    Failed(String),
    /// Another run was active; this activation was ignored.
    Busy,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("prompt timeout")]
    PromptTimeout,
    #[error("scan timeout")]
    ScanTimeout,
    /// Same wording as a timeout; logged separately.
    #[error("scan timeout")]
    EmptyScan,
    #[error("scan listener is gone")]
    ScanChannelClosed,
    #[error("could not reach the browser host: {0}")]
    HostUnreachable(#[source] WireError),
    #[error("planning failed: {0}")]
    Planning(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// The user-facing collaborator: collects the instruction and shows progress.
#[async_trait]
pub trait PromptUi: Send + Sync {
    /// `None` means the user dismissed the prompt.
    async fn request_prompt(&self) -> Option<String>;
    fn show_status(&self, state: &RunState, message: &str);
    fn close(&self);
}

/// Channel to the host relay.
#[async_trait]
pub trait HostLink: Send + Sync {
    async fn send(&self, command: &Command) -> Result<(), WireError>;
}

/// Sends each command over a fresh loopback connection.
pub struct TcpHostLink {
    addr: SocketAddr,
}

impl TcpHostLink {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

#[async_trait]
impl HostLink for TcpHostLink {
    async fn send(&self, command: &Command) -> Result<(), WireError> {
        wire::send_document(self.addr, command).await
    }
}

/// Single-run guard. Released when the permit drops.
#[derive(Debug, Clone, Default)]
pub struct RunGuard {
    active: Arc<AtomicBool>,
}

#[derive(Debug)]
pub struct RunPermit {
    active: Arc<AtomicBool>,
}

impl RunGuard {
    pub fn try_acquire(&self) -> Option<RunPermit> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunPermit {
                active: Arc::clone(&self.active),
            })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Timings {
    pub prompt_timeout: Duration,
    pub scan_timeout: Duration,
    pub error_grace: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            prompt_timeout: Duration::from_secs(300),
            scan_timeout: Duration::from_secs(30),
            error_grace: Duration::from_secs(3),
        }
    }
}

pub struct Coordinator {
    ui: Arc<dyn PromptUi>,
    host: Arc<dyn HostLink>,
    planner: Arc<dyn PlanSource>,
    scans: Mutex<mpsc::Receiver<ScanResult>>,
    guard: RunGuard,
    timings: Timings,
}

impl Coordinator {
    pub fn new(
        ui: Arc<dyn PromptUi>,
        host: Arc<dyn HostLink>,
        planner: Arc<dyn PlanSource>,
        scans: mpsc::Receiver<ScanResult>,
        timings: Timings,
    ) -> Self {
        Self {
            ui,
            host,
            planner,
            scans: Mutex::new(scans),
            guard: RunGuard::default(),
            timings,
        }
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_active()
    }

    /// Start a run. A prompt given here skips asking the UI for one.
    pub async fn activate(self: &Arc<Self>, prompt: Option<String>) -> RunOutcome {
        let Some(_permit) = self.guard.try_acquire() else {
            tracing::info!("a run is already in progress, ignoring activation");
            return RunOutcome::Busy;
        };

        // panics inside collaborators surface as a JoinError here
        let this = Arc::clone(self);
        let result = match tokio::spawn(async move { this.run(prompt).await }).await {
            Ok(result) => result,
            Err(e) => Err(RunError::Internal(e.to_string())),
        };

        let outcome = match result {
            Ok(outcome) => {
                self.transition(RunState::Done, done_message(&outcome));
                outcome
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::error!(error = %reason, "run failed");
                self.transition(RunState::Error(reason.clone()), &reason);
                tokio::time::sleep(self.timings.error_grace).await;
                RunOutcome::Failed(reason)
            }
        };

        self.ui.close();
        self.transition(RunState::Idle, "");
        outcome
    }

    async fn run(&self, prompt: Option<String>) -> Result<RunOutcome, RunError> {
        let instruction = match prompt {
            Some(p) => p,
            None => {
                self.transition(RunState::AwaitingPrompt, "What would you like to do?");
                match tokio::time::timeout(self.timings.prompt_timeout, self.ui.request_prompt())
                    .await
                {
                    Err(_) => return Err(RunError::PromptTimeout),
                    Ok(None) => return Ok(RunOutcome::Cancelled),
                    Ok(Some(p)) => p,
                }
            }
        };

        self.transition(RunState::Scanning, "Scanning the page...");
        let fields = self.scan().await?;
        tracing::debug!(
            fields = %serde_json::to_string_pretty(&fields).unwrap_or_default(),
            "scanned fields"
        );

        self.transition(RunState::Planning, "Preparing the answers...");
        let started = Instant::now();
        let raw = match self.planner.generate(&fields, &instruction).await {
            PlanResult::Planned(raw) => raw,
            PlanResult::Empty => Value::Null,
            PlanResult::Failed(reason) => return Err(RunError::Planning(reason)),
        };
        tracing::info!(elapsed = ?started.elapsed(), "planning finished");

        self.transition(RunState::Sanitizing, "Checking the plan...");
        let (plan, report) = sanitize_with_report(&raw);
        tracing::info!(
            accepted = report.accepted,
            malformed = report.malformed,
            duplicates = report.duplicates,
            type_mismatches = report.type_mismatches,
            "sanitized plan"
        );
        if plan.is_empty() {
            return Ok(RunOutcome::NothingToFill);
        }

        let actions = plan.len();
        self.transition(RunState::Executing, "Filling the form...");
        self.host
            .send(&Command::ExecutePlan { payload: plan })
            .await
            .map_err(RunError::HostUnreachable)?;
        Ok(RunOutcome::Executed { actions })
    }

    async fn scan(&self) -> Result<ScanResult, RunError> {
        let mut scans = self.scans.lock().await;
        while let Ok(stale) = scans.try_recv() {
            tracing::debug!(fields = stale.len(), "discarding stale scan result");
        }

        self.host
            .send(&Command::Scan)
            .await
            .map_err(RunError::HostUnreachable)?;

        match tokio::time::timeout(self.timings.scan_timeout, scans.recv()).await {
            Err(_) => Err(RunError::ScanTimeout),
            Ok(None) => Err(RunError::ScanChannelClosed),
            Ok(Some(fields)) if fields.is_empty() => {
                tracing::warn!("scan returned no form fields");
                Err(RunError::EmptyScan)
            }
            Ok(Some(fields)) => Ok(fields),
        }
    }

    fn transition(&self, state: RunState, message: &str) {
        tracing::info!(?state, "run state");
        self.ui.show_status(&state, message);
    }
}

fn done_message(outcome: &RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::Executed { .. } => "Form filled.",
        RunOutcome::NothingToFill => "Nothing to fill on this page.",
        RunOutcome::Cancelled => "Cancelled.",
        RunOutcome::Failed(_) | RunOutcome::Busy => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_admits_one_holder_at_a_time() {
        let guard = RunGuard::default();
        let permit = guard.try_acquire().expect("first acquire");
        assert!(guard.is_active());
        assert!(guard.try_acquire().is_none());
        drop(permit);
        assert!(!guard.is_active());
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn state_serialises_for_the_ui() {
        assert_eq!(
            serde_json::to_value(RunState::Scanning).unwrap(),
            serde_json::json!({"state": "scanning"})
        );
        assert_eq!(
            serde_json::to_value(RunState::Error("scan timeout".into())).unwrap(),
            serde_json::json!({"state": "error", "reason": "scan timeout"})
        );
    }
}
