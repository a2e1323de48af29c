//! Native-messaging host relay.
//!
//! Three tasks joined by channels:
//! - the browser reader decodes length-prefixed frames from stdin;
//! - the command listener accepts orchestrator connections one at a time;
//! - the relay loop forwards scan results to the orchestrator and writes
//!   browser commands to stdout.
//!
//! The relay ends when the browser closes stdin. The command listener is
//! left running and goes away with the process.

use std::io;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::protocol::{BrowserCommand, Command, ExtensionMessage};
use crate::wire;

const CHANNEL_DEPTH: usize = 16;

/// Relay with its command port already bound.
pub struct HostRelay {
    commands: TcpListener,
    orchestrator: SocketAddr,
}

impl HostRelay {
    pub fn bind(command_addr: SocketAddr, orchestrator: SocketAddr) -> io::Result<Self> {
        let commands = wire::bind_reusable(command_addr)?;
        tracing::info!(addr = %commands.local_addr()?, "listening for orchestrator commands");
        Ok(Self {
            commands,
            orchestrator,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.commands.local_addr()
    }

    pub async fn run<R, W>(self, stdin: R, stdout: W) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin,
    {
        let (browser_tx, browser_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (command_tx, command_rx) = mpsc::channel(CHANNEL_DEPTH);

        tokio::spawn(read_browser_messages(stdin, browser_tx));
        tokio::spawn(serve_commands(self.commands, command_tx));

        run_relay(browser_rx, command_rx, stdout, self.orchestrator).await
    }
}

/// Decode frames from the browser until it closes the pipe.
pub async fn read_browser_messages<R>(mut reader: R, tx: mpsc::Sender<ExtensionMessage>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let body = match wire::read_frame(&mut reader).await {
            Ok(Some(body)) => body,
            Ok(None) => {
                tracing::info!("browser closed the native-messaging pipe");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "native-messaging stream broken");
                return;
            }
        };
        match wire::decode::<ExtensionMessage>(&body) {
            Ok(message) => {
                if tx.send(message).await.is_err() {
                    return;
                }
            }
            Err(e) => tracing::warn!(
                error = %e,
                raw = %String::from_utf8_lossy(&body),
                "malformed message from extension"
            ),
        }
    }
}

/// Accept orchestrator connections serially and publish decoded commands.
pub async fn serve_commands(listener: TcpListener, tx: mpsc::Sender<Command>) {
    loop {
        let (mut stream, peer) = wire::accept_with_backoff(|| listener.accept()).await;
        let body = match wire::read_document(&mut stream).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "failed to read command");
                continue;
            }
        };
        match wire::decode::<Command>(&body) {
            Ok(command) => {
                tracing::info!(%peer, ?command, "received command");
                if tx.send(command).await.is_err() {
                    return;
                }
            }
            Err(e) => tracing::warn!(
                %peer,
                error = %e,
                raw = %String::from_utf8_lossy(&body),
                "malformed command"
            ),
        }
    }
}

pub async fn run_relay<W>(
    mut browser_rx: mpsc::Receiver<ExtensionMessage>,
    mut command_rx: mpsc::Receiver<Command>,
    mut stdout: W,
    orchestrator: SocketAddr,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            message = browser_rx.recv() => match message {
                Some(message) => forward_to_orchestrator(message, orchestrator).await,
                None => break,
            },
            Some(command) = command_rx.recv() => {
                let outbound = BrowserCommand::from(command);
                wire::write_frame(&mut stdout, &outbound)
                    .await
                    .context("failed to write to the browser")?;
                tracing::info!(command = ?outbound, "sent command to extension");
            }
        }
    }
    tracing::info!("relay stopped");
    Ok(())
}

async fn forward_to_orchestrator(message: ExtensionMessage, orchestrator: SocketAddr) {
    if !message.is_scan_result() {
        tracing::debug!(action = %message.action, "ignoring extension message");
        return;
    }
    let Some(data) = &message.data else {
        tracing::warn!("scan result without data, nothing to forward");
        return;
    };
    let fields = message.field_count().unwrap_or(0);
    match wire::send_document(orchestrator, data).await {
        Ok(()) => tracing::info!(fields, "forwarded scan result to orchestrator"),
        Err(e) if e.is_connection_refused() => {
            tracing::warn!(%orchestrator, "orchestrator is not listening, scan result dropped")
        }
        Err(e) => tracing::warn!(error = %e, "failed to forward scan result"),
    }
}
