//! Orchestrator side of the result channel: accepts connections from the
//! host relay, each carrying one scan result as a bare JSON array.

use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::protocol::ScanResult;
use crate::wire::{self, WireError};

pub struct ScanListener {
    listener: TcpListener,
}

impl ScanListener {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = wire::bind_reusable(addr)?;
        tracing::info!(addr = %listener.local_addr()?, "listening for scan results");
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Wait for the first connection that carries a valid scan result.
    /// Failed accepts and undecodable payloads are logged and skipped.
    pub async fn accept_once(&self) -> ScanResult {
        loop {
            let (mut stream, peer) = wire::accept_with_backoff(|| self.listener.accept()).await;
            match receive(&mut stream).await {
                Ok(fields) => {
                    tracing::info!(%peer, fields = fields.len(), "received scan result");
                    return fields;
                }
                Err(e) => tracing::warn!(%peer, error = %e, "dropping scan connection"),
            }
        }
    }

    /// Publish every scan result until the receiving side goes away.
    pub async fn serve(self, tx: mpsc::Sender<ScanResult>) {
        loop {
            let fields = self.accept_once().await;
            if tx.send(fields).await.is_err() {
                tracing::info!("scan receiver dropped, listener stopping");
                return;
            }
        }
    }
}

async fn receive(stream: &mut TcpStream) -> Result<ScanResult, WireError> {
    let body = wire::read_document(stream).await?;
    wire::decode::<ScanResult>(&body).map_err(|e| {
        tracing::warn!(raw = %String::from_utf8_lossy(&body), "malformed scan result");
        e.into()
    })
}
