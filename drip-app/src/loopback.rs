//! In-process send: the orchestrator talks to simulated recipients, each
//! served by a [`Downloader`] writing into its own directory.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use drip_files::{Downloader, FileSource};
use drip_net::sim::{SimNetwork, SimPeer};
use drip_protocol::transfer::Manifest;
use drip_protocol::types::{PeerId, SessionId};
use drip_transfer::{Orchestrator, SessionSummary, TransferConfig, TransferEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How a loopback send is wired up.
#[derive(Debug, Clone)]
pub struct LoopbackOptions {
    pub peers: Vec<PeerId>,
    /// Peers whose downloader declines every manifest.
    pub rejecting: Vec<PeerId>,
    /// Message loss applied once streaming has started.
    pub loss_rate: f64,
    pub latency: Duration,
    /// Each peer writes into `download_dir/<peer>`.
    pub download_dir: PathBuf,
    pub config: TransferConfig,
}

/// Outcome of a loopback send.
#[derive(Debug, Clone)]
pub struct LoopbackReport {
    pub session_id: SessionId,
    pub summary: SessionSummary,
    pub errors: Vec<String>,
}

impl LoopbackReport {
    pub fn all_completed(&self) -> bool {
        self.summary.cancelled == 0 && self.summary.failed == 0 && self.errors.is_empty()
    }
}

/// Answer every frame addressed to `peer` with the downloader's response.
pub fn serve(mut peer: SimPeer, mut downloader: Downloader) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = peer.recv().await {
            let kind = message.label();
            match downloader.handle(message).await {
                Ok(Some((response_kind, payload))) => {
                    if let Err(e) = peer.respond(response_kind, &payload).await {
                        tracing::warn!(peer_id = %peer.id(), error = %e, "failed to respond");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(peer_id = %peer.id(), kind, error = %e, "downloader error");
                }
            }
        }
    })
}

/// Send `files` to every peer in `options` and wait for the session to end.
///
/// Returns `Ok(None)` when there was nothing to send.
pub async fn run(files: Vec<FileSource>, options: LoopbackOptions) -> Result<Option<LoopbackReport>> {
    let (net, inbound) = SimNetwork::new();
    net.set_latency(options.latency).await;

    let mut servers = Vec::with_capacity(options.peers.len());
    for peer_id in &options.peers {
        let dir = options.download_dir.join(peer_id.as_str());
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create download dir: {}", dir.display()))?;
        let downloader = if options.rejecting.contains(peer_id) {
            Downloader::with_policy(peer_id.clone(), dir, Box::new(|_: &Manifest| false))
        } else {
            Downloader::new(peer_id.clone(), dir)
        };
        let peer = net.add_peer(peer_id.clone()).await;
        servers.push(serve(peer, downloader));
    }

    let (error_tx, mut error_rx) = mpsc::unbounded_channel();
    let mut orchestrator = Orchestrator::spawn(options.config, net.transport(), error_tx, inbound)?;

    let Some(session_id) = orchestrator
        .handle()
        .send(files, options.peers.clone())
        .await?
    else {
        orchestrator.shutdown().await?;
        return Ok(None);
    };
    tracing::info!(session_id = %session_id, peers = options.peers.len(), "loopback send started");

    let summary = loop {
        let event = orchestrator
            .recv_event()
            .await
            .context("orchestrator stopped before the session finished")?;
        match event {
            TransferEvent::SessionAuthorized { .. } if options.loss_rate > 0.0 => {
                // Authorization is never retried, so loss starts with streaming.
                net.set_loss_rate(options.loss_rate).await;
            }
            TransferEvent::Progress {
                transfer_id,
                amount_sent,
                size,
            } => {
                tracing::debug!(transfer_id = %transfer_id, amount_sent, size, "progress");
            }
            TransferEvent::SessionFinished { summary, .. } => break summary,
            _ => {}
        }
    };

    for server in servers {
        server.abort();
    }
    orchestrator.shutdown().await?;

    let mut errors = Vec::new();
    while let Ok(e) = error_rx.try_recv() {
        errors.push(e);
    }
    Ok(Some(LoopbackReport {
        session_id,
        summary,
        errors,
    }))
}
