//! Simulation network controller.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use drip_protocol::transfer::ResponseKind;
use drip_protocol::types::PeerId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::transport::{InboundEvent, TransportMetrics};

use super::peer::SimPeer;
use super::transport::SimTransport;

/// Per-peer overrides of the default link conditions.
#[derive(Debug, Clone, Default)]
struct LinkConfig {
    latency: Option<Duration>,
    loss_rate: Option<f64>,
}

/// Shared interior of the simulation network.
pub(crate) struct SimNetworkInner {
    /// Frame queues of the simulated remote peers.
    peers: RwLock<HashMap<PeerId, mpsc::UnboundedSender<Bytes>>>,
    /// Per-peer link overrides, applied in both directions.
    link_configs: RwLock<HashMap<PeerId, LinkConfig>>,
    /// Default one-way latency.
    default_latency: RwLock<Duration>,
    /// Default message loss rate (0.0–1.0).
    default_loss_rate: RwLock<f64>,
    /// Peers whose traffic is silently dropped.
    disconnected: RwLock<HashSet<PeerId>>,
    /// Peers for which send calls return an error.
    failing: RwLock<HashSet<PeerId>>,
    /// Responses travelling back to the local node.
    inbound_tx: mpsc::UnboundedSender<InboundEvent>,
    /// Seeded RNG for deterministic loss.
    rng: Mutex<StdRng>,
}

impl SimNetworkInner {
    /// Route an encoded frame from the local node to `to`, applying failure,
    /// disconnection, loss, and latency.
    pub(crate) async fn route_to_peer(
        &self,
        to: &PeerId,
        frame: Bytes,
        sender_metrics: &TransportMetrics,
    ) -> Result<()> {
        if self.failing.read().await.contains(to) {
            sender_metrics.record_failure();
            anyhow::bail!("simulated send failure to peer {to}");
        }

        let tx = {
            let peers = self.peers.read().await;
            peers
                .get(to)
                .with_context(|| format!("no route to peer {to}"))?
                .clone()
        };

        if !self.should_deliver(to).await {
            sender_metrics.record_dropped();
            tracing::trace!(peer_id = %to, "frame dropped");
            return Ok(());
        }

        sender_metrics.record_sent(frame.len());
        let latency = self.effective_latency(to).await;
        Self::schedule(latency, move || {
            let _ = tx.send(frame);
        });
        Ok(())
    }

    /// Route a response from the remote peer `from` back to the local node.
    pub(crate) async fn route_to_local(
        &self,
        from: &PeerId,
        kind: ResponseKind,
        payload: Bytes,
        peer_metrics: &TransportMetrics,
    ) -> Result<()> {
        if !self.should_deliver(from).await {
            peer_metrics.record_dropped();
            tracing::trace!(from = %from, "response dropped");
            return Ok(());
        }

        peer_metrics.record_sent(payload.len());
        let latency = self.effective_latency(from).await;
        let tx = self.inbound_tx.clone();
        Self::schedule(latency, move || {
            let _ = tx.send(InboundEvent { kind, payload });
        });
        Ok(())
    }

    fn schedule(delay: Duration, deliver: impl FnOnce() + Send + 'static) {
        if delay > Duration::ZERO {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                deliver();
            });
        } else {
            deliver();
        }
    }

    /// Decide whether a message on the link to `peer` survives.
    async fn should_deliver(&self, peer: &PeerId) -> bool {
        if self.disconnected.read().await.contains(peer) {
            return false;
        }
        let loss_rate = {
            let configs = self.link_configs.read().await;
            configs
                .get(peer)
                .and_then(|c| c.loss_rate)
                .unwrap_or(*self.default_loss_rate.read().await)
        };
        if loss_rate > 0.0 {
            let mut rng = self.rng.lock().await;
            !rng.random_bool(loss_rate.clamp(0.0, 1.0))
        } else {
            true
        }
    }

    async fn effective_latency(&self, peer: &PeerId) -> Duration {
        let configs = self.link_configs.read().await;
        configs
            .get(peer)
            .and_then(|c| c.latency)
            .unwrap_or(*self.default_latency.read().await)
    }
}

/// Simulation network controller.
///
/// Models one local (sending) node and any number of remote peers. Frames
/// sent through [`SimTransport`] land in the matching [`SimPeer`]'s queue;
/// responses from peers arrive on the inbound receiver returned by
/// [`SimNetwork::new`].
pub struct SimNetwork {
    inner: Arc<SimNetworkInner>,
}

impl SimNetwork {
    /// Create a new simulation network with default seed (42).
    pub fn new() -> (Self, mpsc::UnboundedReceiver<InboundEvent>) {
        Self::with_seed(42)
    }

    /// Create a new simulation network with a specific RNG seed.
    pub fn with_seed(seed: u64) -> (Self, mpsc::UnboundedReceiver<InboundEvent>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        tracing::info!(seed, "created sim network");
        let network = Self {
            inner: Arc::new(SimNetworkInner {
                peers: RwLock::new(HashMap::new()),
                link_configs: RwLock::new(HashMap::new()),
                default_latency: RwLock::new(Duration::ZERO),
                default_loss_rate: RwLock::new(0.0),
                disconnected: RwLock::new(HashSet::new()),
                failing: RwLock::new(HashSet::new()),
                inbound_tx,
                rng: Mutex::new(StdRng::seed_from_u64(seed)),
            }),
        };
        (network, inbound_rx)
    }

    /// Register a remote peer and return its simulated endpoint.
    pub async fn add_peer(&self, id: PeerId) -> SimPeer {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.peers.write().await.insert(id.clone(), tx);
        tracing::info!(peer_id = %id, "created sim peer");
        SimPeer::new(id, self.inner.clone(), rx)
    }

    /// Create a transport for the local node.
    pub fn transport(&self) -> SimTransport {
        SimTransport::new(self.inner.clone())
    }

    /// Set the default one-way latency for all links.
    pub async fn set_latency(&self, duration: Duration) {
        *self.inner.default_latency.write().await = duration;
        tracing::debug!(?duration, "set default latency");
    }

    /// Set latency for the link to a specific peer (both directions).
    pub async fn set_latency_for(&self, peer: &PeerId, duration: Duration) {
        let mut configs = self.inner.link_configs.write().await;
        configs.entry(peer.clone()).or_default().latency = Some(duration);
        tracing::debug!(peer_id = %peer, ?duration, "set link latency");
    }

    /// Set the default message loss rate for all links (0.0–1.0).
    pub async fn set_loss_rate(&self, rate: f64) {
        *self.inner.default_loss_rate.write().await = rate;
        tracing::debug!(rate, "set default loss rate");
    }

    /// Set loss rate for the link to a specific peer (both directions).
    pub async fn set_loss_rate_for(&self, peer: &PeerId, rate: f64) {
        let mut configs = self.inner.link_configs.write().await;
        configs.entry(peer.clone()).or_default().loss_rate = Some(rate);
        tracing::debug!(peer_id = %peer, rate, "set link loss rate");
    }

    /// Simulate a peer going offline (all messages to/from are dropped).
    pub async fn disconnect(&self, peer: &PeerId) {
        self.inner.disconnected.write().await.insert(peer.clone());
        tracing::info!(peer_id = %peer, "sim peer disconnected");
    }

    /// Simulate a peer coming back online.
    pub async fn reconnect(&self, peer: &PeerId) {
        self.inner.disconnected.write().await.remove(peer);
        tracing::info!(peer_id = %peer, "sim peer reconnected");
    }

    /// Make every send call addressed to `peer` return an error.
    pub async fn fail_sends_to(&self, peer: &PeerId) {
        self.inner.failing.write().await.insert(peer.clone());
        tracing::info!(peer_id = %peer, "sim sends failing");
    }

    /// Undo [`fail_sends_to`](Self::fail_sends_to).
    pub async fn restore_sends_to(&self, peer: &PeerId) {
        self.inner.failing.write().await.remove(peer);
        tracing::info!(peer_id = %peer, "sim sends restored");
    }

    /// Advance simulated time.
    ///
    /// When used with `tokio::time::pause()`, this advances the simulated clock,
    /// causing pending `sleep` futures (used for latency simulation) to resolve.
    pub async fn advance(&self, duration: Duration) {
        tokio::time::advance(duration).await;
    }
}
