//! The actor that owns every live session.
//!
//! One task holds the [`Registry`] and applies inbound responses, retry
//! sweeps, and user commands strictly one at a time, in that priority. No two
//! events ever touch the same transfer concurrently, and the registry needs
//! no locks. A command's reply therefore reflects every response that had
//! already arrived when it was issued.

use std::collections::HashMap;

use anyhow::{Context, Result};
use drip_files::FileSource;
use drip_net::{InboundEvent, Transport};
use drip_protocol::types::{PeerId, SessionId, TransferId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::events::TransferEvent;
use crate::notify::ErrorSink;
use crate::registry::Registry;
use crate::session::Session;
use crate::transfer::{Transfer, TransferState, TransferStatus};

enum Command {
    Send {
        files: Vec<FileSource>,
        recipients: Vec<PeerId>,
        reply: oneshot::Sender<Option<SessionId>>,
    },
    CancelSession {
        session_id: SessionId,
        reply: oneshot::Sender<bool>,
    },
    TransferStatus {
        transfer_id: TransferId,
        reply: oneshot::Sender<Option<TransferStatus>>,
    },
    SessionStatus {
        session_id: SessionId,
        reply: oneshot::Sender<Option<Vec<TransferStatus>>>,
    },
    SessionIds {
        reply: oneshot::Sender<Vec<SessionId>>,
    },
    Shutdown,
}

/// Cloneable front door to a running orchestrator.
#[derive(Clone)]
pub struct OrchestratorHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl OrchestratorHandle {
    fn request(&self, command: Command) -> Result<()> {
        self.cmd_tx
            .send(command)
            .map_err(|_| anyhow::anyhow!("orchestrator has stopped"))
    }

    /// Start a session sending every file to every recipient.
    ///
    /// Returns `None` when either list is empty.
    pub async fn send(
        &self,
        files: Vec<FileSource>,
        recipients: Vec<PeerId>,
    ) -> Result<Option<SessionId>> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Send {
            files,
            recipients,
            reply,
        })?;
        rx.await.context("orchestrator dropped the send request")
    }

    /// Cancel a session. Returns `false` if it was unknown or already cancelled.
    pub async fn cancel_session(&self, session_id: SessionId) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::CancelSession { session_id, reply })?;
        rx.await.context("orchestrator dropped the cancel request")
    }

    pub async fn transfer_status(&self, transfer_id: TransferId) -> Result<Option<TransferStatus>> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::TransferStatus { transfer_id, reply })?;
        rx.await.context("orchestrator dropped the status request")
    }

    /// Status of every transfer a live session still holds.
    pub async fn session_status(&self, session_id: SessionId) -> Result<Option<Vec<TransferStatus>>> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::SessionStatus { session_id, reply })?;
        rx.await.context("orchestrator dropped the status request")
    }

    /// Ids of all live sessions.
    pub async fn session_ids(&self) -> Result<Vec<SessionId>> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::SessionIds { reply })?;
        rx.await.context("orchestrator dropped the status request")
    }
}

/// A running orchestrator task.
///
/// Events are buffered without bound until received, one `Progress` per
/// acknowledged chunk included. A caller that does not want them should take
/// the receiver with [`Orchestrator::take_event_receiver`] and drop it; the
/// actor then stops publishing.
pub struct Orchestrator {
    handle: OrchestratorHandle,
    event_rx: Option<mpsc::UnboundedReceiver<TransferEvent>>,
    task: JoinHandle<()>,
}

impl Orchestrator {
    /// Spawn the actor on the current runtime.
    ///
    /// `inbound` carries responses from the transport's peers.
    pub fn spawn<T, S>(
        config: TransferConfig,
        transport: T,
        sink: S,
        inbound: mpsc::UnboundedReceiver<InboundEvent>,
    ) -> Result<Self>
    where
        T: Transport + 'static,
        S: ErrorSink,
    {
        config.validate().context("invalid transfer configuration")?;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let engine = Engine::new(config, transport, sink, event_tx);
        let task = tokio::spawn(engine.run(cmd_rx, inbound));

        Ok(Self {
            handle: OrchestratorHandle { cmd_tx },
            event_rx: Some(event_rx),
            task,
        })
    }

    pub fn handle(&self) -> OrchestratorHandle {
        self.handle.clone()
    }

    /// Take the event receiver out of the orchestrator.
    ///
    /// Returns `None` if the receiver has already been taken. Once taken,
    /// `recv_event()` will pend forever.
    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<TransferEvent>> {
        self.event_rx.take()
    }

    /// Receive the next event.
    pub async fn recv_event(&mut self) -> Option<TransferEvent> {
        match &mut self.event_rx {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Cancel every live session and wait for the actor to exit.
    pub async fn shutdown(self) -> Result<()> {
        tracing::info!("shutting down orchestrator");
        // The actor may already be gone; joining below reports that.
        let _ = self.handle.request(Command::Shutdown);
        self.task.await.context("orchestrator task panicked")
    }
}

/// Actor state. Router and sweeper logic live in their own modules as
/// further `impl` blocks.
pub(crate) struct Engine<T, S> {
    pub(crate) config: TransferConfig,
    pub(crate) transport: T,
    pub(crate) sink: S,
    pub(crate) registry: Registry,
    event_tx: mpsc::UnboundedSender<TransferEvent>,
}

impl<T: Transport, S: ErrorSink> Engine<T, S> {
    pub(crate) fn new(
        config: TransferConfig,
        transport: T,
        sink: S,
        event_tx: mpsc::UnboundedSender<TransferEvent>,
    ) -> Self {
        Self {
            config,
            transport,
            sink,
            registry: Registry::new(),
            event_tx,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut inbound: mpsc::UnboundedReceiver<InboundEvent>,
    ) {
        let period = self.config.retry_interval;
        let mut sweep_interval = tokio::time::interval_at(Instant::now() + period, period);
        sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(?period, "orchestrator started");

        loop {
            tokio::select! {
                biased;

                Some(event) = inbound.recv() => self.route(event).await,

                _ = sweep_interval.tick() => self.sweep(Instant::now()).await,

                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => {
                        self.cancel_all().await;
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                },
            }
            self.finish_sessions();
        }

        self.finish_sessions();
        tracing::debug!("orchestrator stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send {
                files,
                recipients,
                reply,
            } => {
                let session_id = self.create_session(files, recipients).await;
                let _ = reply.send(session_id);
            }
            Command::CancelSession { session_id, reply } => {
                let cancelled = self.cancel_session(session_id).await;
                let _ = reply.send(cancelled);
            }
            Command::TransferStatus { transfer_id, reply } => {
                let _ = reply.send(self.registry.transfer(&transfer_id).map(Transfer::status));
            }
            Command::SessionStatus { session_id, reply } => {
                let status = self
                    .registry
                    .session(&session_id)
                    .map(|s| s.transfers().map(Transfer::status).collect());
                let _ = reply.send(status);
            }
            Command::SessionIds { reply } => {
                let _ = reply.send(self.registry.session_ids());
            }
            Command::Shutdown => {}
        }
    }

    /// Surface a failure to the sink and the log.
    pub(crate) fn report(&self, error: TransferError) {
        tracing::warn!(error = %error, "transfer error");
        self.sink.notify(error.to_string());
    }

    pub(crate) fn emit(&self, event: TransferEvent) {
        if self.event_tx.is_closed() {
            return;
        }
        let _ = self.event_tx.send(event);
    }

    /// Publish a `StateChanged` for every transfer of a session whose state
    /// differs from `before`.
    pub(crate) fn emit_changes(
        &self,
        session_id: &SessionId,
        before: &HashMap<TransferId, TransferState>,
    ) {
        let Some(session) = self.registry.session(session_id) else {
            return;
        };
        for transfer in session.transfers() {
            if before.get(transfer.id()) != Some(&transfer.state()) {
                self.emit(TransferEvent::StateChanged {
                    transfer_id: transfer.id().clone(),
                    state: transfer.state(),
                });
            }
        }
    }

    pub(crate) async fn create_session(
        &mut self,
        files: Vec<FileSource>,
        recipients: Vec<PeerId>,
    ) -> Option<SessionId> {
        let registry = &self.registry;
        let Some(mut session) =
            Session::create_avoiding(&files, &recipients, self.config.chunk_size, |id| {
                registry.contains_transfer(id)
            })
        else {
            tracing::debug!(
                files = files.len(),
                recipients = recipients.len(),
                "nothing to send"
            );
            return None;
        };
        let session_id = session.id();
        let transfer_ids = session.transfer_ids().cloned().collect();

        let mut errors = Vec::new();
        if let Err(e) = session.request_authorization(&self.transport).await {
            // Without the manifest the session can never be authorized.
            errors.push(e);
            errors.extend(session.cancel(&self.transport).await.unwrap_or_default());
        }
        let cancelled = session.is_cancelled();
        let before: HashMap<_, _> = session
            .transfer_ids()
            .map(|id| (id.clone(), TransferState::Pending))
            .collect();
        self.registry.insert(session);

        self.emit(TransferEvent::SessionCreated {
            session_id,
            transfer_ids,
        });
        if cancelled {
            self.emit(TransferEvent::SessionCancelled { session_id });
            self.emit_changes(&session_id, &before);
        }
        for error in errors {
            self.report(error);
        }
        Some(session_id)
    }

    pub(crate) async fn cancel_session(&mut self, session_id: SessionId) -> bool {
        let Some(session) = self.registry.session_mut(&session_id) else {
            tracing::debug!(session_id = %session_id, "cancel for unknown session");
            return false;
        };
        let before = session.states();
        let Some(errors) = session.cancel(&self.transport).await else {
            return false;
        };
        self.emit(TransferEvent::SessionCancelled { session_id });
        self.emit_changes(&session_id, &before);
        for error in errors {
            self.report(error);
        }
        true
    }

    async fn cancel_all(&mut self) {
        for session_id in self.registry.session_ids() {
            self.cancel_session(session_id).await;
        }
    }

    /// Drop sessions whose transfers are all terminal.
    pub(crate) fn finish_sessions(&mut self) {
        let finished: Vec<SessionId> = self
            .registry
            .sessions()
            .filter(|s| s.is_finished())
            .map(Session::id)
            .collect();
        for session_id in finished {
            let Some(session) = self.registry.remove_session(&session_id) else {
                continue;
            };
            let summary = session.summary();
            tracing::info!(
                session_id = %session_id,
                completed = summary.completed,
                cancelled = summary.cancelled,
                failed = summary.failed,
                "session finished"
            );
            self.emit(TransferEvent::SessionFinished {
                session_id,
                summary,
            });
        }
    }
}
