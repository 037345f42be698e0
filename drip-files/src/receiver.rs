//! Receiving side of the transfer protocol.
//!
//! A [`Downloader`] consumes the messages a sender puts on the wire and
//! produces the responses the sender's router expects: an authorization
//! decision per manifest, and one ack per info or chunk message. Files are
//! written into the download directory at the offsets the chunks carry.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use drip_protocol::transfer::{
    ChunkMessage, InfoMessage, Manifest, ResponseKind, ResponsePayload, SessionCancel,
    TransferMessage,
};
use drip_protocol::types::{PeerId, SessionId, TransferId};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

/// Decides whether an incoming batch is accepted.
pub type AuthorizePolicy = Box<dyn Fn(&Manifest) -> bool + Send + Sync>;

/// State of one file being received.
#[derive(Debug)]
struct IncomingFile {
    session_id: Option<SessionId>,
    path: PathBuf,
    size: u64,
    amount_received: u64,
    /// Open while data is still expected.
    file: Option<tokio::fs::File>,
}

impl IncomingFile {
    fn is_complete(&self) -> bool {
        self.amount_received >= self.size
    }
}

/// Receives files for one local peer.
pub struct Downloader {
    peer_id: PeerId,
    download_dir: PathBuf,
    authorize: AuthorizePolicy,
    /// Transfers announced by accepted manifests, keyed by session.
    sessions: HashMap<SessionId, Vec<TransferId>>,
    incoming: HashMap<TransferId, IncomingFile>,
}

impl Downloader {
    /// Create a downloader that accepts every batch.
    pub fn new(peer_id: PeerId, download_dir: PathBuf) -> Self {
        Self::with_policy(peer_id, download_dir, Box::new(|_: &Manifest| true))
    }

    /// Create a downloader with a custom authorization policy.
    pub fn with_policy(peer_id: PeerId, download_dir: PathBuf, authorize: AuthorizePolicy) -> Self {
        Self {
            peer_id,
            download_dir,
            authorize,
            sessions: HashMap::new(),
            incoming: HashMap::new(),
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Bytes received so far and total size, if the transfer is known.
    pub fn progress(&self, transfer_id: &TransferId) -> Option<(u64, u64)> {
        self.incoming
            .get(transfer_id)
            .map(|f| (f.amount_received, f.size))
    }

    /// Whether every byte of the transfer has been written.
    pub fn is_complete(&self, transfer_id: &TransferId) -> bool {
        self.incoming
            .get(transfer_id)
            .is_some_and(IncomingFile::is_complete)
    }

    /// Path the transfer is written to, if known.
    pub fn file_path(&self, transfer_id: &TransferId) -> Option<&Path> {
        self.incoming.get(transfer_id).map(|f| f.path.as_path())
    }

    /// Handle one message and return the response to send back, if any.
    pub async fn handle(
        &mut self,
        message: TransferMessage,
    ) -> Result<Option<(ResponseKind, ResponsePayload)>> {
        let response = match message {
            TransferMessage::Authorize(manifest) => {
                Some((ResponseKind::Authorization, self.handle_manifest(manifest)))
            }
            TransferMessage::Info(info) => {
                Some((ResponseKind::Transfer, self.handle_info(info).await?))
            }
            TransferMessage::Chunk(chunk) => self
                .handle_chunk(chunk)
                .await?
                .map(|r| (ResponseKind::Transfer, r)),
            TransferMessage::Cancel(signal) => Some((
                ResponseKind::Transfer,
                self.handle_cancel(signal.transfer_id).await,
            )),
            TransferMessage::SessionCancel(cancel) => {
                self.handle_session_cancel(cancel).await;
                None
            }
        };
        Ok(response)
    }

    fn handle_manifest(&mut self, manifest: Manifest) -> ResponsePayload {
        let accepted = (self.authorize)(&manifest);
        tracing::info!(
            peer_id = %self.peer_id,
            session_id = %manifest.session_id,
            transfers = manifest.transfers.len(),
            accepted,
            "authorization requested"
        );
        if accepted {
            let ids = manifest
                .entries_for(&self.peer_id)
                .map(|e| e.transfer_id.clone())
                .collect();
            self.sessions.insert(manifest.session_id, ids);
        }
        ResponsePayload::authorization(manifest.session_id, self.peer_id.clone(), accepted)
    }

    async fn handle_info(&mut self, info: InfoMessage) -> Result<ResponsePayload> {
        let ack = ResponsePayload::ack(info.transfer_id.clone(), self.peer_id.clone(), 0, 0);
        if self.incoming.contains_key(&info.transfer_id) {
            tracing::debug!(transfer_id = %info.transfer_id, "repeated info, re-acking");
            return Ok(ack);
        }

        let path = self.target_path(&info)?;
        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .with_context(|| {
                format!(
                    "failed to create download directory: {}",
                    self.download_dir.display()
                )
            })?;
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to create file: {}", path.display()))?;
        file.set_len(info.size)
            .await
            .with_context(|| format!("failed to size file: {}", path.display()))?;

        let session_id = self
            .sessions
            .iter()
            .find(|(_, ids)| ids.contains(&info.transfer_id))
            .map(|(id, _)| *id);

        tracing::info!(
            peer_id = %self.peer_id,
            transfer_id = %info.transfer_id,
            file_name = %info.name,
            file_size = info.size,
            "receiving file"
        );

        let incoming = IncomingFile {
            session_id,
            path,
            size: info.size,
            amount_received: 0,
            file: (info.size > 0).then_some(file),
        };
        self.incoming.insert(info.transfer_id, incoming);
        Ok(ack)
    }

    async fn handle_chunk(&mut self, chunk: ChunkMessage) -> Result<Option<ResponsePayload>> {
        let Some(state) = self.incoming.get_mut(&chunk.transfer_id) else {
            tracing::debug!(transfer_id = %chunk.transfer_id, "chunk for unknown transfer");
            return Ok(Some(ResponsePayload::cancelled(
                chunk.transfer_id,
                self.peer_id.clone(),
            )));
        };

        let len = chunk.data.len() as u64;
        let Some(end) = chunk.offset.checked_add(len) else {
            anyhow::bail!(
                "chunk for {} at offset {} overflows the file size",
                chunk.transfer_id,
                chunk.offset
            );
        };
        let ack = ResponsePayload::ack(
            chunk.transfer_id.clone(),
            self.peer_id.clone(),
            chunk.offset,
            len,
        );

        if end > state.size {
            anyhow::bail!(
                "chunk for {} ends at {end}, past file size {}",
                chunk.transfer_id,
                state.size
            );
        }

        // Already have it: the previous ack was lost.
        if state.amount_received >= end {
            tracing::debug!(
                transfer_id = %chunk.transfer_id,
                offset = chunk.offset,
                "duplicate chunk, re-acking"
            );
            return Ok(Some(ack));
        }

        if chunk.offset > state.amount_received {
            tracing::warn!(
                transfer_id = %chunk.transfer_id,
                offset = chunk.offset,
                amount_received = state.amount_received,
                "chunk leaves a gap, ignoring"
            );
            return Ok(None);
        }

        let file = state
            .file
            .as_mut()
            .context("file already closed for incomplete transfer")?;
        file.seek(SeekFrom::Start(chunk.offset)).await?;
        file.write_all(&chunk.data).await?;
        state.amount_received = end;

        tracing::debug!(
            transfer_id = %chunk.transfer_id,
            offset = chunk.offset,
            chunk_size = len,
            "received chunk"
        );

        if state.is_complete() {
            if let Some(mut file) = state.file.take() {
                file.flush().await?;
            }
            tracing::info!(
                peer_id = %self.peer_id,
                transfer_id = %chunk.transfer_id,
                path = %state.path.display(),
                "file receive complete"
            );
        }

        Ok(Some(ack))
    }

    async fn handle_cancel(&mut self, transfer_id: TransferId) -> ResponsePayload {
        if let Some(state) = self.incoming.remove(&transfer_id) {
            Self::discard(&transfer_id, state).await;
        }
        for ids in self.sessions.values_mut() {
            ids.retain(|id| id != &transfer_id);
        }
        ResponsePayload::cancelled(transfer_id, self.peer_id.clone())
    }

    async fn handle_session_cancel(&mut self, cancel: SessionCancel) {
        tracing::info!(
            peer_id = %self.peer_id,
            session_id = %cancel.session_id,
            "session cancelled by sender"
        );
        self.sessions.remove(&cancel.session_id);
        let cancelled: Vec<TransferId> = self
            .incoming
            .iter()
            .filter(|(_, f)| f.session_id == Some(cancel.session_id))
            .map(|(id, _)| id.clone())
            .collect();
        for id in cancelled {
            if let Some(state) = self.incoming.remove(&id) {
                Self::discard(&id, state).await;
            }
        }
    }

    /// Delete a partially received file. Completed files are kept.
    async fn discard(transfer_id: &TransferId, state: IncomingFile) {
        if state.is_complete() {
            return;
        }
        drop(state.file);
        match tokio::fs::remove_file(&state.path).await {
            Ok(()) => {
                tracing::info!(transfer_id = %transfer_id, "partial file removed");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    transfer_id = %transfer_id,
                    path = %state.path.display(),
                    error = %e,
                    "failed to remove partial file"
                );
            }
        }
    }

    /// Place the file in the download directory, ignoring any path
    /// components in the announced name.
    fn target_path(&self, info: &InfoMessage) -> Result<PathBuf> {
        let name = Path::new(&info.name)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .filter(|n| !n.is_empty())
            .with_context(|| format!("invalid file name: {:?}", info.name))?;
        let path = self.download_dir.join(&name);
        let in_use = self.incoming.values().any(|f| f.path == path);
        if in_use {
            return Ok(self.download_dir.join(info.transfer_id.as_str()));
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drip_protocol::transfer::{CancelSignal, ManifestEntry};
    use tempfile::TempDir;

    fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "debug".into()),
            )
            .with_test_writer()
            .try_init();
    }

    fn me() -> PeerId {
        PeerId::from("me")
    }

    fn info(id: &str, name: &str, size: u64) -> TransferMessage {
        TransferMessage::Info(InfoMessage {
            transfer_id: TransferId::from(id),
            recipient: me(),
            name: name.to_string(),
            size,
        })
    }

    fn chunk(id: &str, offset: u64, data: &[u8]) -> TransferMessage {
        TransferMessage::Chunk(ChunkMessage {
            transfer_id: TransferId::from(id),
            recipient: me(),
            offset,
            data: data.to_vec(),
        })
    }

    fn manifest(session: u8, id: &str) -> Manifest {
        Manifest {
            session_id: SessionId([session; 16]),
            recipients: vec![me()],
            transfers: vec![ManifestEntry {
                transfer_id: TransferId::from(id),
                recipient: me(),
                size: 6,
            }],
        }
    }

    async fn ack_of(d: &mut Downloader, m: TransferMessage) -> ResponsePayload {
        let (kind, payload) = d.handle(m).await.unwrap().expect("expected a response");
        assert_eq!(kind, ResponseKind::Transfer);
        payload
    }

    #[tokio::test]
    async fn receives_file_in_order() {
        init_test_tracing();
        let tmp = TempDir::new().unwrap();
        let mut d = Downloader::new(me(), tmp.path().to_path_buf());
        let id = TransferId::from("a-1.txt");

        let ack = ack_of(&mut d, info("a-1.txt", "a.txt", 6)).await;
        assert_eq!((ack.offset, ack.amount_received), (0, 0));

        let ack = ack_of(&mut d, chunk("a-1.txt", 0, b"abc")).await;
        assert_eq!((ack.offset, ack.amount_received), (0, 3));
        assert!(!d.is_complete(&id));

        let ack = ack_of(&mut d, chunk("a-1.txt", 3, b"def")).await;
        assert_eq!((ack.offset, ack.amount_received), (3, 3));
        assert!(d.is_complete(&id));

        let written = tokio::fs::read(tmp.path().join("a.txt")).await.unwrap();
        assert_eq!(written, b"abcdef");
    }

    #[tokio::test]
    async fn duplicate_chunk_is_reacked_without_rewrite() {
        init_test_tracing();
        let tmp = TempDir::new().unwrap();
        let mut d = Downloader::new(me(), tmp.path().to_path_buf());
        let id = TransferId::from("a-1.txt");

        ack_of(&mut d, info("a-1.txt", "a.txt", 6)).await;
        ack_of(&mut d, chunk("a-1.txt", 0, b"abc")).await;
        let again = ack_of(&mut d, chunk("a-1.txt", 0, b"abc")).await;
        assert_eq!((again.offset, again.amount_received), (0, 3));
        assert_eq!(d.progress(&id), Some((3, 6)));
    }

    #[tokio::test]
    async fn repeated_info_is_reacked() {
        init_test_tracing();
        let tmp = TempDir::new().unwrap();
        let mut d = Downloader::new(me(), tmp.path().to_path_buf());

        ack_of(&mut d, info("a-1.txt", "a.txt", 6)).await;
        ack_of(&mut d, chunk("a-1.txt", 0, b"abc")).await;
        ack_of(&mut d, info("a-1.txt", "a.txt", 6)).await;
        assert_eq!(d.progress(&TransferId::from("a-1.txt")), Some((3, 6)));
    }

    #[tokio::test]
    async fn chunk_for_unknown_transfer_reports_cancelled() {
        init_test_tracing();
        let tmp = TempDir::new().unwrap();
        let mut d = Downloader::new(me(), tmp.path().to_path_buf());

        let resp = ack_of(&mut d, chunk("ghost.bin", 0, b"x")).await;
        assert!(resp.cancelled);
    }

    #[tokio::test]
    async fn chunk_past_file_size_is_an_error() {
        init_test_tracing();
        let tmp = TempDir::new().unwrap();
        let mut d = Downloader::new(me(), tmp.path().to_path_buf());

        ack_of(&mut d, info("a-1.txt", "a.txt", 2)).await;
        assert!(d.handle(chunk("a-1.txt", 0, b"abc")).await.is_err());
    }

    #[tokio::test]
    async fn chunk_offset_near_u64_max_is_an_error() {
        init_test_tracing();
        let tmp = TempDir::new().unwrap();
        let mut d = Downloader::new(me(), tmp.path().to_path_buf());

        ack_of(&mut d, info("a-1.txt", "a.txt", 6)).await;
        assert!(d.handle(chunk("a-1.txt", u64::MAX - 1, b"abc")).await.is_err());
        assert_eq!(d.progress(&TransferId::from("a-1.txt")), Some((0, 6)));
    }

    #[tokio::test]
    async fn cancel_removes_partial_file() {
        init_test_tracing();
        let tmp = TempDir::new().unwrap();
        let mut d = Downloader::new(me(), tmp.path().to_path_buf());

        ack_of(&mut d, info("a-1.txt", "a.txt", 6)).await;
        ack_of(&mut d, chunk("a-1.txt", 0, b"abc")).await;
        let resp = ack_of(
            &mut d,
            TransferMessage::Cancel(CancelSignal {
                transfer_id: TransferId::from("a-1.txt"),
                recipient: me(),
            }),
        )
        .await;
        assert!(resp.cancelled);
        assert!(!tmp.path().join("a.txt").exists());
        assert!(d.progress(&TransferId::from("a-1.txt")).is_none());
    }

    #[tokio::test]
    async fn manifest_policy_decides() {
        init_test_tracing();
        let tmp = TempDir::new().unwrap();
        let mut d = Downloader::with_policy(
            me(),
            tmp.path().to_path_buf(),
            Box::new(|m: &Manifest| m.transfers.len() < 2),
        );

        let (kind, resp) = d
            .handle(TransferMessage::Authorize(manifest(1, "a-1.txt")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kind, ResponseKind::Authorization);
        assert!(resp.accepted);
        assert_eq!(resp.session_id, Some(SessionId([1; 16])));

        let mut big = manifest(2, "b-1.txt");
        big.transfers.push(big.transfers[0].clone());
        let (_, resp) = d
            .handle(TransferMessage::Authorize(big))
            .await
            .unwrap()
            .unwrap();
        assert!(!resp.accepted);
    }

    #[tokio::test]
    async fn session_cancel_discards_session_files() {
        init_test_tracing();
        let tmp = TempDir::new().unwrap();
        let mut d = Downloader::new(me(), tmp.path().to_path_buf());

        d.handle(TransferMessage::Authorize(manifest(1, "a-1.txt")))
            .await
            .unwrap();
        ack_of(&mut d, info("a-1.txt", "a.txt", 6)).await;
        ack_of(&mut d, chunk("a-1.txt", 0, b"abc")).await;

        let resp = d
            .handle(TransferMessage::SessionCancel(SessionCancel {
                session_id: SessionId([1; 16]),
                recipients: vec![me()],
            }))
            .await
            .unwrap();
        assert!(resp.is_none());
        assert!(!tmp.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn announced_name_cannot_escape_download_dir() {
        init_test_tracing();
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("downloads");
        let mut d = Downloader::new(me(), dir.clone());

        ack_of(&mut d, info("p-1.txt", "../../etc/passwd", 1)).await;
        let path = d.file_path(&TransferId::from("p-1.txt")).unwrap();
        assert_eq!(path, dir.join("passwd"));
    }

    #[tokio::test]
    async fn same_name_twice_uses_transfer_id() {
        init_test_tracing();
        let tmp = TempDir::new().unwrap();
        let mut d = Downloader::new(me(), tmp.path().to_path_buf());

        ack_of(&mut d, info("a-1.txt", "a.txt", 1)).await;
        ack_of(&mut d, info("a-2.txt", "a.txt", 1)).await;
        assert_eq!(
            d.file_path(&TransferId::from("a-2.txt")).unwrap(),
            tmp.path().join("a-2.txt")
        );
    }

    #[tokio::test]
    async fn empty_file_is_complete_after_info() {
        init_test_tracing();
        let tmp = TempDir::new().unwrap();
        let mut d = Downloader::new(me(), tmp.path().to_path_buf());

        ack_of(&mut d, info("e-1.txt", "e.txt", 0)).await;
        assert!(d.is_complete(&TransferId::from("e-1.txt")));
        assert!(tmp.path().join("e.txt").exists());
    }
}
