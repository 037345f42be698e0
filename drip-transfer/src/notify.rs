//! Presentation-only failure notifications.

use std::sync::Arc;

use tokio::sync::mpsc;

/// Receives human-readable failure messages. Fire-and-forget: the engine
/// never reads anything back.
pub trait ErrorSink: Send + Sync + 'static {
    fn notify(&self, message: String);
}

/// Logs every notification at `error` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn notify(&self, message: String) {
        tracing::error!(%message, "transfer failure");
    }
}

impl ErrorSink for mpsc::UnboundedSender<String> {
    fn notify(&self, message: String) {
        let _ = self.send(message);
    }
}

impl<S: ErrorSink + ?Sized> ErrorSink for Arc<S> {
    fn notify(&self, message: String) {
        (**self).notify(message);
    }
}
