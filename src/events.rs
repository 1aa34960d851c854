//! Error event stream
//!
//! Sub-components report recoverable failures here instead of failing the
//! operation that observed them. Emission goes through an unbounded channel,
//! so a slow or panicking consumer can never re-enter the emitter.

use tokio::sync::mpsc;
use tracing::warn;

use crate::error::DiamondError;

/// Sending half of the facade's error stream. Cheap to clone; shared by
/// every sub-component.
#[derive(Clone)]
pub struct ErrorSink {
    tx: mpsc::UnboundedSender<DiamondError>,
}

impl ErrorSink {
    /// Create a sink and the receiver the facade hands to its owner.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DiamondError>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report an error. Never blocks; if nobody listens the error is
    /// logged and dropped.
    pub fn emit(&self, err: DiamondError) {
        warn!(error = %err, "diamond client error event");
        let _ = self.tx.send(err);
    }
}
