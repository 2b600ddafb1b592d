//! Stream outbox: the bounded, ordered chunk channel from ops to the client.
//!
//! A Context created for a stream flow owns one [`StreamOutbox`]. Ops emit
//! [`StreamChunk`]s through it; the service layer drains the receiving end in
//! order and forwards each chunk to the transport. A full outbox blocks the
//! emitter (backpressure); a fired cancellation token or a dropped receiver
//! surfaces as [`FlowError::Cancelled`] on the next emit.

use stream_chunk::StreamChunk;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::FlowError;

/// Sending half of the invocation's chunk channel.
#[derive(Clone)]
pub struct StreamOutbox {
    tx: mpsc::Sender<StreamChunk>,
    cancel: CancellationToken,
}

impl StreamOutbox {
    /// Creates a bounded outbox tied to the invocation's cancellation token.
    /// Returns the outbox and the receiving end for the service layer.
    pub fn channel(
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<StreamChunk>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, cancel }, rx)
    }

    /// Emits one chunk, blocking while the outbox is full.
    ///
    /// Returns `Cancelled` when the invocation token has fired or the
    /// receiver is gone (client disconnect).
    pub async fn emit(&self, chunk: StreamChunk) -> Result<(), FlowError> {
        tokio::select! {
            _ = self.cancel.cancelled() => {
                Err(FlowError::cancelled("stream cancelled during emit"))
            }
            sent = self.tx.send(chunk) => {
                sent.map_err(|_| FlowError::cancelled("stream receiver closed"))
            }
        }
    }

    /// Non-blocking emit; returns `false` when the outbox is full or closed.
    pub fn try_emit(&self, chunk: StreamChunk) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.tx.try_send(chunk).is_ok()
    }

    /// True once the receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl std::fmt::Debug for StreamOutbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamOutbox")
            .field("closed", &self.tx.is_closed())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
