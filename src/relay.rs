//! Stream relay for chunked generator output
//!
//! Bridges a generator's lazy chunk sequence to the transport: a producer
//! task pulls chunks and forwards them over a bounded channel as framed
//! units, in arrival order, terminated by exactly one `Done` frame. When the
//! consumer goes away the channel closes, the producer observes the failed
//! send and stops pulling, and nothing further is emitted.

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::generator::ChunkStream;

/// Sentinel data payload marking the end of a stream on the wire
pub const DONE_MARKER: &str = "[DONE]";

/// A framed unit emitted to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Ordered text chunk from the generator
    Chunk {
        /// Position in the stream, starting at 0
        seq: u64,
        /// Chunk text
        text: String,
    },
    /// Upstream failure, relayed at most once with a readable message
    Error(String),
    /// Terminal marker; always the last frame on every non-cancelled stream
    Done,
}

/// Consumer handle for a relayed stream
pub struct StreamRelay {
    frames: mpsc::Receiver<Frame>,
}

impl StreamRelay {
    /// Spawn a producer task relaying `chunks` into a bounded channel
    ///
    /// The channel holds at most `buffer` frames, so the producer never runs
    /// far ahead of the consumer. On upstream failure one `Error` frame is
    /// emitted, followed by `Done`, so consumers can always detect
    /// termination the same way.
    #[must_use]
    pub fn spawn(provider: &str, chunks: ChunkStream, buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let provider = provider.to_string();

        tokio::spawn(async move {
            let mut chunks = chunks;
            let mut seq = 0u64;

            while let Some(item) = chunks.next().await {
                match item {
                    Ok(text) => {
                        if tx.send(Frame::Chunk { seq, text }).await.is_err() {
                            debug!(provider = %provider, seq, "Stream consumer disconnected");
                            return;
                        }
                        seq += 1;
                    }
                    Err(e) => {
                        error!(provider = %provider, seq, error = %e, "Generator stream failed");
                        let _ = tx.send(Frame::Error(e.to_string())).await;
                        let _ = tx.send(Frame::Done).await;
                        return;
                    }
                }
            }

            debug!(provider = %provider, chunks = seq, "Stream complete");
            let _ = tx.send(Frame::Done).await;
        });

        Self { frames: rx }
    }

    /// A relay that failed before producing any chunk: one `Error` frame,
    /// then `Done`.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(2);
        // Capacity 2 on a fresh channel; these sends cannot fail
        let _ = tx.try_send(Frame::Error(message.into()));
        let _ = tx.try_send(Frame::Done);
        Self { frames: rx }
    }

    /// Receive the next frame; `None` once the producer is gone
    pub async fn recv(&mut self) -> Option<Frame> {
        self.frames.recv().await
    }
}
