//! The Safe SSE writer: a channel-fed, single-consumer writer that
//! guarantees ordering and atomicity of frames from many producing tasks
//! while honoring client disconnect.

use crate::sink::Sink;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default bounded channel capacity.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// A channel-serialized writer wrapping a raw [`Sink`].
///
/// Multiple tasks may call [`SafeWriter::write`] concurrently; a single
/// drain task guarantees total ordering and that no single `write` call's
/// bytes are ever split or interleaved with another's.
pub struct SafeWriter {
    tx: StdMutex<Option<mpsc::Sender<Bytes>>>,
    closed: AtomicBool,
    drain: StdMutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl SafeWriter {
    /// Build a writer over `sink`, spawning its drain task. `cancel` is the
    /// request-level cancellation token (client disconnect); once cancelled,
    /// the drain loop stops calling into `sink` but keeps draining the
    /// channel so producers never block on a dead socket.
    pub fn new(sink: Box<dyn Sink>, cancel: CancellationToken) -> Arc<Self> {
        Self::with_capacity(sink, cancel, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(sink: Box<dyn Sink>, cancel: CancellationToken, capacity: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = tokio::spawn(drain_loop(rx, sink, cancel.clone()));
        Arc::new(Self {
            tx: StdMutex::new(Some(tx)),
            closed: AtomicBool::new(false),
            drain: StdMutex::new(Some(handle)),
            cancel,
        })
    }

    /// Enqueue `bytes` for the drain task. Returns the number of bytes
    /// accepted — always `bytes.len()`, even after [`Self::close`] or when
    /// the channel is full; both cases silently discard the payload rather
    /// than error or block the caller.
    pub fn write(&self, bytes: &[u8]) -> usize {
        let len = bytes.len();
        if self.closed.load(Ordering::SeqCst) {
            return len;
        }
        let guard = self.tx.lock().expect("writer mutex poisoned");
        if let Some(tx) = guard.as_ref() {
            match tx.try_send(Bytes::copy_from_slice(bytes)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(dropped_bytes = len, "sse writer queue full; frame dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Producer raced with close(); safe to ignore.
                }
            }
        }
        len
    }

    /// No-op: every `write` flushes internally.
    pub fn flush(&self) {}

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Idempotent. Closes the channel, waits for the drain task to finish
    /// draining whatever was queued, then returns.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            self.tx.lock().expect("writer mutex poisoned").take();
        }
        let handle = self.drain.lock().expect("writer mutex poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn drain_loop(mut rx: mpsc::Receiver<Bytes>, mut sink: Box<dyn Sink>, cancel: CancellationToken) {
    while let Some(bytes) = rx.recv().await {
        if cancel.is_cancelled() {
            // Client is gone: keep draining so producers never block, but
            // stop touching the dead socket.
            continue;
        }
        if let Err(err) = sink.write_all(&bytes).await {
            tracing::warn!(error = %err, "sse sink write failed; treating as disconnect");
            cancel.cancel();
            continue;
        }
        if let Err(err) = sink.flush().await {
            tracing::warn!(error = %err, "sse sink flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::BufferSink;
    use async_trait::async_trait;
    use std::sync::Arc as StdArc;
    use tokio::sync::Mutex as AsyncMutex;

    struct SharedBufferSink(StdArc<AsyncMutex<Vec<u8>>>);

    #[async_trait]
    impl Sink for SharedBufferSink {
        async fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
            self.0.lock().await.extend_from_slice(bytes);
            Ok(())
        }
    }

    #[tokio::test]
    async fn single_producer_round_trips() {
        let captured = StdArc::new(AsyncMutex::new(Vec::new()));
        let writer = SafeWriter::new(
            Box::new(SharedBufferSink(captured.clone())),
            CancellationToken::new(),
        );
        writer.write(b"hello ");
        writer.write(b"world");
        writer.close().await;
        assert_eq!(&*captured.lock().await, b"hello world");
    }

    #[tokio::test]
    async fn twenty_six_concurrent_producers_never_interleave() {
        let buf = StdArc::new(AsyncMutex::new(Vec::new()));
        let writer = SafeWriter::new(Box::new(SharedBufferSink(buf.clone())), CancellationToken::new());

        let mut handles = Vec::new();
        for letter in b'A'..=b'Z' {
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                let block = vec![letter; 100];
                writer.write(&block);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        writer.close().await;

        let data = buf.lock().await.clone();
        assert_eq!(data.len(), 2600);
        let mut seen = std::collections::HashSet::new();
        for run in data.chunks(100) {
            let first = run[0];
            assert!(run.iter().all(|&b| b == first), "run not homogeneous");
            assert!(seen.insert(first), "letter {} appeared more than once as a run", first as char);
        }
        assert_eq!(seen.len(), 26);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let writer = SafeWriter::new(Box::new(BufferSink::default()), CancellationToken::new());
        writer.close().await;
        writer.close().await;
        assert!(writer.is_closed());
    }

    #[tokio::test]
    async fn writes_after_close_are_silently_discarded() {
        let writer = SafeWriter::new(Box::new(BufferSink::default()), CancellationToken::new());
        writer.close().await;
        let n = writer.write(b"ignored");
        assert_eq!(n, 7);
    }

    #[tokio::test]
    async fn cancellation_stops_writes_but_drains_queue() {
        let buf = StdArc::new(AsyncMutex::new(Vec::new()));
        let cancel = CancellationToken::new();
        let writer = SafeWriter::new(Box::new(SharedBufferSink(buf.clone())), cancel.clone());
        cancel.cancel();
        writer.write(b"dropped-on-wire");
        writer.close().await;
        assert!(buf.lock().await.is_empty());
    }
}
