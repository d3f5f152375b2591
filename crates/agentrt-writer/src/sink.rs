//! The raw byte sink a [`crate::writer::SafeWriter`] drains into — the
//! HTTP response body, in production. Kept as a narrow trait so the writer
//! never depends on a particular web framework (HTTP routing is out of
//! scope).

use async_trait::async_trait;

#[async_trait]
pub trait Sink: Send + 'static {
    async fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()>;

    /// Every [`crate::writer::SafeWriter::write`] flushes internally, so
    /// this is called after every successful `write_all`. Frameworks whose
    /// body sender flushes implicitly can leave this as a no-op.
    async fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// An in-memory [`Sink`] used by tests and embedders that want to capture
/// the wire bytes directly.
#[derive(Default)]
pub struct BufferSink {
    pub buf: Vec<u8>,
}

#[async_trait]
impl Sink for BufferSink {
    async fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.buf.extend_from_slice(bytes);
        Ok(())
    }
}
