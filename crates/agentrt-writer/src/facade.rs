//! Output façade: given `(accept, sink, ...)`, constructs the
//! right dialect writer and exposes `send`/`send_group`/`send_multi`/
//! `flush`/`close`.

use crate::sink::Sink;
use crate::writer::SafeWriter;
use agentrt_protocol::dialect::{Dialect, Frame};
use agentrt_protocol::message::Message;
use bytes::Bytes;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The requested client dialect, taken from an `Accept`-like request field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    Standard,
    CuiWeb,
    CuiNative,
    CuiDesktop,
}

impl Accept {
    /// Parses the raw accept token. Unrecognized values default to
    /// `Standard` (OpenAI dialect).
    pub fn parse(raw: &str) -> Self {
        match raw {
            "standard" => Accept::Standard,
            "cui-web" => Accept::CuiWeb,
            "cui-native" => Accept::CuiNative,
            "cui-desktop" => Accept::CuiDesktop,
            _ => Accept::Standard,
        }
    }

    pub fn is_cui(&self) -> bool {
        !matches!(self, Accept::Standard)
    }
}

fn encode_frame(frame: &Frame) -> Bytes {
    match frame {
        Frame::Json(value) => {
            let mut out = Vec::with_capacity(64);
            out.extend_from_slice(b"data: ");
            out.extend_from_slice(
                serde_json::to_vec(value)
                    .expect("frame values always serialize")
                    .as_slice(),
            );
            out.extend_from_slice(b"\n\n");
            Bytes::from(out)
        }
        Frame::Done => Bytes::from_static(b"data: [DONE]\n\n"),
    }
}

/// Context-bound pairing of a [`SafeWriter`] and a [`Dialect`].
pub struct OutputFacade {
    writer: Arc<SafeWriter>,
    dialect: Box<dyn Dialect>,
}

impl OutputFacade {
    pub fn new(sink: Box<dyn Sink>, dialect: Box<dyn Dialect>, cancel: CancellationToken) -> Self {
        Self {
            writer: SafeWriter::new(sink, cancel),
            dialect,
        }
    }

    /// Convert `msg` through the dialect and write each resulting frame.
    pub fn send(&self, msg: &Message) {
        for frame in self.dialect.adapt(msg) {
            self.writer.write(&encode_frame(&frame));
        }
    }

    /// Writes each member of `group` sequentially. In the OpenAI dialect
    /// this emits no group markers of its own — grouping is conveyed
    /// purely through the messages' own ids and `event` frames.
    pub fn send_group(&self, group: &[Message]) {
        for msg in group {
            self.send(msg);
        }
    }

    pub fn send_multi(&self, msgs: &[Message]) {
        for msg in msgs {
            self.send(msg);
        }
    }

    pub fn flush(&self) {
        self.writer.flush();
    }

    /// Emits the dialect's finalize frames (e.g. OpenAI's `[DONE]`) and
    /// closes the underlying writer.
    pub async fn close(&self) {
        for frame in self.dialect.finalize() {
            self.writer.write(&encode_frame(&frame));
        }
        self.writer.close().await;
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        self.writer.cancellation_token()
    }
}

/// Builds the dialect for a given [`Accept`] value.
pub fn dialect_for(
    accept: Accept,
    openai_id: impl Into<String>,
    openai_model: impl Into<String>,
    openai_created: i64,
) -> Box<dyn Dialect> {
    match accept {
        Accept::Standard => Box::new(agentrt_protocol::dialect::openai::OpenAiDialect::new(
            openai_id,
            openai_model,
            openai_created,
        )),
        Accept::CuiWeb | Accept::CuiNative | Accept::CuiDesktop => {
            Box::new(agentrt_protocol::dialect::cui::CuiDialect)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::BufferSink;
    use agentrt_protocol::message::MessageType;
    use serde_json::Map;

    #[tokio::test]
    async fn text_deltas_stream_through_cui_dialect() {
        let facade = OutputFacade::new(
            Box::new(BufferSink::default()),
            Box::new(agentrt_protocol::dialect::cui::CuiDialect),
            CancellationToken::new(),
        );
        facade.send(&Message::content_delta(MessageType::Text, "Hel").with_message_id("M1"));
        facade.send(&Message::content_delta(MessageType::Text, "lo").with_message_id("M1"));
        facade.close().await;
    }

    #[tokio::test]
    async fn openai_dialect_accept_defaults_to_standard() {
        assert_eq!(Accept::parse("bogus"), Accept::Standard);
        assert_eq!(Accept::parse("cui-web"), Accept::CuiWeb);
    }

    #[tokio::test]
    async fn close_emits_done_sentinel_for_openai() {
        use std::sync::Arc as StdArc;
        use tokio::sync::Mutex as AsyncMutex;
        struct Capture(StdArc<AsyncMutex<Vec<u8>>>);
        #[async_trait::async_trait]
        impl crate::sink::Sink for Capture {
            async fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
                self.0.lock().await.extend_from_slice(bytes);
                Ok(())
            }
        }
        let buf = StdArc::new(AsyncMutex::new(Vec::new()));
        let facade = OutputFacade::new(
            Box::new(Capture(buf.clone())),
            dialect_for(Accept::Standard, "id1", "gpt", 1),
            CancellationToken::new(),
        );
        facade.send(&Message::new(MessageType::Action, Map::new()));
        facade.close().await;
        let data = buf.lock().await.clone();
        assert!(String::from_utf8(data).unwrap().ends_with("data: [DONE]\n\n"));
    }
}
