//! Pluggable client dialects.
//!
//! A [`Dialect`] converts the universal [`Message`] DSL into zero or more
//! opaque wire [`Frame`]s. Two dialects ship with this crate: [`cui::CuiDialect`]
//! (pass-through) and [`openai::OpenAiDialect`] (OpenAI-compatible SSE chunks).

pub mod cui;
pub mod openai;
pub mod registry;

use crate::message::Message;
use serde_json::Value;

pub use registry::{Converter, DialectRegistry};

/// One wire-level unit produced by a [`Dialect`]. Encoding to bytes (the
/// `data: ...\n\n` SSE envelope, the `[DONE]` sentinel) is the output
/// façade's job, not the dialect's.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A JSON payload to be wrapped as `data: <json>\n\n`.
    Json(Value),
    /// The terminal `data: [DONE]\n\n` sentinel (OpenAI dialect only).
    Done,
}

/// Contract implemented by every client dialect.
pub trait Dialect: Send + Sync {
    /// Convert one [`Message`] into zero or more frames.
    fn adapt(&self, msg: &Message) -> Vec<Frame>;

    /// Advisory: whether this dialect has special handling for `msg_type`.
    fn supports_type(&self, msg_type: crate::message::MessageType) -> bool;

    /// Frames to emit once, when the output façade closes the stream (e.g.
    /// the OpenAI dialect's trailing `data: [DONE]\n\n`). Empty by default.
    fn finalize(&self) -> Vec<Frame> {
        Vec::new()
    }
}
