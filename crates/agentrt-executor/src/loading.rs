//! Loading-bubble protocol. At most one active bubble at a time
//! (excluding the initial "preparing sandbox" bubble, which is itself
//! subject to the same close-on-next-event rule). Implemented as
//! executor-local state, not persisted.

use agentrt_protocol::ids::ContextIds;
use agentrt_protocol::message::{DeltaAction, Message, MessageType};
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Clone)]
struct OpenBubble {
    block_id: String,
}

pub struct LoadingTracker {
    ids: Arc<ContextIds>,
    active: Option<OpenBubble>,
}

fn open_message(ids: &ContextIds, block_id: &str, message: String) -> Message {
    let mut props = Map::new();
    props.insert("message".to_string(), Value::String(message));
    props.insert("done".to_string(), Value::Bool(false));
    Message::new(MessageType::Loading, props)
        .with_chunk_id(ids.generate_chunk_id())
        .with_block_id(block_id.to_string())
}

fn close_message(ids: &ContextIds, block_id: &str) -> Message {
    let mut props = Map::new();
    props.insert("message".to_string(), Value::String(String::new()));
    props.insert("done".to_string(), Value::Bool(true));
    Message::new(MessageType::Loading, props)
        .with_chunk_id(ids.generate_chunk_id())
        .with_block_id(block_id.to_string())
        .as_delta(DeltaAction::Replace, "")
}

impl LoadingTracker {
    pub fn new(ids: Arc<ContextIds>) -> Self {
        Self { ids, active: None }
    }

    /// Opens the "preparing sandbox" bubble shown before the CLI streams
    /// anything.
    pub fn start_initial(&mut self, message: impl Into<String>) -> Message {
        self.open_new(message.into())
    }

    fn open_new(&mut self, message: String) -> Message {
        let block_id = self.ids.generate_block_id();
        let frame = open_message(&self.ids, &block_id, message);
        self.active = Some(OpenBubble { block_id });
        frame
    }

    /// The initial bubble closes on the first text fragment or the first
    /// tool start, whichever comes first. Call on first text.
    pub fn on_first_text(&mut self) -> Option<Message> {
        self.active.take().map(|b| close_message(&self.ids, &b.block_id))
    }

    /// A new tool's `content_block_start` closes the previous bubble (if
    /// any — initial or a prior tool's) and opens a fresh one.
    pub fn on_tool_start(&mut self, caption: impl Into<String>) -> Vec<Message> {
        let mut frames = Vec::new();
        if let Some(b) = self.active.take() {
            frames.push(close_message(&self.ids, &b.block_id));
        }
        frames.push(self.open_new(caption.into()));
        frames
    }

    /// `content_block_stop` refines the active bubble's caption to a
    /// detailed per-tool summary, in place (same `block_id`).
    pub fn on_tool_detail(&mut self, caption: impl Into<String>) -> Option<Message> {
        let block_id = self.active.as_ref()?.block_id.clone();
        let mut props = Map::new();
        props.insert("message".to_string(), Value::String(caption.into()));
        props.insert("done".to_string(), Value::Bool(false));
        Some(
            Message::new(MessageType::Loading, props)
                .with_chunk_id(self.ids.generate_chunk_id())
                .with_block_id(block_id)
                .as_delta(DeltaAction::Replace, ""),
        )
    }

    /// On stream end, any remaining bubble is closed.
    pub fn on_stream_end(&mut self) -> Option<Message> {
        self.active.take().map(|b| close_message(&self.ids, &b.block_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_text_closes_the_initial_bubble() {
        let mut tracker = LoadingTracker::new(Arc::new(ContextIds::new()));
        tracker.start_initial("Preparing sandbox...");
        let closed = tracker.on_first_text().expect("bubble should close");
        assert_eq!(closed.props["done"], true);
        assert_eq!(closed.props["message"], "");
        assert!(tracker.on_first_text().is_none(), "already closed, no-op");
    }

    #[test]
    fn tool_start_closes_previous_and_opens_new() {
        let mut tracker = LoadingTracker::new(Arc::new(ContextIds::new()));
        tracker.start_initial("Preparing sandbox...");
        let frames = tracker.on_tool_start("Running Bash: ls -la");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].props["done"], true);
        assert_eq!(frames[1].props["message"], "Running Bash: ls -la");
        assert_eq!(frames[1].props["done"], false);
    }

    #[test]
    fn second_tool_start_only_closes_its_own_predecessor() {
        let mut tracker = LoadingTracker::new(Arc::new(ContextIds::new()));
        tracker.start_initial("Preparing sandbox...");
        tracker.on_tool_start("Tool A");
        let frames = tracker.on_tool_start("Tool B");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].props["done"], true);
        assert_eq!(frames[1].props["message"], "Tool B");
    }

    #[test]
    fn stream_end_closes_any_remaining_bubble() {
        let mut tracker = LoadingTracker::new(Arc::new(ContextIds::new()));
        tracker.on_tool_start("Tool A");
        let closed = tracker.on_stream_end().expect("remaining bubble closes");
        assert_eq!(closed.props["done"], true);
        assert!(tracker.on_stream_end().is_none());
    }
}
