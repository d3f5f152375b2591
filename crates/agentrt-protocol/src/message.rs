//! The universal [`Message`] DSL.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Built-in message types. `type` selects the client-side renderer; `props`
/// is a free-form mapping whose shape is fixed per built-in type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Thinking,
    Loading,
    ToolCall,
    Error,
    Image,
    Audio,
    Video,
    /// Silent in the OpenAI dialect.
    Action,
    /// Lifecycle event (`stream_start`, `message_start`, `message_end`, `stream_end`, …).
    Event,
    /// Display-only echo of what the user sent.
    UserInput,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Thinking => "thinking",
            MessageType::Loading => "loading",
            MessageType::ToolCall => "tool_call",
            MessageType::Error => "error",
            MessageType::Image => "image",
            MessageType::Audio => "audio",
            MessageType::Video => "video",
            MessageType::Action => "action",
            MessageType::Event => "event",
            MessageType::UserInput => "user_input",
        }
    }
}

/// How a delta frame should be merged into its logical message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaAction {
    /// Concatenate string/array at `delta_path`.
    Append,
    /// Overwrite the field at `delta_path`.
    Replace,
    /// Shallow-merge an object at `delta_path`.
    Merge,
    /// Create the field at `delta_path` only if absent.
    Set,
}

/// One frame of the universal message DSL.
///
/// `chunk_id`/`message_id`/`block_id`/`thread_id` are hierarchical
/// identifiers: every raw fragment gets a `chunk_id`; fragments
/// sharing a `message_id` merge into one logical message; `block_id` groups
/// at agent-activity granularity; `thread_id` distinguishes parallel
/// streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub props: Map<String, Value>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub chunk_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub block_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub thread_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub delta: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub delta_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub delta_action: Option<DeltaAction>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub type_change: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<Map<String, Value>>,
}

impl Message {
    pub fn new(msg_type: MessageType, props: Map<String, Value>) -> Self {
        Self {
            msg_type,
            props,
            chunk_id: None,
            message_id: None,
            block_id: None,
            thread_id: None,
            delta: None,
            delta_path: None,
            delta_action: None,
            type_change: None,
            metadata: None,
        }
    }

    pub fn event(props: Map<String, Value>) -> Self {
        Self::new(MessageType::Event, props)
    }

    pub fn with_chunk_id(mut self, id: impl Into<String>) -> Self {
        self.chunk_id = Some(id.into());
        self
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_block_id(mut self, id: impl Into<String>) -> Self {
        self.block_id = Some(id.into());
        self
    }

    pub fn with_thread_id(mut self, id: Option<String>) -> Self {
        self.thread_id = id;
        self
    }

    pub fn as_delta(mut self, action: DeltaAction, path: impl Into<String>) -> Self {
        self.delta = Some(true);
        self.delta_action = Some(action);
        self.delta_path = Some(path.into());
        self
    }

    pub fn with_type_change(mut self) -> Self {
        self.type_change = Some(true);
        self
    }

    /// Convenience constructor for a `{content}`-shaped text/thinking delta,
    /// the default action for those two built-in types: append-to-content.
    pub fn content_delta(msg_type: MessageType, content: impl Into<String>) -> Self {
        let mut props = Map::new();
        props.insert("content".to_string(), Value::String(content.into()));
        Self::new(msg_type, props).as_delta(DeltaAction::Append, "content")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_message_roundtrips() {
        let msg = Message::content_delta(MessageType::Text, "hi")
            .with_chunk_id("C1")
            .with_message_id("M1");
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.msg_type, MessageType::Text);
        assert_eq!(back.props.get("content").unwrap(), "hi");
        assert_eq!(back.chunk_id.as_deref(), Some("C1"));
        assert_eq!(back.delta_action, Some(DeltaAction::Append));
    }

    #[test]
    fn optional_fields_are_omitted_when_absent() {
        let msg = Message::new(MessageType::Action, Map::new());
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("chunk_id").is_none());
        assert!(json.get("thread_id").is_none());
    }
}
