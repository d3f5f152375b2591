//! The core state machine.

use crate::chunk::{ProviderChunk, ProviderChunkType, StreamStatus};
use crate::store::{MessageStore, PersistedContent};
use agentrt_protocol::ids::ContextIds;
use agentrt_protocol::message::{DeltaAction, Message, MessageType};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;

/// Per-in-flight-message state.
struct MessageState {
    current_group_id: String,
    current_type: Option<MessageType>,
    buffer: String,
    chunk_count: u64,
    start_time: Instant,
    thread_id: Option<String>,
    tool_call_id: Option<String>,
    tool_call_name: Option<String>,
}

/// Drives provider chunks into protocol [`Message`]s for one in-flight
/// logical stream. One instance per provider stream; chunks must be fed
/// sequentially by a single task per provider stream.
pub struct StreamMachine {
    ids: Arc<ContextIds>,
    /// Thread id inherited from an enclosing concurrent call stack, if this
    /// stream is running as a nested sub-agent.
    thread_override: Option<String>,
    store: Option<Arc<dyn MessageStore>>,
    skip_history: bool,
    state: Option<MessageState>,
    stream_start_emitted: bool,
    stream_end_emitted: bool,
}

fn decode_lenient(data: &[u8]) -> Value {
    if data.is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_slice(data).unwrap_or_else(|_| Value::Object(Map::new()))
}

impl StreamMachine {
    pub fn new(ids: Arc<ContextIds>) -> Self {
        Self {
            ids,
            thread_override: None,
            store: None,
            skip_history: false,
            state: None,
            stream_start_emitted: false,
            stream_end_emitted: false,
        }
    }

    pub fn with_thread(mut self, thread_id: Option<String>) -> Self {
        self.thread_override = thread_id;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn MessageStore>, skip_history: bool) -> Self {
        self.store = Some(store);
        self.skip_history = skip_history;
        self
    }

    /// Process one chunk, returning the emitted frames and the status the
    /// provider loop should act on.
    pub async fn process(&mut self, chunk: ProviderChunk) -> (StreamStatus, Vec<Message>) {
        match chunk.chunk_type {
            ProviderChunkType::StreamStart => self.on_stream_start(&chunk.data),
            ProviderChunkType::MessageStart => self.on_message_start(&chunk.data),
            ProviderChunkType::Text => self.on_text_or_thinking(&chunk.data, MessageType::Text),
            ProviderChunkType::Thinking => self.on_text_or_thinking(&chunk.data, MessageType::Thinking),
            ProviderChunkType::ToolCall => self.on_tool_call(&chunk.data),
            ProviderChunkType::Metadata => (StreamStatus::Continue, Vec::new()),
            ProviderChunkType::Error => self.on_error(&chunk.data),
            ProviderChunkType::MessageEnd => self.on_message_end().await,
            ProviderChunkType::StreamEnd => self.on_stream_end(&chunk.data),
        }
    }

    fn on_stream_start(&mut self, data: &[u8]) -> (StreamStatus, Vec<Message>) {
        if self.stream_start_emitted {
            tracing::warn!("stream_start received more than once; ignoring");
            return (StreamStatus::Continue, Vec::new());
        }
        self.stream_start_emitted = true;
        let value = decode_lenient(data);
        let mut props = Map::new();
        props.insert("event".to_string(), Value::String("stream_start".to_string()));
        props.insert("data".to_string(), value);
        (StreamStatus::Continue, vec![Message::event(props)])
    }

    fn on_message_start(&mut self, data: &[u8]) -> (StreamStatus, Vec<Message>) {
        let mut frames = Vec::new();

        // (c) message_start arriving without an intervening message_end:
        // treat as a reset — close the prior message as partial, start new.
        if let Some(prev) = self.state.take() {
            tracing::warn!(
                message_id = %prev.current_group_id,
                "message_start received while a message was still open; closing it as partial"
            );
            frames.push(Self::build_message_end_event(&prev, "partial"));
        }

        let mut value = decode_lenient(data);
        let message_id = value
            .get("message_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| self.ids.generate_message_id());
        if let Value::Object(ref mut map) = value {
            map.insert("message_id".to_string(), Value::String(message_id.clone()));
        }

        self.state = Some(MessageState {
            current_group_id: message_id,
            current_type: None,
            buffer: String::new(),
            chunk_count: 0,
            start_time: Instant::now(),
            thread_id: self.thread_override.clone(),
            tool_call_id: None,
            tool_call_name: None,
        });

        let mut props = Map::new();
        props.insert("event".to_string(), Value::String("message_start".to_string()));
        props.insert("data".to_string(), value);
        frames.push(Message::event(props));
        (StreamStatus::Continue, frames)
    }

    fn on_text_or_thinking(&mut self, data: &[u8], msg_type: MessageType) -> (StreamStatus, Vec<Message>) {
        if data.is_empty() {
            return (StreamStatus::Continue, Vec::new());
        }
        let text = String::from_utf8_lossy(data).to_string();
        let Some(state) = self.state.as_mut() else {
            tracing::warn!("text/thinking chunk received with no active message_start; skipping");
            return (StreamStatus::Continue, Vec::new());
        };
        state.current_type = Some(msg_type);
        state.buffer.push_str(&text);
        state.chunk_count += 1;
        let group_id = state.current_group_id.clone();
        let thread_id = state.thread_id.clone();

        let msg = Message::content_delta(msg_type, text)
            .with_chunk_id(self.ids.generate_chunk_id())
            .with_message_id(group_id)
            .with_thread_id(thread_id);
        (StreamStatus::Continue, vec![msg])
    }

    fn on_tool_call(&mut self, data: &[u8]) -> (StreamStatus, Vec<Message>) {
        let value: Value = match serde_json::from_slice(data) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(error = %err, "malformed tool_call JSON; skipping chunk");
                return (StreamStatus::Continue, Vec::new());
            }
        };
        let Value::Array(items) = value else {
            tracing::warn!("tool_call payload was not a JSON array; skipping chunk");
            return (StreamStatus::Continue, Vec::new());
        };

        let Some(state) = self.state.as_mut() else {
            tracing::warn!("tool_call chunk received with no active message_start; skipping");
            return (StreamStatus::Continue, Vec::new());
        };
        state.current_type = Some(MessageType::ToolCall);
        state.chunk_count += 1;
        let group_id = state.current_group_id.clone();
        let thread_id = state.thread_id.clone();

        if items.len() != 1 {
            let mut props = Map::new();
            props.insert("calls".to_string(), Value::Array(items));
            let msg = Message::new(MessageType::ToolCall, props)
                .with_chunk_id(self.ids.generate_chunk_id())
                .with_message_id(group_id)
                .with_thread_id(thread_id)
                .as_delta(DeltaAction::Merge, "");
            return (StreamStatus::Continue, vec![msg]);
        }

        let obj = items.into_iter().next().unwrap();
        let obj_map = obj.as_object().cloned().unwrap_or_default();
        let function = obj_map.get("function").and_then(|f| f.as_object());
        let arguments = function.and_then(|f| f.get("arguments")).and_then(|v| v.as_str());

        if let Some(arguments) = arguments {
            // Continuation chunk: append-only.
            state.buffer.push_str(arguments);
            let mut props = Map::new();
            props.insert("arguments".to_string(), Value::String(arguments.to_string()));
            if let Some(index) = obj_map.get("index") {
                props.insert("index".to_string(), index.clone());
            }
            let msg = Message::new(MessageType::ToolCall, props)
                .with_chunk_id(self.ids.generate_chunk_id())
                .with_message_id(group_id)
                .with_thread_id(thread_id)
                .as_delta(DeltaAction::Append, "arguments");
            return (StreamStatus::Continue, vec![msg]);
        }

        // First chunk: static fields merge.
        let mut props = Map::new();
        for key in ["id", "type", "index"] {
            if let Some(v) = obj_map.get(key) {
                props.insert(key.to_string(), v.clone());
            }
        }
        if let Some(name) = function.and_then(|f| f.get("name")) {
            props.insert("name".to_string(), name.clone());
        }
        state.tool_call_id = obj_map.get("id").and_then(|v| v.as_str()).map(str::to_string);
        state.tool_call_name = function
            .and_then(|f| f.get("name"))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let msg = Message::new(MessageType::ToolCall, props)
            .with_chunk_id(self.ids.generate_chunk_id())
            .with_message_id(group_id)
            .with_thread_id(thread_id)
            .as_delta(DeltaAction::Merge, "");
        (StreamStatus::Continue, vec![msg])
    }

    fn on_error(&mut self, data: &[u8]) -> (StreamStatus, Vec<Message>) {
        let text = String::from_utf8_lossy(data).to_string();
        let mut props = Map::new();
        props.insert("message".to_string(), Value::String(text));
        props.insert("code".to_string(), Value::String("stream_error".to_string()));
        (StreamStatus::Stop, vec![Message::new(MessageType::Error, props)])
    }

    async fn on_message_end(&mut self) -> (StreamStatus, Vec<Message>) {
        let Some(state) = self.state.take() else {
            return (StreamStatus::Continue, Vec::new());
        };

        if let Some(store) = &self.store {
            if !self.skip_history {
                let content = match state.current_type {
                    Some(MessageType::ToolCall) => {
                        let parsed = serde_json::from_str::<Value>(&state.buffer).ok();
                        let calls = serde_json::json!([{
                            "id": state.tool_call_id,
                            "name": state.tool_call_name,
                            "arguments": parsed.unwrap_or_else(|| Value::String(state.buffer.clone())),
                        }]);
                        PersistedContent::ToolCalls(serde_json::json!({ "calls": calls }))
                    }
                    _ => PersistedContent::Text(state.buffer.clone()),
                };
                store.persist_assistant_message(&state.current_group_id, content).await;
            }
        }

        let event = Self::build_message_end_event(&state, "completed");
        (StreamStatus::Continue, vec![event])
    }

    fn build_message_end_event(state: &MessageState, status: &str) -> Message {
        let duration_ms = state.start_time.elapsed().as_millis() as u64;
        let msg_type = state.current_type.unwrap_or(MessageType::Text);

        let mut data = Map::new();
        data.insert("message_id".to_string(), Value::String(state.current_group_id.clone()));
        data.insert("type".to_string(), Value::String(msg_type.as_str().to_string()));
        if let Some(thread_id) = &state.thread_id {
            data.insert("thread_id".to_string(), Value::String(thread_id.clone()));
        }
        data.insert("duration_ms".to_string(), Value::from(duration_ms));
        data.insert("chunk_count".to_string(), Value::from(state.chunk_count));
        data.insert("status".to_string(), Value::String(status.to_string()));
        let mut extra = Map::new();
        extra.insert("content".to_string(), Value::String(state.buffer.clone()));
        data.insert("extra".to_string(), Value::Object(extra));

        let mut props = Map::new();
        props.insert("event".to_string(), Value::String("message_end".to_string()));
        props.insert("data".to_string(), Value::Object(data));
        Message::event(props)
    }

    fn on_stream_end(&mut self, data: &[u8]) -> (StreamStatus, Vec<Message>) {
        if self.stream_end_emitted {
            tracing::warn!("stream_end received more than once; ignoring");
            return (StreamStatus::Continue, Vec::new());
        }
        self.stream_end_emitted = true;
        let value = decode_lenient(data);
        let mut props = Map::new();
        props.insert("event".to_string(), Value::String("stream_end".to_string()));
        props.insert("data".to_string(), value);
        (StreamStatus::Continue, vec![Message::event(props)])
    }
}
