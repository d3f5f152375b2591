//! CLI stream-JSON parsing: a line-based, tolerant-of-garbage parser for
//! the coding-agent CLI's newline-delimited stream-JSON output.
//!
//! Each line is translated into zero or more [`agentrt_stream::ProviderChunk`]s
//! fed to a [`agentrt_stream::StreamMachine`] plus zero or more loading-bubble
//! frames from [`crate::loading::LoadingTracker`]; the caller interleaves both
//! onto the outgoing frame stream.

use crate::loading::LoadingTracker;
use agentrt_stream::{ProviderChunk, ProviderChunkType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub id: String,
    pub model: String,
    pub created: i64,
    pub role: &'static str,
    pub content: String,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub usage: Option<Usage>,
    pub finish_reason: &'static str,
}

struct ToolAccum {
    index: u64,
    name: String,
    input_buffer: String,
}

fn tool_loading_caption(name: &str, input: &Value) -> String {
    match name {
        "Bash" => {
            let cmd = input.get("command").and_then(|v| v.as_str()).unwrap_or("");
            format!("Running: {cmd}")
        }
        "Read" | "Write" | "Edit" => {
            let path = input.get("file_path").or_else(|| input.get("path")).and_then(|v| v.as_str()).unwrap_or("");
            let basename = path.rsplit('/').next().unwrap_or(path);
            format!("{name}: {basename}")
        }
        "Grep" => {
            let pattern = input.get("pattern").and_then(|v| v.as_str()).unwrap_or("");
            let truncated: String = pattern.chars().take(40).collect();
            format!("Searching: {truncated}")
        }
        other => format!("Running {other}"),
    }
}

pub enum RawStreamEvent {
    Chunk(ProviderChunk),
    Loading(agentrt_protocol::message::Message),
}

/// Drives one coding-agent CLI stdout into [`RawStreamEvent`]s, accumulating
/// the fields needed to build the final [`CompletionResponse`].
pub struct CliStreamParser {
    loading: LoadingTracker,
    message_started: bool,
    message_ended: bool,
    text_emitted: bool,
    tool_accums: HashMap<u64, ToolAccum>,
    model: Option<String>,
    content_parts: Vec<String>,
    streamed_text: bool,
    tool_calls: Vec<ToolCall>,
    usage: Option<Usage>,
    stop_reason: Option<String>,
    result_text: Option<String>,
    error: Option<String>,
    created: i64,
    id_suffix: String,
}

impl CliStreamParser {
    pub fn new(ids: std::sync::Arc<agentrt_protocol::ids::ContextIds>, created: i64, id_suffix: impl Into<String>) -> Self {
        Self {
            loading: LoadingTracker::new(ids),
            message_started: false,
            message_ended: false,
            text_emitted: false,
            tool_accums: HashMap::new(),
            model: None,
            content_parts: Vec::new(),
            streamed_text: false,
            tool_calls: Vec::new(),
            usage: None,
            stop_reason: None,
            result_text: None,
            error: None,
            created,
            id_suffix: id_suffix.into(),
        }
    }

    pub fn initial_loading_bubble(&mut self) -> agentrt_protocol::message::Message {
        self.loading.start_initial("Preparing sandbox...")
    }

    fn ensure_message_started(&mut self, out: &mut Vec<RawStreamEvent>) {
        if !self.message_started {
            self.message_started = true;
            out.push(RawStreamEvent::Chunk(ProviderChunk::new(ProviderChunkType::MessageStart, b"{}".to_vec())));
        }
    }

    /// Parse one line of CLI stdout. Malformed lines are logged and skipped
    /// except for the top-level `error` type, which always propagates.
    pub fn process_line(&mut self, line: &str) -> Result<Vec<RawStreamEvent>, String> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        let value: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(error = %err, line = %trimmed, "skipping unparseable CLI stream-json line");
                return Ok(Vec::new());
            }
        };
        let line_type = value.get("type").and_then(|v| v.as_str()).unwrap_or("");

        match line_type {
            "system" => {
                if let Some(model) = value.get("model").and_then(|v| v.as_str()) {
                    self.model = Some(model.to_string());
                }
                Ok(Vec::new())
            }
            "stream_event" => Ok(self.handle_stream_event(&value)),
            "assistant" => Ok(self.handle_assistant(&value)),
            "result" => self.handle_result(&value),
            "error" => {
                let message = value.get("message").and_then(|v| v.as_str()).unwrap_or("unknown CLI error").to_string();
                self.error = Some(message.clone());
                Err(message)
            }
            _ => Ok(Vec::new()),
        }
    }

    fn handle_stream_event(&mut self, value: &Value) -> Vec<RawStreamEvent> {
        let mut out = Vec::new();
        let Some(event) = value.get("event") else { return out };
        let event_type = event.get("type").and_then(|v| v.as_str()).unwrap_or("");

        match event_type {
            "content_block_start" => {
                let block = event.get("content_block");
                let block_type = block.and_then(|b| b.get("type")).and_then(|v| v.as_str()).unwrap_or("");
                let index = event.get("index").and_then(|v| v.as_u64()).unwrap_or(0);

                if block_type == "text" && (self.streamed_text || !self.content_parts.is_empty()) {
                    self.ensure_message_started(&mut out);
                    out.push(RawStreamEvent::Chunk(ProviderChunk::new(ProviderChunkType::Text, b"\n\n".to_vec())));
                    self.content_parts.push("\n\n".to_string());
                } else if block_type == "tool_use" {
                    let id = block.and_then(|b| b.get("id")).and_then(|v| v.as_str()).unwrap_or_default().to_string();
                    let name = block.and_then(|b| b.get("name")).and_then(|v| v.as_str()).unwrap_or_default().to_string();
                    for frame in self.loading.on_tool_start(format!("Running {name}...")) {
                        out.push(RawStreamEvent::Loading(frame));
                    }
                    self.ensure_message_started(&mut out);
                    let header = serde_json::json!([{
                        "id": id,
                        "type": "function",
                        "index": index,
                        "function": { "name": name },
                    }]);
                    out.push(RawStreamEvent::Chunk(ProviderChunk::new(
                        ProviderChunkType::ToolCall,
                        serde_json::to_vec(&header).unwrap_or_default(),
                    )));
                    self.tool_accums.insert(index, ToolAccum { index, name, input_buffer: String::new() });
                }
            }
            "content_block_delta" => {
                let delta = event.get("delta");
                let index = event.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
                if let Some(text) = delta.and_then(|d| d.get("text")).and_then(|v| v.as_str()) {
                    self.emit_text(text, &mut out);
                } else if let Some(thinking) = delta.and_then(|d| d.get("thinking")).and_then(|v| v.as_str()) {
                    self.ensure_message_started(&mut out);
                    out.push(RawStreamEvent::Chunk(ProviderChunk::new(ProviderChunkType::Thinking, thinking.as_bytes().to_vec())));
                } else if let Some(partial) = delta.and_then(|d| d.get("partial_json")).and_then(|v| v.as_str()) {
                    if let Some(accum) = self.tool_accums.get_mut(&index) {
                        accum.input_buffer.push_str(partial);
                    }
                }
            }
            "content_block_stop" => {
                let index = event.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
                if let Some(accum) = self.tool_accums.remove(&index) {
                    let input: Value = serde_json::from_str(&accum.input_buffer).unwrap_or(Value::Object(Default::default()));
                    let caption = tool_loading_caption(&accum.name, &input);
                    if let Some(frame) = self.loading.on_tool_detail(caption) {
                        out.push(RawStreamEvent::Loading(frame));
                    }
                    let continuation = serde_json::json!([{
                        "index": accum.index,
                        "function": { "arguments": accum.input_buffer },
                    }]);
                    out.push(RawStreamEvent::Chunk(ProviderChunk::new(
                        ProviderChunkType::ToolCall,
                        serde_json::to_vec(&continuation).unwrap_or_default(),
                    )));
                }
            }
            _ => {}
        }
        out
    }

    fn emit_text(&mut self, text: &str, out: &mut Vec<RawStreamEvent>) {
        let first = !self.streamed_text;
        self.streamed_text = true;
        if first {
            if let Some(closed) = self.loading.on_first_text() {
                out.push(RawStreamEvent::Loading(closed));
            }
            self.ensure_message_started(out);
        }
        self.content_parts.push(text.to_string());
        out.push(RawStreamEvent::Chunk(ProviderChunk::new(ProviderChunkType::Text, text.as_bytes().to_vec())));
    }

    fn handle_assistant(&mut self, value: &Value) -> Vec<RawStreamEvent> {
        let message = value.get("message");
        if let Some(usage) = message.and_then(|m| m.get("usage")) {
            self.usage = Some(Usage {
                prompt_tokens: usage.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                completion_tokens: usage.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                total_tokens: usage
                    .get("input_tokens")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0)
                    .saturating_add(usage.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0)) as u32,
            });
        }

        let stop_reason = message.and_then(|m| m.get("stop_reason")).and_then(|v| v.as_str());
        if let Some(stop_reason) = stop_reason {
            self.stop_reason = Some(stop_reason.to_string());
            if !self.streamed_text {
                if let Some(content) = message.and_then(|m| m.get("content")).and_then(|v| v.as_array()) {
                    for item in content {
                        if item.get("type").and_then(|v| v.as_str()) == Some("text") {
                            if let Some(text) = item.get("text").and_then(|v| v.as_str()) {
                                self.content_parts.push(text.to_string());
                            }
                        }
                    }
                }
            }
            if let Some(content) = message.and_then(|m| m.get("content")).and_then(|v| v.as_array()) {
                for item in content {
                    if item.get("type").and_then(|v| v.as_str()) == Some("tool_use") {
                        let id = item.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                        let name = item.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                        let input = item.get("input").cloned().unwrap_or(Value::Object(Default::default()));
                        let arguments = serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string());
                        self.tool_calls.push(ToolCall { id, call_type: "function".to_string(), function: FunctionCall { name, arguments } });
                    }
                }
            }
        }
        Vec::new()
    }

    fn handle_result(&mut self, value: &Value) -> Result<Vec<RawStreamEvent>, String> {
        if value.get("is_error").and_then(|v| v.as_bool()).unwrap_or(false) {
            let message = value.get("result").and_then(|v| v.as_str()).unwrap_or("CLI reported an error result").to_string();
            self.error = Some(message.clone());
            return Err(message);
        }
        if let Some(text) = value.get("result").and_then(|v| v.as_str()) {
            self.result_text = Some(text.to_string());
        }

        let mut out = Vec::new();
        if let Some(closed) = self.loading.on_stream_end() {
            out.push(RawStreamEvent::Loading(closed));
        }
        if !self.message_ended && self.message_started {
            self.message_ended = true;
            out.push(RawStreamEvent::Chunk(ProviderChunk::new(ProviderChunkType::MessageEnd, Vec::new())));
        }
        Ok(out)
    }

    /// Build the final response once the CLI process has exited.
    pub fn finish(self) -> CompletionResponse {
        let content = self.result_text.unwrap_or_else(|| self.content_parts.concat());
        let finish_reason = if self.tool_calls.is_empty() { "stop" } else { "tool_calls" };
        CompletionResponse {
            id: format!("sandbox-{}", self.id_suffix),
            model: self.model.unwrap_or_else(|| "sandbox".to_string()),
            created: self.created,
            role: "assistant",
            content,
            tool_calls: if self.tool_calls.is_empty() { None } else { Some(self.tool_calls) },
            usage: self.usage,
            finish_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrt_protocol::ids::ContextIds;
    use std::sync::Arc;

    fn parser() -> CliStreamParser {
        CliStreamParser::new(Arc::new(ContextIds::new()), 0, "ns1")
    }

    #[test]
    fn text_streaming_emits_message_start_then_text_chunks() {
        let mut parser = parser();
        let events = parser
            .process_line(r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"text":"Hi"}}}"#)
            .unwrap();
        assert!(matches!(events[0], RawStreamEvent::Loading(_)));
        assert!(matches!(events[1], RawStreamEvent::Chunk(ref c) if c.chunk_type == ProviderChunkType::MessageStart));
        assert!(matches!(events[2], RawStreamEvent::Chunk(ref c) if c.chunk_type == ProviderChunkType::Text));
    }

    #[test]
    fn tool_use_closes_initial_bubble_and_opens_tool_bubble() {
        let mut parser = parser();
        parser.initial_loading_bubble();
        let events = parser
            .process_line(r#"{"type":"stream_event","event":{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"t1","name":"Bash"}}}"#)
            .unwrap();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], RawStreamEvent::Loading(_)));
        assert!(matches!(events[1], RawStreamEvent::Loading(_)));
        assert!(matches!(events[2], RawStreamEvent::Chunk(ref c) if c.chunk_type == ProviderChunkType::MessageStart));
        assert!(matches!(events[3], RawStreamEvent::Chunk(ref c) if c.chunk_type == ProviderChunkType::ToolCall));
    }

    #[test]
    fn tool_input_accumulates_and_finalizes_on_stop() {
        let mut parser = parser();
        parser
            .process_line(r#"{"type":"stream_event","event":{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"t1","name":"Bash"}}}"#)
            .unwrap();
        parser
            .process_line(r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"partial_json":"{\"command\":"}}}"#)
            .unwrap();
        parser
            .process_line(r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"partial_json":"\"ls -la\"}"}}}"#)
            .unwrap();
        let events = parser.process_line(r#"{"type":"stream_event","event":{"type":"content_block_stop","index":0}}"#).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], RawStreamEvent::Loading(_)));
        let RawStreamEvent::Chunk(chunk) = &events[1] else { panic!("expected a chunk") };
        assert_eq!(chunk.chunk_type, ProviderChunkType::ToolCall);
        let payload: Value = serde_json::from_slice(&chunk.data).unwrap();
        assert_eq!(payload[0]["function"]["arguments"], "{\"command\":\"ls -la\"}");
    }

    #[test]
    fn tool_call_is_recorded_once_from_the_final_assistant_message() {
        let mut parser = parser();
        parser
            .process_line(r#"{"type":"stream_event","event":{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"t1","name":"Bash"}}}"#)
            .unwrap();
        parser
            .process_line(r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"partial_json":"{\"command\":\"ls -la\"}"}}}"#)
            .unwrap();
        parser
            .process_line(r#"{"type":"stream_event","event":{"type":"content_block_stop","index":0}}"#)
            .unwrap();
        parser
            .process_line(r#"{"type":"assistant","message":{"stop_reason":"tool_use","content":[{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"ls -la"}}]}}"#)
            .unwrap();
        let response = parser.finish();
        let tool_calls = response.tool_calls.expect("expected tool calls");
        assert_eq!(tool_calls.len(), 1);
        assert_eq!(tool_calls[0].function.name, "Bash");
        assert_eq!(response.finish_reason, "tool_calls");
    }

    #[test]
    fn result_error_propagates() {
        let mut parser = parser();
        let err = parser.process_line(r#"{"type":"result","is_error":true,"result":"boom"}"#).unwrap_err();
        assert_eq!(err, "boom");
    }

    #[test]
    fn result_finalizes_completion_response() {
        let mut parser = parser();
        parser.process_line(r#"{"type":"system","model":"claude-x"}"#).unwrap();
        parser
            .process_line(r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"text":"Hello"}}}"#)
            .unwrap();
        parser.process_line(r#"{"type":"result","is_error":false,"result":"Hello"}"#).unwrap();
        let response = parser.finish();
        assert_eq!(response.model, "claude-x");
        assert_eq!(response.content, "Hello");
        assert_eq!(response.finish_reason, "stop");
        assert!(response.id.starts_with("sandbox-"));
    }

    #[test]
    fn malformed_line_is_skipped_not_fatal() {
        let mut parser = parser();
        let events = parser.process_line("not json at all").unwrap();
        assert!(events.is_empty());
    }
}
