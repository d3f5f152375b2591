//! OpenAI-compatible SSE dialect.

use super::{Converter, Dialect, DialectRegistry, Frame};
use crate::message::{Message, MessageType};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

type LinkTransformer = Arc<dyn Fn(&str) -> String + Send + Sync>;

struct SharedState {
    id: String,
    model: String,
    created: i64,
    /// Whether the downstream model supports a `reasoning_content` channel;
    /// gates where the `stream_start` trace link is rendered.
    reasoning_capable: bool,
    role_sent: AtomicBool,
    link_transformer: Option<LinkTransformer>,
}

impl SharedState {
    fn apply_link(&self, url: &str) -> String {
        match &self.link_transformer {
            Some(f) => f(url),
            None => url.to_string(),
        }
    }

    fn chunk(&self, delta: Value) -> Frame {
        Frame::Json(json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": Value::Null,
            }],
        }))
    }

    /// Adds `"role": "assistant"` to `delta` the first time a text or
    /// thinking delta is emitted, and never again.
    fn maybe_role(&self, delta: &mut Map<String, Value>) {
        if !self.role_sent.swap(true, Ordering::SeqCst) {
            delta.insert("role".to_string(), json!("assistant"));
        }
    }
}

fn str_prop<'a>(msg: &'a Message, key: &str) -> &'a str {
    msg.props.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

fn convert_text(state: &Arc<SharedState>, msg: &Message) -> Vec<Frame> {
    let mut delta = Map::new();
    state.maybe_role(&mut delta);
    delta.insert("content".to_string(), json!(str_prop(msg, "content")));
    vec![state.chunk(Value::Object(delta))]
}

fn convert_thinking(state: &Arc<SharedState>, msg: &Message) -> Vec<Frame> {
    let mut delta = Map::new();
    state.maybe_role(&mut delta);
    delta.insert(
        "reasoning_content".to_string(),
        json!(str_prop(msg, "content")),
    );
    vec![state.chunk(Value::Object(delta))]
}

fn convert_loading(state: &Arc<SharedState>, msg: &Message) -> Vec<Frame> {
    let mut delta = Map::new();
    delta.insert(
        "reasoning_content".to_string(),
        json!(str_prop(msg, "message")),
    );
    vec![state.chunk(Value::Object(delta))]
}

/// Builds an OpenAI-style incremental `tool_calls` delta from the flat
/// per-call props the stream machine emits: `id`/`type`/`name`/`index` on
/// the first chunk, `arguments` fragments on every chunk after.
fn convert_tool_call(state: &Arc<SharedState>, msg: &Message) -> Vec<Frame> {
    if let Some(calls) = msg.props.get("calls") {
        let mut delta = Map::new();
        delta.insert("tool_calls".to_string(), calls.clone());
        return vec![state.chunk(Value::Object(delta))];
    }

    let index = msg.props.get("index").cloned().unwrap_or(json!(0));
    let mut function = Map::new();
    if let Some(name) = msg.props.get("name") {
        function.insert("name".to_string(), name.clone());
    }
    if let Some(arguments) = msg.props.get("arguments") {
        function.insert("arguments".to_string(), arguments.clone());
    }

    let mut tool_call = Map::new();
    tool_call.insert("index".to_string(), index);
    if let Some(id) = msg.props.get("id") {
        tool_call.insert("id".to_string(), id.clone());
        tool_call.insert("type".to_string(), json!("function"));
    }
    if !function.is_empty() {
        tool_call.insert("function".to_string(), Value::Object(function));
    }

    let mut delta = Map::new();
    delta.insert("tool_calls".to_string(), json!([Value::Object(tool_call)]));
    vec![state.chunk(Value::Object(delta))]
}

fn convert_error(_state: &Arc<SharedState>, msg: &Message) -> Vec<Frame> {
    let message = str_prop(msg, "message").to_string();
    let error_type = {
        let t = str_prop(msg, "type");
        if t.is_empty() { "stream_error" } else { t }.to_string()
    };
    let code = msg.props.get("code").cloned().unwrap_or(Value::Null);
    vec![Frame::Json(json!({
        "error": { "message": message, "type": error_type, "code": code },
    }))]
}

fn link_template(msg_type: MessageType, url: &str) -> String {
    match msg_type {
        MessageType::Audio => format!("[audio]({url})"),
        MessageType::Video => format!("[video]({url})"),
        _ => format!("[file]({url})"),
    }
}

fn convert_image(state: &Arc<SharedState>, msg: &Message) -> Vec<Frame> {
    let url = state.apply_link(str_prop(msg, "url"));
    let alt = {
        let a = str_prop(msg, "alt");
        if a.is_empty() { "image" } else { a }
    };
    let mut delta = Map::new();
    delta.insert("content".to_string(), json!(format!("![{alt}]({url})")));
    vec![state.chunk(Value::Object(delta))]
}

fn convert_av_or_unknown(msg_type: MessageType) -> impl Fn(&Arc<SharedState>, &Message) -> Vec<Frame> {
    move |state, msg| {
        let url = state.apply_link(str_prop(msg, "url"));
        let mut delta = Map::new();
        delta.insert("content".to_string(), json!(link_template(msg_type, &url)));
        vec![state.chunk(Value::Object(delta))]
    }
}

fn convert_action(_state: &Arc<SharedState>, _msg: &Message) -> Vec<Frame> {
    Vec::new()
}

fn convert_event(state: &Arc<SharedState>, msg: &Message) -> Vec<Frame> {
    if str_prop(msg, "event") != "stream_start" {
        return Vec::new();
    }
    let trace_id = msg
        .props
        .get("data")
        .and_then(|d| d.get("trace_id"))
        .and_then(|v| v.as_str());
    let Some(trace_id) = trace_id else {
        return Vec::new();
    };
    let link = format!("[trace]({trace_id})");
    let mut delta = Map::new();
    let key = if state.reasoning_capable {
        "reasoning_content"
    } else {
        "content"
    };
    delta.insert(key.to_string(), json!(link));
    vec![state.chunk(Value::Object(delta))]
}

/// Converts the universal [`Message`] DSL to OpenAI `chat.completion.chunk`
/// SSE frames. Stateful: tracks whether the `role` field has already
/// been sent so it appears exactly once.
pub struct OpenAiDialect {
    state: Arc<SharedState>,
    registry: DialectRegistry,
}

impl OpenAiDialect {
    pub fn new(id: impl Into<String>, model: impl Into<String>, created: i64) -> Self {
        Self::with_options(id, model, created, false, None)
    }

    pub fn with_options(
        id: impl Into<String>,
        model: impl Into<String>,
        created: i64,
        reasoning_capable: bool,
        link_transformer: Option<LinkTransformer>,
    ) -> Self {
        let state = Arc::new(SharedState {
            id: id.into(),
            model: model.into(),
            created,
            reasoning_capable,
            role_sent: AtomicBool::new(false),
            link_transformer,
        });
        let registry = Self::default_registry(&state);
        Self { state, registry }
    }

    fn default_registry(state: &Arc<SharedState>) -> DialectRegistry {
        macro_rules! converter {
            ($f:expr) => {{
                let state = state.clone();
                Arc::new(move |msg: &Message| $f(&state, msg)) as Converter
            }};
        }
        let mut registry = DialectRegistry::new(converter!(convert_action));
        registry.register(MessageType::Text, converter!(convert_text));
        registry.register(MessageType::Thinking, converter!(convert_thinking));
        registry.register(MessageType::Loading, converter!(convert_loading));
        registry.register(MessageType::ToolCall, converter!(convert_tool_call));
        registry.register(MessageType::Error, converter!(convert_error));
        registry.register(MessageType::Image, converter!(convert_image));
        {
            let state = state.clone();
            let f = convert_av_or_unknown(MessageType::Audio);
            registry.register(MessageType::Audio, Arc::new(move |msg| f(&state, msg)));
        }
        {
            let state = state.clone();
            let f = convert_av_or_unknown(MessageType::Video);
            registry.register(MessageType::Video, Arc::new(move |msg| f(&state, msg)));
        }
        registry.register(MessageType::Action, converter!(convert_action));
        registry.register(MessageType::UserInput, converter!(convert_action));
        registry.register(MessageType::Event, converter!(convert_event));
        registry
    }

    /// Overrides (or adds) the conversion for one message type, e.g. to use
    /// a custom link template.
    pub fn register_override(&mut self, msg_type: MessageType, converter: Converter) {
        self.registry.register(msg_type, converter);
    }
}

impl Dialect for OpenAiDialect {
    fn adapt(&self, msg: &Message) -> Vec<Frame> {
        self.registry.convert(msg)
    }

    fn supports_type(&self, msg_type: MessageType) -> bool {
        !matches!(msg_type, MessageType::Action | MessageType::UserInput)
    }

    fn finalize(&self) -> Vec<Frame> {
        vec![Frame::Done]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn dialect() -> OpenAiDialect {
        OpenAiDialect::new("chatcmpl-1", "gpt-4o-mini", 1_700_000_000)
    }

    #[test]
    fn text_delta_round_trips_content() {
        let d = dialect();
        let msg = Message::content_delta(MessageType::Text, "X");
        let frames = d.adapt(&msg);
        assert_eq!(frames.len(), 1);
        let Frame::Json(v) = &frames[0] else {
            panic!("expected json frame")
        };
        assert_eq!(v["choices"][0]["delta"]["content"], "X");
        assert_eq!(v["choices"][0]["delta"]["role"], "assistant");
    }

    #[test]
    fn role_is_sent_once() {
        let d = dialect();
        let first = d.adapt(&Message::content_delta(MessageType::Text, "a"));
        let second = d.adapt(&Message::content_delta(MessageType::Text, "b"));
        let Frame::Json(v1) = &first[0] else { unreachable!() };
        let Frame::Json(v2) = &second[0] else { unreachable!() };
        assert_eq!(v1["choices"][0]["delta"]["role"], "assistant");
        assert!(v2["choices"][0]["delta"].get("role").is_none());
    }

    #[test]
    fn action_is_silent() {
        let d = dialect();
        let msg = Message::new(MessageType::Action, Map::new());
        assert!(d.adapt(&msg).is_empty());
    }

    #[test]
    fn tool_call_first_chunk_carries_id_and_name() {
        let d = dialect();
        let mut props = Map::new();
        props.insert("id".into(), json!("c1"));
        props.insert("type".into(), json!("function"));
        props.insert("index".into(), json!(0));
        props.insert("name".into(), json!("search"));
        let msg = Message::new(MessageType::ToolCall, props);
        let frames = d.adapt(&msg);
        let Frame::Json(v) = &frames[0] else {
            unreachable!()
        };
        let tc = &v["choices"][0]["delta"]["tool_calls"][0];
        assert_eq!(tc["id"], "c1");
        assert_eq!(tc["type"], "function");
        assert_eq!(tc["function"]["name"], "search");
    }

    #[test]
    fn tool_call_continuation_carries_only_arguments() {
        let d = dialect();
        let mut props = Map::new();
        props.insert("index".into(), json!(0));
        props.insert("arguments".into(), json!("{\"q\":"));
        let msg = Message::new(MessageType::ToolCall, props);
        let frames = d.adapt(&msg);
        let Frame::Json(v) = &frames[0] else {
            unreachable!()
        };
        let tc = &v["choices"][0]["delta"]["tool_calls"][0];
        assert!(tc.get("id").is_none());
        assert_eq!(tc["function"]["arguments"], "{\"q\":");
    }

    #[test]
    fn finalize_yields_done_sentinel() {
        let d = dialect();
        assert_eq!(d.finalize(), vec![Frame::Done]);
    }

    #[test]
    fn stream_start_with_trace_id_renders_link() {
        let d = dialect();
        let mut props = Map::new();
        props.insert("event".into(), json!("stream_start"));
        props.insert("data".into(), json!({"trace_id": "T1"}));
        let msg = Message::event(props);
        let frames = d.adapt(&msg);
        let Frame::Json(v) = &frames[0] else {
            panic!("expected a rendered frame")
        };
        assert!(
            v["choices"][0]["delta"]["content"]
                .as_str()
                .unwrap()
                .contains("T1")
        );
    }

    #[test]
    fn other_events_are_silent() {
        let d = dialect();
        let mut props = Map::new();
        props.insert("event".into(), json!("message_end"));
        let msg = Message::event(props);
        assert!(d.adapt(&msg).is_empty());
    }
}
