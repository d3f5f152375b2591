//! The `Executor` contract and its sandbox-backed implementation, tying
//! together the sandbox manager, environment preparation, attachment
//! resolution, CLI stream parsing, and cancellation.

use crate::attachments::{AttachmentManager, AttachmentResolver};
use crate::cancellation::{ExecutionCancellation, InterruptController};
use crate::environment::{
    copy_skills, prepare_proxy, write_mcp_config, ConnectorConfig, McpBridgeConfig, GUEST_PROXY_ADDR,
};
use crate::error::CliError;
use crate::stream_parse::{CliStreamParser, CompletionResponse, RawStreamEvent};
use agentrt_ipc::{IpcSession, McpTool};
use agentrt_protocol::ids::ContextIds;
use agentrt_protocol::message::Message;
use agentrt_sandbox::engine::FileInfo;
use agentrt_sandbox::manager::SandboxHandle;
use agentrt_sandbox::SandboxManager;
use agentrt_stream::{ProviderChunk, ProviderChunkType, StreamMachine};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    fn as_cli_type(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub enum ContentPart {
    Text(String),
    /// A direct http(s) image URL, lowered to `[Image: <url>]` text —
    /// distinct from an opaque attachment reference.
    ImageUrl(String),
    /// An opaque `<uploader>://<id>` attachment reference.
    Attachment { url: String, filename: Option<String> },
}

#[derive(Debug, Clone)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

#[derive(Default, Clone)]
pub struct ExecuteOptions {
    pub connector: Option<ConnectorConfig>,
    pub mcp_bridge: Option<McpBridgeConfig>,
    pub mcp_tools: Option<Vec<McpTool>>,
    pub system_prompt: Option<String>,
    pub skills_dir: Option<PathBuf>,
    pub permission_mode: Option<String>,
}

#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn on_message(&self, message: Message);
}

/// `Executor` contract consumed by the assistant layer and in-process hooks.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, messages: &[ConversationMessage], options: &ExecuteOptions) -> Result<CompletionResponse, CliError>;

    async fn stream(
        &self,
        messages: &[ConversationMessage],
        options: &ExecuteOptions,
        cancel: CancellationToken,
        handler: Arc<dyn StreamHandler>,
    ) -> Result<CompletionResponse, CliError>;

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, CliError>;
    async fn write_file(&self, path: &Path, bytes: &[u8]) -> Result<(), CliError>;
    async fn list_dir(&self, path: &Path) -> Result<Vec<FileInfo>, CliError>;
    async fn exec(&self, argv: &[String]) -> Result<Vec<u8>, CliError>;
    fn work_dir(&self) -> &Path;
    async fn close(&self) -> Result<(), CliError>;
}

/// Resolves attachments in one conversation, replacing each user message's
/// content with the spliced text + attachment-reference string. Non-user
/// roles and plain-text user content pass through unchanged.
async fn resolve_attachments(
    messages: &[ConversationMessage],
    workdir: &Path,
    managers: HashMap<String, Arc<dyn AttachmentManager>>,
) -> Result<Vec<(Role, String)>, CliError> {
    let mut resolver = AttachmentResolver::new(managers);
    let mut out = Vec::with_capacity(messages.len());

    for message in messages {
        if message.role != Role::User {
            let text = flatten_plain(&message.content);
            out.push((message.role.clone(), text));
            continue;
        }

        let mut parts = Vec::new();
        for part in &message.content {
            match part {
                ContentPart::Text(text) => parts.push(text.clone()),
                ContentPart::ImageUrl(url) => parts.push(format!("[Image: {url}]")),
                ContentPart::Attachment { url, filename } => {
                    match resolver.resolve(url, workdir, filename.as_deref()).await {
                        Ok(reference) => parts.push(reference),
                        Err(err) => {
                            tracing::warn!(error = %err, url = %url, "attachment resolution failed; falling back to placeholder");
                            parts.push("[Attached file: failed to load]".to_string());
                        }
                    }
                }
            }
        }
        out.push((Role::User, parts.join("\n\n")));
    }

    Ok(out)
}

fn flatten_plain(parts: &[ContentPart]) -> String {
    parts
        .iter()
        .map(|p| match p {
            ContentPart::Text(t) => t.clone(),
            ContentPart::ImageUrl(url) => format!("[Image: {url}]"),
            ContentPart::Attachment { url, .. } => url.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `{type, message: {role, content}}` one-per-line input.
fn build_input_jsonl(messages: &[(Role, String)]) -> String {
    let mut lines = String::new();
    for (role, content) in messages {
        let line = serde_json::json!({
            "type": role.as_cli_type(),
            "message": { "role": role.as_cli_type(), "content": content },
        });
        lines.push_str(&serde_json::to_string(&line).unwrap_or_default());
        lines.push('\n');
    }
    lines
}

/// Heredoc-quoted bash invocation: stdin is supplied via a quoted heredoc
/// so the JSONL payload is never shell-interpolated.
fn build_command(
    input_jsonl: &str,
    system_prompt: Option<&str>,
    mcp_tools_present: bool,
    continuation: bool,
    permission_mode: &str,
    proxy_active: bool,
) -> Vec<String> {
    let mut script = String::new();
    script.push_str("set -e\n");
    script.push_str("cat > /tmp/.yao/input.jsonl <<'YAO_INPUT_EOF'\n");
    script.push_str(input_jsonl);
    script.push_str("YAO_INPUT_EOF\n");

    let mut args = vec![
        "claude".to_string(),
        "--input-format".to_string(),
        "stream-json".to_string(),
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--verbose".to_string(),
        "--include-partial-messages".to_string(),
        "--dangerously-skip-permissions".to_string(),
        "--permission-mode".to_string(),
        permission_mode.to_string(),
    ];

    if let Some(prompt) = system_prompt {
        script.push_str("cat > /tmp/.yao/system_prompt.txt <<'YAO_SYSTEM_EOF'\n");
        script.push_str(prompt);
        script.push_str("\nYAO_SYSTEM_EOF\n");
        args.push("--append-system-prompt-file".to_string());
        args.push("/tmp/.yao/system_prompt.txt".to_string());
    }

    if mcp_tools_present {
        args.push("--allowedTools".to_string());
        args.push("mcp__yao__*".to_string());
    }
    if continuation {
        args.push("--continue".to_string());
    }

    if proxy_active {
        script.push_str(&format!("export ANTHROPIC_BASE_URL=http://{GUEST_PROXY_ADDR}\n"));
        script.push_str("export ANTHROPIC_API_KEY=dummy\n");
    }

    script.push_str(&shell_join(&args));
    script.push_str(" < /tmp/.yao/input.jsonl\n");

    vec!["bash".to_string(), "-c".to_string(), script]
}

fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|a| format!("'{}'", a.replace('\'', "'\\''")))
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct CodingAgentExecutor {
    sandbox: Arc<SandboxManager>,
    ids: Arc<ContextIds>,
    user_id: String,
    chat_id: String,
    attachment_managers: HashMap<String, Arc<dyn AttachmentManager>>,
    interrupt: Arc<dyn InterruptController>,
    thread_override: Option<String>,
    store: Option<Arc<dyn agentrt_stream::MessageStore>>,
}

impl CodingAgentExecutor {
    pub fn new(
        sandbox: Arc<SandboxManager>,
        ids: Arc<ContextIds>,
        user_id: impl Into<String>,
        chat_id: impl Into<String>,
        attachment_managers: HashMap<String, Arc<dyn AttachmentManager>>,
        interrupt: Arc<dyn InterruptController>,
    ) -> Self {
        Self {
            sandbox,
            ids,
            user_id: user_id.into(),
            chat_id: chat_id.into(),
            attachment_managers,
            interrupt,
            thread_override: None,
            store: None,
        }
    }

    pub fn with_thread(mut self, thread_id: Option<String>) -> Self {
        self.thread_override = thread_id;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn agentrt_stream::MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    async fn handle(&self) -> Result<Arc<SandboxHandle>, CliError> {
        self.sandbox.get_or_create(&self.user_id, &self.chat_id).await.map_err(CliError::Sandbox)
    }

    /// Non-empty `.claude/projects/` means a continuation.
    async fn detect_continuation(&self, handle: &SandboxHandle) -> bool {
        handle
            .list_dir(Path::new("/workspace/.claude/projects"))
            .await
            .map(|entries| !entries.is_empty())
            .unwrap_or(false)
    }

    /// Overwrite the runtime MCP-tool set on the current IPC session.
    /// Downcasts through [`agentrt_sandbox::manager::IpcSessionHandle::as_any`]
    /// since that trait deliberately stays narrow.
    async fn set_mcp_tools(&self, handle: &SandboxHandle, tools: Vec<McpTool>) {
        if let Some(session) = handle.ipc().as_any().downcast_ref::<IpcSession>() {
            session.set_tools(tools).await;
        } else {
            tracing::warn!("IPC session handle did not downcast to agentrt_ipc::IpcSession; tool set not applied");
        }
    }
}

#[async_trait]
impl Executor for CodingAgentExecutor {
    async fn execute(&self, messages: &[ConversationMessage], options: &ExecuteOptions) -> Result<CompletionResponse, CliError> {
        struct Discard;
        #[async_trait]
        impl StreamHandler for Discard {
            async fn on_message(&self, _message: Message) {}
        }
        self.stream(messages, options, CancellationToken::new(), Arc::new(Discard)).await
    }

    async fn stream(
        &self,
        messages: &[ConversationMessage],
        options: &ExecuteOptions,
        request_token: CancellationToken,
        handler: Arc<dyn StreamHandler>,
    ) -> Result<CompletionResponse, CliError> {
        let handle = self.handle().await?;
        let cancellation = ExecutionCancellation::new(request_token, self.interrupt.clone());

        if let Some(tools) = options.mcp_tools.clone() {
            self.set_mcp_tools(&handle, tools).await;
        }

        if let Some(connector) = &options.connector {
            prepare_proxy(&handle, connector).await?;
        }
        let proxy_active = options.connector.is_some();

        if let Some(bridge) = &options.mcp_bridge {
            write_mcp_config(&handle, bridge, agentrt_sandbox::manager::GUEST_SOCKET_PATH).await?;
        }
        if let Some(skills_dir) = &options.skills_dir {
            copy_skills(&handle, skills_dir).await?;
        }

        // Skip heuristic: nothing to append, so don't bother materializing a system line.
        if options.system_prompt.is_none() && options.skills_dir.is_none() && options.mcp_bridge.is_none() {
            return Ok(CompletionResponse {
                id: format!("sandbox-skip-{}", self.chat_id),
                model: "sandbox".to_string(),
                created: 0,
                role: "assistant",
                content: String::new(),
                tool_calls: None,
                usage: None,
                finish_reason: "stop",
            });
        }

        let resolved = resolve_attachments(messages, &handle.workspace_dir, self.attachment_managers.clone()).await?;
        let input_jsonl = build_input_jsonl(&resolved);
        let continuation = self.detect_continuation(&handle).await;
        let permission_mode = options.permission_mode.as_deref().unwrap_or("bypassPermissions");
        let argv = build_command(
            &input_jsonl,
            options.system_prompt.as_deref(),
            options.mcp_tools.is_some(),
            continuation,
            permission_mode,
            proxy_active,
        );

        let stdout = handle.stream(&argv).await.map_err(CliError::Container)?;
        let mut lines = BufReader::with_capacity(1024 * 1024, stdout).lines();

        let mut parser = CliStreamParser::new(self.ids.clone(), 0, self.chat_id.clone());
        let mut machine = StreamMachine::new(self.ids.clone()).with_thread(self.thread_override.clone());
        if let Some(store) = &self.store {
            machine = machine.with_store(store.clone(), false);
        }

        handler.on_message(parser.initial_loading_bubble()).await;

        let result = loop {
            let cancel_token = cancellation.token();
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    if let Err(err) = handle.kill_process("claude").await {
                        tracing::warn!(error = %err, "failed to kill claude process on cancellation");
                    }
                    break Err(CliError::NonZeroExit(-1));
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            match parser.process_line(&line) {
                                Ok(events) => {
                                    let mut stopped = false;
                                    for event in events {
                                        match event {
                                            RawStreamEvent::Chunk(chunk) => {
                                                let (status, frames) = machine.process(chunk).await;
                                                for frame in frames {
                                                    handler.on_message(frame).await;
                                                }
                                                if status == agentrt_stream::StreamStatus::Stop {
                                                    stopped = true;
                                                    break;
                                                }
                                            }
                                            RawStreamEvent::Loading(frame) => handler.on_message(frame).await,
                                        }
                                    }
                                    if stopped {
                                        break Err(CliError::ResultError("provider stream reported an error chunk".to_string()));
                                    }
                                }
                                Err(message) => break Err(CliError::ResultError(message)),
                            }
                        }
                        Ok(None) => break Ok(()),
                        Err(err) => break Err(CliError::Io(err)),
                    }
                }
            }
        };

        // The container is reused across requests for this (user, chat) key;
        // only an explicit close() tears it down, not the end of one
        // stream() call.
        result?;
        let _ = machine.process(ProviderChunk::new(ProviderChunkType::StreamEnd, Vec::new())).await;
        Ok(parser.finish())
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, CliError> {
        self.handle().await?.read_file(path).await.map_err(CliError::Container)
    }

    async fn write_file(&self, path: &Path, bytes: &[u8]) -> Result<(), CliError> {
        self.handle().await?.write_file(path, bytes).await.map_err(CliError::Container)
    }

    async fn list_dir(&self, path: &Path) -> Result<Vec<FileInfo>, CliError> {
        self.handle().await?.list_dir(path).await.map_err(CliError::Container)
    }

    async fn exec(&self, argv: &[String]) -> Result<Vec<u8>, CliError> {
        self.handle().await?.exec(argv).await.map_err(CliError::Container)
    }

    fn work_dir(&self) -> &Path {
        Path::new(agentrt_sandbox::manager::GUEST_WORKSPACE_PATH)
    }

    async fn close(&self) -> Result<(), CliError> {
        self.sandbox.remove(&self.user_id, &self.chat_id).await.map_err(CliError::Sandbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_input_jsonl_one_line_per_message() {
        let messages = vec![(Role::User, "hello".to_string()), (Role::Assistant, "hi".to_string())];
        let jsonl = build_input_jsonl(&messages);
        let lines: Vec<&str> = jsonl.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(r#""type":"user""#));
        assert!(lines[1].contains(r#""type":"assistant""#));
    }

    #[test]
    fn build_command_includes_system_prompt_and_tool_allowlist() {
        let argv = build_command("{}\n", Some("be helpful"), true, false, "bypassPermissions", true);
        assert_eq!(argv[0], "bash");
        let script = &argv[2];
        assert!(script.contains("--append-system-prompt-file"));
        assert!(script.contains("mcp__yao__*"));
        assert!(script.contains("ANTHROPIC_BASE_URL"));
        assert!(script.contains("YAO_INPUT_EOF"));
    }

    #[test]
    fn build_command_omits_proxy_env_when_inactive() {
        let argv = build_command("{}\n", None, false, false, "bypassPermissions", false);
        assert!(!argv[2].contains("ANTHROPIC_BASE_URL"));
        assert!(!argv[2].contains("--append-system-prompt-file"));
    }

    #[test]
    fn flatten_plain_joins_text_and_image_markers() {
        let parts = vec![ContentPart::Text("look at".to_string()), ContentPart::ImageUrl("http://x/y.png".to_string())];
        let flat = flatten_plain(&parts);
        assert_eq!(flat, "look at\n[Image: http://x/y.png]");
    }
}
