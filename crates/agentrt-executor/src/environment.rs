//! Environment preparation: proxy config, MCP server declaration, and
//! skills injection, all written into the sandbox container before the
//! CLI is launched.

use crate::error::CliError;
use agentrt_sandbox::manager::SandboxHandle;
use serde_json::json;
use std::path::{Path, PathBuf};

pub const GUEST_PROXY_CONFIG_PATH: &str = "/tmp/.yao/proxy.json";
pub const GUEST_PROXY_ADDR: &str = "127.0.0.1:3456";
pub const PROXY_STARTER_BIN: &str = "start-claude-proxy";
pub const BRIDGE_SERVER_NAME: &str = "yao";

#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct McpBridgeConfig {
    /// Path (inside the guest) to the bridge binary the CLI invokes.
    pub bridge_binary_path: String,
}

fn ensure_chat_completions_suffix(host: &str) -> String {
    let trimmed = host.trim_end_matches('/');
    if trimmed.ends_with("/chat/completions") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/chat/completions")
    }
}

/// Writes `/tmp/.yao/proxy.json` (outside the workspace, to keep the
/// connector's api key out of any workspace file the CLI can see) and
/// best-effort starts the in-image proxy starter.
pub async fn prepare_proxy(handle: &SandboxHandle, connector: &ConnectorConfig) -> Result<(), CliError> {
    let config = json!({
        "backend": ensure_chat_completions_suffix(&connector.host),
        "api_key": connector.api_key,
        "model": connector.model,
    });
    let bytes = serde_json::to_vec(&config).map_err(|e| CliError::UnparseableOutput(e.to_string()))?;
    handle
        .write_file(Path::new(GUEST_PROXY_CONFIG_PATH), &bytes)
        .await
        .map_err(CliError::Container)?;

    if let Err(err) = handle.exec(&[PROXY_STARTER_BIN.to_string()]).await {
        tracing::debug!(error = %err, "proxy starter not present or failed to start; continuing without it");
    }
    Ok(())
}

/// Writes `<workdir>/.mcp.json` declaring a single server named `yao` that
/// invokes the bridge binary against the guest socket path.
pub async fn write_mcp_config(handle: &SandboxHandle, bridge: &McpBridgeConfig, guest_socket_path: &str) -> Result<(), CliError> {
    let config = json!({
        "mcpServers": {
            BRIDGE_SERVER_NAME: {
                "command": bridge.bridge_binary_path,
                "args": [guest_socket_path],
            }
        }
    });
    let bytes = serde_json::to_vec_pretty(&config).map_err(|e| CliError::UnparseableOutput(e.to_string()))?;
    let path = PathBuf::from("/workspace").join(".mcp.json");
    handle.write_file(&path, &bytes).await.map_err(CliError::Container)
}

/// Copies `skills_dir`'s contents under `<workdir>/.claude/`, preserving
/// layout, so the CLI finds skills at `.claude/skills/<name>/SKILL.md`.
pub async fn copy_skills(handle: &SandboxHandle, skills_dir: &Path) -> Result<(), CliError> {
    let mut stack = vec![skills_dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(CliError::Io)?;
        while let Some(entry) = entries.next_entry().await.map_err(CliError::Io)? {
            let path = entry.path();
            let relative = path.strip_prefix(skills_dir).unwrap_or(&path);
            let guest_path = PathBuf::from("/workspace/.claude/skills").join(relative);
            if entry.file_type().await.map_err(CliError::Io)?.is_dir() {
                stack.push(path);
            } else {
                handle
                    .copy_to_container(&path, &guest_path)
                    .await
                    .map_err(CliError::Container)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_is_appended_when_missing() {
        assert_eq!(ensure_chat_completions_suffix("https://api.example.com"), "https://api.example.com/chat/completions");
    }

    #[test]
    fn suffix_is_not_duplicated() {
        assert_eq!(
            ensure_chat_completions_suffix("https://api.example.com/chat/completions"),
            "https://api.example.com/chat/completions"
        );
    }

    #[test]
    fn trailing_slash_is_stripped_before_appending() {
        assert_eq!(ensure_chat_completions_suffix("https://api.example.com/"), "https://api.example.com/chat/completions");
    }
}
