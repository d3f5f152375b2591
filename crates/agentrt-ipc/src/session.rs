//! Host-side IPC session: exposes `tools/list`/`tools/call` against a
//! runtime-mutable MCP tool set. Writers (`set_tools`) replace the map
//! atomically; readers observe either the old or the new map in full.

use crate::rpc::{
    ERROR_INTERNAL, ERROR_INVALID_PARAMS, ERROR_METHOD_NOT_FOUND, METHOD_TOOLS_CALL,
    METHOD_TOOLS_LIST, RpcError, RpcRequest, RpcResponse,
};
use crate::types::McpTool;
use agentrt_sandbox::manager::IpcSessionHandle;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Dispatches a `tools/call` to its concrete implementation.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn call(&self, name: &str, arguments: Value) -> Result<Value, String>;
}

pub struct IpcSession {
    socket_path: PathBuf,
    tools: RwLock<HashMap<String, McpTool>>,
    executor: Arc<dyn ToolExecutor>,
}

impl IpcSession {
    pub fn new(socket_path: PathBuf, executor: Arc<dyn ToolExecutor>) -> Self {
        Self {
            socket_path,
            tools: RwLock::new(HashMap::new()),
            executor,
        }
    }

    /// Overwrites the tool set. Each request may overwrite the set before
    /// launching the CLI.
    pub async fn set_tools(&self, tools: Vec<McpTool>) {
        let mut map = self.tools.write().await;
        map.clear();
        map.extend(tools.into_iter().map(|t| (t.name.clone(), t)));
    }

    pub async fn tools_list(&self) -> Value {
        let map = self.tools.read().await;
        let tools: Vec<Value> = map
            .values()
            .map(|t| json!({ "name": t.name, "schema": t.schema }))
            .collect();
        json!({ "tools": tools })
    }

    async fn tools_call(&self, params: &Value) -> Result<Value, RpcError> {
        let name = params
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RpcError { code: ERROR_INVALID_PARAMS, message: "missing 'name'".into() })?;
        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

        {
            let map = self.tools.read().await;
            if !map.contains_key(name) {
                return Err(RpcError {
                    code: ERROR_INVALID_PARAMS,
                    message: format!("unknown tool '{name}'"),
                });
            }
        }

        self.executor
            .call(name, arguments)
            .await
            .map_err(|message| RpcError { code: ERROR_INTERNAL, message })
    }

    /// Handle one decoded JSON-RPC request.
    pub async fn handle(&self, request: RpcRequest) -> RpcResponse {
        match request.method.as_str() {
            METHOD_TOOLS_LIST => RpcResponse::ok(request.id, self.tools_list().await),
            METHOD_TOOLS_CALL => match self.tools_call(&request.params).await {
                Ok(result) => RpcResponse::ok(request.id, json!({ "result": result })),
                Err(err) => RpcResponse { jsonrpc: "2.0".to_string(), id: request.id, result: None, error: Some(err) },
            },
            other => RpcResponse::err(request.id, ERROR_METHOD_NOT_FOUND, format!("unknown method '{other}'")),
        }
    }
}

impl IpcSessionHandle for IpcSession {
    fn socket_path(&self) -> &Path {
        &self.socket_path
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
