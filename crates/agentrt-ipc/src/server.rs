//! Unix-socket JSON-RPC server loop and the `IpcSessionFactory` adapter
//! binding it into the sandbox manager: starts an IPC session bound to the
//! sandbox's socket.

use crate::rpc::{RpcRequest, RpcResponse};
use crate::session::{IpcSession, ToolExecutor};
use agentrt_sandbox::error::SandboxError;
use agentrt_sandbox::manager::{IpcSessionFactory, IpcSessionHandle};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

pub struct UnixSocketIpcFactory {
    executor: Arc<dyn ToolExecutor>,
}

impl UnixSocketIpcFactory {
    pub fn new(executor: Arc<dyn ToolExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl IpcSessionFactory for UnixSocketIpcFactory {
    async fn start(&self, socket_path: &Path) -> Result<Arc<dyn IpcSessionHandle>, SandboxError> {
        let _ = tokio::fs::remove_file(socket_path).await;
        let listener = UnixListener::bind(socket_path).map_err(|e| SandboxError::SocketSetup {
            path: socket_path.to_path_buf(),
            source: e,
        })?;

        let session = Arc::new(IpcSession::new(socket_path.to_path_buf(), self.executor.clone()));
        let accept_session = session.clone();
        tokio::spawn(async move {
            serve(listener, accept_session).await;
        });

        Ok(session)
    }
}

async fn serve(listener: UnixListener, session: Arc<IpcSession>) {
    loop {
        let (stream, _addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(error = %err, "ipc listener accept failed");
                return;
            }
        };
        let session = session.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, session).await {
                tracing::warn!(error = %err, "ipc connection closed with error");
            }
        });
    }
}

async fn handle_connection(stream: UnixStream, session: Arc<IpcSession>) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => session.handle(request).await,
            Err(err) => RpcResponse::err(serde_json::Value::Null, crate::rpc::ERROR_INVALID_PARAMS, err.to_string()),
        };
        let mut encoded = serde_json::to_vec(&response).unwrap_or_default();
        encoded.push(b'\n');
        write_half.write_all(&encoded).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::METHOD_TOOLS_LIST;
    use crate::session::ToolExecutor;
    use serde_json::{json, Value};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct NoopExecutor;

    #[async_trait]
    impl ToolExecutor for NoopExecutor {
        async fn call(&self, _name: &str, _arguments: Value) -> Result<Value, String> {
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn round_trips_a_tools_list_request_over_the_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        let factory = UnixSocketIpcFactory::new(Arc::new(NoopExecutor));
        let handle = factory.start(&socket_path).await.unwrap();
        assert_eq!(handle.socket_path(), socket_path.as_path());

        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        let request = RpcRequest {
            jsonrpc: "2.0".to_string(),
            id: json!(1),
            method: METHOD_TOOLS_LIST.to_string(),
            params: Value::Null,
        };
        let mut line = serde_json::to_vec(&request).unwrap();
        line.push(b'\n');
        stream.write_all(&line).await.unwrap();

        let mut buf = vec![0u8; 4096];
        let n = stream.read(&mut buf).await.unwrap();
        let response: RpcResponse = serde_json::from_slice(&buf[..n]).unwrap();
        assert!(response.error.is_none());
        assert_eq!(response.result.unwrap()["tools"].as_array().unwrap().len(), 0);
    }
}
