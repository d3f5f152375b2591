//! IPC bridge and MCP pass-through: JSON-RPC 2.0 over a Unix stream socket,
//! host-side `tools/list`/`tools/call`, and a runtime-mutable MCP tool set.

pub mod rpc;
pub mod server;
pub mod session;
pub mod types;

pub use rpc::{RpcError, RpcRequest, RpcResponse};
pub use server::UnixSocketIpcFactory;
pub use session::{IpcSession, ToolExecutor};
pub use types::{FunctionTool, McpTool, ParameterProperty, ParametersSchema};
