//! Coding-agent executor: sandboxed CLI invocation, stream-JSON parsing
//! into the universal message protocol, attachment resolution, and the
//! loading-bubble protocol.

pub mod attachments;
pub mod cancellation;
pub mod environment;
pub mod error;
pub mod executor;
pub mod loading;
pub mod stream_parse;

pub use attachments::{AttachmentManager, AttachmentResolver, FetchedAttachment};
pub use cancellation::{ExecutionCancellation, InterruptController, NeverInterrupted};
pub use environment::{ConnectorConfig, McpBridgeConfig};
pub use error::{AttachmentError, CliError, HookError};
pub use executor::{CodingAgentExecutor, ContentPart, ConversationMessage, ExecuteOptions, Executor, Role, StreamHandler};
pub use loading::LoadingTracker;
pub use stream_parse::{CliStreamParser, CompletionResponse, FunctionCall, ToolCall, Usage};
