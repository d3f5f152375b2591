//! Universal streaming message protocol: the [`Message`] DSL, hierarchical
//! chunk/message/block/thread identifiers, and the pluggable client
//! [`dialect`] adapters that convert it to a wire representation.

pub mod dialect;
pub mod ids;
pub mod message;

pub use dialect::{Dialect, DialectRegistry, cui::CuiDialect, openai::OpenAiDialect};
pub use ids::ContextIds;
pub use message::{DeltaAction, Message, MessageType};
