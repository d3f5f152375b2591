//! Stream state machine: consumes raw provider chunks and turns them into
//! the universal [`agentrt_protocol::Message`] delta/lifecycle stream.

pub mod chunk;
pub mod machine;
pub mod store;

pub use chunk::{ProviderChunk, ProviderChunkType, StreamStatus};
pub use machine::StreamMachine;
pub use store::{MessageStore, PersistedContent};
