//! The buffer-storage seam message_end persistence hooks into: if a store
//! is attached and history is not skipped, the complete assistant message
//! is persisted. Kept as a narrow trait since conversation persistence
//! belongs to the embedder, not this core — a concrete store is an
//! external collaborator.

use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Clone)]
pub enum PersistedContent {
    Text(String),
    /// Tool-call content: parsed JSON when the accumulated buffer was
    /// valid JSON, raw string otherwise.
    ToolCalls(Value),
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn persist_assistant_message(&self, message_id: &str, content: PersistedContent);
}
