//! Sandbox manager: indexed container handles keyed by `(user_id,
//! chat_id)`, double-checked-locking `get_or_create`, and workspace
//! lifecycle sweeping.
//!
//! The underlying container engine and IPC session startup are external
//! collaborators reached through the [`ContainerEngine`] and
//! [`IpcSessionFactory`] trait seams; this crate owns only the bookkeeping
//! around them.

pub mod engine;
pub mod error;
pub mod manager;
pub mod workspace;

pub use engine::{ContainerEngine, ContainerSpec, FileInfo};
pub use error::SandboxError;
pub use manager::{IpcSessionFactory, IpcSessionHandle, SandboxHandle, SandboxKey, SandboxManager};
pub use workspace::{sweep_stale_workspaces, WorkspacePolicy};
