//! `SandboxResourceError`: container create/exec failure, workspace IO
//! failure, socket chmod failure. Surfaced as a request error; the manager's
//! cleanup path still runs.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to create container for {key}: {source}")]
    ContainerCreate {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("container exec failed: {0}")]
    Exec(#[source] anyhow::Error),

    #[error("workspace io error at {path}: {source}")]
    WorkspaceIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to prepare socket {path}: {source}")]
    SocketSetup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ipc session startup failed: {0}")]
    IpcStartup(#[source] anyhow::Error),

    #[error("no sandbox registered for key {0}")]
    NotFound(String),
}
