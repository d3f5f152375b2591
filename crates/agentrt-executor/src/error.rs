//! Error taxonomy for the executor crate: CLI invocation failures,
//! attachment resolution failures, and hook failures, each its own
//! `thiserror` enum.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("coding-agent CLI exited with non-zero status {0}")]
    NonZeroExit(i32),

    #[error("coding-agent CLI reported an error result: {0}")]
    ResultError(String),

    #[error("failed to parse CLI stream-json line: {0}")]
    UnparseableOutput(String),

    #[error("sandbox resource error: {0}")]
    Sandbox(#[from] agentrt_sandbox::SandboxError),

    #[error("container operation failed: {0}")]
    Container(#[source] anyhow::Error),

    #[error("io error launching CLI: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("no attachment manager registered for uploader '{0}'")]
    UnknownUploader(String),

    #[error("failed to fetch attachment bytes: {0}")]
    FetchFailed(#[source] anyhow::Error),

    #[error("failed to write attachment into workspace: {0}")]
    WriteFailed(#[source] std::io::Error),
}

/// `Create`/`Next` hook failures. `Create` errors abort the request;
/// `Next` errors are logged and do not replace the response — callers
/// enforce that policy, this type only carries the failure.
#[derive(Debug, Error)]
#[error("hook '{hook}' failed: {source}")]
pub struct HookError {
    pub hook: String,
    #[source]
    pub source: anyhow::Error,
}
