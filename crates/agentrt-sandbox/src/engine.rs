//! `ContainerEngine`: the external-collaborator seam for whatever backend
//! actually runs containers, exposing create/exec/stream/copy/file-io
//! primitives without committing to Docker, gVisor, or anything else.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// A bind mount from a host path to a guest path.
#[derive(Debug, Clone)]
pub struct BindMount {
    pub host_path: PathBuf,
    pub guest_path: PathBuf,
    pub read_only: bool,
}

/// Parameters for creating one sandbox container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub key: String,
    pub mounts: Vec<BindMount>,
}

#[derive(Debug, Clone)]
pub struct FileInfo {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// The primitives a concrete container backend (Docker, gVisor, Firecracker,
/// …) must expose. `container_id` is an opaque handle returned by `create`.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn create(&self, spec: &ContainerSpec) -> anyhow::Result<String>;

    async fn exec(&self, container_id: &str, argv: &[String]) -> anyhow::Result<Vec<u8>>;

    /// Start a long-running process and return a handle to its stdout
    /// stream. Used for launching the coding-agent CLI.
    async fn stream(
        &self,
        container_id: &str,
        argv: &[String],
    ) -> anyhow::Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>>;

    async fn read_file(&self, container_id: &str, path: &Path) -> anyhow::Result<Vec<u8>>;

    async fn write_file(&self, container_id: &str, path: &Path, bytes: &[u8]) -> anyhow::Result<()>;

    async fn list_dir(&self, container_id: &str, path: &Path) -> anyhow::Result<Vec<FileInfo>>;

    async fn copy_to_container(&self, container_id: &str, host_path: &Path, guest_path: &Path) -> anyhow::Result<()>;

    async fn kill_process(&self, container_id: &str, name: &str) -> anyhow::Result<()>;

    async fn remove(&self, container_id: &str) -> anyhow::Result<()>;
}
