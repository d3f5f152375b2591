//! `SandboxManager`: indexed map keyed by `(user_id, chat_id)`, with
//! double-checked locking on `get_or_create` so two concurrent requests for
//! the same key never race each other into creating two containers.

use crate::engine::{BindMount, ContainerEngine, ContainerSpec, FileInfo};
use crate::error::SandboxError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

pub type SandboxKey = (String, String);

/// A started IPC session bound to one sandbox's socket. Narrow trait so this
/// crate need not depend on `agentrt-ipc`'s concrete session type.
pub trait IpcSessionHandle: Send + Sync {
    fn socket_path(&self) -> &Path;

    /// Lets a caller that knows the concrete session type (e.g. to call a
    /// tool-set setter `agentrt-sandbox` has no business knowing about)
    /// downcast without widening this trait's contract.
    fn as_any(&self) -> &dyn std::any::Any;
}

#[async_trait::async_trait]
pub trait IpcSessionFactory: Send + Sync {
    async fn start(&self, socket_path: &Path) -> Result<Arc<dyn IpcSessionHandle>, SandboxError>;
}

/// One live sandbox: its container handle, workspace, and bound IPC session.
pub struct SandboxHandle {
    pub key: SandboxKey,
    pub container_id: String,
    pub workspace_dir: PathBuf,
    pub socket_path: PathBuf,
    ipc: Arc<dyn IpcSessionHandle>,
    engine: Arc<dyn ContainerEngine>,
}

impl SandboxHandle {
    pub fn ipc(&self) -> &Arc<dyn IpcSessionHandle> {
        &self.ipc
    }

    pub async fn exec(&self, argv: &[String]) -> anyhow::Result<Vec<u8>> {
        self.engine.exec(&self.container_id, argv).await
    }

    pub async fn stream(
        &self,
        argv: &[String],
    ) -> anyhow::Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>> {
        self.engine.stream(&self.container_id, argv).await
    }

    pub async fn read_file(&self, path: &Path) -> anyhow::Result<Vec<u8>> {
        self.engine.read_file(&self.container_id, path).await
    }

    pub async fn write_file(&self, path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
        self.engine.write_file(&self.container_id, path, bytes).await
    }

    pub async fn list_dir(&self, path: &Path) -> anyhow::Result<Vec<FileInfo>> {
        self.engine.list_dir(&self.container_id, path).await
    }

    pub async fn copy_to_container(&self, host_path: &Path, guest_path: &Path) -> anyhow::Result<()> {
        self.engine.copy_to_container(&self.container_id, host_path, guest_path).await
    }

    pub async fn kill_process(&self, name: &str) -> anyhow::Result<()> {
        self.engine.kill_process(&self.container_id, name).await
    }
}

/// Conventional guest-side mount points.
pub const GUEST_WORKSPACE_PATH: &str = "/workspace";
pub const GUEST_SOCKET_PATH: &str = "/tmp/yao.sock";

pub struct SandboxManager {
    engine: Arc<dyn ContainerEngine>,
    ipc_factory: Arc<dyn IpcSessionFactory>,
    data_root: PathBuf,
    sandboxes: RwLock<HashMap<SandboxKey, Arc<SandboxHandle>>>,
}

impl SandboxManager {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        ipc_factory: Arc<dyn IpcSessionFactory>,
        data_root: PathBuf,
    ) -> Self {
        Self {
            engine,
            ipc_factory,
            data_root,
            sandboxes: RwLock::new(HashMap::new()),
        }
    }

    fn workspace_dir(&self, key: &SandboxKey) -> PathBuf {
        self.data_root.join("workspaces").join(&key.0).join(&key.1)
    }

    fn socket_path(&self, key: &SandboxKey) -> PathBuf {
        self.data_root.join("sockets").join(format!("{}-{}.sock", key.0, key.1))
    }

    /// Double-checked get-or-create: an unlocked read lookup first, then a
    /// write-locked lookup-and-create on miss.
    pub async fn get_or_create(&self, user_id: &str, chat_id: &str) -> Result<Arc<SandboxHandle>, SandboxError> {
        let key: SandboxKey = (user_id.to_string(), chat_id.to_string());

        if let Some(existing) = self.sandboxes.read().await.get(&key) {
            return Ok(existing.clone());
        }

        let mut sandboxes = self.sandboxes.write().await;
        if let Some(existing) = sandboxes.get(&key) {
            return Ok(existing.clone());
        }

        let handle = self.create_sandbox(&key).await?;
        let handle = Arc::new(handle);
        sandboxes.insert(key, handle.clone());
        Ok(handle)
    }

    async fn create_sandbox(&self, key: &SandboxKey) -> Result<SandboxHandle, SandboxError> {
        let workspace_dir = self.workspace_dir(key);
        let socket_path = self.socket_path(key);

        // Step 1: per-chat socket path under the data root, world-readable/
        // writable so the guest bridge process can connect.
        if let Some(parent) = socket_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| SandboxError::WorkspaceIo {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        tokio::fs::create_dir_all(&workspace_dir).await.map_err(|e| SandboxError::WorkspaceIo {
            path: workspace_dir.clone(),
            source: e,
        })?;
        self.ensure_socket_permissions(&socket_path)?;

        // Step 2: start an IPC session bound to that socket.
        let ipc = self.ipc_factory.start(&socket_path).await?;

        // Step 3: instantiate the container with workspace + socket bind-mounted.
        let spec = ContainerSpec {
            key: format!("{}:{}", key.0, key.1),
            mounts: vec![
                BindMount {
                    host_path: workspace_dir.clone(),
                    guest_path: PathBuf::from(GUEST_WORKSPACE_PATH),
                    read_only: false,
                },
                BindMount {
                    host_path: socket_path.clone(),
                    guest_path: PathBuf::from(GUEST_SOCKET_PATH),
                    read_only: false,
                },
            ],
        };
        let container_id = self.engine.create(&spec).await.map_err(|e| SandboxError::ContainerCreate {
            key: spec.key.clone(),
            source: e,
        })?;

        // Step 4: register happens in get_or_create once this returns Ok.
        Ok(SandboxHandle {
            key: key.clone(),
            container_id,
            workspace_dir,
            socket_path,
            ipc,
            engine: self.engine.clone(),
        })
    }

    /// Permissions `0666` on the socket path; on platforms whose bind-mount
    /// driver strips the mode, the caller is expected to additionally run a
    /// post-start `chmod 666` inside the container as root — that step is
    /// the container engine's responsibility, not this manager's.
    #[cfg(unix)]
    fn ensure_socket_permissions(&self, path: &Path) -> Result<(), SandboxError> {
        use std::os::unix::fs::PermissionsExt;
        // The socket file itself is created by the IPC session on bind; here
        // we only prepare the parent directory so the bind can succeed.
        if let Some(parent) = path.parent() {
            if parent.exists() {
                let perms = std::fs::Permissions::from_mode(0o777);
                std::fs::set_permissions(parent, perms).map_err(|e| SandboxError::SocketSetup {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn ensure_socket_permissions(&self, _path: &Path) -> Result<(), SandboxError> {
        Ok(())
    }

    /// Removal reverses creation order and is idempotent.
    pub async fn remove(&self, user_id: &str, chat_id: &str) -> Result<(), SandboxError> {
        let key: SandboxKey = (user_id.to_string(), chat_id.to_string());
        let handle = {
            let mut sandboxes = self.sandboxes.write().await;
            sandboxes.remove(&key)
        };
        let Some(handle) = handle else {
            return Ok(());
        };
        if let Err(err) = self.engine.remove(&handle.container_id).await {
            tracing::warn!(key = ?key, error = %err, "container removal failed");
        }
        let _ = tokio::fs::remove_file(&handle.socket_path).await;
        Ok(())
    }

    pub async fn get(&self, user_id: &str, chat_id: &str) -> Result<Arc<SandboxHandle>, SandboxError> {
        let key: SandboxKey = (user_id.to_string(), chat_id.to_string());
        self.sandboxes
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| SandboxError::NotFound(format!("{}:{}", key.0, key.1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ContainerEngine;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEngine {
        creates: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ContainerEngine for CountingEngine {
        async fn create(&self, spec: &ContainerSpec) -> anyhow::Result<String> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(format!("container-{}", spec.key))
        }
        async fn exec(&self, _container_id: &str, _argv: &[String]) -> anyhow::Result<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn stream(
            &self,
            _container_id: &str,
            _argv: &[String],
        ) -> anyhow::Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>> {
            Ok(Box::new(tokio::io::empty()))
        }
        async fn read_file(&self, _container_id: &str, _path: &Path) -> anyhow::Result<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn write_file(&self, _container_id: &str, _path: &Path, _bytes: &[u8]) -> anyhow::Result<()> {
            Ok(())
        }
        async fn list_dir(&self, _container_id: &str, _path: &Path) -> anyhow::Result<Vec<FileInfo>> {
            Ok(Vec::new())
        }
        async fn copy_to_container(&self, _container_id: &str, _host_path: &Path, _guest_path: &Path) -> anyhow::Result<()> {
            Ok(())
        }
        async fn kill_process(&self, _container_id: &str, _name: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn remove(&self, _container_id: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct NoopIpcSession {
        path: PathBuf,
    }

    impl IpcSessionHandle for NoopIpcSession {
        fn socket_path(&self) -> &Path {
            &self.path
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    struct NoopIpcFactory;

    #[async_trait::async_trait]
    impl IpcSessionFactory for NoopIpcFactory {
        async fn start(&self, socket_path: &Path) -> Result<Arc<dyn IpcSessionHandle>, SandboxError> {
            Ok(Arc::new(NoopIpcSession { path: socket_path.to_path_buf() }))
        }
    }

    #[tokio::test]
    async fn get_or_create_only_creates_once_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(CountingEngine { creates: AtomicUsize::new(0) });
        let manager = SandboxManager::new(engine.clone(), Arc::new(NoopIpcFactory), dir.path().to_path_buf());

        let a = manager.get_or_create("u1", "c1").await.unwrap();
        let b = manager.get_or_create("u1", "c1").await.unwrap();
        assert_eq!(Arc::as_ptr(&a), Arc::as_ptr(&b));
        assert_eq!(engine.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_get_distinct_sandboxes() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(CountingEngine { creates: AtomicUsize::new(0) });
        let manager = SandboxManager::new(engine.clone(), Arc::new(NoopIpcFactory), dir.path().to_path_buf());

        manager.get_or_create("u1", "c1").await.unwrap();
        manager.get_or_create("u1", "c2").await.unwrap();
        assert_eq!(engine.creates.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(CountingEngine { creates: AtomicUsize::new(0) });
        let manager = SandboxManager::new(engine, Arc::new(NoopIpcFactory), dir.path().to_path_buf());

        manager.get_or_create("u1", "c1").await.unwrap();
        manager.remove("u1", "c1").await.unwrap();
        manager.remove("u1", "c1").await.unwrap();
        assert!(manager.get("u1", "c1").await.is_err());
    }
}
