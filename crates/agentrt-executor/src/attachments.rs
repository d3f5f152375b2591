//! Attachment resolver. `AttachmentManager` is the external collaborator
//! seam for wherever attachment bytes actually live — an upload store, a
//! database blob column, whatever the embedder wires in behind the
//! narrow fetch trait.

use crate::error::AttachmentError;
use agentrt_sandbox::manager::GUEST_WORKSPACE_PATH;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct FetchedAttachment {
    pub bytes: Vec<u8>,
    pub content_type: String,
    /// Uploader-reported filename, if any.
    pub filename: Option<String>,
}

/// One named attachment backend, addressed by the `<uploader>` component of
/// an opaque `<uploader>://<id>` URL.
#[async_trait]
pub trait AttachmentManager: Send + Sync {
    async fn fetch(&self, id: &str) -> Result<FetchedAttachment, AttachmentError>;
}

fn extension_for_content_type(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "application/pdf" => ".pdf",
        "text/plain" => ".txt",
        "text/csv" => ".csv",
        "application/json" => ".json",
        _ => "",
    }
}

/// `<1024 -> "NB"`, `<1 MiB -> "X.XKB"`, else `"X.XMB"`.
pub fn human_size(bytes: usize) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    let b = bytes as f64;
    if bytes < 1024 {
        format!("{bytes}B")
    } else if b < MIB {
        format!("{:.1}KB", b / KIB)
    } else {
        format!("{:.1}MB", b / MIB)
    }
}

fn split_opaque_url(url: &str) -> Option<(&str, &str)> {
    url.split_once("://")
}

/// Resolves attachment URLs for one request, deduplicating filenames against
/// everything already written during that request.
pub struct AttachmentResolver {
    managers: HashMap<String, Arc<dyn AttachmentManager>>,
    used_names: HashSet<String>,
}

impl AttachmentResolver {
    pub fn new(managers: HashMap<String, Arc<dyn AttachmentManager>>) -> Self {
        Self { managers, used_names: HashSet::new() }
    }

    fn unique_name(&mut self, preferred: String) -> String {
        if self.used_names.insert(preferred.clone()) {
            return preferred;
        }
        let (stem, ext) = match preferred.rfind('.') {
            Some(idx) => (&preferred[..idx], &preferred[idx..]),
            None => (preferred.as_str(), ""),
        };
        let mut n = 1;
        loop {
            let candidate = format!("{stem}_{n}{ext}");
            if self.used_names.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Resolve one opaque attachment URL, write its bytes under
    /// `<workdir>/.attachments/<name>` on the host (bind-mounted at
    /// `/workspace` in the container), and return a reference string built
    /// from the container-visible path, since that's all the CLI ever sees.
    pub async fn resolve(&mut self, url: &str, workdir: &Path, supplied_filename: Option<&str>) -> Result<String, AttachmentError> {
        let (uploader, id) = split_opaque_url(url).ok_or_else(|| AttachmentError::UnknownUploader(url.to_string()))?;
        let manager = self
            .managers
            .get(uploader)
            .ok_or_else(|| AttachmentError::UnknownUploader(uploader.to_string()))?
            .clone();

        let fetched = manager.fetch(id).await?;
        let ext = extension_for_content_type(&fetched.content_type);
        let base_name = supplied_filename
            .map(str::to_string)
            .or_else(|| fetched.filename.clone())
            .unwrap_or_else(|| format!("{id}{ext}"));
        let name = self.unique_name(base_name);

        let attachments_dir = workdir.join(".attachments");
        tokio::fs::create_dir_all(&attachments_dir)
            .await
            .map_err(AttachmentError::WriteFailed)?;
        let path = attachments_dir.join(&name);
        tokio::fs::write(&path, &fetched.bytes)
            .await
            .map_err(AttachmentError::WriteFailed)?;

        Ok(format!(
            "[Attached file: {} ({}, {})]",
            container_path(&name).display(),
            fetched.content_type,
            human_size(fetched.bytes.len())
        ))
    }
}

pub fn container_path(name: &str) -> PathBuf {
    Path::new(GUEST_WORKSPACE_PATH).join(".attachments").join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedManager {
        content_type: String,
        bytes: Vec<u8>,
        filename: Option<String>,
    }

    #[async_trait]
    impl AttachmentManager for FixedManager {
        async fn fetch(&self, _id: &str) -> Result<FetchedAttachment, AttachmentError> {
            Ok(FetchedAttachment {
                bytes: self.bytes.clone(),
                content_type: self.content_type.clone(),
                filename: self.filename.clone(),
            })
        }
    }

    fn resolver_with(manager: FixedManager) -> AttachmentResolver {
        let mut managers: HashMap<String, Arc<dyn AttachmentManager>> = HashMap::new();
        managers.insert("up".to_string(), Arc::new(manager));
        AttachmentResolver::new(managers)
    }

    #[test]
    fn human_size_formats_thresholds() {
        assert_eq!(human_size(500), "500B");
        assert_eq!(human_size(2048), "2.0KB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0MB");
    }

    #[tokio::test]
    async fn resolve_writes_file_and_builds_reference() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = resolver_with(FixedManager {
            content_type: "image/png".to_string(),
            bytes: vec![1, 2, 3, 4],
            filename: None,
        });
        let reference = resolver.resolve("up://abc123", dir.path(), None).await.unwrap();
        assert!(reference.contains("abc123.png"));
        assert!(reference.contains("image/png"));
        assert!(reference.contains("4B"));
        assert!(dir.path().join(".attachments").join("abc123.png").exists());
    }

    #[tokio::test]
    async fn duplicate_filenames_are_suffixed() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = resolver_with(FixedManager {
            content_type: "text/plain".to_string(),
            bytes: vec![0u8; 10],
            filename: Some("notes.txt".to_string()),
        });
        let first = resolver.resolve("up://a", dir.path(), None).await.unwrap();
        let second = resolver.resolve("up://b", dir.path(), None).await.unwrap();
        assert!(first.contains("notes.txt"));
        assert!(second.contains("notes_1.txt"));
    }

    #[tokio::test]
    async fn unknown_uploader_is_an_error() {
        let mut resolver = resolver_with(FixedManager { content_type: "text/plain".to_string(), bytes: vec![], filename: None });
        let result = resolver.resolve("ghost://x", Path::new("/tmp"), None).await;
        assert!(matches!(result, Err(AttachmentError::UnknownUploader(_))));
    }
}
