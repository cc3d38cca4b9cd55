//! FsSink - directory-backed object store
//!
//! Objects are written to a hidden temp file beside the target and renamed
//! into place, so a reader never sees a partial object.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use contracts::{ObjectSink, SinkError};
use tracing::{debug, instrument};

const TEMP_MARKER: &str = ".courier-tmp";

pub struct FsSink {
    name: String,
    root: PathBuf,
    temp_seq: AtomicU64,
}

impl FsSink {
    /// Create a sink rooted at `root`, creating the directory if needed.
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let name = name.into();
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| SinkError::permanent(&name, format!("create {}: {e}", root.display())))?;
        Ok(Self {
            name,
            root,
            temp_seq: AtomicU64::new(0),
        })
    }

    /// Create from params map (`root` is required).
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, SinkError> {
        let name = name.into();
        let root = params
            .get("root")
            .filter(|r| !r.is_empty())
            .ok_or_else(|| SinkError::permanent(&name, "missing 'root' parameter"))?;
        Self::new(name, root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, SinkError> {
        let relative = Path::new(path);
        let safe = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(SinkError::permanent(
                &self.name,
                format!("object path '{path}' escapes the sink root"),
            ));
        }
        Ok(self.root.join(relative))
    }

    fn io_error(&self, e: std::io::Error) -> SinkError {
        SinkError {
            sink: self.name.clone(),
            ..SinkError::from(e)
        }
    }
}

impl ObjectSink for FsSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(name = "fs_sink_put", skip(self, body), fields(sink = %self.name, bytes = body.len()))]
    async fn put(&self, path: &str, body: Bytes) -> Result<(), SinkError> {
        let target = self.resolve(path)?;
        let Some(parent) = target.parent() else {
            return Err(SinkError::permanent(&self.name, format!("no parent for '{path}'")));
        };
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| self.io_error(e))?;

        let seq = self.temp_seq.fetch_add(1, Ordering::Relaxed);
        let temp = parent.join(format!(".{file_name}{TEMP_MARKER}{seq}"));
        if let Err(e) = tokio::fs::write(&temp, &body).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(self.io_error(e));
        }
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(self.io_error(e));
        }
        debug!(path, "object written");
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, SinkError> {
        let mut found = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| self.io_error(e))?;
            while let Some(entry) = entries.next_entry().await.map_err(|e| self.io_error(e))? {
                let file_type = entry.file_type().await.map_err(|e| self.io_error(e))?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if entry.file_name().to_string_lossy().contains(TEMP_MARKER) {
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    found.push(key);
                }
            }
        }
        found.sort();
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_put_creates_partition_directories() {
        let dir = tempdir().unwrap();
        let sink = FsSink::new("fs", dir.path()).unwrap();
        sink.put(
            "logs/processed/year=2024/month=01/day=01/hour=00/s-1",
            Bytes::from_static(b"hello\n"),
        )
        .await
        .unwrap();

        let on_disk = std::fs::read(
            dir.path()
                .join("logs/processed/year=2024/month=01/day=01/hour=00/s-1"),
        )
        .unwrap();
        assert_eq!(on_disk, b"hello\n");
    }

    #[tokio::test]
    async fn test_list_filters_by_prefix_and_hides_temp_files() {
        let dir = tempdir().unwrap();
        let sink = FsSink::new("fs", dir.path()).unwrap();
        sink.put("a/x", Bytes::from_static(b"1")).await.unwrap();
        sink.put("a/y", Bytes::from_static(b"2")).await.unwrap();
        sink.put("b/z", Bytes::from_static(b"3")).await.unwrap();
        std::fs::write(dir.path().join("a").join(".x.courier-tmp9"), b"partial").unwrap();

        assert_eq!(sink.list("a/").await.unwrap(), vec!["a/x", "a/y"]);
        assert_eq!(sink.list("").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let dir = tempdir().unwrap();
        let sink = FsSink::new("fs", dir.path()).unwrap();
        for bad in ["../evil", "/abs/path", ""] {
            let err = sink.put(bad, Bytes::new()).await.unwrap_err();
            assert!(!err.is_transient(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_from_params_requires_root() {
        assert!(FsSink::from_params("fs", &HashMap::new()).is_err());
    }
}
