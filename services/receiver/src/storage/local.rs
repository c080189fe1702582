use super::{check_relative, parse_record, validate_key, StorageBackend, StorageError};
use crate::codec::Record;
use crate::config::LocalConfig;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

/// Backend storing one JSON file per record under a root directory
pub struct LocalBackend {
    root: PathBuf,
    exclude_dirs: Vec<String>,
}

impl LocalBackend {
    /// Create a backend rooted at `root`, skipping `exclude_dirs` when listing
    pub fn new(root: impl Into<PathBuf>, exclude_dirs: Vec<String>) -> Self {
        Self {
            root: root.into(),
            exclude_dirs,
        }
    }

    pub fn from_config(config: &LocalConfig) -> Self {
        let backend = Self::new(&config.root_dir, config.exclude_dirs.clone());

        info!(
            root = %backend.root.display(),
            exclude_dirs = ?backend.exclude_dirs,
            "Local storage backend initialized"
        );

        backend
    }

    async fn write_file(&self, key: &str, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let unavailable = |e: std::io::Error| {
            StorageError::Unavailable(format!("{}: {}", path.display(), e))
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(unavailable)?;
        }

        // Records are immutable: never clobber an existing key.
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => StorageError::InvalidKey {
                    key: key.to_string(),
                    reason: "a record with this key already exists".to_string(),
                },
                _ => unavailable(e),
            })?;
        file.write_all(bytes).await.map_err(unavailable)?;
        file.sync_all().await.map_err(unavailable)?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    #[instrument(skip(self, record), fields(backend = "local"))]
    async fn write(&self, key: &str, record: &Record) -> Result<(), StorageError> {
        validate_key(key)?;

        let bytes = serde_json::to_vec(record).map_err(|e| StorageError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        let path = self.root.join(key);

        self.write_file(key, &path, &bytes).await?;

        debug!(path = %path.display(), size_bytes = bytes.len(), "Record file written");
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>, StorageError> {
        walk_tree(&self.root, &self.exclude_dirs).await
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn read(&self, key: &str) -> Result<Record, StorageError> {
        check_relative(key)?;
        let path = self.root.join(key);

        let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(key.to_string()),
            _ => StorageError::Unavailable(format!("{}: {}", path.display(), e)),
        })?;

        parse_record(key, &bytes)
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// Walk `root` depth-first and return every regular file as a `/`-separated
/// path relative to `root`.
///
/// Entries are visited in name order. Directories whose name appears in
/// `exclude_dirs` are skipped at any depth. Files whose path is not valid
/// UTF-8 cannot be named by a key and are skipped.
async fn walk_tree(root: &Path, exclude_dirs: &[String]) -> Result<Vec<String>, StorageError> {
    let unavailable = |path: &Path, e: std::io::Error| {
        StorageError::Unavailable(format!("{}: {}", path.display(), e))
    };

    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| unavailable(&dir, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(|e| unavailable(&dir, e))? {
            entries.push(entry);
        }
        entries.sort_by_key(|entry| entry.file_name());

        let mut subdirs = Vec::new();
        for entry in entries {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| unavailable(&entry.path(), e))?;
            let path = entry.path();

            if file_type.is_dir() {
                let name = entry.file_name();
                if !exclude_dirs.iter().any(|x| name.to_str() == Some(x.as_str())) {
                    subdirs.push(path);
                }
            } else if file_type.is_file() {
                match relative_key(root, &path) {
                    Some(key) => files.push(key),
                    None => warn!(path = %path.display(), "Skipping file with non-UTF-8 name"),
                }
            }
        }

        // Reverse so the first subdirectory is walked next.
        pending.extend(subdirs.into_iter().rev());
    }

    Ok(files)
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let parts = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}
