//! Backup persistence
//!
//! The framework works with `Arc<dyn BackupStore>` and never touches the
//! filesystem directly. [`FileBackupStore`] keeps one pretty-printed JSON file
//! per object, named `<provider>_<type>_<name>.json`; a later backup of the
//! same object overwrites the earlier one.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::models::BackupObject;

/// Storage for backup artifacts
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Persist a backup, replacing any earlier artifact for the same object
    async fn save(&self, backup: &BackupObject) -> Result<(), AppError>;

    /// Every readable backup. Unreadable entries are skipped, not reported.
    async fn load_all(&self) -> Result<Vec<BackupObject>, AppError>;

    async fn load(&self, id: &str) -> Result<Option<BackupObject>, AppError>;

    /// Remove a backup. Returns `false` when no backup has that id.
    async fn delete(&self, id: &str) -> Result<bool, AppError>;

    /// Human-readable location for logs and health output
    fn location(&self) -> String;
}

/// One JSON file per backup in a single directory
pub struct FileBackupStore {
    dir: PathBuf,
    /// Serializes writers within this process
    write_lock: Mutex<()>,
}

impl FileBackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<provider>_<type>_<name>.json`
    pub fn path_for(&self, backup: &BackupObject) -> PathBuf {
        let file_name = format!(
            "{}_{}_{}.json",
            backup.provider_type,
            backup.object_type,
            sanitize_file_component(&backup.object_name)
        );
        self.dir.join(file_name)
    }

    async fn scan(&self) -> Result<Vec<(PathBuf, BackupObject)>, AppError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut backups = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!("Skipping unreadable backup file {}: {}", path.display(), e);
                    continue;
                }
            };
            match serde_json::from_str::<BackupObject>(&content) {
                Ok(backup) => backups.push((path, backup)),
                Err(e) => warn!("Skipping malformed backup file {}: {}", path.display(), e),
            }
        }

        // Directory order is platform-dependent
        backups.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(backups)
    }
}

#[async_trait]
impl BackupStore for FileBackupStore {
    async fn save(&self, backup: &BackupObject) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(backup);
        let content = serde_json::to_string_pretty(backup)?;

        // Write to a temp file, then rename over the target
        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, content.as_bytes()).await?;
        tokio::fs::rename(&temp_path, &path).await?;

        debug!("Saved backup {} to {}", backup.id, path.display());
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<BackupObject>, AppError> {
        Ok(self.scan().await?.into_iter().map(|(_, backup)| backup).collect())
    }

    async fn load(&self, id: &str) -> Result<Option<BackupObject>, AppError> {
        Ok(self
            .scan()
            .await?
            .into_iter()
            .map(|(_, backup)| backup)
            .find(|backup| backup.id == id))
    }

    async fn delete(&self, id: &str) -> Result<bool, AppError> {
        let _guard = self.write_lock.lock().await;

        let Some((path, _)) = self.scan().await?.into_iter().find(|(_, b)| b.id == id) else {
            return Ok(false);
        };
        tokio::fs::remove_file(&path).await?;
        debug!("Deleted backup {} ({})", id, path.display());
        Ok(true)
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}

/// Keep names filesystem-safe: anything outside `[A-Za-z0-9_.$-]` becomes `_`
fn sanitize_file_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '$') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}
