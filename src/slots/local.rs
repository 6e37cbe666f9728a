//! Filesystem slot backend
//!
//! One file per slot, `<dir>/<name>.slot`. Writes land in a hidden temp file
//! in the same directory and are renamed into place, so readers only ever
//! see complete records.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use super::SlotError;

const SLOT_EXTENSION: &str = "slot";

#[derive(Debug, Clone)]
pub struct LocalBackend {
    dir: PathBuf,
}

impl LocalBackend {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn slot_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, SLOT_EXTENSION))
    }

    pub async fn put(&self, name: &str, bytes: &[u8]) -> Result<(), SlotError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| unavailable(&self.dir, e))?;

        let tmp_path = self
            .dir
            .join(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()));

        if let Err(e) = write_private(&tmp_path, bytes).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(unavailable(&tmp_path, e));
        }

        let path = self.slot_path(name);
        if let Err(e) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(unavailable(&path, e));
        }

        debug!(path = %path.display(), size = bytes.len(), "slot file written");
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Option<Vec<u8>>, SlotError> {
        let path = self.slot_path(name);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(unavailable(&path, e)),
        }
    }

    pub async fn list(&self) -> Result<Vec<String>, SlotError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(unavailable(&self.dir, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| unavailable(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SLOT_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if !stem.starts_with('.') {
                    names.push(stem.to_string());
                }
            }
        }

        Ok(names)
    }

    pub async fn delete(&self, name: &str) -> Result<(), SlotError> {
        let path = self.slot_path(name);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(unavailable(&path, e)),
        }
    }
}

/// Write a file readable only by the owner
pub(crate) async fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    fs::write(path, bytes).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    Ok(())
}

fn unavailable(path: &Path, e: std::io::Error) -> SlotError {
    SlotError::BackendUnavailable(format!("{}: {}", path.display(), e))
}
