//! Clipboard abstraction layer
//!
//! Commands and the watch loop only see raw bytes through
//! [`ClipboardProvider`]. [`SystemClipboard`] talks to the desktop clipboard,
//! [`MemoryClipboard`] keeps content in process for tests and simulations.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Clipboard errors
#[derive(Debug, Error)]
pub enum ClipboardError {
    /// Platform-specific error
    #[error("Platform error: {0}")]
    Platform(String),

    /// Content too large
    #[error("Content too large: {size} bytes (max: {max} bytes)")]
    TooLarge { size: usize, max: usize },

    /// Unsupported content type
    #[error("Unsupported content type: {0}")]
    UnsupportedType(String),
}

/// Byte-level access to a clipboard
#[async_trait]
pub trait ClipboardProvider: Send + Sync {
    /// Current content. An empty clipboard reads as zero bytes.
    async fn read(&self) -> Result<Vec<u8>, ClipboardError>;

    /// Replace the clipboard content
    async fn write(&self, data: &[u8]) -> Result<(), ClipboardError>;

    /// Provider name for logs
    fn name(&self) -> &str;
}

/// Desktop clipboard via `arboard`.
///
/// arboard calls block, so they run on tokio's blocking pool. The handle is
/// created on first use and kept for the life of the provider; on X11 and
/// Wayland the written content is served from this process until a
/// clipboard manager takes it over.
#[derive(Clone, Default)]
pub struct SystemClipboard {
    handle: Arc<Mutex<Option<arboard::Clipboard>>>,
}

impl SystemClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    async fn with_handle<T, F>(&self, f: F) -> Result<T, ClipboardError>
    where
        T: Send + 'static,
        F: FnOnce(&mut arboard::Clipboard) -> Result<T, ClipboardError> + Send + 'static,
    {
        let handle = Arc::clone(&self.handle);
        tokio::task::spawn_blocking(move || {
            let mut guard = handle
                .lock()
                .map_err(|_| ClipboardError::Platform("clipboard handle poisoned".to_string()))?;
            if guard.is_none() {
                let clipboard = arboard::Clipboard::new().map_err(platform)?;
                *guard = Some(clipboard);
            }
            match guard.as_mut() {
                Some(clipboard) => f(clipboard),
                None => Err(ClipboardError::Platform("clipboard unavailable".to_string())),
            }
        })
        .await
        .map_err(|e| ClipboardError::Platform(format!("clipboard task failed: {}", e)))?
    }
}

#[async_trait]
impl ClipboardProvider for SystemClipboard {
    async fn read(&self) -> Result<Vec<u8>, ClipboardError> {
        self.with_handle(|clipboard| match clipboard.get_text() {
            Ok(text) => Ok(text.into_bytes()),
            Err(arboard::Error::ContentNotAvailable) => Ok(Vec::new()),
            Err(e) => Err(platform(e)),
        })
        .await
    }

    async fn write(&self, data: &[u8]) -> Result<(), ClipboardError> {
        let text = String::from_utf8(data.to_vec()).map_err(|_| {
            ClipboardError::UnsupportedType("binary data (only UTF-8 text is supported)".to_string())
        })?;
        let size = text.len();

        self.with_handle(move |clipboard| clipboard.set_text(text).map_err(platform))
            .await?;
        debug!(size, "system clipboard updated");
        Ok(())
    }

    fn name(&self) -> &str {
        "system"
    }
}

fn platform(e: arboard::Error) -> ClipboardError {
    ClipboardError::Platform(e.to_string())
}

/// In-process clipboard
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    content: RwLock<Vec<u8>>,
    writes: AtomicUsize,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content(data: impl Into<Vec<u8>>) -> Self {
        Self {
            content: RwLock::new(data.into()),
            writes: AtomicUsize::new(0),
        }
    }

    /// Change the content without counting it as a write, like a user
    /// copying something in another application
    pub async fn set_external(&self, data: impl Into<Vec<u8>>) {
        *self.content.write().await = data.into();
    }

    /// Number of [`ClipboardProvider::write`] calls so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClipboardProvider for MemoryClipboard {
    async fn read(&self) -> Result<Vec<u8>, ClipboardError> {
        Ok(self.content.read().await.clone())
    }

    async fn write(&self, data: &[u8]) -> Result<(), ClipboardError> {
        *self.content.write().await = data.to_vec();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Reject payloads above `max` bytes
pub fn check_size(size: usize, max: usize) -> Result<(), ClipboardError> {
    if size > max {
        return Err(ClipboardError::TooLarge { size, max });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_clipboard() {
        let clipboard = MemoryClipboard::new();
        assert!(clipboard.read().await.unwrap().is_empty());

        clipboard.write(b"hello").await.unwrap();
        assert_eq!(clipboard.read().await.unwrap(), b"hello");
        assert_eq!(clipboard.write_count(), 1);

        clipboard.set_external("from elsewhere").await;
        assert_eq!(clipboard.read().await.unwrap(), b"from elsewhere");
        assert_eq!(clipboard.write_count(), 1);
    }

    #[test]
    fn test_check_size() {
        assert!(check_size(10, 10).is_ok());
        assert!(matches!(
            check_size(11, 10),
            Err(ClipboardError::TooLarge { size: 11, max: 10 })
        ));
    }
}
