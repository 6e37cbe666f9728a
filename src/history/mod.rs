//! Operation history
//!
//! Every mutating command appends an entry. The log is bounded by count,
//! optionally by age, and optionally collapses repeated operations on the
//! same content. It lives in a single JSON file that is rewritten through a
//! temp file and rename on each update.
//!
//! There is no cross-process lock: two clipslot invocations recording at the
//! same moment may lose one of the entries.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::config::HistoryConfig;
use crate::crypto;
use crate::slots::local::write_private;
use crate::slots::Clock;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("history file is corrupted: {0}")]
    Format(#[from] serde_json::Error),
}

/// One recorded operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    /// e.g. `push`, `send`, `watch:recv`
    pub command: String,
    /// Slot, peer or `clipboard`
    pub target: String,
    pub size: u64,
    /// SHA-256 of the content
    pub signature: String,
}

pub struct HistoryTracker {
    path: PathBuf,
    limit: usize,
    ttl_days: Option<u32>,
    no_duplicates: bool,
    clock: Clock,
}

impl HistoryTracker {
    pub fn new(config: &HistoryConfig) -> Self {
        Self {
            path: config.path.clone(),
            limit: config.limit,
            ttl_days: config.ttl_days,
            no_duplicates: config.no_duplicates,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_enabled(&self) -> bool {
        self.limit > 0
    }

    /// Append an entry for `content` and apply retention
    pub async fn record(
        &self,
        command: &str,
        target: &str,
        content: &[u8],
    ) -> Result<(), HistoryError> {
        if !self.is_enabled() {
            return Ok(());
        }

        let mut entries = self.load().await?;
        let entry = HistoryEntry {
            timestamp: (self.clock)(),
            command: command.to_string(),
            target: target.to_string(),
            size: content.len() as u64,
            signature: crypto::fingerprint(content),
        };

        self.retain(&mut entries, &entry);
        entries.push(entry);
        if entries.len() > self.limit {
            let excess = entries.len() - self.limit;
            entries.drain(..excess);
        }

        self.store(&entries).await?;
        debug!(command, target, count = entries.len(), "history updated");
        Ok(())
    }

    /// Age and duplicate filtering applied before `new` is appended
    fn retain(&self, entries: &mut Vec<HistoryEntry>, new: &HistoryEntry) {
        if let Some(ttl_days) = self.ttl_days {
            let cutoff = new.timestamp - Duration::days(i64::from(ttl_days));
            entries.retain(|e| e.timestamp >= cutoff);
        }

        // Compared against every retained entry, not just the last one
        if self.no_duplicates {
            entries.retain(|e| {
                !(e.target == new.target && e.size == new.size && e.signature == new.signature)
            });
        }
    }

    /// Entries oldest first, with expired ones filtered out
    pub async fn entries(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        let mut entries = self.load().await?;
        if let Some(ttl_days) = self.ttl_days {
            let cutoff = (self.clock)() - Duration::days(i64::from(ttl_days));
            entries.retain(|e| e.timestamp >= cutoff);
        }
        Ok(entries)
    }

    pub async fn clear(&self) -> Result<(), HistoryError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn load(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        match fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, entries: &[HistoryEntry]) -> Result<(), HistoryError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).await?;

        let tmp = dir.join(format!(".history.{}.tmp", Uuid::new_v4().simple()));
        let json = serde_json::to_vec_pretty(entries)?;
        if let Err(e) = write_private(&tmp, &json).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp, &self.path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}
