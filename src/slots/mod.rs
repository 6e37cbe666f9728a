//! Named clipboard slots in local or object storage
//!
//! [`SlotStore`] owns the storage contract: it encodes slot records, applies
//! encryption, and enforces TTLs at read time. The raw bytes go through a
//! [`Backend`], which is one of exactly two storage implementations.

pub mod local;
pub mod object;
pub mod record;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

pub use local::LocalBackend;
pub use object::ObjectStoreBackend;
pub use record::{Payload, SlotRecord};

use crate::config::{BackendKind, ConfigError, EncryptionKind, SyncConfig};
use crate::crypto::{self, CryptoError, KdfParams};

/// Maximum slot name length
pub const MAX_NAME_LEN: usize = 128;

/// Slot store errors
#[derive(Debug, Error)]
pub enum SlotError {
    /// No slot with this name
    #[error("slot '{0}' not found")]
    NotFound(String),

    /// Slot exists but is older than its TTL
    #[error("slot '{name}' expired: {age_days} days old, ttl is {ttl_days} days")]
    TtlExpired {
        name: String,
        age_days: i64,
        ttl_days: u32,
    },

    /// Storage could not be reached (credentials, network, filesystem)
    #[error("storage backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Encryption or decryption failed
    #[error(transparent)]
    Encryption(#[from] CryptoError),

    /// Name cannot be used as a slot key
    #[error("invalid slot name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Stored record could not be decoded
    #[error("slot '{name}' is corrupted: {reason}")]
    Corrupt { name: String, reason: String },
}

/// Slot metadata, stored unencrypted as the record header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotMeta {
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Host that pushed the slot
    pub hostname: String,
    /// Plaintext size in bytes
    pub size: u64,
    pub encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_days: Option<u32>,
    /// Caller-supplied key/value pairs
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

/// Entry returned by [`SlotStore::list`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub name: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub hostname: String,
    pub encrypted: bool,
}

/// How payloads are protected before they reach the backend
pub enum EncryptionMode {
    /// Payload stored as-is
    None,
    /// AES-256-GCM under an Argon2id-derived key
    Aes256 {
        passphrase: Zeroizing<String>,
        params: KdfParams,
    },
}

impl EncryptionMode {
    pub fn aes256(passphrase: impl Into<String>) -> Self {
        EncryptionMode::Aes256 {
            passphrase: Zeroizing::new(passphrase.into()),
            params: KdfParams::default(),
        }
    }
}

impl std::fmt::Debug for EncryptionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncryptionMode::None => f.write_str("None"),
            EncryptionMode::Aes256 { params, .. } => f
                .debug_struct("Aes256")
                .field("passphrase", &"[REDACTED]")
                .field("params", params)
                .finish(),
        }
    }
}

/// Storage implementation behind a [`SlotStore`]
#[derive(Debug)]
pub enum Backend {
    Local(LocalBackend),
    ObjectStore(ObjectStoreBackend),
}

impl Backend {
    pub fn kind(&self) -> &'static str {
        match self {
            Backend::Local(_) => "local",
            Backend::ObjectStore(_) => "object-store",
        }
    }

    async fn put(&self, name: &str, bytes: Vec<u8>) -> Result<(), SlotError> {
        match self {
            Backend::Local(b) => b.put(name, &bytes).await,
            Backend::ObjectStore(b) => b.put(name, bytes).await,
        }
    }

    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>, SlotError> {
        match self {
            Backend::Local(b) => b.get(name).await,
            Backend::ObjectStore(b) => b.get(name).await,
        }
    }

    async fn list(&self) -> Result<Vec<String>, SlotError> {
        match self {
            Backend::Local(b) => b.list().await,
            Backend::ObjectStore(b) => b.list().await,
        }
    }

    async fn delete(&self, name: &str) -> Result<(), SlotError> {
        match self {
            Backend::Local(b) => b.delete(name).await,
            Backend::ObjectStore(b) => b.delete(name).await,
        }
    }
}

/// Source of "now" for TTL checks
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Push/pull/list/delete over a configured backend
pub struct SlotStore {
    backend: Backend,
    encryption: EncryptionMode,
    ttl_days: Option<u32>,
    hostname: String,
    clock: Clock,
}

impl SlotStore {
    pub fn new(backend: Backend, encryption: EncryptionMode) -> Self {
        Self {
            backend,
            encryption,
            ttl_days: None,
            hostname: gethostname::gethostname().to_string_lossy().to_string(),
            clock: Arc::new(Utc::now),
        }
    }

    /// Build the store selected by `sync.backend`
    pub fn from_config(config: &SyncConfig) -> Result<Self, ConfigError> {
        let backend = match config.backend {
            BackendKind::Local => Backend::Local(LocalBackend::new(&config.slot_dir)),
            BackendKind::ObjectStore => {
                Backend::ObjectStore(ObjectStoreBackend::from_config(&config.object_store)?)
            }
        };

        let encryption = match config.encryption {
            EncryptionKind::None => EncryptionMode::None,
            EncryptionKind::Aes256 => {
                let passphrase = config.resolve_passphrase().ok_or_else(|| {
                    ConfigError::Validation(
                        "sync.encryption is aes256 but no passphrase is set \
                         (sync.passphrase or CLIPSLOT_PASSPHRASE)"
                            .to_string(),
                    )
                })?;
                EncryptionMode::aes256(passphrase)
            }
        };

        Ok(Self::new(backend, encryption).with_ttl_days(config.ttl_days))
    }

    /// Default TTL for pushed slots and for records without their own
    pub fn with_ttl_days(mut self, ttl_days: Option<u32>) -> Self {
        self.ttl_days = ttl_days;
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Store `data` under `name`, replacing any previous slot
    pub async fn push(
        &self,
        name: &str,
        data: &[u8],
        meta: BTreeMap<String, String>,
    ) -> Result<SlotMeta, SlotError> {
        validate_name(name)?;

        let payload = match &self.encryption {
            EncryptionMode::None => Payload::Raw(data.to_vec()),
            EncryptionMode::Aes256 { passphrase, params } => {
                Payload::Sealed(crypto::seal(data, passphrase, *params)?)
            }
        };

        let header = SlotMeta {
            name: name.to_string(),
            created_at: (self.clock)(),
            hostname: self.hostname.clone(),
            size: data.len() as u64,
            encrypted: payload.is_sealed(),
            ttl_days: self.ttl_days,
            meta,
        };

        let record = SlotRecord { header, payload };
        let bytes = record.encode()?;
        self.backend.put(name, bytes).await?;

        info!(
            slot = %name,
            size = data.len(),
            encrypted = record.header.encrypted,
            backend = self.backend.kind(),
            "slot pushed"
        );
        Ok(record.header)
    }

    /// Fetch and decrypt a slot
    pub async fn pull(&self, name: &str) -> Result<(Vec<u8>, SlotMeta), SlotError> {
        validate_name(name)?;

        let record = self.load(name).await?;
        let SlotRecord { header, payload } = record;

        let data = match payload {
            Payload::Raw(data) => data,
            Payload::Sealed(sealed) => match &self.encryption {
                EncryptionMode::Aes256 { passphrase, .. } => crypto::open(&sealed, passphrase)?,
                EncryptionMode::None => return Err(CryptoError::MissingPassphrase.into()),
            },
        };

        if data.len() as u64 != header.size {
            return Err(SlotError::Corrupt {
                name: name.to_string(),
                reason: format!("expected {} bytes, found {}", header.size, data.len()),
            });
        }

        debug!(slot = %name, size = data.len(), "slot pulled");
        Ok((data, header))
    }

    /// Live slots in backend order. Expired slots are removed on the way.
    pub async fn list(&self) -> Result<Vec<SlotInfo>, SlotError> {
        let names = self.backend.list().await?;
        let mut slots = Vec::with_capacity(names.len());

        for name in names {
            match self.load(&name).await {
                Ok(record) => slots.push(SlotInfo {
                    name: record.header.name,
                    size: record.header.size,
                    created_at: record.header.created_at,
                    hostname: record.header.hostname,
                    encrypted: record.header.encrypted,
                }),
                Err(SlotError::NotFound(_)) | Err(SlotError::TtlExpired { .. }) => {}
                Err(SlotError::Corrupt { name, reason }) => {
                    warn!(slot = %name, "skipping unreadable slot: {}", reason);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(slots)
    }

    /// Remove a slot. Absent slots are not an error.
    pub async fn delete(&self, name: &str) -> Result<(), SlotError> {
        validate_name(name)?;
        self.backend.delete(name).await?;
        info!(slot = %name, "slot deleted");
        Ok(())
    }

    /// Read and decode a record, enforcing its TTL
    async fn load(&self, name: &str) -> Result<SlotRecord, SlotError> {
        let bytes = self
            .backend
            .get(name)
            .await?
            .ok_or_else(|| SlotError::NotFound(name.to_string()))?;
        let record = SlotRecord::decode(name, &bytes)?;

        let Some(ttl_days) = record.header.ttl_days.or(self.ttl_days) else {
            return Ok(record);
        };

        let age = (self.clock)() - record.header.created_at;
        if age <= Duration::days(i64::from(ttl_days)) {
            return Ok(record);
        }

        info!(slot = %name, ttl_days, "slot expired, removing");
        if let Err(e) = self.backend.delete(name).await {
            warn!(slot = %name, "failed to remove expired slot: {}", e);
        }

        Err(SlotError::TtlExpired {
            name: name.to_string(),
            age_days: age.num_days(),
            ttl_days,
        })
    }
}

/// Check that `name` is safe to use as a file name and object key
pub fn validate_name(name: &str) -> Result<(), SlotError> {
    let invalid = |reason: &str| SlotError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("name is longer than 128 characters"));
    }
    if name.starts_with('.') {
        return Err(invalid("name must not start with '.'"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(invalid("only letters, digits, '.', '_' and '-' are allowed"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn local_store(dir: &TempDir) -> SlotStore {
        SlotStore::new(
            Backend::Local(LocalBackend::new(dir.path())),
            EncryptionMode::None,
        )
        .with_hostname("test-host")
    }

    fn settable_clock(start: DateTime<Utc>) -> (Clock, Arc<Mutex<DateTime<Utc>>>) {
        let now = Arc::new(Mutex::new(start));
        let handle = Arc::clone(&now);
        let clock: Clock = Arc::new(move || *handle.lock().unwrap());
        (clock, now)
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("kube").is_ok());
        assert!(validate_name("my-slot_1.txt").is_ok());

        assert!(validate_name("").is_err());
        assert!(validate_name(".hidden").is_err());
        assert!(validate_name("../etc/passwd").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name(&"x".repeat(129)).is_err());
    }

    #[tokio::test]
    async fn test_push_records_metadata() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir).with_ttl_days(Some(3));

        let mut extra = BTreeMap::new();
        extra.insert("source".to_string(), "terminal".to_string());

        let meta = store.push("notes", b"hello", extra.clone()).await.unwrap();
        assert_eq!(meta.hostname, "test-host");
        assert_eq!(meta.size, 5);
        assert_eq!(meta.ttl_days, Some(3));
        assert!(!meta.encrypted);

        let (data, pulled) = store.pull("notes").await.unwrap();
        assert_eq!(data, b"hello");
        assert_eq!(pulled.meta, extra);
        assert_eq!(pulled, meta);
    }

    #[tokio::test]
    async fn test_pull_missing() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir);

        assert!(matches!(
            store.pull("nope").await,
            Err(SlotError::NotFound(name)) if name == "nope"
        ));
    }

    #[tokio::test]
    async fn test_ttl_expiry_removes_slot() {
        let dir = TempDir::new().unwrap();
        let start = Utc::now();
        let (clock, now) = settable_clock(start);
        let store = local_store(&dir)
            .with_ttl_days(Some(2))
            .with_clock(clock);

        store.push("short", b"lived", BTreeMap::new()).await.unwrap();

        *now.lock().unwrap() = start + Duration::days(1);
        assert!(store.pull("short").await.is_ok());
        assert_eq!(store.list().await.unwrap().len(), 1);

        *now.lock().unwrap() = start + Duration::days(3);
        assert!(matches!(
            store.pull("short").await,
            Err(SlotError::TtlExpired { ttl_days: 2, .. })
        ));

        // Expired slot was deleted proactively
        assert!(matches!(
            store.pull("short").await,
            Err(SlotError::NotFound(_))
        ));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_skips_expired() {
        let dir = TempDir::new().unwrap();
        let start = Utc::now();
        let (clock, now) = settable_clock(start);
        let store = local_store(&dir).with_clock(clock);

        store.push("forever", b"a", BTreeMap::new()).await.unwrap();
        let short = local_store(&dir)
            .with_ttl_days(Some(1))
            .with_clock(store.clock.clone());
        short.push("brief", b"b", BTreeMap::new()).await.unwrap();

        *now.lock().unwrap() = start + Duration::days(5);
        let names: Vec<String> = store.list().await.unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["forever".to_string()]);
    }

    #[tokio::test]
    async fn test_encrypted_slot_without_passphrase() {
        let dir = TempDir::new().unwrap();
        let encrypted = SlotStore::new(
            Backend::Local(LocalBackend::new(dir.path())),
            EncryptionMode::Aes256 {
                passphrase: Zeroizing::new("pw".to_string()),
                params: KdfParams::light(),
            },
        );
        encrypted.push("vault", b"secret", BTreeMap::new()).await.unwrap();

        let plain = local_store(&dir);
        assert!(matches!(
            plain.pull("vault").await,
            Err(SlotError::Encryption(CryptoError::MissingPassphrase))
        ));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir);

        store.push("gone", b"soon", BTreeMap::new()).await.unwrap();
        store.delete("gone").await.unwrap();
        store.delete("gone").await.unwrap();

        assert!(matches!(store.pull("gone").await, Err(SlotError::NotFound(_))));
    }

    #[test]
    fn test_debug_redacts_passphrase() {
        let mode = EncryptionMode::aes256("hunter2");
        let rendered = format!("{:?}", mode);
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("hunter2"));
    }
}
