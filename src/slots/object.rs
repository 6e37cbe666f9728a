//! S3-compatible object storage backend
//!
//! Slots are stored as `<prefix>/<name>.slot`. Each push is a single PUT, so
//! a concurrent GET sees either the old record or the new one. Bucket
//! lifecycle rules may expire objects too, but TTLs are always re-checked by
//! the slot store.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use aws_config::profile::ProfileFileCredentialsProvider;
use aws_credential_types::provider::ProvideCredentials;
use futures_util::TryStreamExt;
use object_store::aws::{AmazonS3Builder, AwsCredential};
use object_store::path::Path as ObjectPath;
use object_store::{CredentialProvider, ObjectStore, PutPayload};
use tokio::sync::Mutex;
use tracing::debug;

use super::SlotError;
use crate::config::{ConfigError, ObjectStoreConfig};

const SLOT_SUFFIX: &str = ".slot";
/// Profile credentials are refreshed this long before they expire
const REFRESH_MARGIN: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct ObjectStoreBackend {
    inner: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectStoreBackend {
    /// Wrap an existing store, e.g. `object_store::memory::InMemory` in tests
    pub fn with_store(inner: Arc<dyn ObjectStore>, prefix: &str) -> Self {
        Self {
            inner,
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    /// Build an S3 client from `sync.object_store`.
    ///
    /// Credentials come from the environment, or from the named profile of
    /// `~/.aws/config` and `~/.aws/credentials` when `profile` is set. The
    /// profile is resolved on first use.
    pub fn from_config(config: &ObjectStoreConfig) -> Result<Self, ConfigError> {
        let bucket = config.bucket.as_deref().ok_or_else(|| {
            ConfigError::Validation("sync.object_store.bucket is required".to_string())
        })?;

        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);

        if let Some(region) = &config.region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }
        if let Some(profile) = &config.profile {
            builder = builder.with_credentials(Arc::new(ProfileCredentials::named(profile)));
        }

        let store = builder
            .build()
            .map_err(|e| ConfigError::Validation(format!("object store: {}", e)))?;

        Ok(Self::with_store(Arc::new(store), &config.prefix))
    }

    fn slot_path(&self, name: &str) -> ObjectPath {
        if self.prefix.is_empty() {
            ObjectPath::from(format!("{}{}", name, SLOT_SUFFIX))
        } else {
            ObjectPath::from(format!("{}/{}{}", self.prefix, name, SLOT_SUFFIX))
        }
    }

    pub async fn put(&self, name: &str, bytes: Vec<u8>) -> Result<(), SlotError> {
        let path = self.slot_path(name);
        let size = bytes.len();
        self.inner
            .put(&path, PutPayload::from(bytes))
            .await
            .map_err(unavailable)?;
        debug!(key = %path, size, "slot object written");
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Option<Vec<u8>>, SlotError> {
        let path = self.slot_path(name);
        match self.inner.get(&path).await {
            Ok(result) => {
                let bytes = result.bytes().await.map_err(unavailable)?;
                Ok(Some(bytes.to_vec()))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(unavailable(e)),
        }
    }

    pub async fn list(&self) -> Result<Vec<String>, SlotError> {
        let prefix = if self.prefix.is_empty() {
            None
        } else {
            Some(ObjectPath::from(self.prefix.as_str()))
        };

        let objects: Vec<_> = self
            .inner
            .list(prefix.as_ref())
            .try_collect()
            .await
            .map_err(unavailable)?;

        let names = objects
            .into_iter()
            .filter_map(|meta| {
                let key = meta.location.as_ref();
                let rest = if self.prefix.is_empty() {
                    key
                } else {
                    key.strip_prefix(self.prefix.as_str())?.strip_prefix('/')?
                };
                let name = rest.strip_suffix(SLOT_SUFFIX)?;
                (!name.is_empty() && !name.contains('/')).then(|| name.to_string())
            })
            .collect();

        Ok(names)
    }

    pub async fn delete(&self, name: &str) -> Result<(), SlotError> {
        let path = self.slot_path(name);
        match self.inner.delete(&path).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(unavailable(e)),
        }
    }
}

fn unavailable(e: object_store::Error) -> SlotError {
    SlotError::BackendUnavailable(e.to_string())
}

/// Credentials for one named profile of the shared AWS config files.
///
/// Resolution goes through aws-config, so static keys, `credential_process`,
/// SSO and `role_arn`/`source_profile` chains all work. Credentials are
/// cached until shortly before they expire.
#[derive(Debug)]
struct ProfileCredentials {
    provider: ProfileFileCredentialsProvider,
    cached: Mutex<Option<(Arc<AwsCredential>, Option<SystemTime>)>>,
}

impl ProfileCredentials {
    fn new(provider: ProfileFileCredentialsProvider) -> Self {
        Self {
            provider,
            cached: Mutex::new(None),
        }
    }

    fn named(profile: &str) -> Self {
        Self::new(
            ProfileFileCredentialsProvider::builder()
                .profile_name(profile)
                .build(),
        )
    }
}

#[async_trait]
impl CredentialProvider for ProfileCredentials {
    type Credential = AwsCredential;

    async fn get_credential(&self) -> object_store::Result<Arc<AwsCredential>> {
        let mut cached = self.cached.lock().await;
        if let Some((credential, expiry)) = cached.as_ref() {
            let fresh = match expiry {
                Some(at) => *at > SystemTime::now() + REFRESH_MARGIN,
                None => true,
            };
            if fresh {
                return Ok(Arc::clone(credential));
            }
        }

        let creds = self
            .provider
            .provide_credentials()
            .await
            .map_err(|e| object_store::Error::Generic {
                store: "S3",
                source: Box::new(e),
            })?;
        debug!(expires = ?creds.expiry(), "resolved profile credentials");

        let credential = Arc::new(AwsCredential {
            key_id: creds.access_key_id().to_string(),
            secret_key: creds.secret_access_key().to_string(),
            token: creds.session_token().map(str::to_string),
        });
        *cached = Some((Arc::clone(&credential), creds.expiry()));
        Ok(credential)
    }
}
