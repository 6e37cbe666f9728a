//! Passphrase-based AES-256-GCM encryption for slot payloads
//!
//! Every sealed payload carries its own Argon2id salt and parameters, so a
//! slot can be opened with nothing but the passphrase that sealed it.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};
use zstd::stream::{decode_all, encode_all};

use crate::codec::base64_bytes;

const COMPRESSION_THRESHOLD: usize = 100 * 1024; // 100KB
const COMPRESSION_LEVEL: i32 = 3;

/// Length of the derived AES-256 key
pub const KEY_SIZE: usize = 32;
/// Length of the per-payload Argon2 salt
pub const SALT_SIZE: usize = 16;
/// Length of the AES-GCM nonce
pub const NONCE_SIZE: usize = 12;

/// Upper bounds accepted for KDF parameters read from a sealed payload
pub const MAX_MEMORY_KIB: u32 = 1024 * 1024;
pub const MAX_ITERATIONS: u32 = 16;
pub const MAX_PARALLELISM: u32 = 16;

/// Algorithm tag written into sealed payloads
pub const ALGORITHM: &str = "aes256-gcm";

/// Encryption errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key derivation failed
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Encryption failed
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Wrong passphrase or tampered ciphertext
    #[error("decryption failed: wrong passphrase or corrupted slot")]
    Authentication,

    /// The sealed payload is structurally invalid
    #[error("malformed sealed payload: {0}")]
    Malformed(String),

    /// Payload is encrypted but no passphrase is available
    #[error("slot is encrypted but no passphrase is configured")]
    MissingPassphrase,
}

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 15000,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests and benchmarks. Never use for real data.
    pub fn light() -> Self {
        Self {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }

    /// Reject costs no sealing side would pick, before any work is done
    pub fn check_bounds(&self) -> Result<(), CryptoError> {
        let limits = [
            ("memory_kib", self.memory_kib, MAX_MEMORY_KIB),
            ("iterations", self.iterations, MAX_ITERATIONS),
            ("parallelism", self.parallelism, MAX_PARALLELISM),
        ];
        for (field, value, max) in limits {
            if value > max {
                return Err(CryptoError::Malformed(format!(
                    "kdf {} {} exceeds limit {}",
                    field, value, max
                )));
            }
        }
        Ok(())
    }
}

/// Encrypted payload as it travels inside a slot record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    pub algorithm: String,
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,
    pub kdf: KdfParams,
    /// Whether the plaintext was zstd-compressed before encryption
    pub compressed: bool,
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
}

/// Key material for a single seal/open operation.
///
/// Lives only as long as the push or pull that created it. The raw derived
/// key is wiped as soon as the cipher has been keyed.
pub struct EncryptionContext {
    cipher: Aes256Gcm,
    salt: [u8; SALT_SIZE],
    params: KdfParams,
}

impl EncryptionContext {
    /// Derive a key from `passphrase` and `salt` using Argon2id
    pub fn derive(
        passphrase: &str,
        salt: [u8; SALT_SIZE],
        params: KdfParams,
    ) -> Result<Self, CryptoError> {
        let argon2 = Argon2::new(
            Algorithm::Argon2id,
            Version::V0x13,
            Params::new(
                params.memory_kib,
                params.iterations,
                params.parallelism,
                Some(KEY_SIZE),
            )
            .map_err(|e| CryptoError::KeyDerivation(format!("invalid argon2 params: {}", e)))?,
        );

        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        argon2
            .hash_password_into(passphrase.as_bytes(), &salt, &mut *key)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

        let cipher = Aes256Gcm::new_from_slice(&key[..])
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

        Ok(Self {
            cipher,
            salt,
            params,
        })
    }

    /// Fresh context with a random salt
    pub fn generate(passphrase: &str, params: KdfParams) -> Result<Self, CryptoError> {
        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);
        Self::derive(passphrase, salt, params)
    }

    /// Encrypt `plaintext`, compressing large payloads first
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<SealedPayload, CryptoError> {
        let compressed = plaintext.len() > COMPRESSION_THRESHOLD;
        let mut data = if compressed {
            encode_all(plaintext, COMPRESSION_LEVEL)
                .map_err(|e| CryptoError::Encryption(format!("compression failed: {}", e)))?
        } else {
            plaintext.to_vec()
        };

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let result = self.cipher.encrypt(&nonce, data.as_ref());
        data.zeroize();
        let ciphertext = result.map_err(|e| CryptoError::Encryption(e.to_string()))?;

        Ok(SealedPayload {
            algorithm: ALGORITHM.to_string(),
            salt: self.salt.to_vec(),
            nonce: nonce.to_vec(),
            kdf: self.params,
            compressed,
            ciphertext,
        })
    }

    /// Decrypt a payload sealed under the same key
    pub fn decrypt(&self, sealed: &SealedPayload) -> Result<Vec<u8>, CryptoError> {
        if sealed.nonce.len() != NONCE_SIZE {
            return Err(CryptoError::Malformed(format!(
                "nonce must be {} bytes, got {}",
                NONCE_SIZE,
                sealed.nonce.len()
            )));
        }

        let nonce = Nonce::from_slice(&sealed.nonce);
        let mut plaintext = self
            .cipher
            .decrypt(nonce, sealed.ciphertext.as_ref())
            .map_err(|_| CryptoError::Authentication)?;

        if sealed.compressed {
            let decompressed = decode_all(&plaintext[..])
                .map_err(|e| CryptoError::Malformed(format!("decompression failed: {}", e)));
            plaintext.zeroize();
            plaintext = decompressed?;
        }

        Ok(plaintext)
    }
}

/// Encrypt `plaintext` under a key derived from `passphrase`
pub fn seal(
    plaintext: &[u8],
    passphrase: &str,
    params: KdfParams,
) -> Result<SealedPayload, CryptoError> {
    EncryptionContext::generate(passphrase, params)?.encrypt(plaintext)
}

/// Reverse of [`seal`]. Fails on a wrong passphrase or any tampering.
pub fn open(sealed: &SealedPayload, passphrase: &str) -> Result<Vec<u8>, CryptoError> {
    if sealed.algorithm != ALGORITHM {
        return Err(CryptoError::Malformed(format!(
            "unsupported algorithm '{}'",
            sealed.algorithm
        )));
    }

    let salt: [u8; SALT_SIZE] = sealed.salt.as_slice().try_into().map_err(|_| {
        CryptoError::Malformed(format!(
            "salt must be {} bytes, got {}",
            SALT_SIZE,
            sealed.salt.len()
        ))
    })?;
    sealed.kdf.check_bounds()?;

    EncryptionContext::derive(passphrase, salt, sealed.kdf)?.decrypt(sealed)
}

/// SHA-256 hex digest, used as a content fingerprint
pub fn fingerprint(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let plaintext = b"Hello, world!";
        let sealed = seal(plaintext, "hunter2", KdfParams::light()).unwrap();

        assert_eq!(sealed.algorithm, ALGORITHM);
        assert_eq!(sealed.salt.len(), SALT_SIZE);
        assert_eq!(sealed.nonce.len(), NONCE_SIZE);
        assert_ne!(sealed.ciphertext, plaintext.to_vec());

        let opened = open(&sealed, "hunter2").unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_large_payload_compression() {
        let large_data = vec![b'A'; 200 * 1024];

        let sealed = seal(&large_data, "pw", KdfParams::light()).unwrap();
        assert!(sealed.compressed);
        assert!(sealed.ciphertext.len() < large_data.len());

        assert_eq!(open(&sealed, "pw").unwrap(), large_data);
    }

    #[test]
    fn test_wrong_passphrase() {
        let sealed = seal(b"secret-data", "right", KdfParams::light()).unwrap();
        let err = open(&sealed, "wrong").unwrap_err();
        assert!(matches!(err, CryptoError::Authentication));
    }

    #[test]
    fn test_fresh_salt_and_nonce() {
        let a = seal(b"same", "pw", KdfParams::light()).unwrap();
        let b = seal(b"same", "pw", KdfParams::light()).unwrap();

        assert_ne!(a.salt, b.salt);
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_malformed_nonce_rejected() {
        let mut sealed = seal(b"data", "pw", KdfParams::light()).unwrap();
        sealed.nonce.truncate(4);

        assert!(matches!(
            open(&sealed, "pw"),
            Err(CryptoError::Malformed(_))
        ));
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let mut sealed = seal(b"data", "pw", KdfParams::light()).unwrap();
        sealed.algorithm = "rot13".to_string();

        assert!(matches!(
            open(&sealed, "pw"),
            Err(CryptoError::Malformed(_))
        ));
    }

    #[test]
    fn test_inflated_kdf_params_rejected() {
        let sealed = seal(b"data", "pw", KdfParams::light()).unwrap();
        let inflated = [
            KdfParams {
                memory_kib: MAX_MEMORY_KIB + 1,
                ..sealed.kdf
            },
            KdfParams {
                iterations: 50_000_000,
                ..sealed.kdf
            },
            KdfParams {
                parallelism: MAX_PARALLELISM + 1,
                ..sealed.kdf
            },
        ];

        for kdf in inflated {
            let tampered = SealedPayload {
                kdf,
                ..sealed.clone()
            };
            assert!(matches!(
                open(&tampered, "pw"),
                Err(CryptoError::Malformed(_))
            ));
        }

        assert!(KdfParams::default().check_bounds().is_ok());
        assert_eq!(open(&sealed, "pw").unwrap(), b"data");
    }

    #[test]
    fn test_fingerprint() {
        let fp1 = fingerprint(b"test data");
        let fp2 = fingerprint(b"test data");
        assert_eq!(fp1, fp2);
        assert_eq!(fp1.len(), 64);

        assert_ne!(fp1, fingerprint(b"different data"));
    }
}
