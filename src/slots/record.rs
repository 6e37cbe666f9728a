//! On-store representation of a slot
//!
//! A slot is a single JSON document: the metadata header plus either the raw
//! payload or a sealed one. The header is never encrypted, so `list` can
//! report sizes and ages without a passphrase.

use serde::{Deserialize, Serialize};

use super::{SlotError, SlotMeta};
use crate::codec::base64_bytes;
use crate::crypto::SealedPayload;

/// Slot payload, raw or encrypted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Raw(#[serde(with = "base64_bytes")] Vec<u8>),
    Sealed(SealedPayload),
}

impl Payload {
    pub fn is_sealed(&self) -> bool {
        matches!(self, Payload::Sealed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRecord {
    pub header: SlotMeta,
    pub payload: Payload,
}

impl SlotRecord {
    pub fn encode(&self) -> Result<Vec<u8>, SlotError> {
        serde_json::to_vec(self).map_err(|e| SlotError::Corrupt {
            name: self.header.name.clone(),
            reason: format!("failed to encode record: {}", e),
        })
    }

    /// Parse a stored record and check the header agrees with the payload
    pub fn decode(name: &str, bytes: &[u8]) -> Result<Self, SlotError> {
        let record: SlotRecord = serde_json::from_slice(bytes).map_err(|e| SlotError::Corrupt {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        if record.header.name != name {
            return Err(SlotError::Corrupt {
                name: name.to_string(),
                reason: format!("header names slot '{}'", record.header.name),
            });
        }

        if record.header.encrypted != record.payload.is_sealed() {
            return Err(SlotError::Corrupt {
                name: name.to_string(),
                reason: "encrypted flag does not match payload".to_string(),
            });
        }

        Ok(record)
    }
}
