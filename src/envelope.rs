use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::transport::types::RawEmailContent;

/// A decrypted, library-facing email. Full MIME parsing is out of scope —
/// `metadata` is the opaque JSON value the envelope service (or the plain
/// inbox path) produced.
#[derive(Debug, Clone)]
pub struct Email {
    pub id: String,
    pub inbox_hash: String,
    pub received_at: DateTime<Utc>,
    pub is_read: bool,
    pub metadata: serde_json::Value,
}

/// The cryptographic envelope (KEM + AEAD + signature verification) that
/// turns an encrypted [`RawEmailContent`] into plaintext metadata. No
/// production implementation ships with this crate; applications supply one
/// backed by their own key material.
#[async_trait]
pub trait EnvelopeDecryptor: Send + Sync {
    async fn decrypt(&self, content: &RawEmailContent) -> Result<serde_json::Value, Error>;
}

/// Passes plain content through unchanged and refuses to decrypt encrypted
/// content. Useful for tests and for inboxes that were provisioned without
/// encryption.
pub struct PassthroughDecryptor;

#[async_trait]
impl EnvelopeDecryptor for PassthroughDecryptor {
    async fn decrypt(&self, content: &RawEmailContent) -> Result<serde_json::Value, Error> {
        match content {
            RawEmailContent::Plain { metadata, .. } => Ok(metadata.clone()),
            RawEmailContent::Encrypted { .. } => Err(Error::SignatureVerification {
                message: "no envelope decryptor configured for an encrypted inbox".to_owned(),
                is_key_mismatch: false,
            }),
        }
    }
}
