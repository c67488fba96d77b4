use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The identity of a monitored inbox. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InboxDescriptor {
    /// Stable opaque string; the server's identifier in the event stream.
    pub hash: String,
    /// Email address; used in REST paths.
    pub address: String,
}

/// A notification that a new email arrived, emitted once per observed
/// `(inbox, email_id)` pair from the perspective of one strategy instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEmailEvent {
    #[serde(rename = "inboxId")]
    pub inbox_hash: String,
    pub email_id: String,
    #[serde(default)]
    pub encrypted_metadata: Option<serde_json::Value>,
}

/// A lightweight change-detection probe used to detect changes to the email
/// list without listing it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub email_count: u64,
    pub emails_hash: String,
}

/// The REST representation of a stored email: a sum type over encrypted vs.
/// plain content, rather than a flat record with optional fields, since the
/// two shapes are mutually exclusive on the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEmail {
    pub id: String,
    pub inbox_id: String,
    pub received_at: DateTime<Utc>,
    pub is_read: bool,
    #[serde(flatten)]
    pub content: RawEmailContent,
}

#[derive(Debug, Clone)]
pub enum RawEmailContent {
    Encrypted {
        encrypted_metadata: serde_json::Value,
        encrypted_parsed: Option<serde_json::Value>,
    },
    Plain {
        metadata: serde_json::Value,
        parsed: Option<serde_json::Value>,
    },
}

// `RawEmailContent` is flattened by hand rather than via `#[serde(untagged)]`
// so an email with neither shape populated is a hard decode error instead of
// silently picking the wrong variant.
impl<'de> Deserialize<'de> for RawEmailContent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Shape {
            #[serde(default)]
            encrypted_metadata: Option<serde_json::Value>,
            #[serde(default)]
            encrypted_parsed: Option<serde_json::Value>,
            #[serde(default)]
            metadata: Option<serde_json::Value>,
            #[serde(default)]
            parsed: Option<serde_json::Value>,
        }

        let shape = Shape::deserialize(deserializer)?;
        match (shape.encrypted_metadata, shape.metadata) {
            (Some(encrypted_metadata), None) => Ok(RawEmailContent::Encrypted {
                encrypted_metadata,
                encrypted_parsed: shape.encrypted_parsed,
            }),
            (None, Some(metadata)) => Ok(RawEmailContent::Plain {
                metadata,
                parsed: shape.parsed,
            }),
            _ => Err(serde::de::Error::custom(
                "RawEmail must carry exactly one of encryptedMetadata or metadata",
            )),
        }
    }
}

/// `{id, raw|encryptedRaw}` — the raw RFC 5322 source of an email, again as
/// a sum type over the plain/encrypted shape.
#[derive(Debug, Clone)]
pub enum RawEmailSource {
    Encrypted { id: String, encrypted_raw: serde_json::Value },
    Plain { id: String, raw: String },
}

impl<'de> Deserialize<'de> for RawEmailSource {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Shape {
            id: String,
            #[serde(default)]
            raw: Option<String>,
            #[serde(default)]
            encrypted_raw: Option<serde_json::Value>,
        }

        let shape = Shape::deserialize(deserializer)?;
        match (shape.raw, shape.encrypted_raw) {
            (Some(raw), None) => Ok(RawEmailSource::Plain { id: shape.id, raw }),
            (None, Some(encrypted_raw)) => Ok(RawEmailSource::Encrypted {
                id: shape.id,
                encrypted_raw,
            }),
            _ => Err(serde::de::Error::custom(
                "raw email source must carry exactly one of raw or encryptedRaw",
            )),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInboxRequest {
    pub client_kem_pk: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInboxResponse {
    pub email_address: String,
    pub expires_at: DateTime<Utc>,
    pub inbox_hash: String,
    #[serde(default)]
    pub server_sig_pk: Option<String>,
    pub encrypted: bool,
    pub persistent: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorBodyLoose {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    request_id: Option<String>,
}

/// Decode `{error|message, request_id}`, falling back to the raw body text
/// when it isn't valid JSON in that shape.
pub(crate) fn parse_error_body(raw: &str) -> (String, Option<String>) {
    match serde_json::from_str::<ErrorBodyLoose>(raw) {
        Ok(body) => {
            let message = body
                .error
                .or(body.message)
                .unwrap_or_else(|| raw.to_owned());
            (message, body.request_id)
        }
        Err(_) => (raw.to_owned(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_email_decodes_plain_shape() {
        let json = serde_json::json!({
            "id": "e1",
            "inboxId": "h1",
            "receivedAt": "2026-01-01T00:00:00Z",
            "isRead": false,
            "metadata": {"subject": "hi"},
        });
        let email: RawEmail = serde_json::from_value(json).unwrap();
        match email.content {
            RawEmailContent::Plain { metadata, parsed } => {
                assert_eq!(metadata["subject"], "hi");
                assert!(parsed.is_none());
            }
            RawEmailContent::Encrypted { .. } => panic!("expected plain content"),
        }
    }

    #[test]
    fn raw_email_decodes_encrypted_shape() {
        let json = serde_json::json!({
            "id": "e1",
            "inboxId": "h1",
            "receivedAt": "2026-01-01T00:00:00Z",
            "isRead": false,
            "encryptedMetadata": {"ciphertext": "abc"},
        });
        let email: RawEmail = serde_json::from_value(json).unwrap();
        assert!(matches!(email.content, RawEmailContent::Encrypted { .. }));
    }

    #[test]
    fn raw_email_rejects_neither_shape() {
        let json = serde_json::json!({
            "id": "e1",
            "inboxId": "h1",
            "receivedAt": "2026-01-01T00:00:00Z",
            "isRead": false,
        });
        assert!(serde_json::from_value::<RawEmail>(json).is_err());
    }

    #[test]
    fn raw_email_rejects_both_shapes() {
        let json = serde_json::json!({
            "id": "e1",
            "inboxId": "h1",
            "receivedAt": "2026-01-01T00:00:00Z",
            "isRead": false,
            "metadata": {},
            "encryptedMetadata": {},
        });
        assert!(serde_json::from_value::<RawEmail>(json).is_err());
    }

    #[test]
    fn raw_email_source_decodes_either_shape() {
        let plain = serde_json::json!({"id": "e1", "raw": "From: a\r\n\r\nhi"});
        match serde_json::from_value::<RawEmailSource>(plain).unwrap() {
            RawEmailSource::Plain { id, raw } => {
                assert_eq!(id, "e1");
                assert_eq!(raw, "From: a\r\n\r\nhi");
            }
            RawEmailSource::Encrypted { .. } => panic!("expected plain source"),
        }

        let encrypted = serde_json::json!({"id": "e2", "encryptedRaw": "abc"});
        assert!(matches!(
            serde_json::from_value::<RawEmailSource>(encrypted).unwrap(),
            RawEmailSource::Encrypted { .. }
        ));
    }

    #[test]
    fn parse_error_body_prefers_error_over_message() {
        let (message, request_id) =
            parse_error_body(r#"{"error":"bad request","message":"ignored","request_id":"r1"}"#);
        assert_eq!(message, "bad request");
        assert_eq!(request_id.as_deref(), Some("r1"));
    }

    #[test]
    fn parse_error_body_falls_back_to_raw_text() {
        let (message, request_id) = parse_error_body("not json");
        assert_eq!(message, "not json");
        assert!(request_id.is_none());
    }
}
