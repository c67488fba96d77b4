use std::time::Duration;

use thiserror::Error;

/// The resource a 404/409/429 response was scoped to, so sentinel matching
/// doesn't need to sniff the message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Inbox,
    Email,
    Webhook,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("network error: {cause}")]
    Network {
        #[source]
        cause: reqwest::Error,
    },

    #[error("API error: {status} {message}")]
    Api {
        status: u16,
        message: String,
        request_id: Option<String>,
        resource_type: Option<ResourceType>,
    },

    #[error("signature verification failed: {message}")]
    SignatureVerification { message: String, is_key_mismatch: bool },

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    #[error("failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn network(cause: reqwest::Error) -> Self {
        Error::Network { cause }
    }

    pub(crate) fn api(
        status: u16,
        message: impl Into<String>,
        request_id: Option<String>,
        resource_type: Option<ResourceType>,
    ) -> Self {
        Error::Api {
            status,
            message: message.into(),
            request_id,
            resource_type,
        }
    }

    /// 401 — the API key was rejected.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Api { status: 401, .. })
    }

    /// 404, scoped to `resource`. If the server didn't report a resource
    /// type, a 404 matches any resource-scoped sentinel (kept for
    /// backward compatibility with older server responses).
    pub fn is_not_found(&self, resource: ResourceType) -> bool {
        matches!(
            self,
            Error::Api { status: 404, resource_type, .. }
                if resource_type.is_none() || *resource_type == Some(resource)
        )
    }

    /// 409 — the request conflicts with existing server state.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Api { status: 409, .. })
    }

    /// 429 — rate limited.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::Api { status: 429, .. })
    }

    /// True for any signature-invalid variant, regardless of whether it
    /// stems from a key mismatch.
    pub fn is_signature_invalid(&self) -> bool {
        matches!(self, Error::SignatureVerification { .. })
    }

    /// True specifically when the server's signing key appears to have
    /// rotated mid-session — a possible sign of a man-in-the-middle.
    pub fn is_key_mismatch(&self) -> bool {
        matches!(
            self,
            Error::SignatureVerification { is_key_mismatch: true, .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_matches_tagged_resource_only() {
        let inbox_404 = Error::api(404, "gone", None, Some(ResourceType::Inbox));
        assert!(inbox_404.is_not_found(ResourceType::Inbox));
        assert!(!inbox_404.is_not_found(ResourceType::Email));
    }

    #[test]
    fn not_found_without_tag_matches_any_resource() {
        let untagged_404 = Error::api(404, "gone", None, None);
        assert!(untagged_404.is_not_found(ResourceType::Inbox));
        assert!(untagged_404.is_not_found(ResourceType::Email));
        assert!(untagged_404.is_not_found(ResourceType::Webhook));
    }

    #[test]
    fn status_sentinels_are_mutually_exclusive() {
        let rate_limited = Error::api(429, "slow down", None, None);
        assert!(rate_limited.is_rate_limited());
        assert!(!rate_limited.is_unauthorized());
        assert!(!rate_limited.is_conflict());
    }

    #[test]
    fn key_mismatch_implies_signature_invalid_but_not_vice_versa() {
        let mismatch = Error::SignatureVerification {
            message: "key rotated".to_owned(),
            is_key_mismatch: true,
        };
        let generic = Error::SignatureVerification {
            message: "bad signature".to_owned(),
            is_key_mismatch: false,
        };
        assert!(mismatch.is_signature_invalid() && mismatch.is_key_mismatch());
        assert!(generic.is_signature_invalid() && !generic.is_key_mismatch());
    }
}
