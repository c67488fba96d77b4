use reqwest::Method;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, ResourceType};

use super::types::{CreateInboxRequest, CreateInboxResponse, RawEmail, RawEmailSource, SyncStatus};
use super::HttpTransport;

/// Typed REST bindings over every endpoint the delivery core (and the
/// per-inbox facade) depends on. Owns no retry/backoff logic of its own —
/// that lives entirely in [`HttpTransport`].
#[derive(Clone)]
pub struct ApiClient {
    transport: HttpTransport,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self, Error> {
        Ok(Self {
            transport: HttpTransport::new(config)?,
        })
    }

    pub(crate) fn transport(&self) -> &HttpTransport {
        &self.transport
    }

    pub async fn create_inbox(
        &self,
        request: &CreateInboxRequest,
        cancel: &CancellationToken,
    ) -> Result<CreateInboxResponse, Error> {
        let response = self
            .transport
            .execute(Method::POST, "/api/inboxes", Some(request), Some(ResourceType::Inbox), cancel)
            .await?;
        Ok(response.json().await.map_err(Error::network)?)
    }

    pub async fn delete_inbox(&self, address: &str, cancel: &CancellationToken) -> Result<(), Error> {
        self.transport
            .execute::<()>(
                Method::DELETE,
                &format!("/api/inboxes/{address}"),
                None,
                Some(ResourceType::Inbox),
                cancel,
            )
            .await?;
        Ok(())
    }

    pub async fn get_sync(&self, address: &str, cancel: &CancellationToken) -> Result<SyncStatus, Error> {
        let response = self
            .transport
            .execute::<()>(
                Method::GET,
                &format!("/api/inboxes/{address}/sync"),
                None,
                Some(ResourceType::Inbox),
                cancel,
            )
            .await?;
        Ok(response.json().await.map_err(Error::network)?)
    }

    pub async fn get_emails(
        &self,
        address: &str,
        include_content: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawEmail>, Error> {
        let response = self
            .transport
            .execute::<()>(
                Method::GET,
                &format!("/api/inboxes/{address}/emails?includeContent={include_content}"),
                None,
                Some(ResourceType::Inbox),
                cancel,
            )
            .await?;
        Ok(response.json().await.map_err(Error::network)?)
    }

    pub async fn get_email(
        &self,
        address: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<RawEmail, Error> {
        let response = self
            .transport
            .execute::<()>(
                Method::GET,
                &format!("/api/inboxes/{address}/emails/{id}"),
                None,
                Some(ResourceType::Email),
                cancel,
            )
            .await?;
        Ok(response.json().await.map_err(Error::network)?)
    }

    pub async fn get_email_raw(
        &self,
        address: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<RawEmailSource, Error> {
        let response = self
            .transport
            .execute::<()>(
                Method::GET,
                &format!("/api/inboxes/{address}/emails/{id}/raw"),
                None,
                Some(ResourceType::Email),
                cancel,
            )
            .await?;
        Ok(response.json().await.map_err(Error::network)?)
    }

    pub async fn mark_as_read(
        &self,
        address: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.transport
            .execute::<()>(
                Method::PATCH,
                &format!("/api/inboxes/{address}/emails/{id}/read"),
                None,
                Some(ResourceType::Email),
                cancel,
            )
            .await?;
        Ok(())
    }

    pub async fn delete_email(
        &self,
        address: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.transport
            .execute::<()>(
                Method::DELETE,
                &format!("/api/inboxes/{address}/emails/{id}"),
                None,
                Some(ResourceType::Email),
                cancel,
            )
            .await?;
        Ok(())
    }
}
