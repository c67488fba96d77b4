use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::delivery::auto::AutoStrategy;
use crate::delivery::polling::PollingStrategy;
use crate::delivery::sse::SseStrategy;
use crate::delivery::DeliveryStrategy;
use crate::envelope::{Email, EnvelopeDecryptor};
use crate::error::Error;
use crate::transport::api::ApiClient;
use crate::transport::types::{InboxDescriptor, RawEmail, RawEmailSource};
use crate::watcher::{EmailCallback, EmailPredicate, InboxWatcher};

/// A provisioned inbox, already bound to a running delivery strategy.
///
/// Minting a new inbox (`CreateInbox`) or restoring one from saved
/// credentials (`ImportInbox`) lives above this layer, since both need the
/// KEM-backed encryption envelope this crate does not implement.
pub struct Inbox {
    descriptor: InboxDescriptor,
    api: ApiClient,
    strategy: Arc<dyn DeliveryStrategy>,
    watcher: Arc<InboxWatcher>,
}

impl Inbox {
    /// Build the delivery strategy named by `config.delivery_mode`, start it
    /// over `descriptor`, prime an [`InboxWatcher`] over it, and wire the two
    /// together.
    pub async fn new(
        descriptor: InboxDescriptor,
        api: ApiClient,
        config: &Config,
        decryptor: Arc<dyn EnvelopeDecryptor>,
        cancel: CancellationToken,
    ) -> Result<Self, Error> {
        let strategy: Arc<dyn DeliveryStrategy> = match config.delivery_mode {
            crate::config::DeliveryMode::Sse => {
                Arc::new(SseStrategy::new(api.clone(), config.base_url.clone()))
            }
            crate::config::DeliveryMode::Polling => Arc::new(PollingStrategy::new(api.clone(), config)),
            crate::config::DeliveryMode::Auto => {
                Arc::new(AutoStrategy::new(api.clone(), config.base_url.clone(), config))
            }
        };

        let watcher = Arc::new(
            InboxWatcher::new(
                api.clone(),
                descriptor.hash.clone(),
                descriptor.address.clone(),
                decryptor,
                config.callback_concurrency,
                &cancel,
            )
            .await?,
        );

        strategy
            .start(vec![descriptor.clone()], watcher.event_handler(), cancel)
            .await;

        Ok(Self { descriptor, api, strategy, watcher })
    }

    pub fn address(&self) -> &str {
        &self.descriptor.address
    }

    pub fn hash(&self) -> &str {
        &self.descriptor.hash
    }

    /// Register a callback invoked for every newly observed email.
    pub fn on_email(&self, callback: EmailCallback) {
        self.watcher.on_email(callback);
    }

    /// Register a callback invoked for non-fatal delivery errors.
    pub fn on_error(&self, handler: Arc<dyn Fn(Error) + Send + Sync>) {
        self.watcher.on_error(handler.clone());
        self.strategy.on_error(handler);
    }

    pub async fn wait_for_email(
        &self,
        predicate: EmailPredicate,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Email, Error> {
        self.watcher.wait_for_email(predicate, deadline, cancel).await
    }

    pub async fn wait_for_email_count(
        &self,
        predicate: EmailPredicate,
        count: usize,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<Email>, Error> {
        self.watcher.wait_for_email_count(predicate, count, deadline, cancel).await
    }

    pub async fn get_emails(&self, include_content: bool, cancel: &CancellationToken) -> Result<Vec<RawEmail>, Error> {
        self.api.get_emails(&self.descriptor.address, include_content, cancel).await
    }

    pub async fn get_email_raw(&self, id: &str, cancel: &CancellationToken) -> Result<RawEmailSource, Error> {
        self.api.get_email_raw(&self.descriptor.address, id, cancel).await
    }

    pub async fn mark_as_read(&self, id: &str, cancel: &CancellationToken) -> Result<(), Error> {
        self.api.mark_as_read(&self.descriptor.address, id, cancel).await
    }

    pub async fn delete(&self, cancel: &CancellationToken) -> Result<(), Error> {
        self.strategy.stop().await;
        self.api.delete_inbox(&self.descriptor.address, cancel).await
    }

    /// Fetch every email's raw source. A convenience over repeated
    /// [`Inbox::get_email_raw`]; no MIME/export formatting is performed.
    pub async fn export(&self, cancel: &CancellationToken) -> Result<Vec<RawEmailSource>, Error> {
        let emails = self.get_emails(false, cancel).await?;
        let mut sources = Vec::with_capacity(emails.len());
        for email in emails {
            sources.push(self.get_email_raw(&email.id, cancel).await?);
        }
        Ok(sources)
    }
}
