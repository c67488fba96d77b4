use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::transport::api::ApiClient;
use crate::transport::types::InboxDescriptor;

use super::polling::PollingStrategy;
use super::sse::SseStrategy;
use super::{DeliveryStrategy, ErrorHandler, EventHandler};

enum Active {
    Sse(Arc<SseStrategy>),
    Polling(Arc<PollingStrategy>),
}

/// Tries SSE first and falls back to polling if it hasn't connected within
/// `sse_connection_timeout`. Whichever strategy is picked on `start` runs for
/// the lifetime of the watcher; there is no later re-selection.
pub struct AutoStrategy {
    sse: Arc<SseStrategy>,
    polling: Arc<PollingStrategy>,
    connection_timeout: Duration,
    active: std::sync::Mutex<Option<Active>>,
}

impl AutoStrategy {
    pub fn new(api: ApiClient, base_url: impl Into<String>, config: &Config) -> Self {
        Self {
            sse: Arc::new(SseStrategy::new(api.clone(), base_url)),
            polling: Arc::new(PollingStrategy::new(api, config)),
            connection_timeout: config.sse_connection_timeout,
            active: std::sync::Mutex::new(None),
        }
    }

    fn active_strategy(&self) -> Option<Arc<dyn DeliveryStrategy>> {
        match self.active.lock().unwrap().as_ref()? {
            Active::Sse(sse) => Some(sse.clone() as Arc<dyn DeliveryStrategy>),
            Active::Polling(polling) => Some(polling.clone() as Arc<dyn DeliveryStrategy>),
        }
    }
}

#[async_trait]
impl DeliveryStrategy for AutoStrategy {
    async fn start(
        &self,
        inboxes: Vec<InboxDescriptor>,
        handler: EventHandler,
        cancel: CancellationToken,
    ) {
        self.sse.start(inboxes.clone(), handler.clone(), cancel.clone()).await;

        let connected = tokio::select! {
            _ = cancel.cancelled() => false,
            _ = self.sse.connected() => true,
            _ = tokio::time::sleep(self.connection_timeout) => false,
        };

        if connected {
            *self.active.lock().unwrap() = Some(Active::Sse(self.sse.clone()));
            return;
        }

        self.sse.stop().await;
        if cancel.is_cancelled() {
            return;
        }

        tracing::debug!("SSE did not connect in time, falling back to polling");
        self.polling.start(inboxes, handler, cancel).await;
        *self.active.lock().unwrap() = Some(Active::Polling(self.polling.clone()));
    }

    async fn stop(&self) {
        if let Some(strategy) = self.active_strategy() {
            strategy.stop().await;
        }
    }

    async fn add_inbox(&self, descriptor: InboxDescriptor) {
        if let Some(strategy) = self.active_strategy() {
            strategy.add_inbox(descriptor).await;
        }
    }

    async fn remove_inbox(&self, hash: &str) {
        if let Some(strategy) = self.active_strategy() {
            strategy.remove_inbox(hash).await;
        }
    }

    fn on_error(&self, handler: ErrorHandler) {
        self.sse.on_error(handler.clone());
        self.polling.on_error(handler);
    }

    fn on_reconnect(&self, handler: Arc<dyn Fn() + Send + Sync>) {
        self.sse.on_reconnect(handler.clone());
        self.polling.on_reconnect(handler);
    }
}
