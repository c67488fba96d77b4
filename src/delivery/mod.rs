pub mod auto;
pub mod polling;
pub mod sse;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::transport::types::{InboxDescriptor, NewEmailEvent};

/// Invoked once per emitted event. Strategies dispatch to this serially and
/// in observation order; it never blocks the supervisory task for longer
/// than the handler itself takes.
pub type EventHandler = Arc<dyn Fn(NewEmailEvent) + Send + Sync>;

/// Invoked whenever a strategy hits a non-fatal error (a failed poll, a
/// dropped SSE connection). Never invoked for events that are simply
/// de-duplicated — only for genuine failures.
pub type ErrorHandler = Arc<dyn Fn(Error) + Send + Sync>;

/// A plug-in that produces [`NewEmailEvent`]s for a dynamic set of inboxes.
/// Three concrete variants: [`sse::SseStrategy`], [`polling::PollingStrategy`],
/// and [`auto::AutoStrategy`].
#[async_trait]
pub trait DeliveryStrategy: Send + Sync {
    /// Start the strategy's supervisory task. `cancel` stops the strategy
    /// and all derived work when triggered.
    async fn start(
        &self,
        inboxes: Vec<InboxDescriptor>,
        handler: EventHandler,
        cancel: CancellationToken,
    );

    /// Stop the strategy's supervisory task, if running.
    async fn stop(&self);

    /// Add an inbox to the monitored set. Concurrency-safe; takes effect by
    /// the strategy's next natural scheduling point.
    async fn add_inbox(&self, descriptor: InboxDescriptor);

    /// Remove an inbox from the monitored set.
    async fn remove_inbox(&self, hash: &str);

    /// Register a callback for non-fatal strategy errors.
    fn on_error(&self, handler: ErrorHandler);

    /// Register a callback fired when the strategy (re)connects. A no-op
    /// for strategies without a persistent connection (polling).
    fn on_reconnect(&self, handler: Arc<dyn Fn() + Send + Sync>);
}
