use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Error;
use crate::transport::api::ApiClient;
use crate::transport::types::{InboxDescriptor, NewEmailEvent};

use super::{DeliveryStrategy, ErrorHandler, EventHandler};

/// One watched inbox's adaptive-backoff state (C3).
struct PolledInbox {
    descriptor: InboxDescriptor,
    last_emails_hash: String,
    seen_email_ids: HashSet<String>,
    current_interval: Duration,
}

/// Emits [`NewEmailEvent`]s by periodically polling each inbox's sync-hash
/// endpoint, backing off when nothing has changed and resetting to the
/// initial interval the moment it has.
pub struct PollingStrategy {
    api: ApiClient,
    inboxes: Arc<StdMutex<HashMap<String, PolledInbox>>>,
    handler: Arc<StdMutex<Option<EventHandler>>>,
    error_handler: Arc<StdMutex<Option<ErrorHandler>>>,
    task: Arc<StdMutex<Option<JoinHandle<()>>>>,
    initial_interval: Duration,
    max_backoff: Duration,
    backoff_multiplier: f64,
    jitter_factor: f64,
}

impl PolledInbox {
    fn new(descriptor: InboxDescriptor, initial_interval: Duration) -> Self {
        Self {
            descriptor,
            last_emails_hash: String::new(),
            seen_email_ids: HashSet::new(),
            current_interval: initial_interval,
        }
    }
}

impl PollingStrategy {
    pub fn new(api: ApiClient, config: &Config) -> Self {
        Self {
            api,
            inboxes: Arc::new(StdMutex::new(HashMap::new())),
            handler: Arc::new(StdMutex::new(None)),
            error_handler: Arc::new(StdMutex::new(None)),
            task: Arc::new(StdMutex::new(None)),
            initial_interval: config.polling_initial_interval,
            max_backoff: config.polling_max_backoff,
            backoff_multiplier: config.polling_backoff_multiplier,
            jitter_factor: config.polling_jitter_factor,
        }
    }

    fn emit_error(error_handler: &StdMutex<Option<ErrorHandler>>, error: Error) {
        if let Some(handler) = error_handler.lock().unwrap().as_ref() {
            handler(error);
        }
    }

    /// Add `U[0, jitter_factor * interval]` jitter to a single inbox's next
    /// interval. Applied per-inbox, before the cross-inbox minimum is taken,
    /// so the sleep duration matches `min_i(current_interval_i + jitter_i)`
    /// rather than jittering the already-minimized value.
    fn jittered(interval: Duration, jitter_factor: f64) -> Duration {
        if jitter_factor <= 0.0 {
            return interval;
        }
        let max_jitter_ms = (interval.as_millis() as f64 * jitter_factor).max(0.0);
        interval + Duration::from_millis(rand::rng().random_range(0..=(max_jitter_ms as u64).max(0)))
    }

    /// Run one poll cycle over a snapshot of the monitored inboxes,
    /// returning the shortest (already-jittered) next-poll interval across
    /// all of them (or `None` if there are none to poll).
    async fn poll_once(
        api: &ApiClient,
        inboxes: &StdMutex<HashMap<String, PolledInbox>>,
        handler: &StdMutex<Option<EventHandler>>,
        error_handler: &StdMutex<Option<ErrorHandler>>,
        backoff_multiplier: f64,
        max_backoff: Duration,
        initial_interval: Duration,
        jitter_factor: f64,
        cancel: &CancellationToken,
    ) -> Option<Duration> {
        let snapshot: Vec<(String, InboxDescriptor, Duration)> = {
            let guard = inboxes.lock().unwrap();
            guard
                .values()
                .map(|entry| {
                    (
                        entry.descriptor.hash.clone(),
                        entry.descriptor.clone(),
                        entry.current_interval,
                    )
                })
                .collect()
        };

        if snapshot.is_empty() {
            return None;
        }

        let mut shortest: Option<Duration> = None;

        for (hash, descriptor, _) in snapshot {
            if cancel.is_cancelled() {
                return Some(Duration::ZERO);
            }

            let sync = match api.get_sync(&descriptor.address, cancel).await {
                Ok(sync) => sync,
                Err(error) => {
                    tracing::debug!(inbox = %descriptor.hash, error = %error, "poll sync failed");
                    Self::emit_error(error_handler, error);
                    let interval = inboxes
                        .lock()
                        .unwrap()
                        .get(&hash)
                        .map(|entry| entry.current_interval)
                        .unwrap_or(initial_interval);
                    let candidate = Self::jittered(interval, jitter_factor);
                    shortest = Some(shortest.map_or(candidate, |s| s.min(candidate)));
                    continue;
                }
            };

            let unchanged = {
                let guard = inboxes.lock().unwrap();
                guard
                    .get(&hash)
                    .map(|entry| entry.last_emails_hash == sync.emails_hash)
                    .unwrap_or(true)
            };

            let interval = if unchanged {
                let mut guard = inboxes.lock().unwrap();
                if let Some(entry) = guard.get_mut(&hash) {
                    let scaled = entry.current_interval.mul_f64(backoff_multiplier);
                    entry.current_interval = scaled.min(max_backoff);
                    entry.current_interval
                } else {
                    initial_interval
                }
            } else {
                {
                    let mut guard = inboxes.lock().unwrap();
                    if let Some(entry) = guard.get_mut(&hash) {
                        entry.last_emails_hash = sync.emails_hash.clone();
                        entry.current_interval = initial_interval;
                    }
                }

                match api.get_emails(&descriptor.address, false, cancel).await {
                    Ok(emails) => {
                        for email in emails {
                            let already_seen = {
                                let guard = inboxes.lock().unwrap();
                                guard
                                    .get(&hash)
                                    .map(|entry| entry.seen_email_ids.contains(&email.id))
                                    .unwrap_or(true)
                            };
                            if already_seen {
                                continue;
                            }

                            let encrypted_metadata = match &email.content {
                                crate::transport::types::RawEmailContent::Encrypted {
                                    encrypted_metadata,
                                    ..
                                } => Some(encrypted_metadata.clone()),
                                crate::transport::types::RawEmailContent::Plain { .. } => None,
                            };

                            {
                                let mut guard = inboxes.lock().unwrap();
                                if let Some(entry) = guard.get_mut(&hash) {
                                    entry.seen_email_ids.insert(email.id.clone());
                                }
                            }

                            if let Some(handler) = handler.lock().unwrap().as_ref() {
                                handler(NewEmailEvent {
                                    inbox_hash: descriptor.hash.clone(),
                                    email_id: email.id.clone(),
                                    encrypted_metadata,
                                });
                            }
                        }
                    }
                    Err(error) => {
                        tracing::debug!(inbox = %descriptor.hash, error = %error, "poll get_emails failed");
                        Self::emit_error(error_handler, error);
                    }
                }

                initial_interval
            };

            let candidate = Self::jittered(interval, jitter_factor);
            shortest = Some(shortest.map_or(candidate, |s| s.min(candidate)));
        }

        shortest
    }
}

#[async_trait]
impl DeliveryStrategy for PollingStrategy {
    async fn start(
        &self,
        inboxes: Vec<InboxDescriptor>,
        handler: EventHandler,
        cancel: CancellationToken,
    ) {
        {
            let mut guard = self.inboxes.lock().unwrap();
            for descriptor in inboxes {
                guard
                    .entry(descriptor.hash.clone())
                    .or_insert_with(|| PolledInbox::new(descriptor, self.initial_interval));
            }
        }
        *self.handler.lock().unwrap() = Some(handler);

        let api = self.api.clone();
        let inboxes_state = self.inboxes.clone();
        let handler_state = self.handler.clone();
        let error_handler_state = self.error_handler.clone();
        let backoff_multiplier = self.backoff_multiplier;
        let max_backoff = self.max_backoff;
        let initial_interval = self.initial_interval;
        let jitter_factor = self.jitter_factor;
        let task_cancel = cancel.clone();

        let join = tokio::spawn(async move {
            loop {
                if task_cancel.is_cancelled() {
                    return;
                }

                let next_interval = Self::poll_once(
                    &api,
                    &inboxes_state,
                    &handler_state,
                    &error_handler_state,
                    backoff_multiplier,
                    max_backoff,
                    initial_interval,
                    jitter_factor,
                    &task_cancel,
                )
                .await
                .unwrap_or(initial_interval);

                tokio::select! {
                    _ = task_cancel.cancelled() => return,
                    _ = tokio::time::sleep(next_interval) => {}
                }
            }
        });

        *self.task.lock().unwrap() = Some(join);
    }

    async fn stop(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }

    async fn add_inbox(&self, descriptor: InboxDescriptor) {
        let mut guard = self.inboxes.lock().unwrap();
        guard
            .entry(descriptor.hash.clone())
            .or_insert_with(|| PolledInbox::new(descriptor, self.initial_interval));
    }

    async fn remove_inbox(&self, hash: &str) {
        self.inboxes.lock().unwrap().remove(hash);
    }

    fn on_error(&self, handler: ErrorHandler) {
        *self.error_handler.lock().unwrap() = Some(handler);
    }

    fn on_reconnect(&self, _handler: Arc<dyn Fn() + Send + Sync>) {
        // Polling has no persistent connection to reconnect.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_converges_per_p3() {
        let initial = Duration::from_millis(100);
        let multiplier = 2.0;
        let max_backoff = Duration::from_secs(1);

        let mut interval = initial;
        let expected = [100, 200, 400, 800, 1000, 1000, 1000, 1000, 1000, 1000];
        for expected_ms in expected {
            assert_eq!(interval.as_millis() as u64, expected_ms);
            interval = interval.mul_f64(multiplier).min(max_backoff);
        }
    }
}
