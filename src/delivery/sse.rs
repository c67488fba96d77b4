use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::transport::api::ApiClient;
use crate::transport::types::{InboxDescriptor, NewEmailEvent};

use super::{DeliveryStrategy, ErrorHandler, EventHandler};

/// Why a single SSE connection attempt ended. Only [`DisconnectCause::StreamErrored`]
/// counts towards the reconnect backoff; the other three are routine.
enum DisconnectCause {
    ParentCancelled,
    ReconfigCancelled,
    /// The stream ended with a clean EOF rather than a transport error —
    /// reopen immediately with the current set, same as a reconfiguration.
    CleanEof,
    StreamErrored(Error),
}

struct SharedState {
    inboxes: StdMutex<HashMap<String, InboxDescriptor>>,
    handler: StdMutex<Option<EventHandler>>,
    error_handler: StdMutex<Option<ErrorHandler>>,
    reconnect_handler: StdMutex<Option<Arc<dyn Fn() + Send + Sync>>>,
    connected_once: StdMutex<bool>,
    connected_notify: Notify,
    last_error: StdMutex<Option<String>>,
    reconnect_signal: Notify,
    /// Cancelled to force the current connection to drop and reopen with an
    /// updated inbox set, without counting against the reconnect backoff.
    reconfig_cancel: StdMutex<CancellationToken>,
}

/// Maintains a persistent `GET /api/events` stream over the monitored inbox
/// set, reconnecting with exponential backoff on genuine failures and
/// reopening (without backoff) whenever the set changes.
pub struct SseStrategy {
    api: ApiClient,
    base_url: String,
    state: Arc<SharedState>,
    task: StdMutex<Option<JoinHandle<()>>>,
    attempts: Arc<AtomicU32>,
    max_reconnect_attempts: u32,
    base_backoff: Duration,
}

impl SseStrategy {
    pub fn new(api: ApiClient, base_url: impl Into<String>) -> Self {
        Self {
            api,
            base_url: base_url.into(),
            state: Arc::new(SharedState {
                inboxes: StdMutex::new(HashMap::new()),
                handler: StdMutex::new(None),
                error_handler: StdMutex::new(None),
                reconnect_handler: StdMutex::new(None),
                connected_once: StdMutex::new(false),
                connected_notify: Notify::new(),
                last_error: StdMutex::new(None),
                reconnect_signal: Notify::new(),
                reconfig_cancel: StdMutex::new(CancellationToken::new()),
            }),
            task: StdMutex::new(None),
            attempts: Arc::new(AtomicU32::new(0)),
            max_reconnect_attempts: 10,
            base_backoff: Duration::from_millis(500),
        }
    }

    /// Resolves once the stream has connected at least once. Resolves
    /// immediately if it already has.
    pub async fn connected(&self) {
        if *self.state.connected_once.lock().unwrap() {
            return;
        }
        self.state.connected_notify.notified().await;
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.last_error.lock().unwrap().clone()
    }

    fn hashes(state: &SharedState) -> Vec<String> {
        let mut hashes: Vec<String> = state.inboxes.lock().unwrap().keys().cloned().collect();
        hashes.sort();
        hashes
    }

    fn emit_error(state: &SharedState, error: Error) {
        *state.last_error.lock().unwrap() = Some(error.to_string());
        if let Some(handler) = state.error_handler.lock().unwrap().as_ref() {
            handler(error);
        }
    }

    /// Open one `GET /api/events` connection for the current hash set and
    /// stream events from it until it drops, the parent cancels, or a
    /// reconfiguration forces a reopen.
    async fn run_connection(
        client: &reqwest::Client,
        base_url: &str,
        state: &Arc<SharedState>,
        parent_cancel: &CancellationToken,
        reconfig_cancel: CancellationToken,
    ) -> DisconnectCause {
        let hashes = Self::hashes(state);
        let url = format!("{base_url}/api/events?inboxes={}", hashes.join(","));

        let request = client
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");

        let response = tokio::select! {
            _ = parent_cancel.cancelled() => return DisconnectCause::ParentCancelled,
            _ = reconfig_cancel.cancelled() => return DisconnectCause::ReconfigCancelled,
            result = request.send() => result,
        };

        let response = match response {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                return DisconnectCause::StreamErrored(Error::api(
                    resp.status().as_u16(),
                    "SSE connection rejected".to_owned(),
                    None,
                    None,
                ));
            }
            Err(err) => return DisconnectCause::StreamErrored(Error::network(err)),
        };

        *state.connected_once.lock().unwrap() = true;
        state.connected_notify.notify_waiters();
        if let Some(reconnect) = state.reconnect_handler.lock().unwrap().as_ref() {
            let reconnect = reconnect.clone();
            tokio::spawn(async move { reconnect() });
        }

        let mut stream = response.bytes_stream().eventsource();

        loop {
            let next = tokio::select! {
                _ = parent_cancel.cancelled() => return DisconnectCause::ParentCancelled,
                _ = reconfig_cancel.cancelled() => return DisconnectCause::ReconfigCancelled,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    if event.data.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<NewEmailEvent>(&event.data) {
                        Ok(parsed) => {
                            if let Some(handler) = state.handler.lock().unwrap().as_ref() {
                                handler(parsed);
                            }
                        }
                        Err(error) => {
                            tracing::debug!(error = %error, "could not decode SSE event");
                        }
                    }
                }
                Some(Err(err)) => {
                    return DisconnectCause::StreamErrored(Error::api(
                        0,
                        format!("SSE stream error: {err}"),
                        None,
                        None,
                    ));
                }
                None => {
                    tracing::debug!("SSE stream ended cleanly, reopening");
                    return DisconnectCause::CleanEof;
                }
            }
        }
    }
}

#[async_trait]
impl DeliveryStrategy for SseStrategy {
    async fn start(
        &self,
        inboxes: Vec<InboxDescriptor>,
        handler: EventHandler,
        cancel: CancellationToken,
    ) {
        {
            let mut guard = self.state.inboxes.lock().unwrap();
            for descriptor in inboxes {
                guard.insert(descriptor.hash.clone(), descriptor);
            }
        }
        *self.state.handler.lock().unwrap() = Some(handler);

        let client = self.api.transport().client().clone();
        let base_url = self.base_url.clone();
        let state = self.state.clone();
        let attempts = self.attempts.clone();
        let max_reconnect_attempts = self.max_reconnect_attempts;
        let base_backoff = self.base_backoff;
        let task_cancel = cancel.clone();

        let join = tokio::spawn(async move {
            loop {
                if task_cancel.is_cancelled() {
                    return;
                }

                if Self::hashes(&state).is_empty() {
                    tokio::select! {
                        _ = task_cancel.cancelled() => return,
                        _ = state.reconnect_signal.notified() => {}
                    }
                    continue;
                }

                let reconfig_cancel = CancellationToken::new();
                *state.reconfig_cancel.lock().unwrap() = reconfig_cancel.clone();

                let cause =
                    Self::run_connection(&client, &base_url, &state, &task_cancel, reconfig_cancel)
                        .await;

                match cause {
                    DisconnectCause::ParentCancelled => return,
                    DisconnectCause::ReconfigCancelled | DisconnectCause::CleanEof => {
                        attempts.store(0, Ordering::SeqCst);
                        continue;
                    }
                    DisconnectCause::StreamErrored(error) => {
                        tracing::debug!(error = %error, "SSE connection dropped");
                        Self::emit_error(&state, error);

                        let current = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                        if current > max_reconnect_attempts {
                            tracing::warn!("SSE reconnect attempts exhausted, stopping");
                            return;
                        }

                        let delay = base_backoff * 2u32.pow(current.saturating_sub(1));
                        tokio::select! {
                            _ = task_cancel.cancelled() => return,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
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
        let was_empty = {
            let mut guard = self.state.inboxes.lock().unwrap();
            let was_empty = guard.is_empty();
            guard.insert(descriptor.hash.clone(), descriptor);
            was_empty
        };

        if was_empty {
            self.state.reconnect_signal.notify_one();
        } else {
            self.state.reconfig_cancel.lock().unwrap().cancel();
        }
    }

    async fn remove_inbox(&self, hash: &str) {
        self.state.inboxes.lock().unwrap().remove(hash);
        self.state.reconfig_cancel.lock().unwrap().cancel();
    }

    fn on_error(&self, handler: ErrorHandler) {
        *self.state.error_handler.lock().unwrap() = Some(handler);
    }

    fn on_reconnect(&self, handler: Arc<dyn Fn() + Send + Sync>) {
        *self.state.reconnect_handler.lock().unwrap() = Some(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_matches_p3_style_doubling() {
        let base = Duration::from_millis(500);
        let expected = [500, 1000, 2000, 4000];
        for (attempt, expected_ms) in (1u32..=4).zip(expected) {
            let delay = base * 2u32.pow(attempt - 1);
            assert_eq!(delay.as_millis() as u64, expected_ms);
        }
    }

    #[test]
    fn hashes_are_sorted_for_stable_query_strings() {
        let state = SharedState {
            inboxes: StdMutex::new(HashMap::from([
                ("h2".to_owned(), InboxDescriptor { hash: "h2".into(), address: "b@x".into() }),
                ("h1".to_owned(), InboxDescriptor { hash: "h1".into(), address: "a@x".into() }),
            ])),
            handler: StdMutex::new(None),
            error_handler: StdMutex::new(None),
            reconnect_handler: StdMutex::new(None),
            connected_once: StdMutex::new(false),
            connected_notify: Notify::new(),
            last_error: StdMutex::new(None),
            reconnect_signal: Notify::new(),
            reconfig_cancel: StdMutex::new(CancellationToken::new()),
        };
        assert_eq!(SseStrategy::hashes(&state), vec!["h1".to_owned(), "h2".to_owned()]);
    }
}
