use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::delivery::EventHandler;
use crate::envelope::{Email, EnvelopeDecryptor};
use crate::error::Error;
use crate::transport::api::ApiClient;
use crate::transport::types::{NewEmailEvent, RawEmail};

pub type EmailCallback = Arc<dyn Fn(Email) + Send + Sync>;
pub type EmailPredicate = Arc<dyn Fn(&Email) -> bool + Send + Sync>;

struct Waiter {
    id: u64,
    predicate: EmailPredicate,
    required_count: usize,
    matches_so_far: Vec<Email>,
    completion: Option<oneshot::Sender<Result<Vec<Email>, Error>>>,
}

struct WatcherState {
    seen_ids: HashSet<String>,
    callbacks: Vec<EmailCallback>,
    waiters: Vec<Waiter>,
    next_waiter_id: u64,
}

/// Turns the raw `NewEmailEvent` stream from a delivery strategy into
/// per-inbox callback and wait primitives, de-duplicating by email id.
///
/// A single `seen_ids` set, primed by one fetch at construction time, is
/// shared by the event-dispatch path, the prime fetch, and every
/// `WaitForEmail` immediate-fetch — so each email id is delivered at most
/// once across the watcher's lifetime.
pub struct InboxWatcher {
    api: ApiClient,
    inbox_hash: String,
    address: String,
    decryptor: Arc<dyn EnvelopeDecryptor>,
    state: Arc<StdMutex<WatcherState>>,
    callback_semaphore: Option<Arc<Semaphore>>,
    error_handler: StdMutex<Option<Arc<dyn Fn(Error) + Send + Sync>>>,
    events_tx: mpsc::UnboundedSender<NewEmailEvent>,
    events_rx: StdMutex<Option<mpsc::UnboundedReceiver<NewEmailEvent>>>,
}

impl InboxWatcher {
    /// Construct the watcher and perform the prime fetch: emails that
    /// already exist are marked seen so they are never announced as new.
    pub async fn new(
        api: ApiClient,
        inbox_hash: impl Into<String>,
        address: impl Into<String>,
        decryptor: Arc<dyn EnvelopeDecryptor>,
        callback_concurrency: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Self, Error> {
        let address = address.into();
        let existing = api.get_emails(&address, false, cancel).await?;
        let seen_ids = existing.into_iter().map(|email| email.id).collect();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            api,
            inbox_hash: inbox_hash.into(),
            address,
            decryptor,
            state: Arc::new(StdMutex::new(WatcherState {
                seen_ids,
                callbacks: Vec::new(),
                waiters: Vec::new(),
                next_waiter_id: 0,
            })),
            callback_semaphore: callback_concurrency.map(|n| Arc::new(Semaphore::new(n.max(1)))),
            error_handler: StdMutex::new(None),
            events_tx,
            events_rx: StdMutex::new(Some(events_rx)),
        })
    }

    pub fn on_error(&self, handler: Arc<dyn Fn(Error) + Send + Sync>) {
        *self.error_handler.lock().unwrap() = Some(handler);
    }

    pub fn on_email(&self, callback: EmailCallback) {
        self.state.lock().unwrap().callbacks.push(callback);
    }

    /// The closure to register as a strategy's [`EventHandler`]. Matching
    /// events are pushed onto a single queue drained by one consumer task
    /// (spawned the first time this is called) rather than spawned as
    /// independent tasks — `handle_event` does async network I/O, so
    /// concurrent tasks could otherwise race and finish out of the order
    /// they arrived in, breaking per-inbox delivery order.
    pub fn event_handler(self: &Arc<Self>) -> EventHandler {
        if let Some(mut rx) = self.events_rx.lock().unwrap().take() {
            let watcher = self.clone();
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    watcher.handle_event(event).await;
                }
            });
        }

        let inbox_hash = self.inbox_hash.clone();
        let tx = self.events_tx.clone();
        Arc::new(move |event: NewEmailEvent| {
            if event.inbox_hash != inbox_hash {
                return;
            }
            let _ = tx.send(event);
        })
    }

    async fn handle_event(&self, event: NewEmailEvent) {
        {
            let mut guard = self.state.lock().unwrap();
            if guard.seen_ids.contains(&event.email_id) {
                return;
            }
            guard.seen_ids.insert(event.email_id.clone());
        }

        let cancel = CancellationToken::new();
        let raw = match self.api.get_email(&self.address, &event.email_id, &cancel).await {
            Ok(raw) => raw,
            Err(error) => {
                self.emit_error(error);
                return;
            }
        };

        if let Err(error) = self.decrypt_and_dispatch(raw).await {
            self.emit_error(error);
        }
    }

    async fn decrypt_and_dispatch(&self, raw: RawEmail) -> Result<(), Error> {
        let metadata = self.decryptor.decrypt(&raw.content).await?;
        let email = Email {
            id: raw.id,
            inbox_hash: self.inbox_hash.clone(),
            received_at: raw.received_at,
            is_read: raw.is_read,
            metadata,
        };
        self.dispatch(email).await;
        Ok(())
    }

    /// Append `email` to every matching waiter, fulfill those that reached
    /// their required count, then invoke every registered callback.
    async fn dispatch(&self, email: Email) {
        let (callbacks, fulfilled) = {
            let mut guard = self.state.lock().unwrap();
            let callbacks = guard.callbacks.clone();

            let mut fulfilled_indices = Vec::new();
            for (idx, waiter) in guard.waiters.iter_mut().enumerate() {
                if (waiter.predicate)(&email) {
                    waiter.matches_so_far.push(email.clone());
                    if waiter.matches_so_far.len() >= waiter.required_count {
                        fulfilled_indices.push(idx);
                    }
                }
            }

            let mut fulfilled = Vec::new();
            for idx in fulfilled_indices.into_iter().rev() {
                fulfilled.push(guard.waiters.remove(idx));
            }

            (callbacks, fulfilled)
        };

        for waiter in fulfilled {
            if let Some(sender) = waiter.completion {
                let _ = sender.send(Ok(waiter.matches_so_far));
            }
        }

        self.dispatch_callbacks(callbacks, email).await;
    }

    async fn dispatch_callbacks(&self, callbacks: Vec<EmailCallback>, email: Email) {
        match &self.callback_semaphore {
            Some(semaphore) => {
                let mut handles = Vec::with_capacity(callbacks.len());
                for callback in callbacks {
                    let semaphore = semaphore.clone();
                    let email = email.clone();
                    handles.push(tokio::spawn(async move {
                        let _permit = semaphore.acquire_owned().await;
                        callback(email);
                    }));
                }
                for handle in handles {
                    let _ = handle.await;
                }
            }
            None => {
                for callback in callbacks {
                    callback(email.clone());
                }
            }
        }
    }

    fn emit_error(&self, error: Error) {
        tracing::debug!(error = %error, "inbox watcher error");
        if let Some(handler) = self.error_handler.lock().unwrap().as_ref() {
            handler(error);
        }
    }

    /// Wait for a single email matching `predicate`.
    pub async fn wait_for_email(
        &self,
        predicate: EmailPredicate,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Email, Error> {
        let matches = self.wait_for_email_count(predicate, 1, deadline, cancel).await?;
        Ok(matches.into_iter().next().expect("required_count=1 yields one match"))
    }

    /// Wait for `required_count` emails matching `predicate`, checking
    /// existing emails first before arming a waiter (so an email that
    /// arrived just before this call is never missed).
    pub async fn wait_for_email_count(
        &self,
        predicate: EmailPredicate,
        required_count: usize,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<Email>, Error> {
        let required_count = required_count.max(1);

        let existing = self.api.get_emails(&self.address, true, cancel).await?;
        let mut immediate_matches = Vec::new();
        for raw in existing {
            // Claim the id against the same `seen_ids` set the prime fetch
            // and the event path use, so an email resolved here is never
            // also dispatched to callbacks when its strategy event arrives.
            self.state.lock().unwrap().seen_ids.insert(raw.id.clone());

            let metadata = match self.decryptor.decrypt(&raw.content).await {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };
            let email = Email {
                id: raw.id,
                inbox_hash: self.inbox_hash.clone(),
                received_at: raw.received_at,
                is_read: raw.is_read,
                metadata,
            };
            if predicate(&email) {
                immediate_matches.push(email);
                if immediate_matches.len() >= required_count {
                    return Ok(immediate_matches);
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        let waiter_id = {
            let mut guard = self.state.lock().unwrap();
            let id = guard.next_waiter_id;
            guard.next_waiter_id += 1;
            guard.waiters.push(Waiter {
                id,
                predicate,
                required_count,
                matches_so_far: immediate_matches,
                completion: Some(tx),
            });
            id
        };

        tokio::select! {
            result = rx => result.unwrap_or(Err(Error::Cancelled)),
            _ = cancel.cancelled() => {
                self.remove_waiter(waiter_id);
                Err(Error::Cancelled)
            }
            _ = tokio::time::sleep(deadline) => {
                self.remove_waiter(waiter_id);
                Err(Error::DeadlineExceeded(deadline))
            }
        }
    }

    fn remove_waiter(&self, id: u64) {
        self.state.lock().unwrap().waiters.retain(|waiter| waiter.id != id);
    }
}
