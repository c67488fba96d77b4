use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub mod config;
pub mod delivery;
pub mod envelope;
pub mod error;
pub mod inbox;
pub mod transport;
pub mod watcher;

pub use config::{Config, DeliveryMode};
pub use envelope::{Email, EnvelopeDecryptor, PassthroughDecryptor};
pub use error::{Error, ResourceType};
pub use inbox::Inbox;
pub use transport::api::ApiClient;
pub use transport::types::InboxDescriptor;
pub use watcher::{EmailCallback, EmailPredicate, InboxWatcher};

/// Install a JSON-formatted `tracing` subscriber honoring `RUST_LOG`
/// (falling back to `info` for this crate) — the same `EnvFilter` +
/// `fmt::layer().json()` pairing every other binary in this workspace uses.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}
