use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use vaultsandbox::config::Config;
use vaultsandbox::delivery::auto::AutoStrategy;
use vaultsandbox::delivery::DeliveryStrategy;
use vaultsandbox::transport::api::ApiClient;
use vaultsandbox::transport::types::{InboxDescriptor, NewEmailEvent};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// The SSE endpoint is never mounted, so every connection attempt fails
/// immediately and the strategy never signals `Connected()`. `start` should
/// still return — bounded by `sse_connection_timeout` — with polling active.
#[tokio::test]
async fn falls_back_to_polling_when_sse_never_connects() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/inboxes/a@x.test/sync"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "emailCount": 0,
            "emailsHash": "h0",
        })))
        .mount(&server)
        .await;

    let mut config = Config::new(server.uri(), "test-key");
    config.sse_connection_timeout = Duration::from_millis(200);
    config.polling_initial_interval = Duration::from_secs(60);

    let api = ApiClient::new(&config).unwrap();
    let strategy = AutoStrategy::new(api, config.base_url.clone(), &config);

    let descriptor = InboxDescriptor { hash: "h1".to_owned(), address: "a@x.test".to_owned() };
    let cancel = CancellationToken::new();

    let started = Instant::now();
    strategy
        .start(vec![descriptor], Arc::new(|_event: NewEmailEvent| {}), cancel.clone())
        .await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(150), "fell back before the connection timeout elapsed");
    assert!(elapsed < Duration::from_secs(2), "fallback took far longer than the configured timeout");

    strategy.stop().await;
    cancel.cancel();
}
