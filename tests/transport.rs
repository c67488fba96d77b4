use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;
use vaultsandbox::config::Config;
use vaultsandbox::transport::api::ApiClient;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn test_config(base_url: String) -> Config {
    let mut config = Config::new(base_url, "test-key");
    config.max_retries = 2;
    config.retry_delay = Duration::from_millis(5);
    config
}

/// Fails the first `fail_times` requests with 503, then succeeds — used in
/// place of stacking two `Mock`s so the retry test isn't sensitive to
/// wiremock's matcher-priority resolution between overlapping mocks.
struct FlakyThenOk {
    calls: AtomicU32,
    fail_times: u32,
}

impl Respond for FlakyThenOk {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_times {
            ResponseTemplate::new(503)
        } else {
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "emailCount": 0,
                "emailsHash": "h0",
            }))
        }
    }
}

#[tokio::test]
async fn retries_transient_status_until_success() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/inboxes/a@x.test/sync"))
        .respond_with(FlakyThenOk { calls: AtomicU32::new(0), fail_times: 2 })
        .expect(3)
        .mount(&server)
        .await;

    let api = ApiClient::new(&test_config(server.uri())).unwrap();
    let cancel = CancellationToken::new();

    let sync = api.get_sync("a@x.test", &cancel).await.unwrap();
    assert_eq!(sync.email_count, 0);
    assert_eq!(sync.emails_hash, "h0");
}

#[tokio::test]
async fn exhausts_retries_and_returns_api_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/inboxes/a@x.test/sync"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3) // initial attempt + max_retries(2)
        .mount(&server)
        .await;

    let api = ApiClient::new(&test_config(server.uri())).unwrap();
    let cancel = CancellationToken::new();

    let error = api.get_sync("a@x.test", &cancel).await.unwrap_err();
    assert!(!error.is_unauthorized());
    assert!(!error.is_cancelled());
}

#[tokio::test]
async fn does_not_retry_non_retryable_status() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/inboxes/a@x.test/sync"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let api = ApiClient::new(&test_config(server.uri())).unwrap();
    let cancel = CancellationToken::new();

    let error = api.get_sync("a@x.test", &cancel).await.unwrap_err();
    assert!(error.is_unauthorized());
}

#[tokio::test]
async fn cancellation_during_retry_wait_short_circuits() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/inboxes/a@x.test/sync"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut config = test_config(server.uri());
    config.retry_delay = Duration::from_secs(30);
    let api = ApiClient::new(&config).unwrap();

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel_clone.cancel();
    });

    let error = api.get_sync("a@x.test", &cancel).await.unwrap_err();
    assert!(error.is_cancelled());
}
