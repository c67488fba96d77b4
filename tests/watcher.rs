use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;
use vaultsandbox::config::Config;
use vaultsandbox::envelope::PassthroughDecryptor;
use vaultsandbox::transport::api::ApiClient;
use vaultsandbox::transport::types::NewEmailEvent;
use vaultsandbox::{Email, InboxWatcher};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn plain_email(id: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "inboxId": "h1",
        "receivedAt": "2026-01-01T00:00:00Z",
        "isRead": false,
        "metadata": {"subject": id},
    })
}

#[tokio::test]
async fn prime_fetch_suppresses_already_known_ids() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/inboxes/a@x.test/emails"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![plain_email("e1")]))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/inboxes/a@x.test/emails/e3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(plain_email("e3")))
        .expect(1)
        .mount(&server)
        .await;

    let config = Config::new(server.uri(), "test-key");
    let api = ApiClient::new(&config).unwrap();
    let cancel = CancellationToken::new();

    let watcher = Arc::new(
        InboxWatcher::new(api, "h1", "a@x.test", Arc::new(PassthroughDecryptor), None, &cancel)
            .await
            .unwrap(),
    );

    let delivered = Arc::new(StdMutex::new(Vec::new()));
    let delivered_clone = delivered.clone();
    watcher.on_email(Arc::new(move |email: Email| {
        delivered_clone.lock().unwrap().push(email.id);
    }));

    let handler = watcher.event_handler();
    handler(NewEmailEvent { inbox_hash: "h1".to_owned(), email_id: "e1".to_owned(), encrypted_metadata: None });
    handler(NewEmailEvent { inbox_hash: "h1".to_owned(), email_id: "e3".to_owned(), encrypted_metadata: None });

    // handle_event is dispatched on a spawned task; give it a moment to run.
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(*delivered.lock().unwrap(), vec!["e3".to_owned()]);
}

#[tokio::test]
async fn wait_for_email_finds_immediate_match_without_arming_a_waiter() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/inboxes/a@x.test/emails"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![plain_email("e1")]))
        .mount(&server)
        .await;

    let config = Config::new(server.uri(), "test-key");
    let api = ApiClient::new(&config).unwrap();
    let cancel = CancellationToken::new();

    let watcher = InboxWatcher::new(api, "h1", "a@x.test", Arc::new(PassthroughDecryptor), None, &cancel)
        .await
        .unwrap();

    let email = watcher
        .wait_for_email(Arc::new(|email: &Email| email.id == "e1"), Duration::from_secs(1), &cancel)
        .await
        .unwrap();

    assert_eq!(email.id, "e1");
}

#[tokio::test]
async fn wait_for_email_times_out_when_nothing_matches() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/inboxes/a@x.test/emails"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
        .mount(&server)
        .await;

    let config = Config::new(server.uri(), "test-key");
    let api = ApiClient::new(&config).unwrap();
    let cancel = CancellationToken::new();

    let watcher = InboxWatcher::new(api, "h1", "a@x.test", Arc::new(PassthroughDecryptor), None, &cancel)
        .await
        .unwrap();

    let error = watcher
        .wait_for_email(Arc::new(|_email: &Email| true), Duration::from_millis(50), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(error, vaultsandbox::Error::DeadlineExceeded(_)));
}
