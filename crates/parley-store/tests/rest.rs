//! REST client behavior against a mock chat backend.

use assert_matches::assert_matches;
use parley_core::UserId;
use parley_store::rest::DEFAULT_TIMEOUT;
use parley_store::{ConversationStore, RestConversationStore, StoreError};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn store(server: &MockServer) -> RestConversationStore {
    RestConversationStore::new(&server.uri(), DEFAULT_TIMEOUT)
        .unwrap()
        .with_token("tok")
}

#[tokio::test]
async fn history_is_fetched_and_sorted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/messages/u1/u2"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "m2", "from": "u2", "to": "u1", "content": "second",
             "timestamp": "2024-05-01T10:00:05", "read": true},
            {"id": "m1", "from": "u1", "to": "u2", "content": "first",
             "timestamp": "2024-05-01T10:00:00.250Z", "read": false}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let history = store(&server)
        .history(&UserId::from("u1"), &UserId::from("u2"))
        .await
        .unwrap();

    let ids: Vec<&str> = history.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2"]);
    assert!(history[1].read);
}

#[tokio::test]
async fn mark_read_uses_put() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/messages/read/u2/u1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    store(&server)
        .mark_read(&UserId::from("u2"), &UserId::from("u1"))
        .await
        .unwrap();
}

#[tokio::test]
async fn unread_for_user() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/messages/unread/u1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "m9", "from": "u3", "to": "u1", "content": "ping",
             "timestamp": "2024-05-02T08:00:00"}
        ])))
        .mount(&server)
        .await;

    let unread = store(&server).unread(&UserId::from("u1")).await.unwrap();
    assert_eq!(unread.len(), 1);
    assert!(!unread[0].read);
}

#[tokio::test]
async fn non_success_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let err = store(&server).unread(&UserId::from("u1")).await.unwrap_err();
    assert_matches!(err, StoreError::Status { status: 500, ref body } if body == "boom");
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn malformed_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = store(&server)
        .history(&UserId::from("u1"), &UserId::from("u2"))
        .await
        .unwrap_err();
    assert_matches!(err, StoreError::Decode(_));
}

#[tokio::test]
async fn unreachable_service_is_a_request_error() {
    // Pooled mock servers keep listening after drop; use a port nobody holds.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let store = RestConversationStore::new(&format!("http://127.0.0.1:{port}"), DEFAULT_TIMEOUT).unwrap();
    let err = store.unread(&UserId::from("u1")).await.unwrap_err();
    assert_matches!(err, StoreError::Request { .. });
}
