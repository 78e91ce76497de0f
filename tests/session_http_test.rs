use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use yup_oauth2::ApplicationSecret;

use gmaildash::gmail_api::{
    default_scopes, ConsentFlow, ConsentGrant, Credential, CredentialStore, FileTokenStore,
    MailClient, Session, TokenStore,
};
use gmaildash::{GmailError, Result};

struct NoConsent;

#[async_trait]
impl ConsentFlow for NoConsent {
    async fn obtain(&self, _secret: ApplicationSecret, _scopes: Vec<String>) -> Result<ConsentGrant> {
        Err(GmailError::Authentication("consent not expected in this test".into()))
    }
}

fn credential(token: &str, expires_in: Duration) -> Credential {
    serde_json::from_value(json!({
        "token": token,
        "refresh_token": "refresh-1",
        "scopes": default_scopes(),
        "expiry": (Utc::now() + expires_in).to_rfc3339(),
    }))
    .unwrap()
}

fn session(server: &MockServer, token_file: &std::path::Path, credential: Credential) -> Session {
    let secret = ApplicationSecret {
        client_id: "client-123".to_string(),
        client_secret: "shh".to_string(),
        token_uri: format!("{}/token", server.uri()),
        auth_uri: format!("{}/auth", server.uri()),
        ..Default::default()
    };
    let store = Arc::new(CredentialStore::new(
        secret,
        Box::new(FileTokenStore::new(token_file)),
        Box::new(NoConsent),
    ));
    Session::new(reqwest::Client::new(), store, default_scopes(), credential)
        .with_base_url(format!("{}/gmail/v1", server.uri()))
}

#[tokio::test]
async fn test_list_inbox_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages"))
        .and(query_param("labelIds", "INBOX"))
        .and(query_param("maxResults", "2"))
        .and(header("authorization", "Bearer live-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messages": [{"id": "m2", "threadId": "t2"}, {"id": "m1", "threadId": "t1"}],
            "resultSizeEstimate": 2
        })))
        .expect(1)
        .mount(&server)
        .await;
    for (id, subject, labels) in [("m2", "Newest", vec!["INBOX", "UNREAD"]), ("m1", "Older", vec!["INBOX"])] {
        Mock::given(method("GET"))
            .and(path(format!("/gmail/v1/users/me/messages/{}", id)))
            .and(query_param("format", "metadata"))
            .and(query_param("metadataHeaders", "Subject"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": id,
                "snippet": "preview",
                "labelIds": labels,
                "payload": {"headers": [
                    {"name": "From", "value": "Alice <alice@example.com>"},
                    {"name": "Subject", "value": subject}
                ]}
            })))
            .expect(1)
            .mount(&server)
            .await;
    }

    let dir = tempfile::tempdir().unwrap();
    let client = MailClient::new(session(
        &server,
        &dir.path().join("token.json"),
        credential("live-token", Duration::hours(1)),
    ));

    let inbox = client.list_inbox(2).await.unwrap();
    assert_eq!(inbox.len(), 2);
    assert_eq!(inbox[0].id, "m2");
    assert_eq!(inbox[0].subject, "Newest");
    assert_eq!(inbox[0].unread, Some(true));
    assert_eq!(inbox[1].unread, Some(false));
    assert_eq!(inbox[1].from, "Alice <alice@example.com>");
}

#[tokio::test]
async fn test_read_email_full_format_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages/abc"))
        .and(query_param("format", "full"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "abc",
            "payload": {
                "mimeType": "multipart/alternative",
                "parts": [
                    {"mimeType": "text/plain", "body": {"data": URL_SAFE.encode("Hello there")}},
                    {"mimeType": "text/html", "body": {"data": URL_SAFE.encode("<p>Hello there</p>")}}
                ]
            }
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = MailClient::new(session(
        &server,
        &dir.path().join("token.json"),
        credential("live-token", Duration::hours(1)),
    ));
    assert_eq!(client.read_email("abc").await.unwrap(), "Hello there");
}

#[tokio::test]
async fn test_missing_message_maps_to_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"code": 404, "message": "Requested entity was not found."}
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = MailClient::new(session(
        &server,
        &dir.path().join("token.json"),
        credential("live-token", Duration::hours(1)),
    ));
    let err = client.read_email("gone").await.unwrap_err();
    assert!(matches!(err, GmailError::NotFound(ref id) if id == "gone"));
}

#[tokio::test]
async fn test_server_error_is_remote_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages"))
        .respond_with(ResponseTemplate::new(503).set_body_string("backend unavailable"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = MailClient::new(session(
        &server,
        &dir.path().join("token.json"),
        credential("live-token", Duration::hours(1)),
    ));
    let err = client.list_inbox(5).await.unwrap_err();
    assert!(matches!(err, GmailError::Remote { status: Some(503), .. }));
}

#[tokio::test]
async fn test_send_posts_raw_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/gmail/v1/users/me/messages/send"))
        .and(header("authorization", "Bearer live-token"))
        .and(body_string_contains("\"raw\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "18c0ffee",
            "threadId": "18c0ffee",
            "labelIds": ["SENT"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = MailClient::new(session(
        &server,
        &dir.path().join("token.json"),
        credential("live-token", Duration::hours(1)),
    ));
    let id = client
        .send_email("user@example.com", "Hi", "Body")
        .await
        .unwrap();
    assert_eq!(id, "18c0ffee");
}

#[tokio::test]
async fn test_provider_rejection_on_send_is_validation_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/gmail/v1/users/me/messages/send"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": 400, "message": "Invalid To header"}
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = MailClient::new(session(
        &server,
        &dir.path().join("token.json"),
        credential("live-token", Duration::hours(1)),
    ));
    let err = client
        .send_email("someone@nowhere.example", "Hi", "Body")
        .await
        .unwrap_err();
    assert!(matches!(err, GmailError::Validation { ref field, .. } if field == "to"));
}

#[tokio::test]
async fn test_expired_session_token_is_refreshed_and_persisted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("refresh_token=refresh-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "renewed-token",
            "expires_in": 3600,
            "scope": default_scopes().join(" "),
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages"))
        .and(header("authorization", "Bearer renewed-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let token_file = dir.path().join("token.json");
    let client = MailClient::new(session(
        &server,
        &token_file,
        credential("stale-token", Duration::minutes(-10)),
    ));

    assert!(client.list_inbox(3).await.unwrap().is_empty());
    // The refreshed token is reused, not refreshed again.
    assert!(client.list_inbox(3).await.unwrap().is_empty());

    let persisted = FileTokenStore::new(&token_file).load().unwrap().unwrap();
    let persisted: Credential = serde_json::from_str(&persisted).unwrap();
    assert_eq!(persisted.token, "renewed-token");
    assert_eq!(persisted.refresh_token.as_deref(), Some("refresh-1"));
}

#[tokio::test]
async fn test_id_cannot_reach_another_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/labels"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "labels": [{"id": "INBOX", "name": "INBOX"}]
        })))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = MailClient::new(session(
        &server,
        &dir.path().join("token.json"),
        credential("live-token", Duration::hours(1)),
    ));

    for id in ["../labels", "..", "abc?format=raw", "abc#frag", "a/b"] {
        let err = client.read_email(id).await.unwrap_err();
        assert!(
            matches!(err, GmailError::NotFound(ref missing) if missing == id),
            "{:?} should not resolve",
            id
        );
    }
}
