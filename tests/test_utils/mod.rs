//! Test utilities for integration tests
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::json;

use autoreply::google::gmail::GmailClient;
use autoreply::google::oauth::{
    Authenticator, ClientSecrets, REQUEST_TIMEOUT, StoredToken, http_client,
};

pub const OWNER: &str = "owner@x.com";

/// A mock Gmail server with a working token endpoint and a client
/// pointed at it. Mocks are removed when dropped, so keep the returned
/// token mock alive for the whole test.
pub async fn mock_gmail() -> (ServerGuard, GmailClient, Mock) {
    let mut server = Server::new_async().await;
    let token = server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token": "test_token", "expires_in": 3600}"#)
        .create_async()
        .await;

    let secrets = ClientSecrets {
        client_id: String::from("test_client_id"),
        client_secret: String::from("test_client_secret"),
        redirect_uris: vec![],
    };
    let auth = Authenticator::new(
        http_client(REQUEST_TIMEOUT).expect("Failed to build client"),
        &format!("{}/token", server.url()),
        StoredToken::new(&secrets, "test_refresh_token"),
    );
    let client = GmailClient::new(&server.url(), auth);
    (server, client, token)
}

pub fn message_json(
    id: &str,
    thread_id: &str,
    ts: i64,
    from: &str,
    subject: &str,
) -> serde_json::Value {
    json!({
        "id": id,
        "threadId": thread_id,
        "labelIds": ["INBOX", "UNREAD"],
        "internalDate": ts.to_string(),
        "payload": {
            "mimeType": "text/plain",
            "headers": [
                {"name": "From", "value": from},
                {"name": "Subject", "value": subject}
            ]
        }
    })
}

pub async fn mock_message(
    server: &mut ServerGuard,
    id: &str,
    thread_id: &str,
    ts: i64,
    from: &str,
    subject: &str,
) -> Mock {
    server
        .mock("GET", format!("/gmail/v1/users/me/messages/{}", id).as_str())
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(message_json(id, thread_id, ts, from, subject).to_string())
        .create_async()
        .await
}

/// A thread whose messages were written by `senders`, in order. The
/// mock asserts it was fetched exactly `hits` times.
pub async fn mock_thread(
    server: &mut ServerGuard,
    thread_id: &str,
    senders: &[&str],
    hits: usize,
) -> Mock {
    let messages: Vec<serde_json::Value> = senders
        .iter()
        .enumerate()
        .map(|(i, from)| {
            message_json(
                &format!("{}-{}", thread_id, i),
                thread_id,
                1000 + i as i64,
                from,
                "Subject",
            )
        })
        .collect();
    server
        .mock("GET", format!("/gmail/v1/users/me/threads/{}", thread_id).as_str())
        .match_query(Matcher::UrlEncoded("format".into(), "full".into()))
        .with_status(200)
        .with_body(json!({"id": thread_id, "messages": messages}).to_string())
        .expect(hits)
        .create_async()
        .await
}

pub async fn mock_labels(server: &mut ServerGuard, labels: serde_json::Value) -> Mock {
    server
        .mock("GET", "/gmail/v1/users/me/labels")
        .with_status(200)
        .with_body(json!({ "labels": labels }).to_string())
        .create_async()
        .await
}

pub async fn mock_profile(server: &mut ServerGuard) -> Mock {
    server
        .mock("GET", "/gmail/v1/users/me/profile")
        .with_status(200)
        .with_body(json!({"emailAddress": OWNER, "messagesTotal": 3}).to_string())
        .create_async()
        .await
}
