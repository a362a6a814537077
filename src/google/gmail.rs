//! Gmail API client for the calls the auto-responder needs: labels,
//! unread mail, threads, the profile, sending replies and labelling
//! threads.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::oauth::Authenticator;
use crate::triage::MailService;

/// Message and thread structures from Gmail API documentation
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MessageResponse {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesResponse {
    pub messages: Option<Vec<MessageResponse>>,
    #[serde(rename = "nextPageToken")]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: String,
    pub snippet: Option<String>,
    pub payload: Option<MessagePayload>,
    #[serde(rename = "labelIds")]
    pub label_ids: Option<Vec<String>>,
    #[serde(rename = "internalDate")]
    pub internal_date: String,
}

impl Message {
    /// `internalDate` is epoch milliseconds sent as a string.
    pub fn timestamp(&self) -> Result<i64> {
        self.internal_date.parse().with_context(|| {
            format!(
                "Message {} has a malformed internalDate: {:?}",
                self.id, self.internal_date
            )
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub headers: Option<Vec<MessageHeader>>,
    #[serde(rename = "mimeType")]
    pub mimetype: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ListLabelsResponse {
    pub labels: Option<Vec<Label>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    #[serde(rename = "emailAddress")]
    pub email_address: String,
    #[serde(rename = "messagesTotal")]
    pub messages_total: Option<u64>,
    #[serde(rename = "threadsTotal")]
    pub threads_total: Option<u64>,
    #[serde(rename = "historyId")]
    pub history_id: Option<String>,
}

#[derive(Serialize)]
struct CreateLabelRequest<'a> {
    name: &'a str,
    #[serde(rename = "labelListVisibility")]
    label_list_visibility: &'a str,
    #[serde(rename = "messageListVisibility")]
    message_list_visibility: &'a str,
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    #[serde(rename = "threadId")]
    thread_id: &'a str,
    raw: &'a str,
}

#[derive(Serialize)]
struct ModifyThreadRequest<'a> {
    #[serde(rename = "addLabelIds")]
    add_label_ids: &'a [String],
}

/// Look up a header by name, ignoring case as Gmail does not normalise it.
pub fn find_header<'a>(message: &'a Message, name: &str) -> Option<&'a str> {
    message
        .payload
        .as_ref()?
        .headers
        .as_ref()?
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

pub fn extract_from(message: &Message) -> Option<&str> {
    find_header(message, "From")
}

pub fn extract_subject(message: &Message) -> Option<&str> {
    find_header(message, "Subject")
}

/// Encode a raw RFC 822 message for the `raw` field of the send API.
pub fn encode_raw(input: &str) -> String {
    URL_SAFE.encode(input.as_bytes())
}

pub struct GmailClient {
    client: Client,
    base_url: String,
    auth: Authenticator,
}

impl GmailClient {
    /// Shares the authenticator's HTTP client and its request timeout.
    pub fn new(base_url: &str, auth: Authenticator) -> Self {
        Self {
            client: auth.client().clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/gmail/v1/users/me/{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder, what: &str) -> Result<T> {
        let access_token = self.auth.access_token().await?;
        let res = req.bearer_auth(access_token).send().await?;
        let status = res.status();
        let text = res.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("{} failed: {} ({})", what, status, text);
        }
        let parsed = serde_json::from_str(&text)
            .with_context(|| format!("{} returned an unexpected body", what))?;
        Ok(parsed)
    }
}

#[async_trait]
impl MailService for GmailClient {
    async fn list_labels(&self) -> Result<Vec<Label>> {
        let req = self.client.get(self.url("labels"));
        let res: ListLabelsResponse = self.send(req, "Label list").await?;
        Ok(res.labels.unwrap_or_default())
    }

    async fn create_label(&self, name: &str) -> Result<Label> {
        let body = CreateLabelRequest {
            name,
            label_list_visibility: "labelShow",
            message_list_visibility: "show",
        };
        let req = self.client.post(self.url("labels")).json(&body);
        self.send(req, "Label create").await
    }

    /// List unread inbox messages, newest first as Gmail returns them.
    /// With `max_results` only the first page is fetched, otherwise every
    /// page is followed.
    async fn list_unread_inbox(
        &self,
        max_results: Option<u32>,
        after_secs: Option<i64>,
    ) -> Result<Vec<MessageResponse>> {
        let search = match after_secs {
            Some(secs) => format!("is:unread after:{}", secs.max(0)),
            None => String::from("is:unread"),
        };
        let mut messages = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![
                ("labelIds", String::from("INBOX")),
                ("q", search.clone()),
            ];
            if let Some(n) = max_results {
                query.push(("maxResults", n.to_string()));
            }
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let req = self.client.get(self.url("messages")).query(&query);
            let res: ListMessagesResponse = self.send(req, "Unread fetch").await?;
            messages.extend(res.messages.unwrap_or_default());

            match res.next_page_token {
                Some(token) if max_results.is_none() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(messages)
    }

    async fn get_message(&self, id: &str) -> Result<Message> {
        let req = self
            .client
            .get(self.url(&format!("messages/{}", id)))
            .query(&[
                ("format", "metadata"),
                ("metadataHeaders", "From"),
                ("metadataHeaders", "Subject"),
            ]);
        self.send(req, "Message fetch").await
    }

    async fn get_thread(&self, id: &str) -> Result<Thread> {
        let req = self
            .client
            .get(self.url(&format!("threads/{}", id)))
            .query(&[("format", "full")]);
        self.send(req, "Thread fetch").await
    }

    async fn get_profile(&self) -> Result<Profile> {
        let req = self.client.get(self.url("profile"));
        self.send(req, "Profile fetch").await
    }

    async fn send_message(&self, thread_id: &str, raw: &str) -> Result<()> {
        let body = SendMessageRequest { thread_id, raw };
        let req = self.client.post(self.url("messages/send")).json(&body);
        let sent: MessageResponse = self.send(req, "Message send").await?;
        tracing::debug!("Sent message {} on thread {}", sent.id, sent.thread_id);
        Ok(())
    }

    async fn modify_thread_labels(&self, thread_id: &str, add_label_ids: &[String]) -> Result<()> {
        let body = ModifyThreadRequest { add_label_ids };
        let req = self
            .client
            .post(self.url(&format!("threads/{}/modify", thread_id)))
            .json(&body);
        let _: serde_json::Value = self.send(req, "Thread modify").await?;
        Ok(())
    }
}
