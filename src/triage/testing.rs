//! In-memory mail service for exercising the triage loop.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE};

use super::MailService;
use crate::google::gmail::{
    Label, Message, MessageHeader, MessagePayload, MessageResponse, Profile, Thread,
};

#[derive(Default)]
struct State {
    labels: Vec<Label>,
    created_labels: Vec<String>,
    // Listing order, as the service would return it
    unread: Vec<Message>,
    threads: HashMap<String, Vec<Message>>,
    sent: Vec<(String, String)>,
    modified: Vec<(String, Vec<String>)>,
    thread_fetches: Vec<String>,
    list_calls: usize,
    fail_listing: bool,
    failing_messages: HashSet<String>,
    failing_threads: HashSet<String>,
    failing_modifies: HashSet<String>,
}

pub struct FakeMailService {
    owner: String,
    state: Mutex<State>,
}

fn message(id: &str, thread_id: &str, ts: i64, headers: Vec<(&str, &str)>) -> Message {
    Message {
        id: id.to_string(),
        thread_id: thread_id.to_string(),
        snippet: None,
        payload: Some(MessagePayload {
            headers: Some(
                headers
                    .into_iter()
                    .map(|(name, value)| MessageHeader {
                        name: name.to_string(),
                        value: value.to_string(),
                    })
                    .collect(),
            ),
            mimetype: Some("text/plain".to_string()),
        }),
        label_ids: Some(vec!["INBOX".to_string(), "UNREAD".to_string()]),
        internal_date: ts.to_string(),
    }
}

impl FakeMailService {
    pub fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            state: Mutex::new(State::default()),
        }
    }

    fn push_unread(&self, m: Message) {
        let mut state = self.state.lock().unwrap();
        state
            .threads
            .entry(m.thread_id.clone())
            .or_default()
            .push(m.clone());
        state.unread.push(m);
    }

    /// Add an unread inbox message. Listing order follows call order.
    pub fn receive(&self, id: &str, thread_id: &str, ts: i64, from: &str, subject: &str) {
        self.push_unread(message(
            id,
            thread_id,
            ts,
            vec![("From", from), ("Subject", subject)],
        ));
    }

    pub fn receive_without_sender(&self, id: &str, thread_id: &str, ts: i64, subject: &str) {
        self.push_unread(message(id, thread_id, ts, vec![("Subject", subject)]));
    }

    /// Add an already read message to a thread.
    pub fn add_to_thread(&self, thread_id: &str, id: &str, ts: i64, from: &str) {
        let m = message(id, thread_id, ts, vec![("From", from)]);
        let mut state = self.state.lock().unwrap();
        state.threads.entry(thread_id.to_string()).or_default().push(m);
    }

    pub fn add_label(&self, id: &str, name: &str) {
        self.state.lock().unwrap().labels.push(Label {
            id: id.to_string(),
            name: name.to_string(),
        });
    }

    pub fn fail_listing(&self, fail: bool) {
        self.state.lock().unwrap().fail_listing = fail;
    }

    pub fn fail_message(&self, id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_messages
            .insert(id.to_string());
    }

    pub fn fail_thread(&self, id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_threads
            .insert(id.to_string());
    }

    pub fn heal_thread(&self, id: &str) {
        self.state.lock().unwrap().failing_threads.remove(id);
    }

    pub fn fail_modify(&self, thread_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_modifies
            .insert(thread_id.to_string());
    }

    pub fn heal_modify(&self, thread_id: &str) {
        self.state.lock().unwrap().failing_modifies.remove(thread_id);
    }

    /// `(thread_id, decoded raw message)` for every reply sent.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn modified(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().unwrap().modified.clone()
    }

    pub fn thread_fetches(&self) -> Vec<String> {
        self.state.lock().unwrap().thread_fetches.clone()
    }

    pub fn created_labels(&self) -> Vec<String> {
        self.state.lock().unwrap().created_labels.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }
}

#[async_trait]
impl MailService for FakeMailService {
    async fn list_labels(&self) -> Result<Vec<Label>> {
        Ok(self.state.lock().unwrap().labels.clone())
    }

    async fn create_label(&self, name: &str) -> Result<Label> {
        let mut state = self.state.lock().unwrap();
        let label = Label {
            id: format!("Label_{}", state.labels.len() + 1),
            name: name.to_string(),
        };
        state.labels.push(label.clone());
        state.created_labels.push(name.to_string());
        Ok(label)
    }

    async fn list_unread_inbox(
        &self,
        max_results: Option<u32>,
        _after_secs: Option<i64>,
    ) -> Result<Vec<MessageResponse>> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        if state.fail_listing {
            return Err(anyhow!("Unread fetch failed: 503"));
        }
        let limit = max_results.map_or(usize::MAX, |n| n as usize);
        Ok(state
            .unread
            .iter()
            .take(limit)
            .map(|m| MessageResponse {
                id: m.id.clone(),
                thread_id: m.thread_id.clone(),
            })
            .collect())
    }

    async fn get_message(&self, id: &str) -> Result<Message> {
        let state = self.state.lock().unwrap();
        if state.failing_messages.contains(id) {
            return Err(anyhow!("Message fetch failed: 500"));
        }
        state
            .unread
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| anyhow!("Message fetch failed: 404"))
    }

    async fn get_thread(&self, id: &str) -> Result<Thread> {
        let mut state = self.state.lock().unwrap();
        state.thread_fetches.push(id.to_string());
        if state.failing_threads.contains(id) {
            return Err(anyhow!("Thread fetch failed: 500"));
        }
        let messages = state
            .threads
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("Thread fetch failed: 404"))?;
        Ok(Thread {
            id: id.to_string(),
            messages,
        })
    }

    async fn get_profile(&self) -> Result<Profile> {
        Ok(Profile {
            email_address: self.owner.clone(),
            messages_total: None,
            threads_total: None,
            history_id: None,
        })
    }

    /// Records the reply and, like Gmail, adds it to the thread as a
    /// message from the owner.
    async fn send_message(&self, thread_id: &str, raw: &str) -> Result<()> {
        let decoded = String::from_utf8(URL_SAFE.decode(raw)?)?;
        let mut state = self.state.lock().unwrap();
        let id = format!("sent{}", state.sent.len() + 1);
        let reply = message(&id, thread_id, 0, vec![("From", self.owner.as_str())]);
        state
            .threads
            .entry(thread_id.to_string())
            .or_default()
            .push(reply);
        state.sent.push((thread_id.to_string(), decoded));
        Ok(())
    }

    async fn modify_thread_labels(&self, thread_id: &str, add_label_ids: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_modifies.contains(thread_id) {
            return Err(anyhow!("Thread modify failed: 500"));
        }
        state
            .modified
            .push((thread_id.to_string(), add_label_ids.to_vec()));
        Ok(())
    }
}
