//! Unread-mail triage: decides which newly arrived messages get an
//! automated acknowledgement and tags their threads with a marker label.

use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::fmt;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;

use crate::google::gmail::{
    Label, Message, MessageResponse, Profile, Thread, encode_raw, extract_from, extract_subject,
};

pub mod reply;
pub mod schedule;
#[cfg(test)]
pub(crate) mod testing;

pub use reply::{build_reply, is_owner_address};
pub use schedule::{next_delay, run_forever, run_pass};

/// Lookbehind applied to the unread query so clock skew between the
/// `after:` search operator and `internalDate` can't hide new mail.
const QUERY_LOOKBEHIND_SECS: i64 = 60 * 60 * 24;

/// Unread messages inspected when seeding the watermark at startup.
const SEED_PAGE_SIZE: u32 = 10;

/// The mail operations the triage loop depends on.
#[async_trait]
pub trait MailService: Send + Sync {
    async fn list_labels(&self) -> Result<Vec<Label>>;
    async fn create_label(&self, name: &str) -> Result<Label>;
    /// Unread inbox messages. `after_secs` narrows the search to mail
    /// received after that epoch second; it is a hint, callers still
    /// compare timestamps themselves.
    async fn list_unread_inbox(
        &self,
        max_results: Option<u32>,
        after_secs: Option<i64>,
    ) -> Result<Vec<MessageResponse>>;
    async fn get_message(&self, id: &str) -> Result<Message>;
    async fn get_thread(&self, id: &str) -> Result<Thread>;
    async fn get_profile(&self) -> Result<Profile>;
    /// `raw` is the already base64url encoded RFC 822 message.
    async fn send_message(&self, thread_id: &str, raw: &str) -> Result<()>;
    async fn modify_thread_labels(&self, thread_id: &str, add_label_ids: &[String]) -> Result<()>;
}

/// Epoch milliseconds of the newest message already processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark(i64);

impl Watermark {
    pub fn new(millis: i64) -> Self {
        Self(millis)
    }

    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub fn millis(&self) -> i64 {
        self.0
    }

    /// Move forward to `millis`. Never moves backwards.
    fn advance(&mut self, millis: i64) {
        self.0 = self.0.max(millis);
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationReport {
    pub listed: usize,
    pub evaluated: usize,
    pub replied: usize,
    pub already_replied: usize,
    pub failed: usize,
    pub watermark: Watermark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Replied,
    AlreadyReplied,
}

/// Everything the triage loop carries between passes.
#[derive(Debug, Clone)]
pub struct Session {
    pub label: Label,
    pub owner: Profile,
    pub reply_body: String,
    watermark: Watermark,
    // Threads that got a reply but whose marker label failed to apply
    unlabelled: BTreeSet<String>,
}

impl Session {
    pub fn new(label: Label, owner: Profile, watermark: Watermark, reply_body: &str) -> Self {
        Self {
            label,
            owner,
            reply_body: reply_body.to_string(),
            watermark,
            unlabelled: BTreeSet::new(),
        }
    }

    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    /// Threads still waiting for the marker label after a failed attempt.
    pub fn unlabelled(&self) -> impl Iterator<Item = &str> {
        self.unlabelled.iter().map(String::as_str)
    }

    /// Resolve the marker label, seed the watermark and fetch the
    /// owner's profile. Any failure here is fatal to the caller.
    pub async fn bootstrap(
        service: &dyn MailService,
        label_name: &str,
        reply_body: &str,
    ) -> Result<Self> {
        let label = resolve_label(service, label_name)
            .await
            .with_context(|| format!("Failed to resolve label {}", label_name))?;
        let watermark = initial_watermark(service)
            .await
            .context("Failed to initialize watermark")?;
        let owner = service
            .get_profile()
            .await
            .context("Failed to fetch owner profile")?;

        tracing::info!(
            "Session ready for {} with label {} ({}), watermark {}",
            owner.email_address,
            label.name,
            label.id,
            watermark
        );
        Ok(Self::new(label, owner, watermark, reply_body))
    }

    /// One triage pass over the unread inbox.
    ///
    /// Only messages strictly newer than the watermark at the start of the
    /// pass are considered. A failure on one message is logged and does
    /// not stop the others, but it holds the watermark below that message
    /// so the next pass retries it.
    pub async fn check_and_send_reply(
        &mut self,
        service: &dyn MailService,
    ) -> Result<IterationReport> {
        let snapshot = self.watermark;
        let after_secs = snapshot.millis() / 1000 - QUERY_LOOKBEHIND_SECS;
        let summaries = service
            .list_unread_inbox(None, Some(after_secs))
            .await
            .context("Failed to list unread messages")?;

        self.retry_labels(service).await;

        let mut report = IterationReport {
            listed: summaries.len(),
            evaluated: 0,
            replied: 0,
            already_replied: 0,
            failed: 0,
            watermark: snapshot,
        };

        // A message we couldn't even look up has an unknown timestamp,
        // so the watermark has to stay put this pass.
        let mut ceiling: Option<i64> = None;

        let mut candidates = Vec::with_capacity(summaries.len());
        for summary in &summaries {
            let fetched = service
                .get_message(&summary.id)
                .await
                .and_then(|m| Ok((m.timestamp()?, m)));
            match fetched {
                Ok(candidate) => candidates.push(candidate),
                Err(e) => {
                    tracing::error!("Failed to fetch message {}: {:#}", summary.id, e);
                    report.failed += 1;
                    ceiling = Some(snapshot.millis());
                }
            }
        }

        // Newest first. The service usually returns this order already
        // but nothing guarantees it.
        candidates.sort_by_key(|(ts, _)| Reverse(*ts));

        let mut running_max = snapshot.millis();
        for (ts, message) in &candidates {
            running_max = running_max.max(*ts);
            if *ts <= snapshot.millis() {
                break;
            }
            report.evaluated += 1;

            match self.triage_message(service, message).await {
                Ok(Outcome::Replied) => report.replied += 1,
                Ok(Outcome::AlreadyReplied) => report.already_replied += 1,
                Err(e) => {
                    tracing::error!(
                        "Failed to process message {} in thread {}: {:#}",
                        message.id,
                        message.thread_id,
                        e
                    );
                    report.failed += 1;
                    let below = ts - 1;
                    ceiling = Some(ceiling.map_or(below, |c| c.min(below)));
                }
            }
        }

        let next = match ceiling {
            Some(c) => running_max.min(c),
            None => running_max,
        };
        self.watermark.advance(next);
        report.watermark = self.watermark;

        tracing::info!(
            listed = report.listed,
            evaluated = report.evaluated,
            replied = report.replied,
            already_replied = report.already_replied,
            failed = report.failed,
            watermark = %report.watermark,
            "Triage pass complete"
        );
        Ok(report)
    }

    /// Apply the marker label to threads that were answered in an earlier
    /// pass but could not be labelled then. Failures stay queued.
    async fn retry_labels(&mut self, service: &dyn MailService) {
        let pending: Vec<String> = self.unlabelled.iter().cloned().collect();
        for thread_id in pending {
            match service
                .modify_thread_labels(&thread_id, std::slice::from_ref(&self.label.id))
                .await
            {
                Ok(()) => {
                    tracing::info!("Label added to previously answered thread {}", thread_id);
                    self.unlabelled.remove(&thread_id);
                }
                Err(e) => tracing::warn!("Still unable to label thread {}: {:#}", thread_id, e),
            }
        }
    }

    async fn triage_message(
        &mut self,
        service: &dyn MailService,
        message: &Message,
    ) -> Result<Outcome> {
        let needs_reply =
            has_no_owner_reply(service, &message.thread_id, &self.owner.email_address).await?;
        if !needs_reply {
            tracing::debug!(
                "Thread {} already has a reply from the owner",
                message.thread_id
            );
            return Ok(Outcome::AlreadyReplied);
        }

        let to = extract_from(message)
            .ok_or_else(|| anyhow!("Message {} has no From header", message.id))?;
        let subject = extract_subject(message).unwrap_or_default();
        let raw = build_reply(to, subject, &self.reply_body);

        service
            .send_message(&message.thread_id, &encode_raw(&raw))
            .await
            .with_context(|| format!("Failed to send reply on thread {}", message.thread_id))?;
        if let Err(e) = service
            .modify_thread_labels(&message.thread_id, std::slice::from_ref(&self.label.id))
            .await
        {
            // The reply is out, so the next pass sees it and won't answer
            // again. Remember the thread so the label still gets applied.
            self.unlabelled.insert(message.thread_id.clone());
            return Err(e.context(format!("Failed to label thread {}", message.thread_id)));
        }

        tracing::info!("Label added and reply sent! thread={} to={}", message.thread_id, to);
        Ok(Outcome::Replied)
    }
}

/// Returns true when no message in the thread was written by `owner`.
pub async fn has_no_owner_reply(
    service: &dyn MailService,
    thread_id: &str,
    owner: &str,
) -> Result<bool> {
    let thread = service
        .get_thread(thread_id)
        .await
        .with_context(|| format!("Failed to fetch thread {}", thread_id))?;

    let owner_replied = thread.messages.iter().any(|m| match extract_from(m) {
        Some(from) => is_owner_address(from, owner),
        None => {
            tracing::warn!("Message {} in thread {} has no From header", m.id, thread_id);
            false
        }
    });
    Ok(!owner_replied)
}

async fn resolve_label(service: &dyn MailService, name: &str) -> Result<Label> {
    let labels = service.list_labels().await?;
    if let Some(label) = labels.into_iter().find(|l| l.name == name) {
        return Ok(label);
    }
    tracing::info!("Creating label {}", name);
    service.create_label(name).await
}

/// The newest unread message marks where triage starts. The first page
/// is searched for the largest timestamp rather than trusting its order.
/// With nothing unread, start from now so existing mail is never answered.
async fn initial_watermark(service: &dyn MailService) -> Result<Watermark> {
    let page = service.list_unread_inbox(Some(SEED_PAGE_SIZE), None).await?;
    if page.is_empty() {
        let now = Watermark::now();
        tracing::info!("No unread mail, starting from current time {}", now);
        return Ok(now);
    }
    let mut newest = i64::MIN;
    for summary in &page {
        let message = service.get_message(&summary.id).await?;
        newest = newest.max(message.timestamp()?);
    }
    Ok(Watermark::new(newest))
}
