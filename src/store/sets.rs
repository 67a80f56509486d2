//! The two persistent sets consulted by a triage pass.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StoreError;
use crate::pipeline::types::KEY_TIMESTAMP_FORMAT;
use crate::store::JsonStore;

pub const SKIPPED_EMAILS: &str = "skipped_emails";
pub const SENT_EMAILS: &str = "sent_emails";

/// Message identifiers excluded from future passes. Only grows, until an explicit reset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkippedEmails(BTreeMap<String, bool>);

impl SkippedEmails {
    pub async fn load(store: &JsonStore) -> Result<Self, StoreError> {
        store.load(SKIPPED_EMAILS).await
    }

    pub async fn save(&self, store: &JsonStore) -> Result<(), StoreError> {
        store.save(SKIPPED_EMAILS, self).await
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.get(id).copied().unwrap_or(false)
    }

    /// Returns `true` if the id was not already skipped.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.0.insert(id.into(), true) != Some(true)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn len(&self) -> usize {
        self.0.values().filter(|v| **v).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sender address → when we last replied (`YYYY-mm-dd HH:MM:SS`, UTC).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SentEmails(BTreeMap<String, String>);

impl SentEmails {
    pub async fn load(store: &JsonStore) -> Result<Self, StoreError> {
        store.load(SENT_EMAILS).await
    }

    pub async fn save(&self, store: &JsonStore) -> Result<(), StoreError> {
        store.save(SENT_EMAILS, self).await
    }

    pub fn record(&mut self, sender: &str, at: DateTime<Utc>) {
        self.0.insert(
            sender.to_lowercase(),
            at.format(KEY_TIMESTAMP_FORMAT).to_string(),
        );
    }

    pub fn last_sent(&self, sender: &str) -> Option<DateTime<Utc>> {
        let raw = self.0.get(&sender.to_lowercase())?;
        match NaiveDateTime::parse_from_str(raw, KEY_TIMESTAMP_FORMAT) {
            Ok(naive) => Some(naive.and_utc()),
            Err(e) => {
                warn!(sender = %sender, value = %raw, error = %e, "Unreadable sent timestamp");
                None
            }
        }
    }

    /// True when we replied to `sender` at or after `received_at`, i.e. the
    /// message predates our reply and the ball is in their court.
    pub fn awaiting_reply(&self, sender: &str, received_at: DateTime<Utc>) -> bool {
        self.last_sent(sender)
            .is_some_and(|sent_at| received_at <= sent_at)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
