//! Domain types exchanged between the workers and the store

use crate::channel::{MessageHandle, Target};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Priority of operator broadcasts and exact-shortcut alias notifications
pub const PRIORITY_URGENT: i32 = 1000;

/// Priority of ordinary per-recipient notifications
pub const PRIORITY_NORMAL: i32 = 0;

/// Keyword -> similarity score (0-100)
pub type KeywordScores = BTreeMap<String, u8>;

/// A court whose publications are tracked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Court {
    pub id: String,
    pub name: String,
    /// Name used when querying the source
    pub raw_name: String,
}

/// Classification result of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relevance {
    Unclassified,
    NotRelevant,
    Relevant,
}

impl Relevance {
    pub fn is_relevant(&self) -> bool {
        matches!(self, Relevance::Relevant)
    }
}

impl From<Option<bool>> for Relevance {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => Relevance::Unclassified,
            Some(false) => Relevance::NotRelevant,
            Some(true) => Relevance::Relevant,
        }
    }
}

impl From<Relevance> for Option<bool> {
    fn from(value: Relevance) -> Self {
        match value {
            Relevance::Unclassified => None,
            Relevance::NotRelevant => Some(false),
            Relevance::Relevant => Some(true),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubDocumentKind {
    Text,
    Web,
    Other,
}

impl SubDocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubDocumentKind::Text => "text",
            SubDocumentKind::Web => "web",
            SubDocumentKind::Other => "other",
        }
    }
}

impl From<&str> for SubDocumentKind {
    fn from(s: &str) -> Self {
        match s {
            "text" => SubDocumentKind::Text,
            "web" => SubDocumentKind::Web,
            _ => SubDocumentKind::Other,
        }
    }
}

/// Attachment of a document (linked file or page)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubDocument {
    pub title: Option<String>,
    pub kind: SubDocumentKind,
    pub url: String,
    pub archive_url: Option<String>,
    pub is_working: Option<bool>,
}

impl SubDocument {
    pub fn web(url: impl Into<String>) -> Self {
        Self {
            title: None,
            kind: SubDocumentKind::Web,
            url: url.into(),
            archive_url: None,
            is_working: None,
        }
    }
}

/// Classification metadata attached 1:1 to a document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    /// Matched whitelist keywords
    pub matches: KeywordScores,
    /// Matched blacklist keywords
    pub blacklist: KeywordScores,
    /// Matched category tags
    pub tags: KeywordScores,
    /// Fields extracted from the source (section, kind, number, ...)
    pub extra: BTreeMap<String, String>,
    pub attachments: Vec<SubDocument>,
}

/// A discovered court ruling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub external_id: String,
    pub public_id: String,
    pub court_id: String,
    pub court_name: String,
    pub full_text: String,
    pub short_text: String,
    pub published_on: NaiveDate,
    pub relevance: Relevance,
    /// Classified through the exact-substring path
    pub shortcut: bool,
    pub notify: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub process_duration_ms: Option<i64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub info: DocumentInfo,
}

/// Document about to be persisted by the collector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    pub external_id: String,
    pub public_id: String,
    pub court_id: String,
    pub full_text: String,
    pub short_text: String,
    pub published_on: NaiveDate,
    pub notify: bool,
    pub info: DocumentInfo,
}

/// When and how long a document took to process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingStamp {
    pub processed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

/// The single mutation a document goes through
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentUpdate {
    Classified {
        full_text: String,
        short_text: String,
        relevance: Relevance,
        shortcut: bool,
        info: DocumentInfo,
        stamp: ProcessingStamp,
    },
    Failed {
        error: String,
        stamp: ProcessingStamp,
    },
}

/// Deep-link data of a document, resolved by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentLink {
    pub public_id: String,
    pub attachments: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionMode {
    /// Every publication of the court
    All,
    /// Only shortcut-relevant publications
    RelevantOnly,
}

impl SubscriptionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionMode::All => "all",
            SubscriptionMode::RelevantOnly => "relevant_only",
        }
    }
}

impl From<&str> for SubscriptionMode {
    fn from(s: &str) -> Self {
        match s {
            "all" => SubscriptionMode::All,
            _ => SubscriptionMode::RelevantOnly,
        }
    }
}

/// Which subscribers of a court a fan-out reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberFilter {
    /// Every subscriber regardless of mode
    Everyone,
    /// Only subscribers in "all publications" mode
    AllModeOnly,
}

impl SubscriberFilter {
    pub fn admits(&self, mode: SubscriptionMode) -> bool {
        match self {
            SubscriberFilter::Everyone => true,
            SubscriberFilter::AllModeOnly => mode == SubscriptionMode::All,
        }
    }
}

/// Delivery state of a notification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Sent,
    Failed,
}

impl From<String> for DeliveryState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "sent" => DeliveryState::Sent,
            "failed" => DeliveryState::Failed,
            _ => DeliveryState::Pending,
        }
    }
}

impl From<DeliveryState> for String {
    fn from(state: DeliveryState) -> Self {
        match state {
            DeliveryState::Pending => "pending".to_string(),
            DeliveryState::Sent => "sent".to_string(),
            DeliveryState::Failed => "failed".to_string(),
        }
    }
}

/// One deliverable message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub document_id: Option<i64>,
    pub recipient_id: Option<i64>,
    pub alias: Option<String>,
    pub text: String,
    pub priority: i32,
    pub preview: bool,
    pub state: DeliveryState,
    pub error: Option<String>,
    pub short_url: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub handle: Option<MessageHandle>,
    pub retracted: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Where the message goes; recipients win over aliases
    pub fn target(&self) -> Option<Target> {
        match (self.recipient_id, &self.alias) {
            (Some(id), _) => Some(Target::Chat(id)),
            (None, Some(alias)) if !alias.is_empty() => Some(Target::Alias(alias.clone())),
            _ => None,
        }
    }

    pub fn is_urgent(&self) -> bool {
        self.priority > PRIORITY_NORMAL
    }
}

/// Notification about to be inserted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub document_id: Option<i64>,
    pub recipient_id: Option<i64>,
    pub alias: Option<String>,
    pub text: String,
    pub priority: i32,
    pub preview: bool,
}

impl NewNotification {
    /// Per-recipient notification: normal priority, no link preview
    pub fn to_recipient(document_id: i64, recipient_id: i64, text: impl Into<String>) -> Self {
        Self {
            document_id: Some(document_id),
            recipient_id: Some(recipient_id),
            alias: None,
            text: text.into(),
            priority: PRIORITY_NORMAL,
            preview: false,
        }
    }

    /// Broadcast notification: elevated priority, link preview on
    pub fn broadcast(document_id: Option<i64>, alias: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            document_id,
            recipient_id: None,
            alias: Some(alias.into()),
            text: text.into(),
            priority: PRIORITY_URGENT,
            preview: true,
        }
    }
}

/// Mutations the dispatcher (or an operator) applies to a notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationUpdate {
    /// Deep link resolved before sending
    ShortUrl(String),
    /// A send attempt failed; the error is kept verbatim
    AttemptFailed(String),
    /// Delivered through the channel
    Sent {
        sent_at: DateTime<Utc>,
        handle: MessageHandle,
    },
    /// Permanently undeliverable
    Failed(String),
    /// Message deleted from the channel
    Retracted,
    /// Operator cleared the stored error
    Requeued,
}
