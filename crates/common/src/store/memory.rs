//! In-memory store

use super::Store;
use crate::domain::{
    Court, DeliveryState, Document, DocumentLink, DocumentUpdate, NewDocument, NewNotification,
    Notification, NotificationUpdate, Relevance, SubscriberFilter, SubscriptionMode,
};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    courts: BTreeMap<String, Court>,
    /// recipient id -> banned
    recipients: HashMap<i64, bool>,
    subscriptions: Vec<(i64, String, SubscriptionMode)>,
    documents: Vec<Document>,
    notifications: Vec<Notification>,
}

/// Store kept entirely in process memory
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_court(&self, id: &str, name: &str) {
        let court = Court {
            id: id.to_string(),
            name: name.to_string(),
            raw_name: name.to_string(),
        };
        self.inner.lock().await.courts.insert(court.id.clone(), court);
    }

    pub async fn add_recipient(&self, id: i64, banned: bool) {
        self.inner.lock().await.recipients.insert(id, banned);
    }

    /// Subscribe a recipient, registering it if unknown
    pub async fn subscribe(&self, recipient_id: i64, court_id: &str, mode: SubscriptionMode) {
        let mut inner = self.inner.lock().await;
        inner.recipients.entry(recipient_id).or_insert(false);
        inner
            .subscriptions
            .retain(|(r, c, _)| !(*r == recipient_id && c == court_id));
        inner
            .subscriptions
            .push((recipient_id, court_id.to_string(), mode));
    }

    /// Snapshot of all documents in insertion order
    pub async fn documents(&self) -> Vec<Document> {
        self.inner.lock().await.documents.clone()
    }

    /// Snapshot of all notifications in insertion order
    pub async fn notifications(&self) -> Vec<Notification> {
        self.inner.lock().await.notifications.clone()
    }
}

fn not_found(resource_type: &str, id: impl ToString) -> AppError {
    AppError::NotFound {
        resource_type: resource_type.to_string(),
        id: id.to_string(),
    }
}

fn apply_document_update(document: &mut Document, update: DocumentUpdate) {
    match update {
        DocumentUpdate::Classified {
            full_text,
            short_text,
            relevance,
            shortcut,
            info,
            stamp,
        } => {
            document.full_text = full_text;
            document.short_text = short_text;
            document.relevance = relevance;
            document.shortcut = shortcut;
            document.info = info;
            document.processed_at = Some(stamp.processed_at);
            document.process_duration_ms = Some(stamp.duration_ms);
            document.error = None;
        }
        DocumentUpdate::Failed { error, stamp } => {
            document.error = Some(error);
            document.processed_at = Some(stamp.processed_at);
            document.process_duration_ms = Some(stamp.duration_ms);
        }
    }
}

fn apply_notification_update(notification: &mut Notification, update: NotificationUpdate) {
    match update {
        NotificationUpdate::ShortUrl(url) => notification.short_url = Some(url),
        NotificationUpdate::AttemptFailed(error) => notification.error = Some(error),
        NotificationUpdate::Sent { sent_at, handle } => {
            notification.state = DeliveryState::Sent;
            notification.sent_at = Some(sent_at);
            notification.handle = Some(handle);
            notification.error = None;
        }
        NotificationUpdate::Failed(error) => {
            notification.state = DeliveryState::Failed;
            notification.error = Some(error);
        }
        NotificationUpdate::Retracted => notification.retracted = true,
        NotificationUpdate::Requeued => notification.error = None,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_courts(&self) -> Result<Vec<Court>> {
        Ok(self.inner.lock().await.courts.values().cloned().collect())
    }

    async fn find_document_by_external_id(
        &self,
        court_id: &str,
        external_id: &str,
    ) -> Result<Option<Document>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .documents
            .iter()
            .find(|d| d.court_id == court_id && d.external_id == external_id)
            .cloned())
    }

    async fn insert_document(&self, document: NewDocument) -> Result<i64> {
        let mut inner = self.inner.lock().await;

        let court_name = inner
            .courts
            .get(&document.court_id)
            .map(|c| c.name.clone())
            .ok_or_else(|| not_found("court", &document.court_id))?;

        if inner
            .documents
            .iter()
            .any(|d| d.court_id == document.court_id && d.external_id == document.external_id)
        {
            return Err(AppError::Duplicate {
                message: format!("{} already stored for {}", document.external_id, document.court_id),
            });
        }

        let id = inner.documents.len() as i64 + 1;
        inner.documents.push(Document {
            id,
            external_id: document.external_id,
            public_id: document.public_id,
            court_id: document.court_id,
            court_name,
            full_text: document.full_text,
            short_text: document.short_text,
            published_on: document.published_on,
            relevance: Relevance::Unclassified,
            shortcut: false,
            notify: document.notify,
            processed_at: None,
            process_duration_ms: None,
            error: None,
            created_at: Utc::now(),
            info: document.info,
        });

        Ok(id)
    }

    async fn select_unclassified_documents(&self, limit: u64) -> Result<Vec<Document>> {
        let inner = self.inner.lock().await;
        let mut documents: Vec<Document> = inner
            .documents
            .iter()
            .filter(|d| d.relevance == Relevance::Unclassified && d.error.is_none())
            .cloned()
            .collect();
        documents.sort_by_key(|d| (d.created_at, d.id));
        documents.truncate(limit as usize);
        Ok(documents)
    }

    async fn update_document(&self, id: i64, update: DocumentUpdate) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let document = inner
            .documents
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| not_found("document", id))?;
        apply_document_update(document, update);
        Ok(())
    }

    async fn find_document_link(&self, id: i64) -> Result<Option<DocumentLink>> {
        let inner = self.inner.lock().await;
        Ok(inner.documents.iter().find(|d| d.id == id).map(|d| DocumentLink {
            public_id: d.public_id.clone(),
            attachments: d.info.attachments.len(),
        }))
    }

    async fn select_pending_notifications(&self, limit: u64) -> Result<Vec<Notification>> {
        let inner = self.inner.lock().await;
        let mut pending: Vec<Notification> = inner
            .notifications
            .iter()
            .filter(|n| n.state == DeliveryState::Pending && n.error.is_none())
            .cloned()
            .collect();
        pending.sort_by_key(|n| (std::cmp::Reverse(n.priority), n.created_at, n.id));
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn insert_notifications(&self, notifications: Vec<NewNotification>) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let created = notifications.len();

        for new in notifications {
            let id = inner.notifications.len() as i64 + 1;
            inner.notifications.push(Notification {
                id,
                document_id: new.document_id,
                recipient_id: new.recipient_id,
                alias: new.alias,
                text: new.text,
                priority: new.priority,
                preview: new.preview,
                state: DeliveryState::Pending,
                error: None,
                short_url: None,
                sent_at: None,
                handle: None,
                retracted: false,
                created_at: Utc::now(),
            });
        }

        Ok(created)
    }

    async fn update_notification(&self, id: i64, update: NotificationUpdate) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let notification = inner
            .notifications
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| not_found("notification", id))?;
        apply_notification_update(notification, update);
        Ok(())
    }

    async fn find_notification(&self, id: i64) -> Result<Option<Notification>> {
        let inner = self.inner.lock().await;
        Ok(inner.notifications.iter().find(|n| n.id == id).cloned())
    }

    async fn list_subscriptions_for_court(
        &self,
        court_id: &str,
        filter: SubscriberFilter,
    ) -> Result<Vec<i64>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .subscriptions
            .iter()
            .filter(|(recipient, court, mode)| {
                court == court_id
                    && filter.admits(*mode)
                    && !inner.recipients.get(recipient).copied().unwrap_or(false)
            })
            .map(|(recipient, _, _)| *recipient)
            .collect())
    }
}
