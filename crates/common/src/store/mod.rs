//! Storage abstraction shared by the workers
//!
//! Workers coordinate only through committed rows. [`Repository`] persists
//! to PostgreSQL; [`MemoryStore`] backs tests and dry runs.
//!
//! [`Repository`]: crate::db::Repository

mod memory;

pub use memory::MemoryStore;

use crate::domain::{
    Court, Document, DocumentLink, DocumentUpdate, NewDocument, NewNotification, Notification,
    NotificationUpdate, SubscriberFilter,
};
use crate::errors::Result;
use async_trait::async_trait;

/// Trait for pipeline storage
#[async_trait]
pub trait Store: Send + Sync {
    /// All tracked courts, ordered by id
    async fn list_courts(&self) -> Result<Vec<Court>>;

    /// Look up a document by its normalized external id within a court
    async fn find_document_by_external_id(
        &self,
        court_id: &str,
        external_id: &str,
    ) -> Result<Option<Document>>;

    /// Persist a new unclassified document.
    ///
    /// Fails with [`AppError::Duplicate`](crate::AppError::Duplicate) when
    /// `(court_id, external_id)` already exists.
    async fn insert_document(&self, document: NewDocument) -> Result<i64>;

    /// Unclassified, error-free documents, oldest first
    async fn select_unclassified_documents(&self, limit: u64) -> Result<Vec<Document>>;

    async fn update_document(&self, id: i64, update: DocumentUpdate) -> Result<()>;

    /// Store the notifications of a classified document together with its
    /// classification result.
    async fn commit_classification(
        &self,
        id: i64,
        update: DocumentUpdate,
        notifications: Vec<NewNotification>,
    ) -> Result<usize> {
        let created = self.insert_notifications(notifications).await?;
        self.update_document(id, update).await?;
        Ok(created)
    }

    async fn find_document_link(&self, id: i64) -> Result<Option<DocumentLink>>;

    /// Pending, error-free notifications by priority desc then oldest first
    async fn select_pending_notifications(&self, limit: u64) -> Result<Vec<Notification>>;

    /// Bulk insert, returns the number of rows created
    async fn insert_notifications(&self, notifications: Vec<NewNotification>) -> Result<usize>;

    async fn update_notification(&self, id: i64, update: NotificationUpdate) -> Result<()>;

    async fn find_notification(&self, id: i64) -> Result<Option<Notification>>;

    /// Recipient ids subscribed to a court, banned recipients excluded
    async fn list_subscriptions_for_court(
        &self,
        court_id: &str,
        filter: SubscriberFilter,
    ) -> Result<Vec<i64>>;
}
