//! Repository pattern for database operations
//!
//! PostgreSQL implementation of the [`Store`] trait, with transactional
//! writes where a document and its metadata change together.

use crate::db::models::*;
use crate::db::DbPool;
use crate::domain::{
    Court, DeliveryState, Document, DocumentInfo, DocumentLink, DocumentUpdate, KeywordScores,
    NewDocument, NewNotification, Notification, NotificationUpdate, SubDocument, SubscriberFilter,
    SubscriptionMode,
};
use crate::errors::{AppError, Result};
use crate::store::Store;
use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};
use serde_json::Value;
use tracing::debug;

/// Rows per multi-row notification insert
const INSERT_CHUNK_SIZE: usize = 500;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> &DatabaseConnection {
        self.pool.conn()
    }

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    /// Number of notifications waiting for delivery
    pub async fn count_pending_notifications(&self) -> Result<u64> {
        NotificationEntity::find()
            .filter(NotificationColumn::State.eq(String::from(DeliveryState::Pending)))
            .filter(NotificationColumn::Error.is_null())
            .count(self.conn())
            .await
            .map_err(Into::into)
    }

    /// Attach court name, metadata and attachments to a document row
    async fn hydrate(&self, model: DocumentModel, court: Option<CourtModel>) -> Result<Document> {
        let info = DocumentInfoEntity::find_by_id(model.id).one(self.conn()).await?;

        let attachments = SubDocumentEntity::find()
            .filter(SubDocumentColumn::DocumentId.eq(model.id))
            .order_by_asc(SubDocumentColumn::Id)
            .all(self.conn())
            .await?
            .into_iter()
            .map(SubDocument::from)
            .collect();

        let info = match info {
            Some(info) => DocumentInfo {
                matches: scores_from_json(info.matches)?,
                blacklist: scores_from_json(info.blacklist)?,
                tags: scores_from_json(info.tags)?,
                extra: serde_json::from_value(info.extra)?,
                attachments,
            },
            None => DocumentInfo {
                attachments,
                ..Default::default()
            },
        };

        Ok(Document {
            id: model.id,
            external_id: model.external_id,
            public_id: model.public_id,
            court_id: model.court_id,
            court_name: court.map(|c| c.name).unwrap_or_default(),
            full_text: model.full_text,
            short_text: model.short_text,
            published_on: model.published_on,
            relevance: model.is_relevant.into(),
            shortcut: model.shortcut,
            notify: model.notify,
            processed_at: model.processed_at.map(Into::into),
            process_duration_ms: model.process_duration_ms,
            error: model.error,
            created_at: model.created_at.into(),
            info,
        })
    }
}

fn scores_from_json(value: Option<Value>) -> Result<KeywordScores> {
    match value {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Ok(KeywordScores::new()),
    }
}

fn map_insert_err(err: DbErr, what: String) -> AppError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => AppError::Duplicate { message: what },
        _ => err.into(),
    }
}

fn sub_document_row(document_id: i64, attachment: SubDocument) -> SubDocumentActiveModel {
    SubDocumentActiveModel {
        document_id: Set(document_id),
        title: Set(attachment.title),
        kind: Set(attachment.kind.as_str().to_string()),
        url: Set(attachment.url),
        archive_url: Set(attachment.archive_url),
        is_working: Set(attachment.is_working),
        created_at: Set(chrono::Utc::now().into()),
        ..Default::default()
    }
}

/// Write a classification result; expects to run inside a transaction
async fn write_document_update<C: ConnectionTrait>(
    conn: &C,
    id: i64,
    update: DocumentUpdate,
) -> Result<()> {
    let mut document: DocumentActiveModel = DocumentEntity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| AppError::NotFound {
            resource_type: "document".to_string(),
            id: id.to_string(),
        })?
        .into();

    match update {
        DocumentUpdate::Classified {
            full_text,
            short_text,
            relevance,
            shortcut,
            info,
            stamp,
        } => {
            document.full_text = Set(full_text);
            document.short_text = Set(short_text);
            document.is_relevant = Set(relevance.into());
            document.shortcut = Set(shortcut);
            document.processed_at = Set(Some(stamp.processed_at.into()));
            document.process_duration_ms = Set(Some(stamp.duration_ms));
            document.error = Set(None);
            document.update(conn).await?;

            let row = DocumentInfoActiveModel {
                document_id: Set(id),
                matches: Set(Some(serde_json::to_value(&info.matches)?)),
                blacklist: Set(Some(serde_json::to_value(&info.blacklist)?)),
                tags: Set(Some(serde_json::to_value(&info.tags)?)),
                extra: Set(serde_json::to_value(&info.extra)?),
                created_at: Set(chrono::Utc::now().into()),
            };
            let exists = DocumentInfoEntity::find_by_id(id).one(conn).await?.is_some();
            if exists {
                let mut row = row;
                row.created_at = sea_orm::ActiveValue::NotSet;
                row.update(conn).await?;
            } else {
                row.insert(conn).await?;
            }

            // Attachments carry normalized titles now
            SubDocumentEntity::delete_many()
                .filter(SubDocumentColumn::DocumentId.eq(id))
                .exec(conn)
                .await?;
            for attachment in info.attachments {
                sub_document_row(id, attachment).insert(conn).await?;
            }
        }
        DocumentUpdate::Failed { error, stamp } => {
            document.error = Set(Some(error));
            document.processed_at = Set(Some(stamp.processed_at.into()));
            document.process_duration_ms = Set(Some(stamp.duration_ms));
            document.update(conn).await?;
        }
    }

    Ok(())
}

async fn write_notifications<C: ConnectionTrait>(
    conn: &C,
    notifications: Vec<NewNotification>,
) -> Result<usize> {
    let total = notifications.len();
    let now = chrono::Utc::now();

    for chunk in notifications.chunks(INSERT_CHUNK_SIZE) {
        let rows = chunk.iter().map(|n| NotificationActiveModel {
            document_id: Set(n.document_id),
            recipient_id: Set(n.recipient_id),
            alias: Set(n.alias.clone()),
            text: Set(n.text.clone()),
            priority: Set(n.priority),
            preview: Set(n.preview),
            state: Set(String::from(DeliveryState::Pending)),
            error: Set(None),
            short_url: Set(None),
            sent_at: Set(None),
            chat_id: Set(None),
            message_id: Set(None),
            retracted: Set(false),
            created_at: Set(now.into()),
            ..Default::default()
        });

        NotificationEntity::insert_many(rows).exec(conn).await?;
    }

    Ok(total)
}

#[async_trait]
impl Store for Repository {
    async fn list_courts(&self) -> Result<Vec<Court>> {
        Ok(CourtEntity::find()
            .order_by_asc(CourtColumn::Id)
            .all(self.conn())
            .await?
            .into_iter()
            .map(Court::from)
            .collect())
    }

    async fn find_document_by_external_id(
        &self,
        court_id: &str,
        external_id: &str,
    ) -> Result<Option<Document>> {
        let found = DocumentEntity::find()
            .find_also_related(CourtEntity)
            .filter(DocumentColumn::CourtId.eq(court_id))
            .filter(DocumentColumn::ExternalId.eq(external_id))
            .one(self.conn())
            .await?;

        match found {
            Some((model, court)) => Ok(Some(self.hydrate(model, court).await?)),
            None => Ok(None),
        }
    }

    async fn insert_document(&self, document: NewDocument) -> Result<i64> {
        let now = chrono::Utc::now();
        let txn = self.conn().begin().await?;

        let what = format!("{} already stored for {}", document.external_id, document.court_id);
        let row = DocumentActiveModel {
            external_id: Set(document.external_id),
            public_id: Set(document.public_id),
            court_id: Set(document.court_id),
            full_text: Set(document.full_text),
            short_text: Set(document.short_text),
            published_on: Set(document.published_on),
            is_relevant: Set(None),
            shortcut: Set(false),
            notify: Set(document.notify),
            processed_at: Set(None),
            process_duration_ms: Set(None),
            error: Set(None),
            created_at: Set(now.into()),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| map_insert_err(e, what))?;

        DocumentInfoActiveModel {
            document_id: Set(row.id),
            matches: Set(None),
            blacklist: Set(None),
            tags: Set(None),
            extra: Set(serde_json::to_value(&document.info.extra)?),
            created_at: Set(now.into()),
        }
        .insert(&txn)
        .await?;

        for attachment in document.info.attachments {
            sub_document_row(row.id, attachment).insert(&txn).await?;
        }

        txn.commit().await?;
        debug!(id = row.id, external_id = %row.external_id, "Document stored");

        Ok(row.id)
    }

    async fn select_unclassified_documents(&self, limit: u64) -> Result<Vec<Document>> {
        let rows = DocumentEntity::find()
            .find_also_related(CourtEntity)
            .filter(DocumentColumn::IsRelevant.is_null())
            .filter(DocumentColumn::Error.is_null())
            .order_by_asc(DocumentColumn::CreatedAt)
            .order_by_asc(DocumentColumn::Id)
            .limit(limit)
            .all(self.conn())
            .await?;

        let mut documents = Vec::with_capacity(rows.len());
        for (model, court) in rows {
            documents.push(self.hydrate(model, court).await?);
        }
        Ok(documents)
    }

    async fn update_document(&self, id: i64, update: DocumentUpdate) -> Result<()> {
        let txn = self.conn().begin().await?;
        write_document_update(&txn, id, update).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn commit_classification(
        &self,
        id: i64,
        update: DocumentUpdate,
        notifications: Vec<NewNotification>,
    ) -> Result<usize> {
        let txn = self.conn().begin().await?;
        let created = write_notifications(&txn, notifications).await?;
        write_document_update(&txn, id, update).await?;
        txn.commit().await?;
        Ok(created)
    }

    async fn find_document_link(&self, id: i64) -> Result<Option<DocumentLink>> {
        let Some(document) = DocumentEntity::find_by_id(id).one(self.conn()).await? else {
            return Ok(None);
        };

        let attachments = SubDocumentEntity::find()
            .filter(SubDocumentColumn::DocumentId.eq(id))
            .count(self.conn())
            .await?;

        Ok(Some(DocumentLink {
            public_id: document.public_id,
            attachments: attachments as usize,
        }))
    }

    async fn select_pending_notifications(&self, limit: u64) -> Result<Vec<Notification>> {
        Ok(NotificationEntity::find()
            .filter(NotificationColumn::State.eq(String::from(DeliveryState::Pending)))
            .filter(NotificationColumn::Error.is_null())
            .order_by_desc(NotificationColumn::Priority)
            .order_by_asc(NotificationColumn::CreatedAt)
            .order_by_asc(NotificationColumn::Id)
            .limit(limit)
            .all(self.conn())
            .await?
            .into_iter()
            .map(Notification::from)
            .collect())
    }

    async fn insert_notifications(&self, notifications: Vec<NewNotification>) -> Result<usize> {
        if notifications.is_empty() {
            return Ok(0);
        }
        write_notifications(self.conn(), notifications).await
    }

    async fn update_notification(&self, id: i64, update: NotificationUpdate) -> Result<()> {
        let mut notification: NotificationActiveModel = NotificationEntity::find_by_id(id)
            .one(self.conn())
            .await?
            .ok_or_else(|| AppError::NotFound {
                resource_type: "notification".to_string(),
                id: id.to_string(),
            })?
            .into();

        match update {
            NotificationUpdate::ShortUrl(url) => notification.short_url = Set(Some(url)),
            NotificationUpdate::AttemptFailed(error) => notification.error = Set(Some(error)),
            NotificationUpdate::Sent { sent_at, handle } => {
                notification.state = Set(String::from(DeliveryState::Sent));
                notification.sent_at = Set(Some(sent_at.into()));
                notification.chat_id = Set(Some(handle.chat_id));
                notification.message_id = Set(Some(handle.message_id));
                notification.error = Set(None);
            }
            NotificationUpdate::Failed(error) => {
                notification.state = Set(String::from(DeliveryState::Failed));
                notification.error = Set(Some(error));
            }
            NotificationUpdate::Retracted => notification.retracted = Set(true),
            NotificationUpdate::Requeued => notification.error = Set(None),
        }

        notification.update(self.conn()).await?;
        Ok(())
    }

    async fn find_notification(&self, id: i64) -> Result<Option<Notification>> {
        Ok(NotificationEntity::find_by_id(id)
            .one(self.conn())
            .await?
            .map(Notification::from))
    }

    async fn list_subscriptions_for_court(
        &self,
        court_id: &str,
        filter: SubscriberFilter,
    ) -> Result<Vec<i64>> {
        let mut query = SubscriptionEntity::find()
            .inner_join(RecipientEntity)
            .filter(SubscriptionColumn::CourtId.eq(court_id))
            .filter(RecipientColumn::IsBanned.eq(false));

        if filter == SubscriberFilter::AllModeOnly {
            query = query.filter(SubscriptionColumn::Mode.eq(SubscriptionMode::All.as_str()));
        }

        query
            .select_only()
            .column(SubscriptionColumn::RecipientId)
            .order_by_asc(SubscriptionColumn::RecipientId)
            .into_tuple::<i64>()
            .all(self.conn())
            .await
            .map_err(Into::into)
    }
}
