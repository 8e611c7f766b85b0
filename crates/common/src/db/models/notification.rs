//! Notification entity: one deliverable message

use crate::channel::MessageHandle;
use crate::domain::{DeliveryState, Notification};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notifications")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub document_id: Option<i64>,

    pub recipient_id: Option<i64>,

    #[sea_orm(column_type = "Text", nullable)]
    pub alias: Option<String>,

    #[sea_orm(column_type = "Text")]
    pub text: String,

    pub priority: i32,

    pub preview: bool,

    /// `pending`, `sent` or `failed`
    #[sea_orm(column_type = "Text")]
    pub state: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub error: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub short_url: Option<String>,

    pub sent_at: Option<DateTimeWithTimeZone>,

    pub chat_id: Option<i64>,

    pub message_id: Option<i64>,

    pub retracted: bool,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn delivery_state(&self) -> DeliveryState {
        DeliveryState::from(self.state.clone())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::document::Entity",
        from = "Column::DocumentId",
        to = "super::document::Column::Id"
    )]
    Document,

    #[sea_orm(
        belongs_to = "super::recipient::Entity",
        from = "Column::RecipientId",
        to = "super::recipient::Column::Id",
        on_delete = "Cascade"
    )]
    Recipient,
}

impl Related<super::document::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Document.def()
    }
}

impl Related<super::recipient::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Recipient.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for Notification {
    fn from(model: Model) -> Self {
        let state = model.delivery_state();
        let handle = match (model.chat_id, model.message_id) {
            (Some(chat_id), Some(message_id)) => Some(MessageHandle { chat_id, message_id }),
            _ => None,
        };

        Self {
            id: model.id,
            document_id: model.document_id,
            recipient_id: model.recipient_id,
            alias: model.alias,
            text: model.text,
            priority: model.priority,
            preview: model.preview,
            state,
            error: model.error,
            short_url: model.short_url,
            sent_at: model.sent_at.map(Into::into),
            handle,
            retracted: model.retracted,
            created_at: model.created_at.into(),
        }
    }
}
