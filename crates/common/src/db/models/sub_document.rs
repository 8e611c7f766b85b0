//! Attachment of a document

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sub_documents")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub document_id: i64,

    #[sea_orm(column_type = "Text", nullable)]
    pub title: Option<String>,

    /// `text`, `web` or `other`
    #[sea_orm(column_type = "Text")]
    pub kind: String,

    #[sea_orm(column_type = "Text")]
    pub url: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub archive_url: Option<String>,

    pub is_working: Option<bool>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::document::Entity",
        from = "Column::DocumentId",
        to = "super::document::Column::Id",
        on_delete = "Cascade"
    )]
    Document,
}

impl Related<super::document::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Document.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for crate::domain::SubDocument {
    fn from(model: Model) -> Self {
        Self {
            title: model.title,
            kind: model.kind.as_str().into(),
            url: model.url,
            archive_url: model.archive_url,
            is_working: model.is_working,
        }
    }
}
