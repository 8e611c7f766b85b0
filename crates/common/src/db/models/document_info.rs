//! Classification metadata, 1:1 with a document

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "document_info")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub document_id: i64,

    /// Whitelist keyword -> score, NULL until classified
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub matches: Option<Json>,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub blacklist: Option<Json>,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub tags: Option<Json>,

    /// Fields extracted by the collector
    #[sea_orm(column_type = "JsonBinary")]
    pub extra: Json,

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
