//! Document entity: one discovered ruling

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "documents")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Normalized source identifier, unique per court
    #[sea_orm(column_type = "Text")]
    pub external_id: String,

    /// Opaque slug used in deep links
    #[sea_orm(column_type = "Text", unique)]
    pub public_id: String,

    #[sea_orm(column_type = "Text")]
    pub court_id: String,

    #[sea_orm(column_type = "Text")]
    pub full_text: String,

    #[sea_orm(column_type = "Text")]
    pub short_text: String,

    pub published_on: Date,

    /// NULL until classified
    pub is_relevant: Option<bool>,

    pub shortcut: bool,

    pub notify: bool,

    pub processed_at: Option<DateTimeWithTimeZone>,

    pub process_duration_ms: Option<i64>,

    #[sea_orm(column_type = "Text", nullable)]
    pub error: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::court::Entity",
        from = "Column::CourtId",
        to = "super::court::Column::Id"
    )]
    Court,

    #[sea_orm(has_one = "super::document_info::Entity")]
    Info,

    #[sea_orm(has_many = "super::sub_document::Entity")]
    SubDocuments,
}

impl Related<super::court::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Court.def()
    }
}

impl Related<super::document_info::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Info.def()
    }
}

impl Related<super::sub_document::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SubDocuments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
