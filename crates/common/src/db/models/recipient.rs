//! Recipient entity (a chat the bot can write to)

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "recipients")]
pub struct Model {
    /// Chat id assigned by the channel
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,

    #[sea_orm(column_type = "Text", nullable)]
    pub alias: Option<String>,

    /// Conversation state of the interactive front-end
    pub state: i16,

    /// Pagination cursor of the interactive front-end
    pub page: i16,

    pub is_admin: bool,

    pub is_banned: bool,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::subscription::Entity")]
    Subscriptions,
}

impl Related<super::subscription::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Subscriptions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
