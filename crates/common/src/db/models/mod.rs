//! SeaORM entity models
//!
//! Database entities for the Tarwatch pipeline

mod court;
mod document;
mod document_info;
mod notification;
mod recipient;
mod sub_document;
mod subscription;

pub use court::{
    Entity as CourtEntity,
    Model as CourtModel,
    Column as CourtColumn,
};

pub use recipient::{
    Entity as RecipientEntity,
    Column as RecipientColumn,
};

pub use subscription::{
    Entity as SubscriptionEntity,
    Column as SubscriptionColumn,
};

pub use document::{
    Entity as DocumentEntity,
    Model as DocumentModel,
    ActiveModel as DocumentActiveModel,
    Column as DocumentColumn,
};

pub use document_info::{
    Entity as DocumentInfoEntity,
    Model as DocumentInfoModel,
    ActiveModel as DocumentInfoActiveModel,
};

pub use sub_document::{
    Entity as SubDocumentEntity,
    Model as SubDocumentModel,
    ActiveModel as SubDocumentActiveModel,
    Column as SubDocumentColumn,
};

pub use notification::{
    Entity as NotificationEntity,
    Model as NotificationModel,
    ActiveModel as NotificationActiveModel,
    Column as NotificationColumn,
};
