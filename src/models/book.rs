use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "books")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub title: String,
    pub author: String,
    pub publisher: Option<String>,
    pub year_published: Option<i32>,
    pub isbn: String,
    /// Replacement price in currency units. Used as the lost-copy fine;
    /// when NULL a flat fallback applies.
    pub price: Option<i64>,
    pub description: Option<String>,
    /// Opaque reference to an externally stored cover image.
    pub cover: Option<String>,
    pub category_id: i32,
    /// Cached count of copy rows for this book. Written only by the
    /// inventory reconciler.
    pub total_copies: i32,
    /// Cached count of copy rows with status lost or damaged. Written only
    /// by the inventory reconciler.
    pub unavailable_copies: i32,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::category::Entity",
        from = "Column::CategoryId",
        to = "super::category::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Category,
    #[sea_orm(has_many = "super::copy::Entity")]
    Copies,
}

impl Related<super::category::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Category.def()
    }
}

impl Related<super::copy::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Copies.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
