use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "copies")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub book_id: i32,
    /// Human-readable copy code, `PREFIX-{bookId}-{seq}`. Unique.
    pub code: String,
    pub inventory_number: Option<String>,
    /// Availability status of this physical copy.
    /// Valid values:
    /// - `available`: On shelf, can be allocated
    /// - `booked`: Reserved by a student, pickup pending
    /// - `on_loan`: Currently lent out (has an active loan row)
    /// - `lost`: Reported lost
    /// - `damaged`: Withdrawn as damaged
    ///
    /// `booked` and `on_loan` are owned by the loan ledger; manual edits may
    /// only set `available`, `lost` or `damaged`.
    pub status: CopyStatus,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(None)")]
#[serde(rename_all = "snake_case")]
pub enum CopyStatus {
    #[sea_orm(string_value = "available")]
    Available,
    #[sea_orm(string_value = "booked")]
    Booked,
    #[sea_orm(string_value = "on_loan")]
    OnLoan,
    #[sea_orm(string_value = "lost")]
    Lost,
    #[sea_orm(string_value = "damaged")]
    Damaged,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::book::Entity",
        from = "Column::BookId",
        to = "super::book::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Book,
    #[sea_orm(has_many = "super::loan::Entity")]
    Loans,
}

impl Related<super::book::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Book.def()
    }
}

impl Related<super::loan::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Loans.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
