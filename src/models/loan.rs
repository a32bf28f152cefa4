use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "loans")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// Pickup code handed to the student, `BK{YYYYMMDD}-{copyId}-{rand}`.
    pub booking_code: String,
    pub student_id: i32,
    pub copy_id: i32,
    /// Ledger state. `booking` and `on_loan` count as active; `returned`
    /// and `cancelled` are terminal. Lost/damaged outcomes are recorded as
    /// `returned` with a fine plus the matching copy status.
    pub status: LoanStatus,
    pub loaned_at: DateTimeUtc,
    pub due_at: DateTimeUtc,
    pub returned_at: Option<DateTimeUtc>,
    /// Accrued fine in currency units, 0 when none.
    pub fine: i64,
    pub notes: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(None)")]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    #[sea_orm(string_value = "booking")]
    Booking,
    #[sea_orm(string_value = "on_loan")]
    OnLoan,
    #[sea_orm(string_value = "returned")]
    Returned,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::student::Entity",
        from = "Column::StudentId",
        to = "super::student::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Student,
    #[sea_orm(
        belongs_to = "super::copy::Entity",
        from = "Column::CopyId",
        to = "super::copy::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Copy,
}

impl Related<super::student::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Student.def()
    }
}

impl Related<super::copy::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Copy.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl LoanStatus {
    /// Active loans hold their copy; terminal ones do not.
    pub fn is_active(&self) -> bool {
        matches!(self, LoanStatus::Booking | LoanStatus::OnLoan)
    }
}
