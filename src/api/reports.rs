use axum::{
    Json,
    extract::{Query, State},
};
use sea_orm::DatabaseConnection;
use serde_json::{Value, json};

use crate::auth::AuthUser;
use crate::error::AppResult;
use crate::services::circulation::{self, ReportFilter};

/// Flattened loan rows for a date range, for export on the admin side.
pub async fn loan_report(
    State(db): State<DatabaseConnection>,
    caller: AuthUser,
    Query(filter): Query<ReportFilter>,
) -> AppResult<Json<Value>> {
    caller.require_admin()?;
    let loans = circulation::report(&db, filter).await?;
    Ok(Json(json!({ "loans": loans, "total": loans.len() })))
}
