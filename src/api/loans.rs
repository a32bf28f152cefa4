use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{Datelike, Utc};
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::auth::AuthUser;
use crate::error::AppResult;
use crate::services::circulation::{self, AllocateInput, LoanFilter, TransitionInput};
use crate::state::AppState;

/// Allocate copies to a student. Students book for themselves; staff pass a
/// `student_id` to start a hand-over-the-counter loan (the service enforces
/// the admin gate on that path).
pub async fn create_loan(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(input): Json<AllocateInput>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let loans = circulation::allocate(&state, &caller, input).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Loan recorded", "loans": loans })),
    ))
}

pub async fn list_loans(
    State(db): State<DatabaseConnection>,
    caller: AuthUser,
    Query(filter): Query<LoanFilter>,
) -> AppResult<Json<Value>> {
    caller.require_admin()?;
    let loans = circulation::list_loans(&db, filter).await?;
    Ok(Json(json!({ "loans": loans, "total": loans.len() })))
}

pub async fn history(
    State(db): State<DatabaseConnection>,
    caller: AuthUser,
) -> AppResult<Json<Value>> {
    caller.require_student()?;
    let loans = circulation::student_history(&db, caller.user_id).await?;
    Ok(Json(json!({ "loans": loans, "total": loans.len() })))
}

#[derive(Debug, Deserialize)]
pub struct ChartQuery {
    pub year: Option<i32>,
}

pub async fn chart_stats(
    State(db): State<DatabaseConnection>,
    caller: AuthUser,
    Query(query): Query<ChartQuery>,
) -> AppResult<Json<Value>> {
    caller.require_admin()?;
    let year = query.year.unwrap_or_else(|| Utc::now().year());
    let months = circulation::chart_stats(&db, year).await?;
    Ok(Json(json!({ "year": year, "months": months })))
}

pub async fn update_loan(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<i32>,
    Json(input): Json<TransitionInput>,
) -> AppResult<Json<Value>> {
    caller.require_admin()?;
    let loan = circulation::transition(&state, id, input).await?;
    Ok(Json(json!({ "message": "Loan updated", "loan": loan })))
}

pub async fn delete_loan(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    caller.require_admin()?;
    circulation::release(&state, id).await?;
    Ok(Json(json!({ "message": "Loan deleted" })))
}
