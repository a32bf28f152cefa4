use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::auth::AuthUser;
use crate::error::AppResult;
use crate::services::catalog::{self, CopyInput, CopyStatusInput};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListCopiesQuery {
    pub book_id: Option<i32>,
}

pub async fn list_copies(
    State(db): State<DatabaseConnection>,
    caller: AuthUser,
    Query(query): Query<ListCopiesQuery>,
) -> AppResult<Json<Value>> {
    caller.require_admin()?;
    let copies = catalog::list_copies(&db, query.book_id).await?;
    Ok(Json(json!({ "copies": copies, "total": copies.len() })))
}

pub async fn list_book_copies(
    State(db): State<DatabaseConnection>,
    caller: AuthUser,
    Path(book_id): Path<i32>,
) -> AppResult<Json<Value>> {
    caller.require_admin()?;
    let copies = catalog::list_copies(&db, Some(book_id)).await?;
    Ok(Json(json!({ "copies": copies, "total": copies.len() })))
}

pub async fn get_copy(
    State(db): State<DatabaseConnection>,
    caller: AuthUser,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    caller.require_admin()?;
    let copy = catalog::get_copy(&db, id).await?;
    Ok(Json(json!({ "copy": copy })))
}

pub async fn create_copy(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(input): Json<CopyInput>,
) -> AppResult<(StatusCode, Json<Value>)> {
    caller.require_admin()?;
    let copy = catalog::create_copy(&state, input).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Copy created", "copy": copy })),
    ))
}

pub async fn update_copy(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<i32>,
    Json(input): Json<CopyStatusInput>,
) -> AppResult<Json<Value>> {
    caller.require_admin()?;
    let copy = catalog::update_copy_status(&state, id, input).await?;
    Ok(Json(json!({ "message": "Copy updated", "copy": copy })))
}

pub async fn delete_copy(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    caller.require_admin()?;
    catalog::delete_copy(&state, id).await?;
    Ok(Json(json!({ "message": "Copy deleted" })))
}
