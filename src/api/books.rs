use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use sea_orm::DatabaseConnection;
use serde_json::{Value, json};

use crate::auth::AuthUser;
use crate::error::AppResult;
use crate::services::catalog::{self, BookInput};
use crate::services::recommend;
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/api/books",
    responses(
        (status = 200, description = "All books with computed availability")
    )
)]
pub async fn list_books(State(db): State<DatabaseConnection>) -> AppResult<Json<Value>> {
    let books = catalog::list_books(&db).await?;
    Ok(Json(json!({
        "books": books,
        "total": books.len(),
    })))
}

#[utoipa::path(
    get,
    path = "/api/books/{id}",
    params(("id" = i32, Path, description = "Book id")),
    responses(
        (status = 200, description = "One book with its copies and status counts"),
        (status = 404, description = "Book not found")
    )
)]
pub async fn get_book(
    State(db): State<DatabaseConnection>,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    let book = catalog::get_book(&db, id).await?;
    Ok(Json(json!({ "book": book })))
}

pub async fn create_book(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(input): Json<BookInput>,
) -> AppResult<(StatusCode, Json<Value>)> {
    caller.require_admin()?;
    let book = catalog::create_book(&state, input).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Book created", "book": book })),
    ))
}

pub async fn update_book(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<i32>,
    Json(input): Json<BookInput>,
) -> AppResult<Json<Value>> {
    caller.require_admin()?;
    let book = catalog::update_book(&state, id, input).await?;
    Ok(Json(json!({ "message": "Book updated", "book": book })))
}

pub async fn delete_book(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    caller.require_admin()?;
    catalog::delete_book(&state, id).await?;
    Ok(Json(json!({ "message": "Book deleted" })))
}

#[utoipa::path(
    get,
    path = "/api/books/{id}/recommendations",
    params(("id" = i32, Path, description = "Book id")),
    responses(
        (status = 200, description = "Up to ten similar books by text similarity"),
        (status = 404, description = "Book not found")
    )
)]
pub async fn recommendations(
    State(db): State<DatabaseConnection>,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    let recommendations = recommend::recommend_for(&db, id).await?;
    Ok(Json(json!({ "recommendations": recommendations })))
}
