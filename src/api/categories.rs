use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use sea_orm::DatabaseConnection;
use serde_json::{Value, json};

use crate::auth::AuthUser;
use crate::error::AppResult;
use crate::services::catalog::{self, CategoryInput};
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/api/categories",
    responses(
        (status = 200, description = "All categories ordered by name")
    )
)]
pub async fn list_categories(State(db): State<DatabaseConnection>) -> AppResult<Json<Value>> {
    let categories = catalog::list_categories(&db).await?;
    Ok(Json(json!({ "categories": categories })))
}

pub async fn create_category(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(input): Json<CategoryInput>,
) -> AppResult<(StatusCode, Json<Value>)> {
    caller.require_admin()?;
    let category = catalog::create_category(&state, input).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Category created", "category": category })),
    ))
}

pub async fn update_category(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<i32>,
    Json(input): Json<CategoryInput>,
) -> AppResult<Json<Value>> {
    caller.require_admin()?;
    let category = catalog::update_category(&state, id, input).await?;
    Ok(Json(json!({ "message": "Category updated", "category": category })))
}

pub async fn delete_category(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    caller.require_admin()?;
    catalog::delete_category(&state, id).await?;
    Ok(Json(json!({ "message": "Category deleted" })))
}
