use axum::{
    Json,
    extract::{Path, State},
};
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::*;
use serde_json::{Value, json};

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::models::admin_notification::{self, Entity as AdminNotification};
use crate::models::notification::{self, Entity as Notification};
use crate::models::student::{self, Entity as Student};
use crate::models::NotificationStatus;

async fn own_student_id(db: &DatabaseConnection, caller: &AuthUser) -> AppResult<i32> {
    caller.require_student()?;
    let profile = Student::find()
        .filter(student::Column::UserId.eq(caller.user_id))
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound("no student profile for this account".to_string()))?;
    Ok(profile.id)
}

pub async fn list_own(
    State(db): State<DatabaseConnection>,
    caller: AuthUser,
) -> AppResult<Json<Value>> {
    let student_id = own_student_id(&db, &caller).await?;

    let notifications = Notification::find()
        .filter(notification::Column::StudentId.eq(student_id))
        .order_by_desc(notification::Column::CreatedAt)
        .all(&db)
        .await?;
    let unread = notifications
        .iter()
        .filter(|n| n.status == NotificationStatus::Unread)
        .count();

    Ok(Json(json!({ "notifications": notifications, "unread": unread })))
}

pub async fn mark_read(
    State(db): State<DatabaseConnection>,
    caller: AuthUser,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    let student_id = own_student_id(&db, &caller).await?;

    let target = Notification::find_by_id(id)
        .one(&db)
        .await?
        .filter(|n| n.student_id == student_id)
        .ok_or_else(|| AppError::NotFound("notification not found".to_string()))?;

    let mut active: notification::ActiveModel = target.into();
    active.status = Set(NotificationStatus::Read);
    active.updated_at = Set(Utc::now());
    let updated = active.update(&db).await?;

    Ok(Json(json!({ "message": "Notification read", "notification": updated })))
}

pub async fn read_all(
    State(db): State<DatabaseConnection>,
    caller: AuthUser,
) -> AppResult<Json<Value>> {
    let student_id = own_student_id(&db, &caller).await?;

    let result = Notification::update_many()
        .col_expr(
            notification::Column::Status,
            Expr::value(NotificationStatus::Read),
        )
        .col_expr(notification::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(notification::Column::StudentId.eq(student_id))
        .filter(notification::Column::Status.eq(NotificationStatus::Unread))
        .exec(&db)
        .await?;

    Ok(Json(json!({
        "message": "All notifications read",
        "updated": result.rows_affected,
    })))
}

/// Deleting an already-gone notification still succeeds.
pub async fn delete_one(
    State(db): State<DatabaseConnection>,
    caller: AuthUser,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    let student_id = own_student_id(&db, &caller).await?;

    Notification::delete_many()
        .filter(notification::Column::Id.eq(id))
        .filter(notification::Column::StudentId.eq(student_id))
        .exec(&db)
        .await?;

    Ok(Json(json!({ "message": "Notification deleted" })))
}

pub async fn admin_list_own(
    State(db): State<DatabaseConnection>,
    caller: AuthUser,
) -> AppResult<Json<Value>> {
    caller.require_admin()?;

    let notifications = AdminNotification::find()
        .filter(admin_notification::Column::UserId.eq(caller.user_id))
        .order_by_desc(admin_notification::Column::CreatedAt)
        .all(&db)
        .await?;
    let unread = notifications
        .iter()
        .filter(|n| n.status == NotificationStatus::Unread)
        .count();

    Ok(Json(json!({ "notifications": notifications, "unread": unread })))
}

pub async fn admin_mark_read(
    State(db): State<DatabaseConnection>,
    caller: AuthUser,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    caller.require_admin()?;

    let target = AdminNotification::find_by_id(id)
        .one(&db)
        .await?
        .filter(|n| n.user_id == caller.user_id)
        .ok_or_else(|| AppError::NotFound("notification not found".to_string()))?;

    let mut active: admin_notification::ActiveModel = target.into();
    active.status = Set(NotificationStatus::Read);
    active.updated_at = Set(Utc::now());
    let updated = active.update(&db).await?;

    Ok(Json(json!({ "message": "Notification read", "notification": updated })))
}

pub async fn admin_read_all(
    State(db): State<DatabaseConnection>,
    caller: AuthUser,
) -> AppResult<Json<Value>> {
    caller.require_admin()?;

    let result = AdminNotification::update_many()
        .col_expr(
            admin_notification::Column::Status,
            Expr::value(NotificationStatus::Read),
        )
        .col_expr(admin_notification::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(admin_notification::Column::UserId.eq(caller.user_id))
        .filter(admin_notification::Column::Status.eq(NotificationStatus::Unread))
        .exec(&db)
        .await?;

    Ok(Json(json!({
        "message": "All notifications read",
        "updated": result.rows_affected,
    })))
}

pub async fn admin_delete_one(
    State(db): State<DatabaseConnection>,
    caller: AuthUser,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    caller.require_admin()?;

    AdminNotification::delete_many()
        .filter(admin_notification::Column::Id.eq(id))
        .filter(admin_notification::Column::UserId.eq(caller.user_id))
        .exec(&db)
        .await?;

    Ok(Json(json!({ "message": "Notification deleted" })))
}
