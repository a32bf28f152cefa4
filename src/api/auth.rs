use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use sea_orm::*;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::auth::{self, AuthUser};
use crate::error::{AppError, AppResult};
use crate::models::student::{self, Entity as Student};
use crate::models::user::{self, Entity as User, UserDto};
use crate::models::{NotificationStatus, Role, StudentStatus, admin_notification, notification};
use crate::realtime::user_topic;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(input): Json<LoginInput>,
) -> AppResult<Json<Value>> {
    let email = input.email.trim().to_lowercase();
    tracing::debug!(email = %email, "login attempt");

    let account = User::find()
        .filter(user::Column::Email.eq(&email))
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::Unauthorized("invalid email or password".to_string()))?;

    if !auth::verify_password(&input.password, &account.password_hash)? {
        tracing::warn!(email = %email, "password verification failed");
        return Err(AppError::Unauthorized(
            "invalid email or password".to_string(),
        ));
    }

    let token = auth::create_jwt(account.id, &account.role)?;
    Ok(Json(json!({
        "token": token,
        "user": UserDto::from(account),
    })))
}

#[derive(Debug, Deserialize)]
pub struct RegisterInput {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub student_number: String,
    pub class_name: String,
    pub phone: String,
    pub address: String,
}

/// Student self-registration. The account lands `inactive`; a welcome note
/// goes to the student's inbox and every admin gets a review notification.
pub async fn register(
    State(state): State<AppState>,
    Json(input): Json<RegisterInput>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let email = input.email.trim().to_lowercase();
    if input.full_name.trim().is_empty() {
        return Err(AppError::Validation("full name is required".to_string()));
    }
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::Validation("a valid email is required".to_string()));
    }
    if input.password.len() < 8 {
        return Err(AppError::Validation(
            "password must be at least 8 characters".to_string(),
        ));
    }
    let student_number = input.student_number.trim().to_string();
    if student_number.is_empty() {
        return Err(AppError::Validation("student number is required".to_string()));
    }

    let txn = state.db.begin().await?;

    if User::find()
        .filter(user::Column::Email.eq(&email))
        .one(&txn)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict("email already registered".to_string()));
    }
    if Student::find()
        .filter(student::Column::StudentNumber.eq(&student_number))
        .one(&txn)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict(
            "student number already registered".to_string(),
        ));
    }

    let now = Utc::now();
    let account = user::ActiveModel {
        full_name: Set(input.full_name.trim().to_string()),
        email: Set(email),
        password_hash: Set(auth::hash_password(&input.password)?),
        role: Set(Role::Student),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    let profile = student::ActiveModel {
        user_id: Set(account.id),
        student_number: Set(student_number),
        class_name: Set(input.class_name.trim().to_string()),
        phone: Set(input.phone.trim().to_string()),
        address: Set(input.address.trim().to_string()),
        status: Set(StudentStatus::Inactive),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    notification::ActiveModel {
        student_id: Set(profile.id),
        message: Set(format!(
            "Welcome {}! Your account is awaiting activation by a librarian.",
            account.full_name
        )),
        status: Set(NotificationStatus::Unread),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    let admins = User::find()
        .filter(user::Column::Role.eq(Role::Admin))
        .all(&txn)
        .await?;
    let review_note = format!(
        "New student registration: {} ({}) is waiting for activation.",
        account.full_name, profile.student_number
    );
    for admin in &admins {
        admin_notification::ActiveModel {
            user_id: Set(admin.id),
            message: Set(review_note.clone()),
            status: Set(NotificationStatus::Unread),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
    }

    txn.commit().await?;

    for admin in &admins {
        state
            .events
            .publish(&user_topic(admin.id), json!({ "message": review_note }));
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Registration received. An administrator will activate your account.",
            "user": UserDto::from(account),
            "student": profile,
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct RegisterAdminInput {
    pub full_name: String,
    pub email: String,
    pub password: String,
}

pub async fn register_admin(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(input): Json<RegisterAdminInput>,
) -> AppResult<(StatusCode, Json<Value>)> {
    caller.require_admin()?;

    let email = input.email.trim().to_lowercase();
    if input.full_name.trim().is_empty() {
        return Err(AppError::Validation("full name is required".to_string()));
    }
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::Validation("a valid email is required".to_string()));
    }
    if input.password.len() < 8 {
        return Err(AppError::Validation(
            "password must be at least 8 characters".to_string(),
        ));
    }

    if User::find()
        .filter(user::Column::Email.eq(&email))
        .one(&state.db)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict("email already registered".to_string()));
    }

    let now = Utc::now();
    let account = user::ActiveModel {
        full_name: Set(input.full_name.trim().to_string()),
        email: Set(email),
        password_hash: Set(auth::hash_password(&input.password)?),
        role: Set(Role::Admin),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Admin account created",
            "user": UserDto::from(account),
        })),
    ))
}
