use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use sea_orm::*;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;

use crate::auth::{self, AuthUser};
use crate::error::{AppError, AppResult};
use crate::models::loan::{self, Entity as Loan};
use crate::models::student::{self, Entity as Student};
use crate::models::user::{self, Entity as User};
use crate::models::{LoanStatus, NotificationStatus, Role, StudentStatus, notification};
use crate::realtime::user_topic;
use crate::state::AppState;

fn student_row(profile: &student::Model, account: Option<&user::Model>) -> Value {
    json!({
        "id": profile.id,
        "user_id": profile.user_id,
        "student_number": profile.student_number,
        "class_name": profile.class_name,
        "phone": profile.phone,
        "address": profile.address,
        "status": profile.status,
        "full_name": account.map(|u| u.full_name.clone()),
        "email": account.map(|u| u.email.clone()),
        "created_at": profile.created_at,
        "updated_at": profile.updated_at,
    })
}

pub async fn list_students(
    State(db): State<DatabaseConnection>,
    caller: AuthUser,
) -> AppResult<Json<Value>> {
    caller.require_admin()?;

    let students = Student::find()
        .order_by_asc(student::Column::StudentNumber)
        .all(&db)
        .await?;
    let user_ids: Vec<i32> = students.iter().map(|s| s.user_id).collect();
    let mut users_by_id: HashMap<i32, user::Model> = HashMap::new();
    if !user_ids.is_empty() {
        for u in User::find()
            .filter(user::Column::Id.is_in(user_ids))
            .all(&db)
            .await?
        {
            users_by_id.insert(u.id, u);
        }
    }

    let rows: Vec<Value> = students
        .iter()
        .map(|s| student_row(s, users_by_id.get(&s.user_id)))
        .collect();
    Ok(Json(json!({ "students": rows, "total": rows.len() })))
}

#[derive(Debug, Deserialize)]
pub struct CreateStudentInput {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub student_number: String,
    pub class_name: String,
    pub phone: String,
    pub address: String,
    /// Staff-created accounts default to `active`.
    pub status: Option<StudentStatus>,
}

pub async fn create_student(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(input): Json<CreateStudentInput>,
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
        status: Set(input.status.unwrap_or(StudentStatus::Active)),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Student created",
            "student": student_row(&profile, Some(&account)),
        })),
    ))
}

pub async fn get_student(
    State(db): State<DatabaseConnection>,
    caller: AuthUser,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    caller.require_admin()?;

    let (profile, account) = Student::find_by_id(id)
        .find_also_related(User)
        .one(&db)
        .await?
        .ok_or_else(|| AppError::NotFound("student not found".to_string()))?;

    let active_loans = Loan::find()
        .filter(loan::Column::StudentId.eq(profile.id))
        .filter(loan::Column::Status.is_in([LoanStatus::Booking, LoanStatus::OnLoan]))
        .count(&db)
        .await?;

    let mut row = student_row(&profile, account.as_ref());
    row["active_loans"] = json!(active_loans);
    Ok(Json(json!({ "student": row })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStudentInput {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub student_number: Option<String>,
    pub class_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub status: Option<StudentStatus>,
}

/// Admin update of a student record; flipping `status` to `active` is the
/// activation step and tells the student so.
pub async fn update_student(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<i32>,
    Json(input): Json<UpdateStudentInput>,
) -> AppResult<Json<Value>> {
    caller.require_admin()?;

    let txn = state.db.begin().await?;

    let profile = Student::find_by_id(id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("student not found".to_string()))?;
    let account = User::find_by_id(profile.user_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".to_string()))?;

    let now = Utc::now();
    let activated = profile.status == StudentStatus::Inactive
        && input.status == Some(StudentStatus::Active);

    let mut account_active: user::ActiveModel = account.clone().into();
    if let Some(full_name) = &input.full_name {
        if full_name.trim().is_empty() {
            return Err(AppError::Validation("full name cannot be empty".to_string()));
        }
        account_active.full_name = Set(full_name.trim().to_string());
    }
    if let Some(email) = &input.email {
        let email = email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::Validation("a valid email is required".to_string()));
        }
        let taken = User::find()
            .filter(user::Column::Email.eq(&email))
            .filter(user::Column::Id.ne(account.id))
            .one(&txn)
            .await?;
        if taken.is_some() {
            return Err(AppError::Conflict("email already registered".to_string()));
        }
        account_active.email = Set(email);
    }
    if let Some(password) = &input.password {
        if password.len() < 8 {
            return Err(AppError::Validation(
                "password must be at least 8 characters".to_string(),
            ));
        }
        account_active.password_hash = Set(auth::hash_password(password)?);
    }
    account_active.updated_at = Set(now);
    let account = account_active.update(&txn).await?;

    let mut profile_active: student::ActiveModel = profile.clone().into();
    if let Some(student_number) = &input.student_number {
        let student_number = student_number.trim().to_string();
        if student_number.is_empty() {
            return Err(AppError::Validation(
                "student number cannot be empty".to_string(),
            ));
        }
        let taken = Student::find()
            .filter(student::Column::StudentNumber.eq(&student_number))
            .filter(student::Column::Id.ne(profile.id))
            .one(&txn)
            .await?;
        if taken.is_some() {
            return Err(AppError::Conflict(
                "student number already registered".to_string(),
            ));
        }
        profile_active.student_number = Set(student_number);
    }
    if let Some(class_name) = &input.class_name {
        profile_active.class_name = Set(class_name.trim().to_string());
    }
    if let Some(phone) = &input.phone {
        profile_active.phone = Set(phone.trim().to_string());
    }
    if let Some(address) = &input.address {
        profile_active.address = Set(address.trim().to_string());
    }
    if let Some(status) = input.status.clone() {
        profile_active.status = Set(status);
    }
    profile_active.updated_at = Set(now);
    let profile = profile_active.update(&txn).await?;

    let activation_note = format!(
        "Hi {}, your library account is now active. Happy reading!",
        account.full_name
    );
    if activated {
        notification::ActiveModel {
            student_id: Set(profile.id),
            message: Set(activation_note.clone()),
            status: Set(NotificationStatus::Unread),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
    }

    txn.commit().await?;

    if activated {
        state.notify(&profile.phone, activation_note.clone());
        state.events.publish(
            &user_topic(account.id),
            json!({ "message": activation_note }),
        );
    }

    Ok(Json(json!({
        "message": "Student updated",
        "student": student_row(&profile, Some(&account)),
    })))
}

pub async fn delete_student(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    caller.require_admin()?;

    let txn = state.db.begin().await?;

    let profile = Student::find_by_id(id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("student not found".to_string()))?;

    let active = Loan::find()
        .filter(loan::Column::StudentId.eq(profile.id))
        .filter(loan::Column::Status.is_in([LoanStatus::Booking, LoanStatus::OnLoan]))
        .count(&txn)
        .await?;
    if active > 0 {
        return Err(AppError::InvalidState(
            "student has active loans and cannot be deleted".to_string(),
        ));
    }

    // Removing the account cascades to the profile, its loan history and
    // its notifications.
    User::delete_by_id(profile.user_id).exec(&txn).await?;
    txn.commit().await?;

    Ok(Json(json!({ "message": "Student deleted" })))
}

pub async fn me(State(db): State<DatabaseConnection>, caller: AuthUser) -> AppResult<Json<Value>> {
    caller.require_student()?;

    let (profile, account) = Student::find()
        .filter(student::Column::UserId.eq(caller.user_id))
        .find_also_related(User)
        .one(&db)
        .await?
        .ok_or_else(|| AppError::NotFound("no student profile for this account".to_string()))?;

    Ok(Json(json!({ "student": student_row(&profile, account.as_ref()) })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateMeInput {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

pub async fn update_me(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(input): Json<UpdateMeInput>,
) -> AppResult<Json<Value>> {
    caller.require_student()?;

    let txn = state.db.begin().await?;

    let profile = Student::find()
        .filter(student::Column::UserId.eq(caller.user_id))
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("no student profile for this account".to_string()))?;
    let account = User::find_by_id(profile.user_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".to_string()))?;

    let now = Utc::now();

    let mut account_active: user::ActiveModel = account.clone().into();
    if let Some(full_name) = &input.full_name {
        if full_name.trim().is_empty() {
            return Err(AppError::Validation("full name cannot be empty".to_string()));
        }
        account_active.full_name = Set(full_name.trim().to_string());
    }
    account_active.updated_at = Set(now);
    let account = account_active.update(&txn).await?;

    let mut profile_active: student::ActiveModel = profile.into();
    if let Some(phone) = &input.phone {
        profile_active.phone = Set(phone.trim().to_string());
    }
    if let Some(address) = &input.address {
        profile_active.address = Set(address.trim().to_string());
    }
    profile_active.updated_at = Set(now);
    let profile = profile_active.update(&txn).await?;

    txn.commit().await?;

    Ok(Json(json!({
        "message": "Profile updated",
        "student": student_row(&profile, Some(&account)),
    })))
}
