use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use bibliodesk::auth::{create_jwt, hash_password};
use bibliodesk::models::{
    CopyStatus, LoanStatus, Role, StudentStatus, book, category, copy, loan, student, user,
};
use bibliodesk::notify::Notifier;
use bibliodesk::state::AppState;
use bibliodesk::{api, db};
use chrono::Utc;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, Set};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::util::ServiceExt; // for `oneshot`

struct SilentNotifier;

#[async_trait::async_trait]
impl Notifier for SilentNotifier {
    async fn send(&self, _phone: &str, _message: &str) {}
}

async fn setup_state() -> AppState {
    let db = db::init_db("sqlite::memory:")
        .await
        .expect("Failed to init DB");
    AppState::new(db, Arc::new(SilentNotifier))
}

fn test_app(state: &AppState) -> Router {
    api::app(state.clone(), &[])
}

async fn create_test_admin(db: &DatabaseConnection) -> String {
    let now = Utc::now();
    let account = user::ActiveModel {
        full_name: Set("Librarian".to_string()),
        email: Set("librarian@example.com".to_string()),
        password_hash: Set(hash_password("admin-password").unwrap()),
        role: Set(Role::Admin),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    let user_id = user::Entity::insert(account)
        .exec(db)
        .await
        .expect("Failed to create admin")
        .last_insert_id;
    create_jwt(user_id, &Role::Admin).unwrap()
}

// Returns (student_id, bearer token)
async fn create_test_student(db: &DatabaseConnection, email: &str, number: &str) -> (i32, String) {
    let now = Utc::now();
    let account = user::ActiveModel {
        full_name: Set("Siti Rahma".to_string()),
        email: Set(email.to_string()),
        password_hash: Set(hash_password("student-password").unwrap()),
        role: Set(Role::Student),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    let user_id = user::Entity::insert(account)
        .exec(db)
        .await
        .expect("Failed to create user")
        .last_insert_id;

    let profile = student::ActiveModel {
        user_id: Set(user_id),
        student_number: Set(number.to_string()),
        class_name: Set("XI-A".to_string()),
        phone: Set("08123456789".to_string()),
        address: Set("Jl. Merdeka 1".to_string()),
        status: Set(StudentStatus::Active),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    let student_id = student::Entity::insert(profile)
        .exec(db)
        .await
        .expect("Failed to create student")
        .last_insert_id;

    (student_id, create_jwt(user_id, &Role::Student).unwrap())
}

async fn create_test_book(db: &DatabaseConnection, copies: usize) -> (i32, i32) {
    let now = Utc::now();
    let cat = category::ActiveModel {
        name: Set("Fiction".to_string()),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    let category_id = category::Entity::insert(cat)
        .exec(db)
        .await
        .expect("Failed to create category")
        .last_insert_id;

    let row = book::ActiveModel {
        title: Set("Laskar Pelangi".to_string()),
        author: Set("Andrea Hirata".to_string()),
        publisher: Set(None),
        year_published: Set(Some(2005)),
        isbn: Set("978-979-3062-79-2".to_string()),
        price: Set(Some(85_000)),
        description: Set(None),
        cover: Set(None),
        category_id: Set(category_id),
        total_copies: Set(copies as i32),
        unavailable_copies: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    let book_id = book::Entity::insert(row)
        .exec(db)
        .await
        .expect("Failed to create book")
        .last_insert_id;

    for seq in 1..=copies {
        let c = copy::ActiveModel {
            book_id: Set(book_id),
            code: Set(format!("LAS-{}-{:03}", book_id, seq)),
            inventory_number: Set(None),
            status: Set(CopyStatus::Available),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        copy::Entity::insert(c)
            .exec(db)
            .await
            .expect("Failed to create copy");
    }
    (book_id, category_id)
}

fn build_request(method: &str, uri: &str, token: Option<&str>, payload: Option<&Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let body = match payload {
        Some(payload) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_vec(payload).unwrap())
        }
        None => Body::empty(),
    };
    builder.body(body).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    serde_json::from_slice(&bytes).expect("Failed to parse body")
}

#[tokio::test]
async fn test_missing_or_malformed_tokens_are_unauthorized() {
    let state = setup_state().await;
    let app = test_app(&state);

    // No Authorization header at all
    let response = app
        .clone()
        .oneshot(build_request("GET", "/api/loans", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Wrong scheme
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/loans")
                .header(header::AUTHORIZATION, "Token abcdef")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Bearer, but not a JWT
    let response = app
        .clone()
        .oneshot(build_request("GET", "/api/loans", Some("garbage"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_role_gates() {
    let state = setup_state().await;
    let admin_token = create_test_admin(&state.db).await;
    let (_, student_token) = create_test_student(&state.db, "siti@example.com", "2024-001").await;
    let app = test_app(&state);

    // Students cannot reach the staff surface
    for uri in [
        "/api/loans",
        "/api/students",
        "/api/reports/loans",
        "/api/loans/chart-stats",
        "/api/copies",
        "/api/admin-notifications",
    ] {
        let response = app
            .clone()
            .oneshot(build_request("GET", uri, Some(&student_token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "GET {}", uri);
    }
    let response = app
        .clone()
        .oneshot(build_request(
            "POST",
            "/api/books",
            Some(&student_token),
            Some(&json!({
                "title": "X", "author": "Y", "isbn": "1", "category_id": 1, "total_copies": 1
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Admins in turn have no student profile to act through
    for uri in ["/api/loans/history", "/api/notifications", "/api/students/me"] {
        let response = app
            .clone()
            .oneshot(build_request("GET", uri, Some(&admin_token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "GET {}", uri);
    }

    // Creating admin accounts is itself admin-only
    let payload = json!({
        "full_name": "Second Admin",
        "email": "second@example.com",
        "password": "second-password"
    });
    let response = app
        .clone()
        .oneshot(build_request(
            "POST",
            "/api/auth/register-admin",
            Some(&student_token),
            Some(&payload),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = app
        .clone()
        .oneshot(build_request(
            "POST",
            "/api/auth/register-admin",
            Some(&admin_token),
            Some(&payload),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_missing_resources_return_not_found() {
    let state = setup_state().await;
    let admin_token = create_test_admin(&state.db).await;
    let app = test_app(&state);

    let response = app
        .clone()
        .oneshot(build_request("GET", "/api/books/999", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(build_request("GET", "/api/copies/999", Some(&admin_token), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(build_request("GET", "/api/students/999", Some(&admin_token), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(build_request(
            "PUT",
            "/api/loans/999",
            Some(&admin_token),
            Some(&json!({ "status": "returned" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(build_request(
            "PUT",
            "/api/categories/999",
            Some(&admin_token),
            Some(&json!({ "name": "Poetry" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() {
    let state = setup_state().await;
    let app = test_app(&state);

    let payload = json!({
        "full_name": "Budi Santoso",
        "email": "budi@example.com",
        "password": "budi-password",
        "student_number": "2024-007",
        "class_name": "XII-B",
        "phone": "08129876543",
        "address": "Jl. Kenanga 7"
    });
    let response = app
        .clone()
        .oneshot(build_request("POST", "/api/auth/register", None, Some(&payload)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // Same email again
    let response = app
        .clone()
        .oneshot(build_request("POST", "/api/auth/register", None, Some(&payload)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = body_json(response).await;
    assert!(json["message"].as_str().unwrap().contains("email"));

    // Fresh email, but a taken student number
    let mut second = payload.clone();
    second["email"] = json!("budi2@example.com");
    let response = app
        .clone()
        .oneshot(build_request("POST", "/api/auth/register", None, Some(&second)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = body_json(response).await;
    assert!(json["message"].as_str().unwrap().contains("student number"));

    // Only one account made it in
    let accounts = user::Entity::find().count(&state.db).await.unwrap();
    assert_eq!(accounts, 1);
}

#[tokio::test]
async fn test_duplicate_isbn_conflicts() {
    let state = setup_state().await;
    let admin_token = create_test_admin(&state.db).await;
    let (_, category_id) = create_test_book(&state.db, 1).await;
    let app = test_app(&state);

    let response = app
        .clone()
        .oneshot(build_request(
            "POST",
            "/api/books",
            Some(&admin_token),
            Some(&json!({
                "title": "Another Edition",
                "author": "Andrea Hirata",
                "isbn": "978-979-3062-79-2",
                "category_id": category_id,
                "total_copies": 1
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_validation_failures() {
    let state = setup_state().await;
    let admin_token = create_test_admin(&state.db).await;
    let (_, category_id) = create_test_book(&state.db, 1).await;
    let app = test_app(&state);

    // Short password on registration
    let response = app
        .clone()
        .oneshot(build_request(
            "POST",
            "/api/auth/register",
            None,
            Some(&json!({
                "full_name": "Budi Santoso",
                "email": "budi@example.com",
                "password": "short",
                "student_number": "2024-007",
                "class_name": "XII-B",
                "phone": "08129876543",
                "address": "Jl. Kenanga 7"
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Books need at least one copy
    let response = app
        .clone()
        .oneshot(build_request(
            "POST",
            "/api/books",
            Some(&admin_token),
            Some(&json!({
                "title": "Empty Shelf",
                "author": "Nobody",
                "isbn": "999-1",
                "category_id": category_id,
                "total_copies": 0
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // ...and an existing category
    let response = app
        .clone()
        .oneshot(build_request(
            "POST",
            "/api/books",
            Some(&admin_token),
            Some(&json!({
                "title": "Orphan",
                "author": "Nobody",
                "isbn": "999-2",
                "category_id": 999,
                "total_copies": 1
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Blank category names are rejected
    let response = app
        .clone()
        .oneshot(build_request(
            "POST",
            "/api/categories",
            Some(&admin_token),
            Some(&json!({ "name": "   " })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // A structurally invalid body never reaches a handler
    let response = app
        .clone()
        .oneshot(build_request(
            "POST",
            "/api/loans",
            Some(&admin_token),
            Some(&json!({ "quantity": 1 })),
        ))
        .await
        .unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_zero_quantity_loan_is_rejected() {
    let state = setup_state().await;
    let (_, student_token) = create_test_student(&state.db, "siti@example.com", "2024-001").await;
    let (book_id, _) = create_test_book(&state.db, 1).await;
    let app = test_app(&state);

    let response = app
        .clone()
        .oneshot(build_request(
            "POST",
            "/api/loans",
            Some(&student_token),
            Some(&json!({ "book_id": book_id, "quantity": 0 })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let loans = loan::Entity::find().count(&state.db).await.unwrap();
    assert_eq!(loans, 0);
}

#[tokio::test]
async fn test_delete_guards() {
    let state = setup_state().await;
    let admin_token = create_test_admin(&state.db).await;
    let (student_id, student_token) =
        create_test_student(&state.db, "siti@example.com", "2024-001").await;
    let (book_id, category_id) = create_test_book(&state.db, 1).await;
    let app = test_app(&state);

    // Put the only copy on loan
    let response = app
        .clone()
        .oneshot(build_request(
            "POST",
            "/api/loans",
            Some(&student_token),
            Some(&json!({ "book_id": book_id })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let loan_id = body_json(response).await["loans"][0]["id"].as_i64().unwrap();

    // While the loan is active: no deleting the student, the book, or the category
    let response = app
        .clone()
        .oneshot(build_request(
            "DELETE",
            &format!("/api/students/{}", student_id),
            Some(&admin_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(build_request(
            "DELETE",
            &format!("/api/books/{}", book_id),
            Some(&admin_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(build_request(
            "DELETE",
            &format!("/api/categories/{}", category_id),
            Some(&admin_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Settle the loan, then the student can go; the account cascade takes
    // the profile and the loan history with it
    let response = app
        .clone()
        .oneshot(build_request(
            "PUT",
            &format!("/api/loans/{}", loan_id),
            Some(&admin_token),
            Some(&json!({ "status": "cancelled" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(build_request(
            "DELETE",
            &format!("/api/students/{}", student_id),
            Some(&admin_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let remaining_students = student::Entity::find().count(&state.db).await.unwrap();
    assert_eq!(remaining_students, 0);
    let remaining_loans = loan::Entity::find()
        .filter(loan::Column::StudentId.eq(student_id))
        .count(&state.db)
        .await
        .unwrap();
    assert_eq!(remaining_loans, 0);
}

#[tokio::test]
async fn test_illegal_loan_transition_is_a_clear_error() {
    let state = setup_state().await;
    let admin_token = create_test_admin(&state.db).await;
    let (_, student_token) = create_test_student(&state.db, "siti@example.com", "2024-001").await;
    let (book_id, _) = create_test_book(&state.db, 1).await;
    let app = test_app(&state);

    let response = app
        .clone()
        .oneshot(build_request(
            "POST",
            "/api/loans",
            Some(&student_token),
            Some(&json!({ "book_id": book_id })),
        ))
        .await
        .unwrap();
    let loan_id = body_json(response).await["loans"][0]["id"].as_i64().unwrap();

    // A booking was never handed over, so it cannot come back
    let response = app
        .clone()
        .oneshot(build_request(
            "PUT",
            &format!("/api/loans/{}", loan_id),
            Some(&admin_token),
            Some(&json!({ "status": "returned" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["message"].as_str().unwrap().contains("cannot move"));

    // The loan and its copy are untouched by the failed attempt
    let stored = loan::Entity::find_by_id(loan_id as i32)
        .one(&state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, LoanStatus::Booking);
    let held = copy::Entity::find_by_id(stored.copy_id)
        .one(&state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(held.status, CopyStatus::Booked);
}
