pub mod auth;
pub mod books;
pub mod categories;
pub mod copies;
pub mod health;
pub mod loans;
pub mod notifications;
pub mod reports;
pub mod students;

use axum::{
    Json, Router,
    http::HeaderValue,
    routing::{delete, get, post, put},
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::api_docs::ApiDoc;
use crate::state::AppState;

pub fn api_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Auth
        .route("/auth/login", post(auth::login))
        .route("/auth/register", post(auth::register))
        .route("/auth/register-admin", post(auth::register_admin))
        // Books
        .route("/books", get(books::list_books).post(books::create_book))
        .route(
            "/books/:id",
            get(books::get_book)
                .put(books::update_book)
                .delete(books::delete_book),
        )
        .route("/books/:id/copies", get(copies::list_book_copies))
        .route("/books/:id/recommendations", get(books::recommendations))
        // Categories
        .route(
            "/categories",
            get(categories::list_categories).post(categories::create_category),
        )
        .route(
            "/categories/:id",
            put(categories::update_category).delete(categories::delete_category),
        )
        // Copies
        .route("/copies", get(copies::list_copies).post(copies::create_copy))
        .route(
            "/copies/:id",
            get(copies::get_copy)
                .put(copies::update_copy)
                .delete(copies::delete_copy),
        )
        // Loans
        .route("/loans", get(loans::list_loans).post(loans::create_loan))
        .route("/loans/history", get(loans::history))
        .route("/loans/chart-stats", get(loans::chart_stats))
        .route(
            "/loans/:id",
            put(loans::update_loan).delete(loans::delete_loan),
        )
        // Reports
        .route("/reports/loans", get(reports::loan_report))
        // Students
        .route(
            "/students",
            get(students::list_students).post(students::create_student),
        )
        .route("/students/me", get(students::me).put(students::update_me))
        .route(
            "/students/:id",
            get(students::get_student)
                .put(students::update_student)
                .delete(students::delete_student),
        )
        // Notifications
        .route("/notifications", get(notifications::list_own))
        .route("/notifications/read-all", put(notifications::read_all))
        .route("/notifications/:id/read", put(notifications::mark_read))
        .route("/notifications/:id", delete(notifications::delete_one))
        .route("/admin-notifications", get(notifications::admin_list_own))
        .route(
            "/admin-notifications/read-all",
            put(notifications::admin_read_all),
        )
        .route(
            "/admin-notifications/:id/read",
            put(notifications::admin_mark_read),
        )
        .route(
            "/admin-notifications/:id",
            delete(notifications::admin_delete_one),
        )
        .with_state(state)
}

/// The complete application: API under `/api`, the OpenAPI document, and
/// the request tracing / CORS layers.
pub fn app(state: AppState, allowed_origins: &[String]) -> Router {
    let cors = if allowed_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .nest("/api", api_router(state))
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
