use crate::api;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::health::health_check,
        api::books::list_books,
        api::books::get_book,
        api::books::recommendations,
        api::categories::list_categories,
        // Add other endpoints here as we document them
    ),
    tags(
        (name = "bibliodesk", description = "Bibliodesk school library API")
    )
)]
pub struct ApiDoc;
