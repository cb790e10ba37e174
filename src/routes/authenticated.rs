use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Authenticated Router Module
///
/// Views for any signed-in reader. `create_router` wraps this router in the
/// authenticated gate: no identity means a redirect to `/login`, an unresolved
/// session means the loading placeholder.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /
        // The landing view behind the 3D book scene.
        .route("/", get(handlers::landing))
        // GET /explore?search=...
        // Catalogue browsing.
        .route("/explore", get(handlers::explore))
        // GET /explore/search?q=...
        // Open Library search.
        .route("/explore/search", get(handlers::search_catalog))
        // GET /books/{id}
        .route("/books/{id}", get(handlers::get_book))
        // GET /books/external/{id}
        // Open Library work detail.
        .route("/books/external/{id}", get(handlers::get_external_book))
        // GET /me
        .route("/me", get(handlers::get_me))
        // POST /logout
        .route("/logout", post(handlers::logout))
}
