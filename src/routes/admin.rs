use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, get, post},
};

/// Admin Router Module
///
/// Catalogue management. `create_router` wraps this router in the admin gate, which
/// resolves the caller's role from their Profile on every request. Signed-in
/// non-admins are redirected to `/explore`, anonymous visitors to `/login`.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /admin
        // Dashboard: book count and the full catalogue.
        .route("/admin", get(handlers::admin_dashboard))
        // POST /admin/books
        .route("/admin/books", post(handlers::create_book))
        // DELETE /admin/books/{id}
        .route("/admin/books/{id}", delete(handlers::delete_book))
}
