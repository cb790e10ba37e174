use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// The login and sign-up forms plus the health check. `/login` stays reachable for a
/// signed-in visitor; it is a plain pass-through, not a redirect.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness check for the load balancer.
        .route("/health", get(|| async { "ok" }))
        // GET|POST /login
        .route("/login", get(handlers::login_page).post(handlers::login))
        // GET|POST /signup
        // New accounts get their Profile minted here with the requested role.
        .route("/signup", get(handlers::signup_page).post(handlers::signup))
        // POST /forgot-password
        // Delegates the reset email to the auth provider.
        .route("/forgot-password", post(handlers::forgot_password))
}
