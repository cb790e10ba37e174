use library_portal::{
    AppState,
    config::{AppConfig, Env},
    create_router,
    provider::{AuthProviderState, SupabaseAuthProvider},
    repository::{PostgresRepository, RepositoryState},
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Startup order: configuration, logging, database, auth provider, session
/// subscription, HTTP server. On shutdown the session subscription is released
/// before the process exits.
#[tokio::main]
async fn main() {
    // 1. Configuration (fail-fast in production)
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "library_portal=debug,tower_http=info".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 3. Database (profiles + books)
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.db_url)
        .await
        .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");
    let repo = Arc::new(PostgresRepository::new(pool)) as RepositoryState;

    // 4. Auth provider + session subscription
    let provider = Arc::new(SupabaseAuthProvider::new(&config)) as AuthProviderState;
    let app_state = AppState::new(repo, provider, config.clone());
    let session = app_state.session.clone();

    // 5. Router and server
    let app = create_router(app_state);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .expect("FATAL: Failed to bind the HTTP listener. Check BIND_ADDR.");

    tracing::info!("Listening on {}", config.bind_addr);
    tracing::info!("API Documentation (Swagger UI) available at /swagger-ui");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("HTTP server error: {}", e);
    }

    // 6. Teardown
    session.shutdown().await;
    tracing::info!("Shutdown complete");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
