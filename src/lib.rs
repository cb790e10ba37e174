use axum::{
    Router,
    extract::FromRef,
    http::{HeaderName, HeaderValue, Method, header},
    middleware,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Access-control core.
pub mod session;
pub mod role;
pub mod guard;
pub mod redirect;

// Collaborators and application services.
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod openlibrary;
pub mod provider;
pub mod repository;

// Routing segregated by access level (Public, Authenticated, Admin).
pub mod routes;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use openlibrary::OpenLibraryClient;
pub use provider::{AuthProviderState, MockAuthProvider, SupabaseAuthProvider};
pub use repository::{MemoryRepository, PostgresRepository, RepositoryState};
pub use role::RoleResolver;
pub use session::{SessionHandle, SessionStore};

/// ApiDoc
///
/// OpenAPI document for every route, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::login_page, handlers::login, handlers::signup_page, handlers::signup,
        handlers::forgot_password, handlers::logout, handlers::landing, handlers::explore,
        handlers::get_book, handlers::search_catalog, handlers::get_external_book,
        handlers::get_me, handlers::admin_dashboard, handlers::create_book, handlers::delete_book
    ),
    components(
        schemas(
            models::Role, models::Profile, models::Book, models::CreateBookRequest,
            models::LoginRequest, models::SignUpRequest, models::ForgotPasswordRequest,
            models::AuthResponse, models::UserProfile, models::LandingView,
            models::AdminDashboard, models::PageView, models::ExternalBook,
            models::ExternalBookDetail,
        )
    ),
    tags(
        (name = "library-portal", description = "Book library access gate and views")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single shared container for every service a request may need. Cloned per
/// request; all members are cheap handles.
#[derive(Clone)]
pub struct AppState {
    /// Profiles and the book catalogue.
    pub repo: RepositoryState,
    /// External auth provider (sign-in, sign-up, sign-out, reset).
    pub provider: AuthProviderState,
    /// Process-wide session, subscribed to the provider at startup.
    pub session: SessionHandle,
    /// Profile-backed role lookups used by the admin gate and the login flow.
    pub resolver: RoleResolver,
    /// Open Library lookups for the explore pages.
    pub catalog: OpenLibraryClient,
    pub config: AppConfig,
}

impl AppState {
    /// Wires the session store and role resolver around the given collaborators.
    /// Must be called inside a tokio runtime: it starts the session subscription.
    pub fn new(repo: RepositoryState, provider: AuthProviderState, config: AppConfig) -> Self {
        let session = SessionStore::start(provider.clone());
        let resolver = RoleResolver::new(repo.clone()).with_claim_cache(session.clone());
        let catalog = OpenLibraryClient::new(&config);
        Self {
            repo,
            provider,
            session,
            resolver,
            catalog,
            config,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for AuthProviderState {
    fn from_ref(app_state: &AppState) -> AuthProviderState {
        app_state.provider.clone()
    }
}

impl FromRef<AppState> for SessionHandle {
    fn from_ref(app_state: &AppState) -> SessionHandle {
        app_state.session.clone()
    }
}

impl FromRef<AppState> for RoleResolver {
    fn from_ref(app_state: &AppState) -> RoleResolver {
        app_state.resolver.clone()
    }
}

impl FromRef<AppState> for OpenLibraryClient {
    fn from_ref(app_state: &AppState) -> OpenLibraryClient {
        app_state.catalog.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// create_router
///
/// Assembles the route modules, attaches each access level's gate and the
/// observability layers, and registers the application state.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Public: no gate.
        .merge(public::public_routes())
        // Authenticated gate: identity required.
        .merge(
            authenticated::authenticated_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                guard::authenticated_gate,
            )),
        )
        // Admin gate: identity plus Profile role `admin`.
        .merge(
            admin::admin_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                guard::admin_gate,
            )),
        )
        // Unknown paths go to the default content route.
        .fallback(handlers::unknown_route)
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// cors_layer
///
/// Requests act on the one process-wide session, so only the configured front-end
/// origin may make them from a browser.
fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origin = match HeaderValue::from_str(&config.cors_origin) {
        Ok(origin) => AllowOrigin::exact(origin),
        Err(e) => {
            tracing::error!(origin = %config.cors_origin, "Invalid CORS_ORIGIN, cross-origin requests disabled: {}", e);
            AllowOrigin::list(Vec::<HeaderValue>::new())
        }
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
}

/// trace_span_logger
///
/// Span for each request, carrying method, uri and the `x-request-id` so every log
/// line of one request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
