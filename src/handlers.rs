use crate::{
    AppState,
    auth::AuthUser,
    error::{AppError, StoreError},
    models::{
        AdminDashboard, AuthResponse, Book, BookFilter, CatalogQuery, CreateBookRequest,
        ExternalBook, ExternalBookDetail, ForgotPasswordRequest, Identity, LandingView,
        LoginRequest, PageView, SignUpRequest, UserProfile,
    },
    openlibrary::OpenLibraryClient,
    redirect::{REDIRECTS, paths},
    repository::RepositoryState,
    role::RoleResolver,
    session::SessionHandle,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
};
use serde_json::{Map, Value};
use std::time::Duration;
use uuid::Uuid;

/// How long a login waits for the session store to pick up the new identity before
/// resolving its role anyway.
const SESSION_SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

// --- Public Handlers ---

/// login_page
///
/// [Public Route] The login form shell. A visitor who is already signed in still gets
/// the page; nothing redirects them away.
#[utoipa::path(
    get,
    path = "/login",
    responses((status = 200, description = "Login page", body = PageView))
)]
pub async fn login_page(State(session): State<SessionHandle>) -> Json<PageView> {
    Json(PageView {
        page: "login".to_string(),
        signed_in_as: session.current_identity().map(|i| i.email),
    })
}

/// signup_page
///
/// [Public Route] The sign-up form shell.
#[utoipa::path(
    get,
    path = "/signup",
    responses((status = 200, description = "Sign-up page", body = PageView))
)]
pub async fn signup_page(State(session): State<SessionHandle>) -> Json<PageView> {
    Json(PageView {
        page: "signup".to_string(),
        signed_in_as: session.current_identity().map(|i| i.email),
    })
}

/// login
///
/// [Public Route] Signs in with email and password, then resolves the identity's role
/// to pick the landing page: admins go to the dashboard, everyone else to the home
/// view. A failed role lookup still lands the user on the home view.
#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let identity = state
        .provider
        .sign_in(payload.email.trim(), &payload.password)
        .await?;

    if !state
        .session
        .settled_on(identity.id, SESSION_SETTLE_TIMEOUT)
        .await
    {
        tracing::warn!(user_id = %identity.id, "Session store did not observe sign-in in time");
    }

    let role = state.resolver.resolve_role(&identity).await;
    let redirect_to = REDIRECTS.after_login(&role);

    Ok(Json(AuthResponse {
        success: true,
        redirect_to: redirect_to.to_string(),
        message: None,
    }))
}

/// signup
///
/// [Public Route] Registers an account with the auth provider and mints its Profile
/// with the requested role. Admin requests need the configured admin code. The new
/// account is not signed in; the client is sent to the login page.
#[utoipa::path(
    post,
    path = "/signup",
    request_body = SignUpRequest,
    responses(
        (status = 201, description = "Registered", body = AuthResponse),
        (status = 400, description = "Invalid form"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignUpRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let role = payload
        .requested_role(state.config.admin_signup_code.as_deref())
        .map_err(AppError::Validation)?;

    let mut attributes = Map::new();
    attributes.insert("role".to_string(), Value::String(role.as_str().to_string()));

    let identity = state
        .provider
        .sign_up(payload.email.trim(), &payload.password, attributes)
        .await?;

    match state.repo.insert_profile(identity.id, role).await {
        Ok(_) => tracing::info!(user_id = %identity.id, %role, "Profile created at sign-up"),
        // A profile can only pre-exist if a role lookup beat us to it; it stays as is.
        Err(StoreError::Conflict) => {
            tracing::warn!(user_id = %identity.id, "Profile already existed at sign-up")
        }
        Err(e) => return Err(e.into()),
    }

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            success: true,
            redirect_to: REDIRECTS.after_sign_up.to_string(),
            message: Some("Check your email for the confirmation link!".to_string()),
        }),
    ))
}

/// forgot_password
///
/// [Public Route] Asks the auth provider to email a password-reset link.
#[utoipa::path(
    post,
    path = "/forgot-password",
    request_body = ForgotPasswordRequest,
    responses((status = 200, description = "Reset email requested", body = AuthResponse))
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let email = payload.email.trim();
    if email.is_empty() {
        return Err(AppError::Validation("Email is required".to_string()));
    }
    state.provider.request_password_reset(email).await?;

    Ok(Json(AuthResponse {
        success: true,
        redirect_to: paths::LOGIN.to_string(),
        message: Some("Password reset email sent".to_string()),
    }))
}

/// unknown_route
///
/// Fallback for any path no router claims.
pub async fn unknown_route() -> Redirect {
    Redirect::to(REDIRECTS.unknown_route)
}

// --- Authenticated Handlers ---

/// logout
///
/// [Authenticated Route] Ends the session. The session store sees the provider's
/// sign-out event and every gate denies from then on.
#[utoipa::path(
    post,
    path = "/logout",
    responses((status = 200, description = "Signed out", body = AuthResponse))
)]
pub async fn logout(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<AuthResponse>, AppError> {
    state.provider.sign_out().await?;
    tracing::info!(user_id = %id, "Logged out");

    Ok(Json(AuthResponse {
        success: true,
        redirect_to: REDIRECTS.unauthenticated.to_string(),
        message: None,
    }))
}

/// landing
///
/// [Authenticated Route] The home view behind the 3D book scene.
#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Landing view", body = LandingView))
)]
pub async fn landing(AuthUser { email, .. }: AuthUser) -> Json<LandingView> {
    Json(LandingView {
        email,
        explore_route: paths::EXPLORE.to_string(),
    })
}

/// explore
///
/// [Authenticated Route] Lists the catalogue, newest first, optionally filtered by a
/// case-insensitive search on title or author.
#[utoipa::path(
    get,
    path = "/explore",
    params(BookFilter),
    responses((status = 200, description = "Books", body = [Book]))
)]
pub async fn explore(
    _user: AuthUser,
    State(state): State<AppState>,
    Query(filter): Query<BookFilter>,
) -> Result<Json<Vec<Book>>, AppError> {
    Ok(Json(state.repo.list_books(filter.search).await?))
}

/// get_book
///
/// [Authenticated Route] One catalogue entry, the page that links to its PDF.
#[utoipa::path(
    get,
    path = "/books/{id}",
    params(("id" = Uuid, Path, description = "Book ID")),
    responses(
        (status = 200, description = "Book", body = Book),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_book(
    _user: AuthUser,
    State(repo): State<RepositoryState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Book>, AppError> {
    Ok(Json(repo.get_book(id).await?))
}

/// search_catalog
///
/// [Authenticated Route] Searches Open Library by title, author or subject.
#[utoipa::path(
    get,
    path = "/explore/search",
    params(CatalogQuery),
    responses(
        (status = 200, description = "Search hits", body = [ExternalBook]),
        (status = 400, description = "Empty query"),
        (status = 502, description = "Catalog unavailable")
    )
)]
pub async fn search_catalog(
    _user: AuthUser,
    State(catalog): State<OpenLibraryClient>,
    Query(query): Query<CatalogQuery>,
) -> Result<Json<Vec<ExternalBook>>, AppError> {
    let q = query.q.as_deref().map(str::trim).unwrap_or_default();
    if q.is_empty() {
        return Err(AppError::Validation("Search query is required".to_string()));
    }
    Ok(Json(catalog.search(q).await?))
}

/// get_external_book
///
/// [Authenticated Route] Detail view of an Open Library work.
#[utoipa::path(
    get,
    path = "/books/external/{id}",
    params(("id" = String, Path, description = "Open Library work id")),
    responses(
        (status = 200, description = "Work", body = ExternalBookDetail),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_external_book(
    _user: AuthUser,
    State(catalog): State<OpenLibraryClient>,
    Path(id): Path<String>,
) -> Result<Json<ExternalBookDetail>, AppError> {
    Ok(Json(catalog.work(&id).await?))
}

/// get_me
///
/// [Authenticated Route] The signed-in reader's profile. `role` comes from the Profile
/// store, never from the token's metadata; it is `None` if the lookup fails.
#[utoipa::path(
    get,
    path = "/me",
    responses((status = 200, description = "Profile", body = UserProfile))
)]
pub async fn get_me(
    AuthUser { id, email }: AuthUser,
    State(resolver): State<RoleResolver>,
) -> Json<UserProfile> {
    let role = resolver
        .resolve_role(&Identity::new(id, email.clone()))
        .await
        .ok();
    Json(UserProfile { id, email, role })
}

// --- Admin Handlers ---

/// admin_dashboard
///
/// [Admin Route] Catalogue overview for administrators.
#[utoipa::path(
    get,
    path = "/admin",
    responses((status = 200, description = "Dashboard", body = AdminDashboard))
)]
pub async fn admin_dashboard(
    _user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<AdminDashboard>, AppError> {
    let total_books = state.repo.count_books().await?;
    let books = state.repo.list_books(None).await?;
    Ok(Json(AdminDashboard { total_books, books }))
}

/// create_book
///
/// [Admin Route] Adds a catalogue entry. Files are uploaded to storage by the client
/// beforehand; only their URLs are recorded here.
#[utoipa::path(
    post,
    path = "/admin/books",
    request_body = CreateBookRequest,
    responses(
        (status = 201, description = "Created", body = Book),
        (status = 400, description = "Invalid book")
    )
)]
pub async fn create_book(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateBookRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate().map_err(AppError::Validation)?;
    let book = state.repo.create_book(payload).await?;
    tracing::info!(user_id = %id, book_id = %book.id, "Book added");
    Ok((StatusCode::CREATED, Json(book)))
}

/// delete_book
///
/// [Admin Route] Removes a catalogue entry.
#[utoipa::path(
    delete,
    path = "/admin/books/{id}",
    params(("id" = Uuid, Path, description = "Book ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_book(
    AuthUser { id: user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.repo.delete_book(id).await?;
    tracing::info!(user_id = %user_id, book_id = %id, "Book removed");
    Ok(StatusCode::NO_CONTENT)
}
