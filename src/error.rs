use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// AccessError
///
/// The gate's denial taxonomy. `Unresolved` is not a denial, it is the
/// "session still loading" outcome; the gates map it to a placeholder instead
/// of a redirect.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("Session not yet resolved")]
    Unresolved,

    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Insufficient role")]
    Unauthorized,

    #[error("Role resolution failed: {0}")]
    ResolutionFailure(String),
}

/// StoreError
///
/// Outcomes of the Profile/Book store. `NotFound` and `Conflict` are distinguishable
/// from backend failures so the role resolver can branch on them.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found")]
    NotFound,

    #[error("Record already exists")]
    Conflict,

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict,
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// ProviderError
///
/// Failures reported by the external auth provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Invalid login credentials")]
    InvalidCredentials,

    #[error("Email already registered")]
    DuplicateEmail,

    #[error("Password is too weak")]
    WeakPassword,

    #[error("Auth provider unreachable: {0}")]
    Network(String),

    #[error("Unexpected auth provider response: {0}")]
    Unexpected(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Network(err.to_string())
    }
}

/// CatalogError
///
/// Failures of the external book-metadata lookups.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Book not found in catalog")]
    NotFound,

    #[error("Book catalog unreachable: {0}")]
    Network(String),

    #[error("Unexpected book catalog response: {0}")]
    Unexpected(String),
}

impl From<reqwest::Error> for CatalogError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CatalogError::Unexpected(err.to_string())
        } else {
            CatalogError::Network(err.to_string())
        }
    }
}

/// AppError
///
/// Handler-level error. Converts into a JSON body of the shape
/// `{ "success": false, "reason": "..." }`; internal details are logged, not returned.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Provider(ProviderError::InvalidCredentials) => {
                (StatusCode::UNAUTHORIZED, "Invalid login credentials")
            }
            AppError::Provider(ProviderError::DuplicateEmail) => {
                (StatusCode::CONFLICT, "Email already registered")
            }
            AppError::Provider(ProviderError::WeakPassword) => {
                (StatusCode::BAD_REQUEST, "Password is too weak")
            }
            AppError::Provider(err) => {
                tracing::error!("Auth provider error: {}", err);
                (StatusCode::BAD_GATEWAY, "Authentication service unavailable")
            }
            AppError::Store(StoreError::NotFound) => (StatusCode::NOT_FOUND, "Not found"),
            AppError::Store(StoreError::Conflict) => (StatusCode::CONFLICT, "Already exists"),
            AppError::Store(StoreError::Backend(msg)) => {
                tracing::error!("Store error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            AppError::Catalog(CatalogError::NotFound) => (StatusCode::NOT_FOUND, "Not found"),
            AppError::Catalog(err) => {
                tracing::error!("Book catalog error: {}", err);
                (StatusCode::BAD_GATEWAY, "Book catalog unavailable")
            }
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.as_str()),
        };

        let body = json!({ "success": false, "reason": message });
        (status, Json(body)).into_response()
    }
}
