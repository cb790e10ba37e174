use axum::{
    body::to_bytes,
    http::StatusCode,
    response::IntoResponse,
};
use library_portal::error::{AppError, CatalogError, ProviderError, StoreError};
use serde_json::Value;

async fn render(err: AppError) -> (StatusCode, Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_provider_errors_map_to_statuses() {
    let cases = [
        (ProviderError::InvalidCredentials, StatusCode::UNAUTHORIZED, "Invalid login credentials"),
        (ProviderError::DuplicateEmail, StatusCode::CONFLICT, "Email already registered"),
        (ProviderError::WeakPassword, StatusCode::BAD_REQUEST, "Password is too weak"),
        (
            ProviderError::Network("connection refused".to_string()),
            StatusCode::BAD_GATEWAY,
            "Authentication service unavailable",
        ),
    ];

    for (err, status, reason) in cases {
        let (got, body) = render(err.into()).await;
        assert_eq!(got, status, "{}", reason);
        assert_eq!(body["success"], false);
        assert_eq!(body["reason"], reason);
    }
}

#[tokio::test]
async fn test_store_errors_hide_backend_detail() {
    let (status, _) = render(StoreError::NotFound.into()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = render(StoreError::Conflict.into()).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = render(StoreError::Backend("password=hunter2".to_string()).into()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["reason"], "Internal server error");
}

#[tokio::test]
async fn test_catalog_and_validation_errors() {
    let (status, _) = render(CatalogError::NotFound.into()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = render(CatalogError::Network("timed out".to_string()).into()).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let (status, body) = render(AppError::Validation("Title is required".to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["reason"], "Title is required");
}
