use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;
use std::{fmt, str::FromStr};
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

// --- Access Control Schemas ---

/// Role
///
/// The RBAC value carried by a Profile. Governs access to the admin routes only;
/// every other protected view just needs an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Identity
///
/// The authenticated principal as issued by the auth provider. The `metadata` map
/// mirrors the provider's `user_metadata` and may hold a `role` claim; that claim is
/// only a cache of the Profile's role and is never used for authorization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Identity {
    pub fn new(id: Uuid, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            metadata: Map::new(),
        }
    }

    /// The cached `role` claim, if one is present and well-formed.
    pub fn role_claim(&self) -> Option<Role> {
        self.metadata
            .get("role")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    pub fn set_role_claim(&mut self, role: Role) {
        self.metadata
            .insert("role".to_string(), Value::String(role.as_str().to_string()));
    }
}

/// Profile
///
/// The durable per-identity record in the `profiles` table. One row per identity id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Profile {
    pub id: Uuid,
    pub role: Role,
}

/// ProfileRow
///
/// Raw database row. `role` is stored as text and validated on conversion.
#[derive(Debug, Clone, FromRow)]
pub struct ProfileRow {
    pub id: Uuid,
    pub role: String,
}

impl TryFrom<ProfileRow> for Profile {
    type Error = String;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        Ok(Profile {
            id: row.id,
            role: row.role.parse()?,
        })
    }
}

/// SessionState
///
/// What the Session Store currently knows. `Pending` only exists between startup and
/// the provider's first answer.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    #[default]
    Pending,
    Absent,
    Present(Identity),
}

impl SessionState {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            SessionState::Present(identity) => Some(identity),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, SessionState::Pending)
    }
}

impl From<Option<Identity>> for SessionState {
    fn from(identity: Option<Identity>) -> Self {
        match identity {
            Some(identity) => SessionState::Present(identity),
            None => SessionState::Absent,
        }
    }
}

// --- Catalogue Schemas ---

/// Book
///
/// A row of the `books` table, as listed by the explore view and the admin dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Book {
    pub id: Uuid,
    pub title: String,
    pub author: String,
    pub description: Option<String>,
    pub cover_url: Option<String>,
    pub pdf_url: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// ExternalBook
///
/// One Open Library search hit as shown on the explore page.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[ts(export)]
pub struct ExternalBook {
    /// Open Library work id, e.g. `OL45804W`.
    pub id: String,
    pub title: String,
    pub author: String,
    pub publish_year: Option<i32>,
    pub cover_url: Option<String>,
    pub first_sentence: Option<String>,
    /// At most three.
    pub subjects: Vec<String>,
}

/// ExternalBookDetail
///
/// An Open Library work merged with its first edition and first author.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[ts(export)]
pub struct ExternalBookDetail {
    pub id: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub author: String,
    pub author_bio: Option<String>,
    pub description: String,
    pub cover_url: Option<String>,
    pub publish_date: Option<String>,
    pub publisher: Option<String>,
    pub isbn: Option<String>,
    pub subjects: Vec<String>,
    /// Internet Archive identifier of a readable scan, if one exists.
    pub read_link: Option<String>,
}

/// --- Request Payloads (Input Schemas) ---

/// CreateBookRequest
///
/// Input payload for adding a catalogue entry (POST /admin/books). Cover and PDF
/// URLs point at files already uploaded to storage.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateBookRequest {
    pub title: String,
    pub author: String,
    pub description: Option<String>,
    pub cover_url: Option<String>,
    pub pdf_url: Option<String>,
}

impl CreateBookRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("Title is required".to_string());
        }
        if self.author.trim().is_empty() {
            return Err("Author is required".to_string());
        }
        Ok(())
    }
}

/// LoginRequest
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// SignUpRequest
///
/// Input payload for POST /signup. The password is passed through to the auth
/// provider and never persisted or logged here.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    #[serde(default)]
    pub want_admin: bool,
    #[serde(default)]
    pub admin_code: Option<String>,
}

/// Minimum password length accepted by the sign-up form.
pub const MIN_PASSWORD_LEN: usize = 6;

impl SignUpRequest {
    /// requested_role
    ///
    /// Validates the form and returns the role the new account asks for. An admin
    /// request must present the configured admin code; with no code configured,
    /// admin sign-up is closed.
    pub fn requested_role(&self, admin_code: Option<&str>) -> Result<Role, String> {
        if self.email.trim().is_empty() {
            return Err("Email is required".to_string());
        }
        if self.password != self.confirm_password {
            return Err("Passwords don't match".to_string());
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            ));
        }
        if !self.want_admin {
            return Ok(Role::User);
        }
        match (admin_code, self.admin_code.as_deref()) {
            (Some(expected), Some(given)) if expected == given => Ok(Role::Admin),
            _ => Err("Invalid admin code".to_string()),
        }
    }
}

/// ForgotPasswordRequest
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

/// BookFilter
///
/// Query parameters for the explore view.
#[derive(Debug, Clone, Deserialize, Default, utoipa::IntoParams)]
pub struct BookFilter {
    /// Case-insensitive match on title or author.
    pub search: Option<String>,
}

/// CatalogQuery
///
/// Query parameters for the Open Library search.
#[derive(Debug, Clone, Deserialize, Default, utoipa::IntoParams)]
pub struct CatalogQuery {
    /// Free text: title, author or subject.
    pub q: Option<String>,
}

// --- View Models (Output Schemas) ---

/// AuthResponse
///
/// Returned by the login and sign-up forms. `redirect_to` is the destination chosen
/// by the redirect policy.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AuthResponse {
    pub success: bool,
    pub redirect_to: String,
    pub message: Option<String>,
}

/// UserProfile
///
/// Output schema for GET /me.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    /// Role from the Profile store; `None` when it could not be resolved.
    pub role: Option<Role>,
}

/// LandingView
///
/// The authenticated landing page ("/"). The 3D book scene is rendered client-side;
/// the server only supplies who is reading and where "explore" lives.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LandingView {
    pub email: String,
    pub explore_route: String,
}

/// AdminDashboard
///
/// Output schema for GET /admin.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct AdminDashboard {
    pub total_books: i64,
    pub books: Vec<Book>,
}

/// PageView
///
/// Neutral shell returned by the public form pages (GET /login, GET /signup).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct PageView {
    pub page: String,
    /// Present when someone is already signed in; the page still renders.
    pub signed_in_as: Option<String>,
}
