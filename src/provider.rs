use crate::{config::AppConfig, error::ProviderError, models::Identity};
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::{sync::broadcast, task::JoinHandle};
use uuid::Uuid;

/// Capacity of the auth-state broadcast channel. Slow subscribers that fall further
/// behind than this resynchronise from `current_identity`.
const EVENT_CHANNEL_CAPACITY: usize = 32;

const REFRESH_RETRY_DELAY: Duration = Duration::from_secs(5);

/// AuthEvent
///
/// Auth-state transitions emitted by a provider, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    InitialSession(Option<Identity>),
    SignedIn(Identity),
    SignedOut,
    TokenRefreshed(Identity),
}

impl AuthEvent {
    /// The identity this event leaves the session with.
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            AuthEvent::InitialSession(identity) => identity.as_ref(),
            AuthEvent::SignedIn(identity) | AuthEvent::TokenRefreshed(identity) => Some(identity),
            AuthEvent::SignedOut => None,
        }
    }
}

/// AuthProvider
///
/// Boundary contract for the external authentication service. The Session Store
/// subscribes to it once; handlers call the form operations.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, ProviderError>;

    /// Registers a new account. `attributes` become the identity's metadata.
    /// Does not sign the new account in.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        attributes: Map<String, Value>,
    ) -> Result<Identity, ProviderError>;

    async fn sign_out(&self) -> Result<(), ProviderError>;

    async fn current_identity(&self) -> Result<Option<Identity>, ProviderError>;

    async fn request_password_reset(&self, email: &str) -> Result<(), ProviderError>;

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

/// AuthProviderState
pub type AuthProviderState = Arc<dyn AuthProvider>;

// --- Supabase GoTrue implementation ---

/// AccessClaims
///
/// Payload of a Supabase access token. Identities are read from the verified token
/// rather than trusted from the response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: usize,
    #[serde(default)]
    pub aud: Option<String>,
    #[serde(default)]
    pub user_metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct GoTrueUser {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session { user: GoTrueUser },
    User(GoTrueUser),
}

#[derive(Debug, Default, Deserialize)]
struct GoTrueError {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl GoTrueError {
    fn message(&self) -> String {
        self.msg
            .clone()
            .or_else(|| self.error_description.clone())
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| "unknown error".to_string())
    }

    fn code(&self) -> &str {
        self.error_code
            .as_deref()
            .or(self.error.as_deref())
            .unwrap_or("")
    }
}

#[derive(Debug)]
enum GrantError {
    /// GoTrue answered with a non-2xx status.
    Rejected(StatusCode, GoTrueError),
    Failed(ProviderError),
}

struct TokenSet {
    access_token: String,
    refresh_token: String,
    expires_at: u64,
    identity: Identity,
    /// Which sign-in this token set belongs to. Kept across refreshes, new per sign-in.
    generation: u64,
}

struct Inner {
    http: reqwest::Client,
    auth_url: String,
    anon_key: String,
    decoding_key: DecodingKey,
    refresh_margin: Duration,
    session: Mutex<Option<TokenSet>>,
    generations: AtomicU64,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<AuthEvent>,
}

/// SupabaseAuthProvider
///
/// `AuthProvider` speaking the Supabase GoTrue REST API. Holds the single client-side
/// session (tokens never leave this process) and keeps it fresh: shortly before the
/// access token expires it runs the refresh-token grant, emitting `TokenRefreshed`
/// on success and `SignedOut` on failure.
#[derive(Clone)]
pub struct SupabaseAuthProvider {
    inner: Arc<Inner>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl SupabaseAuthProvider {
    pub fn new(config: &AppConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                http: reqwest::Client::builder()
                    .timeout(Duration::from_millis(config.auth_timeout_ms))
                    .build()
                    .unwrap_or_default(),
                auth_url: config.auth_url(),
                anon_key: config.supabase_anon_key.clone(),
                decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
                refresh_margin: Duration::from_secs(config.refresh_margin_secs),
                session: Mutex::new(None),
                generations: AtomicU64::new(0),
                refresh_task: Mutex::new(None),
                events,
            }),
        }
    }

    /// Decodes and verifies a GoTrue access token into an `Identity`.
    pub fn identity_from_token(&self, token: &str) -> Result<Identity, ProviderError> {
        self.inner.identity_from_token(token)
    }
}

impl Inner {
    fn identity_from_token(&self, token: &str) -> Result<Identity, ProviderError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_audience(&["authenticated"]);

        let data = decode::<AccessClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| ProviderError::Unexpected(format!("access token rejected: {}", e)))?;

        Ok(Identity {
            id: data.claims.sub,
            email: data.claims.email.unwrap_or_default(),
            metadata: data.claims.user_metadata.unwrap_or_default(),
        })
    }

    async fn error_body(response: reqwest::Response) -> GoTrueError {
        response.json::<GoTrueError>().await.unwrap_or_default()
    }

    async fn token_grant(&self, grant_type: &str, body: Value) -> Result<TokenSet, GrantError> {
        let response = self
            .http
            .post(format!("{}/token?grant_type={}", self.auth_url, grant_type))
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GrantError::Failed(e.into()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GrantError::Rejected(status, Self::error_body(response).await));
        }

        let tokens = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| GrantError::Failed(ProviderError::Unexpected(e.to_string())))?;
        let identity = self
            .identity_from_token(&tokens.access_token)
            .map_err(GrantError::Failed)?;

        Ok(TokenSet {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: now_secs() + tokens.expires_in,
            identity,
            generation: 0,
        })
    }

    /// Makes `tokens` the current session under a fresh generation and announces it.
    fn install_session(self: &Arc<Self>, mut tokens: TokenSet) -> Identity {
        let identity = tokens.identity.clone();
        let expires_at = tokens.expires_at;
        {
            let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
            tokens.generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
            *session = Some(tokens);
            // Emitted under the lock so events leave in the same order sessions change.
            let _ = self.events.send(AuthEvent::SignedIn(identity.clone()));
        }
        self.schedule_refresh(expires_at);
        identity
    }

    /// Drops the current session, if any, and announces the sign-out.
    fn clear_session(&self) -> Option<TokenSet> {
        if let Some(task) = self
            .refresh_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
        let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        let previous = session.take();
        if previous.is_some() {
            let _ = self.events.send(AuthEvent::SignedOut);
        }
        previous
    }

    fn schedule_refresh(self: &Arc<Self>, expires_at: u64) {
        let refresh_at = expires_at.saturating_sub(self.refresh_margin.as_secs());
        self.spawn_refresh(Duration::from_secs(refresh_at.saturating_sub(now_secs())));
    }

    fn schedule_retry(self: &Arc<Self>) {
        self.spawn_refresh(REFRESH_RETRY_DELAY);
    }

    fn spawn_refresh(self: &Arc<Self>, delay: Duration) {
        let weak: Weak<Inner> = Arc::downgrade(self);

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.refresh().await;
            }
        });

        if let Some(previous) = self
            .refresh_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(task)
        {
            previous.abort();
        }
    }

    /// refresh
    ///
    /// Runs the refresh-token grant for the session current at call time. The grant's
    /// outcome is applied only if that same session (by generation) is still current
    /// when it returns; a sign-out or a sign-in as someone else in the meantime wins.
    async fn refresh(self: Arc<Self>) {
        // Detach this task's own handle so rescheduling below does not abort it.
        drop(
            self.refresh_task
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take(),
        );

        let (refresh_token, generation) = {
            let session = self.session.lock().unwrap_or_else(|e| e.into_inner());
            match session.as_ref() {
                Some(tokens) => (tokens.refresh_token.clone(), tokens.generation),
                None => return,
            }
        };

        let outcome = self
            .token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await;

        let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        if session.as_ref().map(|tokens| tokens.generation) != Some(generation) {
            tracing::debug!(generation, "Session changed during token refresh, discarding result");
            return;
        }

        match outcome {
            Ok(mut tokens) => {
                tokens.generation = generation;
                let identity = tokens.identity.clone();
                let expires_at = tokens.expires_at;
                *session = Some(tokens);
                let _ = self.events.send(AuthEvent::TokenRefreshed(identity.clone()));
                drop(session);
                tracing::debug!(user_id = %identity.id, "Access token refreshed");
                self.schedule_refresh(expires_at);
            }
            Err(GrantError::Failed(ProviderError::Network(e)))
                if session
                    .as_ref()
                    .is_some_and(|tokens| tokens.expires_at > now_secs()) =>
            {
                drop(session);
                tracing::warn!("Token refresh unreachable, retrying: {}", e);
                self.schedule_retry();
            }
            Err(e) => {
                tracing::warn!("Token refresh failed, signing out: {:?}", e);
                session.take();
                let _ = self.events.send(AuthEvent::SignedOut);
            }
        }
    }
}

#[async_trait]
impl AuthProvider for SupabaseAuthProvider {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, ProviderError> {
        let tokens = match self
            .inner
            .token_grant("password", json!({ "email": email, "password": password }))
            .await
        {
            Ok(tokens) => tokens,
            Err(GrantError::Rejected(status, _))
                if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED =>
            {
                return Err(ProviderError::InvalidCredentials);
            }
            Err(GrantError::Rejected(status, body)) => {
                return Err(ProviderError::Unexpected(format!("{}: {}", status, body.message())));
            }
            Err(GrantError::Failed(e)) => return Err(e),
        };

        let identity = self.inner.install_session(tokens);
        tracing::info!(user_id = %identity.id, "Signed in");
        Ok(identity)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        attributes: Map<String, Value>,
    ) -> Result<Identity, ProviderError> {
        let response = self
            .inner
            .http
            .post(format!("{}/signup", self.inner.auth_url))
            .header("apikey", &self.inner.anon_key)
            .json(&json!({ "email": email, "password": password, "data": attributes }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = Inner::error_body(response).await;
            let message = body.message().to_lowercase();
            return Err(match body.code() {
                "user_already_exists" | "email_exists" => ProviderError::DuplicateEmail,
                "weak_password" => ProviderError::WeakPassword,
                _ if message.contains("already registered") => ProviderError::DuplicateEmail,
                _ if message.contains("password") => ProviderError::WeakPassword,
                _ => ProviderError::Unexpected(format!("{}: {}", status, body.message())),
            });
        }

        let user = match response
            .json::<SignUpResponse>()
            .await
            .map_err(|e| ProviderError::Unexpected(e.to_string()))?
        {
            SignUpResponse::Session { user } | SignUpResponse::User(user) => user,
        };

        tracing::info!(user_id = %user.id, "Account registered");
        Ok(Identity {
            id: user.id,
            email: user.email.unwrap_or_else(|| email.to_string()),
            metadata: user.user_metadata,
        })
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        let Some(tokens) = self.inner.clear_session() else {
            return Ok(());
        };

        // The local session is gone either way; a failed remote revoke only leaves a
        // refresh token that nobody holds.
        let result = self
            .inner
            .http
            .post(format!("{}/logout", self.inner.auth_url))
            .header("apikey", &self.inner.anon_key)
            .bearer_auth(&tokens.access_token)
            .send()
            .await;
        if let Err(e) = result {
            tracing::warn!("Remote sign-out failed: {}", e);
        }

        tracing::info!(user_id = %tokens.identity.id, "Signed out");
        Ok(())
    }

    async fn current_identity(&self) -> Result<Option<Identity>, ProviderError> {
        let session = self.inner.session.lock().unwrap_or_else(|e| e.into_inner());
        Ok(session
            .as_ref()
            .filter(|tokens| tokens.expires_at > now_secs())
            .map(|tokens| tokens.identity.clone()))
    }

    async fn request_password_reset(&self, email: &str) -> Result<(), ProviderError> {
        let response = self
            .inner
            .http
            .post(format!("{}/recover", self.inner.auth_url))
            .header("apikey", &self.inner.anon_key)
            .json(&json!({ "email": email }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = Inner::error_body(response).await;
            return Err(ProviderError::Unexpected(format!("{}: {}", status, body.message())));
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }
}

// --- Mock implementation ---

struct MockAccount {
    password: String,
    identity: Identity,
}

/// MockAuthProvider
///
/// In-memory `AuthProvider` used by the test-suite. Accounts live in a map, events go
/// through the same broadcast channel type as the real provider, and tests can push
/// raw events (token refresh, expiry) with `emit`.
pub struct MockAuthProvider {
    accounts: Mutex<HashMap<String, MockAccount>>,
    current: Mutex<Option<Identity>>,
    events: broadcast::Sender<AuthEvent>,
    /// When true, `current_identity` fails, simulating an unreachable provider at startup.
    pub fail_current: bool,
}

impl Default for MockAuthProvider {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            accounts: Mutex::new(HashMap::new()),
            current: Mutex::new(None),
            events,
            fail_current: false,
        }
    }
}

impl MockAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            fail_current: true,
            ..Self::default()
        }
    }

    /// Adds an account and returns its identity.
    pub fn register(&self, email: &str, password: &str) -> Identity {
        let identity = Identity::new(Uuid::new_v4(), email);
        self.accounts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                email.to_string(),
                MockAccount {
                    password: password.to_string(),
                    identity: identity.clone(),
                },
            );
        identity
    }

    /// Sets the current identity without emitting an event (state before startup).
    pub fn preset_session(&self, identity: Option<Identity>) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = identity;
    }

    /// Applies and broadcasts a raw auth event.
    pub fn emit(&self, event: AuthEvent) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = event.identity().cloned();
        let _ = self.events.send(event);
    }

    /// Number of live subscriptions to the auth-state stream.
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

#[async_trait]
impl AuthProvider for MockAuthProvider {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, ProviderError> {
        let identity = {
            let accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
            match accounts.get(email) {
                Some(account) if account.password == password => account.identity.clone(),
                _ => return Err(ProviderError::InvalidCredentials),
            }
        };
        self.emit(AuthEvent::SignedIn(identity.clone()));
        Ok(identity)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        attributes: Map<String, Value>,
    ) -> Result<Identity, ProviderError> {
        if password.len() < 6 {
            return Err(ProviderError::WeakPassword);
        }
        let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        if accounts.contains_key(email) {
            return Err(ProviderError::DuplicateEmail);
        }
        let identity = Identity {
            id: Uuid::new_v4(),
            email: email.to_string(),
            metadata: attributes,
        };
        accounts.insert(
            email.to_string(),
            MockAccount {
                password: password.to_string(),
                identity: identity.clone(),
            },
        );
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        let had_session = self
            .current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some();
        if had_session {
            self.emit(AuthEvent::SignedOut);
        }
        Ok(())
    }

    async fn current_identity(&self) -> Result<Option<Identity>, ProviderError> {
        if self.fail_current {
            return Err(ProviderError::Network("mock provider unreachable".to_string()));
        }
        Ok(self.current.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn request_password_reset(&self, email: &str) -> Result<(), ProviderError> {
        tracing::debug!("Mock password reset requested for {}", email);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
