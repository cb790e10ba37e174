use async_trait::async_trait;
use library_portal::{
    error::{AccessError, StoreError},
    guard::{AdminGate, AuthGate, GateState, watch_admin_gate, watch_auth_gate},
    models::{Book, CreateBookRequest, Identity, Profile, Role, SessionState},
    provider::{AuthEvent, AuthProviderState, MockAuthProvider},
    redirect::{REDIRECTS, RedirectPolicy, paths},
    repository::{MemoryRepository, Repository, RepositoryState},
    role::RoleResolver,
    session::SessionStore,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::{Semaphore, watch};
use uuid::Uuid;

// --- Helpers ---

fn identity(email: &str) -> Identity {
    Identity::new(Uuid::new_v4(), email)
}

async fn wait_for_gate<F>(mut rx: watch::Receiver<GateState>, pred: F) -> GateState
where
    F: Fn(&GateState) -> bool,
{
    let state = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| pred(s)))
        .await
        .expect("gate did not reach expected state in time")
        .expect("gate watcher stopped");
    state.clone()
}

/// Profile lookups block until the test hands out a permit.
struct HeldRepo {
    inner: MemoryRepository,
    permits: Semaphore,
}

impl HeldRepo {
    fn new(inner: MemoryRepository) -> Self {
        Self {
            inner,
            permits: Semaphore::new(0),
        }
    }

    fn release_one(&self) {
        self.permits.add_permits(1);
    }
}

#[async_trait]
impl Repository for HeldRepo {
    async fn get_profile(&self, id: Uuid) -> Result<Profile, StoreError> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        permit.forget();
        self.inner.get_profile(id).await
    }
    async fn insert_profile(&self, id: Uuid, role: Role) -> Result<Profile, StoreError> {
        self.inner.insert_profile(id, role).await
    }
    async fn list_books(&self, search: Option<String>) -> Result<Vec<Book>, StoreError> {
        self.inner.list_books(search).await
    }
    async fn get_book(&self, id: Uuid) -> Result<Book, StoreError> {
        self.inner.get_book(id).await
    }
    async fn count_books(&self) -> Result<i64, StoreError> {
        self.inner.count_books().await
    }
    async fn create_book(&self, req: CreateBookRequest) -> Result<Book, StoreError> {
        self.inner.create_book(req).await
    }
    async fn delete_book(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.delete_book(id).await
    }
}

// --- AuthGate ---

#[test]
fn test_auth_gate_follows_session_sequence() {
    let mut gate = AuthGate::new();
    assert_eq!(gate.state(), &GateState::Pending);

    assert_eq!(gate.on_session(&SessionState::Pending), &GateState::Pending);
    assert_eq!(
        gate.on_session(&SessionState::Absent),
        &GateState::Denied(AccessError::Unauthenticated)
    );
    let reader = identity("reader@library.test");
    assert_eq!(gate.on_session(&SessionState::Present(reader)), &GateState::Allowed);
    assert_eq!(
        gate.on_session(&SessionState::Absent),
        &GateState::Denied(AccessError::Unauthenticated)
    );
}

#[test]
fn test_auth_gate_ignores_role_claim() {
    let mut admin = identity("admin@library.test");
    admin.set_role_claim(Role::Admin);
    let mut reader = identity("reader@library.test");
    reader.set_role_claim(Role::User);

    assert!(AuthGate::evaluate(&SessionState::Present(admin)).is_allowed());
    assert!(AuthGate::evaluate(&SessionState::Present(reader)).is_allowed());
}

// --- AdminGate ---

#[test]
fn test_admin_gate_requests_lookup_once_per_identity() {
    let mut gate = AdminGate::new();
    let admin = identity("admin@library.test");
    let session = SessionState::Present(admin.clone());

    assert_eq!(gate.on_session(&session), Some(admin.clone()));
    assert_eq!(gate.state(), &GateState::Pending);
    // Same identity again (e.g. token refresh) does not restart the lookup.
    assert_eq!(gate.on_session(&session), None);

    assert!(gate.on_resolved(admin.id, Ok(Role::Admin)));
    assert_eq!(gate.state(), &GateState::Allowed);
    assert_eq!(gate.on_session(&session), None);
}

#[test]
fn test_admin_gate_denies_user_role() {
    let mut gate = AdminGate::new();
    let reader = identity("reader@library.test");

    gate.on_session(&SessionState::Present(reader.clone()));
    gate.on_resolved(reader.id, Ok(Role::User));

    assert_eq!(gate.state(), &GateState::Denied(AccessError::Unauthorized));
}

#[test]
fn test_admin_gate_denies_on_resolution_failure() {
    let mut gate = AdminGate::new();
    let admin = identity("admin@library.test");

    gate.on_session(&SessionState::Present(admin.clone()));
    gate.on_resolved(
        admin.id,
        Err(AccessError::ResolutionFailure("connection reset".to_string())),
    );

    assert!(matches!(
        gate.state(),
        GateState::Denied(AccessError::ResolutionFailure(_))
    ));
}

#[test]
fn test_admin_gate_discards_result_after_logout() {
    let mut gate = AdminGate::new();
    let admin = identity("admin@library.test");

    gate.on_session(&SessionState::Present(admin.clone()));
    gate.on_session(&SessionState::Absent);

    assert!(!gate.on_resolved(admin.id, Ok(Role::Admin)));
    assert_eq!(gate.state(), &GateState::Denied(AccessError::Unauthenticated));
}

#[test]
fn test_admin_gate_discards_result_for_previous_account() {
    let mut gate = AdminGate::new();
    let admin = identity("admin@library.test");
    let reader = identity("reader@library.test");

    gate.on_session(&SessionState::Present(admin.clone()));
    assert_eq!(
        gate.on_session(&SessionState::Present(reader.clone())),
        Some(reader.clone())
    );

    // Admin's answer arrives late.
    assert!(!gate.on_resolved(admin.id, Ok(Role::Admin)));
    assert_eq!(gate.state(), &GateState::Pending);

    assert!(gate.on_resolved(reader.id, Ok(Role::User)));
    assert_eq!(gate.state(), &GateState::Denied(AccessError::Unauthorized));
}

#[test]
fn test_admin_gate_resets_on_pending() {
    let mut gate = AdminGate::new();
    let admin = identity("admin@library.test");

    gate.on_session(&SessionState::Present(admin.clone()));
    gate.on_resolved(admin.id, Ok(Role::Admin));
    gate.on_session(&SessionState::Pending);

    assert_eq!(gate.state(), &GateState::Pending);
    // A fresh session for the same identity is looked up again.
    assert_eq!(gate.on_session(&SessionState::Present(admin.clone())), Some(admin));
}

// --- Live gates ---

#[tokio::test]
async fn test_watched_auth_gate_tracks_login_and_logout() {
    let provider = Arc::new(MockAuthProvider::new());
    let session = SessionStore::start(provider.clone() as AuthProviderState);
    let gate = watch_auth_gate(&session);

    wait_for_gate(gate.subscribe(), |s| {
        *s == GateState::Denied(AccessError::Unauthenticated)
    })
    .await;

    provider.emit(AuthEvent::SignedIn(identity("reader@library.test")));
    wait_for_gate(gate.subscribe(), GateState::is_allowed).await;

    provider.emit(AuthEvent::SignedOut);
    let state = wait_for_gate(gate.subscribe(), |s| !s.is_allowed()).await;
    assert_eq!(state, GateState::Denied(AccessError::Unauthenticated));
}

#[tokio::test]
async fn test_watched_admin_gate_allows_admin() {
    let admin = identity("admin@library.test");
    let provider = Arc::new(MockAuthProvider::new());
    provider.preset_session(Some(admin.clone()));
    let session = SessionStore::start(provider as AuthProviderState);

    let repo = Arc::new(MemoryRepository::new().with_profile(admin.id, Role::Admin));
    let gate = watch_admin_gate(&session, RoleResolver::new(repo as RepositoryState));

    let state = wait_for_gate(gate.subscribe(), |s| *s != GateState::Pending).await;
    assert_eq!(state, GateState::Allowed);
}

#[tokio::test]
async fn test_watched_admin_gate_drops_lookup_that_outlived_session() {
    let admin = identity("admin@library.test");
    let provider = Arc::new(MockAuthProvider::new());
    provider.preset_session(Some(admin.clone()));
    let session = SessionStore::start(provider.clone() as AuthProviderState);
    session.ready().await;

    let repo = Arc::new(HeldRepo::new(
        MemoryRepository::new().with_profile(admin.id, Role::Admin),
    ));
    let gate = watch_admin_gate(&session, RoleResolver::new(repo.clone() as RepositoryState));

    // Lookup is in flight and held.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(gate.state(), GateState::Pending);

    provider.emit(AuthEvent::SignedOut);
    wait_for_gate(gate.subscribe(), |s| {
        *s == GateState::Denied(AccessError::Unauthenticated)
    })
    .await;

    // The admin answer now arrives, too late.
    repo.release_one();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(gate.state(), GateState::Denied(AccessError::Unauthenticated));
}

// --- Redirect policy ---

#[test]
fn test_denials_map_to_expected_destinations() {
    assert_eq!(REDIRECTS.for_denial(&AccessError::Unresolved), None);
    assert_eq!(
        REDIRECTS.for_denial(&AccessError::Unauthenticated),
        Some(paths::LOGIN)
    );
    assert_eq!(
        REDIRECTS.for_denial(&AccessError::Unauthorized),
        Some(paths::EXPLORE)
    );
    assert_eq!(
        REDIRECTS.for_denial(&AccessError::ResolutionFailure("timeout".to_string())),
        Some(paths::EXPLORE)
    );
}

#[test]
fn test_post_login_destination_by_role() {
    assert_eq!(REDIRECTS.after_login(&Ok(Role::Admin)), paths::ADMIN);
    assert_eq!(REDIRECTS.after_login(&Ok(Role::User)), paths::LANDING);
    assert_eq!(
        REDIRECTS.after_login(&Err(AccessError::ResolutionFailure("down".to_string()))),
        paths::LANDING
    );
}

#[test]
fn test_default_policy_is_the_shared_table() {
    let policy = RedirectPolicy::default();
    assert_eq!(policy.unknown_route, paths::LANDING);
    assert_eq!(policy.after_sign_up, paths::LOGIN);
    assert_eq!(policy.non_admin, REDIRECTS.non_admin);
}
