use library_portal::{
    models::{Identity, Role, SessionState},
    provider::{AuthEvent, AuthProviderState, MockAuthProvider},
    session::SessionStore,
};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use uuid::Uuid;

// --- Helpers ---

async fn wait_for_state<F>(session: &SessionStore, pred: F) -> SessionState
where
    F: Fn(&SessionState) -> bool,
{
    let mut rx = session.subscribe();
    let state = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| pred(s)))
        .await
        .expect("session did not reach expected state in time")
        .expect("session store closed");
    state.clone()
}

fn identity(email: &str) -> Identity {
    Identity::new(Uuid::new_v4(), email)
}

// --- Tests ---

#[tokio::test]
async fn test_initial_state_resolves_to_absent_without_session() {
    let provider = Arc::new(MockAuthProvider::new());
    let session = SessionStore::start(provider.clone() as AuthProviderState);

    assert_eq!(session.ready().await, SessionState::Absent);
    assert!(session.current_identity().is_none());
}

#[tokio::test]
async fn test_initial_state_picks_up_existing_session() {
    let provider = Arc::new(MockAuthProvider::new());
    let reader = identity("reader@library.test");
    provider.preset_session(Some(reader.clone()));

    let session = SessionStore::start(provider.clone() as AuthProviderState);

    assert_eq!(session.ready().await, SessionState::Present(reader.clone()));
    assert_eq!(session.current_identity(), Some(reader));
}

#[tokio::test]
async fn test_provider_error_at_startup_is_treated_as_signed_out() {
    let provider = Arc::new(MockAuthProvider::new_failing());
    let session = SessionStore::start(provider as AuthProviderState);

    assert_eq!(session.ready().await, SessionState::Absent);
}

#[tokio::test]
async fn test_follows_login_refresh_and_logout() {
    let provider = Arc::new(MockAuthProvider::new());
    let session = SessionStore::start(provider.clone() as AuthProviderState);
    session.ready().await;

    let reader = identity("reader@library.test");
    provider.emit(AuthEvent::SignedIn(reader.clone()));
    wait_for_state(&session, |s| s.identity().is_some()).await;
    assert_eq!(session.current_identity(), Some(reader.clone()));

    let mut refreshed = reader.clone();
    refreshed.set_role_claim(Role::User);
    provider.emit(AuthEvent::TokenRefreshed(refreshed.clone()));
    wait_for_state(&session, |s| s.identity().and_then(|i| i.role_claim()).is_some()).await;

    provider.emit(AuthEvent::SignedOut);
    let state = wait_for_state(&session, |s| *s == SessionState::Absent).await;
    assert_eq!(state, SessionState::Absent);
}

#[tokio::test]
async fn test_on_change_fires_immediately_and_on_every_transition() {
    let provider = Arc::new(MockAuthProvider::new());
    let session = SessionStore::start(provider.clone() as AuthProviderState);

    let seen: Arc<Mutex<Vec<SessionState>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _listener = session.on_change(move |state| sink.lock().unwrap().push(state.clone()));

    session.ready().await;
    let reader = identity("reader@library.test");
    provider.emit(AuthEvent::SignedIn(reader.clone()));
    wait_for_state(&session, |s| s.identity().is_some()).await;

    // Give the listener task a chance to observe the last change.
    for _ in 0..50 {
        if seen.lock().unwrap().last() == Some(&SessionState::Present(reader.clone())) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let seen = seen.lock().unwrap().clone();
    assert!(!seen.is_empty(), "listener must fire at least once");
    assert_eq!(seen.last(), Some(&SessionState::Present(reader)));
    // Pending can only ever appear first.
    assert!(seen.iter().skip(1).all(|s| !s.is_pending()));
}

#[tokio::test]
async fn test_single_subscription_released_on_shutdown() {
    let provider = Arc::new(MockAuthProvider::new());
    let session = SessionStore::start(provider.clone() as AuthProviderState);
    assert_eq!(provider.subscriber_count(), 1);

    session.ready().await;
    assert_eq!(provider.subscriber_count(), 1);

    session.shutdown().await;
    assert_eq!(provider.subscriber_count(), 0);

    // Idempotent.
    session.shutdown().await;
    assert_eq!(provider.subscriber_count(), 0);
}

#[tokio::test]
async fn test_role_claim_refresh_only_touches_current_identity() {
    let provider = Arc::new(MockAuthProvider::new());
    let reader = identity("reader@library.test");
    provider.preset_session(Some(reader.clone()));
    let session = SessionStore::start(provider as AuthProviderState);
    session.ready().await;

    assert!(!session.refresh_role_claim(Uuid::new_v4(), Role::Admin));
    assert!(session.refresh_role_claim(reader.id, Role::Admin));
    assert_eq!(
        session.current_identity().and_then(|i| i.role_claim()),
        Some(Role::Admin)
    );
    // Already up to date.
    assert!(!session.refresh_role_claim(reader.id, Role::Admin));
}

#[tokio::test]
async fn test_settled_on_times_out_for_other_identity() {
    let provider = Arc::new(MockAuthProvider::new());
    let session = SessionStore::start(provider as AuthProviderState);
    session.ready().await;

    assert!(!session.settled_on(Uuid::new_v4(), Duration::from_millis(50)).await);
}

#[tokio::test]
async fn test_initial_session_event_is_folded_like_any_other() {
    let provider = Arc::new(MockAuthProvider::new());
    let session = SessionStore::start(provider.clone() as AuthProviderState);
    session.ready().await;

    let reader = identity("reader@library.test");
    provider.emit(AuthEvent::InitialSession(Some(reader.clone())));
    let state = wait_for_state(&session, |s| s.identity().is_some()).await;
    assert_eq!(state, SessionState::Present(reader));

    provider.emit(AuthEvent::InitialSession(None));
    wait_for_state(&session, |s| *s == SessionState::Absent).await;
}
