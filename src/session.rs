use crate::{
    models::{Identity, Role, SessionState},
    provider::{AuthEvent, AuthProviderState},
};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{
    sync::{broadcast::error::RecvError, watch},
    task::JoinHandle,
};
use uuid::Uuid;

/// SessionStore
///
/// The process-wide answer to "is someone signed in, and who". It owns the one
/// subscription to the auth provider's event stream for the lifetime of the app:
/// acquired in `start`, released by `shutdown` (or when the store is dropped).
///
/// State is published through a `watch` channel. Readers always see the latest
/// state; a reader that falls behind may skip intermediate states but never sees
/// them out of order.
pub struct SessionStore {
    state: Arc<watch::Sender<SessionState>>,
    subscription: Mutex<Option<JoinHandle<()>>>,
}

/// SessionHandle
///
/// The shared handle stored in `AppState`.
pub type SessionHandle = Arc<SessionStore>;

impl SessionStore {
    /// start
    ///
    /// Subscribes to `provider` and spawns the task that folds its events into the
    /// session state. The store begins `Pending` and moves to `Absent`/`Present` once
    /// the provider reports the initial identity. A provider error at that point is
    /// treated as "nobody signed in".
    pub fn start(provider: AuthProviderState) -> SessionHandle {
        let (tx, _) = watch::channel(SessionState::Pending);
        let state = Arc::new(tx);

        // Subscribe before reading the initial identity so no transition is lost
        // between the two.
        let mut events = provider.subscribe();
        let publisher = state.clone();

        let task = tokio::spawn(async move {
            let initial = initial_state(&provider).await;
            tracing::info!(signed_in = initial.identity().is_some(), "Session initialised");
            publisher.send_replace(initial);

            loop {
                match events.recv().await {
                    Ok(event) => {
                        tracing::debug!(event = ?event_name(&event), "Auth state changed");
                        publisher.send_replace(SessionState::from(event.identity().cloned()));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Auth events lagged; resynchronising");
                        publisher.send_replace(initial_state(&provider).await);
                    }
                    Err(RecvError::Closed) => {
                        tracing::debug!("Auth provider event stream closed");
                        break;
                    }
                }
            }
        });

        Arc::new(Self {
            state,
            subscription: Mutex::new(Some(task)),
        })
    }

    /// The latest known identity, `None` while pending or signed out.
    pub fn current_identity(&self) -> Option<Identity> {
        self.state.borrow().identity().cloned()
    }

    /// Snapshot of the full session state.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// A receiver that is notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// on_change
    ///
    /// Registers `listener`, calling it once immediately with the current state and
    /// then after every change. The registration lasts as long as the returned handle.
    pub fn on_change<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&SessionState) + Send + Sync + 'static,
    {
        let mut rx = self.state.subscribe();
        let task = tokio::spawn(async move {
            let current = rx.borrow_and_update().clone();
            listener(&current);
            while rx.changed().await.is_ok() {
                let current = rx.borrow_and_update().clone();
                listener(&current);
            }
        });
        ListenerHandle { task }
    }

    /// Waits until the initial state has been resolved and returns it.
    pub async fn ready(&self) -> SessionState {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|s| !s.is_pending()).await {
            Ok(state) => state.clone(),
            Err(_) => SessionState::Absent,
        }
    }

    /// Waits up to `timeout` for the session to carry the given identity. Returns
    /// whether it did.
    pub async fn settled_on(&self, identity_id: Uuid, timeout: Duration) -> bool {
        let mut rx = self.state.subscribe();
        let wait = rx.wait_for(|s| s.identity().is_some_and(|i| i.id == identity_id));
        matches!(tokio::time::timeout(timeout, wait).await, Ok(Ok(_)))
    }

    /// refresh_role_claim
    ///
    /// Overwrites the cached `role` claim on the current identity with the role just
    /// read from its Profile. No-op if the session moved on to someone else or the
    /// claim is already up to date.
    pub fn refresh_role_claim(&self, identity_id: Uuid, role: Role) -> bool {
        self.state.send_if_modified(|state| match state {
            SessionState::Present(identity)
                if identity.id == identity_id && identity.role_claim() != Some(role) =>
            {
                identity.set_role_claim(role);
                true
            }
            _ => false,
        })
    }

    /// shutdown
    ///
    /// Releases the provider subscription. Safe to call more than once.
    pub async fn shutdown(&self) {
        let task = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
            tracing::info!("Session store released auth subscription");
        }
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        if let Some(task) = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
    }
}

/// ListenerHandle
///
/// Keeps an `on_change` listener registered; dropping it unregisters the listener.
pub struct ListenerHandle {
    task: JoinHandle<()>,
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn initial_state(provider: &AuthProviderState) -> SessionState {
    match provider.current_identity().await {
        Ok(identity) => SessionState::from(identity),
        Err(e) => {
            tracing::warn!("Could not read initial session, treating as signed out: {}", e);
            SessionState::Absent
        }
    }
}

fn event_name(event: &AuthEvent) -> &'static str {
    match event {
        AuthEvent::InitialSession(_) => "initial_session",
        AuthEvent::SignedIn(_) => "signed_in",
        AuthEvent::SignedOut => "signed_out",
        AuthEvent::TokenRefreshed(_) => "token_refreshed",
    }
}
