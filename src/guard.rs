use crate::{
    error::AccessError,
    models::{Role, SessionState},
    redirect::REDIRECTS,
    role::RoleResolver,
    session::{SessionHandle, SessionStore},
};
use axum::{
    Json,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use serde_json::json;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use uuid::Uuid;

/// GateState
///
/// What a gate decides for the view it wraps.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GateState {
    /// Not decided yet: render a neutral placeholder.
    #[default]
    Pending,
    Allowed,
    /// Redirect according to the redirect policy.
    Denied(AccessError),
}

impl GateState {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateState::Allowed)
    }
}

/// AuthGate
///
/// Requires only that someone is signed in. The role is never consulted.
#[derive(Debug, Default)]
pub struct AuthGate {
    state: GateState,
}

impl AuthGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pure decision for a given session state.
    pub fn evaluate(session: &SessionState) -> GateState {
        match session {
            SessionState::Pending => GateState::Pending,
            SessionState::Absent => GateState::Denied(AccessError::Unauthenticated),
            SessionState::Present(_) => GateState::Allowed,
        }
    }

    pub fn on_session(&mut self, session: &SessionState) -> &GateState {
        self.state = Self::evaluate(session);
        &self.state
    }

    pub fn state(&self) -> &GateState {
        &self.state
    }
}

/// AdminGate
///
/// Requires a signed-in identity whose resolved role is `admin`.
///
/// Every role lookup is issued for a specific identity id. A result is only applied
/// if the gate is still waiting on that same identity; anything else is a stale
/// answer from before a logout or account switch and is dropped.
#[derive(Debug, Default)]
pub struct AdminGate {
    state: GateState,
    awaiting: Option<Uuid>,
    decided_for: Option<Uuid>,
}

impl AdminGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &GateState {
        &self.state
    }

    /// on_session
    ///
    /// Re-evaluates against a new session state. Returns the identity whose role must
    /// now be resolved, if a lookup is needed. An identity that already has a decision
    /// or a lookup in flight does not trigger another one.
    pub fn on_session(&mut self, session: &SessionState) -> Option<crate::models::Identity> {
        match session {
            SessionState::Pending => {
                self.state = GateState::Pending;
                self.awaiting = None;
                self.decided_for = None;
                None
            }
            SessionState::Absent => {
                self.state = GateState::Denied(AccessError::Unauthenticated);
                self.awaiting = None;
                self.decided_for = None;
                None
            }
            SessionState::Present(identity) => {
                if self.awaiting == Some(identity.id) || self.decided_for == Some(identity.id) {
                    return None;
                }
                self.state = GateState::Pending;
                self.awaiting = Some(identity.id);
                self.decided_for = None;
                Some(identity.clone())
            }
        }
    }

    /// on_resolved
    ///
    /// Applies the outcome of a role lookup issued for `identity_id`. Returns `false`
    /// when the result was stale and ignored.
    pub fn on_resolved(&mut self, identity_id: Uuid, result: Result<Role, AccessError>) -> bool {
        if self.awaiting != Some(identity_id) {
            tracing::debug!(user_id = %identity_id, "Discarding stale role resolution");
            return false;
        }

        self.awaiting = None;
        self.decided_for = Some(identity_id);
        self.state = match result {
            Ok(Role::Admin) => GateState::Allowed,
            Ok(_) => GateState::Denied(AccessError::Unauthorized),
            Err(e) => GateState::Denied(e),
        };
        true
    }
}

/// GateWatch
///
/// A gate kept live against the session store by a background task. Dropping it
/// stops the task.
pub struct GateWatch {
    state: watch::Receiver<GateState>,
    task: JoinHandle<()>,
}

impl GateWatch {
    pub fn state(&self) -> GateState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<GateState> {
        self.state.clone()
    }
}

impl Drop for GateWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Keeps an `AuthGate` in step with every session change.
pub fn watch_auth_gate(session: &SessionStore) -> GateWatch {
    let mut sessions = session.subscribe();
    let (out, state) = watch::channel(AuthGate::evaluate(&sessions.borrow()));

    let task = tokio::spawn(async move {
        let mut gate = AuthGate::new();
        loop {
            let snapshot = sessions.borrow_and_update().clone();
            out.send_replace(gate.on_session(&snapshot).clone());
            if sessions.changed().await.is_err() {
                break;
            }
        }
    });

    GateWatch { state, task }
}

/// watch_admin_gate
///
/// Keeps an `AdminGate` in step with every session change, running role lookups in
/// the background. Session changes are always handled before a lookup result, so a
/// logout that raced a lookup wins and the gate never reports `Allowed` for an
/// identity that is no longer signed in.
pub fn watch_admin_gate(session: &SessionStore, resolver: RoleResolver) -> GateWatch {
    let mut sessions = session.subscribe();
    let (out, state) = watch::channel(GateState::Pending);
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(Uuid, Result<Role, AccessError>)>();

    let task = tokio::spawn(async move {
        let mut gate = AdminGate::new();
        let spawn_lookup = |gate: &mut AdminGate, snapshot: &SessionState| {
            if let Some(identity) = gate.on_session(snapshot) {
                let resolver = resolver.clone();
                let done = done_tx.clone();
                tokio::spawn(async move {
                    let result = resolver.resolve_role(&identity).await;
                    let _ = done.send((identity.id, result));
                });
            }
        };

        let snapshot = sessions.borrow_and_update().clone();
        spawn_lookup(&mut gate, &snapshot);
        out.send_replace(gate.state().clone());

        loop {
            tokio::select! {
                biased;
                changed = sessions.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = sessions.borrow_and_update().clone();
                    spawn_lookup(&mut gate, &snapshot);
                }
                Some((identity_id, result)) = done_rx.recv() => {
                    if sessions.has_changed().unwrap_or(false) {
                        let snapshot = sessions.borrow_and_update().clone();
                        spawn_lookup(&mut gate, &snapshot);
                    }
                    gate.on_resolved(identity_id, result);
                }
            }
            out.send_replace(gate.state().clone());
        }
    });

    GateWatch { state, task }
}

// --- Router middleware ---

/// Response for a gate outcome that does not render the view.
fn gate_response(state: &GateState) -> Option<Response> {
    match state {
        GateState::Allowed => None,
        GateState::Pending => Some(loading_placeholder()),
        GateState::Denied(denial) => Some(match REDIRECTS.for_denial(denial) {
            Some(to) => Redirect::to(to).into_response(),
            None => loading_placeholder(),
        }),
    }
}

fn loading_placeholder() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [(header::RETRY_AFTER, "1")],
        Json(json!({ "status": "loading" })),
    )
        .into_response()
}

/// authenticated_gate
///
/// Route middleware for views that only need a signed-in identity. Evaluated against
/// the session store on every request, so a logout or token expiry takes effect on
/// the very next navigation.
pub async fn authenticated_gate(
    State(session): State<SessionHandle>,
    request: Request,
    next: Next,
) -> Response {
    let decision = AuthGate::evaluate(&session.state());
    match gate_response(&decision) {
        Some(response) => {
            tracing::debug!(path = %request.uri().path(), ?decision, "Authenticated gate refused");
            response
        }
        None => next.run(request).await,
    }
}

/// admin_gate
///
/// Route middleware for admin views. Resolves the role of the current identity and
/// re-reads the session afterwards: if the session moved to another identity (or
/// signed out) while the lookup ran, the result is discarded and the gate decides
/// again from the new state.
pub async fn admin_gate(
    State(session): State<SessionHandle>,
    State(resolver): State<RoleResolver>,
    request: Request,
    next: Next,
) -> Response {
    let mut gate = AdminGate::new();
    let mut snapshot = session.state();

    while let Some(identity) = gate.on_session(&snapshot) {
        let result = resolver.resolve_role(&identity).await;
        let current = session.state();
        if current.identity().map(|i| i.id) == Some(identity.id) {
            gate.on_resolved(identity.id, result);
            break;
        }
        tracing::debug!(user_id = %identity.id, "Session changed during role lookup");
        snapshot = current;
    }

    match gate_response(gate.state()) {
        Some(response) => {
            tracing::info!(path = %request.uri().path(), decision = ?gate.state(), "Admin gate refused");
            response
        }
        None => next.run(request).await,
    }
}
