use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
    response::{IntoResponse, Redirect, Response},
};
use uuid::Uuid;

use crate::{
    error::AccessError,
    models::Identity,
    redirect::REDIRECTS,
    session::SessionHandle,
};

/// AuthUser
///
/// The signed-in identity as seen by a handler. Handlers behind the gates take this
/// as an argument instead of reaching into the session store themselves.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
}

impl From<Identity> for AuthUser {
    fn from(identity: Identity) -> Self {
        Self {
            id: identity.id,
            email: identity.email,
        }
    }
}

/// AuthUser Extractor Implementation
///
/// Reads the current identity from the session store. If the session was cleared
/// after the gate let the request through, the request is redirected to login like
/// any other unauthenticated visit.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    SessionHandle: FromRef<S>,
{
    type Rejection = Response;

    async fn from_request_parts(_parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = SessionHandle::from_ref(state);

        session.current_identity().map(AuthUser::from).ok_or_else(|| {
            let to = REDIRECTS
                .for_denial(&AccessError::Unauthenticated)
                .unwrap_or(REDIRECTS.unauthenticated);
            Redirect::to(to).into_response()
        })
    }
}
