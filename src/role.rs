use crate::{
    error::{AccessError, StoreError},
    models::{Identity, Role},
    repository::RepositoryState,
    session::SessionHandle,
};

/// RoleResolver
///
/// Maps an identity to its role by reading the identity's Profile, creating a
/// `user` Profile the first time an identity is seen. The Profile is the only
/// source of truth; when a session store is attached, the identity's embedded
/// `role` claim is overwritten with the resolved role after each lookup.
#[derive(Clone)]
pub struct RoleResolver {
    repo: RepositoryState,
    claim_cache: Option<SessionHandle>,
}

impl RoleResolver {
    pub fn new(repo: RepositoryState) -> Self {
        Self {
            repo,
            claim_cache: None,
        }
    }

    /// Attaches the session store whose role claim is refreshed after each resolution.
    pub fn with_claim_cache(mut self, session: SessionHandle) -> Self {
        self.claim_cache = Some(session);
        self
    }

    /// resolve_role
    ///
    /// 1. Found Profile: its role.
    /// 2. No Profile: insert `user` and return it.
    /// 3. Insert lost a race (`Conflict`): re-read and return the winner's role.
    ///
    /// Any other store failure is a `ResolutionFailure`. Concurrent calls for the same
    /// new identity converge on the single Profile the store accepted.
    pub async fn resolve_role(&self, identity: &Identity) -> Result<Role, AccessError> {
        let role = match self.repo.get_profile(identity.id).await {
            Ok(profile) => profile.role,
            Err(StoreError::NotFound) => self.create_default_profile(identity).await?,
            Err(e) => return Err(resolution_failure(identity, e)),
        };

        if let Some(session) = &self.claim_cache {
            session.refresh_role_claim(identity.id, role);
        }
        Ok(role)
    }

    async fn create_default_profile(&self, identity: &Identity) -> Result<Role, AccessError> {
        match self.repo.insert_profile(identity.id, Role::User).await {
            Ok(profile) => {
                tracing::info!(user_id = %identity.id, "Created default profile");
                Ok(profile.role)
            }
            Err(StoreError::Conflict) => {
                tracing::debug!(user_id = %identity.id, "Profile created concurrently; re-reading");
                self.repo
                    .get_profile(identity.id)
                    .await
                    .map(|profile| profile.role)
                    .map_err(|e| resolution_failure(identity, e))
            }
            Err(e) => Err(resolution_failure(identity, e)),
        }
    }
}

fn resolution_failure(identity: &Identity, err: StoreError) -> AccessError {
    tracing::error!(user_id = %identity.id, "Role resolution failed: {}", err);
    AccessError::ResolutionFailure(err.to_string())
}
