use crate::{error::AccessError, models::Role};

/// Route paths the gate and the redirect table refer to.
pub mod paths {
    pub const LOGIN: &str = "/login";
    pub const SIGNUP: &str = "/signup";
    pub const LANDING: &str = "/";
    pub const EXPLORE: &str = "/explore";
    pub const ADMIN: &str = "/admin";
}

/// RedirectPolicy
///
/// The one table of fallback destinations. Gates and handlers ask it where to send
/// the client instead of naming paths themselves.
#[derive(Debug, Clone, Copy)]
pub struct RedirectPolicy {
    /// Where unauthenticated visitors go.
    pub unauthenticated: &'static str,
    /// Where authenticated non-admins trying an admin route go.
    pub non_admin: &'static str,
    /// Where unknown paths go.
    pub unknown_route: &'static str,
    /// Post-login destination for admins.
    pub admin_home: &'static str,
    /// Post-login destination for everyone else.
    pub user_home: &'static str,
    /// Post-sign-up destination.
    pub after_sign_up: &'static str,
}

pub const REDIRECTS: RedirectPolicy = RedirectPolicy {
    unauthenticated: paths::LOGIN,
    non_admin: paths::EXPLORE,
    unknown_route: paths::LANDING,
    admin_home: paths::ADMIN,
    user_home: paths::LANDING,
    after_sign_up: paths::LOGIN,
};

impl Default for RedirectPolicy {
    fn default() -> Self {
        REDIRECTS
    }
}

impl RedirectPolicy {
    /// Destination for a gate denial. `Unresolved` is not a denial and has none.
    /// A failed role lookup is treated like an insufficient role.
    pub fn for_denial(&self, denial: &AccessError) -> Option<&'static str> {
        match denial {
            AccessError::Unresolved => None,
            AccessError::Unauthenticated => Some(self.unauthenticated),
            AccessError::Unauthorized | AccessError::ResolutionFailure(_) => Some(self.non_admin),
        }
    }

    /// Where a freshly signed-in identity lands. If its role could not be resolved it
    /// lands on the ordinary home page.
    pub fn after_login(&self, role: &Result<Role, AccessError>) -> &'static str {
        match role {
            Ok(Role::Admin) => self.admin_home,
            _ => self.user_home,
        }
    }
}

