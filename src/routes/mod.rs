/// Router Module Index
///
/// Routing is split by access level. The gate for each level is attached to the
/// whole module in `create_router`, never per handler, so a view cannot be added to
/// a protected module without being protected.

/// Routes open to everyone, signed in or not.
pub mod public;

/// Routes behind the authenticated gate. Requires a signed-in identity.
pub mod authenticated;

/// Routes behind the admin gate. Requires a signed-in identity whose Profile role is `admin`.
pub mod admin;
