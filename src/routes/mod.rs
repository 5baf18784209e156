/// Router Module Index
///
/// Organizes the `/api/v1` routes into access-segregated modules. Access control is
/// attached at the module level (via Axum layers in `create_router`), so a handler can
/// never be exposed with weaker protection than the router it lives in.

/// Routes reachable without a session. Handlers that behave differently for signed-in
/// callers take `MaybeAuthUser`.
pub mod public;

/// Routes behind `auth_middleware`. Requires a valid access token.
pub mod authenticated;

/// Routes behind `admin_middleware`, nested under `/admin`.
pub mod admin;
