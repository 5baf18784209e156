use std::convert::Infallible;
use std::fmt::Write;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    config::{AppConfig, Env},
    error::{AppError, AppResult},
    models::Role,
    repository::RepositoryState,
};

/// Name of the HttpOnly cookie carrying the refresh token.
pub const REFRESH_COOKIE_NAME: &str = "refresh_token";
/// The refresh cookie is only ever sent to the auth endpoints.
pub const REFRESH_COOKIE_PATH: &str = "/api/v1/auth";

/// Claims
///
/// Payload of the short-lived access token. The role is informational for the client;
/// the server always re-reads the current role from the database.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user's id.
    pub sub: Uuid,
    pub role: Role,
    pub exp: usize,
    pub iat: usize,
}

/// RefreshClaims
///
/// Payload of the refresh token. `jti` makes every issued token unique, so two logins
/// in the same second still rotate the stored hash.
#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: Uuid,
    pub jti: Uuid,
    pub exp: usize,
    pub iat: usize,
}

fn now_secs() -> usize {
    Utc::now().timestamp().max(0) as usize
}

fn validation() -> Validation {
    let mut validation = Validation::default();
    validation.validate_exp = true;
    validation.leeway = 0;
    validation
}

/// Issues an access token; returns it with its lifetime in seconds.
pub fn issue_access_token(user_id: Uuid, role: Role, config: &AppConfig) -> AppResult<(String, i64)> {
    let iat = now_secs();
    let claims = Claims {
        sub: user_id,
        role,
        iat,
        exp: iat + config.access_token_ttl_secs.max(1) as usize,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_access_secret.as_bytes()),
    )
    .map_err(|e| AppError::internal(format!("failed to sign access token: {e}")))?;
    Ok((token, config.access_token_ttl_secs))
}

pub fn issue_refresh_token(user_id: Uuid, config: &AppConfig) -> AppResult<String> {
    let iat = now_secs();
    let claims = RefreshClaims {
        sub: user_id,
        jti: Uuid::new_v4(),
        iat,
        exp: iat + config.refresh_token_ttl_secs.max(1) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_refresh_secret.as_bytes()),
    )
    .map_err(|e| AppError::internal(format!("failed to sign refresh token: {e}")))
}

pub fn decode_access_token(token: &str, config: &AppConfig) -> AppResult<Claims> {
    let key = DecodingKey::from_secret(config.jwt_access_secret.as_bytes());
    decode::<Claims>(token, &key, &validation())
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AppError::unauthorized("Access token expired"),
            _ => AppError::unauthorized("Invalid access token"),
        })
}

pub fn decode_refresh_token(token: &str, config: &AppConfig) -> AppResult<RefreshClaims> {
    let key = DecodingKey::from_secret(config.jwt_refresh_secret.as_bytes());
    decode::<RefreshClaims>(token, &key, &validation())
        .map(|data| data.claims)
        .map_err(|_| AppError::unauthorized("Invalid or expired refresh token"))
}

pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// SHA-256 hex digest. Only digests of refresh and reset tokens are persisted.
pub fn hash_token(token: &str) -> String {
    bytes_to_hex(&Sha256::digest(token.as_bytes()))
}

/// A random 32-byte hex token for password reset links.
pub fn generate_reset_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes_to_hex(&bytes)
}

/// The HttpOnly refresh cookie, scoped to the auth endpoints.
pub fn refresh_cookie(token: String, config: &AppConfig) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE_NAME, token))
        .path(REFRESH_COOKIE_PATH)
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.cookie_secure)
        .max_age(time::Duration::seconds(config.refresh_token_ttl_secs))
        .build()
}

pub fn clear_refresh_cookie(config: &AppConfig) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE_NAME, ""))
        .path(REFRESH_COOKIE_PATH)
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.cookie_secure)
        .max_age(time::Duration::ZERO)
        .build()
}

/// AuthUser
///
/// The resolved identity of an authenticated request. Handlers take it as an argument
/// and use it for the role and ownership checks.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_owner_or_admin(&self, owner_id: Uuid) -> bool {
        self.id == owner_id || self.is_admin()
    }

    /// 403 unless the caller holds one of `roles`.
    pub fn require_role(&self, roles: &[Role]) -> AppResult<()> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(AppError::forbidden("You do not have permission to perform this action"))
        }
    }

    /// 403 unless the caller owns the resource or is an admin.
    pub fn ensure_owner_or_admin(&self, owner_id: Uuid) -> AppResult<()> {
        if self.is_owner_or_admin(owner_id) {
            Ok(())
        } else {
            Err(AppError::forbidden("You do not own this resource"))
        }
    }
}

/// Resolves the caller from the request headers.
///
/// 1. `Env::Local` only: an `x-user-id` header naming an existing user.
/// 2. `Authorization: Bearer <access token>` decoded with the access secret.
/// 3. The user is re-read from the database, so deleted users are rejected and banned
///    users are refused with 403.
async fn resolve_user(parts: &Parts, repo: &RepositoryState, config: &AppConfig) -> AppResult<AuthUser> {
    if config.env == Env::Local {
        let bypass_id = parts
            .headers
            .get("x-user-id")
            .and_then(|value| value.to_str().ok())
            .and_then(|raw| Uuid::parse_str(raw).ok());
        if let Some(user_id) = bypass_id {
            if let Some(user) = repo.get_user(user_id).await? {
                if user.is_banned() {
                    return Err(AppError::forbidden("Account is banned"));
                }
                return Ok(AuthUser {
                    id: user.id,
                    role: user.role,
                });
            }
        }
    }

    let token = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::unauthorized("Missing bearer token"))?;

    let claims = decode_access_token(token, config)?;

    let user = repo
        .get_user(claims.sub)
        .await?
        .ok_or_else(|| AppError::unauthorized("User no longer exists"))?;

    if user.is_banned() {
        return Err(AppError::forbidden("Account is banned"));
    }

    Ok(AuthUser {
        id: user.id,
        role: user.role,
    })
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);
        resolve_user(parts, &repo, &config).await
    }
}

/// MaybeAuthUser
///
/// Optional identity for public routes that behave differently for signed-in callers
/// (draft visibility for owners, linking feedback to an account). Any authentication
/// failure degrades to anonymous.
#[derive(Debug, Clone, Default)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

impl<S> FromRequestParts<S> for MaybeAuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);
        Ok(MaybeAuthUser(resolve_user(parts, &repo, &config).await.ok()))
    }
}
