use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use chrono::{Duration, Utc};

use super::{normalize_email, required_text};
use crate::{
    AppState,
    auth::{
        AuthUser, REFRESH_COOKIE_NAME, clear_refresh_cookie, decode_refresh_token,
        generate_reset_token, hash_token, issue_access_token, issue_refresh_token, refresh_cookie,
    },
    error::{AppError, AppResult},
    mailer::{password_reset_email, send_best_effort, welcome_email},
    models::{
        AuthResponse, ChangePasswordRequest, ForgotPasswordRequest, LoginRequest, MessageResponse,
        NewUser, RefreshResponse, RegisterRequest, ResetPasswordRequest, Role, User, UserProfile,
    },
    password::{hash_password, validate_password, verify_password},
};

const TOKEN_TYPE: &str = "Bearer";

/// Issues an access token plus a fresh refresh token, and stores the refresh hash so
/// only this newest token can be redeemed.
async fn start_session(state: &AppState, user: User) -> AppResult<(Cookie<'static>, AuthResponse)> {
    let (access_token, expires_in) = issue_access_token(user.id, user.role, &state.config)?;
    let refresh = issue_refresh_token(user.id, &state.config)?;
    state
        .repo
        .set_refresh_token_hash(user.id, Some(hash_token(&refresh)))
        .await?;

    Ok((
        refresh_cookie(refresh, &state.config),
        AuthResponse {
            access_token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in,
            user: user.into(),
        },
    ))
}

/// register
///
/// [Public Route] Creates a Student account and signs it in.
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Registered", body = AuthResponse),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, CookieJar, Json<AuthResponse>)> {
    let name = required_text("Name", &payload.name)?;
    let email = normalize_email(&payload.email)?;
    validate_password(&payload.password)?;

    let user = state
        .repo
        .create_user(NewUser {
            name,
            email,
            password_hash: hash_password(&payload.password)?,
            role: Role::Student,
        })
        .await?;

    tracing::info!(user_id = %user.id, "user registered");
    send_best_effort(
        &state.mailer,
        welcome_email(&user.email, &user.name, &state.config.client_url),
    )
    .await;

    let (cookie, body) = start_session(&state, user).await?;
    Ok((StatusCode::CREATED, jar.add(cookie), Json(body)))
}

/// login
///
/// [Public Route] Exchanges credentials for an access token and the refresh cookie.
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account banned")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(CookieJar, Json<AuthResponse>)> {
    let invalid = || AppError::unauthorized("Invalid email or password");

    let user = state
        .repo
        .get_user_by_email(payload.email.trim())
        .await?
        .ok_or_else(invalid)?;

    if !verify_password(&payload.password, &user.password_hash)? {
        return Err(invalid());
    }
    if user.is_banned() {
        return Err(AppError::forbidden("Account is banned"));
    }

    let (cookie, body) = start_session(&state, user).await?;
    Ok((jar.add(cookie), Json(body)))
}

async fn rotate_refresh(state: &AppState, jar: &CookieJar) -> AppResult<(Cookie<'static>, RefreshResponse)> {
    let token = jar
        .get(REFRESH_COOKIE_NAME)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::unauthorized("Missing refresh token"))?;

    let claims = decode_refresh_token(&token, &state.config)?;
    let user = state
        .repo
        .get_user(claims.sub)
        .await?
        .ok_or_else(|| AppError::unauthorized("Invalid refresh token"))?;

    // Only the most recently issued refresh token is valid.
    if user.refresh_token_hash.as_deref() != Some(hash_token(&token).as_str()) {
        tracing::warn!(user_id = %user.id, "stale refresh token presented");
        return Err(AppError::unauthorized("Invalid refresh token"));
    }
    if user.is_banned() {
        return Err(AppError::forbidden("Account is banned"));
    }

    let (cookie, session) = start_session(state, user).await?;
    Ok((
        cookie,
        RefreshResponse {
            access_token: session.access_token,
            token_type: session.token_type,
            expires_in: session.expires_in,
        },
    ))
}

/// refresh
///
/// [Public Route] Redeems the refresh cookie for a new access token and rotates the
/// cookie. Any failure clears the cookie.
#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    tag = "auth",
    responses(
        (status = 200, description = "Token refreshed", body = RefreshResponse),
        (status = 401, description = "Missing, invalid or reused refresh token")
    )
)]
pub async fn refresh(State(state): State<AppState>, jar: CookieJar) -> Response {
    match rotate_refresh(&state, &jar).await {
        Ok((cookie, body)) => (jar.add(cookie), Json(body)).into_response(),
        Err(err) => (jar.add(clear_refresh_cookie(&state.config)), err).into_response(),
    }
}

/// logout
///
/// [Public Route] Revokes the stored refresh hash (when the cookie is still valid) and
/// expires the cookie. Always succeeds.
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    tag = "auth",
    responses((status = 204, description = "Signed out"))
)]
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> AppResult<(CookieJar, StatusCode)> {
    if let Some(cookie) = jar.get(REFRESH_COOKIE_NAME) {
        if let Ok(claims) = decode_refresh_token(cookie.value(), &state.config) {
            if let Some(user) = state.repo.get_user(claims.sub).await? {
                if user.refresh_token_hash.as_deref() == Some(hash_token(cookie.value()).as_str()) {
                    state.repo.set_refresh_token_hash(user.id, None).await?;
                }
            }
        }
    }
    Ok((jar.add(clear_refresh_cookie(&state.config)), StatusCode::NO_CONTENT))
}

/// me
///
/// [Authenticated Route] The caller's own profile.
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    tag = "auth",
    responses((status = 200, description = "Current user", body = UserProfile))
)]
pub async fn me(AuthUser { id, .. }: AuthUser, State(state): State<AppState>) -> AppResult<Json<UserProfile>> {
    let user = state
        .repo
        .get_user(id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    Ok(Json(user.into()))
}

/// forgot_password
///
/// [Public Route] Emails a reset link when the address belongs to an active account.
/// The response is identical either way so it cannot be used to probe for accounts.
#[utoipa::path(
    post,
    path = "/api/v1/auth/forgot-password",
    tag = "auth",
    request_body = ForgotPasswordRequest,
    responses((status = 200, description = "Request accepted", body = MessageResponse))
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    let accepted = MessageResponse::new("If that email is registered, a reset link has been sent");

    let Some(user) = state.repo.get_user_by_email(payload.email.trim()).await? else {
        return Ok(Json(accepted));
    };
    if user.is_banned() {
        return Ok(Json(accepted));
    }

    let token = generate_reset_token();
    let ttl = state.config.password_reset_ttl_secs;
    state
        .repo
        .set_reset_token(user.id, hash_token(&token), Utc::now() + Duration::seconds(ttl))
        .await?;

    send_best_effort(
        &state.mailer,
        password_reset_email(&user.email, &user.name, &state.config.client_url, &token, ttl / 60),
    )
    .await;

    Ok(Json(accepted))
}

/// reset_password
///
/// [Public Route] Sets a new password from a reset token. The token is single-use and
/// every existing session is revoked.
#[utoipa::path(
    post,
    path = "/api/v1/auth/reset-password",
    tag = "auth",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password reset", body = MessageResponse),
        (status = 400, description = "Invalid or expired token")
    )
)]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    validate_password(&payload.password)?;
    let invalid = || AppError::bad_request("Invalid or expired reset token");

    let user = state
        .repo
        .find_user_by_reset_token(&hash_token(payload.token.trim()))
        .await?
        .ok_or_else(invalid)?;

    if user.reset_token_expires.is_none_or(|expires| expires < Utc::now()) {
        return Err(invalid());
    }

    state
        .repo
        .set_password(user.id, hash_password(&payload.password)?)
        .await?;
    tracing::info!(user_id = %user.id, "password reset");

    Ok(Json(MessageResponse::new("Password has been reset")))
}

/// change_password
///
/// [Authenticated Route] Changes the password after re-checking the current one. Other
/// sessions are revoked; the caller receives a fresh session.
#[utoipa::path(
    put,
    path = "/api/v1/auth/password",
    tag = "auth",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = AuthResponse),
        (status = 400, description = "Current password incorrect or new password too short")
    )
)]
pub async fn change_password(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<ChangePasswordRequest>,
) -> AppResult<(CookieJar, Json<AuthResponse>)> {
    let user = state
        .repo
        .get_user(id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    // 400 rather than 401: a 401 here would make clients try a token refresh.
    if !verify_password(&payload.current_password, &user.password_hash)? {
        return Err(AppError::bad_request("Current password is incorrect"));
    }
    validate_password(&payload.new_password)?;

    let new_hash = hash_password(&payload.new_password)?;
    state.repo.set_password(id, new_hash.clone()).await?;

    let user = User {
        password_hash: new_hash,
        ..user
    };
    let (cookie, body) = start_session(&state, user).await?;
    Ok((jar.add(cookie), Json(body)))
}
