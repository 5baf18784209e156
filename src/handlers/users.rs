use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use uuid::Uuid;

use super::optional_text;
use crate::{
    AppState,
    auth::AuthUser,
    error::{AppError, AppResult},
    models::{
        Paginated, Pagination, PublicUserProfile, Role, UpdateProfileRequest, UpdateRoleRequest,
        UpdateUserStatusRequest, UserFilter, UserProfile, UserStatus,
    },
};

/// UserListQuery
///
/// Filters for the admin user table.
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct UserListQuery {
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
    /// Case-insensitive match on name or email.
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// get_user_profile
///
/// [Public Route] Public view of any user (instructor pages, review authors).
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}",
    tag = "users",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Public profile", body = PublicUserProfile),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user_profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<PublicUserProfile>> {
    let user = state
        .repo
        .get_user(id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    Ok(Json(user.into()))
}

/// update_profile
///
/// [Authenticated Route] Partial profile update. Owner or admin.
#[utoipa::path(
    put,
    path = "/api/v1/users/{id}",
    tag = "users",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = UserProfile),
        (status = 403, description = "Not your profile"),
        (status = 404, description = "User not found")
    )
)]
pub async fn update_profile(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateProfileRequest>,
) -> AppResult<Json<UserProfile>> {
    user.ensure_owner_or_admin(id)?;

    let payload = UpdateProfileRequest {
        name: optional_text("Name", payload.name)?,
        bio: payload.bio.map(|b| b.trim().to_string()),
        avatar: payload.avatar.map(|a| a.trim().to_string()),
    };

    let updated = state
        .repo
        .update_profile(id, payload)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    Ok(Json(updated.into()))
}

/// admin_list_users
///
/// [Admin Route] Every account, filterable by role, status and a search term.
#[utoipa::path(
    get,
    path = "/api/v1/admin/users",
    tag = "admin",
    params(UserListQuery),
    responses((status = 200, description = "Users", body = Paginated<UserProfile>))
)]
pub async fn admin_list_users(
    State(state): State<AppState>,
    Query(query): Query<UserListQuery>,
) -> AppResult<Json<Paginated<UserProfile>>> {
    let filter = UserFilter {
        role: query.role,
        status: query.status,
        search: query.search.filter(|s| !s.trim().is_empty()),
    };
    let page = state
        .repo
        .list_users(filter, Pagination::new(query.page, query.limit))
        .await?;
    Ok(Json(page.map(UserProfile::from)))
}

/// admin_update_role
///
/// [Admin Route] Changes a user's role. Admins cannot change their own role.
#[utoipa::path(
    put,
    path = "/api/v1/admin/users/{id}/role",
    tag = "admin",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = UpdateRoleRequest,
    responses(
        (status = 200, description = "Role updated", body = UserProfile),
        (status = 400, description = "Cannot change own role"),
        (status = 404, description = "User not found")
    )
)]
pub async fn admin_update_role(
    AuthUser { id: admin_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateRoleRequest>,
) -> AppResult<Json<UserProfile>> {
    if id == admin_id {
        return Err(AppError::bad_request("You cannot change your own role"));
    }
    let user = state
        .repo
        .set_user_role(id, payload.role)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    tracing::info!(%admin_id, user_id = %id, role = %payload.role, "role changed");
    Ok(Json(user.into()))
}

/// admin_update_status
///
/// [Admin Route] Bans or reinstates a user. Banning also ends their session.
#[utoipa::path(
    put,
    path = "/api/v1/admin/users/{id}/status",
    tag = "admin",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = UpdateUserStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = UserProfile),
        (status = 400, description = "Cannot change own status"),
        (status = 404, description = "User not found")
    )
)]
pub async fn admin_update_status(
    AuthUser { id: admin_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserStatusRequest>,
) -> AppResult<Json<UserProfile>> {
    if id == admin_id {
        return Err(AppError::bad_request("You cannot change your own status"));
    }
    let user = state
        .repo
        .set_user_status(id, payload.status)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    tracing::info!(%admin_id, user_id = %id, status = ?payload.status, "user status changed");
    Ok(Json(user.into()))
}

/// admin_delete_user
///
/// [Admin Route] Permanently removes an account and everything it owns.
#[utoipa::path(
    delete,
    path = "/api/v1/admin/users/{id}",
    tag = "admin",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 204, description = "User deleted"),
        (status = 400, description = "Cannot delete yourself"),
        (status = 404, description = "User not found")
    )
)]
pub async fn admin_delete_user(
    AuthUser { id: admin_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    if id == admin_id {
        return Err(AppError::bad_request("You cannot delete your own account"));
    }
    if !state.repo.delete_user(id).await? {
        return Err(AppError::not_found("User not found"));
    }
    tracing::warn!(%admin_id, user_id = %id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}
