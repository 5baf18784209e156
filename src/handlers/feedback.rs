use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{normalize_email, required_text};
use crate::{
    AppState,
    auth::{AuthUser, MaybeAuthUser},
    error::{AppError, AppResult},
    mailer::feedback_reply_email,
    models::{
        CreateFeedbackRequest, Feedback, FeedbackReplyRequest, FeedbackStatus, Paginated, Pagination,
        UpdateFeedbackStatusRequest,
    },
};

/// FeedbackListQuery
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct FeedbackListQuery {
    pub status: Option<FeedbackStatus>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// create_feedback
///
/// [Public Route] Contact form. Signed-in senders are linked to their account.
#[utoipa::path(
    post,
    path = "/api/v1/feedback",
    tag = "feedback",
    request_body = CreateFeedbackRequest,
    responses(
        (status = 201, description = "Feedback received", body = Feedback),
        (status = 400, description = "Invalid input")
    )
)]
pub async fn create_feedback(
    MaybeAuthUser(user): MaybeAuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateFeedbackRequest>,
) -> AppResult<(StatusCode, Json<Feedback>)> {
    let payload = CreateFeedbackRequest {
        name: required_text("Name", &payload.name)?,
        email: normalize_email(&payload.email)?,
        subject: required_text("Subject", &payload.subject)?,
        message: required_text("Message", &payload.message)?,
    };

    let feedback = state
        .repo
        .create_feedback(user.map(|u| u.id), payload)
        .await?;
    tracing::info!(feedback_id = %feedback.id, "feedback received");
    Ok((StatusCode::CREATED, Json(feedback)))
}

/// my_feedback
///
/// [Authenticated Route] Feedback the caller sent while signed in.
#[utoipa::path(
    get,
    path = "/api/v1/feedback/me",
    tag = "feedback",
    responses((status = 200, description = "Own feedback", body = Vec<Feedback>))
)]
pub async fn my_feedback(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<Feedback>>> {
    Ok(Json(state.repo.list_user_feedback(id).await?))
}

/// admin_list_feedback
///
/// [Admin Route]
#[utoipa::path(
    get,
    path = "/api/v1/admin/feedback",
    tag = "admin",
    params(FeedbackListQuery),
    responses((status = 200, description = "Feedback inbox", body = Paginated<Feedback>))
)]
pub async fn admin_list_feedback(
    State(state): State<AppState>,
    Query(query): Query<FeedbackListQuery>,
) -> AppResult<Json<Paginated<Feedback>>> {
    let page = state
        .repo
        .list_feedback(query.status, Pagination::new(query.page, query.limit))
        .await?;
    Ok(Json(page))
}

/// admin_update_feedback_status
///
/// [Admin Route]
#[utoipa::path(
    put,
    path = "/api/v1/admin/feedback/{id}/status",
    tag = "admin",
    params(("id" = Uuid, Path, description = "Feedback ID")),
    request_body = UpdateFeedbackStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = Feedback),
        (status = 404, description = "Feedback not found")
    )
)]
pub async fn admin_update_feedback_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateFeedbackStatusRequest>,
) -> AppResult<Json<Feedback>> {
    let feedback = state
        .repo
        .set_feedback_status(id, payload.status)
        .await?
        .ok_or_else(|| AppError::not_found("Feedback not found"))?;
    Ok(Json(feedback))
}

/// admin_reply_feedback
///
/// [Admin Route] Emails a reply to the sender, then records it. Nothing is stored when
/// the email cannot be delivered.
#[utoipa::path(
    post,
    path = "/api/v1/admin/feedback/{id}/reply",
    tag = "admin",
    params(("id" = Uuid, Path, description = "Feedback ID")),
    request_body = FeedbackReplyRequest,
    responses(
        (status = 200, description = "Reply sent", body = Feedback),
        (status = 400, description = "Empty reply"),
        (status = 404, description = "Feedback not found"),
        (status = 502, description = "Email delivery failed")
    )
)]
pub async fn admin_reply_feedback(
    AuthUser { id: admin_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<FeedbackReplyRequest>,
) -> AppResult<Json<Feedback>> {
    let reply = required_text("Message", &payload.message)?;
    let feedback = state
        .repo
        .get_feedback(id)
        .await?
        .ok_or_else(|| AppError::not_found("Feedback not found"))?;

    state
        .mailer
        .send(feedback_reply_email(&feedback.email, &feedback.name, &feedback.subject, &reply))
        .await
        .inspect_err(|e| tracing::error!(feedback_id = %id, error = %e, "feedback reply not delivered"))?;

    let updated = state
        .repo
        .set_feedback_reply(id, reply)
        .await?
        .ok_or_else(|| AppError::not_found("Feedback not found"))?;

    tracing::info!(feedback_id = %id, %admin_id, "feedback replied");
    Ok(Json(updated))
}

/// admin_delete_feedback
///
/// [Admin Route]
#[utoipa::path(
    delete,
    path = "/api/v1/admin/feedback/{id}",
    tag = "admin",
    params(("id" = Uuid, Path, description = "Feedback ID")),
    responses(
        (status = 204, description = "Feedback deleted"),
        (status = 404, description = "Feedback not found")
    )
)]
pub async fn admin_delete_feedback(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<StatusCode> {
    if !state.repo.delete_feedback(id).await? {
        return Err(AppError::not_found("Feedback not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}
