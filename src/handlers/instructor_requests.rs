use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use uuid::Uuid;

use super::required_text;
use crate::{
    AppState,
    auth::AuthUser,
    error::{AppError, AppResult},
    mailer::{instructor_decision_email, send_best_effort},
    models::{
        CreateInstructorRequest, InstructorRequest, MediaKind, Paginated, Pagination, RequestStatus,
        ReviewInstructorRequest, Role,
    },
};

/// InstructorRequestQuery
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct InstructorRequestQuery {
    pub status: Option<RequestStatus>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Document keys must come from the caller's own document uploads.
fn validate_documents(user_id: Uuid, documents: &[String]) -> AppResult<Vec<String>> {
    if documents.is_empty() {
        return Err(AppError::bad_request("At least one supporting document is required"));
    }
    let prefix = format!("{}/{}/", MediaKind::Document.prefix(), user_id);
    documents
        .iter()
        .map(|key| {
            let key = key.trim();
            if key.starts_with(&prefix) && key.len() > prefix.len() && !key.contains("..") {
                Ok(key.to_string())
            } else {
                Err(AppError::bad_request(format!("Invalid document key: {key}")))
            }
        })
        .collect()
}

/// create_instructor_request
///
/// [Authenticated Route] A student applies for instructor privileges. A rejected
/// application may be resubmitted; pending or approved ones may not.
#[utoipa::path(
    post,
    path = "/api/v1/instructor-requests",
    tag = "instructor-requests",
    request_body = CreateInstructorRequest,
    responses(
        (status = 201, description = "Application submitted", body = InstructorRequest),
        (status = 400, description = "Missing message or documents"),
        (status = 409, description = "Already an instructor or an application is open")
    )
)]
pub async fn create_instructor_request(
    AuthUser { id, role }: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateInstructorRequest>,
) -> AppResult<(StatusCode, Json<InstructorRequest>)> {
    if role != Role::Student {
        return Err(AppError::conflict("You already have instructor privileges"));
    }
    let message = required_text("Message", &payload.message)?;
    let documents = validate_documents(id, &payload.documents)?;

    if let Some(existing) = state.repo.find_instructor_request_by_user(id).await? {
        match existing.status {
            RequestStatus::Pending => {
                return Err(AppError::conflict("Your application is already under review"));
            }
            RequestStatus::Approved => {
                return Err(AppError::conflict("Your application was already approved"));
            }
            RequestStatus::Rejected => {}
        }
    }

    let request = state.repo.upsert_instructor_request(id, message, documents).await?;
    tracing::info!(user_id = %id, request_id = %request.id, "instructor application submitted");
    Ok((StatusCode::CREATED, Json(request)))
}

/// my_instructor_request
///
/// [Authenticated Route]
#[utoipa::path(
    get,
    path = "/api/v1/instructor-requests/me",
    tag = "instructor-requests",
    responses(
        (status = 200, description = "Own application", body = InstructorRequest),
        (status = 404, description = "No application yet")
    )
)]
pub async fn my_instructor_request(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<InstructorRequest>> {
    let request = state
        .repo
        .find_instructor_request_by_user(id)
        .await?
        .ok_or_else(|| AppError::not_found("No instructor application found"))?;
    Ok(Json(request))
}

/// admin_list_instructor_requests
///
/// [Admin Route]
#[utoipa::path(
    get,
    path = "/api/v1/admin/instructor-requests",
    tag = "admin",
    params(InstructorRequestQuery),
    responses((status = 200, description = "Applications", body = Paginated<InstructorRequest>))
)]
pub async fn admin_list_instructor_requests(
    State(state): State<AppState>,
    Query(query): Query<InstructorRequestQuery>,
) -> AppResult<Json<Paginated<InstructorRequest>>> {
    let page = state
        .repo
        .list_instructor_requests(query.status, Pagination::new(query.page, query.limit))
        .await?;
    Ok(Json(page))
}

/// admin_review_instructor_request
///
/// [Admin Route] Approves or rejects a pending application. Approval promotes the
/// applicant to Instructor. The applicant is notified by email either way.
#[utoipa::path(
    put,
    path = "/api/v1/admin/instructor-requests/{id}",
    tag = "admin",
    params(("id" = Uuid, Path, description = "Instructor request ID")),
    request_body = ReviewInstructorRequest,
    responses(
        (status = 200, description = "Decision recorded", body = InstructorRequest),
        (status = 400, description = "Invalid decision or missing feedback"),
        (status = 404, description = "Request not found"),
        (status = 409, description = "Request already reviewed")
    )
)]
pub async fn admin_review_instructor_request(
    AuthUser { id: admin_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReviewInstructorRequest>,
) -> AppResult<Json<InstructorRequest>> {
    let feedback = payload
        .feedback
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty());
    match payload.status {
        RequestStatus::Pending => {
            return Err(AppError::bad_request("Decision must be approved or rejected"));
        }
        RequestStatus::Rejected if feedback.is_none() => {
            return Err(AppError::bad_request("Feedback is required when rejecting"));
        }
        _ => {}
    }

    let existing = state
        .repo
        .get_instructor_request(id)
        .await?
        .ok_or_else(|| AppError::not_found("Instructor request not found"))?;
    if existing.status != RequestStatus::Pending {
        return Err(AppError::conflict("This request has already been reviewed"));
    }

    // The repository only transitions pending rows, so a concurrent review loses here.
    let reviewed = state
        .repo
        .review_instructor_request(id, payload.status, feedback)
        .await?
        .ok_or_else(|| AppError::conflict("This request has already been reviewed"))?;

    let applicant = state.repo.get_user(reviewed.user_id).await?;
    if reviewed.status == RequestStatus::Approved {
        if let Some(user) = applicant.as_ref().filter(|u| u.role == Role::Student) {
            state.repo.set_user_role(user.id, Role::Instructor).await?;
        }
    }

    tracing::info!(request_id = %id, %admin_id, status = %reviewed.status, "instructor request reviewed");

    if let Some(user) = applicant {
        send_best_effort(
            &state.mailer,
            instructor_decision_email(
                &user.email,
                &user.name,
                reviewed.status,
                reviewed.admin_feedback.as_deref(),
            ),
        )
        .await;
    }

    Ok(Json(reviewed))
}
