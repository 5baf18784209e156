use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;

use super::{PageQuery, find_course};
use crate::{
    AppState,
    auth::AuthUser,
    error::{AppError, AppResult},
    models::{CreateReviewRequest, Paginated, Review, UpdateReviewRequest},
};

fn validate_rating(rating: i32) -> AppResult<()> {
    if !(1..=5).contains(&rating) {
        return Err(AppError::bad_request("Rating must be between 1 and 5"));
    }
    Ok(())
}

/// list_reviews
///
/// [Public Route] Reviews of a course, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/courses/{id}/reviews",
    tag = "reviews",
    params(("id" = Uuid, Path, description = "Course ID"), PageQuery),
    responses(
        (status = 200, description = "Reviews", body = Paginated<Review>),
        (status = 404, description = "Course not found")
    )
)]
pub async fn list_reviews(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Paginated<Review>>> {
    find_course(&state.repo, id).await?;
    Ok(Json(state.repo.list_reviews(id, query.pagination()).await?))
}

/// create_review
///
/// [Authenticated Route] Rates a course the caller is enrolled in. One review per user
/// per course.
#[utoipa::path(
    post,
    path = "/api/v1/courses/{id}/reviews",
    tag = "reviews",
    params(("id" = Uuid, Path, description = "Course ID")),
    request_body = CreateReviewRequest,
    responses(
        (status = 201, description = "Review created", body = Review),
        (status = 400, description = "Rating out of range"),
        (status = 403, description = "Not enrolled"),
        (status = 404, description = "Course not found"),
        (status = 409, description = "Already reviewed")
    )
)]
pub async fn create_review(
    AuthUser { id: user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CreateReviewRequest>,
) -> AppResult<(StatusCode, Json<Review>)> {
    validate_rating(payload.rating)?;
    find_course(&state.repo, id).await?;

    if state.repo.find_enrollment(user_id, id).await?.is_none() {
        return Err(AppError::forbidden("Only enrolled students can review this course"));
    }
    if state.repo.find_review(user_id, id).await?.is_some() {
        return Err(AppError::conflict("You have already reviewed this course"));
    }

    let review = state
        .repo
        .create_review(user_id, id, payload.rating, payload.comment.trim().to_string())
        .await?;
    state.repo.refresh_course_rating(id).await?;

    Ok((StatusCode::CREATED, Json(review)))
}

/// update_review
///
/// [Authenticated Route] Edits the caller's own review.
#[utoipa::path(
    put,
    path = "/api/v1/reviews/{id}",
    tag = "reviews",
    params(("id" = Uuid, Path, description = "Review ID")),
    request_body = UpdateReviewRequest,
    responses(
        (status = 200, description = "Review updated", body = Review),
        (status = 400, description = "Rating out of range"),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Review not found")
    )
)]
pub async fn update_review(
    AuthUser { id: user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateReviewRequest>,
) -> AppResult<Json<Review>> {
    if let Some(rating) = payload.rating {
        validate_rating(rating)?;
    }
    let review = state
        .repo
        .get_review(id)
        .await?
        .ok_or_else(|| AppError::not_found("Review not found"))?;
    if review.user_id != user_id {
        return Err(AppError::forbidden("You can only edit your own review"));
    }

    let payload = UpdateReviewRequest {
        comment: payload.comment.map(|c| c.trim().to_string()),
        ..payload
    };
    let updated = state
        .repo
        .update_review(id, payload)
        .await?
        .ok_or_else(|| AppError::not_found("Review not found"))?;
    state.repo.refresh_course_rating(review.course_id).await?;

    Ok(Json(updated))
}

/// delete_review
///
/// [Authenticated Route] Removes a review. Author or admin.
#[utoipa::path(
    delete,
    path = "/api/v1/reviews/{id}",
    tag = "reviews",
    params(("id" = Uuid, Path, description = "Review ID")),
    responses(
        (status = 204, description = "Review deleted"),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Review not found")
    )
)]
pub async fn delete_review(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let review = state
        .repo
        .get_review(id)
        .await?
        .ok_or_else(|| AppError::not_found("Review not found"))?;
    user.ensure_owner_or_admin(review.user_id)?;

    if !state.repo.delete_review(id).await? {
        return Err(AppError::not_found("Review not found"));
    }
    state.repo.refresh_course_rating(review.course_id).await?;

    Ok(StatusCode::NO_CONTENT)
}
