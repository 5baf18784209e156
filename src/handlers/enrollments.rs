use std::collections::{HashMap, HashSet};

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use uuid::Uuid;

use super::{find_course, owned_course};
use crate::{
    AppState,
    auth::AuthUser,
    error::{AppError, AppResult},
    models::{CourseStudent, Enrollment, EnrollmentWithCourse, UserProfile, progress_percent},
};

/// enroll
///
/// [Authenticated Route] Enrolls the caller in a free published course. Paid courses go
/// through checkout instead.
#[utoipa::path(
    post,
    path = "/api/v1/courses/{id}/enroll",
    tag = "enrollments",
    params(("id" = Uuid, Path, description = "Course ID")),
    responses(
        (status = 201, description = "Enrolled", body = Enrollment),
        (status = 400, description = "Cannot enroll in your own course"),
        (status = 402, description = "Paid course, use checkout"),
        (status = 404, description = "Course not found"),
        (status = 409, description = "Already enrolled")
    )
)]
pub async fn enroll(
    AuthUser { id: user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<(StatusCode, Json<Enrollment>)> {
    let course = find_course(&state.repo, id).await?;
    if !course.is_published() {
        return Err(AppError::not_found("Course not found"));
    }
    if course.instructor_id == user_id {
        return Err(AppError::bad_request("You cannot enroll in your own course"));
    }
    if state.repo.find_enrollment(user_id, id).await?.is_some() {
        return Err(AppError::conflict("Already enrolled in this course"));
    }
    if !course.is_free() {
        return Err(AppError::PaymentRequired(
            "This course is paid; complete checkout to enroll".to_string(),
        ));
    }

    let enrollment = state
        .repo
        .create_enrollment(user_id, id)
        .await?
        .ok_or_else(|| AppError::conflict("Already enrolled in this course"))?;

    tracing::info!(%user_id, course_id = %id, "enrolled in free course");
    Ok((StatusCode::CREATED, Json(enrollment)))
}

/// my_enrollments
///
/// [Authenticated Route] The caller's enrollments, newest first, each with its course.
#[utoipa::path(
    get,
    path = "/api/v1/enrollments/me",
    tag = "enrollments",
    responses((status = 200, description = "Enrollments", body = Vec<EnrollmentWithCourse>))
)]
pub async fn my_enrollments(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<EnrollmentWithCourse>>> {
    let enrollments = state.repo.list_user_enrollments(id).await?;
    let course_ids: Vec<Uuid> = enrollments.iter().map(|e| e.course_id).collect();
    let mut courses: HashMap<Uuid, _> = state
        .repo
        .get_courses_by_ids(&course_ids)
        .await?
        .into_iter()
        .map(|c| (c.id, c))
        .collect();

    let items = enrollments
        .into_iter()
        .filter_map(|enrollment| {
            courses
                .remove(&enrollment.course_id)
                .map(|course| EnrollmentWithCourse { enrollment, course })
        })
        .collect();
    Ok(Json(items))
}

/// course_enrollment
///
/// [Authenticated Route] The caller's enrollment in one course.
#[utoipa::path(
    get,
    path = "/api/v1/courses/{id}/enrollment",
    tag = "enrollments",
    params(("id" = Uuid, Path, description = "Course ID")),
    responses(
        (status = 200, description = "Enrollment", body = Enrollment),
        (status = 404, description = "Not enrolled")
    )
)]
pub async fn course_enrollment(
    AuthUser { id: user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Enrollment>> {
    let enrollment = state
        .repo
        .find_enrollment(user_id, id)
        .await?
        .ok_or_else(|| AppError::not_found("Not enrolled in this course"))?;
    Ok(Json(enrollment))
}

/// Adds `lesson_id` to the completed set, drops ids of lessons that no longer exist and
/// recomputes progress. Completion is stamped once and never cleared.
fn apply_completion(mut enrollment: Enrollment, lesson_id: Uuid, course_lessons: &HashSet<Uuid>) -> Enrollment {
    if !enrollment.completed_lessons.contains(&lesson_id) {
        enrollment.completed_lessons.push(lesson_id);
    }
    enrollment.completed_lessons.retain(|id| course_lessons.contains(id));
    enrollment.progress = progress_percent(enrollment.completed_lessons.len(), course_lessons.len());

    if enrollment.progress == 100 && enrollment.completed_at.is_none() {
        enrollment.completed_at = Some(Utc::now());
        enrollment.certificate_id = Some(Uuid::new_v4());
    }
    enrollment
}

/// complete_lesson
///
/// [Authenticated Route] Marks a lesson done. Repeating the call is harmless.
#[utoipa::path(
    put,
    path = "/api/v1/enrollments/{id}/lessons/{lesson_id}/complete",
    tag = "enrollments",
    params(
        ("id" = Uuid, Path, description = "Enrollment ID"),
        ("lesson_id" = Uuid, Path, description = "Lesson ID")
    ),
    responses(
        (status = 200, description = "Updated progress", body = Enrollment),
        (status = 400, description = "Lesson is not part of this course"),
        (status = 403, description = "Not your enrollment"),
        (status = 404, description = "Enrollment or lesson not found")
    )
)]
pub async fn complete_lesson(
    AuthUser { id: user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path((id, lesson_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<Enrollment>> {
    let enrollment = state
        .repo
        .get_enrollment(id)
        .await?
        .ok_or_else(|| AppError::not_found("Enrollment not found"))?;
    if enrollment.user_id != user_id {
        return Err(AppError::forbidden("This is not your enrollment"));
    }

    let lesson = state
        .repo
        .get_lesson(lesson_id)
        .await?
        .ok_or_else(|| AppError::not_found("Lesson not found"))?;
    if lesson.course_id != enrollment.course_id {
        return Err(AppError::bad_request("Lesson does not belong to this course"));
    }

    let course_lessons: HashSet<Uuid> = state
        .repo
        .list_lessons(enrollment.course_id)
        .await?
        .into_iter()
        .map(|l| l.id)
        .collect();

    let was_complete = enrollment.completed_at.is_some();
    let updated = apply_completion(enrollment, lesson_id, &course_lessons);
    let saved = state
        .repo
        .save_enrollment_progress(&updated)
        .await?
        .ok_or_else(|| AppError::not_found("Enrollment not found"))?;

    if !was_complete && saved.completed_at.is_some() {
        tracing::info!(%user_id, course_id = %saved.course_id, "course completed");
    }
    Ok(Json(saved))
}

/// course_students
///
/// [Authenticated Route] The roster of a course. Owner or admin.
#[utoipa::path(
    get,
    path = "/api/v1/courses/{id}/students",
    tag = "enrollments",
    params(("id" = Uuid, Path, description = "Course ID")),
    responses(
        (status = 200, description = "Students", body = Vec<CourseStudent>),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Course not found")
    )
)]
pub async fn course_students(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<CourseStudent>>> {
    owned_course(&state.repo, &user, id).await?;

    let enrollments = state.repo.list_course_enrollments(id).await?;
    let user_ids: Vec<Uuid> = enrollments.iter().map(|e| e.user_id).collect();
    let mut students: HashMap<Uuid, UserProfile> = state
        .repo
        .get_users_by_ids(&user_ids)
        .await?
        .into_iter()
        .map(|u| (u.id, UserProfile::from(u)))
        .collect();

    let roster = enrollments
        .into_iter()
        .filter_map(|enrollment| {
            students
                .remove(&enrollment.user_id)
                .map(|student| CourseStudent { enrollment, student })
        })
        .collect();
    Ok(Json(roster))
}
