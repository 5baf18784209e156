use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{PageQuery, can_view_course, find_course, optional_text, owned_course, required_text};
use crate::{
    AppState,
    auth::{AuthUser, MaybeAuthUser},
    error::{AppError, AppResult},
    models::{
        Course, CourseFilter, CourseLevel, CourseSort, CourseStatus, CreateCourseRequest,
        InstructorDashboardStats, NewCourse, Paginated, Pagination, Role, UpdateCourseRequest,
        UpdateCourseStatusRequest,
    },
};

const DEFAULT_LANGUAGE: &str = "English";

/// CourseListQuery
///
/// Catalog filters for GET /courses. Prices are in cents and compare against the
/// discounted price.
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct CourseListQuery {
    pub search: Option<String>,
    pub category: Option<String>,
    pub level: Option<CourseLevel>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub sort: Option<CourseSort>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// AdminCourseQuery
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct AdminCourseQuery {
    pub status: Option<CourseStatus>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn validate_pricing(price: Option<i64>, discount: Option<i32>) -> AppResult<()> {
    if price.is_some_and(|p| p < 0) {
        return Err(AppError::bad_request("Price cannot be negative"));
    }
    if discount.is_some_and(|d| !(0..=100).contains(&d)) {
        return Err(AppError::bad_request("Discount must be between 0 and 100"));
    }
    Ok(())
}

/// list_courses
///
/// [Public Route] The published catalog, filtered, sorted and paginated.
#[utoipa::path(
    get,
    path = "/api/v1/courses",
    tag = "courses",
    params(CourseListQuery),
    responses(
        (status = 200, description = "Published courses", body = Paginated<Course>),
        (status = 400, description = "Invalid price range")
    )
)]
pub async fn list_courses(
    State(state): State<AppState>,
    Query(query): Query<CourseListQuery>,
) -> AppResult<Json<Paginated<Course>>> {
    if let (Some(min), Some(max)) = (query.min_price, query.max_price) {
        if min > max {
            return Err(AppError::bad_request("min_price cannot exceed max_price"));
        }
    }

    let filter = CourseFilter {
        search: non_blank(query.search),
        category: non_blank(query.category),
        level: query.level,
        min_price: query.min_price,
        max_price: query.max_price,
        status: Some(CourseStatus::Published),
        instructor_id: None,
        sort: query.sort.unwrap_or_default(),
    };
    let page = state
        .repo
        .list_courses(filter, Pagination::new(query.page, query.limit))
        .await?;
    Ok(Json(page))
}

/// get_course
///
/// [Public Route] A single course. Drafts are only visible to their owner and admins.
#[utoipa::path(
    get,
    path = "/api/v1/courses/{id}",
    tag = "courses",
    params(("id" = Uuid, Path, description = "Course ID")),
    responses(
        (status = 200, description = "Course", body = Course),
        (status = 404, description = "Course not found")
    )
)]
pub async fn get_course(
    MaybeAuthUser(viewer): MaybeAuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Course>> {
    let course = find_course(&state.repo, id).await?;
    if !can_view_course(&course, viewer.as_ref()) {
        return Err(AppError::not_found("Course not found"));
    }
    Ok(Json(course))
}

/// create_course
///
/// [Authenticated Route] Creates a draft owned by the caller. Instructors and admins only.
#[utoipa::path(
    post,
    path = "/api/v1/courses",
    tag = "courses",
    request_body = CreateCourseRequest,
    responses(
        (status = 201, description = "Course created", body = Course),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Not an instructor")
    )
)]
pub async fn create_course(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateCourseRequest>,
) -> AppResult<(StatusCode, Json<Course>)> {
    user.require_role(&[Role::Instructor, Role::Admin])?;
    validate_pricing(Some(payload.price), payload.discount)?;

    let new_course = NewCourse {
        instructor_id: user.id,
        title: required_text("Title", &payload.title)?,
        subtitle: non_blank(payload.subtitle),
        description: required_text("Description", &payload.description)?,
        category: required_text("Category", &payload.category)?,
        level: payload.level.unwrap_or_default(),
        language: non_blank(payload.language).unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
        thumbnail: non_blank(payload.thumbnail),
        price: payload.price,
        discount: payload.discount.unwrap_or(0),
    };

    let course = state.repo.create_course(new_course).await?;
    tracing::info!(course_id = %course.id, instructor_id = %user.id, "course created");
    Ok((StatusCode::CREATED, Json(course)))
}

/// update_course
///
/// [Authenticated Route] Partial update. Owner or admin.
#[utoipa::path(
    put,
    path = "/api/v1/courses/{id}",
    tag = "courses",
    params(("id" = Uuid, Path, description = "Course ID")),
    request_body = UpdateCourseRequest,
    responses(
        (status = 200, description = "Course updated", body = Course),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Course not found")
    )
)]
pub async fn update_course(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateCourseRequest>,
) -> AppResult<Json<Course>> {
    owned_course(&state.repo, &user, id).await?;
    validate_pricing(payload.price, payload.discount)?;

    let payload = UpdateCourseRequest {
        title: optional_text("Title", payload.title)?,
        description: optional_text("Description", payload.description)?,
        category: optional_text("Category", payload.category)?,
        language: optional_text("Language", payload.language)?,
        ..payload
    };

    let course = state
        .repo
        .update_course(id, payload)
        .await?
        .ok_or_else(|| AppError::not_found("Course not found"))?;
    Ok(Json(course))
}

/// delete_course
///
/// [Authenticated Route] Deletes a course with its curriculum. Courses that already have
/// students can only be removed by an admin.
#[utoipa::path(
    delete,
    path = "/api/v1/courses/{id}",
    tag = "courses",
    params(("id" = Uuid, Path, description = "Course ID")),
    responses(
        (status = 204, description = "Course deleted"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Course not found"),
        (status = 409, description = "Course has enrollments")
    )
)]
pub async fn delete_course(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let course = owned_course(&state.repo, &user, id).await?;
    if course.enrollment_count > 0 && !user.is_admin() {
        return Err(AppError::conflict("Courses with enrolled students cannot be deleted"));
    }

    if !state.repo.delete_course(id).await? {
        return Err(AppError::not_found("Course not found"));
    }

    if let Some(thumbnail) = course.thumbnail.as_deref() {
        if let Err(e) = state.storage.delete_object(thumbnail).await {
            tracing::warn!(course_id = %id, error = %e, "failed to delete course thumbnail");
        }
    }

    tracing::info!(course_id = %id, deleted_by = %user.id, "course deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// update_course_status
///
/// [Authenticated Route] Publishes or unpublishes a course. A course needs at least one
/// lesson before it can be published.
#[utoipa::path(
    put,
    path = "/api/v1/courses/{id}/status",
    tag = "courses",
    params(("id" = Uuid, Path, description = "Course ID")),
    request_body = UpdateCourseStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = Course),
        (status = 400, description = "Course has no lessons"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Course not found")
    )
)]
pub async fn update_course_status(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateCourseStatusRequest>,
) -> AppResult<Json<Course>> {
    owned_course(&state.repo, &user, id).await?;

    if payload.status == CourseStatus::Published && state.repo.count_course_lessons(id).await? == 0 {
        return Err(AppError::bad_request("Add at least one lesson before publishing"));
    }

    let course = state
        .repo
        .set_course_status(id, payload.status)
        .await?
        .ok_or_else(|| AppError::not_found("Course not found"))?;

    tracing::info!(course_id = %id, status = ?course.status, "course status changed");
    Ok(Json(course))
}

/// instructor_courses
///
/// [Authenticated Route] The caller's own courses, drafts included.
#[utoipa::path(
    get,
    path = "/api/v1/instructor/courses",
    tag = "instructor",
    params(PageQuery),
    responses((status = 200, description = "Own courses", body = Paginated<Course>))
)]
pub async fn instructor_courses(
    user: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Paginated<Course>>> {
    user.require_role(&[Role::Instructor, Role::Admin])?;
    let filter = CourseFilter {
        instructor_id: Some(user.id),
        ..CourseFilter::default()
    };
    Ok(Json(state.repo.list_courses(filter, query.pagination()).await?))
}

/// instructor_stats
///
/// [Authenticated Route] Dashboard totals over the caller's courses.
#[utoipa::path(
    get,
    path = "/api/v1/instructor/stats",
    tag = "instructor",
    responses(
        (status = 200, description = "Instructor dashboard", body = InstructorDashboardStats),
        (status = 403, description = "Not an instructor")
    )
)]
pub async fn instructor_stats(
    user: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<InstructorDashboardStats>> {
    user.require_role(&[Role::Instructor, Role::Admin])?;
    Ok(Json(state.repo.get_instructor_stats(user.id).await?))
}

/// admin_list_courses
///
/// [Admin Route] All courses in any status.
#[utoipa::path(
    get,
    path = "/api/v1/admin/courses",
    tag = "admin",
    params(AdminCourseQuery),
    responses((status = 200, description = "Courses", body = Paginated<Course>))
)]
pub async fn admin_list_courses(
    State(state): State<AppState>,
    Query(query): Query<AdminCourseQuery>,
) -> AppResult<Json<Paginated<Course>>> {
    let filter = CourseFilter {
        status: query.status,
        search: non_blank(query.search),
        ..CourseFilter::default()
    };
    let page = state
        .repo
        .list_courses(filter, Pagination::new(query.page, query.limit))
        .await?;
    Ok(Json(page))
}
