use std::collections::{HashMap, HashSet};

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use super::{can_view_course, find_course, optional_text, owned_course, required_text};
use crate::{
    AppState,
    auth::{AuthUser, MaybeAuthUser},
    error::{AppError, AppResult},
    models::{
        Course, CreateLessonRequest, CurriculumSection, Lesson, LessonType, NewLesson, ReorderRequest,
        Section, SectionRequest, UpdateLessonRequest,
    },
    repository::RepositoryState,
};

/// Full lesson material is open to the owner, admins and enrolled students.
async fn has_full_access(repo: &RepositoryState, course: &Course, viewer: Option<&AuthUser>) -> AppResult<bool> {
    let Some(user) = viewer else {
        return Ok(false);
    };
    if user.is_owner_or_admin(course.instructor_id) {
        return Ok(true);
    }
    Ok(repo.find_enrollment(user.id, course.id).await?.is_some())
}

async fn owned_section(repo: &RepositoryState, user: &AuthUser, id: Uuid) -> AppResult<Section> {
    let section = repo
        .get_section(id)
        .await?
        .ok_or_else(|| AppError::not_found("Section not found"))?;
    owned_course(repo, user, section.course_id).await?;
    Ok(section)
}

async fn owned_lesson(repo: &RepositoryState, user: &AuthUser, id: Uuid) -> AppResult<Lesson> {
    let lesson = repo
        .get_lesson(id)
        .await?
        .ok_or_else(|| AppError::not_found("Lesson not found"))?;
    owned_course(repo, user, lesson.course_id).await?;
    Ok(lesson)
}

fn has_text(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

/// Video lessons need a video; text and raw lessons need a body.
fn validate_lesson_body(
    lesson_type: LessonType,
    content: Option<&str>,
    video_url: Option<&str>,
    duration_seconds: i32,
) -> AppResult<()> {
    if duration_seconds < 0 {
        return Err(AppError::bad_request("Duration cannot be negative"));
    }
    match lesson_type {
        LessonType::Video if !has_text(video_url) => {
            Err(AppError::bad_request("Video lessons require a video_url"))
        }
        LessonType::Text | LessonType::Raw if !has_text(content) => {
            Err(AppError::bad_request("Text lessons require content"))
        }
        _ => Ok(()),
    }
}

/// Groups lessons under their sections, both in position order.
fn build_curriculum(sections: Vec<Section>, lessons: Vec<Lesson>, full_access: bool) -> Vec<CurriculumSection> {
    let mut by_section: HashMap<Uuid, Vec<Lesson>> = HashMap::new();
    for lesson in lessons {
        let lesson = if full_access || lesson.is_preview {
            lesson
        } else {
            lesson.redacted()
        };
        by_section.entry(lesson.section_id).or_default().push(lesson);
    }

    let mut sections = sections;
    sections.sort_by_key(|s| s.position);
    sections
        .into_iter()
        .map(|section| {
            let mut lessons = by_section.remove(&section.id).unwrap_or_default();
            lessons.sort_by_key(|l| l.position);
            CurriculumSection {
                id: section.id,
                title: section.title,
                position: section.position,
                lessons,
            }
        })
        .collect()
}

/// get_curriculum
///
/// [Public Route] Sections and lessons of a course. Locked lessons keep their outline
/// but lose their content, video and resources.
#[utoipa::path(
    get,
    path = "/api/v1/courses/{id}/curriculum",
    tag = "curriculum",
    params(("id" = Uuid, Path, description = "Course ID")),
    responses(
        (status = 200, description = "Curriculum", body = Vec<CurriculumSection>),
        (status = 404, description = "Course not found")
    )
)]
pub async fn get_curriculum(
    MaybeAuthUser(viewer): MaybeAuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<CurriculumSection>>> {
    let course = find_course(&state.repo, id).await?;
    if !can_view_course(&course, viewer.as_ref()) {
        return Err(AppError::not_found("Course not found"));
    }

    let full_access = has_full_access(&state.repo, &course, viewer.as_ref()).await?;
    let sections = state.repo.list_sections(id).await?;
    let lessons = state.repo.list_lessons(id).await?;

    Ok(Json(build_curriculum(sections, lessons, full_access)))
}

/// create_section
///
/// [Authenticated Route] Appends a section to the end of the course.
#[utoipa::path(
    post,
    path = "/api/v1/courses/{id}/sections",
    tag = "curriculum",
    params(("id" = Uuid, Path, description = "Course ID")),
    request_body = SectionRequest,
    responses(
        (status = 201, description = "Section created", body = Section),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Course not found")
    )
)]
pub async fn create_section(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SectionRequest>,
) -> AppResult<(StatusCode, Json<Section>)> {
    owned_course(&state.repo, &user, id).await?;
    let title = required_text("Title", &payload.title)?;
    let section = state.repo.create_section(id, title).await?;
    Ok((StatusCode::CREATED, Json(section)))
}

/// update_section
///
/// [Authenticated Route] Renames a section.
#[utoipa::path(
    put,
    path = "/api/v1/sections/{id}",
    tag = "curriculum",
    params(("id" = Uuid, Path, description = "Section ID")),
    request_body = SectionRequest,
    responses(
        (status = 200, description = "Section updated", body = Section),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Section not found")
    )
)]
pub async fn update_section(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SectionRequest>,
) -> AppResult<Json<Section>> {
    owned_section(&state.repo, &user, id).await?;
    let title = required_text("Title", &payload.title)?;
    let section = state
        .repo
        .update_section(id, title)
        .await?
        .ok_or_else(|| AppError::not_found("Section not found"))?;
    Ok(Json(section))
}

/// delete_section
///
/// [Authenticated Route] Removes a section together with its lessons.
#[utoipa::path(
    delete,
    path = "/api/v1/sections/{id}",
    tag = "curriculum",
    params(("id" = Uuid, Path, description = "Section ID")),
    responses(
        (status = 204, description = "Section deleted"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Section not found")
    )
)]
pub async fn delete_section(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    owned_section(&state.repo, &user, id).await?;
    if !state.repo.delete_section(id).await? {
        return Err(AppError::not_found("Section not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// reorder_sections
///
/// [Authenticated Route] Sets the section order. The body must list every section of
/// the course exactly once.
#[utoipa::path(
    put,
    path = "/api/v1/courses/{id}/sections/order",
    tag = "curriculum",
    params(("id" = Uuid, Path, description = "Course ID")),
    request_body = ReorderRequest,
    responses(
        (status = 200, description = "Sections in their new order", body = Vec<Section>),
        (status = 400, description = "Not a permutation of the course's sections"),
        (status = 403, description = "Not the owner")
    )
)]
pub async fn reorder_sections(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReorderRequest>,
) -> AppResult<Json<Vec<Section>>> {
    owned_course(&state.repo, &user, id).await?;

    let existing: HashSet<Uuid> = state.repo.list_sections(id).await?.into_iter().map(|s| s.id).collect();
    let requested: HashSet<Uuid> = payload.section_ids.iter().copied().collect();
    if requested.len() != payload.section_ids.len() || requested != existing {
        return Err(AppError::bad_request(
            "section_ids must list every section of the course exactly once",
        ));
    }

    state.repo.reorder_sections(id, &payload.section_ids).await?;
    Ok(Json(state.repo.list_sections(id).await?))
}

/// create_lesson
///
/// [Authenticated Route] Appends a lesson to a section.
#[utoipa::path(
    post,
    path = "/api/v1/sections/{id}/lessons",
    tag = "curriculum",
    params(("id" = Uuid, Path, description = "Section ID")),
    request_body = CreateLessonRequest,
    responses(
        (status = 201, description = "Lesson created", body = Lesson),
        (status = 400, description = "Missing content for the lesson type"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Section not found")
    )
)]
pub async fn create_lesson(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CreateLessonRequest>,
) -> AppResult<(StatusCode, Json<Lesson>)> {
    let section = owned_section(&state.repo, &user, id).await?;

    let duration_seconds = payload.duration_seconds.unwrap_or(0);
    validate_lesson_body(
        payload.lesson_type,
        payload.content.as_deref(),
        payload.video_url.as_deref(),
        duration_seconds,
    )?;

    let lesson = state
        .repo
        .create_lesson(NewLesson {
            section_id: section.id,
            course_id: section.course_id,
            title: required_text("Title", &payload.title)?,
            lesson_type: payload.lesson_type,
            content: payload.content,
            video_url: payload.video_url,
            duration_seconds,
            is_preview: payload.is_preview.unwrap_or(false),
            resources: payload.resources.unwrap_or_default(),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(lesson)))
}

/// update_lesson
///
/// [Authenticated Route] Partial update, validated against the lesson as it will be
/// after the change.
#[utoipa::path(
    put,
    path = "/api/v1/lessons/{id}",
    tag = "curriculum",
    params(("id" = Uuid, Path, description = "Lesson ID")),
    request_body = UpdateLessonRequest,
    responses(
        (status = 200, description = "Lesson updated", body = Lesson),
        (status = 400, description = "Missing content for the lesson type"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Lesson not found")
    )
)]
pub async fn update_lesson(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLessonRequest>,
) -> AppResult<Json<Lesson>> {
    let current = owned_lesson(&state.repo, &user, id).await?;

    validate_lesson_body(
        payload.lesson_type.unwrap_or(current.lesson_type),
        payload.content.as_deref().or(current.content.as_deref()),
        payload.video_url.as_deref().or(current.video_url.as_deref()),
        payload.duration_seconds.unwrap_or(current.duration_seconds),
    )?;

    let payload = UpdateLessonRequest {
        title: optional_text("Title", payload.title)?,
        ..payload
    };
    let lesson = state
        .repo
        .update_lesson(id, payload)
        .await?
        .ok_or_else(|| AppError::not_found("Lesson not found"))?;
    Ok(Json(lesson))
}

/// delete_lesson
///
/// [Authenticated Route]
#[utoipa::path(
    delete,
    path = "/api/v1/lessons/{id}",
    tag = "curriculum",
    params(("id" = Uuid, Path, description = "Lesson ID")),
    responses(
        (status = 204, description = "Lesson deleted"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Lesson not found")
    )
)]
pub async fn delete_lesson(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    owned_lesson(&state.repo, &user, id).await?;
    if !state.repo.delete_lesson(id).await? {
        return Err(AppError::not_found("Lesson not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// get_lesson
///
/// [Public Route] One lesson with its material. Preview lessons of a visible course are
/// open to everyone; the rest need an enrollment (or ownership).
#[utoipa::path(
    get,
    path = "/api/v1/lessons/{id}",
    tag = "curriculum",
    params(("id" = Uuid, Path, description = "Lesson ID")),
    responses(
        (status = 200, description = "Lesson", body = Lesson),
        (status = 403, description = "Enroll to unlock this lesson"),
        (status = 404, description = "Lesson not found")
    )
)]
pub async fn get_lesson(
    MaybeAuthUser(viewer): MaybeAuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Lesson>> {
    let lesson = state
        .repo
        .get_lesson(id)
        .await?
        .ok_or_else(|| AppError::not_found("Lesson not found"))?;
    let course = find_course(&state.repo, lesson.course_id).await?;
    if !can_view_course(&course, viewer.as_ref()) {
        return Err(AppError::not_found("Lesson not found"));
    }

    if !lesson.is_preview && !has_full_access(&state.repo, &course, viewer.as_ref()).await? {
        return Err(AppError::forbidden("Enroll in this course to unlock the lesson"));
    }
    Ok(Json(lesson))
}
