mod common;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::Utc;
use common::{
    WEBHOOK_SECRET, auth, create_test_state, create_test_state_with, seed_course, seed_lesson,
    seed_published_course, seed_user,
};
use serde_json::json;
use skill_up::{
    MockMailer, MockPaymentGateway, MockStorageService,
    auth::MaybeAuthUser,
    error::AppError,
    handlers::{
        PageQuery, admin, courses, curriculum, enrollments, feedback, instructor_requests,
        payments, reviews, users,
    },
    models::{
        CourseLevel, CourseStatus, CreateCourseRequest, CreateFeedbackRequest,
        CreateInstructorRequest, CreateLessonRequest, CreateReviewRequest, FeedbackReplyRequest,
        FeedbackStatus, LessonType, PaymentStatus, ReorderRequest, RequestStatus,
        ReviewInstructorRequest, Role, SectionRequest, UpdateCourseRequest,
        UpdateCourseStatusRequest, UpdateLessonRequest, UpdateReviewRequest, UpdateRoleRequest,
        UpdateUserStatusRequest, UserStatus,
    },
    payments::sign_payload,
};
use uuid::Uuid;

fn status_of(err: AppError) -> StatusCode {
    err.into_response().status()
}

fn course_request(title: &str, price: i64) -> CreateCourseRequest {
    CreateCourseRequest {
        title: title.to_string(),
        subtitle: Some("A practical introduction".to_string()),
        description: "Hands-on lessons with exercises".to_string(),
        category: "Programming".to_string(),
        level: None,
        language: None,
        thumbnail: None,
        price,
        discount: None,
    }
}

// --- COURSES ---

#[tokio::test]
async fn test_create_course_requires_instructor_and_applies_defaults() {
    let ctx = create_test_state();
    let student = seed_user(&ctx.state, "Sam", "sam@example.com", Role::Student).await;
    let instructor = seed_user(&ctx.state, "Tess", "tess@example.com", Role::Instructor).await;

    let err = courses::create_course(
        auth(&student),
        State(ctx.state.clone()),
        Json(course_request("Rust 101", 0)),
    )
    .await
    .unwrap_err();
    assert_eq!(status_of(err), StatusCode::FORBIDDEN);

    let (status, Json(course)) = courses::create_course(
        auth(&instructor),
        State(ctx.state.clone()),
        Json(course_request("Rust 101", 4900)),
    )
    .await
    .unwrap();

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(course.instructor_id, instructor.id);
    assert_eq!(course.status, CourseStatus::Draft);
    assert_eq!(course.level, CourseLevel::AllLevels);
    assert_eq!(course.language, "English");
    assert_eq!(course.discount, 0);
}

#[tokio::test]
async fn test_create_course_validates_pricing() {
    let ctx = create_test_state();
    let instructor = seed_user(&ctx.state, "Tess", "tess@example.com", Role::Instructor).await;

    let negative = courses::create_course(
        auth(&instructor),
        State(ctx.state.clone()),
        Json(course_request("Cheap", -1)),
    )
    .await
    .unwrap_err();
    assert_eq!(status_of(negative), StatusCode::BAD_REQUEST);

    let mut over_discounted = course_request("Discounted", 1000);
    over_discounted.discount = Some(101);
    let err = courses::create_course(auth(&instructor), State(ctx.state.clone()), Json(over_discounted))
        .await
        .unwrap_err();
    assert_eq!(status_of(err), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_publishing_requires_a_lesson() {
    let ctx = create_test_state();
    let instructor = seed_user(&ctx.state, "Tess", "tess@example.com", Role::Instructor).await;
    let course = seed_course(&ctx.state, &instructor, "Empty course", 0).await;

    let err = courses::update_course_status(
        auth(&instructor),
        State(ctx.state.clone()),
        Path(course.id),
        Json(UpdateCourseStatusRequest {
            status: CourseStatus::Published,
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(status_of(err), StatusCode::BAD_REQUEST);

    let section = ctx.state.repo.create_section(course.id, "Intro".to_string()).await.unwrap();
    seed_lesson(&ctx.state, &section, "Hello", true).await;

    let Json(published) = courses::update_course_status(
        auth(&instructor),
        State(ctx.state.clone()),
        Path(course.id),
        Json(UpdateCourseStatusRequest {
            status: CourseStatus::Published,
        }),
    )
    .await
    .unwrap();
    assert_eq!(published.status, CourseStatus::Published);
    assert!(published.published_at.is_some());
}

#[tokio::test]
async fn test_drafts_are_hidden_from_the_catalog_and_strangers() {
    let ctx = create_test_state();
    let instructor = seed_user(&ctx.state, "Tess", "tess@example.com", Role::Instructor).await;
    let stranger = seed_user(&ctx.state, "Stan", "stan@example.com", Role::Student).await;
    let draft = seed_course(&ctx.state, &instructor, "Work in progress", 0).await;
    let (published, _, _) = seed_published_course(&ctx.state, &instructor, "Finished", 0).await;

    let Json(page) = courses::list_courses(State(ctx.state.clone()), Query(Default::default()))
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].id, published.id);

    let err = courses::get_course(
        MaybeAuthUser(Some(auth(&stranger))),
        State(ctx.state.clone()),
        Path(draft.id),
    )
    .await
    .unwrap_err();
    assert_eq!(status_of(err), StatusCode::NOT_FOUND);

    let Json(own) = courses::get_course(
        MaybeAuthUser(Some(auth(&instructor))),
        State(ctx.state.clone()),
        Path(draft.id),
    )
    .await
    .unwrap();
    assert_eq!(own.id, draft.id);
}

#[tokio::test]
async fn test_list_courses_filters_and_validates_price_range() {
    let ctx = create_test_state();
    let instructor = seed_user(&ctx.state, "Tess", "tess@example.com", Role::Instructor).await;
    seed_published_course(&ctx.state, &instructor, "Rust for Beginners", 0).await;
    seed_published_course(&ctx.state, &instructor, "Advanced Rust", 9900).await;
    seed_published_course(&ctx.state, &instructor, "Cooking Basics", 1500).await;

    let Json(page) = courses::list_courses(
        State(ctx.state.clone()),
        Query(courses::CourseListQuery {
            search: Some("rust".to_string()),
            ..Default::default()
        }),
    )
    .await
    .unwrap();
    assert_eq!(page.total, 2);

    let Json(page) = courses::list_courses(
        State(ctx.state.clone()),
        Query(courses::CourseListQuery {
            min_price: Some(1000),
            max_price: Some(5000),
            ..Default::default()
        }),
    )
    .await
    .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].title, "Cooking Basics");

    let err = courses::list_courses(
        State(ctx.state.clone()),
        Query(courses::CourseListQuery {
            min_price: Some(5000),
            max_price: Some(1000),
            ..Default::default()
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(status_of(err), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_only_the_owner_or_admin_can_update_a_course() {
    let ctx = create_test_state();
    let owner = seed_user(&ctx.state, "Tess", "tess@example.com", Role::Instructor).await;
    let rival = seed_user(&ctx.state, "Rita", "rita@example.com", Role::Instructor).await;
    let admin_user = seed_user(&ctx.state, "Ada", "admin@example.com", Role::Admin).await;
    let course = seed_course(&ctx.state, &owner, "Original", 1000).await;

    let update = || UpdateCourseRequest {
        title: Some("Renamed".to_string()),
        ..Default::default()
    };

    let err = courses::update_course(auth(&rival), State(ctx.state.clone()), Path(course.id), Json(update()))
        .await
        .unwrap_err();
    assert_eq!(status_of(err), StatusCode::FORBIDDEN);

    let Json(updated) =
        courses::update_course(auth(&admin_user), State(ctx.state.clone()), Path(course.id), Json(update()))
            .await
            .unwrap();
    assert_eq!(updated.title, "Renamed");
    assert_eq!(updated.price, 1000);
}

#[tokio::test]
async fn test_delete_course_with_students_needs_admin() {
    let ctx = create_test_state();
    let instructor = seed_user(&ctx.state, "Tess", "tess@example.com", Role::Instructor).await;
    let student = seed_user(&ctx.state, "Sam", "sam@example.com", Role::Student).await;
    let admin_user = seed_user(&ctx.state, "Ada", "admin@example.com", Role::Admin).await;
    let (course, _, _) = seed_published_course(&ctx.state, &instructor, "Popular", 0).await;
    ctx.state
        .repo
        .update_course(
            course.id,
            UpdateCourseRequest {
                thumbnail: Some("thumbnails/x/cover.png".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    enrollments::enroll(auth(&student), State(ctx.state.clone()), Path(course.id))
        .await
        .unwrap();

    let err = courses::delete_course(auth(&instructor), State(ctx.state.clone()), Path(course.id))
        .await
        .unwrap_err();
    assert_eq!(status_of(err), StatusCode::CONFLICT);

    let status = courses::delete_course(auth(&admin_user), State(ctx.state.clone()), Path(course.id))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(ctx.state.repo.get_course(course.id).await.unwrap().is_none());
    assert!(ctx.state.repo.find_enrollment(student.id, course.id).await.unwrap().is_none());
    assert_eq!(ctx.storage.deleted_keys(), vec!["thumbnails/x/cover.png".to_string()]);
}

#[tokio::test]
async fn test_instructor_dashboard() {
    let ctx = create_test_state();
    let instructor = seed_user(&ctx.state, "Tess", "tess@example.com", Role::Instructor).await;
    let student = seed_user(&ctx.state, "Sam", "sam@example.com", Role::Student).await;
    let (course, _, _) = seed_published_course(&ctx.state, &instructor, "Live", 0).await;
    seed_course(&ctx.state, &instructor, "Draft", 0).await;
    enrollments::enroll(auth(&student), State(ctx.state.clone()), Path(course.id))
        .await
        .unwrap();

    let Json(mine) = courses::instructor_courses(auth(&instructor), State(ctx.state.clone()), Query(PageQuery::default()))
        .await
        .unwrap();
    assert_eq!(mine.total, 2, "drafts are included in the instructor's own list");

    let Json(stats) = courses::instructor_stats(auth(&instructor), State(ctx.state.clone()))
        .await
        .unwrap();
    assert_eq!(stats.total_courses, 2);
    assert_eq!(stats.published_courses, 1);
    assert_eq!(stats.total_students, 1);
}

// --- CURRICULUM ---

#[tokio::test]
async fn test_curriculum_redacts_locked_lessons_for_visitors() {
    let ctx = create_test_state();
    let instructor = seed_user(&ctx.state, "Tess", "tess@example.com", Role::Instructor).await;
    let student = seed_user(&ctx.state, "Sam", "sam@example.com", Role::Student).await;
    let (course, _, lessons) = seed_published_course(&ctx.state, &instructor, "Outline", 0).await;

    let Json(outline) = curriculum::get_curriculum(MaybeAuthUser(None), State(ctx.state.clone()), Path(course.id))
        .await
        .unwrap();
    assert_eq!(outline.len(), 1);
    let visible = &outline[0].lessons;
    assert_eq!(visible.len(), 2);
    assert!(visible[0].content.is_some(), "previews keep their content");
    assert!(visible[1].content.is_none(), "locked lessons are redacted");
    assert_eq!(visible[1].title, "Deep dive");

    let err = curriculum::get_lesson(MaybeAuthUser(None), State(ctx.state.clone()), Path(lessons[1].id))
        .await
        .unwrap_err();
    assert_eq!(status_of(err), StatusCode::FORBIDDEN);

    let Json(preview) = curriculum::get_lesson(MaybeAuthUser(None), State(ctx.state.clone()), Path(lessons[0].id))
        .await
        .unwrap();
    assert!(preview.content.is_some());

    enrollments::enroll(auth(&student), State(ctx.state.clone()), Path(course.id))
        .await
        .unwrap();
    let Json(full) = curriculum::get_curriculum(
        MaybeAuthUser(Some(auth(&student))),
        State(ctx.state.clone()),
        Path(course.id),
    )
    .await
    .unwrap();
    assert!(full[0].lessons.iter().all(|l| l.content.is_some()));
}

#[tokio::test]
async fn test_section_crud_and_reorder() {
    let ctx = create_test_state();
    let instructor = seed_user(&ctx.state, "Tess", "tess@example.com", Role::Instructor).await;
    let course = seed_course(&ctx.state, &instructor, "Structured", 0).await;

    let mut ids = Vec::new();
    for title in ["One", "Two", "Three"] {
        let (status, Json(section)) = curriculum::create_section(
            auth(&instructor),
            State(ctx.state.clone()),
            Path(course.id),
            Json(SectionRequest {
                title: title.to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        ids.push(section.id);
    }

    let reversed: Vec<Uuid> = ids.iter().rev().copied().collect();
    let Json(sections) = curriculum::reorder_sections(
        auth(&instructor),
        State(ctx.state.clone()),
        Path(course.id),
        Json(ReorderRequest {
            section_ids: reversed.clone(),
        }),
    )
    .await
    .unwrap();
    let order: Vec<Uuid> = sections.iter().map(|s| s.id).collect();
    assert_eq!(order, reversed);
    assert_eq!(sections.iter().map(|s| s.position).collect::<Vec<_>>(), vec![1, 2, 3]);

    // Missing or duplicated ids are rejected.
    let err = curriculum::reorder_sections(
        auth(&instructor),
        State(ctx.state.clone()),
        Path(course.id),
        Json(ReorderRequest {
            section_ids: vec![ids[0], ids[0], ids[1]],
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(status_of(err), StatusCode::BAD_REQUEST);

    let Json(renamed) = curriculum::update_section(
        auth(&instructor),
        State(ctx.state.clone()),
        Path(ids[1]),
        Json(SectionRequest {
            title: "Middle".to_string(),
        }),
    )
    .await
    .unwrap();
    assert_eq!(renamed.title, "Middle");

    let status = curriculum::delete_section(auth(&instructor), State(ctx.state.clone()), Path(ids[1]))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(ctx.state.repo.list_sections(course.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_lesson_validation_and_ownership() {
    let ctx = create_test_state();
    let instructor = seed_user(&ctx.state, "Tess", "tess@example.com", Role::Instructor).await;
    let rival = seed_user(&ctx.state, "Rita", "rita@example.com", Role::Instructor).await;
    let course = seed_course(&ctx.state, &instructor, "Videos", 0).await;
    let section = ctx.state.repo.create_section(course.id, "Clips".to_string()).await.unwrap();

    let video_without_url = CreateLessonRequest {
        title: "Clip".to_string(),
        lesson_type: LessonType::Video,
        content: None,
        video_url: None,
        duration_seconds: Some(300),
        is_preview: None,
        resources: None,
    };
    let err = curriculum::create_lesson(
        auth(&instructor),
        State(ctx.state.clone()),
        Path(section.id),
        Json(video_without_url.clone()),
    )
    .await
    .unwrap_err();
    assert_eq!(status_of(err), StatusCode::BAD_REQUEST);

    let with_url = CreateLessonRequest {
        video_url: Some("videos/tess/clip.mp4".to_string()),
        ..video_without_url
    };
    let err = curriculum::create_lesson(
        auth(&rival),
        State(ctx.state.clone()),
        Path(section.id),
        Json(with_url.clone()),
    )
    .await
    .unwrap_err();
    assert_eq!(status_of(err), StatusCode::FORBIDDEN);

    let (status, Json(lesson)) =
        curriculum::create_lesson(auth(&instructor), State(ctx.state.clone()), Path(section.id), Json(with_url))
            .await
            .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(lesson.course_id, course.id);
    assert!(!lesson.is_preview);

    // Switching to text without content leaves an invalid lesson.
    let err = curriculum::update_lesson(
        auth(&instructor),
        State(ctx.state.clone()),
        Path(lesson.id),
        Json(UpdateLessonRequest {
            lesson_type: Some(LessonType::Text),
            ..Default::default()
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(status_of(err), StatusCode::BAD_REQUEST);

    let Json(updated) = curriculum::update_lesson(
        auth(&instructor),
        State(ctx.state.clone()),
        Path(lesson.id),
        Json(UpdateLessonRequest {
            is_preview: Some(true),
            ..Default::default()
        }),
    )
    .await
    .unwrap();
    assert!(updated.is_preview);

    let status = curriculum::delete_lesson(auth(&instructor), State(ctx.state.clone()), Path(lesson.id))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);
}

// --- ENROLLMENTS ---

#[tokio::test]
async fn test_enroll_rules() {
    let ctx = create_test_state();
    let instructor = seed_user(&ctx.state, "Tess", "tess@example.com", Role::Instructor).await;
    let student = seed_user(&ctx.state, "Sam", "sam@example.com", Role::Student).await;
    let (free, _, _) = seed_published_course(&ctx.state, &instructor, "Free", 0).await;
    let (paid, _, _) = seed_published_course(&ctx.state, &instructor, "Paid", 2500).await;
    let draft = seed_course(&ctx.state, &instructor, "Draft", 0).await;

    let (status, Json(enrollment)) = enrollments::enroll(auth(&student), State(ctx.state.clone()), Path(free.id))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(enrollment.progress, 0);
    assert_eq!(
        ctx.state.repo.get_course(free.id).await.unwrap().unwrap().enrollment_count,
        1
    );

    let again = enrollments::enroll(auth(&student), State(ctx.state.clone()), Path(free.id))
        .await
        .unwrap_err();
    assert_eq!(status_of(again), StatusCode::CONFLICT);

    let pay = enrollments::enroll(auth(&student), State(ctx.state.clone()), Path(paid.id))
        .await
        .unwrap_err();
    assert_eq!(status_of(pay), StatusCode::PAYMENT_REQUIRED);

    let hidden = enrollments::enroll(auth(&student), State(ctx.state.clone()), Path(draft.id))
        .await
        .unwrap_err();
    assert_eq!(status_of(hidden), StatusCode::NOT_FOUND);

    let own = enrollments::enroll(auth(&instructor), State(ctx.state.clone()), Path(free.id))
        .await
        .unwrap_err();
    assert_eq!(status_of(own), StatusCode::BAD_REQUEST);

    let Json(mine) = enrollments::my_enrollments(auth(&student), State(ctx.state.clone()))
        .await
        .unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].course.id, free.id);
}

#[tokio::test]
async fn test_completing_lessons_tracks_progress_and_certificate() {
    let ctx = create_test_state();
    let instructor = seed_user(&ctx.state, "Tess", "tess@example.com", Role::Instructor).await;
    let student = seed_user(&ctx.state, "Sam", "sam@example.com", Role::Student).await;
    let other = seed_user(&ctx.state, "Olly", "olly@example.com", Role::Student).await;
    let (course, _, lessons) = seed_published_course(&ctx.state, &instructor, "Tracked", 0).await;
    let (elsewhere, _, foreign) = seed_published_course(&ctx.state, &instructor, "Elsewhere", 0).await;

    let (_, Json(enrollment)) = enrollments::enroll(auth(&student), State(ctx.state.clone()), Path(course.id))
        .await
        .unwrap();

    let Json(half) = enrollments::complete_lesson(
        auth(&student),
        State(ctx.state.clone()),
        Path((enrollment.id, lessons[0].id)),
    )
    .await
    .unwrap();
    assert_eq!(half.progress, 50);
    assert!(half.completed_at.is_none());

    // Completing the same lesson twice changes nothing.
    let Json(repeat) = enrollments::complete_lesson(
        auth(&student),
        State(ctx.state.clone()),
        Path((enrollment.id, lessons[0].id)),
    )
    .await
    .unwrap();
    assert_eq!(repeat.completed_lessons.len(), 1);

    let Json(done) = enrollments::complete_lesson(
        auth(&student),
        State(ctx.state.clone()),
        Path((enrollment.id, lessons[1].id)),
    )
    .await
    .unwrap();
    assert_eq!(done.progress, 100);
    assert!(done.completed_at.is_some());
    assert!(done.certificate_id.is_some());

    let err = enrollments::complete_lesson(
        auth(&other),
        State(ctx.state.clone()),
        Path((enrollment.id, lessons[0].id)),
    )
    .await
    .unwrap_err();
    assert_eq!(status_of(err), StatusCode::FORBIDDEN);

    let err = enrollments::complete_lesson(
        auth(&student),
        State(ctx.state.clone()),
        Path((enrollment.id, foreign[0].id)),
    )
    .await
    .unwrap_err();
    assert_eq!(status_of(err), StatusCode::BAD_REQUEST);
    assert_ne!(elsewhere.id, course.id);
}

#[tokio::test]
async fn test_course_roster_is_for_the_owner() {
    let ctx = create_test_state();
    let instructor = seed_user(&ctx.state, "Tess", "tess@example.com", Role::Instructor).await;
    let student = seed_user(&ctx.state, "Sam", "sam@example.com", Role::Student).await;
    let (course, _, _) = seed_published_course(&ctx.state, &instructor, "Roster", 0).await;
    enrollments::enroll(auth(&student), State(ctx.state.clone()), Path(course.id))
        .await
        .unwrap();

    let Json(roster) = enrollments::course_students(auth(&instructor), State(ctx.state.clone()), Path(course.id))
        .await
        .unwrap();
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].student.email, "sam@example.com");

    let err = enrollments::course_students(auth(&student), State(ctx.state.clone()), Path(course.id))
        .await
        .unwrap_err();
    assert_eq!(status_of(err), StatusCode::FORBIDDEN);

    let Json(own) = enrollments::course_enrollment(auth(&student), State(ctx.state.clone()), Path(course.id))
        .await
        .unwrap();
    assert_eq!(own.user_id, student.id);

    let err = enrollments::course_enrollment(auth(&instructor), State(ctx.state.clone()), Path(course.id))
        .await
        .unwrap_err();
    assert_eq!(status_of(err), StatusCode::NOT_FOUND);
}

// --- REVIEWS ---

#[tokio::test]
async fn test_reviews_require_enrollment_and_update_the_rating() {
    let ctx = create_test_state();
    let instructor = seed_user(&ctx.state, "Tess", "tess@example.com", Role::Instructor).await;
    let alice = seed_user(&ctx.state, "Alice", "alice@example.com", Role::Student).await;
    let bob = seed_user(&ctx.state, "Bob", "bob@example.com", Role::Student).await;
    let (course, _, _) = seed_published_course(&ctx.state, &instructor, "Rated", 0).await;

    let review = |rating: i32| CreateReviewRequest {
        rating,
        comment: "Clear and well paced".to_string(),
    };

    let err = reviews::create_review(auth(&alice), State(ctx.state.clone()), Path(course.id), Json(review(5)))
        .await
        .unwrap_err();
    assert_eq!(status_of(err), StatusCode::FORBIDDEN);

    for user in [&alice, &bob] {
        enrollments::enroll(auth(user), State(ctx.state.clone()), Path(course.id))
            .await
            .unwrap();
    }

    let err = reviews::create_review(auth(&alice), State(ctx.state.clone()), Path(course.id), Json(review(6)))
        .await
        .unwrap_err();
    assert_eq!(status_of(err), StatusCode::BAD_REQUEST);

    let (status, Json(first)) =
        reviews::create_review(auth(&alice), State(ctx.state.clone()), Path(course.id), Json(review(5)))
            .await
            .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    reviews::create_review(auth(&bob), State(ctx.state.clone()), Path(course.id), Json(review(2)))
        .await
        .unwrap();

    let dup = reviews::create_review(auth(&alice), State(ctx.state.clone()), Path(course.id), Json(review(4)))
        .await
        .unwrap_err();
    assert_eq!(status_of(dup), StatusCode::CONFLICT);

    let rated = ctx.state.repo.get_course(course.id).await.unwrap().unwrap();
    assert_eq!(rated.rating_count, 2);
    assert!((rated.rating_average - 3.5).abs() < f64::EPSILON);

    // Only the author edits; the owner of the course cannot.
    let err = reviews::update_review(
        auth(&instructor),
        State(ctx.state.clone()),
        Path(first.id),
        Json(UpdateReviewRequest {
            rating: Some(1),
            comment: None,
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(status_of(err), StatusCode::FORBIDDEN);

    reviews::update_review(
        auth(&alice),
        State(ctx.state.clone()),
        Path(first.id),
        Json(UpdateReviewRequest {
            rating: Some(3),
            comment: None,
        }),
    )
    .await
    .unwrap();
    let rated = ctx.state.repo.get_course(course.id).await.unwrap().unwrap();
    assert!((rated.rating_average - 2.5).abs() < f64::EPSILON);

    let status = reviews::delete_review(auth(&alice), State(ctx.state.clone()), Path(first.id))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);

    let Json(page) = reviews::list_reviews(State(ctx.state.clone()), Path(course.id), Query(PageQuery::default()))
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].author_name.as_deref(), Some("Bob"));
}

// --- FEEDBACK ---

fn feedback_request() -> CreateFeedbackRequest {
    CreateFeedbackRequest {
        name: "Visitor".to_string(),
        email: "visitor@example.com".to_string(),
        subject: "Video will not load".to_string(),
        message: "Lesson 3 stays black.".to_string(),
    }
}

#[tokio::test]
async fn test_feedback_reply_is_emailed_then_stored() {
    let ctx = create_test_state();
    let admin_user = seed_user(&ctx.state, "Ada", "admin@example.com", Role::Admin).await;

    let (status, Json(created)) =
        feedback::create_feedback(MaybeAuthUser(None), State(ctx.state.clone()), Json(feedback_request()))
            .await
            .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created.status, FeedbackStatus::New);
    assert!(created.user_id.is_none());

    let Json(replied) = feedback::admin_reply_feedback(
        auth(&admin_user),
        State(ctx.state.clone()),
        Path(created.id),
        Json(FeedbackReplyRequest {
            message: "Fixed, please try again.".to_string(),
        }),
    )
    .await
    .unwrap();
    assert_eq!(replied.status, FeedbackStatus::Replied);
    assert_eq!(replied.reply.as_deref(), Some("Fixed, please try again."));

    let sent = ctx.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "visitor@example.com");
    assert_eq!(sent[0].subject, "Re: Video will not load");
}

#[tokio::test]
async fn test_feedback_reply_is_not_stored_when_delivery_fails() {
    let ctx = create_test_state_with(
        MockMailer::new_failing(),
        MockStorageService::new(),
        MockPaymentGateway::new(),
    );
    let admin_user = seed_user(&ctx.state, "Ada", "admin@example.com", Role::Admin).await;
    let (_, Json(created)) =
        feedback::create_feedback(MaybeAuthUser(None), State(ctx.state.clone()), Json(feedback_request()))
            .await
            .unwrap();

    let err = feedback::admin_reply_feedback(
        auth(&admin_user),
        State(ctx.state.clone()),
        Path(created.id),
        Json(FeedbackReplyRequest {
            message: "Fixed.".to_string(),
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(status_of(err), StatusCode::BAD_GATEWAY);

    let stored = ctx.state.repo.get_feedback(created.id).await.unwrap().unwrap();
    assert_eq!(stored.status, FeedbackStatus::New);
    assert!(stored.reply.is_none());
}

#[tokio::test]
async fn test_feedback_moderation() {
    let ctx = create_test_state();
    let student = seed_user(&ctx.state, "Sam", "sam@example.com", Role::Student).await;

    let err = feedback::create_feedback(
        MaybeAuthUser(None),
        State(ctx.state.clone()),
        Json(CreateFeedbackRequest {
            email: "not-an-email".to_string(),
            ..feedback_request()
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(status_of(err), StatusCode::BAD_REQUEST);

    let (_, Json(linked)) = feedback::create_feedback(
        MaybeAuthUser(Some(auth(&student))),
        State(ctx.state.clone()),
        Json(feedback_request()),
    )
    .await
    .unwrap();
    assert_eq!(linked.user_id, Some(student.id));

    let Json(mine) = feedback::my_feedback(auth(&student), State(ctx.state.clone()))
        .await
        .unwrap();
    assert_eq!(mine.len(), 1);

    let Json(read) = feedback::admin_update_feedback_status(
        State(ctx.state.clone()),
        Path(linked.id),
        Json(skill_up::models::UpdateFeedbackStatusRequest {
            status: FeedbackStatus::Read,
        }),
    )
    .await
    .unwrap();
    assert_eq!(read.status, FeedbackStatus::Read);

    let Json(new_only) = feedback::admin_list_feedback(
        State(ctx.state.clone()),
        Query(feedback::FeedbackListQuery {
            status: Some(FeedbackStatus::New),
            ..Default::default()
        }),
    )
    .await
    .unwrap();
    assert_eq!(new_only.total, 0);

    let status = feedback::admin_delete_feedback(State(ctx.state.clone()), Path(linked.id))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);
    let err = feedback::admin_delete_feedback(State(ctx.state.clone()), Path(linked.id))
        .await
        .unwrap_err();
    assert_eq!(status_of(err), StatusCode::NOT_FOUND);
}

// --- INSTRUCTOR REQUESTS ---

fn application(user_id: Uuid) -> CreateInstructorRequest {
    CreateInstructorRequest {
        message: "Ten years of teaching backend development.".to_string(),
        documents: vec![format!("documents/{user_id}/cv.pdf")],
    }
}

#[tokio::test]
async fn test_instructor_application_approval_promotes_the_student() {
    let ctx = create_test_state();
    let student = seed_user(&ctx.state, "Sam", "sam@example.com", Role::Student).await;
    let admin_user = seed_user(&ctx.state, "Ada", "admin@example.com", Role::Admin).await;

    let (status, Json(request)) = instructor_requests::create_instructor_request(
        auth(&student),
        State(ctx.state.clone()),
        Json(application(student.id)),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(request.status, RequestStatus::Pending);

    let dup = instructor_requests::create_instructor_request(
        auth(&student),
        State(ctx.state.clone()),
        Json(application(student.id)),
    )
    .await
    .unwrap_err();
    assert_eq!(status_of(dup), StatusCode::CONFLICT);

    let Json(approved) = instructor_requests::admin_review_instructor_request(
        auth(&admin_user),
        State(ctx.state.clone()),
        Path(request.id),
        Json(ReviewInstructorRequest {
            status: RequestStatus::Approved,
            feedback: None,
        }),
    )
    .await
    .unwrap();
    assert_eq!(approved.status, RequestStatus::Approved);
    assert!(approved.reviewed_at.is_some());

    let promoted = ctx.state.repo.get_user(student.id).await.unwrap().unwrap();
    assert_eq!(promoted.role, Role::Instructor);
    assert!(ctx.mailer.sent().iter().any(|e| e.to == "sam@example.com"));

    let again = instructor_requests::admin_review_instructor_request(
        auth(&admin_user),
        State(ctx.state.clone()),
        Path(request.id),
        Json(ReviewInstructorRequest {
            status: RequestStatus::Rejected,
            feedback: Some("Changed my mind".to_string()),
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(status_of(again), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_rejected_application_can_be_resubmitted() {
    let ctx = create_test_state();
    let student = seed_user(&ctx.state, "Sam", "sam@example.com", Role::Student).await;
    let admin_user = seed_user(&ctx.state, "Ada", "admin@example.com", Role::Admin).await;
    let (_, Json(request)) = instructor_requests::create_instructor_request(
        auth(&student),
        State(ctx.state.clone()),
        Json(application(student.id)),
    )
    .await
    .unwrap();

    let missing_feedback = instructor_requests::admin_review_instructor_request(
        auth(&admin_user),
        State(ctx.state.clone()),
        Path(request.id),
        Json(ReviewInstructorRequest {
            status: RequestStatus::Rejected,
            feedback: Some("   ".to_string()),
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(status_of(missing_feedback), StatusCode::BAD_REQUEST);

    instructor_requests::admin_review_instructor_request(
        auth(&admin_user),
        State(ctx.state.clone()),
        Path(request.id),
        Json(ReviewInstructorRequest {
            status: RequestStatus::Rejected,
            feedback: Some("Please attach a portfolio".to_string()),
        }),
    )
    .await
    .unwrap();
    assert_eq!(
        ctx.state.repo.get_user(student.id).await.unwrap().unwrap().role,
        Role::Student
    );

    let (_, Json(resubmitted)) = instructor_requests::create_instructor_request(
        auth(&student),
        State(ctx.state.clone()),
        Json(application(student.id)),
    )
    .await
    .unwrap();
    assert_eq!(resubmitted.id, request.id);
    assert_eq!(resubmitted.status, RequestStatus::Pending);
    assert!(resubmitted.admin_feedback.is_none());

    let Json(mine) = instructor_requests::my_instructor_request(auth(&student), State(ctx.state.clone()))
        .await
        .unwrap();
    assert_eq!(mine.status, RequestStatus::Pending);
}

#[tokio::test]
async fn test_application_documents_must_be_own_uploads() {
    let ctx = create_test_state();
    let student = seed_user(&ctx.state, "Sam", "sam@example.com", Role::Student).await;
    let instructor = seed_user(&ctx.state, "Tess", "tess@example.com", Role::Instructor).await;

    let err = instructor_requests::create_instructor_request(
        auth(&student),
        State(ctx.state.clone()),
        Json(application(instructor.id)),
    )
    .await
    .unwrap_err();
    assert_eq!(status_of(err), StatusCode::BAD_REQUEST);

    let err = instructor_requests::create_instructor_request(
        auth(&instructor),
        State(ctx.state.clone()),
        Json(application(instructor.id)),
    )
    .await
    .unwrap_err();
    assert_eq!(status_of(err), StatusCode::CONFLICT);
}

// --- PAYMENTS ---

fn signed_headers(body: &[u8]) -> HeaderMap {
    let signature = sign_payload(body, WEBHOOK_SECRET, Utc::now().timestamp()).unwrap();
    let mut headers = HeaderMap::new();
    headers.insert("stripe-signature", signature.parse().unwrap());
    headers
}

#[tokio::test]
async fn test_checkout_then_webhook_enrolls_the_buyer() {
    let ctx = create_test_state();
    let instructor = seed_user(&ctx.state, "Tess", "tess@example.com", Role::Instructor).await;
    let buyer = seed_user(&ctx.state, "Bea", "bea@example.com", Role::Student).await;
    let (course, _, _) = seed_published_course(&ctx.state, &instructor, "Premium", 5000).await;
    ctx.state
        .repo
        .update_course(
            course.id,
            UpdateCourseRequest {
                discount: Some(20),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let Json(checkout) = payments::create_checkout(auth(&buyer), State(ctx.state.clone()), Path(course.id))
        .await
        .unwrap();
    assert!(checkout.checkout_url.contains(&checkout.session_id));

    let sent = ctx.payments.requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].amount, 4000, "the discounted price is charged");
    assert_eq!(sent[0].customer_email, "bea@example.com");
    assert!(sent[0].success_url.starts_with("http://localhost:3000/courses/"));

    let pending = ctx.state.repo.get_payment(checkout.payment_id).await.unwrap().unwrap();
    assert_eq!(pending.status, PaymentStatus::Pending);

    let event = json!({
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": checkout.session_id,
            "payment_status": "paid",
            "metadata": { "payment_id": checkout.payment_id.to_string() }
        }}
    })
    .to_string();

    for _ in 0..2 {
        let Json(ack) = payments::stripe_webhook(
            State(ctx.state.clone()),
            signed_headers(event.as_bytes()),
            Bytes::from(event.clone()),
        )
        .await
        .unwrap();
        assert_eq!(ack["received"], true);
    }

    let paid = ctx.state.repo.get_payment(checkout.payment_id).await.unwrap().unwrap();
    assert_eq!(paid.status, PaymentStatus::Paid);
    assert!(ctx.state.repo.find_enrollment(buyer.id, course.id).await.unwrap().is_some());
    assert_eq!(
        ctx.state.repo.get_course(course.id).await.unwrap().unwrap().enrollment_count,
        1,
        "a redelivered event does not enroll twice"
    );

    let Json(history) = payments::my_payments(auth(&buyer), State(ctx.state.clone()))
        .await
        .unwrap();
    assert_eq!(history.len(), 1);

    let Json(stats) = admin::get_admin_stats(State(ctx.state.clone())).await.unwrap();
    assert_eq!(stats.total_revenue, 4000);

    let again = payments::create_checkout(auth(&buyer), State(ctx.state.clone()), Path(course.id))
        .await
        .unwrap_err();
    assert_eq!(status_of(again), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_webhook_rejects_bad_signatures() {
    let ctx = create_test_state();
    let body = json!({"type": "payment_intent.succeeded", "data": {"object": {"id": "pi_1"}}}).to_string();

    let err = payments::stripe_webhook(State(ctx.state.clone()), HeaderMap::new(), Bytes::from(body.clone()))
        .await
        .unwrap_err();
    assert_eq!(status_of(err), StatusCode::BAD_REQUEST);

    let mut headers = signed_headers(body.as_bytes());
    let tampered = body.replace("pi_1", "pi_2");
    let err = payments::stripe_webhook(State(ctx.state.clone()), headers.clone(), Bytes::from(tampered))
        .await
        .unwrap_err();
    assert_eq!(status_of(err), StatusCode::BAD_REQUEST);

    headers.insert("stripe-signature", "t=1,v1=00".parse().unwrap());
    let err = payments::stripe_webhook(State(ctx.state.clone()), headers, Bytes::from(body))
        .await
        .unwrap_err();
    assert_eq!(status_of(err), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_failed_intent_marks_payment_failed() {
    let ctx = create_test_state();
    let instructor = seed_user(&ctx.state, "Tess", "tess@example.com", Role::Instructor).await;
    let buyer = seed_user(&ctx.state, "Bea", "bea@example.com", Role::Student).await;
    let (course, _, _) = seed_published_course(&ctx.state, &instructor, "Premium", 1200).await;

    let Json(intent) = payments::create_payment_intent(auth(&buyer), State(ctx.state.clone()), Path(course.id))
        .await
        .unwrap();
    assert!(intent.client_secret.contains("_secret_"));

    let payment = ctx.state.repo.get_payment(intent.payment_id).await.unwrap().unwrap();
    let intent_id = payment.provider_intent_id.clone().unwrap();

    let event = json!({
        "type": "payment_intent.payment_failed",
        "data": { "object": { "id": intent_id } }
    })
    .to_string();
    payments::stripe_webhook(
        State(ctx.state.clone()),
        signed_headers(event.as_bytes()),
        Bytes::from(event),
    )
    .await
    .unwrap();

    let failed = ctx.state.repo.get_payment(intent.payment_id).await.unwrap().unwrap();
    assert_eq!(failed.status, PaymentStatus::Failed);
    assert!(ctx.state.repo.find_enrollment(buyer.id, course.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_checkout_guards() {
    let ctx = create_test_state_with(
        MockMailer::new(),
        MockStorageService::new(),
        MockPaymentGateway::new_failing(),
    );
    let instructor = seed_user(&ctx.state, "Tess", "tess@example.com", Role::Instructor).await;
    let buyer = seed_user(&ctx.state, "Bea", "bea@example.com", Role::Student).await;
    let (free, _, _) = seed_published_course(&ctx.state, &instructor, "Free", 0).await;
    let (paid, _, _) = seed_published_course(&ctx.state, &instructor, "Paid", 1000).await;

    let err = payments::create_checkout(auth(&buyer), State(ctx.state.clone()), Path(free.id))
        .await
        .unwrap_err();
    assert_eq!(status_of(err), StatusCode::BAD_REQUEST);

    let err = payments::create_checkout(auth(&instructor), State(ctx.state.clone()), Path(paid.id))
        .await
        .unwrap_err();
    assert_eq!(status_of(err), StatusCode::BAD_REQUEST);

    // Provider outage: 502, and the local record is marked failed.
    let err = payments::create_checkout(auth(&buyer), State(ctx.state.clone()), Path(paid.id))
        .await
        .unwrap_err();
    assert_eq!(status_of(err), StatusCode::BAD_GATEWAY);
    let history = ctx.state.repo.list_user_payments(buyer.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, PaymentStatus::Failed);
}

// --- USERS & ADMIN ---

#[tokio::test]
async fn test_admin_user_management() {
    let ctx = create_test_state();
    let admin_user = seed_user(&ctx.state, "Ada", "admin@example.com", Role::Admin).await;
    let student = seed_user(&ctx.state, "Sam", "sam@example.com", Role::Student).await;
    seed_user(&ctx.state, "Tess", "tess@example.com", Role::Instructor).await;

    let Json(page) = users::admin_list_users(
        State(ctx.state.clone()),
        Query(users::UserListQuery {
            role: Some(Role::Student),
            ..Default::default()
        }),
    )
    .await
    .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].id, student.id);

    let Json(promoted) = users::admin_update_role(
        auth(&admin_user),
        State(ctx.state.clone()),
        Path(student.id),
        Json(UpdateRoleRequest {
            role: Role::Instructor,
        }),
    )
    .await
    .unwrap();
    assert_eq!(promoted.role, Role::Instructor);

    let Json(banned) = users::admin_update_status(
        auth(&admin_user),
        State(ctx.state.clone()),
        Path(student.id),
        Json(UpdateUserStatusRequest {
            status: UserStatus::Banned,
        }),
    )
    .await
    .unwrap();
    assert_eq!(banned.status, UserStatus::Banned);

    // Admins cannot demote, ban or delete themselves.
    let err = users::admin_update_role(
        auth(&admin_user),
        State(ctx.state.clone()),
        Path(admin_user.id),
        Json(UpdateRoleRequest { role: Role::Student }),
    )
    .await
    .unwrap_err();
    assert_eq!(status_of(err), StatusCode::BAD_REQUEST);

    let err = users::admin_delete_user(auth(&admin_user), State(ctx.state.clone()), Path(admin_user.id))
        .await
        .unwrap_err();
    assert_eq!(status_of(err), StatusCode::BAD_REQUEST);

    let status = users::admin_delete_user(auth(&admin_user), State(ctx.state.clone()), Path(student.id))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(ctx.state.repo.get_user(student.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_deleting_a_student_recounts_course_totals() {
    let ctx = create_test_state();
    let admin_user = seed_user(&ctx.state, "Root", "root@example.com", Role::Admin).await;
    let instructor = seed_user(&ctx.state, "Tess", "tess@example.com", Role::Instructor).await;
    let leaver = seed_user(&ctx.state, "Lee", "lee@example.com", Role::Student).await;
    let stayer = seed_user(&ctx.state, "Sue", "sue@example.com", Role::Student).await;
    let (course, _, _) = seed_published_course(&ctx.state, &instructor, "Recounted", 0).await;

    for (user, rating) in [(&leaver, 1), (&stayer, 5)] {
        enrollments::enroll(auth(user), State(ctx.state.clone()), Path(course.id))
            .await
            .unwrap();
        reviews::create_review(
            auth(user),
            State(ctx.state.clone()),
            Path(course.id),
            Json(CreateReviewRequest {
                rating,
                comment: "Fine".to_string(),
            }),
        )
        .await
        .unwrap();
    }

    users::admin_delete_user(auth(&admin_user), State(ctx.state.clone()), Path(leaver.id))
        .await
        .unwrap();

    let after = ctx.state.repo.get_course(course.id).await.unwrap().unwrap();
    assert_eq!(after.enrollment_count, 1);
    assert_eq!(after.rating_count, 1);
    assert!((after.rating_average - 5.0).abs() < f64::EPSILON);

    users::admin_delete_user(auth(&admin_user), State(ctx.state.clone()), Path(stayer.id))
        .await
        .unwrap();
    let empty = ctx.state.repo.get_course(course.id).await.unwrap().unwrap();
    assert_eq!(empty.enrollment_count, 0);
    assert_eq!(empty.rating_count, 0);
    assert_eq!(empty.rating_average, 0.0);

    // With no students left the owner may delete the course again.
    let status = courses::delete_course(auth(&instructor), State(ctx.state.clone()), Path(course.id))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_profiles() {
    let ctx = create_test_state();
    let sam = seed_user(&ctx.state, "Sam", "sam@example.com", Role::Student).await;
    let other = seed_user(&ctx.state, "Olly", "olly@example.com", Role::Student).await;

    let Json(public) = users::get_user_profile(State(ctx.state.clone()), Path(sam.id))
        .await
        .unwrap();
    let rendered = serde_json::to_value(&public).unwrap();
    assert!(rendered.get("email").is_none(), "public profiles hide the email");

    let Json(updated) = users::update_profile(
        auth(&sam),
        State(ctx.state.clone()),
        Path(sam.id),
        Json(skill_up::models::UpdateProfileRequest {
            name: Some("Samantha".to_string()),
            bio: Some("Learning Rust".to_string()),
            avatar: None,
        }),
    )
    .await
    .unwrap();
    assert_eq!(updated.name, "Samantha");
    assert_eq!(updated.bio.as_deref(), Some("Learning Rust"));

    let err = users::update_profile(
        auth(&other),
        State(ctx.state.clone()),
        Path(sam.id),
        Json(Default::default()),
    )
    .await
    .unwrap_err();
    assert_eq!(status_of(err), StatusCode::FORBIDDEN);

    let err = users::get_user_profile(State(ctx.state.clone()), Path(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert_eq!(status_of(err), StatusCode::NOT_FOUND);
}
