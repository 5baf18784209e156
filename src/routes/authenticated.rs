use crate::{
    AppState,
    handlers::{
        auth, courses, curriculum, enrollments, feedback, instructor_requests, payments, reviews,
        uploads, users,
    },
};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Authenticated Router Module
///
/// Everything a signed-in user does: profile and password, course authoring, learning
/// progress, reviews, applications and purchases.
///
/// Access Control Strategy:
/// The `auth_middleware` layer guarantees a resolved `AuthUser` before any handler
/// runs. Role checks (instructor-only authoring) and ownership checks (owner or admin)
/// happen inside the handlers, which know which resource is being touched.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // --- Session ---
        .route("/auth/me", get(auth::me))
        .route("/auth/password", put(auth::change_password))
        .route("/users/{id}", put(users::update_profile))
        // --- Course Authoring (instructor/admin, owner checks in handlers) ---
        .route("/courses", post(courses::create_course))
        .route(
            "/courses/{id}",
            put(courses::update_course).delete(courses::delete_course),
        )
        .route("/courses/{id}/status", put(courses::update_course_status))
        .route("/instructor/courses", get(courses::instructor_courses))
        .route("/instructor/stats", get(courses::instructor_stats))
        // --- Curriculum ---
        .route("/courses/{id}/sections", post(curriculum::create_section))
        .route("/courses/{id}/sections/order", put(curriculum::reorder_sections))
        .route(
            "/sections/{id}",
            put(curriculum::update_section).delete(curriculum::delete_section),
        )
        .route("/sections/{id}/lessons", post(curriculum::create_lesson))
        .route(
            "/lessons/{id}",
            put(curriculum::update_lesson).delete(curriculum::delete_lesson),
        )
        // --- Learning ---
        // POST /courses/{id}/enroll
        // Free courses only; paid courses answer 402 and go through /payments.
        .route("/courses/{id}/enroll", post(enrollments::enroll))
        .route("/courses/{id}/enrollment", get(enrollments::course_enrollment))
        .route("/courses/{id}/students", get(enrollments::course_students))
        .route("/enrollments/me", get(enrollments::my_enrollments))
        .route(
            "/enrollments/{id}/lessons/{lesson_id}/complete",
            put(enrollments::complete_lesson),
        )
        // --- Reviews ---
        .route("/courses/{id}/reviews", post(reviews::create_review))
        .route(
            "/reviews/{id}",
            put(reviews::update_review).delete(reviews::delete_review),
        )
        // --- Feedback & Applications ---
        .route("/feedback/me", get(feedback::my_feedback))
        .route(
            "/instructor-requests",
            post(instructor_requests::create_instructor_request),
        )
        .route(
            "/instructor-requests/me",
            get(instructor_requests::my_instructor_request),
        )
        // --- Payments ---
        .route("/payments/checkout/{course_id}", post(payments::create_checkout))
        .route("/payments/intent/{course_id}", post(payments::create_payment_intent))
        .route("/payments/me", get(payments::my_payments))
        // POST /uploads/presigned
        // Short-lived PUT URL for a direct upload to the bucket.
        .route("/uploads/presigned", post(uploads::get_presigned_url))
}
