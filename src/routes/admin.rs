use crate::{
    AppState,
    handlers::{admin, courses, feedback, instructor_requests, payments, users},
};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Admin Router Module
///
/// Moderation and oversight endpoints, nested under `/admin`.
///
/// Access Control:
/// `create_router` wraps this whole router in `admin_middleware`, which resolves the
/// caller and rejects anyone whose role is not `admin` with 403. Handlers here can
/// therefore assume an admin caller.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /admin/stats
        .route("/stats", get(admin::get_admin_stats))
        // --- Users ---
        .route("/users", get(users::admin_list_users))
        .route("/users/{id}", axum::routing::delete(users::admin_delete_user))
        .route("/users/{id}/role", put(users::admin_update_role))
        // Banning also revokes the user's refresh session.
        .route("/users/{id}/status", put(users::admin_update_status))
        // GET /admin/courses
        // Every course in any status, for moderation.
        .route("/courses", get(courses::admin_list_courses))
        // --- Feedback Inbox ---
        .route("/feedback", get(feedback::admin_list_feedback))
        .route(
            "/feedback/{id}",
            axum::routing::delete(feedback::admin_delete_feedback),
        )
        .route("/feedback/{id}/status", put(feedback::admin_update_feedback_status))
        .route("/feedback/{id}/reply", post(feedback::admin_reply_feedback))
        // --- Instructor Applications ---
        .route(
            "/instructor-requests",
            get(instructor_requests::admin_list_instructor_requests),
        )
        .route(
            "/instructor-requests/{id}",
            put(instructor_requests::admin_review_instructor_request),
        )
        // GET /admin/payments
        .route("/payments", get(payments::admin_list_payments))
}
