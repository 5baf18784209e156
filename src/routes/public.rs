use crate::{
    AppState,
    handlers::{auth, courses, curriculum, feedback, payments, reviews, users},
};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints open to anonymous clients: the auth gateway, the published catalog, the
/// contact form and the Stripe webhook.
///
/// Visibility Mandate:
/// Catalog reads only ever return published courses to anonymous callers. Drafts are
/// served to their owner or an admin, resolved through `MaybeAuthUser`.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // --- Auth Gateway ---
        // The refresh cookie is scoped to /api/v1/auth, so refresh and logout only ever
        // see it here.
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/forgot-password", post(auth::forgot_password))
        .route("/auth/reset-password", post(auth::reset_password))
        // GET /users/{id}
        // Public profile; never includes email or status.
        .route("/users/{id}", get(users::get_user_profile))
        // --- Catalog ---
        .route("/courses", get(courses::list_courses))
        .route("/courses/{id}", get(courses::get_course))
        // Non-preview lessons are returned as outlines unless the caller has access.
        .route("/courses/{id}/curriculum", get(curriculum::get_curriculum))
        .route("/courses/{id}/reviews", get(reviews::list_reviews))
        .route("/lessons/{id}", get(curriculum::get_lesson))
        // POST /feedback
        .route("/feedback", post(feedback::create_feedback))
        // POST /payments/webhook
        // Authenticated by the Stripe-Signature HMAC instead of a session.
        .route("/payments/webhook", post(payments::stripe_webhook))
}
