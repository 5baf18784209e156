use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Core application services and components.
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod mailer;
pub mod models;
pub mod password;
pub mod payments;
pub mod repository;
pub mod storage;

// Typed HTTP client for the API, with in-memory access tokens and refresh handling.
pub mod client;

// Module for routing segregation (Public, Authenticated, Admin).
pub mod routes;
use auth::AuthUser;
use error::AppError;
use models::Role;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use mailer::{MailerState, MockMailer, SmtpMailer};
pub use payments::{MockPaymentGateway, PaymentsState, StripeClient};
pub use repository::{MemoryRepository, PostgresRepository, RepositoryState};
pub use storage::{MockStorageService, S3StorageClient, StorageState};

/// ApiDoc
///
/// Auto-generated OpenAPI document, served at `/api-docs/openapi.json` and rendered by
/// the Swagger UI at `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::auth::register, handlers::auth::login, handlers::auth::refresh,
        handlers::auth::logout, handlers::auth::me, handlers::auth::forgot_password,
        handlers::auth::reset_password, handlers::auth::change_password,
        handlers::users::get_user_profile, handlers::users::update_profile,
        handlers::users::admin_list_users, handlers::users::admin_update_role,
        handlers::users::admin_update_status, handlers::users::admin_delete_user,
        handlers::courses::list_courses, handlers::courses::get_course,
        handlers::courses::create_course, handlers::courses::update_course,
        handlers::courses::delete_course, handlers::courses::update_course_status,
        handlers::courses::instructor_courses, handlers::courses::instructor_stats,
        handlers::courses::admin_list_courses,
        handlers::curriculum::get_curriculum, handlers::curriculum::create_section,
        handlers::curriculum::update_section, handlers::curriculum::delete_section,
        handlers::curriculum::reorder_sections, handlers::curriculum::create_lesson,
        handlers::curriculum::update_lesson, handlers::curriculum::delete_lesson,
        handlers::curriculum::get_lesson,
        handlers::enrollments::enroll, handlers::enrollments::my_enrollments,
        handlers::enrollments::course_enrollment, handlers::enrollments::complete_lesson,
        handlers::enrollments::course_students,
        handlers::reviews::list_reviews, handlers::reviews::create_review,
        handlers::reviews::update_review, handlers::reviews::delete_review,
        handlers::feedback::create_feedback, handlers::feedback::my_feedback,
        handlers::feedback::admin_list_feedback, handlers::feedback::admin_update_feedback_status,
        handlers::feedback::admin_reply_feedback, handlers::feedback::admin_delete_feedback,
        handlers::instructor_requests::create_instructor_request,
        handlers::instructor_requests::my_instructor_request,
        handlers::instructor_requests::admin_list_instructor_requests,
        handlers::instructor_requests::admin_review_instructor_request,
        handlers::payments::create_checkout, handlers::payments::create_payment_intent,
        handlers::payments::stripe_webhook, handlers::payments::my_payments,
        handlers::payments::admin_list_payments,
        handlers::uploads::get_presigned_url,
        handlers::admin::get_admin_stats,
    ),
    components(
        schemas(
            models::Role, models::UserStatus, models::CourseStatus, models::CourseLevel,
            models::LessonType, models::FeedbackStatus, models::RequestStatus,
            models::PaymentStatus, models::MediaKind, models::CourseSort,
            models::UserProfile, models::PublicUserProfile, models::Course, models::Section,
            models::Lesson, models::LessonResource, models::CurriculumSection,
            models::Enrollment, models::EnrollmentWithCourse, models::CourseStudent,
            models::Review, models::Feedback, models::InstructorRequest, models::Payment,
            models::RegisterRequest, models::LoginRequest, models::ForgotPasswordRequest,
            models::ResetPasswordRequest, models::ChangePasswordRequest, models::AuthResponse,
            models::RefreshResponse, models::MessageResponse, models::UpdateProfileRequest,
            models::UpdateRoleRequest, models::UpdateUserStatusRequest,
            models::CreateCourseRequest, models::UpdateCourseRequest,
            models::UpdateCourseStatusRequest, models::SectionRequest, models::ReorderRequest,
            models::CreateLessonRequest, models::UpdateLessonRequest,
            models::CreateReviewRequest, models::UpdateReviewRequest,
            models::CreateFeedbackRequest, models::UpdateFeedbackStatusRequest,
            models::FeedbackReplyRequest, models::CreateInstructorRequest,
            models::ReviewInstructorRequest, models::PresignedUrlRequest,
            models::PresignedUrlResponse, models::CheckoutResponse,
            models::PaymentIntentResponse, models::AdminDashboardStats,
            models::InstructorDashboardStats, error::ErrorBody, error::ErrorDetail,
        )
    ),
    tags(
        (name = "auth", description = "Registration, sessions and passwords"),
        (name = "courses", description = "Course catalog and authoring"),
        (name = "curriculum", description = "Sections and lessons"),
        (name = "enrollments", description = "Enrollment and progress"),
        (name = "reviews", description = "Course reviews"),
        (name = "payments", description = "Stripe checkout and webhooks"),
        (name = "admin", description = "Moderation and oversight")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single, immutable container holding every application service. Each service sits
/// behind a trait object so tests can swap in the in-memory and mock implementations.
#[derive(Clone)]
pub struct AppState {
    /// Repository Layer: Postgres in production, `MemoryRepository` in tests.
    pub repo: RepositoryState,
    /// Storage Layer: S3/MinIO presigned URLs.
    pub storage: StorageState,
    /// Outbound transactional email.
    pub mailer: MailerState,
    /// Stripe checkout, payment intents and webhook verification.
    pub payments: PaymentsState,
    /// Configuration: The loaded, immutable environment configuration.
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

// Let extractors (and handlers) pull single components out of the shared AppState.

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for StorageState {
    fn from_ref(app_state: &AppState) -> StorageState {
        app_state.storage.clone()
    }
}

impl FromRef<AppState> for MailerState {
    fn from_ref(app_state: &AppState) -> MailerState {
        app_state.mailer.clone()
    }
}

impl FromRef<AppState> for PaymentsState {
    fn from_ref(app_state: &AppState) -> PaymentsState {
        app_state.payments.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Enforces authentication for the `authenticated_routes`.
///
/// *Mechanism*: extracting `AuthUser` runs the full token check (JWT validation, user
/// lookup, ban check). A failure rejects the request with 401/403 before the handler
/// runs.
async fn auth_middleware(_auth_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// admin_middleware
///
/// Authentication plus a hard `admin` role check for everything under `/admin`.
async fn admin_middleware(auth_user: AuthUser, request: Request, next: Next) -> Result<Response, AppError> {
    auth_user.require_role(&[Role::Admin])?;
    Ok(next.run(request).await)
}

/// The versioned API, without state or global layers.
fn api_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(public::public_routes())
        .merge(
            authenticated::authenticated_routes()
                .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        )
        .nest(
            "/admin",
            admin::admin_routes()
                .route_layer(middleware::from_fn_with_state(state.clone(), admin_middleware)),
        )
}

/// create_router
///
/// Assembles the routing structure, applies global and scoped middleware, and registers
/// the application state.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS: the refresh cookie needs credentialed requests, which rules out a
    // wildcard origin. Only the configured frontend is allowed.
    let cors = match state.config.client_url.parse::<axum::http::HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(AllowOrigin::exact(origin))
            .allow_credentials(true)
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request()),
        Err(_) => {
            tracing::warn!(client_url = %state.config.client_url, "invalid CLIENT_URL; CORS disabled");
            CorsLayer::new()
        }
    };

    let x_request_id = HeaderName::from_static("x-request-id");

    // 2. Base Router Assembly
    let base_router = Router::new()
        // Liveness probe for load balancers, outside the versioned API.
        .route("/health", get(|| async { "ok" }))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api/v1", api_routes(&state))
        .with_state(state);

    // 3. Observability and Correlation Layers
    base_router
        .layer(
            ServiceBuilder::new()
                // 3a. A UUID x-request-id for every incoming request.
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                // 3b. One tracing span per request, tagged with the request id.
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                // 3c. Echo x-request-id back to the client.
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        // 4. CORS
        .layer(cors)
}

/// trace_span_logger
///
/// Span factory for `TraceLayer`: method, URI and the `x-request-id`, so every log line
/// of one request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
