use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{
    AdminDashboardStats, Course, CourseFilter, CourseStatus, CreateFeedbackRequest, Enrollment,
    Feedback, FeedbackStatus, InstructorDashboardStats, InstructorRequest, Lesson, NewCourse,
    NewLesson, NewUser, Paginated, Pagination, Payment, PaymentStatus, RequestStatus, Review,
    Role, Section, UpdateCourseRequest, UpdateLessonRequest, UpdateProfileRequest,
    UpdateReviewRequest, User, UserFilter, UserStatus,
};

mod memory;
mod postgres;

pub use memory::MemoryRepository;
pub use postgres::PostgresRepository;

/// Repository Trait
///
/// The persistence contract used by every handler. Handlers never see SQL; they call
/// these methods and apply authorization on the returned rows.
///
/// Conventions:
/// - `Option` results are `None` when the row does not exist (handlers map that to 404).
/// - `bool` results report whether a row was affected.
/// - Unique-constraint violations surface as `AppError::Conflict`.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>>;
    async fn get_users_by_ids(&self, ids: &[Uuid]) -> AppResult<Vec<User>>;
    async fn create_user(&self, user: NewUser) -> AppResult<User>;
    async fn update_profile(&self, id: Uuid, req: UpdateProfileRequest) -> AppResult<Option<User>>;
    async fn set_user_role(&self, id: Uuid, role: Role) -> AppResult<Option<User>>;
    async fn set_user_status(&self, id: Uuid, status: UserStatus) -> AppResult<Option<User>>;
    /// Replaces the password hash and invalidates any reset token and refresh session.
    async fn set_password(&self, id: Uuid, password_hash: String) -> AppResult<bool>;
    async fn set_refresh_token_hash(&self, id: Uuid, hash: Option<String>) -> AppResult<()>;
    async fn set_reset_token(
        &self,
        id: Uuid,
        hash: String,
        expires: DateTime<Utc>,
    ) -> AppResult<()>;
    /// Looks up a user by reset-token hash; expiry is checked by the caller.
    async fn find_user_by_reset_token(&self, hash: &str) -> AppResult<Option<User>>;
    async fn list_users(&self, filter: UserFilter, page: Pagination) -> AppResult<Paginated<User>>;
    async fn delete_user(&self, id: Uuid) -> AppResult<bool>;

    // --- Courses ---
    async fn list_courses(&self, filter: CourseFilter, page: Pagination)
    -> AppResult<Paginated<Course>>;
    async fn get_course(&self, id: Uuid) -> AppResult<Option<Course>>;
    async fn get_courses_by_ids(&self, ids: &[Uuid]) -> AppResult<Vec<Course>>;
    async fn create_course(&self, course: NewCourse) -> AppResult<Course>;
    async fn update_course(&self, id: Uuid, req: UpdateCourseRequest) -> AppResult<Option<Course>>;
    /// Sets the status; the first publish stamps `published_at`.
    async fn set_course_status(&self, id: Uuid, status: CourseStatus) -> AppResult<Option<Course>>;
    async fn delete_course(&self, id: Uuid) -> AppResult<bool>;
    async fn count_course_lessons(&self, course_id: Uuid) -> AppResult<i64>;

    // --- Curriculum ---
    /// Sections of a course ordered by position.
    async fn list_sections(&self, course_id: Uuid) -> AppResult<Vec<Section>>;
    async fn get_section(&self, id: Uuid) -> AppResult<Option<Section>>;
    /// Appends a section after the current last one.
    async fn create_section(&self, course_id: Uuid, title: String) -> AppResult<Section>;
    async fn update_section(&self, id: Uuid, title: String) -> AppResult<Option<Section>>;
    /// Deletes a section together with its lessons.
    async fn delete_section(&self, id: Uuid) -> AppResult<bool>;
    /// Rewrites positions to match `ordered_ids` (already validated as a permutation).
    async fn reorder_sections(&self, course_id: Uuid, ordered_ids: &[Uuid]) -> AppResult<()>;
    /// Lessons of a course ordered by position within their section.
    async fn list_lessons(&self, course_id: Uuid) -> AppResult<Vec<Lesson>>;
    async fn get_lesson(&self, id: Uuid) -> AppResult<Option<Lesson>>;
    async fn create_lesson(&self, lesson: NewLesson) -> AppResult<Lesson>;
    async fn update_lesson(&self, id: Uuid, req: UpdateLessonRequest) -> AppResult<Option<Lesson>>;
    async fn delete_lesson(&self, id: Uuid) -> AppResult<bool>;

    // --- Enrollments ---
    async fn get_enrollment(&self, id: Uuid) -> AppResult<Option<Enrollment>>;
    async fn find_enrollment(&self, user_id: Uuid, course_id: Uuid) -> AppResult<Option<Enrollment>>;
    /// Idempotent: returns `None` when the user is already enrolled. A new row also bumps
    /// the course's `enrollment_count`.
    async fn create_enrollment(&self, user_id: Uuid, course_id: Uuid) -> AppResult<Option<Enrollment>>;
    async fn list_user_enrollments(&self, user_id: Uuid) -> AppResult<Vec<Enrollment>>;
    async fn list_course_enrollments(&self, course_id: Uuid) -> AppResult<Vec<Enrollment>>;
    /// Persists progress fields (completed lessons, percent, completion metadata).
    async fn save_enrollment_progress(&self, enrollment: &Enrollment) -> AppResult<Option<Enrollment>>;

    // --- Reviews ---
    async fn list_reviews(&self, course_id: Uuid, page: Pagination) -> AppResult<Paginated<Review>>;
    async fn get_review(&self, id: Uuid) -> AppResult<Option<Review>>;
    async fn find_review(&self, user_id: Uuid, course_id: Uuid) -> AppResult<Option<Review>>;
    async fn create_review(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        rating: i32,
        comment: String,
    ) -> AppResult<Review>;
    async fn update_review(&self, id: Uuid, req: UpdateReviewRequest) -> AppResult<Option<Review>>;
    async fn delete_review(&self, id: Uuid) -> AppResult<bool>;
    /// Recomputes `rating_average` / `rating_count` on the course from its reviews.
    async fn refresh_course_rating(&self, course_id: Uuid) -> AppResult<()>;

    // --- Feedback ---
    async fn create_feedback(&self, user_id: Option<Uuid>, req: CreateFeedbackRequest) -> AppResult<Feedback>;
    async fn get_feedback(&self, id: Uuid) -> AppResult<Option<Feedback>>;
    async fn list_feedback(
        &self,
        status: Option<FeedbackStatus>,
        page: Pagination,
    ) -> AppResult<Paginated<Feedback>>;
    async fn list_user_feedback(&self, user_id: Uuid) -> AppResult<Vec<Feedback>>;
    async fn set_feedback_status(&self, id: Uuid, status: FeedbackStatus) -> AppResult<Option<Feedback>>;
    /// Stores the reply text and marks the feedback `Replied`.
    async fn set_feedback_reply(&self, id: Uuid, reply: String) -> AppResult<Option<Feedback>>;
    async fn delete_feedback(&self, id: Uuid) -> AppResult<bool>;

    // --- Instructor Requests ---
    async fn get_instructor_request(&self, id: Uuid) -> AppResult<Option<InstructorRequest>>;
    async fn find_instructor_request_by_user(&self, user_id: Uuid)
    -> AppResult<Option<InstructorRequest>>;
    /// Inserts the user's request, or resets their existing one back to `Pending`.
    async fn upsert_instructor_request(
        &self,
        user_id: Uuid,
        message: String,
        documents: Vec<String>,
    ) -> AppResult<InstructorRequest>;
    async fn list_instructor_requests(
        &self,
        status: Option<RequestStatus>,
        page: Pagination,
    ) -> AppResult<Paginated<InstructorRequest>>;
    /// Applies a decision to a `Pending` request. `None` if missing or already reviewed.
    async fn review_instructor_request(
        &self,
        id: Uuid,
        status: RequestStatus,
        feedback: Option<String>,
    ) -> AppResult<Option<InstructorRequest>>;

    // --- Payments ---
    async fn create_payment(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        amount: i64,
        currency: String,
    ) -> AppResult<Payment>;
    async fn attach_payment_provider_ids(
        &self,
        id: Uuid,
        session_id: Option<String>,
        intent_id: Option<String>,
    ) -> AppResult<Option<Payment>>;
    async fn get_payment(&self, id: Uuid) -> AppResult<Option<Payment>>;
    /// Matches either the checkout session id or the payment intent id.
    async fn find_payment_by_provider_id(&self, provider_id: &str) -> AppResult<Option<Payment>>;
    async fn set_payment_status(&self, id: Uuid, status: PaymentStatus) -> AppResult<Option<Payment>>;
    async fn list_user_payments(&self, user_id: Uuid) -> AppResult<Vec<Payment>>;
    async fn list_payments(
        &self,
        status: Option<PaymentStatus>,
        page: Pagination,
    ) -> AppResult<Paginated<Payment>>;

    // --- Dashboards ---
    async fn get_admin_stats(&self) -> AppResult<AdminDashboardStats>;
    async fn get_instructor_stats(&self, instructor_id: Uuid) -> AppResult<InstructorDashboardStats>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;
