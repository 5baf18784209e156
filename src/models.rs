use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

// --- Enumerations (Postgres enum types, see migrations/) ---

/// Role
///
/// The RBAC field on `users`. New accounts are always `Student`; `Instructor` is granted
/// through an approved instructor request; `Admin` only by another admin.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS, ToSchema, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
#[ts(export)]
pub enum Role {
    #[default]
    Student,
    Instructor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Instructor => "instructor",
            Role::Admin => "admin",
        }
    }

    /// Instructors and admins may author courses.
    pub fn can_teach(&self) -> bool {
        matches!(self, Role::Instructor | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS, ToSchema, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "user_status", rename_all = "snake_case")]
#[ts(export)]
pub enum UserStatus {
    #[default]
    Active,
    Banned,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS, ToSchema, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "course_status", rename_all = "snake_case")]
#[ts(export)]
pub enum CourseStatus {
    #[default]
    Draft,
    Published,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS, ToSchema, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "course_level", rename_all = "snake_case")]
#[ts(export)]
pub enum CourseLevel {
    Beginner,
    Intermediate,
    Advanced,
    #[default]
    AllLevels,
}

/// LessonType
///
/// `Video` lessons point at an uploaded video, `Text` lessons carry a body, and `Raw`
/// lessons embed arbitrary markup supplied by the instructor.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS, ToSchema, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "lesson_type", rename_all = "snake_case")]
#[ts(export)]
pub enum LessonType {
    #[default]
    Video,
    Raw,
    Text,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS, ToSchema, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "feedback_status", rename_all = "snake_case")]
#[ts(export)]
pub enum FeedbackStatus {
    #[default]
    New,
    Read,
    Replied,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS, ToSchema, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "request_status", rename_all = "snake_case")]
#[ts(export)]
pub enum RequestStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        })
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS, ToSchema, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
#[ts(export)]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
    Refunded,
}

/// MediaKind
///
/// What an upload is for. Decides the allowed MIME types and the object key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum MediaKind {
    Avatar,
    Thumbnail,
    Video,
    Resource,
    Document,
}

// --- Core Schemas (Mapped to Database) ---

/// User
///
/// The canonical identity row in `users`. Carries credential material, so it is never
/// serialized directly; responses use [`UserProfile`].
#[derive(Debug, Clone, FromRow, Default)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    // Stored lowercased; unique.
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub status: UserStatus,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    // SHA-256 of the currently valid refresh token. `None` means logged out everywhere.
    pub refresh_token_hash: Option<String>,
    pub reset_token_hash: Option<String>,
    pub reset_token_expires: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_banned(&self) -> bool {
        self.status == UserStatus::Banned
    }
}

/// NewUser
///
/// Insert payload for the repository; the password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

/// UserProfile
///
/// Public projection of a [`User`] (GET /auth/me, GET /users/{id}, admin listings).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub status: UserStatus,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            status: user.status,
            avatar: user.avatar,
            bio: user.bio,
            created_at: user.created_at,
        }
    }
}

/// PublicUserProfile
///
/// What anyone may see about another user (instructor pages, review authors).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct PublicUserProfile {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

impl From<User> for PublicUserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            role: user.role,
            avatar: user.avatar,
            bio: user.bio,
            created_at: user.created_at,
        }
    }
}

/// Course
///
/// A course owned by one instructor. Prices are integer minor units (cents) and the
/// discount is a whole percentage, so pricing never touches floating point.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Course {
    pub id: Uuid,
    pub instructor_id: Uuid,
    pub title: String,
    pub subtitle: Option<String>,
    pub description: String,
    pub category: String,
    pub level: CourseLevel,
    pub language: String,
    pub thumbnail: Option<String>,
    pub price: i64,
    pub discount: i32,
    pub status: CourseStatus,
    // Aggregates maintained by enrollment and review writes.
    pub enrollment_count: i64,
    pub rating_average: f64,
    pub rating_count: i64,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
    #[ts(type = "string | null")]
    pub published_at: Option<DateTime<Utc>>,
}

impl Course {
    /// Price after discount, rounded down to the cent.
    pub fn effective_price(&self) -> i64 {
        effective_price(self.price, self.discount)
    }

    pub fn is_free(&self) -> bool {
        self.effective_price() == 0
    }

    pub fn is_published(&self) -> bool {
        self.status == CourseStatus::Published
    }
}

pub fn effective_price(price: i64, discount: i32) -> i64 {
    let discount = i64::from(discount.clamp(0, 100));
    price.max(0) * (100 - discount) / 100
}

/// NewCourse
///
/// Validated insert payload (the handler resolves defaults and the owner).
#[derive(Debug, Clone)]
pub struct NewCourse {
    pub instructor_id: Uuid,
    pub title: String,
    pub subtitle: Option<String>,
    pub description: String,
    pub category: String,
    pub level: CourseLevel,
    pub language: String,
    pub thumbnail: Option<String>,
    pub price: i64,
    pub discount: i32,
}

/// Section
///
/// An ordered chapter inside a course.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Section {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub position: i32,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// LessonResource
///
/// A downloadable attachment on a lesson. Stored as a JSON array on the lesson row.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct LessonResource {
    pub name: String,
    pub url: String,
}

/// Lesson
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Lesson {
    pub id: Uuid,
    pub section_id: Uuid,
    // Denormalized so access checks need a single lookup.
    pub course_id: Uuid,
    pub title: String,
    pub lesson_type: LessonType,
    pub content: Option<String>,
    pub video_url: Option<String>,
    pub duration_seconds: i32,
    pub is_preview: bool,
    pub position: i32,
    #[sqlx(json)]
    pub resources: Vec<LessonResource>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

impl Lesson {
    /// Strips the paid material, keeping the outline (title, type, duration).
    pub fn redacted(mut self) -> Self {
        self.content = None;
        self.video_url = None;
        self.resources.clear();
        self
    }
}

/// NewLesson
#[derive(Debug, Clone)]
pub struct NewLesson {
    pub section_id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub lesson_type: LessonType,
    pub content: Option<String>,
    pub video_url: Option<String>,
    pub duration_seconds: i32,
    pub is_preview: bool,
    pub resources: Vec<LessonResource>,
}

/// CurriculumSection
///
/// Output shape of GET /courses/{id}/curriculum: a section and its ordered lessons.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CurriculumSection {
    pub id: Uuid,
    pub title: String,
    pub position: i32,
    pub lessons: Vec<Lesson>,
}

/// Enrollment
///
/// Links a user to a course and tracks their progress through its lessons.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Enrollment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_id: Uuid,
    // Whole percent, 0..=100.
    pub progress: i32,
    pub completed_lessons: Vec<Uuid>,
    #[ts(type = "string | null")]
    pub completed_at: Option<DateTime<Utc>>,
    pub certificate_id: Option<Uuid>,
    #[ts(type = "string")]
    pub enrolled_at: DateTime<Utc>,
}

/// Percentage of `total` lessons covered by `completed`, rounded down.
pub fn progress_percent(completed: usize, total: usize) -> i32 {
    if total == 0 {
        return 0;
    }
    let pct = completed.min(total) * 100 / total;
    pct as i32
}

/// EnrollmentWithCourse
///
/// Enriched response for GET /enrollments/me.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct EnrollmentWithCourse {
    pub enrollment: Enrollment,
    pub course: Course,
}

/// CourseStudent
///
/// Enriched response for the instructor's student roster.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CourseStudent {
    pub enrollment: Enrollment,
    pub student: UserProfile,
}

/// Review
///
/// A user's rating and comment for a course, joined with the author's name.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Review {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub rating: i32,
    pub comment: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
    // Loaded via a JOIN in the repository query.
    #[sqlx(default)]
    pub author_name: Option<String>,
}

/// Feedback
///
/// A contact-form message, optionally linked to the signed-in user who sent it.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Feedback {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
    pub status: FeedbackStatus,
    pub reply: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// InstructorRequest
///
/// A student's application for instructor privileges. One row per user.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct InstructorRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub message: String,
    // Storage keys of the uploaded supporting documents.
    pub documents: Vec<String>,
    pub status: RequestStatus,
    pub admin_feedback: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string | null")]
    pub reviewed_at: Option<DateTime<Utc>>,
}

/// Payment
///
/// Local record of a Stripe checkout session or payment intent for one course.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub provider_session_id: Option<String>,
    pub provider_intent_id: Option<String>,
    pub status: PaymentStatus,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

// --- Listing Helpers ---

/// Pagination
///
/// Normalized `page`/`limit` pair. Pages are 1-based and `limit` is clamped to 1..=50.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    pub const DEFAULT_LIMIT: u32 = 12;
    pub const MAX_LIMIT: u32 = 50;

    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit
                .unwrap_or(Self::DEFAULT_LIMIT)
                .clamp(1, Self::MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.limit)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Paginated
///
/// Envelope for every paginated listing.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, total: i64, pagination: Pagination) -> Self {
        let limit = i64::from(pagination.limit);
        let total_pages = ((total.max(0) + limit - 1) / limit) as u32;
        Self {
            items,
            total,
            page: pagination.page,
            limit: pagination.limit,
            total_pages,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            limit: self.limit,
            total_pages: self.total_pages,
        }
    }
}

/// CourseSort
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CourseSort {
    #[default]
    Newest,
    Popular,
    Rating,
    PriceAsc,
    PriceDesc,
}

/// CourseFilter
///
/// Repository-level catalog filter. `status = None` means any status (admin views).
#[derive(Debug, Clone, Default)]
pub struct CourseFilter {
    pub search: Option<String>,
    pub category: Option<String>,
    pub level: Option<CourseLevel>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub status: Option<CourseStatus>,
    pub instructor_id: Option<Uuid>,
    pub sort: CourseSort,
}

/// UserFilter
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
    pub search: Option<String>,
}

// --- Request Payloads (Input Schemas) ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// AuthResponse
///
/// Returned by login/register. The refresh token is never in the body; it travels
/// only in the HttpOnly cookie.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AuthResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: UserProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RefreshResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[ts(export)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// UpdateProfileRequest
///
/// Partial update; only provided fields are written.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateProfileRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdateRoleRequest {
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdateUserStatusRequest {
    pub status: UserStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateCourseRequest {
    pub title: String,
    pub subtitle: Option<String>,
    pub description: String,
    pub category: String,
    pub level: Option<CourseLevel>,
    pub language: Option<String>,
    pub thumbnail: Option<String>,
    pub price: i64,
    pub discount: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateCourseRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<CourseLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdateCourseStatusRequest {
    pub status: CourseStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct SectionRequest {
    pub title: String,
}

/// ReorderRequest
///
/// The complete new ordering of a course's sections.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ReorderRequest {
    pub section_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateLessonRequest {
    pub title: String,
    pub lesson_type: LessonType,
    pub content: Option<String>,
    pub video_url: Option<String>,
    pub duration_seconds: Option<i32>,
    pub is_preview: Option<bool>,
    pub resources: Option<Vec<LessonResource>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateLessonRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lesson_type: Option<LessonType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_preview: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<LessonResource>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreateReviewRequest {
    pub rating: i32,
    pub comment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateReviewRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreateFeedbackRequest {
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdateFeedbackStatusRequest {
    pub status: FeedbackStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct FeedbackReplyRequest {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreateInstructorRequest {
    pub message: String,
    pub documents: Vec<String>,
}

/// ReviewInstructorRequest
///
/// Admin decision on a pending request. `feedback` is mandatory when rejecting.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ReviewInstructorRequest {
    pub status: RequestStatus,
    pub feedback: Option<String>,
}

/// PresignedUrlRequest
///
/// Input for POST /uploads/presigned.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, TS)]
#[ts(export)]
pub struct PresignedUrlRequest {
    pub kind: MediaKind,
    /// The original filename, used to derive the file extension.
    #[schema(example = "intro.mp4")]
    pub filename: String,
    /// The MIME type the upload will be constrained to.
    #[schema(example = "video/mp4")]
    pub file_type: String,
}

/// PresignedUrlResponse
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, TS, Default)]
#[ts(export)]
pub struct PresignedUrlResponse {
    /// The time-limited URL for the PUT request.
    pub upload_url: String,
    /// The object key to store on the owning record.
    pub resource_key: String,
    /// Where the object will be readable once uploaded.
    pub public_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, TS)]
#[ts(export)]
pub struct CheckoutResponse {
    pub payment_id: Uuid,
    pub session_id: String,
    pub checkout_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, TS)]
#[ts(export)]
pub struct PaymentIntentResponse {
    pub payment_id: Uuid,
    pub client_secret: String,
}

// --- Dashboard Schemas (Output) ---

/// AdminDashboardStats
///
/// Output schema for GET /admin/stats.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct AdminDashboardStats {
    pub total_users: i64,
    pub total_students: i64,
    pub total_instructors: i64,
    pub total_courses: i64,
    pub published_courses: i64,
    pub total_enrollments: i64,
    /// Sum of paid payments, in cents.
    pub total_revenue: i64,
    pub pending_instructor_requests: i64,
    pub new_feedback: i64,
}

/// InstructorDashboardStats
///
/// Output schema for GET /instructor/stats, computed over the caller's own courses.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct InstructorDashboardStats {
    pub total_courses: i64,
    pub published_courses: i64,
    pub total_students: i64,
    pub total_revenue: i64,
    pub average_rating: f64,
}
