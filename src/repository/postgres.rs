use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, query_builder::QueryBuilder, types::Json};
use uuid::Uuid;

use super::Repository;
use crate::error::{AppError, AppResult};
use crate::models::{
    AdminDashboardStats, Course, CourseFilter, CourseSort, CourseStatus, CreateFeedbackRequest,
    Enrollment, Feedback, FeedbackStatus, InstructorDashboardStats, InstructorRequest, Lesson,
    NewCourse, NewLesson, NewUser, Paginated, Pagination, Payment, PaymentStatus, RequestStatus,
    Review, Role, Section, UpdateCourseRequest, UpdateLessonRequest, UpdateProfileRequest,
    UpdateReviewRequest, User, UserFilter, UserStatus,
};

/// PostgresRepository
///
/// The production implementation of the Repository trait, backed by a `sqlx::PgPool`.
/// Queries are built at runtime (`query_as` / `QueryBuilder`) against the schema in
/// `migrations/`.
#[derive(Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Logs the failing operation and wraps the driver error.
fn log_err(op: &'static str) -> impl Fn(sqlx::Error) -> AppError {
    move |e| {
        tracing::error!("{op} error: {:?}", e);
        AppError::Database(e)
    }
}

/// Like [`log_err`], but turns a unique-constraint violation into a 409.
fn conflict_or(op: &'static str, conflict: &'static str) -> impl Fn(sqlx::Error) -> AppError {
    move |e| {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                return AppError::conflict(conflict);
            }
        }
        tracing::error!("{op} error: {:?}", e);
        AppError::Database(e)
    }
}

// Price after discount, evaluated in SQL the same way as `models::effective_price`.
const EFFECTIVE_PRICE: &str = "(price * (100 - discount) / 100)";

const REVIEW_SELECT: &str = r#"
    SELECT r.id, r.user_id, r.course_id, r.rating, r.comment, r.created_at, r.updated_at,
           u.name AS author_name
    FROM reviews r
    LEFT JOIN users u ON u.id = r.user_id
"#;

fn push_course_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &CourseFilter) {
    builder.push(" WHERE TRUE");

    if let Some(status) = filter.status {
        builder.push(" AND status = ");
        builder.push_bind(status);
    }
    if let Some(instructor_id) = filter.instructor_id {
        builder.push(" AND instructor_id = ");
        builder.push_bind(instructor_id);
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{search}%");
        builder.push(" AND (title ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR description ILIKE ");
        builder.push_bind(pattern);
        builder.push(")");
    }
    if let Some(category) = &filter.category {
        builder.push(" AND LOWER(category) = LOWER(");
        builder.push_bind(category.clone());
        builder.push(")");
    }
    if let Some(level) = filter.level {
        builder.push(" AND level = ");
        builder.push_bind(level);
    }
    if let Some(min) = filter.min_price {
        builder.push(format!(" AND {EFFECTIVE_PRICE} >= "));
        builder.push_bind(min);
    }
    if let Some(max) = filter.max_price {
        builder.push(format!(" AND {EFFECTIVE_PRICE} <= "));
        builder.push_bind(max);
    }
}

fn course_order(sort: CourseSort) -> String {
    match sort {
        CourseSort::Newest => " ORDER BY created_at DESC, id".to_string(),
        CourseSort::Popular => " ORDER BY enrollment_count DESC, created_at DESC, id".to_string(),
        CourseSort::Rating => {
            " ORDER BY rating_average DESC, rating_count DESC, created_at DESC, id".to_string()
        }
        CourseSort::PriceAsc => format!(" ORDER BY {EFFECTIVE_PRICE} ASC, created_at DESC, id"),
        CourseSort::PriceDesc => format!(" ORDER BY {EFFECTIVE_PRICE} DESC, created_at DESC, id"),
    }
}

fn push_user_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter) {
    builder.push(" WHERE TRUE");

    if let Some(role) = filter.role {
        builder.push(" AND role = ");
        builder.push_bind(role);
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ");
        builder.push_bind(status);
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{search}%");
        builder.push(" AND (name ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR email ILIKE ");
        builder.push_bind(pattern);
        builder.push(")");
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    // --- USERS ---

    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(log_err("get_user"))
    }

    async fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(log_err("get_user_by_email"))
    }

    async fn get_users_by_ids(&self, ids: &[Uuid]) -> AppResult<Vec<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(log_err("get_users_by_ids"))
    }

    /// create_user
    ///
    /// The unique index on `email` is the source of truth for duplicates, so concurrent
    /// registrations with the same address still yield exactly one account.
    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, name, email, password_hash, role)
            VALUES ($1, $2, LOWER($3), $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user.name)
        .bind(user.email)
        .bind(user.password_hash)
        .bind(user.role)
        .fetch_one(&self.pool)
        .await
        .map_err(conflict_or("create_user", "Email is already registered"))
    }

    async fn update_profile(&self, id: Uuid, req: UpdateProfileRequest) -> AppResult<Option<User>> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET name = COALESCE($2, name),
                bio = COALESCE($3, bio),
                avatar = COALESCE($4, avatar),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(req.name)
        .bind(req.bio)
        .bind(req.avatar)
        .fetch_optional(&self.pool)
        .await
        .map_err(log_err("update_profile"))
    }

    async fn set_user_role(&self, id: Uuid, role: Role) -> AppResult<Option<User>> {
        sqlx::query_as::<_, User>(
            "UPDATE users SET role = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(role)
        .fetch_optional(&self.pool)
        .await
        .map_err(log_err("set_user_role"))
    }

    /// set_user_status
    ///
    /// Banning also drops the refresh session so the account cannot mint new tokens.
    async fn set_user_status(&self, id: Uuid, status: UserStatus) -> AppResult<Option<User>> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET status = $2,
                refresh_token_hash = CASE WHEN $2 = 'banned'::user_status THEN NULL ELSE refresh_token_hash END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await
        .map_err(log_err("set_user_status"))
    }

    async fn set_password(&self, id: Uuid, password_hash: String) -> AppResult<bool> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2,
                reset_token_hash = NULL,
                reset_token_expires = NULL,
                refresh_token_hash = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.pool)
        .await
        .map(|r| r.rows_affected() > 0)
        .map_err(log_err("set_password"))
    }

    async fn set_refresh_token_hash(&self, id: Uuid, hash: Option<String>) -> AppResult<()> {
        sqlx::query("UPDATE users SET refresh_token_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(hash)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(log_err("set_refresh_token_hash"))
    }

    async fn set_reset_token(&self, id: Uuid, hash: String, expires: DateTime<Utc>) -> AppResult<()> {
        sqlx::query("UPDATE users SET reset_token_hash = $2, reset_token_expires = $3 WHERE id = $1")
            .bind(id)
            .bind(hash)
            .bind(expires)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(log_err("set_reset_token"))
    }

    async fn find_user_by_reset_token(&self, hash: &str) -> AppResult<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE reset_token_hash = $1")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(log_err("find_user_by_reset_token"))
    }

    async fn list_users(&self, filter: UserFilter, page: Pagination) -> AppResult<Paginated<User>> {
        let mut count: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM users");
        push_user_filters(&mut count, &filter);
        let total = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(log_err("list_users count"))?;

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM users");
        push_user_filters(&mut builder, &filter);
        builder.push(" ORDER BY created_at DESC, id LIMIT ");
        builder.push_bind(i64::from(page.limit));
        builder.push(" OFFSET ");
        builder.push_bind(page.offset());

        let items = builder
            .build_query_as::<User>()
            .fetch_all(&self.pool)
            .await
            .map_err(log_err("list_users"))?;

        Ok(Paginated::new(items, total, page))
    }

    /// delete_user
    ///
    /// Foreign keys cascade the user's enrollments and reviews away, so the affected
    /// courses get their counters recomputed inside the same transaction.
    async fn delete_user(&self, id: Uuid) -> AppResult<bool> {
        let mut tx = self.pool.begin().await.map_err(log_err("delete_user begin"))?;

        let touched: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT course_id FROM enrollments WHERE user_id = $1
            UNION
            SELECT course_id FROM reviews WHERE user_id = $1
            "#,
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await
        .map_err(log_err("delete_user courses"))?;

        let deleted = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(log_err("delete_user"))?
            .rows_affected()
            > 0;

        if deleted && !touched.is_empty() {
            sqlx::query(
                r#"
                UPDATE courses c
                SET enrollment_count = (SELECT COUNT(*) FROM enrollments e WHERE e.course_id = c.id),
                    rating_count = (SELECT COUNT(*) FROM reviews r WHERE r.course_id = c.id),
                    rating_average = COALESCE(
                        (SELECT AVG(rating)::DOUBLE PRECISION FROM reviews r WHERE r.course_id = c.id), 0)
                WHERE c.id = ANY($1)
                "#,
            )
            .bind(&touched)
            .execute(&mut *tx)
            .await
            .map_err(log_err("delete_user recount"))?;
        }

        tx.commit().await.map_err(log_err("delete_user commit"))?;
        Ok(deleted)
    }

    // --- COURSES ---

    /// list_courses
    ///
    /// Catalog search. Filters are appended with `QueryBuilder` bindings; the same filter
    /// set drives the COUNT so `total` always matches the filtered listing.
    async fn list_courses(&self, filter: CourseFilter, page: Pagination) -> AppResult<Paginated<Course>> {
        let mut count: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM courses");
        push_course_filters(&mut count, &filter);
        let total = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(log_err("list_courses count"))?;

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM courses");
        push_course_filters(&mut builder, &filter);
        builder.push(course_order(filter.sort));
        builder.push(" LIMIT ");
        builder.push_bind(i64::from(page.limit));
        builder.push(" OFFSET ");
        builder.push_bind(page.offset());

        let items = builder
            .build_query_as::<Course>()
            .fetch_all(&self.pool)
            .await
            .map_err(log_err("list_courses"))?;

        Ok(Paginated::new(items, total, page))
    }

    async fn get_course(&self, id: Uuid) -> AppResult<Option<Course>> {
        sqlx::query_as::<_, Course>("SELECT * FROM courses WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(log_err("get_course"))
    }

    async fn get_courses_by_ids(&self, ids: &[Uuid]) -> AppResult<Vec<Course>> {
        sqlx::query_as::<_, Course>("SELECT * FROM courses WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(log_err("get_courses_by_ids"))
    }

    async fn create_course(&self, course: NewCourse) -> AppResult<Course> {
        sqlx::query_as::<_, Course>(
            r#"
            INSERT INTO courses
                (id, instructor_id, title, subtitle, description, category, level, language,
                 thumbnail, price, discount)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(course.instructor_id)
        .bind(course.title)
        .bind(course.subtitle)
        .bind(course.description)
        .bind(course.category)
        .bind(course.level)
        .bind(course.language)
        .bind(course.thumbnail)
        .bind(course.price)
        .bind(course.discount)
        .fetch_one(&self.pool)
        .await
        .map_err(log_err("create_course"))
    }

    async fn update_course(&self, id: Uuid, req: UpdateCourseRequest) -> AppResult<Option<Course>> {
        sqlx::query_as::<_, Course>(
            r#"
            UPDATE courses
            SET title = COALESCE($2, title),
                subtitle = COALESCE($3, subtitle),
                description = COALESCE($4, description),
                category = COALESCE($5, category),
                level = COALESCE($6, level),
                language = COALESCE($7, language),
                thumbnail = COALESCE($8, thumbnail),
                price = COALESCE($9, price),
                discount = COALESCE($10, discount),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(req.title)
        .bind(req.subtitle)
        .bind(req.description)
        .bind(req.category)
        .bind(req.level)
        .bind(req.language)
        .bind(req.thumbnail)
        .bind(req.price)
        .bind(req.discount)
        .fetch_optional(&self.pool)
        .await
        .map_err(log_err("update_course"))
    }

    async fn set_course_status(&self, id: Uuid, status: CourseStatus) -> AppResult<Option<Course>> {
        sqlx::query_as::<_, Course>(
            r#"
            UPDATE courses
            SET status = $2,
                published_at = CASE WHEN $3 THEN COALESCE(published_at, NOW()) ELSE published_at END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(status == CourseStatus::Published)
        .fetch_optional(&self.pool)
        .await
        .map_err(log_err("set_course_status"))
    }

    async fn delete_course(&self, id: Uuid) -> AppResult<bool> {
        sqlx::query("DELETE FROM courses WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected() > 0)
            .map_err(log_err("delete_course"))
    }

    async fn count_course_lessons(&self, course_id: Uuid) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM lessons WHERE course_id = $1")
            .bind(course_id)
            .fetch_one(&self.pool)
            .await
            .map_err(log_err("count_course_lessons"))
    }

    // --- CURRICULUM ---

    async fn list_sections(&self, course_id: Uuid) -> AppResult<Vec<Section>> {
        sqlx::query_as::<_, Section>(
            "SELECT * FROM sections WHERE course_id = $1 ORDER BY position, created_at",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await
        .map_err(log_err("list_sections"))
    }

    async fn get_section(&self, id: Uuid) -> AppResult<Option<Section>> {
        sqlx::query_as::<_, Section>("SELECT * FROM sections WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(log_err("get_section"))
    }

    async fn create_section(&self, course_id: Uuid, title: String) -> AppResult<Section> {
        sqlx::query_as::<_, Section>(
            r#"
            INSERT INTO sections (id, course_id, title, position)
            VALUES ($1, $2, $3,
                    (SELECT COALESCE(MAX(position), 0) + 1 FROM sections WHERE course_id = $2))
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(course_id)
        .bind(title)
        .fetch_one(&self.pool)
        .await
        .map_err(log_err("create_section"))
    }

    async fn update_section(&self, id: Uuid, title: String) -> AppResult<Option<Section>> {
        sqlx::query_as::<_, Section>("UPDATE sections SET title = $2 WHERE id = $1 RETURNING *")
            .bind(id)
            .bind(title)
            .fetch_optional(&self.pool)
            .await
            .map_err(log_err("update_section"))
    }

    async fn delete_section(&self, id: Uuid) -> AppResult<bool> {
        // Lessons go with it through ON DELETE CASCADE.
        sqlx::query("DELETE FROM sections WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected() > 0)
            .map_err(log_err("delete_section"))
    }

    /// reorder_sections
    ///
    /// Rewrites every position inside one transaction so readers never observe a
    /// half-applied ordering.
    async fn reorder_sections(&self, course_id: Uuid, ordered_ids: &[Uuid]) -> AppResult<()> {
        let mut tx = self.pool.begin().await.map_err(log_err("reorder_sections begin"))?;

        for (index, section_id) in ordered_ids.iter().enumerate() {
            sqlx::query("UPDATE sections SET position = $3 WHERE id = $1 AND course_id = $2")
                .bind(section_id)
                .bind(course_id)
                .bind(index as i32 + 1)
                .execute(&mut *tx)
                .await
                .map_err(log_err("reorder_sections"))?;
        }

        tx.commit().await.map_err(log_err("reorder_sections commit"))
    }

    async fn list_lessons(&self, course_id: Uuid) -> AppResult<Vec<Lesson>> {
        sqlx::query_as::<_, Lesson>(
            r#"
            SELECT l.*
            FROM lessons l
            JOIN sections s ON s.id = l.section_id
            WHERE l.course_id = $1
            ORDER BY s.position, l.position, l.created_at
            "#,
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await
        .map_err(log_err("list_lessons"))
    }

    async fn get_lesson(&self, id: Uuid) -> AppResult<Option<Lesson>> {
        sqlx::query_as::<_, Lesson>("SELECT * FROM lessons WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(log_err("get_lesson"))
    }

    async fn create_lesson(&self, lesson: NewLesson) -> AppResult<Lesson> {
        sqlx::query_as::<_, Lesson>(
            r#"
            INSERT INTO lessons
                (id, section_id, course_id, title, lesson_type, content, video_url,
                 duration_seconds, is_preview, resources, position)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    (SELECT COALESCE(MAX(position), 0) + 1 FROM lessons WHERE section_id = $2))
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(lesson.section_id)
        .bind(lesson.course_id)
        .bind(lesson.title)
        .bind(lesson.lesson_type)
        .bind(lesson.content)
        .bind(lesson.video_url)
        .bind(lesson.duration_seconds)
        .bind(lesson.is_preview)
        .bind(Json(lesson.resources))
        .fetch_one(&self.pool)
        .await
        .map_err(log_err("create_lesson"))
    }

    async fn update_lesson(&self, id: Uuid, req: UpdateLessonRequest) -> AppResult<Option<Lesson>> {
        sqlx::query_as::<_, Lesson>(
            r#"
            UPDATE lessons
            SET title = COALESCE($2, title),
                lesson_type = COALESCE($3, lesson_type),
                content = COALESCE($4, content),
                video_url = COALESCE($5, video_url),
                duration_seconds = COALESCE($6, duration_seconds),
                is_preview = COALESCE($7, is_preview),
                resources = COALESCE($8, resources),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(req.title)
        .bind(req.lesson_type)
        .bind(req.content)
        .bind(req.video_url)
        .bind(req.duration_seconds)
        .bind(req.is_preview)
        .bind(req.resources.map(Json))
        .fetch_optional(&self.pool)
        .await
        .map_err(log_err("update_lesson"))
    }

    async fn delete_lesson(&self, id: Uuid) -> AppResult<bool> {
        sqlx::query("DELETE FROM lessons WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected() > 0)
            .map_err(log_err("delete_lesson"))
    }

    // --- ENROLLMENTS ---

    async fn get_enrollment(&self, id: Uuid) -> AppResult<Option<Enrollment>> {
        sqlx::query_as::<_, Enrollment>("SELECT * FROM enrollments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(log_err("get_enrollment"))
    }

    async fn find_enrollment(&self, user_id: Uuid, course_id: Uuid) -> AppResult<Option<Enrollment>> {
        sqlx::query_as::<_, Enrollment>(
            "SELECT * FROM enrollments WHERE user_id = $1 AND course_id = $2",
        )
        .bind(user_id)
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(log_err("find_enrollment"))
    }

    /// create_enrollment
    ///
    /// `ON CONFLICT DO NOTHING` makes the insert idempotent; the counter is only bumped
    /// when a row was actually created, inside the same transaction.
    async fn create_enrollment(&self, user_id: Uuid, course_id: Uuid) -> AppResult<Option<Enrollment>> {
        let mut tx = self.pool.begin().await.map_err(log_err("create_enrollment begin"))?;

        let created = sqlx::query_as::<_, Enrollment>(
            r#"
            INSERT INTO enrollments (id, user_id, course_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, course_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(course_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(log_err("create_enrollment"))?;

        if created.is_some() {
            sqlx::query("UPDATE courses SET enrollment_count = enrollment_count + 1 WHERE id = $1")
                .bind(course_id)
                .execute(&mut *tx)
                .await
                .map_err(log_err("create_enrollment count"))?;
        }

        tx.commit().await.map_err(log_err("create_enrollment commit"))?;
        Ok(created)
    }

    async fn list_user_enrollments(&self, user_id: Uuid) -> AppResult<Vec<Enrollment>> {
        sqlx::query_as::<_, Enrollment>(
            "SELECT * FROM enrollments WHERE user_id = $1 ORDER BY enrolled_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(log_err("list_user_enrollments"))
    }

    async fn list_course_enrollments(&self, course_id: Uuid) -> AppResult<Vec<Enrollment>> {
        sqlx::query_as::<_, Enrollment>(
            "SELECT * FROM enrollments WHERE course_id = $1 ORDER BY enrolled_at DESC",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await
        .map_err(log_err("list_course_enrollments"))
    }

    async fn save_enrollment_progress(&self, enrollment: &Enrollment) -> AppResult<Option<Enrollment>> {
        sqlx::query_as::<_, Enrollment>(
            r#"
            UPDATE enrollments
            SET progress = $2,
                completed_lessons = $3,
                completed_at = $4,
                certificate_id = $5
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(enrollment.id)
        .bind(enrollment.progress)
        .bind(&enrollment.completed_lessons)
        .bind(enrollment.completed_at)
        .bind(enrollment.certificate_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(log_err("save_enrollment_progress"))
    }

    // --- REVIEWS ---

    async fn list_reviews(&self, course_id: Uuid, page: Pagination) -> AppResult<Paginated<Review>> {
        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM reviews WHERE course_id = $1")
            .bind(course_id)
            .fetch_one(&self.pool)
            .await
            .map_err(log_err("list_reviews count"))?;

        let items = sqlx::query_as::<_, Review>(&format!(
            "{REVIEW_SELECT} WHERE r.course_id = $1 ORDER BY r.created_at DESC, r.id LIMIT $2 OFFSET $3"
        ))
        .bind(course_id)
        .bind(i64::from(page.limit))
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(log_err("list_reviews"))?;

        Ok(Paginated::new(items, total, page))
    }

    async fn get_review(&self, id: Uuid) -> AppResult<Option<Review>> {
        sqlx::query_as::<_, Review>(&format!("{REVIEW_SELECT} WHERE r.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(log_err("get_review"))
    }

    async fn find_review(&self, user_id: Uuid, course_id: Uuid) -> AppResult<Option<Review>> {
        sqlx::query_as::<_, Review>(&format!(
            "{REVIEW_SELECT} WHERE r.user_id = $1 AND r.course_id = $2"
        ))
        .bind(user_id)
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(log_err("find_review"))
    }

    async fn create_review(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        rating: i32,
        comment: String,
    ) -> AppResult<Review> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO reviews (id, user_id, course_id, rating, comment) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(user_id)
        .bind(course_id)
        .bind(rating)
        .bind(comment)
        .execute(&self.pool)
        .await
        .map_err(conflict_or("create_review", "You have already reviewed this course"))?;

        self.get_review(id)
            .await?
            .ok_or_else(|| AppError::internal("review vanished after insert"))
    }

    async fn update_review(&self, id: Uuid, req: UpdateReviewRequest) -> AppResult<Option<Review>> {
        let updated = sqlx::query(
            r#"
            UPDATE reviews
            SET rating = COALESCE($2, rating),
                comment = COALESCE($3, comment),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(req.rating)
        .bind(req.comment)
        .execute(&self.pool)
        .await
        .map_err(log_err("update_review"))?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_review(id).await
    }

    async fn delete_review(&self, id: Uuid) -> AppResult<bool> {
        sqlx::query("DELETE FROM reviews WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected() > 0)
            .map_err(log_err("delete_review"))
    }

    async fn refresh_course_rating(&self, course_id: Uuid) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE courses
            SET rating_average = COALESCE(
                    (SELECT AVG(rating)::DOUBLE PRECISION FROM reviews WHERE course_id = $1), 0),
                rating_count = (SELECT COUNT(*) FROM reviews WHERE course_id = $1)
            WHERE id = $1
            "#,
        )
        .bind(course_id)
        .execute(&self.pool)
        .await
        .map(|_| ())
        .map_err(log_err("refresh_course_rating"))
    }

    // --- FEEDBACK ---

    async fn create_feedback(&self, user_id: Option<Uuid>, req: CreateFeedbackRequest) -> AppResult<Feedback> {
        sqlx::query_as::<_, Feedback>(
            r#"
            INSERT INTO feedback (id, user_id, name, email, subject, message)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(req.name)
        .bind(req.email)
        .bind(req.subject)
        .bind(req.message)
        .fetch_one(&self.pool)
        .await
        .map_err(log_err("create_feedback"))
    }

    async fn get_feedback(&self, id: Uuid) -> AppResult<Option<Feedback>> {
        sqlx::query_as::<_, Feedback>("SELECT * FROM feedback WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(log_err("get_feedback"))
    }

    async fn list_feedback(
        &self,
        status: Option<FeedbackStatus>,
        page: Pagination,
    ) -> AppResult<Paginated<Feedback>> {
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM feedback WHERE ($1::feedback_status IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(log_err("list_feedback count"))?;

        let items = sqlx::query_as::<_, Feedback>(
            r#"
            SELECT * FROM feedback
            WHERE ($1::feedback_status IS NULL OR status = $1)
            ORDER BY created_at DESC, id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status)
        .bind(i64::from(page.limit))
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(log_err("list_feedback"))?;

        Ok(Paginated::new(items, total, page))
    }

    async fn list_user_feedback(&self, user_id: Uuid) -> AppResult<Vec<Feedback>> {
        sqlx::query_as::<_, Feedback>(
            "SELECT * FROM feedback WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(log_err("list_user_feedback"))
    }

    async fn set_feedback_status(&self, id: Uuid, status: FeedbackStatus) -> AppResult<Option<Feedback>> {
        sqlx::query_as::<_, Feedback>(
            "UPDATE feedback SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await
        .map_err(log_err("set_feedback_status"))
    }

    async fn set_feedback_reply(&self, id: Uuid, reply: String) -> AppResult<Option<Feedback>> {
        sqlx::query_as::<_, Feedback>(
            r#"
            UPDATE feedback
            SET reply = $2, status = 'replied', updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(reply)
        .fetch_optional(&self.pool)
        .await
        .map_err(log_err("set_feedback_reply"))
    }

    async fn delete_feedback(&self, id: Uuid) -> AppResult<bool> {
        sqlx::query("DELETE FROM feedback WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected() > 0)
            .map_err(log_err("delete_feedback"))
    }

    // --- INSTRUCTOR REQUESTS ---

    async fn get_instructor_request(&self, id: Uuid) -> AppResult<Option<InstructorRequest>> {
        sqlx::query_as::<_, InstructorRequest>("SELECT * FROM instructor_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(log_err("get_instructor_request"))
    }

    async fn find_instructor_request_by_user(&self, user_id: Uuid) -> AppResult<Option<InstructorRequest>> {
        sqlx::query_as::<_, InstructorRequest>(
            "SELECT * FROM instructor_requests WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(log_err("find_instructor_request_by_user"))
    }

    async fn upsert_instructor_request(
        &self,
        user_id: Uuid,
        message: String,
        documents: Vec<String>,
    ) -> AppResult<InstructorRequest> {
        sqlx::query_as::<_, InstructorRequest>(
            r#"
            INSERT INTO instructor_requests (id, user_id, message, documents)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE
            SET message = EXCLUDED.message,
                documents = EXCLUDED.documents,
                status = 'pending',
                admin_feedback = NULL,
                reviewed_at = NULL,
                created_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(message)
        .bind(documents)
        .fetch_one(&self.pool)
        .await
        .map_err(log_err("upsert_instructor_request"))
    }

    async fn list_instructor_requests(
        &self,
        status: Option<RequestStatus>,
        page: Pagination,
    ) -> AppResult<Paginated<InstructorRequest>> {
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM instructor_requests WHERE ($1::request_status IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(log_err("list_instructor_requests count"))?;

        let items = sqlx::query_as::<_, InstructorRequest>(
            r#"
            SELECT * FROM instructor_requests
            WHERE ($1::request_status IS NULL OR status = $1)
            ORDER BY created_at DESC, id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status)
        .bind(i64::from(page.limit))
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(log_err("list_instructor_requests"))?;

        Ok(Paginated::new(items, total, page))
    }

    /// review_instructor_request
    ///
    /// The `status = 'pending'` guard makes the decision single-shot even when two admins
    /// act on the same request concurrently.
    async fn review_instructor_request(
        &self,
        id: Uuid,
        status: RequestStatus,
        feedback: Option<String>,
    ) -> AppResult<Option<InstructorRequest>> {
        sqlx::query_as::<_, InstructorRequest>(
            r#"
            UPDATE instructor_requests
            SET status = $2, admin_feedback = $3, reviewed_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(feedback)
        .fetch_optional(&self.pool)
        .await
        .map_err(log_err("review_instructor_request"))
    }

    // --- PAYMENTS ---

    async fn create_payment(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        amount: i64,
        currency: String,
    ) -> AppResult<Payment> {
        sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (id, user_id, course_id, amount, currency)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(course_id)
        .bind(amount)
        .bind(currency)
        .fetch_one(&self.pool)
        .await
        .map_err(log_err("create_payment"))
    }

    async fn attach_payment_provider_ids(
        &self,
        id: Uuid,
        session_id: Option<String>,
        intent_id: Option<String>,
    ) -> AppResult<Option<Payment>> {
        sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET provider_session_id = COALESCE($2, provider_session_id),
                provider_intent_id = COALESCE($3, provider_intent_id),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(session_id)
        .bind(intent_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(log_err("attach_payment_provider_ids"))
    }

    async fn get_payment(&self, id: Uuid) -> AppResult<Option<Payment>> {
        sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(log_err("get_payment"))
    }

    async fn find_payment_by_provider_id(&self, provider_id: &str) -> AppResult<Option<Payment>> {
        sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE provider_session_id = $1 OR provider_intent_id = $1",
        )
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(log_err("find_payment_by_provider_id"))
    }

    async fn set_payment_status(&self, id: Uuid, status: PaymentStatus) -> AppResult<Option<Payment>> {
        sqlx::query_as::<_, Payment>(
            "UPDATE payments SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await
        .map_err(log_err("set_payment_status"))
    }

    async fn list_user_payments(&self, user_id: Uuid) -> AppResult<Vec<Payment>> {
        sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(log_err("list_user_payments"))
    }

    async fn list_payments(
        &self,
        status: Option<PaymentStatus>,
        page: Pagination,
    ) -> AppResult<Paginated<Payment>> {
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM payments WHERE ($1::payment_status IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(log_err("list_payments count"))?;

        let items = sqlx::query_as::<_, Payment>(
            r#"
            SELECT * FROM payments
            WHERE ($1::payment_status IS NULL OR status = $1)
            ORDER BY created_at DESC, id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status)
        .bind(i64::from(page.limit))
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(log_err("list_payments"))?;

        Ok(Paginated::new(items, total, page))
    }

    // --- DASHBOARDS ---

    /// get_admin_stats
    ///
    /// Platform-wide counters in a single round trip.
    async fn get_admin_stats(&self) -> AppResult<AdminDashboardStats> {
        let row: (i64, i64, i64, i64, i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM users),
                (SELECT COUNT(*) FROM users WHERE role = 'student'),
                (SELECT COUNT(*) FROM users WHERE role = 'instructor'),
                (SELECT COUNT(*) FROM courses),
                (SELECT COUNT(*) FROM courses WHERE status = 'published'),
                (SELECT COUNT(*) FROM enrollments),
                (SELECT COALESCE(SUM(amount), 0)::BIGINT FROM payments WHERE status = 'paid'),
                (SELECT COUNT(*) FROM instructor_requests WHERE status = 'pending'),
                (SELECT COUNT(*) FROM feedback WHERE status = 'new')
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(log_err("get_admin_stats"))?;

        Ok(AdminDashboardStats {
            total_users: row.0,
            total_students: row.1,
            total_instructors: row.2,
            total_courses: row.3,
            published_courses: row.4,
            total_enrollments: row.5,
            total_revenue: row.6,
            pending_instructor_requests: row.7,
            new_feedback: row.8,
        })
    }

    async fn get_instructor_stats(&self, instructor_id: Uuid) -> AppResult<InstructorDashboardStats> {
        let row: (i64, i64, i64, i64, f64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM courses WHERE instructor_id = $1),
                (SELECT COUNT(*) FROM courses WHERE instructor_id = $1 AND status = 'published'),
                (SELECT COUNT(*) FROM enrollments e
                    JOIN courses c ON c.id = e.course_id WHERE c.instructor_id = $1),
                (SELECT COALESCE(SUM(p.amount), 0)::BIGINT FROM payments p
                    JOIN courses c ON c.id = p.course_id
                    WHERE c.instructor_id = $1 AND p.status = 'paid'),
                (SELECT COALESCE(
                    SUM(rating_average * rating_count) / NULLIF(SUM(rating_count), 0), 0
                 )::DOUBLE PRECISION
                 FROM courses WHERE instructor_id = $1)
            "#,
        )
        .bind(instructor_id)
        .fetch_one(&self.pool)
        .await
        .map_err(log_err("get_instructor_stats"))?;

        Ok(InstructorDashboardStats {
            total_courses: row.0,
            published_courses: row.1,
            total_students: row.2,
            total_revenue: row.3,
            average_rating: row.4,
        })
    }
}
