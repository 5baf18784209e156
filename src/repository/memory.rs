use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
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

#[derive(Default)]
struct Store {
    users: HashMap<Uuid, User>,
    courses: HashMap<Uuid, Course>,
    sections: HashMap<Uuid, Section>,
    lessons: HashMap<Uuid, Lesson>,
    enrollments: HashMap<Uuid, Enrollment>,
    reviews: HashMap<Uuid, Review>,
    feedback: HashMap<Uuid, Feedback>,
    requests: HashMap<Uuid, InstructorRequest>,
    payments: HashMap<Uuid, Payment>,
}

impl Store {
    fn with_author(&self, mut review: Review) -> Review {
        review.author_name = self.users.get(&review.user_id).map(|u| u.name.clone());
        review
    }

    /// Mirrors the ON DELETE CASCADE rules of the schema.
    fn cascade_course(&mut self, course_id: Uuid) {
        self.sections.retain(|_, s| s.course_id != course_id);
        self.lessons.retain(|_, l| l.course_id != course_id);
        self.enrollments.retain(|_, e| e.course_id != course_id);
        self.reviews.retain(|_, r| r.course_id != course_id);
        self.payments.retain(|_, p| p.course_id != course_id);
    }

    /// Recomputes a course's enrollment count and rating from the rows that remain.
    fn recount_course(&mut self, course_id: Uuid) {
        let enrolled = self.enrollments.values().filter(|e| e.course_id == course_id).count();
        let ratings: Vec<i32> = self
            .reviews
            .values()
            .filter(|r| r.course_id == course_id)
            .map(|r| r.rating)
            .collect();
        if let Some(course) = self.courses.get_mut(&course_id) {
            course.enrollment_count = enrolled as i64;
            course.rating_count = ratings.len() as i64;
            course.rating_average = if ratings.is_empty() {
                0.0
            } else {
                f64::from(ratings.iter().sum::<i32>()) / ratings.len() as f64
            };
        }
    }
}

/// MemoryRepository
///
/// A complete in-process implementation of [`Repository`] behind a single `RwLock`.
/// Used by the test suites and for running the API without a database; it follows the
/// same uniqueness, cascade and ordering rules as the Postgres schema.
#[derive(Default)]
pub struct MemoryRepository {
    store: RwLock<Store>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn paginate<T>(mut items: Vec<T>, page: Pagination) -> Paginated<T> {
    let total = items.len() as i64;
    let start = (page.offset() as usize).min(items.len());
    let end = (start + page.limit as usize).min(items.len());
    let items: Vec<T> = items.drain(start..end).collect();
    Paginated::new(items, total, page)
}

fn course_matches(course: &Course, filter: &CourseFilter) -> bool {
    if filter.status.is_some_and(|s| course.status != s) {
        return false;
    }
    if filter.instructor_id.is_some_and(|id| course.instructor_id != id) {
        return false;
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        if !contains_ci(&course.title, search) && !contains_ci(&course.description, search) {
            return false;
        }
    }
    if let Some(category) = &filter.category {
        if !course.category.eq_ignore_ascii_case(category) {
            return false;
        }
    }
    if filter.level.is_some_and(|l| course.level != l) {
        return false;
    }
    let price = course.effective_price();
    if filter.min_price.is_some_and(|min| price < min) {
        return false;
    }
    if filter.max_price.is_some_and(|max| price > max) {
        return false;
    }
    true
}

fn sort_courses(courses: &mut [Course], sort: CourseSort) {
    courses.sort_by(|a, b| {
        let newest = b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id));
        match sort {
            CourseSort::Newest => newest,
            CourseSort::Popular => b.enrollment_count.cmp(&a.enrollment_count).then(newest),
            CourseSort::Rating => b
                .rating_average
                .total_cmp(&a.rating_average)
                .then(b.rating_count.cmp(&a.rating_count))
                .then(newest),
            CourseSort::PriceAsc => a.effective_price().cmp(&b.effective_price()).then(newest),
            CourseSort::PriceDesc => b.effective_price().cmp(&a.effective_price()).then(newest),
        }
    });
}

#[async_trait]
impl Repository for MemoryRepository {
    // --- USERS ---

    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>> {
        Ok(self.store.read().await.users.get(&id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let store = self.store.read().await;
        Ok(store
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn get_users_by_ids(&self, ids: &[Uuid]) -> AppResult<Vec<User>> {
        let store = self.store.read().await;
        Ok(ids.iter().filter_map(|id| store.users.get(id).cloned()).collect())
    }

    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        let mut store = self.store.write().await;
        let email = user.email.to_lowercase();
        if store.users.values().any(|u| u.email == email) {
            return Err(AppError::conflict("Email is already registered"));
        }
        let now = Utc::now();
        let created = User {
            id: Uuid::new_v4(),
            name: user.name,
            email,
            password_hash: user.password_hash,
            role: user.role,
            created_at: now,
            updated_at: now,
            ..User::default()
        };
        store.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_profile(&self, id: Uuid, req: UpdateProfileRequest) -> AppResult<Option<User>> {
        let mut store = self.store.write().await;
        Ok(store.users.get_mut(&id).map(|user| {
            if let Some(name) = req.name {
                user.name = name;
            }
            if let Some(bio) = req.bio {
                user.bio = Some(bio);
            }
            if let Some(avatar) = req.avatar {
                user.avatar = Some(avatar);
            }
            user.updated_at = Utc::now();
            user.clone()
        }))
    }

    async fn set_user_role(&self, id: Uuid, role: Role) -> AppResult<Option<User>> {
        let mut store = self.store.write().await;
        Ok(store.users.get_mut(&id).map(|user| {
            user.role = role;
            user.updated_at = Utc::now();
            user.clone()
        }))
    }

    async fn set_user_status(&self, id: Uuid, status: UserStatus) -> AppResult<Option<User>> {
        let mut store = self.store.write().await;
        Ok(store.users.get_mut(&id).map(|user| {
            user.status = status;
            if status == UserStatus::Banned {
                user.refresh_token_hash = None;
            }
            user.updated_at = Utc::now();
            user.clone()
        }))
    }

    async fn set_password(&self, id: Uuid, password_hash: String) -> AppResult<bool> {
        let mut store = self.store.write().await;
        Ok(store
            .users
            .get_mut(&id)
            .map(|user| {
                user.password_hash = password_hash;
                user.reset_token_hash = None;
                user.reset_token_expires = None;
                user.refresh_token_hash = None;
                user.updated_at = Utc::now();
            })
            .is_some())
    }

    async fn set_refresh_token_hash(&self, id: Uuid, hash: Option<String>) -> AppResult<()> {
        if let Some(user) = self.store.write().await.users.get_mut(&id) {
            user.refresh_token_hash = hash;
        }
        Ok(())
    }

    async fn set_reset_token(&self, id: Uuid, hash: String, expires: DateTime<Utc>) -> AppResult<()> {
        if let Some(user) = self.store.write().await.users.get_mut(&id) {
            user.reset_token_hash = Some(hash);
            user.reset_token_expires = Some(expires);
        }
        Ok(())
    }

    async fn find_user_by_reset_token(&self, hash: &str) -> AppResult<Option<User>> {
        let store = self.store.read().await;
        Ok(store
            .users
            .values()
            .find(|u| u.reset_token_hash.as_deref() == Some(hash))
            .cloned())
    }

    async fn list_users(&self, filter: UserFilter, page: Pagination) -> AppResult<Paginated<User>> {
        let store = self.store.read().await;
        let search = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let mut users: Vec<User> = store
            .users
            .values()
            .filter(|u| filter.role.is_none_or(|r| u.role == r))
            .filter(|u| filter.status.is_none_or(|s| u.status == s))
            .filter(|u| search.is_none_or(|s| contains_ci(&u.name, s) || contains_ci(&u.email, s)))
            .cloned()
            .collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(paginate(users, page))
    }

    async fn delete_user(&self, id: Uuid) -> AppResult<bool> {
        let mut store = self.store.write().await;
        if store.users.remove(&id).is_none() {
            return Ok(false);
        }
        let owned: Vec<Uuid> = store
            .courses
            .values()
            .filter(|c| c.instructor_id == id)
            .map(|c| c.id)
            .collect();
        for course_id in owned {
            store.courses.remove(&course_id);
            store.cascade_course(course_id);
        }
        // Courses the user learned in or reviewed lose those rows.
        let mut touched: Vec<Uuid> = store
            .enrollments
            .values()
            .filter(|e| e.user_id == id)
            .map(|e| e.course_id)
            .chain(store.reviews.values().filter(|r| r.user_id == id).map(|r| r.course_id))
            .collect();
        touched.sort();
        touched.dedup();

        store.enrollments.retain(|_, e| e.user_id != id);
        store.reviews.retain(|_, r| r.user_id != id);
        for course_id in touched {
            store.recount_course(course_id);
        }
        store.requests.retain(|_, r| r.user_id != id);
        store.payments.retain(|_, p| p.user_id != id);
        for feedback in store.feedback.values_mut() {
            if feedback.user_id == Some(id) {
                feedback.user_id = None;
            }
        }
        Ok(true)
    }

    // --- COURSES ---

    async fn list_courses(&self, filter: CourseFilter, page: Pagination) -> AppResult<Paginated<Course>> {
        let store = self.store.read().await;
        let mut courses: Vec<Course> = store
            .courses
            .values()
            .filter(|c| course_matches(c, &filter))
            .cloned()
            .collect();
        sort_courses(&mut courses, filter.sort);
        Ok(paginate(courses, page))
    }

    async fn get_course(&self, id: Uuid) -> AppResult<Option<Course>> {
        Ok(self.store.read().await.courses.get(&id).cloned())
    }

    async fn get_courses_by_ids(&self, ids: &[Uuid]) -> AppResult<Vec<Course>> {
        let store = self.store.read().await;
        Ok(ids.iter().filter_map(|id| store.courses.get(id).cloned()).collect())
    }

    async fn create_course(&self, course: NewCourse) -> AppResult<Course> {
        let now = Utc::now();
        let created = Course {
            id: Uuid::new_v4(),
            instructor_id: course.instructor_id,
            title: course.title,
            subtitle: course.subtitle,
            description: course.description,
            category: course.category,
            level: course.level,
            language: course.language,
            thumbnail: course.thumbnail,
            price: course.price,
            discount: course.discount,
            status: CourseStatus::Draft,
            created_at: now,
            updated_at: now,
            ..Course::default()
        };
        self.store.write().await.courses.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_course(&self, id: Uuid, req: UpdateCourseRequest) -> AppResult<Option<Course>> {
        let mut store = self.store.write().await;
        Ok(store.courses.get_mut(&id).map(|course| {
            if let Some(title) = req.title {
                course.title = title;
            }
            if let Some(subtitle) = req.subtitle {
                course.subtitle = Some(subtitle);
            }
            if let Some(description) = req.description {
                course.description = description;
            }
            if let Some(category) = req.category {
                course.category = category;
            }
            if let Some(level) = req.level {
                course.level = level;
            }
            if let Some(language) = req.language {
                course.language = language;
            }
            if let Some(thumbnail) = req.thumbnail {
                course.thumbnail = Some(thumbnail);
            }
            if let Some(price) = req.price {
                course.price = price;
            }
            if let Some(discount) = req.discount {
                course.discount = discount;
            }
            course.updated_at = Utc::now();
            course.clone()
        }))
    }

    async fn set_course_status(&self, id: Uuid, status: CourseStatus) -> AppResult<Option<Course>> {
        let mut store = self.store.write().await;
        Ok(store.courses.get_mut(&id).map(|course| {
            let now = Utc::now();
            course.status = status;
            if status == CourseStatus::Published && course.published_at.is_none() {
                course.published_at = Some(now);
            }
            course.updated_at = now;
            course.clone()
        }))
    }

    async fn delete_course(&self, id: Uuid) -> AppResult<bool> {
        let mut store = self.store.write().await;
        if store.courses.remove(&id).is_none() {
            return Ok(false);
        }
        store.cascade_course(id);
        Ok(true)
    }

    async fn count_course_lessons(&self, course_id: Uuid) -> AppResult<i64> {
        let store = self.store.read().await;
        Ok(store.lessons.values().filter(|l| l.course_id == course_id).count() as i64)
    }

    // --- CURRICULUM ---

    async fn list_sections(&self, course_id: Uuid) -> AppResult<Vec<Section>> {
        let store = self.store.read().await;
        let mut sections: Vec<Section> = store
            .sections
            .values()
            .filter(|s| s.course_id == course_id)
            .cloned()
            .collect();
        sections.sort_by(|a, b| a.position.cmp(&b.position).then(a.created_at.cmp(&b.created_at)));
        Ok(sections)
    }

    async fn get_section(&self, id: Uuid) -> AppResult<Option<Section>> {
        Ok(self.store.read().await.sections.get(&id).cloned())
    }

    async fn create_section(&self, course_id: Uuid, title: String) -> AppResult<Section> {
        let mut store = self.store.write().await;
        let position = store
            .sections
            .values()
            .filter(|s| s.course_id == course_id)
            .map(|s| s.position)
            .max()
            .unwrap_or(0)
            + 1;
        let section = Section {
            id: Uuid::new_v4(),
            course_id,
            title,
            position,
            created_at: Utc::now(),
        };
        store.sections.insert(section.id, section.clone());
        Ok(section)
    }

    async fn update_section(&self, id: Uuid, title: String) -> AppResult<Option<Section>> {
        let mut store = self.store.write().await;
        Ok(store.sections.get_mut(&id).map(|section| {
            section.title = title;
            section.clone()
        }))
    }

    async fn delete_section(&self, id: Uuid) -> AppResult<bool> {
        let mut store = self.store.write().await;
        if store.sections.remove(&id).is_none() {
            return Ok(false);
        }
        store.lessons.retain(|_, l| l.section_id != id);
        Ok(true)
    }

    async fn reorder_sections(&self, course_id: Uuid, ordered_ids: &[Uuid]) -> AppResult<()> {
        let mut store = self.store.write().await;
        for (index, section_id) in ordered_ids.iter().enumerate() {
            if let Some(section) = store.sections.get_mut(section_id) {
                if section.course_id == course_id {
                    section.position = index as i32 + 1;
                }
            }
        }
        Ok(())
    }

    async fn list_lessons(&self, course_id: Uuid) -> AppResult<Vec<Lesson>> {
        let store = self.store.read().await;
        let section_position = |section_id: &Uuid| {
            store.sections.get(section_id).map(|s| s.position).unwrap_or(i32::MAX)
        };
        let mut lessons: Vec<Lesson> = store
            .lessons
            .values()
            .filter(|l| l.course_id == course_id)
            .cloned()
            .collect();
        lessons.sort_by(|a, b| {
            section_position(&a.section_id)
                .cmp(&section_position(&b.section_id))
                .then(a.position.cmp(&b.position))
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(lessons)
    }

    async fn get_lesson(&self, id: Uuid) -> AppResult<Option<Lesson>> {
        Ok(self.store.read().await.lessons.get(&id).cloned())
    }

    async fn create_lesson(&self, lesson: NewLesson) -> AppResult<Lesson> {
        let mut store = self.store.write().await;
        let position = store
            .lessons
            .values()
            .filter(|l| l.section_id == lesson.section_id)
            .map(|l| l.position)
            .max()
            .unwrap_or(0)
            + 1;
        let now = Utc::now();
        let created = Lesson {
            id: Uuid::new_v4(),
            section_id: lesson.section_id,
            course_id: lesson.course_id,
            title: lesson.title,
            lesson_type: lesson.lesson_type,
            content: lesson.content,
            video_url: lesson.video_url,
            duration_seconds: lesson.duration_seconds,
            is_preview: lesson.is_preview,
            position,
            resources: lesson.resources,
            created_at: now,
            updated_at: now,
        };
        store.lessons.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_lesson(&self, id: Uuid, req: UpdateLessonRequest) -> AppResult<Option<Lesson>> {
        let mut store = self.store.write().await;
        Ok(store.lessons.get_mut(&id).map(|lesson| {
            if let Some(title) = req.title {
                lesson.title = title;
            }
            if let Some(lesson_type) = req.lesson_type {
                lesson.lesson_type = lesson_type;
            }
            if let Some(content) = req.content {
                lesson.content = Some(content);
            }
            if let Some(video_url) = req.video_url {
                lesson.video_url = Some(video_url);
            }
            if let Some(duration) = req.duration_seconds {
                lesson.duration_seconds = duration;
            }
            if let Some(is_preview) = req.is_preview {
                lesson.is_preview = is_preview;
            }
            if let Some(resources) = req.resources {
                lesson.resources = resources;
            }
            lesson.updated_at = Utc::now();
            lesson.clone()
        }))
    }

    async fn delete_lesson(&self, id: Uuid) -> AppResult<bool> {
        Ok(self.store.write().await.lessons.remove(&id).is_some())
    }

    // --- ENROLLMENTS ---

    async fn get_enrollment(&self, id: Uuid) -> AppResult<Option<Enrollment>> {
        Ok(self.store.read().await.enrollments.get(&id).cloned())
    }

    async fn find_enrollment(&self, user_id: Uuid, course_id: Uuid) -> AppResult<Option<Enrollment>> {
        let store = self.store.read().await;
        Ok(store
            .enrollments
            .values()
            .find(|e| e.user_id == user_id && e.course_id == course_id)
            .cloned())
    }

    async fn create_enrollment(&self, user_id: Uuid, course_id: Uuid) -> AppResult<Option<Enrollment>> {
        let mut store = self.store.write().await;
        if store
            .enrollments
            .values()
            .any(|e| e.user_id == user_id && e.course_id == course_id)
        {
            return Ok(None);
        }
        let enrollment = Enrollment {
            id: Uuid::new_v4(),
            user_id,
            course_id,
            enrolled_at: Utc::now(),
            ..Enrollment::default()
        };
        store.enrollments.insert(enrollment.id, enrollment.clone());
        if let Some(course) = store.courses.get_mut(&course_id) {
            course.enrollment_count += 1;
        }
        Ok(Some(enrollment))
    }

    async fn list_user_enrollments(&self, user_id: Uuid) -> AppResult<Vec<Enrollment>> {
        let store = self.store.read().await;
        let mut enrollments: Vec<Enrollment> = store
            .enrollments
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        enrollments.sort_by(|a, b| b.enrolled_at.cmp(&a.enrolled_at));
        Ok(enrollments)
    }

    async fn list_course_enrollments(&self, course_id: Uuid) -> AppResult<Vec<Enrollment>> {
        let store = self.store.read().await;
        let mut enrollments: Vec<Enrollment> = store
            .enrollments
            .values()
            .filter(|e| e.course_id == course_id)
            .cloned()
            .collect();
        enrollments.sort_by(|a, b| b.enrolled_at.cmp(&a.enrolled_at));
        Ok(enrollments)
    }

    async fn save_enrollment_progress(&self, enrollment: &Enrollment) -> AppResult<Option<Enrollment>> {
        let mut store = self.store.write().await;
        Ok(store.enrollments.get_mut(&enrollment.id).map(|stored| {
            stored.progress = enrollment.progress;
            stored.completed_lessons = enrollment.completed_lessons.clone();
            stored.completed_at = enrollment.completed_at;
            stored.certificate_id = enrollment.certificate_id;
            stored.clone()
        }))
    }

    // --- REVIEWS ---

    async fn list_reviews(&self, course_id: Uuid, page: Pagination) -> AppResult<Paginated<Review>> {
        let store = self.store.read().await;
        let mut reviews: Vec<Review> = store
            .reviews
            .values()
            .filter(|r| r.course_id == course_id)
            .map(|r| store.with_author(r.clone()))
            .collect();
        reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(paginate(reviews, page))
    }

    async fn get_review(&self, id: Uuid) -> AppResult<Option<Review>> {
        let store = self.store.read().await;
        Ok(store.reviews.get(&id).map(|r| store.with_author(r.clone())))
    }

    async fn find_review(&self, user_id: Uuid, course_id: Uuid) -> AppResult<Option<Review>> {
        let store = self.store.read().await;
        Ok(store
            .reviews
            .values()
            .find(|r| r.user_id == user_id && r.course_id == course_id)
            .map(|r| store.with_author(r.clone())))
    }

    async fn create_review(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        rating: i32,
        comment: String,
    ) -> AppResult<Review> {
        let mut store = self.store.write().await;
        if store
            .reviews
            .values()
            .any(|r| r.user_id == user_id && r.course_id == course_id)
        {
            return Err(AppError::conflict("You have already reviewed this course"));
        }
        let now = Utc::now();
        let review = Review {
            id: Uuid::new_v4(),
            user_id,
            course_id,
            rating,
            comment,
            created_at: now,
            updated_at: now,
            author_name: None,
        };
        store.reviews.insert(review.id, review.clone());
        Ok(store.with_author(review))
    }

    async fn update_review(&self, id: Uuid, req: UpdateReviewRequest) -> AppResult<Option<Review>> {
        let mut store = self.store.write().await;
        let updated = store.reviews.get_mut(&id).map(|review| {
            if let Some(rating) = req.rating {
                review.rating = rating;
            }
            if let Some(comment) = req.comment {
                review.comment = comment;
            }
            review.updated_at = Utc::now();
            review.clone()
        });
        Ok(updated.map(|r| store.with_author(r)))
    }

    async fn delete_review(&self, id: Uuid) -> AppResult<bool> {
        Ok(self.store.write().await.reviews.remove(&id).is_some())
    }

    async fn refresh_course_rating(&self, course_id: Uuid) -> AppResult<()> {
        self.store.write().await.recount_course(course_id);
        Ok(())
    }

    // --- FEEDBACK ---

    async fn create_feedback(&self, user_id: Option<Uuid>, req: CreateFeedbackRequest) -> AppResult<Feedback> {
        let now = Utc::now();
        let feedback = Feedback {
            id: Uuid::new_v4(),
            user_id,
            name: req.name,
            email: req.email,
            subject: req.subject,
            message: req.message,
            status: FeedbackStatus::New,
            reply: None,
            created_at: now,
            updated_at: now,
        };
        self.store.write().await.feedback.insert(feedback.id, feedback.clone());
        Ok(feedback)
    }

    async fn get_feedback(&self, id: Uuid) -> AppResult<Option<Feedback>> {
        Ok(self.store.read().await.feedback.get(&id).cloned())
    }

    async fn list_feedback(
        &self,
        status: Option<FeedbackStatus>,
        page: Pagination,
    ) -> AppResult<Paginated<Feedback>> {
        let store = self.store.read().await;
        let mut items: Vec<Feedback> = store
            .feedback
            .values()
            .filter(|f| status.is_none_or(|s| f.status == s))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(paginate(items, page))
    }

    async fn list_user_feedback(&self, user_id: Uuid) -> AppResult<Vec<Feedback>> {
        let store = self.store.read().await;
        let mut items: Vec<Feedback> = store
            .feedback
            .values()
            .filter(|f| f.user_id == Some(user_id))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn set_feedback_status(&self, id: Uuid, status: FeedbackStatus) -> AppResult<Option<Feedback>> {
        let mut store = self.store.write().await;
        Ok(store.feedback.get_mut(&id).map(|feedback| {
            feedback.status = status;
            feedback.updated_at = Utc::now();
            feedback.clone()
        }))
    }

    async fn set_feedback_reply(&self, id: Uuid, reply: String) -> AppResult<Option<Feedback>> {
        let mut store = self.store.write().await;
        Ok(store.feedback.get_mut(&id).map(|feedback| {
            feedback.reply = Some(reply);
            feedback.status = FeedbackStatus::Replied;
            feedback.updated_at = Utc::now();
            feedback.clone()
        }))
    }

    async fn delete_feedback(&self, id: Uuid) -> AppResult<bool> {
        Ok(self.store.write().await.feedback.remove(&id).is_some())
    }

    // --- INSTRUCTOR REQUESTS ---

    async fn get_instructor_request(&self, id: Uuid) -> AppResult<Option<InstructorRequest>> {
        Ok(self.store.read().await.requests.get(&id).cloned())
    }

    async fn find_instructor_request_by_user(&self, user_id: Uuid) -> AppResult<Option<InstructorRequest>> {
        let store = self.store.read().await;
        Ok(store.requests.values().find(|r| r.user_id == user_id).cloned())
    }

    async fn upsert_instructor_request(
        &self,
        user_id: Uuid,
        message: String,
        documents: Vec<String>,
    ) -> AppResult<InstructorRequest> {
        let mut store = self.store.write().await;
        let now = Utc::now();
        if let Some(existing) = store.requests.values_mut().find(|r| r.user_id == user_id) {
            existing.message = message;
            existing.documents = documents;
            existing.status = RequestStatus::Pending;
            existing.admin_feedback = None;
            existing.reviewed_at = None;
            existing.created_at = now;
            return Ok(existing.clone());
        }
        let request = InstructorRequest {
            id: Uuid::new_v4(),
            user_id,
            message,
            documents,
            status: RequestStatus::Pending,
            admin_feedback: None,
            created_at: now,
            reviewed_at: None,
        };
        store.requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn list_instructor_requests(
        &self,
        status: Option<RequestStatus>,
        page: Pagination,
    ) -> AppResult<Paginated<InstructorRequest>> {
        let store = self.store.read().await;
        let mut items: Vec<InstructorRequest> = store
            .requests
            .values()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(paginate(items, page))
    }

    async fn review_instructor_request(
        &self,
        id: Uuid,
        status: RequestStatus,
        feedback: Option<String>,
    ) -> AppResult<Option<InstructorRequest>> {
        let mut store = self.store.write().await;
        Ok(store
            .requests
            .get_mut(&id)
            .filter(|r| r.status == RequestStatus::Pending)
            .map(|request| {
                request.status = status;
                request.admin_feedback = feedback;
                request.reviewed_at = Some(Utc::now());
                request.clone()
            }))
    }

    // --- PAYMENTS ---

    async fn create_payment(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        amount: i64,
        currency: String,
    ) -> AppResult<Payment> {
        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            user_id,
            course_id,
            amount,
            currency,
            provider_session_id: None,
            provider_intent_id: None,
            status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.store.write().await.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn attach_payment_provider_ids(
        &self,
        id: Uuid,
        session_id: Option<String>,
        intent_id: Option<String>,
    ) -> AppResult<Option<Payment>> {
        let mut store = self.store.write().await;
        Ok(store.payments.get_mut(&id).map(|payment| {
            if session_id.is_some() {
                payment.provider_session_id = session_id;
            }
            if intent_id.is_some() {
                payment.provider_intent_id = intent_id;
            }
            payment.updated_at = Utc::now();
            payment.clone()
        }))
    }

    async fn get_payment(&self, id: Uuid) -> AppResult<Option<Payment>> {
        Ok(self.store.read().await.payments.get(&id).cloned())
    }

    async fn find_payment_by_provider_id(&self, provider_id: &str) -> AppResult<Option<Payment>> {
        let store = self.store.read().await;
        Ok(store
            .payments
            .values()
            .find(|p| {
                p.provider_session_id.as_deref() == Some(provider_id)
                    || p.provider_intent_id.as_deref() == Some(provider_id)
            })
            .cloned())
    }

    async fn set_payment_status(&self, id: Uuid, status: PaymentStatus) -> AppResult<Option<Payment>> {
        let mut store = self.store.write().await;
        Ok(store.payments.get_mut(&id).map(|payment| {
            payment.status = status;
            payment.updated_at = Utc::now();
            payment.clone()
        }))
    }

    async fn list_user_payments(&self, user_id: Uuid) -> AppResult<Vec<Payment>> {
        let store = self.store.read().await;
        let mut items: Vec<Payment> = store
            .payments
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn list_payments(
        &self,
        status: Option<PaymentStatus>,
        page: Pagination,
    ) -> AppResult<Paginated<Payment>> {
        let store = self.store.read().await;
        let mut items: Vec<Payment> = store
            .payments
            .values()
            .filter(|p| status.is_none_or(|s| p.status == s))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(paginate(items, page))
    }

    // --- DASHBOARDS ---

    async fn get_admin_stats(&self) -> AppResult<AdminDashboardStats> {
        let store = self.store.read().await;
        let count_role = |role: Role| store.users.values().filter(|u| u.role == role).count() as i64;
        Ok(AdminDashboardStats {
            total_users: store.users.len() as i64,
            total_students: count_role(Role::Student),
            total_instructors: count_role(Role::Instructor),
            total_courses: store.courses.len() as i64,
            published_courses: store.courses.values().filter(|c| c.is_published()).count() as i64,
            total_enrollments: store.enrollments.len() as i64,
            total_revenue: store
                .payments
                .values()
                .filter(|p| p.status == PaymentStatus::Paid)
                .map(|p| p.amount)
                .sum(),
            pending_instructor_requests: store
                .requests
                .values()
                .filter(|r| r.status == RequestStatus::Pending)
                .count() as i64,
            new_feedback: store
                .feedback
                .values()
                .filter(|f| f.status == FeedbackStatus::New)
                .count() as i64,
        })
    }

    async fn get_instructor_stats(&self, instructor_id: Uuid) -> AppResult<InstructorDashboardStats> {
        let store = self.store.read().await;
        let courses: Vec<&Course> = store
            .courses
            .values()
            .filter(|c| c.instructor_id == instructor_id)
            .collect();
        let owns = |course_id: &Uuid| courses.iter().any(|c| &c.id == course_id);

        let rating_count: i64 = courses.iter().map(|c| c.rating_count).sum();
        let rating_sum: f64 = courses
            .iter()
            .map(|c| c.rating_average * c.rating_count as f64)
            .sum();

        Ok(InstructorDashboardStats {
            total_courses: courses.len() as i64,
            published_courses: courses.iter().filter(|c| c.is_published()).count() as i64,
            total_students: store.enrollments.values().filter(|e| owns(&e.course_id)).count() as i64,
            total_revenue: store
                .payments
                .values()
                .filter(|p| p.status == PaymentStatus::Paid && owns(&p.course_id))
                .map(|p| p.amount)
                .sum(),
            average_rating: if rating_count == 0 {
                0.0
            } else {
                rating_sum / rating_count as f64
            },
        })
    }
}
