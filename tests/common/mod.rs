//! Shared fixtures for the integration suites: an `AppState` wired to the in-memory
//! repository and the mock services, plus seeding helpers.
#![allow(dead_code)]

use skill_up::{
    AppState, MailerState, MemoryRepository, MockMailer, MockPaymentGateway, MockStorageService,
    PaymentsState, RepositoryState, StorageState,
    auth::AuthUser,
    config::AppConfig,
    models::{
        Course, CourseLevel, CourseStatus, Lesson, LessonType, NewCourse, NewLesson, NewUser,
        Role, Section, User,
    },
    password::hash_password,
};
use std::sync::Arc;

pub const TEST_PASSWORD: &str = "password123";
pub const WEBHOOK_SECRET: &str = "whsec_test";

/// The state plus handles on the mocks, so tests can inspect what was sent.
pub struct TestContext {
    pub state: AppState,
    pub mailer: MockMailer,
    pub storage: MockStorageService,
    pub payments: MockPaymentGateway,
}

pub fn create_test_state() -> TestContext {
    create_test_state_with(
        MockMailer::new(),
        MockStorageService::new(),
        MockPaymentGateway::new(),
    )
}

pub fn create_test_state_with(
    mailer: MockMailer,
    storage: MockStorageService,
    payments: MockPaymentGateway,
) -> TestContext {
    let state = AppState {
        repo: Arc::new(MemoryRepository::new()) as RepositoryState,
        storage: Arc::new(storage.clone()) as StorageState,
        mailer: Arc::new(mailer.clone()) as MailerState,
        payments: Arc::new(payments.clone()) as PaymentsState,
        config: AppConfig::default(),
    };
    TestContext {
        state,
        mailer,
        storage,
        payments,
    }
}

pub async fn seed_user(state: &AppState, name: &str, email: &str, role: Role) -> User {
    state
        .repo
        .create_user(NewUser {
            name: name.to_string(),
            email: email.to_string(),
            password_hash: hash_password(TEST_PASSWORD).unwrap(),
            role,
        })
        .await
        .unwrap()
}

pub fn auth(user: &User) -> AuthUser {
    AuthUser {
        id: user.id,
        role: user.role,
    }
}

pub async fn seed_course(state: &AppState, instructor: &User, title: &str, price: i64) -> Course {
    state
        .repo
        .create_course(NewCourse {
            instructor_id: instructor.id,
            title: title.to_string(),
            subtitle: None,
            description: format!("Everything about {title}"),
            category: "Programming".to_string(),
            level: CourseLevel::Beginner,
            language: "English".to_string(),
            thumbnail: None,
            price,
            discount: 0,
        })
        .await
        .unwrap()
}

pub async fn seed_lesson(state: &AppState, section: &Section, title: &str, is_preview: bool) -> Lesson {
    state
        .repo
        .create_lesson(NewLesson {
            section_id: section.id,
            course_id: section.course_id,
            title: title.to_string(),
            lesson_type: LessonType::Text,
            content: Some(format!("Body of {title}")),
            video_url: None,
            duration_seconds: 120,
            is_preview,
            resources: vec![],
        })
        .await
        .unwrap()
}

/// A published course with one section and two lessons; the first is a free preview.
pub async fn seed_published_course(
    state: &AppState,
    instructor: &User,
    title: &str,
    price: i64,
) -> (Course, Section, Vec<Lesson>) {
    let course = seed_course(state, instructor, title, price).await;
    let section = state
        .repo
        .create_section(course.id, "Getting started".to_string())
        .await
        .unwrap();
    let preview = seed_lesson(state, &section, "Welcome", true).await;
    let locked = seed_lesson(state, &section, "Deep dive", false).await;
    let course = state
        .repo
        .set_course_status(course.id, CourseStatus::Published)
        .await
        .unwrap()
        .unwrap();
    (course, section, vec![preview, locked])
}
