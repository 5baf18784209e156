mod common;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use common::{auth, create_test_state, create_test_state_with, seed_user};
use skill_up::{
    MockMailer, MockPaymentGateway, MockStorageService,
    handlers::uploads::get_presigned_url,
    models::{MediaKind, PresignedUrlRequest, Role},
};

fn upload(kind: MediaKind, filename: &str, file_type: &str) -> Json<PresignedUrlRequest> {
    Json(PresignedUrlRequest {
        kind,
        filename: filename.to_string(),
        file_type: file_type.to_string(),
    })
}

#[tokio::test]
async fn test_presign_video_for_instructor() {
    let ctx = create_test_state();
    let instructor = seed_user(&ctx.state, "Tess", "tess@example.com", Role::Instructor).await;

    let Json(response) = get_presigned_url(
        auth(&instructor),
        State(ctx.state.clone()),
        upload(MediaKind::Video, "lesson-1.MP4", "video/mp4"),
    )
    .await
    .unwrap();

    let prefix = format!("videos/{}/", instructor.id);
    assert!(response.resource_key.starts_with(&prefix));
    assert!(response.resource_key.ends_with(".mp4"));
    assert!(response.upload_url.contains(&response.resource_key));
    assert!(response.public_url.ends_with(&response.resource_key));
}

#[tokio::test]
async fn test_students_may_upload_avatars_and_documents_only() {
    let ctx = create_test_state();
    let student = seed_user(&ctx.state, "Sam", "sam@example.com", Role::Student).await;

    let Json(avatar) = get_presigned_url(
        auth(&student),
        State(ctx.state.clone()),
        upload(MediaKind::Avatar, "me.png", "image/png"),
    )
    .await
    .unwrap();
    assert!(avatar.resource_key.starts_with("avatars/"));

    let Json(document) = get_presigned_url(
        auth(&student),
        State(ctx.state.clone()),
        upload(MediaKind::Document, "cv.pdf", "application/pdf"),
    )
    .await
    .unwrap();
    assert!(document.resource_key.starts_with(&format!("documents/{}/", student.id)));

    for kind in [MediaKind::Thumbnail, MediaKind::Video, MediaKind::Resource] {
        let err = get_presigned_url(
            auth(&student),
            State(ctx.state.clone()),
            upload(kind, "file.png", "image/png"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
    }
}

#[tokio::test]
async fn test_presign_rejects_wrong_mime_type() {
    let ctx = create_test_state();
    let instructor = seed_user(&ctx.state, "Tess", "tess@example.com", Role::Instructor).await;

    let err = get_presigned_url(
        auth(&instructor),
        State(ctx.state.clone()),
        upload(MediaKind::Thumbnail, "cover.exe", "application/x-msdownload"),
    )
    .await
    .unwrap_err();

    assert!(err.to_string().contains("image/png"));
    assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_presign_requires_an_extension() {
    let ctx = create_test_state();
    let instructor = seed_user(&ctx.state, "Tess", "tess@example.com", Role::Instructor).await;

    let err = get_presigned_url(
        auth(&instructor),
        State(ctx.state.clone()),
        upload(MediaKind::Video, "lesson", "video/mp4"),
    )
    .await
    .unwrap_err();
    assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_presign_storage_failure_is_bad_gateway() {
    let ctx = create_test_state_with(
        MockMailer::new(),
        MockStorageService::new_failing(),
        MockPaymentGateway::new(),
    );
    let instructor = seed_user(&ctx.state, "Tess", "tess@example.com", Role::Instructor).await;

    let err = get_presigned_url(
        auth(&instructor),
        State(ctx.state.clone()),
        upload(MediaKind::Video, "lesson.mp4", "video/mp4"),
    )
    .await
    .unwrap_err();
    assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
}
