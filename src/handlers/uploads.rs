use axum::{Json, extract::State};

use crate::{
    AppState,
    auth::AuthUser,
    error::{AppError, AppResult},
    models::{MediaKind, PresignedUrlRequest, PresignedUrlResponse, Role},
    storage::object_key,
};

/// get_presigned_url
///
/// [Authenticated Route] Generates a temporary URL for a direct browser-to-bucket upload.
///
/// The URL expires after ten minutes and is constrained to the declared MIME type, which
/// must be one the media kind accepts. Keys are namespaced by kind and uploader
/// (`videos/{user_id}/{uuid}.mp4`). Course media (thumbnails, videos, resources) is
/// limited to instructors and admins.
#[utoipa::path(
    post,
    path = "/api/v1/uploads/presigned",
    tag = "uploads",
    request_body = PresignedUrlRequest,
    responses(
        (status = 200, description = "Upload URL", body = PresignedUrlResponse),
        (status = 400, description = "File type not allowed for this kind"),
        (status = 403, description = "Course media requires an instructor")
    )
)]
pub async fn get_presigned_url(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<PresignedUrlRequest>,
) -> AppResult<Json<PresignedUrlResponse>> {
    if matches!(
        payload.kind,
        MediaKind::Thumbnail | MediaKind::Video | MediaKind::Resource
    ) {
        user.require_role(&[Role::Instructor, Role::Admin])?;
    }
    if !payload.kind.accepts(&payload.file_type) {
        return Err(AppError::bad_request(format!(
            "File type {} is not allowed; expected one of: {}",
            payload.file_type,
            payload.kind.allowed_mime_types().join(", ")
        )));
    }

    let key = object_key(payload.kind, user.id, &payload.filename)?;
    let upload_url = state
        .storage
        .get_presigned_upload_url(&key, payload.file_type.trim())
        .await
        .inspect_err(|e| tracing::error!(key = %key, error = %e, "presign failed"))?;

    Ok(Json(PresignedUrlResponse {
        upload_url,
        public_url: state.storage.public_url(&key),
        resource_key: key,
    }))
}
