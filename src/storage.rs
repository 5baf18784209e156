use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::presigning::PresigningConfig;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::MediaKind;

/// How long a presigned upload URL stays valid.
pub const UPLOAD_URL_TTL: Duration = Duration::from_secs(600);

impl MediaKind {
    /// MIME types accepted for this kind of upload.
    pub fn allowed_mime_types(&self) -> &'static [&'static str] {
        match self {
            MediaKind::Avatar | MediaKind::Thumbnail => {
                &["image/jpeg", "image/png", "image/webp", "image/gif"]
            }
            MediaKind::Video => &["video/mp4", "video/webm", "video/quicktime"],
            MediaKind::Resource => &[
                "application/pdf",
                "application/zip",
                "text/plain",
                "text/markdown",
                "image/jpeg",
                "image/png",
            ],
            MediaKind::Document => &["application/pdf", "image/jpeg", "image/png"],
        }
    }

    /// Top-level folder in the bucket.
    pub fn prefix(&self) -> &'static str {
        match self {
            MediaKind::Avatar => "avatars",
            MediaKind::Thumbnail => "thumbnails",
            MediaKind::Video => "videos",
            MediaKind::Resource => "resources",
            MediaKind::Document => "documents",
        }
    }

    pub fn accepts(&self, content_type: &str) -> bool {
        let content_type = content_type.trim().to_ascii_lowercase();
        self.allowed_mime_types().contains(&content_type.as_str())
    }
}

/// StorageService
///
/// Contract for the object storage layer. Handlers only ever ask for presigned URLs and
/// public read URLs; the bytes go directly from the browser to the bucket.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Creates the configured bucket if missing. Only called in `Env::Local` (MinIO).
    async fn ensure_bucket_exists(&self);

    /// A time-limited PUT URL for `key`, constrained to `content_type`.
    async fn get_presigned_upload_url(&self, key: &str, content_type: &str) -> AppResult<String>;

    /// Where an uploaded object can be read from.
    fn public_url(&self, key: &str) -> String;

    /// Removes an object. Missing objects are not an error.
    async fn delete_object(&self, key: &str) -> AppResult<()>;
}

/// S3StorageClient
///
/// AWS SDK client pointed at any S3-compatible host: MinIO locally, a managed bucket in
/// production. `force_path_style(true)` is required for MinIO.
#[derive(Clone)]
pub struct S3StorageClient {
    client: s3::Client,
    endpoint: String,
    bucket_name: String,
}

impl S3StorageClient {
    pub async fn new(
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        bucket: &str,
    ) -> Self {
        let credentials =
            s3::config::Credentials::new(access_key, secret_key, None, None, "static");

        let config = s3::Config::builder()
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .region(s3::config::Region::new(region.to_string()))
            .behavior_version_latest()
            .force_path_style(true)
            .build();

        Self {
            client: s3::Client::from_conf(config),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket_name: bucket.to_string(),
        }
    }
}

#[async_trait]
impl StorageService for S3StorageClient {
    async fn ensure_bucket_exists(&self) {
        // CreateBucket is idempotent enough for startup; "already owned" errors are ignored.
        if let Err(e) = self
            .client
            .create_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await
        {
            tracing::debug!("create_bucket: {:?}", e);
        }
    }

    async fn get_presigned_upload_url(&self, key: &str, content_type: &str) -> AppResult<String> {
        let presigning = PresigningConfig::expires_in(UPLOAD_URL_TTL)
            .map_err(|e| AppError::internal(format!("invalid presigning config: {e}")))?;

        let presigned_req = self
            .client
            .put_object()
            .bucket(&self.bucket_name)
            .key(key)
            // The signature covers Content-Type, so the client cannot swap the file type.
            .content_type(content_type)
            .presigned(presigning)
            .await
            .map_err(|e| AppError::Upstream(e.to_string()))?;

        Ok(presigned_req.uri().to_string())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket_name, key)
    }

    async fn delete_object(&self, key: &str) -> AppResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| AppError::Upstream(e.to_string()))
    }
}

/// sanitize_key
///
/// Drops empty, `.` and `..` segments so a user-supplied fragment cannot escape its
/// folder.
pub fn sanitize_key(key: &str) -> String {
    key.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".." && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Lowercased extension of `filename`, restricted to ASCII alphanumerics.
fn file_extension(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 10 {
        return None;
    }
    ext.chars()
        .all(|c| c.is_ascii_alphanumeric())
        .then(|| ext.to_ascii_lowercase())
}

/// object_key
///
/// `"{prefix}/{user_id}/{uuid}.{ext}"`. The original filename only contributes its
/// extension, so nothing user-controlled reaches the path.
pub fn object_key(kind: MediaKind, user_id: Uuid, filename: &str) -> AppResult<String> {
    let ext = file_extension(filename)
        .ok_or_else(|| AppError::bad_request("Filename must have a valid extension"))?;
    Ok(sanitize_key(&format!(
        "{}/{}/{}.{}",
        kind.prefix(),
        user_id,
        Uuid::new_v4(),
        ext
    )))
}

/// MockStorageService
///
/// In-process stand-in for tests. Records deleted keys so tests can assert cleanup.
#[derive(Clone, Default)]
pub struct MockStorageService {
    /// When true, all operations return a simulated failure.
    pub should_fail: bool,
    deleted: Arc<Mutex<Vec<String>>>,
}

impl MockStorageService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn deleted_keys(&self) -> Vec<String> {
        self.deleted.lock().map(|keys| keys.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl StorageService for MockStorageService {
    async fn ensure_bucket_exists(&self) {}

    async fn get_presigned_upload_url(&self, key: &str, _content_type: &str) -> AppResult<String> {
        if self.should_fail {
            return Err(AppError::Upstream("mock storage failure".to_string()));
        }
        Ok(format!(
            "http://localhost:9000/mock-bucket/{}?signature=fake",
            sanitize_key(key)
        ))
    }

    fn public_url(&self, key: &str) -> String {
        format!("http://localhost:9000/mock-bucket/{}", sanitize_key(key))
    }

    async fn delete_object(&self, key: &str) -> AppResult<()> {
        if self.should_fail {
            return Err(AppError::Upstream("mock storage failure".to_string()));
        }
        if let Ok(mut deleted) = self.deleted.lock() {
            deleted.push(key.to_string());
        }
        Ok(())
    }
}

/// StorageState
///
/// The concrete type used to share the storage service across the application state.
pub type StorageState = Arc<dyn StorageService>;
