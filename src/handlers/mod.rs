//! HTTP handlers, one module per resource group.
//!
//! Handlers extract `AuthUser` / `MaybeAuthUser` for identity, load the resource through
//! the repository, check role and ownership, and return `AppResult` so failures render
//! through `AppError`.

use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::models::{Course, Pagination};
use crate::repository::RepositoryState;

pub mod admin;
pub mod auth;
pub mod courses;
pub mod curriculum;
pub mod enrollments;
pub mod feedback;
pub mod instructor_requests;
pub mod payments;
pub mod reviews;
pub mod uploads;
pub mod users;

/// PageQuery
///
/// Plain `?page=&limit=` parameters for paginated listings.
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct PageQuery {
    /// 1-based page number.
    pub page: Option<u32>,
    /// Page size, clamped to 1..=50.
    pub limit: Option<u32>,
}

impl PageQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.page, self.limit)
    }
}

/// Loads a course or fails with 404.
pub(crate) async fn find_course(repo: &RepositoryState, id: Uuid) -> AppResult<Course> {
    repo.get_course(id)
        .await?
        .ok_or_else(|| AppError::not_found("Course not found"))
}

/// Loads a course the caller may edit: 404 when missing, 403 unless owner or admin.
pub(crate) async fn owned_course(repo: &RepositoryState, user: &AuthUser, id: Uuid) -> AppResult<Course> {
    let course = find_course(repo, id).await?;
    user.ensure_owner_or_admin(course.instructor_id)?;
    Ok(course)
}

/// Drafts are only visible to their owner and to admins; everyone else gets 404.
pub(crate) fn can_view_course(course: &Course, viewer: Option<&AuthUser>) -> bool {
    course.is_published() || viewer.is_some_and(|u| u.is_owner_or_admin(course.instructor_id))
}

/// Trims `value` and rejects it when empty.
pub(crate) fn required_text(field: &str, value: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::bad_request(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

/// Same as [`required_text`] for optional partial-update fields.
pub(crate) fn optional_text(field: &str, value: Option<String>) -> AppResult<Option<String>> {
    value.map(|v| required_text(field, &v)).transpose()
}

/// Lowercases and sanity-checks an email address.
pub(crate) fn normalize_email(email: &str) -> AppResult<String> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(AppError::bad_request("A valid email address is required"));
    }
    Ok(email)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email("  Ada@Example.COM ").unwrap(), "ada@example.com");
        assert!(normalize_email("ada").is_err());
        assert!(normalize_email("ada@localhost").is_err());
        assert!(normalize_email("a b@example.com").is_err());
        assert!(normalize_email("a@b@example.com").is_err());
    }

    #[test]
    fn required_text_trims() {
        assert_eq!(required_text("title", "  Rust  ").unwrap(), "Rust");
        assert!(required_text("title", "   ").is_err());
        assert_eq!(optional_text("title", None).unwrap(), None);
    }
}
