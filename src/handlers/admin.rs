use axum::{Json, extract::State};

use crate::{AppState, error::AppResult, models::AdminDashboardStats};

/// get_admin_stats
///
/// [Admin Route] Platform-wide totals for the dashboard. Revenue only counts payments
/// that settled.
#[utoipa::path(
    get,
    path = "/api/v1/admin/stats",
    tag = "admin",
    responses(
        (status = 200, description = "Stats", body = AdminDashboardStats),
        (status = 403, description = "Admins only")
    )
)]
pub async fn get_admin_stats(State(state): State<AppState>) -> AppResult<Json<AdminDashboardStats>> {
    Ok(Json(state.repo.get_admin_stats().await?))
}
