use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Path, State};
use serde::Deserialize;
use serde_json::{json, Value};

use super::auth::CurrentUser;
use super::extract::{Json, Query};
use crate::error::AppError;
use crate::service::{App, RefreshReport};
use crate::window::Lookback;

type ApiResult = Result<Json<Value>, AppError>;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilesParams {
    pub user_id: Option<String>,
    pub timeframe: Option<String>,
}

#[derive(Deserialize)]
pub struct TimeframeParams {
    pub timeframe: Option<String>,
}

#[derive(Deserialize)]
pub struct AddProfileBody {
    pub username: String,
    pub timeframe: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateTeamBody {
    pub name: String,
}

#[derive(Deserialize)]
pub struct InviteBody {
    pub email: String,
    pub role: Option<String>,
}

#[derive(Deserialize)]
pub struct RoleBody {
    pub role: String,
}

fn lookback(timeframe: Option<&str>) -> Result<Lookback, AppError> {
    Lookback::parse_or_default(timeframe).map_err(|e| AppError::bad_request(e.to_string()))
}

/// Runs a store-bound read on the blocking pool.
async fn blocking<T, F>(app: Arc<App>, f: F) -> Result<T, AppError>
where
    F: FnOnce(&App) -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&app))
        .await
        .context("Store task failed")?
}

fn refresh_body(report: RefreshReport) -> Value {
    json!({
        "success": true,
        "refreshedCount": report.refreshed_count,
        "dataChanged": report.data_changed,
    })
}

/// GET /api/health
pub async fn health() -> Json<Value> {
    Json(json!({ "success": true, "status": "ok" }))
}

// ============================================================================
// TikTok profiles
// ============================================================================

/// GET /api/tiktok/profiles?userId=&timeframe=
pub async fn list_profiles(
    State(app): State<Arc<App>>,
    user: CurrentUser,
    Query(params): Query<ProfilesParams>,
) -> ApiResult {
    if let Some(requested) = params.user_id.as_deref() {
        if requested != user.id {
            return Err(AppError::forbidden("Cannot list another user's profiles"));
        }
    }
    let lookback = lookback(params.timeframe.as_deref())?;
    let profiles = blocking(app, move |app| app.list_profiles(&user.id, lookback)).await?;
    Ok(Json(json!({ "success": true, "profiles": profiles })))
}

/// POST /api/tiktok/profiles
pub async fn add_profile(
    State(app): State<Arc<App>>,
    user: CurrentUser,
    Json(body): Json<AddProfileBody>,
) -> ApiResult {
    let lookback = lookback(body.timeframe.as_deref())?;
    let profile = app.add_profile(&user.id, &body.username, lookback).await?;
    Ok(Json(json!({ "success": true, "profile": profile })))
}

/// DELETE /api/tiktok/profiles/{username}
pub async fn remove_profile(
    State(app): State<Arc<App>>,
    user: CurrentUser,
    Path(username): Path<String>,
) -> ApiResult {
    app.remove_profile(&user.id, &username)?;
    Ok(Json(json!({ "success": true })))
}

/// GET /api/tiktok/analytics/{username}?timeframe=
pub async fn profile_analytics(
    State(app): State<Arc<App>>,
    _user: CurrentUser,
    Path(username): Path<String>,
    Query(params): Query<TimeframeParams>,
) -> ApiResult {
    let lookback = lookback(params.timeframe.as_deref())?;
    let analytics = blocking(app, move |app| app.profile_analytics(&username, lookback)).await?;
    Ok(Json(json!({ "success": true, "analytics": analytics })))
}

/// POST /api/tiktok/refresh-all
pub async fn refresh_all(State(app): State<Arc<App>>, _user: CurrentUser) -> ApiResult {
    let report = app.refresh_all().await?;
    Ok(Json(refresh_body(report)))
}

/// POST /api/tiktok/profiles/{username}/refresh
pub async fn refresh_profile(
    State(app): State<Arc<App>>,
    _user: CurrentUser,
    Path(username): Path<String>,
) -> ApiResult {
    let report = app.refresh_profile(&username).await?;
    Ok(Json(refresh_body(report)))
}

/// GET /api/tiktok/refresh-status
pub async fn refresh_status(State(app): State<Arc<App>>, _user: CurrentUser) -> ApiResult {
    let last = app.refresh_status()?;
    Ok(Json(json!({ "success": true, "lastRefresh": last })))
}

// ============================================================================
// Teams
// ============================================================================

/// GET /api/teams
pub async fn list_teams(State(app): State<Arc<App>>, user: CurrentUser) -> ApiResult {
    let teams = app.list_teams(&user.id)?;
    Ok(Json(json!({ "success": true, "teams": teams })))
}

/// POST /api/teams
pub async fn create_team(
    State(app): State<Arc<App>>,
    user: CurrentUser,
    Json(body): Json<CreateTeamBody>,
) -> ApiResult {
    let team = app.create_team(&user.id, &body.name)?;
    Ok(Json(json!({ "success": true, "team": team })))
}

/// GET /api/teams/{id}/members
pub async fn team_members(
    State(app): State<Arc<App>>,
    user: CurrentUser,
    Path(team_id): Path<String>,
) -> ApiResult {
    let members = app.team_members(&user.id, &team_id)?;
    Ok(Json(json!({ "success": true, "members": members })))
}

/// PATCH /api/teams/{id}/members/{member_id}
pub async fn update_member_role(
    State(app): State<Arc<App>>,
    user: CurrentUser,
    Path((team_id, member_id)): Path<(String, String)>,
    Json(body): Json<RoleBody>,
) -> ApiResult {
    let member = app.update_member_role(&user.id, &team_id, &member_id, &body.role)?;
    Ok(Json(json!({ "success": true, "member": member })))
}

/// DELETE /api/teams/{id}/members/{member_id}
pub async fn remove_member(
    State(app): State<Arc<App>>,
    user: CurrentUser,
    Path((team_id, member_id)): Path<(String, String)>,
) -> ApiResult {
    app.remove_member(&user.id, &team_id, &member_id)?;
    Ok(Json(json!({ "success": true })))
}

/// GET /api/teams/{id}/invitations
pub async fn list_invitations(
    State(app): State<Arc<App>>,
    user: CurrentUser,
    Path(team_id): Path<String>,
) -> ApiResult {
    let invitations = app.list_invitations(&user.id, &team_id)?;
    Ok(Json(json!({ "success": true, "invitations": invitations })))
}

/// POST /api/teams/{id}/invitations
pub async fn invite_member(
    State(app): State<Arc<App>>,
    user: CurrentUser,
    Path(team_id): Path<String>,
    Json(body): Json<InviteBody>,
) -> ApiResult {
    let invitation = app.invite_member(&user.id, &team_id, &body.email, body.role.as_deref())?;
    Ok(Json(json!({ "success": true, "invitation": invitation })))
}

/// POST /api/invitations/{token}/accept
pub async fn accept_invitation(
    State(app): State<Arc<App>>,
    user: CurrentUser,
    Path(token): Path<String>,
) -> ApiResult {
    let member = app.accept_invitation(&user.id, user.email.as_deref(), &token)?;
    Ok(Json(json!({ "success": true, "member": member })))
}
