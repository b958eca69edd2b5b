//! Session API endpoints.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use super::{success, ActingUser, ApiResult, CurrentSession};
use crate::models::{Invoice, Job, Notification, Profile};
use crate::session::Session;
use crate::sync::{Role, ViewSnapshot};
use crate::AppState;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInRequest {
    pub user_id: String,
    #[serde(default)]
    pub role: Option<Role>,
}

/// Every view of a session.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionViews {
    pub user_id: String,
    pub role: Role,
    pub profile: Profile,
    pub jobs: ViewSnapshot<Job>,
    pub notifications: ViewSnapshot<Notification>,
    pub invoices: ViewSnapshot<Invoice>,
}

impl SessionViews {
    pub async fn of(session: &Session) -> Self {
        Self {
            user_id: session.user_id().to_string(),
            role: session.role(),
            profile: session.profile.clone(),
            jobs: session.jobs.snapshot().await,
            notifications: session.notifications.snapshot().await,
            invoices: session.invoices.snapshot().await,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignOutResult {
    pub signed_out: bool,
}

/// POST /api/sessions - Sign in, starting or restarting the user's views.
pub async fn sign_in(
    State(state): State<AppState>,
    Json(request): Json<SignInRequest>,
) -> ApiResult<SessionViews> {
    let session = state
        .sessions
        .sign_in(request.user_id.trim(), request.role)
        .await?;
    success(SessionViews::of(&session).await)
}

/// DELETE /api/sessions - Sign out and stop all subscriptions.
pub async fn sign_out(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
) -> ApiResult<SignOutResult> {
    let signed_out = state.sessions.sign_out(&user_id).await;
    success(SignOutResult { signed_out })
}

/// POST /api/refresh - Reload every view of the session.
pub async fn refresh(CurrentSession(session): CurrentSession) -> ApiResult<SessionViews> {
    session.refresh().await;
    success(SessionViews::of(&session).await)
}
