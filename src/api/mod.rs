//! REST API module.
//!
//! Every route under `/api` acts on behalf of the user named by the
//! `x-user-id` header. View routes answer with the current state of the
//! user's synchronized collection.

mod invoices;
mod jobs;
mod notifications;
mod profiles;
mod sessions;

pub use invoices::*;
pub use jobs::*;
pub use notifications::*;
pub use profiles::*;
pub use sessions::*;

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::session::Session;
use crate::sync::Selection;
use crate::AppState;

/// Header naming the acting user.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Success response envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Response type that can be either success or error.
pub type ApiResult<T> = Result<ApiResponse<T>, AppError>;

/// Create a successful API response.
pub fn success<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(ApiResponse::new(data))
}

/// Request body for switching a view's tab.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SelectionRequest {
    pub selection: Selection,
}

/// Id of the acting user, from the `x-user-id` header.
#[derive(Debug, Clone)]
pub struct ActingUser(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ActingUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| ActingUser(id.to_string()))
            .ok_or_else(|| AppError::Unauthorized(format!("Missing {} header", USER_ID_HEADER)))
    }
}

/// The running session of the acting user.
pub struct CurrentSession(pub Arc<Session>);

impl FromRequestParts<AppState> for CurrentSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let ActingUser(user_id) = ActingUser::from_request_parts(parts, state).await?;
        state
            .sessions
            .get(&user_id)
            .await
            .map(CurrentSession)
            .ok_or_else(|| AppError::Unauthorized("No active session, sign in first".to_string()))
    }
}
