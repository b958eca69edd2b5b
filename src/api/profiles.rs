//! Profile API endpoints.

use axum::{extract::State, Json};

use super::{success, ActingUser, ApiResult};
use crate::errors::AppError;
use crate::models::{CreateProfileRequest, Profile, UpdateProfileRequest};
use crate::remote::{RemoteStore, Table};
use crate::AppState;

/// GET /api/profile - Profile of the acting user.
pub async fn get_profile(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
) -> ApiResult<Profile> {
    match state.store.fetch(Table::Profiles, &user_id).await? {
        Some(row) => success(Profile::from_row(&row)),
        None => Err(AppError::NotFound(format!("Profile {} not found", user_id))),
    }
}

/// PUT /api/profile - Update the acting user's profile.
pub async fn update_profile(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    Json(request): Json<UpdateProfileRequest>,
) -> ApiResult<Profile> {
    request.validate()?;
    let row = state
        .store
        .update(Table::Profiles, &user_id, request.to_patch())
        .await?;
    success(Profile::from_row(&row))
}

/// POST /api/profiles - Register a profile.
pub async fn create_profile(
    State(state): State<AppState>,
    Json(request): Json<CreateProfileRequest>,
) -> ApiResult<Profile> {
    request.validate()?;
    let id = request
        .id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let row = state
        .store
        .insert(Table::Profiles, request.to_row(id))
        .await?;
    success(Profile::from_row(&row))
}
