//! Notification API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::json;

use super::{success, ApiResult, CurrentSession, SelectionRequest};
use crate::errors::AppError;
use crate::models::{wire, Notification, NotificationAction};
use crate::remote::{RemoteStore, Table};
use crate::sync::{Mutation, Selection, ViewSnapshot};
use crate::AppState;

/// GET /api/notifications - Current notification view.
pub async fn list_notifications(
    CurrentSession(session): CurrentSession,
) -> ApiResult<ViewSnapshot<Notification>> {
    success(session.notifications.snapshot().await)
}

/// PUT /api/notifications/selection - Switch between all and unread.
pub async fn select_notifications(
    CurrentSession(session): CurrentSession,
    Json(request): Json<SelectionRequest>,
) -> ApiResult<ViewSnapshot<Notification>> {
    if !matches!(request.selection, Selection::All | Selection::Unread) {
        return Err(AppError::Validation(format!(
            "'{}' is not a notification tab",
            request.selection.as_str()
        )));
    }
    session.notifications.set_selection(request.selection).await?;
    success(session.notifications.snapshot().await)
}

/// POST /api/notifications/:id/read - Mark one notification read.
pub async fn mark_notification_read(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<String>,
) -> ApiResult<ViewSnapshot<Notification>> {
    let store = state.store.clone();
    let user_id = session.user_id().to_string();
    let target = id.clone();

    session
        .notifications
        .mutate(
            Mutation::Apply {
                id,
                action: NotificationAction::MarkRead,
            },
            async move {
                let row = store.fetch(Table::Notifications, &target).await?;
                let owned = row
                    .as_ref()
                    .is_some_and(|row| wire::text(row, "user_id").as_deref() == Some(user_id.as_str()));
                if !owned {
                    return Err(AppError::NotFound(format!("Notification {} not found", target)));
                }
                store
                    .update(Table::Notifications, &target, json!({ "read": true }))
                    .await
                    .map(Some)
            },
        )
        .await?;

    success(session.notifications.snapshot().await)
}

/// POST /api/notifications/read-all - Mark every notification of the user read.
pub async fn mark_all_notifications_read(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> ApiResult<ViewSnapshot<Notification>> {
    let unread: Vec<String> = session
        .notifications
        .snapshot()
        .await
        .records
        .into_iter()
        .filter(|n| !n.read)
        .map(|n| n.id)
        .collect();
    for id in unread {
        session
            .notifications
            .apply_optimistic(&Mutation::Apply {
                id,
                action: NotificationAction::MarkRead,
            })
            .await;
    }

    let result = state
        .store
        .rpc("mark_all_read", json!({ "user_id": session.user_id() }))
        .await;
    match result {
        Ok(result) => {
            tracing::debug!(updated = %result["updated"], "Marked notifications read");
        }
        Err(err) => {
            tracing::warn!("Failed to mark notifications read: {}", err);
            session.notifications.load_all().await;
            return Err(err);
        }
    }

    success(session.notifications.snapshot().await)
}
