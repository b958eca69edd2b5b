//! Invoice API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::json;

use super::{success, ApiResult, CurrentSession, SelectionRequest};
use crate::errors::AppError;
use crate::models::{Invoice, InvoiceAction};
use crate::remote::RemoteStore;
use crate::sync::{Mutation, Role, Selection, ViewSnapshot};
use crate::AppState;

/// GET /api/invoices - Current invoice view.
pub async fn list_invoices(
    CurrentSession(session): CurrentSession,
) -> ApiResult<ViewSnapshot<Invoice>> {
    success(session.invoices.snapshot().await)
}

/// PUT /api/invoices/selection - Switch between all, unpaid and paid.
pub async fn select_invoices(
    CurrentSession(session): CurrentSession,
    Json(request): Json<SelectionRequest>,
) -> ApiResult<ViewSnapshot<Invoice>> {
    if request.selection.invoice_status().is_none() && request.selection != Selection::All {
        return Err(AppError::Validation(format!(
            "'{}' is not an invoice tab",
            request.selection.as_str()
        )));
    }
    session.invoices.set_selection(request.selection).await?;
    success(session.invoices.snapshot().await)
}

/// POST /api/invoices/:id/paid - Mark an invoice paid (admins only).
pub async fn mark_invoice_paid(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<String>,
) -> ApiResult<ViewSnapshot<Invoice>> {
    session.require_role(Role::Admin)?;
    let params = json!({ "invoice_id": id, "admin_id": session.user_id() });
    let store = state.store.clone();

    session
        .invoices
        .mutate(
            Mutation::Apply {
                id,
                action: InvoiceAction::MarkPaid,
            },
            async move { store.rpc("mark_invoice_paid", params).await.map(Some) },
        )
        .await?;

    success(session.invoices.snapshot().await)
}
