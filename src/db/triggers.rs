//! Notifications written in the same transaction as a status change.

use serde_json::{json, Value};
use sqlx::SqliteConnection;

use super::store::{insert_row, Outbox};
use crate::errors::AppError;
use crate::models::wire;
use crate::models::{InvoiceStatus, JobStatus};
use crate::remote::Table;

/// Run the status-change hooks for an updated row.
pub(super) async fn after_update(
    conn: &mut SqliteConnection,
    table: Table,
    before: &Value,
    after: &Value,
    outbox: &mut Outbox,
) -> Result<(), AppError> {
    let status = wire::text(after, "status");
    if status.is_none() || status == wire::text(before, "status") {
        return Ok(());
    }
    let status = status.unwrap_or_default();

    match table {
        Table::Jobs => match JobStatus::parse(&status) {
            Some(status) => job_status_changed(conn, status, after, outbox).await,
            None => Ok(()),
        },
        Table::Invoices if InvoiceStatus::parse(&status) == Some(InvoiceStatus::Paid) => {
            invoice_paid(conn, after, outbox).await
        }
        _ => Ok(()),
    }
}

async fn job_status_changed(
    conn: &mut SqliteConnection,
    status: JobStatus,
    job: &Value,
    outbox: &mut Outbox,
) -> Result<(), AppError> {
    let title = wire::text(job, "title").unwrap_or_else(|| "a job".to_string());
    let driver = wire::text(job, "driver_name").unwrap_or_else(|| "A driver".to_string());

    let (recipient, heading, body, kind) = match status {
        JobStatus::Open => return Ok(()),
        JobStatus::Assigned => (
            wire::text(job, "admin_id"),
            "Job accepted",
            format!("{} accepted {}", driver, title),
            "job_assigned",
        ),
        JobStatus::InProgress => (
            wire::text(job, "admin_id"),
            "Job started",
            format!("{} started {}", driver, title),
            "job_started",
        ),
        JobStatus::Completed => (
            wire::text(job, "admin_id"),
            "Job completed",
            format!("{} completed {}", driver, title),
            "job_completed",
        ),
        JobStatus::Cancelled => (
            wire::text(job, "driver_id"),
            "Job cancelled",
            format!("{} was cancelled", title),
            "job_cancelled",
        ),
    };

    let Some(recipient) = recipient else {
        return Ok(());
    };
    notify_user(conn, &recipient, wire::text(job, "id"), heading, &body, kind, outbox).await
}

async fn invoice_paid(
    conn: &mut SqliteConnection,
    invoice: &Value,
    outbox: &mut Outbox,
) -> Result<(), AppError> {
    let Some(driver_id) = wire::text(invoice, "driver_id") else {
        return Ok(());
    };
    let job_title = wire::text(invoice, "job_title").unwrap_or_else(|| "your job".to_string());
    let body = format!("Your invoice for {} was paid", job_title);
    notify_user(
        conn,
        &driver_id,
        wire::text(invoice, "job_id"),
        "Invoice paid",
        &body,
        "invoice_paid",
        outbox,
    )
    .await
}

async fn notify_user(
    conn: &mut SqliteConnection,
    user_id: &str,
    job_id: Option<String>,
    title: &str,
    body: &str,
    kind: &str,
    outbox: &mut Outbox,
) -> Result<(), AppError> {
    insert_row(
        conn,
        Table::Notifications,
        json!({
            "user_id": user_id,
            "job_id": job_id,
            "title": title,
            "body": body,
            "kind": kind,
            "read": false,
        }),
        outbox,
    )
    .await?;
    tracing::debug!(user_id, kind, "Notification queued");
    Ok(())
}
