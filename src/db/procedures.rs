//! Server-side procedures.
//!
//! Each procedure runs as one transaction: guarded status transitions,
//! derived rows and the notifications they trigger commit together or not at all.

use chrono::Utc;
use serde_json::{json, Value};
use sqlx::SqliteConnection;

use super::store::{fetch_row, insert_row, select_rows, update_row, Outbox, SqliteStore};
use crate::errors::AppError;
use crate::models::{wire, InvoiceStatus, JobStatus};
use crate::remote::{Filter, Query, Table};
use crate::sync::Role;

impl SqliteStore {
    pub(super) async fn call_procedure(&self, name: &str, params: &Value) -> Result<Value, AppError> {
        tracing::debug!(procedure = name, "Calling procedure");
        let mut tx = self.pool().begin().await?;
        let mut outbox = Outbox::default();

        let result = match name {
            "accept_job" => {
                accept_job(&mut tx, param(params, "job_id")?, param(params, "driver_id")?, &mut outbox).await?
            }
            "start_job" => {
                start_job(&mut tx, param(params, "job_id")?, param(params, "driver_id")?, &mut outbox).await?
            }
            "complete_job" => {
                complete_job(&mut tx, param(params, "job_id")?, param(params, "driver_id")?, &mut outbox).await?
            }
            "cancel_job" => {
                cancel_job(&mut tx, param(params, "job_id")?, param(params, "admin_id")?, &mut outbox).await?
            }
            "mark_invoice_paid" => {
                mark_invoice_paid(&mut tx, param(params, "invoice_id")?, param(params, "admin_id")?, &mut outbox)
                    .await?
            }
            "mark_all_read" => mark_all_read(&mut tx, param(params, "user_id")?, &mut outbox).await?,
            other => return Err(AppError::NotFound(format!("Unknown procedure '{}'", other))),
        };

        tx.commit().await?;
        self.publish(outbox);
        Ok(result)
    }
}

fn param<'a>(params: &'a Value, key: &str) -> Result<&'a str, AppError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("Missing parameter '{}'", key)))
}

async fn require_role(conn: &mut SqliteConnection, user_id: &str, role: Role) -> Result<Value, AppError> {
    let profile = fetch_row(conn, Table::Profiles, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Profile {} not found", user_id)))?;
    if wire::text(&profile, "role").as_deref() != Some(role.as_str()) {
        return Err(AppError::Validation(format!(
            "Only a {} can do this",
            role.as_str()
        )));
    }
    Ok(profile)
}

/// Conflict carrying the row's current status, for a transition whose guard failed.
async fn transition_conflict(
    conn: &mut SqliteConnection,
    table: Table,
    id: &str,
    message: &str,
) -> Result<AppError, AppError> {
    let current = fetch_row(conn, table, id).await?;
    Ok(AppError::Conflict {
        message: message.to_string(),
        current_status: current.and_then(|row| wire::text(&row, "status")),
    })
}

async fn transition(
    conn: &mut SqliteConnection,
    table: Table,
    id: &str,
    patch: Value,
    guard: &[Filter],
    conflict: &str,
    outbox: &mut Outbox,
) -> Result<Value, AppError> {
    match update_row(conn, table, id, patch, guard, outbox).await? {
        Some(row) => Ok(row),
        None => Err(transition_conflict(conn, table, id, conflict).await?),
    }
}

async fn accept_job(
    conn: &mut SqliteConnection,
    job_id: &str,
    driver_id: &str,
    outbox: &mut Outbox,
) -> Result<Value, AppError> {
    require_role(conn, driver_id, Role::Driver).await?;
    transition(
        conn,
        Table::Jobs,
        job_id,
        json!({ "status": JobStatus::Assigned.as_str(), "driver_id": driver_id }),
        &[
            Filter::eq("status", JobStatus::Open.as_str()),
            Filter::is_null("driver_id"),
        ],
        "Job has already been taken",
        outbox,
    )
    .await
}

async fn start_job(
    conn: &mut SqliteConnection,
    job_id: &str,
    driver_id: &str,
    outbox: &mut Outbox,
) -> Result<Value, AppError> {
    transition(
        conn,
        Table::Jobs,
        job_id,
        json!({ "status": JobStatus::InProgress.as_str() }),
        &[
            Filter::eq("status", JobStatus::Assigned.as_str()),
            Filter::eq("driver_id", driver_id),
        ],
        "Only an assigned job of yours can be started",
        outbox,
    )
    .await
}

/// Complete the job and issue an unpaid invoice with the driver's current bank details.
async fn complete_job(
    conn: &mut SqliteConnection,
    job_id: &str,
    driver_id: &str,
    outbox: &mut Outbox,
) -> Result<Value, AppError> {
    let driver = require_role(conn, driver_id, Role::Driver).await?;
    let job = transition(
        conn,
        Table::Jobs,
        job_id,
        json!({ "status": JobStatus::Completed.as_str() }),
        &[
            Filter::eq("status", JobStatus::InProgress.as_str()),
            Filter::eq("driver_id", driver_id),
        ],
        "Only a job in progress of yours can be completed",
        outbox,
    )
    .await?;

    let invoice = insert_row(
        conn,
        Table::Invoices,
        json!({
            "job_id": job_id,
            "admin_id": job.get("admin_id").cloned().unwrap_or(Value::Null),
            "driver_id": driver_id,
            "amount": job.get("price").cloned().unwrap_or(Value::Null),
            "status": InvoiceStatus::Unpaid.as_str(),
            "bank_info": driver.get("bank_info").cloned().unwrap_or(Value::Null),
        }),
        outbox,
    )
    .await?;

    Ok(json!({ "job": job, "invoice": invoice }))
}

async fn cancel_job(
    conn: &mut SqliteConnection,
    job_id: &str,
    admin_id: &str,
    outbox: &mut Outbox,
) -> Result<Value, AppError> {
    transition(
        conn,
        Table::Jobs,
        job_id,
        json!({ "status": JobStatus::Cancelled.as_str() }),
        &[
            Filter::eq("admin_id", admin_id),
            Filter::any_of(
                "status",
                [JobStatus::Open.as_str(), JobStatus::Assigned.as_str()],
            ),
        ],
        "Only an open or assigned job of yours can be cancelled",
        outbox,
    )
    .await
}

async fn mark_invoice_paid(
    conn: &mut SqliteConnection,
    invoice_id: &str,
    admin_id: &str,
    outbox: &mut Outbox,
) -> Result<Value, AppError> {
    transition(
        conn,
        Table::Invoices,
        invoice_id,
        json!({ "status": InvoiceStatus::Paid.as_str(), "paid_at": Utc::now().to_rfc3339() }),
        &[
            Filter::eq("admin_id", admin_id),
            Filter::eq("status", InvoiceStatus::Unpaid.as_str()),
        ],
        "Only an unpaid invoice of yours can be marked paid",
        outbox,
    )
    .await
}

async fn mark_all_read(
    conn: &mut SqliteConnection,
    user_id: &str,
    outbox: &mut Outbox,
) -> Result<Value, AppError> {
    let unread = select_rows(
        conn,
        &Query::new(Table::Notifications)
            .filter(Filter::eq("user_id", user_id))
            .filter(Filter::eq("read", false)),
    )
    .await?;

    let mut updated = 0;
    for row in &unread {
        let Some(id) = wire::text(row, "id") else {
            continue;
        };
        let guard = [Filter::eq("read", false)];
        if update_row(conn, Table::Notifications, &id, json!({ "read": true }), &guard, outbox)
            .await?
            .is_some()
        {
            updated += 1;
        }
    }

    Ok(json!({ "updated": updated }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_store;
    use crate::remote::{ChangeFeed, ChangeKind, FeedFilter, RemoteStore};
    use std::time::Duration;

    async fn seed(store: &SqliteStore) {
        for row in [
            json!({ "id": "A1", "full_name": "Alice", "role": "admin", "push_token": "tok-a" }),
            json!({ "id": "D1", "full_name": "Dan", "role": "driver", "bank_info": "{\"iban\":\"DE00\"}" }),
            json!({ "id": "D2", "full_name": "Dora", "role": "driver" }),
        ] {
            store.insert(Table::Profiles, row).await.unwrap();
        }
        store
            .insert(
                Table::Jobs,
                json!({ "id": "J1", "title": "Pallet run", "admin_id": "A1", "price": 120.5 }),
            )
            .await
            .unwrap();
    }

    async fn call(store: &SqliteStore, name: &str, params: Value) -> Result<Value, AppError> {
        store.rpc(name, params).await
    }

    async fn notifications_for(store: &SqliteStore, user_id: &str) -> Vec<Value> {
        store
            .select(&Query::new(Table::Notifications).filter(Filter::eq("user_id", user_id)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_accept_job_assigns_and_notifies_admin() {
        let (store, _dir) = test_store().await;
        seed(&store).await;

        let job = call(&store, "accept_job", json!({ "job_id": "J1", "driver_id": "D1" }))
            .await
            .unwrap();
        assert_eq!(job["status"], "assigned");
        assert_eq!(job["driver_id"], "D1");
        assert_eq!(job["driver_name"], "Dan");

        let notes = notifications_for(&store, "A1").await;
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0]["title"], "Job accepted");
        assert_eq!(notes[0]["body"], "Dan accepted Pallet run");
        assert_eq!(notes[0]["job_id"], "J1");
        assert_eq!(notes[0]["read"], false);
    }

    #[tokio::test]
    async fn test_second_accept_conflicts_with_current_status() {
        let (store, _dir) = test_store().await;
        seed(&store).await;

        call(&store, "accept_job", json!({ "job_id": "J1", "driver_id": "D1" }))
            .await
            .unwrap();
        let err = call(&store, "accept_job", json!({ "job_id": "J1", "driver_id": "D2" }))
            .await
            .unwrap_err();

        match err {
            AppError::Conflict { current_status, .. } => {
                assert_eq!(current_status.as_deref(), Some("assigned"));
            }
            other => panic!("expected conflict, got {:?}", other),
        }
        let job = store.fetch(Table::Jobs, "J1").await.unwrap().unwrap();
        assert_eq!(job["driver_id"], "D1");
    }

    #[tokio::test]
    async fn test_admin_cannot_accept() {
        let (store, _dir) = test_store().await;
        seed(&store).await;
        let err = call(&store, "accept_job", json!({ "job_id": "J1", "driver_id": "A1" }))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_complete_job_issues_invoice_with_bank_snapshot() {
        let (store, _dir) = test_store().await;
        seed(&store).await;
        let params = json!({ "job_id": "J1", "driver_id": "D1" });

        // Completing before starting is rejected and leaves no invoice behind.
        call(&store, "accept_job", params.clone()).await.unwrap();
        let err = call(&store, "complete_job", params.clone()).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));

        call(&store, "start_job", params.clone()).await.unwrap();
        let result = call(&store, "complete_job", params).await.unwrap();

        assert_eq!(result["job"]["status"], "completed");
        let invoice = &result["invoice"];
        assert_eq!(invoice["status"], "unpaid");
        assert_eq!(invoice["amount"], 120.5);
        assert_eq!(invoice["admin_id"], "A1");
        assert_eq!(invoice["job_title"], "Pallet run");
        assert_eq!(invoice["bank_info"], "{\"iban\":\"DE00\"}");

        // Bank details changing later does not touch the issued invoice.
        store
            .update(Table::Profiles, "D1", json!({ "bank_info": "{\"iban\":\"FR11\"}" }))
            .await
            .unwrap();
        let id = invoice["id"].as_str().unwrap();
        let stored = store.fetch(Table::Invoices, id).await.unwrap().unwrap();
        assert_eq!(stored["bank_info"], "{\"iban\":\"DE00\"}");

        let titles: Vec<Value> = notifications_for(&store, "A1")
            .await
            .into_iter()
            .map(|n| n["title"].clone())
            .collect();
        assert!(titles.contains(&json!("Job completed")));
        assert!(titles.contains(&json!("Job started")));
    }

    #[tokio::test]
    async fn test_cancel_and_mark_paid_notify_driver() {
        let (store, _dir) = test_store().await;
        seed(&store).await;
        store
            .insert(
                Table::Jobs,
                json!({ "id": "J2", "title": "Crate drop", "admin_id": "A1", "price": 40 }),
            )
            .await
            .unwrap();
        let params = json!({ "job_id": "J1", "driver_id": "D1" });
        call(&store, "accept_job", params.clone()).await.unwrap();
        call(&store, "start_job", params.clone()).await.unwrap();
        let result = call(&store, "complete_job", params).await.unwrap();
        let invoice_id = result["invoice"]["id"].as_str().unwrap().to_string();

        let err = call(&store, "mark_invoice_paid", json!({ "invoice_id": invoice_id, "admin_id": "A2" }))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
        let paid = call(&store, "mark_invoice_paid", json!({ "invoice_id": invoice_id, "admin_id": "A1" }))
            .await
            .unwrap();
        assert_eq!(paid["status"], "paid");
        assert!(paid["paid_at"].is_string());

        call(&store, "accept_job", json!({ "job_id": "J2", "driver_id": "D1" }))
            .await
            .unwrap();
        let cancelled = call(&store, "cancel_job", json!({ "job_id": "J2", "admin_id": "A1" }))
            .await
            .unwrap();
        assert_eq!(cancelled["status"], "cancelled");

        let titles: Vec<Value> = notifications_for(&store, "D1")
            .await
            .into_iter()
            .map(|n| n["title"].clone())
            .collect();
        assert!(titles.contains(&json!("Invoice paid")));
        assert!(titles.contains(&json!("Job cancelled")));
    }

    #[tokio::test]
    async fn test_mark_all_read_only_touches_own_unread() {
        let (store, _dir) = test_store().await;
        for (id, user, read) in [("N1", "U1", false), ("N2", "U1", true), ("N3", "U2", false)] {
            store
                .insert(
                    Table::Notifications,
                    json!({ "id": id, "user_id": user, "title": id, "read": read }),
                )
                .await
                .unwrap();
        }

        let result = call(&store, "mark_all_read", json!({ "user_id": "U1" }))
            .await
            .unwrap();
        assert_eq!(result["updated"], 1);

        let other = store.fetch(Table::Notifications, "N3").await.unwrap().unwrap();
        assert_eq!(other["read"], false);
        let mine = store.fetch(Table::Notifications, "N1").await.unwrap().unwrap();
        assert_eq!(mine["read"], true);
    }

    #[tokio::test]
    async fn test_changes_publish_only_after_commit() {
        let (store, _dir) = test_store().await;
        seed(&store).await;
        let mut feed = store
            .subscribe(Table::Jobs, FeedFilter::eq("admin_id", "A1"))
            .await
            .unwrap();

        // A failed procedure publishes nothing.
        call(&store, "start_job", json!({ "job_id": "J1", "driver_id": "D1" }))
            .await
            .unwrap_err();
        call(&store, "accept_job", json!({ "job_id": "J1", "driver_id": "D1" }))
            .await
            .unwrap();

        let payload = tokio::time::timeout(Duration::from_secs(2), feed.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload.event_type, ChangeKind::Update);
        assert_eq!(payload.new.unwrap()["status"], "assigned");
    }

    #[tokio::test]
    async fn test_unknown_procedure_and_missing_params() {
        let (store, _dir) = test_store().await;
        assert!(matches!(
            call(&store, "drop_tables", json!({})).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            call(&store, "accept_job", json!({ "job_id": "J1" })).await,
            Err(AppError::BadRequest(_))
        ));
    }
}
