//! Row storage and change publication over SQLite.
//!
//! Every write runs in a transaction. The changes it produces are staged in an
//! [`Outbox`] and published on the broadcast bus only after commit, so feed
//! subscribers never observe rolled-back rows.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use sqlx::{SqliteConnection, SqlitePool};
use tokio::sync::{broadcast, mpsc};

use super::{sql, triggers};
use crate::errors::AppError;
use crate::remote::{
    ChangeFeed, ChangeKind, ChangePayload, FeedChannel, FeedFilter, Filter, Query, RemoteStore,
    Table,
};

/// Buffered payloads per feed subscription.
const SUBSCRIBER_BUFFER: usize = 256;

/// A committed change and the full row the subscription filter is evaluated on.
#[derive(Debug, Clone)]
pub struct CommittedChange {
    pub payload: ChangePayload,
    pub row: Value,
}

/// Changes produced inside a transaction, waiting for commit.
#[derive(Debug, Default)]
pub struct Outbox(Vec<CommittedChange>);

impl Outbox {
    fn stage(&mut self, table: Table, event_type: ChangeKind, new: Option<Value>, old: Option<Value>, row: Value) {
        self.0.push(CommittedChange {
            payload: ChangePayload {
                table,
                event_type,
                new,
                old,
                commit_timestamp: Utc::now(),
            },
            row,
        });
    }
}

/// Embedded backend: rows, change-feed and server-side procedures.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    bus: broadcast::Sender<CommittedChange>,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, feed_capacity: usize) -> Self {
        let (bus, _) = broadcast::channel(feed_capacity.max(1));
        Self { pool, bus }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Publish the changes of a committed transaction.
    pub(super) fn publish(&self, outbox: Outbox) {
        for change in outbox.0 {
            // Nobody listening is fine; the next load picks the row up.
            let _ = self.bus.send(change);
        }
    }
}

#[async_trait]
impl RemoteStore for SqliteStore {
    async fn select(&self, query: &Query) -> Result<Vec<Value>, AppError> {
        let mut conn = self.pool.acquire().await?;
        select_rows(&mut conn, query).await
    }

    async fn fetch(&self, table: Table, id: &str) -> Result<Option<Value>, AppError> {
        let mut conn = self.pool.acquire().await?;
        fetch_row(&mut conn, table, id).await
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value, AppError> {
        let mut tx = self.pool.begin().await?;
        let mut outbox = Outbox::default();
        let row = insert_row(&mut tx, table, row, &mut outbox).await?;
        tx.commit().await?;
        self.publish(outbox);
        Ok(row)
    }

    async fn update(&self, table: Table, id: &str, patch: Value) -> Result<Value, AppError> {
        let mut tx = self.pool.begin().await?;
        let mut outbox = Outbox::default();
        let row = update_row(&mut tx, table, id, patch, &[], &mut outbox)
            .await?
            .ok_or_else(|| missing(table, id))?;
        tx.commit().await?;
        self.publish(outbox);
        Ok(row)
    }

    async fn delete(&self, table: Table, id: &str) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        let mut outbox = Outbox::default();
        delete_row(&mut tx, table, id, &mut outbox).await?;
        tx.commit().await?;
        self.publish(outbox);
        Ok(())
    }

    async fn rpc(&self, name: &str, params: Value) -> Result<Value, AppError> {
        self.call_procedure(name, &params).await
    }
}

#[async_trait]
impl ChangeFeed for SqliteStore {
    async fn subscribe(&self, table: Table, filter: FeedFilter) -> Result<FeedChannel, AppError> {
        let mut bus = self.bus.subscribe();
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_BUFFER);

        let forwarder = tokio::spawn(async move {
            loop {
                match bus.recv().await {
                    Ok(change) => {
                        if change.payload.table != table || !filter.matches(&change.row) {
                            continue;
                        }
                        if sender.send(change.payload).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(table = %table, missed, "Change feed subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(FeedChannel::new(receiver, Some(forwarder.abort_handle())))
    }
}

fn missing(table: Table, id: &str) -> AppError {
    AppError::NotFound(format!("No {} row with id {}", table, id))
}

pub(super) async fn select_rows(
    conn: &mut SqliteConnection,
    query: &Query,
) -> Result<Vec<Value>, AppError> {
    let (text, binds) = sql::select_statement(query)?;
    let mut statement = sqlx::query(&text);
    for value in &binds {
        statement = sql::bind_value(statement, value);
    }
    let rows = statement.fetch_all(&mut *conn).await?;
    Ok(rows
        .iter()
        .map(|row| sql::row_to_json(query.table, row))
        .collect())
}

pub(super) async fn fetch_row(
    conn: &mut SqliteConnection,
    table: Table,
    id: &str,
) -> Result<Option<Value>, AppError> {
    let query = Query::new(table).filter(Filter::eq("id", id));
    Ok(select_rows(conn, &query).await?.into_iter().next())
}

/// Insert a row, filling in id and timestamps, and stage an INSERT change.
pub(super) async fn insert_row(
    conn: &mut SqliteConnection,
    table: Table,
    row: Value,
    outbox: &mut Outbox,
) -> Result<Value, AppError> {
    let Value::Object(mut fields) = row else {
        return Err(AppError::Validation("Row must be a JSON object".to_string()));
    };
    sql::check_columns(table, fields.keys().map(String::as_str))?;

    let now = Utc::now().to_rfc3339();
    let id = match fields.get("id").and_then(Value::as_str) {
        Some(id) if !id.trim().is_empty() => id.to_string(),
        _ => uuid::Uuid::new_v4().to_string(),
    };
    fields.insert("id".to_string(), Value::String(id.clone()));
    fields
        .entry("created_at")
        .or_insert_with(|| Value::String(now.clone()));
    fields.insert("updated_at".to_string(), Value::String(now));

    let columns: Vec<String> = fields.keys().map(|c| format!("\"{}\"", c)).collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    let text = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders
    );
    let mut statement = sqlx::query(&text);
    for value in fields.values() {
        statement = sql::bind_value(statement, value);
    }
    if let Err(err) = statement.execute(&mut *conn).await {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return Err(AppError::Conflict {
                    message: format!("Duplicate {} row {}", table, id),
                    current_status: None,
                });
            }
            if db_err.is_check_violation() || db_err.kind() == sqlx::error::ErrorKind::NotNullViolation {
                return Err(AppError::Validation(format!(
                    "Invalid {} row: {}",
                    table,
                    db_err.message()
                )));
            }
        }
        return Err(err.into());
    }

    let full = fetch_row(conn, table, &id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("Inserted {} row {} not readable", table, id)))?;
    outbox.stage(
        table,
        ChangeKind::Insert,
        Some(sql::base_row(table, &full)),
        None,
        full.clone(),
    );
    tracing::debug!(table = %table, id = %id, "Row inserted");
    Ok(full)
}

/// Patch a row when every `guard` filter holds.
///
/// Returns `None` when the guard rejected the update. The staged UPDATE
/// change carries only the id and the columns that were written.
pub(super) async fn update_row(
    conn: &mut SqliteConnection,
    table: Table,
    id: &str,
    patch: Value,
    guard: &[Filter],
    outbox: &mut Outbox,
) -> Result<Option<Value>, AppError> {
    let Value::Object(mut fields) = patch else {
        return Err(AppError::Validation("Patch must be a JSON object".to_string()));
    };
    fields.remove("id");
    fields.remove("created_at");
    sql::check_columns(table, fields.keys().map(String::as_str))?;
    for filter in guard {
        sql::check_columns(table, filter.columns())?;
    }
    fields.insert(
        "updated_at".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );

    let before = fetch_row(conn, table, id)
        .await?
        .ok_or_else(|| missing(table, id))?;

    let assignments: Vec<String> = fields.keys().map(|c| format!("\"{}\" = ?", c)).collect();
    let mut binds: Vec<Value> = fields.values().cloned().collect();
    binds.push(Value::String(id.to_string()));
    let mut text = format!(
        "UPDATE {} SET {} WHERE \"id\" = ?",
        table,
        assignments.join(", ")
    );
    if !guard.is_empty() {
        text.push_str(" AND ");
        text.push_str(&sql::guard_clause(guard, &mut binds));
    }

    let mut statement = sqlx::query(&text);
    for value in &binds {
        statement = sql::bind_value(statement, value);
    }
    let result = statement.execute(&mut *conn).await?;
    if result.rows_affected() == 0 {
        return Ok(None);
    }

    let after = fetch_row(conn, table, id)
        .await?
        .ok_or_else(|| missing(table, id))?;

    let mut changed = Map::new();
    changed.insert("id".to_string(), Value::String(id.to_string()));
    for column in fields.keys() {
        changed.insert(
            column.clone(),
            after.get(column.as_str()).cloned().unwrap_or(Value::Null),
        );
    }
    outbox.stage(
        table,
        ChangeKind::Update,
        Some(Value::Object(changed)),
        Some(json!({ "id": id })),
        after.clone(),
    );
    tracing::debug!(table = %table, id, "Row updated");

    triggers::after_update(conn, table, &before, &after, outbox).await?;
    Ok(Some(after))
}

/// Delete a row and stage a DELETE change carrying only the id.
pub(super) async fn delete_row(
    conn: &mut SqliteConnection,
    table: Table,
    id: &str,
    outbox: &mut Outbox,
) -> Result<(), AppError> {
    let before = fetch_row(conn, table, id)
        .await?
        .ok_or_else(|| missing(table, id))?;

    sqlx::query(&format!("DELETE FROM {} WHERE \"id\" = ?", table))
        .bind(id)
        .execute(&mut *conn)
        .await?;

    outbox.stage(
        table,
        ChangeKind::Delete,
        None,
        Some(json!({ "id": id })),
        before,
    );
    tracing::debug!(table = %table, id, "Row deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_store;
    use std::time::Duration;

    async fn next(channel: &mut FeedChannel) -> ChangePayload {
        tokio::time::timeout(Duration::from_secs(2), channel.recv())
            .await
            .expect("feed timed out")
            .expect("feed closed")
    }

    #[tokio::test]
    async fn test_insert_fills_defaults_and_joins() {
        let (store, _dir) = test_store().await;
        store
            .insert(
                Table::Profiles,
                json!({ "id": "A1", "full_name": "Alice", "role": "admin" }),
            )
            .await
            .unwrap();

        let job = store
            .insert(
                Table::Jobs,
                json!({ "title": "Pallet run", "admin_id": "A1", "price": 80 }),
            )
            .await
            .unwrap();

        assert!(!job["id"].as_str().unwrap().is_empty());
        assert_eq!(job["status"], "open");
        assert_eq!(job["price"], 80.0);
        assert_eq!(job["admin_name"], "Alice");
        assert_eq!(job["driver_name"], Value::Null);
        assert!(job["created_at"].is_string());
    }

    #[tokio::test]
    async fn test_insert_rejects_unknown_columns_and_duplicates() {
        let (store, _dir) = test_store().await;
        let err = store
            .insert(Table::Jobs, json!({ "title": "x", "admin_id": "A1", "secret": 1 }))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let row = json!({ "id": "J1", "title": "x", "admin_id": "A1" });
        store.insert(Table::Jobs, row.clone()).await.unwrap();
        let err = store.insert(Table::Jobs, row).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_select_filters_and_orders() {
        let (store, _dir) = test_store().await;
        for (id, date, status) in [
            ("J1", Some("2024-05-03"), "open"),
            ("J2", None, "open"),
            ("J3", Some("2024-05-01"), "open"),
            ("J4", Some("2024-05-02"), "assigned"),
        ] {
            store
                .insert(
                    Table::Jobs,
                    json!({ "id": id, "title": id, "admin_id": "A1", "scheduled_date": date, "status": status }),
                )
                .await
                .unwrap();
        }

        let rows = store
            .select(
                &Query::new(Table::Jobs)
                    .filter(Filter::eq("status", "open"))
                    .order("scheduled_date", true),
            )
            .await
            .unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["J3", "J1", "J2"]);
    }

    #[tokio::test]
    async fn test_update_publishes_partial_payload() {
        let (store, _dir) = test_store().await;
        store
            .insert(Table::Jobs, json!({ "id": "J1", "title": "x", "admin_id": "A1" }))
            .await
            .unwrap();
        let mut channel = store
            .subscribe(Table::Jobs, FeedFilter::eq("admin_id", "A1"))
            .await
            .unwrap();

        let row = store
            .update(Table::Jobs, "J1", json!({ "title": "y" }))
            .await
            .unwrap();
        assert_eq!(row["title"], "y");

        let payload = next(&mut channel).await;
        assert_eq!(payload.event_type, ChangeKind::Update);
        let new = payload.new.unwrap();
        assert_eq!(new["id"], "J1");
        assert_eq!(new["title"], "y");
        assert!(new.get("admin_id").is_none());
        assert_eq!(payload.old, Some(json!({ "id": "J1" })));
    }

    #[tokio::test]
    async fn test_feed_filter_is_applied_to_full_row() {
        let (store, _dir) = test_store().await;
        let mut mine = store
            .subscribe(Table::Notifications, FeedFilter::eq("user_id", "U1"))
            .await
            .unwrap();

        store
            .insert(Table::Notifications, json!({ "id": "N0", "user_id": "U2", "title": "other" }))
            .await
            .unwrap();
        store
            .insert(Table::Jobs, json!({ "id": "J1", "title": "x", "admin_id": "U1" }))
            .await
            .unwrap();
        store
            .insert(Table::Notifications, json!({ "id": "N1", "user_id": "U1", "title": "mine" }))
            .await
            .unwrap();
        store.delete(Table::Notifications, "N1").await.unwrap();

        let insert = next(&mut mine).await;
        assert_eq!(insert.event_type, ChangeKind::Insert);
        assert_eq!(insert.row_id().as_deref(), Some("N1"));
        assert_eq!(insert.new.unwrap()["read"], false);

        let delete = next(&mut mine).await;
        assert_eq!(delete.event_type, ChangeKind::Delete);
        assert_eq!(delete.old, Some(json!({ "id": "N1" })));
    }

    #[tokio::test]
    async fn test_unsubscribed_channel_stops_receiving() {
        let (store, _dir) = test_store().await;
        let mut channel = store
            .subscribe(Table::Jobs, FeedFilter::All)
            .await
            .unwrap();
        channel.unsubscribe();

        store
            .insert(Table::Jobs, json!({ "title": "x", "admin_id": "A1" }))
            .await
            .unwrap();
        assert!(channel.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_update_and_delete_of_missing_row() {
        let (store, _dir) = test_store().await;
        assert!(matches!(
            store.update(Table::Jobs, "nope", json!({ "title": "x" })).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            store.delete(Table::Jobs, "nope").await,
            Err(AppError::NotFound(_))
        ));
        assert!(store.fetch(Table::Jobs, "nope").await.unwrap().is_none());
    }
}
