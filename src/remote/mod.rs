//! Contracts of the remote backend the synchronizer runs against.
//!
//! The backend owns persistence, the change-feed and server-side procedures.
//! Rows cross this boundary as snake_case JSON objects.

mod query;

pub use query::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::errors::AppError;

/// Declarative reads, row mutations and remote procedure calls.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Rows matching the query, including joined display fields.
    async fn select(&self, query: &Query) -> Result<Vec<Value>, AppError>;

    /// A single row by id, including joined display fields.
    async fn fetch(&self, table: Table, id: &str) -> Result<Option<Value>, AppError>;

    async fn insert(&self, table: Table, row: Value) -> Result<Value, AppError>;

    async fn update(&self, table: Table, id: &str, patch: Value) -> Result<Value, AppError>;

    async fn delete(&self, table: Table, id: &str) -> Result<(), AppError>;

    /// Invoke a server-side procedure. Its internal steps are not observable.
    async fn rpc(&self, name: &str, params: Value) -> Result<Value, AppError>;
}

/// Per-row change notifications.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, table: Table, filter: FeedFilter) -> Result<FeedChannel, AppError>;
}

/// Local and remote push notifications. Best-effort only.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn schedule_local(&self, title: &str, body: &str) -> Result<(), AppError>;

    async fn send_remote(&self, token: &str, title: &str, body: &str) -> Result<(), AppError>;
}

/// Kind of a change-feed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A change as delivered by the feed.
///
/// `new` may carry only the changed columns; `old` usually carries only the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePayload {
    pub table: Table,
    pub event_type: ChangeKind,
    #[serde(default)]
    pub new: Option<Value>,
    #[serde(default)]
    pub old: Option<Value>,
    pub commit_timestamp: DateTime<Utc>,
}

impl ChangePayload {
    /// Id of the affected row, taken from `new` and falling back to `old`.
    pub fn row_id(&self) -> Option<String> {
        [self.new.as_ref(), self.old.as_ref()]
            .into_iter()
            .flatten()
            .find_map(|row| crate::models::wire::text(row, "id"))
            .filter(|id| !id.is_empty())
    }
}

/// Receiving end of one change-feed subscription.
pub struct FeedChannel {
    receiver: mpsc::Receiver<ChangePayload>,
    forwarder: Option<AbortHandle>,
}

impl FeedChannel {
    pub fn new(receiver: mpsc::Receiver<ChangePayload>, forwarder: Option<AbortHandle>) -> Self {
        Self {
            receiver,
            forwarder,
        }
    }

    /// Next change, or `None` once the feed is closed or unsubscribed.
    pub async fn recv(&mut self) -> Option<ChangePayload> {
        self.receiver.recv().await
    }

    /// Release the subscription. Calling it again is a no-op.
    pub fn unsubscribe(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        self.receiver.close();
    }
}

impl Drop for FeedChannel {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
