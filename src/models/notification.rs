//! In-app notification model.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::wire;
use crate::remote::{FeedFilter, Filter, Query, Table};
use crate::sync::{newest_first, FilterContext, Record, Selection};

/// A notification addressed to one user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: Option<String>,
    pub job_id: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub kind: Option<String>,
    pub read: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationAction {
    MarkRead,
}

impl Record for Notification {
    type Action = NotificationAction;

    const TABLE: Table = Table::Notifications;

    const REQUIRED_COLUMNS: &'static [&'static str] =
        &["id", "user_id", "read", "title", "created_at"];

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &Value) -> Self {
        Self {
            id: wire::text(row, "id").unwrap_or_default(),
            user_id: wire::text(row, "user_id"),
            job_id: wire::text(row, "job_id"),
            title: wire::text(row, "title"),
            body: wire::text(row, "body"),
            kind: wire::text(row, "kind"),
            read: wire::flag(row, "read").unwrap_or(false),
            created_at: wire::timestamp(row, "created_at"),
            updated_at: wire::timestamp(row, "updated_at"),
        }
    }

    fn matches(&self, context: &FilterContext) -> bool {
        context.is_user(self.user_id.as_deref())
            && (context.selection != Selection::Unread || !self.read)
    }

    fn ordering(a: &Self, b: &Self) -> Ordering {
        newest_first(a.created_at, b.created_at)
    }

    fn query(context: &FilterContext) -> Query {
        let query = Query::new(Table::Notifications)
            .filter(Filter::eq("user_id", context.user_id.as_str()))
            .order("created_at", false);
        if context.selection == Selection::Unread {
            query.filter(Filter::eq("read", false))
        } else {
            query
        }
    }

    fn feed_filter(context: &FilterContext) -> FeedFilter {
        FeedFilter::eq("user_id", context.user_id.as_str())
    }

    fn apply(&self, action: &NotificationAction, at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        match action {
            NotificationAction::MarkRead => next.read = true,
        }
        next.updated_at = Some(at);
        next
    }

    fn alert(&self) -> Option<(String, String)> {
        if self.read {
            return None;
        }
        Some((
            self.title.clone().unwrap_or_else(|| "Dispatch".to_string()),
            self.body.clone().unwrap_or_default(),
        ))
    }
}
