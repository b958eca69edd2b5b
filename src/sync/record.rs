//! What a domain entity must provide to be held in a synchronized collection.

use std::cmp::Ordering;
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::FilterContext;
use crate::remote::{FeedFilter, Query, Table};

pub trait Record: Clone + Debug + PartialEq + Serialize + Send + Sync + 'static {
    /// Local user action that can be applied optimistically.
    type Action: Clone + Debug + Send + Sync + 'static;

    /// Table the records live in.
    const TABLE: Table;

    /// Columns a feed payload must carry to be merged without re-fetching the row.
    const REQUIRED_COLUMNS: &'static [&'static str];

    fn id(&self) -> &str;

    /// Total mapping from a snake_case wire row.
    fn from_row(row: &Value) -> Self;

    /// Whether the record belongs in a collection viewed through `context`.
    fn matches(&self, context: &FilterContext) -> bool;

    /// Domain sort order of the collection.
    fn ordering(a: &Self, b: &Self) -> Ordering;

    /// Remote query that loads the collection for `context`.
    fn query(context: &FilterContext) -> Query;

    /// Server-side scope of the change-feed for `context`.
    fn feed_filter(context: &FilterContext) -> FeedFilter;

    /// The record as it will look once `action` succeeds.
    fn apply(&self, action: &Self::Action, at: DateTime<Utc>) -> Self;

    /// Local notification to raise when the record newly enters the collection.
    fn alert(&self) -> Option<(String, String)> {
        None
    }
}

/// Newest first by creation time; records without a timestamp sort last.
pub fn newest_first(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
