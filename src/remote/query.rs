//! Declarative query and subscription filter expressions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Remote tables the dispatch application reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Jobs,
    Notifications,
    Invoices,
    Profiles,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Jobs => "jobs",
            Table::Notifications => "notifications",
            Table::Invoices => "invoices",
            Table::Profiles => "profiles",
        }
    }

    /// Writable base columns.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Table::Jobs => &[
                "id",
                "title",
                "description",
                "pickup_address",
                "dropoff_address",
                "scheduled_date",
                "scheduled_time",
                "price",
                "status",
                "admin_id",
                "driver_id",
                "created_at",
                "updated_at",
            ],
            Table::Notifications => &[
                "id",
                "user_id",
                "job_id",
                "title",
                "body",
                "kind",
                "read",
                "created_at",
                "updated_at",
            ],
            Table::Invoices => &[
                "id",
                "job_id",
                "admin_id",
                "driver_id",
                "amount",
                "status",
                "bank_info",
                "paid_at",
                "created_at",
                "updated_at",
            ],
            Table::Profiles => &[
                "id",
                "full_name",
                "role",
                "phone",
                "push_token",
                "bank_info",
                "address",
                "created_at",
                "updated_at",
            ],
        }
    }

    /// Display fields denormalized from related tables on reads.
    pub fn joined_columns(&self) -> &'static [&'static str] {
        match self {
            Table::Jobs => &["admin_name", "driver_name"],
            Table::Invoices => &["job_title", "driver_name"],
            Table::Notifications | Table::Profiles => &[],
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns().contains(&column) || self.joined_columns().contains(&column)
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(&'static str, Value),
    IsNull(&'static str),
    In(&'static str, Vec<Value>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: &'static str, value: impl Into<Value>) -> Self {
        Filter::Eq(column, value.into())
    }

    pub fn is_null(column: &'static str) -> Self {
        Filter::IsNull(column)
    }

    pub fn any_of<V: Into<Value>>(column: &'static str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(column, values.into_iter().map(Into::into).collect())
    }

    /// Every column the expression references.
    pub fn columns(&self) -> Vec<&'static str> {
        match self {
            Filter::Eq(column, _) | Filter::IsNull(column) | Filter::In(column, _) => {
                vec![*column]
            }
            Filter::And(parts) | Filter::Or(parts) => {
                parts.iter().flat_map(Filter::columns).collect()
            }
        }
    }
}

/// Sort order.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: &'static str,
    pub ascending: bool,
}

/// A select against one table: filters are combined with AND.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: Table,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
}

impl Query {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            filters: Vec::new(),
            order: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order(mut self, column: &'static str, ascending: bool) -> Self {
        self.order = Some(Order { column, ascending });
        self
    }
}

/// Server-side scope of a change-feed subscription (`column = value` or everything).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedFilter {
    All,
    Eq { column: &'static str, value: String },
}

impl FeedFilter {
    pub fn eq(column: &'static str, value: impl Into<String>) -> Self {
        FeedFilter::Eq {
            column,
            value: value.into(),
        }
    }

    /// Evaluate against a complete row.
    pub fn matches(&self, row: &Value) -> bool {
        match self {
            FeedFilter::All => true,
            FeedFilter::Eq { column, value } => {
                row.get(*column).and_then(Value::as_str) == Some(value.as_str())
            }
        }
    }
}
