//! Invoice model. Invoices are created server-side when a job completes.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::wire;
use crate::remote::{FeedFilter, Filter, Query, Table};
use crate::sync::{newest_first, FilterContext, Record, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Unpaid,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Unpaid => "unpaid",
            InvoiceStatus::Paid => "paid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unpaid" => Some(InvoiceStatus::Unpaid),
            "paid" => Some(InvoiceStatus::Paid),
            _ => None,
        }
    }
}

/// An invoice for a completed job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: String,
    pub job_id: Option<String>,
    pub admin_id: Option<String>,
    pub driver_id: Option<String>,
    pub amount: Option<f64>,
    pub status: Option<InvoiceStatus>,
    /// Driver's bank details as captured when the invoice was issued.
    pub bank_info: Option<Value>,
    pub job_title: Option<String>,
    pub driver_name: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InvoiceAction {
    MarkPaid,
}

impl Invoice {
    fn owner_column(role: Role) -> &'static str {
        match role {
            Role::Admin => "admin_id",
            Role::Driver => "driver_id",
        }
    }
}

impl Record for Invoice {
    type Action = InvoiceAction;

    const TABLE: Table = Table::Invoices;

    const REQUIRED_COLUMNS: &'static [&'static str] = &[
        "id",
        "status",
        "admin_id",
        "driver_id",
        "created_at",
        "job_title",
    ];

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &Value) -> Self {
        Self {
            id: wire::text(row, "id").unwrap_or_default(),
            job_id: wire::text(row, "job_id"),
            admin_id: wire::text(row, "admin_id"),
            driver_id: wire::text(row, "driver_id"),
            amount: wire::number(row, "amount"),
            status: wire::text(row, "status").and_then(|s| InvoiceStatus::parse(&s)),
            bank_info: wire::embedded_object(row, "bank_info"),
            job_title: wire::text(row, "job_title"),
            driver_name: wire::text(row, "driver_name"),
            paid_at: wire::timestamp(row, "paid_at"),
            created_at: wire::timestamp(row, "created_at"),
            updated_at: wire::timestamp(row, "updated_at"),
        }
    }

    fn matches(&self, context: &FilterContext) -> bool {
        let owner = match context.role {
            Role::Admin => self.admin_id.as_deref(),
            Role::Driver => self.driver_id.as_deref(),
        };
        context.is_user(owner)
            && context
                .selection
                .invoice_status()
                .map_or(true, |status| self.status == Some(status))
    }

    fn ordering(a: &Self, b: &Self) -> Ordering {
        newest_first(a.created_at, b.created_at)
    }

    fn query(context: &FilterContext) -> Query {
        let query = Query::new(Table::Invoices)
            .filter(Filter::eq(
                Self::owner_column(context.role),
                context.user_id.as_str(),
            ))
            .order("created_at", false);
        match context.selection.invoice_status() {
            Some(status) => query.filter(Filter::eq("status", status.as_str())),
            None => query,
        }
    }

    fn feed_filter(context: &FilterContext) -> FeedFilter {
        FeedFilter::eq(Self::owner_column(context.role), context.user_id.as_str())
    }

    fn apply(&self, action: &InvoiceAction, at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        match action {
            InvoiceAction::MarkPaid => {
                next.status = Some(InvoiceStatus::Paid);
                next.paid_at = Some(at);
            }
        }
        next.updated_at = Some(at);
        next
    }
}
