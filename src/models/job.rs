//! Job model: the unit of work an admin posts and a driver takes.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::wire;
use crate::errors::AppError;
use crate::remote::{FeedFilter, Filter, Query, Table};
use crate::sync::{FilterContext, Record, Role};

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Open,
    Assigned,
    InProgress,
    Completed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Open => "open",
            JobStatus::Assigned => "assigned",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(JobStatus::Open),
            "assigned" => Some(JobStatus::Assigned),
            "in_progress" => Some(JobStatus::InProgress),
            "completed" => Some(JobStatus::Completed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

/// A dispatch job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub pickup_address: Option<Value>,
    pub dropoff_address: Option<Value>,
    pub scheduled_date: Option<NaiveDate>,
    pub scheduled_time: Option<String>,
    pub price: Option<f64>,
    pub status: Option<JobStatus>,
    pub admin_id: Option<String>,
    pub driver_id: Option<String>,
    pub admin_name: Option<String>,
    pub driver_name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Job actions a user can take ahead of server confirmation.
#[derive(Debug, Clone, PartialEq)]
pub enum JobAction {
    Accept { driver_id: String },
    Start,
    Complete,
    Cancel,
}

impl Job {
    /// A new open job posted by `admin_id`, not yet confirmed by the store.
    pub fn draft(id: String, admin_id: String, request: &CreateJobRequest, at: DateTime<Utc>) -> Self {
        Self {
            id,
            title: Some(request.title.trim().to_string()),
            description: request.description.clone(),
            pickup_address: request.pickup_address.clone(),
            dropoff_address: request.dropoff_address.clone(),
            scheduled_date: Some(request.scheduled_date),
            scheduled_time: request.scheduled_time.clone(),
            price: request.price,
            status: Some(JobStatus::Open),
            admin_id: Some(admin_id),
            driver_id: None,
            admin_name: None,
            driver_name: None,
            created_at: Some(at),
            updated_at: Some(at),
        }
    }

    /// Snake_case row for an insert.
    pub fn to_row(&self) -> Value {
        json!({
            "id": self.id,
            "title": self.title,
            "description": self.description,
            "pickup_address": self.pickup_address.as_ref().map(Value::to_string),
            "dropoff_address": self.dropoff_address.as_ref().map(Value::to_string),
            "scheduled_date": self.scheduled_date.map(|d| d.to_string()),
            "scheduled_time": self.scheduled_time,
            "price": self.price,
            "status": self.status.map(|s| s.as_str()),
            "admin_id": self.admin_id,
            "driver_id": self.driver_id,
        })
    }

    fn is_unclaimed_open(&self) -> bool {
        self.status == Some(JobStatus::Open) && self.driver_id.is_none()
    }
}

impl Record for Job {
    type Action = JobAction;

    const TABLE: Table = Table::Jobs;

    // admin_name is a joined field, so feed payloads for jobs always get re-fetched.
    const REQUIRED_COLUMNS: &'static [&'static str] = &[
        "id",
        "status",
        "admin_id",
        "driver_id",
        "scheduled_date",
        "admin_name",
    ];

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &Value) -> Self {
        Self {
            id: wire::text(row, "id").unwrap_or_default(),
            title: wire::text(row, "title"),
            description: wire::text(row, "description"),
            pickup_address: wire::embedded_object(row, "pickup_address"),
            dropoff_address: wire::embedded_object(row, "dropoff_address"),
            scheduled_date: wire::date(row, "scheduled_date"),
            scheduled_time: wire::text(row, "scheduled_time"),
            price: wire::number(row, "price"),
            status: wire::text(row, "status").and_then(|s| JobStatus::parse(&s)),
            admin_id: wire::text(row, "admin_id"),
            driver_id: wire::text(row, "driver_id"),
            admin_name: wire::text(row, "admin_name"),
            driver_name: wire::text(row, "driver_name"),
            created_at: wire::timestamp(row, "created_at"),
            updated_at: wire::timestamp(row, "updated_at"),
        }
    }

    fn matches(&self, context: &FilterContext) -> bool {
        let tab = context.selection.job_status();
        match context.role {
            Role::Driver => {
                let mine = context.is_user(self.driver_id.as_deref());
                match tab {
                    Some(JobStatus::Open) => self.is_unclaimed_open(),
                    Some(status) => mine && self.status == Some(status),
                    None => mine || self.is_unclaimed_open(),
                }
            }
            Role::Admin => {
                context.is_user(self.admin_id.as_deref())
                    && tab.map_or(true, |status| self.status == Some(status))
            }
        }
    }

    fn ordering(a: &Self, b: &Self) -> Ordering {
        match (a.scheduled_date, b.scheduled_date) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }

    fn query(context: &FilterContext) -> Query {
        let query = Query::new(Table::Jobs).order("scheduled_date", true);
        let unclaimed_open = || {
            Filter::And(vec![
                Filter::eq("status", JobStatus::Open.as_str()),
                Filter::is_null("driver_id"),
            ])
        };
        match (context.role, context.selection.job_status()) {
            (Role::Driver, Some(JobStatus::Open)) => query.filter(unclaimed_open()),
            (Role::Driver, Some(status)) => query
                .filter(Filter::eq("status", status.as_str()))
                .filter(Filter::eq("driver_id", context.user_id.as_str())),
            (Role::Driver, None) => query.filter(Filter::Or(vec![
                unclaimed_open(),
                Filter::eq("driver_id", context.user_id.as_str()),
            ])),
            (Role::Admin, tab) => {
                let query = query.filter(Filter::eq("admin_id", context.user_id.as_str()));
                match tab {
                    Some(status) => query.filter(Filter::eq("status", status.as_str())),
                    None => query,
                }
            }
        }
    }

    fn feed_filter(context: &FilterContext) -> FeedFilter {
        match context.role {
            // Drivers must see open jobs from every admin.
            Role::Driver => FeedFilter::All,
            Role::Admin => FeedFilter::eq("admin_id", context.user_id.as_str()),
        }
    }

    fn apply(&self, action: &JobAction, at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        match action {
            JobAction::Accept { driver_id } => {
                next.status = Some(JobStatus::Assigned);
                next.driver_id = Some(driver_id.clone());
            }
            JobAction::Start => next.status = Some(JobStatus::InProgress),
            JobAction::Complete => next.status = Some(JobStatus::Completed),
            JobAction::Cancel => next.status = Some(JobStatus::Cancelled),
        }
        next.updated_at = Some(at);
        next
    }
}

/// Request body for posting a new job.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub pickup_address: Option<Value>,
    #[serde(default)]
    pub dropoff_address: Option<Value>,
    pub scheduled_date: NaiveDate,
    #[serde(default)]
    pub scheduled_time: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
}

impl CreateJobRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.title.trim().is_empty() {
            return Err(AppError::Validation("Title is required".to_string()));
        }
        if self.price.is_some_and(|price| !price.is_finite() || price < 0.0) {
            return Err(AppError::Validation("Price must be a non-negative number".to_string()));
        }
        for (field, address) in [
            ("pickupAddress", &self.pickup_address),
            ("dropoffAddress", &self.dropoff_address),
        ] {
            if address.as_ref().is_some_and(|a| !a.is_object()) {
                return Err(AppError::Validation(format!("{} must be a JSON object", field)));
            }
        }
        Ok(())
    }
}
