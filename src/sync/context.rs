//! Filter context: who is looking, and through which tab.

use serde::{Deserialize, Serialize};

use crate::models::{InvoiceStatus, JobStatus};

/// Role of the signed-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Driver,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Driver => "driver",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Role::Admin),
            "driver" => Some(Role::Driver),
            _ => None,
        }
    }
}

/// The active UI filter. Record kinds ignore selections that do not concern them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    All,
    Job(JobStatus),
    Invoice(InvoiceStatus),
    Unread,
}

impl Selection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Selection::All => "all",
            Selection::Job(status) => status.as_str(),
            Selection::Invoice(status) => status.as_str(),
            Selection::Unread => "unread",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(Selection::All),
            "unread" => Some(Selection::Unread),
            other => JobStatus::parse(other)
                .map(Selection::Job)
                .or_else(|| InvoiceStatus::parse(other).map(Selection::Invoice)),
        }
    }

    pub fn job_status(&self) -> Option<JobStatus> {
        match self {
            Selection::Job(status) => Some(*status),
            _ => None,
        }
    }

    pub fn invoice_status(&self) -> Option<InvoiceStatus> {
        match self {
            Selection::Invoice(status) => Some(*status),
            _ => None,
        }
    }
}

impl Serialize for Selection {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Selection {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Selection::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown selection '{}'", raw)))
    }
}

/// Everything that decides which records belong in a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterContext {
    pub user_id: String,
    pub role: Role,
    pub selection: Selection,
}

impl FilterContext {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            selection: Selection::All,
        }
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }

    /// Whether the signed-in identity is the same. A tab switch keeps the identity.
    pub fn same_identity(&self, other: &FilterContext) -> bool {
        self.user_id == other.user_id && self.role == other.role
    }

    pub fn is_user(&self, id: Option<&str>) -> bool {
        id == Some(self.user_id.as_str())
    }
}
