//! User profile model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::wire;
use crate::errors::AppError;
use crate::sync::Role;

/// A user profile (admin or driver).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub full_name: Option<String>,
    pub role: Option<Role>,
    pub phone: Option<String>,
    pub push_token: Option<String>,
    pub bank_info: Option<Value>,
    pub address: Option<Value>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn from_row(row: &Value) -> Self {
        Self {
            id: wire::text(row, "id").unwrap_or_default(),
            full_name: wire::text(row, "full_name"),
            role: wire::text(row, "role").and_then(|r| Role::parse(&r)),
            phone: wire::text(row, "phone"),
            push_token: wire::text(row, "push_token"),
            bank_info: wire::embedded_object(row, "bank_info"),
            address: wire::embedded_object(row, "address"),
            created_at: wire::timestamp(row, "created_at"),
            updated_at: wire::timestamp(row, "updated_at"),
        }
    }
}

/// Request body for registering a profile.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProfileRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub full_name: String,
    pub role: Role,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub push_token: Option<String>,
    #[serde(default)]
    pub bank_info: Option<Value>,
    #[serde(default)]
    pub address: Option<Value>,
}

impl CreateProfileRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.full_name.trim().is_empty() {
            return Err(AppError::Validation("Full name is required".to_string()));
        }
        require_object("bankInfo", self.bank_info.as_ref())?;
        require_object("address", self.address.as_ref())
    }

    /// Snake_case row for an insert; nested objects are stored serialized.
    pub fn to_row(&self, id: String) -> Value {
        json!({
            "id": id,
            "full_name": self.full_name.trim(),
            "role": self.role.as_str(),
            "phone": self.phone,
            "push_token": self.push_token,
            "bank_info": self.bank_info.as_ref().map(Value::to_string),
            "address": self.address.as_ref().map(Value::to_string),
        })
    }
}

/// Request body for a partial profile update.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub push_token: Option<String>,
    #[serde(default)]
    pub bank_info: Option<Value>,
    #[serde(default)]
    pub address: Option<Value>,
}

impl UpdateProfileRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(name) = &self.full_name {
            if name.trim().is_empty() {
                return Err(AppError::Validation("Full name cannot be empty".to_string()));
            }
        }
        require_object("bankInfo", self.bank_info.as_ref())?;
        require_object("address", self.address.as_ref())
    }

    /// Patch containing only the provided fields.
    pub fn to_patch(&self) -> Value {
        let mut patch = Map::new();
        if let Some(name) = &self.full_name {
            patch.insert("full_name".to_string(), json!(name.trim()));
        }
        if let Some(role) = self.role {
            patch.insert("role".to_string(), json!(role.as_str()));
        }
        if let Some(phone) = &self.phone {
            patch.insert("phone".to_string(), json!(phone));
        }
        if let Some(token) = &self.push_token {
            patch.insert("push_token".to_string(), json!(token));
        }
        if let Some(bank_info) = &self.bank_info {
            patch.insert("bank_info".to_string(), json!(bank_info.to_string()));
        }
        if let Some(address) = &self.address {
            patch.insert("address".to_string(), json!(address.to_string()));
        }
        Value::Object(patch)
    }
}

fn require_object(field: &str, value: Option<&Value>) -> Result<(), AppError> {
    match value {
        None | Some(Value::Object(_)) => Ok(()),
        Some(_) => Err(AppError::Validation(format!("{} must be a JSON object", field))),
    }
}
