use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// The kind of write a queued mutation performs against its resource.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    pub fn parse_operation(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Operation::Create),
            "update" => Some(Operation::Update),
            "delete" => Some(Operation::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::parse_operation(&s.trim().to_ascii_lowercase())
            .ok_or_else(|| format!("unknown operation '{s}' (expected create, update or delete)"))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MutationStatus {
    Pending,
    Failed,
}

impl MutationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationStatus::Pending => "pending",
            MutationStatus::Failed => "failed",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MutationStatus::Pending),
            "failed" => Some(MutationStatus::Failed),
            _ => None,
        }
    }
}

/// A write request as the application hands it over, before it has an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMutation {
    pub resource: String,
    pub operation: Operation,
    pub payload: Value,
}

impl NewMutation {
    pub fn new(resource: impl Into<String>, operation: Operation, payload: Value) -> Self {
        Self {
            resource: resource.into(),
            operation,
            payload,
        }
    }
}

/// One durably queued write. Lives in the queue until it has been applied
/// remotely; failed replays stay behind with `status = Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub resource: String,
    pub operation: Operation,
    pub payload: Value,
    pub status: MutationStatus,
    pub retry_count: i64,
    pub last_error: Option<String>,
}
