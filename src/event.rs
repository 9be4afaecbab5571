//! # Change Events
//!
//! Payload types for change-feed events delivered by the upstream platform.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of change event a listener can ask for.
///
/// `All` is a subscription-side wildcard; delivered events always carry a
/// concrete kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// New row created
    #[serde(rename = "INSERT")]
    Insert,
    /// Existing row updated
    #[serde(rename = "UPDATE")]
    Update,
    /// Row deleted
    #[serde(rename = "DELETE")]
    Delete,
    /// Any of the above
    #[serde(rename = "*")]
    All,
}

impl EventKind {
    /// Returns the wire-format string
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Insert => "INSERT",
            EventKind::Update => "UPDATE",
            EventKind::Delete => "DELETE",
            EventKind::All => "*",
        }
    }

    /// Check whether this requested kind accepts a delivered kind
    pub fn matches(&self, delivered: EventKind) -> bool {
        *self == EventKind::All || *self == delivered
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One change event from a table's change feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// What happened (always a concrete kind)
    pub kind: EventKind,

    /// Schema name (default: "public")
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Table name
    pub table: String,

    /// Row ID
    pub record_id: String,

    /// New row image (for INSERT/UPDATE)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_data: Option<Value>,

    /// Old row image (for UPDATE/DELETE)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_data: Option<Value>,

    /// Commit timestamp of the change
    pub commit_timestamp: DateTime<Utc>,
}

pub(crate) fn default_schema() -> String {
    "public".to_string()
}

impl ChangeEvent {
    /// Create an INSERT event
    pub fn insert(table: impl Into<String>, record_id: impl Into<String>, data: Value) -> Self {
        Self {
            kind: EventKind::Insert,
            schema: default_schema(),
            table: table.into(),
            record_id: record_id.into(),
            new_data: Some(data),
            old_data: None,
            commit_timestamp: Utc::now(),
        }
    }

    /// Create an UPDATE event
    pub fn update(
        table: impl Into<String>,
        record_id: impl Into<String>,
        old_data: Value,
        new_data: Value,
    ) -> Self {
        Self {
            kind: EventKind::Update,
            schema: default_schema(),
            table: table.into(),
            record_id: record_id.into(),
            new_data: Some(new_data),
            old_data: Some(old_data),
            commit_timestamp: Utc::now(),
        }
    }

    /// Create a DELETE event
    pub fn delete(table: impl Into<String>, record_id: impl Into<String>, data: Value) -> Self {
        Self {
            kind: EventKind::Delete,
            schema: default_schema(),
            table: table.into(),
            record_id: record_id.into(),
            new_data: None,
            old_data: Some(data),
            commit_timestamp: Utc::now(),
        }
    }

    /// Row image to evaluate filters against (new image wins when present)
    pub fn row_data(&self) -> Option<&Value> {
        self.new_data.as_ref().or(self.old_data.as_ref())
    }
}
