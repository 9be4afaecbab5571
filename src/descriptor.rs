//! # Subscription Descriptors
//!
//! What one listener is interested in, and the key that decides whether two
//! subscriptions can share one upstream channel.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{RealtimeError, RealtimeResult};
use crate::event::{default_schema, ChangeEvent, EventKind};

/// One listener's declared interest in a table's change feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionDescriptor {
    /// Event kind to watch
    pub event: EventKind,

    /// Schema name (default: "public")
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Table being watched
    pub table: String,

    /// Optional upstream filter expression (e.g., "user_id=eq.123")
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub filter: Option<String>,
}

impl SubscriptionDescriptor {
    /// Create a descriptor watching all event kinds on a table
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            event: EventKind::All,
            schema: default_schema(),
            table: table.into(),
            filter: None,
        }
    }

    /// Narrow to a single event kind
    pub fn with_event(mut self, event: EventKind) -> Self {
        self.event = event;
        self
    }

    /// Set the schema
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Set the upstream filter expression
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Validate the descriptor
    pub fn validate(&self) -> RealtimeResult<()> {
        if self.table.is_empty() {
            return Err(RealtimeError::InvalidDescriptor("empty table name".into()));
        }
        if self.schema.is_empty() {
            return Err(RealtimeError::InvalidDescriptor("empty schema name".into()));
        }
        Ok(())
    }

    /// Check if a delivered event matches this descriptor.
    ///
    /// Filter expressions are evaluated upstream (the channel is opened with
    /// them); only schema, table, and event kind are checked here.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        self.schema == event.schema && self.table == event.table && self.event.matches(event.kind)
    }
}

/// Identity under which upstream channels are shared.
///
/// Two subscribe calls with equal sharing keys reuse one upstream
/// connection. Matching is exact-string only; filter subsumption is
/// deliberately not attempted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SharingKey {
    /// Channel name, typically "<table>_user_<id>"
    pub channel: String,

    /// Event kind the channel was opened for
    pub event: EventKind,
}

impl SharingKey {
    /// Create a sharing key
    pub fn new(channel: impl Into<String>, event: EventKind) -> Self {
        Self {
            channel: channel.into(),
            event,
        }
    }
}

impl fmt::Display for SharingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel, self.event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_builder() {
        let desc = SubscriptionDescriptor::new("health_records")
            .with_event(EventKind::Update)
            .with_filter("user_id=eq.123");

        assert_eq!(desc.table, "health_records");
        assert_eq!(desc.schema, "public");
        assert_eq!(desc.event, EventKind::Update);
        assert_eq!(desc.filter.as_deref(), Some("user_id=eq.123"));
    }

    #[test]
    fn test_descriptor_validation() {
        assert!(SubscriptionDescriptor::new("records").validate().is_ok());
        assert!(SubscriptionDescriptor::new("").validate().is_err());

        let bad_schema = SubscriptionDescriptor::new("records").with_schema("");
        assert!(bad_schema.validate().is_err());
    }

    #[test]
    fn test_descriptor_matches_table_and_kind() {
        let desc = SubscriptionDescriptor::new("records").with_event(EventKind::Update);

        let update = ChangeEvent::update("records", "1", json!({}), json!({}));
        let insert = ChangeEvent::insert("records", "1", json!({}));
        let other_table = ChangeEvent::update("orders", "1", json!({}), json!({}));

        assert!(desc.matches(&update));
        assert!(!desc.matches(&insert));
        assert!(!desc.matches(&other_table));
    }

    #[test]
    fn test_wildcard_descriptor_matches_all_kinds() {
        let desc = SubscriptionDescriptor::new("records");

        assert!(desc.matches(&ChangeEvent::insert("records", "1", json!({}))));
        assert!(desc.matches(&ChangeEvent::delete("records", "1", json!({}))));
    }

    #[test]
    fn test_sharing_key_identity() {
        let a = SharingKey::new("records_user_1", EventKind::Update);
        let b = SharingKey::new("records_user_1", EventKind::Update);
        let c = SharingKey::new("records_user_1", EventKind::Insert);
        let d = SharingKey::new("records_user_2", EventKind::Update);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_sharing_key_display() {
        let key = SharingKey::new("records_user_1", EventKind::Update);
        assert_eq!(key.to_string(), "records_user_1:UPDATE");
    }
}
