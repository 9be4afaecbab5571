//! # Upstream Channel Transport
//!
//! The multiplexer's only external boundary: an opaque capability to open a
//! named change-feed channel, register event interest on it, activate it,
//! and close it. The manager never learns how events are delivered.
//!
//! Two implementations ship with the crate:
//! - [`memory::MemoryTransport`]: in-process delivery, used by tests and
//!   embedders that produce events locally
//! - [`websocket::WebSocketTransport`]: a WebSocket client for a realtime
//!   gateway

pub mod memory;
pub mod websocket;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::descriptor::SubscriptionDescriptor;
use crate::errors::RealtimeResult;
use crate::event::{default_schema, ChangeEvent, EventKind};

pub use memory::MemoryTransport;
pub use websocket::{WebSocketConfig, WebSocketTransport};

/// What one registration asks the upstream to deliver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSpec {
    /// Event kind to deliver
    pub event: EventKind,

    /// Schema name
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Table name
    pub table: String,

    /// Optional filter expression, evaluated upstream
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub filter: Option<String>,
}

impl EventSpec {
    /// Build a spec from a subscription descriptor
    pub fn from_descriptor(descriptor: &SubscriptionDescriptor) -> Self {
        Self {
            event: descriptor.event,
            schema: descriptor.schema.clone(),
            table: descriptor.table.clone(),
            filter: descriptor.filter.clone(),
        }
    }

    /// Check schema, table, and event kind against a delivered event.
    ///
    /// Filter evaluation is left to the transport implementation.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        self.schema == event.schema && self.table == event.table && self.event.matches(event.kind)
    }
}

/// Callback a transport invokes for each delivered event
pub type EventSink = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// One open upstream channel.
///
/// Lifecycle: `on` registers interest, `subscribe` activates the channel,
/// `close` tears it down. `close` must be idempotent.
pub trait ChannelHandle: Send {
    /// Register an event sink for a spec
    fn on(&mut self, spec: EventSpec, sink: EventSink);

    /// Activate the channel upstream
    fn subscribe(&mut self) -> RealtimeResult<()>;

    /// Close the channel; no events are delivered afterwards
    fn close(&mut self);
}

/// Factory for upstream channels
pub trait ChannelTransport: Send + Sync {
    /// Open a named channel. The returned handle is inactive until
    /// [`ChannelHandle::subscribe`] is called.
    fn open(&self, name: &str) -> RealtimeResult<Box<dyn ChannelHandle>>;
}
