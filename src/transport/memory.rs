//! # In-Process Transport
//!
//! A fully functional transport that delivers events emitted in-process.
//! Used by the test suite to verify sharing and teardown invariants, and
//! usable by embedders that generate change events locally.
//!
//! Filter expressions of the form `field=eq.value` are evaluated here
//! against the event's row data, mirroring what a real upstream does
//! server-side. Anything else fails closed (no delivery).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use uuid::Uuid;

use crate::errors::{RealtimeError, RealtimeResult};
use crate::event::ChangeEvent;

use super::{ChannelHandle, ChannelTransport, EventSink, EventSpec};

struct Registration {
    spec: EventSpec,
    sink: EventSink,
}

struct OpenChannel {
    name: String,
    registrations: Vec<Registration>,
}

#[derive(Default)]
struct MemoryState {
    open: HashMap<Uuid, OpenChannel>,
    opened_total: usize,
    closed_total: usize,
    fail_next_open: bool,
}

/// In-process channel transport
#[derive(Default, Clone)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    /// Create a new transport with no open channels
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `open` call fail, for error-path tests
    pub fn fail_next_open(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_next_open = true;
        }
    }

    /// Number of currently active channels
    pub fn open_channels(&self) -> usize {
        self.state.lock().map(|s| s.open.len()).unwrap_or(0)
    }

    /// Total `open` calls that ever succeeded
    pub fn opened_total(&self) -> usize {
        self.state.lock().map(|s| s.opened_total).unwrap_or(0)
    }

    /// Total channels ever closed
    pub fn closed_total(&self) -> usize {
        self.state.lock().map(|s| s.closed_total).unwrap_or(0)
    }

    /// Deliver an event to every active registration on `channel` whose
    /// spec and filter match. Returns the number of sinks invoked.
    pub fn emit(&self, channel: &str, event: &ChangeEvent) -> usize {
        // Sinks are invoked with no lock held so they may re-enter the
        // transport (e.g., a listener that subscribes to another channel).
        let sinks: Vec<EventSink> = {
            let Ok(state) = self.state.lock() else {
                return 0;
            };
            state
                .open
                .values()
                .filter(|c| c.name == channel)
                .flat_map(|c| c.registrations.iter())
                .filter(|r| r.spec.matches(event) && filter_matches(r.spec.filter.as_deref(), event))
                .map(|r| Arc::clone(&r.sink))
                .collect()
        };

        for sink in &sinks {
            sink(event);
        }
        sinks.len()
    }
}

impl ChannelTransport for MemoryTransport {
    fn open(&self, name: &str) -> RealtimeResult<Box<dyn ChannelHandle>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| RealtimeError::Internal("memory transport lock poisoned".into()))?;

        if state.fail_next_open {
            state.fail_next_open = false;
            return Err(RealtimeError::ChannelOpen(name.to_string()));
        }

        state.opened_total += 1;

        Ok(Box::new(MemoryChannelHandle {
            id: Uuid::new_v4(),
            name: name.to_string(),
            state: Arc::clone(&self.state),
            pending: Vec::new(),
            closed: false,
        }))
    }
}

struct MemoryChannelHandle {
    id: Uuid,
    name: String,
    state: Arc<Mutex<MemoryState>>,
    pending: Vec<Registration>,
    closed: bool,
}

impl ChannelHandle for MemoryChannelHandle {
    fn on(&mut self, spec: EventSpec, sink: EventSink) {
        self.pending.push(Registration { spec, sink });
    }

    fn subscribe(&mut self) -> RealtimeResult<()> {
        if self.closed {
            return Err(RealtimeError::Connection("channel already closed".into()));
        }

        let mut state = self
            .state
            .lock()
            .map_err(|_| RealtimeError::Internal("memory transport lock poisoned".into()))?;

        state.open.insert(
            self.id,
            OpenChannel {
                name: self.name.clone(),
                registrations: std::mem::take(&mut self.pending),
            },
        );
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Ok(mut state) = self.state.lock() {
            state.open.remove(&self.id);
            state.closed_total += 1;
        }
    }
}

/// Evaluate a `field=eq.value` filter against the event's row data
fn filter_matches(filter: Option<&str>, event: &ChangeEvent) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    let Some((field, rest)) = filter.split_once('=') else {
        return false;
    };
    let Some(expected) = rest.strip_prefix("eq.") else {
        return false;
    };
    let Some(value) = event.row_data().and_then(|d| d.get(field)) else {
        return false;
    };

    match value {
        Value::String(s) => s == expected,
        other => other.to_string() == expected,
    }
}
