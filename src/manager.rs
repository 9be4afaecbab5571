//! # Realtime Manager
//!
//! Process-wide authority for opening, sharing, and closing upstream
//! change-feed channels.
//!
//! Channels are shared by exact match on `(channel key, event kind)`: the
//! first subscriber for a sharing key opens the upstream connection, later
//! subscribers attach to it, and the last unsubscribe closes it. Incoming
//! events fan out to every listener whose descriptor matches.
//!
//! Errors never propagate to subscribers. Invalid input, an upstream open
//! failure, or a poisoned lock all log and hand back a detached handle;
//! consumers see stale data rather than a crash.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use uuid::Uuid;

use crate::descriptor::{SharingKey, SubscriptionDescriptor};
use crate::errors::{RealtimeError, RealtimeResult};
use crate::event::ChangeEvent;
use crate::observability::Logger;
use crate::stats::ManagerStats;
use crate::transport::{ChannelHandle, ChannelTransport, EventSink, EventSpec};

/// Callback invoked with each matching change event
pub type ListenerFn = dyn Fn(&ChangeEvent) + Send + Sync;

struct Listener {
    descriptor: SubscriptionDescriptor,
    callback: Arc<ListenerFn>,
}

struct ChannelEntry {
    /// The upstream connection, exclusively owned by this entry
    handle: Box<dyn ChannelHandle>,

    /// Descriptor the channel was opened with
    opened_with: SubscriptionDescriptor,

    /// Registered listeners by subscription id
    listeners: HashMap<Uuid, Listener>,
}

type Registry = Mutex<HashMap<SharingKey, ChannelEntry>>;

/// Manager configuration
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Maximum listeners on one shared channel
    pub max_listeners_per_channel: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_listeners_per_channel: 100,
        }
    }
}

/// Shared-channel subscription manager.
///
/// An explicit instance, not a global: tests and embedders construct
/// isolated managers with their own transports.
pub struct RealtimeManager {
    transport: Arc<dyn ChannelTransport>,
    channels: Arc<Registry>,
    config: ManagerConfig,
}

impl RealtimeManager {
    /// Create a manager with default configuration
    pub fn new(transport: Arc<dyn ChannelTransport>) -> Self {
        Self::with_config(transport, ManagerConfig::default())
    }

    /// Create a manager with explicit configuration
    pub fn with_config(transport: Arc<dyn ChannelTransport>, config: ManagerConfig) -> Self {
        Self {
            transport,
            channels: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    /// Register a listener on a channel, opening the upstream connection
    /// only if no listener shares the same `(channel key, event kind)`.
    ///
    /// Never fails from the caller's perspective: on any error the failure
    /// is logged and the returned handle is detached (its `unsubscribe` is
    /// a no-op, consistent with "nothing was registered").
    pub fn subscribe(
        &self,
        channel_key: &str,
        descriptor: SubscriptionDescriptor,
        callback: Arc<ListenerFn>,
    ) -> SubscriptionHandle {
        if channel_key.is_empty() {
            let err = RealtimeError::InvalidChannelKey("empty channel key".into());
            Logger::warn("SUBSCRIBE_REJECTED", &[("error", &err.to_string())]);
            return SubscriptionHandle::detached();
        }
        if let Err(err) = descriptor.validate() {
            Logger::warn(
                "SUBSCRIBE_REJECTED",
                &[("channel", channel_key), ("error", &err.to_string())],
            );
            return SubscriptionHandle::detached();
        }

        let key = SharingKey::new(channel_key, descriptor.event);
        let id = Uuid::new_v4();

        let mut channels = match self.channels.lock() {
            Ok(guard) => guard,
            Err(_) => {
                Logger::error("REGISTRY_POISONED", &[("channel", channel_key)]);
                return SubscriptionHandle::detached();
            }
        };

        if let Some(entry) = channels.get_mut(&key) {
            if entry.listeners.len() >= self.config.max_listeners_per_channel {
                let err = RealtimeError::TooManyListeners(self.config.max_listeners_per_channel);
                Logger::warn(
                    "SUBSCRIBE_REJECTED",
                    &[("channel", channel_key), ("error", &err.to_string())],
                );
                return SubscriptionHandle::detached();
            }
            if entry.opened_with != descriptor {
                // Same sharing key, different descriptor text. The channel
                // keeps its original upstream configuration.
                Logger::warn(
                    "CHANNEL_REUSE_MISMATCH",
                    &[("channel", channel_key), ("event", key.event.as_str())],
                );
            }
            entry.listeners.insert(id, Listener { descriptor, callback });
            return SubscriptionHandle::attached(Arc::downgrade(&self.channels), key, id);
        }

        // The cap also binds the first subscriber, so a zero cap admits
        // nobody rather than one listener per channel.
        if self.config.max_listeners_per_channel == 0 {
            let err = RealtimeError::TooManyListeners(0);
            Logger::warn(
                "SUBSCRIBE_REJECTED",
                &[("channel", channel_key), ("error", &err.to_string())],
            );
            return SubscriptionHandle::detached();
        }

        // First subscriber for this sharing key. The registry lock is held
        // across the open so a concurrent subscriber can never race a
        // duplicate upstream connection for the same key.
        let handle = match self.open_channel(&key, &descriptor) {
            Ok(handle) => handle,
            Err(err) => {
                Logger::error(
                    "CHANNEL_OPEN_FAILED",
                    &[("channel", channel_key), ("error", &err.to_string())],
                );
                return SubscriptionHandle::detached();
            }
        };

        let mut entry = ChannelEntry {
            handle,
            opened_with: descriptor.clone(),
            listeners: HashMap::new(),
        };
        entry.listeners.insert(id, Listener { descriptor, callback });
        channels.insert(key.clone(), entry);

        Logger::info(
            "CHANNEL_OPEN",
            &[("channel", channel_key), ("event", key.event.as_str())],
        );
        SubscriptionHandle::attached(Arc::downgrade(&self.channels), key, id)
    }

    fn open_channel(
        &self,
        key: &SharingKey,
        descriptor: &SubscriptionDescriptor,
    ) -> RealtimeResult<Box<dyn ChannelHandle>> {
        let mut handle = self.transport.open(&key.channel)?;

        // The sink holds only a weak registry reference so an open channel
        // can never keep a dropped manager alive.
        let registry = Arc::downgrade(&self.channels);
        let sink_key = key.clone();
        let sink: EventSink = Arc::new(move |event: &ChangeEvent| {
            fan_out(&registry, &sink_key, event);
        });

        handle.on(EventSpec::from_descriptor(descriptor), sink);
        if let Err(err) = handle.subscribe() {
            handle.close();
            return Err(err);
        }
        Ok(handle)
    }

    /// Snapshot of channel and listener counts at call time
    pub fn stats(&self) -> ManagerStats {
        let mut stats = ManagerStats::default();
        if let Ok(channels) = self.channels.lock() {
            stats.channel_count = channels.len();
            for (key, entry) in channels.iter() {
                stats.listeners.insert(key.to_string(), entry.listeners.len());
            }
        }
        stats
    }

    /// Emit the current stats as a structured log line
    pub fn log_stats(&self) {
        let stats = self.stats();
        Logger::info(
            "REALTIME_STATS",
            &[
                ("channels", &stats.channel_count.to_string()),
                ("listeners", &stats.total_listeners().to_string()),
            ],
        );
    }
}

/// Deliver one event to every matching listener of a sharing key.
///
/// Callbacks are cloned out under the lock and invoked with the lock
/// released, so a callback may itself subscribe or unsubscribe. A panicking
/// callback is caught, logged, and never stops delivery to the others.
fn fan_out(registry: &Weak<Registry>, key: &SharingKey, event: &ChangeEvent) {
    let Some(registry) = registry.upgrade() else {
        return;
    };

    let callbacks: Vec<(Uuid, Arc<ListenerFn>)> = {
        let Ok(channels) = registry.lock() else {
            Logger::error("REGISTRY_POISONED", &[("channel", &key.channel)]);
            return;
        };
        let Some(entry) = channels.get(key) else {
            return;
        };
        entry
            .listeners
            .iter()
            .filter(|(_, listener)| listener.descriptor.matches(event))
            .map(|(id, listener)| (*id, Arc::clone(&listener.callback)))
            .collect()
    };

    for (id, callback) in callbacks {
        if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
            Logger::error(
                "LISTENER_PANIC",
                &[("channel", &key.channel), ("listener", &id.to_string())],
            );
        }
    }
}

/// Opaque unsubscribe handle for one registered listener.
///
/// `unsubscribe` is idempotent; a handle returned after a failed subscribe
/// is detached and unsubscribing it is a no-op.
pub struct SubscriptionHandle {
    registry: Weak<Registry>,
    key: Option<SharingKey>,
    id: Uuid,
    active: AtomicBool,
}

impl SubscriptionHandle {
    fn attached(registry: Weak<Registry>, key: SharingKey, id: Uuid) -> Self {
        Self {
            registry,
            key: Some(key),
            id,
            active: AtomicBool::new(true),
        }
    }

    fn detached() -> Self {
        Self {
            registry: Weak::new(),
            key: None,
            id: Uuid::nil(),
            active: AtomicBool::new(false),
        }
    }

    /// Whether this handle still owns a registered listener
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Remove exactly this listener. When the channel's listener set
    /// empties, the upstream connection is closed and the registry entry
    /// removed. Safe to call more than once; unknown ids are a silent
    /// no-op.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        let Some(key) = self.key.as_ref() else {
            return;
        };
        let Some(registry) = self.registry.upgrade() else {
            return;
        };

        // Take the emptied entry out under the lock, close it outside, so
        // transport teardown never runs while the registry is held.
        let removed = {
            let Ok(mut channels) = registry.lock() else {
                Logger::error("REGISTRY_POISONED", &[("channel", &key.channel)]);
                return;
            };
            let Some(entry) = channels.get_mut(key) else {
                return;
            };
            entry.listeners.remove(&self.id);
            if entry.listeners.is_empty() {
                channels.remove(key)
            } else {
                None
            }
        };

        if let Some(mut entry) = removed {
            entry.handle.close();
            Logger::info(
                "CHANNEL_CLOSE",
                &[("channel", &key.channel), ("event", key.event.as_str())],
            );
        }
    }
}
