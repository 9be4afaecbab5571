//! # Consumer Binding
//!
//! Bridges a component's mount/update/unmount lifecycle to manager
//! subscriptions. `apply` has dependency-list semantics: whenever the
//! declared parameters or the callback's identity change, the previous
//! subscriptions are torn down and new ones created; an unchanged call is a
//! no-op. Dropping the binding unsubscribes everything exactly once.

use std::sync::Arc;

use uuid::Uuid;

use crate::descriptor::SubscriptionDescriptor;
use crate::event::EventKind;
use crate::manager::{ListenerFn, RealtimeManager, SubscriptionHandle};

/// Declared inputs of one binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingParams {
    /// Scoping identity; no subscription is created without one
    pub user_id: Option<Uuid>,

    /// Table to watch
    pub table: String,

    /// Event kinds to watch; one subscription per kind
    pub events: Vec<EventKind>,

    /// Master switch
    pub enabled: bool,
}

impl BindingParams {
    /// Params watching every change to a user's rows in a table
    pub fn for_user(user_id: Uuid, table: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id),
            table: table.into(),
            events: vec![EventKind::All],
            enabled: true,
        }
    }

    /// Replace the watched event kinds
    pub fn with_events(mut self, events: Vec<EventKind>) -> Self {
        self.events = events;
        self
    }

    /// Set the enabled flag
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn channel_key(&self, user_id: &Uuid) -> String {
        format!("{}_user_{}", self.table, user_id)
    }

    fn filter(&self, user_id: &Uuid) -> String {
        format!("user_id=eq.{}", user_id)
    }
}

/// One component's live subscriptions
pub struct FeedBinding {
    manager: Arc<RealtimeManager>,
    params: Option<BindingParams>,
    callback: Option<Arc<ListenerFn>>,
    handles: Vec<SubscriptionHandle>,
}

impl FeedBinding {
    /// Create an unmounted binding
    pub fn new(manager: Arc<RealtimeManager>) -> Self {
        Self {
            manager,
            params: None,
            callback: None,
            handles: Vec::new(),
        }
    }

    /// Re-evaluate the binding against its inputs.
    ///
    /// Callback identity is pointer identity (`Arc::ptr_eq`): pass the same
    /// `Arc` to keep subscriptions alive, a new one to force re-binding.
    pub fn apply(&mut self, params: BindingParams, callback: Arc<ListenerFn>) {
        let unchanged = self.params.as_ref() == Some(&params)
            && self
                .callback
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &callback));
        if unchanged {
            return;
        }

        self.teardown();
        self.params = Some(params.clone());
        self.callback = Some(Arc::clone(&callback));

        if !params.enabled {
            return;
        }
        let Some(user_id) = params.user_id else {
            return;
        };

        let key = params.channel_key(&user_id);
        let filter = params.filter(&user_id);
        for kind in &params.events {
            let descriptor = SubscriptionDescriptor::new(&params.table)
                .with_event(*kind)
                .with_filter(filter.clone());
            self.handles
                .push(self.manager.subscribe(&key, descriptor, Arc::clone(&callback)));
        }
    }

    /// Remove all of this binding's subscriptions and forget its inputs,
    /// so a later `apply` always re-binds
    pub fn teardown(&mut self) {
        for handle in self.handles.drain(..) {
            handle.unsubscribe();
        }
        self.params = None;
        self.callback = None;
    }

    /// Whether any subscription is currently registered
    pub fn is_subscribed(&self) -> bool {
        self.handles.iter().any(SubscriptionHandle::is_active)
    }
}

impl Drop for FeedBinding {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use crate::event::ChangeEvent;
    use crate::transport::MemoryTransport;

    fn setup() -> (MemoryTransport, Arc<RealtimeManager>) {
        let transport = MemoryTransport::new();
        let manager = Arc::new(RealtimeManager::new(Arc::new(transport.clone())));
        (transport, manager)
    }

    fn counting_callback() -> (Arc<ListenerFn>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let cb_count = Arc::clone(&count);
        let callback: Arc<ListenerFn> = Arc::new(move |_| {
            cb_count.fetch_add(1, Ordering::SeqCst);
        });
        (callback, count)
    }

    #[test]
    fn test_mount_subscribes_per_event_kind() {
        let (transport, manager) = setup();
        let mut binding = FeedBinding::new(manager.clone());
        let user = Uuid::new_v4();
        let (cb, _) = counting_callback();

        binding.apply(
            BindingParams::for_user(user, "daily_metrics")
                .with_events(vec![EventKind::Insert, EventKind::Update]),
            cb,
        );

        assert!(binding.is_subscribed());
        assert_eq!(transport.opened_total(), 2);
        assert_eq!(manager.stats().channel_count, 2);
    }

    #[test]
    fn test_unchanged_apply_is_noop() {
        let (transport, manager) = setup();
        let mut binding = FeedBinding::new(manager);
        let user = Uuid::new_v4();
        let (cb, _) = counting_callback();
        let params = BindingParams::for_user(user, "daily_metrics");

        binding.apply(params.clone(), Arc::clone(&cb));
        binding.apply(params, cb);

        assert_eq!(transport.opened_total(), 1);
        assert_eq!(transport.closed_total(), 0);
    }

    #[test]
    fn test_param_change_resubscribes() {
        let (transport, manager) = setup();
        let mut binding = FeedBinding::new(manager.clone());
        let user = Uuid::new_v4();
        let (cb, _) = counting_callback();

        binding.apply(BindingParams::for_user(user, "daily_metrics"), Arc::clone(&cb));
        binding.apply(BindingParams::for_user(user, "lab_results"), cb);

        assert_eq!(transport.opened_total(), 2);
        assert_eq!(transport.closed_total(), 1);
        let stats = manager.stats();
        assert_eq!(stats.channel_count, 1);
        assert!(stats
            .listeners
            .keys()
            .all(|k| k.starts_with("lab_results_user_")));
    }

    #[test]
    fn test_callback_identity_change_resubscribes() {
        let (transport, manager) = setup();
        let mut binding = FeedBinding::new(manager);
        let user = Uuid::new_v4();
        let params = BindingParams::for_user(user, "daily_metrics");
        let (cb_a, _) = counting_callback();
        let (cb_b, _) = counting_callback();

        binding.apply(params.clone(), cb_a);
        binding.apply(params, cb_b);

        assert_eq!(transport.opened_total(), 2);
        assert_eq!(transport.closed_total(), 1);
    }

    #[test]
    fn test_disabled_binding_subscribes_nothing() {
        let (transport, manager) = setup();
        let mut binding = FeedBinding::new(manager);
        let user = Uuid::new_v4();
        let (cb, _) = counting_callback();

        binding.apply(
            BindingParams::for_user(user, "daily_metrics").with_enabled(false),
            cb,
        );

        assert!(!binding.is_subscribed());
        assert_eq!(transport.opened_total(), 0);
    }

    #[test]
    fn test_missing_identity_subscribes_nothing() {
        let (transport, manager) = setup();
        let mut binding = FeedBinding::new(manager);
        let (cb, _) = counting_callback();

        let mut params = BindingParams::for_user(Uuid::new_v4(), "daily_metrics");
        params.user_id = None;
        binding.apply(params, cb);

        assert!(!binding.is_subscribed());
        assert_eq!(transport.opened_total(), 0);
    }

    #[test]
    fn test_identity_lost_tears_down() {
        let (transport, manager) = setup();
        let mut binding = FeedBinding::new(manager.clone());
        let user = Uuid::new_v4();
        let (cb, _) = counting_callback();
        let params = BindingParams::for_user(user, "daily_metrics");

        binding.apply(params.clone(), Arc::clone(&cb));
        assert!(binding.is_subscribed());

        let mut signed_out = params;
        signed_out.user_id = None;
        binding.apply(signed_out, cb);

        assert!(!binding.is_subscribed());
        assert_eq!(transport.closed_total(), 1);
        assert_eq!(manager.stats().channel_count, 0);
    }

    #[test]
    fn test_explicit_teardown_allows_reapply() {
        let (transport, manager) = setup();
        let mut binding = FeedBinding::new(manager);
        let user = Uuid::new_v4();
        let (cb, _) = counting_callback();
        let params = BindingParams::for_user(user, "daily_metrics");

        binding.apply(params.clone(), Arc::clone(&cb));
        binding.teardown();
        assert!(!binding.is_subscribed());

        binding.apply(params, cb);
        assert!(binding.is_subscribed());
        assert_eq!(transport.opened_total(), 2);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let (transport, manager) = setup();
        let user = Uuid::new_v4();
        let (cb, _) = counting_callback();

        {
            let mut binding = FeedBinding::new(manager.clone());
            binding.apply(BindingParams::for_user(user, "daily_metrics"), cb);
            assert_eq!(manager.stats().channel_count, 1);
        }

        assert_eq!(manager.stats().channel_count, 0);
        assert_eq!(transport.closed_total(), 1);
    }

    #[test]
    fn test_bound_callback_receives_scoped_events() {
        let (transport, manager) = setup();
        let mut binding = FeedBinding::new(manager);
        let user = Uuid::new_v4();
        let (cb, count) = counting_callback();

        binding.apply(BindingParams::for_user(user, "daily_metrics"), cb);

        let channel = format!("daily_metrics_user_{}", user);
        transport.emit(
            &channel,
            &ChangeEvent::insert("daily_metrics", "m1", json!({"user_id": user.to_string()})),
        );
        // Different user's row on the same channel name is filtered upstream
        transport.emit(
            &channel,
            &ChangeEvent::insert("daily_metrics", "m2", json!({"user_id": "someone-else"})),
        );

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
