//! pulsemux - shared realtime change-feed subscriptions
//!
//! Several unrelated views often want push updates for the same underlying
//! data stream (a dashboard summary and a trends chart both watching one
//! user's records). Opening one upstream connection per view multiplies
//! connection overhead and upstream subscription limits for no benefit.
//!
//! [`RealtimeManager`] shares upstream channels by exact `(channel key,
//! event kind)` match, reference-counts listeners, fans events out to every
//! matching listener, and closes a channel when its last listener detaches.
//! [`FeedBinding`] ties a component lifecycle to those subscriptions.
//!
//! ## Architecture
//!
//! - **Manager**: channel registry, ref-counting, fan-out
//! - **Binding**: mount/update/unmount lifecycle bridge
//! - **Transport**: opaque open/register/activate/close channel capability
//! - **Observability**: structured one-line JSON logs

pub mod binding;
pub mod descriptor;
pub mod errors;
pub mod event;
pub mod manager;
pub mod observability;
pub mod stats;
pub mod transport;

pub use binding::{BindingParams, FeedBinding};
pub use descriptor::{SharingKey, SubscriptionDescriptor};
pub use errors::{RealtimeError, RealtimeResult};
pub use event::{ChangeEvent, EventKind};
pub use manager::{ListenerFn, ManagerConfig, RealtimeManager, SubscriptionHandle};
pub use stats::ManagerStats;
pub use transport::{
    ChannelHandle, ChannelTransport, EventSink, EventSpec, MemoryTransport, WebSocketConfig,
    WebSocketTransport,
};
