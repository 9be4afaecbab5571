//! # WebSocket Transport
//!
//! Client-side transport for a realtime gateway speaking a JSON frame
//! protocol: `subscribe`/`unsubscribe`/`heartbeat`/`auth` frames out,
//! `event`/`subscribed`/`heartbeat`/`error` frames in.
//!
//! A single driver task owns the socket. Channel handles talk to it over an
//! unbounded command channel, so `open`/`subscribe`/`close` stay synchronous
//! for callers; the socket's readiness is never waited on.
//!
//! The gateway keys subscriptions per connection and channel name, so
//! several handles for one name (one per event kind) must share a single
//! server-side subscription: the transport ref-counts names, sends the
//! `subscribe` frame only for the first handle, the `unsubscribe` frame
//! only when the last handle closes, and filters event kinds client-side
//! through the route table.
//!
//! Dropped connections are not re-established here. The driver logs and
//! exits; consumers see stale data until the application reconnects.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use crate::errors::{RealtimeError, RealtimeResult};
use crate::event::{ChangeEvent, EventKind};
use crate::observability::Logger;

use super::{ChannelHandle, ChannelTransport, EventSink, EventSpec};

/// WebSocket transport configuration
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Gateway URL
    pub url: String,

    /// Optional token sent as an auth frame after connecting
    pub auth_token: Option<String>,

    /// Heartbeat interval in seconds
    pub heartbeat_interval_secs: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:4000/realtime".to_string(),
            auth_token: None,
            heartbeat_interval_secs: 30,
        }
    }
}

/// Frame sent to the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Subscribe to a channel
    Subscribe {
        channel: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        events: Option<Vec<EventKind>>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        filter: Option<String>,
    },

    /// Unsubscribe from a channel
    Unsubscribe { channel: String },

    /// Heartbeat/ping
    Heartbeat {
        #[serde(default)]
        ref_id: Option<String>,
    },

    /// Authentication
    Auth { token: String },
}

/// Frame received from the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Subscription confirmed
    Subscribed {
        channel: String,
        subscription_id: String,
    },

    /// Unsubscription confirmed
    Unsubscribed { channel: String },

    /// Change event
    Event { channel: String, event: ChangeEvent },

    /// Heartbeat response
    Heartbeat {
        ref_id: Option<String>,
        server_time: i64,
    },

    /// Error message
    Error { message: String, code: String },

    /// System message
    System { message: String },
}

struct HandleRoutes {
    channel: String,
    registrations: Vec<(EventSpec, EventSink)>,
}

type RouteTable = Mutex<HashMap<Uuid, HandleRoutes>>;

/// Open-handle count per channel name
type ChannelRefs = Mutex<HashMap<String, usize>>;

/// WebSocket channel transport
pub struct WebSocketTransport {
    frame_tx: mpsc::UnboundedSender<ClientFrame>,
    routes: Arc<RouteTable>,
    channel_refs: Arc<ChannelRefs>,
}

impl WebSocketTransport {
    /// Connect to the gateway and spawn the socket driver task
    pub async fn connect(config: WebSocketConfig) -> RealtimeResult<Self> {
        let (ws_stream, _) = connect_async(config.url.as_str())
            .await
            .map_err(|e| RealtimeError::Connection(format!("WebSocket handshake failed: {}", e)))?;

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let routes: Arc<RouteTable> = Arc::new(Mutex::new(HashMap::new()));

        if let Some(token) = &config.auth_token {
            let _ = frame_tx.send(ClientFrame::Auth {
                token: token.clone(),
            });
        }

        tokio::spawn(drive(
            ws_stream,
            frame_rx,
            Arc::clone(&routes),
            config.heartbeat_interval_secs,
        ));

        Ok(Self {
            frame_tx,
            routes,
            channel_refs: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

impl ChannelTransport for WebSocketTransport {
    fn open(&self, name: &str) -> RealtimeResult<Box<dyn ChannelHandle>> {
        if name.is_empty() {
            return Err(RealtimeError::InvalidChannelKey("empty channel name".into()));
        }

        Ok(Box::new(WsChannelHandle {
            id: Uuid::new_v4(),
            name: name.to_string(),
            frame_tx: self.frame_tx.clone(),
            routes: Arc::clone(&self.routes),
            channel_refs: Arc::clone(&self.channel_refs),
            pending: Vec::new(),
            subscribed: false,
            closed: false,
        }))
    }
}

struct WsChannelHandle {
    id: Uuid,
    name: String,
    frame_tx: mpsc::UnboundedSender<ClientFrame>,
    routes: Arc<RouteTable>,
    channel_refs: Arc<ChannelRefs>,
    pending: Vec<(EventSpec, EventSink)>,
    subscribed: bool,
    closed: bool,
}

impl ChannelHandle for WsChannelHandle {
    fn on(&mut self, spec: EventSpec, sink: EventSink) {
        self.pending.push((spec, sink));
    }

    fn subscribe(&mut self) -> RealtimeResult<()> {
        if self.closed {
            return Err(RealtimeError::Connection("channel already closed".into()));
        }

        let registrations = std::mem::take(&mut self.pending);

        // Only the first handle for a name joins upstream. The join asks
        // for all event kinds; each handle's kind narrowing happens
        // client-side in the route table, so handles sharing a name never
        // overwrite each other's server-side subscription.
        {
            let mut refs = self
                .channel_refs
                .lock()
                .map_err(|_| RealtimeError::Internal("channel ref table lock poisoned".into()))?;
            let count = refs.entry(self.name.clone()).or_insert(0);
            if *count == 0 {
                let frame = ClientFrame::Subscribe {
                    channel: self.name.clone(),
                    events: None,
                    filter: registrations.first().and_then(|(spec, _)| spec.filter.clone()),
                };
                self.frame_tx
                    .send(frame)
                    .map_err(|_| RealtimeError::Connection("realtime socket closed".into()))?;
            }
            *count += 1;
        }

        let mut routes = self
            .routes
            .lock()
            .map_err(|_| RealtimeError::Internal("route table lock poisoned".into()))?;
        routes.insert(
            self.id,
            HandleRoutes {
                channel: self.name.clone(),
                registrations,
            },
        );
        self.subscribed = true;
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Ok(mut routes) = self.routes.lock() {
            routes.remove(&self.id);
        }
        if !self.subscribed {
            return;
        }

        // Leave upstream only when the last handle for this name closes;
        // other handles keep depending on the shared subscription.
        if let Ok(mut refs) = self.channel_refs.lock() {
            if let Some(count) = refs.get_mut(&self.name) {
                *count -= 1;
                if *count == 0 {
                    refs.remove(&self.name);
                    let _ = self.frame_tx.send(ClientFrame::Unsubscribe {
                        channel: self.name.clone(),
                    });
                }
            }
        }
    }
}

/// Socket driver: multiplexes outgoing frames, incoming frames, and the
/// heartbeat timer until the socket or the transport goes away.
async fn drive(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut frame_rx: mpsc::UnboundedReceiver<ClientFrame>,
    routes: Arc<RouteTable>,
    heartbeat_interval_secs: u64,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut heartbeat = tokio::time::interval(Duration::from_secs(heartbeat_interval_secs));

    loop {
        tokio::select! {
            frame = frame_rx.recv() => {
                match frame {
                    Some(frame) => match serde_json::to_string(&frame) {
                        Ok(json) => {
                            if let Err(e) = ws_sender.send(Message::Text(json)).await {
                                Logger::error("WS_SEND_FAILED", &[("error", &e.to_string())]);
                                break;
                            }
                        }
                        Err(e) => {
                            Logger::error("WS_ENCODE_FAILED", &[("error", &e.to_string())]);
                        }
                    },
                    // Transport dropped, nothing left to send
                    None => break,
                }
            }

            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_frame(&text, &routes),
                    Some(Ok(Message::Ping(data))) => {
                        if ws_sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        Logger::warn("WS_CLOSED", &[]);
                        break;
                    }
                    Some(Err(e)) => {
                        Logger::error("WS_RECV_FAILED", &[("error", &e.to_string())]);
                        break;
                    }
                    _ => {}
                }
            }

            _ = heartbeat.tick() => {
                let frame = ClientFrame::Heartbeat { ref_id: None };
                if let Ok(json) = serde_json::to_string(&frame) {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

fn handle_frame(text: &str, routes: &RouteTable) {
    let frame: ServerFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            let err = RealtimeError::InvalidFrame(e.to_string());
            Logger::warn("WS_BAD_FRAME", &[("error", &err.to_string())]);
            return;
        }
    };

    match frame {
        ServerFrame::Event { channel, event } => {
            // Sinks run with the route lock released
            let sinks: Vec<EventSink> = {
                let Ok(routes) = routes.lock() else {
                    return;
                };
                routes
                    .values()
                    .filter(|r| r.channel == channel)
                    .flat_map(|r| r.registrations.iter())
                    .filter(|(spec, _)| spec.matches(&event))
                    .map(|(_, sink)| Arc::clone(sink))
                    .collect()
            };
            for sink in sinks {
                sink(&event);
            }
        }
        ServerFrame::Error { message, code } => {
            Logger::error("WS_SERVER_ERROR", &[("code", &code), ("message", &message)]);
        }
        ServerFrame::Subscribed { .. }
        | ServerFrame::Unsubscribed { .. }
        | ServerFrame::Heartbeat { .. }
        | ServerFrame::System { .. } => {}
    }
}
