//! Broadcast transport between same-origin windows
//!
//! Wraps the host's named broadcast primitive behind a capability trait
//! and layers the topic router on top. The transport gives no delivery
//! guarantee, no ordering guarantee, and no persistence; every protocol
//! above it tolerates missed, duplicated, and reordered frames.
//!
//! The underlying channel is created lazily on first use, so constructing
//! a `Transport` performs no I/O. A host without the broadcast capability
//! turns publish and subscribe into permanent no-ops: single-window
//! operation is the baseline, cross-window sync the enhancement.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, trace, warn};

use crate::messages::{decode_envelope, encode_envelope, Envelope, Topic};
use crate::metrics::SyncMetrics;
use crate::model::WindowId;
use crate::router::{Listener, TopicRouter};

/// Frames buffered per channel before lagging windows skip old traffic.
/// Skips are safe: the feed watchdog re-requests a full snapshot.
const CHANNEL_CAPACITY: usize = 64;

/// Capability interface over the host's same-origin broadcast primitive.
pub trait BroadcastMedium: Send + Sync {
    /// Join the named channel.
    ///
    /// Returns None when the host has no broadcast capability; callers
    /// degrade to single-window mode and never retry.
    fn join(&self, channel: &str) -> Option<Box<dyn BroadcastPort>>;
}

/// One window's attachment to a broadcast channel.
///
/// Posts are fire-and-forget. The host echoes a window's own posts back
/// in some environments, so drained frames may include them; the
/// transport filters echoes by sender id.
pub trait BroadcastPort: Send {
    /// Publish one serialized frame to every attached window.
    fn post(&mut self, frame: &str);

    /// Frames delivered since the last drain.
    fn drain(&mut self) -> Vec<String>;
}

/// In-process broadcast hub shared by every window of one host.
///
/// Backed by one tokio broadcast channel per channel name. Send and
/// try_recv never block, which keeps the transport synchronous.
pub struct BroadcastHub {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastMedium for BroadcastHub {
    fn join(&self, channel: &str) -> Option<Box<dyn BroadcastPort>> {
        let mut channels = self.channels.lock().ok()?;
        let tx = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone();
        let rx = tx.subscribe();
        Some(Box::new(HubPort { tx, rx }))
    }
}

struct HubPort {
    tx: broadcast::Sender<String>,
    rx: broadcast::Receiver<String>,
}

impl BroadcastPort for HubPort {
    fn post(&mut self, frame: &str) {
        // A send with no other receivers is not an error
        let _ = self.tx.send(frame.to_string());
    }

    fn drain(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(frame) => frames.push(frame),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Broadcast receiver lagged; frames skipped");
                }
                Err(_) => break,
            }
        }
        frames
    }
}

/// A medium for hosts without any broadcast capability.
pub struct NoBroadcastMedium;

impl BroadcastMedium for NoBroadcastMedium {
    fn join(&self, _channel: &str) -> Option<Box<dyn BroadcastPort>> {
        None
    }
}

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Name of the shared broadcast channel.
    pub channel_name: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            channel_name: "dashboard-sync".to_string(),
        }
    }
}

/// Per-window transport: envelope codec, echo suppression, topic routing.
///
/// Owned by the window's session and injected into the components that
/// publish or subscribe; there is no module-level singleton.
pub struct Transport {
    medium: Arc<dyn BroadcastMedium>,
    config: TransportConfig,
    window_id: WindowId,
    port: Option<Box<dyn BroadcastPort>>,
    unavailable: bool,
    router: TopicRouter,
    metrics: Arc<SyncMetrics>,
}

impl Transport {
    pub fn new(
        medium: Arc<dyn BroadcastMedium>,
        window_id: WindowId,
        config: TransportConfig,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            medium,
            config,
            window_id,
            port: None,
            unavailable: false,
            router: TopicRouter::new(),
            metrics,
        }
    }

    /// Origin tag attached to every outbound envelope.
    pub fn window_id(&self) -> WindowId {
        self.window_id
    }

    /// Whether the underlying channel is currently open.
    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    /// Publish a payload on a topic. Fire-and-forget: returns immediately,
    /// succeeds silently with no listeners and without the broadcast
    /// capability.
    pub fn publish(&mut self, topic: Topic, payload: Value) {
        if !self.ensure_port() {
            return;
        }

        let envelope = Envelope {
            topic,
            sender: self.window_id,
            payload,
        };

        match encode_envelope(&envelope) {
            Ok(frame) => {
                if let Some(port) = self.port.as_mut() {
                    port.post(&frame);
                    self.metrics.record_published();
                    trace!(topic = %topic, "Envelope published");
                }
            }
            Err(err) => {
                warn!(topic = %topic, error = %err, "Dropping unserializable publish");
            }
        }
    }

    /// Register a listener under `key` for every future payload published
    /// to `topic` by other windows.
    pub fn subscribe(&mut self, topic: Topic, key: impl Into<String>, listener: Listener) {
        self.ensure_port();
        self.router.register(topic, key, listener);
    }

    /// Remove the registration under `key` for `topic`.
    pub fn unsubscribe(&mut self, topic: Topic, key: &str) -> bool {
        self.router.unregister(topic, key)
    }

    /// Release the underlying channel and clear every listener set.
    ///
    /// A reset, not a teardown: the next subscribe or publish lazily
    /// re-creates the channel.
    pub fn close(&mut self) {
        if self.port.take().is_some() {
            info!(channel = %self.config.channel_name, "Transport channel released");
        }
        self.router.clear();
    }

    /// Drain frames the host delivered since the last pump and dispatch
    /// them to topic listeners. Own echoes are filtered by sender id;
    /// undecodable frames are counted and dropped.
    ///
    /// Returns the number of envelopes dispatched.
    pub fn pump(&mut self) -> usize {
        let frames = match self.port.as_mut() {
            Some(port) => port.drain(),
            None => return 0,
        };

        let mut dispatched = 0;
        for frame in frames {
            match decode_envelope(&frame) {
                Ok(envelope) => {
                    if envelope.sender == self.window_id {
                        self.metrics.record_self_filtered();
                        continue;
                    }
                    self.metrics.record_received();
                    self.router.dispatch(&envelope);
                    dispatched += 1;
                }
                Err(err) => {
                    self.metrics.record_decode_failure();
                    warn!(error = %err, "Dropping undecodable frame");
                }
            }
        }
        dispatched
    }

    /// Number of listeners registered for a topic.
    pub fn listener_count(&self, topic: Topic) -> usize {
        self.router.listener_count(topic)
    }

    fn ensure_port(&mut self) -> bool {
        if self.port.is_some() {
            return true;
        }
        if self.unavailable {
            return false;
        }
        match self.medium.join(&self.config.channel_name) {
            Some(port) => {
                info!(channel = %self.config.channel_name, "Broadcast channel opened");
                self.port = Some(port);
                true
            }
            None => {
                info!("Host has no broadcast capability; running single-window");
                self.unavailable = true;
                false
            }
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("window_id", &self.window_id)
            .field("channel", &self.config.channel_name)
            .field("connected", &self.port.is_some())
            .field("unavailable", &self.unavailable)
            .finish()
    }
}
