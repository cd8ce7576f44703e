//! Per-window session: wires the transport, window manager, and protocol
//! machines together
//!
//! One `WindowSession` exists per window. The primary (main dashboard)
//! session runs the feed producer and the window lifecycle manager;
//! detached sessions run the feed consumer or just the coarse protocols.
//! The embedding app drives the session from its event loop: `pump`
//! semantics and all timers funnel through `tick(now_ms)`.
//!
//! Topic listeners never publish re-entrantly; replies produced while
//! pumping are parked in an outbox and published at the end of the tick.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::coarse::{DrillState, KeyValueStore, SelectionState, WatchlistStore};
use crate::feed::{FeedConsumer, FeedProducer, FeedSyncConfig, SyncState};
use crate::messages::{
    decode_payload, encode_payload, DetailsMessage, NewsMessage, OnionMessage, Topic,
    WatchlistMessage,
};
use crate::metrics::{MetricsSample, SyncMetrics};
use crate::model::{DrillSelection, FeedType, NewsItem, Symbol, WatchlistGroup, WindowId};
use crate::router::Listener;
use crate::transport::{BroadcastMedium, Transport, TransportConfig};
use crate::window::{
    DetachedFlags, OpenOutcome, ScreenBounds, WindowAction, WindowKind, WindowManager,
    WindowManagerConfig, WindowOpener,
};

/// Which protocol half this window runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowRole {
    /// Main dashboard: generates data, serves snapshots, opens children.
    Primary,
    /// Detached news terminal: replicates the feed.
    DetachedNews,
    /// Detached watchlist panel: coarse protocols only.
    DetachedWatchlist,
}

/// Session configuration.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub transport: TransportConfig,
    pub feed: FeedSyncConfig,
    pub window: WindowManagerConfig,
}

/// Replies queued by listeners during a pump, published at end of tick.
type Outbox = Arc<Mutex<Vec<(Topic, Value)>>>;

/// One window's synchronization stack.
pub struct WindowSession {
    role: WindowRole,
    transport: Transport,
    windows: Option<WindowManager>,
    flags: Arc<DetachedFlags>,
    metrics: Arc<SyncMetrics>,
    producer: Option<Arc<Mutex<FeedProducer>>>,
    consumer: Option<Arc<Mutex<FeedConsumer>>>,
    watchlist: Arc<Mutex<WatchlistStore>>,
    selection: Arc<Mutex<SelectionState>>,
    drill: Arc<Mutex<DrillState>>,
    outbox: Outbox,
    /// Tick time visible to listeners, which have no `now` parameter.
    now_cell: Arc<AtomicI64>,
}

impl WindowSession {
    /// Build the primary session for the main dashboard window.
    pub fn primary(
        medium: Arc<dyn BroadcastMedium>,
        opener: Arc<dyn WindowOpener>,
        bounds: ScreenBounds,
        kv: Arc<dyn KeyValueStore>,
        config: SessionConfig,
        now_ms: i64,
    ) -> Self {
        Self::build(WindowRole::Primary, medium, Some((opener, bounds)), kv, config, now_ms)
    }

    /// Build a detached session for a child window of `kind`.
    pub fn detached(
        kind: WindowKind,
        medium: Arc<dyn BroadcastMedium>,
        kv: Arc<dyn KeyValueStore>,
        config: SessionConfig,
        now_ms: i64,
    ) -> Self {
        let role = match kind {
            WindowKind::News => WindowRole::DetachedNews,
            WindowKind::Watchlist => WindowRole::DetachedWatchlist,
        };
        Self::build(role, medium, None, kv, config, now_ms)
    }

    fn build(
        role: WindowRole,
        medium: Arc<dyn BroadcastMedium>,
        opener: Option<(Arc<dyn WindowOpener>, ScreenBounds)>,
        kv: Arc<dyn KeyValueStore>,
        config: SessionConfig,
        now_ms: i64,
    ) -> Self {
        let metrics = Arc::new(SyncMetrics::new());
        let flags = Arc::new(DetachedFlags::new());
        let outbox: Outbox = Arc::new(Mutex::new(Vec::new()));
        let now_cell = Arc::new(AtomicI64::new(now_ms));

        let mut transport = Transport::new(
            medium,
            WindowId::new(),
            config.transport.clone(),
            Arc::clone(&metrics),
        );

        let windows = opener.map(|(opener, bounds)| {
            WindowManager::new(opener, bounds, Arc::clone(&flags), config.window.clone())
        });

        let watchlist = Arc::new(Mutex::new(WatchlistStore::new(kv, Arc::clone(&metrics))));
        let selection = Arc::new(Mutex::new(SelectionState::new(Arc::clone(&metrics))));
        let drill = Arc::new(Mutex::new(DrillState::new(Arc::clone(&metrics))));

        let producer = (role == WindowRole::Primary)
            .then(|| Arc::new(Mutex::new(FeedProducer::new(&config.feed, Arc::clone(&metrics)))));
        let consumer = (role == WindowRole::DetachedNews).then(|| {
            Arc::new(Mutex::new(FeedConsumer::new(
                now_ms,
                &config.feed,
                Arc::clone(&metrics),
            )))
        });

        if let Some(producer) = &producer {
            transport.subscribe(
                Topic::News,
                "feed-producer",
                producer_listener(producer, &outbox, &now_cell, &metrics),
            );
        }
        if let Some(consumer) = &consumer {
            transport.subscribe(
                Topic::News,
                "feed-consumer",
                consumer_listener(consumer, &now_cell, &metrics),
            );
        }
        transport.subscribe(
            Topic::Watchlist,
            "watchlist-store",
            watchlist_listener(&watchlist, &metrics),
        );
        transport.subscribe(
            Topic::Details,
            "selection",
            selection_listener(&selection, &metrics),
        );
        transport.subscribe(Topic::Onion, "drill", drill_listener(&drill, &metrics));

        info!(role = ?role, window = %transport.window_id(), "Session built");

        Self {
            role,
            transport,
            windows,
            flags,
            metrics,
            producer,
            consumer,
            watchlist,
            selection,
            drill,
            outbox,
            now_cell,
        }
    }

    pub fn role(&self) -> WindowRole {
        self.role
    }

    pub fn window_id(&self) -> WindowId {
        self.transport.window_id()
    }

    /// Flags the generator consults before producing locally.
    pub fn detached_flags(&self) -> Arc<DetachedFlags> {
        Arc::clone(&self.flags)
    }

    pub fn metrics(&self) -> MetricsSample {
        self.metrics.sample()
    }

    /// Mount hook for detached windows: mark this window detached and,
    /// for the news terminal, request the first full sync.
    pub fn mount(&mut self, now_ms: i64) {
        self.now_cell.store(now_ms, Ordering::Relaxed);
        match self.role {
            WindowRole::Primary => {}
            WindowRole::DetachedNews => {
                let request = self.consumer.as_ref().and_then(|consumer| {
                    consumer
                        .lock()
                        .ok()
                        .map(|mut c| c.on_mount(&self.flags, now_ms))
                });
                if let Some(request) = request {
                    self.publish_message(Topic::News, &request);
                }
            }
            WindowRole::DetachedWatchlist => {
                self.flags.set(WindowKind::Watchlist, true);
                info!("Watchlist panel mounted");
            }
        }
    }

    /// Unload hook: clear this window's detached flag, tear down
    /// subscriptions, and release the channel.
    pub fn shutdown(&mut self) {
        match self.role {
            WindowRole::Primary => {}
            WindowRole::DetachedNews => {
                if let Some(consumer) = &self.consumer {
                    if let Ok(mut consumer) = consumer.lock() {
                        consumer.on_unload(&self.flags);
                    }
                }
            }
            WindowRole::DetachedWatchlist => {
                self.flags.set(WindowKind::Watchlist, false);
                info!("Watchlist panel unloaded");
            }
        }
        self.transport.close();
    }

    /// One cooperative step: pump inbound traffic, run window liveness
    /// and watchdog timers, flush queued replies.
    pub fn tick(&mut self, now_ms: i64) {
        self.now_cell.store(now_ms, Ordering::Relaxed);

        self.transport.pump();

        let actions = self
            .windows
            .as_mut()
            .map(|windows| windows.poll(now_ms))
            .unwrap_or_default();
        for action in actions {
            match action {
                WindowAction::AnnounceFeedSnapshot => {
                    let message = self.producer.as_ref().and_then(|producer| {
                        producer
                            .lock()
                            .ok()
                            .map(|mut p| p.snapshot_message(now_ms))
                    });
                    if let Some(message) = message {
                        self.publish_message(Topic::News, &message);
                    }
                }
                WindowAction::WindowClosed(kind) => {
                    debug!(kind = %kind, "Child window gone; flag cleared");
                }
            }
        }

        let resync = self.consumer.as_ref().and_then(|consumer| {
            consumer.lock().ok().and_then(|mut c| c.poll(now_ms))
        });
        if let Some(request) = resync {
            self.publish_message(Topic::News, &request);
        }

        self.flush_outbox();
    }

    // --- collaborator surface ---------------------------------------

    /// Fire-and-forget publish of a raw payload.
    pub fn broadcast(&mut self, topic: Topic, payload: Value) {
        self.transport.publish(topic, payload);
    }

    /// Register an additional listener for a topic.
    pub fn subscribe(&mut self, topic: Topic, key: impl Into<String>, listener: Listener) {
        self.transport.subscribe(topic, key, listener);
    }

    /// Remove a listener registration.
    pub fn unsubscribe(&mut self, topic: Topic, key: &str) -> bool {
        self.transport.unsubscribe(topic, key)
    }

    /// Open (or focus) the detached window of `kind` at `path`.
    pub fn open(&mut self, kind: WindowKind, path: &str, now_ms: i64) -> OpenOutcome {
        match self.windows.as_mut() {
            Some(windows) => windows.open(kind, path, now_ms),
            None => {
                warn!(kind = %kind, "Session has no window opener");
                OpenOutcome::Blocked
            }
        }
    }

    /// Whether a live detached window of `kind` is tracked.
    pub fn is_open(&self, kind: WindowKind) -> bool {
        self.windows
            .as_ref()
            .map(|windows| windows.is_open(kind))
            .unwrap_or(false)
    }

    /// Forget the tracked window with `id` without closing it.
    pub fn close(&mut self, id: WindowId) -> bool {
        self.windows
            .as_mut()
            .map(|windows| windows.close(id))
            .unwrap_or(false)
    }

    /// The opener-side handler for a child's unload notification.
    pub fn notify_unload(&mut self, kind: WindowKind) {
        if let Some(windows) = self.windows.as_mut() {
            windows.notify_unload(kind);
        }
    }

    // --- feed -------------------------------------------------------

    /// Primary only: record a freshly generated item and broadcast it.
    pub fn record_item(&mut self, item: NewsItem) {
        let message = self.producer.as_ref().and_then(|producer| {
            producer.lock().ok().map(|mut p| p.record_item(item))
        });
        match message {
            Some(message) => self.publish_message(Topic::News, &message),
            None => warn!("record_item on a non-producing session"),
        }
    }

    /// Replicated items for one feed lane, newest first.
    pub fn news_items(&self, feed_type: FeedType) -> Vec<NewsItem> {
        let from_producer = self
            .producer
            .as_ref()
            .and_then(|p| p.lock().ok().map(|p| p.feeds().buffer(feed_type).to_vec()));
        if let Some(items) = from_producer {
            return items;
        }
        self.consumer
            .as_ref()
            .and_then(|c| c.lock().ok().map(|c| c.feeds().buffer(feed_type).to_vec()))
            .unwrap_or_default()
    }

    /// Consumer replication state, if this session replicates the feed.
    pub fn sync_state(&self) -> Option<SyncState> {
        self.consumer
            .as_ref()
            .and_then(|c| c.lock().ok().map(|c| c.state()))
    }

    // --- coarse -----------------------------------------------------

    /// Create a watchlist group and signal other windows.
    pub fn create_group(&mut self, group: WatchlistGroup) {
        let signal = self
            .watchlist
            .lock()
            .ok()
            .map(|mut store| store.create_group(group));
        if let Some(signal) = signal {
            self.publish_message(Topic::Watchlist, &signal);
        }
    }

    /// Delete a watchlist group and signal other windows.
    pub fn delete_group(&mut self, id: &str) {
        let signal = self
            .watchlist
            .lock()
            .ok()
            .and_then(|mut store| store.delete_group(id));
        if let Some(signal) = signal {
            self.publish_message(Topic::Watchlist, &signal);
        }
    }

    /// Change one symbol's membership in a group and signal other windows.
    pub fn set_subscription(&mut self, group_id: &str, symbol: Symbol, subscribed: bool) {
        let signal = self
            .watchlist
            .lock()
            .ok()
            .and_then(|mut store| store.set_subscription(group_id, symbol, subscribed));
        if let Some(signal) = signal {
            self.publish_message(Topic::Watchlist, &signal);
        }
    }

    /// Ask every other window to re-read its groups.
    pub fn request_groups_reload(&mut self) {
        self.publish_message(Topic::Watchlist, &WatchlistMessage::ReloadGroups);
    }

    /// Current group list as this window sees it.
    pub fn watchlist_groups(&self) -> Vec<WatchlistGroup> {
        self.watchlist
            .lock()
            .ok()
            .map(|store| store.groups().to_vec())
            .unwrap_or_default()
    }

    /// Select a symbol locally and propagate it.
    pub fn select_symbol(&mut self, symbol: Symbol) {
        let message = self
            .selection
            .lock()
            .ok()
            .map(|mut selection| selection.select(symbol));
        if let Some(message) = message {
            self.publish_message(Topic::Details, &message);
        }
    }

    pub fn selected_symbol(&self) -> Option<Symbol> {
        self.selection
            .lock()
            .ok()
            .and_then(|selection| selection.selected().cloned())
    }

    /// Drill the compass locally and propagate it.
    pub fn drill_to(&mut self, selection: DrillSelection) {
        let message = self
            .drill
            .lock()
            .ok()
            .map(|mut drill| drill.drill_to(selection));
        if let Some(message) = message {
            self.publish_message(Topic::Onion, &message);
        }
    }

    pub fn drill_selection(&self) -> DrillSelection {
        self.drill
            .lock()
            .ok()
            .map(|drill| drill.selection().clone())
            .unwrap_or_default()
    }

    // ----------------------------------------------------------------

    fn publish_message<T: serde::Serialize>(&mut self, topic: Topic, message: &T) {
        match encode_payload(message) {
            Ok(payload) => self.transport.publish(topic, payload),
            Err(err) => warn!(topic = %topic, error = %err, "Dropping unserializable message"),
        }
    }

    fn flush_outbox(&mut self) {
        let queued: Vec<(Topic, Value)> = match self.outbox.lock() {
            Ok(mut outbox) => outbox.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for (topic, payload) in queued {
            self.transport.publish(topic, payload);
        }
    }
}

fn producer_listener(
    producer: &Arc<Mutex<FeedProducer>>,
    outbox: &Outbox,
    now_cell: &Arc<AtomicI64>,
    metrics: &Arc<SyncMetrics>,
) -> Listener {
    let producer = Arc::clone(producer);
    let outbox = Arc::clone(outbox);
    let now_cell = Arc::clone(now_cell);
    let metrics = Arc::clone(metrics);
    Box::new(move |envelope| {
        match decode_payload::<NewsMessage>(Topic::News, &envelope.payload) {
            Ok(message) => {
                let now_ms = now_cell.load(Ordering::Relaxed);
                let reply = producer
                    .lock()
                    .ok()
                    .and_then(|mut p| p.handle(&message, now_ms));
                if let Some(reply) = reply {
                    match encode_payload(&reply) {
                        Ok(payload) => {
                            if let Ok(mut outbox) = outbox.lock() {
                                outbox.push((Topic::News, payload));
                            }
                        }
                        Err(err) => warn!(error = %err, "Dropping unserializable reply"),
                    }
                }
            }
            Err(err) => {
                metrics.record_decode_failure();
                warn!(error = %err, "Dropping undecodable news payload");
            }
        }
    })
}

fn consumer_listener(
    consumer: &Arc<Mutex<FeedConsumer>>,
    now_cell: &Arc<AtomicI64>,
    metrics: &Arc<SyncMetrics>,
) -> Listener {
    let consumer = Arc::clone(consumer);
    let now_cell = Arc::clone(now_cell);
    let metrics = Arc::clone(metrics);
    Box::new(move |envelope| {
        match decode_payload::<NewsMessage>(Topic::News, &envelope.payload) {
            Ok(message) => {
                let now_ms = now_cell.load(Ordering::Relaxed);
                if let Ok(mut consumer) = consumer.lock() {
                    consumer.handle(&message, now_ms);
                }
            }
            Err(err) => {
                metrics.record_decode_failure();
                warn!(error = %err, "Dropping undecodable news payload");
            }
        }
    })
}

fn watchlist_listener(
    watchlist: &Arc<Mutex<WatchlistStore>>,
    metrics: &Arc<SyncMetrics>,
) -> Listener {
    let watchlist = Arc::clone(watchlist);
    let metrics = Arc::clone(metrics);
    Box::new(move |envelope| {
        match decode_payload::<WatchlistMessage>(Topic::Watchlist, &envelope.payload) {
            Ok(message) => {
                if let Ok(mut store) = watchlist.lock() {
                    store.handle(&message);
                }
            }
            Err(err) => {
                metrics.record_decode_failure();
                warn!(error = %err, "Dropping undecodable watchlist payload");
            }
        }
    })
}

fn selection_listener(
    selection: &Arc<Mutex<SelectionState>>,
    metrics: &Arc<SyncMetrics>,
) -> Listener {
    let selection = Arc::clone(selection);
    let metrics = Arc::clone(metrics);
    Box::new(move |envelope| {
        match decode_payload::<DetailsMessage>(Topic::Details, &envelope.payload) {
            Ok(message) => {
                if let Ok(mut selection) = selection.lock() {
                    selection.handle(&message);
                }
            }
            Err(err) => {
                metrics.record_decode_failure();
                warn!(error = %err, "Dropping undecodable details payload");
            }
        }
    })
}

fn drill_listener(drill: &Arc<Mutex<DrillState>>, metrics: &Arc<SyncMetrics>) -> Listener {
    let drill = Arc::clone(drill);
    let metrics = Arc::clone(metrics);
    Box::new(move |envelope| {
        match decode_payload::<OnionMessage>(Topic::Onion, &envelope.payload) {
            Ok(message) => {
                if let Ok(mut drill) = drill.lock() {
                    drill.handle(&message);
                }
            }
            Err(err) => {
                metrics.record_decode_failure();
                warn!(error = %err, "Dropping undecodable onion payload");
            }
        }
    })
}

/// Drive a session from a tokio interval until `shutdown` flips.
///
/// `now_ms` supplies wall-clock milliseconds; injected so tests can pause
/// and step time.
pub async fn drive(
    session: Arc<Mutex<WindowSession>>,
    period: Duration,
    now_ms: impl Fn() -> i64 + Send,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Ok(mut session) = session.lock() {
                    session.tick(now_ms());
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    if let Ok(mut session) = session.lock() {
        session.shutdown();
    }
}
