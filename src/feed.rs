//! Feed reconciliation protocol for the news widget
//!
//! The window that runs the headline generator (the producer) streams
//! incremental `new-item` messages and answers `request-full-sync` with a
//! complete snapshot. Detached windows (consumers) replicate read-only:
//! destructive replace on full-sync, id-deduplicated prepend on new-item,
//! and a staleness watchdog that re-requests a snapshot when the producer
//! goes quiet.
//!
//! Consumer states: awaiting first sync → synced → (stale) → re-request,
//! where staleness is detected by the watchdog rather than stored.

use std::collections::{BTreeSet, VecDeque};

use tracing::{debug, info, warn};

use crate::messages::NewsMessage;
use crate::metrics::SyncMetrics;
use crate::model::{FeedType, NewsItem};
use crate::snapshot::{verify_snapshot_integrity, FeedCollections, SnapshotBuilder};
use crate::window::{DetachedFlags, WindowKind};
use std::sync::Arc;

/// Feed protocol timing and capacity constants.
#[derive(Debug, Clone)]
pub struct FeedSyncConfig {
    /// Items kept per feed lane, newest first.
    pub buffer_cap: usize,
    /// Replica age beyond which the watchdog re-requests a snapshot.
    pub stale_after_ms: i64,
    /// Watchdog evaluation cadence.
    pub poll_every_ms: i64,
}

impl Default for FeedSyncConfig {
    fn default() -> Self {
        Self {
            buffer_cap: 200,
            stale_after_ms: 15_000,
            poll_every_ms: 10_000,
        }
    }
}

/// Result of merging one item into a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeResult {
    /// Item was new and was prepended.
    Merged,
    /// An item with the same id already exists; buffer unchanged.
    Duplicate,
}

/// Bounded, newest-first item buffer for one feed lane.
///
/// No duplicate id ever appears; the cap is enforced on every mutation,
/// including wholesale replacement with an oversized collection.
#[derive(Debug, Clone)]
pub struct FeedBuffer {
    items: VecDeque<NewsItem>,
    cap: usize,
}

impl FeedBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(cap),
            cap,
        }
    }

    /// Prepend `item` unless its id is already present; evict the oldest
    /// entry once over cap.
    pub fn merge(&mut self, item: NewsItem) -> MergeResult {
        if self.contains(&item) {
            return MergeResult::Duplicate;
        }
        self.items.push_front(item);
        while self.items.len() > self.cap {
            self.items.pop_back();
        }
        MergeResult::Merged
    }

    /// Replace the whole buffer with `items` in their given order,
    /// dropping duplicate ids (first occurrence wins) and anything over
    /// cap.
    pub fn replace(&mut self, items: Vec<NewsItem>) {
        self.items.clear();
        let mut seen = BTreeSet::new();
        for item in items {
            if self.items.len() >= self.cap {
                break;
            }
            if seen.insert(item.id.clone()) {
                self.items.push_back(item);
            }
        }
    }

    fn contains(&self, item: &NewsItem) -> bool {
        self.items.iter().any(|existing| existing.id == item.id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items newest first.
    pub fn items(&self) -> impl Iterator<Item = &NewsItem> {
        self.items.iter()
    }

    pub fn to_vec(&self) -> Vec<NewsItem> {
        self.items.iter().cloned().collect()
    }
}

/// The four feed lanes of one window.
#[derive(Debug, Clone)]
pub struct FeedSet {
    buffers: std::collections::BTreeMap<FeedType, FeedBuffer>,
}

impl FeedSet {
    pub fn new(cap: usize) -> Self {
        let mut buffers = std::collections::BTreeMap::new();
        for feed_type in FeedType::ALL {
            buffers.insert(feed_type, FeedBuffer::new(cap));
        }
        Self { buffers }
    }

    pub fn buffer(&self, feed_type: FeedType) -> &FeedBuffer {
        // All four lanes exist from construction
        &self.buffers[&feed_type]
    }

    pub fn merge(&mut self, feed_type: FeedType, item: NewsItem) -> MergeResult {
        self.buffers
            .get_mut(&feed_type)
            .map(|buffer| buffer.merge(item))
            .unwrap_or(MergeResult::Duplicate)
    }

    /// Destructively replace every lane from a snapshot's collections.
    pub fn replace_all(&mut self, collections: FeedCollections) {
        for feed_type in FeedType::ALL {
            let items = collections.get(&feed_type).cloned().unwrap_or_default();
            if let Some(buffer) = self.buffers.get_mut(&feed_type) {
                buffer.replace(items);
            }
        }
    }

    /// Clone the lanes out as snapshot collections.
    pub fn collections(&self) -> FeedCollections {
        self.buffers
            .iter()
            .map(|(feed_type, buffer)| (*feed_type, buffer.to_vec()))
            .collect()
    }

    pub fn total_len(&self) -> usize {
        self.buffers.values().map(FeedBuffer::len).sum()
    }
}

/// Detects replication staleness on a fixed cadence.
///
/// Stamped on every accepted inbound feed message; `check` evaluates at
/// most once per poll interval and reports whether the replica has gone
/// stale since the last stamp.
#[derive(Debug, Clone)]
pub struct SyncWatchdog {
    last_sync_at: i64,
    last_poll_at: i64,
    stale_after_ms: i64,
    poll_every_ms: i64,
}

impl SyncWatchdog {
    pub fn new(now_ms: i64, config: &FeedSyncConfig) -> Self {
        Self {
            last_sync_at: now_ms,
            last_poll_at: now_ms,
            stale_after_ms: config.stale_after_ms,
            poll_every_ms: config.poll_every_ms,
        }
    }

    /// Record accepted inbound traffic.
    pub fn stamp(&mut self, now_ms: i64) {
        self.last_sync_at = now_ms;
    }

    /// Age of the replica at `now_ms`.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.last_sync_at
    }

    /// Evaluate staleness if a poll tick is due. True means stale.
    pub fn check(&mut self, now_ms: i64) -> bool {
        if now_ms - self.last_poll_at < self.poll_every_ms {
            return false;
        }
        self.last_poll_at = now_ms;
        self.age_ms(now_ms) > self.stale_after_ms
    }
}

/// Producer half of the feed protocol.
///
/// Lives in whichever window currently runs the headline generator. The
/// generator hands each fresh item to `record_item`; inbound sync
/// requests are answered with a full snapshot.
pub struct FeedProducer {
    feeds: FeedSet,
    snapshots: SnapshotBuilder,
    metrics: Arc<SyncMetrics>,
}

impl FeedProducer {
    pub fn new(config: &FeedSyncConfig, metrics: Arc<SyncMetrics>) -> Self {
        Self {
            feeds: FeedSet::new(config.buffer_cap),
            snapshots: SnapshotBuilder::new(),
            metrics,
        }
    }

    /// Insert a freshly generated item and build the broadcast for it.
    pub fn record_item(&mut self, item: NewsItem) -> NewsMessage {
        let feed_type = item.feed_type;
        self.feeds.merge(feed_type, item.clone());
        debug!(feed = %feed_type, id = %item.id, "Item recorded");
        NewsMessage::NewItem { feed_type, item }
    }

    /// Build a full snapshot of the current collections.
    pub fn snapshot_message(&mut self, now_ms: i64) -> NewsMessage {
        let snapshot = self.snapshots.build(self.feeds.collections(), now_ms);
        info!(
            version = snapshot.version,
            items = snapshot.item_count(),
            "Full snapshot built"
        );
        NewsMessage::FullSync(snapshot)
    }

    /// Handle an inbound feed message; a sync request yields the snapshot
    /// to broadcast back.
    pub fn handle(&mut self, message: &NewsMessage, now_ms: i64) -> Option<NewsMessage> {
        match message {
            NewsMessage::RequestFullSync => {
                self.metrics.record_full_sync_served();
                Some(self.snapshot_message(now_ms))
            }
            // Only one window produces at a time; stray producer traffic
            // is dropped here
            other => {
                debug!(message = other.label(), "Producer ignoring feed traffic");
                None
            }
        }
    }

    pub fn feeds(&self) -> &FeedSet {
        &self.feeds
    }
}

/// Consumer replication state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Mounted (or gone stale) and waiting for a snapshot.
    AwaitingFirstSync,
    /// Replica applied and receiving traffic.
    Synced,
}

/// Consumer half of the feed protocol.
///
/// Lives in the detached news window. Never generates items; replicates
/// the producer's collections and watches for staleness.
pub struct FeedConsumer {
    feeds: FeedSet,
    watchdog: SyncWatchdog,
    state: SyncState,
    metrics: Arc<SyncMetrics>,
}

impl FeedConsumer {
    pub fn new(now_ms: i64, config: &FeedSyncConfig, metrics: Arc<SyncMetrics>) -> Self {
        Self {
            feeds: FeedSet::new(config.buffer_cap),
            watchdog: SyncWatchdog::new(now_ms, config),
            state: SyncState::AwaitingFirstSync,
            metrics,
        }
    }

    /// Mount in the detached window: mark this window detached (stopping
    /// any local generation) and build the unconditional first sync
    /// request. Local state is never trusted after detaching.
    pub fn on_mount(&mut self, flags: &DetachedFlags, now_ms: i64) -> NewsMessage {
        flags.set(WindowKind::News, true);
        self.state = SyncState::AwaitingFirstSync;
        self.watchdog.stamp(now_ms);
        info!("News consumer mounted; requesting full sync");
        NewsMessage::RequestFullSync
    }

    /// Apply an inbound feed message to the replica.
    pub fn handle(&mut self, message: &NewsMessage, now_ms: i64) {
        match message {
            NewsMessage::FullSync(snapshot) => {
                if !verify_snapshot_integrity(snapshot) {
                    self.metrics.record_snapshot_rejected();
                    warn!(
                        version = snapshot.version,
                        "Dropping snapshot with bad checksum"
                    );
                    return;
                }
                self.feeds.replace_all(snapshot.items.clone());
                self.watchdog.stamp(now_ms);
                self.state = SyncState::Synced;
                self.metrics.record_full_sync_applied();
                info!(
                    version = snapshot.version,
                    items = snapshot.item_count(),
                    "Snapshot applied"
                );
            }
            NewsMessage::NewItem { feed_type, item } => {
                match self.feeds.merge(*feed_type, item.clone()) {
                    MergeResult::Merged => {
                        self.metrics.record_item_merged();
                        debug!(feed = %feed_type, id = %item.id, "Item merged");
                    }
                    MergeResult::Duplicate => {
                        self.metrics.record_duplicate_dropped();
                        debug!(feed = %feed_type, id = %item.id, "Duplicate dropped");
                    }
                }
                // Either way the producer is alive; duplicates still
                // count as observed traffic
                self.watchdog.stamp(now_ms);
                if self.state == SyncState::AwaitingFirstSync {
                    self.state = SyncState::Synced;
                }
            }
            NewsMessage::RequestFullSync => {
                // Another consumer asking the producer; not ours to answer
            }
        }
    }

    /// Watchdog tick: when a poll is due and the replica is stale, build
    /// a re-sync request.
    pub fn poll(&mut self, now_ms: i64) -> Option<NewsMessage> {
        if self.watchdog.check(now_ms) {
            self.metrics.record_watchdog_resync();
            self.state = SyncState::AwaitingFirstSync;
            warn!(
                age_ms = self.watchdog.age_ms(now_ms),
                "Replica stale; re-requesting full sync"
            );
            return Some(NewsMessage::RequestFullSync);
        }
        None
    }

    /// Unload: clear the detached flag so generation resumes in whichever
    /// window is now primary.
    pub fn on_unload(&mut self, flags: &DetachedFlags) {
        flags.set(WindowKind::News, false);
        info!("News consumer unloaded");
    }

    pub fn feeds(&self) -> &FeedSet {
        &self.feeds
    }

    pub fn state(&self) -> SyncState {
        self.state
    }
}
