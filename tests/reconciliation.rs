//! End-to-end reconciliation tests across simulated windows
//!
//! Each test builds real sessions wired to one in-process broadcast hub
//! and one shared durable store, then drives them tick by tick with an
//! explicit clock. No OS windows: openers and handles are fakes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rust_decimal::Decimal;
use window_sync::coarse::{KeyValueStore, MemoryStore};
use window_sync::feed::SyncState;
use window_sync::model::{FeedType, NewsItem, NewsItemId, Sentiment, Symbol, WatchlistGroup};
use window_sync::session::{SessionConfig, WindowSession};
use window_sync::transport::{BroadcastHub, BroadcastMedium};
use window_sync::window::{OpenOutcome, Placement, ScreenBounds, WindowHandle, WindowKind, WindowOpener};

#[derive(Default)]
struct FakeWindowState {
    alive: AtomicBool,
}

struct FakeHandle(Arc<FakeWindowState>);

impl WindowHandle for FakeHandle {
    fn is_alive(&self) -> bool {
        self.0.alive.load(Ordering::SeqCst)
    }
    fn focus(&self) {}
    fn close(&self) {
        self.0.alive.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeOpener {
    blocked: AtomicBool,
    windows: Mutex<Vec<Arc<FakeWindowState>>>,
}

impl FakeOpener {
    fn last_window(&self) -> Arc<FakeWindowState> {
        let windows = self.windows.lock().unwrap();
        Arc::clone(windows.last().unwrap())
    }
}

impl WindowOpener for FakeOpener {
    fn open(&self, _path: &str, _placement: &Placement) -> Option<Box<dyn WindowHandle>> {
        if self.blocked.load(Ordering::SeqCst) {
            return None;
        }
        let state = Arc::new(FakeWindowState::default());
        state.alive.store(true, Ordering::SeqCst);
        self.windows.lock().unwrap().push(Arc::clone(&state));
        Some(Box::new(FakeHandle(state)))
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn item(id: &str, feed_type: FeedType) -> NewsItem {
    NewsItem {
        id: NewsItemId::new(id),
        headline: format!("headline {id}"),
        summary: "summary".to_string(),
        source: "newswire".to_string(),
        published_at: 1_722_470_400_000,
        sentiment: Sentiment::Neutral,
        tickers: vec![Symbol::new("SPY")],
        sectors: vec!["macro".to_string()],
        feed_type,
        impact: Decimal::new(45, 2),
        relevance_score: Decimal::new(65, 2),
    }
}

struct Desk {
    hub: Arc<BroadcastHub>,
    kv: Arc<MemoryStore>,
    opener: Arc<FakeOpener>,
    primary: WindowSession,
}

impl Desk {
    fn new() -> Self {
        init_tracing();
        let hub = Arc::new(BroadcastHub::new());
        let kv = Arc::new(MemoryStore::new());
        let opener = Arc::new(FakeOpener::default());
        let primary = WindowSession::primary(
            Arc::clone(&hub) as Arc<dyn BroadcastMedium>,
            Arc::clone(&opener) as Arc<dyn WindowOpener>,
            ScreenBounds {
                x: 0,
                y: 0,
                width: 1440,
                height: 900,
            },
            Arc::clone(&kv) as Arc<dyn KeyValueStore>,
            SessionConfig::default(),
            0,
        );
        Self {
            hub,
            kv,
            opener,
            primary,
        }
    }

    fn detach(&self, kind: WindowKind, now_ms: i64) -> WindowSession {
        let mut session = WindowSession::detached(
            kind,
            Arc::clone(&self.hub) as Arc<dyn BroadcastMedium>,
            Arc::clone(&self.kv) as Arc<dyn KeyValueStore>,
            SessionConfig::default(),
            now_ms,
        );
        session.mount(now_ms);
        session
    }
}

#[test]
fn detached_terminal_reaches_consistency_and_streams() {
    let mut desk = Desk::new();
    for i in 0..3 {
        desk.primary.record_item(item(&format!("seed-{i}"), FeedType::Global));
    }

    let mut terminal = desk.detach(WindowKind::News, 1_000);

    // Request/serve/apply round trip
    desk.primary.tick(1_100);
    terminal.tick(1_200);
    assert_eq!(terminal.sync_state(), Some(SyncState::Synced));
    assert_eq!(terminal.news_items(FeedType::Global).len(), 3);

    // Incremental streaming after the snapshot
    desk.primary.record_item(item("live-1", FeedType::Trend));
    desk.primary.record_item(item("live-2", FeedType::Global));
    terminal.tick(2_000);

    assert_eq!(terminal.news_items(FeedType::Trend).len(), 1);
    let global: Vec<String> = terminal
        .news_items(FeedType::Global)
        .iter()
        .map(|i| i.id.to_string())
        .collect();
    assert_eq!(global[0], "live-2", "newest item first");
    assert_eq!(global.len(), 4);
}

#[test]
fn late_joiner_catches_up_via_full_sync() {
    let mut desk = Desk::new();
    // All of this traffic predates the terminal; broadcast keeps nothing
    for i in 0..5 {
        desk.primary.record_item(item(&format!("early-{i}"), FeedType::Global));
    }

    let mut terminal = desk.detach(WindowKind::News, 10_000);
    assert!(terminal.news_items(FeedType::Global).is_empty());

    desk.primary.tick(10_100);
    terminal.tick(10_200);

    assert_eq!(terminal.news_items(FeedType::Global).len(), 5);
}

#[test]
fn watchdog_recovers_from_silent_producer() {
    let mut desk = Desk::new();
    desk.primary.record_item(item("n1", FeedType::Global));

    let mut terminal = desk.detach(WindowKind::News, 0);
    desk.primary.tick(100);
    terminal.tick(200);
    assert_eq!(terminal.sync_state(), Some(SyncState::Synced));

    // Producer goes silent; first due tick is still under the threshold
    terminal.tick(10_200);
    assert_eq!(terminal.metrics().watchdog_resyncs, 0);

    terminal.tick(20_200);
    assert_eq!(terminal.metrics().watchdog_resyncs, 1);
    assert_eq!(terminal.sync_state(), Some(SyncState::AwaitingFirstSync));

    // The re-request reaches the producer, which serves a fresh snapshot
    desk.primary.record_item(item("n2", FeedType::Global));
    desk.primary.tick(20_300);
    terminal.tick(20_400);

    assert_eq!(terminal.sync_state(), Some(SyncState::Synced));
    assert_eq!(terminal.news_items(FeedType::Global).len(), 2);
}

#[test]
fn buffers_stay_bounded_and_unique_under_flood() {
    let mut desk = Desk::new();
    let mut terminal = desk.detach(WindowKind::News, 0);
    desk.primary.tick(10);
    terminal.tick(20);

    // Far more items than the cap, with every third a duplicate id
    for i in 0..500 {
        let id = format!("flood-{}", i % 333);
        desk.primary.record_item(item(&id, FeedType::Global));
        // Tick as we go so the hub's ring never overflows
        if i % 10 == 0 {
            terminal.tick(30 + i as i64);
        }
    }
    terminal.tick(5_000);

    let items = terminal.news_items(FeedType::Global);
    assert!(items.len() <= 200, "cap exceeded: {}", items.len());

    let mut ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
    let before = ids.len();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), before, "duplicate ids in replica");
}

#[test]
fn watchlist_and_selection_reconcile_coarsely() {
    let mut desk = Desk::new();
    let mut panel = desk.detach(WindowKind::Watchlist, 0);

    desk.primary.create_group(WatchlistGroup {
        id: "g1".to_string(),
        name: "Semis".to_string(),
        symbols: vec![Symbol::new("NVDA")],
    });
    panel.tick(100);
    assert_eq!(panel.watchlist_groups().len(), 1);

    // Mutation from the panel side travels back the same way
    panel.set_subscription("g1", Symbol::new("AMD"), true);
    desk.primary.tick(200);
    let groups = desk.primary.watchlist_groups();
    assert!(groups[0].symbols.contains(&Symbol::new("AMD")));

    panel.delete_group("g1");
    desk.primary.tick(300);
    assert!(desk.primary.watchlist_groups().is_empty());

    // Selected symbol is payload-bearing and bidirectional
    desk.primary.select_symbol(Symbol::new("NVDA"));
    panel.tick(400);
    assert_eq!(panel.selected_symbol(), Some(Symbol::new("NVDA")));

    panel.select_symbol(Symbol::new("TSM"));
    desk.primary.tick(500);
    assert_eq!(desk.primary.selected_symbol(), Some(Symbol::new("TSM")));
}

#[test]
fn open_focus_close_lifecycle() {
    let mut desk = Desk::new();

    let first = desk.primary.open(WindowKind::Watchlist, "/watchlist", 1_000);
    assert!(matches!(first, OpenOutcome::Opened(_)));
    assert!(desk.primary.is_open(WindowKind::Watchlist));
    assert!(desk
        .primary
        .detached_flags()
        .is_detached(WindowKind::Watchlist));

    // Second open focuses the live window instead of duplicating
    let second = desk.primary.open(WindowKind::Watchlist, "/watchlist", 2_000);
    assert!(matches!(second, OpenOutcome::Focused(_)));

    // External close: the handle stops reporting alive
    desk.opener.last_window().alive.store(false, Ordering::SeqCst);
    assert!(!desk.primary.is_open(WindowKind::Watchlist));
    desk.primary.tick(3_000);
    assert!(!desk
        .primary
        .detached_flags()
        .is_detached(WindowKind::Watchlist));
}

#[test]
fn child_unload_notification_clears_tracking() {
    let mut desk = Desk::new();
    desk.primary.open(WindowKind::Watchlist, "/watchlist", 1_000);
    assert!(desk.primary.is_open(WindowKind::Watchlist));

    desk.primary.notify_unload(WindowKind::Watchlist);

    assert!(!desk.primary.is_open(WindowKind::Watchlist));
    assert!(!desk
        .primary
        .detached_flags()
        .is_detached(WindowKind::Watchlist));
}

#[test]
fn blocked_window_creation_is_silent() {
    let mut desk = Desk::new();
    desk.opener.blocked.store(true, Ordering::SeqCst);

    let outcome = desk.primary.open(WindowKind::News, "/news", 1_000);
    assert_eq!(outcome, OpenOutcome::Blocked);
    assert!(!desk.primary.is_open(WindowKind::News));
    assert!(!desk.primary.detached_flags().is_detached(WindowKind::News));
}

#[test]
fn news_and_watchlist_windows_sync_independently() {
    let mut desk = Desk::new();
    let mut terminal = desk.detach(WindowKind::News, 0);
    let mut panel = desk.detach(WindowKind::Watchlist, 0);

    desk.primary.record_item(item("n1", FeedType::Global));
    desk.primary.create_group(WatchlistGroup {
        id: "g1".to_string(),
        name: "Tech".to_string(),
        symbols: vec![],
    });

    desk.primary.tick(100);
    terminal.tick(200);
    panel.tick(200);

    assert_eq!(terminal.news_items(FeedType::Global).len(), 1);
    assert_eq!(panel.watchlist_groups().len(), 1);
    // The watchlist panel replicates no feed items
    assert!(panel.news_items(FeedType::Global).is_empty());
}

#[test]
fn opened_news_window_gets_snapshot_without_asking() {
    let mut desk = Desk::new();
    desk.primary.record_item(item("n1", FeedType::Global));

    // Terminal session exists (listener registered) but never mounts, so
    // it never sends its own request-full-sync
    let mut terminal = WindowSession::detached(
        WindowKind::News,
        Arc::clone(&desk.hub) as Arc<dyn BroadcastMedium>,
        Arc::clone(&desk.kv) as Arc<dyn KeyValueStore>,
        SessionConfig::default(),
        1_000,
    );

    desk.primary.open(WindowKind::News, "/news", 1_000);

    // Before the settle delay nothing is announced
    desk.primary.tick(1_100);
    terminal.tick(1_150);
    assert!(terminal.news_items(FeedType::Global).is_empty());

    desk.primary.tick(1_300);
    terminal.tick(1_400);
    assert_eq!(terminal.news_items(FeedType::Global).len(), 1);
}
