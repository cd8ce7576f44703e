//! Window lifecycle management for detachable widgets
//!
//! Opens external windows at computed placements, tracks at most one live
//! window per kind, detects closure by polling handle liveness, and keeps
//! the per-kind "detached" flags that tell the stores which window runs
//! primary data generation.
//!
//! OS windows sit behind the `WindowHandle`/`WindowOpener` capability
//! traits so the same lifecycle logic runs against fakes in tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model::WindowId;

/// Kinds of detachable widgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    News,
    Watchlist,
}

impl WindowKind {
    pub const ALL: [WindowKind; 2] = [WindowKind::News, WindowKind::Watchlist];

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowKind::News => "news",
            WindowKind::Watchlist => "watchlist",
        }
    }
}

impl std::fmt::Display for WindowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Screen-space rectangle of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// The opener window's own bounds, used to place children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenBounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Capability interface over a live external window.
pub trait WindowHandle: Send {
    /// Whether the window still exists from the opener's perspective.
    fn is_alive(&self) -> bool;
    /// Bring the window to the foreground.
    fn focus(&self);
    /// Ask the host to close the window.
    fn close(&self);
}

/// Capability interface for requesting new top-level windows.
pub trait WindowOpener: Send + Sync {
    /// Request a window at `path` with the given placement.
    ///
    /// Returns None when the host refuses (popup blocker); the caller
    /// treats that as a no-op, never as an error.
    fn open(&self, path: &str, placement: &Placement) -> Option<Box<dyn WindowHandle>>;
}

/// Fixed per-kind window geometry.
#[derive(Debug, Clone)]
pub struct WindowLayout {
    pub news_width: u32,
    pub watchlist_width: u32,
    pub height: u32,
    /// Horizontal gap between the opener and the child window.
    pub gap: i32,
}

impl Default for WindowLayout {
    fn default() -> Self {
        Self {
            news_width: 520,
            watchlist_width: 380,
            height: 720,
            gap: 16,
        }
    }
}

impl WindowLayout {
    fn width_for(&self, kind: WindowKind) -> u32 {
        match kind {
            WindowKind::News => self.news_width,
            WindowKind::Watchlist => self.watchlist_width,
        }
    }
}

/// Per-kind "a detached window exists" flags, shared with the stores that
/// decide whether to run local generation. Only the lifecycle manager (in
/// the opener) and the consumer's own mount/unmount (in the child) write
/// them.
#[derive(Debug, Default)]
pub struct DetachedFlags {
    news: AtomicBool,
    watchlist: AtomicBool,
}

impl DetachedFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, kind: WindowKind, detached: bool) {
        match kind {
            WindowKind::News => self.news.store(detached, Ordering::Relaxed),
            WindowKind::Watchlist => self.watchlist.store(detached, Ordering::Relaxed),
        }
    }

    pub fn is_detached(&self, kind: WindowKind) -> bool {
        match kind {
            WindowKind::News => self.news.load(Ordering::Relaxed),
            WindowKind::Watchlist => self.watchlist.load(Ordering::Relaxed),
        }
    }
}

/// A window the manager opened and still tracks.
pub struct TrackedWindow {
    pub id: WindowId,
    pub kind: WindowKind,
    handle: Box<dyn WindowHandle>,
    pub placement: Placement,
}

/// Result of an open request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// A new window was created and is now tracked.
    Opened(WindowId),
    /// A live window of that kind already existed and was focused.
    Focused(WindowId),
    /// The host refused to create the window.
    Blocked,
}

/// Work the manager's poll surfaced for the session to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowAction {
    /// A freshly opened news window is past its settle delay; broadcast a
    /// full feed snapshot so it does not start empty.
    AnnounceFeedSnapshot,
    /// A tracked window's handle stopped reporting alive and was dropped.
    WindowClosed(WindowKind),
}

/// Lifecycle manager configuration.
#[derive(Debug, Clone)]
pub struct WindowManagerConfig {
    pub layout: WindowLayout,
    /// Delay before the post-open snapshot broadcast. The child's listener
    /// registration is not synchronized with window creation; broadcasting
    /// immediately would race it.
    pub snapshot_announce_delay_ms: i64,
}

impl Default for WindowManagerConfig {
    fn default() -> Self {
        Self {
            layout: WindowLayout::default(),
            snapshot_announce_delay_ms: 300,
        }
    }
}

/// Tracks detachable windows for one opener window.
///
/// Process-wide singleton by convention: the kind-to-window map is owned
/// here and nothing else mutates it.
pub struct WindowManager {
    opener: Arc<dyn WindowOpener>,
    bounds: ScreenBounds,
    config: WindowManagerConfig,
    flags: Arc<DetachedFlags>,
    tracked: BTreeMap<WindowKind, TrackedWindow>,
    pending_announcements: Vec<(WindowKind, i64)>,
}

impl WindowManager {
    pub fn new(
        opener: Arc<dyn WindowOpener>,
        bounds: ScreenBounds,
        flags: Arc<DetachedFlags>,
        config: WindowManagerConfig,
    ) -> Self {
        Self {
            opener,
            bounds,
            config,
            flags,
            tracked: BTreeMap::new(),
            pending_announcements: Vec::new(),
        }
    }

    /// Placement for a child of the given kind: to the right of the
    /// opener, fixed per-kind width, fixed height.
    pub fn placement_for(&self, kind: WindowKind) -> Placement {
        Placement {
            x: self.bounds.x + self.bounds.width as i32 + self.config.layout.gap,
            y: self.bounds.y,
            width: self.config.layout.width_for(kind),
            height: self.config.layout.height,
        }
    }

    /// Open a window of `kind` at `path`, or focus the one already open.
    ///
    /// Idempotent per kind: two live windows of one kind never exist. A
    /// blocked request changes nothing and does not error.
    pub fn open(&mut self, kind: WindowKind, path: &str, now: i64) -> OpenOutcome {
        if let Some(tracked) = self.tracked.get(&kind) {
            if tracked.handle.is_alive() {
                tracked.handle.focus();
                debug!(kind = %kind, id = %tracked.id, "Focusing existing window");
                return OpenOutcome::Focused(tracked.id);
            }
            // Stale entry: the window died without an unload notification
            let id = tracked.id;
            self.untrack(kind);
            debug!(kind = %kind, id = %id, "Dropped dead window before reopen");
        }

        let placement = self.placement_for(kind);
        let Some(handle) = self.opener.open(path, &placement) else {
            info!(kind = %kind, path, "Window creation blocked by host");
            return OpenOutcome::Blocked;
        };

        let id = WindowId::new();
        self.tracked.insert(
            kind,
            TrackedWindow {
                id,
                kind,
                handle,
                placement,
            },
        );
        self.flags.set(kind, true);

        if kind == WindowKind::News {
            self.pending_announcements
                .push((kind, now + self.config.snapshot_announce_delay_ms));
        }

        info!(kind = %kind, id = %id, x = placement.x, width = placement.width, "Window opened");
        OpenOutcome::Opened(id)
    }

    /// Whether a tracked window of `kind` exists and reports alive.
    pub fn is_open(&self, kind: WindowKind) -> bool {
        self.tracked
            .get(&kind)
            .map(|t| t.handle.is_alive())
            .unwrap_or(false)
    }

    /// Forget the window with `id` without closing it.
    ///
    /// Used when the child announced its own closure; the physical window
    /// is already going away.
    pub fn close(&mut self, id: WindowId) -> bool {
        let kind = self
            .tracked
            .values()
            .find(|t| t.id == id)
            .map(|t| t.kind);
        match kind {
            Some(kind) => {
                self.untrack(kind);
                info!(kind = %kind, id = %id, "Window untracked");
                true
            }
            None => false,
        }
    }

    /// Handle the child window's unload: drop tracking and clear the
    /// detached flag so generation resumes in the remaining window.
    pub fn notify_unload(&mut self, kind: WindowKind) {
        if self.tracked.contains_key(&kind) {
            self.untrack(kind);
            info!(kind = %kind, "Window unloaded");
        }
    }

    /// Tracked window id for a kind, if any.
    pub fn tracked_id(&self, kind: WindowKind) -> Option<WindowId> {
        self.tracked.get(&kind).map(|t| t.id)
    }

    /// Number of currently tracked windows.
    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// Liveness sweep plus collection of due scheduled work.
    ///
    /// Dead handles are untracked and their detached flags cleared; the
    /// returned actions tell the session what to run now.
    pub fn poll(&mut self, now: i64) -> Vec<WindowAction> {
        let mut actions = Vec::new();

        let dead: Vec<WindowKind> = self
            .tracked
            .values()
            .filter(|t| !t.handle.is_alive())
            .map(|t| t.kind)
            .collect();
        for kind in dead {
            self.untrack(kind);
            info!(kind = %kind, "Window closed externally");
            actions.push(WindowAction::WindowClosed(kind));
        }

        let mut remaining = Vec::new();
        for (kind, due_at) in self.pending_announcements.drain(..) {
            if !self.tracked.contains_key(&kind) {
                continue; // window vanished before the announcement fired
            }
            if now >= due_at {
                actions.push(WindowAction::AnnounceFeedSnapshot);
            } else {
                remaining.push((kind, due_at));
            }
        }
        self.pending_announcements = remaining;

        actions
    }

    fn untrack(&mut self, kind: WindowKind) {
        self.tracked.remove(&kind);
        self.flags.set(kind, false);
        self.pending_announcements.retain(|(k, _)| *k != kind);
    }
}
