//! Cross-window synchronization for the market dashboard
//!
//! Detached widgets (news terminal, watchlist) run in separate OS-level
//! windows that share no memory and no server; the only link is an
//! unreliable, unordered, best-effort broadcast between same-origin
//! windows. This crate keeps those windows eventually consistent:
//! - Broadcast transport with lazy channel creation and echo suppression
//! - Topic router multiplexing one channel into independent listener sets
//! - Window lifecycle tracking (open/focus/closure, detached flags)
//! - Streaming feed replication (snapshots + increments + staleness
//!   watchdog) for the bounded news buffers
//! - Coarse reload-on-signal reconciliation for watchlist and selection
//!
//! # Architecture
//!
//! ```text
//!  producing window                      detached window
//!  ┌───────────────┐                    ┌───────────────┐
//!  │ FeedProducer  │                    │ FeedConsumer  │
//!  │ WatchlistStore│                    │ WatchlistStore│
//!  └──────┬────────┘                    └───────▲───────┘
//!         │ publish(topic, msg)                 │ dispatch
//!  ┌──────▼────────┐                    ┌───────┴───────┐
//!  │  Transport    │──── broadcast ────▶│  Transport    │
//!  │  (envelope,   │     medium         │  + TopicRouter│
//!  │   echo filter)│◀─── best effort ───│               │
//!  └───────────────┘                    └───────────────┘
//! ```
//!
//! Every failure mode (no broadcast capability, blocked window creation,
//! missed or duplicated frames) degrades to independent single-window
//! operation; nothing in this crate throws for transport trouble.

pub mod coarse;
pub mod feed;
pub mod messages;
pub mod metrics;
pub mod model;
pub mod router;
pub mod session;
pub mod snapshot;
pub mod transport;
pub mod window;

// Library version
pub const LIB_VERSION: &str = "0.1.0";
