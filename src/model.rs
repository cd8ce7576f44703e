//! Domain types shared across the synchronization subsystem
//!
//! IDs follow the exchange convention: opaque newtypes over UUID v7 where
//! this process mints them, and string newtypes where an external producer
//! owns the namespace (news item ids come from the headline generator).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Process-lifetime-unique identifier for a window.
///
/// Generated once at window startup and attached to every outbound
/// envelope as an origin tag so a window can filter its own echoes.
/// Nothing else may depend on the generation scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(Uuid);

impl WindowId {
    /// Mint a fresh id for this window.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create from existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for WindowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a news item.
///
/// Minted by the headline generator; this subsystem only compares them
/// for equality when deduplicating merges.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NewsItemId(String);

impl NewsItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NewsItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ticker symbol (e.g. "AAPL", "NVDA").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The four news feed lanes shown by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FeedType {
    #[serde(rename = "global")]
    Global,
    #[serde(rename = "trend")]
    Trend,
    #[serde(rename = "looking-at")]
    LookingAt,
    #[serde(rename = "watchlist")]
    Watchlist,
}

impl FeedType {
    /// Every feed lane, in display order.
    pub const ALL: [FeedType; 4] = [
        FeedType::Global,
        FeedType::Trend,
        FeedType::LookingAt,
        FeedType::Watchlist,
    ];

    /// Wire name of the feed lane.
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedType::Global => "global",
            FeedType::Trend => "trend",
            FeedType::LookingAt => "looking-at",
            FeedType::Watchlist => "watchlist",
        }
    }

    /// Parse a wire name back into a feed lane.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "global" => Some(FeedType::Global),
            "trend" => Some(FeedType::Trend),
            "looking-at" => Some(FeedType::LookingAt),
            "watchlist" => Some(FeedType::Watchlist),
            _ => None,
        }
    }
}

impl fmt::Display for FeedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sentiment classification attached by the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
}

/// A single news item as replicated between windows.
///
/// Produced by the headline generator in the primary window and replicated
/// read-only into detached windows. `impact` and `relevance_score` use
/// deterministic decimals so replicas compare bit-for-bit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsItem {
    /// Generator-assigned unique id.
    pub id: NewsItemId,
    pub headline: String,
    pub summary: String,
    pub source: String,
    /// Unix milliseconds when the item was published.
    pub published_at: i64,
    pub sentiment: Sentiment,
    /// Tickers this item is about.
    pub tickers: Vec<Symbol>,
    /// Sector tags.
    pub sectors: Vec<String>,
    /// Which feed lane the item belongs to.
    pub feed_type: FeedType,
    /// Generator-estimated market impact.
    pub impact: Decimal,
    /// Generator-estimated relevance to the current view.
    pub relevance_score: Decimal,
}

/// A user-defined watchlist group, persisted per window in the durable
/// store and reconciled coarsely (reload on signal, never diffed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistGroup {
    pub id: String,
    pub name: String,
    pub symbols: Vec<Symbol>,
}

/// Current drill position in the sector compass ("onion") widget.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrillSelection {
    /// Path of segment ids from the outer ring inward.
    pub drill_path: Vec<String>,
    /// Segment highlighted at the innermost drilled ring, if any.
    pub selected_segment: Option<String>,
}
