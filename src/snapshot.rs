//! Full-sync snapshots of the news feed collections
//!
//! A snapshot is the producer's complete per-feed-type item collections,
//! versioned, timestamped, and checksummed. Consumers verify integrity
//! before applying; a corrupt snapshot is dropped and the staleness
//! watchdog re-requests a fresh one.
//!
//! Replacement is destructive: a snapshot captured slightly stale on the
//! producer side can momentarily shadow a concurrently broadcast item.
//! The next new-item broadcast or watchdog cycle repairs the replica.

use sha2::{Digest, Sha256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{FeedType, NewsItem};

/// Per-feed-type item collections, keyed by wire feed name.
pub type FeedCollections = BTreeMap<FeedType, Vec<NewsItem>>;

/// A versioned, checksummed snapshot of all feed lanes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSnapshot {
    /// Monotonic snapshot version within the producing window.
    pub version: u64,
    /// Unix milliseconds when the snapshot was captured.
    pub captured_at: i64,
    /// Complete collections, every lane present even when empty.
    pub items: FeedCollections,
    /// SHA-256 checksum of the collections for integrity.
    pub checksum: String,
}

impl FeedSnapshot {
    /// Items for one lane; missing lanes read as empty.
    pub fn lane(&self, feed_type: FeedType) -> &[NewsItem] {
        self.items.get(&feed_type).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total items across all lanes.
    pub fn item_count(&self) -> usize {
        self.items.values().map(Vec::len).sum()
    }
}

/// Builds versioned snapshots from the producer's collections.
pub struct SnapshotBuilder {
    version_counter: u64,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self { version_counter: 0 }
    }

    /// Build a snapshot from the given collections.
    ///
    /// Lanes absent from `collections` are filled in empty so consumers
    /// always receive all four.
    pub fn build(&mut self, mut collections: FeedCollections, captured_at: i64) -> FeedSnapshot {
        self.version_counter += 1;

        for feed_type in FeedType::ALL {
            collections.entry(feed_type).or_default();
        }

        let checksum = compute_checksum(&collections);

        FeedSnapshot {
            version: self.version_counter,
            captured_at,
            items: collections,
            checksum,
        }
    }

    /// Current snapshot version.
    pub fn current_version(&self) -> u64 {
        self.version_counter
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute a SHA-256 checksum over the collections.
///
/// Iteration is deterministic: lanes come from a BTreeMap and items keep
/// their buffer order.
fn compute_checksum(collections: &FeedCollections) -> String {
    let mut hasher = Sha256::new();

    for (feed_type, items) in collections {
        hasher.update(feed_type.as_str().as_bytes());
        hasher.update(b"#");
        for item in items {
            hasher.update(item.id.as_str().as_bytes());
            hasher.update(b":");
            hasher.update(item.published_at.to_le_bytes());
            hasher.update(b":");
            hasher.update(item.headline.as_bytes());
            hasher.update(b"|");
        }
        hasher.update(b"---");
    }

    format!("{:x}", hasher.finalize())
}

/// Verify that a snapshot's checksum matches its content.
pub fn verify_snapshot_integrity(snapshot: &FeedSnapshot) -> bool {
    snapshot.checksum == compute_checksum(&snapshot.items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewsItemId, Sentiment, Symbol};
    use rust_decimal::Decimal;

    fn sample_item(id: &str, feed_type: FeedType) -> NewsItem {
        NewsItem {
            id: NewsItemId::new(id),
            headline: format!("headline {id}"),
            summary: "summary".to_string(),
            source: "newswire".to_string(),
            published_at: 1_722_470_400_000,
            sentiment: Sentiment::Neutral,
            tickers: vec![Symbol::new("SPY")],
            sectors: vec![],
            feed_type,
            impact: Decimal::new(40, 2),
            relevance_score: Decimal::new(60, 2),
        }
    }

    fn populated_collections() -> FeedCollections {
        let mut collections = FeedCollections::new();
        collections.insert(
            FeedType::Global,
            vec![
                sample_item("g1", FeedType::Global),
                sample_item("g2", FeedType::Global),
            ],
        );
        collections.insert(FeedType::Trend, vec![sample_item("t1", FeedType::Trend)]);
        collections
    }

    #[test]
    fn test_build_fills_missing_lanes() {
        let mut builder = SnapshotBuilder::new();
        let snap = builder.build(populated_collections(), 1_722_470_400_000);

        assert_eq!(snap.items.len(), 4);
        assert_eq!(snap.lane(FeedType::Global).len(), 2);
        assert!(snap.lane(FeedType::Watchlist).is_empty());
        assert!(snap.lane(FeedType::LookingAt).is_empty());
        assert_eq!(snap.item_count(), 3);
    }

    #[test]
    fn test_snapshot_versioning() {
        let mut builder = SnapshotBuilder::new();
        let s1 = builder.build(FeedCollections::new(), 1);
        let s2 = builder.build(FeedCollections::new(), 2);

        assert_eq!(s1.version, 1);
        assert_eq!(s2.version, 2);
        assert_eq!(builder.current_version(), 2);
    }

    #[test]
    fn test_snapshot_integrity() {
        let mut builder = SnapshotBuilder::new();
        let snap = builder.build(populated_collections(), 1_722_470_400_000);

        assert!(verify_snapshot_integrity(&snap));

        let mut tampered = snap.clone();
        tampered.checksum = "corrupted".to_string();
        assert!(!verify_snapshot_integrity(&tampered));

        let mut reordered = snap.clone();
        reordered
            .items
            .get_mut(&FeedType::Global)
            .unwrap()
            .reverse();
        assert!(!verify_snapshot_integrity(&reordered));
    }

    #[test]
    fn test_deterministic_checksum() {
        let s1 = SnapshotBuilder::new().build(populated_collections(), 1_722_470_400_000);
        let s2 = SnapshotBuilder::new().build(populated_collections(), 1_722_470_400_000);
        assert_eq!(s1.checksum, s2.checksum);
    }

    #[test]
    fn test_snapshot_serialization_roundtrip() {
        let snap = SnapshotBuilder::new().build(populated_collections(), 1_722_470_400_000);
        let json = serde_json::to_string(&snap).unwrap();
        let back: FeedSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snap, back);
    }
}
