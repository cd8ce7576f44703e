//! Property tests for the feed replica invariants
//!
//! For any interleaving of new-item and full-sync messages the replica
//! must stay bounded, duplicate-free, and idempotent under redelivery.

use std::sync::Arc;

use proptest::prelude::*;
use rust_decimal::Decimal;
use window_sync::feed::{FeedConsumer, FeedSyncConfig};
use window_sync::messages::NewsMessage;
use window_sync::metrics::SyncMetrics;
use window_sync::model::{FeedType, NewsItem, NewsItemId, Sentiment, Symbol};
use window_sync::snapshot::{FeedCollections, SnapshotBuilder};

fn item(id: u16) -> NewsItem {
    NewsItem {
        id: NewsItemId::new(format!("n-{id}")),
        headline: format!("headline {id}"),
        summary: "summary".to_string(),
        source: "newswire".to_string(),
        published_at: 1_722_470_400_000 + id as i64,
        sentiment: Sentiment::Neutral,
        tickers: vec![Symbol::new("SPY")],
        sectors: vec![],
        feed_type: FeedType::Global,
        impact: Decimal::new(40, 2),
        relevance_score: Decimal::new(60, 2),
    }
}

fn consumer() -> FeedConsumer {
    FeedConsumer::new(0, &FeedSyncConfig::default(), Arc::new(SyncMetrics::new()))
}

fn new_item(id: u16) -> NewsMessage {
    NewsMessage::NewItem {
        feed_type: FeedType::Global,
        item: item(id),
    }
}

fn full_sync(builder: &mut SnapshotBuilder, ids: &[u16], now: i64) -> NewsMessage {
    let mut collections = FeedCollections::new();
    collections.insert(FeedType::Global, ids.iter().map(|id| item(*id)).collect());
    NewsMessage::FullSync(builder.build(collections, now))
}

fn replica_ids(consumer: &FeedConsumer) -> Vec<String> {
    consumer
        .feeds()
        .buffer(FeedType::Global)
        .items()
        .map(|i| i.id.to_string())
        .collect()
}

#[derive(Debug, Clone)]
enum Op {
    NewItem(u16),
    FullSync(Vec<u16>),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u16..400).prop_map(Op::NewItem),
        proptest::collection::vec(0u16..400, 0..300).prop_map(Op::FullSync),
    ]
}

proptest! {
    #[test]
    fn replica_stays_bounded_and_duplicate_free(
        ops in proptest::collection::vec(op_strategy(), 1..50)
    ) {
        let mut consumer = consumer();
        let mut builder = SnapshotBuilder::new();
        let mut now = 0i64;

        for op in ops {
            now += 100;
            match op {
                Op::NewItem(id) => consumer.handle(&new_item(id), now),
                Op::FullSync(ids) => {
                    let message = full_sync(&mut builder, &ids, now);
                    consumer.handle(&message, now);
                }
            }

            let ids = replica_ids(&consumer);
            prop_assert!(ids.len() <= 200, "cap exceeded: {}", ids.len());

            let mut unique = ids.clone();
            unique.sort();
            unique.dedup();
            prop_assert_eq!(unique.len(), ids.len(), "duplicate id in replica");
        }
    }

    #[test]
    fn redelivering_every_new_item_changes_nothing(
        ids in proptest::collection::vec(0u16..300, 1..60)
    ) {
        let mut once = consumer();
        let mut twice = consumer();

        for (i, id) in ids.iter().enumerate() {
            let now = (i as i64 + 1) * 100;
            once.handle(&new_item(*id), now);
            twice.handle(&new_item(*id), now);
            twice.handle(&new_item(*id), now);
        }

        prop_assert_eq!(replica_ids(&once), replica_ids(&twice));
    }

    #[test]
    fn full_sync_yields_first_occurrences_in_order(
        ids in proptest::collection::vec(0u16..300, 0..300)
    ) {
        let mut consumer = consumer();
        let mut builder = SnapshotBuilder::new();
        let message = full_sync(&mut builder, &ids, 1_000);
        consumer.handle(&message, 1_000);

        let mut expected: Vec<String> = Vec::new();
        for id in &ids {
            let key = format!("n-{id}");
            if expected.len() < 200 && !expected.contains(&key) {
                expected.push(key);
            }
        }

        prop_assert_eq!(replica_ids(&consumer), expected);
    }
}
