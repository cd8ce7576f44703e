//! Wire messages exchanged between windows
//!
//! Defines the broadcast envelope and the per-topic message enums. The
//! envelope is what actually crosses the transport; its payload stays an
//! opaque JSON value until a topic listener decodes it into the typed
//! message for that topic.
//!
//! Wire `type` tags are load-bearing: detached windows of different builds
//! may coexist briefly, so tags and field names never change meaning.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::model::{DrillSelection, FeedType, NewsItem, Symbol, WindowId};
use crate::snapshot::FeedSnapshot;

/// Logical topics multiplexed over the one broadcast channel.
///
/// Independent topics do not interfere; the router demultiplexes by this
/// name at the application layer, not at the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    /// News feed replication.
    News,
    /// Watchlist group change signals.
    Watchlist,
    /// Selected-symbol propagation.
    Details,
    /// Sector compass drill propagation.
    Onion,
}

impl Topic {
    /// Every topic, in dispatch order.
    pub const ALL: [Topic; 4] = [Topic::News, Topic::Watchlist, Topic::Details, Topic::Onion];

    /// Wire name of the topic.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::News => "news",
            Topic::Watchlist => "watchlist",
            Topic::Details => "details",
            Topic::Onion => "onion",
        }
    }

    /// Parse a wire name back into a topic.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "news" => Some(Topic::News),
            "watchlist" => Some(Topic::Watchlist),
            "details" => Some(Topic::Details),
            "onion" => Some(Topic::Onion),
            _ => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The unit that crosses the broadcast transport.
///
/// `sender` is an origin tag: the transport echoes publishes back to the
/// publishing window in some host environments, and receivers drop frames
/// whose sender matches their own id. Envelopes are immutable once
/// published and carry no acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: Topic,
    #[serde(rename = "senderId")]
    pub sender: WindowId,
    pub payload: Value,
}

/// Errors while encoding or decoding wire messages.
///
/// Never surfaced to collaborators: a frame that fails to decode is
/// counted, logged, and dropped, the same as any other lost broadcast.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("malformed {topic} payload: {reason}")]
    MalformedPayload { topic: Topic, reason: String },

    #[error("unserializable payload: {0}")]
    Unserializable(String),
}

/// Serialize an envelope for the wire.
pub fn encode_envelope(envelope: &Envelope) -> Result<String, CodecError> {
    serde_json::to_string(envelope).map_err(|e| CodecError::Unserializable(e.to_string()))
}

/// Parse a raw frame into an envelope.
pub fn decode_envelope(frame: &str) -> Result<Envelope, CodecError> {
    serde_json::from_str(frame).map_err(|e| CodecError::MalformedEnvelope(e.to_string()))
}

/// Decode a topic payload into its typed message.
pub fn decode_payload<T: DeserializeOwned>(topic: Topic, payload: &Value) -> Result<T, CodecError> {
    serde_json::from_value(payload.clone()).map_err(|e| CodecError::MalformedPayload {
        topic,
        reason: e.to_string(),
    })
}

/// Serialize a typed message into an envelope payload.
pub fn encode_payload<T: Serialize>(message: &T) -> Result<Value, CodecError> {
    serde_json::to_value(message).map_err(|e| CodecError::Unserializable(e.to_string()))
}

/// Messages on the `news` topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NewsMessage {
    /// A consumer asks the producer for its complete collections.
    #[serde(rename = "request-full-sync")]
    RequestFullSync,

    /// The producer's complete per-feed-type collections; destructive
    /// replacement on receipt.
    #[serde(rename = "full-sync")]
    FullSync(FeedSnapshot),

    /// One freshly generated item for one feed lane.
    #[serde(rename = "new-item")]
    #[serde(rename_all = "camelCase")]
    NewItem { feed_type: FeedType, item: NewsItem },
}

impl NewsMessage {
    /// Message type as a string label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            NewsMessage::RequestFullSync => "request-full-sync",
            NewsMessage::FullSync(_) => "full-sync",
            NewsMessage::NewItem { .. } => "new-item",
        }
    }
}

/// Messages on the `watchlist` topic.
///
/// Bare semantic tags: the receiver re-reads its own durable store rather
/// than applying a transmitted diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WatchlistMessage {
    #[serde(rename = "group-created")]
    GroupCreated,
    #[serde(rename = "group-deleted")]
    GroupDeleted,
    #[serde(rename = "subscription-changed")]
    SubscriptionChanged,
    #[serde(rename = "reload-groups")]
    ReloadGroups,
}

impl WatchlistMessage {
    pub fn label(&self) -> &'static str {
        match self {
            WatchlistMessage::GroupCreated => "group-created",
            WatchlistMessage::GroupDeleted => "group-deleted",
            WatchlistMessage::SubscriptionChanged => "subscription-changed",
            WatchlistMessage::ReloadGroups => "reload-groups",
        }
    }
}

/// Messages on the `details` topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DetailsMessage {
    /// The user focused a different symbol; payload-bearing because no
    /// durable copy exists to re-read.
    #[serde(rename = "symbol-changed")]
    SymbolChanged { symbol: Symbol },
}

impl DetailsMessage {
    pub fn label(&self) -> &'static str {
        match self {
            DetailsMessage::SymbolChanged { .. } => "symbol-changed",
        }
    }
}

/// Messages on the `onion` topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OnionMessage {
    #[serde(rename = "drill-changed")]
    #[serde(rename_all = "camelCase")]
    DrillChanged {
        drill_path: Vec<String>,
        selected_segment: Option<String>,
    },
}

impl OnionMessage {
    pub fn label(&self) -> &'static str {
        match self {
            OnionMessage::DrillChanged { .. } => "drill-changed",
        }
    }

    /// Build a drill-changed message from the current selection.
    pub fn from_selection(selection: &DrillSelection) -> Self {
        OnionMessage::DrillChanged {
            drill_path: selection.drill_path.clone(),
            selected_segment: selection.selected_segment.clone(),
        }
    }
}
