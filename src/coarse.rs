//! Coarse reconciliation for watchlist and selection state
//!
//! Watchlist groups live in the origin-shared durable store, so mutations
//! broadcast only a bare semantic tag and every other window re-reads the
//! store in full. No diffs cross the wire and no merge logic exists;
//! whichever write persisted last is what everyone reloads.
//!
//! Selected symbol and compass drill have no durable copy to re-read, so
//! those signals carry the value itself: bidirectional last-write-wins.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::messages::{DetailsMessage, OnionMessage, WatchlistMessage};
use crate::metrics::SyncMetrics;
use crate::model::{DrillSelection, Symbol, WatchlistGroup};

/// Durable key-value store capability.
///
/// Backed by whatever the host persists per origin; windows of one origin
/// observe each other's writes, which is what makes reload-on-signal
/// sufficient.
pub trait KeyValueStore: Send + Sync {
    fn save(&self, key: &str, value: &Value);
    fn load(&self, key: &str) -> Option<Value>;
    fn remove(&self, key: &str);
}

/// In-memory store for tests and hosts without durable storage.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn save(&self, key: &str, value: &Value) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value.clone());
        }
    }

    fn load(&self, key: &str) -> Option<Value> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn remove(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }
}

/// Store key for the persisted group list.
const GROUPS_KEY: &str = "watchlist.groups";

/// One window's view of the watchlist groups.
///
/// Mutations persist to the durable store first, then yield the signal to
/// broadcast. Inbound signals of any kind trigger a full reload; the tag
/// names what happened but never carries state.
pub struct WatchlistStore {
    kv: Arc<dyn KeyValueStore>,
    groups: Vec<WatchlistGroup>,
    metrics: Arc<SyncMetrics>,
}

impl WatchlistStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, metrics: Arc<SyncMetrics>) -> Self {
        let mut store = Self {
            kv,
            groups: Vec::new(),
            metrics,
        };
        store.reload();
        store
    }

    pub fn groups(&self) -> &[WatchlistGroup] {
        &self.groups
    }

    pub fn group(&self, id: &str) -> Option<&WatchlistGroup> {
        self.groups.iter().find(|g| g.id == id)
    }

    /// Add a group; returns the signal to broadcast.
    pub fn create_group(&mut self, group: WatchlistGroup) -> WatchlistMessage {
        info!(group = %group.name, "Watchlist group created");
        self.groups.push(group);
        self.persist();
        WatchlistMessage::GroupCreated
    }

    /// Remove a group by id; returns the signal when something was
    /// actually removed.
    pub fn delete_group(&mut self, id: &str) -> Option<WatchlistMessage> {
        let before = self.groups.len();
        self.groups.retain(|g| g.id != id);
        if self.groups.len() == before {
            return None;
        }
        info!(group_id = id, "Watchlist group deleted");
        self.persist();
        Some(WatchlistMessage::GroupDeleted)
    }

    /// Add or remove one symbol in a group; returns the signal when the
    /// membership changed.
    pub fn set_subscription(
        &mut self,
        group_id: &str,
        symbol: Symbol,
        subscribed: bool,
    ) -> Option<WatchlistMessage> {
        let group = self.groups.iter_mut().find(|g| g.id == group_id)?;
        let present = group.symbols.contains(&symbol);

        if subscribed && !present {
            group.symbols.push(symbol);
        } else if !subscribed && present {
            group.symbols.retain(|s| s != &symbol);
        } else {
            return None;
        }

        self.persist();
        Some(WatchlistMessage::SubscriptionChanged)
    }

    /// Handle an inbound change signal: re-read the durable store.
    pub fn handle(&mut self, message: &WatchlistMessage) {
        self.metrics.record_reload_signal();
        debug!(signal = message.label(), "Reloading watchlist groups");
        self.reload();
    }

    /// Re-read the authoritative group list from the durable store.
    ///
    /// A missing or malformed entry reads as no groups; this window then
    /// operates on an empty list rather than failing.
    pub fn reload(&mut self) {
        self.groups = match self.kv.load(GROUPS_KEY) {
            Some(value) => match serde_json::from_value(value) {
                Ok(groups) => groups,
                Err(err) => {
                    warn!(error = %err, "Persisted watchlist unreadable; starting empty");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
    }

    fn persist(&self) {
        match serde_json::to_value(&self.groups) {
            Ok(value) => self.kv.save(GROUPS_KEY, &value),
            Err(err) => warn!(error = %err, "Could not persist watchlist groups"),
        }
    }
}

/// Currently selected symbol, replicated by value.
pub struct SelectionState {
    selected: Option<Symbol>,
    metrics: Arc<SyncMetrics>,
}

impl SelectionState {
    pub fn new(metrics: Arc<SyncMetrics>) -> Self {
        Self {
            selected: None,
            metrics,
        }
    }

    /// Local user interaction: set the symbol and build the broadcast.
    pub fn select(&mut self, symbol: Symbol) -> DetailsMessage {
        debug!(symbol = %symbol, "Symbol selected locally");
        self.selected = Some(symbol.clone());
        DetailsMessage::SymbolChanged { symbol }
    }

    /// Inbound selection from another window; last write wins.
    pub fn handle(&mut self, message: &DetailsMessage) {
        let DetailsMessage::SymbolChanged { symbol } = message;
        debug!(symbol = %symbol, "Symbol selected remotely");
        self.selected = Some(symbol.clone());
        self.metrics.record_selection_update();
    }

    pub fn selected(&self) -> Option<&Symbol> {
        self.selected.as_ref()
    }
}

/// Current compass drill position, replicated by value.
pub struct DrillState {
    selection: DrillSelection,
    metrics: Arc<SyncMetrics>,
}

impl DrillState {
    pub fn new(metrics: Arc<SyncMetrics>) -> Self {
        Self {
            selection: DrillSelection::default(),
            metrics,
        }
    }

    /// Local drill interaction: apply and build the broadcast.
    pub fn drill_to(&mut self, selection: DrillSelection) -> OnionMessage {
        let message = OnionMessage::from_selection(&selection);
        self.selection = selection;
        message
    }

    /// Inbound drill from another window; last write wins.
    pub fn handle(&mut self, message: &OnionMessage) {
        let OnionMessage::DrillChanged {
            drill_path,
            selected_segment,
        } = message;
        self.selection = DrillSelection {
            drill_path: drill_path.clone(),
            selected_segment: selected_segment.clone(),
        };
        self.metrics.record_selection_update();
    }

    pub fn selection(&self) -> &DrillSelection {
        &self.selection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(id: &str, name: &str, symbols: &[&str]) -> WatchlistGroup {
        WatchlistGroup {
            id: id.to_string(),
            name: name.to_string(),
            symbols: symbols.iter().map(|s| Symbol::new(*s)).collect(),
        }
    }

    fn store_pair() -> (WatchlistStore, WatchlistStore, Arc<MemoryStore>) {
        let kv = Arc::new(MemoryStore::new());
        let a = WatchlistStore::new(Arc::clone(&kv) as Arc<dyn KeyValueStore>, Arc::new(SyncMetrics::new()));
        let b = WatchlistStore::new(Arc::clone(&kv) as Arc<dyn KeyValueStore>, Arc::new(SyncMetrics::new()));
        (a, b, kv)
    }

    #[test]
    fn test_create_persists_and_signals() {
        let (mut a, mut b, _kv) = store_pair();

        let signal = a.create_group(group("g1", "Tech", &["NVDA", "AMD"]));
        assert_eq!(signal, WatchlistMessage::GroupCreated);

        // The other window sees nothing until the signal arrives
        assert!(b.groups().is_empty());
        b.handle(&signal);
        assert_eq!(b.groups().len(), 1);
        assert_eq!(b.group("g1").unwrap().symbols.len(), 2);
    }

    #[test]
    fn test_delete_signals_only_when_something_was_removed() {
        let (mut a, mut b, _kv) = store_pair();
        let created = a.create_group(group("g1", "Tech", &[]));
        b.handle(&created);

        assert_eq!(a.delete_group("missing"), None);

        let signal = a.delete_group("g1").unwrap();
        assert_eq!(signal, WatchlistMessage::GroupDeleted);
        b.handle(&signal);
        assert!(b.groups().is_empty());
    }

    #[test]
    fn test_subscription_change_round_trip() {
        let (mut a, mut b, _kv) = store_pair();
        b.handle(&a.create_group(group("g1", "Tech", &["NVDA"])));

        let signal = a
            .set_subscription("g1", Symbol::new("AMD"), true)
            .unwrap();
        assert_eq!(signal, WatchlistMessage::SubscriptionChanged);
        b.handle(&signal);
        assert!(b.group("g1").unwrap().symbols.contains(&Symbol::new("AMD")));

        // Subscribing an already-subscribed symbol changes nothing
        assert_eq!(a.set_subscription("g1", Symbol::new("AMD"), true), None);

        let signal = a
            .set_subscription("g1", Symbol::new("NVDA"), false)
            .unwrap();
        b.handle(&signal);
        assert!(!b.group("g1").unwrap().symbols.contains(&Symbol::new("NVDA")));
    }

    #[test]
    fn test_reload_groups_signal_refreshes() {
        let (mut a, mut b, _kv) = store_pair();
        a.create_group(group("g1", "Tech", &[]));

        b.handle(&WatchlistMessage::ReloadGroups);
        assert_eq!(b.groups().len(), 1);
    }

    #[test]
    fn test_malformed_persisted_groups_read_as_empty() {
        let kv = Arc::new(MemoryStore::new());
        kv.save(GROUPS_KEY, &Value::String("not a group list".to_string()));

        let store = WatchlistStore::new(
            Arc::clone(&kv) as Arc<dyn KeyValueStore>,
            Arc::new(SyncMetrics::new()),
        );
        assert!(store.groups().is_empty());
    }

    #[test]
    fn test_symbol_selection_last_write_wins() {
        let metrics = Arc::new(SyncMetrics::new());
        let mut a = SelectionState::new(Arc::clone(&metrics));
        let mut b = SelectionState::new(Arc::clone(&metrics));

        let from_a = a.select(Symbol::new("NVDA"));
        b.handle(&from_a);
        assert_eq!(b.selected(), Some(&Symbol::new("NVDA")));

        let from_b = b.select(Symbol::new("AMD"));
        a.handle(&from_b);
        assert_eq!(a.selected(), Some(&Symbol::new("AMD")));
        assert_eq!(metrics.sample().selection_updates, 2);
    }

    #[test]
    fn test_drill_propagation() {
        let metrics = Arc::new(SyncMetrics::new());
        let mut a = DrillState::new(Arc::clone(&metrics));
        let mut b = DrillState::new(Arc::clone(&metrics));

        let message = a.drill_to(DrillSelection {
            drill_path: vec!["tech".to_string()],
            selected_segment: Some("semis".to_string()),
        });
        b.handle(&message);

        assert_eq!(b.selection().drill_path, vec!["tech".to_string()]);
        assert_eq!(b.selection().selected_segment.as_deref(), Some("semis"));
    }
}
