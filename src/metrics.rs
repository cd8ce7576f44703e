//! Observability for the synchronization subsystem
//!
//! Counters for transport traffic and protocol outcomes, shared across a
//! window's components via atomics, plus threshold checks that surface
//! unhealthy replication (decode storms, resync storms) as alerts.
//!
//! Every failure mode in this subsystem degrades to independent
//! single-window operation, so metrics are the only place those
//! degradations become visible.

use std::sync::atomic::{AtomicU64, Ordering};

/// Core counters for one window's sync stack.
#[derive(Debug, Default)]
pub struct SyncMetrics {
    // Transport
    pub frames_published: AtomicU64,
    pub frames_received: AtomicU64,
    pub self_frames_filtered: AtomicU64,
    pub decode_failures: AtomicU64,

    // Feed protocol
    pub full_syncs_served: AtomicU64,
    pub full_syncs_applied: AtomicU64,
    pub snapshots_rejected: AtomicU64,
    pub items_merged: AtomicU64,
    pub duplicates_dropped: AtomicU64,
    pub watchdog_resyncs: AtomicU64,

    // Coarse protocol
    pub reload_signals: AtomicU64,
    pub selection_updates: AtomicU64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_published(&self) {
        self.frames_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_self_filtered(&self) {
        self.self_frames_filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_full_sync_served(&self) {
        self.full_syncs_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_full_sync_applied(&self) {
        self.full_syncs_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot_rejected(&self) {
        self.snapshots_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_item_merged(&self) {
        self.items_merged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_dropped(&self) {
        self.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_watchdog_resync(&self) {
        self.watchdog_resyncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reload_signal(&self) {
        self.reload_signals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_selection_update(&self) {
        self.selection_updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn sample(&self) -> MetricsSample {
        MetricsSample {
            frames_published: self.frames_published.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            self_frames_filtered: self.self_frames_filtered.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            full_syncs_served: self.full_syncs_served.load(Ordering::Relaxed),
            full_syncs_applied: self.full_syncs_applied.load(Ordering::Relaxed),
            snapshots_rejected: self.snapshots_rejected.load(Ordering::Relaxed),
            items_merged: self.items_merged.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            watchdog_resyncs: self.watchdog_resyncs.load(Ordering::Relaxed),
            reload_signals: self.reload_signals.load(Ordering::Relaxed),
            selection_updates: self.selection_updates.load(Ordering::Relaxed),
        }
    }

    /// Check alert thresholds and collect violations.
    pub fn check_thresholds(&self, thresholds: &AlertThresholds) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let sample = self.sample();

        if sample.decode_failures > thresholds.max_decode_failures {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                metric: "decode_failures".to_string(),
                message: format!(
                    "Decode failures: {} > threshold {}",
                    sample.decode_failures, thresholds.max_decode_failures
                ),
            });
        }

        if sample.snapshots_rejected > thresholds.max_snapshots_rejected {
            alerts.push(Alert {
                level: AlertLevel::Critical,
                metric: "snapshots_rejected".to_string(),
                message: format!(
                    "Corrupt snapshots: {} > threshold {}",
                    sample.snapshots_rejected, thresholds.max_snapshots_rejected
                ),
            });
        }

        if sample.watchdog_resyncs > thresholds.max_watchdog_resyncs {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                metric: "watchdog_resyncs".to_string(),
                message: format!(
                    "Watchdog resyncs: {} > threshold {} (producer silent?)",
                    sample.watchdog_resyncs, thresholds.max_watchdog_resyncs
                ),
            });
        }

        alerts
    }
}

/// A plain copy of the counters for logging or display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSample {
    pub frames_published: u64,
    pub frames_received: u64,
    pub self_frames_filtered: u64,
    pub decode_failures: u64,
    pub full_syncs_served: u64,
    pub full_syncs_applied: u64,
    pub snapshots_rejected: u64,
    pub items_merged: u64,
    pub duplicates_dropped: u64,
    pub watchdog_resyncs: u64,
    pub reload_signals: u64,
    pub selection_updates: u64,
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Warning,
    Critical,
}

/// A threshold violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub level: AlertLevel,
    pub metric: String,
    pub message: String,
}

/// Thresholds for alert generation.
#[derive(Debug, Clone)]
pub struct AlertThresholds {
    pub max_decode_failures: u64,
    pub max_snapshots_rejected: u64,
    pub max_watchdog_resyncs: u64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            max_decode_failures: 100,
            max_snapshots_rejected: 10,
            max_watchdog_resyncs: 50,
        }
    }
}
