//! Quota tracker: per-model token counters and threshold evaluation.
//!
//! Each model gets its own cell of atomics, so updates to different models
//! never contend and concurrent `record_usage` calls on one model never lose
//! an increment (`fetch_add`). The alert edge is a single `AtomicBool`
//! flipped with compare-exchange, which guarantees one notification per
//! upward crossing even when many requests cross at once.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use lingmo_types::model::ModelId;
use lingmo_types::quota::{AlertTransition, QuotaSnapshot, SyncType, usage_ratio};

use crate::settings::SettingsHandle;

#[derive(Debug)]
struct SyncMeta {
    sync_type: SyncType,
    last_sync_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct QuotaCell {
    total: AtomicU64,
    used: AtomicU64,
    /// `true` while the model sits at or above the alert threshold.
    alert_above: AtomicBool,
    meta: Mutex<SyncMeta>,
}

impl QuotaCell {
    fn new(total: u64, used: u64, sync_type: SyncType, last_sync_time: Option<DateTime<Utc>>) -> Self {
        Self {
            total: AtomicU64::new(total),
            used: AtomicU64::new(used),
            alert_above: AtomicBool::new(false),
            meta: Mutex::new(SyncMeta {
                sync_type,
                last_sync_time,
            }),
        }
    }

    fn ratio(&self) -> f64 {
        usage_ratio(
            self.used.load(Ordering::SeqCst),
            self.total.load(Ordering::SeqCst),
        )
    }

    fn with_meta<R>(&self, f: impl FnOnce(&mut SyncMeta) -> R) -> R {
        match self.meta.lock() {
            Ok(mut guard) => f(&mut *guard),
            Err(poisoned) => f(&mut *poisoned.into_inner()),
        }
    }

    /// Flip the alert edge if the ratio moved across `threshold`.
    fn evaluate_edge(&self, threshold: f64) -> AlertTransition {
        let total = self.total.load(Ordering::SeqCst);
        let above = total > 0 && self.ratio() >= threshold;
        if above {
            if self
                .alert_above
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return AlertTransition::Raised;
            }
        } else if self
            .alert_above
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return AlertTransition::Cleared;
        }
        AlertTransition::None
    }
}

/// Per-model usage counters shared by the router, forwarder and synchronizer.
#[derive(Debug)]
pub struct QuotaTracker {
    cells: DashMap<ModelId, Arc<QuotaCell>>,
    settings: Arc<SettingsHandle>,
}

impl QuotaTracker {
    pub fn new(settings: Arc<SettingsHandle>) -> Self {
        Self {
            cells: DashMap::new(),
            settings,
        }
    }

    fn cell(&self, id: ModelId) -> Arc<QuotaCell> {
        if let Some(cell) = self.cells.get(&id) {
            return Arc::clone(cell.value());
        }
        Arc::clone(
            self.cells
                .entry(id)
                .or_insert_with(|| Arc::new(QuotaCell::new(0, 0, SyncType::Estimated, None)))
                .value(),
        )
    }

    fn existing(&self, id: ModelId) -> Option<Arc<QuotaCell>> {
        self.cells.get(&id).map(|c| Arc::clone(c.value()))
    }

    /// Seed counters from persisted snapshots.
    ///
    /// The alert edge starts on whichever side the loaded ratio is on, so a
    /// restart does not re-announce an alert that already fired.
    pub fn load(&self, snapshots: impl IntoIterator<Item = QuotaSnapshot>) {
        let threshold = self.settings.current().alert_threshold;
        for snap in snapshots {
            let cell = QuotaCell::new(
                snap.total_tokens,
                snap.used_tokens,
                snap.sync_type,
                snap.last_sync_time,
            );
            let above = snap.total_tokens > 0 && snap.usage_ratio() >= threshold;
            cell.alert_above.store(above, Ordering::SeqCst);
            self.cells.insert(snap.model_id, Arc::new(cell));
        }
    }

    /// True iff the quota is unlimited or below the switch threshold.
    pub fn is_eligible(&self, id: ModelId) -> bool {
        let Some(cell) = self.existing(id) else {
            return true;
        };
        if cell.total.load(Ordering::SeqCst) == 0 {
            return true;
        }
        cell.ratio() < self.settings.current().switch_threshold
    }

    pub fn usage_ratio(&self, id: ModelId) -> f64 {
        self.existing(id).map(|c| c.ratio()).unwrap_or(0.0)
    }

    /// Atomically add `tokens` to the model's used counter.
    pub fn record_usage(&self, id: ModelId, tokens: u64) -> AlertTransition {
        let cell = self.cell(id);
        cell.used.fetch_add(tokens, Ordering::SeqCst);
        cell.evaluate_edge(self.settings.current().alert_threshold)
    }

    /// Record that the latest increment was a local estimate.
    pub fn mark_estimated(&self, id: ModelId) {
        self.cell(id).with_meta(|m| m.sync_type = SyncType::Estimated);
    }

    /// Overwrite counters with authoritative figures.
    pub fn sync(&self, id: ModelId, total: u64, used: u64, sync_type: SyncType) -> AlertTransition {
        let cell = self.cell(id);
        cell.total.store(total, Ordering::SeqCst);
        cell.used.store(used, Ordering::SeqCst);
        cell.with_meta(|m| {
            m.sync_type = sync_type;
            m.last_sync_time = Some(Utc::now());
        });
        cell.evaluate_edge(self.settings.current().alert_threshold)
    }

    pub fn snapshot(&self, id: ModelId) -> QuotaSnapshot {
        match self.existing(id) {
            Some(cell) => {
                let (sync_type, last_sync_time) =
                    cell.with_meta(|m| (m.sync_type, m.last_sync_time));
                QuotaSnapshot {
                    model_id: id,
                    total_tokens: cell.total.load(Ordering::SeqCst),
                    used_tokens: cell.used.load(Ordering::SeqCst),
                    sync_type,
                    last_sync_time,
                }
            }
            None => QuotaSnapshot::unlimited(id),
        }
    }

    pub fn snapshot_all(&self) -> Vec<QuotaSnapshot> {
        let mut ids: Vec<ModelId> = self.cells.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids.into_iter().map(|id| self.snapshot(id)).collect()
    }

    /// Forget a deleted model.
    pub fn remove(&self, id: ModelId) {
        self.cells.remove(&id);
    }
}
