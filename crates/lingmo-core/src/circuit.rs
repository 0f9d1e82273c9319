//! Per-model circuit breaker.
//!
//! Tracks forwarding outcomes per model and gates which models the router may
//! pick. Thresholds come from the live settings, so an operator change
//! applies to the next failure.
//!
//! ```text
//! Closed --(failures >= threshold)--> Open --(cooldown elapsed, admit)--> HalfOpen
//!   ^                                  ^                                     |
//!   +------------(probe succeeds)------|-------------------------------------+
//!                                      +---------(probe fails)---------------+
//! ```
//!
//! Exactly one probe is admitted per half-open period. A probe that is never
//! reported (the caller vanished) expires after the probe lease, after which
//! another request may probe.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use lingmo_types::model::ModelId;
use lingmo_types::status::CircuitStatusInfo;

use crate::settings::SettingsHandle;

/// Circuit breaker state for a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Excluded from routing until `retry_at`.
    Open { opened_at: Instant, retry_at: Instant },
    /// One probe request is in flight.
    HalfOpen { probe_started_at: Instant },
}

/// Router's answer when asking whether a model may take a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Closed,
    /// The caller holds the single probe slot and must report its outcome
    /// (or release it).
    Probe,
    Rejected,
}

#[derive(Debug)]
struct ModelCircuit {
    state: CircuitState,
    consecutive_failures: u32,
    last_error: Option<String>,
    last_success: Option<Instant>,
    total_calls: u64,
    total_failures: u64,
}

impl ModelCircuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_error: None,
            last_success: None,
            total_calls: 0,
            total_failures: 0,
        }
    }

    fn admit(&mut self, now: Instant, lease: Duration) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::Closed,
            CircuitState::Open { retry_at, .. } => {
                if now >= retry_at {
                    self.state = CircuitState::HalfOpen {
                        probe_started_at: now,
                    };
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen { probe_started_at } => {
                if now.saturating_duration_since(probe_started_at) >= lease {
                    self.state = CircuitState::HalfOpen {
                        probe_started_at: now,
                    };
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            }
        }
    }

    /// Returns true when this success closed a non-closed circuit.
    fn record_success(&mut self, now: Instant, probe: bool) -> bool {
        self.total_calls += 1;
        self.last_success = Some(now);
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                false
            }
            CircuitState::HalfOpen { .. } if probe => {
                self.consecutive_failures = 0;
                self.state = CircuitState::Closed;
                true
            }
            // Late success from a request admitted before the circuit opened.
            // Only the probe may close it.
            _ => false,
        }
    }

    fn record_failure(
        &mut self,
        detail: &str,
        now: Instant,
        threshold: u32,
        cooldown: Duration,
        probe: bool,
    ) {
        self.total_calls += 1;
        self.total_failures += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(detail.to_string());

        let open = CircuitState::Open {
            opened_at: now,
            retry_at: now + cooldown,
        };
        match self.state {
            CircuitState::Closed => {
                if self.consecutive_failures >= threshold {
                    self.state = open;
                }
            }
            // Probe failed, restart the cooldown
            CircuitState::HalfOpen { .. } if probe => self.state = open,
            // Late failure from a request admitted before the circuit opened
            _ => {}
        }
    }

    fn release_probe(&mut self, now: Instant) {
        if let CircuitState::HalfOpen { .. } = self.state {
            self.state = CircuitState::Open {
                opened_at: now,
                retry_at: now,
            };
        }
    }

    fn to_status_info(&self, model_id: ModelId, now: Instant) -> CircuitStatusInfo {
        let (circuit_state, retry_in_secs) = match self.state {
            CircuitState::Closed => ("closed", None),
            CircuitState::Open { retry_at, .. } => {
                ("open", Some(retry_at.saturating_duration_since(now).as_secs()))
            }
            CircuitState::HalfOpen { .. } => ("half_open", None),
        };

        let last_success_ago = self.last_success.map(|s| {
            let elapsed = now.saturating_duration_since(s).as_secs();
            if elapsed < 60 {
                format!("{elapsed}s ago")
            } else if elapsed < 3600 {
                format!("{}m ago", elapsed / 60)
            } else {
                format!("{}h ago", elapsed / 3600)
            }
        });

        CircuitStatusInfo {
            model_id,
            circuit_state: circuit_state.to_string(),
            consecutive_failures: self.consecutive_failures,
            last_error: self.last_error.clone(),
            last_success_ago,
            retry_in_secs,
            total_calls: self.total_calls,
            total_failures: self.total_failures,
        }
    }
}

/// Circuit state for every model, keyed by id.
#[derive(Debug)]
pub struct CircuitBoard {
    circuits: DashMap<ModelId, ModelCircuit>,
    settings: Arc<SettingsHandle>,
    probe_lease: Duration,
}

impl CircuitBoard {
    /// `probe_lease` bounds how long an unreported probe holds the slot.
    pub fn new(settings: Arc<SettingsHandle>, probe_lease: Duration) -> Self {
        Self {
            circuits: DashMap::new(),
            settings,
            probe_lease,
        }
    }

    /// Whether the model's circuit is closed. Unknown models are closed.
    pub fn is_closed(&self, id: ModelId) -> bool {
        self.circuits
            .get(&id)
            .map(|c| c.state == CircuitState::Closed)
            .unwrap_or(true)
    }

    pub fn state(&self, id: ModelId) -> CircuitState {
        self.circuits
            .get(&id)
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn admit(&self, id: ModelId) -> Admission {
        self.admit_at(id, Instant::now())
    }

    fn admit_at(&self, id: ModelId, now: Instant) -> Admission {
        match self.circuits.get_mut(&id) {
            Some(mut c) => c.admit(now, self.probe_lease),
            None => Admission::Closed,
        }
    }

    /// Report a successful call. `probe` marks the attempt that was admitted
    /// as the half-open probe (or forced by a manual test).
    pub fn record_success(&self, id: ModelId, probe: bool) {
        let mut c = self.circuits.entry(id).or_insert_with(ModelCircuit::new);
        if c.record_success(Instant::now(), probe) {
            tracing::info!(model_id = %id, "Circuit closed after successful probe");
        }
    }

    pub fn record_failure(&self, id: ModelId, detail: &str, probe: bool) {
        self.record_failure_at(id, detail, Instant::now(), probe);
    }

    fn record_failure_at(&self, id: ModelId, detail: &str, now: Instant, probe: bool) {
        let settings = self.settings.current();
        let mut c = self.circuits.entry(id).or_insert_with(ModelCircuit::new);
        let was_open = matches!(c.state, CircuitState::Open { .. });
        c.record_failure(
            detail,
            now,
            settings.failure_threshold,
            settings.circuit_cooldown,
            probe,
        );
        if !was_open && matches!(c.state, CircuitState::Open { .. }) {
            tracing::warn!(
                model_id = %id,
                consecutive_failures = c.consecutive_failures,
                cooldown_secs = settings.circuit_cooldown.as_secs_f64(),
                "Circuit opened"
            );
        }
    }

    /// Give back a probe slot that was admitted but never used.
    pub fn release_probe(&self, id: ModelId) {
        if let Some(mut c) = self.circuits.get_mut(&id) {
            c.release_probe(Instant::now());
        }
    }

    /// Take the probe slot of a non-closed circuit immediately, regardless
    /// of cooldown (manual test).
    ///
    /// Returns false for a closed circuit, which is left untouched: the test
    /// then counts like any other call.
    pub fn force_probe(&self, id: ModelId) -> bool {
        let Some(mut c) = self.circuits.get_mut(&id) else {
            return false;
        };
        if c.state == CircuitState::Closed {
            return false;
        }
        c.state = CircuitState::HalfOpen {
            probe_started_at: Instant::now(),
        };
        true
    }

    pub fn status(&self, id: ModelId) -> CircuitStatusInfo {
        let now = Instant::now();
        match self.circuits.get(&id) {
            Some(c) => c.to_status_info(id, now),
            None => ModelCircuit::new().to_status_info(id, now),
        }
    }

    pub fn remove(&self, id: ModelId) {
        self.circuits.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lingmo_types::config::SettingKey;

    fn board() -> CircuitBoard {
        CircuitBoard::new(Arc::new(SettingsHandle::default()), Duration::from_secs(240))
    }

    const ID: ModelId = ModelId(1);

    #[test]
    fn unknown_model_is_closed() {
        let b = board();
        assert!(b.is_closed(ID));
        assert_eq!(b.admit(ID), Admission::Closed);
        assert_eq!(b.status(ID).circuit_state, "closed");
    }

    #[test]
    fn opens_exactly_at_threshold() {
        let b = board();
        b.record_failure(ID, "timeout", false);
        b.record_failure(ID, "timeout", false);
        assert!(b.is_closed(ID));
        b.record_failure(ID, "timeout", false);
        assert!(!b.is_closed(ID));
        assert_eq!(b.admit(ID), Admission::Rejected);

        let status = b.status(ID);
        assert_eq!(status.circuit_state, "open");
        assert_eq!(status.consecutive_failures, 3);
        assert_eq!(status.total_failures, 3);
        assert_eq!(status.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let b = board();
        b.record_failure(ID, "e", false);
        b.record_failure(ID, "e", false);
        b.record_success(ID, false);
        b.record_failure(ID, "e", false);
        b.record_failure(ID, "e", false);
        assert!(b.is_closed(ID));
    }

    #[test]
    fn half_open_admits_one_probe_after_cooldown() {
        let b = board();
        let t0 = Instant::now();
        for _ in 0..3 {
            b.record_failure_at(ID, "e", t0, false);
        }
        assert_eq!(b.admit_at(ID, t0 + Duration::from_secs(29)), Admission::Rejected);
        let t1 = t0 + Duration::from_secs(30);
        assert_eq!(b.admit_at(ID, t1), Admission::Probe);
        assert_eq!(b.admit_at(ID, t1), Admission::Rejected);
        assert_eq!(b.status(ID).circuit_state, "half_open");

        b.record_success(ID, true);
        assert!(b.is_closed(ID));
        assert_eq!(b.status(ID).consecutive_failures, 0);
    }

    #[test]
    fn failed_probe_restarts_cooldown() {
        let b = board();
        let t0 = Instant::now();
        for _ in 0..3 {
            b.record_failure_at(ID, "e", t0, false);
        }
        let t1 = t0 + Duration::from_secs(31);
        assert_eq!(b.admit_at(ID, t1), Admission::Probe);
        b.record_failure_at(ID, "still down", t1, true);

        assert_eq!(b.admit_at(ID, t1 + Duration::from_secs(29)), Admission::Rejected);
        assert_eq!(b.admit_at(ID, t1 + Duration::from_secs(30)), Admission::Probe);
    }

    #[test]
    fn released_probe_can_be_taken_again() {
        let b = board();
        let t0 = Instant::now() - Duration::from_secs(60);
        for _ in 0..3 {
            b.record_failure_at(ID, "e", t0, false);
        }
        assert_eq!(b.admit(ID), Admission::Probe);
        assert_eq!(b.admit(ID), Admission::Rejected);
        b.release_probe(ID);
        assert_eq!(b.admit(ID), Admission::Probe);
    }

    #[test]
    fn abandoned_probe_lease_expires() {
        let b = CircuitBoard::new(Arc::new(SettingsHandle::default()), Duration::from_secs(10));
        let t0 = Instant::now();
        for _ in 0..3 {
            b.record_failure_at(ID, "e", t0, false);
        }
        let t1 = t0 + Duration::from_secs(30);
        assert_eq!(b.admit_at(ID, t1), Admission::Probe);
        assert_eq!(b.admit_at(ID, t1 + Duration::from_secs(9)), Admission::Rejected);
        assert_eq!(b.admit_at(ID, t1 + Duration::from_secs(10)), Admission::Probe);
    }

    #[test]
    fn force_probe_ignores_cooldown() {
        let b = board();
        for _ in 0..3 {
            b.record_failure(ID, "e", false);
        }
        assert!(b.force_probe(ID));
        assert_eq!(b.status(ID).circuit_state, "half_open");
        b.record_failure(ID, "probe failed", true);
        assert_eq!(b.status(ID).circuit_state, "open");
        assert!(b.status(ID).retry_in_secs.unwrap() >= 29);
    }

    #[test]
    fn force_probe_leaves_closed_circuit_alone() {
        let b = board();
        assert!(!b.force_probe(ID));
        b.record_failure(ID, "e", false);
        assert!(!b.force_probe(ID));
        assert!(b.is_closed(ID));
        assert_eq!(b.status(ID).consecutive_failures, 1);
    }

    #[test]
    fn late_success_does_not_close_open_circuit() {
        let b = board();
        for _ in 0..3 {
            b.record_failure(ID, "e", false);
        }
        b.record_success(ID, false);
        assert_eq!(b.status(ID).circuit_state, "open");
        assert_eq!(b.admit(ID), Admission::Rejected);
        assert_eq!(b.status(ID).total_calls, 4);
    }

    #[test]
    fn late_outcomes_do_not_resolve_half_open() {
        let b = board();
        let t0 = Instant::now() - Duration::from_secs(60);
        for _ in 0..3 {
            b.record_failure_at(ID, "e", t0, false);
        }
        assert_eq!(b.admit(ID), Admission::Probe);

        b.record_success(ID, false);
        assert_eq!(b.status(ID).circuit_state, "half_open");
        b.record_failure(ID, "late", false);
        assert_eq!(b.status(ID).circuit_state, "half_open");

        b.record_success(ID, true);
        assert!(b.is_closed(ID));
    }

    #[test]
    fn threshold_follows_live_settings() {
        let settings = Arc::new(SettingsHandle::default());
        let b = CircuitBoard::new(Arc::clone(&settings), Duration::from_secs(240));
        settings.update(SettingKey::FailureThreshold, "1").unwrap();
        b.record_failure(ID, "e", false);
        assert!(!b.is_closed(ID));
    }
}
