//! Router / failover engine.
//!
//! Picks the model that serves each request. The active model is sticky: as
//! long as it stays enabled, configured, under its switch threshold and
//! circuit-closed, every request goes to it. Otherwise the enabled models are
//! scanned in (priority, id) order and the first eligible one becomes active.
//!
//! The active pointer is guarded by a version counter. A switch only lands if
//! the version is unchanged since it was read, so two requests that notice the
//! same outage record a single [`SwitchEvent`]; the loser re-reads and follows
//! the winner.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use lingmo_types::audit::{Notification, SwitchEvent, SwitchReason};
use lingmo_types::error::{GatewayError, RegistryError};
use lingmo_types::model::{ModelEndpoint, ModelId};
use lingmo_types::status::RouterStatus;

use crate::audit::AuditEmitter;
use crate::circuit::{Admission, CircuitBoard};
use crate::quota::QuotaTracker;
use crate::registry::ModelRegistry;

/// Upper bound on read-select-swap rounds for one selection.
const MAX_SWAP_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RouterState {
    active_model_id: Option<ModelId>,
    version: u64,
}

/// The model chosen for one forwarding attempt.
#[derive(Debug, Clone)]
pub struct Selection {
    pub endpoint: Arc<ModelEndpoint>,
    /// The attempt is the circuit's half-open probe and must report back.
    pub probe: bool,
}

/// Why a model cannot take traffic right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ineligibility {
    Missing,
    Disabled,
    Unconfigured,
    QuotaExhausted,
    CircuitOpen,
}

impl Ineligibility {
    fn reason(self) -> SwitchReason {
        match self {
            Ineligibility::Missing | Ineligibility::Disabled => SwitchReason::Manual,
            Ineligibility::Unconfigured | Ineligibility::CircuitOpen => SwitchReason::Unreachable,
            Ineligibility::QuotaExhausted => SwitchReason::QuotaExhausted,
        }
    }
}

pub struct Router {
    registry: Arc<ModelRegistry>,
    quota: Arc<QuotaTracker>,
    circuits: Arc<CircuitBoard>,
    audit: AuditEmitter,
    state: RwLock<RouterState>,
    /// `version + 1` of the last announced outage, 0 if none.
    outage_announced: AtomicU64,
}

impl Router {
    pub fn new(
        registry: Arc<ModelRegistry>,
        quota: Arc<QuotaTracker>,
        circuits: Arc<CircuitBoard>,
        audit: AuditEmitter,
    ) -> Self {
        Self {
            registry,
            quota,
            circuits,
            audit,
            state: RwLock::new(RouterState {
                active_model_id: None,
                version: 0,
            }),
            outage_announced: AtomicU64::new(0),
        }
    }

    fn read_state(&self) -> RouterState {
        match self.state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Install `next` only if the state still equals `observed`.
    fn compare_and_swap(&self, observed: RouterState, next: RouterState) -> bool {
        let mut guard = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *guard != observed {
            return false;
        }
        *guard = next;
        true
    }

    pub fn active_model_id(&self) -> Option<ModelId> {
        self.read_state().active_model_id
    }

    /// Eligibility without touching circuit admission.
    fn check(&self, endpoint: &ModelEndpoint) -> Result<(), Ineligibility> {
        if !endpoint.enabled {
            return Err(Ineligibility::Disabled);
        }
        if !endpoint.is_configured() {
            return Err(Ineligibility::Unconfigured);
        }
        if !self.quota.is_eligible(endpoint.id) {
            return Err(Ineligibility::QuotaExhausted);
        }
        if !self.circuits.is_closed(endpoint.id) {
            return Err(Ineligibility::CircuitOpen);
        }
        Ok(())
    }

    fn check_id(&self, id: ModelId) -> Result<Arc<ModelEndpoint>, Ineligibility> {
        let endpoint = self.registry.get(id).map_err(|_| Ineligibility::Missing)?;
        self.check(&endpoint)?;
        Ok(endpoint)
    }

    /// Walk enabled models in priority order and admit the first eligible one.
    ///
    /// Returns the selection and the first reason a candidate was skipped.
    fn scan(&self, excluded: &HashSet<ModelId>) -> (Option<Selection>, Option<Ineligibility>) {
        let mut first_skip = None;
        for endpoint in self.registry.list_enabled() {
            if excluded.contains(&endpoint.id) {
                continue;
            }
            if let Some(err) = endpoint.config_error() {
                tracing::warn!(model_id = %endpoint.id, error = %err, "Skipping unconfigured model");
                first_skip.get_or_insert(Ineligibility::Unconfigured);
                continue;
            }
            if !self.quota.is_eligible(endpoint.id) {
                tracing::debug!(model_id = %endpoint.id, "Skipping model over switch threshold");
                first_skip.get_or_insert(Ineligibility::QuotaExhausted);
                continue;
            }
            match self.circuits.admit(endpoint.id) {
                Admission::Closed => {
                    return (
                        Some(Selection {
                            endpoint,
                            probe: false,
                        }),
                        first_skip,
                    );
                }
                Admission::Probe => {
                    tracing::info!(model_id = %endpoint.id, "Admitting half-open probe");
                    return (
                        Some(Selection {
                            endpoint,
                            probe: true,
                        }),
                        first_skip,
                    );
                }
                Admission::Rejected => {
                    tracing::debug!(model_id = %endpoint.id, "Skipping model with open circuit");
                    first_skip.get_or_insert(Ineligibility::CircuitOpen);
                }
            }
        }
        (None, first_skip)
    }

    /// Choose the model for the next forwarding attempt.
    ///
    /// `excluded` holds models that already failed for this request. They are
    /// skipped, but excluding the active model does not by itself switch away
    /// from it: only global ineligibility moves the active pointer.
    pub fn select_model(&self, excluded: &HashSet<ModelId>) -> Result<Selection, GatewayError> {
        for attempt in 0..MAX_SWAP_ATTEMPTS {
            let observed = self.read_state();

            let prior = observed.active_model_id.map(|id| (id, self.check_id(id)));
            if let Some((id, Ok(endpoint))) = &prior {
                if !excluded.contains(id) {
                    return Ok(Selection {
                        endpoint: Arc::clone(endpoint),
                        probe: false,
                    });
                }
            }

            let (chosen, first_skip) = self.scan(excluded);
            let Some(selection) = chosen else {
                self.announce_outage(observed);
                return Err(GatewayError::no_eligible_provider());
            };
            let chosen_id = selection.endpoint.id;

            if observed.active_model_id == Some(chosen_id) {
                return Ok(selection);
            }
            // Prior only failed this request: serve elsewhere, keep it active
            if let Some((_, Ok(_))) = &prior {
                return Ok(selection);
            }

            let reason = match &prior {
                Some((_, Err(why))) => Some(why.reason()),
                Some((_, Ok(_))) => None,
                // Initial activation is only an event when something was skipped
                None => first_skip.map(Ineligibility::reason),
            };

            let next = RouterState {
                active_model_id: Some(chosen_id),
                version: observed.version + 1,
            };
            if self.compare_and_swap(observed, next) {
                match reason {
                    Some(reason) => {
                        let event = SwitchEvent::new(observed.active_model_id, Some(chosen_id), reason);
                        tracing::info!(
                            from = ?observed.active_model_id,
                            to = %chosen_id,
                            reason = %reason,
                            version = next.version,
                            "Active model switched"
                        );
                        self.audit.notify(Notification::failover(&event));
                        self.audit.switch(event);
                    }
                    None => {
                        tracing::info!(model_id = %chosen_id, "Active model initialised");
                    }
                }
                return Ok(selection);
            }

            if attempt + 1 == MAX_SWAP_ATTEMPTS {
                tracing::warn!(model_id = %chosen_id, "Router state contended, serving without switch");
                return Ok(selection);
            }
            if selection.probe {
                self.circuits.release_probe(chosen_id);
            }
            tracing::debug!(attempt, "Lost active-model swap, re-reading router state");
        }
        Err(GatewayError::no_eligible_provider())
    }

    /// Record a `none_available` event once per router version, and only when
    /// no model at all could serve traffic.
    fn announce_outage(&self, observed: RouterState) {
        let any_eligible = self
            .registry
            .list_enabled()
            .iter()
            .any(|e| self.check(e).is_ok());
        if any_eligible {
            return;
        }
        let marker = observed.version + 1;
        if self.outage_announced.swap(marker, Ordering::SeqCst) == marker {
            return;
        }
        tracing::warn!(from = ?observed.active_model_id, "No eligible model available");
        let event = SwitchEvent::new(observed.active_model_id, None, SwitchReason::NoneAvailable);
        self.audit.notify(Notification::none_available(observed.active_model_id));
        self.audit.switch(event);
    }

    /// Force the active model, bypassing eligibility.
    pub fn manual_switch(&self, id: ModelId) -> Result<SwitchEvent, RegistryError> {
        self.registry.get(id)?;
        let (from, version) = {
            let mut guard = match self.state.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let from = guard.active_model_id;
            guard.active_model_id = Some(id);
            guard.version += 1;
            (from, guard.version)
        };
        let event = SwitchEvent::new(from, Some(id), SwitchReason::Manual);
        tracing::info!(from = ?from, to = %id, version, "Active model switched manually");
        self.audit.notify(Notification::failover(&event));
        self.audit.switch(event.clone());
        Ok(event)
    }

    pub fn status(&self) -> RouterStatus {
        let state = self.read_state();
        RouterStatus {
            active_model_id: state.active_model_id,
            version: state.version,
            circuits: self
                .registry
                .list_all()
                .iter()
                .map(|e| self.circuits.status(e.id))
                .collect(),
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("state", &self.read_state())
            .finish_non_exhaustive()
    }
}
