//! Model registry: the routing core's read-only view of configured endpoints.
//!
//! The snapshot is replaced wholesale whenever the management API changes an
//! endpoint. Readers clone an `Arc` and never block writers for long.

use std::sync::{Arc, RwLock};

use lingmo_types::error::RegistryError;
use lingmo_types::model::{ModelEndpoint, ModelId};

type Snapshot = Arc<Vec<Arc<ModelEndpoint>>>;

#[derive(Debug)]
pub struct ModelRegistry {
    snapshot: RwLock<Snapshot>,
}

impl ModelRegistry {
    pub fn new(endpoints: Vec<ModelEndpoint>) -> Self {
        Self {
            snapshot: RwLock::new(Self::build(endpoints)),
        }
    }

    fn build(mut endpoints: Vec<ModelEndpoint>) -> Snapshot {
        endpoints.sort_by_key(|e| e.sort_key());
        Arc::new(endpoints.into_iter().map(Arc::new).collect())
    }

    fn current(&self) -> Snapshot {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Every endpoint, enabled or not, in (priority, id) order.
    pub fn list_all(&self) -> Vec<Arc<ModelEndpoint>> {
        self.current().iter().cloned().collect()
    }

    /// Enabled endpoints in (priority asc, id asc) order.
    pub fn list_enabled(&self) -> Vec<Arc<ModelEndpoint>> {
        self.current().iter().filter(|e| e.enabled).cloned().collect()
    }

    pub fn enabled_count(&self) -> usize {
        self.current().iter().filter(|e| e.enabled).count()
    }

    pub fn get(&self, id: ModelId) -> Result<Arc<ModelEndpoint>, RegistryError> {
        self.current()
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or(RegistryError::NotFound(id))
    }

    /// Swap in a freshly loaded endpoint set.
    pub fn replace_all(&self, endpoints: Vec<ModelEndpoint>) {
        let next = Self::build(endpoints);
        tracing::debug!(count = next.len(), "Model registry reloaded");
        match self.snapshot.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}
