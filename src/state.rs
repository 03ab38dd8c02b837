use std::sync::Arc;

use crate::broadcaster::Broadcaster;
use crate::db::LocationStore;
use crate::registry::ConnectionRegistry;

/// Shared handles every connection task works with.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub store: Arc<dyn LocationStore>,
    pub broadcaster: Broadcaster,
}

impl AppState {
    pub fn new(store: Arc<dyn LocationStore>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        Self {
            registry,
            store,
            broadcaster,
        }
    }
}
