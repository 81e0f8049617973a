use std::sync::Arc;

use crate::{
    backend::{registry::BackendRegistry, BackendError},
    config::RelayConfig,
    invoker::UpstreamInvoker,
    metrics::RelayMetrics,
};

/// Shared, read-only after construction. Nothing here is mutated per request.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<BackendRegistry>,
    pub invoker: UpstreamInvoker,
    pub metrics: Arc<RelayMetrics>,
}

impl AppState {
    pub fn new(config: &RelayConfig) -> Result<Self, BackendError> {
        Ok(Self {
            registry: Arc::new(BackendRegistry::from_config(config)),
            invoker: UpstreamInvoker::new(config.connect_timeout)?,
            metrics: Arc::new(RelayMetrics::new()),
        })
    }
}
