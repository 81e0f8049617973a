use std::{collections::HashMap, sync::Arc};

use tracing::info;

use crate::{backend::BackendDescriptor, config::RelayConfig};

/// Read-only lookup from backend identifier to descriptor, built once at startup.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<BackendDescriptor>>,
}

impl BackendRegistry {
    pub fn from_config(config: &RelayConfig) -> Self {
        let backends = config
            .backends
            .iter()
            .cloned()
            .map(|settings| {
                let descriptor = BackendDescriptor::new(settings);
                info!(
                    backend = descriptor.id(),
                    protocol = %descriptor.protocol(),
                    model = descriptor.model(),
                    streamable = descriptor.streamable(),
                    credential_required = descriptor.requires_credential(),
                    credential_configured = descriptor.has_credential(),
                    "backend registered"
                );
                (descriptor.id().to_owned(), Arc::new(descriptor))
            })
            .collect();

        Self { backends }
    }

    pub fn resolve(&self, id: &str) -> Option<Arc<BackendDescriptor>> {
        self.backends.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids = self.backends.keys().map(String::as_str).collect::<Vec<_>>();
        ids.sort_unstable();
        ids
    }
}
