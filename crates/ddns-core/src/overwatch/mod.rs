//! Service registry
//!
//! The [`Overwatch`] keeps one running [`DdnsService`] per binding name and
//! restarts a binding only when its configuration actually changed. Each
//! service runs on its own tokio task; when a run loop exits, the optional
//! callback is told which service ended and why.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::DdnsService;
use crate::error::Error;

/// Notified when a service's run loop exits: `(type, name, error)`
pub type ServiceCallback = Arc<dyn Fn(&str, &str, Option<&Error>) + Send + Sync>;

struct Entry {
    service: Arc<DdnsService>,
    task: JoinHandle<()>,
}

/// Keyed set of running services
#[derive(Default)]
pub struct Overwatch {
    services: Mutex<HashMap<String, Entry>>,
    callback: Option<ServiceCallback>,
}

impl Overwatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an overwatch that reports run-loop exits to `callback`
    pub fn with_callback(callback: ServiceCallback) -> Self {
        Self {
            services: Mutex::new(HashMap::new()),
            callback: Some(callback),
        }
    }

    /// Register and start a service.
    ///
    /// A service whose name and content hash match a registered one is
    /// ignored. Otherwise any service of the same name is stopped first.
    /// Returns whether the service was started.
    pub async fn add(&self, service: DdnsService) -> bool {
        let previous = {
            let mut services = self.services.lock().await;
            if let Some(current) = services.get(service.name())
                && current.service.hash() == service.hash()
            {
                debug!("[{}] Configuration unchanged, keeping running service", service.name());
                return false;
            }
            services.remove(service.name())
        };

        // A stop waits for an in-flight cycle; the registry stays usable meanwhile.
        if let Some(previous) = previous {
            info!("[{}] Configuration changed, restarting service", service.name());
            retire(previous).await;
        }

        let service = Arc::new(service);
        let task = self.spawn(Arc::clone(&service));
        let displaced = self
            .services
            .lock()
            .await
            .insert(service.name().to_string(), Entry { service, task });
        if let Some(displaced) = displaced {
            retire(displaced).await;
        }
        true
    }

    /// Stop and forget a service. Returns whether it was registered.
    pub async fn remove(&self, name: &str) -> bool {
        let previous = self.services.lock().await.remove(name);
        match previous {
            Some(entry) => {
                info!("[{}] Removing service", name);
                retire(entry).await;
                true
            }
            None => false,
        }
    }

    /// Point-in-time snapshot of the registered services
    pub async fn services(&self) -> Vec<Arc<DdnsService>> {
        let services = self.services.lock().await;
        let mut snapshot: Vec<Arc<DdnsService>> =
            services.values().map(|entry| Arc::clone(&entry.service)).collect();
        snapshot.sort_by(|a, b| a.name().cmp(b.name()));
        snapshot
    }

    /// Look up one service by binding name
    pub async fn get(&self, name: &str) -> Option<Arc<DdnsService>> {
        self.services
            .lock()
            .await
            .get(name)
            .map(|entry| Arc::clone(&entry.service))
    }

    /// Names of the registered bindings
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.services.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.services.lock().await.is_empty()
    }

    /// Stop every service and wait for its run task to finish
    pub async fn shutdown(&self) {
        let entries: Vec<Entry> = {
            let mut services = self.services.lock().await;
            services.drain().map(|(_, entry)| entry).collect()
        };

        info!("Stopping {} DDNS service(s)", entries.len());
        for entry in entries {
            retire(entry).await;
        }
    }

    fn spawn(&self, service: Arc<DdnsService>) -> JoinHandle<()> {
        let callback = self.callback.clone();
        tokio::spawn(async move {
            let result = service.start().await;
            if let Err(e) = &result {
                error!("[{}] DDNS service exited with error: {}", service.name(), e);
            }
            if let Some(callback) = callback {
                callback(service.provider_name(), service.name(), result.as_ref().err());
            }
        })
    }
}

/// Stop a service and wait for its task, callback included
async fn retire(entry: Entry) {
    entry.service.stop().await;
    if let Err(e) = entry.task.await {
        warn!("[{}] Service task ended abnormally: {}", entry.service.name(), e);
    }
}
