use std::{fmt, sync::Arc};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::GatewayConfig;
use crate::domain::models::ResourceId;
use crate::domain::ports::{
    CardDirectory, ReaderDirectory, ResourceDirectory, UsageService, UserDirectory,
};

/// Collaborators and settings shared by every connection.
#[derive(Clone)]
pub struct GatewayServices {
    pub readers: Arc<dyn ReaderDirectory>,
    pub cards: Arc<dyn CardDirectory>,
    pub users: Arc<dyn UserDirectory>,
    pub resources: Arc<dyn ResourceDirectory>,
    pub usage: Arc<dyn UsageService>,
    pub config: GatewayConfig,
    resource_locks: Arc<DashMap<ResourceId, Arc<Mutex<()>>>>,
}

impl GatewayServices {
    pub fn new(
        readers: Arc<dyn ReaderDirectory>,
        cards: Arc<dyn CardDirectory>,
        users: Arc<dyn UserDirectory>,
        resources: Arc<dyn ResourceDirectory>,
        usage: Arc<dyn UsageService>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            readers,
            cards,
            users,
            resources,
            usage,
            config,
            resource_locks: Arc::default(),
        }
    }

    /// Uses one backend for every collaborator.
    pub fn from_store<S>(store: S, config: GatewayConfig) -> Self
    where
        S: ReaderDirectory
            + CardDirectory
            + UserDirectory
            + ResourceDirectory
            + UsageService
            + 'static,
    {
        let store = Arc::new(store);
        Self::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store,
            config,
        )
    }

    /// Serializes usage toggles of one resource across all connections.
    pub async fn lock_resource(&self, resource_id: ResourceId) -> OwnedMutexGuard<()> {
        let lock = self.resource_locks.entry(resource_id).or_default().clone();
        lock.lock_owned().await
    }
}

impl fmt::Debug for GatewayServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayServices")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
