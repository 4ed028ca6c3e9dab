//! Metadata registry: loads and validates metadata and roles, indexes them,
//! and publishes immutable snapshots with an atomic pointer swap. A failed
//! reload leaves the previous snapshot in place; in-flight queries keep the
//! snapshot they captured at start.

pub mod snapshot;
pub mod validate;

use std::sync::{Arc, RwLock};

use crate::error::{EngineError, ProviderError};
use crate::providers::{MetadataProvider, RoleProvider};

pub use snapshot::Snapshot;
pub use validate::validate_config;

pub struct MetadataRegistry {
    metadata_provider: Arc<dyn MetadataProvider>,
    role_provider: Arc<dyn RoleProvider>,
    current: RwLock<Arc<Snapshot>>,
}

impl std::fmt::Debug for MetadataRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataRegistry").finish_non_exhaustive()
    }
}

impl MetadataRegistry {
    /// Load metadata and roles, validate, and publish the first snapshot.
    pub async fn load(
        metadata_provider: Arc<dyn MetadataProvider>,
        role_provider: Arc<dyn RoleProvider>,
    ) -> Result<Self, EngineError> {
        let config = metadata_provider
            .load()
            .await
            .map_err(ProviderError::metadata)?;
        let roles = role_provider.load().await.map_err(ProviderError::role)?;
        validate_config(&config)?;

        log::info!(
            "metadata loaded: {} database(s), {} table(s), {} role(s)",
            config.databases.len(),
            config.tables.len(),
            roles.len()
        );

        Ok(Self {
            metadata_provider,
            role_provider,
            current: RwLock::new(Arc::new(Snapshot::build(config, roles))),
        })
    }

    /// The current snapshot. Callers hold the returned `Arc` for the whole
    /// query; concurrent reloads never mutate it.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Re-load metadata from the provider, keeping the current role catalog.
    /// On any failure the previous snapshot stays published.
    pub async fn reload_metadata(&self) -> Result<(), EngineError> {
        let config = self
            .metadata_provider
            .load()
            .await
            .map_err(ProviderError::metadata)?;
        validate_config(&config)?;

        let roles = self.snapshot().roles().to_vec();
        self.swap(Snapshot::build(config, roles));
        log::info!("metadata reloaded");
        Ok(())
    }

    /// Re-load the role catalog, keeping the current metadata.
    pub async fn reload_roles(&self) -> Result<(), EngineError> {
        let roles = self.role_provider.load().await.map_err(ProviderError::role)?;

        let config = self.snapshot().config().clone();
        self.swap(Snapshot::build(config, roles));
        log::info!("roles reloaded");
        Ok(())
    }

    fn swap(&self, next: Snapshot) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(next);
    }
}
