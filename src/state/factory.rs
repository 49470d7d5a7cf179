use crate::config::{DatabaseConfig, ModelStoreBackend, ModelStoreConfig};
use crate::error::{AppError, Result};
use crate::state::{
    IncidentRepository, InMemoryModelStore, InMemoryRepository, ModelStore, MySqlRepository,
    SledModelStore,
};
use std::sync::Arc;

/// Create the incident repository based on configuration
pub async fn create_repository(config: &DatabaseConfig) -> Result<Arc<dyn IncidentRepository>> {
    if config.is_in_memory() {
        tracing::info!("Initializing in-memory incident repository");
        return Ok(Arc::new(InMemoryRepository::with_default_risk_levels()));
    }

    if !config.url.starts_with("mysql://") {
        return Err(AppError::Configuration(format!(
            "Unsupported database url scheme: {}",
            config.url
        )));
    }

    tracing::info!(
        max_connections = config.max_connections,
        "Initializing MySQL incident repository"
    );

    let repository = MySqlRepository::connect(&config.url, config.max_connections).await?;
    if config.run_migrations {
        repository.run_migrations().await?;
    }
    Ok(Arc::new(repository))
}

/// Create the model store based on configuration
pub fn create_model_store(config: &ModelStoreConfig) -> Result<Arc<dyn ModelStore>> {
    match config.backend {
        ModelStoreBackend::Sled => {
            let path = config.path.as_ref().ok_or_else(|| {
                AppError::Configuration("Sled backend requires 'path' configuration".to_string())
            })?;

            tracing::info!(path = ?path, "Initializing Sled model store");

            Ok(Arc::new(SledModelStore::new(path)?))
        }

        ModelStoreBackend::Memory => {
            tracing::info!("Initializing in-memory model store");
            Ok(Arc::new(InMemoryModelStore::new()))
        }
    }
}
