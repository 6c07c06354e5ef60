use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cachebroker_engine::kube_secrets::KubeSecretStore;
use cachebroker_engine::memory::{InMemoryControlPlane, InMemorySecretStore};
use cachebroker_engine::{CacheProvider, SecretStore};

use crate::config::{Config, SecretBackend};

const PURGE_INTERVAL: Duration = Duration::from_secs(3600);

pub async fn run(port: Option<u16>) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(port) = port {
        config.server_port = port;
    }

    tracing::info!("Starting cachebroker");
    tracing::info!(
        secrets_path = %config.secrets_path,
        secret_backend = ?config.secret_backend,
        recovery_window_days = config.recovery_window_days,
        call_timeout = ?config.call_timeout,
        "Configuration loaded"
    );

    let secrets = secret_store(&config).await?;
    let control_plane = Arc::new(InMemoryControlPlane::new(config.simulated_settle_polls));
    tracing::info!(
        settle_polls = config.simulated_settle_polls,
        "Using simulated control plane"
    );

    let provider = CacheProvider::new(control_plane, secrets.clone(), config.provider_config());
    let state = crate::api::AppState {
        provider: Arc::new(provider),
    };

    let purge_handle = tokio::spawn(purge_loop(secrets));

    let host = config.server_host.clone();
    let port = config.server_port;
    let api_handle = tokio::spawn(async move {
        if let Err(e) = crate::api::start_server(&host, port, state).await {
            tracing::error!("API server error: {}", e);
        }
    });

    tracing::info!("Cachebroker ready on http://{}:{}", config.server_host, config.server_port);
    tracing::info!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    api_handle.abort();
    purge_handle.abort();

    Ok(())
}

async fn secret_store(config: &Config) -> Result<Arc<dyn SecretStore>> {
    match config.secret_backend {
        SecretBackend::Memory => {
            tracing::warn!("Using in-memory secret store, tokens are lost on restart");
            Ok(Arc::new(InMemorySecretStore::new()))
        }
        SecretBackend::Kubernetes => {
            let store = KubeSecretStore::try_default(config.secret_namespace.clone())
                .await
                .context("Failed to connect the Kubernetes secret store")?;
            tracing::info!(namespace = %config.secret_namespace, "Using Kubernetes secret store");
            Ok(Arc::new(store))
        }
    }
}

/// Permanently remove auth tokens whose recovery window has passed
async fn purge_loop(secrets: Arc<dyn SecretStore>) {
    let mut ticker = tokio::time::interval(PURGE_INTERVAL);
    loop {
        ticker.tick().await;
        match secrets.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => tracing::info!(purged, "Purged expired auth tokens"),
            Err(e) => tracing::warn!("Failed to purge expired auth tokens: {}", e),
        }
    }
}
