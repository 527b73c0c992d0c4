//! Process-wide entry points.
//!
//! These use the Docker-backed [`Deployer`] and the global [`registry`].
//! Environments must be released explicitly: call
//! [`EnvironmentProxy::cleanup`], use [`with_environment`], or install the
//! exit hook so a shutdown signal cleans up whatever is left.

use crate::config::LoadConfig;
use crate::deploy::Deployer;
use crate::error::Result;
use crate::proxy::EnvironmentProxy;
use crate::registry::registry;
use std::future::Future;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Deploys `config` and registers the resulting environment.
pub async fn load_env(config: &LoadConfig) -> Result<Arc<EnvironmentProxy>> {
    Deployer::local().with_registry(registry()).load(config).await
}

pub fn list_active_environments() -> Vec<String> {
    registry().list()
}

pub fn get_environment(name: &str) -> Option<Arc<EnvironmentProxy>> {
    registry().get(name)
}

pub async fn cleanup_all_environments() {
    registry().cleanup_all().await
}

/// Scoped acquisition: the environment is cleaned up on every exit path of `f`.
pub async fn with_environment<F, Fut, T>(config: &LoadConfig, f: F) -> Result<T>
where
    F: FnOnce(Arc<EnvironmentProxy>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    Deployer::local()
        .with_registry(registry())
        .scoped(config, f)
        .await
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

/// Spawns a task that cleans up every registered environment on shutdown.
pub fn install_exit_hook() -> JoinHandle<()> {
    tokio::spawn(async {
        shutdown_signal().await;
        cleanup_all_environments().await;
    })
}
