// src/deploy/deployer.rs
use super::{BackendFactory, DefaultBackendFactory, DeploymentPlan};
use crate::backend::EnvBackend;
use crate::config::{ExecutorConfig, HealthCheckConfig, LoadConfig, Mode};
use crate::error::{Error, Result};
use crate::health::HealthChecker;
use crate::metrics::{MetricsCollector, Timer};
use crate::proxy::{EnvironmentProxy, Instance, InstancePool};
use crate::registry::Registry;
use crate::runtime::DockerRuntime;
use futures::future::join_all;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, warn};

struct Deployment {
    backend: Arc<dyn EnvBackend>,
    pool: Option<Arc<InstancePool>>,
}

/// Turns a [`LoadConfig`] into a ready [`EnvironmentProxy`].
///
/// Replicas are constructed concurrently. If any of them fails, every
/// replica that did come up is cleaned up before the error is returned.
pub struct Deployer {
    factory: Arc<dyn BackendFactory>,
    registry: Option<Arc<Registry>>,
    health_check: Option<HealthCheckConfig>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Deployer {
    pub fn new(factory: Arc<dyn BackendFactory>) -> Self {
        Self {
            factory,
            registry: None,
            health_check: None,
            metrics: None,
        }
    }

    /// Docker-backed deployer with default executor settings.
    pub fn local() -> Self {
        Self::local_with(ExecutorConfig::default())
    }

    pub fn local_with(executor: ExecutorConfig) -> Self {
        Self::new(Arc::new(DefaultBackendFactory::new(
            Arc::new(DockerRuntime::new()),
            executor,
        )))
    }

    pub fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_health_check(mut self, config: HealthCheckConfig) -> Self {
        self.health_check = Some(config);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Deploys without wrapping or registering.
    pub async fn deploy(&self, config: &LoadConfig) -> Result<Arc<dyn EnvBackend>> {
        Ok(self.deploy_backend(config).await?.backend)
    }

    /// Deploys, injects `env_vars`, wraps the result in a proxy and registers it.
    pub async fn load(&self, config: &LoadConfig) -> Result<Arc<EnvironmentProxy>> {
        let timer = Timer::new();
        let result = self.deploy_backend(config).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_deployment(&config.image, result.is_ok());
        }
        let deployment = result.map_err(|e| {
            error!(image = %config.image, "Failed to load environment: {}", e);
            e
        })?;

        if !config.env_vars.is_empty() {
            let env_vars: HashMap<String, String> = config
                .env_vars
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if let Err(e) = deployment.backend.setup(&env_vars).await {
                error!(environment = %deployment.backend.name(), "Setup failed: {}", e);
                if let Err(cleanup_err) = deployment.backend.cleanup().await {
                    warn!(environment = %deployment.backend.name(), "Error during cleanup: {}", cleanup_err);
                }
                return Err(e);
            }
        }

        let mut proxy = EnvironmentProxy::new(deployment.backend);
        if let Some(metrics) = &self.metrics {
            proxy = proxy.with_metrics(metrics.clone());
        }
        let proxy = Arc::new(proxy);

        if let (Some(pool), Some(health)) = (deployment.pool, &self.health_check) {
            if health.enabled {
                let checker = Arc::new(HealthChecker::new(health.clone(), pool));
                tokio::spawn(checker.start());
            }
        }

        if let Some(registry) = &self.registry {
            registry.register(proxy.clone());
        }

        info!(
            environment = %proxy.name(),
            elapsed = ?timer.elapsed(),
            "Environment loaded"
        );
        Ok(proxy)
    }

    /// Loads an environment, runs `f` with it and always cleans it up,
    /// including when `f` fails or panics.
    pub async fn scoped<F, Fut, T>(&self, config: &LoadConfig, f: F) -> Result<T>
    where
        F: FnOnce(Arc<EnvironmentProxy>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let env = self.load(config).await?;
        let outcome = AssertUnwindSafe(f(env.clone())).catch_unwind().await;
        env.cleanup().await;

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn deploy_backend(&self, config: &LoadConfig) -> Result<Deployment> {
        let plan = DeploymentPlan::resolve(config)?;

        if config.mode == Mode::Remote {
            info!(environment_id = %config.image, "Connecting to remote environment");
            let backend = self.factory.connect_remote(config).await?;
            return Ok(Deployment { backend, pool: None });
        }

        if let [spec] = plan.instances.as_slice() {
            let backend = self.factory.create_local(config, spec).await?;
            return Ok(Deployment { backend, pool: None });
        }

        let pool = Arc::new(self.deploy_pool(config, &plan).await?);
        Ok(Deployment {
            backend: pool.clone(),
            pool: Some(pool),
        })
    }

    async fn deploy_pool(&self, config: &LoadConfig, plan: &DeploymentPlan) -> Result<InstancePool> {
        info!(
            image = %config.image,
            replicas = plan.instances.len(),
            strategy = config.load_balance.as_str(),
            "Deploying instances"
        );

        let outcomes = join_all(
            plan.instances
                .iter()
                .map(|spec| self.factory.create_local(config, spec)),
        )
        .await;

        let mut instances = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for (spec, outcome) in plan.instances.iter().zip(outcomes) {
            match outcome {
                Ok(backend) => instances.push(Instance::new(spec.host.clone(), spec.port, backend)),
                Err(e) => failures.push((spec.index, e)),
            }
        }

        if !failures.is_empty() {
            error!(
                image = %config.image,
                failed = failures.len(),
                "Failed to deploy instances"
            );
            rollback(&instances).await;

            let details: Vec<String> = failures
                .iter()
                .map(|(index, e)| format!("instance {}: {}", index, e))
                .collect();
            return Err(Error::Backend(format!(
                "Multi-instance deployment failed ({} of {}): {}",
                failures.len(),
                plan.instances.len(),
                details.join("; ")
            )));
        }

        info!(image = %config.image, "Successfully deployed {} instances", instances.len());

        let mut pool = InstancePool::new(plan.pool_name(), instances, config.load_balance)?;
        if let Some(health) = &self.health_check {
            pool = pool.with_thresholds(health.healthy_threshold, health.unhealthy_threshold);
        }
        if let Some(metrics) = &self.metrics {
            pool = pool.with_metrics(metrics.clone());
        }
        Ok(pool)
    }
}

/// Best-effort cleanup of partially deployed replicas. Errors are logged only.
async fn rollback(instances: &[Instance]) {
    if instances.is_empty() {
        return;
    }
    info!("Cleaning up {} partially deployed instances", instances.len());

    let results = join_all(instances.iter().map(|i| i.backend.cleanup())).await;
    for (instance, result) in instances.iter().zip(results) {
        if let Err(e) = result {
            warn!(instance = %instance.address(), "Error during cleanup: {}", e);
        }
    }
}
