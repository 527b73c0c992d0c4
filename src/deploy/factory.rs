// src/deploy/factory.rs
use super::InstanceSpec;
use crate::backend::{EnvBackend, EnvType, EnvTypeDetector, LocalBackend, LocalBackendOptions, RemoteBackend};
use crate::config::{ExecutorConfig, LoadConfig};
use crate::error::{Error, Result};
use crate::runtime::{ContainerRuntime, DockerRuntime, ImageLabelDetector};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Builds the backends a deployment is made of.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    /// Provisions one local replica and waits until it is ready.
    async fn create_local(&self, config: &LoadConfig, spec: &InstanceSpec) -> Result<Arc<dyn EnvBackend>>;

    /// Binds to an environment that already runs elsewhere.
    async fn connect_remote(&self, config: &LoadConfig) -> Result<Arc<dyn EnvBackend>>;
}

/// Docker-backed local containers and HTTP-addressed remote environments.
pub struct DefaultBackendFactory {
    runtime: Arc<dyn ContainerRuntime>,
    detector: Arc<dyn EnvTypeDetector>,
    executor: ExecutorConfig,
}

impl DefaultBackendFactory {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, executor: ExecutorConfig) -> Self {
        let detector = Arc::new(ImageLabelDetector::new(runtime.clone()));
        Self {
            runtime,
            detector,
            executor,
        }
    }

    pub fn with_detector(mut self, detector: Arc<dyn EnvTypeDetector>) -> Self {
        self.detector = detector;
        self
    }
}

impl Default for DefaultBackendFactory {
    fn default() -> Self {
        Self::new(Arc::new(DockerRuntime::new()), ExecutorConfig::default())
    }
}

#[async_trait]
impl BackendFactory for DefaultBackendFactory {
    async fn create_local(&self, config: &LoadConfig, spec: &InstanceSpec) -> Result<Arc<dyn EnvBackend>> {
        let mut options = LocalBackendOptions::new(config.image.clone(), spec.port);
        options.host = spec.host.clone();
        options.container_name = spec.container_name.clone();
        options.env_vars = config.env_vars.clone();
        let env_type = match config.env_type {
            Some(env_type) => env_type,
            None => {
                let env_type = self.detector.detect(&config.image).await;
                debug!(image = %config.image, %env_type, "Detected environment type");
                env_type
            }
        };
        options.env_type = Some(env_type);
        options.startup_timeout = Some(config.startup_timeout(env_type));
        options.force_recreate = config.force_recreate;
        options.pull = config.pull;
        options.executor = self.executor.clone();

        let backend = LocalBackend::start(options, self.runtime.clone(), self.detector.as_ref()).await?;
        Ok(Arc::new(backend))
    }

    async fn connect_remote(&self, config: &LoadConfig) -> Result<Arc<dyn EnvBackend>> {
        let remote_url = config
            .remote_url
            .as_ref()
            .ok_or_else(|| Error::Validation("remote mode requires remote_url".into()))?;
        let env_type = config.env_type.unwrap_or(EnvType::FunctionBased);

        let backend = RemoteBackend::connect(&config.image, remote_url, env_type, &self.executor).await?;
        Ok(Arc::new(backend))
    }
}
