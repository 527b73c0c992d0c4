//! Container runtime collaborator.
//!
//! # Responsibilities
//! - Start, stop and inspect the containers backing local environments
//! - Resolve container-name collisions (reuse, restart or recreate)
//! - Expose image labels for environment type detection

mod docker;

pub use docker::DockerRuntime;

use crate::backend::{EnvType, EnvTypeDetector};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Image label carrying the environment's method-discovery scheme.
pub const ENV_TYPE_LABEL: &str = "envfleet.env.type";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

/// Everything the runtime needs to bring one container up.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub image: String,
    pub name: String,
    /// `(host_port, container_port)` pairs to publish.
    pub ports: Vec<(u16, u16)>,
    pub env: BTreeMap<String, String>,
    /// Remove an existing container of the same name instead of reusing it.
    pub force_recreate: bool,
    /// Pull the image before starting.
    pub pull: bool,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Fails with `ImageNotFound` or `Container`.
    async fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle>;

    async fn stop(&self, handle: &ContainerHandle) -> Result<()>;

    async fn get_ip(&self, handle: &ContainerHandle) -> Result<String>;

    async fn wait_for_port(&self, handle: &ContainerHandle, port: u16, timeout: Duration) -> Result<bool>;

    /// Returns `(exit_code, combined output)`.
    async fn exec(&self, handle: &ContainerHandle, command: &[String]) -> Result<(i32, String)>;

    async fn logs(&self, handle: &ContainerHandle, tail: usize) -> Result<String>;

    async fn image_label(&self, image: &str, key: &str) -> Result<Option<String>>;
}

/// Reads the env type from an image label, defaulting to function-based.
pub struct ImageLabelDetector {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ImageLabelDetector {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl EnvTypeDetector for ImageLabelDetector {
    async fn detect(&self, image: &str) -> EnvType {
        match self.runtime.image_label(image, ENV_TYPE_LABEL).await {
            Ok(Some(label)) => label.parse().unwrap_or_else(|e| {
                tracing::warn!(%image, %label, "{}; defaulting to function_based", e);
                EnvType::FunctionBased
            }),
            Ok(None) => EnvType::FunctionBased,
            Err(e) => {
                tracing::warn!(%image, "Failed to read env type label: {}, defaulting to function_based", e);
                EnvType::FunctionBased
            }
        }
    }
}
