//! Deployment orchestration: plan, build replicas concurrently, roll back on failure.

mod deployer;
mod factory;
mod plan;

pub use deployer::Deployer;
pub use factory::{BackendFactory, DefaultBackendFactory};
pub use plan::{sanitize_image, DeploymentPlan, InstanceSpec};
