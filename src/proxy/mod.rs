//
// src/proxy/mod.rs
//
mod instance;
mod pool;
#[allow(clippy::module_inception)]
mod proxy;
mod typed;

pub use instance::{Instance, InstanceStats};
pub use pool::{InstancePool, PoolStats};
pub use proxy::{EnvironmentProxy, ProxyState, FIXED_OPERATIONS};
