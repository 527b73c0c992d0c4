// src/load_balancer/algorithm.rs
use crate::proxy::Instance;
use std::sync::Arc;

/// Picks one instance out of an already-filtered candidate set.
pub trait LoadBalancer: Send + Sync {
    /// `None` only when `candidates` is empty.
    fn select_instance(&self, candidates: &[Arc<Instance>]) -> Option<Arc<Instance>>;

    fn name(&self) -> &'static str;
}

pub use crate::config::Strategy;
