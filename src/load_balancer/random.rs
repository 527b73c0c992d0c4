// src/load_balancer/random.rs
use crate::load_balancer::LoadBalancer;
use crate::proxy::Instance;
use rand::seq::SliceRandom;
use std::sync::Arc;

/// Uniform choice among candidates.
#[derive(Debug, Default)]
pub struct RandomBalancer;

impl RandomBalancer {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for RandomBalancer {
    fn select_instance(&self, candidates: &[Arc<Instance>]) -> Option<Arc<Instance>> {
        candidates.choose(&mut rand::thread_rng()).cloned()
    }

    fn name(&self) -> &'static str {
        "random"
    }
}
