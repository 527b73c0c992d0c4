// src/load_balancer/round_robin.rs
use crate::load_balancer::LoadBalancer;
use crate::proxy::Instance;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Rotates through candidates. The cursor survives across calls and is
/// re-normalized against the current candidate count on every pick.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn select_instance(&self, candidates: &[Arc<Instance>]) -> Option<Arc<Instance>> {
        if candidates.is_empty() {
            return None;
        }

        let index = self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(candidates[index].clone())
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
