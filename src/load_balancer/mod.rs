// src/load_balancer/mod.rs
mod algorithm;
mod random;
mod round_robin;

pub use algorithm::{LoadBalancer, Strategy};
pub use random::RandomBalancer;
pub use round_robin::RoundRobinBalancer;

use std::sync::Arc;

pub fn create_load_balancer(strategy: Strategy) -> Arc<dyn LoadBalancer> {
    match strategy {
        Strategy::RoundRobin => Arc::new(RoundRobinBalancer::new()),
        Strategy::Random => Arc::new(RandomBalancer::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::Instance;
    use crate::testing::StaticBackend;
    use std::collections::HashSet;

    fn instances(n: u16) -> Vec<Arc<Instance>> {
        (0..n)
            .map(|i| {
                Arc::new(Instance::new(
                    "localhost",
                    8000 + i,
                    Arc::new(StaticBackend::new(&format!("b{}", i))),
                ))
            })
            .collect()
    }

    #[test]
    fn factory_honours_strategy() {
        assert_eq!(create_load_balancer(Strategy::RoundRobin).name(), "round_robin");
        assert_eq!(create_load_balancer(Strategy::Random).name(), "random");
    }

    #[test]
    fn round_robin_visits_each_once_per_cycle() {
        let lb = RoundRobinBalancer::new();
        let pool = instances(4);

        let ports: HashSet<u16> = (0..4).map(|_| lb.select_instance(&pool).unwrap().port).collect();
        assert_eq!(ports.len(), 4);
    }

    #[test]
    fn round_robin_survives_shrinking_candidates() {
        let lb = RoundRobinBalancer::new();
        let pool = instances(5);
        for _ in 0..4 {
            lb.select_instance(&pool);
        }

        let smaller = &pool[..2];
        for _ in 0..10 {
            let picked = lb.select_instance(smaller).unwrap();
            assert!(picked.port < 8002);
        }
    }

    #[test]
    fn empty_candidates_select_nothing() {
        assert!(RandomBalancer::new().select_instance(&[]).is_none());
        assert!(RoundRobinBalancer::new().select_instance(&[]).is_none());
    }
}
