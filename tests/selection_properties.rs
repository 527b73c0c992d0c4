// tests/selection_properties.rs
use async_trait::async_trait;
use envfleet::deploy::DeploymentPlan;
use envfleet::load_balancer::{LoadBalancer, RandomBalancer, RoundRobinBalancer};
use envfleet::proxy::Instance;
use envfleet::{CallArgs, EnvBackend, Error, LoadConfig, Result};
use proptest::prelude::*;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

struct NullBackend;

#[async_trait]
impl EnvBackend for NullBackend {
    fn name(&self) -> &str {
        "null"
    }

    async fn setup(&self, _env_vars: &HashMap<String, String>) -> Result<()> {
        Ok(())
    }

    async fn call_method(&self, _method: &str, _call: CallArgs, _timeout: Option<Duration>) -> Result<Value> {
        Ok(Value::Null)
    }

    async fn list_methods(&self) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    fn is_ready(&self) -> bool {
        true
    }
}

fn instances(k: usize) -> Vec<Arc<Instance>> {
    (0..k)
        .map(|i| Arc::new(Instance::new("localhost", 9000 + i as u16, Arc::new(NullBackend))))
        .collect()
}

proptest! {
    #[test]
    fn round_robin_visits_every_instance_once_per_cycle(k in 1usize..16, offset in 0usize..50) {
        let lb = RoundRobinBalancer::new();
        let pool = instances(k);
        for _ in 0..offset {
            lb.select_instance(&pool);
        }

        let ports: HashSet<u16> = (0..k).map(|_| lb.select_instance(&pool).unwrap().port).collect();
        prop_assert_eq!(ports.len(), k);
    }

    #[test]
    fn random_only_picks_from_candidates(k in 1usize..8, draws in 1usize..64) {
        let lb = RandomBalancer::new();
        let pool = instances(k);
        let allowed: HashSet<u16> = pool.iter().map(|i| i.port).collect();

        for _ in 0..draws {
            let picked = lb.select_instance(&pool).unwrap();
            prop_assert!(allowed.contains(&picked.port));
        }
    }

    #[test]
    fn plan_ports_are_contiguous_from_base(replicas in 1usize..32, base_port in 1024u16..60000) {
        let plan = DeploymentPlan::resolve(&LoadConfig::new("x").replicas(replicas).base_port(base_port)).unwrap();

        prop_assert_eq!(plan.instances.len(), replicas);
        for (i, spec) in plan.instances.iter().enumerate() {
            prop_assert_eq!(spec.index, i);
            prop_assert_eq!(spec.port as usize, base_port as usize + i);
        }
    }

    #[test]
    fn short_host_lists_are_always_rejected(replicas in 2usize..10, supplied in 1usize..10) {
        prop_assume!(supplied < replicas);
        let hosts = vec!["localhost"; supplied];
        let result = DeploymentPlan::resolve(&LoadConfig::new("x").replicas(replicas).hosts(hosts));
        prop_assert!(matches!(result, Err(Error::Validation(_))));
    }
}
