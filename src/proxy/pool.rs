// src/proxy/pool.rs
use super::instance::{Instance, InstanceStats};
use crate::backend::{CallArgs, EnvBackend};
use crate::error::{Error, Result};
use crate::load_balancer::{create_load_balancer, LoadBalancer, Strategy};
use crate::metrics::MetricsCollector;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Read-only snapshot of a pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    pub total_instances: usize,
    pub healthy_instances: usize,
    pub unhealthy_instances: usize,
    pub total_requests: u64,
    pub strategy: Strategy,
    pub instances: Vec<InstanceStats>,
}

/// Homogeneous instances presented as one backend.
///
/// Never empty: eviction keeps the last instance, and a pool whose members
/// are all unhealthy fails calls instead of degrading.
pub struct InstancePool {
    name: String,
    instances: ArcSwap<Vec<Arc<Instance>>>,
    strategy: Strategy,
    balancer: Arc<dyn LoadBalancer>,
    healthy_threshold: u32,
    unhealthy_threshold: u32,
    closed: AtomicBool,
    metrics: Option<Arc<MetricsCollector>>,
}

impl InstancePool {
    pub fn new(name: impl Into<String>, instances: Vec<Instance>, strategy: Strategy) -> Result<Self> {
        if instances.is_empty() {
            return Err(Error::Backend(
                "Cannot create InstancePool with empty instances list".into(),
            ));
        }

        let name = name.into();
        info!(
            pool = %name,
            instances = instances.len(),
            strategy = strategy.as_str(),
            "InstancePool created"
        );
        for (i, inst) in instances.iter().enumerate() {
            debug!(pool = %name, "  Instance {}: {}", i, inst);
        }

        Ok(Self {
            name,
            instances: ArcSwap::from_pointee(instances.into_iter().map(Arc::new).collect()),
            strategy,
            balancer: create_load_balancer(strategy),
            healthy_threshold: 1,
            unhealthy_threshold: 1,
            closed: AtomicBool::new(false),
            metrics: None,
        })
    }

    pub fn with_thresholds(mut self, healthy_threshold: u32, unhealthy_threshold: u32) -> Self {
        self.healthy_threshold = healthy_threshold.max(1);
        self.unhealthy_threshold = unhealthy_threshold.max(1);
        self
    }

    pub fn with_metrics(self, metrics: Arc<MetricsCollector>) -> Self {
        let pool = Self {
            metrics: Some(metrics),
            ..self
        };
        pool.publish_health();
        pool
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Snapshot of the current members.
    pub fn instances(&self) -> Vec<Arc<Instance>> {
        self.instances.load().as_ref().clone()
    }

    pub fn len(&self) -> usize {
        self.instances.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn healthy_count(&self) -> usize {
        self.instances.load().iter().filter(|i| i.is_healthy()).count()
    }

    /// Set once cleanup has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn get_stats(&self) -> PoolStats {
        let instances = self.instances.load();
        let healthy = instances.iter().filter(|i| i.is_healthy()).count();

        PoolStats {
            total_instances: instances.len(),
            healthy_instances: healthy,
            unhealthy_instances: instances.len() - healthy,
            total_requests: instances.iter().map(|i| i.request_count()).sum(),
            strategy: self.strategy,
            instances: instances.iter().map(|i| i.stats()).collect(),
        }
    }

    fn select(&self) -> Result<Arc<Instance>> {
        let candidates: Vec<Arc<Instance>> = self
            .instances
            .load()
            .iter()
            .filter(|i| i.is_selectable())
            .cloned()
            .collect();

        self.balancer.select_instance(&candidates).ok_or_else(|| {
            Error::Backend(format!(
                "No healthy instances available in pool '{}'. All instances failed health check",
                self.name
            ))
        })
    }

    /// Applies a probe outcome to one member.
    pub(crate) fn record_probe(&self, instance: &Instance, healthy: bool) {
        if healthy {
            if instance.record_success(self.healthy_threshold) {
                info!(pool = %self.name, instance = %instance.address(), "Instance is healthy again");
                self.publish_health();
            }
        } else if instance.record_failure(self.unhealthy_threshold) {
            warn!(
                pool = %self.name,
                instance = %instance.address(),
                failures = instance.consecutive_failures(),
                "Instance marked unhealthy"
            );
            self.publish_health();
        }
    }

    /// Removes `target` and cleans up its backend. The last member is never evicted.
    pub(crate) async fn evict(&self, target: &Arc<Instance>) -> bool {
        let mut removed = false;
        self.instances.rcu(|current| {
            removed = current.len() > 1 && current.iter().any(|i| Arc::ptr_eq(i, target));
            if !removed {
                return Arc::clone(current);
            }
            Arc::new(
                current
                    .iter()
                    .filter(|i| !Arc::ptr_eq(i, target))
                    .cloned()
                    .collect::<Vec<_>>(),
            )
        });

        if removed {
            warn!(pool = %self.name, instance = %target.address(), "Evicting instance after sustained failures");
            if let Err(e) = target.backend.cleanup().await {
                warn!(pool = %self.name, instance = %target.address(), "Failed to cleanup evicted instance: {}", e);
            }
            self.publish_health();
        }
        removed
    }

    fn publish_health(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.update_pool_health(&self.name, self.healthy_count(), self.len());
        }
    }
}

#[async_trait]
impl EnvBackend for InstancePool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn setup(&self, env_vars: &HashMap<String, String>) -> Result<()> {
        let instances = self.instances();
        let results = join_all(instances.iter().map(|i| i.backend.setup(env_vars))).await;

        let failures: Vec<String> = instances
            .iter()
            .zip(results)
            .filter_map(|(inst, result)| result.err().map(|e| format!("{}: {}", inst.address(), e)))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Setup(format!(
                "{} of {} instances failed setup: {}",
                failures.len(),
                instances.len(),
                failures.join("; ")
            )))
        }
    }

    async fn call_method(&self, method: &str, call: CallArgs, timeout: Option<Duration>) -> Result<Value> {
        let instance = self.select()?;
        debug!(pool = %self.name, %method, instance = %instance.address(), "Routing call");

        match instance.backend.call_method(method, call, timeout).await {
            Ok(result) => {
                instance.record_request();
                instance.record_success(self.healthy_threshold);
                Ok(result)
            }
            Err(e) => {
                error!(pool = %self.name, %method, instance = %instance, "Method failed: {}", e);
                self.record_probe(&instance, false);
                Err(e)
            }
        }
    }

    async fn list_methods(&self) -> Result<Vec<Value>> {
        let instances = self.instances();
        let results = join_all(instances.iter().map(|i| i.backend.list_methods())).await;

        let mut last_error = None;
        for result in results {
            match result {
                Ok(methods) => return Ok(methods),
                Err(e) => last_error = Some(e),
            }
        }
        Err(Error::Backend(format!(
            "Failed to list methods: {}",
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn cleanup(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let instances = self.instances();
        info!(pool = %self.name, instances = instances.len(), "Cleaning up instance pool");

        let results = join_all(instances.iter().map(|i| i.backend.cleanup())).await;
        let failures: Vec<String> = instances
            .iter()
            .zip(results)
            .filter_map(|(inst, result)| {
                result.err().map(|e| {
                    warn!(pool = %self.name, instance = %inst, "Failed to cleanup instance: {}", e);
                    format!("{}: {}", inst.address(), e)
                })
            })
            .collect();

        self.publish_health();
        if failures.is_empty() {
            info!(pool = %self.name, "Instance pool cleanup completed");
            Ok(())
        } else {
            Err(Error::Backend(format!(
                "{} of {} instances failed cleanup: {}",
                failures.len(),
                instances.len(),
                failures.join("; ")
            )))
        }
    }

    fn is_ready(&self) -> bool {
        !self.is_closed() && self.instances.load().iter().any(|i| i.is_selectable())
    }

    fn pool_stats(&self) -> Option<PoolStats> {
        Some(self.get_stats())
    }
}
