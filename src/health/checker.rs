// src/health/checker.rs
use crate::backend::EnvBackend;
use crate::config::HealthCheckConfig;
use crate::proxy::{Instance, InstancePool};
use std::sync::Arc;
use tokio::time::{interval, timeout, Instant};
use tracing::{debug, error, info, warn};

/// Periodically probes every member of one pool.
pub struct HealthChecker {
    config: HealthCheckConfig,
    pool: Arc<InstancePool>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

#[derive(Debug)]
pub struct HealthCheckResult {
    pub instance: String,
    pub healthy: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
    pub evicted: bool,
}

impl HealthChecker {
    pub fn new(config: HealthCheckConfig, pool: Arc<InstancePool>) -> Self {
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        Self {
            config,
            pool,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Runs until `shutdown` is called or the pool is cleaned up.
    pub async fn start(self: Arc<Self>) {
        let mut interval = interval(self.config.interval());
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!(
            pool = %self.pool.name(),
            "Starting health checker with interval: {:?}",
            self.config.interval()
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.pool.is_closed() {
                        debug!("Pool closed, stopping health checker");
                        break;
                    }
                    self.clone().check_all_instances().await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Health checker shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn check_all_instances(self: Arc<Self>) -> Vec<HealthCheckResult> {
        let instances = self.pool.instances();
        let mut tasks = Vec::new();

        for instance in instances {
            let checker = self.clone();
            tasks.push(tokio::spawn(async move { checker.check_instance(instance).await }));
        }

        let results = futures::future::join_all(tasks).await;

        let mut checked = Vec::new();
        let mut healthy_count = 0;
        let mut unhealthy_count = 0;

        for result in results {
            match result {
                Ok(check_result) => {
                    if check_result.healthy {
                        healthy_count += 1;
                        debug!("Instance {} is healthy", check_result.instance);
                    } else {
                        unhealthy_count += 1;
                        warn!(
                            "Instance {} is unhealthy: {:?}",
                            check_result.instance, check_result.error
                        );
                    }
                    checked.push(check_result);
                }
                Err(e) => {
                    error!("Task join error: {}", e);
                    unhealthy_count += 1;
                }
            }
        }

        debug!(
            "Health check complete: {} healthy, {} unhealthy",
            healthy_count, unhealthy_count
        );
        checked
    }

    async fn check_instance(&self, instance: Arc<Instance>) -> HealthCheckResult {
        let start = Instant::now();

        let (healthy, error) = match timeout(self.config.timeout(), instance.backend.health_check()).await {
            Ok(true) => (true, None),
            Ok(false) => (false, Some("health probe failed".to_string())),
            Err(_) => (false, Some("health probe timed out".to_string())),
        };
        let response_time_ms = start.elapsed().as_millis() as u64;

        self.pool.record_probe(&instance, healthy);

        let evicted = !healthy
            && self.config.evict_after > 0
            && instance.consecutive_failures() >= self.config.evict_after
            && self.pool.evict(&instance).await;

        HealthCheckResult {
            instance: instance.address(),
            healthy,
            response_time_ms,
            error,
            evicted,
        }
    }
}
