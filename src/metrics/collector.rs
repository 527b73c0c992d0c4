// src/metrics/collector.rs
use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    /// Text exposition of every registered metric.
    pub fn gather(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            warn!("Failed to encode metrics: {}", e);
        }
        buffer
    }
}

pub struct MetricsCollector {
    // Call metrics
    pub calls_total: IntCounterVec,
    pub call_duration_seconds: HistogramVec,

    // Deployment metrics
    pub deployments_total: IntCounterVec,

    // Pool metrics
    pub instances_healthy: IntGaugeVec,
    pub instances_total: IntGaugeVec,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let calls_total = IntCounterVec::new(
            Opts::new("envfleet_calls_total", "Total number of forwarded method calls"),
            &["environment", "method", "status"],
        )?;
        registry.register(Box::new(calls_total.clone()))?;

        let call_duration_seconds = HistogramVec::new(
            HistogramOpts::new("envfleet_call_duration_seconds", "Method call duration in seconds"),
            &["environment", "method"],
        )?;
        registry.register(Box::new(call_duration_seconds.clone()))?;

        let deployments_total = IntCounterVec::new(
            Opts::new("envfleet_deployments_total", "Total deployments by outcome"),
            &["image", "status"],
        )?;
        registry.register(Box::new(deployments_total.clone()))?;

        let instances_healthy = IntGaugeVec::new(
            Opts::new("envfleet_instances_healthy", "Healthy instances per environment"),
            &["environment"],
        )?;
        registry.register(Box::new(instances_healthy.clone()))?;

        let instances_total = IntGaugeVec::new(
            Opts::new("envfleet_instances_total", "Total instances per environment"),
            &["environment"],
        )?;
        registry.register(Box::new(instances_total.clone()))?;

        Ok(Self {
            calls_total,
            call_duration_seconds,
            deployments_total,
            instances_healthy,
            instances_total,
        })
    }

    pub fn record_call(&self, environment: &str, method: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "failure" };
        self.calls_total
            .with_label_values(&[environment, method, status])
            .inc();

        self.call_duration_seconds
            .with_label_values(&[environment, method])
            .observe(duration.as_secs_f64());
    }

    pub fn record_deployment(&self, image: &str, success: bool) {
        let status = if success { "success" } else { "failure" };
        self.deployments_total
            .with_label_values(&[image, status])
            .inc();
    }

    pub fn update_pool_health(&self, environment: &str, healthy: usize, total: usize) {
        self.instances_healthy
            .with_label_values(&[environment])
            .set(healthy as i64);
        self.instances_total
            .with_label_values(&[environment])
            .set(total as i64);
    }
}

// Helper for timing operations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_exposes_recorded_series() {
        let registry = MetricsRegistry::new().unwrap();
        let metrics = registry.collector();

        metrics.record_call("affine-pool", "evaluate", true, Duration::from_millis(12));
        metrics.record_deployment("affine:latest", false);
        metrics.update_pool_health("affine-pool", 2, 3);

        let text = String::from_utf8(registry.gather()).unwrap();
        assert!(text.contains(r#"envfleet_calls_total{environment="affine-pool",method="evaluate",status="success"} 1"#));
        assert!(text.contains(r#"envfleet_deployments_total{image="affine:latest",status="failure"} 1"#));
        assert!(text.contains(r#"envfleet_instances_healthy{environment="affine-pool"} 2"#));
    }
}
