// src/proxy/proxy.rs
use super::PoolStats;
use crate::backend::{describe_methods, CallArgs, EnvBackend};
use crate::error::{Error, Result};
use crate::metrics::{MetricsCollector, Timer};
use crate::registry::Registry;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Operations the proxy answers itself instead of forwarding.
pub const FIXED_OPERATIONS: [&str; 4] = ["cleanup", "list_methods", "is_ready", "get_stats"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Constructed,
    Ready,
    CleanedUp,
}

impl ProxyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ProxyState::Constructed,
            1 => ProxyState::Ready,
            _ => ProxyState::CleanedUp,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ProxyState::Constructed => 0,
            ProxyState::Ready => 1,
            ProxyState::CleanedUp => 2,
        }
    }
}

/// Caller-facing handle that forwards calls by name to a backend or pool.
///
/// `CleanedUp` is terminal. Every forward after cleanup fails with
/// [`Error::Environment`] without reaching the backend.
pub struct EnvironmentProxy {
    name: String,
    backend: Arc<dyn EnvBackend>,
    state: AtomicU8,
    metrics: Option<Arc<MetricsCollector>>,
    registry: OnceLock<Weak<Registry>>,
}

impl EnvironmentProxy {
    pub fn new(backend: Arc<dyn EnvBackend>) -> Self {
        let initial = if backend.is_ready() {
            ProxyState::Ready
        } else {
            ProxyState::Constructed
        };

        Self {
            name: backend.name().to_string(),
            backend,
            state: AtomicU8::new(initial.as_u8()),
            metrics: None,
            registry: OnceLock::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Lets `cleanup` remove this proxy from the registry that holds it.
    pub(crate) fn attach_registry(&self, registry: Weak<Registry>) {
        if self.registry.set(registry).is_err() {
            debug!(environment = %self.name, "Proxy already attached to a registry");
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> &Arc<dyn EnvBackend> {
        &self.backend
    }

    pub fn state(&self) -> ProxyState {
        let current = ProxyState::from_u8(self.state.load(Ordering::SeqCst));
        if current == ProxyState::Constructed && self.backend.is_ready() {
            let _ = self.state.compare_exchange(
                ProxyState::Constructed.as_u8(),
                ProxyState::Ready.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
            return ProxyState::from_u8(self.state.load(Ordering::SeqCst));
        }
        current
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ProxyState::Ready && self.backend.is_ready()
    }

    fn ensure_ready(&self, method: Option<&str>) -> Result<()> {
        match self.state() {
            ProxyState::CleanedUp => Err(Error::environment(
                &self.name,
                method,
                "environment has been cleaned up",
            )),
            _ if !self.backend.is_ready() => {
                let message = match self.backend.pool_stats() {
                    Some(stats) => format!(
                        "No healthy instances available ({} instances in pool)",
                        stats.total_instances
                    ),
                    None => "Environment not ready. Call setup() first.".to_string(),
                };
                Err(Error::environment(&self.name, method, message))
            }
            _ => Ok(()),
        }
    }

    /// Forwards `method`; a `timeout` keyword bounds the call and is not forwarded.
    pub async fn call(&self, method: &str, mut call: CallArgs) -> Result<Value> {
        let timeout = call
            .take_timeout()
            .map_err(|e| Error::wrap_call(&self.name, method, e))?;
        self.call_with_timeout(method, call, timeout).await
    }

    pub async fn call_with_timeout(
        &self,
        method: &str,
        call: CallArgs,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        if method.starts_with('_') {
            return Err(Error::environment(
                &self.name,
                Some(method),
                format!("'{}' is private and cannot be forwarded", method),
            ));
        }
        self.ensure_ready(Some(method))?;

        let request_id = Uuid::new_v4();
        let span = info_span!("call", environment = %self.name, %method, %request_id);
        let timer = Timer::new();

        let result = async {
            debug!(args = call.args.len(), kwargs = call.kwargs.len(), ?timeout, "Forwarding call");
            self.backend.call_method(method, call, timeout).await
        }
        .instrument(span)
        .await;

        if let Some(metrics) = &self.metrics {
            metrics.record_call(&self.name, method, result.is_ok(), timer.elapsed());
        }

        result.map_err(|e| Error::wrap_call(&self.name, method, e))
    }

    /// Invoke-by-name: fixed operations run here, anything else is forwarded.
    pub async fn invoke(&self, name: &str, call: CallArgs) -> Result<Value> {
        match name {
            "cleanup" => {
                self.cleanup().await;
                Ok(Value::Null)
            }
            "list_methods" => Ok(Value::Array(self.list_methods().await?)),
            "is_ready" => Ok(Value::Bool(self.is_ready())),
            "get_stats" => serde_json::to_value(self.get_stats())
                .map_err(|e| Error::environment(&self.name, Some(name), e.to_string())),
            _ => self.call(name, call).await,
        }
    }

    /// Raw descriptors, passed through unmodified.
    pub async fn list_methods(&self) -> Result<Vec<Value>> {
        self.ensure_ready(Some("list_methods"))?;
        self.backend
            .list_methods()
            .await
            .map_err(|e| Error::wrap_call(&self.name, "list_methods", e))
    }

    /// Human-readable rendering of [`list_methods`](Self::list_methods).
    pub async fn describe_methods(&self) -> Result<String> {
        let methods = self.list_methods().await?;
        Ok(describe_methods(&methods))
    }

    /// Idempotent. Backend errors are logged, never raised.
    pub async fn cleanup(&self) {
        let previous = self.state.swap(ProxyState::CleanedUp.as_u8(), Ordering::SeqCst);
        if ProxyState::from_u8(previous) == ProxyState::CleanedUp {
            return;
        }

        info!(environment = %self.name, "Cleaning up environment");
        if let Err(e) = self.backend.cleanup().await {
            warn!(environment = %self.name, "Error during cleanup: {}", e);
        }

        if let Some(registry) = self.registry.get().and_then(Weak::upgrade) {
            registry.remove_proxy(self);
        }
    }

    /// Pool statistics, or `None` for a single backend.
    pub fn get_stats(&self) -> Option<PoolStats> {
        self.backend.pool_stats()
    }
}

impl fmt::Display for EnvironmentProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.state() {
            ProxyState::CleanedUp => "cleaned up",
            _ if self.is_ready() => "ready",
            _ => "not ready",
        };
        match self.get_stats() {
            Some(stats) => write!(
                f,
                "<EnvironmentProxy '{}' (pool: {}/{} healthy, {})>",
                self.name, stats.healthy_instances, stats.total_instances, status
            ),
            None => write!(f, "<EnvironmentProxy '{}' ({})>", self.name, status),
        }
    }
}

impl fmt::Debug for EnvironmentProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentProxy")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
