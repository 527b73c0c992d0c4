// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use envfleet::config::LoadConfig;
use envfleet::deploy::{BackendFactory, InstanceSpec};
use envfleet::{CallArgs, EnvBackend, Error, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Backend that answers with its own name and tracks the live count it shares with its factory.
pub struct MockBackend {
    name: String,
    port: u16,
    ready: AtomicBool,
    fail_calls: AtomicBool,
    calls: AtomicUsize,
    live: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_calls.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl EnvBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn setup(&self, _env_vars: &HashMap<String, String>) -> Result<()> {
        Ok(())
    }

    async fn call_method(&self, method: &str, call: CallArgs, _timeout: Option<Duration>) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_calls.load(Ordering::SeqCst) {
            return Err(Error::Execution(format!("{} is broken", self.name)));
        }
        Ok(json!({
            "instance": self.name,
            "port": self.port,
            "method": method,
            "args": call.args,
            "kwargs": call.kwargs,
        }))
    }

    async fn list_methods(&self) -> Result<Vec<Value>> {
        Ok(vec![json!({"name": "evaluate", "signature": "(task_type, num_samples=1)"})])
    }

    async fn cleanup(&self) -> Result<()> {
        if self.ready.swap(false, Ordering::SeqCst) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Factory that hands out [`MockBackend`]s and can fail chosen replicas.
#[derive(Default)]
pub struct MockFactory {
    fail_indices: Vec<usize>,
    delay: Option<Duration>,
    attempts: AtomicUsize,
    live: Arc<AtomicUsize>,
    created: Mutex<Vec<Arc<MockBackend>>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_at(indices: &[usize]) -> Self {
        Self {
            fail_indices: indices.to_vec(),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Backends constructed and not yet cleaned up.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<Arc<MockBackend>> {
        self.created.lock().unwrap().clone()
    }

    fn build(&self, name: String, port: u16) -> Arc<MockBackend> {
        self.live.fetch_add(1, Ordering::SeqCst);
        let backend = Arc::new(MockBackend {
            name,
            port,
            ready: AtomicBool::new(true),
            fail_calls: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            live: self.live.clone(),
        });
        self.created.lock().unwrap().push(backend.clone());
        backend
    }
}

#[async_trait]
impl BackendFactory for MockFactory {
    async fn create_local(&self, config: &LoadConfig, spec: &InstanceSpec) -> Result<Arc<dyn EnvBackend>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay * spec.index as u32).await;
        }
        if self.fail_indices.contains(&spec.index) {
            return Err(Error::Container(format!("failed to start replica {}", spec.index)));
        }
        let name = spec
            .container_name
            .clone()
            .unwrap_or_else(|| format!("{}-single", config.image));
        Ok(self.build(name, spec.port))
    }

    async fn connect_remote(&self, config: &LoadConfig) -> Result<Arc<dyn EnvBackend>> {
        Ok(self.build(format!("remote-{}", config.image), 0))
    }
}
