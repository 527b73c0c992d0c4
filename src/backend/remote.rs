// src/backend/remote.rs
use super::{with_timeout, CallArgs, EnvBackend, EnvType};
use crate::config::ExecutorConfig;
use crate::error::{Error, Result};
use crate::executor::{Executor, HttpExecutor};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

/// An environment that already runs elsewhere, located by its id.
///
/// Nothing is provisioned; cleanup only releases the client.
pub struct RemoteBackend {
    name: String,
    environment_id: String,
    executor: ArcSwapOption<HttpExecutor>,
    env_vars: Mutex<BTreeMap<String, String>>,
    ready: AtomicBool,
}

impl RemoteBackend {
    pub async fn connect(
        environment_id: &str,
        remote_url: &Url,
        env_type: EnvType,
        config: &ExecutorConfig,
    ) -> Result<Self> {
        let endpoint = format!("{}/{}", remote_url.as_str().trim_end_matches('/'), environment_id);
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| Error::Validation(format!("invalid remote endpoint {}: {}", endpoint, e)))?;

        let executor = HttpExecutor::new(endpoint.clone(), env_type, config)?;
        if !executor.health_check().await {
            return Err(Error::Connection(format!(
                "environment '{}' is not reachable at {}",
                environment_id, endpoint
            )));
        }

        let name = format!("remote-{}-{}", environment_id, Utc::now().timestamp());
        info!(%name, %endpoint, "Remote backend connected");

        Ok(Self {
            name,
            environment_id: environment_id.to_string(),
            executor: ArcSwapOption::from_pointee(executor),
            env_vars: Mutex::new(BTreeMap::new()),
            ready: AtomicBool::new(true),
        })
    }

    pub fn environment_id(&self) -> &str {
        &self.environment_id
    }

    fn executor(&self) -> Result<Arc<HttpExecutor>> {
        if !self.is_ready() {
            return Err(Error::Connection(format!("backend {} is closed", self.name)));
        }
        self.executor
            .load_full()
            .ok_or_else(|| Error::Connection(format!("backend {} is closed", self.name)))
    }
}

#[async_trait]
impl EnvBackend for RemoteBackend {
    fn name(&self) -> &str {
        &self.name
    }

    /// Remote environments are configured where they are deployed; this
    /// records the values and verifies the target is reachable.
    async fn setup(&self, env_vars: &HashMap<String, String>) -> Result<()> {
        let executor = self
            .executor()
            .map_err(|e| Error::Setup(e.to_string()))?;

        let mut current = self.env_vars.lock().await;
        if env_vars.iter().all(|(k, v)| current.get(k) == Some(v)) {
            return Ok(());
        }
        if !executor.health_check().await {
            return Err(Error::Setup(format!(
                "environment '{}' is unreachable",
                self.environment_id
            )));
        }
        current.extend(env_vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn call_method(&self, method: &str, call: CallArgs, timeout: Option<Duration>) -> Result<Value> {
        let executor = self.executor()?;
        debug!(backend = %self.name, %method, "Calling remote method");
        with_timeout(method, timeout, executor.invoke(method, &call, timeout)).await
    }

    async fn list_methods(&self) -> Result<Vec<Value>> {
        self.executor()?.list_methods().await
    }

    async fn cleanup(&self) -> Result<()> {
        if self.ready.swap(false, Ordering::SeqCst) {
            info!(backend = %self.name, "Closing remote backend");
        }
        self.executor.store(None);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn health_check(&self) -> bool {
        match self.executor() {
            Ok(executor) => executor.health_check().await,
            Err(_) => false,
        }
    }
}
