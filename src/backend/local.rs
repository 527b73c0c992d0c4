// src/backend/local.rs
use super::{with_timeout, CallArgs, EnvBackend, EnvType, EnvTypeDetector};
use crate::config::ExecutorConfig;
use crate::deploy::sanitize_image;
use crate::error::{Error, Result};
use crate::executor::{Executor, HttpExecutor};
use crate::runtime::{ContainerHandle, ContainerRuntime, ContainerSpec};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_CONTAINER_PORT: u16 = 8000;

/// Everything needed to provision one local instance.
#[derive(Debug, Clone)]
pub struct LocalBackendOptions {
    pub image: String,
    pub container_name: Option<String>,
    /// Host the instance's HTTP port is reached on.
    pub host: String,
    pub http_port: u16,
    /// Port the environment server listens on inside the container.
    pub container_port: u16,
    pub env_vars: BTreeMap<String, String>,
    pub env_type: Option<EnvType>,
    pub force_recreate: bool,
    pub pull: bool,
    pub startup_timeout: Option<Duration>,
    pub executor: ExecutorConfig,
}

impl LocalBackendOptions {
    pub fn new(image: impl Into<String>, http_port: u16) -> Self {
        Self {
            image: image.into(),
            container_name: None,
            host: "localhost".to_string(),
            http_port,
            container_port: DEFAULT_CONTAINER_PORT,
            env_vars: BTreeMap::new(),
            env_type: None,
            force_recreate: false,
            pull: false,
            startup_timeout: None,
            executor: ExecutorConfig::default(),
        }
    }
}

/// A container provisioned through the runtime and reached over HTTP.
pub struct LocalBackend {
    name: String,
    options: LocalBackendOptions,
    env_type: EnvType,
    runtime: Arc<dyn ContainerRuntime>,
    container: Mutex<Option<ContainerHandle>>,
    executor: ArcSwapOption<HttpExecutor>,
    env_vars: Mutex<BTreeMap<String, String>>,
    ready: AtomicBool,
    closed: AtomicBool,
}

/// `<image basename>-<YYYYMMDD-HHMMSS>`, with `:` made name-safe.
pub(crate) fn default_container_name(image: &str) -> String {
    format!("{}-{}", sanitize_image(image), Utc::now().format("%Y%m%d-%H%M%S"))
}

impl LocalBackend {
    /// Starts the container and waits until its HTTP server answers.
    pub async fn start(
        options: LocalBackendOptions,
        runtime: Arc<dyn ContainerRuntime>,
        detector: &dyn EnvTypeDetector,
    ) -> Result<Self> {
        let env_type = match options.env_type {
            Some(env_type) => {
                info!(image = %options.image, %env_type, "Environment type (provided)");
                env_type
            }
            None => {
                let env_type = detector.detect(&options.image).await;
                info!(image = %options.image, %env_type, "Environment type (detected)");
                env_type
            }
        };

        let name = options
            .container_name
            .clone()
            .unwrap_or_else(|| default_container_name(&options.image));

        let backend = Self {
            name,
            env_type,
            runtime,
            container: Mutex::new(None),
            executor: ArcSwapOption::empty(),
            env_vars: Mutex::new(options.env_vars.clone()),
            ready: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            options,
        };

        let force_recreate = backend.options.force_recreate;
        backend.provision(force_recreate).await?;
        Ok(backend)
    }

    pub fn env_type(&self) -> EnvType {
        self.env_type
    }

    pub fn http_port(&self) -> u16 {
        self.options.http_port
    }

    fn base_url(&self) -> Result<Url> {
        let host = &self.options.host;
        let host = if host.contains(':') {
            format!("[{}]", host)
        } else {
            host.clone()
        };
        Url::parse(&format!("http://{}:{}", host, self.options.http_port))
            .map_err(|e| Error::Setup(format!("invalid instance address: {}", e)))
    }

    async fn provision(&self, force_recreate: bool) -> Result<()> {
        let spec = ContainerSpec {
            image: self.options.image.clone(),
            name: self.name.clone(),
            ports: vec![(self.options.http_port, self.options.container_port)],
            env: self.env_vars.lock().await.clone(),
            force_recreate,
            pull: self.options.pull,
        };

        debug!(container = %self.name, image = %spec.image, "Starting container");
        let handle = self.runtime.start(&spec).await?;
        {
            // Cleanup may have run while the container was starting.
            let mut container = self.container.lock().await;
            if self.closed.load(Ordering::SeqCst) {
                drop(container);
                self.discard(&handle).await;
                return Err(self.closed_error());
            }
            *container = Some(handle.clone());
        }

        let executor = match HttpExecutor::new(self.base_url()?, self.env_type, &self.options.executor) {
            Ok(executor) => Arc::new(executor),
            Err(e) => {
                self.discard(&handle).await;
                return Err(e);
            }
        };

        let timeout = self
            .options
            .startup_timeout
            .unwrap_or_else(|| self.env_type.default_startup_timeout());
        debug!(port = self.options.http_port, ?timeout, "Waiting for HTTP server");

        if !wait_for_http_ready(executor.as_ref(), timeout).await {
            self.discard(&handle).await;
            return Err(Error::Backend(format!(
                "HTTP server of {} did not start within {:?}. Check container logs for errors",
                self.name, timeout
            )));
        }

        let container = self.container.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(self.closed_error());
        }
        self.executor.store(Some(executor));
        self.ready.store(true, Ordering::SeqCst);
        drop(container);

        debug!(container = %self.name, "Container started and HTTP server ready");
        Ok(())
    }

    fn closed_error(&self) -> Error {
        Error::Backend(format!("backend {} was cleaned up while starting", self.name))
    }

    async fn discard(&self, handle: &ContainerHandle) {
        if let Err(e) = self.runtime.stop(handle).await {
            warn!(container = %self.name, "Error stopping container after failed start: {}", e);
        }
        self.container.lock().await.take();
    }

    fn executor(&self) -> Result<Arc<HttpExecutor>> {
        if !self.is_ready() {
            return Err(Error::Backend(format!("backend {} is not ready", self.name)));
        }
        self.executor
            .load_full()
            .ok_or_else(|| Error::Backend(format!("backend {} has no open client", self.name)))
    }

    /// Recent container output, for debugging.
    pub async fn container_logs(&self, tail: usize) -> String {
        let Some(handle) = self.container.lock().await.clone() else {
            return String::new();
        };
        self.runtime.logs(&handle, tail).await.unwrap_or_else(|e| {
            warn!(container = %self.name, "Failed to get container logs: {}", e);
            String::new()
        })
    }
}

async fn wait_for_http_ready(executor: &dyn Executor, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if executor.health_check().await {
            return true;
        }
        sleep(Duration::from_secs(1)).await;
    }
    false
}

#[async_trait]
impl EnvBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn setup(&self, env_vars: &HashMap<String, String>) -> Result<()> {
        if !self.is_ready() {
            return Err(Error::Setup(format!("backend {} is not ready", self.name)));
        }

        {
            let mut current = self.env_vars.lock().await;
            let unchanged = env_vars.iter().all(|(k, v)| current.get(k) == Some(v));
            if unchanged {
                return Ok(());
            }
            current.extend(env_vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        // Environment variables are fixed at container creation.
        info!(container = %self.name, "Recreating container to inject configuration");
        self.ready.store(false, Ordering::SeqCst);
        self.executor.store(None);
        self.provision(true)
            .await
            .map_err(|e| Error::Setup(format!("failed to configure {}: {}", self.name, e)))
    }

    async fn call_method(&self, method: &str, call: CallArgs, timeout: Option<Duration>) -> Result<Value> {
        let executor = self.executor()?;
        with_timeout(method, timeout, executor.invoke(method, &call, timeout)).await
    }

    async fn list_methods(&self) -> Result<Vec<Value>> {
        self.executor()?.list_methods().await
    }

    async fn cleanup(&self) -> Result<()> {
        debug!(container = %self.name, "Cleaning up backend");
        self.closed.store(true, Ordering::SeqCst);

        let mut container = self.container.lock().await;
        self.ready.store(false, Ordering::SeqCst);
        self.executor.store(None);
        let handle = container.take();
        drop(container);

        if let Some(handle) = handle {
            if let Err(e) = self.runtime.stop(&handle).await {
                warn!(container = %self.name, "Error stopping container: {}", e);
            }
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct FakeRuntime {
        started: AtomicUsize,
        stopped: AtomicUsize,
        last_env: std::sync::Mutex<BTreeMap<String, String>>,
        hold_start: AtomicBool,
        start_entered: tokio::sync::Notify,
        start_release: tokio::sync::Notify,
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
            self.started.fetch_add(1, Ordering::SeqCst);
            *self.last_env.lock().unwrap() = spec.env.clone();
            if self.hold_start.load(Ordering::SeqCst) {
                self.start_entered.notify_one();
                self.start_release.notified().await;
            }
            Ok(ContainerHandle {
                id: format!("id-{}", spec.name),
                name: spec.name.clone(),
            })
        }
        async fn stop(&self, _handle: &ContainerHandle) -> Result<()> {
            self.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn get_ip(&self, _handle: &ContainerHandle) -> Result<String> {
            Ok("127.0.0.1".into())
        }
        async fn wait_for_port(&self, _: &ContainerHandle, _: u16, _: Duration) -> Result<bool> {
            Ok(true)
        }
        async fn exec(&self, _: &ContainerHandle, _: &[String]) -> Result<(i32, String)> {
            Ok((0, String::new()))
        }
        async fn logs(&self, _: &ContainerHandle, _: usize) -> Result<String> {
            Ok("log line".into())
        }
        async fn image_label(&self, _: &str, _: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }

    struct FixedDetector(EnvType);

    #[async_trait]
    impl EnvTypeDetector for FixedDetector {
        async fn detect(&self, _image: &str) -> EnvType {
            self.0
        }
    }

    fn options_for(server: &mockito::ServerGuard) -> LocalBackendOptions {
        let url = Url::parse(&server.url()).unwrap();
        let mut options = LocalBackendOptions::new("affine:latest", url.port().unwrap());
        options.host = "127.0.0.1".into();
        options.container_name = Some("affine-test".into());
        options.startup_timeout = Some(Duration::from_secs(2));
        options
    }

    #[tokio::test]
    async fn start_call_cleanup_lifecycle() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/health").with_status(200).create_async().await;
        server
            .mock("POST", "/call")
            .with_status(200)
            .with_body(r#"{"status": "success", "result": 42}"#)
            .create_async()
            .await;

        let runtime = Arc::new(FakeRuntime::default());
        let backend = LocalBackend::start(
            options_for(&server),
            runtime.clone(),
            &FixedDetector(EnvType::FunctionBased),
        )
        .await
        .unwrap();

        assert!(backend.is_ready());
        assert_eq!(backend.name(), "affine-test");
        let result = backend.call_method("answer", CallArgs::new(), None).await.unwrap();
        assert_eq!(result, Value::from(42));
        assert_eq!(backend.container_logs(10).await, "log line");

        backend.cleanup().await.unwrap();
        backend.cleanup().await.unwrap();
        assert!(!backend.is_ready());
        assert_eq!(runtime.stopped.load(Ordering::SeqCst), 1);
        assert!(backend.call_method("answer", CallArgs::new(), None).await.is_err());
    }

    #[tokio::test]
    async fn unhealthy_server_fails_start_and_stops_container() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/health").with_status(503).create_async().await;

        let runtime = Arc::new(FakeRuntime::default());
        let mut options = options_for(&server);
        options.startup_timeout = Some(Duration::from_millis(200));

        let result = LocalBackend::start(options, runtime.clone(), &FixedDetector(EnvType::HttpBased)).await;

        assert!(matches!(result, Err(Error::Backend(_))));
        assert_eq!(runtime.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn setup_is_idempotent_and_recreates_on_change() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/health").with_status(200).expect_at_least(1).create_async().await;

        let runtime = Arc::new(FakeRuntime::default());
        let mut options = options_for(&server);
        options.env_vars.insert("MODE".into(), "fast".into());
        let backend = LocalBackend::start(options, runtime.clone(), &FixedDetector(EnvType::FunctionBased))
            .await
            .unwrap();

        let same: HashMap<String, String> = [("MODE".to_string(), "fast".to_string())].into();
        backend.setup(&same).await.unwrap();
        assert_eq!(runtime.started.load(Ordering::SeqCst), 1);

        let changed: HashMap<String, String> = [("API_KEY".to_string(), "k".to_string())].into();
        backend.setup(&changed).await.unwrap();
        assert_eq!(runtime.started.load(Ordering::SeqCst), 2);
        let env = runtime.last_env.lock().unwrap().clone();
        assert_eq!(env.get("MODE").map(String::as_str), Some("fast"));
        assert_eq!(env.get("API_KEY").map(String::as_str), Some("k"));
    }

    #[tokio::test]
    async fn cleanup_during_recreate_leaves_no_container_running() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/health").with_status(200).expect_at_least(1).create_async().await;

        let runtime = Arc::new(FakeRuntime::default());
        let backend = Arc::new(
            LocalBackend::start(options_for(&server), runtime.clone(), &FixedDetector(EnvType::FunctionBased))
                .await
                .unwrap(),
        );

        runtime.hold_start.store(true, Ordering::SeqCst);
        let configuring = {
            let backend = backend.clone();
            tokio::spawn(async move {
                let changed: HashMap<String, String> = [("API_KEY".to_string(), "k".to_string())].into();
                backend.setup(&changed).await
            })
        };
        runtime.start_entered.notified().await;

        backend.cleanup().await.unwrap();
        runtime.start_release.notify_one();

        assert!(configuring.await.unwrap().is_err());
        assert!(!backend.is_ready());
        assert_eq!(runtime.started.load(Ordering::SeqCst), 2);
        assert_eq!(runtime.stopped.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn default_name_strips_registry_and_tag() {
        let name = default_container_name("registry.io/team/affine:latest");
        assert!(name.starts_with("affine-latest-"));
    }
}
