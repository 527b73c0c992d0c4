// src/lib.rs
//! Deploy containerized evaluation environments as one or many replicas and
//! call their methods by name through a single proxy.

pub mod api;
pub mod backend;
pub mod config;
pub mod deploy;
pub mod error;
pub mod executor;
pub mod health;
pub mod load_balancer;
pub mod metrics;
pub mod proxy;
pub mod registry;
pub mod runtime;

pub use api::{
    cleanup_all_environments, get_environment, install_exit_hook, list_active_environments, load_env,
    with_environment,
};
pub use backend::{CallArgs, EnvBackend, EnvType};
pub use config::{LoadConfig, Mode, Strategy};
pub use deploy::Deployer;
pub use error::{Error, Result};
pub use proxy::{EnvironmentProxy, InstancePool, PoolStats};
pub use registry::Registry;

#[doc(hidden)]
pub mod __private {
    pub use async_trait::async_trait;
    pub use serde_json;
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::backend::{with_timeout, CallArgs, EnvBackend};
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory backend that echoes each call back.
    pub struct StaticBackend {
        name: String,
        ready: AtomicBool,
        healthy: AtomicBool,
        failing: AtomicBool,
        delay: Mutex<Option<Duration>>,
        last_timeout: Mutex<Option<Duration>>,
        calls: AtomicUsize,
        setups: AtomicUsize,
        cleanups: AtomicUsize,
    }

    impl StaticBackend {
        pub fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                ready: AtomicBool::new(true),
                healthy: AtomicBool::new(true),
                failing: AtomicBool::new(false),
                delay: Mutex::new(None),
                last_timeout: Mutex::new(None),
                calls: AtomicUsize::new(0),
                setups: AtomicUsize::new(0),
                cleanups: AtomicUsize::new(0),
            }
        }

        pub fn set_ready(&self, ready: bool) {
            self.ready.store(ready, Ordering::SeqCst);
        }

        pub fn set_healthy(&self, healthy: bool) {
            self.healthy.store(healthy, Ordering::SeqCst);
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock().unwrap() = Some(delay);
        }

        pub fn last_timeout(&self) -> Option<Duration> {
            *self.last_timeout.lock().unwrap()
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn setups(&self) -> usize {
            self.setups.load(Ordering::SeqCst)
        }

        pub fn cleanups(&self) -> usize {
            self.cleanups.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EnvBackend for StaticBackend {
        fn name(&self) -> &str {
            &self.name
        }

        async fn setup(&self, _env_vars: &HashMap<String, String>) -> Result<()> {
            self.setups.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::Setup(format!("{} refused configuration", self.name)));
            }
            Ok(())
        }

        async fn call_method(&self, method: &str, call: CallArgs, timeout: Option<Duration>) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_timeout.lock().unwrap() = timeout;
            let delay = *self.delay.lock().unwrap();

            let work = async {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                if self.failing.load(Ordering::SeqCst) {
                    return Err(Error::Execution(format!("{} failed {}", self.name, method)));
                }
                Ok(json!({
                    "backend": self.name,
                    "method": method,
                    "args": call.args,
                    "kwargs": call.kwargs,
                }))
            };
            with_timeout(method, timeout, work).await
        }

        async fn list_methods(&self) -> Result<Vec<Value>> {
            Ok(vec![json!({"name": "echo", "signature": "(*args, **kwargs)"})])
        }

        async fn cleanup(&self) -> Result<()> {
            if self.ready.swap(false, Ordering::SeqCst) {
                self.cleanups.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }

        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        async fn health_check(&self) -> bool {
            self.is_ready() && self.healthy.load(Ordering::SeqCst)
        }
    }
}
