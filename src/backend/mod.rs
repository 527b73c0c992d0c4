//! Backend capability contract.
//!
//! Every deployable unit (a locally provisioned container, a remotely
//! addressed environment, or a pool of either) satisfies [`EnvBackend`].
//! Layers above only ever hold an `Arc<dyn EnvBackend>`.

mod local;
mod methods;
mod remote;

pub use local::{LocalBackend, LocalBackendOptions};
pub use methods::{describe_methods, EndpointParameter, FunctionSignature, HttpEndpoint, MethodDescriptor};
pub use remote::RemoteBackend;

use crate::error::{Error, Result};
use crate::proxy::PoolStats;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Keyword reserved for the per-call timeout (seconds).
pub const TIMEOUT_KWARG: &str = "timeout";

/// How an environment exposes its methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvType {
    /// Functions routed through a generic `/call` endpoint.
    FunctionBased,
    /// One HTTP endpoint per method, described by OpenAPI.
    HttpBased,
}

impl EnvType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvType::FunctionBased => "function_based",
            EnvType::HttpBased => "http_based",
        }
    }

    /// How long a fresh container gets to answer `/health`.
    pub fn default_startup_timeout(&self) -> Duration {
        match self {
            EnvType::HttpBased => Duration::from_secs(120),
            EnvType::FunctionBased => Duration::from_secs(60),
        }
    }
}

impl fmt::Display for EnvType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "function_based" => Ok(EnvType::FunctionBased),
            "http_based" => Ok(EnvType::HttpBased),
            other => Err(Error::Validation(format!(
                "Invalid env_type: {}. Must be 'function_based' or 'http_based'",
                other
            ))),
        }
    }
}

/// Positional and keyword arguments of one forwarded call.
///
/// Keyword order is preserved end to end.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallArgs {
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Removes the reserved `timeout` keyword and interprets it as seconds.
    pub fn take_timeout(&mut self) -> Result<Option<Duration>> {
        let Some(raw) = self.kwargs.shift_remove(TIMEOUT_KWARG) else {
            return Ok(None);
        };

        match raw {
            Value::Null => Ok(None),
            Value::Number(n) => match n.as_f64() {
                Some(secs) => Duration::try_from_secs_f64(secs)
                    .map(Some)
                    .map_err(|e| Error::Validation(format!("invalid timeout {}: {}", n, e))),
                None => Err(Error::Validation(format!("invalid timeout: {}", n))),
            },
            other => Err(Error::Validation(format!(
                "timeout must be a number of seconds, got {}",
                other
            ))),
        }
    }
}

/// Resolves the method-discovery scheme of an image when not overridden.
#[async_trait]
pub trait EnvTypeDetector: Send + Sync {
    async fn detect(&self, image: &str) -> EnvType;
}

/// The capability contract shared by single backends and pools.
#[async_trait]
pub trait EnvBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Injects configuration. Calling it again with the same values is a no-op.
    async fn setup(&self, env_vars: &HashMap<String, String>) -> Result<()>;

    /// Invokes a named remote method. Safe to call concurrently.
    async fn call_method(
        &self,
        method: &str,
        call: CallArgs,
        timeout: Option<Duration>,
    ) -> Result<Value>;

    /// Raw method descriptors, either function signatures or HTTP endpoints.
    async fn list_methods(&self) -> Result<Vec<Value>>;

    /// Releases everything. Repeated calls are no-ops.
    async fn cleanup(&self) -> Result<()>;

    /// Cheap, non-blocking readiness probe.
    fn is_ready(&self) -> bool;

    /// Active liveness probe used by the health checker.
    async fn health_check(&self) -> bool {
        self.is_ready()
    }

    /// Pool-only statistics; single backends have none.
    fn pool_stats(&self) -> Option<PoolStats> {
        None
    }
}

/// Bounds a backend call by `timeout`, mapping expiry to [`Error::Timeout`].
pub(crate) async fn with_timeout<F>(method: &str, timeout: Option<Duration>, fut: F) -> Result<Value>
where
    F: std::future::Future<Output = Result<Value>>,
{
    match timeout {
        Some(after) => tokio::time::timeout(after, fut).await.map_err(|_| Error::Timeout {
            method: method.to_string(),
            after,
        })?,
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn take_timeout_consumes_reserved_keyword() {
        let mut call = CallArgs::new()
            .arg(1)
            .kwarg("task_type", "sat")
            .kwarg("timeout", 2.5)
            .kwarg("num_samples", 5);

        let timeout = call.take_timeout().unwrap();

        assert_eq!(timeout, Some(Duration::from_millis(2500)));
        let keys: Vec<_> = call.kwargs.keys().cloned().collect();
        assert_eq!(keys, vec!["task_type", "num_samples"]);
        assert_eq!(call.args, vec![json!(1)]);
    }

    #[test]
    fn take_timeout_rejects_non_numbers() {
        let mut call = CallArgs::new().kwarg("timeout", "soon");
        assert!(matches!(call.take_timeout(), Err(Error::Validation(_))));

        let mut call = CallArgs::new().kwarg("timeout", -1);
        assert!(matches!(call.take_timeout(), Err(Error::Validation(_))));
    }

    #[test]
    fn take_timeout_rejects_values_beyond_duration_range() {
        let mut call = CallArgs::new().kwarg("timeout", 1e20).kwarg("seed", 1);
        assert!(matches!(call.take_timeout(), Err(Error::Validation(_))));
        assert!(!call.kwargs.contains_key("timeout"));
    }

    #[test]
    fn env_type_parses_both_schemes() {
        assert_eq!("http_based".parse::<EnvType>().unwrap(), EnvType::HttpBased);
        assert_eq!("function_based".parse::<EnvType>().unwrap(), EnvType::FunctionBased);
        assert!("grpc".parse::<EnvType>().is_err());
    }

    #[tokio::test]
    async fn with_timeout_unblocks_caller() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        };
        let err = with_timeout("slow", Some(Duration::from_millis(20)), slow)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
