// src/executor/http.rs
use super::{parse_openapi_schema, Executor};
use crate::backend::{CallArgs, EnvType};
use crate::config::ExecutorConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Reaches an instance over HTTP, routing by its env type.
///
/// - function-based: `POST /call` with `{"method", "args", "kwargs"}`
/// - http-based: `POST /{method}` with kwargs as the body
pub struct HttpExecutor {
    base_url: Url,
    env_type: EnvType,
    client: Client,
}

impl HttpExecutor {
    pub fn new(base_url: Url, env_type: EnvType, config: &ExecutorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .map_err(|e| Error::Setup(format!("failed to create HTTP client: {}", e)))?;

        debug!(%base_url, %env_type, "HttpExecutor initialized");
        Ok(Self {
            base_url,
            env_type,
            client,
        })
    }

    pub fn env_type(&self) -> EnvType {
        self.env_type
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|e| Error::Execution(format!("invalid endpoint {}: {}", joined, e)))
    }

    async fn send(&self, method: &str, request: RequestBuilder, timeout: Option<Duration>) -> Result<Value> {
        let request = match timeout {
            Some(t) => request.timeout(t),
            None => request,
        };

        let response = request.send().await.map_err(|e| transport_error(method, timeout, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Execution(format!("HTTP {}: {}", status.as_u16(), body)));
        }

        response.json::<Value>().await.map_err(|e| transport_error(method, timeout, e))
    }

    async fn fetch_methods(&self) -> Result<Vec<Value>> {
        match self.env_type {
            EnvType::FunctionBased => {
                let data: Value = self.client.get(self.endpoint("methods")?).send().await?.json().await?;
                Ok(data
                    .get("methods")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default())
            }
            EnvType::HttpBased => {
                let schema: Value = self
                    .client
                    .get(self.endpoint("openapi.json")?)
                    .send()
                    .await?
                    .json()
                    .await?;
                Ok(parse_openapi_schema(&schema))
            }
        }
    }
}

fn transport_error(method: &str, timeout: Option<Duration>, err: reqwest::Error) -> Error {
    match timeout {
        Some(after) if err.is_timeout() => Error::Timeout {
            method: method.to_string(),
            after,
        },
        _ => Error::Execution(format!("Failed to call method '{}': {}", method, err)),
    }
}

/// Unwraps the `{"status", "result"}` envelope of function-based responses.
fn unwrap_envelope(data: Value) -> Result<Value> {
    match data.get("status").and_then(Value::as_str) {
        Some("success") => Ok(data.get("result").cloned().unwrap_or(Value::Null)),
        Some(_) => Err(Error::Execution(format!("Remote execution failed: {}", data))),
        None => Ok(data),
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    fn address(&self) -> &Url {
        &self.base_url
    }

    async fn invoke(&self, method: &str, call: &CallArgs, timeout: Option<Duration>) -> Result<Value> {
        match self.env_type {
            EnvType::FunctionBased => {
                debug!(%method, "Calling function-based method");
                let body = json!({
                    "method": method,
                    "args": call.args,
                    "kwargs": call.kwargs,
                });
                let request = self.client.post(self.endpoint("call")?).json(&body);
                unwrap_envelope(self.send(method, request, timeout).await?)
            }
            EnvType::HttpBased => {
                debug!(%method, "Calling http-based endpoint");
                let request = self.client.post(self.endpoint(method)?).json(&call.kwargs);
                self.send(method, request, timeout).await
            }
        }
    }

    async fn list_methods(&self) -> Result<Vec<Value>> {
        match self.fetch_methods().await {
            Ok(methods) => Ok(methods),
            Err(e) => {
                warn!(address = %self.base_url, "Failed to list methods: {}", e);
                Ok(Vec::new())
            }
        }
    }

    async fn health_check(&self) -> bool {
        let Ok(url) = self.endpoint("health") else {
            return false;
        };
        match self.client.get(url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(e) => {
                debug!(address = %self.base_url, "Health check failed: {}", e);
                false
            }
        }
    }
}
