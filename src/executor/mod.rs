//! Executor collaborator: the transport that reaches a method inside an instance.

mod http;
mod openapi;

pub use http::HttpExecutor;
pub use openapi::parse_openapi_schema;

use crate::backend::CallArgs;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use url::Url;

#[async_trait]
pub trait Executor: Send + Sync {
    /// Address this executor talks to.
    fn address(&self) -> &Url;

    async fn invoke(&self, method: &str, call: &CallArgs, timeout: Option<Duration>) -> Result<Value>;

    async fn list_methods(&self) -> Result<Vec<Value>>;

    async fn health_check(&self) -> bool;
}
