// src/proxy/instance.rs
use crate::backend::EnvBackend;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// One pool member: a backend bound to its network address plus health state.
///
/// Health fields are only mutated by the owning pool.
pub struct Instance {
    pub host: String,
    pub port: u16,
    pub backend: Arc<dyn EnvBackend>,

    healthy: AtomicBool,
    last_check_ms: AtomicI64,
    request_count: AtomicU64,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceStats {
    pub host: String,
    pub port: u16,
    pub healthy: bool,
    pub requests: u64,
    pub last_check: DateTime<Utc>,
}

impl Instance {
    pub fn new(host: impl Into<String>, port: u16, backend: Arc<dyn EnvBackend>) -> Self {
        Self {
            host: host.into(),
            port,
            backend,
            healthy: AtomicBool::new(true),
            last_check_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            request_count: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Healthy and its backend reports ready.
    pub fn is_selectable(&self) -> bool {
        self.is_healthy() && self.backend.is_ready()
    }

    pub fn last_check(&self) -> DateTime<Utc> {
        let ms = self.last_check_ms.load(Ordering::Relaxed);
        Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes.load(Ordering::Relaxed)
    }

    pub(crate) fn record_request(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns true when this success turned the instance healthy.
    pub(crate) fn record_success(&self, healthy_threshold: u32) -> bool {
        self.touch();
        self.consecutive_failures.store(0, Ordering::Relaxed);

        if self.is_healthy() {
            return false;
        }

        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if successes >= healthy_threshold {
            self.consecutive_successes.store(0, Ordering::Relaxed);
            return !self.healthy.swap(true, Ordering::SeqCst);
        }
        false
    }

    /// Returns true when this failure turned the instance unhealthy.
    pub(crate) fn record_failure(&self, unhealthy_threshold: u32) -> bool {
        self.touch();
        self.consecutive_successes.store(0, Ordering::Relaxed);

        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= unhealthy_threshold {
            return self.healthy.swap(false, Ordering::SeqCst);
        }
        false
    }

    fn touch(&self) {
        self.last_check_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn stats(&self) -> InstanceStats {
        InstanceStats {
            host: self.host.clone(),
            port: self.port,
            healthy: self.is_healthy(),
            requests: self.request_count(),
            last_check: self.last_check(),
        }
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.is_healthy() { "healthy" } else { "unhealthy" };
        write!(f, "{}:{} ({})", self.host, self.port, status)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("backend", &self.backend.name())
            .field("healthy", &self.is_healthy())
            .finish()
    }
}
