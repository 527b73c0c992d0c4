// src/registry.rs
use crate::proxy::EnvironmentProxy;
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

struct Entry {
    seq: u64,
    proxy: Arc<EnvironmentProxy>,
}

/// Name → proxy map that remembers insertion order.
///
/// Distinct names never contend with each other. Bulk cleanup tolerates
/// entries disappearing while it runs.
#[derive(Default)]
pub struct Registry {
    entries: DashMap<String, Entry>,
    next_seq: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `proxy` under its name, replacing any previous holder.
    pub fn register(self: &Arc<Self>, proxy: Arc<EnvironmentProxy>) {
        proxy.attach_registry(Arc::downgrade(self));

        let name = proxy.name().to_string();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        if self.entries.insert(name.clone(), Entry { seq, proxy }).is_some() {
            warn!(environment = %name, "Environment already registered, replacing");
        }
        debug!(environment = %name, "Registered environment");
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<EnvironmentProxy>> {
        let removed = self.entries.remove(name).map(|(_, entry)| entry.proxy);
        if removed.is_some() {
            debug!(environment = %name, "Unregistered environment");
        }
        removed
    }

    /// Removes the entry only if it still holds this exact proxy.
    pub(crate) fn remove_proxy(&self, proxy: &EnvironmentProxy) -> bool {
        self.entries
            .remove_if(proxy.name(), |_, entry| std::ptr::eq(Arc::as_ptr(&entry.proxy), proxy))
            .is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<EnvironmentProxy>> {
        self.entries.get(name).map(|entry| entry.proxy.clone())
    }

    /// Registered names in insertion order.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<(u64, String)> = self
            .entries
            .iter()
            .map(|entry| (entry.seq, entry.key().clone()))
            .collect();
        names.sort_unstable_by_key(|(seq, _)| *seq);
        names.into_iter().map(|(_, name)| name).collect()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Cleans up every registered environment concurrently and empties the registry.
    pub async fn cleanup_all(&self) {
        let names = self.list();
        if names.is_empty() {
            return;
        }
        info!("Cleaning up {} environments", names.len());

        let proxies: Vec<Arc<EnvironmentProxy>> =
            names.iter().filter_map(|name| self.unregister(name)).collect();
        join_all(proxies.iter().map(|proxy| proxy.cleanup())).await;

        info!("All environments cleaned up");
    }
}

/// The process-wide registry used by the free functions in [`crate::api`].
pub fn registry() -> Arc<Registry> {
    static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();
    GLOBAL.get_or_init(|| Arc::new(Registry::new())).clone()
}
