//! Cluster registry
//!
//! Maps cluster names to live `kube::Client`s. Populated at startup from
//! a kubeconfig's contexts, or from inferred in-cluster configuration
//! when no kubeconfig is given.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use kube::config::{KubeConfigOptions, Kubeconfig};
use tracing::info;

use crate::error::{Error, Result};

/// Connection timeout for cluster API servers.
///
/// No read timeout is set: exec sessions hold a single long-lived
/// streaming request that a read timeout would sever while idle.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Concurrency-safe table of named cluster clients.
#[derive(Clone, Default)]
pub struct ClusterRegistry {
    inner: Arc<DashMap<String, kube::Client>>,
}

impl ClusterRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a named cluster.
    pub fn insert(&self, name: impl Into<String>, client: kube::Client) {
        self.inner.insert(name.into(), client);
    }

    /// Resolves a cluster name to its client.
    pub fn get(&self, name: &str) -> Result<kube::Client> {
        self.inner
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::ClusterNotFound(name.to_string()))
    }

    /// Names of all registered clusters, sorted for stable output.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Loads one client per context from a kubeconfig file.
    pub async fn from_kubeconfig(path: &str) -> Result<Self> {
        let kubeconfig =
            Kubeconfig::read_from(path).map_err(|e| Error::Config(e.to_string()))?;
        let registry = Self::new();

        for context in &kubeconfig.contexts {
            let options = KubeConfigOptions {
                context: Some(context.name.clone()),
                ..Default::default()
            };
            let mut config = kube::Config::from_custom_kubeconfig(kubeconfig.clone(), &options)
                .await
                .map_err(|e| Error::Config(e.to_string()))?;
            config.connect_timeout = Some(CONNECT_TIMEOUT);

            let client = kube::Client::try_from(config)?;
            info!(cluster = %context.name, "registered cluster from kubeconfig");
            registry.insert(context.name.clone(), client);
        }

        if registry.names().is_empty() {
            return Err(Error::Config(format!("no contexts in kubeconfig {path}")));
        }
        Ok(registry)
    }

    /// Builds a single-cluster registry from inferred configuration
    /// (in-cluster service account, or the ambient default context).
    pub async fn infer(name: &str) -> Result<Self> {
        let mut config = kube::Config::infer()
            .await
            .map_err(|e| Error::Config(e.to_string()))?;
        config.connect_timeout = Some(CONNECT_TIMEOUT);

        let client = kube::Client::try_from(config)?;
        info!(cluster = %name, "registered inferred cluster");

        let registry = Self::new();
        registry.insert(name, client);
        Ok(registry)
    }
}
