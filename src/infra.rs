//! Infra provider boundary
//!
//! Cloud builds run on machines some provider is responsible for. The
//! reconciliation itself is out of scope; the trait captures just what
//! the cloud pipeline needs: bring the cluster's hosts up, tear them
//! down afterwards.

use crate::cluster::{Cluster, Host};
use crate::error::{StrataError, StrataResult};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Provision and destroy the machines a cluster definition names
#[async_trait]
pub trait InfraProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Make the cluster's hosts reachable, returning them in definition
    /// order
    async fn apply(&self, cluster: &Cluster) -> StrataResult<Vec<Host>>;

    /// Release whatever `apply` provisioned
    async fn destroy(&self, cluster: &Cluster) -> StrataResult<()>;
}

/// Provider for clusters whose machines already exist: apply hands back
/// the defined hosts, destroy releases nothing.
pub struct PreProvisioned;

#[async_trait]
impl InfraProvider for PreProvisioned {
    fn name(&self) -> &'static str {
        "pre-provisioned"
    }

    async fn apply(&self, cluster: &Cluster) -> StrataResult<Vec<Host>> {
        if cluster.hosts.is_empty() {
            return Err(StrataError::NoBuildHost {
                name: cluster.name.clone(),
            });
        }
        info!(
            "using {} pre-provisioned host(s) for cluster {}",
            cluster.hosts.len(),
            cluster.name
        );
        Ok(cluster.hosts.clone())
    }

    async fn destroy(&self, _cluster: &Cluster) -> StrataResult<()> {
        Ok(())
    }
}

/// Resolve the provider a cluster definition names
pub fn provider_for(cluster: &Cluster) -> StrataResult<Arc<dyn InfraProvider>> {
    match cluster.provider.as_str() {
        "pre-provisioned" | "baremetal" => Ok(Arc::new(PreProvisioned)),
        other => Err(StrataError::UnknownProvider(other.to_string())),
    }
}
