//! §4.4 ClusterProvisioner: per-distribution node topology lifecycle.
//!
//! Grounded on the teacher's `ClusterManager` (composition of a single distribution manager)
//! generalized into a trait with three implementors, one per distribution named in §3.

mod error;
mod k3s;
mod talos;
mod upstream;

pub use error::ClusterError;
pub use k3s::K3sProvisioner;
pub use talos::TalosProvisioner;
pub use upstream::UpstreamProvisioner;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::node_provider::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Distribution {
    Upstream,
    K3s,
    Talos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Docker,
    Hetzner,
}

/// The resolved, per-invocation configuration for one cluster (§3 ClusterDescriptor).
#[derive(Debug, Clone)]
pub struct ClusterDescriptor {
    pub name: String,
    pub distribution: Distribution,
    pub provider: Provider,
    pub control_planes: u32,
    pub workers: u32,
    pub network_name: String,
    pub kubeconfig_path: PathBuf,
    pub context: String,
    pub api_ready_timeout: Duration,
    /// Names of registries (as configured in `RegistryConfig`) this cluster should attach to.
    pub registries: Vec<String>,
}

impl ClusterDescriptor {
    /// I1-I3 checks that only need the descriptor itself (I4 needs the registry ref, checked
    /// in `ConfigResolver::validate`).
    pub fn validate(&self) -> Result<(), ClusterError> {
        if self.name.trim().is_empty() {
            return Err(ClusterError::Validation("cluster name must not be empty".into()));
        }
        if self.control_planes < 1 {
            return Err(ClusterError::Validation(
                "controlPlanes must be >= 1".into(),
            ));
        }
        if self.provider == Provider::Hetzner && self.distribution != Distribution::Talos {
            return Err(ClusterError::Validation(
                "I2: Hetzner provider is only valid with Talos".into(),
            ));
        }
        Ok(())
    }

    /// I3: image operations (ImageExchanger export/import) require a non-Talos distribution.
    pub fn supports_image_exchange(&self) -> bool {
        self.distribution != Distribution::Talos
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterStatus {
    Running,
    Stopped,
    NotCreated,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct ClusterInfo {
    pub status: ClusterStatus,
    pub nodes: Vec<Node>,
}

#[async_trait]
pub trait ClusterProvisioner: Send + Sync {
    async fn create(&self, descriptor: &ClusterDescriptor) -> Result<(), ClusterError>;
    async fn delete(&self, descriptor: &ClusterDescriptor, delete_volumes: bool)
        -> Result<(), ClusterError>;
    async fn start(&self, descriptor: &ClusterDescriptor) -> Result<(), ClusterError>;
    async fn stop(&self, descriptor: &ClusterDescriptor) -> Result<(), ClusterError>;
    async fn list_clusters(&self) -> Result<Vec<String>, ClusterError>;
    async fn info(&self, descriptor: &ClusterDescriptor) -> Result<ClusterInfo, ClusterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(distribution: Distribution, provider: Provider) -> ClusterDescriptor {
        ClusterDescriptor {
            name: "dev".into(),
            distribution,
            provider,
            control_planes: 1,
            workers: 0,
            network_name: "kind-dev".into(),
            kubeconfig_path: PathBuf::from("/tmp/kubeconfig"),
            context: "kind-dev".into(),
            api_ready_timeout: Duration::from_secs(300),
            registries: vec![],
        }
    }

    #[test]
    fn hetzner_provider_requires_talos() {
        let d = descriptor(Distribution::Upstream, Provider::Hetzner);
        assert!(d.validate().is_err());
    }

    #[test]
    fn talos_only_distribution_rejects_image_exchange() {
        let d = descriptor(Distribution::Talos, Provider::Docker);
        assert!(!d.supports_image_exchange());
        let upstream = descriptor(Distribution::Upstream, Provider::Docker);
        assert!(upstream.supports_image_exchange());
    }
}
