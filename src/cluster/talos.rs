//! Talos `ClusterProvisioner`: Docker-backed controller/worker containers from the `talos`
//! image family, or a Hetzner-backed topology (§4.4.1).
//!
//! Talos nodes have no shell (§4.4.1, I3): unlike `UpstreamProvisioner`/`K3sProvisioner`, this
//! implementation never calls `ContainerEngine::exec`. Kubeconfig material is instead read
//! from a bind-mounted host directory the container writes its generated `admin.conf` into —
//! the same bind-mount idea the teacher uses for the k3s rancher-data volume in
//! `cluster/k3s.rs`, applied to a host path instead of a named volume so it's readable without
//! a container RPC.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::container_engine::{ContainerEngine, ContainerRunConfig};
use crate::node_provider::{Node, NodeProvider};
use crate::registry::RegistryManager;

use super::{
    ClusterDescriptor, ClusterError, ClusterInfo, ClusterProvisioner, ClusterStatus, Provider,
};

const TALOS_IMAGE: &str = "ghcr.io/siderolabs/talos:v1.8.0";

pub struct TalosProvisioner {
    engine: Arc<dyn ContainerEngine>,
    registries: Arc<RegistryManager>,
    nodes: NodeProvider,
    state_dir: std::path::PathBuf,
}

impl TalosProvisioner {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        registries: Arc<RegistryManager>,
        state_dir: std::path::PathBuf,
    ) -> Self {
        let nodes = NodeProvider::new(engine.clone());
        Self {
            engine,
            registries,
            nodes,
            state_dir,
        }
    }

    fn controller_name(descriptor: &ClusterDescriptor, index: u32) -> String {
        format!("talos-{}-controlplane-{}", descriptor.name, index)
    }

    fn worker_name(descriptor: &ClusterDescriptor, index: u32) -> String {
        format!("talos-{}-worker-{}", descriptor.name, index)
    }

    fn cluster_state_dir(&self, descriptor: &ClusterDescriptor) -> std::path::PathBuf {
        self.state_dir.join(&descriptor.name)
    }

    async fn create_node(
        &self,
        descriptor: &ClusterDescriptor,
        name: &str,
        role_label: &str,
    ) -> Result<(), ClusterError> {
        if self.engine.inspect(name).await.is_ok() {
            return Ok(());
        }

        let mut labels = HashMap::new();
        labels.insert("ksail.talos.cluster".to_string(), descriptor.name.clone());
        labels.insert("ksail.talos.role".to_string(), role_label.to_string());

        let host_state_dir = self.cluster_state_dir(descriptor);
        tokio::fs::create_dir_all(&host_state_dir)
            .await
            .map_err(|e| ClusterError::Fatal(e.to_string()))?;

        let run_config = ContainerRunConfig {
            name: name.to_string(),
            hostname: Some(name.to_string()),
            image: TALOS_IMAGE.to_string(),
            labels,
            privileged: true,
            network: Some(descriptor.network_name.clone()),
            binds: vec![(
                host_state_dir.to_string_lossy().to_string(),
                "/system/state".to_string(),
            )],
            ..Default::default()
        };

        self.engine.create(&run_config).await?;
        self.engine.start(name).await?;
        Ok(())
    }

    async fn write_kubeconfig(&self, descriptor: &ClusterDescriptor) -> Result<(), ClusterError> {
        let admin_conf = self.cluster_state_dir(descriptor).join("admin.conf");
        for _ in 0..60 {
            if let Ok(content) = tokio::fs::read_to_string(&admin_conf).await {
                if content.contains("clusters:") {
                    if let Some(parent) = descriptor.kubeconfig_path.parent() {
                        tokio::fs::create_dir_all(parent)
                            .await
                            .map_err(|e| ClusterError::Fatal(e.to_string()))?;
                    }
                    tokio::fs::write(&descriptor.kubeconfig_path, content)
                        .await
                        .map_err(|e| ClusterError::Fatal(e.to_string()))?;
                    return Ok(());
                }
            }
            sleep(Duration::from_secs(1)).await;
        }
        Err(ClusterError::Timeout(crate::poll::PollTimeout {
            description: "admin.conf written to talos state directory".to_string(),
            elapsed: Duration::from_secs(60),
        }))
    }
}

#[async_trait]
impl ClusterProvisioner for TalosProvisioner {
    async fn create(&self, descriptor: &ClusterDescriptor) -> Result<(), ClusterError> {
        descriptor.validate()?;

        if descriptor.provider == Provider::Hetzner {
            warn!(
                cluster = %descriptor.name,
                "Hetzner-backed Talos provisioning is a documented extension point; no Hetzner client is wired in"
            );
            return Err(ClusterError::Validation(
                "Hetzner provider requires an external Hetzner Cloud client, not carried by this core".into(),
            ));
        }

        self.engine.network_create(&descriptor.network_name).await?;

        for i in 0..descriptor.control_planes {
            let name = Self::controller_name(descriptor, i);
            self.create_node(descriptor, &name, "controlplane").await?;
        }
        for i in 0..descriptor.workers {
            let name = Self::worker_name(descriptor, i);
            self.create_node(descriptor, &name, "worker").await?;
        }

        self.write_kubeconfig(descriptor).await?;

        info!(cluster = %descriptor.name, "talos cluster created");
        Ok(())
    }

    async fn delete(
        &self,
        descriptor: &ClusterDescriptor,
        delete_volumes: bool,
    ) -> Result<(), ClusterError> {
        self.registries
            .delete_on_network(&descriptor.network_name, delete_volumes)
            .await?;

        let nodes = self
            .nodes
            .list_nodes(descriptor.distribution, &descriptor.name)
            .await?;
        for node in nodes {
            self.engine.stop(&node.name).await.ok();
            self.engine.remove(&node.name, true).await?;
        }

        self.engine.network_remove(&descriptor.network_name).await?;

        if delete_volumes {
            let _ = tokio::fs::remove_dir_all(self.cluster_state_dir(descriptor)).await;
        }

        Ok(())
    }

    async fn start(&self, descriptor: &ClusterDescriptor) -> Result<(), ClusterError> {
        let nodes = self
            .nodes
            .list_nodes(descriptor.distribution, &descriptor.name)
            .await?;
        if nodes.is_empty() {
            return self.create(descriptor).await;
        }
        for node in &nodes {
            self.engine.start(&node.name).await?;
        }
        Ok(())
    }

    async fn stop(&self, descriptor: &ClusterDescriptor) -> Result<(), ClusterError> {
        let nodes = self
            .nodes
            .list_nodes(descriptor.distribution, &descriptor.name)
            .await?;
        for node in &nodes {
            self.engine.stop(&node.name).await?;
        }
        Ok(())
    }

    async fn list_clusters(&self) -> Result<Vec<String>, ClusterError> {
        let containers = self
            .engine
            .list_containers(&["ksail.talos.role=controlplane".to_string()])
            .await?;
        Ok(containers
            .into_iter()
            .filter_map(|c| c.labels.get("ksail.talos.cluster").cloned())
            .collect())
    }

    async fn info(&self, descriptor: &ClusterDescriptor) -> Result<ClusterInfo, ClusterError> {
        let nodes: Vec<Node> = self
            .nodes
            .list_nodes(descriptor.distribution, &descriptor.name)
            .await?;
        let status = if nodes.is_empty() {
            ClusterStatus::NotCreated
        } else {
            ClusterStatus::Running
        };
        Ok(ClusterInfo { status, nodes })
    }
}
