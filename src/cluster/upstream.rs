//! Upstream (kind-style) `ClusterProvisioner`: one control-plane plus N worker containers on
//! a dedicated bridge network, with an extra loadbalancer helper once more than one
//! control-plane is requested (§4.4.1).
//!
//! Container topology and kubeconfig extraction are grounded on the teacher's `K3sManager`
//! (`create_cluster`/`setup_kubeconfig` in `cluster/k3s.rs`), generalized to the `kindest/node`
//! image family and `/etc/kubernetes/admin.conf` instead of k3s's `/etc/rancher/k3s/k3s.yaml`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::info;

use crate::container_engine::{ContainerEngine, ContainerRunConfig};
use crate::node_provider::{Node, NodeProvider};
use crate::registry::RegistryManager;

use super::{ClusterDescriptor, ClusterError, ClusterInfo, ClusterProvisioner, ClusterStatus};

const NODE_IMAGE: &str = "kindest/node:v1.31.0";
const LOADBALANCER_IMAGE: &str = "kindest/haproxy:v20230510-486859a6";

pub struct UpstreamProvisioner {
    engine: Arc<dyn ContainerEngine>,
    registries: Arc<RegistryManager>,
    nodes: NodeProvider,
}

impl UpstreamProvisioner {
    pub fn new(engine: Arc<dyn ContainerEngine>, registries: Arc<RegistryManager>) -> Self {
        let nodes = NodeProvider::new(engine.clone());
        Self {
            engine,
            registries,
            nodes,
        }
    }

    fn control_plane_name(descriptor: &ClusterDescriptor, index: u32) -> String {
        if index == 0 {
            format!("{}-control-plane", descriptor.name)
        } else {
            format!("{}-control-plane{}", descriptor.name, index + 1)
        }
    }

    fn worker_name(descriptor: &ClusterDescriptor, index: u32) -> String {
        if index == 0 {
            format!("{}-worker", descriptor.name)
        } else {
            format!("{}-worker{}", descriptor.name, index + 1)
        }
    }

    fn loadbalancer_name(descriptor: &ClusterDescriptor) -> String {
        format!("{}-external-load-balancer", descriptor.name)
    }

    async fn create_loadbalancer(&self, descriptor: &ClusterDescriptor) -> Result<(), ClusterError> {
        let name = Self::loadbalancer_name(descriptor);
        if self.engine.inspect(&name).await.is_ok() {
            return Ok(());
        }

        let mut labels = HashMap::new();
        labels.insert(
            "io.x-k8s.kind.cluster".to_string(),
            descriptor.name.clone(),
        );
        labels.insert("io.x-k8s.kind.role".to_string(), "external-load-balancer".to_string());

        let run_config = ContainerRunConfig {
            name: name.clone(),
            hostname: Some(name.clone()),
            image: LOADBALANCER_IMAGE.to_string(),
            labels,
            network: Some(descriptor.network_name.clone()),
            ..Default::default()
        };

        self.engine.create(&run_config).await?;
        self.engine.start(&name).await?;
        Ok(())
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
        labels.insert(
            "io.x-k8s.kind.cluster".to_string(),
            descriptor.name.clone(),
        );
        labels.insert("io.x-k8s.kind.role".to_string(), role_label.to_string());

        let run_config = ContainerRunConfig {
            name: name.to_string(),
            hostname: Some(name.to_string()),
            image: NODE_IMAGE.to_string(),
            labels,
            privileged: true,
            network: Some(descriptor.network_name.clone()),
            ..Default::default()
        };

        self.engine.create(&run_config).await?;
        self.engine.start(name).await?;
        Ok(())
    }

    async fn write_kubeconfig(&self, descriptor: &ClusterDescriptor) -> Result<(), ClusterError> {
        let control_plane = Self::control_plane_name(descriptor, 0);
        for _ in 0..60 {
            if let Ok(output) = self
                .engine
                .exec(&control_plane, &["cat", "/etc/kubernetes/admin.conf"])
                .await
            {
                if output.exit_code == 0 && output.stdout.contains("clusters:") {
                    let fixed = output
                        .stdout
                        .replace("127.0.0.1", "localhost")
                        .replace("kubernetes", &control_plane);
                    if let Some(parent) = descriptor.kubeconfig_path.parent() {
                        tokio::fs::create_dir_all(parent)
                            .await
                            .map_err(|e| ClusterError::Fatal(e.to_string()))?;
                    }
                    tokio::fs::write(&descriptor.kubeconfig_path, fixed)
                        .await
                        .map_err(|e| ClusterError::Fatal(e.to_string()))?;
                    return Ok(());
                }
            }
            sleep(Duration::from_secs(1)).await;
        }
        Err(ClusterError::Timeout(crate::poll::PollTimeout {
            description: "admin.conf available in control-plane container".to_string(),
            elapsed: Duration::from_secs(60),
        }))
    }
}

#[async_trait]
impl ClusterProvisioner for UpstreamProvisioner {
    async fn create(&self, descriptor: &ClusterDescriptor) -> Result<(), ClusterError> {
        descriptor.validate()?;
        self.engine.network_create(&descriptor.network_name).await?;

        for i in 0..descriptor.control_planes {
            let name = Self::control_plane_name(descriptor, i);
            self.create_node(descriptor, &name, "control-plane").await?;
        }
        for i in 0..descriptor.workers {
            let name = Self::worker_name(descriptor, i);
            self.create_node(descriptor, &name, "worker").await?;
        }
        if descriptor.control_planes > 1 {
            self.create_loadbalancer(descriptor).await?;
        }

        self.write_kubeconfig(descriptor).await?;

        info!(cluster = %descriptor.name, "upstream cluster created");
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
            .list_containers(&["io.x-k8s.kind.role=control-plane".to_string()])
            .await?;
        Ok(containers
            .into_iter()
            .filter_map(|c| {
                c.labels
                    .get("io.x-k8s.kind.cluster")
                    .cloned()
            })
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
