//! K3s (k3d-style) `ClusterProvisioner`: server/agent containers plus an always-present
//! `loadbalancer` helper, on a `k3d-<name>` network (§4.4.1).
//!
//! Grounded directly on the teacher's `K3sManager` in the original `cluster/k3s.rs`: parallel
//! volume/network/image setup via `tokio::try_join!`, `--docker` k3s server command, and
//! `/etc/rancher/k3s/k3s.yaml` kubeconfig extraction with the `127.0.0.1` → `localhost`
//! rewrite — generalized from one hard-coded container name to the spec's per-cluster naming.

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

const K3S_IMAGE: &str = "rancher/k3s:v1.31.0-k3s1";
const LOADBALANCER_IMAGE: &str = "ghcr.io/k3d-io/k3d-proxy:v5.7.4";

pub struct K3sProvisioner {
    engine: Arc<dyn ContainerEngine>,
    registries: Arc<RegistryManager>,
    nodes: NodeProvider,
}

impl K3sProvisioner {
    pub fn new(engine: Arc<dyn ContainerEngine>, registries: Arc<RegistryManager>) -> Self {
        let nodes = NodeProvider::new(engine.clone());
        Self {
            engine,
            registries,
            nodes,
        }
    }

    fn server_name(descriptor: &ClusterDescriptor, index: u32) -> String {
        format!("k3d-{}-server-{}", descriptor.name, index)
    }

    fn agent_name(descriptor: &ClusterDescriptor, index: u32) -> String {
        format!("k3d-{}-agent-{}", descriptor.name, index)
    }

    fn loadbalancer_name(descriptor: &ClusterDescriptor) -> String {
        format!("k3d-{}-serverlb", descriptor.name)
    }

    async fn create_server(
        &self,
        descriptor: &ClusterDescriptor,
        index: u32,
    ) -> Result<String, ClusterError> {
        let name = Self::server_name(descriptor, index);
        if self.engine.inspect(&name).await.is_ok() {
            return Ok(name);
        }

        if self.engine.image_inspect(K3S_IMAGE).await.is_err() {
            self.engine.image_pull(K3S_IMAGE).await?;
        }

        let mut labels = HashMap::new();
        labels.insert("k3d.cluster".to_string(), descriptor.name.clone());
        labels.insert("k3d.role".to_string(), "server".to_string());

        let command = vec![
            "server".to_string(),
            "--docker".to_string(),
            "--disable=traefik".to_string(),
            "--disable=servicelb".to_string(),
            "--kubelet-arg=cgroup-driver=cgroupfs".to_string(),
        ];

        let run_config = ContainerRunConfig {
            name: name.clone(),
            hostname: Some(name.clone()),
            image: K3S_IMAGE.to_string(),
            labels,
            privileged: true,
            network: Some(descriptor.network_name.clone()),
            command: Some(command),
            ..Default::default()
        };

        self.engine.create(&run_config).await?;
        self.engine.start(&name).await?;
        Ok(name)
    }

    async fn create_agent(&self, descriptor: &ClusterDescriptor, index: u32) -> Result<(), ClusterError> {
        let name = Self::agent_name(descriptor, index);
        if self.engine.inspect(&name).await.is_ok() {
            return Ok(());
        }

        let mut labels = HashMap::new();
        labels.insert("k3d.cluster".to_string(), descriptor.name.clone());
        labels.insert("k3d.role".to_string(), "agent".to_string());

        let run_config = ContainerRunConfig {
            name: name.clone(),
            hostname: Some(name.clone()),
            image: K3S_IMAGE.to_string(),
            labels,
            privileged: true,
            network: Some(descriptor.network_name.clone()),
            command: Some(vec!["agent".to_string(), "--docker".to_string()]),
            ..Default::default()
        };

        self.engine.create(&run_config).await?;
        self.engine.start(&name).await?;
        Ok(())
    }

    async fn create_loadbalancer(&self, descriptor: &ClusterDescriptor) -> Result<(), ClusterError> {
        let name = Self::loadbalancer_name(descriptor);
        if self.engine.inspect(&name).await.is_ok() {
            return Ok(());
        }

        let mut labels = HashMap::new();
        labels.insert("k3d.cluster".to_string(), descriptor.name.clone());
        labels.insert("k3d.role".to_string(), "loadbalancer".to_string());

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

    async fn write_kubeconfig(
        &self,
        descriptor: &ClusterDescriptor,
        server_name: &str,
    ) -> Result<(), ClusterError> {
        for _ in 0..30 {
            if let Ok(output) = self
                .engine
                .exec(server_name, &["cat", "/etc/rancher/k3s/k3s.yaml"])
                .await
            {
                if output.exit_code == 0 && output.stdout.contains("clusters:") {
                    let fixed = output.stdout.replace("127.0.0.1", "localhost");
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
            description: "k3s.yaml available in server container".to_string(),
            elapsed: Duration::from_secs(30),
        }))
    }
}

#[async_trait]
impl ClusterProvisioner for K3sProvisioner {
    async fn create(&self, descriptor: &ClusterDescriptor) -> Result<(), ClusterError> {
        descriptor.validate()?;
        self.engine.network_create(&descriptor.network_name).await?;

        let server_name = self.create_server(descriptor, 0).await?;
        for i in 0..descriptor.workers {
            self.create_agent(descriptor, i).await?;
        }
        self.create_loadbalancer(descriptor).await?;

        self.write_kubeconfig(descriptor, &server_name).await?;

        info!(cluster = %descriptor.name, "k3s cluster created");
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
            .list_containers(&["k3d.role=server".to_string()])
            .await?;
        Ok(containers
            .into_iter()
            .filter_map(|c| c.labels.get("k3d.cluster").cloned())
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
