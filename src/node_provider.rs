//! §4.3 NodeProvider: per-distribution label-based enumeration of cluster-member containers.
//!
//! Grounded on the teacher's `cluster/docker.rs` label-filtered container listing and
//! `cluster/k3s.rs` role inference, generalized from a single K3s-only scheme into the three
//! distribution label schemes the spec names.

use std::sync::Arc;

use crate::cluster::Distribution;
use crate::container_engine::{ContainerEngine, EngineError};

/// A node's role within its cluster, independent of distribution-specific label spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    ControlPlane,
    Server,
    Worker,
    Agent,
    /// Helper containers (loadbalancer, tools, registry) are not cluster members proper.
    LoadBalancer,
    Tools,
    Registry,
    Unknown,
}

impl NodeRole {
    /// Helper roles are excluded by `selectExportNode` and by callers enumerating workload
    /// nodes (§4.3).
    pub fn is_helper(self) -> bool {
        matches!(self, NodeRole::LoadBalancer | NodeRole::Tools | NodeRole::Registry)
    }

    /// Export-node preference order: `control-plane < server < worker < agent < unknown`
    /// (§4.3, §8 Testable Property 7) — lower rank wins.
    fn export_rank(self) -> u8 {
        match self {
            NodeRole::ControlPlane => 0,
            NodeRole::Server => 1,
            NodeRole::Worker => 2,
            NodeRole::Agent => 3,
            NodeRole::Unknown => 4,
            NodeRole::LoadBalancer | NodeRole::Tools | NodeRole::Registry => u8::MAX,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub role: NodeRole,
}

pub struct NodeProvider {
    engine: Arc<dyn ContainerEngine>,
}

impl NodeProvider {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    /// Enumerate every container belonging to `cluster_name` under `distribution`'s label
    /// scheme (§4.3).
    pub async fn list_nodes(
        &self,
        distribution: Distribution,
        cluster_name: &str,
    ) -> Result<Vec<Node>, EngineError> {
        let cluster_label = match distribution {
            Distribution::Upstream => format!("io.x-k8s.kind.cluster={cluster_name}"),
            Distribution::K3s => format!("k3d.cluster={cluster_name}"),
            Distribution::Talos => format!("ksail.talos.cluster={cluster_name}"),
        };

        let containers = self.engine.list_containers(&[cluster_label]).await?;
        Ok(containers
            .into_iter()
            .map(|c| {
                let name = c.names.first().cloned().unwrap_or(c.id);
                let role = role_from_labels(distribution, &c.labels);
                Node { name, role }
            })
            .collect())
    }

    /// Role-preference export node selection (§4.3, §8 Testable Property 7).
    pub fn select_export_node(nodes: &[Node]) -> Option<&Node> {
        nodes
            .iter()
            .filter(|n| !n.role.is_helper())
            .min_by_key(|n| n.role.export_rank())
    }
}

fn role_from_labels(
    distribution: Distribution,
    labels: &std::collections::HashMap<String, String>,
) -> NodeRole {
    match distribution {
        Distribution::Upstream => match labels.get("io.x-k8s.kind.role").map(String::as_str) {
            Some("control-plane") => NodeRole::ControlPlane,
            Some("worker") => NodeRole::Worker,
            Some("external-load-balancer") => NodeRole::LoadBalancer,
            _ => NodeRole::Unknown,
        },
        Distribution::K3s => match labels.get("k3d.role").map(String::as_str) {
            Some("server") => NodeRole::Server,
            Some("agent") => NodeRole::Agent,
            Some("loadbalancer") => NodeRole::LoadBalancer,
            Some("registry") => NodeRole::Registry,
            Some("noRole") | Some("tools") => NodeRole::Tools,
            _ => NodeRole::Unknown,
        },
        Distribution::Talos => match labels.get("ksail.talos.role").map(String::as_str) {
            Some("controlplane") => NodeRole::ControlPlane,
            Some("worker") => NodeRole::Worker,
            _ => NodeRole::Unknown,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(role: NodeRole) -> Node {
        Node {
            name: format!("{role:?}"),
            role,
        }
    }

    #[test]
    fn export_selection_prefers_control_plane_over_worker() {
        let nodes = vec![node(NodeRole::Worker), node(NodeRole::ControlPlane)];
        let selected = NodeProvider::select_export_node(&nodes).unwrap();
        assert_eq!(selected.role, NodeRole::ControlPlane);
    }

    #[test]
    fn export_selection_prefers_server_over_agent_and_loadbalancer() {
        let nodes = vec![
            node(NodeRole::Agent),
            node(NodeRole::Server),
            node(NodeRole::LoadBalancer),
        ];
        let selected = NodeProvider::select_export_node(&nodes).unwrap();
        assert_eq!(selected.role, NodeRole::Server);
    }

    #[test]
    fn export_selection_returns_none_for_helpers_only() {
        let nodes = vec![node(NodeRole::LoadBalancer), node(NodeRole::Tools)];
        assert!(NodeProvider::select_export_node(&nodes).is_none());
    }
}
