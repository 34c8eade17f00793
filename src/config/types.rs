//! Declarative `ksail.yaml` shapes (§6 Project config file).

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct KsailConfigFile {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub spec: ClusterSpec,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default)]
    pub editor: Option<String>,
    #[serde(default)]
    pub cluster: ClusterSpecInner,
    #[serde(default)]
    pub workload: WorkloadSpec,
    #[serde(default)]
    pub chat: ChatSpec,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpecInner {
    #[serde(default)]
    pub distribution: Option<DistributionName>,
    #[serde(default)]
    pub distribution_config: Option<String>,
    #[serde(default)]
    pub connection: ConnectionSpec,
    #[serde(default)]
    pub cni: Option<CniKind>,
    #[serde(default)]
    pub csi: Option<TriState>,
    #[serde(default)]
    pub metrics_server: Option<TriState>,
    #[serde(default)]
    pub cert_manager: Option<TriState>,
    #[serde(default)]
    pub policy_engine: Option<PolicyEngineKind>,
    #[serde(default)]
    pub git_ops_engine: Option<GitOpsEngineKind>,
    #[serde(default)]
    pub local_registry: LocalRegistrySpec,
    #[serde(default)]
    pub vanilla: VanillaSpec,
    #[serde(default)]
    pub talos: TalosSpec,
    #[serde(default)]
    pub hetzner: HetznerSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum DistributionName {
    Upstream,
    #[serde(rename = "K3s")]
    K3s,
    Talos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum CniKind {
    Default,
    Cilium,
    Calico,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TriState {
    Default,
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum PolicyEngineKind {
    None,
    Kyverno,
    Gatekeeper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum GitOpsEngineKind {
    None,
    Flux,
    #[serde(rename = "ArgoCD")]
    ArgoCD,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSpec {
    #[serde(default)]
    pub kubeconfig: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    /// Duration as `Ns|Nm|Nh`, parsed by `parse_duration_spec`.
    #[serde(default)]
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LocalRegistrySpec {
    #[serde(default)]
    pub registry: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VanillaSpec {
    #[serde(default)]
    pub mirrors_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TalosSpec {
    #[serde(default)]
    pub control_planes: Option<u32>,
    #[serde(default)]
    pub workers: Option<u32>,
    #[serde(default)]
    pub config: Option<String>,
    #[serde(default)]
    pub iso: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HetznerLocation {
    Fsn1,
    Nbg1,
    Hel1,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HetznerSpec {
    #[serde(default)]
    pub control_plane_server_type: Option<String>,
    #[serde(default)]
    pub worker_server_type: Option<String>,
    #[serde(default)]
    pub location: Option<HetznerLocation>,
    #[serde(default)]
    pub network_name: Option<String>,
    #[serde(default)]
    pub network_cidr: Option<String>,
    #[serde(default)]
    pub ssh_key_name: Option<String>,
    #[serde(default)]
    pub token_env_var: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    #[serde(default)]
    pub source_directory: Option<String>,
    #[serde(default)]
    pub validate_on_push: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChatSpec {
    #[serde(default)]
    pub model: Option<String>,
}

/// Parse a duration spec like `5m`, `30s`, `1h` (§6 connection.timeout).
pub fn parse_duration_spec(raw: &str) -> Option<std::time::Duration> {
    let raw = raw.trim();
    let (number, unit) = raw.split_at(raw.len().checked_sub(1)?);
    let value: u64 = number.parse().ok()?;
    match unit {
        "s" => Some(std::time::Duration::from_secs(value)),
        "m" => Some(std::time::Duration::from_secs(value * 60)),
        "h" => Some(std::time::Duration::from_secs(value * 3600)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minute_duration() {
        assert_eq!(
            parse_duration_spec("5m"),
            Some(std::time::Duration::from_secs(300))
        );
    }

    #[test]
    fn rejects_unknown_unit() {
        assert_eq!(parse_duration_spec("5x"), None);
    }
}
