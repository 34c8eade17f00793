//! §4.2 RegistryManager: lifecycle of local-registry and mirror containers shared across
//! clusters.
//!
//! Grounded on the teacher's `cluster/docker.rs` container/volume/network primitives,
//! generalized from the teacher's single hard-coded `k3d-registry` into the spec's general
//! shared-registry model (§3 RegistryInstance). Health polling is grounded on the teacher's
//! `cluster/k3s.rs` `wait_for_api` steady-ticker pattern.

mod error;

pub use error::RegistryError;

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::container_engine::{ContainerEngine, ContainerRunConfig};

/// Distribution prefixes stripped when deriving a volume name from a container/cluster name
/// (§8 Testable Property 8, GLOSSARY ClusterPrefix).
const DISTRIBUTION_PREFIXES: &[&str] = &["kind-", "k3d-", "talos-"];

/// `"kind-X"`/`"k3d-X"` normalize to `X`; other inputs are trimmed unchanged; whitespace-only
/// inputs normalize to empty (§8 Testable Property 8).
pub fn normalize_volume_name(raw: &str) -> String {
    let trimmed = raw.trim();
    for prefix in DISTRIBUTION_PREFIXES {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return rest.to_string();
        }
    }
    trimmed.to_string()
}

#[derive(Debug, Clone)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub name: String,
    pub image: String,
    /// Empty means a local (push-able) registry; non-empty means a pull-through mirror.
    pub upstream_url: String,
    pub host_port: Option<u16>,
    pub volume_name: Option<String>,
    pub network_name: String,
    pub credentials: Option<RegistryCredentials>,
}

impl RegistryConfig {
    pub fn is_mirror(&self) -> bool {
        !self.upstream_url.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct RegistryInfo {
    pub name: String,
    pub is_ksail_owned: bool,
    pub networks: Vec<String>,
    pub host_port: Option<u16>,
}

const MANAGED_BY_LABEL: &str = "managedBy=ksail";
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const CONSECUTIVE_REFUSALS_BEFORE_CRASH_CHECK: u32 = 6;

pub struct RegistryManager {
    engine: std::sync::Arc<dyn ContainerEngine>,
    http: reqwest::Client,
}

impl RegistryManager {
    pub fn new(engine: std::sync::Arc<dyn ContainerEngine>) -> Self {
        Self {
            engine,
            http: reqwest::Client::new(),
        }
    }

    fn derive_volume_name(&self, config: &RegistryConfig) -> String {
        config
            .volume_name
            .clone()
            .unwrap_or_else(|| normalize_volume_name(&config.name))
    }

    /// Create a registry, or join an existing one to another cluster's network (§4.2 create).
    pub async fn create(&self, config: &RegistryConfig) -> Result<(), RegistryError> {
        if let Ok(detail) = self.engine.inspect(&config.name).await {
            if !detail.networks.iter().any(|n| n == &config.network_name) {
                info!(registry = %config.name, network = %config.network_name, "attaching existing shared registry to new cluster network");
                self.engine
                    .network_connect(&config.network_name, &config.name)
                    .await?;
            }
            return Ok(());
        }

        if self.engine.image_inspect(&config.image).await.is_err() {
            debug!(image = %config.image, "pulling registry image");
            self.engine.image_pull(&config.image).await?;
        }

        let volume_name = self.derive_volume_name(config);
        if self.engine.volume_inspect(&volume_name).await.is_err() {
            self.engine.volume_create(&volume_name).await?;
        }

        let mut labels = HashMap::new();
        labels.insert("managedBy".to_string(), "ksail".to_string());
        labels.insert("name".to_string(), config.name.clone());

        let mut env = Vec::new();
        if !config.upstream_url.is_empty() {
            env.push((
                "REGISTRY_PROXY_REMOTEURL".to_string(),
                config.upstream_url.clone(),
            ));
        }
        if let Some(creds) = &config.credentials {
            env.push((
                "REGISTRY_PROXY_USERNAME".to_string(),
                creds.username.clone(),
            ));
            env.push((
                "REGISTRY_PROXY_PASSWORD".to_string(),
                creds.password.clone(),
            ));
        }

        let port_bindings = if config.upstream_url.is_empty() {
            match config.host_port {
                Some(p) => vec![(p, 5000u16)],
                None => vec![],
            }
        } else {
            // Mirrors are network-only: never host-bound (§4.2 invariant).
            vec![]
        };

        let run_config = ContainerRunConfig {
            name: config.name.clone(),
            hostname: Some(config.name.clone()),
            image: config.image.clone(),
            labels,
            env,
            port_bindings,
            network: Some(config.network_name.clone()),
            binds: vec![(volume_name, "/var/lib/registry".to_string())],
            ..Default::default()
        };

        self.engine.create(&run_config).await?;
        self.engine.start(&config.name).await?;
        info!(registry = %config.name, mirror = config.is_mirror(), "registry container started");
        Ok(())
    }

    /// Detach a registry from one network, deleting it entirely once no cluster network
    /// references it anymore (§4.2 delete).
    pub async fn delete(
        &self,
        name: &str,
        delete_volume: bool,
        network_name: &str,
        volume_name: Option<&str>,
    ) -> Result<(), RegistryError> {
        self.engine
            .network_disconnect(network_name, name, true)
            .await?;

        let detail = match self.engine.inspect(name).await {
            Ok(d) => d,
            Err(e) if e.kind() == crate::error::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        if !detail.networks.is_empty() {
            debug!(registry = %name, remaining = ?detail.networks, "registry still attached to other cluster networks, keeping it");
            return Ok(());
        }

        self.engine.stop(name).await.ok();
        self.engine.remove(name, true).await?;

        if delete_volume {
            let candidates = [
                volume_name.map(str::to_string),
                Some(normalize_volume_name(name)),
                Some(name.to_string()),
            ];
            for candidate in candidates.into_iter().flatten() {
                self.engine.volume_remove(&candidate).await?;
            }
        }

        info!(registry = %name, "registry deleted (last cluster network detached)");
        Ok(())
    }

    pub async fn is_in_use(&self, name: &str) -> bool {
        match self.engine.inspect(name).await {
            Ok(detail) => !detail.networks.is_empty(),
            Err(_) => false,
        }
    }

    pub async fn get_port(&self, name: &str) -> Result<u16, RegistryError> {
        let detail = self.engine.inspect(name).await?;
        detail
            .host_port
            .ok_or_else(|| RegistryError::PortNotFound(name.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<String>, RegistryError> {
        let containers = self
            .engine
            .list_containers(&[MANAGED_BY_LABEL.to_string()])
            .await?;
        Ok(containers
            .into_iter()
            .flat_map(|c| c.names)
            .collect())
    }

    pub async fn find_by_suffix(&self, suffix: &str) -> Result<Option<String>, RegistryError> {
        let names = self.list().await?;
        Ok(names.into_iter().find(|n| n.ends_with(suffix)))
    }

    pub async fn disconnect_all_from_network(&self, network: &str) -> Result<usize, RegistryError> {
        let infos = self.list_on_network(network).await?;
        let mut count = 0;
        for info in infos {
            self.engine
                .network_disconnect(network, &info.name, true)
                .await?;
            count += 1;
        }
        Ok(count)
    }

    pub async fn delete_on_network(
        &self,
        network: &str,
        delete_volumes: bool,
    ) -> Result<Vec<String>, RegistryError> {
        let infos = self.list_on_network(network).await?;
        let mut deleted = Vec::new();
        for info in infos {
            if !info.is_ksail_owned {
                continue;
            }
            self.delete(&info.name, delete_volumes, network, None)
                .await?;
            if !self.is_in_use(&info.name).await {
                deleted.push(info.name);
            }
        }
        Ok(deleted)
    }

    /// All registries on a network, including non-KSail-owned ones (§4.2).
    pub async fn list_on_network(&self, network: &str) -> Result<Vec<RegistryInfo>, RegistryError> {
        let containers = self.engine.list_containers(&[]).await?;
        let mut out = Vec::new();
        for c in containers {
            let detail = match self.engine.inspect(&c.id).await {
                Ok(d) => d,
                Err(_) => continue,
            };
            if !detail.networks.iter().any(|n| n == network) {
                continue;
            }
            let is_ksail_owned = detail
                .labels
                .get("managedBy")
                .map(|v| v == "ksail")
                .unwrap_or(false);
            out.push(RegistryInfo {
                name: detail.name,
                is_ksail_owned,
                networks: detail.networks,
                host_port: detail.host_port,
            });
        }
        Ok(out)
    }

    /// Poll the registry's `/v2/` endpoint (or, for mirrors, just container-running state)
    /// until ready or `timeout` elapses (§4.2 waitReady).
    pub async fn wait_ready(&self, name: &str, timeout: Duration) -> Result<(), RegistryError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut consecutive_refusals = 0u32;
        let mut ticker = tokio::time::interval(POLL_INTERVAL);

        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(RegistryError::NotReady {
                    name: name.to_string(),
                    reason: "timed out waiting for readiness".to_string(),
                });
            }
            ticker.tick().await;

            let port = match self.engine.inspect(name).await {
                Ok(detail) => {
                    if detail.host_port.is_none() {
                        // Mirror: running is the only observable signal.
                        if detail.running {
                            return Ok(());
                        }
                        continue;
                    }
                    detail.host_port
                }
                Err(_) => None,
            };

            let Some(port) = port else { continue };
            let url = format!("http://127.0.0.1:{port}/v2/");
            match self.http.get(&url).send().await {
                Ok(resp) if resp.status().as_u16() == 200 || resp.status().as_u16() == 401 => {
                    return Ok(());
                }
                Ok(_) => {
                    consecutive_refusals = 0;
                }
                Err(e) if e.is_connect() => {
                    consecutive_refusals += 1;
                    if consecutive_refusals >= CONSECUTIVE_REFUSALS_BEFORE_CRASH_CHECK {
                        if let Ok(detail) = self.engine.inspect(name).await {
                            if !detail.running {
                                return Err(RegistryError::NotReady {
                                    name: name.to_string(),
                                    reason: "container crashed".to_string(),
                                });
                            }
                        }
                        consecutive_refusals = 0;
                    }
                }
                Err(_) => {
                    warn!(registry = %name, "transient error probing registry health");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_name_strips_recognized_prefixes() {
        assert_eq!(normalize_volume_name("kind-dev"), "dev");
        assert_eq!(normalize_volume_name("k3d-dev"), "dev");
        assert_eq!(normalize_volume_name("talos-dev"), "dev");
        assert_eq!(normalize_volume_name("shared"), "shared");
        assert_eq!(normalize_volume_name("  shared  "), "shared");
        assert_eq!(normalize_volume_name("   "), "");
    }

    #[test]
    fn mirror_config_is_detected_by_nonempty_upstream() {
        let mirror = RegistryConfig {
            name: "docker-io-mirror".into(),
            image: "registry:2".into(),
            upstream_url: "https://registry-1.docker.io".into(),
            host_port: None,
            volume_name: None,
            network_name: "k3d-dev".into(),
            credentials: None,
        };
        assert!(mirror.is_mirror());

        let local = RegistryConfig {
            upstream_url: String::new(),
            ..mirror.clone()
        };
        assert!(!local.is_mirror());
    }
}
