//! §4.1 ContainerEngine: a thin semantic wrapper over the host container daemon.
//!
//! Grounded on the teacher's `cluster/docker.rs` `DockerManager`, trimmed of its TUI-only
//! cgroups CPU/memory sampling and generalized into the operation set the spec names:
//! container/volume/network CRUD, exec, streaming copy, image pull.

mod error;

pub use error::EngineError;

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::PathBuf;

use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, DownloadFromContainerOptions,
    InspectContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::{CreateImageOptions, InspectImageOptions};
use bollard::models::{ContainerInspectResponse, HostConfig, ImageInspect, PortBinding};
use bollard::network::{
    ConnectNetworkOptions, CreateNetworkOptions, DisconnectNetworkOptions, InspectNetworkOptions,
};
use bollard::volume::{CreateVolumeOptions, RemoveVolumeOptions};
use bollard::{body_full, Docker};
use futures_util::StreamExt;

/// Declarative container-run request, analogous to `docker run`.
#[derive(Debug, Clone, Default)]
pub struct ContainerRunConfig {
    pub name: String,
    pub hostname: Option<String>,
    pub image: String,
    pub labels: HashMap<String, String>,
    pub env: Vec<(String, String)>,
    /// `(host_port, container_port)`; empty for containers with no host binding.
    pub port_bindings: Vec<(u16, u16)>,
    pub network: Option<String>,
    pub privileged: bool,
    /// `(volume_or_host_path, container_path)`.
    pub binds: Vec<(String, String)>,
    pub command: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
    pub labels: HashMap<String, String>,
    pub state: String,
}

#[derive(Debug, Clone)]
pub struct ContainerDetail {
    pub id: String,
    pub name: String,
    pub running: bool,
    pub labels: HashMap<String, String>,
    /// Names of the container-daemon networks this container is currently attached to.
    pub networks: Vec<String>,
    /// First host-bound port, if any (registries bind at most one).
    pub host_port: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

/// Operations a consumer needs from the host container daemon. Exists so
/// `RegistryManager`/`NodeProvider`/`ClusterProvisioner`/`ImageExchanger` can be tested against
/// a fake without a live daemon.
#[async_trait::async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn list_containers(
        &self,
        label_filters: &[String],
    ) -> Result<Vec<ContainerSummary>, EngineError>;

    async fn inspect(&self, id: &str) -> Result<ContainerDetail, EngineError>;

    async fn create(&self, config: &ContainerRunConfig) -> Result<(), EngineError>;
    async fn start(&self, id: &str) -> Result<(), EngineError>;
    async fn stop(&self, id: &str) -> Result<(), EngineError>;
    /// Idempotent: removing an absent container is ok, not an error (§4.1).
    async fn remove(&self, id: &str, force: bool) -> Result<(), EngineError>;

    /// Combined stdout/stderr and numeric exit code; non-zero exit is `ExecFailed`.
    async fn exec(&self, container: &str, command: &[&str]) -> Result<ExecOutput, EngineError>;

    async fn copy_from_container(
        &self,
        container: &str,
        src_path: &str,
    ) -> Result<Vec<u8>, EngineError>;
    async fn copy_to_container(
        &self,
        container: &str,
        dst_dir: &str,
        tar_bytes: Vec<u8>,
    ) -> Result<(), EngineError>;

    async fn image_inspect(&self, image: &str) -> Result<ImageInspect, EngineError>;
    async fn image_pull(&self, image: &str) -> Result<(), EngineError>;

    async fn volume_inspect(&self, name: &str) -> Result<(), EngineError>;
    async fn volume_create(&self, name: &str) -> Result<(), EngineError>;
    /// Idempotent: removing an absent volume is ok (§4.2 delete()).
    async fn volume_remove(&self, name: &str) -> Result<(), EngineError>;

    async fn network_create(&self, name: &str) -> Result<(), EngineError>;
    async fn network_remove(&self, name: &str) -> Result<(), EngineError>;
    async fn network_connect(&self, network: &str, container: &str) -> Result<(), EngineError>;
    /// Idempotent: disconnecting from a network the container isn't on is ok (§4.1).
    async fn network_disconnect(
        &self,
        network: &str,
        container: &str,
        force: bool,
    ) -> Result<(), EngineError>;
}

/// `bollard`-backed implementation talking to the local Docker daemon.
pub struct DockerEngine {
    client: Docker,
}

impl DockerEngine {
    pub fn connect() -> Result<Self, EngineError> {
        let client = Docker::connect_with_local_defaults()
            .map_err(|e| EngineError::Fatal(format!("failed to connect to docker: {e}")))?;
        Ok(Self { client })
    }

    pub fn from_socket(socket_path: PathBuf) -> Result<Self, EngineError> {
        let client = Docker::connect_with_unix(
            &socket_path.to_string_lossy(),
            120,
            bollard::API_DEFAULT_VERSION,
        )
        .map_err(|e| {
            EngineError::Fatal(format!("failed to connect to docker at {socket_path:?}: {e}"))
        })?;
        Ok(Self { client })
    }

    pub async fn ping(&self) -> bool {
        self.client.ping().await.is_ok()
    }
}

fn map_bollard_err(op: &str, err: bollard::errors::Error) -> EngineError {
    let message = err.to_string();
    if message.contains("404") || message.to_lowercase().contains("no such") {
        EngineError::NotFound(format!("{op}: {message}"))
    } else if crate::error::is_transient_message(&message) {
        EngineError::Transient(format!("{op}: {message}"))
    } else {
        EngineError::Fatal(format!("{op}: {message}"))
    }
}

#[async_trait::async_trait]
impl ContainerEngine for DockerEngine {
    async fn list_containers(
        &self,
        label_filters: &[String],
    ) -> Result<Vec<ContainerSummary>, EngineError> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        if !label_filters.is_empty() {
            filters.insert("label".to_string(), label_filters.to_vec());
        }
        let containers = self
            .client
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| map_bollard_err("list_containers", e))?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                names: c
                    .names
                    .unwrap_or_default()
                    .into_iter()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .collect(),
                labels: c.labels.unwrap_or_default(),
                state: c.state.unwrap_or_default(),
            })
            .collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDetail, EngineError> {
        let info: ContainerInspectResponse = self
            .client
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_bollard_err("inspect_container", e))?;

        let running = info
            .state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false);
        let labels = info
            .config
            .as_ref()
            .and_then(|c| c.labels.clone())
            .unwrap_or_default();
        let (networks, host_port) = match info.network_settings {
            Some(ns) => {
                let networks = ns
                    .networks
                    .map(|n| n.into_keys().collect())
                    .unwrap_or_default();
                let host_port = ns.ports.and_then(|ports| {
                    ports.into_values().flatten().flatten().find_map(|binding| {
                        binding.host_port.and_then(|p| p.parse::<u16>().ok())
                    })
                });
                (networks, host_port)
            }
            None => (Vec::new(), None),
        };
        let name = info
            .name
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string();

        Ok(ContainerDetail {
            id: info.id.unwrap_or_else(|| id.to_string()),
            name,
            running,
            labels,
            networks,
            host_port,
        })
    }

    async fn create(&self, config: &ContainerRunConfig) -> Result<(), EngineError> {
        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        for (host, container) in &config.port_bindings {
            let key = format!("{container}/tcp");
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(host.to_string()),
                }]),
            );
        }

        let binds: Vec<String> = config
            .binds
            .iter()
            .map(|(src, dst)| format!("{src}:{dst}"))
            .collect();

        let host_config = HostConfig {
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            binds: if binds.is_empty() { None } else { Some(binds) },
            privileged: Some(config.privileged),
            network_mode: config.network.clone(),
            ..Default::default()
        };

        let env: Vec<String> = config
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        let container_config = ContainerConfig {
            image: Some(config.image.clone()),
            hostname: config.hostname.clone(),
            labels: if config.labels.is_empty() {
                None
            } else {
                Some(config.labels.clone())
            },
            env: if env.is_empty() { None } else { Some(env) },
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            host_config: Some(host_config),
            cmd: config.command.clone(),
            ..Default::default()
        };

        self.client
            .create_container(
                Some(CreateContainerOptions {
                    name: config.name.clone(),
                    platform: None,
                }),
                container_config,
            )
            .await
            .map(|_| ())
            .map_err(|e| map_bollard_err("create_container", e))
    }

    async fn start(&self, id: &str) -> Result<(), EngineError> {
        self.client
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| map_bollard_err("start_container", e))
    }

    async fn stop(&self, id: &str) -> Result<(), EngineError> {
        self.client
            .stop_container(id, Some(StopContainerOptions { t: 10 }))
            .await
            .map_err(|e| map_bollard_err("stop_container", e))
    }

    async fn remove(&self, id: &str, force: bool) -> Result<(), EngineError> {
        match self
            .client
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => match map_bollard_err("remove_container", e) {
                EngineError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn exec(&self, container: &str, command: &[&str]) -> Result<ExecOutput, EngineError> {
        let exec = self
            .client
            .create_exec(
                container,
                CreateExecOptions {
                    cmd: Some(command.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| map_bollard_err("create_exec", e))?;

        let result = self
            .client
            .start_exec(&exec.id, Some(StartExecOptions::default()))
            .await
            .map_err(|e| map_bollard_err("start_exec", e))?;

        let mut stdout = String::new();
        if let StartExecResults::Attached { mut output, .. } = result {
            while let Some(msg) = output.next().await {
                if let Ok(msg) = msg {
                    stdout.push_str(&msg.to_string());
                }
            }
        }

        let inspect = self
            .client
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| map_bollard_err("inspect_exec", e))?;
        let exit_code = inspect.exit_code.unwrap_or(0);

        if exit_code != 0 {
            return Err(EngineError::ExecFailed {
                code: exit_code,
                stderr: stdout,
            });
        }

        Ok(ExecOutput {
            stdout,
            stderr: String::new(),
            exit_code,
        })
    }

    async fn copy_from_container(
        &self,
        container: &str,
        src_path: &str,
    ) -> Result<Vec<u8>, EngineError> {
        let mut stream = self.client.download_from_container(
            container,
            Some(DownloadFromContainerOptions { path: src_path }),
        );
        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| map_bollard_err("copy_from_container", e))?;
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }

    async fn copy_to_container(
        &self,
        container: &str,
        dst_dir: &str,
        tar_bytes: Vec<u8>,
    ) -> Result<(), EngineError> {
        self.client
            .upload_to_container(
                container,
                Some(UploadToContainerOptions {
                    path: dst_dir.to_string(),
                    ..Default::default()
                }),
                body_full(tar_bytes.into()),
            )
            .await
            .map_err(|e| map_bollard_err("copy_to_container", e))
    }

    async fn image_inspect(&self, image: &str) -> Result<ImageInspect, EngineError> {
        self.client
            .inspect_image(image, InspectImageOptions::default())
            .await
            .map_err(|e| map_bollard_err("inspect_image", e))
    }

    async fn image_pull(&self, image: &str) -> Result<(), EngineError> {
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });
        let mut stream = self.client.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| map_bollard_err("pull_image", e))?;
        }
        Ok(())
    }

    async fn volume_inspect(&self, name: &str) -> Result<(), EngineError> {
        self.client
            .inspect_volume(name)
            .await
            .map(|_| ())
            .map_err(|e| map_bollard_err("inspect_volume", e))
    }

    async fn volume_create(&self, name: &str) -> Result<(), EngineError> {
        self.client
            .create_volume(CreateVolumeOptions {
                name: name.to_string(),
                ..Default::default()
            })
            .await
            .map(|_| ())
            .map_err(|e| map_bollard_err("create_volume", e))
    }

    async fn volume_remove(&self, name: &str) -> Result<(), EngineError> {
        match self
            .client
            .remove_volume(name, Some(RemoveVolumeOptions { force: true }))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => match map_bollard_err("remove_volume", e) {
                EngineError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn network_create(&self, name: &str) -> Result<(), EngineError> {
        if self
            .client
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
            .is_ok()
        {
            return Ok(());
        }
        self.client
            .create_network(CreateNetworkOptions {
                name: name.to_string(),
                ..Default::default()
            })
            .await
            .map(|_| ())
            .map_err(|e| map_bollard_err("create_network", e))
    }

    async fn network_remove(&self, name: &str) -> Result<(), EngineError> {
        match self.client.remove_network(name).await {
            Ok(()) => Ok(()),
            Err(e) => match map_bollard_err("remove_network", e) {
                EngineError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn network_connect(&self, network: &str, container: &str) -> Result<(), EngineError> {
        self.client
            .connect_network(
                network,
                ConnectNetworkOptions {
                    container: container.to_string(),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| map_bollard_err("connect_network", e))
    }

    async fn network_disconnect(
        &self,
        network: &str,
        container: &str,
        force: bool,
    ) -> Result<(), EngineError> {
        match self
            .client
            .disconnect_network(
                network,
                DisconnectNetworkOptions {
                    container: container.to_string(),
                    force,
                },
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => match map_bollard_err("disconnect_network", e) {
                EngineError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }
}

/// Copy a single file between two containers, renaming it in transit — a tar-of-tar unwrap.
/// Used by `ImageExchanger` when moving install helpers (e.g. a statically linked `ctr`) or
/// extracted image archives between node containers.
pub async fn copy_file_between_containers(
    engine: &dyn ContainerEngine,
    src_container: &str,
    src_path: &str,
    dst_container: &str,
    dst_path: &str,
) -> Result<(), EngineError> {
    let tar_data = engine.copy_from_container(src_container, src_path).await?;

    let dst_path_obj = std::path::Path::new(dst_path);
    let dst_dir = dst_path_obj
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|| "/".to_string());
    let dst_filename = dst_path_obj
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .ok_or_else(|| EngineError::Fatal(format!("invalid destination path: {dst_path}")))?;

    let mut archive = tar::Archive::new(Cursor::new(&tar_data));
    let mut new_tar = tar::Builder::new(Vec::new());
    let mut entries = archive
        .entries()
        .map_err(|e| EngineError::Fatal(format!("reading tar entries: {e}")))?;
    if let Some(entry) = entries.next() {
        let mut entry =
            entry.map_err(|e| EngineError::Fatal(format!("reading tar entry: {e}")))?;
        let mut content = Vec::new();
        entry
            .read_to_end(&mut content)
            .map_err(|e| EngineError::Fatal(format!("reading tar entry content: {e}")))?;

        let mut header = tar::Header::new_gnu();
        header
            .set_path(&dst_filename)
            .map_err(|e| EngineError::Fatal(e.to_string()))?;
        header.set_size(content.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        new_tar
            .append(&header, Cursor::new(content))
            .map_err(|e| EngineError::Fatal(e.to_string()))?;
    }
    let new_tar_data = new_tar
        .into_inner()
        .map_err(|e| EngineError::Fatal(format!("finalizing tar: {e}")))?;

    engine
        .copy_to_container(dst_container, &dst_dir, new_tar_data)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_run_config_defaults_have_no_ports() {
        let cfg = ContainerRunConfig {
            name: "x".into(),
            image: "y".into(),
            ..Default::default()
        };
        assert!(cfg.port_bindings.is_empty());
        assert!(cfg.binds.is_empty());
    }
}
