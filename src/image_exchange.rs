//! §4.9 ImageExchanger: moves container images between the host and cluster node containers
//! via `ctr`, for workload commands that push built images straight into the cluster.
//!
//! Grounded on the teacher's `container_engine::copy_file_between_containers` tar-of-tar
//! helper and `node_provider::NodeProvider::select_export_node`, generalized from a Docker
//! image-layer concern into the containerd-content-store `ctr images export/import` flow the
//! spec names.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;

use crate::cluster::Distribution;
use crate::container_engine::ContainerEngine;
use crate::error::ErrorKind;
use crate::manifest_images::extract_image_refs;
use crate::node_provider::NodeProvider;

#[derive(Debug, thiserror::Error)]
pub enum ImageExchangeError {
    #[error(transparent)]
    Engine(#[from] crate::container_engine::EngineError),
    #[error("validation: {0}")]
    Validation(String),
    #[error("{0}")]
    Fatal(String),
}

impl ImageExchangeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImageExchangeError::Engine(e) => e.kind(),
            ImageExchangeError::Validation(_) => ErrorKind::Validation,
            ImageExchangeError::Fatal(_) => ErrorKind::Fatal,
        }
    }
}

pub struct ExportOptions {
    pub refs: Vec<String>,
    pub output_path: PathBuf,
}

pub struct ImportOptions {
    pub input_path: PathBuf,
}

const EXPORT_TAR_BASENAME: &str = "ksail-image-export.tar";
const IMPORT_TAR_BASENAME: &str = "ksail-image-import.tar";

pub struct ImageExchanger {
    engine: Arc<dyn ContainerEngine>,
    nodes: NodeProvider,
}

impl ImageExchanger {
    pub fn new(engine: Arc<dyn ContainerEngine>, nodes: NodeProvider) -> Self {
        Self { engine, nodes }
    }

    /// Line-oriented image extraction, shared with `installers::ChartInstaller::images` (§4.6,
    /// §4.9 both describe the one regex operation).
    pub fn extract_images_from_manifest(yaml_text: &str) -> Vec<String> {
        extract_image_refs(yaml_text)
    }

    /// §4.9 `export`: forbidden for Talos (no shell/exec access, I3). Picks an export node,
    /// detects its architecture, bulk-exports via `ctr`, retries failed images individually,
    /// then copies the resulting tar out of the node.
    pub async fn export(
        &self,
        cluster_name: &str,
        distribution: Distribution,
        opts: &ExportOptions,
    ) -> Result<(), ImageExchangeError> {
        reject_talos(distribution)?;

        let nodes = self.nodes.list_nodes(distribution, cluster_name).await?;
        let node = NodeProvider::select_export_node(&nodes)
            .ok_or_else(|| ImageExchangeError::Validation(format!("no exportable node found for cluster {cluster_name}")))?;

        let arch = self.detect_arch(&node.name).await?;
        let tmp_dir = tmp_dir_for(distribution);
        let tmp_path = format!("{tmp_dir}/{EXPORT_TAR_BASENAME}");

        let mut refs = opts.refs.clone();
        if let Err(e) = self.ctr_export(&node.name, &tmp_path, &arch, &refs).await {
            warn!(error = %e, "bulk image export failed, retrying images individually");
            let mut succeeded = Vec::new();
            let mut failed = Vec::new();
            for image_ref in &refs {
                match self
                    .ctr_export(&node.name, &tmp_path, &arch, std::slice::from_ref(image_ref))
                    .await
                {
                    Ok(()) => succeeded.push(image_ref.clone()),
                    Err(_) => failed.push(image_ref.clone()),
                }
            }
            if !failed.is_empty() {
                warn!(images = ?failed, "these images could not be exported");
            }
            if succeeded.is_empty() {
                return Err(ImageExchangeError::Fatal(format!(
                    "no images could be exported for cluster {cluster_name}"
                )));
            }
            refs = succeeded;
            self.ctr_export(&node.name, &tmp_path, &arch, &refs).await?;
        }

        let tar_of_tar = self.engine.copy_from_container(&node.name, &tmp_path).await?;
        let inner = unwrap_single_file_tar(&tar_of_tar)
            .map_err(|e| ImageExchangeError::Fatal(format!("unpacking exported tar: {e}")))?;

        tokio::fs::write(&opts.output_path, inner)
            .await
            .map_err(|e| ImageExchangeError::Fatal(format!("writing {}: {e}", opts.output_path.display())))?;

        Ok(())
    }

    /// §4.9 `import`: forbidden for Talos. Every non-helper node gets the tar uploaded and
    /// imported individually; any node failure aborts the whole operation.
    pub async fn import(
        &self,
        cluster_name: &str,
        distribution: Distribution,
        opts: &ImportOptions,
    ) -> Result<(), ImageExchangeError> {
        reject_talos(distribution)?;

        let input_bytes = tokio::fs::read(&opts.input_path)
            .await
            .map_err(|e| ImageExchangeError::Fatal(format!("reading {}: {e}", opts.input_path.display())))?;

        let tmp_dir = tmp_dir_for(distribution);
        let tmp_path = format!("{tmp_dir}/{IMPORT_TAR_BASENAME}");
        let tar_bytes = wrap_single_file_tar(IMPORT_TAR_BASENAME, &input_bytes)
            .map_err(|e| ImageExchangeError::Fatal(format!("building upload tar: {e}")))?;

        let nodes = self.nodes.list_nodes(distribution, cluster_name).await?;
        for node in nodes.iter().filter(|n| !n.role.is_helper()) {
            self.engine
                .copy_to_container(&node.name, tmp_dir, tar_bytes.clone())
                .await?;
            self.engine
                .exec(
                    &node.name,
                    &["ctr", "--namespace=k8s.io", "images", "import", "--digests", &tmp_path],
                )
                .await?;
            self.engine.exec(&node.name, &["rm", "-f", &tmp_path]).await?;
        }

        Ok(())
    }

    async fn detect_arch(&self, node_name: &str) -> Result<String, ImageExchangeError> {
        let output = self.engine.exec(node_name, &["uname", "-m"]).await?;
        Ok(normalize_arch(output.stdout.trim()))
    }

    async fn ctr_export(
        &self,
        node_name: &str,
        tmp_path: &str,
        arch: &str,
        refs: &[String],
    ) -> Result<(), ImageExchangeError> {
        let mut command: Vec<String> = vec![
            "ctr".into(),
            "--namespace=k8s.io".into(),
            "images".into(),
            "export".into(),
            format!("--platform=linux/{arch}"),
            tmp_path.to_string(),
        ];
        command.extend(refs.iter().cloned());
        let command_refs: Vec<&str> = command.iter().map(String::as_str).collect();
        self.engine.exec(node_name, &command_refs).await?;
        Ok(())
    }
}

fn reject_talos(distribution: Distribution) -> Result<(), ImageExchangeError> {
    if distribution == Distribution::Talos {
        return Err(ImageExchangeError::Validation(
            "image exchange is unsupported on Talos nodes (no shell/exec access)".into(),
        ));
    }
    Ok(())
}

/// `/root` for Upstream (its `/tmp` is tmpfs, opaque to `copyFromContainer`), `/tmp` for K3s
/// (§4.9).
fn tmp_dir_for(distribution: Distribution) -> &'static str {
    match distribution {
        Distribution::Upstream => "/root",
        Distribution::K3s => "/tmp",
        Distribution::Talos => unreachable!("rejected by reject_talos before reaching here"),
    }
}

fn normalize_arch(uname_m: &str) -> String {
    match uname_m {
        "x86_64" => "amd64".to_string(),
        "aarch64" | "arm64" => "arm64".to_string(),
        other if other.starts_with("armv") => "arm".to_string(),
        other => other.to_string(),
    }
}

fn unwrap_single_file_tar(tar_bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut archive = tar::Archive::new(std::io::Cursor::new(tar_bytes));
    let mut entries = archive.entries()?;
    let mut entry = entries
        .next()
        .ok_or_else(|| std::io::Error::other("tar archive is empty"))??;
    let mut content = Vec::new();
    std::io::Read::read_to_end(&mut entry, &mut content)?;
    Ok(content)
}

fn wrap_single_file_tar(filename: &str, content: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_path(Path::new(filename))?;
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, std::io::Cursor::new(content))?;
    builder.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_known_uname_values() {
        assert_eq!(normalize_arch("x86_64"), "amd64");
        assert_eq!(normalize_arch("aarch64"), "arm64");
        assert_eq!(normalize_arch("armv7l"), "arm");
    }

    #[test]
    fn tmp_dir_differs_between_upstream_and_k3s() {
        assert_eq!(tmp_dir_for(Distribution::Upstream), "/root");
        assert_eq!(tmp_dir_for(Distribution::K3s), "/tmp");
    }

    #[test]
    fn talos_is_rejected() {
        assert!(reject_talos(Distribution::Talos).is_err());
        assert!(reject_talos(Distribution::Upstream).is_ok());
    }

    #[test]
    fn wrap_and_unwrap_single_file_tar_round_trips() {
        let tar_bytes = wrap_single_file_tar("image.tar", b"hello world").unwrap();
        let unwrapped = unwrap_single_file_tar(&tar_bytes).unwrap();
        assert_eq!(unwrapped, b"hello world");
    }
}
