//! KSail: a developer-facing control plane for ephemeral local Kubernetes clusters.
//!
//! Provisions clusters across distributions (kind-style Upstream, k3d-style K3s, Docker-backed
//! Talos), installs a curated component set, manages a local OCI registry plus pull-through
//! mirrors, and drives a push-then-reconcile GitOps workflow against that registry.

pub mod cluster;
pub mod config;
pub mod container_engine;
pub mod error;
pub mod gitops;
pub mod image_exchange;
pub mod installers;
pub mod kube_client;
pub mod logging;
pub mod manifest_images;
pub mod node_provider;
pub mod orchestrator;
pub mod poll;
pub mod registry;

pub use error::{Error, ErrorKind, Result};
