//! §4.6 ComponentInstaller: idempotent install/upgrade/uninstall of one cluster component.
//!
//! Grounded on the teacher's `cluster/kube_ops.rs::apply_yaml` (patch-then-create against a
//! `DynamicObject`) and `cluster/traefik.rs` (a hand-written manifest string applied through
//! that routine) — generalized from one hard-coded Traefik customization into the general
//! `ComponentInstaller` contract with one implementor per selectable component (§4.6.1).

mod chart;
pub mod components;
mod error;

pub use chart::{ChartInstaller, ChartSpec};
pub use error::InstallError;

use std::time::Duration;

use async_trait::async_trait;

use crate::kube_client::KubeClientFactory;

/// Buffer the apply step's context deadline carries beyond its declared wait timeout (§4.6):
/// the manifest apply itself waits for kstatus convergence, so the caller's budget must exceed
/// that wait or a healthy rollout gets aborted mid-convergence.
pub const APPLY_DEADLINE_BUFFER: Duration = Duration::from_secs(5 * 60);

pub struct InstallContext {
    pub factory: KubeClientFactory,
    pub wait_timeout: Duration,
}

impl InstallContext {
    pub fn new(factory: KubeClientFactory, wait_timeout: Duration) -> Self {
        Self {
            factory,
            wait_timeout,
        }
    }

    pub fn apply_deadline(&self) -> Duration {
        self.wait_timeout + APPLY_DEADLINE_BUFFER
    }
}

/// One selectable component's lifecycle (§4.6): `install`, `uninstall`, and `images` (the
/// image references it introduces, for later mirroring/export).
#[async_trait]
pub trait ComponentInstaller: Send + Sync {
    fn name(&self) -> &str;
    async fn install(&self, ctx: &InstallContext) -> Result<(), InstallError>;
    async fn uninstall(&self, ctx: &InstallContext) -> Result<(), InstallError>;
    async fn images(&self, ctx: &InstallContext) -> Result<Vec<String>, InstallError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_deadline_exceeds_wait_timeout_by_the_fixed_buffer() {
        let ctx = InstallContext::new(KubeClientFactory::new(None, None), Duration::from_secs(60));
        assert_eq!(ctx.apply_deadline(), Duration::from_secs(60) + APPLY_DEADLINE_BUFFER);
    }
}
