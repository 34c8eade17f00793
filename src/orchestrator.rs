//! §4.7 InstallerOrchestrator: executes an `InstallPlan`'s dependency graph with a bounded
//! worker pool, cooperative cancellation, and first-fatal-wins error aggregation.
//!
//! Grounded on the teacher's sequential `Installer::run_to_completion` state machine in
//! `examples/other_examples/.../crates-installer-src-orchestrator.rs.rs` (step-by-step
//! execution with error capture and a transient-retry branch) — generalized from one fixed
//! linear sequence of steps into a dependency DAG where independent nodes run concurrently,
//! bounded by a worker pool instead of the teacher's one-step-at-a-time loop.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::installers::{ComponentInstaller, InstallContext, InstallError};

/// One node in the install dependency graph: a component plus the keys of components it must
/// wait on (§4.7 default dependency edges).
pub struct InstallNode {
    pub key: String,
    pub installer: Arc<dyn ComponentInstaller>,
    pub depends_on: Vec<String>,
}

/// A partial order of `ComponentInstaller` invocations (§3 InstallPlan).
#[derive(Default)]
pub struct InstallPlan {
    pub nodes: Vec<InstallNode>,
}

pub const KEY_CNI: &str = "cni";
pub const KEY_CSI: &str = "csi";
pub const KEY_METRICS_SERVER: &str = "metrics-server";
pub const KEY_CERT_MANAGER: &str = "cert-manager";
pub const KEY_POLICY_ENGINE: &str = "policy-engine";

impl InstallPlan {
    pub fn builder() -> InstallPlanBuilder {
        InstallPlanBuilder::default()
    }
}

/// Builds an `InstallPlan` with the default dependency edges from §4.7: cert-manager before
/// the policy engine, CNI before metrics-server and CSI. Components that weren't selected
/// (`None`) simply have no node in the plan — no conditional branches inside installers
/// themselves (§4.6.1, §9).
#[derive(Default)]
pub struct InstallPlanBuilder {
    cni: Option<Arc<dyn ComponentInstaller>>,
    csi: Option<Arc<dyn ComponentInstaller>>,
    metrics_server: Option<Arc<dyn ComponentInstaller>>,
    cert_manager: Option<Arc<dyn ComponentInstaller>>,
    policy_engine: Option<Arc<dyn ComponentInstaller>>,
}

impl InstallPlanBuilder {
    pub fn cni(mut self, installer: Arc<dyn ComponentInstaller>) -> Self {
        self.cni = Some(installer);
        self
    }
    pub fn csi(mut self, installer: Arc<dyn ComponentInstaller>) -> Self {
        self.csi = Some(installer);
        self
    }
    pub fn metrics_server(mut self, installer: Arc<dyn ComponentInstaller>) -> Self {
        self.metrics_server = Some(installer);
        self
    }
    pub fn cert_manager(mut self, installer: Arc<dyn ComponentInstaller>) -> Self {
        self.cert_manager = Some(installer);
        self
    }
    pub fn policy_engine(mut self, installer: Arc<dyn ComponentInstaller>) -> Self {
        self.policy_engine = Some(installer);
        self
    }

    pub fn build(self) -> InstallPlan {
        let mut nodes = Vec::new();
        let has_cni = self.cni.is_some();
        let has_cert_manager = self.cert_manager.is_some();

        if let Some(installer) = self.cni {
            nodes.push(InstallNode {
                key: KEY_CNI.to_string(),
                installer,
                depends_on: vec![],
            });
        }
        if let Some(installer) = self.cert_manager {
            nodes.push(InstallNode {
                key: KEY_CERT_MANAGER.to_string(),
                installer,
                depends_on: vec![],
            });
        }
        if let Some(installer) = self.metrics_server {
            nodes.push(InstallNode {
                key: KEY_METRICS_SERVER.to_string(),
                installer,
                depends_on: if has_cni { vec![KEY_CNI.to_string()] } else { vec![] },
            });
        }
        if let Some(installer) = self.csi {
            nodes.push(InstallNode {
                key: KEY_CSI.to_string(),
                installer,
                depends_on: if has_cni { vec![KEY_CNI.to_string()] } else { vec![] },
            });
        }
        if let Some(installer) = self.policy_engine {
            nodes.push(InstallNode {
                key: KEY_POLICY_ENGINE.to_string(),
                installer,
                depends_on: if has_cert_manager {
                    vec![KEY_CERT_MANAGER.to_string()]
                } else {
                    vec![]
                },
            });
        }

        InstallPlan { nodes }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{count} installer(s) failed; first: {first}", count = others.len() + 1)]
pub struct OrchestratorError {
    pub first: InstallError,
    pub others: Vec<InstallError>,
}

pub struct InstallerOrchestrator {
    concurrency: usize,
}

impl InstallerOrchestrator {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Execute every node in `plan`, honoring dependency edges. Independent nodes run
    /// concurrently up to the configured worker-pool size; a node only starts once every node
    /// it depends on has completed successfully. The first failure cancels not-yet-started
    /// work and is returned as `OrchestratorError::first`; every other failure observed before
    /// the in-flight pool drains is appended to `others` (§4.7).
    pub async fn run(
        &self,
        plan: InstallPlan,
        ctx: Arc<InstallContext>,
    ) -> Result<(), OrchestratorError> {
        let cancel = CancellationToken::new();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        let mut remaining_deps: HashMap<String, usize> = HashMap::new();
        let mut installers: HashMap<String, Arc<dyn ComponentInstaller>> = HashMap::new();

        for node in plan.nodes {
            remaining_deps.insert(node.key.clone(), node.depends_on.len());
            for dep in &node.depends_on {
                dependents.entry(dep.clone()).or_default().push(node.key.clone());
            }
            installers.insert(node.key.clone(), node.installer);
        }

        let mut ready: VecDeque<String> = remaining_deps
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(key, _)| key.clone())
            .collect();

        let mut join_set: JoinSet<(String, Result<(), InstallError>)> = JoinSet::new();
        let mut in_flight = 0usize;
        let mut errors: Vec<InstallError> = Vec::new();

        loop {
            while let Some(key) = ready.pop_front() {
                let installer = installers.get(&key).expect("ready key has an installer").clone();
                let ctx = ctx.clone();
                let cancel = cancel.clone();
                let semaphore = semaphore.clone();
                let key_owned = key.clone();
                join_set.spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .expect("semaphore is never closed");
                    if cancel.is_cancelled() {
                        return (
                            key_owned,
                            Err(InstallError::Fatal("cancelled after an earlier installer failure".into())),
                        );
                    }
                    info!(component = %key_owned, "installing component");
                    let result = match tokio::time::timeout(ctx.apply_deadline(), installer.install(&ctx)).await {
                        Ok(result) => result,
                        Err(_) => Err(InstallError::Timeout(format!(
                            "{key_owned} did not complete within its apply deadline"
                        ))),
                    };
                    (key_owned, result)
                });
                in_flight += 1;
            }

            if in_flight == 0 {
                break;
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            in_flight -= 1;

            let (key, result) = match joined {
                Ok(pair) => pair,
                Err(join_err) => {
                    errors.push(InstallError::Fatal(format!("installer task panicked: {join_err}")));
                    cancel.cancel();
                    continue;
                }
            };

            match result {
                Ok(()) => {
                    if let Some(next) = dependents.get(&key) {
                        for dependent in next {
                            let count = remaining_deps
                                .get_mut(dependent)
                                .expect("dependent tracked in remaining_deps");
                            *count -= 1;
                            if *count == 0 {
                                ready.push_back(dependent.clone());
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(component = %key, error = %e, "installer failed");
                    cancel.cancel();
                    errors.push(e);
                }
            }
        }

        if !errors.is_empty() && errors.len() > 1 {
            warn!(failed = errors.len(), "multiple installers failed");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            let first = errors.remove(0);
            Err(OrchestratorError { first, others: errors })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingInstaller {
        key: String,
        order: Arc<std::sync::Mutex<Vec<String>>>,
        fails: bool,
    }

    #[async_trait]
    impl ComponentInstaller for RecordingInstaller {
        fn name(&self) -> &str {
            &self.key
        }

        async fn install(&self, _ctx: &InstallContext) -> Result<(), InstallError> {
            self.order.lock().unwrap().push(self.key.clone());
            if self.fails {
                return Err(InstallError::Fatal(format!("{} failed", self.key)));
            }
            Ok(())
        }

        async fn uninstall(&self, _ctx: &InstallContext) -> Result<(), InstallError> {
            Ok(())
        }

        async fn images(&self, _ctx: &InstallContext) -> Result<Vec<String>, InstallError> {
            Ok(vec![])
        }
    }

    fn ctx() -> Arc<InstallContext> {
        Arc::new(InstallContext::new(
            crate::kube_client::KubeClientFactory::new(None, None),
            std::time::Duration::from_secs(30),
        ))
    }

    #[tokio::test]
    async fn cert_manager_runs_before_policy_engine() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let plan = InstallPlan::builder()
            .cert_manager(Arc::new(RecordingInstaller {
                key: KEY_CERT_MANAGER.to_string(),
                order: order.clone(),
                fails: false,
            }))
            .policy_engine(Arc::new(RecordingInstaller {
                key: KEY_POLICY_ENGINE.to_string(),
                order: order.clone(),
                fails: false,
            }))
            .build();

        let orchestrator = InstallerOrchestrator::new(4);
        orchestrator.run(plan, ctx()).await.unwrap();

        let observed = order.lock().unwrap().clone();
        assert_eq!(observed, vec![KEY_CERT_MANAGER, KEY_POLICY_ENGINE]);
    }

    #[tokio::test]
    async fn failure_is_returned_and_dependents_never_run() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let plan = InstallPlan::builder()
            .cni(Arc::new(RecordingInstaller {
                key: KEY_CNI.to_string(),
                order: order.clone(),
                fails: true,
            }))
            .metrics_server(Arc::new(RecordingInstaller {
                key: KEY_METRICS_SERVER.to_string(),
                order: order.clone(),
                fails: false,
            }))
            .build();

        let orchestrator = InstallerOrchestrator::new(4);
        let result = orchestrator.run(plan, ctx()).await;
        assert!(result.is_err());

        let observed = order.lock().unwrap().clone();
        assert_eq!(observed, vec![KEY_CNI]);
    }

    #[tokio::test]
    async fn independent_nodes_run_concurrently_up_to_the_worker_pool() {
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        struct SlowInstaller {
            concurrent: Arc<AtomicUsize>,
            max_concurrent: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl ComponentInstaller for SlowInstaller {
            fn name(&self) -> &str {
                "slow"
            }

            async fn install(&self, _ctx: &InstallContext) -> Result<(), InstallError> {
                let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_concurrent.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                self.concurrent.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
            async fn uninstall(&self, _ctx: &InstallContext) -> Result<(), InstallError> {
                Ok(())
            }
            async fn images(&self, _ctx: &InstallContext) -> Result<Vec<String>, InstallError> {
                Ok(vec![])
            }
        }

        let plan = InstallPlan::builder()
            .cni(Arc::new(SlowInstaller {
                concurrent: concurrent.clone(),
                max_concurrent: max_concurrent.clone(),
            }))
            .cert_manager(Arc::new(SlowInstaller {
                concurrent: concurrent.clone(),
                max_concurrent: max_concurrent.clone(),
            }))
            .build();

        let orchestrator = InstallerOrchestrator::new(4);
        orchestrator.run(plan, ctx()).await.unwrap();

        assert!(max_concurrent.load(Ordering::SeqCst) >= 2);
    }
}
