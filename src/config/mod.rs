mod error;
mod expand;
mod registry_ref;
mod resolver;
mod types;

pub use error::ConfigError;
pub use expand::{expand_env_placeholders, expand_env_placeholders_bytes};
pub use registry_ref::{parse_registry_ref, RegistryRef};
pub use resolver::{ConfigResolver, ResolvedConfig};
pub use types::{
    parse_duration_spec, ChatSpec, CniKind, ClusterSpec, ClusterSpecInner, ConnectionSpec,
    DistributionName, GitOpsEngineKind, HetznerLocation, HetznerSpec, KsailConfigFile,
    LocalRegistrySpec, PolicyEngineKind, TalosSpec, TriState, VanillaSpec, WorkloadSpec,
};
