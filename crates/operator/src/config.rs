//! Controller settings. The CLI fills these from flags and `ODG_*` env vars.

use std::path::PathBuf;
use std::sync::Arc;

use odg_chart::{ChartError, ComponentChartResolver, HelmCli, OcmRepository, RegistryClient};

pub const DEFAULT_OCM_REPOSITORY: &str = "europe-docker.pkg.dev/gardener-project/releases";
pub const DEFAULT_COMPONENT_NAME: &str = "ocm.software/ocm-gear";

/// Where the platform component lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentSettings {
    /// `host[/path]` of the OCM repository.
    pub ocm_repository: String,
    pub component_name: String,
    /// Registries reached over plain HTTP.
    pub plain_http: Vec<String>,
}

impl Default for ComponentSettings {
    fn default() -> Self {
        Self {
            ocm_repository: DEFAULT_OCM_REPOSITORY.to_string(),
            component_name: DEFAULT_COMPONENT_NAME.to_string(),
            plain_http: Vec::new(),
        }
    }
}

impl ComponentSettings {
    pub fn registry(&self) -> Result<Arc<RegistryClient>, ChartError> {
        Ok(Arc::new(RegistryClient::new(self.plain_http.iter().cloned())?))
    }

    pub fn repository(&self, registry: Arc<RegistryClient>) -> Arc<OcmRepository> {
        Arc::new(OcmRepository::new(registry, self.ocm_repository.clone()))
    }

    pub fn resolver(&self, repository: Arc<OcmRepository>) -> ComponentChartResolver<Arc<OcmRepository>> {
        ComponentChartResolver::new(repository, self.component_name.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSettings {
    pub helm_bin: PathBuf,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self { helm_bin: PathBuf::from("helm") }
    }
}

impl RenderSettings {
    pub fn templater(&self) -> HelmCli {
        HelmCli::new(self.helm_bin.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerSettings {
    /// Namespace and name of the config map holding the platform version.
    pub config_namespace: String,
    pub config_name: String,
    pub version_key: String,
    /// Key of the target kubeconfig inside the referenced secret.
    pub kubeconfig_key: String,
    /// Local resource of the platform component carrying the installer archive.
    pub installer_resource: String,
    /// Entry point inside the extracted installer.
    pub script: String,
}

impl Default for InstallerSettings {
    fn default() -> Self {
        Self {
            config_namespace: "odg".to_string(),
            config_name: "odg-cfg".to_string(),
            version_key: "odg_version".to_string(),
            kubeconfig_key: "kubeconfig".to_string(),
            installer_resource: "installation".to_string(),
            script: "install.sh".to_string(),
        }
    }
}
