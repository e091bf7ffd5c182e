use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::error::ModelError;

/// Suffix of every orchestrator-owned derived object name.
pub const META_SUFFIX: &str = "odge";

/// Closed set of extension kinds an installation can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtensionType {
    DeliveryService,
    DeliveryDashboard,
    DeliveryDb,
    MalwareScanner,
    ArtefactEnumerator,
    BacklogController,
    IngressNginx,
}

impl ExtensionType {
    pub const ALL: [ExtensionType; 7] = [
        ExtensionType::DeliveryService,
        ExtensionType::DeliveryDashboard,
        ExtensionType::DeliveryDb,
        ExtensionType::MalwareScanner,
        ExtensionType::ArtefactEnumerator,
        ExtensionType::BacklogController,
        ExtensionType::IngressNginx,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionType::DeliveryService => "delivery-service",
            ExtensionType::DeliveryDashboard => "delivery-dashboard",
            ExtensionType::DeliveryDb => "delivery-db",
            ExtensionType::MalwareScanner => "malware-scanner",
            ExtensionType::ArtefactEnumerator => "artefact-enumerator",
            ExtensionType::BacklogController => "backlog-controller",
            ExtensionType::IngressNginx => "ingress-nginx",
        }
    }
}

impl fmt::Display for ExtensionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtensionType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExtensionType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| ModelError::UnknownExtensionType(s.to_string()))
    }
}

/// Names of the derived managed resource and secret backing one extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionMeta {
    pub managed_resource_name: String,
    pub secret_name: String,
}

impl ExtensionMeta {
    pub fn for_type(ty: ExtensionType) -> Self {
        let name = format!("{}-{}", ty, META_SUFFIX);
        Self { managed_resource_name: name.clone(), secret_name: name }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extension {
    #[serde(rename = "type")]
    pub ty: ExtensionType,
    pub base_url: String,
    pub meta: ExtensionMeta,
    pub cfg: Json,
}

impl Extension {
    pub fn new(ty: ExtensionType, base_url: impl Into<String>, cfg: Json) -> Self {
        Self { ty, base_url: base_url.into(), meta: ExtensionMeta::for_type(ty), cfg }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installation {
    pub target_namespace: String,
    pub origin_namespace: String,
    pub extensions: Vec<Extension>,
    pub platform_version: String,
}

impl Installation {
    /// Build an installation from the explicitly declared `(type, cfg)` pairs.
    ///
    /// Unknown and repeated types are rejected; a missing (`null`) cfg becomes an empty mapping.
    pub fn declare<I, S>(
        origin_namespace: &str,
        target_namespace: &str,
        platform_version: &str,
        base_url: &str,
        declared: I,
    ) -> Result<Self, ModelError>
    where
        I: IntoIterator<Item = (S, Json)>,
        S: AsRef<str>,
    {
        let mut seen = BTreeSet::new();
        let mut extensions = Vec::new();
        for (raw_type, cfg) in declared {
            let ty: ExtensionType = raw_type.as_ref().parse()?;
            if !seen.insert(ty) {
                return Err(ModelError::DuplicateExtension(ty));
            }
            let cfg = match cfg {
                Json::Null => Json::Object(Map::new()),
                obj @ Json::Object(_) => obj,
                _ => return Err(ModelError::InvalidConfig(ty)),
            };
            extensions.push(Extension::new(ty, base_url, cfg));
        }
        Ok(Self {
            target_namespace: target_namespace.to_string(),
            origin_namespace: origin_namespace.to_string(),
            extensions,
            platform_version: platform_version.to_string(),
        })
    }

    pub fn extension(&self, ty: ExtensionType) -> Option<&Extension> {
        self.extensions.iter().find(|e| e.ty == ty)
    }
}

/// Fully resolved renderer input, carried from orchestrator to renderer by an `ODGE` resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionTemplate {
    pub cfg: Json,
    pub chart_reference: String,
    #[serde(rename = "type")]
    pub ty: ExtensionType,
    pub namespace: String,
    pub base_url: String,
}

/// Which cluster the resource manager applies a managed resource's manifests to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagedResourceClass {
    Internal,
    External,
}

impl ManagedResourceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManagedResourceClass::Internal => "internal",
            ManagedResourceClass::External => "external",
        }
    }
}
