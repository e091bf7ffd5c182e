//! Custom resource types: the three ODG kinds this operator watches, and the resource-manager
//! `ManagedResource` it derives.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{CustomResource, CustomResourceExt};
use odg_core::{ExtensionTemplate, Installation, ManagedResourceClass, ModelError};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Free-form configuration: no schema beyond "an object the API server keeps as is".
fn preserve_unknown_fields(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    let mut obj = schemars::schema::SchemaObject {
        instance_type: Some(schemars::schema::InstanceType::Object.into()),
        ..Default::default()
    };
    obj.extensions.insert("x-kubernetes-preserve-unknown-fields".into(), Json::Bool(true));
    obj.into()
}

/// Desired platform installation.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "open-delivery-gear.ocm.software",
    version = "v1",
    kind = "ODG",
    root = "Odg",
    plural = "odgs",
    namespaced,
    printcolumn = r#"{"name":"Target","type":"string","jsonPath":".spec.namespace"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#
)]
pub struct OdgSpec {
    /// Namespace workloads are placed in.
    pub namespace: String,
    /// Platform version.
    pub version: String,
    pub base_url: String,
    pub delivery_db_password: String,
    #[serde(default)]
    pub extensions: Vec<DeclaredExtension>,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct DeclaredExtension {
    /// Kept as a plain string on the wire so unknown types are rejected by the model, not the decoder.
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub cfg: Json,
}

/// One fully resolved extension, written by the orchestrator and rendered by the renderer.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "open-delivery-gear.ocm.software",
    version = "v1",
    kind = "ODGE",
    root = "OdgExtension",
    plural = "odges",
    namespaced,
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#
)]
pub struct OdgExtensionSpec {
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub cfg: Json,
    pub helm_chart_ref: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub namespace: String,
    pub base_url: String,
}

/// Remote cluster to bootstrap with the platform installer.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "open-delivery-gear.ocm.software",
    version = "v1",
    kind = "Installation",
    root = "InstallationTarget",
    plural = "installations",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct InstallationTargetSpec {
    /// Secret (same namespace) holding the target cluster's kubeconfig.
    pub secret_ref: SecretRef,
    /// Namespace on the target cluster.
    pub namespace: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SecretRef {
    pub name: String,
}

#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(group = "resources.gardener.cloud", version = "v1alpha1", kind = "ManagedResource", plural = "managedresources", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct ManagedResourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default)]
    pub keep_objects: bool,
    #[serde(default)]
    pub secret_refs: Vec<SecretRef>,
}

impl Odg {
    /// Parse into the closed model; the origin namespace is where this resource lives.
    pub fn installation(&self) -> Result<Installation, ModelError> {
        let origin = self.metadata.namespace.as_deref().ok_or(ModelError::MissingField("metadata.namespace"))?;
        Installation::declare(
            origin,
            &self.spec.namespace,
            &self.spec.version,
            &self.spec.base_url,
            self.spec.extensions.iter().map(|e| (e.ty.as_str(), e.cfg.clone())),
        )
    }
}

impl OdgExtension {
    pub fn from_template(name: &str, namespace: &str, template: &ExtensionTemplate) -> Self {
        let mut odge = OdgExtension::new(
            name,
            OdgExtensionSpec {
                cfg: template.cfg.clone(),
                helm_chart_ref: template.chart_reference.clone(),
                ty: template.ty.to_string(),
                namespace: template.namespace.clone(),
                base_url: template.base_url.clone(),
            },
        );
        odge.metadata.namespace = Some(namespace.to_string());
        odge
    }

    /// A missing (`null`) cfg becomes an empty mapping; any other non-mapping cfg is rejected.
    pub fn template(&self) -> Result<ExtensionTemplate, ModelError> {
        let ty = self.spec.ty.parse()?;
        let cfg = match &self.spec.cfg {
            Json::Null => Json::Object(serde_json::Map::new()),
            obj @ Json::Object(_) => obj.clone(),
            _ => return Err(ModelError::InvalidConfig(ty)),
        };
        Ok(ExtensionTemplate {
            cfg,
            chart_reference: self.spec.helm_chart_ref.clone(),
            ty,
            namespace: self.spec.namespace.clone(),
            base_url: self.spec.base_url.clone(),
        })
    }
}

impl ManagedResource {
    /// Wrapper telling the resource manager to apply the manifests stored in `secret_name`.
    pub fn for_secret(name: &str, namespace: &str, secret_name: &str, class: ManagedResourceClass) -> Self {
        let mut mr = ManagedResource::new(
            name,
            ManagedResourceSpec {
                class: Some(class.as_str().to_string()),
                keep_objects: false,
                secret_refs: vec![SecretRef { name: secret_name.to_string() }],
            },
        );
        mr.metadata.namespace = Some(namespace.to_string());
        mr
    }
}

/// Definitions of the kinds this operator owns (the managed resource kind belongs to Gardener).
pub fn owned_crds() -> Vec<CustomResourceDefinition> {
    vec![Odg::crd(), OdgExtension::crd(), InstallationTarget::crd()]
}
