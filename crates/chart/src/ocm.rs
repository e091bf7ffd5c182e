//! OCM component descriptors stored in an OCI repository.
//!
//! A component version `name:version` lives at `{base}/component-descriptors/{name}:{version}`.
//! The manifest config names the descriptor layer, which is either a tar holding
//! `component-descriptor.yaml` or the YAML document itself.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{ChartError, Result};
use crate::reference::ImageReference;
use crate::registry::{Descriptor, RegistryClient};

pub const HELM_CHART_TYPE: &str = "helmChart";
const DESCRIPTOR_FILE: &str = "component-descriptor.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct ComponentDescriptor {
    pub component: Component,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub component_references: Vec<ComponentReference>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Resource {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(rename = "type")]
    pub ty: String,
    pub access: Access,
}

impl Resource {
    pub fn is_helm_chart(&self) -> bool {
        self.ty.starts_with(HELM_CHART_TYPE)
    }
}

/// Access specification; only the fields this operator reads.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Access {
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub image_reference: Option<String>,
    #[serde(default)]
    pub local_reference: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentReference {
    pub name: String,
    pub component_name: String,
    pub version: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComponentConfig {
    component_descriptor_layer: Descriptor,
}

#[async_trait]
pub trait ComponentLookup: Send + Sync {
    async fn component(&self, name: &str, version: &str) -> Result<Arc<Component>>;
}

#[async_trait]
impl<L: ComponentLookup + ?Sized> ComponentLookup for Arc<L> {
    async fn component(&self, name: &str, version: &str) -> Result<Arc<Component>> {
        (**self).component(name, version).await
    }
}

/// Breadth-first search for the helm chart resource `resource` in `name:version` and every
/// component it references (each component version visited once). Returns the image reference.
pub async fn find_helm_chart<L>(lookup: &L, name: &str, version: &str, resource: &str) -> Result<String>
where
    L: ComponentLookup + ?Sized,
{
    let mut queue = VecDeque::from([(name.to_string(), version.to_string())]);
    let mut visited = HashSet::new();
    while let Some((cname, cversion)) = queue.pop_front() {
        if !visited.insert((cname.clone(), cversion.clone())) {
            continue;
        }
        let component = lookup.component(&cname, &cversion).await?;
        if let Some(found) = component.resources.iter().find(|r| r.is_helm_chart() && r.name == resource) {
            if let Some(image) = &found.access.image_reference {
                debug!(component = %cname, version = %cversion, %resource, %image, "helm chart resolved");
                return Ok(image.clone());
            }
        }
        for r in &component.component_references {
            queue.push_back((r.component_name.clone(), r.version.clone()));
        }
    }
    Err(ChartError::ChartNotFound { component: name.to_string(), version: version.to_string(), resource: resource.to_string() })
}

/// Resource `name` of the component itself (references are not followed).
pub fn local_resource<'a>(component: &'a Component, name: &str) -> Result<&'a Resource> {
    component.resources.iter().find(|r| r.name == name).ok_or_else(|| ChartError::ResourceNotFound {
        component: component.name.clone(),
        version: component.version.clone(),
        resource: name.to_string(),
    })
}

fn parse_descriptor(reference: &str, blob: &[u8], media_type: &str) -> Result<Component> {
    let descriptor_err = |reason: String| ChartError::Descriptor { reference: reference.to_string(), reason };
    let text = if media_type.contains("tar") {
        let mut archive = tar::Archive::new(blob);
        let mut found = None;
        for entry in archive.entries()? {
            let mut entry = entry?;
            if entry.path()?.file_name().and_then(|n| n.to_str()) == Some(DESCRIPTOR_FILE) {
                let mut text = String::new();
                entry.read_to_string(&mut text)?;
                found = Some(text);
                break;
            }
        }
        found.ok_or_else(|| descriptor_err(format!("layer holds no {DESCRIPTOR_FILE}")))?
    } else {
        String::from_utf8(blob.to_vec()).map_err(|e| descriptor_err(e.to_string()))?
    };
    let descriptor: ComponentDescriptor = serde_yaml::from_str(&text)?;
    Ok(descriptor.component)
}

/// Component descriptors read from an OCI repository, cached per name and version.
pub struct OcmRepository {
    registry: Arc<RegistryClient>,
    /// `host[/path]` prefix of the repository.
    base: String,
    cache: RwLock<HashMap<(String, String), Arc<Component>>>,
}

impl OcmRepository {
    pub fn new(registry: Arc<RegistryClient>, base: impl Into<String>) -> Self {
        Self { registry, base: base.into().trim_end_matches('/').to_string(), cache: RwLock::new(HashMap::new()) }
    }

    pub fn descriptor_reference(&self, name: &str, version: &str) -> Result<ImageReference> {
        ImageReference::parse(&format!("{}/component-descriptors/{name}:{version}", self.base))
    }

    async fn fetch(&self, name: &str, version: &str) -> Result<Component> {
        let image = self.descriptor_reference(name, version)?;
        let manifest = self.registry.manifest(&image).await?;
        let config_blob = self.registry.blob(&image, &manifest.config.digest).await?;
        let config: ComponentConfig = serde_json::from_slice(&config_blob)
            .map_err(|source| ChartError::Json { what: format!("component config of {image}"), source })?;
        let layer = config.component_descriptor_layer;
        let blob = self.registry.blob(&image, &layer.digest).await?;
        parse_descriptor(&image.to_string(), &blob, &layer.media_type)
    }

    /// Download the local blob of resource `resource` of `component` into `dest`.
    pub async fn download_local_blob(&self, component: &Component, resource: &str, dest: &Path) -> Result<u64> {
        let res = local_resource(component, resource)?;
        let digest = res.access.local_reference.as_deref().ok_or_else(|| ChartError::Descriptor {
            reference: format!("{}:{}", component.name, component.version),
            reason: format!("resource {resource} has no local reference (access type {})", res.access.ty),
        })?;
        let image = self.descriptor_reference(&component.name, &component.version)?;
        self.registry.download_blob(&image, digest, dest).await
    }
}

#[async_trait]
impl ComponentLookup for OcmRepository {
    async fn component(&self, name: &str, version: &str) -> Result<Arc<Component>> {
        let key = (name.to_string(), version.to_string());
        if let Some(hit) = self.cache.read().await.get(&key) {
            return Ok(hit.clone());
        }
        let component = Arc::new(self.fetch(name, version).await?);
        info!(component = %name, %version, resources = component.resources.len(), "component descriptor loaded");
        self.cache.write().await.insert(key, component.clone());
        Ok(component)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ROOT: &str = r#"
meta:
  schemaVersion: v2
component:
  name: ocm.software/ocm-gear
  version: 1.2.3
  provider: sap
  resources:
  - name: installation
    type: installer
    access:
      type: localBlob
      localReference: sha256:abc
      mediaType: application/x-tar
  - name: delivery-dashboard
    version: 0.9.0
    type: helmChart/v1
    access:
      type: ociArtifact
      imageReference: registry.local/charts/delivery-dashboard:0.9.0
  componentReferences:
  - name: service
    componentName: ocm.software/delivery-service
    version: 2.0.0
  - name: loop
    componentName: ocm.software/ocm-gear
    version: 1.2.3
"#;

    const SERVICE: &str = r#"
component:
  name: ocm.software/delivery-service
  version: 2.0.0
  resources:
  - name: delivery-service
    type: ociImage
    access: { type: ociArtifact, imageReference: registry.local/images/delivery-service:2.0.0 }
  - name: delivery-service
    type: helmChart
    access: { type: ociArtifact, imageReference: registry.local/charts/delivery-service:2.0.0 }
"#;

    struct InMemory {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ComponentLookup for InMemory {
        async fn component(&self, name: &str, _version: &str) -> Result<Arc<Component>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let doc = match name {
                "ocm.software/ocm-gear" => ROOT,
                "ocm.software/delivery-service" => SERVICE,
                _ => return Err(ChartError::Descriptor { reference: name.into(), reason: "unknown".into() }),
            };
            Ok(Arc::new(parse_descriptor(name, doc.as_bytes(), "application/yaml")?))
        }
    }

    #[tokio::test]
    async fn chart_found_in_root_component() {
        let lookup = InMemory { calls: AtomicUsize::new(0) };
        let image = find_helm_chart(&lookup, "ocm.software/ocm-gear", "1.2.3", "delivery-dashboard").await.unwrap();
        assert_eq!(image, "registry.local/charts/delivery-dashboard:0.9.0");
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn chart_found_through_references_skipping_non_chart_resources() {
        let lookup = InMemory { calls: AtomicUsize::new(0) };
        let image = find_helm_chart(&lookup, "ocm.software/ocm-gear", "1.2.3", "delivery-service").await.unwrap();
        assert_eq!(image, "registry.local/charts/delivery-service:2.0.0");
    }

    #[tokio::test]
    async fn missing_chart_terminates_despite_reference_cycle() {
        let lookup = InMemory { calls: AtomicUsize::new(0) };
        let err = find_helm_chart(&lookup, "ocm.software/ocm-gear", "1.2.3", "extensions").await.unwrap_err();
        assert!(matches!(err, ChartError::ChartNotFound { ref resource, .. } if resource == "extensions"), "{err}");
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn local_resource_ignores_references() {
        let root = parse_descriptor("root", ROOT.as_bytes(), "application/yaml").unwrap();
        let installer = local_resource(&root, "installation").unwrap();
        assert_eq!(installer.access.local_reference.as_deref(), Some("sha256:abc"));
        assert!(matches!(local_resource(&root, "delivery-service"), Err(ChartError::ResourceNotFound { .. })));
    }

    #[test]
    fn tarred_descriptor_layer() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(SERVICE.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, DESCRIPTOR_FILE, SERVICE.as_bytes()).unwrap();
        let blob = builder.into_inner().unwrap();
        let c = parse_descriptor("svc", &blob, "application/vnd.gardener.cloud.cnudie.component-descriptor.v2+yaml+tar").unwrap();
        assert_eq!(c.name, "ocm.software/delivery-service");
        assert_eq!(c.resources.len(), 2);

        let err = parse_descriptor("svc", &builder_without_descriptor(), "application/x-tar").unwrap_err();
        assert!(err.to_string().contains("component-descriptor.yaml"), "{err}");
    }

    fn builder_without_descriptor() -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(1);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "other.yaml", &b"x"[..]).unwrap();
        builder.into_inner().unwrap()
    }
}
