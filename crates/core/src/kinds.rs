//! Fixed API identifiers for the custom and derived resource kinds.

/// API group shared by all ODG custom resources.
pub const ODG_GROUP: &str = "open-delivery-gear.ocm.software";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceKind {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
}

impl ResourceKind {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_string()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

/// Gardener resource-manager wrapper applying manifests stored in secrets.
pub const MANAGED_RESOURCE: ResourceKind = ResourceKind {
    group: "resources.gardener.cloud",
    version: "v1alpha1",
    kind: "ManagedResource",
    plural: "managedresources",
};

/// Installation declaration watched by the orchestrator.
pub const ODG: ResourceKind = ResourceKind { group: ODG_GROUP, version: "v1", kind: "ODG", plural: "odgs" };

/// Per-extension template watched by the renderer.
pub const ODG_EXTENSION: ResourceKind = ResourceKind { group: ODG_GROUP, version: "v1", kind: "ODGE", plural: "odges" };

/// Installation target watched by the cross-cluster installer.
pub const INSTALLATION: ResourceKind = ResourceKind {
    group: ODG_GROUP,
    version: "v1",
    kind: "Installation",
    plural: "installations",
};
