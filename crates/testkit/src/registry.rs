//! Fake OCI distribution registry serving manifests and blobs over plain HTTP.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{json, Value as Json};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use crate::archive::tar;

pub const HELM_CHART_LAYER: &str = "application/vnd.cncf.helm.chart.content.v1.tar+gzip";
const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
const DESCRIPTOR_LAYER: &str = "application/vnd.gardener.cloud.cnudie.component-descriptor.v2+yaml+tar";

pub struct FakeRegistry {
    server: MockServer,
    next_digest: AtomicU64,
}

impl FakeRegistry {
    pub async fn start() -> Self {
        Self { server: MockServer::start().await, next_digest: AtomicU64::new(1) }
    }

    /// `host:port`, as it appears in image references.
    pub fn host(&self) -> String {
        self.server.address().to_string()
    }

    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Serve `bytes` as a blob of `repo`; returns its (synthetic) digest.
    pub async fn blob(&self, repo: &str, bytes: Vec<u8>) -> String {
        let digest = format!("sha256:{:064x}", self.next_digest.fetch_add(1, Ordering::SeqCst));
        Mock::given(method("GET"))
            .and(path(format!("/v2/{repo}/blobs/{digest}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes))
            .mount(&self.server)
            .await;
        digest
    }

    pub async fn manifest(&self, repo: &str, reference: &str, manifest: Json) {
        let body = serde_json::to_vec(&manifest).expect("manifest json");
        Mock::given(method("GET"))
            .and(path(format!("/v2/{repo}/manifests/{reference}")))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, OCI_MANIFEST))
            .mount(&self.server)
            .await;
    }

    /// Push a chart archive as a single helm layer; returns the image reference.
    pub async fn chart(&self, repo: &str, tag: &str, archive: Vec<u8>) -> String {
        let size = archive.len();
        let config = self.blob(repo, b"{}".to_vec()).await;
        let layer = self.blob(repo, archive).await;
        self.manifest(
            repo,
            tag,
            json!({
                "schemaVersion": 2,
                "mediaType": OCI_MANIFEST,
                "config": { "mediaType": "application/vnd.cncf.helm.config.v1+json", "digest": config, "size": 2 },
                "layers": [ { "mediaType": HELM_CHART_LAYER, "digest": layer, "size": size } ],
            }),
        )
        .await;
        format!("{}/{repo}:{tag}", self.host())
    }

    /// Push a component descriptor (YAML) under `{base}/component-descriptors/{name}:{version}`.
    pub async fn component(&self, base: &str, name: &str, version: &str, descriptor_yaml: &str) {
        let repo = descriptor_repo(base, name);
        let layer_bytes = tar(&[("component-descriptor.yaml", descriptor_yaml.as_bytes())]);
        let layer_size = layer_bytes.len();
        let layer = self.blob(&repo, layer_bytes).await;
        let layer_ref = json!({ "mediaType": DESCRIPTOR_LAYER, "digest": layer, "size": layer_size });
        let config = serde_json::to_vec(&json!({ "componentDescriptorLayer": layer_ref })).expect("config json");
        let config_size = config.len();
        let config = self.blob(&repo, config).await;
        self.manifest(
            &repo,
            version,
            json!({
                "schemaVersion": 2,
                "mediaType": OCI_MANIFEST,
                "config": { "mediaType": "application/vnd.gardener.cloud.cnudie.component.config.v1+json", "digest": config, "size": config_size },
                "layers": [ layer_ref ],
            }),
        )
        .await;
    }

    /// Serve `bytes` as a local blob of component `name`; returns the digest used as local reference.
    pub async fn local_blob(&self, base: &str, name: &str, bytes: Vec<u8>) -> String {
        self.blob(&descriptor_repo(base, name), bytes).await
    }
}

fn descriptor_repo(base: &str, name: &str) -> String {
    let base = base.trim_matches('/');
    if base.is_empty() {
        format!("component-descriptors/{name}")
    } else {
        format!("{base}/component-descriptors/{name}")
    }
}
