use std::sync::Arc;

use odg_chart::{
    find_helm_chart, ChartError, ChartFetcher, ChartResolver, ComponentChartResolver, ComponentLookup, ImageReference,
    OcmRepository, RegistryClient, Scratch,
};
use odg_core::ExtensionType;
use odg_testkit::{tar, tar_gz, FakeRegistry};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(registry: &FakeRegistry) -> RegistryClient {
    RegistryClient::new([registry.host()]).unwrap()
}

#[tokio::test]
async fn chart_layer_is_downloaded_into_scratch() {
    let registry = FakeRegistry::start().await;
    let archive = tar_gz(&[("delivery-service/values.yaml", b"a: 1\n")]);
    let reference = registry.chart("charts/delivery-service", "1.2.3", archive.clone()).await;

    let scratch = Scratch::new("odg-it-").unwrap();
    let dest = scratch.join("chart.tgz");
    let written = client_for(&registry).fetch_chart(&reference, &dest).await.unwrap();
    assert_eq!(written as usize, archive.len());
    assert_eq!(std::fs::read(&dest).unwrap(), archive);
}

#[tokio::test]
async fn manifest_without_helm_layer_is_an_error() {
    let registry = FakeRegistry::start().await;
    registry
        .manifest(
            "charts/odd",
            "1.0.0",
            json!({
                "schemaVersion": 2,
                "config": { "mediaType": "application/vnd.oci.image.config.v1+json", "digest": "sha256:c", "size": 2 },
                "layers": [ { "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip", "digest": "sha256:l", "size": 9 } ]
            }),
        )
        .await;
    let scratch = Scratch::new("odg-it-").unwrap();
    let reference = format!("{}/charts/odd:1.0.0", registry.host());
    let err = client_for(&registry).fetch_chart(&reference, &scratch.join("x")).await.unwrap_err();
    assert!(matches!(err, ChartError::LayerNotFound { .. }), "{err}");
    assert!(!scratch.join("x").exists());
}

#[tokio::test]
async fn unknown_manifest_is_a_status_error() {
    let registry = FakeRegistry::start().await;
    let image = ImageReference::parse(&format!("{}/charts/none:0.0.1", registry.host())).unwrap();
    let err = client_for(&registry).manifest(&image).await.unwrap_err();
    assert!(matches!(err, ChartError::Status { status: 404, .. }), "{err}");
}

#[tokio::test]
async fn bearer_challenge_is_answered_once_and_cached() {
    let server = MockServer::start().await;
    let host = server.address().to_string();
    let manifest = json!({
        "schemaVersion": 2,
        "config": { "mediaType": "application/vnd.cncf.helm.config.v1+json", "digest": "sha256:c", "size": 2 },
        "layers": []
    });

    Mock::given(method("GET"))
        .and(path("/token"))
        .and(query_param("scope", "repository:charts/private:pull"))
        .and(query_param("service", "fake-registry"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "t0k"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/charts/private/manifests/1.0.0"))
        .and(header("authorization", "Bearer t0k"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&manifest))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/charts/private/manifests/1.0.0"))
        .respond_with(ResponseTemplate::new(401).insert_header(
            "www-authenticate",
            format!(r#"Bearer realm="{}/token",service="fake-registry""#, server.uri()).as_str(),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let client = RegistryClient::new([host.clone()]).unwrap();
    let image = ImageReference::parse(&format!("{host}/charts/private:1.0.0")).unwrap();
    client.manifest(&image).await.unwrap();
    client.manifest(&image).await.unwrap();
}

#[tokio::test]
async fn charts_resolve_through_component_references() {
    let registry = FakeRegistry::start().await;
    let host = registry.host();
    let chart = format!("{host}/charts/extensions:3.0.0");
    registry
        .component(
            "ocm",
            "ocm.software/ocm-gear",
            "1.2.3",
            r#"
component:
  name: ocm.software/ocm-gear
  version: 1.2.3
  componentReferences:
  - name: extensions
    componentName: ocm.software/odg-extensions
    version: 3.0.0
"#,
        )
        .await;
    registry
        .component(
            "ocm",
            "ocm.software/odg-extensions",
            "3.0.0",
            &format!(
                r#"
component:
  name: ocm.software/odg-extensions
  version: 3.0.0
  resources:
  - name: extensions
    type: helmChart/v1
    access:
      type: ociArtifact
      imageReference: {chart}
"#
            ),
        )
        .await;

    let repo = Arc::new(OcmRepository::new(Arc::new(client_for(&registry)), format!("{host}/ocm")));
    let resolver = ComponentChartResolver::new(repo.clone(), "ocm.software/ocm-gear");
    for ty in [ExtensionType::MalwareScanner, ExtensionType::ArtefactEnumerator] {
        assert_eq!(resolver.chart_reference(ty, "1.2.3").await.unwrap(), chart);
    }
    let err = resolver.chart_reference(ExtensionType::DeliveryService, "1.2.3").await.unwrap_err();
    assert!(matches!(err, ChartError::ChartNotFound { .. }), "{err}");

    // cached: a second lookup does not need the registry
    let again = find_helm_chart(&repo, "ocm.software/ocm-gear", "1.2.3", "extensions").await.unwrap();
    assert_eq!(again, chart);
    let root = repo.component("ocm.software/ocm-gear", "1.2.3").await.unwrap();
    assert_eq!(root.component_references.len(), 1);
}

#[tokio::test]
async fn installer_blob_is_a_local_resource() {
    let registry = FakeRegistry::start().await;
    let host = registry.host();
    let installer = tar(&[("install.sh", b"#!/bin/sh\necho ok\n")]);
    let digest = registry.local_blob("ocm", "ocm.software/ocm-gear", installer.clone()).await;
    registry
        .component(
            "ocm",
            "ocm.software/ocm-gear",
            "2.0.0",
            &format!(
                r#"
component:
  name: ocm.software/ocm-gear
  version: 2.0.0
  resources:
  - name: installation
    type: blob
    access:
      type: localBlob
      localReference: {digest}
      mediaType: application/x-tar
"#
            ),
        )
        .await;

    let repo = OcmRepository::new(Arc::new(client_for(&registry)), format!("{host}/ocm"));
    let component = repo.component("ocm.software/ocm-gear", "2.0.0").await.unwrap();
    let scratch = Scratch::new("odg-it-").unwrap();
    repo.download_local_blob(&component, "installation", &scratch.join("installer.tar")).await.unwrap();
    assert_eq!(std::fs::read(scratch.join("installer.tar")).unwrap(), installer);

    let err = repo.download_local_blob(&component, "missing", &scratch.join("x")).await.unwrap_err();
    assert!(matches!(err, ChartError::ResourceNotFound { .. }), "{err}");
}
