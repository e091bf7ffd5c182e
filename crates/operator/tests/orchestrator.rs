use std::collections::HashSet;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use odg_apply::secret_documents;
use odg_chart::{error::Result as ChartResult, ChartError, ChartResolver};
use odg_core::ExtensionType;
use odg_kubehub::crds::{DeclaredExtension, OdgSpec};
use odg_kubehub::{Action, Event, EventHandler, ManagedResource, Odg, OdgExtension};
use odg_operator::{Orchestrator, ReconcileError};
use odg_testkit::FakeApiServer;
use serde_json::{json, Value as Json};

/// Charts live at `charts/<type>`; listed types have no chart.
#[derive(Default)]
struct StaticResolver {
    missing: HashSet<ExtensionType>,
}

#[async_trait]
impl ChartResolver for StaticResolver {
    async fn chart_reference(&self, ty: ExtensionType, platform_version: &str) -> ChartResult<String> {
        if self.missing.contains(&ty) {
            return Err(ChartError::ChartNotFound {
                component: "ocm.software/ocm-gear".into(),
                version: platform_version.into(),
                resource: ty.to_string(),
            });
        }
        Ok(format!("registry.local/charts/{ty}:{platform_version}"))
    }
}

fn odg(extensions: Vec<(&str, Json)>) -> Odg {
    let mut odg = Odg::new(
        "platform",
        OdgSpec {
            namespace: "tenant-a".into(),
            version: "1.2.3".into(),
            base_url: "example.com".into(),
            delivery_db_password: "pw".into(),
            extensions: extensions.into_iter().map(|(ty, cfg)| DeclaredExtension { ty: ty.into(), cfg }).collect(),
        },
    );
    odg.metadata.namespace = Some("origin".into());
    odg
}

fn event(action: Action, object: Odg) -> Event<Odg> {
    Event { action, object, version: "1".into() }
}

fn count(writes: &[String], method: &str, plural: &str) -> usize {
    writes.iter().filter(|w| w.starts_with(method) && w.contains(&format!("/{plural}"))).count()
}

#[tokio::test]
async fn added_derives_one_managed_resource_and_secret_per_extension() {
    let api = FakeApiServer::start().await;
    let mut orchestrator = Orchestrator::new(api.client(), StaticResolver::default());

    orchestrator.handle(event(Action::Added, odg(vec![("malware-scanner", json!({}))]))).await.unwrap();

    let mrs = api.list::<ManagedResource>("origin");
    assert_eq!(mrs.len(), 6);
    for mr in &mrs {
        assert_eq!(mr.spec.class.as_deref(), Some("internal"));
        assert!(!mr.spec.keep_objects);
        assert_eq!(mr.spec.secret_refs.len(), 1);
        assert_eq!(Some(mr.spec.secret_refs[0].name.as_str()), mr.metadata.name.as_deref());
    }
    assert_eq!(api.list::<Secret>("origin").len(), 6);

    let secret = api.get::<Secret>("origin", "delivery-db-odge").unwrap();
    let odge: OdgExtension = serde_yaml::from_str(&secret_documents(&secret).unwrap()).unwrap();
    assert_eq!(odge.metadata.name.as_deref(), Some("delivery-db-odge"));
    assert_eq!(odge.metadata.namespace.as_deref(), Some("origin"));
    assert_eq!(odge.spec.ty, "delivery-db");
    assert_eq!(odge.spec.namespace, "tenant-a");
    assert_eq!(odge.spec.base_url, "example.com");
    assert_eq!(odge.spec.helm_chart_ref, "registry.local/charts/delivery-db:1.2.3");
    assert_eq!(odge.spec.cfg["auth"]["postgresPassword"], "pw");
    assert_eq!(odge.spec.cfg["target_namespace"], "tenant-a");

    let raw: Json = serde_yaml::from_str(&secret_documents(&secret).unwrap()).unwrap();
    assert_eq!(raw["apiVersion"], "open-delivery-gear.ocm.software/v1");
    assert_eq!(raw["kind"], "ODGE");

    let scanner = api.get::<Secret>("origin", "malware-scanner-odge").unwrap();
    let odge: OdgExtension = serde_yaml::from_str(&secret_documents(&scanner).unwrap()).unwrap();
    assert_eq!(odge.spec.cfg, json!({"clamav": {"enabled": true, "target_namespace": "tenant-a"}, "target_namespace": "tenant-a"}));
}

#[tokio::test]
async fn redelivered_events_converge_to_the_same_state() {
    let api = FakeApiServer::start().await;
    let mut orchestrator = Orchestrator::new(api.client(), StaticResolver::default());
    let declared = odg(vec![]);

    orchestrator.handle(event(Action::Added, declared.clone())).await.unwrap();
    let first: Vec<Option<String>> = api.list::<Secret>("origin").iter().map(secret_documents).collect();
    orchestrator.handle(event(Action::Added, declared.clone())).await.unwrap();
    orchestrator.handle(event(Action::Modified, declared)).await.unwrap();

    assert_eq!(api.list::<ManagedResource>("origin").len(), 5);
    let again: Vec<Option<String>> = api.list::<Secret>("origin").iter().map(secret_documents).collect();
    assert_eq!(first, again);

    let writes = api.writes();
    assert_eq!(count(&writes, "POST", "managedresources"), 5);
    assert_eq!(count(&writes, "POST", "secrets"), 15);
    assert_eq!(count(&writes, "PATCH", "secrets"), 10);
}

#[tokio::test]
async fn deleted_removes_derived_objects_and_tolerates_missing_ones() {
    let api = FakeApiServer::start().await;
    let mut orchestrator = Orchestrator::new(api.client(), StaticResolver::default());
    let declared = odg(vec![("delivery-dashboard", json!({}))]);

    orchestrator.handle(event(Action::Added, declared.clone())).await.unwrap();
    assert_eq!(api.list::<Secret>("origin").len(), 6);

    orchestrator.handle(event(Action::Deleted, declared.clone())).await.unwrap();
    assert!(api.list::<ManagedResource>("origin").is_empty());
    assert!(api.list::<Secret>("origin").is_empty());

    orchestrator.handle(event(Action::Deleted, declared)).await.unwrap();
}

#[tokio::test]
async fn unresolvable_chart_writes_nothing() {
    let api = FakeApiServer::start().await;
    let resolver = StaticResolver { missing: HashSet::from([ExtensionType::BacklogController]) };
    let mut orchestrator = Orchestrator::new(api.client(), resolver);

    let err = orchestrator.reconcile(Action::Added, &odg(vec![])).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Chart(ChartError::ChartNotFound { .. })), "{err}");
    assert!(!err.is_fatal());

    orchestrator.handle(event(Action::Added, odg(vec![]))).await.unwrap();
    assert!(api.writes().is_empty());
}

#[tokio::test]
async fn invalid_declarations_are_quarantined() {
    let api = FakeApiServer::start().await;
    let mut orchestrator = Orchestrator::new(api.client(), StaticResolver::default());

    for bad in [
        odg(vec![("not-an-extension", json!({}))]),
        odg(vec![("delivery-db", json!({})), ("delivery-db", json!({}))]),
        odg(vec![("delivery-db", json!([1, 2]))]),
    ] {
        let err = orchestrator.reconcile(Action::Added, &bad).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Model(_)), "{err}");
        orchestrator.handle(event(Action::Added, bad)).await.unwrap();
    }
    assert!(api.writes().is_empty());
}

#[tokio::test]
async fn own_cluster_api_failures_are_fatal() {
    let api = FakeApiServer::start().await;
    api.fail::<Secret>("POST", "origin", 500);
    let mut orchestrator = Orchestrator::new(api.client(), StaticResolver::default());

    let err = orchestrator.handle(event(Action::Added, odg(vec![]))).await.unwrap_err();
    assert!(format!("{err:#}").contains("orchestrator: reconciling origin/platform"), "{err:#}");
}
