//! Expansion of a declared installation into its complete extension set.

use serde_json::{Map, Value as Json};

use crate::model::{Extension, ExtensionType, Installation};
use crate::profile::{profile, DefaultsContext};

pub const TARGET_NAMESPACE_KEY: &str = "target_namespace";

/// Extensions every installation gets, in the order they are appended.
pub const DEFAULT_EXTENSIONS: [ExtensionType; 5] = [
    ExtensionType::DeliveryService,
    ExtensionType::DeliveryDb,
    ExtensionType::ArtefactEnumerator,
    ExtensionType::BacklogController,
    ExtensionType::IngressNginx,
];

pub fn dashboard_host(base_url: &str) -> String {
    format!("modg-dashboard.{}", base_url)
}

pub fn service_host(base_url: &str) -> String {
    format!("modg-service.{}", base_url)
}

/// Append the default extension set, apply per-type overrides and inject the target namespace.
///
/// A default type that was declared explicitly keeps its place and its declared configuration;
/// no default is appended for it.
pub fn expand(installation: &mut Installation, base_url: &str, db_password: &str) {
    let target_namespace = installation.target_namespace.clone();

    for ty in DEFAULT_EXTENSIONS {
        if installation.extensions.iter().any(|e| e.ty == ty) {
            continue;
        }
        let ctx = DefaultsContext { base_url, target_namespace: &target_namespace, db_password };
        let Some(default_cfg) = profile(ty).default_cfg(&ctx) else { continue };
        installation.extensions.push(Extension::new(ty, base_url, default_cfg));
    }

    for extension in installation.extensions.iter_mut() {
        let ctx = DefaultsContext { base_url: &extension.base_url, target_namespace: &target_namespace, db_password };
        if let Some(cfg) = profile(extension.ty).override_cfg(&ctx) {
            extension.cfg = cfg;
        }
        inject_target_namespace(&mut extension.cfg, &target_namespace);
    }
}

fn inject_target_namespace(cfg: &mut Json, target_namespace: &str) {
    if !cfg.is_object() {
        *cfg = Json::Object(Map::new());
    }
    if let Json::Object(map) = cfg {
        map.insert(TARGET_NAMESPACE_KEY.to_string(), Json::String(target_namespace.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn declared(exts: Vec<(&str, Json)>) -> Installation {
        Installation::declare("origin", "tenant-a", "1.2.3", "example.com", exts).unwrap()
    }

    #[test]
    fn empty_declaration_expands_to_exactly_the_default_set() {
        let mut inst = declared(vec![]);
        expand(&mut inst, "example.com", "pw");
        let types: Vec<_> = inst.extensions.iter().map(|e| e.ty).collect();
        assert_eq!(types, DEFAULT_EXTENSIONS.to_vec());
        for e in &inst.extensions {
            assert_eq!(e.meta.secret_name, format!("{}-odge", e.ty));
            assert_eq!(e.base_url, "example.com");
        }
    }

    #[test]
    fn every_extension_gets_target_namespace() {
        let mut inst = declared(vec![
            ("malware-scanner", json!({"clamav": {"enabled": false}})),
            ("delivery-dashboard", json!({"target_namespace": "somewhere-else"})),
        ]);
        expand(&mut inst, "example.com", "pw");
        assert_eq!(inst.extensions.len(), 7);
        for e in &inst.extensions {
            assert_eq!(e.cfg[TARGET_NAMESPACE_KEY], "tenant-a", "{}", e.ty);
        }
    }

    #[test]
    fn dashboard_cfg_is_derived_from_base_url() {
        let mut inst = declared(vec![("delivery-dashboard", json!({"ingress": {"hosts": ["custom.host"]}, "extra": 1}))]);
        expand(&mut inst, "example.com", "pw");
        let dash = inst.extension(ExtensionType::DeliveryDashboard).unwrap();
        assert_eq!(dash.cfg["ingress"]["hosts"], json!(["modg-dashboard.example.com"]));
        assert_eq!(dash.cfg["envVars"]["REACT_APP_DELIVERY_SERVICE_API_URL"], "https://modg-service.example.com");
        assert!(dash.cfg.get("extra").is_none());
    }

    #[test]
    fn malware_scanner_cfg_is_replaced_by_fixed_block() {
        let mut inst = declared(vec![("malware-scanner", json!({"freshclam": {"mirror": "x"}}))]);
        expand(&mut inst, "example.com", "pw");
        let scanner = inst.extension(ExtensionType::MalwareScanner).unwrap();
        assert_eq!(
            scanner.cfg,
            json!({"clamav": {"enabled": true, "target_namespace": "tenant-a"}, "target_namespace": "tenant-a"})
        );
    }

    #[test]
    fn declared_default_type_keeps_its_declared_cfg() {
        let mut inst = declared(vec![("delivery-db", json!({"auth": {"database": "x"}}))]);
        expand(&mut inst, "example.com", "pw");
        let db: Vec<_> = inst.extensions.iter().filter(|e| e.ty == ExtensionType::DeliveryDb).collect();
        assert_eq!(db.len(), 1);
        assert_eq!(db[0].cfg, json!({"auth": {"database": "x"}, "target_namespace": "tenant-a"}));
        // declared extensions stay ahead of appended defaults
        assert_eq!(inst.extensions[0].ty, ExtensionType::DeliveryDb);
        assert_eq!(inst.extensions.len(), DEFAULT_EXTENSIONS.len());
    }

    #[test]
    fn expansion_is_deterministic() {
        let mut a = declared(vec![("delivery-dashboard", Json::Null)]);
        let mut b = a.clone();
        expand(&mut a, "example.com", "pw");
        expand(&mut b, "example.com", "pw");
        assert_eq!(a, b);
    }
}
