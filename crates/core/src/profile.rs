//! Per-extension dispatch table.
//!
//! Every rule that depends on the extension type lives here: where the chart root sits inside
//! the chart archive, where the chart reference comes from, the default configuration appended
//! for default extensions, and the override replacing a configuration wholesale.

use serde_json::{json, Value as Json};

use crate::defaults::{dashboard_host, service_host, TARGET_NAMESPACE_KEY};
use crate::model::ExtensionType;

const INGRESS_NGINX_CHART: &str = "europe-docker.pkg.dev/gardener-project/releases/charts/ocm-gear/ingress-nginx/ingress-nginx@sha256:f8296fc031beb8023b51e62c982a6c1c2f15e8584e4e70c36daf0885da830d2f";
const POSTGRESQL_CHART: &str = "europe-docker.pkg.dev/gardener-project/releases/charts/ocm-gear/postgresql/postgresql@sha256:516157e9547123d830af1b834020502e4ffd5e5c1af9f3713fcdcf88fda2923b";

/// Where an extension's chart reference comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartSource {
    /// Version independent, pinned by digest.
    Pinned(&'static str),
    /// Helm chart resource of the platform component (or one it references), by resource name.
    ComponentResource(&'static str),
}

/// Inputs the default and override rules are allowed to read.
#[derive(Debug, Clone, Copy)]
pub struct DefaultsContext<'a> {
    pub base_url: &'a str,
    pub target_namespace: &'a str,
    pub db_password: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionProfile {
    pub ty: ExtensionType,
    /// Chart root directory inside the extracted chart archive.
    pub chart_dir: &'static str,
    pub chart_source: ChartSource,
}

pub fn profile(ty: ExtensionType) -> ExtensionProfile {
    use ExtensionType::*;
    let (chart_dir, chart_source) = match ty {
        DeliveryService => ("delivery-service", ChartSource::ComponentResource("delivery-service")),
        DeliveryDashboard => ("delivery-dashboard", ChartSource::ComponentResource("delivery-dashboard")),
        DeliveryDb => ("postgresql", ChartSource::Pinned(POSTGRESQL_CHART)),
        MalwareScanner | ArtefactEnumerator | BacklogController => ("extensions", ChartSource::ComponentResource("extensions")),
        IngressNginx => ("ingress-nginx", ChartSource::Pinned(INGRESS_NGINX_CHART)),
    };
    ExtensionProfile { ty, chart_dir, chart_source }
}

impl ExtensionProfile {
    /// Configuration of this extension when it is part of the default set, `None` otherwise.
    pub fn default_cfg(&self, ctx: &DefaultsContext<'_>) -> Option<Json> {
        use ExtensionType::*;
        let ns = ctx.target_namespace;
        match self.ty {
            DeliveryService => Some(json!({
                "ingress": { "hosts": [service_host(ctx.base_url)] },
                TARGET_NAMESPACE_KEY: ns,
            })),
            DeliveryDb => Some(json!({
                "fullnameOverride": "delivery-db",
                "namespaceOverride": ns,
                "image": { "tag": "16.0.0" },
                "auth": { "postgresPassword": ctx.db_password },
            })),
            ArtefactEnumerator => Some(json!({
                "artefact-enumerator": { "enabled": true, TARGET_NAMESPACE_KEY: ns },
            })),
            BacklogController => Some(json!({
                "backlog-controller": { "enabled": true, TARGET_NAMESPACE_KEY: ns },
            })),
            IngressNginx => Some(json!({
                "namespaceOverride": ns,
                "externalTrafficPolicy": "Cluster",
                "controller": {
                    "metrics": { "enabled": true },
                    "podAnnotations": {
                        "prometheus.io/scrape": true,
                        "prometheus.io/port": "10254",
                    },
                },
            })),
            DeliveryDashboard | MalwareScanner => None,
        }
    }

    /// Configuration replacing whatever was declared, applied after defaults.
    pub fn override_cfg(&self, ctx: &DefaultsContext<'_>) -> Option<Json> {
        match self.ty {
            ExtensionType::DeliveryDashboard => Some(json!({
                "ingress": { "hosts": [dashboard_host(ctx.base_url)] },
                "envVars": {
                    "REACT_APP_DELIVERY_SERVICE_API_URL": format!("https://{}", service_host(ctx.base_url)),
                },
            })),
            ExtensionType::MalwareScanner => Some(json!({
                "clamav": { "enabled": true, TARGET_NAMESPACE_KEY: ctx.target_namespace },
            })),
            _ => None,
        }
    }
}
