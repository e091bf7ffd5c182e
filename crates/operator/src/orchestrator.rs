//! Top-level orchestrator: `ODG` declarations to one managed resource and one `ODGE` secret per
//! extension, in the declaration's namespace.

use async_trait::async_trait;
use kube::{Client, ResourceExt};
use odg_apply::{delete_derived, ensure_managed_resource, upsert_secret};
use odg_chart::ChartResolver;
use odg_core::defaults::expand;
use odg_core::{Extension, ExtensionTemplate, Installation, ManagedResourceClass};
use odg_kubehub::{Action, Event, EventHandler, Odg, OdgExtension};
use tracing::{debug, info};

use crate::error::{settle, Result};

/// Installation as declared by `odg`, with defaults, overrides and target namespace applied.
pub fn desired(odg: &Odg) -> Result<Installation> {
    let mut installation = odg.installation()?;
    expand(&mut installation, &odg.spec.base_url, &odg.spec.delivery_db_password);
    Ok(installation)
}

pub struct Orchestrator<R> {
    client: Client,
    resolver: R,
}

impl<R: ChartResolver> Orchestrator<R> {
    pub fn new(client: Client, resolver: R) -> Self {
        Self { client, resolver }
    }

    pub async fn reconcile(&self, action: Action, odg: &Odg) -> Result<()> {
        let installation = desired(odg)?;
        match action {
            Action::Deleted => self.remove(&installation).await,
            Action::Added | Action::Modified => self.apply(&installation).await,
        }
    }

    async fn remove(&self, installation: &Installation) -> Result<()> {
        for extension in &installation.extensions {
            delete_derived(
                &self.client,
                &installation.origin_namespace,
                &extension.meta.managed_resource_name,
                &extension.meta.secret_name,
            )
            .await?;
        }
        info!(ns = %installation.origin_namespace, extensions = installation.extensions.len(), "installation removed");
        Ok(())
    }

    async fn apply(&self, installation: &Installation) -> Result<()> {
        // every chart reference first, so a lookup failure writes nothing
        let mut templates: Vec<(&Extension, ExtensionTemplate)> = Vec::with_capacity(installation.extensions.len());
        for extension in &installation.extensions {
            let chart_reference = self.resolver.chart_reference(extension.ty, &installation.platform_version).await?;
            debug!(ty = %extension.ty, chart = %chart_reference, "chart reference resolved");
            templates.push((
                extension,
                ExtensionTemplate {
                    cfg: extension.cfg.clone(),
                    chart_reference,
                    ty: extension.ty,
                    namespace: installation.target_namespace.clone(),
                    base_url: extension.base_url.clone(),
                },
            ));
        }

        let origin = &installation.origin_namespace;
        for (extension, template) in templates {
            let meta = &extension.meta;
            ensure_managed_resource(&self.client, origin, &meta.managed_resource_name, &meta.secret_name, ManagedResourceClass::Internal)
                .await?;
            let odge = OdgExtension::from_template(&meta.secret_name, origin, &template);
            upsert_secret(&self.client, origin, &meta.secret_name, &serde_yaml::to_string(&odge)?).await?;
        }
        info!(
            ns = %origin,
            target = %installation.target_namespace,
            version = %installation.platform_version,
            extensions = installation.extensions.len(),
            "installation reconciled"
        );
        Ok(())
    }
}

#[async_trait]
impl<R: ChartResolver> EventHandler<Odg> for Orchestrator<R> {
    async fn handle(&mut self, event: Event<Odg>) -> anyhow::Result<()> {
        let object = format!("{}/{}", event.object.namespace().unwrap_or_default(), event.object.name_any());
        debug!(action = event.action.as_str(), %object, "odg event");
        settle("orchestrator", &object, self.reconcile(event.action, &event.object).await)
    }
}
