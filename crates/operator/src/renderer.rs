//! Extension renderer: `ODGE` templates to rendered chart manifests behind an external managed
//! resource. Derived objects are named after the extension type.

use async_trait::async_trait;
use kube::{Client, ResourceExt};
use odg_apply::{delete_derived, ensure_managed_resource, upsert_secret};
use odg_chart::{join_documents, render_extension, ChartFetcher, Templater};
use odg_core::{ManagedResourceClass, ModelError};
use odg_kubehub::{Action, Event, EventHandler, OdgExtension};
use tracing::{debug, info};

use crate::error::{settle, Result};

pub struct Renderer<F, T> {
    client: Client,
    fetcher: F,
    templater: T,
}

impl<F: ChartFetcher, T: Templater> Renderer<F, T> {
    pub fn new(client: Client, fetcher: F, templater: T) -> Self {
        Self { client, fetcher, templater }
    }

    pub async fn reconcile(&self, action: Action, odge: &OdgExtension) -> Result<()> {
        let namespace = odge.namespace().ok_or(ModelError::MissingField("metadata.namespace"))?;
        let template = odge.template()?;
        let name = template.ty.as_str();

        if action == Action::Deleted {
            delete_derived(&self.client, &namespace, name, name).await?;
            return Ok(());
        }

        let docs = render_extension(&self.fetcher, &self.templater, &template).await?;
        let manifests = join_documents(&docs)?;
        ensure_managed_resource(&self.client, &namespace, name, name, ManagedResourceClass::External).await?;
        upsert_secret(&self.client, &namespace, name, &manifests).await?;
        info!(ns = %namespace, ty = name, documents = docs.len(), "extension rendered");
        Ok(())
    }
}

#[async_trait]
impl<F: ChartFetcher, T: Templater> EventHandler<OdgExtension> for Renderer<F, T> {
    async fn handle(&mut self, event: Event<OdgExtension>) -> anyhow::Result<()> {
        let object = format!("{}/{}", event.object.namespace().unwrap_or_default(), event.object.name_any());
        debug!(action = event.action.as_str(), %object, "odge event");
        settle("renderer", &object, self.reconcile(event.action, &event.object).await)
    }
}
