//! Cross-cluster installer: runs the platform's installer script against the cluster an
//! `Installation` points to.
//!
//! Deleting an `Installation` is not supported; such events are logged and skipped.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client, ResourceExt};
use odg_chart::{unpack_blocking, ComponentLookup, OcmRepository, Scratch};
use odg_core::ModelError;
use odg_kubehub::{client_from_kubeconfig_yaml, Action, Event, EventHandler, InstallationTarget};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::InstallerSettings;
use crate::error::{settle, ReconcileError, Result};

pub struct Installer {
    client: Client,
    repository: Arc<OcmRepository>,
    component_name: String,
    settings: InstallerSettings,
}

impl Installer {
    pub fn new(client: Client, repository: Arc<OcmRepository>, component_name: impl Into<String>, settings: InstallerSettings) -> Self {
        Self { client, repository, component_name: component_name.into(), settings }
    }

    pub async fn reconcile(&self, action: Action, target: &InstallationTarget) -> Result<()> {
        if action == Action::Deleted {
            warn!(name = %target.name_any(), "deleting installations is not supported; event skipped");
            return Ok(());
        }
        let namespace = target.namespace().ok_or(ModelError::MissingField("metadata.namespace"))?;

        let kubeconfig = self.target_kubeconfig(&namespace, &target.spec.secret_ref.name).await?;
        let target_client = client_from_kubeconfig_yaml(&kubeconfig).await.map_err(ReconcileError::Target)?;
        let version = target_client
            .apiserver_version()
            .await
            .context("target cluster preflight")
            .map_err(ReconcileError::Target)?;
        debug!(cluster_version = %version.git_version, "target cluster reachable");

        let platform_version = self.platform_version().await?;
        let component = self.repository.component(&self.component_name, &platform_version).await?;

        let scratch = Scratch::new("odg-install-")?;
        let blob = scratch.join("installer.blob");
        let tree = scratch.join("installer");
        self.repository.download_local_blob(&component, &self.settings.installer_resource, &blob).await?;
        unpack_blocking(blob, tree.clone()).await?;
        let kubeconfig_path = scratch.join("kubeconfig");
        tokio::fs::write(&kubeconfig_path, kubeconfig.as_bytes()).await?;

        self.run_script(&tree, &kubeconfig_path, &target.spec.namespace).await?;
        info!(
            ns = %namespace,
            name = %target.name_any(),
            target_ns = %target.spec.namespace,
            version = %platform_version,
            "platform installed"
        );
        Ok(())
    }

    /// Kubeconfig of the target cluster, read from the referenced secret in the own cluster.
    async fn target_kubeconfig(&self, namespace: &str, secret_name: &str) -> Result<String> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets
            .get_opt(secret_name)
            .await?
            .ok_or_else(|| ReconcileError::Installer(format!("secret {namespace}/{secret_name} not found")))?;
        let key = &self.settings.kubeconfig_key;
        let raw = secret
            .data
            .as_ref()
            .and_then(|d| d.get(key))
            .ok_or_else(|| ReconcileError::Installer(format!("secret {namespace}/{secret_name} has no key {key}")))?;
        String::from_utf8(raw.0.clone())
            .map_err(|_| ReconcileError::Installer(format!("secret {namespace}/{secret_name} key {key} is not utf-8")))
    }

    async fn platform_version(&self) -> Result<String> {
        let s = &self.settings;
        let maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), &s.config_namespace);
        let cfg = maps
            .get_opt(&s.config_name)
            .await?
            .ok_or_else(|| ReconcileError::Installer(format!("config map {}/{} not found", s.config_namespace, s.config_name)))?;
        cfg.data
            .as_ref()
            .and_then(|d| d.get(&s.version_key))
            .cloned()
            .ok_or_else(|| ReconcileError::Installer(format!("config map {}/{} has no key {}", s.config_namespace, s.config_name, s.version_key)))
    }

    async fn run_script(&self, tree: &Path, kubeconfig: &Path, target_namespace: &str) -> Result<()> {
        let script = tree.join(&self.settings.script);
        if !script.is_file() {
            return Err(ReconcileError::Installer(format!("installer archive holds no {}", self.settings.script)));
        }
        let output = Command::new(&script)
            .current_dir(tree)
            .env("KUBECONFIG", kubeconfig)
            .env("TARGET_NAMESPACE", target_namespace)
            .kill_on_drop(true)
            .output()
            .await?;
        if !output.status.success() {
            return Err(ReconcileError::Installer(format!(
                "{} exited with {}: {}",
                self.settings.script,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        debug!(stdout = %String::from_utf8_lossy(&output.stdout).trim(), "installer finished");
        Ok(())
    }
}

#[async_trait]
impl EventHandler<InstallationTarget> for Installer {
    async fn handle(&mut self, event: Event<InstallationTarget>) -> anyhow::Result<()> {
        let object = format!("{}/{}", event.object.namespace().unwrap_or_default(), event.object.name_any());
        debug!(action = event.action.as_str(), %object, "installation event");
        settle("installer", &object, self.reconcile(event.action, &event.object).await)
    }
}
