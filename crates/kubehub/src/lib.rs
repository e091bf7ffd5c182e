//! ODG kubehub – custom resources, client wiring and the resumable watch consumer

#![forbid(unsafe_code)]

use std::path::Path;

use anyhow::{Context, Result};
use kube::{
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use tracing::debug;

pub mod crds;
pub mod watch;

pub use crds::{InstallationTarget, ManagedResource, Odg, OdgExtension};
pub use watch::{consume, Action, ApiSource, Bookmark, Event, EventHandler, WatchSource};

/// Client for the operator's own cluster: an explicit kubeconfig file when given, otherwise the
/// usual in-cluster / `KUBECONFIG` inference.
pub async fn client(kubeconfig: Option<&Path>) -> Result<Client> {
    match kubeconfig {
        Some(path) => {
            debug!(path = %path.display(), "loading kubeconfig");
            let kc = Kubeconfig::read_from(path).with_context(|| format!("reading kubeconfig {}", path.display()))?;
            client_from_kubeconfig(kc).await
        }
        None => Client::try_default().await.context("inferring kube client config"),
    }
}

/// Client bound to a cluster described by an in-memory kubeconfig document.
pub async fn client_from_kubeconfig_yaml(yaml: &str) -> Result<Client> {
    let kc = Kubeconfig::from_yaml(yaml).context("parsing kubeconfig")?;
    client_from_kubeconfig(kc).await
}

async fn client_from_kubeconfig(kc: Kubeconfig) -> Result<Client> {
    let cfg = Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
        .await
        .context("resolving kubeconfig context")?;
    Client::try_from(cfg).context("building kube client")
}
