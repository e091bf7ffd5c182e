//! Resumable event consumer.
//!
//! One watch stream, consumed strictly in order. The resource-version bookmark is the only state
//! carried between reconnects and is threaded through [`Bookmark::advance`].

use std::fmt::Debug;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use kube::{
    api::{Api, WatchEvent, WatchParams},
    core::NamespaceResourceScope,
    Client, Resource, ResourceExt,
};
use metrics::counter;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Added,
    Modified,
    Deleted,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Added => "added",
            Action::Modified => "modified",
            Action::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Event<K> {
    pub action: Action,
    pub object: K,
    /// Resource version the object carried when it was observed.
    pub version: String,
}

/// Resource version to resume from; empty means "start from current state".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bookmark(String);

impl Bookmark {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn advance<K>(self, signal: &Signal<K>) -> Bookmark {
        match signal {
            Signal::Deliver(ev) if !ev.version.is_empty() => Bookmark(ev.version.clone()),
            Signal::Progress(v) if !v.is_empty() => Bookmark(v.clone()),
            Signal::Restart(_) => Bookmark::default(),
            _ => self,
        }
    }
}

impl From<&str> for Bookmark {
    fn from(v: &str) -> Self {
        Bookmark(v.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartCause {
    /// 410 Gone: the bookmark fell out of the server's history window.
    Expired,
    /// Connection-level fault.
    Transient,
}

impl RestartCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartCause::Expired => "expired",
            RestartCause::Transient => "transient",
        }
    }
}

/// What one raw stream item means for the consumer.
#[derive(Debug)]
pub enum Signal<K> {
    Deliver(Event<K>),
    Progress(String),
    Restart(RestartCause),
    /// Undecodable item; quarantined.
    Skip(String),
    Fail(kube::Error),
}

/// `None` when the error is not worth a reconnect.
pub fn restart_cause(err: &kube::Error) -> Option<RestartCause> {
    match err {
        kube::Error::Api(resp) if resp.code == 410 => Some(RestartCause::Expired),
        kube::Error::HyperError(_) | kube::Error::Service(_) | kube::Error::ReadEvents(_) => Some(RestartCause::Transient),
        _ => None,
    }
}

pub fn classify<K: Resource>(item: kube::Result<WatchEvent<K>>) -> Signal<K> {
    let deliver = |action, object: K| {
        let version = object.resource_version().unwrap_or_default();
        Signal::Deliver(Event { action, object, version })
    };
    match item {
        Ok(WatchEvent::Added(o)) => deliver(Action::Added, o),
        Ok(WatchEvent::Modified(o)) => deliver(Action::Modified, o),
        Ok(WatchEvent::Deleted(o)) => deliver(Action::Deleted, o),
        Ok(WatchEvent::Bookmark(b)) => Signal::Progress(b.metadata.resource_version),
        Ok(WatchEvent::Error(resp)) => {
            if resp.code == 410 {
                Signal::Restart(RestartCause::Expired)
            } else {
                Signal::Fail(kube::Error::Api(resp))
            }
        }
        Err(kube::Error::SerdeError(e)) => Signal::Skip(e.to_string()),
        Err(err) => match restart_cause(&err) {
            Some(cause) => Signal::Restart(cause),
            None => Signal::Fail(err),
        },
    }
}

/// Something that can (re)open a watch stream at a bookmark.
#[async_trait]
pub trait WatchSource<K: Send + 'static>: Send + Sync {
    fn describe(&self) -> String;

    async fn open(&self, version: &str) -> kube::Result<BoxStream<'static, kube::Result<WatchEvent<K>>>>;
}

#[async_trait]
pub trait EventHandler<K: Send + 'static>: Send {
    /// An `Err` stops the consumer; handlers absorb whatever should not.
    async fn handle(&mut self, event: Event<K>) -> Result<()>;
}

/// Raw watch against the API server, cluster-wide or bound to one namespace.
pub struct ApiSource<K> {
    api: Api<K>,
    scope: String,
    params: WatchParams,
}

impl<K> ApiSource<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    pub fn new(client: Client, namespace: Option<&str>) -> Self {
        let (api, scope) = match namespace {
            Some(ns) => (Api::namespaced(client, ns), ns.to_string()),
            None => (Api::all(client), "*".to_string()),
        };
        Self { api, scope, params: WatchParams::default() }
    }
}

#[async_trait]
impl<K> WatchSource<K> for ApiSource<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default,
{
    fn describe(&self) -> String {
        format!("{}@{}", K::kind(&K::DynamicType::default()), self.scope)
    }

    async fn open(&self, version: &str) -> kube::Result<BoxStream<'static, kube::Result<WatchEvent<K>>>> {
        let stream = self.api.watch(&self.params, version).await?;
        Ok(stream.boxed())
    }
}

fn retry_delay() -> Duration {
    let ms = std::env::var("ODG_WATCH_RETRY_MS").ok().and_then(|s| s.parse().ok()).unwrap_or(500);
    Duration::from_millis(ms)
}

/// Consume `source` forever, handing every object event to `handler` in order.
///
/// Returns only on a non-restartable API failure or a handler error.
pub async fn consume<K, S, H>(source: &S, handler: &mut H) -> Result<()>
where
    K: Resource + Send + 'static,
    S: WatchSource<K> + ?Sized,
    H: EventHandler<K> + ?Sized,
{
    let what = source.describe();
    let mut bookmark = Bookmark::default();
    info!(source = %what, "watch started");
    loop {
        let mut stream = match source.open(bookmark.as_str()).await {
            Ok(stream) => stream,
            Err(err) => match restart_cause(&err) {
                Some(cause) => {
                    info!(source = %what, cause = cause.as_str(), error = %err, "watch open failed, restarting");
                    counter!("odg_watch_restarts_total", 1u64, "cause" => cause.as_str());
                    bookmark = Bookmark::default();
                    tokio::time::sleep(retry_delay()).await;
                    continue;
                }
                None => return Err(err).with_context(|| format!("opening watch on {what}")),
            },
        };
        debug!(source = %what, version = %bookmark.as_str(), "watch opened");

        while let Some(item) = stream.next().await {
            let signal = classify(item);
            bookmark = bookmark.advance(&signal);
            match signal {
                Signal::Deliver(event) => {
                    counter!("odg_events_total", 1u64, "action" => event.action.as_str());
                    handler.handle(event).await?;
                }
                Signal::Progress(v) => debug!(source = %what, version = %v, "bookmark"),
                Signal::Restart(cause) => {
                    info!(source = %what, cause = cause.as_str(), "watch restarting from scratch");
                    counter!("odg_watch_restarts_total", 1u64, "cause" => cause.as_str());
                    break;
                }
                Signal::Skip(reason) => {
                    warn!(source = %what, %reason, "skipping undecodable watch item");
                    counter!("odg_watch_quarantined_total", 1u64);
                }
                Signal::Fail(err) => return Err(err).with_context(|| format!("watching {what}")),
            }
        }
    }
}
