//! OCI distribution (v2) client: manifests and blobs, anonymous bearer tokens.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{ChartError, Result};
use crate::reference::ImageReference;

pub const HELM_CHART_LAYER: &str = "application/vnd.cncf.helm.chart.content.v1.tar+gzip";

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, application/vnd.docker.distribution.manifest.v2+json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: Option<String>,
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

impl Manifest {
    pub fn layer(&self, media_type: &str) -> Option<&Descriptor> {
        self.layers.iter().find(|l| l.media_type == media_type)
    }
}

/// Parameters of a `WWW-Authenticate: Bearer ...` challenge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Challenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl Challenge {
    pub fn parse(header: &str) -> Option<Self> {
        let (scheme, params) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let mut fields: HashMap<String, String> = HashMap::new();
        let mut rest = params.trim();
        while !rest.is_empty() {
            let (key, after) = rest.split_once('=')?;
            let after = after.trim_start();
            let (value, tail) = match after.strip_prefix('"') {
                Some(quoted) => {
                    let end = quoted.find('"')?;
                    (&quoted[..end], &quoted[end + 1..])
                }
                None => match after.find(',') {
                    Some(end) => (&after[..end], &after[end..]),
                    None => (after, ""),
                },
            };
            fields.insert(key.trim().to_ascii_lowercase(), value.to_string());
            rest = tail.trim_start().trim_start_matches(',').trim_start();
        }
        Some(Self { realm: fields.remove("realm")?, service: fields.remove("service"), scope: fields.remove("scope") })
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

fn timeout() -> Duration {
    let secs = std::env::var("ODG_REGISTRY_TIMEOUT_SECS").ok().and_then(|s| s.parse().ok()).unwrap_or(120);
    Duration::from_secs(secs)
}

/// Registry client shared by all lookups of one process.
pub struct RegistryClient {
    http: reqwest::Client,
    /// Registries (`host[:port]`) reached over plain HTTP.
    plain_http: HashSet<String>,
    /// Bearer token per `registry/repository`.
    tokens: RwLock<HashMap<String, String>>,
}

impl RegistryClient {
    pub fn new<I, S>(plain_http: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let http = reqwest::Client::builder()
            .user_agent(concat!("odg-operator/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout())
            .build()
            .map_err(|source| ChartError::Http { url: String::new(), source })?;
        Ok(Self { http, plain_http: plain_http.into_iter().map(Into::into).collect(), tokens: RwLock::new(HashMap::new()) })
    }

    fn url(&self, image: &ImageReference, suffix: &str) -> String {
        let scheme = if self.plain_http.contains(&image.registry) { "http" } else { "https" };
        format!("{scheme}://{}/v2/{}/{suffix}", image.registry, image.repository)
    }

    async fn send(&self, url: &str, accept: Option<&str>, token: Option<&str>) -> Result<Response> {
        let mut req = self.http.get(url);
        if let Some(accept) = accept {
            req = req.header(ACCEPT, accept);
        }
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| ChartError::Auth(e.to_string()))?;
            req = req.header(AUTHORIZATION, value);
        }
        req.send().await.map_err(|source| ChartError::Http { url: url.to_string(), source })
    }

    async fn fetch_token(&self, challenge: &Challenge, image: &ImageReference) -> Result<String> {
        let scope = challenge.scope.clone().unwrap_or_else(|| format!("repository:{}:pull", image.repository));
        let mut query = vec![("scope", scope)];
        if let Some(service) = &challenge.service {
            query.push(("service", service.clone()));
        }
        debug!(realm = %challenge.realm, repo = %image.repository, "requesting anonymous registry token");
        let resp = self
            .http
            .get(&challenge.realm)
            .query(&query)
            .send()
            .await
            .map_err(|source| ChartError::Http { url: challenge.realm.clone(), source })?;
        if !resp.status().is_success() {
            return Err(ChartError::Auth(format!("token endpoint {} answered {}", challenge.realm, resp.status())));
        }
        let body: TokenResponse = resp.json().await.map_err(|source| ChartError::Http { url: challenge.realm.clone(), source })?;
        body.token.or(body.access_token).ok_or_else(|| ChartError::Auth("token response without token".into()))
    }

    /// GET with one retry after answering a bearer challenge.
    async fn get(&self, image: &ImageReference, suffix: &str, accept: Option<&str>) -> Result<Response> {
        let url = self.url(image, suffix);
        let key = format!("{}/{}", image.registry, image.repository);
        let cached = self.tokens.read().await.get(&key).cloned();
        let mut resp = self.send(&url, accept, cached.as_deref()).await?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            let challenge = resp
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|h| h.to_str().ok())
                .and_then(Challenge::parse)
                .ok_or_else(|| ChartError::Auth(format!("{url} requires credentials")))?;
            let token = self.fetch_token(&challenge, image).await?;
            self.tokens.write().await.insert(key, token.clone());
            resp = self.send(&url, accept, Some(&token)).await?;
        }

        if !resp.status().is_success() {
            return Err(ChartError::Status { url, status: resp.status().as_u16() });
        }
        Ok(resp)
    }

    pub async fn manifest(&self, image: &ImageReference) -> Result<Manifest> {
        let resp = self.get(image, &format!("manifests/{}", image.reference()), Some(MANIFEST_ACCEPT)).await?;
        let url = resp.url().to_string();
        let body = resp.bytes().await.map_err(|source| ChartError::Http { url: url.clone(), source })?;
        serde_json::from_slice(&body).map_err(|source| ChartError::Json { what: format!("manifest {image}"), source })
    }

    pub async fn blob(&self, image: &ImageReference, digest: &str) -> Result<Bytes> {
        let resp = self.get(image, &format!("blobs/{digest}"), None).await?;
        let url = resp.url().to_string();
        resp.bytes().await.map_err(|source| ChartError::Http { url, source })
    }

    /// Stream a blob into `dest`; returns the number of bytes written.
    pub async fn download_blob(&self, image: &ImageReference, digest: &str, dest: &Path) -> Result<u64> {
        let mut resp = self.get(image, &format!("blobs/{digest}"), None).await?;
        let url = resp.url().to_string();
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = resp.chunk().await.map_err(|source| ChartError::Http { url: url.clone(), source })? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        debug!(%image, %digest, bytes = written, "blob downloaded");
        Ok(written)
    }

    /// Manifest of `image` plus its layer of `media_type`.
    pub async fn layer(&self, image: &ImageReference, media_type: &str) -> Result<Descriptor> {
        let manifest = self.manifest(image).await?;
        manifest
            .layer(media_type)
            .cloned()
            .ok_or_else(|| ChartError::LayerNotFound { reference: image.to_string(), media_type: media_type.to_string() })
    }
}

/// Downloads the chart archive behind a chart reference.
#[async_trait]
pub trait ChartFetcher: Send + Sync {
    async fn fetch_chart(&self, reference: &str, dest: &Path) -> Result<u64>;
}

#[async_trait]
impl ChartFetcher for RegistryClient {
    async fn fetch_chart(&self, reference: &str, dest: &Path) -> Result<u64> {
        let image = ImageReference::parse(reference)?;
        let layer = self.layer(&image, HELM_CHART_LAYER).await?;
        self.download_blob(&image, &layer.digest, dest).await
    }
}
