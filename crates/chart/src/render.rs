//! Chart rendering: fetch, extract, overlay values, template, post-process.

use std::path::{Path, PathBuf};
use std::time::Instant;

use metrics::histogram;
use odg_core::{deep_merge, profile, ExtensionTemplate, ExtensionType};
use serde::Deserialize;
use serde_json::{Map, Value as Json};
use tracing::{debug, info};

use crate::archive::{unpack_blocking, Scratch};
use crate::error::{ChartError, Result};
use crate::helm::Templater;
use crate::registry::ChartFetcher;

pub const PRESERVE_REPLICAS_ANNOTATION: &str = "resources.gardener.cloud/preserve-replicas";
const VALUES_FILE: &str = "values.yaml";

/// Directory of the chart for `ty` inside the extracted archive.
pub fn chart_root(extracted: &Path, ty: ExtensionType) -> Result<PathBuf> {
    let root = extracted.join(profile(ty).chart_dir);
    if !root.is_dir() {
        return Err(ChartError::ChartRootMissing(profile(ty).chart_dir.to_string()));
    }
    Ok(root)
}

/// Merge `cfg` over the chart's `values.yaml` and write it back; returns the file's path.
/// A `null` cfg leaves the chart defaults untouched.
pub fn merge_values(chart_root: &Path, cfg: &Json) -> Result<PathBuf> {
    let path = chart_root.join(VALUES_FILE);
    let mut values = match std::fs::read_to_string(&path) {
        Ok(text) => serde_yaml::from_str::<Option<Json>>(&text)?.unwrap_or_else(|| Json::Object(Map::new())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Json::Object(Map::new()),
        Err(e) => return Err(e.into()),
    };
    if !cfg.is_null() {
        deep_merge(&mut values, cfg.clone());
    }
    std::fs::write(&path, serde_yaml::to_string(&values)?)?;
    Ok(path)
}

/// Split a YAML stream into documents, dropping empty ones.
pub fn parse_manifests(stream: &str) -> Result<Vec<Json>> {
    let mut docs = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(stream) {
        let value = Option::<Json>::deserialize(doc)?;
        match value {
            None | Some(Json::Null) => continue,
            Some(Json::Object(ref m)) if m.is_empty() => continue,
            Some(v) => docs.push(v),
        }
    }
    Ok(docs)
}

/// Let the workload's own autoscaling own the replica count of Deployments and ReplicaSets.
pub fn preserve_replicas(docs: &mut [Json]) {
    for doc in docs.iter_mut() {
        let kind = doc.get("kind").and_then(Json::as_str);
        if !matches!(kind, Some("Deployment" | "ReplicaSet")) {
            continue;
        }
        let Some(root) = doc.as_object_mut() else { continue };
        let meta = root.entry("metadata").or_insert_with(|| Json::Object(Map::new()));
        if !meta.is_object() {
            *meta = Json::Object(Map::new());
        }
        if let Some(meta) = meta.as_object_mut() {
            let annotations = meta.entry("annotations").or_insert_with(|| Json::Object(Map::new()));
            if !annotations.is_object() {
                *annotations = Json::Object(Map::new());
            }
            if let Some(annotations) = annotations.as_object_mut() {
                annotations.insert(PRESERVE_REPLICAS_ANNOTATION.to_string(), Json::String("true".into()));
            }
        }
    }
}

pub fn join_documents(docs: &[Json]) -> Result<String> {
    let rendered: Vec<String> = docs.iter().map(serde_yaml::to_string).collect::<Result<_, _>>()?;
    Ok(rendered.join("---\n"))
}

/// Full pipeline for one extension; the scratch space is gone when this returns.
pub async fn render_extension<F, T>(fetcher: &F, templater: &T, template: &ExtensionTemplate) -> Result<Vec<Json>>
where
    F: ChartFetcher + ?Sized,
    T: Templater + ?Sized,
{
    let started = Instant::now();
    let scratch = Scratch::new("odg-render-")?;
    let archive = scratch.join("chart.tgz");
    let bytes = fetcher.fetch_chart(&template.chart_reference, &archive).await?;
    debug!(chart = %template.chart_reference, bytes, "chart fetched");

    let extracted = scratch.join("chart");
    unpack_blocking(archive, extracted.clone()).await?;
    let root = chart_root(&extracted, template.ty)?;
    let values = merge_values(&root, &template.cfg)?;

    let stream = templater.template(&root, &values).await?;
    let mut docs = parse_manifests(&stream)?;
    preserve_replicas(&mut docs);

    histogram!("odg_render_latency_ms", started.elapsed().as_secs_f64() * 1000.0, "type" => template.ty.as_str());
    info!(ty = %template.ty, chart = %template.chart_reference, documents = docs.len(), "chart rendered");
    Ok(docs)
}
