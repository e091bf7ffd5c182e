//! ODG apply – derived-resource lifecycle protocol.
//!
//! Every derived object is written without locks: managed resources are check-then-create,
//! secrets are create-then-update, deletes treat "already gone" as done. Running any of these
//! twice leaves the same state as running it once.

#![forbid(unsafe_code)]

use std::time::Instant;

use k8s_openapi::{api::core::v1::Secret, ByteString};
use kube::{
    api::{Api, DeleteParams, Patch, PatchParams, PostParams},
    Client,
};
use metrics::{counter, histogram};
use odg_core::ManagedResourceClass;
use odg_kubehub::ManagedResource;
use tracing::{debug, info};

/// Only key of a derived secret: one or more YAML documents.
pub const SECRET_DATA_KEY: &str = "data.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    /// Already there (possibly created concurrently); left untouched.
    Existing,
    Deleted,
    /// Nothing to delete.
    Absent,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Created => "created",
            Outcome::Updated => "updated",
            Outcome::Existing => "existing",
            Outcome::Deleted => "deleted",
            Outcome::Absent => "absent",
        }
    }
}

pub fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == code)
}

fn record(kind: &'static str, outcome: Outcome, started: Instant) -> Outcome {
    histogram!("odg_apply_latency_ms", started.elapsed().as_secs_f64() * 1000.0, "kind" => kind);
    counter!("odg_apply_total", 1u64, "kind" => kind, "outcome" => outcome.as_str());
    outcome
}

/// Make sure the managed resource `name` exists; an existing one is never modified.
pub async fn ensure_managed_resource(
    client: &Client,
    namespace: &str,
    name: &str,
    secret_name: &str,
    class: ManagedResourceClass,
) -> kube::Result<Outcome> {
    let started = Instant::now();
    let api: Api<ManagedResource> = Api::namespaced(client.clone(), namespace);
    if api.get_opt(name).await?.is_some() {
        debug!(ns = %namespace, name = %name, "managed resource present");
        return Ok(record("managed_resource", Outcome::Existing, started));
    }
    let mr = ManagedResource::for_secret(name, namespace, secret_name, class);
    match api.create(&PostParams::default(), &mr).await {
        Ok(_) => {
            info!(ns = %namespace, name = %name, class = class.as_str(), "managed resource created");
            Ok(record("managed_resource", Outcome::Created, started))
        }
        // lost a create race; the winner wrote the same object
        Err(e) if is_status(&e, 409) => Ok(record("managed_resource", Outcome::Existing, started)),
        Err(e) => Err(e),
    }
}

/// Secret carrying `documents` under [`SECRET_DATA_KEY`].
pub fn manifest_secret(namespace: &str, name: &str, documents: &str) -> Secret {
    let mut secret = Secret::default();
    secret.metadata.name = Some(name.to_string());
    secret.metadata.namespace = Some(namespace.to_string());
    secret.data = Some([(SECRET_DATA_KEY.to_string(), ByteString(documents.as_bytes().to_vec()))].into());
    secret
}

/// Decoded [`SECRET_DATA_KEY`] payload, if present and valid UTF-8.
pub fn secret_documents(secret: &Secret) -> Option<String> {
    let raw = secret.data.as_ref()?.get(SECRET_DATA_KEY)?;
    String::from_utf8(raw.0.clone()).ok()
}

/// Create the secret, or merge-patch its payload when it already exists.
pub async fn upsert_secret(client: &Client, namespace: &str, name: &str, documents: &str) -> kube::Result<Outcome> {
    let started = Instant::now();
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = manifest_secret(namespace, name, documents);
    match api.create(&PostParams::default(), &secret).await {
        Ok(_) => {
            info!(ns = %namespace, name = %name, bytes = documents.len(), "secret created");
            Ok(record("secret", Outcome::Created, started))
        }
        Err(e) if is_status(&e, 409) => {
            api.patch(name, &PatchParams::default(), &Patch::Merge(&secret)).await?;
            info!(ns = %namespace, name = %name, bytes = documents.len(), "secret updated");
            Ok(record("secret", Outcome::Updated, started))
        }
        Err(e) => Err(e),
    }
}

async fn delete_tolerant<K>(api: &Api<K>, name: &str, kind: &'static str) -> kube::Result<Outcome>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    let started = Instant::now();
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(record(kind, Outcome::Deleted, started)),
        Err(e) if is_status(&e, 404) => Ok(record(kind, Outcome::Absent, started)),
        Err(e) => Err(e),
    }
}

/// Delete a managed resource and then the secret it points to. Missing objects are fine.
pub async fn delete_derived(
    client: &Client,
    namespace: &str,
    managed_resource_name: &str,
    secret_name: &str,
) -> kube::Result<(Outcome, Outcome)> {
    let mrs: Api<ManagedResource> = Api::namespaced(client.clone(), namespace);
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let mr = delete_tolerant(&mrs, managed_resource_name, "managed_resource").await?;
    let secret = delete_tolerant(&secrets, secret_name, "secret").await?;
    info!(ns = %namespace, mr = %managed_resource_name, secret = %secret_name, mr_outcome = mr.as_str(), secret_outcome = secret.as_str(), "derived objects removed");
    Ok((mr, secret))
}
