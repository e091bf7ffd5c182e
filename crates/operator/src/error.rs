use metrics::counter;
use odg_chart::ChartError;
use odg_core::ModelError;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Payload does not describe a valid installation or extension.
    #[error("invalid payload: {0}")]
    Model(#[from] ModelError),

    #[error(transparent)]
    Chart(#[from] ChartError),

    /// Own-cluster API failure.
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    #[error("target cluster: {0:#}")]
    Target(anyhow::Error),

    #[error("installer: {0}")]
    Installer(String),

    #[error("encoding manifest: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;

impl ReconcileError {
    /// Only own-cluster API failures end the process; everything else drops the event.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReconcileError::Kube(_))
    }

    pub fn class(&self) -> &'static str {
        match self {
            ReconcileError::Model(_) => "invalid_payload",
            ReconcileError::Chart(_) => "chart",
            ReconcileError::Kube(_) => "kube",
            ReconcileError::Target(_) => "target",
            ReconcileError::Installer(_) => "installer",
            ReconcileError::Yaml(_) => "encode",
            ReconcileError::Io(_) => "io",
        }
    }
}

/// Log and absorb non-fatal reconcile errors; hand fatal ones back to the watch consumer.
pub fn settle(controller: &'static str, object: &str, result: Result<()>) -> anyhow::Result<()> {
    let Err(err) = result else { return Ok(()) };
    counter!("odg_reconcile_errors_total", 1u64, "controller" => controller, "class" => err.class());
    if err.is_fatal() {
        error!(controller, %object, error = %err, "reconcile failed");
        return Err(anyhow::Error::new(err).context(format!("{controller}: reconciling {object}")));
    }
    match err {
        ReconcileError::Model(_) => warn!(controller, %object, error = %err, "invalid payload quarantined"),
        _ => error!(controller, %object, error = %err, "event dropped"),
    }
    Ok(())
}
