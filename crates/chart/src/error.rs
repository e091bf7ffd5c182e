use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChartError {
    #[error("invalid image reference {0:?}")]
    InvalidReference(String),

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("registry answered {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("registry authentication failed: {0}")]
    Auth(String),

    #[error("no layer with media type {media_type} in {reference}")]
    LayerNotFound { reference: String, media_type: String },

    #[error("no helm chart resource {resource} in {component}:{version} or its references")]
    ChartNotFound { component: String, version: String, resource: String },

    #[error("no resource {resource} in {component}:{version}")]
    ResourceNotFound { component: String, version: String, resource: String },

    #[error("component descriptor {reference}: {reason}")]
    Descriptor { reference: String, reason: String },

    #[error("decoding {what}: {source}")]
    Json {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("chart directory {0} missing from archive")]
    ChartRootMissing(String),

    #[error("helm template exited with {status}: {stderr}")]
    Template { status: String, stderr: String },
}

pub type Result<T, E = ChartError> = std::result::Result<T, E>;
