use thiserror::Error;

use crate::model::ExtensionType;

/// Rejections raised while parsing custom-resource payloads into the closed model.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown extension type: {0}")]
    UnknownExtensionType(String),

    #[error("extension {0} declared more than once")]
    DuplicateExtension(ExtensionType),

    #[error("configuration of extension {0} must be a mapping")]
    InvalidConfig(ExtensionType),

    #[error("custom resource is missing {0}")]
    MissingField(&'static str),
}
