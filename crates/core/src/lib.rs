//! ODG core: domain model, resource-kind identifiers, per-extension dispatch table and defaulting.
//!
//! Nothing in here talks to a cluster. Controllers rebuild these values from every watch event.

#![forbid(unsafe_code)]

pub mod defaults;
pub mod error;
pub mod kinds;
pub mod merge;
pub mod model;
pub mod profile;

pub use error::ModelError;
pub use merge::deep_merge;
pub use model::{Extension, ExtensionMeta, ExtensionTemplate, ExtensionType, Installation, ManagedResourceClass};
pub use profile::{profile, ChartSource, DefaultsContext, ExtensionProfile};
