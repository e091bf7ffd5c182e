//! ODG chart – everything between a chart reference and rendered manifests.
//!
//! OCI registry access (manifests, blobs, anonymous bearer tokens), OCM component descriptor
//! lookup, chart reference resolution per extension type, archive extraction, values overlay,
//! `helm template` and manifest post-processing.

#![forbid(unsafe_code)]

pub mod archive;
pub mod error;
pub mod helm;
pub mod ocm;
pub mod reference;
pub mod registry;
pub mod render;
pub mod resolver;

pub use archive::{unpack, unpack_blocking, Scratch};
pub use error::ChartError;
pub use helm::{HelmCli, Templater};
pub use ocm::{find_helm_chart, local_resource, Component, ComponentLookup, OcmRepository};
pub use reference::ImageReference;
pub use registry::{ChartFetcher, RegistryClient, HELM_CHART_LAYER};
pub use render::{join_documents, parse_manifests, preserve_replicas, render_extension, PRESERVE_REPLICAS_ANNOTATION};
pub use resolver::{ChartResolver, ComponentChartResolver};
