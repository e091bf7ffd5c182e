//! ODG testkit – in-process stand-ins for the Kubernetes API server and an OCI registry.
//!
//! Both are wiremock servers; the API server keeps objects in memory and speaks enough of the
//! REST protocol (create, get, list, merge-patch, delete, `/version`) for the lifecycle code.

#![forbid(unsafe_code)]

pub mod apiserver;
pub mod archive;
pub mod registry;

pub use apiserver::{collection, FakeApiServer};
pub use archive::{tar, tar_gz};
pub use registry::FakeRegistry;
