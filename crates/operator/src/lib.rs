//! ODG operator – the three controllers.
//!
//! Each controller is an [`odg_kubehub::EventHandler`] fed by one resumable watch. Non-fatal
//! reconcile errors are logged and the event is dropped; own-cluster API failures end the watch.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod installer;
pub mod orchestrator;
pub mod renderer;

pub use config::{ComponentSettings, InstallerSettings, RenderSettings};
pub use error::{settle, ReconcileError};
pub use installer::Installer;
pub use orchestrator::Orchestrator;
pub use renderer::Renderer;
