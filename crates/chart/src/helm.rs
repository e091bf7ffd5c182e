use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{ChartError, Result};

/// Turns a chart directory plus values file into a YAML document stream.
#[async_trait]
pub trait Templater: Send + Sync {
    async fn template(&self, chart_root: &Path, values: &Path) -> Result<String>;
}

/// `helm template --include-crds <root> -f <values>`.
pub struct HelmCli {
    bin: PathBuf,
}

impl HelmCli {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }
}

impl Default for HelmCli {
    fn default() -> Self {
        Self::new("helm")
    }
}

#[async_trait]
impl Templater for HelmCli {
    async fn template(&self, chart_root: &Path, values: &Path) -> Result<String> {
        let output = Command::new(&self.bin)
            .arg("template")
            .arg("--include-crds")
            .arg(chart_root)
            .arg("-f")
            .arg(values)
            .kill_on_drop(true)
            .output()
            .await?;
        if !output.status.success() {
            return Err(ChartError::Template {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        debug!(chart = %chart_root.display(), bytes = output.stdout.len(), "chart templated");
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
