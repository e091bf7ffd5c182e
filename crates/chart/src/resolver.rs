//! Chart reference per extension type.

use async_trait::async_trait;
use odg_core::{profile, ChartSource, ExtensionType};

use crate::error::Result;
use crate::ocm::{find_helm_chart, ComponentLookup};

#[async_trait]
pub trait ChartResolver: Send + Sync {
    async fn chart_reference(&self, ty: ExtensionType, platform_version: &str) -> Result<String>;
}

/// Pinned references come from the dispatch table, all others from the platform component.
pub struct ComponentChartResolver<L> {
    lookup: L,
    component_name: String,
}

impl<L> ComponentChartResolver<L> {
    pub fn new(lookup: L, component_name: impl Into<String>) -> Self {
        Self { lookup, component_name: component_name.into() }
    }

    pub fn lookup(&self) -> &L {
        &self.lookup
    }
}

#[async_trait]
impl<L: ComponentLookup> ChartResolver for ComponentChartResolver<L> {
    async fn chart_reference(&self, ty: ExtensionType, platform_version: &str) -> Result<String> {
        match profile(ty).chart_source {
            ChartSource::Pinned(reference) => Ok(reference.to_string()),
            ChartSource::ComponentResource(resource) => {
                find_helm_chart(&self.lookup, &self.component_name, platform_version, resource).await
            }
        }
    }
}
