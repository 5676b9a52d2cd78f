use super::Composer;
use crate::components::{Capability, ModelView};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Composition options as read from configuration.
///
/// Keys other than `ctype`, `in_model`, `out_model` and `meta` are taken
/// as resource request fields and validated when the component is built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeOptions {
    /// Capability variant (`local`/`generic`, `remote`/`ray`/`default`, `meta_remote`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctype: Option<Capability>,
    /// Input model reference (`module.Symbol`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_model: Option<String>,
    /// Output model reference (`module.Symbol`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_model: Option<String>,
    #[serde(default)]
    pub meta: bool,
    #[serde(flatten)]
    pub compute_req: Map<String, Value>,
}

/// Per-component composition options, keyed by component name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentManifest {
    #[serde(default)]
    pub components: HashMap<String, ComposeOptions>,
}

impl ComponentManifest {
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse component manifest")
    }

    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read component manifest: {:?}", path))?;
        let manifest: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML: {:?}", path))?;
        tracing::info!(components = manifest.components.len(), "Loaded component manifest");
        Ok(manifest)
    }

    pub fn options(&self, component: &str) -> Option<&ComposeOptions> {
        self.components.get(component)
    }

    /// Applies the options listed for the composer's component, if any.
    pub fn apply<In: ModelView, Out: ModelView>(&self, composer: Composer<In, Out>) -> Composer<In, Out> {
        match self.options(composer.name()) {
            Some(options) => composer.with_options(options),
            None => composer,
        }
    }
}
