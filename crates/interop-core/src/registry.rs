use crate::components::{Capability, DynComponent, Kwargs};
use crate::error::{ComponentError, ConfigError};
use crate::models::{DynModel, ExecReq, Payload};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Summary of a registered component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentInfo {
    pub name: String,
    pub capability: Capability,
    pub input: String,
    pub output: String,
    pub description: Option<String>,
    /// Resource request fields bound at composition time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compute_req: Option<Map<String, Value>>,
}

/// Components available to a process, by name.
///
/// Populated at startup and then shared read-only, typically behind an
/// `Arc`.
#[derive(Default, Clone)]
pub struct ComponentRegistry {
    components: HashMap<String, Arc<dyn DynComponent>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a component under its own name.
    pub fn register<C: DynComponent + 'static>(&mut self, component: C) -> Result<(), ConfigError> {
        let name = component.as_binding().name().to_string();
        if self.components.contains_key(&name) {
            return Err(ConfigError::DuplicateComponent(name));
        }
        self.components.insert(name.clone(), Arc::new(component));
        tracing::info!("Registered component: {}", name);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DynComponent>> {
        self.components.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Lists all registered components, sorted by name.
    pub fn list(&self) -> Vec<ComponentInfo> {
        let mut infos: Vec<ComponentInfo> = self
            .components
            .values()
            .map(|component| {
                let binding = component.as_binding();
                ComponentInfo {
                    name: binding.name().to_string(),
                    capability: binding.capability(),
                    input: binding.input().type_name().to_string(),
                    output: binding.output().type_name().to_string(),
                    description: binding.description().map(str::to_string),
                    compute_req: binding
                        .bound_req()
                        .and_then(|req| req.compute_req.as_ref())
                        .map(|req| req.overrides()),
                }
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Computes a registered component locally.
    pub fn compute(
        &self,
        name: &str,
        input: impl Into<Payload>,
        exec_req: Option<&ExecReq>,
        kwargs: &Kwargs,
    ) -> Result<DynModel, ComponentError> {
        let component = self
            .components
            .get(name)
            .ok_or_else(|| ConfigError::UnknownComponent(name.to_string()))?;
        component.compute_payload(input.into(), exec_req, kwargs)
    }
}
