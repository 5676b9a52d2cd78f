//! # Components
//!
//! A component is a [`Binding`] of an input model, an output model and an
//! execute operation, reachable through one uniform `compute` pipeline:
//! validate the input, run the logic, validate the output.
//!
//! Capability variants wrap a binding and decide which entry points exist:
//! [`LocalComponent`] only computes in-process, [`RemoteComponent`] can also
//! be submitted to a [`Scheduler`](crate::scheduler::Scheduler), and
//! [`MetaComponent`] is a remote placeholder whose implementation is looked
//! up by name on the worker.

use crate::error::{Boundary, ComponentError, ConfigError, ModelRole};
use crate::models::{DataModel, DynModel, ExecReq, Payload, ResourceRequest, short_type_name};
use crate::schema::SchemaDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub mod local;
pub mod meta;
pub mod remote;

pub use local::LocalComponent;
pub use meta::{ComputeMeta, MetaComponent, PluginRef};
pub use remote::{ComputeRemote, RemoteComponent};

/// Extra keyword arguments forwarded untouched to the execute operation.
pub type Kwargs = Map<String, Value>;

/// Type-erased execute operation. Receives an input already validated
/// against the binding's input model.
pub type ExecuteFn =
    Arc<dyn Fn(DynModel, Option<&ExecReq>, &Kwargs) -> anyhow::Result<Payload> + Send + Sync>;

/// Boxes a closure as an [`ExecuteFn`].
pub fn execute_fn<F>(f: F) -> ExecuteFn
where
    F: Fn(DynModel, Option<&ExecReq>, &Kwargs) -> anyhow::Result<Payload> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Which entry points a component exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// `compute` only.
    #[serde(alias = "generic")]
    Local,
    /// `compute`, `compute_remote` and `bind`.
    #[default]
    #[serde(alias = "ray", alias = "default")]
    Remote,
    /// Remote, with the implementation resolved by name on the worker.
    MetaRemote,
}

impl Capability {
    pub fn is_remote(self) -> bool {
        !matches!(self, Capability::Local)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Local => "local",
            Capability::Remote => "remote",
            Capability::MetaRemote => "meta_remote",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "generic" => Ok(Capability::Local),
            "remote" | "ray" | "default" => Ok(Capability::Remote),
            "meta_remote" | "meta" => Ok(Capability::MetaRemote),
            other => Err(ConfigError::UnsupportedCapability(other.to_string())),
        }
    }
}

/// The component type: everything needed to run one component.
///
/// Created once per composition and never mutated afterwards. Cloning is
/// cheap and yields the same binding.
#[derive(Clone)]
pub struct Binding {
    name: String,
    description: Option<String>,
    input: SchemaDescriptor,
    output: SchemaDescriptor,
    execute: Option<ExecuteFn>,
    bound: Option<ExecReq>,
    capability: Capability,
}

impl Binding {
    pub(crate) fn new(
        name: String,
        description: Option<String>,
        input: SchemaDescriptor,
        output: SchemaDescriptor,
        execute: Option<ExecuteFn>,
        bound: Option<ExecReq>,
        capability: Capability,
    ) -> Self {
        Self {
            name,
            description,
            input,
            output,
            execute,
            bound,
            capability,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn input(&self) -> SchemaDescriptor {
        self.input
    }

    pub fn output(&self) -> SchemaDescriptor {
        self.output
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn has_execute(&self) -> bool {
        self.execute.is_some()
    }

    /// Execution requirement bound at composition time.
    pub fn bound_req(&self) -> Option<&ExecReq> {
        self.bound.as_ref()
    }

    /// Resource request a remote call submits with: the per-call request
    /// when `exec_req` carries one, else the bound one, else an empty
    /// request deferring to scheduler defaults.
    pub fn effective_request(&self, exec_req: Option<&ExecReq>) -> ResourceRequest {
        exec_req
            .and_then(|req| req.compute_req.clone())
            .or_else(|| self.bound.as_ref().and_then(|req| req.compute_req.clone()))
            .unwrap_or_default()
    }

    /// Runs the validate, execute, validate pipeline.
    ///
    /// `exec_req` is always re-validated. An input or output that already
    /// is exactly the declared model type skips decoding, but its
    /// constraints are still checked.
    /// Nothing is retried here.
    #[tracing::instrument(skip_all, fields(component = %self.name))]
    pub fn compute(
        &self,
        input: Payload,
        exec_req: Option<&ExecReq>,
        kwargs: &Kwargs,
    ) -> Result<DynModel, ComponentError> {
        if let Some(req) = exec_req {
            req.check()
                .map_err(|e| ComponentError::validation(Boundary::ExecReq, e))?;
        }

        let input = self
            .input
            .validate(input)
            .map_err(|e| ComponentError::validation(Boundary::Input, e))?;

        let execute = self
            .execute
            .as_ref()
            .ok_or_else(|| ComponentError::NotImplemented(self.name.clone()))?;

        tracing::debug!(input = self.input.type_name(), "Executing component");
        let output = execute(input, exec_req, kwargs).map_err(ComponentError::Execution)?;

        self.output
            .validate(output)
            .map_err(|e| ComponentError::validation(Boundary::Output, e))
    }

    /// Same binding with a different capability. Only used when building
    /// the worker-side binding of a late-bound call.
    pub(crate) fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = capability;
        self
    }

    pub(crate) fn with_execute(mut self, name: String, execute: Option<ExecuteFn>) -> Self {
        self.name = name;
        self.execute = execute;
        self
    }

    pub(crate) fn check_role(
        &self,
        role: ModelRole,
        candidate: Option<SchemaDescriptor>,
    ) -> Result<(), ConfigError> {
        let declared = match role {
            ModelRole::Input => self.input,
            ModelRole::Output => self.output,
        };
        match candidate {
            Some(found) if found != declared => Err(ConfigError::ModelMismatch {
                component: self.name.clone(),
                role,
                expected: declared.type_name().to_string(),
                found: found.type_name().to_string(),
            }),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("name", &self.name)
            .field("input", &self.input)
            .field("output", &self.output)
            .field("capability", &self.capability)
            .field("has_execute", &self.execute.is_some())
            .field("bound", &self.bound)
            .finish()
    }
}

/// How a typed facade presents a model coming out of a binding.
pub trait ModelView: Sized + Send + 'static {
    /// The model type this view requires, if it requires one.
    fn declared() -> Option<SchemaDescriptor>;

    fn from_dyn(model: DynModel) -> Result<Self, ComponentError>;
}

impl<M: DataModel> ModelView for M {
    fn declared() -> Option<SchemaDescriptor> {
        Some(SchemaDescriptor::of::<M>())
    }

    fn from_dyn(model: DynModel) -> Result<Self, ComponentError> {
        model.downcast::<M>().map_err(|other| ComponentError::TypeMismatch {
            expected: short_type_name::<M>().to_string(),
            found: other.type_name().to_string(),
        })
    }
}

impl ModelView for DynModel {
    fn declared() -> Option<SchemaDescriptor> {
        None
    }

    fn from_dyn(model: DynModel) -> Result<Self, ComponentError> {
        Ok(model)
    }
}

/// The component contract: an input model, an output model, and `compute`.
pub trait Compute {
    type Input: ModelView;
    type Output: ModelView;

    fn binding(&self) -> &Binding;

    /// Descriptor of the input model.
    fn input(&self) -> SchemaDescriptor {
        self.binding().input()
    }

    /// Descriptor of the output model.
    fn output(&self) -> SchemaDescriptor {
        self.binding().output()
    }

    fn compute(&self, input: impl Into<Payload>) -> Result<Self::Output, ComponentError> {
        self.compute_with(input, None, &Kwargs::new())
    }

    fn compute_with(
        &self,
        input: impl Into<Payload>,
        exec_req: Option<&ExecReq>,
        kwargs: &Kwargs,
    ) -> Result<Self::Output, ComponentError> {
        let output = self.binding().compute(input.into(), exec_req, kwargs)?;
        Self::Output::from_dyn(output)
    }
}

/// Object-safe view of any component, as stored in registries.
pub trait DynComponent: Send + Sync {
    fn as_binding(&self) -> &Binding;

    fn compute_payload(
        &self,
        input: Payload,
        exec_req: Option<&ExecReq>,
        kwargs: &Kwargs,
    ) -> Result<DynModel, ComponentError> {
        self.as_binding().compute(input, exec_req, kwargs)
    }
}

impl<C: Compute + Send + Sync> DynComponent for C {
    fn as_binding(&self) -> &Binding {
        self.binding()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_model;
    use serde_json::json;

    data_model! {
        struct Celsius {
            degrees: f64,
        }
    }

    data_model! {
        struct Fahrenheit {
            degrees: f64,
        }
    }

    fn converter(execute: Option<ExecuteFn>) -> Binding {
        Binding::new(
            "to_fahrenheit".into(),
            None,
            SchemaDescriptor::of::<Celsius>(),
            SchemaDescriptor::of::<Fahrenheit>(),
            execute,
            None,
            Capability::Local,
        )
    }

    fn to_fahrenheit() -> ExecuteFn {
        execute_fn(|input, _, _| {
            let celsius = input
                .downcast_ref::<Celsius>()
                .ok_or_else(|| anyhow::anyhow!("unexpected input"))?;
            Ok(Fahrenheit::new(celsius.degrees * 9.0 / 5.0 + 32.0).into())
        })
    }

    #[test]
    fn test_capability_names() {
        assert_eq!("generic".parse::<Capability>().unwrap(), Capability::Local);
        assert_eq!("ray".parse::<Capability>().unwrap(), Capability::Remote);
        assert_eq!(Capability::default(), Capability::Remote);
        assert!(matches!(
            "dask".parse::<Capability>(),
            Err(ConfigError::UnsupportedCapability(_))
        ));

        let parsed: Capability = serde_json::from_value(json!("default")).unwrap();
        assert_eq!(parsed, Capability::Remote);
    }

    #[test]
    fn test_pipeline_from_raw_input() {
        let binding = converter(Some(to_fahrenheit()));
        let out = binding
            .compute(Payload::Raw(json!({ "degrees": 100.0 })), None, &Kwargs::new())
            .unwrap();
        assert_eq!(out.downcast_ref::<Fahrenheit>().unwrap().degrees, 212.0);
    }

    #[test]
    fn test_pipeline_rejects_bad_input() {
        let binding = converter(Some(to_fahrenheit()));
        let err = binding
            .compute(Payload::Raw(json!({ "kelvin": 1.0 })), None, &Kwargs::new())
            .unwrap_err();
        let validation = err.as_validation().unwrap();
        assert!(validation.has_field("kelvin"));
    }

    #[test]
    fn test_placeholder_not_implemented() {
        let binding = converter(None);
        let err = binding
            .compute(Celsius::new(1.0).into(), None, &Kwargs::new())
            .unwrap_err();
        assert!(matches!(err, ComponentError::NotImplemented(name) if name == "to_fahrenheit"));
    }

    #[test]
    fn test_bad_output_is_validation_error() {
        let binding = converter(Some(execute_fn(|_, _, _| Ok(Payload::Raw(json!({ "deg": 1 }))))));
        let err = binding
            .compute(Celsius::new(1.0).into(), None, &Kwargs::new())
            .unwrap_err();
        assert!(matches!(
            err,
            ComponentError::Validation { boundary: Boundary::Output, .. }
        ));
    }

    #[test]
    fn test_effective_request_prefers_call() {
        let bound = ExecReq::with_compute_req(ResourceRequest {
            num_cpus: Some(1),
            ..Default::default()
        });
        let binding = Binding::new(
            "c".into(),
            None,
            SchemaDescriptor::of::<Celsius>(),
            SchemaDescriptor::of::<Celsius>(),
            None,
            Some(bound),
            Capability::Remote,
        );
        assert_eq!(binding.effective_request(None).num_cpus, Some(1));

        let call = ExecReq::with_compute_req(ResourceRequest {
            num_gpus: Some(1),
            ..Default::default()
        });
        let request = binding.effective_request(Some(&call));
        assert_eq!(request.num_gpus, Some(1));
        assert_eq!(request.num_cpus, None);
        assert_eq!(binding.bound_req().unwrap().compute_req.as_ref().unwrap().num_cpus, Some(1));
    }
}
