use super::{Binding, Capability, Compute, Kwargs, ModelView};
use crate::compose::Target;
use crate::error::{Boundary, ComponentError, ConfigError, ModelRole};
use crate::models::{DataModel, DynModel, ExecReq, Payload};
use crate::scheduler::{BoundNode, NodeInput, RemoteHandle, Scheduler};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

/// Name of a late-bound implementation, supplied by the caller of a
/// MetaRemote component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginRef {
    pub namespace: String,
    pub name: String,
}

impl PluginRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PluginRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

impl Binding {
    /// Worker-side binding for a late-bound call: this binding's models and
    /// resources with `target`'s logic. A target declaring other models is
    /// rejected.
    pub(crate) fn resolve_target(&self, target: Target) -> Result<Binding, ConfigError> {
        self.check_role(ModelRole::Input, target.input)?;
        self.check_role(ModelRole::Output, target.output)?;
        Ok(self
            .clone()
            .with_execute(target.name, target.execute)
            .with_capability(Capability::Local))
    }
}

/// Remote entry points of a MetaRemote component. The implementation is
/// named per call and only resolved on the worker, so an unknown plugin
/// surfaces when the handle is resolved.
pub trait ComputeMeta: Compute {
    fn compute_remote(
        &self,
        scheduler: &dyn Scheduler,
        input: impl Into<Payload>,
        plugin: &PluginRef,
    ) -> Result<RemoteHandle<Self::Output>, ComponentError> {
        self.compute_remote_with(scheduler, input, plugin, None, &Kwargs::new())
    }

    fn compute_remote_with(
        &self,
        scheduler: &dyn Scheduler,
        input: impl Into<Payload>,
        plugin: &PluginRef,
        exec_req: Option<&ExecReq>,
        kwargs: &Kwargs,
    ) -> Result<RemoteHandle<Self::Output>, ComponentError> {
        self.bind_with(input.into(), plugin, exec_req, kwargs)?
            .execute(scheduler)
    }

    fn bind(
        &self,
        input: impl Into<NodeInput>,
        plugin: &PluginRef,
    ) -> Result<BoundNode<Self::Output>, ComponentError> {
        self.bind_with(input, plugin, None, &Kwargs::new())
    }

    fn bind_with(
        &self,
        input: impl Into<NodeInput>,
        plugin: &PluginRef,
        exec_req: Option<&ExecReq>,
        kwargs: &Kwargs,
    ) -> Result<BoundNode<Self::Output>, ComponentError> {
        if let Some(req) = exec_req {
            req.check()
                .map_err(|e| ComponentError::validation(Boundary::ExecReq, e))?;
        }
        Ok(BoundNode::new(
            self.binding().clone(),
            input.into(),
            exec_req.cloned(),
            kwargs.clone(),
            Some(plugin.clone()),
        ))
    }
}

/// A remote placeholder: models and resources are fixed, the logic is
/// looked up by name on the worker.
///
/// Local `compute` runs embedded logic when there is any and otherwise
/// fails with [`ComponentError::NotImplemented`].
pub struct MetaComponent<In = DynModel, Out = DynModel> {
    binding: Binding,
    _models: PhantomData<fn(In) -> Out>,
}

impl<In, Out> MetaComponent<In, Out> {
    pub(crate) fn new(binding: Binding) -> Self {
        Self {
            binding,
            _models: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        self.binding.name()
    }

    pub fn description(&self) -> Option<&str> {
        self.binding.description()
    }

    pub fn bound_req(&self) -> Option<&ExecReq> {
        self.binding.bound_req()
    }

    pub fn erase(self) -> MetaComponent {
        MetaComponent::new(self.binding)
    }
}

impl<In, Out> Clone for MetaComponent<In, Out> {
    fn clone(&self) -> Self {
        Self::new(self.binding.clone())
    }
}

impl<In, Out> fmt::Debug for MetaComponent<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MetaComponent").field(&self.binding).finish()
    }
}

impl<In: ModelView, Out: ModelView> Compute for MetaComponent<In, Out> {
    type Input = In;
    type Output = Out;

    fn binding(&self) -> &Binding {
        &self.binding
    }
}

impl<In: ModelView, Out: ModelView> ComputeMeta for MetaComponent<In, Out> {}
