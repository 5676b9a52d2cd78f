use super::{Binding, Compute, Kwargs, ModelView};
use crate::error::{Boundary, ComponentError};
use crate::models::{DataModel, DynModel, ExecReq, Payload};
use crate::scheduler::{BoundNode, NodeInput, RemoteHandle, Scheduler};
use std::fmt;
use std::marker::PhantomData;

/// Remote entry points of a component with its implementation embedded.
///
/// The resource request bound at composition time is used for every call
/// unless the call's own `exec_req` carries one, which then applies to that
/// call only.
pub trait ComputeRemote: Compute {
    /// Submits a call and returns immediately.
    fn compute_remote(
        &self,
        scheduler: &dyn Scheduler,
        input: impl Into<Payload>,
    ) -> Result<RemoteHandle<Self::Output>, ComponentError> {
        self.compute_remote_with(scheduler, input, None, &Kwargs::new())
    }

    fn compute_remote_with(
        &self,
        scheduler: &dyn Scheduler,
        input: impl Into<Payload>,
        exec_req: Option<&ExecReq>,
        kwargs: &Kwargs,
    ) -> Result<RemoteHandle<Self::Output>, ComponentError> {
        self.bind_with(input.into(), exec_req, kwargs)?
            .execute(scheduler)
    }

    /// Describes a call without submitting it. `input` may be another
    /// node, so pipelines can be assembled before anything runs.
    fn bind(&self, input: impl Into<NodeInput>) -> Result<BoundNode<Self::Output>, ComponentError> {
        self.bind_with(input, None, &Kwargs::new())
    }

    fn bind_with(
        &self,
        input: impl Into<NodeInput>,
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
            None,
        ))
    }
}

/// A component that can run locally or be submitted to a scheduler.
pub struct RemoteComponent<In = DynModel, Out = DynModel> {
    binding: Binding,
    _models: PhantomData<fn(In) -> Out>,
}

impl<In, Out> RemoteComponent<In, Out> {
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

    /// Execution requirement bound at composition time.
    pub fn bound_req(&self) -> Option<&ExecReq> {
        self.binding.bound_req()
    }

    pub fn erase(self) -> RemoteComponent {
        RemoteComponent::new(self.binding)
    }
}

impl<In, Out> Clone for RemoteComponent<In, Out> {
    fn clone(&self) -> Self {
        Self::new(self.binding.clone())
    }
}

impl<In, Out> fmt::Debug for RemoteComponent<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RemoteComponent").field(&self.binding).finish()
    }
}

impl<In: ModelView, Out: ModelView> Compute for RemoteComponent<In, Out> {
    type Input = In;
    type Output = Out;

    fn binding(&self) -> &Binding {
        &self.binding
    }
}

impl<In: ModelView, Out: ModelView> ComputeRemote for RemoteComponent<In, Out> {}
