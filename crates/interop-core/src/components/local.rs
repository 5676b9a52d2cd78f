use super::{Binding, Compute, ModelView};
use crate::models::DynModel;
use std::fmt;
use std::marker::PhantomData;

/// A component that can only be computed in-process.
pub struct LocalComponent<In = DynModel, Out = DynModel> {
    binding: Binding,
    _models: PhantomData<fn(In) -> Out>,
}

impl<In, Out> LocalComponent<In, Out> {
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

    /// Forgets the static model types.
    pub fn erase(self) -> LocalComponent {
        LocalComponent::new(self.binding)
    }
}

impl<In, Out> Clone for LocalComponent<In, Out> {
    fn clone(&self) -> Self {
        Self::new(self.binding.clone())
    }
}

impl<In, Out> fmt::Debug for LocalComponent<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LocalComponent").field(&self.binding).finish()
    }
}

impl<In: ModelView, Out: ModelView> Compute for LocalComponent<In, Out> {
    type Input = In;
    type Output = Out;

    fn binding(&self) -> &Binding {
        &self.binding
    }
}
