//! # Composition Engine
//!
//! Turns raw logic into a component. The logic is a [`Target`]: a
//! [`Logic`] type, a typed function, a function over plain values, or a
//! bare placeholder. [`Composer`] pairs it with input/output models and a
//! capability variant and builds a fresh [`Binding`] wrapped in the
//! matching component type.
//!
//! ```
//! use interop_core::prelude::*;
//!
//! interop_core::data_model! {
//!     pub struct IntModel {
//!         pub value: i64,
//!     }
//! }
//!
//! fn double(input: IntModel, _: Option<&ExecReq>, _: &Kwargs) -> anyhow::Result<IntModel> {
//!     Ok(IntModel::new(input.value * 2))
//! }
//!
//! let component = Composer::function("double", double).local().unwrap();
//! assert_eq!(component.compute(IntModel::new(3)).unwrap().value, 6);
//! ```

use crate::components::{
    Binding, Capability, Compute, ExecuteFn, Kwargs, LocalComponent, MetaComponent, ModelView,
    RemoteComponent, execute_fn,
};
use crate::error::{ConfigError, ModelRole};
use crate::models::{DataModel, DynModel, ExecReq, Payload, ResourceRequest, short_type_name};
use crate::schema::{SchemaDescriptor, SchemaRegistry};
use serde_json::{Map, Value};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

pub mod options;

pub use options::{ComponentManifest, ComposeOptions};

/// Class-shaped business logic.
///
/// A fresh instance is created for every call. The trait has no `compute`,
/// `input` or `output`: those live on the component the [`Composer`]
/// returns, so logic cannot shadow them.
///
/// ```compile_fail
/// use interop_core::prelude::*;
/// # interop_core::data_model! { pub struct IntModel { pub value: i64 } }
/// #[derive(Default)]
/// struct Double;
///
/// impl Logic for Double {
///     type Input = IntModel;
///     type Output = IntModel;
///
///     fn execute(&self, input: IntModel, _: Option<&ExecReq>, _: &Kwargs) -> anyhow::Result<Payload> {
///         Ok(input.into())
///     }
///
///     fn compute(&self, input: IntModel) -> IntModel {
///         input
///     }
/// }
/// ```
///
/// A built component is not logic, so it cannot be composed again:
///
/// ```compile_fail
/// use interop_core::prelude::*;
/// # interop_core::data_model! { pub struct IntModel { pub value: i64 } }
/// # fn double(input: IntModel, _: Option<&ExecReq>, _: &Kwargs) -> anyhow::Result<IntModel> { Ok(input) }
/// let component = Composer::function("double", double).local().unwrap();
/// let again = Composer::class_with(move || component.clone()).build();
/// ```
pub trait Logic: Send + 'static {
    type Input: DataModel;
    type Output: DataModel;

    fn execute(
        &self,
        input: Self::Input,
        exec_req: Option<&ExecReq>,
        kwargs: &Kwargs,
    ) -> anyhow::Result<Payload>;

    fn name() -> String
    where
        Self: Sized,
    {
        short_type_name::<Self>().to_string()
    }

    fn description() -> Option<String>
    where
        Self: Sized,
    {
        None
    }
}

fn into_model<M: DataModel>(model: DynModel) -> anyhow::Result<M> {
    match model.downcast::<M>() {
        Ok(model) => Ok(model),
        Err(other) => Ok(M::model_validate(other.to_value()?)?),
    }
}

/// Raw logic before composition: identity, the models it declares (if
/// any) and its execute operation (if any).
#[derive(Clone)]
pub struct Target {
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) input: Option<SchemaDescriptor>,
    pub(crate) output: Option<SchemaDescriptor>,
    pub(crate) execute: Option<ExecuteFn>,
}

impl Target {
    pub fn from_logic<L, F>(factory: F) -> Self
    where
        L: Logic,
        F: Fn() -> L + Send + Sync + 'static,
    {
        Self {
            name: L::name(),
            description: L::description(),
            input: Some(SchemaDescriptor::of::<L::Input>()),
            output: Some(SchemaDescriptor::of::<L::Output>()),
            execute: Some(execute_fn(move |input, exec_req, kwargs| {
                let input = into_model::<L::Input>(input)?;
                factory().execute(input, exec_req, kwargs)
            })),
        }
    }

    pub fn function<In, Out, F>(name: impl Into<String>, f: F) -> Self
    where
        In: DataModel,
        Out: DataModel,
        F: Fn(In, Option<&ExecReq>, &Kwargs) -> anyhow::Result<Out> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: None,
            input: Some(SchemaDescriptor::of::<In>()),
            output: Some(SchemaDescriptor::of::<Out>()),
            execute: Some(execute_fn(move |input, exec_req, kwargs| {
                let input = into_model::<In>(input)?;
                f(input, exec_req, kwargs).map(Payload::from)
            })),
        }
    }

    /// Logic over plain values. Its models must come from overrides.
    pub fn dynamic<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value, Option<&ExecReq>, &Kwargs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: None,
            input: None,
            output: None,
            execute: Some(execute_fn(move |input, exec_req, kwargs| {
                f(input.to_value()?, exec_req, kwargs).map(Payload::Raw)
            })),
        }
    }

    /// No logic at all.
    pub fn placeholder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input: None,
            output: None,
            execute: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn input(&self) -> Option<SchemaDescriptor> {
        self.input
    }

    pub fn output(&self) -> Option<SchemaDescriptor> {
        self.output
    }

    pub fn is_placeholder(&self) -> bool {
        self.execute.is_none()
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("name", &self.name)
            .field("input", &self.input)
            .field("output", &self.output)
            .field("placeholder", &self.is_placeholder())
            .finish()
    }
}

/// An input/output model override: a descriptor, or a `module.Symbol`
/// reference resolved when the component is built.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelRef {
    Descriptor(SchemaDescriptor),
    Reference(String),
}

impl ModelRef {
    pub fn of<M: DataModel>() -> Self {
        ModelRef::Descriptor(SchemaDescriptor::of::<M>())
    }
}

impl From<SchemaDescriptor> for ModelRef {
    fn from(descriptor: SchemaDescriptor) -> Self {
        ModelRef::Descriptor(descriptor)
    }
}

impl From<&str> for ModelRef {
    fn from(reference: &str) -> Self {
        ModelRef::Reference(reference.to_string())
    }
}

impl From<String> for ModelRef {
    fn from(reference: String) -> Self {
        ModelRef::Reference(reference)
    }
}

/// A built component of any capability variant.
#[derive(Debug, Clone)]
pub enum Composed<In = DynModel, Out = DynModel> {
    Local(LocalComponent<In, Out>),
    Remote(RemoteComponent<In, Out>),
    MetaRemote(MetaComponent<In, Out>),
}

impl<In, Out> Composed<In, Out> {
    pub fn capability(&self) -> Capability {
        match self {
            Composed::Local(_) => Capability::Local,
            Composed::Remote(_) => Capability::Remote,
            Composed::MetaRemote(_) => Capability::MetaRemote,
        }
    }

    pub fn into_local(self) -> Option<LocalComponent<In, Out>> {
        match self {
            Composed::Local(component) => Some(component),
            _ => None,
        }
    }

    pub fn into_remote(self) -> Option<RemoteComponent<In, Out>> {
        match self {
            Composed::Remote(component) => Some(component),
            _ => None,
        }
    }

    pub fn into_meta(self) -> Option<MetaComponent<In, Out>> {
        match self {
            Composed::MetaRemote(component) => Some(component),
            _ => None,
        }
    }
}

impl<In: ModelView, Out: ModelView> Compute for Composed<In, Out> {
    type Input = In;
    type Output = Out;

    fn binding(&self) -> &Binding {
        match self {
            Composed::Local(component) => component.binding(),
            Composed::Remote(component) => component.binding(),
            Composed::MetaRemote(component) => component.binding(),
        }
    }
}

/// Builder turning a [`Target`] into a component.
///
/// Every `build` creates a new binding; nothing is shared between two
/// compositions of the same logic.
pub struct Composer<In = DynModel, Out = DynModel> {
    target: Target,
    in_model: Option<ModelRef>,
    out_model: Option<ModelRef>,
    ctype: Option<Capability>,
    meta: bool,
    compute_req: Map<String, Value>,
    schemas: Option<Arc<SchemaRegistry>>,
    _models: PhantomData<fn(In) -> Out>,
}

impl Composer {
    pub fn target(target: Target) -> Self {
        Self::from_target(target)
    }

    /// Composes a [`Logic`] type built with `Default`.
    pub fn class<L: Logic + Default>() -> Composer<L::Input, L::Output> {
        Composer::from_target(Target::from_logic(L::default))
    }

    pub fn class_with<L, F>(factory: F) -> Composer<L::Input, L::Output>
    where
        L: Logic,
        F: Fn() -> L + Send + Sync + 'static,
    {
        Composer::from_target(Target::from_logic(factory))
    }

    /// Composes a function; its models are its argument and return types.
    pub fn function<In, Out, F>(name: impl Into<String>, f: F) -> Composer<In, Out>
    where
        In: DataModel,
        Out: DataModel,
        F: Fn(In, Option<&ExecReq>, &Kwargs) -> anyhow::Result<Out> + Send + Sync + 'static,
    {
        Composer::from_target(Target::function(name, f))
    }

    /// Composes a function over plain values. Both models must be supplied
    /// with [`in_model`](Composer::in_model) / [`out_model`](Composer::out_model).
    pub fn dynamic<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value, Option<&ExecReq>, &Kwargs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::from_target(Target::dynamic(name, f))
    }

    /// A component without logic, typically a MetaRemote dispatch target.
    pub fn placeholder(name: impl Into<String>) -> Self {
        Self::from_target(Target::placeholder(name))
    }

    /// A placeholder with static model types.
    pub fn interface<In: DataModel, Out: DataModel>(name: impl Into<String>) -> Composer<In, Out> {
        let mut target = Target::placeholder(name);
        target.input = Some(SchemaDescriptor::of::<In>());
        target.output = Some(SchemaDescriptor::of::<Out>());
        Composer::from_target(target)
    }
}

impl<In: ModelView, Out: ModelView> Composer<In, Out> {
    fn from_target(target: Target) -> Self {
        Self {
            target,
            in_model: None,
            out_model: None,
            ctype: None,
            meta: false,
            compute_req: Map::new(),
            schemas: None,
            _models: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.target.name
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.target.description = Some(description.into());
        self
    }

    pub fn in_model(mut self, model: impl Into<ModelRef>) -> Self {
        self.in_model = Some(model.into());
        self
    }

    pub fn out_model(mut self, model: impl Into<ModelRef>) -> Self {
        self.out_model = Some(model.into());
        self
    }

    /// Registry used to resolve `module.Symbol` model references.
    pub fn schemas(mut self, schemas: Arc<SchemaRegistry>) -> Self {
        self.schemas = Some(schemas);
        self
    }

    pub fn ctype(mut self, capability: Capability) -> Self {
        self.ctype = Some(capability);
        self
    }

    /// Marks the component as late-bound (MetaRemote).
    pub fn meta(mut self, meta: bool) -> Self {
        self.meta = meta;
        self
    }

    /// Sets one resource request field, e.g. `("num_cpus", 1)`. Fields are
    /// validated together when the component is built.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.compute_req.insert(key.into(), value.into());
        self
    }

    pub fn num_cpus(self, num_cpus: u32) -> Self {
        self.option("num_cpus", num_cpus)
    }

    pub fn num_gpus(self, num_gpus: u32) -> Self {
        self.option("num_gpus", num_gpus)
    }

    pub fn memory(self, bytes: f64) -> Self {
        self.option("memory", bytes)
    }

    pub fn max_retries(self, max_retries: i32) -> Self {
        self.option("max_retries", max_retries)
    }

    pub fn retry_exceptions(self, retry: bool) -> Self {
        self.option("retry_exceptions", retry)
    }

    /// Reserves `quantity` of a custom named resource.
    pub fn resource(mut self, name: impl Into<String>, quantity: f64) -> Self {
        let resources = self
            .compute_req
            .entry("resources")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(resources) = resources {
            resources.insert(name.into(), quantity.into());
        }
        self
    }

    /// Binds a whole resource request.
    pub fn resources(mut self, request: &ResourceRequest) -> Self {
        self.compute_req.extend(request.overrides());
        self
    }

    /// Applies options read from configuration. Set options win over what
    /// the builder already holds; resource fields are merged.
    pub fn with_options(mut self, options: &ComposeOptions) -> Self {
        if let Some(ctype) = options.ctype {
            self.ctype = Some(ctype);
        }
        if let Some(reference) = &options.in_model {
            self.in_model = Some(ModelRef::Reference(reference.clone()));
        }
        if let Some(reference) = &options.out_model {
            self.out_model = Some(ModelRef::Reference(reference.clone()));
        }
        self.meta |= options.meta;
        self.compute_req
            .extend(options.compute_req.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    fn resolve_reference(&self, reference: &str) -> Result<SchemaDescriptor, ConfigError> {
        match &self.schemas {
            Some(schemas) => schemas.resolve(reference),
            None => SchemaRegistry::new().resolve(reference),
        }
    }

    fn resolve_model(&self, role: ModelRole) -> Result<SchemaDescriptor, ConfigError> {
        let (declared, overridden) = match role {
            ModelRole::Input => (self.target.input, &self.in_model),
            ModelRole::Output => (self.target.output, &self.out_model),
        };
        let overridden = match overridden {
            None => None,
            Some(ModelRef::Descriptor(descriptor)) => Some(*descriptor),
            Some(ModelRef::Reference(reference)) => Some(self.resolve_reference(reference)?),
        };

        match (declared, overridden) {
            (Some(declared), Some(found)) if declared != found => Err(ConfigError::ModelMismatch {
                component: self.target.name.clone(),
                role,
                expected: declared.type_name().to_string(),
                found: found.type_name().to_string(),
            }),
            (_, Some(model)) | (Some(model), None) => Ok(model),
            (None, None) => Err(ConfigError::MissingModel {
                component: self.target.name.clone(),
                role,
            }),
        }
    }

    fn capability(&self) -> Result<Capability, ConfigError> {
        match (self.ctype.unwrap_or_default(), self.meta) {
            (Capability::Local, true) => Err(ConfigError::MetaRequiresRemote(self.target.name.clone())),
            (Capability::Remote, true) => Ok(Capability::MetaRemote),
            (capability, _) => Ok(capability),
        }
    }

    fn bound_request(&self) -> Result<Option<ExecReq>, ConfigError> {
        if self.compute_req.is_empty() {
            return Ok(None);
        }
        let request = ResourceRequest::model_validate(Value::Object(self.compute_req.clone()))
            .map_err(ConfigError::InvalidResources)?;
        Ok(Some(ExecReq::with_compute_req(request)))
    }

    /// Builds the component. The variant follows `ctype` and `meta`,
    /// defaulting to Remote.
    #[tracing::instrument(skip(self), fields(component = %self.target.name))]
    pub fn build(self) -> Result<Composed<In, Out>, ConfigError> {
        let capability = self.capability()?;
        let input = self.resolve_model(ModelRole::Input)?;
        let output = self.resolve_model(ModelRole::Output)?;
        let bound = self.bound_request()?;

        if !capability.is_remote() && bound.is_some() {
            return Err(ConfigError::RemoteOnly {
                component: self.target.name.clone(),
                capability: capability.to_string(),
            });
        }

        tracing::info!(
            capability = %capability,
            input = input.type_name(),
            output = output.type_name(),
            bound = bound.is_some(),
            "Composed component"
        );

        let Target {
            name,
            description,
            execute,
            ..
        } = self.target;
        let binding = Binding::new(name, description, input, output, execute, bound, capability);

        Ok(match capability {
            Capability::Local => Composed::Local(LocalComponent::new(binding)),
            Capability::Remote => Composed::Remote(RemoteComponent::new(binding)),
            Capability::MetaRemote => Composed::MetaRemote(MetaComponent::new(binding)),
        })
    }

    pub fn local(mut self) -> Result<LocalComponent<In, Out>, ConfigError> {
        self.ctype = Some(Capability::Local);
        let built = self.build()?;
        let capability = built.capability();
        built
            .into_local()
            .ok_or_else(|| ConfigError::UnsupportedCapability(capability.to_string()))
    }

    /// Builds the Remote variant. A `meta` flag, set here or by options,
    /// is rejected rather than dropped.
    pub fn remote(mut self) -> Result<RemoteComponent<In, Out>, ConfigError> {
        if self.meta {
            return Err(ConfigError::LateBound(self.target.name.clone()));
        }
        self.ctype = Some(Capability::Remote);
        let built = self.build()?;
        let capability = built.capability();
        built
            .into_remote()
            .ok_or_else(|| ConfigError::UnsupportedCapability(capability.to_string()))
    }

    pub fn meta_remote(mut self) -> Result<MetaComponent<In, Out>, ConfigError> {
        self.ctype = Some(Capability::MetaRemote);
        let built = self.build()?;
        let capability = built.capability();
        built
            .into_meta()
            .ok_or_else(|| ConfigError::UnsupportedCapability(capability.to_string()))
    }
}
