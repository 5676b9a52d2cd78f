//! # Interop Core Library
//!
//! Schema-validated components: Data Models for every boundary, a uniform
//! validate-execute-validate `compute` pipeline, and a composition engine
//! that turns raw logic into Local, Remote or MetaRemote components.
//!
//! Remote execution goes through the [`scheduler::Scheduler`] boundary; an
//! in-process implementation lives in the `interop-cluster` crate.

pub mod components;
pub mod compose;
pub mod error;
pub mod executor;
pub mod models;
pub mod plugins;
pub mod registry;
pub mod scheduler;
pub mod schema;

/// Everything needed to declare models, compose components and call them.
pub mod prelude {
    pub use crate::components::{
        Binding, Capability, Compute, ComputeMeta, ComputeRemote, DynComponent, Kwargs,
        LocalComponent, MetaComponent, ModelView, PluginRef, RemoteComponent,
    };
    pub use crate::compose::{ComponentManifest, ComposeOptions, Composed, Composer, Logic, ModelRef, Target};
    pub use crate::error::{ComponentError, ConfigError, RemoteError, ValidationError};
    pub use crate::models::{
        BaseModel, DataModel, DynModel, Encoding, ExecReq, NdArray, Payload, ResourceRequest,
        SchemaName, SchemaVersion,
    };
    pub use crate::plugins::PluginRegistry;
    pub use crate::registry::ComponentRegistry;
    pub use crate::scheduler::{BoundNode, RemoteHandle, Scheduler, gather};
    pub use crate::schema::{SchemaDescriptor, SchemaRegistry};
}
