use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// A single violated field inside a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Dotted location of the field (`compute_req.memory`), or `__root__`.
    pub loc: String,
    pub msg: String,
}

impl FieldError {
    pub fn new(loc: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            loc: loc.into(),
            msg: msg.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.loc, self.msg)
    }
}

/// Raised when a value does not conform to a Data Model.
///
/// Partially valid values are never accepted: a model either validates as a
/// whole or the error lists every field that could be identified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} validation error(s) for {model}: {}", .errors.len(), join(.errors))]
pub struct ValidationError {
    pub model: String,
    pub errors: Vec<FieldError>,
}

fn join(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    pub fn new(model: impl Into<String>, errors: Vec<FieldError>) -> Self {
        Self {
            model: model.into(),
            errors,
        }
    }

    pub fn field(model: impl Into<String>, loc: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(model, vec![FieldError::new(loc, msg)])
    }

    /// Maps a serde decoding failure onto the field it names.
    ///
    /// serde reports the offending key between backticks
    /// (``unknown field `foo` ``, ``missing field `bar` ``).
    pub fn from_serde(model: impl Into<String>, err: &impl fmt::Display) -> Self {
        let msg = err.to_string();
        let loc = msg
            .split('`')
            .nth(1)
            .filter(|key| {
                key.starts_with(|c: char| c.is_alphabetic() || c == '_')
                    && key.chars().all(|c| c.is_alphanumeric() || c == '_')
            })
            .unwrap_or("__root__")
            .to_string();
        Self::field(model, loc, msg)
    }

    /// Re-roots every field location under `parent`.
    pub fn nested(mut self, parent: &str) -> Self {
        for error in &mut self.errors {
            error.loc = format!("{}.{}", parent, error.loc);
        }
        self
    }

    /// Returns true if any error points at `loc`.
    pub fn has_field(&self, loc: &str) -> bool {
        self.errors.iter().any(|e| e.loc == loc)
    }
}

/// Which side of an input/output pair a model describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    Input,
    Output,
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelRole::Input => f.write_str("input"),
            ModelRole::Output => f.write_str("output"),
        }
    }
}

/// Composition-time failures. These are raised while a component is being
/// built, never while it is being called.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("component `{component}` has no {role} model: declare it on the logic or pass an override")]
    MissingModel { component: String, role: ModelRole },
    #[error("invalid model reference `{0}`: expected `module.Symbol`")]
    InvalidReference(String),
    #[error("could not resolve model reference: module `{0}` is not registered")]
    UnknownModule(String),
    #[error("could not resolve model reference: module `{module}` has no symbol `{symbol}`")]
    UnknownSymbol { module: String, symbol: String },
    #[error("component `{component}`: {role} override `{found}` does not match the logic's `{expected}`")]
    ModelMismatch {
        component: String,
        role: ModelRole,
        expected: String,
        found: String,
    },
    #[error("component `{component}` is `{capability}` and cannot carry a resource request")]
    RemoteOnly {
        component: String,
        capability: String,
    },
    #[error("component `{0}` cannot be late-bound without remote capability")]
    MetaRequiresRemote(String),
    #[error("component `{0}` is late-bound and must be built with `meta_remote`")]
    LateBound(String),
    #[error("component type `{0}` not supported")]
    UnsupportedCapability(String),
    #[error("invalid resource request: {0}")]
    InvalidResources(ValidationError),
    #[error("component `{0}` is already registered")]
    DuplicateComponent(String),
    #[error("model `{0}` is already registered")]
    DuplicateSchema(String),
    #[error("plugin `{namespace}:{name}` is already registered")]
    DuplicatePlugin { namespace: String, name: String },
    #[error("component `{0}` not found")]
    UnknownComponent(String),
    #[error("plugin `{namespace}:{name}` not found")]
    UnknownPlugin { namespace: String, name: String },
}

/// Boundary of the compute pipeline at which validation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Input,
    Output,
    ExecReq,
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Boundary::Input => f.write_str("input"),
            Boundary::Output => f.write_str("output"),
            Boundary::ExecReq => f.write_str("execution requirement"),
        }
    }
}

/// Call-time failures of `compute`, `compute_remote` and handle resolution.
#[derive(Debug, Error)]
pub enum ComponentError {
    #[error("invalid {boundary}: {source}")]
    Validation {
        boundary: Boundary,
        #[source]
        source: ValidationError,
    },
    #[error("component `{0}` does not implement `execute`")]
    NotImplemented(String),
    /// The user's own error, untouched.
    #[error(transparent)]
    Execution(anyhow::Error),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("expected a `{expected}` value, got `{found}`")]
    TypeMismatch { expected: String, found: String },
}

impl ComponentError {
    pub fn validation(boundary: Boundary, source: ValidationError) -> Self {
        Self::Validation { boundary, source }
    }

    /// The validation error, if this is one.
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            ComponentError::Validation { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Failures of the remote layer. Cloneable because task results are shared
/// between every holder of a handle.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("scheduler is not initialized")]
    SchedulerUnavailable,
    #[error("infeasible request: {requested} {resource} requested, cluster has {capacity}")]
    Infeasible {
        resource: String,
        requested: f64,
        capacity: f64,
    },
    #[error("worker crashed after {attempts} attempt(s): {message}")]
    WorkerCrashed { attempts: u32, message: String },
    #[error("remote task failed: {0}")]
    Task(Arc<ComponentError>),
    #[error("upstream task {task} failed: {source}")]
    Upstream {
        task: Uuid,
        source: Box<RemoteError>,
    },
    #[error("task {task} was cancelled")]
    Cancelled { task: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_message_names_field() {
        let err = serde_json::from_str::<std::collections::HashMap<String, u8>>("{\"a\": -1}")
            .unwrap_err();
        let validation = ValidationError::from_serde("Foo", &err);
        assert_eq!(validation.model, "Foo");
        assert_eq!(validation.errors.len(), 1);

        let unknown = ValidationError::from_serde("Foo", &"unknown field `bar`, expected `baz`");
        assert!(unknown.has_field("bar"));
    }

    #[test]
    fn test_nested_locations() {
        let err = ValidationError::field("ResourceRequest", "memory", "must be positive")
            .nested("compute_req");
        assert!(err.has_field("compute_req.memory"));
        assert!(err.to_string().contains("compute_req.memory"));
    }

    #[test]
    fn test_component_error_display() {
        let err = ComponentError::validation(
            Boundary::Input,
            ValidationError::field("IntModel", "value", "missing field `value`"),
        );
        assert!(err.to_string().starts_with("invalid input"));
        assert!(err.as_validation().is_some());

        let remote = RemoteError::Infeasible {
            resource: "GPU".into(),
            requested: 2.0,
            capacity: 0.0,
        };
        assert!(remote.to_string().contains("GPU"));
    }
}
