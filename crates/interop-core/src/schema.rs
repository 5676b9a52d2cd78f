//! Schema descriptors: run-time handles on Data Model types.
//!
//! A component built from plain-value logic has no Rust type to name its
//! boundaries, so it carries a [`SchemaDescriptor`] instead. Descriptors can
//! also be looked up by a `module.Symbol` string through a
//! [`SchemaRegistry`], which is how forward references are resolved.

use crate::error::{ConfigError, ValidationError};
use crate::models::{DataModel, DynModel, Payload, short_type_name};
use serde_json::Value;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

type ValidateFn = fn(Payload) -> Result<DynModel, ValidationError>;

/// Describes one Data Model type: its name, identity, validator and schema.
#[derive(Clone, Copy)]
pub struct SchemaDescriptor {
    type_name: &'static str,
    type_id: TypeId,
    validator: ValidateFn,
    schema: fn() -> Value,
}

fn validate_as<M: DataModel>(payload: Payload) -> Result<DynModel, ValidationError> {
    M::from_payload(payload).map(DynModel::new)
}

impl SchemaDescriptor {
    pub fn of<M: DataModel>() -> Self {
        Self {
            type_name: short_type_name::<M>(),
            type_id: TypeId::of::<M>(),
            validator: validate_as::<M>,
            schema: M::model_json_schema,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn is<M: DataModel>(&self) -> bool {
        self.type_id == TypeId::of::<M>()
    }

    pub fn json_schema(&self) -> Value {
        (self.schema)()
    }

    /// Validates a payload against this model.
    ///
    /// A model whose concrete type is exactly the described one skips the
    /// serialize and decode round trip but still has its constraints
    /// checked, since its fields may have been set directly. Anything else,
    /// including an equivalent model of a different type, is serialized and
    /// validated from scratch.
    pub fn validate(&self, payload: Payload) -> Result<DynModel, ValidationError> {
        match payload {
            Payload::Model(model) if model.model_type() == self.type_id => {
                tracing::trace!(model = self.type_name, "Exact model type, checking constraints only");
                model.check()?;
                Ok(model)
            }
            Payload::Model(model) => {
                let value = model.to_value()?;
                (self.validator)(Payload::Raw(value))
            }
            raw => (self.validator)(raw),
        }
    }
}

impl PartialEq for SchemaDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for SchemaDescriptor {}

impl fmt::Debug for SchemaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SchemaDescriptor").field(&self.type_name).finish()
    }
}

/// Explicit `module.Symbol` to descriptor mapping.
///
/// Populated at startup by every unit that defines models, then shared
/// read-only with the composition engine.
#[derive(Debug, Default, Clone)]
pub struct SchemaRegistry {
    modules: HashMap<String, HashMap<String, SchemaDescriptor>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `M` under `module`, using its type name as the symbol.
    pub fn register<M: DataModel>(&mut self, module: &str) -> Result<(), ConfigError> {
        self.register_as(module, short_type_name::<M>(), SchemaDescriptor::of::<M>())
    }

    pub fn register_as(
        &mut self,
        module: &str,
        symbol: &str,
        descriptor: SchemaDescriptor,
    ) -> Result<(), ConfigError> {
        let symbols = self.modules.entry(module.to_string()).or_default();
        if symbols.contains_key(symbol) {
            return Err(ConfigError::DuplicateSchema(format!("{}.{}", module, symbol)));
        }
        symbols.insert(symbol.to_string(), descriptor);
        tracing::info!("Registered model: {}.{}", module, symbol);
        Ok(())
    }

    /// Resolves a `module.Symbol` reference. The module part may itself
    /// contain dots; the symbol is whatever follows the last one.
    pub fn resolve(&self, reference: &str) -> Result<SchemaDescriptor, ConfigError> {
        let (module, symbol) = reference
            .rsplit_once('.')
            .filter(|(module, symbol)| !module.is_empty() && !symbol.is_empty())
            .ok_or_else(|| ConfigError::InvalidReference(reference.to_string()))?;

        let symbols = self
            .modules
            .get(module)
            .ok_or_else(|| ConfigError::UnknownModule(module.to_string()))?;
        symbols
            .get(symbol)
            .copied()
            .ok_or_else(|| ConfigError::UnknownSymbol {
                module: module.to_string(),
                symbol: symbol.to_string(),
            })
    }

    /// Lists all registered references.
    pub fn list(&self) -> Vec<String> {
        let mut refs: Vec<String> = self
            .modules
            .iter()
            .flat_map(|(module, symbols)| symbols.keys().map(move |s| format!("{}.{}", module, s)))
            .collect();
        refs.sort();
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BaseModel, ExecReq, ResourceRequest};
    use serde_json::json;

    #[test]
    fn test_exact_type_passes_through() {
        let descriptor = SchemaDescriptor::of::<ExecReq>();
        let model = descriptor.validate(Payload::from(ExecReq::default())).unwrap();
        assert!(model.is::<ExecReq>());

        let from_raw = descriptor.validate(Payload::Raw(json!({ "thread_safe": true }))).unwrap();
        assert!(from_raw.downcast_ref::<ExecReq>().unwrap().thread_safe);
    }

    #[test]
    fn test_exact_type_still_checked() {
        let descriptor = SchemaDescriptor::of::<ExecReq>();
        let mut req = ExecReq::default();
        req.compute_req = Some(ResourceRequest {
            max_calls: Some(0),
            ..Default::default()
        });
        let err = descriptor.validate(Payload::from(req)).unwrap_err();
        assert!(err.has_field("compute_req.max_calls"), "{}", err);
    }

    #[test]
    fn test_other_model_is_revalidated() {
        let descriptor = SchemaDescriptor::of::<ExecReq>();
        let converted = descriptor.validate(Payload::from(BaseModel::new())).unwrap();
        assert!(converted.is::<ExecReq>());

        let err = descriptor.validate(Payload::Raw(json!({ "bogus": 1 }))).unwrap_err();
        assert!(err.has_field("bogus"));
    }

    #[test]
    fn test_registry_resolution() {
        let mut registry = SchemaRegistry::new();
        registry.register::<ExecReq>("interop.models.req").unwrap();

        let descriptor = registry.resolve("interop.models.req.ExecReq").unwrap();
        assert!(descriptor.is::<ExecReq>());
        assert_eq!(registry.list(), vec!["interop.models.req.ExecReq".to_string()]);

        assert!(matches!(
            registry.resolve("ExecReq"),
            Err(ConfigError::InvalidReference(_))
        ));
        assert!(matches!(
            registry.resolve("missing.ExecReq"),
            Err(ConfigError::UnknownModule(m)) if m == "missing"
        ));
        assert!(matches!(
            registry.resolve("interop.models.req.Nope"),
            Err(ConfigError::UnknownSymbol { .. })
        ));
        assert!(matches!(
            registry.register::<ExecReq>("interop.models.req"),
            Err(ConfigError::DuplicateSchema(_))
        ));
    }
}
