//! # Data Models
//!
//! Every component input and output, and every execution requirement, is a
//! Data Model: an immutable, strictly validated value carrying a
//! `schema_name` / `schema_version` header.
//!
//! Models are created per call and dropped afterwards. Ownership gives the
//! immutability the pipeline relies on: a model is moved into `compute`, so
//! nothing can mutate it between validation and execution.

use crate::error::ValidationError;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::{Any, TypeId};
use std::fmt;
use std::num::NonZeroU32;

mod macros;

pub mod array;
pub mod proc;
pub mod req;
pub mod serialization;

pub use array::NdArray;
pub use proc::{ComputeError, FailedOperation, InputProc, OutputProc, Provenance};
pub use req::{ExecReq, ResourceRequest};
pub use serialization::{EncodeError, Encoding};

const DEFAULT_SCHEMA_NAME: &str = "unknown";

/// Name of the schema a model conforms to (default `"unknown"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct SchemaName(String);

impl SchemaName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SchemaName {
    fn default() -> Self {
        Self(DEFAULT_SCHEMA_NAME.to_string())
    }
}

impl From<&str> for SchemaName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for SchemaName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Positive schema version (default 1). Zero is rejected on decode.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct SchemaVersion(NonZeroU32);

impl SchemaVersion {
    pub const ONE: SchemaVersion = SchemaVersion(NonZeroU32::MIN);

    pub fn new(version: u32) -> Option<Self> {
        NonZeroU32::new(version).map(Self)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl Default for SchemaVersion {
    fn default() -> Self {
        Self::ONE
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A versioned, schema-validated value type.
///
/// Implementations must reject unknown fields (`#[serde(deny_unknown_fields)]`);
/// the [`data_model!`](crate::data_model) macro takes care of that.
pub trait DataModel:
    Serialize + DeserializeOwned + JsonSchema + Clone + fmt::Debug + PartialEq + Send + Sync + 'static
{
    fn schema_name(&self) -> &str;

    fn schema_version(&self) -> SchemaVersion;

    /// Field constraints serde cannot express on its own.
    fn check(&self) -> Result<(), ValidationError> {
        Ok(())
    }

    /// Builds and validates a model from a plain JSON-compatible value.
    fn model_validate(value: Value) -> Result<Self, ValidationError>
    where
        Self: Sized,
    {
        let model: Self = serde_json::from_value(value)
            .map_err(|e| ValidationError::from_serde(short_type_name::<Self>(), &e))?;
        model.check()?;
        Ok(model)
    }

    /// Validates a payload unconditionally, even if it already has this type.
    fn from_payload(payload: Payload) -> Result<Self, ValidationError>
    where
        Self: Sized,
    {
        match payload {
            Payload::Model(model) => match model.downcast::<Self>() {
                Ok(typed) => {
                    typed.check()?;
                    Ok(typed)
                }
                Err(other) => Self::model_validate(other.to_value()?),
            },
            Payload::Raw(value) => Self::model_validate(value),
        }
    }

    /// Plain, nested, JSON-compatible representation. The schema header is
    /// always present.
    fn to_value(&self) -> Result<Value, ValidationError> {
        serde_json::to_value(self).map_err(|e| ValidationError::from_serde(short_type_name::<Self>(), &e))
    }

    fn encode(&self, encoding: Encoding) -> Result<String, EncodeError> {
        serialization::encode(self, encoding)
    }

    fn decode(text: &str, encoding: Encoding) -> Result<Self, ValidationError>
    where
        Self: Sized,
    {
        Self::model_validate(serialization::decode_value(text, encoding, short_type_name::<Self>())?)
    }

    /// Draft-07 JSON schema of this model.
    fn model_json_schema() -> Value
    where
        Self: Sized,
    {
        let root = schemars::r#gen::SchemaGenerator::default().into_root_schema_for::<Self>();
        serde_json::to_value(root).unwrap_or(Value::Null)
    }
}

/// Constraint checks of a field holding Data Models, used by
/// `data_model!` for the fields listed in `nested = [..]`.
pub trait NestedModel {
    fn check_nested(&self) -> Result<(), ValidationError>;
}

impl<M: DataModel> NestedModel for M {
    fn check_nested(&self) -> Result<(), ValidationError> {
        self.check()
    }
}

impl<T: NestedModel> NestedModel for Option<T> {
    fn check_nested(&self) -> Result<(), ValidationError> {
        match self {
            Some(inner) => inner.check_nested(),
            None => Ok(()),
        }
    }
}

impl<T: NestedModel> NestedModel for Vec<T> {
    fn check_nested(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();
        let mut model = String::new();
        for (index, item) in self.iter().enumerate() {
            if let Err(err) = item.check_nested() {
                model = err.model.clone();
                errors.extend(err.nested(&index.to_string()).errors);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(model, errors))
        }
    }
}

/// Object-safe view of any [`DataModel`].
pub trait AnyModel: fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
    fn model_type(&self) -> TypeId;
    fn type_name(&self) -> &'static str;
    fn header(&self) -> (&str, SchemaVersion);
    fn dump(&self) -> Result<Value, ValidationError>;
    fn verify(&self) -> Result<(), ValidationError>;
    fn clone_boxed(&self) -> Box<dyn AnyModel>;
    fn eq_dyn(&self, other: &dyn AnyModel) -> bool;
}

impl<M: DataModel> AnyModel for M {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }

    fn model_type(&self) -> TypeId {
        TypeId::of::<M>()
    }

    fn type_name(&self) -> &'static str {
        short_type_name::<M>()
    }

    fn header(&self) -> (&str, SchemaVersion) {
        (DataModel::schema_name(self), DataModel::schema_version(self))
    }

    fn dump(&self) -> Result<Value, ValidationError> {
        DataModel::to_value(self)
    }

    fn verify(&self) -> Result<(), ValidationError> {
        DataModel::check(self)
    }

    fn clone_boxed(&self) -> Box<dyn AnyModel> {
        Box::new(self.clone())
    }

    fn eq_dyn(&self, other: &dyn AnyModel) -> bool {
        other.as_any().downcast_ref::<M>() == Some(self)
    }
}

/// An owned model whose concrete type is only known at run time.
#[derive(Debug)]
pub struct DynModel(Box<dyn AnyModel>);

impl DynModel {
    pub fn new<M: DataModel>(model: M) -> Self {
        Self(Box::new(model))
    }

    pub fn model_type(&self) -> TypeId {
        self.0.model_type()
    }

    pub fn type_name(&self) -> &'static str {
        self.0.type_name()
    }

    pub fn is<M: DataModel>(&self) -> bool {
        self.model_type() == TypeId::of::<M>()
    }

    pub fn schema_name(&self) -> &str {
        self.0.header().0
    }

    pub fn schema_version(&self) -> SchemaVersion {
        self.0.header().1
    }

    pub fn to_value(&self) -> Result<Value, ValidationError> {
        self.0.dump()
    }

    /// Runs the model's constraint checks, nested models included.
    pub fn check(&self) -> Result<(), ValidationError> {
        self.0.verify()
    }

    pub fn downcast_ref<M: DataModel>(&self) -> Option<&M> {
        self.0.as_any().downcast_ref::<M>()
    }

    /// Takes the concrete model out, or hands `self` back on a type mismatch.
    pub fn downcast<M: DataModel>(self) -> Result<M, DynModel> {
        if !self.is::<M>() {
            return Err(self);
        }
        match self.0.into_any().downcast::<M>() {
            Ok(model) => Ok(*model),
            Err(_) => unreachable!("model type checked before downcast"),
        }
    }
}

impl Clone for DynModel {
    fn clone(&self) -> Self {
        Self(self.0.clone_boxed())
    }
}

impl PartialEq for DynModel {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_dyn(other.0.as_ref())
    }
}

/// What a component boundary accepts: an already-typed model or a plain
/// key/value mapping still to be validated.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Model(DynModel),
    Raw(Value),
}

impl Payload {
    /// Plain representation, serializing typed models.
    pub fn into_value(self) -> Result<Value, ValidationError> {
        match self {
            Payload::Model(model) => model.to_value(),
            Payload::Raw(value) => Ok(value),
        }
    }
}

impl<M: DataModel> From<M> for Payload {
    fn from(model: M) -> Self {
        Payload::Model(DynModel::new(model))
    }
}

impl From<DynModel> for Payload {
    fn from(model: DynModel) -> Self {
        Payload::Model(model)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Raw(value)
    }
}

crate::data_model! {
    /// The bare Data Model: only the schema header.
    pub struct BaseModel {}
}

/// Type name without its module path (`NdArray<f64>` rather than
/// `interop_core::models::array::NdArray<f64>`).
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    let start = base.rfind("::").map(|i| i + 2).unwrap_or(0);
    &full[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    crate::data_model! {
        struct Point {
            x: i64,
            #[serde(default)]
            label: Option<String>,
        }
    }

    #[test]
    fn test_defaults_and_header() {
        let base = BaseModel::new();
        assert_eq!(base.schema_name(), "unknown");
        assert_eq!(base.schema_version(), SchemaVersion::ONE);

        let value = base.to_value().unwrap();
        assert_eq!(value, json!({ "schema_name": "unknown", "schema_version": 1 }));
    }

    #[test]
    fn test_strict_validation() {
        let err = Point::model_validate(json!({ "x": 1, "y": 2 })).unwrap_err();
        assert!(err.has_field("y"), "{}", err);

        let err = Point::model_validate(json!({ "label": "a" })).unwrap_err();
        assert!(err.has_field("x"), "{}", err);

        assert!(Point::model_validate(json!({ "x": 1, "schema_version": 0 })).is_err());
    }

    #[test]
    fn test_round_trip() {
        let point = Point::new(4, Some("p".into())).with_schema("point", SchemaVersion::new(2).unwrap());
        let back = Point::model_validate(point.to_value().unwrap()).unwrap();
        assert_eq!(back, point);
    }

    #[test]
    fn test_dyn_model_downcast() {
        let model = DynModel::new(Point::new(1, None));
        assert!(model.is::<Point>());
        assert_eq!(model.type_name(), "Point");
        assert_eq!(model.clone(), model);

        let model = model.downcast::<BaseModel>().unwrap_err();
        let point = model.downcast::<Point>().unwrap();
        assert_eq!(point.x, 1);
    }

    #[test]
    fn test_from_payload_revalidates() {
        let payload = Payload::from(Point::new(2, None));
        assert_eq!(Point::from_payload(payload).unwrap().x, 2);

        let foreign = Payload::from(BaseModel::new());
        assert!(Point::from_payload(foreign).is_err());
    }

    #[test]
    fn test_json_schema_has_draft() {
        let schema = Point::model_json_schema();
        assert_eq!(schema["$schema"], "http://json-schema.org/draft-07/schema#");
        assert!(schema["properties"]["schema_name"].is_object());
    }
}
