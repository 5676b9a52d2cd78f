use crate::error::ValidationError;
use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use serde::de::{DeserializeOwned, Error as _};
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// A dense, row-major numeric array usable as a Data Model field.
///
/// Serializes to nested number sequences (`[[1, 2], [3, 4]]` for a 2x2
/// array) and decodes back, rejecting ragged input.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray<T> {
    shape: Vec<usize>,
    data: Vec<T>,
}

impl<T> NdArray<T> {
    pub fn new(shape: Vec<usize>, data: Vec<T>) -> Result<Self, ValidationError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ValidationError::field(
                "NdArray",
                "data",
                format!("shape {:?} holds {} elements, got {}", shape, expected, data.len()),
            ));
        }
        Ok(Self { shape, data })
    }

    /// One-dimensional array.
    pub fn from_vec(data: Vec<T>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    pub fn scalar(value: T) -> Self {
        Self {
            shape: Vec::new(),
            data: vec![value],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Flat, row-major view of the elements.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn get(&self, index: &[usize]) -> Option<&T> {
        if index.len() != self.shape.len() {
            return None;
        }
        let mut offset = 0;
        for (i, (&idx, &dim)) in index.iter().zip(&self.shape).enumerate() {
            if idx >= dim {
                return None;
            }
            let stride: usize = self.shape[i + 1..].iter().product();
            offset += idx * stride;
        }
        self.data.get(offset)
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }
}

fn nest(shape: &[usize], leaves: &[Value]) -> Value {
    match shape.split_first() {
        None => leaves.first().cloned().unwrap_or(Value::Null),
        Some((&len, rest)) => {
            let stride: usize = rest.iter().product();
            Value::Array(
                (0..len)
                    .map(|i| nest(rest, &leaves[i * stride..(i + 1) * stride]))
                    .collect(),
            )
        }
    }
}

fn infer_shape(value: &Value, shape: &mut Vec<usize>) {
    if let Value::Array(items) = value {
        shape.push(items.len());
        if let Some(first) = items.first() {
            infer_shape(first, shape);
        }
    }
}

fn flatten(value: &Value, shape: &[usize], depth: usize, out: &mut Vec<Value>) -> Result<(), String> {
    match (value, shape.get(depth)) {
        (Value::Array(items), Some(&len)) => {
            if items.len() != len {
                return Err(format!(
                    "ragged array at depth {}: expected {} items, found {}",
                    depth,
                    len,
                    items.len()
                ));
            }
            items.iter().try_for_each(|item| flatten(item, shape, depth + 1, out))
        }
        (Value::Array(_), None) => Err(format!("unexpected nesting at depth {}", depth)),
        (_, Some(_)) => Err(format!("expected a sequence at depth {}", depth)),
        (leaf, None) => {
            out.push(leaf.clone());
            Ok(())
        }
    }
}

impl<T: Serialize> Serialize for NdArray<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let leaves = self
            .data
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(S::Error::custom)?;
        nest(&self.shape, &leaves).serialize(serializer)
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for NdArray<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let mut shape = Vec::new();
        infer_shape(&value, &mut shape);

        let mut leaves = Vec::new();
        flatten(&value, &shape, 0, &mut leaves).map_err(D::Error::custom)?;
        let data = leaves
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<T>, _>>()
            .map_err(D::Error::custom)?;
        Ok(Self { shape, data })
    }
}

impl<T: JsonSchema> JsonSchema for NdArray<T> {
    fn schema_name() -> String {
        format!("NdArray_of_{}", T::schema_name())
    }

    fn json_schema(_generator: &mut SchemaGenerator) -> Schema {
        let mut schema = SchemaObject {
            instance_type: Some(InstanceType::Array.into()),
            ..Default::default()
        };
        schema.metadata().description =
            Some(format!("Row-major nested sequences of {}", T::schema_name()));
        schema.into()
    }
}
