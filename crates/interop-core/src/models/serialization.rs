use crate::error::ValidationError;
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;

/// Text encodings a Data Model can be written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Json,
    JsonPretty,
    Yaml,
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("encoding format `{0}` not supported")]
    Unsupported(String),
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML encoding failed: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl FromStr for Encoding {
    type Err = EncodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" | "js" => Ok(Encoding::Json),
            "json-pretty" => Ok(Encoding::JsonPretty),
            "yaml" | "yml" => Ok(Encoding::Yaml),
            other => Err(EncodeError::Unsupported(other.to_string())),
        }
    }
}

pub fn encode<T: Serialize + ?Sized>(data: &T, encoding: Encoding) -> Result<String, EncodeError> {
    Ok(match encoding {
        Encoding::Json => serde_json::to_string(data)?,
        Encoding::JsonPretty => serde_json::to_string_pretty(data)?,
        Encoding::Yaml => serde_yaml::to_string(data)?,
    })
}

/// Parses text into a plain value, ready for model validation.
pub fn decode_value(text: &str, encoding: Encoding, model: &str) -> Result<Value, ValidationError> {
    match encoding {
        Encoding::Json | Encoding::JsonPretty => {
            serde_json::from_str(text).map_err(|e| ValidationError::from_serde(model, &e))
        }
        Encoding::Yaml => serde_yaml::from_str(text).map_err(|e| ValidationError::from_serde(model, &e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BaseModel, DataModel};

    #[test]
    fn test_encoding_aliases() {
        assert_eq!("js".parse::<Encoding>().unwrap(), Encoding::Json);
        assert_eq!("YML".parse::<Encoding>().unwrap(), Encoding::Yaml);
        assert!(matches!(
            "msgpack".parse::<Encoding>(),
            Err(EncodeError::Unsupported(_))
        ));
    }

    #[test]
    fn test_yaml_round_trip() {
        let model = BaseModel::new().with_schema("base", crate::models::SchemaVersion::ONE);
        let text = model.encode(Encoding::Yaml).unwrap();
        assert!(text.contains("schema_name: base"));
        assert_eq!(BaseModel::decode(&text, Encoding::Yaml).unwrap(), model);
    }

    #[test]
    fn test_pretty_json() {
        let text = BaseModel::new().encode(Encoding::JsonPretty).unwrap();
        assert!(text.contains('\n'));
        assert!(text.contains("\"schema_version\": 1"));
    }
}
