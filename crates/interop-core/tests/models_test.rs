use interop_core::data_model;
use interop_core::prelude::*;
use serde_json::json;

data_model! {
    /// A measured trajectory.
    pub struct Trajectory {
        pub positions: NdArray<f64>,
        #[serde(default)]
        pub label: Option<String>,
        #[serde(default)]
        pub steps: Vec<u32>,
    }
}

fn trajectory() -> Trajectory {
    let positions = NdArray::new(vec![2, 3], vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5]).unwrap();
    Trajectory::new(positions, Some("run-1".into()), vec![0, 10])
        .with_schema("trajectory", SchemaVersion::new(3).unwrap())
}

#[test]
fn test_round_trip_through_value() {
    let original = trajectory();
    let value = original.to_value().unwrap();

    assert_eq!(value["schema_name"], "trajectory");
    assert_eq!(value["schema_version"], 3);
    assert_eq!(value["positions"], json!([[0.0, 0.5, 1.0], [1.5, 2.0, 2.5]]));

    assert_eq!(Trajectory::model_validate(value).unwrap(), original);
}

#[test]
fn test_round_trip_through_text() {
    let original = trajectory();
    for encoding in [Encoding::Json, Encoding::JsonPretty, Encoding::Yaml] {
        let text = original.encode(encoding).unwrap();
        assert_eq!(Trajectory::decode(&text, encoding).unwrap(), original);
    }
}

#[test]
fn test_header_defaults_always_serialized() {
    let value = Trajectory::new(NdArray::from_vec(vec![1.0]), None, vec![])
        .to_value()
        .unwrap();
    assert_eq!(value["schema_name"], "unknown");
    assert_eq!(value["schema_version"], 1);
}

#[test]
fn test_ragged_positions_rejected() {
    let err = Trajectory::model_validate(json!({
        "positions": [[0.0, 1.0], [2.0]]
    }))
    .unwrap_err();
    assert_eq!(err.model, "Trajectory");
    assert!(err.to_string().contains("ragged"));
}

#[test]
fn test_schema_lists_fields() {
    let schema = Trajectory::model_json_schema();
    let properties = schema["properties"].as_object().unwrap();
    for field in ["schema_name", "schema_version", "positions", "label", "steps"] {
        assert!(properties.contains_key(field), "missing {}", field);
    }
    assert_eq!(schema["additionalProperties"], false);
}

#[test]
fn test_dyn_model_equality_is_typed() {
    let a = DynModel::new(BaseModel::new());
    let b = DynModel::new(ExecReq::default());
    assert_ne!(a, b);
    assert_eq!(a.schema_name(), b.schema_name());
}
