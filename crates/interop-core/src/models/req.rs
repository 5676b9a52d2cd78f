//! Execution requirements: where a component runs and what it reserves.

use crate::error::{FieldError, ValidationError};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;

/// Retries granted to a crashed worker when `max_retries` is unset.
pub const DEFAULT_MAX_RETRIES: i32 = 4;

crate::data_model! {
    /// Sparse resource hints for remote submission.
    ///
    /// Only fields that were set are ever forwarded to a scheduler; see
    /// [`ResourceRequest::overrides`].
    pub struct ResourceRequest {
        /// Number of CPU cores to reserve.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub num_cpus: Option<u32>,
        /// Number of GPU devices to reserve.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub num_gpus: Option<u32>,
        /// Number of handles returned by a remote invocation.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub num_returns: Option<u32>,
        /// Heap memory to allocate, in bytes.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub memory: Option<f64>,
        /// Object store memory, in bytes.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub object_store_memory: Option<f64>,
        /// Quantities of custom named resources.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub resources: Option<HashMap<String, f64>>,
        /// Times an execute function may run before its worker must exit.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub max_calls: Option<u32>,
        /// Re-invocations after a worker crash; -1 retries forever.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub max_retries: Option<i32>,
        /// Runtime environment the component executes in.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub runtime_env: Option<HashMap<String, Value>>,
        /// Whether application errors are retried up to `max_retries` times.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub retry_exceptions: Option<bool>,
    }
    check = check_resource_request;
}

fn check_resource_request(req: &ResourceRequest) -> Result<(), ValidationError> {
    let mut errors = Vec::new();
    let positive = |value: f64| value.is_finite() && value > 0.0;

    if let Some(memory) = req.memory.filter(|m| !positive(*m)) {
        errors.push(FieldError::new("memory", format!("must be positive, got {}", memory)));
    }
    if let Some(memory) = req.object_store_memory.filter(|m| !positive(*m)) {
        errors.push(FieldError::new(
            "object_store_memory",
            format!("must be positive, got {}", memory),
        ));
    }
    if let Some(resources) = &req.resources {
        let mut bad: Vec<_> = resources.iter().filter(|(_, qty)| !positive(**qty)).collect();
        bad.sort_by(|a, b| a.0.cmp(b.0));
        for (name, qty) in bad {
            errors.push(FieldError::new(
                format!("resources.{}", name),
                format!("must be positive, got {}", qty),
            ));
        }
    }
    if req.max_calls == Some(0) {
        errors.push(FieldError::new("max_calls", "must be at least 1"));
    }
    if let Some(retries) = req.max_retries.filter(|r| *r < -1) {
        errors.push(FieldError::new(
            "max_retries",
            format!("must be -1 (unlimited) or non-negative, got {}", retries),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new("ResourceRequest", errors))
    }
}

impl Default for ResourceRequest {
    fn default() -> Self {
        Self::new(None, None, None, None, None, None, None, None, None, None)
    }
}

impl ResourceRequest {
    /// True when no field has been set.
    pub fn is_empty(&self) -> bool {
        self.overrides().is_empty()
    }

    /// The explicitly set fields only, without the schema header.
    pub fn overrides(&self) -> Map<String, Value> {
        let mut map = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        map.remove("schema_name");
        map.remove("schema_version");
        map
    }

    /// `max_retries`, falling back to [`DEFAULT_MAX_RETRIES`]. `None` means
    /// unlimited.
    pub fn effective_max_retries(&self) -> Option<u32> {
        match self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES) {
            -1 => None,
            n => Some(n.max(0) as u32),
        }
    }

    pub fn retries_exceptions(&self) -> bool {
        self.retry_exceptions.unwrap_or(false)
    }
}

crate::data_model! {
    /// Placement and resource needs of a single call.
    ///
    /// Always validated in full when present, nested request included.
    pub struct ExecReq {
        /// Runtime compute requirements.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub compute_req: Option<ResourceRequest>,
        /// Address of the cluster to connect to.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub address: Option<String>,
        /// Whether the implementation is thread safe.
        #[serde(default)]
        pub thread_safe: bool,
        /// Existing directory for scratch files.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub scratch_dir: Option<PathBuf>,
    }
    nested = [compute_req];
    check = check_exec_req;
}

fn check_exec_req(req: &ExecReq) -> Result<(), ValidationError> {
    match req.scratch_dir.as_ref().filter(|dir| !dir.is_dir()) {
        Some(dir) => Err(ValidationError::field(
            "ExecReq",
            "scratch_dir",
            format!("path `{}` is not an existing directory", dir.display()),
        )),
        None => Ok(()),
    }
}

impl Default for ExecReq {
    fn default() -> Self {
        Self::new(None, None, false, None)
    }
}

impl ExecReq {
    pub fn with_compute_req(compute_req: ResourceRequest) -> Self {
        Self {
            compute_req: Some(compute_req),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DataModel;
    use serde_json::json;

    #[test]
    fn test_sparse_overrides() {
        let req = ResourceRequest::model_validate(json!({ "num_cpus": 2 })).unwrap();
        let overrides = req.overrides();
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides["num_cpus"], 2);
        assert!(!overrides.contains_key("max_retries"));
        assert_eq!(req.effective_max_retries(), Some(4));
        assert!(ResourceRequest::default().is_empty());
    }

    #[test]
    fn test_resource_constraints() {
        let err = ResourceRequest::model_validate(json!({
            "memory": -1.0,
            "max_calls": 0,
            "max_retries": -2,
            "resources": { "tpu": 0.0 }
        }))
        .unwrap_err();
        assert!(err.has_field("memory"));
        assert!(err.has_field("max_calls"));
        assert!(err.has_field("max_retries"));
        assert!(err.has_field("resources.tpu"));

        let unlimited = ResourceRequest::model_validate(json!({ "max_retries": -1 })).unwrap();
        assert_eq!(unlimited.effective_max_retries(), None);
    }

    #[test]
    fn test_exec_req_nested_errors() {
        let err = ExecReq::model_validate(json!({ "compute_req": { "memory": 0.0 } })).unwrap_err();
        assert!(err.has_field("compute_req.memory"), "{}", err);

        let err = ExecReq::model_validate(json!({ "scratch_dir": "/definitely/not/here" })).unwrap_err();
        assert!(err.has_field("scratch_dir"));

        let err = ExecReq::model_validate(json!({
            "compute_req": { "max_retries": -7 },
            "scratch_dir": "/definitely/not/here"
        }))
        .unwrap_err();
        assert_eq!(err.model, "ExecReq");
        assert!(err.has_field("compute_req.max_retries"));
        assert!(err.has_field("scratch_dir"));

        let ok = ExecReq::model_validate(json!({
            "scratch_dir": std::env::temp_dir(),
            "address": "auto"
        }))
        .unwrap();
        assert!(!ok.thread_safe);
    }

    #[test]
    fn test_exec_req_rejects_unknown_fields() {
        let err = ExecReq::model_validate(json!({ "threads": 4 })).unwrap_err();
        assert!(err.has_field("threads"));
    }
}
