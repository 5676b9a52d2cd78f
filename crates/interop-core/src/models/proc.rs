//! Models describing a native program run: what went in, what came out,
//! and who produced it.

use crate::error::{FieldError, ValidationError};
use crate::executor::ExecutionResult;
use serde_json::{Map, Value};

fn default_delay() -> Option<f64> {
    Some(5.0)
}

fn default_provenance() -> Option<Provenance> {
    Some(Provenance::stamp(module_path!()))
}

fn check_delay(delay: Option<f64>) -> Option<FieldError> {
    delay
        .filter(|d| !(d.is_finite() && *d >= 0.0))
        .map(|d| FieldError::new("delay", format!("must be non-negative, got {}", d)))
}

crate::data_model! {
    /// Provenance information.
    pub struct Provenance {
        /// Program, library or person who created the object.
        pub creator: String,
        /// Version of the creator, blank otherwise.
        #[serde(default)]
        pub version: String,
        /// Routine within the creator, blank otherwise.
        #[serde(default)]
        pub routine: String,
    }
}

impl Provenance {
    /// Provenance of something produced by this crate.
    pub fn stamp(routine: &str) -> Self {
        Self::new(
            env!("CARGO_PKG_NAME").to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
            routine.to_string(),
        )
    }
}

crate::data_model! {
    /// Complete description of the error from an unsuccessful program run.
    pub struct ComputeError {
        /// Short classifier such as `input_error`.
        pub error_type: String,
        /// Text associated with the error, often a backtrace.
        pub error_message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub extras: Option<Map<String, Value>>,
    }
}

crate::data_model! {
    /// Record of a failed operation, with the input that caused it.
    pub struct FailedOperation {
        /// The complete input which, when run, made the operation fail.
        #[serde(default)]
        pub input_data: Option<Value>,
        /// Always false.
        #[serde(default)]
        pub success: bool,
        pub error: ComputeError,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub extras: Option<Map<String, Value>>,
    }
    nested = [error];
    check = check_failed_operation;
}

fn check_failed_operation(op: &FailedOperation) -> Result<(), ValidationError> {
    if op.success {
        return Err(ValidationError::field(
            "FailedOperation",
            "success",
            "a failed operation cannot be successful",
        ));
    }
    Ok(())
}

crate::data_model! {
    /// Input of a native program procedure.
    pub struct InputProc {
        #[serde(default)]
        pub id: Option<String>,
        /// Procedure specific keywords.
        #[serde(default)]
        pub keywords: Map<String, Value>,
        #[serde(default = "default_provenance")]
        pub provenance: Option<Provenance>,
        /// Seconds to wait for the filesystem read buffer.
        #[serde(default = "default_delay")]
        pub delay: Option<f64>,
        /// Engine used by the procedure.
        #[serde(default)]
        pub engine: Option<String>,
        /// Supported engine version, e.g. `>=3.4.0`.
        #[serde(default)]
        pub engine_version: Option<String>,
        #[serde(default)]
        pub extras: Map<String, Value>,
    }
    nested = [provenance];
    check = check_input_proc;
}

fn check_input_proc(proc: &InputProc) -> Result<(), ValidationError> {
    match check_delay(proc.delay) {
        Some(error) => Err(ValidationError::new("InputProc", vec![error])),
        None => Ok(()),
    }
}

impl Default for InputProc {
    fn default() -> Self {
        Self::new(
            None,
            Map::new(),
            default_provenance(),
            default_delay(),
            None,
            None,
            Map::new(),
        )
    }
}

crate::data_model! {
    /// Output of a native program procedure.
    pub struct OutputProc {
        #[serde(default)]
        pub proc_input: Option<InputProc>,
        #[serde(default)]
        pub stdout: Option<String>,
        #[serde(default)]
        pub stderr: Option<String>,
        #[serde(default)]
        pub warnings: Option<String>,
        /// Seconds to wait for the filesystem write buffer.
        #[serde(default = "default_delay")]
        pub delay: Option<f64>,
        #[serde(default)]
        pub log: Option<String>,
        /// Whether the program succeeded. Other fields may be blank if not.
        pub success: bool,
        #[serde(default)]
        pub error: Option<ComputeError>,
        #[serde(default = "default_provenance")]
        pub provenance: Option<Provenance>,
        /// Collected output files, keyed by name.
        #[serde(default)]
        pub extras: Map<String, Value>,
    }
    nested = [proc_input, error, provenance];
    check = check_output_proc;
}

fn check_output_proc(proc: &OutputProc) -> Result<(), ValidationError> {
    match check_delay(proc.delay) {
        Some(error) => Err(ValidationError::new("OutputProc", vec![error])),
        None => Ok(()),
    }
}

impl OutputProc {
    /// Builds the output of a program run from what an executor returned.
    ///
    /// Output files land in `extras["outfiles"]`. An unsuccessful run gets
    /// a `ComputeError` built from the executor's error, or from stderr.
    pub fn from_execution(
        success: bool,
        result: &ExecutionResult,
        proc_input: Option<InputProc>,
    ) -> Self {
        let error = (!success).then(|| {
            let message = result
                .error
                .clone()
                .or_else(|| result.stderr.clone())
                .unwrap_or_else(|| format!("exit code {:?}", result.return_code));
            ComputeError::new("execution_error".to_string(), message, None)
        });

        let mut extras = Map::new();
        if !result.outfiles.is_empty() {
            let outfiles = result
                .outfiles
                .iter()
                .map(|(name, content)| (name.clone(), Value::String(content.clone())))
                .collect();
            extras.insert("outfiles".to_string(), Value::Object(outfiles));
        }
        if let Some(dir) = &result.scratch_directory {
            extras.insert(
                "scratch_directory".to_string(),
                Value::String(dir.display().to_string()),
            );
        }

        Self::new(
            proc_input,
            result.stdout.clone(),
            result.stderr.clone(),
            None,
            default_delay(),
            None,
            success,
            error,
            default_provenance(),
            extras,
        )
    }
}
