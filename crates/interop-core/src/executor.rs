//! Boundary to native program execution.
//!
//! Running external programs (scratch directories, file staging, timeouts)
//! lives outside this crate. Native-program components only see the
//! [`Executor`] contract and turn its result into an [`OutputProc`].

use crate::models::{InputProc, OutputProc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// What an executor reports about a finished (or killed) program.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub return_code: Option<i32>,
    /// Contents of the requested output files, keyed by file name.
    #[serde(default)]
    pub outfiles: HashMap<String, String>,
    pub scratch_directory: Option<PathBuf>,
    /// Executor-level failure, e.g. a timeout.
    pub error: Option<String>,
}

/// Blocking program runner.
pub trait Executor: Send + Sync {
    /// Runs `command` in a fresh scratch directory seeded with
    /// `input_files` (name to contents), collecting `output_files`.
    fn run(
        &self,
        command: &[String],
        input_files: &HashMap<String, String>,
        output_files: &[String],
        timeout: Option<Duration>,
    ) -> anyhow::Result<(bool, ExecutionResult)>;
}

/// Runs a program and wraps the result as an [`OutputProc`].
#[tracing::instrument(skip(executor, input_files, proc_input))]
pub fn run_proc(
    executor: &dyn Executor,
    command: &[String],
    input_files: &HashMap<String, String>,
    output_files: &[String],
    timeout: Option<Duration>,
    proc_input: Option<InputProc>,
) -> anyhow::Result<OutputProc> {
    let (success, result) = executor.run(command, input_files, output_files, timeout)?;
    if !success {
        tracing::warn!(return_code = ?result.return_code, "Program exited unsuccessfully");
    }
    Ok(OutputProc::from_execution(success, &result, proc_input))
}
