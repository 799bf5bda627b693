//! Script executor: runs a rendered script under the external runtime and
//! verifies the final state it prints.
//!
//! The runtime is launched as `<program> <args...> <script-path>`. It reports
//! the observed final state by printing one JSON object on a line of its own;
//! the last such line on stdout wins. Any long wait (e.g. for a sale period to
//! close) happens inside the script; the executor only blocks on the child.

pub mod process;
pub mod script;

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::config::RuntimeConfig;
use crate::core::errors::{HarnessError, Result};
use crate::verify::{VerificationReport, verify};

pub use script::TransientScript;

/// What one `execute` call observed.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Last JSON object printed on stdout.
    pub final_state: Option<Map<String, Value>>,
    pub elapsed_ms: u64,
    /// SHA-256 of the executed script text.
    pub script_digest: String,
}

/// Execution result plus the verdict on its final state.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub result: ExecutionResult,
    pub verification: VerificationReport,
}

/// Launches scripts under the configured runtime.
#[derive(Debug, Clone)]
pub struct ScriptExecutor {
    program: String,
    args: Vec<String>,
    extension: String,
    scratch_dir: PathBuf,
    default_timeout: Duration,
    echo: bool,
}

impl ScriptExecutor {
    /// Executor for `runtime`, writing transient scripts with `extension`.
    #[must_use]
    pub fn new(runtime: &RuntimeConfig, extension: &str) -> Self {
        Self {
            program: runtime.program.clone(),
            args: runtime.args.clone(),
            extension: extension.to_string(),
            scratch_dir: runtime
                .scratch_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            default_timeout: Duration::from_secs(runtime.timeout_secs),
            echo: runtime.echo_output,
        }
    }

    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    #[must_use]
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Run `script_text` with the default timeout and verify against `expected`.
    pub fn execute(
        &self,
        script_text: &str,
        expected: &Map<String, Value>,
    ) -> Result<ExecutionReport> {
        self.execute_within(script_text, expected, self.default_timeout)
    }

    /// Run `script_text`, killing it after `timeout`, and verify against
    /// `expected`.
    ///
    /// Nonzero exit yields `ExecutionFailed` with the full captured output.
    /// A verification mismatch is not an error here; inspect the report.
    pub fn execute_within(
        &self,
        script_text: &str,
        expected: &Map<String, Value>,
        timeout: Duration,
    ) -> Result<ExecutionReport> {
        let script = TransientScript::create(&self.scratch_dir, &self.extension, script_text)?;

        let mut command = Command::new(&self.program);
        command.args(&self.args).arg(script.path());
        let captured = process::run_to_completion(command, &self.program, timeout, self.echo)?;
        let script_digest = script.digest().to_string();
        drop(script);

        if !captured.status.success() {
            return Err(HarnessError::ExecutionFailed {
                exit_code: captured.status.code(),
                stdout: captured.stdout,
                stderr: captured.stderr,
            });
        }

        let final_state = parse_final_state(&captured.stdout);
        let verification = verify(final_state.as_ref().unwrap_or(&Map::new()), expected);
        Ok(ExecutionReport {
            result: ExecutionResult {
                exit_code: captured.status.code(),
                stdout: captured.stdout,
                stderr: captured.stderr,
                final_state,
                elapsed_ms: u64::try_from(captured.elapsed.as_millis()).unwrap_or(u64::MAX),
                script_digest,
            },
            verification,
        })
    }
}

/// The last stdout line that parses as a JSON object.
#[must_use]
pub fn parse_final_state(stdout: &str) -> Option<Map<String, Value>> {
    stdout.lines().rev().find_map(|line| {
        let line = line.trim();
        if !line.starts_with('{') {
            return None;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    })
}
