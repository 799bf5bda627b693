//! CSH-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::verify::VerificationReport;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Top-level error type for the contract scenario harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("[CSH-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[CSH-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[CSH-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[CSH-2001] scenario '{name}' is already registered")]
    DuplicateScenario { name: String },

    #[error("[CSH-2002] dependency cycle between scenarios: {}", .cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    #[error("[CSH-2003] unknown scenario '{name}'{}", .required_by.as_ref().map(|by| format!(" (required by '{by}')")).unwrap_or_default())]
    UnknownScenario {
        name: String,
        required_by: Option<String>,
    },

    #[error("[CSH-2101] run context field '{field}' is not set")]
    MissingContextField { field: &'static str },

    #[error("[CSH-2201] invalid fixture request: {details}")]
    InvalidFixtureRequest { details: String },

    #[error("[CSH-3001] template '{name}' not found")]
    TemplateNotFound { name: String },

    #[error("[CSH-3002] template '{template}' references unbound placeholder '{placeholder}'")]
    UnboundPlaceholder {
        template: String,
        placeholder: String,
    },

    #[error("[CSH-3003] binding '{key}' is never referenced by template '{template}'")]
    UnusedBinding { template: String, key: String },

    #[error("[CSH-3004] no script rendered for template '{template}' in this scenario")]
    ScriptNotPrepared { template: String },

    #[error("[CSH-4001] failed to spawn runtime '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "[CSH-4002] script exited with {}\n----- stdout -----\n{stdout}\n----- stderr -----\n{stderr}",
        .exit_code.map_or_else(|| "signal".to_string(), |code| format!("status {code}"))
    )]
    ExecutionFailed {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error(
        "[CSH-4003] script did not finish within {timeout:?}; process group killed\n----- stdout -----\n{stdout}\n----- stderr -----\n{stderr}"
    )]
    ExecutionTimeout {
        timeout: Duration,
        stdout: String,
        stderr: String,
    },

    #[error("[CSH-5001] verification failed\n{report}")]
    VerificationFailed { report: Box<VerificationReport> },

    #[error("[CSH-6001] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[CSH-6002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl HarnessError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "CSH-1001",
            Self::MissingConfig { .. } => "CSH-1002",
            Self::ConfigParse { .. } => "CSH-1003",
            Self::DuplicateScenario { .. } => "CSH-2001",
            Self::DependencyCycle { .. } => "CSH-2002",
            Self::UnknownScenario { .. } => "CSH-2003",
            Self::MissingContextField { .. } => "CSH-2101",
            Self::InvalidFixtureRequest { .. } => "CSH-2201",
            Self::TemplateNotFound { .. } => "CSH-3001",
            Self::UnboundPlaceholder { .. } => "CSH-3002",
            Self::UnusedBinding { .. } => "CSH-3003",
            Self::ScriptNotPrepared { .. } => "CSH-3004",
            Self::SpawnFailed { .. } => "CSH-4001",
            Self::ExecutionFailed { .. } => "CSH-4002",
            Self::ExecutionTimeout { .. } => "CSH-4003",
            Self::VerificationFailed { .. } => "CSH-5001",
            Self::Serialization { .. } => "CSH-6001",
            Self::Io { .. } => "CSH-6002",
        }
    }

    /// Whether the failure came from the script or the contract under test
    /// rather than from the harness wiring itself.
    #[must_use]
    pub const fn is_test_failure(&self) -> bool {
        matches!(
            self,
            Self::ExecutionFailed { .. }
                | Self::ExecutionTimeout { .. }
                | Self::VerificationFailed { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for HarnessError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
