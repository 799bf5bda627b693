//! JSONL activity log for harness runs.
//!
//! Entries are serialized to one line each and appended with a single
//! `write_all`, so readers tailing the file only ever see whole lines.
//! Output goes to the first log file that can be opened (the configured
//! path, then the optional fallback). When neither is writable, lines are
//! mirrored to stderr under `[CSH-JSONL]`. Logging never fails a run.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{HarnessError, Result};

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Event types emitted over the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStart,
    RunComplete,
    ScenarioStart,
    ScenarioComplete,
    ScenarioSkipped,
    ScenarioFailed,
    ScriptRendered,
    ExecutionComplete,
    ExecutionFailed,
    VerificationFailed,
    Warning,
}

/// A single JSONL log entry. Only `ts`, `event` and `severity` are always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Script or state file involved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    /// Child process exit code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// CSH error code if the action failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Names of fields that failed verification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mismatches: Option<Vec<String>>,
    /// Fixture seed for the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// SHA-256 of the executed script.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: utc_stamp(),
            event,
            severity,
            scenario: None,
            template: None,
            path: None,
            duration_ms: None,
            ok: None,
            exit_code: None,
            error_code: None,
            error_message: None,
            mismatches: None,
            seed: None,
            digest: None,
            details: None,
        }
    }

    #[must_use]
    pub fn scenario(mut self, name: &str) -> Self {
        self.scenario = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn template(mut self, name: &str) -> Self {
        self.template = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Attach the code and message of a failure.
    #[must_use]
    pub fn error(mut self, err: &HarnessError) -> Self {
        self.ok = Some(false);
        self.error_code = Some(err.code().to_string());
        self.error_message = Some(err.to_string());
        self
    }
}

/// Configuration for the JSONL writer.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    /// Size at which the active file is rotated. Default: 16 MiB.
    pub max_size_bytes: u64,
    /// Rotated generations kept beside the active file. Default: 3.
    pub max_rotated_files: u32,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("csh-activity.jsonl"),
            fallback_path: None,
            max_size_bytes: 16 * 1024 * 1024,
            max_rotated_files: 3,
        }
    }
}

impl JsonlConfig {
    /// Writer settings for the paths in the harness config.
    #[must_use]
    pub fn from_paths(paths: &crate::core::config::PathsConfig) -> Self {
        Self {
            path: paths.jsonl_log.clone(),
            fallback_path: paths.jsonl_fallback.clone(),
            ..Self::default()
        }
    }

    /// Log files to try, most preferred first.
    fn candidates(&self) -> Vec<PathBuf> {
        std::iter::once(self.path.clone())
            .chain(self.fallback_path.clone())
            .collect()
    }
}

/// Where entries currently go.
enum Sink {
    File {
        out: BufWriter<File>,
        path: PathBuf,
        size: u64,
    },
    Stderr,
    Discard,
}

/// Append-only JSONL writer.
pub struct JsonlWriter {
    config: JsonlConfig,
    sink: Sink,
    /// Index into `config.candidates()` of the next file to try.
    next_candidate: usize,
}

impl JsonlWriter {
    /// Open the first writable log file, or fall back to stderr.
    pub fn open(config: JsonlConfig) -> Self {
        let mut w = Self {
            config,
            sink: Sink::Discard,
            next_candidate: 0,
        };
        w.advance();
        w
    }

    /// A writer that drops every entry.
    pub fn disabled() -> Self {
        Self {
            config: JsonlConfig::default(),
            sink: Sink::Discard,
            next_candidate: usize::MAX,
        }
    }

    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(json) => self.append(&format!("{json}\n")),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[CSH-JSONL] serialize error: {e}");
            }
        }
    }

    pub fn flush(&mut self) {
        if let Sink::File { out, .. } = &mut self.sink {
            let _ = out.flush();
        }
    }

    /// `"normal"`, `"fallback"`, `"stderr"` or `"discard"`.
    pub fn state(&self) -> &'static str {
        match self.sink {
            Sink::File { .. } if self.next_candidate <= 1 => "normal",
            Sink::File { .. } => "fallback",
            Sink::Stderr => "stderr",
            Sink::Discard => "discard",
        }
    }

    fn append(&mut self, line: &str) {
        let len = line.len() as u64;
        if let Sink::File { size, .. } = &self.sink
            && *size > 0
            && size.saturating_add(len) > self.config.max_size_bytes
        {
            self.rotate();
        }

        while let Sink::File { out, size, .. } = &mut self.sink {
            if out.write_all(line.as_bytes()).is_ok() {
                *size += len;
                return;
            }
            self.advance();
        }
        if let Sink::Stderr = self.sink {
            let _ = write!(io::stderr(), "[CSH-JSONL] {line}");
        }
    }

    /// Move to the next log file that opens. Once the candidates run out,
    /// entries go to stderr.
    fn advance(&mut self) {
        let candidates = self.config.candidates();
        while let Some(path) = candidates.get(self.next_candidate) {
            self.next_candidate += 1;
            if let Ok((file, size)) = open_append(path) {
                if self.next_candidate > 1 {
                    let _ = writeln!(
                        io::stderr(),
                        "[CSH-JSONL] activity log unavailable, writing to {}",
                        path.display()
                    );
                }
                self.sink = Sink::File {
                    out: BufWriter::new(file),
                    path: path.clone(),
                    size,
                };
                return;
            }
        }
        if self.next_candidate != usize::MAX && !matches!(self.sink, Sink::Stderr) {
            let _ = writeln!(io::stderr(), "[CSH-JSONL] no writable log file, using stderr");
            self.sink = Sink::Stderr;
        }
    }

    /// Shift `path.N` generations up by one and start `path` afresh.
    fn rotate(&mut self) {
        let Sink::File { out, path, .. } = &mut self.sink else {
            return;
        };
        let _ = out.flush();
        let path = path.clone();
        self.sink = Sink::Discard;

        for generation in (1..self.config.max_rotated_files).rev() {
            let _ = fs::rename(
                rotated_name(&path, generation),
                rotated_name(&path, generation + 1),
            );
        }
        let _ = fs::rename(&path, rotated_name(&path, 1));

        match open_append(&path) {
            Ok((file, size)) => {
                self.sink = Sink::File {
                    out: BufWriter::new(file),
                    path,
                    size,
                };
            }
            Err(_) => self.advance(),
        }
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        self.flush();
    }
}

fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| HarnessError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| HarnessError::io(path, source))?;
    let size = file.metadata().map_or(0, |m| m.len());
    Ok((file, size))
}

/// `run.jsonl` -> `run.jsonl.2`.
fn rotated_name(base: &Path, generation: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{generation}"));
    PathBuf::from(name)
}

fn utc_stamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
