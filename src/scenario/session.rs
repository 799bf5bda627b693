//! The handle a scenario body works through.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use rand::rngs::StdRng;
use serde_json::{Map, Value};

use crate::context::RunContext;
use crate::core::config::HarnessConfig;
use crate::core::errors::{HarnessError, Result};
use crate::executor::ExecutionReport;
use crate::executor::script::sha256_hex;
use crate::logger::jsonl::{EventType, LogEntry, Severity};
use crate::scenario::runner::{ActiveRun, ScenarioRunner};
use crate::template::Bindings;

/// Access to the run context, fixtures, templates and executor for the
/// scenario currently running.
///
/// Rendered scripts are remembered per template for the lifetime of the
/// session; `execute` runs the most recent rendering.
pub struct Session<'s, 'r> {
    runner: &'s ScenarioRunner,
    run: &'s mut ActiveRun<'r>,
    scenario: String,
    rendered: BTreeMap<String, String>,
}

impl<'s, 'r> Session<'s, 'r> {
    pub(crate) fn new(
        runner: &'s ScenarioRunner,
        scenario: &str,
        run: &'s mut ActiveRun<'r>,
    ) -> Self {
        Self {
            runner,
            run,
            scenario: scenario.to_string(),
            rendered: BTreeMap::new(),
        }
    }

    /// Name of the scenario this session belongs to.
    #[must_use]
    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    #[must_use]
    pub fn context(&self) -> &RunContext {
        &*self.run.ctx
    }

    pub fn context_mut(&mut self) -> &mut RunContext {
        &mut *self.run.ctx
    }

    /// Seeded fixture randomness for this run.
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.run.rng
    }

    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        self.runner.config()
    }

    /// Default executor timeout.
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.runner.executor().default_timeout()
    }

    /// Run another scenario (and its prerequisites) against the same context.
    /// A no-op if it already completed.
    pub fn run_scenario(&mut self, name: &str) -> Result<()> {
        self.runner.run_in(name, self.run)
    }

    /// Render `template` with `bindings` and write it to
    /// `<scripts.output_dir>/<template>.<ext>` for inspection.
    ///
    /// Returns the written path. The rendered text is kept for `execute`.
    pub fn create_js_file(&mut self, template: &str, bindings: &Bindings) -> Result<PathBuf> {
        let text = self.runner.templates().render(template, bindings)?;

        let config = self.runner.config();
        let dir = &config.scripts.output_dir;
        fs::create_dir_all(dir).map_err(|source| HarnessError::io(dir, source))?;
        let path = dir.join(format!("{template}.{}", config.templates.extension));
        fs::write(&path, &text).map_err(|source| HarnessError::io(&path, source))?;

        let mut entry = LogEntry::new(EventType::ScriptRendered, Severity::Info)
            .scenario(&self.scenario)
            .template(template);
        entry.path = Some(path.display().to_string());
        entry.digest = Some(sha256_hex(text.as_bytes()));
        self.run.log.write_entry(&entry);

        self.rendered.insert(template.to_string(), text);
        Ok(path)
    }

    /// Execute the last rendering of `template` with the default timeout.
    pub fn execute(
        &mut self,
        template: &str,
        expected: &Map<String, Value>,
    ) -> Result<ExecutionReport> {
        let timeout = self.default_timeout();
        self.execute_within(template, expected, timeout)
    }

    /// Execute the last rendering of `template`, allowing `timeout`.
    ///
    /// The verification report is recorded in the run summary whether or not
    /// it passed; callers decide whether a mismatch fails the scenario.
    pub fn execute_within(
        &mut self,
        template: &str,
        expected: &Map<String, Value>,
        timeout: Duration,
    ) -> Result<ExecutionReport> {
        let text = self
            .rendered
            .get(template)
            .ok_or_else(|| HarnessError::ScriptNotPrepared {
                template: template.to_string(),
            })?;

        let outcome = self
            .runner
            .executor()
            .execute_within(text, expected, timeout);
        let mut report = match outcome {
            Ok(report) => report,
            Err(err) => {
                let mut entry = LogEntry::new(EventType::ExecutionFailed, Severity::Critical)
                    .scenario(&self.scenario)
                    .template(template)
                    .error(&err);
                if let HarnessError::ExecutionFailed { exit_code, .. } = &err {
                    entry.exit_code = *exit_code;
                }
                self.run.log.write_entry(&entry);
                return Err(err);
            }
        };
        report.verification.label = format!("{}/{template}", self.scenario);

        let passed = report.verification.passed();
        let mut entry = LogEntry::new(EventType::ExecutionComplete, Severity::Info)
            .scenario(&self.scenario)
            .template(template);
        entry.ok = Some(passed);
        entry.exit_code = report.result.exit_code;
        entry.duration_ms = Some(report.result.elapsed_ms);
        entry.digest = Some(report.result.script_digest.clone());
        self.run.log.write_entry(&entry);

        if !passed {
            let mut entry = LogEntry::new(EventType::VerificationFailed, Severity::Warning)
                .scenario(&self.scenario)
                .template(template)
                .details(report.verification.to_string());
            entry.ok = Some(false);
            entry.mismatches = Some(report.verification.failed_fields());
            self.run.log.write_entry(&entry);
        }

        self.run.summary.verifications.push(report.verification.clone());
        Ok(report)
    }

    /// Operator-facing warning, also logged.
    pub fn warn(&mut self, message: &str) {
        eprintln!("[CSH-SCENARIO:{}] WARNING: {message}", self.scenario);
        self.run.log.write_entry(
            &LogEntry::new(EventType::Warning, Severity::Warning)
                .scenario(&self.scenario)
                .details(message),
        );
    }

    /// Operator-facing progress note.
    pub fn notice(&self, message: &str) {
        eprintln!("[CSH-SCENARIO:{}] {message}", self.scenario);
    }
}
