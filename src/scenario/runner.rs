//! Drives scenarios against one `RunContext`.
//!
//! Prerequisites are resolved up front from the registry, so a cycle or an
//! unknown name fails before any script runs. Each scenario completes at most
//! once per context; later requests for it are logged as skipped.

use std::time::Instant;

use rand::rngs::StdRng;
use serde::Serialize;

use crate::context::RunContext;
use crate::core::config::HarnessConfig;
use crate::core::errors::{HarnessError, Result};
use crate::executor::ScriptExecutor;
use crate::fixtures::seeded_rng;
use crate::logger::jsonl::{EventType, JsonlWriter, LogEntry, Severity};
use crate::scenario::builtin;
use crate::scenario::registry::ScenarioRegistry;
use crate::scenario::session::Session;
use crate::template::TemplateRegistry;
use crate::verify::VerificationReport;

/// Outcome of one scenario within a run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioRecord {
    pub name: String,
    /// Already completed earlier against the same context.
    pub skipped: bool,
    pub ok: bool,
    pub elapsed_ms: u64,
}

/// Everything a `run` call did, in execution order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub target: String,
    pub seed: u64,
    pub scenarios: Vec<ScenarioRecord>,
    pub verifications: Vec<VerificationReport>,
    pub elapsed_ms: u64,
}

impl RunSummary {
    /// Names of scenarios that actually ran (not skipped), in order.
    #[must_use]
    pub fn executed(&self) -> Vec<&str> {
        self.scenarios
            .iter()
            .filter(|r| !r.skipped)
            .map(|r| r.name.as_str())
            .collect()
    }
}

/// Mutable state borrowed for the duration of one `run` call.
pub(crate) struct ActiveRun<'r> {
    pub(crate) ctx: &'r mut RunContext,
    pub(crate) log: &'r mut JsonlWriter,
    pub(crate) rng: StdRng,
    pub(crate) summary: RunSummary,
}

/// Registry, templates and executor bundled with the effective config.
pub struct ScenarioRunner {
    registry: ScenarioRegistry,
    templates: TemplateRegistry,
    executor: ScriptExecutor,
    config: HarnessConfig,
}

impl ScenarioRunner {
    /// Runner with the built-in scenarios and templates loaded from
    /// `config.templates.dir`.
    pub fn new(config: HarnessConfig) -> Result<Self> {
        let templates =
            TemplateRegistry::from_dir(&config.templates.dir, &config.templates.extension)?;
        let mut registry = ScenarioRegistry::new();
        builtin::register_builtin(&mut registry)?;
        Ok(Self::with_parts(config, registry, templates))
    }

    /// Runner over an explicit registry and template set.
    #[must_use]
    pub fn with_parts(
        config: HarnessConfig,
        registry: ScenarioRegistry,
        templates: TemplateRegistry,
    ) -> Self {
        let executor = ScriptExecutor::new(&config.runtime, &config.templates.extension);
        Self {
            registry,
            templates,
            executor,
            config,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ScenarioRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ScenarioRegistry {
        &mut self.registry
    }

    #[must_use]
    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn templates_mut(&mut self) -> &mut TemplateRegistry {
        &mut self.templates
    }

    #[must_use]
    pub fn executor(&self) -> &ScriptExecutor {
        &self.executor
    }

    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run `name` and its prerequisites against `ctx`, failing fast.
    ///
    /// The fixture seed comes from the context (resumed run), then the
    /// config, then the OS; it is stored back into the context and logged.
    pub fn run(
        &self,
        name: &str,
        ctx: &mut RunContext,
        log: &mut JsonlWriter,
    ) -> Result<RunSummary> {
        let started = Instant::now();
        let seed = ctx
            .seed()
            .or(self.config.run.seed)
            .unwrap_or_else(rand::random);
        ctx.set_seed(seed);
        if ctx.accounts().is_err() && !self.config.run.accounts.is_empty() {
            ctx.set_accounts(self.config.run.accounts.clone());
        }

        let mut entry = LogEntry::new(EventType::RunStart, Severity::Info).scenario(name);
        entry.seed = Some(seed);
        log.write_entry(&entry);

        let mut run = ActiveRun {
            ctx,
            log,
            rng: seeded_rng(seed),
            summary: RunSummary {
                target: name.to_string(),
                seed,
                ..RunSummary::default()
            },
        };
        let outcome = self.run_in(name, &mut run);

        let elapsed_ms = millis(started);
        let mut entry = LogEntry::new(EventType::RunComplete, Severity::Info).scenario(name);
        entry.duration_ms = Some(elapsed_ms);
        entry.seed = Some(seed);
        let entry = match &outcome {
            Ok(()) => {
                entry.ok = Some(true);
                entry
            }
            Err(err) => {
                entry.severity = Severity::Critical;
                entry.error(err)
            }
        };
        run.log.write_entry(&entry);
        run.log.flush();

        outcome?;
        let mut summary = run.summary;
        summary.elapsed_ms = elapsed_ms;
        Ok(summary)
    }

    /// Resolve and run `name` within an existing run. Entered both from
    /// [`run`](Self::run) and from scenario bodies via `Session::run_scenario`.
    pub(crate) fn run_in(&self, name: &str, run: &mut ActiveRun<'_>) -> Result<()> {
        let plan = self.registry.plan(name)?;

        let active = run.ctx.ledger().active();
        if let Some(step) = plan.iter().find(|step| active.contains(step)) {
            let start = active.iter().position(|n| n == step).unwrap_or(0);
            let mut cycle = active[start..].to_vec();
            cycle.push(step.clone());
            return Err(HarnessError::DependencyCycle { cycle });
        }

        for step in &plan {
            if run.ctx.ledger().is_completed(step) {
                run.log.write_entry(
                    &LogEntry::new(EventType::ScenarioSkipped, Severity::Info)
                        .scenario(step)
                        .details("already completed against this context"),
                );
                run.summary.scenarios.push(ScenarioRecord {
                    name: step.clone(),
                    skipped: true,
                    ok: true,
                    elapsed_ms: 0,
                });
                continue;
            }
            self.run_one(step, run)?;
        }
        Ok(())
    }

    fn run_one(&self, name: &str, run: &mut ActiveRun<'_>) -> Result<()> {
        let scenario = self.registry.get(name)?;
        run.log
            .write_entry(&LogEntry::new(EventType::ScenarioStart, Severity::Info).scenario(name));
        run.ctx.ledger_mut().enter(name);
        let started = Instant::now();

        let outcome = {
            let mut session = Session::new(self, name, run);
            scenario.run(&mut session)
        };

        let elapsed_ms = millis(started);
        run.ctx.ledger_mut().leave(name, outcome.is_ok());
        let entry = match &outcome {
            Ok(()) => {
                let mut entry = LogEntry::new(EventType::ScenarioComplete, Severity::Info);
                entry.ok = Some(true);
                entry
            }
            Err(err) => LogEntry::new(EventType::ScenarioFailed, Severity::Critical).error(err),
        };
        let mut entry = entry.scenario(name);
        entry.duration_ms = Some(elapsed_ms);
        run.log.write_entry(&entry);

        run.summary.scenarios.push(ScenarioRecord {
            name: name.to_string(),
            skipped: false,
            ok: outcome.is_ok(),
            elapsed_ms,
        });
        outcome
    }
}

fn millis(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
