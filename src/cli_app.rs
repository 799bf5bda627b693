//! Top-level CLI definition and dispatch.

use std::collections::HashSet;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Map, Value, json};
use thiserror::Error;

use contract_scenario_harness::context::RunContext;
use contract_scenario_harness::core::config::HarnessConfig;
use contract_scenario_harness::core::errors::HarnessError;
use contract_scenario_harness::logger::jsonl::{JsonlConfig, JsonlWriter};
use contract_scenario_harness::scenario::{RunSummary, ScenarioRunner};
use contract_scenario_harness::template::{BindingValue, Bindings, TemplateRegistry};
use contract_scenario_harness::verify::{VerificationReport, verify};

/// Contract Scenario Harness: end-to-end scenarios against a deployed
/// fundraising contract.
#[derive(Debug, Parser)]
#[command(
    name = "csh",
    author,
    version,
    about = "Contract Scenario Harness - end-to-end contract test runner",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity (mirrors child output to stderr).
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run a scenario and its prerequisites.
    Run(RunArgs),
    /// List registered scenarios and available templates.
    List,
    /// Show the resolved execution order for a scenario.
    Plan(PlanArgs),
    /// Render a template to stdout.
    Render(RenderArgs),
    /// Compare an observed JSON state against an expectation.
    Verify(VerifyArgs),
    /// View configuration state.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    /// Scenario to run.
    scenario: String,
    /// Fixture seed (overrides config and any resumed state).
    #[arg(long, value_name = "N")]
    seed: Option<u64>,
    /// Resume from a saved run state (reuses its deployed contract).
    #[arg(long, value_name = "STATE")]
    resume: Option<PathBuf>,
    /// Where to save the run state. Defaults to `paths.state_file`.
    #[arg(long, value_name = "PATH", conflicts_with = "no_save")]
    state: Option<PathBuf>,
    /// Do not save the run state.
    #[arg(long)]
    no_save: bool,
    /// Per-execution timeout in seconds.
    #[arg(long, value_name = "SECONDS")]
    timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Args)]
struct PlanArgs {
    /// Scenario to resolve.
    scenario: String,
}

#[derive(Debug, Clone, Args)]
struct RenderArgs {
    /// Template name (file stem under `templates.dir`).
    template: String,
    /// Placeholder binding, repeatable.
    #[arg(long = "bind", value_name = "KEY=VALUE", value_parser = parse_binding)]
    bindings: Vec<(String, String)>,
}

#[derive(Debug, Clone, Args)]
struct VerifyArgs {
    /// JSON object with the observed state.
    #[arg(long, value_name = "FILE")]
    actual: PathBuf,
    /// JSON object with the expected fields.
    #[arg(long, value_name = "FILE")]
    expected: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the config file path.
    Path,
    /// Print the effective configuration.
    Show,
    /// Validate the configuration.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input: arguments, config, scenario or template names.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure, including failed script executions.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// The run completed but an expectation did not hold.
    #[error("{0}")]
    Verification(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
            Self::Verification(_) => 4,
        }
    }
}

impl From<HarnessError> for CliError {
    fn from(err: HarnessError) -> Self {
        let message = err.to_string();
        match err {
            HarnessError::VerificationFailed { .. } => Self::Verification(message),
            HarnessError::InvalidConfig { .. }
            | HarnessError::MissingConfig { .. }
            | HarnessError::ConfigParse { .. }
            | HarnessError::DuplicateScenario { .. }
            | HarnessError::DependencyCycle { .. }
            | HarnessError::UnknownScenario { .. }
            | HarnessError::InvalidFixtureRequest { .. }
            | HarnessError::TemplateNotFound { .. }
            | HarnessError::UnboundPlaceholder { .. }
            | HarnessError::UnusedBinding { .. }
            | HarnessError::ScriptNotPrepared { .. } => Self::User(message),
            HarnessError::MissingContextField { .. }
            | HarnessError::SpawnFailed { .. }
            | HarnessError::ExecutionFailed { .. }
            | HarnessError::ExecutionTimeout { .. }
            | HarnessError::Io { .. } => Self::Runtime(message),
            HarnessError::Serialization { .. } => Self::Internal(message),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Run(args) => run_scenario(cli, args),
        Command::List => run_list(cli),
        Command::Plan(args) => run_plan(cli, args),
        Command::Render(args) => run_render(cli, args),
        Command::Verify(args) => run_verify(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<HarnessConfig, CliError> {
    Ok(HarnessConfig::load(cli.config.as_deref())?)
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

fn run_scenario(cli: &Cli, args: &RunArgs) -> Result<(), CliError> {
    let mut config = load_config(cli)?;
    if let Some(timeout) = args.timeout_secs {
        if timeout == 0 {
            return Err(CliError::User("--timeout-secs must be > 0".to_string()));
        }
        config.runtime.timeout_secs = timeout;
    }
    if cli.verbose {
        config.runtime.echo_output = true;
    }

    let mut ctx = match &args.resume {
        Some(path) => RunContext::load(path)?,
        None => RunContext::new(),
    };
    if let Some(seed) = args.seed {
        ctx.set_seed(seed);
    }
    let state_path = args
        .state
        .clone()
        .unwrap_or_else(|| config.paths.state_file.clone());

    let mut log = JsonlWriter::open(JsonlConfig::from_paths(&config.paths));
    let runner = ScenarioRunner::new(config)?;
    let outcome = runner.run(&args.scenario, &mut ctx, &mut log);

    // Saved on failure too, for diagnosis or a later --resume. A failed save
    // must not mask the run's own error.
    let saved = if args.no_save {
        None
    } else {
        match ctx.save(&state_path) {
            Ok(()) => Some(state_path),
            Err(save_err) if outcome.is_err() => {
                eprintln!("[CSH-STATE] WARNING: run state not saved: {save_err}");
                None
            }
            Err(save_err) => return Err(save_err.into()),
        }
    };

    let mode = output_mode(cli);
    match outcome {
        Ok(summary) => {
            match mode {
                OutputMode::Human if !cli.quiet => print_summary(&summary, saved.as_deref()),
                OutputMode::Human => {}
                OutputMode::Json => {
                    let payload = json!({
                        "command": "run",
                        "ok": true,
                        "summary": summary,
                        "state_file": saved.as_ref().map(|p| p.to_string_lossy()),
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Err(err) => {
            if mode == OutputMode::Json {
                let payload = json!({
                    "command": "run",
                    "ok": false,
                    "scenario": args.scenario,
                    "error_code": err.code(),
                    "error": err.to_string(),
                    "state_file": saved.as_ref().map(|p| p.to_string_lossy()),
                });
                write_json_line(&payload)?;
            }
            Err(err.into())
        }
    }
}

fn print_summary(summary: &RunSummary, state_file: Option<&Path>) {
    println!(
        "{} {} (seed {}, {} ms)",
        "PASS".green().bold(),
        summary.target,
        summary.seed,
        summary.elapsed_ms
    );
    for record in &summary.scenarios {
        if record.skipped {
            println!("  {} {} (already completed)", "-".dimmed(), record.name);
        } else {
            println!("  {} {} ({} ms)", "+".green(), record.name, record.elapsed_ms);
        }
    }
    for report in &summary.verifications {
        println!(
            "  verified {}: {} field(s)",
            report.label, report.checked
        );
    }
    if let Some(path) = state_file {
        println!("  state: {}", path.display());
    }
}

// ---------------------------------------------------------------------------
// list / plan
// ---------------------------------------------------------------------------

fn run_list(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let runner = ScenarioRunner::new(config)?;
    let registry = runner.registry();

    match output_mode(cli) {
        OutputMode::Human => {
            println!("Scenarios:");
            for (name, scenario) in registry.entries() {
                let prerequisites = scenario.prerequisites();
                let requires = if prerequisites.is_empty() {
                    String::new()
                } else {
                    format!(" (requires {})", prerequisites.join(", "))
                };
                println!("  {}{requires}  {}", name.bold(), scenario.description());
            }
            println!("Templates:");
            for name in runner.templates().names() {
                println!("  {name}");
            }
        }
        OutputMode::Json => {
            let scenarios: Vec<Value> = registry
                .entries()
                .map(|(name, scenario)| {
                    json!({
                        "name": name,
                        "prerequisites": scenario.prerequisites(),
                        "description": scenario.description(),
                    })
                })
                .collect();
            let templates: Vec<&str> = runner.templates().names().collect();
            let payload = json!({
                "command": "list",
                "scenarios": scenarios,
                "templates": templates,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_plan(cli: &Cli, args: &PlanArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let runner = ScenarioRunner::new(config)?;
    let plan = runner.registry().plan(&args.scenario)?;

    match output_mode(cli) {
        OutputMode::Human => {
            for (idx, step) in plan.iter().enumerate() {
                println!("{}. {step}", idx + 1);
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "plan",
                "scenario": args.scenario,
                "order": plan,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// render / verify
// ---------------------------------------------------------------------------

fn parse_binding(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in binding {raw:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn collect_bindings(pairs: &[(String, String)]) -> Result<Bindings, CliError> {
    let mut seen = HashSet::new();
    let mut bindings = Bindings::new();
    for (key, value) in pairs {
        if !seen.insert(key.as_str()) {
            return Err(CliError::User(format!("binding {key:?} given more than once")));
        }
        bindings.insert(key.clone(), BindingValue::parse_cli(value));
    }
    Ok(bindings)
}

fn run_render(cli: &Cli, args: &RenderArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let templates =
        TemplateRegistry::from_dir(&config.templates.dir, &config.templates.extension)?;
    let bindings = collect_bindings(&args.bindings)?;
    let text = templates.render(&args.template, &bindings)?;

    match output_mode(cli) {
        OutputMode::Human => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(text.as_bytes())?;
            stdout.flush()?;
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "render",
                "template": args.template,
                "text": text,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn read_json_object(path: &Path) -> Result<Map<String, Value>, CliError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| CliError::User(format!("read {}: {e}", path.display())))?;
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(CliError::User(format!(
            "{} must contain a JSON object",
            path.display()
        ))),
        Err(e) => Err(CliError::User(format!("parse {}: {e}", path.display()))),
    }
}

fn run_verify(cli: &Cli, args: &VerifyArgs) -> Result<(), CliError> {
    let actual = read_json_object(&args.actual)?;
    let expected = read_json_object(&args.expected)?;
    let report = verify(&actual, &expected).with_label(args.actual.display().to_string());

    match output_mode(cli) {
        OutputMode::Human => print_report(&report, cli.quiet),
        OutputMode::Json => {
            let payload = json!({
                "command": "verify",
                "passed": report.passed(),
                "report": report,
            });
            write_json_line(&payload)?;
        }
    }

    if report.passed() {
        Ok(())
    } else {
        Err(CliError::Verification(format!(
            "{} field(s) mismatched: {}",
            report.mismatches.len(),
            report.failed_fields().join(", ")
        )))
    }
}

fn print_report(report: &VerificationReport, quiet: bool) {
    if report.passed() {
        if !quiet {
            println!(
                "{} {} field(s) matched",
                "PASS".green().bold(),
                report.checked
            );
        }
    } else {
        println!("{} {report}", "FAIL".red().bold());
    }
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli
                .config
                .clone()
                .unwrap_or_else(HarnessConfig::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = load_config(cli)?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Internal(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let value = serde_json::to_value(&config)?;
                    let payload = json!({
                        "command": "config show",
                        "config": value,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match HarnessConfig::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("Configuration is INVALID: {e}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ---------------------------------------------------------------------------
// output helpers
// ---------------------------------------------------------------------------

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("CSH_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        Some("auto") | None => fallback,
        Some(_) => fallback,
    }
}
