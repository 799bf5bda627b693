//! End-to-end runs of the built-in scenarios with `sh` standing in for the
//! script runtime.
#![cfg(unix)]

mod common;

use std::cell::Cell;
use std::fs;
use std::rc::Rc;

use contract_scenario_harness::prelude::*;
use contract_scenario_harness::scenario::builtin::register_builtin;

fn sh_config(dir: &std::path::Path) -> HarnessConfig {
    fs::write(dir.join("dao.abi.json"), "[]\n").unwrap();
    fs::write(dir.join("dao.bin"), "0x6000\n").unwrap();
    let mut config = HarnessConfig::default();
    config.runtime.program = "sh".into();
    config.runtime.timeout_secs = 20;
    config.runtime.scratch_dir = Some(dir.join("scratch"));
    config.templates.extension = "sh".into();
    config.scripts.output_dir = dir.join("scripts");
    config.contract.abi_path = dir.join("dao.abi.json");
    config.contract.bytecode_path = dir.join("dao.bin");
    config.contract.sale_duration_secs = 0;
    config.run.seed = Some(42);
    config
}

fn sh_runner(config: HarnessConfig, fund_template: &str) -> ScenarioRunner {
    let mut templates = TemplateRegistry::new();
    templates.register("deploy", common::DEPLOY_SH);
    templates.register("fund", fund_template);
    let mut registry = ScenarioRegistry::new();
    register_builtin(&mut registry).unwrap();
    ScenarioRunner::with_parts(config, registry, templates)
}

#[test]
fn fund_runs_deploy_first_and_verifies_balances() {
    let dir = tempfile::tempdir().unwrap();
    let runner = sh_runner(sh_config(dir.path()), common::FUND_SH);
    let mut ctx = RunContext::new();

    let summary = runner
        .run("fund", &mut ctx, &mut JsonlWriter::disabled())
        .unwrap();

    assert_eq!(summary.executed(), vec!["deploy", "fund"]);
    assert_eq!(summary.seed, 42);
    assert!(summary.verifications.iter().all(VerificationReport::passed));

    assert_eq!(ctx.dao_addr().unwrap(), "0xdao");
    assert_eq!(ctx.dao_abi().unwrap(), "[]");
    assert_eq!(ctx.accounts().unwrap(), ["0xa1", "0xa2", "0xa3"]);
    let total = ctx.total_supply().unwrap();
    assert!((21..=120).contains(&total), "total_supply {total}");
    let amounts = ctx.token_amounts().unwrap();
    assert_eq!(amounts.len(), 3);
    assert!(amounts.iter().all(|a| *a > 0));
    assert_eq!(amounts.iter().sum::<u64>(), total);
    assert!(matches!(
        ctx.deployment().unwrap(),
        DeploymentOutcome::Deployed { .. }
    ));

    // Rendered scripts stay on disk for inspection.
    let fund_script = fs::read_to_string(dir.path().join("scripts/fund.sh")).unwrap();
    assert!(fund_script.contains(&arr_str(amounts)));
    assert!(fund_script.contains("wait_ms=0"));
}

#[test]
fn same_seed_gives_same_fixtures() {
    let dir = tempfile::tempdir().unwrap();
    let runner = sh_runner(sh_config(dir.path()), common::FUND_SH);
    let mut first = RunContext::new();
    let mut second = RunContext::new();
    runner
        .run("fund", &mut first, &mut JsonlWriter::disabled())
        .unwrap();
    runner
        .run("fund", &mut second, &mut JsonlWriter::disabled())
        .unwrap();
    assert_eq!(first.total_supply().unwrap(), second.total_supply().unwrap());
    assert_eq!(first.token_amounts().unwrap(), second.token_amounts().unwrap());
}

#[test]
fn shared_deploy_prerequisite_runs_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut runner = sh_runner(sh_config(dir.path()), common::FUND_SH);
    let audits = Rc::new(Cell::new(0));
    let counter = Rc::clone(&audits);
    runner
        .registry_mut()
        .register(
            "audit",
            from_fn(&["deploy"], move |s| {
                counter.set(counter.get() + 1);
                s.context().dao_addr().map(|_| ())
            }),
        )
        .unwrap();
    runner
        .registry_mut()
        .register("full", from_fn(&["fund", "audit"], |_s| Ok(())))
        .unwrap();

    let mut ctx = RunContext::new();
    let summary = runner
        .run("full", &mut ctx, &mut JsonlWriter::disabled())
        .unwrap();
    assert_eq!(summary.executed(), vec!["deploy", "fund", "audit", "full"]);
    assert_eq!(audits.get(), 1);

    let again = runner
        .run("audit", &mut ctx, &mut JsonlWriter::disabled())
        .unwrap();
    assert!(again.executed().is_empty());
    assert_eq!(audits.get(), 1);
}

#[test]
fn underfunded_sale_fails_with_verification_error() {
    let dir = tempfile::tempdir().unwrap();
    let runner = sh_runner(sh_config(dir.path()), common::FUND_UNDERFUNDED_SH);
    let mut ctx = RunContext::new();
    let err = runner
        .run("fund", &mut ctx, &mut JsonlWriter::disabled())
        .unwrap_err();
    match err {
        HarnessError::VerificationFailed { report } => {
            assert_eq!(report.label, "fund/fund");
            assert_eq!(
                report.failed_fields(),
                vec!["balances", "dao_funded", "total_supply", "user0_after"]
            );
        }
        other => panic!("expected verification failure, got {other}"),
    }
    // Deployment completed and stays recorded.
    assert_eq!(ctx.dao_addr().unwrap(), "0xdao");
    assert!(ctx.ledger().is_completed("deploy"));
    assert!(!ctx.ledger().is_completed("fund"));
}

#[test]
fn failing_deploy_script_surfaces_output() {
    let dir = tempfile::tempdir().unwrap();
    let mut templates = TemplateRegistry::new();
    templates.register(
        "deploy",
        ": '{{ dao_abi }}' '{{ dao_bytecode }}' {{ closing_time }} {{ min_value }}\n\
         echo 'out of gas' >&2\nexit 1\n",
    );
    templates.register("fund", common::FUND_SH);
    let mut registry = ScenarioRegistry::new();
    register_builtin(&mut registry).unwrap();
    let runner = ScenarioRunner::with_parts(sh_config(dir.path()), registry, templates);

    let mut ctx = RunContext::new();
    let err = runner
        .run("fund", &mut ctx, &mut JsonlWriter::disabled())
        .unwrap_err();
    assert_eq!(err.code(), "CSH-4002");
    assert!(err.to_string().contains("out of gas"));
    assert!(ctx.contract().is_none());
    assert!(ctx.token_amounts().is_err());
}

#[test]
fn maximum_timeout_does_not_overflow_funding_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = sh_config(dir.path());
    config.runtime.timeout_secs = u64::MAX;
    let runner = sh_runner(config, common::FUND_SH);
    let mut ctx = RunContext::new();
    let summary = runner
        .run("fund", &mut ctx, &mut JsonlWriter::disabled())
        .unwrap();
    assert_eq!(summary.executed(), vec!["deploy", "fund"]);
}

#[test]
fn resumed_context_reuses_deployment() {
    let dir = tempfile::tempdir().unwrap();
    let runner = sh_runner(sh_config(dir.path()), common::FUND_SH);
    let state = dir.path().join("state.json");

    let mut ctx = RunContext::new();
    runner
        .run("deploy", &mut ctx, &mut JsonlWriter::disabled())
        .unwrap();
    ctx.save(&state).unwrap();

    let mut resumed = RunContext::load(&state).unwrap();
    let summary = runner
        .run("fund", &mut resumed, &mut JsonlWriter::disabled())
        .unwrap();
    assert_eq!(summary.executed(), vec!["deploy", "fund"]);
    match resumed.deployment().unwrap() {
        DeploymentOutcome::AlreadyDeployed { address, .. } => assert_eq!(address, "0xdao"),
        other => panic!("expected reuse, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[test]
fn cli_run_fund_saves_state_and_logs() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::write_workspace(dir.path(), common::FUND_SH);
    let activity = dir.path().join("activity.jsonl");
    let result = common::run_cli_case_with_env(
        "cli_run_fund_saves_state_and_logs",
        &["--config", config.to_str().unwrap(), "--json", "run", "fund"],
        &[("CSH_PATHS_JSONL_LOG", activity.to_str().unwrap())],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());

    let payload = result.json();
    assert_eq!(payload["ok"], true);
    assert_eq!(payload["summary"]["seed"], 42);

    let saved = RunContext::load(&dir.path().join("state.json")).unwrap();
    assert_eq!(saved.dao_addr().unwrap(), "0xdao");
    assert_eq!(saved.seed(), Some(42));

    let events: Vec<String> = fs::read_to_string(&activity)
        .unwrap()
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            value["event"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(events.first().map(String::as_str), Some("run_start"));
    assert_eq!(events.last().map(String::as_str), Some("run_complete"));
    assert_eq!(
        events.iter().filter(|e| *e == "execution_complete").count(),
        2
    );
}

#[test]
fn cli_run_resume_warns_about_predeployed_contract() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::write_workspace(dir.path(), common::FUND_SH);
    let config = config.to_str().unwrap();
    let state = dir.path().join("state.json");

    let deploy = common::run_cli_case("cli_run_resume_deploy", &["--config", config, "run", "deploy"]);
    assert!(deploy.status.success(), "log: {}", deploy.log_path.display());

    let fund = common::run_cli_case(
        "cli_run_resume_fund",
        &[
            "--config",
            config,
            "run",
            "fund",
            "--resume",
            state.to_str().unwrap(),
            "--no-save",
        ],
    );
    assert!(fund.status.success(), "log: {}", fund.log_path.display());
    assert!(fund.stderr.contains("pre-deployed contract"));
    assert!(fund.stdout.contains("PASS"));
}

#[test]
fn cli_run_mismatch_exits_with_verification_code() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::write_workspace(dir.path(), common::FUND_UNDERFUNDED_SH);
    let result = common::run_cli_case(
        "cli_run_mismatch_exits_with_verification_code",
        &["--config", config.to_str().unwrap(), "run", "fund"],
    );
    assert_eq!(result.code(), Some(4), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("CSH-5001"));
    assert!(result.stderr.contains("dao_funded"));
    // State is saved for diagnosis even though the run failed.
    let saved = RunContext::load(&dir.path().join("state.json")).unwrap();
    assert_eq!(saved.dao_addr().unwrap(), "0xdao");
}

#[test]
fn cli_run_failure_survives_unwritable_state_path() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::write_workspace(dir.path(), common::FUND_REVERTS_SH);
    // A regular file as parent directory cannot be written through, even as root.
    let state = dir.path().join("dao.bin").join("state.json");
    let result = common::run_cli_case(
        "cli_run_failure_survives_unwritable_state_path",
        &[
            "--config",
            config.to_str().unwrap(),
            "run",
            "fund",
            "--state",
            state.to_str().unwrap(),
        ],
    );
    assert_eq!(result.code(), Some(2), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("CSH-4002"));
    assert!(result.stderr.contains("revert: sale closed"));
    assert!(result.stderr.contains("[CSH-STATE] WARNING"));
    assert!(!state.exists());
}

#[test]
fn cli_run_unknown_scenario_is_user_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::write_workspace(dir.path(), common::FUND_SH);
    let result = common::run_cli_case(
        "cli_run_unknown_scenario_is_user_error",
        &["--config", config.to_str().unwrap(), "run", "vote", "--no-save"],
    );
    assert_eq!(result.code(), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("CSH-2003"));
}
