#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

impl CmdResult {
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }

    /// stdout parsed as a single JSON document (`--json` output).
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(self.stdout.trim()).unwrap_or_else(|e| {
            panic!(
                "stdout is not JSON ({e}); log: {}\n{}",
                self.log_path.display(),
                self.stdout
            )
        })
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_csh") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "csh.exe" } else { "csh" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve csh binary path for integration test"),
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    run_cli_case_with_env(case_name, args, &[])
}

/// Run `csh` with extra environment variables. The JSONL activity log is
/// redirected next to the case log unless `envs` sets it.
pub fn run_cli_case_with_env(case_name: &str, args: &[&str], envs: &[(&str, &str)]) -> CmdResult {
    let root = std::env::temp_dir().join("csh-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let stem = format!("{}-{}", sanitize(case_name), now_millis());
    let log_path = root.join(format!("{stem}.log"));
    let activity_path = root.join(format!("{stem}.jsonl"));
    let bin_path = resolve_bin_path();

    let mut command = Command::new(&bin_path);
    command
        .args(args)
        .env("CSH_PATHS_JSONL_LOG", &activity_path)
        .env("CSH_OUTPUT_FORMAT", "human")
        .env("RUST_BACKTRACE", "1");
    for (key, value) in envs {
        command.env(key, value);
    }
    let output = command.output().expect("execute csh command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// Shell stand-in for the deployment script: reports a fixed address.
pub const DEPLOY_SH: &str = r#"abi='{{ dao_abi }}'
: '{{ dao_bytecode }}'
echo "deploying: min value {{ min_value }}, closing at {{ closing_time }}"
echo '{"dao_deployed": true, "dao_address": "0xdao", "accounts": ["0xa1", "0xa2", "0xa3"]}'
"#;

/// Shell stand-in for the funding script: reports balances equal to the
/// requested amounts, so verification passes when the amounts are consistent.
pub const FUND_SH: &str = r#": '{{ dao_abi }}' '{{ dao_address }}'
amounts='{{ amounts }}'
wait_ms={{ wait_ms }}
total=0
first=
for a in $(printf '%s' "$amounts" | tr -d '[]' | tr ',' ' '); do
  total=$((total + a))
  if [ -z "$first" ]; then first=$a; fi
done
echo "waited $wait_ms ms"
printf '{"dao_funded": true, "total_supply": %s, "balances": %s, "user0_after": %s}\n' "$total" "$amounts" "$first"
"#;

/// Funding stand-in whose sale never reaches its minimum.
pub const FUND_UNDERFUNDED_SH: &str = r#": '{{ dao_abi }}' '{{ dao_address }}' '{{ wait_ms }}'
amounts='{{ amounts }}'
echo '{"dao_funded": false}'
"#;

/// Funding stand-in whose transaction reverts.
pub const FUND_REVERTS_SH: &str = r#": '{{ dao_abi }}' '{{ dao_address }}' '{{ wait_ms }}' '{{ amounts }}'
echo 'revert: sale closed' >&2
exit 3
"#;

/// Lay out a self-contained harness workspace under `dir` using `sh` as the
/// runtime, and return the config file path.
pub fn write_workspace(dir: &Path, fund_template: &str) -> PathBuf {
    let templates = dir.join("templates");
    fs::create_dir_all(&templates).expect("create templates dir");
    fs::write(templates.join("deploy.sh"), DEPLOY_SH).expect("write deploy template");
    fs::write(templates.join("fund.sh"), fund_template).expect("write fund template");
    fs::write(dir.join("dao.abi.json"), "[]\n").expect("write abi");
    fs::write(dir.join("dao.bin"), "0x6000\n").expect("write bytecode");

    let config = format!(
        r#"[runtime]
program = "sh"
timeout_secs = 20
scratch_dir = "{root}/scratch"

[templates]
dir = "{root}/templates"
extension = "sh"

[scripts]
output_dir = "{root}/scripts"

[contract]
abi_path = "{root}/dao.abi.json"
bytecode_path = "{root}/dao.bin"
sale_duration_secs = 0
min_value = 20

[fund]
safety_margin_secs = 3
supply_jitter_max = 100

[run]
seed = 42

[paths]
state_file = "{root}/state.json"
jsonl_log = "{root}/activity.jsonl"
"#,
        root = dir.display()
    );
    let path = dir.join("csh.toml");
    fs::write(&path, config).expect("write config");
    path
}
