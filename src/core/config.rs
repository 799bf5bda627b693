//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{HarnessError, Result};

/// Full harness configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct HarnessConfig {
    pub runtime: RuntimeConfig,
    pub templates: TemplatesConfig,
    pub scripts: ScriptsConfig,
    pub contract: ContractConfig,
    pub fund: FundConfig,
    pub run: RunConfig,
    pub paths: PathsConfig,
}

/// External script runtime invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Program launched for every script (`<program> <args...> <script>`).
    pub program: String,
    pub args: Vec<String>,
    /// Default deadline for one script; scenarios that wait out a sale
    /// period extend it by their own wait.
    pub timeout_secs: u64,
    /// Echo child stdout/stderr lines to our stderr while they stream.
    pub echo_output: bool,
    /// Directory for transient scripts (system temp dir when unset).
    pub scratch_dir: Option<PathBuf>,
}

/// Where script templates are looked up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TemplatesConfig {
    pub dir: PathBuf,
    /// File extension of template files (without the dot).
    pub extension: String,
}

/// Where rendered scripts are kept for inspection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScriptsConfig {
    pub output_dir: PathBuf,
}

/// Contract artifacts and sale parameters used by the deployment scenario.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContractConfig {
    pub abi_path: PathBuf,
    pub bytecode_path: PathBuf,
    pub sale_duration_secs: u64,
    /// Minimum total the sale must raise to count as funded.
    pub min_value: u64,
}

/// Knobs for the funding scenario.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FundConfig {
    /// Seconds subtracted from the remaining sale time before the script
    /// checks final balances.
    pub safety_margin_secs: u64,
    /// Total supply is `min_value + uniform(1..=supply_jitter_max)`.
    pub supply_jitter_max: u64,
}

/// Per-run inputs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct RunConfig {
    /// Fixed fixture seed; a fresh one is drawn and logged when unset.
    pub seed: Option<u64>,
    /// Account identifiers; when empty the deployment script supplies them.
    pub accounts: Vec<String>,
}

/// Filesystem paths used by csh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub state_file: PathBuf,
    pub jsonl_log: PathBuf,
    pub jsonl_fallback: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            program: "node".to_string(),
            args: Vec::new(),
            timeout_secs: 120,
            echo_output: false,
            scratch_dir: None,
        }
    }
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("templates"),
            extension: "js".to_string(),
        }
    }
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("scripts"),
        }
    }
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            abi_path: PathBuf::from("contracts/dao.abi.json"),
            bytecode_path: PathBuf::from("contracts/dao.bin"),
            sale_duration_secs: 35,
            min_value: 20,
        }
    }
}

impl Default for FundConfig {
    fn default() -> Self {
        Self {
            safety_margin_secs: 3,
            supply_jitter_max: 100,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[CSH-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir.join(".config").join("csh").join("config.toml");
        let data = home_dir.join(".local").join("share").join("csh");
        Self {
            config_file: cfg,
            state_file: data.join("run-state.json"),
            jsonl_log: data.join("activity.jsonl"),
            jsonl_fallback: Some(env::temp_dir().join("csh-activity.jsonl")),
        }
    }
}

impl HarnessConfig {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, env_var)
    }

    fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| HarnessError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(HarnessError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(lookup)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form so the value is stable across
    /// processes and toolchain releases.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // runtime
        if let Some(raw) = lookup("CSH_RUNTIME_PROGRAM") {
            self.runtime.program = raw;
        }
        if let Some(raw) = lookup("CSH_RUNTIME_ARGS") {
            self.runtime.args = raw.split_whitespace().map(str::to_string).collect();
        }
        if let Some(raw) = lookup("CSH_RUNTIME_TIMEOUT_SECS") {
            self.runtime.timeout_secs = parse_env_u64("CSH_RUNTIME_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = lookup("CSH_RUNTIME_ECHO_OUTPUT") {
            self.runtime.echo_output = parse_env_bool("CSH_RUNTIME_ECHO_OUTPUT", &raw)?;
        }
        if let Some(raw) = lookup("CSH_RUNTIME_SCRATCH_DIR") {
            self.runtime.scratch_dir = Some(PathBuf::from(raw));
        }

        // templates / scripts
        if let Some(raw) = lookup("CSH_TEMPLATES_DIR") {
            self.templates.dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("CSH_TEMPLATES_EXTENSION") {
            self.templates.extension = raw;
        }
        if let Some(raw) = lookup("CSH_SCRIPTS_OUTPUT_DIR") {
            self.scripts.output_dir = PathBuf::from(raw);
        }

        // contract
        if let Some(raw) = lookup("CSH_CONTRACT_ABI_PATH") {
            self.contract.abi_path = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("CSH_CONTRACT_BYTECODE_PATH") {
            self.contract.bytecode_path = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("CSH_CONTRACT_SALE_DURATION_SECS") {
            self.contract.sale_duration_secs =
                parse_env_u64("CSH_CONTRACT_SALE_DURATION_SECS", &raw)?;
        }
        if let Some(raw) = lookup("CSH_CONTRACT_MIN_VALUE") {
            self.contract.min_value = parse_env_u64("CSH_CONTRACT_MIN_VALUE", &raw)?;
        }

        // fund
        if let Some(raw) = lookup("CSH_FUND_SAFETY_MARGIN_SECS") {
            self.fund.safety_margin_secs = parse_env_u64("CSH_FUND_SAFETY_MARGIN_SECS", &raw)?;
        }
        if let Some(raw) = lookup("CSH_FUND_SUPPLY_JITTER_MAX") {
            self.fund.supply_jitter_max = parse_env_u64("CSH_FUND_SUPPLY_JITTER_MAX", &raw)?;
        }

        // run
        if let Some(raw) = lookup("CSH_RUN_SEED") {
            self.run.seed = Some(parse_env_u64("CSH_RUN_SEED", &raw)?);
        }
        if let Some(raw) = lookup("CSH_RUN_ACCOUNTS") {
            self.run.accounts = raw
                .split(',')
                .map(str::trim)
                .filter(|account| !account.is_empty())
                .map(str::to_string)
                .collect();
        }

        // paths
        if let Some(raw) = lookup("CSH_PATHS_STATE_FILE") {
            self.paths.state_file = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("CSH_PATHS_JSONL_LOG") {
            self.paths.jsonl_log = PathBuf::from(raw);
        }

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.runtime.program.trim().is_empty() {
            return Err(HarnessError::InvalidConfig {
                details: "runtime.program must not be empty".to_string(),
            });
        }
        if self.runtime.timeout_secs == 0 {
            return Err(HarnessError::InvalidConfig {
                details: "runtime.timeout_secs must be > 0".to_string(),
            });
        }

        let ext = &self.templates.extension;
        if ext.is_empty() || ext.starts_with('.') || ext.contains('/') {
            return Err(HarnessError::InvalidConfig {
                details: format!(
                    "templates.extension must be a bare extension like \"js\", got {ext:?}"
                ),
            });
        }

        if self.contract.min_value == 0 {
            return Err(HarnessError::InvalidConfig {
                details: "contract.min_value must be > 0".to_string(),
            });
        }

        if self.fund.supply_jitter_max == 0 {
            return Err(HarnessError::InvalidConfig {
                details: "fund.supply_jitter_max must be >= 1".to_string(),
            });
        }

        if self
            .contract
            .min_value
            .checked_add(self.fund.supply_jitter_max)
            .is_none()
        {
            return Err(HarnessError::InvalidConfig {
                details: "contract.min_value + fund.supply_jitter_max overflows u64".to_string(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for account in &self.run.accounts {
            if !seen.insert(account) {
                return Err(HarnessError::InvalidConfig {
                    details: format!("run.accounts contains duplicate account {account:?}"),
                });
            }
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env_u64(name: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|error| HarnessError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(HarnessError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: expected a boolean"),
        }),
    }
}
