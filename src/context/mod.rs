//! Mutable state of one test run, threaded by `&mut` through every scenario.
//!
//! Fields are written freely by whichever scenario produces them; reads go
//! through typed accessors that fail with `MissingContextField` when a
//! producer never ran or did not finish. Nothing is rolled back: after a
//! failure the context is saved as-is for diagnosis.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::errors::{HarnessError, Result};

/// Address and interface of a deployed contract; always set together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractHandle {
    pub address: String,
    /// ABI as JSON text, passed to scripts verbatim.
    pub abi: String,
}

/// How the deployment prerequisite left the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeploymentOutcome {
    /// Deployed by this run.
    Deployed { address: String, abi: String },
    /// Reused a contract deployed by an earlier run.
    AlreadyDeployed {
        address: String,
        abi: String,
        closing_time: i64,
    },
}

impl DeploymentOutcome {
    #[must_use]
    pub fn address(&self) -> &str {
        match self {
            Self::Deployed { address, .. } | Self::AlreadyDeployed { address, .. } => address,
        }
    }
}

/// Scenarios completed or in progress during this process. Not persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioLedger {
    completed: BTreeSet<String>,
    active: Vec<String>,
}

impl ScenarioLedger {
    #[must_use]
    pub fn is_completed(&self, name: &str) -> bool {
        self.completed.contains(name)
    }

    /// Current in-progress chain, outermost first.
    #[must_use]
    pub fn active(&self) -> &[String] {
        &self.active
    }

    pub(crate) fn enter(&mut self, name: &str) {
        self.active.push(name.to_string());
    }

    pub(crate) fn leave(&mut self, name: &str, completed: bool) {
        if let Some(pos) = self.active.iter().rposition(|n| n == name) {
            self.active.remove(pos);
        }
        if completed {
            self.completed.insert(name.to_string());
        }
    }

    pub fn completed(&self) -> impl Iterator<Item = &str> {
        self.completed.iter().map(String::as_str)
    }
}

/// Shared mutable state of one end-to-end run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunContext {
    contract: Option<ContractHandle>,
    deployment: Option<DeploymentOutcome>,
    /// Sale closing time, unix seconds.
    closing_time: Option<i64>,
    accounts: Vec<String>,
    min_value: Option<u64>,
    total_supply: Option<u64>,
    token_amounts: Option<Vec<u64>>,
    seed: Option<u64>,
    #[serde(skip)]
    ledger: ScenarioLedger,
}

impl RunContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a context saved by an earlier run.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| HarnessError::io(path, source))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Persist the context (pretty JSON) for inspection or a later resume.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| HarnessError::io(parent, source))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| HarnessError::io(path, source))
    }

    // ──────────────────── contract ────────────────────

    /// Deployed contract, if any.
    #[must_use]
    pub fn contract(&self) -> Option<&ContractHandle> {
        self.contract.as_ref()
    }

    pub fn dao_addr(&self) -> Result<&str> {
        self.contract
            .as_ref()
            .map(|c| c.address.as_str())
            .ok_or(HarnessError::MissingContextField { field: "dao_addr" })
    }

    pub fn dao_abi(&self) -> Result<&str> {
        self.contract
            .as_ref()
            .map(|c| c.abi.as_str())
            .ok_or(HarnessError::MissingContextField { field: "dao_abi" })
    }

    /// Record a successful deployment: address, ABI and closing time together.
    pub fn record_deployment(&mut self, address: String, abi: String, closing_time: i64) {
        self.contract = Some(ContractHandle {
            address: address.clone(),
            abi: abi.clone(),
        });
        self.closing_time = Some(closing_time);
        self.deployment = Some(DeploymentOutcome::Deployed { address, abi });
    }

    /// Mark the already-present contract as reused by this run.
    pub fn record_reuse(&mut self) -> Result<DeploymentOutcome> {
        let contract = self
            .contract
            .clone()
            .ok_or(HarnessError::MissingContextField { field: "dao_addr" })?;
        let closing_time = self.closing_time()?;
        let outcome = DeploymentOutcome::AlreadyDeployed {
            address: contract.address,
            abi: contract.abi,
            closing_time,
        };
        self.deployment = Some(outcome.clone());
        Ok(outcome)
    }

    /// Outcome of the deployment prerequisite in this run.
    pub fn deployment(&self) -> Result<&DeploymentOutcome> {
        self.deployment
            .as_ref()
            .ok_or(HarnessError::MissingContextField { field: "deployment" })
    }

    // ──────────────────── sale / accounts ────────────────────

    pub fn closing_time(&self) -> Result<i64> {
        self.closing_time
            .ok_or(HarnessError::MissingContextField {
                field: "closing_time",
            })
    }

    pub fn set_closing_time(&mut self, closing_time: i64) {
        self.closing_time = Some(closing_time);
    }

    pub fn accounts(&self) -> Result<&[String]> {
        if self.accounts.is_empty() {
            return Err(HarnessError::MissingContextField { field: "accounts" });
        }
        Ok(&self.accounts)
    }

    pub fn set_accounts(&mut self, accounts: Vec<String>) {
        self.accounts = accounts;
    }

    pub fn min_value(&self) -> Result<u64> {
        self.min_value
            .ok_or(HarnessError::MissingContextField { field: "min_value" })
    }

    pub fn set_min_value(&mut self, min_value: u64) {
        self.min_value = Some(min_value);
    }

    // ──────────────────── fixtures ────────────────────

    pub fn total_supply(&self) -> Result<u64> {
        self.total_supply
            .ok_or(HarnessError::MissingContextField {
                field: "total_supply",
            })
    }

    pub fn set_total_supply(&mut self, total_supply: u64) {
        self.total_supply = Some(total_supply);
    }

    pub fn token_amounts(&self) -> Result<&[u64]> {
        self.token_amounts
            .as_deref()
            .ok_or(HarnessError::MissingContextField {
                field: "token_amounts",
            })
    }

    pub fn set_token_amounts(&mut self, amounts: Vec<u64>) {
        self.token_amounts = Some(amounts);
    }

    #[must_use]
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.seed = Some(seed);
    }

    // ──────────────────── ledger ────────────────────

    #[must_use]
    pub fn ledger(&self) -> &ScenarioLedger {
        &self.ledger
    }

    pub(crate) fn ledger_mut(&mut self) -> &mut ScenarioLedger {
        &mut self.ledger
    }
}
