//! `deploy`: put the fundraising contract on chain, or adopt the one a
//! resumed context already points at.

use std::fs;
use std::path::Path;

use serde_json::{Map, Value};

use crate::core::errors::{HarnessError, Result};
use crate::fixtures::ts_now;
use crate::scenario::registry::Scenario;
use crate::scenario::session::Session;
use crate::template::{BindingValue, Bindings};

/// Template rendered by this scenario.
pub const TEMPLATE: &str = "deploy";

pub struct DeployScenario;

impl Scenario for DeployScenario {
    fn description(&self) -> &str {
        "deploy the contract and record its address, ABI and closing time"
    }

    fn run(&self, session: &mut Session<'_, '_>) -> Result<()> {
        let min_value = session.config().contract.min_value;
        if session.context().min_value().is_err() {
            session.context_mut().set_min_value(min_value);
        }

        if session.context().contract().is_some() {
            let outcome = session.context_mut().record_reuse()?;
            session.notice(&format!(
                "contract already deployed at {}; reusing it",
                outcome.address()
            ));
            return Ok(());
        }

        let contract = session.config().contract.clone();
        let abi = read_artifact(&contract.abi_path)?;
        let bytecode = read_artifact(&contract.bytecode_path)?;
        let sale_duration = i64::try_from(contract.sale_duration_secs).unwrap_or(i64::MAX);
        let closing_time = ts_now().saturating_add(sale_duration);

        let mut bindings = Bindings::new();
        bindings.insert("dao_abi".into(), BindingValue::Text(abi.clone()));
        bindings.insert("dao_bytecode".into(), BindingValue::Text(bytecode));
        bindings.insert("closing_time".into(), BindingValue::from(closing_time));
        bindings.insert("min_value".into(), BindingValue::from(contract.min_value));
        session.create_js_file(TEMPLATE, &bindings)?;

        let mut expected = Map::new();
        expected.insert("dao_deployed".into(), Value::Bool(true));
        let report = session.execute(TEMPLATE, &expected)?;
        report.verification.ensure_passed()?;

        let state = report.result.final_state.unwrap_or_default();
        let address = state
            .get("dao_address")
            .and_then(Value::as_str)
            .filter(|a| !a.is_empty())
            .ok_or(HarnessError::MissingContextField { field: "dao_addr" })?
            .to_string();
        // The script may report the closing time it actually configured.
        let closing_time = state
            .get("closing_time")
            .and_then(Value::as_i64)
            .unwrap_or(closing_time);

        if session.context().accounts().is_err() {
            let accounts = reported_accounts(&state);
            if !accounts.is_empty() {
                session.context_mut().set_accounts(accounts);
            }
        }
        session
            .context_mut()
            .record_deployment(address, abi, closing_time);
        Ok(())
    }
}

fn read_artifact(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map(|raw| raw.trim().to_string())
        .map_err(|source| HarnessError::io(path, source))
}

fn reported_accounts(state: &Map<String, Value>) -> Vec<String> {
    state
        .get("accounts")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
