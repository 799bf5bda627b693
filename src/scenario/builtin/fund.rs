//! `fund`: spread a random total supply across the test accounts, wait for the
//! sale to close and check the resulting balances.

use std::time::Duration;

use chrono::{DateTime, Local};
use rand::Rng;
use serde_json::{Map, Value, json};

use crate::context::DeploymentOutcome;
use crate::core::errors::Result;
use crate::fixtures::{constrained_sum_sample_pos, ts_now};
use crate::scenario::registry::Scenario;
use crate::scenario::session::Session;
use crate::template::{BindingValue, Bindings};

/// Template rendered by this scenario.
pub const TEMPLATE: &str = "fund";

pub struct FundScenario;

impl Scenario for FundScenario {
    fn prerequisites(&self) -> Vec<String> {
        vec![super::deploy::TEMPLATE.to_string()]
    }

    fn description(&self) -> &str {
        "fund every account during the sale and verify the balances"
    }

    fn run(&self, session: &mut Session<'_, '_>) -> Result<()> {
        let reused = match session.context().deployment()? {
            DeploymentOutcome::AlreadyDeployed { closing_time, .. } => Some(*closing_time),
            DeploymentOutcome::Deployed { .. } => None,
        };
        if let Some(closing_time) = reused {
            session.warn(&format!(
                "running the funding scenario with a pre-deployed contract. Closing time is {} \
                 which is approximately {} seconds from now.",
                format_local(closing_time),
                seconds_until(closing_time, ts_now())
            ));
        }

        let fund = session.config().fund.clone();
        let closing_time = session.context().closing_time()?;
        let sale_secs = seconds_until(closing_time, ts_now());

        let jitter = session.rng().random_range(1..=fund.supply_jitter_max);
        let total_supply = session.context().min_value()?.saturating_add(jitter);
        let account_count = session.context().accounts()?.len();
        let amounts = constrained_sum_sample_pos(account_count, total_supply, session.rng())?;
        session.context_mut().set_total_supply(total_supply);
        session.context_mut().set_token_amounts(amounts.clone());

        let wait_ms = wait_millis(sale_secs, fund.safety_margin_secs);
        let mut bindings = Bindings::new();
        bindings.insert(
            "dao_abi".into(),
            BindingValue::Text(session.context().dao_abi()?.to_string()),
        );
        bindings.insert(
            "dao_address".into(),
            BindingValue::Text(session.context().dao_addr()?.to_string()),
        );
        bindings.insert("wait_ms".into(), BindingValue::from(wait_ms));
        bindings.insert("amounts".into(), BindingValue::Sequence(amounts.clone()));
        session.create_js_file(TEMPLATE, &bindings)?;
        session.notice(&format!(
            "Funding period is {sale_secs} seconds so the test will wait as much"
        ));

        let expected = expected_state(total_supply, &amounts);
        let timeout = session
            .default_timeout()
            .saturating_add(Duration::from_millis(wait_ms));
        session
            .execute_within(TEMPLATE, &expected, timeout)?
            .verification
            .ensure_passed()?;
        Ok(())
    }
}

/// Seconds from `now` until `closing_time`; negative once the sale closed.
#[must_use]
pub fn seconds_until(closing_time: i64, now: i64) -> i64 {
    closing_time.saturating_sub(now)
}

/// How long the script should sleep before checking balances: the remaining
/// sale time minus `margin_secs`, never negative.
#[must_use]
pub fn wait_millis(sale_secs: i64, margin_secs: u64) -> u64 {
    let margin = i64::try_from(margin_secs).unwrap_or(i64::MAX);
    u64::try_from(sale_secs.saturating_sub(margin))
        .unwrap_or(0)
        .saturating_mul(1000)
}

/// Final state a successful funding run must report.
#[must_use]
pub fn expected_state(total_supply: u64, amounts: &[u64]) -> Map<String, Value> {
    let mut expected = Map::new();
    expected.insert("dao_funded".into(), Value::Bool(true));
    expected.insert("total_supply".into(), json!(total_supply));
    expected.insert("balances".into(), json!(amounts));
    if let Some(first) = amounts.first() {
        expected.insert("user0_after".into(), json!(first));
    }
    expected
}

fn format_local(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0).map_or_else(
        || ts.to_string(),
        |utc| {
            utc.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        },
    )
}
