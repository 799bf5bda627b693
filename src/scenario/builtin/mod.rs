//! Built-in fundraising scenarios.

pub mod deploy;
pub mod fund;

use crate::core::errors::Result;
use crate::scenario::registry::ScenarioRegistry;

pub use deploy::DeployScenario;
pub use fund::FundScenario;

/// Register `deploy` and `fund`.
pub fn register_builtin(registry: &mut ScenarioRegistry) -> Result<()> {
    registry.register(deploy::TEMPLATE, DeployScenario)?;
    registry.register(fund::TEMPLATE, FundScenario)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fund_plans_after_deploy() {
        let mut registry = ScenarioRegistry::new();
        register_builtin(&mut registry).unwrap();
        assert_eq!(registry.plan("fund").unwrap(), vec!["deploy", "fund"]);
        assert!(register_builtin(&mut registry).is_err());
    }
}
