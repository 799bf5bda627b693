//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use contract_scenario_harness::prelude::*;
//! ```

// Core
pub use crate::core::config::HarnessConfig;
pub use crate::core::errors::{HarnessError, Result};

// Run state
pub use crate::context::{ContractHandle, DeploymentOutcome, RunContext};

// Scenarios
pub use crate::scenario::{
    RunSummary, Scenario, ScenarioRegistry, ScenarioRunner, Session, from_fn,
};

// Scripts
pub use crate::executor::{ExecutionReport, ExecutionResult, ScriptExecutor};
pub use crate::template::{BindingValue, Bindings, TemplateRegistry};

// Fixtures and verification
pub use crate::fixtures::{arr_str, constrained_sum_sample_pos, seeded_rng, ts_now};
pub use crate::verify::{VerificationReport, verify};

// Logging
pub use crate::logger::jsonl::{JsonlConfig, JsonlWriter};
