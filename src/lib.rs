#![forbid(unsafe_code)]

//! Contract Scenario Harness (csh): scenario-driven lifecycle tests for a
//! fundraising smart contract.
//!
//! A run resolves a scenario's prerequisites, threads one mutable
//! [`context::RunContext`] through them, renders scripts from strict
//! templates, executes them under an external runtime and verifies the final
//! state each script prints.
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use contract_scenario_harness::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use contract_scenario_harness::core::config::HarnessConfig;
//! use contract_scenario_harness::scenario::{ScenarioRegistry, from_fn};
//! ```

pub mod prelude;

pub mod context;
pub mod core;
pub mod executor;
pub mod fixtures;
pub mod logger;
pub mod scenario;
pub mod template;
pub mod verify;
