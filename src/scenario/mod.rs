//! Scenario registry, runner and the session API scenario bodies use.

pub mod builtin;
pub mod registry;
pub mod runner;
pub mod session;

pub use registry::{FnScenario, Scenario, ScenarioRegistry, from_fn};
pub use runner::{RunSummary, ScenarioRecord, ScenarioRunner};
pub use session::Session;
