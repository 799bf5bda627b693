//! Scenario definitions and prerequisite resolution.

use std::collections::{BTreeMap, HashMap};

use crate::core::errors::{HarnessError, Result};
use crate::scenario::session::Session;

/// A named unit of test logic.
///
/// Prerequisites are declared, not called: the runner resolves them, detects
/// cycles before anything runs, and runs each at most once per context.
pub trait Scenario {
    /// Scenarios that must have run (in this order) before this one.
    fn prerequisites(&self) -> Vec<String> {
        Vec::new()
    }

    /// One-line summary for listings.
    fn description(&self) -> &str {
        ""
    }

    /// Scenario body.
    fn run(&self, session: &mut Session<'_, '_>) -> Result<()>;
}

/// Adapter turning a closure into a [`Scenario`].
pub struct FnScenario<F> {
    prerequisites: Vec<String>,
    body: F,
}

/// Build a scenario from a prerequisite list and a closure body.
pub fn from_fn<F>(prerequisites: &[&str], body: F) -> FnScenario<F>
where
    F: Fn(&mut Session<'_, '_>) -> Result<()>,
{
    FnScenario {
        prerequisites: prerequisites.iter().map(|p| (*p).to_string()).collect(),
        body,
    }
}

impl<F> Scenario for FnScenario<F>
where
    F: Fn(&mut Session<'_, '_>) -> Result<()>,
{
    fn prerequisites(&self) -> Vec<String> {
        self.prerequisites.clone()
    }

    fn run(&self, session: &mut Session<'_, '_>) -> Result<()> {
        (self.body)(session)
    }
}

/// Name → scenario map.
#[derive(Default)]
pub struct ScenarioRegistry {
    scenarios: BTreeMap<String, Box<dyn Scenario>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl ScenarioRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scenario under `name`.
    pub fn register(&mut self, name: &str, scenario: impl Scenario + 'static) -> Result<()> {
        if self.scenarios.contains_key(name) {
            return Err(HarnessError::DuplicateScenario {
                name: name.to_string(),
            });
        }
        self.scenarios.insert(name.to_string(), Box::new(scenario));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&dyn Scenario> {
        self.scenarios
            .get(name)
            .map(Box::as_ref)
            .ok_or_else(|| HarnessError::UnknownScenario {
                name: name.to_string(),
                required_by: None,
            })
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.scenarios.contains_key(name)
    }

    /// Registered names with their declared prerequisites, sorted by name.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &dyn Scenario)> {
        self.scenarios
            .iter()
            .map(|(name, scenario)| (name.as_str(), scenario.as_ref()))
    }

    /// Execution order for `name`: prerequisites depth-first, each once, the
    /// target last.
    ///
    /// The whole graph reachable from `name` is checked for cycles and unknown
    /// names before the plan is returned.
    pub fn plan(&self, name: &str) -> Result<Vec<String>> {
        let mut marks = HashMap::new();
        let mut path = Vec::new();
        let mut order = Vec::new();
        self.visit(name, None, &mut marks, &mut path, &mut order)?;
        Ok(order)
    }

    fn visit(
        &self,
        name: &str,
        required_by: Option<&str>,
        marks: &mut HashMap<String, Mark>,
        path: &mut Vec<String>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = path.iter().position(|n| n == name).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(name.to_string());
                return Err(HarnessError::DependencyCycle { cycle });
            }
            None => {}
        }

        let scenario =
            self.scenarios
                .get(name)
                .ok_or_else(|| HarnessError::UnknownScenario {
                    name: name.to_string(),
                    required_by: required_by.map(str::to_string),
                })?;

        marks.insert(name.to_string(), Mark::Visiting);
        path.push(name.to_string());
        for prerequisite in scenario.prerequisites() {
            self.visit(&prerequisite, Some(name), marks, path, order)?;
        }
        path.pop();
        marks.insert(name.to_string(), Mark::Done);
        order.push(name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(prereqs: &[&str]) -> impl Scenario + 'static {
        let owned: Vec<String> = prereqs.iter().map(|p| (*p).to_string()).collect();
        struct Noop(Vec<String>);
        impl Scenario for Noop {
            fn prerequisites(&self) -> Vec<String> {
                self.0.clone()
            }
            fn run(&self, _session: &mut Session<'_, '_>) -> Result<()> {
                Ok(())
            }
        }
        Noop(owned)
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut registry = ScenarioRegistry::new();
        registry.register("deploy", noop(&[])).unwrap();
        let err = registry.register("deploy", noop(&[])).unwrap_err();
        assert!(matches!(err, HarnessError::DuplicateScenario { ref name } if name == "deploy"));
    }

    #[test]
    fn plan_orders_prerequisites_first() {
        let mut registry = ScenarioRegistry::new();
        registry.register("deploy", noop(&[])).unwrap();
        registry.register("fund", noop(&["deploy"])).unwrap();
        registry.register("split", noop(&["fund", "deploy"])).unwrap();
        assert_eq!(
            registry.plan("split").unwrap(),
            vec!["deploy", "fund", "split"]
        );
    }

    #[test]
    fn shared_prerequisite_planned_once() {
        let mut registry = ScenarioRegistry::new();
        registry.register("deploy", noop(&[])).unwrap();
        registry.register("fund", noop(&["deploy"])).unwrap();
        registry.register("vote", noop(&["deploy"])).unwrap();
        registry.register("all", noop(&["fund", "vote"])).unwrap();
        let plan = registry.plan("all").unwrap();
        assert_eq!(plan, vec!["deploy", "fund", "vote", "all"]);
    }

    #[test]
    fn two_node_cycle_detected() {
        let mut registry = ScenarioRegistry::new();
        registry.register("a", noop(&["b"])).unwrap();
        registry.register("b", noop(&["a"])).unwrap();
        let err = registry.plan("a").unwrap_err();
        match err {
            HarnessError::DependencyCycle { cycle } => assert_eq!(cycle, vec!["a", "b", "a"]),
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn self_cycle_detected() {
        let mut registry = ScenarioRegistry::new();
        registry.register("loop", noop(&["loop"])).unwrap();
        assert_eq!(registry.plan("loop").unwrap_err().code(), "CSH-2002");
    }

    #[test]
    fn cycle_below_entry_point_detected() {
        let mut registry = ScenarioRegistry::new();
        registry.register("top", noop(&["x"])).unwrap();
        registry.register("x", noop(&["y"])).unwrap();
        registry.register("y", noop(&["x"])).unwrap();
        match registry.plan("top").unwrap_err() {
            HarnessError::DependencyCycle { cycle } => assert_eq!(cycle, vec!["x", "y", "x"]),
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn unknown_prerequisite_names_dependent() {
        let mut registry = ScenarioRegistry::new();
        registry.register("fund", noop(&["deploy"])).unwrap();
        match registry.plan("fund").unwrap_err() {
            HarnessError::UnknownScenario { name, required_by } => {
                assert_eq!(name, "deploy");
                assert_eq!(required_by.as_deref(), Some("fund"));
            }
            other => panic!("expected unknown scenario, got {other}"),
        }
    }

    #[test]
    fn closures_register_as_scenarios() {
        let mut registry = ScenarioRegistry::new();
        registry.register("deploy", noop(&[])).unwrap();
        registry
            .register("fund", from_fn(&["deploy"], |_session| Ok(())))
            .unwrap();
        assert_eq!(
            registry.get("fund").unwrap().prerequisites(),
            vec!["deploy"]
        );
        assert_eq!(registry.entries().count(), 2);
    }
}
