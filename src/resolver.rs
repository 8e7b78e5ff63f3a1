//! Dependency resolution: expands requested tools into a dependency-ordered
//! installation plan.

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::types::Tool;

/// Ordered, name-deduplicated sequence of tools: dependencies strictly
/// before dependents. Holds owned copies so status annotations never leak
/// into the catalog's canonical instances.
#[derive(Debug, Clone, Default)]
pub struct InstallationPlan {
    tools: Vec<Tool>,
}

impl InstallationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn tools_mut(&mut self) -> &mut [Tool] {
        &mut self.tools
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Tool> {
        self.tools.iter_mut().find(|t| t.name == name)
    }

    fn push(&mut self, tool: Tool) {
        self.tools.push(tool);
    }
}

/// Resolve `name` and its transitive runtime dependencies into `plan`,
/// depth-first post-order. Already-planned names are not re-appended;
/// dependencies are flagged as such on first insertion.
pub fn resolve(catalog: &Catalog, name: &str, plan: &mut InstallationPlan) -> Result<()> {
    let mut visiting = Vec::new();
    resolve_inner(catalog, name, plan, &mut visiting, false)
}

fn resolve_inner(
    catalog: &Catalog,
    name: &str,
    plan: &mut InstallationPlan,
    visiting: &mut Vec<String>,
    as_dependency: bool,
) -> Result<()> {
    if plan.contains(name) {
        return Ok(());
    }
    if visiting.iter().any(|v| v == name) {
        let mut cycle = visiting.clone();
        cycle.push(name.to_string());
        return Err(Error::CycleDetected(cycle.join(" -> ")));
    }

    let tool = catalog.get_by_name(name)?;
    visiting.push(name.to_string());

    for dependency in &tool.runtime_dependencies {
        resolve_inner(catalog, dependency, plan, visiting, true)?;
    }

    visiting.pop();

    // A concurrent branch may have planned this name through a shared
    // dependency; keep the union idempotent.
    if !plan.contains(name) {
        let mut tool = tool.clone();
        tool.status.is_dependency = as_dependency;
        tracing::trace!("Planned {} (dependency: {})", name, as_dependency);
        plan.push(tool);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(entries: &[(&str, &[&str])]) -> Catalog {
        let tools = entries
            .iter()
            .map(|(name, deps)| crate::types::Tool {
                name: name.to_string(),
                version: "1.0.0".to_string(),
                runtime_dependencies: deps.iter().map(|d| d.to_string()).collect(),
                ..Default::default()
            })
            .collect();
        Catalog { tools }
    }

    fn names(plan: &InstallationPlan) -> Vec<&str> {
        plan.tools().iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn dependencies_precede_dependents() {
        let catalog = catalog(&[("foo", &["bar"]), ("bar", &["baz"]), ("baz", &[])]);
        let mut plan = InstallationPlan::new();
        resolve(&catalog, "foo", &mut plan).unwrap();
        assert_eq!(names(&plan), vec!["baz", "bar", "foo"]);
    }

    #[test]
    fn shared_dependency_appears_once() {
        let catalog = catalog(&[("a", &["c"]), ("b", &["c"]), ("c", &[]), ("root", &["a", "b"])]);
        let mut plan = InstallationPlan::new();
        resolve(&catalog, "root", &mut plan).unwrap();
        assert_eq!(names(&plan), vec!["c", "a", "b", "root"]);
    }

    #[test]
    fn resolving_twice_is_idempotent() {
        let catalog = catalog(&[("foo", &["bar"]), ("bar", &[])]);
        let mut plan = InstallationPlan::new();
        resolve(&catalog, "foo", &mut plan).unwrap();
        resolve(&catalog, "foo", &mut plan).unwrap();
        assert_eq!(names(&plan), vec!["bar", "foo"]);
    }

    #[test]
    fn dependency_flag_set_on_first_insertion() {
        let catalog = catalog(&[("foo", &["bar"]), ("bar", &[])]);
        let mut plan = InstallationPlan::new();
        resolve(&catalog, "foo", &mut plan).unwrap();
        assert!(plan.get("bar").unwrap().status.is_dependency);
        assert!(!plan.get("foo").unwrap().status.is_dependency);
    }

    #[test]
    fn missing_dependency_aborts_resolution() {
        let catalog = catalog(&[("foo", &["ghost"])]);
        let mut plan = InstallationPlan::new();
        let err = resolve(&catalog, "foo", &mut plan).unwrap_err();
        assert!(matches!(err, Error::ToolNotFound(name) if name == "ghost"));
    }

    #[test]
    fn cycle_is_detected_not_recursed() {
        let catalog = catalog(&[("a", &["b"]), ("b", &["a"])]);
        let mut plan = InstallationPlan::new();
        let err = resolve(&catalog, "a", &mut plan).unwrap_err();
        match err {
            Error::CycleDetected(path) => assert_eq!(path, "a -> b -> a"),
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn self_cycle_is_detected() {
        let catalog = catalog(&[("a", &["a"])]);
        let mut plan = InstallationPlan::new();
        assert!(matches!(
            resolve(&catalog, "a", &mut plan),
            Err(Error::CycleDetected(_))
        ));
    }
}
