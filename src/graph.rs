//! Dependency graph between components.
//!
//! Records who depends on whom, both ways:
//! - `dependency -> dependents` drives shutdown order (dependents first)
//! - `dependent -> dependencies` answers what a component needs
//!
//! Edges come from declared `depends_on` lists and from explicit
//! registrations made while components are created.

use ahash::{AHashMap, AHashSet};
use parking_lot::Mutex;

#[derive(Default)]
struct Edges {
    dependents: AHashMap<String, AHashSet<String>>,
    dependencies: AHashMap<String, AHashSet<String>>,
}

/// Thread-safe, bidirectional dependency graph keyed by canonical name
#[derive(Default)]
pub(crate) struct DependencyGraph {
    edges: Mutex<Edges>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `dependent` needs `dependency`
    pub fn register(&self, dependency: &str, dependent: &str) {
        let mut edges = self.edges.lock();
        edges
            .dependents
            .entry(dependency.to_owned())
            .or_default()
            .insert(dependent.to_owned());
        edges
            .dependencies
            .entry(dependent.to_owned())
            .or_default()
            .insert(dependency.to_owned());
    }

    /// Whether `dependent` needs `name`, directly or transitively
    pub fn is_dependent(&self, name: &str, dependent: &str) -> bool {
        let edges = self.edges.lock();
        let mut seen = AHashSet::new();
        Self::reaches(&edges, name, dependent, &mut seen)
    }

    fn reaches<'a>(
        edges: &'a Edges,
        name: &'a str,
        dependent: &str,
        seen: &mut AHashSet<&'a str>,
    ) -> bool {
        if !seen.insert(name) {
            return false;
        }
        let Some(direct) = edges.dependents.get(name) else {
            return false;
        };
        if direct.contains(dependent) {
            return true;
        }
        direct
            .iter()
            .any(|next| Self::reaches(edges, next, dependent, seen))
    }

    /// Components that directly depend on `name`
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.edges
            .lock()
            .dependents
            .get(name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Components `name` directly depends on
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.edges
            .lock()
            .dependencies
            .get(name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Detach and return the dependents of `name`
    pub fn take_dependents(&self, name: &str) -> Vec<String> {
        self.edges
            .lock()
            .dependents
            .remove(name)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default()
    }

    /// Drop every edge touching `name`
    pub fn forget(&self, name: &str) {
        let mut edges = self.edges.lock();
        edges.dependents.remove(name);
        edges.dependencies.remove(name);
        for set in edges.dependents.values_mut() {
            set.remove(name);
        }
        edges.dependents.retain(|_, set| !set.is_empty());
    }

    pub fn clear(&self) {
        let mut edges = self.edges.lock();
        edges.dependents.clear();
        edges.dependencies.clear();
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let edges = self.edges.lock();
        f.debug_struct("DependencyGraph")
            .field("dependencies", &edges.dependents.len())
            .field("dependents", &edges.dependencies.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_dependency() {
        let graph = DependencyGraph::new();
        graph.register("db", "repo");

        assert!(graph.is_dependent("db", "repo"));
        assert!(!graph.is_dependent("repo", "db"));
        assert_eq!(graph.dependents_of("db"), vec!["repo".to_string()]);
        assert_eq!(graph.dependencies_of("repo"), vec!["db".to_string()]);
    }

    #[test]
    fn test_transitive_dependency() {
        let graph = DependencyGraph::new();
        graph.register("db", "repo");
        graph.register("repo", "service");

        assert!(graph.is_dependent("db", "service"));
        assert!(!graph.is_dependent("service", "db"));
    }

    #[test]
    fn test_cycle_terminates() {
        let graph = DependencyGraph::new();
        graph.register("a", "b");
        graph.register("b", "a");

        assert!(graph.is_dependent("a", "a"));
        assert!(!graph.is_dependent("a", "c"));
    }

    #[test]
    fn test_forget_and_take() {
        let graph = DependencyGraph::new();
        graph.register("db", "repo");
        graph.register("cache", "repo");

        assert_eq!(graph.take_dependents("db"), vec!["repo".to_string()]);
        assert!(graph.dependents_of("db").is_empty());

        graph.forget("repo");
        assert!(graph.dependents_of("cache").is_empty());
        assert!(graph.dependencies_of("repo").is_empty());
    }
}
