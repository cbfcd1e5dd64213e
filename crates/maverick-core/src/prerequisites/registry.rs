//! Catalog of available prerequisite checks.
//!
//! Mirrors the component registry shape for prerequisite definitions and
//! adds transitive dependency resolution: `get_all_dependencies` is a DFS
//! with an in-stack set, producing a dependency-first topological order and
//! detecting cycles by rediscovery.

use std::collections::{HashMap, HashSet};

use super::{Prerequisite, PrerequisiteError};

/// Registry of available prerequisite checks.
#[derive(Default)]
pub struct PrerequisiteRegistry {
    prerequisites: HashMap<String, Prerequisite>,
}

impl PrerequisiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a prerequisite definition.
    pub fn register(&mut self, prerequisite: Prerequisite) -> Result<(), PrerequisiteError> {
        if self.prerequisites.contains_key(&prerequisite.name) {
            return Err(PrerequisiteError::Duplicate(prerequisite.name));
        }
        tracing::debug!(name = prerequisite.name.as_str(), "registered prerequisite");
        self.prerequisites
            .insert(prerequisite.name.clone(), prerequisite);
        Ok(())
    }

    /// Look up a prerequisite by name.
    pub fn get(&self, name: &str) -> Result<&Prerequisite, PrerequisiteError> {
        self.prerequisites
            .get(name)
            .ok_or_else(|| PrerequisiteError::Unknown {
                name: name.to_string(),
                available: self.list_names(),
            })
    }

    pub fn has(&self, name: &str) -> bool {
        self.prerequisites.contains_key(name)
    }

    /// All registered names, sorted.
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.prerequisites.keys().cloned().collect();
        names.sort();
        names
    }

    /// All registered prerequisites, sorted by name.
    pub fn list_all(&self) -> Vec<&Prerequisite> {
        let mut all: Vec<&Prerequisite> = self.prerequisites.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Direct dependencies of a prerequisite.
    pub fn get_dependencies(&self, name: &str) -> Result<&[String], PrerequisiteError> {
        Ok(&self.get(name)?.dependencies)
    }

    /// All transitive dependencies of `names`, in topological order
    /// (dependencies before dependents).
    pub fn get_all_dependencies(
        &self,
        names: &[String],
    ) -> Result<Vec<String>, PrerequisiteError> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut in_stack: HashSet<String> = HashSet::new();
        let mut order: Vec<String> = Vec::new();

        for name in names {
            self.visit(name, &mut visited, &mut in_stack, &mut order)?;
        }
        Ok(order)
    }

    fn visit(
        &self,
        name: &str,
        visited: &mut HashSet<String>,
        in_stack: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) -> Result<(), PrerequisiteError> {
        if in_stack.contains(name) {
            return Err(PrerequisiteError::CircularDependency(name.to_string()));
        }
        if visited.contains(name) {
            return Ok(());
        }

        in_stack.insert(name.to_string());
        let prerequisite = self.get(name)?;
        for dependency in &prerequisite.dependencies {
            self.visit(dependency, visited, in_stack, order)?;
        }
        in_stack.remove(name);

        visited.insert(name.to_string());
        order.push(name.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
