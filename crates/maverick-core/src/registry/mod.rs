//! Kind-partitioned component registry.
//!
//! Five partitions (actions, agents, generators, context builders,
//! workflows), each a name -> component map with per-entry metadata carrying
//! the prerequisite names attached at registration time. Registries are
//! populated before execution starts and frozen (behind `Arc`) for the
//! duration of a run; the engine never mutates them concurrently.
//!
//! Structural contracts (callable, implements `execute`, implements
//! `generate`, two-parameter builder) are carried by the trait signatures,
//! so registration only has to police name uniqueness.

mod component;

pub use component::{
    Action, Agent, BoxAction, BoxAgent, BoxGenerator, ContextBuilder, Generator, Kwargs,
};

use std::collections::HashMap;
use std::sync::Arc;

use maverick_types::workflow::WorkflowFile;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from component registration and lookup.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// The name is already taken within this kind.
    #[error("{kind} '{name}' is already registered")]
    Duplicate { kind: ComponentKind, name: String },

    /// No component with this name exists in this kind.
    #[error("unknown {kind} '{name}'; known {kind}s: {}", format_known(known))]
    NotFound {
        kind: ComponentKind,
        name: String,
        known: Vec<String>,
    },
}

/// Render a known-name list, truncated when long.
fn format_known(known: &[String]) -> String {
    const LIMIT: usize = 20;
    if known.is_empty() {
        return "(none)".to_string();
    }
    if known.len() <= LIMIT {
        return known.join(", ");
    }
    format!(
        "{}, ... ({} more)",
        known[..LIMIT].join(", "),
        known.len() - LIMIT
    )
}

/// The registry partition a component belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Action,
    Agent,
    Generator,
    ContextBuilder,
    Workflow,
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ComponentKind::Action => "action",
            ComponentKind::Agent => "agent",
            ComponentKind::Generator => "generator",
            ComponentKind::ContextBuilder => "context builder",
            ComponentKind::Workflow => "workflow",
        })
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Per-entry registration metadata.
#[derive(Debug, Clone, Default)]
pub struct ComponentMetadata {
    /// Prerequisite names this component needs, collected during preflight.
    pub requires: Vec<String>,
}

// ---------------------------------------------------------------------------
// Generic partition
// ---------------------------------------------------------------------------

/// One name-addressed partition of the component registry.
pub struct Registry<T> {
    kind: ComponentKind,
    entries: HashMap<String, T>,
    metadata: HashMap<String, ComponentMetadata>,
}

impl<T> Registry<T> {
    fn new(kind: ComponentKind) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    /// Register a component with no prerequisites.
    pub fn register(&mut self, name: impl Into<String>, component: T) -> Result<(), RegistryError> {
        self.register_with_requires(name, component, Vec::new())
    }

    /// Register a component together with the prerequisite names it needs.
    pub fn register_with_requires(
        &mut self,
        name: impl Into<String>,
        component: T,
        requires: Vec<String>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(RegistryError::Duplicate {
                kind: self.kind,
                name,
            });
        }
        tracing::debug!(kind = %self.kind, name = name.as_str(), "registered component");
        self.metadata
            .insert(name.clone(), ComponentMetadata { requires });
        self.entries.insert(name, component);
        Ok(())
    }

    /// Look up a component by name.
    pub fn get(&self, name: &str) -> Result<&T, RegistryError> {
        self.entries.get(name).ok_or_else(|| RegistryError::NotFound {
            kind: self.kind,
            name: name.to_string(),
            known: self.list_names(),
        })
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// All registered names, sorted.
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Prerequisite names attached at registration time.
    pub fn get_requires(&self, name: &str) -> Result<&[String], RegistryError> {
        if !self.entries.contains_key(name) {
            return Err(RegistryError::NotFound {
                kind: self.kind,
                name: name.to_string(),
                known: self.list_names(),
            });
        }
        Ok(self
            .metadata
            .get(name)
            .map(|m| m.requires.as_slice())
            .unwrap_or(&[]))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// The complete, kind-partitioned component catalog for a run.
pub struct ComponentRegistry {
    pub actions: Registry<BoxAction>,
    pub agents: Registry<BoxAgent>,
    pub generators: Registry<BoxGenerator>,
    pub context_builders: Registry<ContextBuilder>,
    pub workflows: Registry<Arc<WorkflowFile>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self {
            actions: Registry::new(ComponentKind::Action),
            agents: Registry::new(ComponentKind::Agent),
            generators: Registry::new(ComponentKind::Generator),
            context_builders: Registry::new(ComponentKind::ContextBuilder),
            workflows: Registry::new(ComponentKind::Workflow),
        }
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
