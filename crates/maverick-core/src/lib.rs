//! Maverick workflow engine core.
//!
//! The engine executes directed graphs of heterogeneous steps (actions,
//! agents, generators, validation loops, branches, bounded loops,
//! sub-workflows, checkpoints) against a component registry, with
//! prerequisite gating, `${{ ... }}` expression-based data flow, and
//! resumable execution:
//!
//! - `expression` -- restricted expression language and template resolution
//! - `registry` -- component traits and the kind-partitioned registry
//! - `prerequisites` -- check registry, workflow collector, ordered runner
//! - `workflow` -- parser, semantic validation, context, executor, handlers,
//!   checkpoint store
//! - `config` -- per-run configuration (validation stages, timeouts, caps)

pub mod config;
pub mod expression;
pub mod prerequisites;
pub mod registry;
pub mod workflow;
