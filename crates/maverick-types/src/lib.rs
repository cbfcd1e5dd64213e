//! Shared domain types for the Maverick workflow engine.
//!
//! This crate contains the canonical workflow file IR, step/workflow results,
//! the event vocabulary, prerequisite data types, and checkpoint snapshots.
//! Zero engine logic and zero infrastructure dependencies -- only serde,
//! serde_json, chrono, and uuid.

pub mod checkpoint;
pub mod event;
pub mod prerequisite;
pub mod result;
pub mod workflow;
