//! Shared domain types for owlflow.
//!
//! This crate contains the core domain types used across the owlflow engine:
//! workflow definitions, execution records, capability value types, and
//! their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror, toml.

pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod llm;
pub mod tool;
pub mod workflow;
