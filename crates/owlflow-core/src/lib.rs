//! Workflow engine and capability ports for owlflow.
//!
//! This crate defines the "ports" (repository traits, tool routing, text
//! generation, HTTP) that the infrastructure layer implements, plus the engine
//! that drives workflow executions against them. It depends only on
//! `owlflow-types` -- never on `owlflow-infra` or any network/storage crate.

pub mod event;
pub mod http;
pub mod llm;
pub mod repository;
pub mod tool;
pub mod workflow;
