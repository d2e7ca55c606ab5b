//! Infrastructure layer for owlflow.
//!
//! Contains implementations of the ports defined in `owlflow-core`:
//! in-memory execution and step stores, a reqwest-backed HTTP client for
//! `http_request` steps, the Ollama text generator, and the config loader.

pub mod config;
pub mod http;
pub mod llm;
pub mod memory;
