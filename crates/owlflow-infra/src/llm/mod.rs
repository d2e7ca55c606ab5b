//! Text-generation backends.

pub mod ollama;

pub use ollama::OllamaGenerator;
