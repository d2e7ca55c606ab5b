//! Observability setup for owlflow: structured logging and optional
//! OpenTelemetry span export.

pub mod tracing_setup;
