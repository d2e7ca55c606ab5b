//! In-memory repository implementations.
//!
//! Records live in `DashMap`s keyed by id and vanish with the process. Good
//! enough for the CLI and for embedding the engine in tests.

pub mod execution;
pub mod step;

pub use execution::InMemoryExecutionRepository;
pub use step::InMemoryStepRepository;
