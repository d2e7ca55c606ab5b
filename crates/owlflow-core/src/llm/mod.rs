//! Text-generation abstraction.
//!
//! - `provider` -- the `TextGenerator` port implemented by infra backends
//! - `box_provider` -- type-erased `BoxTextGenerator` for runtime selection

pub mod box_provider;
pub mod provider;

pub use box_provider::BoxTextGenerator;
pub use provider::TextGenerator;
