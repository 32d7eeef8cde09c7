//! Error handling using `thiserror` and `anyhow`.
//!
//! Domain-specific error types for precise handling, plus operational
//! context propagation and centralized reporting.

pub mod domain;
pub mod operational;

pub use {
    domain::AudioError,
    operational::{ErrorReporter, ResultExt},
};
