//! # hf-core
//!
//! Shared building blocks for the HistFactory model compiler:
//! - [`Error`] / [`Result`] used by every crate in the workspace
//! - [`traits`] implemented by compiled models so external fitters can drive them
//! - [`types`] exchanged with those fitters (e.g. [`FitResult`])

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, ErrorContext, Result};
pub use types::FitResult;
