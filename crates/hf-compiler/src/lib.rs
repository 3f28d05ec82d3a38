//! # hf-compiler
//!
//! Compiles a declarative HistFactory measurement (channels, sample
//! templates, systematics) into wired binned likelihood models.
//!
//! - [`histogram`], [`uncertainty`], [`observable`]: input value types and helpers
//! - [`registry`]: run-wide parameter and constraint-term deduplication
//! - [`normfactor`], [`interp`]: sample normalization and systematic interpolation
//! - [`channel`]: single-channel compiler
//! - [`combine`]: joint model over channels
//! - [`compile`]: measurement driver with persistence ([`persist`])
//! - [`report`]: post-fit correlation table

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::needless_range_loop)]

pub mod channel;
pub mod combine;
pub mod compile;
pub mod config;
pub mod dataset;
pub mod histogram;
pub mod interp;
pub mod measurement;
pub mod model;
pub mod normfactor;
pub mod observable;
pub mod persist;
pub mod registry;
pub mod report;
pub mod uncertainty;

pub use channel::{CompileContext, compile_channel};
pub use combine::{CompiledCombinedModel, ModelConfig, combine};
pub use compile::{CompileOutput, compile_measurement};
pub use config::{ChannelFailurePolicy, Configuration, MeasurementSettings};
pub use histogram::{Axis, Histogram};
pub use measurement::{Channel, Measurement, NormFactor, Normalization, Sample, Systematic};
pub use model::{CompileWarning, CompiledChannelModel, MIN_EXPECTED};
pub use registry::{ConstraintKind, ParameterRegistry};
