//! # hf-ad
//!
//! Forward-mode automatic differentiation for compiled HistFactory models.
//!
//! - [`dual::Dual`]: value + tangent pair
//! - [`scalar::Scalar`]: lets expected-count and NLL code be written once and
//!   evaluated either on plain `f64` or on [`Dual`](dual::Dual) to get derivatives

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dual;
pub mod scalar;

pub use dual::Dual;
pub use scalar::Scalar;
