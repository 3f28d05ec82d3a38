//! Probability building blocks for compiled HistFactory likelihoods.
//!
//! Every density is written against [`hf_ad::Scalar`] in the parameter slot so the
//! same code evaluates the likelihood and its forward-mode derivatives.
//! - [`poisson`]: main-bin and Barlow–Beeston auxiliary terms
//! - [`normal`]: Gaussian constraint terms
//! - [`lognormal`]: log-normal constraint terms
//! - [`math`]: small helpers shared by the above

pub mod lognormal;
pub mod math;
pub mod normal;
pub mod poisson;
