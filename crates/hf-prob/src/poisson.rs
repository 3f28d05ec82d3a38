//! Poisson terms for main bins and Barlow–Beeston auxiliary measurements.

use hf_ad::Scalar;

use crate::math::ln_factorial;

/// Negative log-probability of observing `n` given mean `lambda`.
///
/// `n` may be non-integer (auxiliary observations `τ` usually are); the
/// factorial is generalized through `ln Γ(n + 1)`. The caller must keep
/// `lambda > 0`.
#[inline]
pub fn nll<S: Scalar>(n: f64, lambda: S) -> S {
    if n > 0.0 {
        lambda - S::from_f64(n) * lambda.ln() + S::from_f64(ln_factorial(n))
    } else {
        lambda
    }
}
