//! Gaussian constraint terms.

use hf_ad::Scalar;
use hf_core::{Error, Result};

use crate::math::LN_SQRT_2PI;

/// Negative log-density of `N(x | mu, sigma)`.
///
/// `-log p(x) = 0.5 * ((x-mu)/sigma)^2 + ln(sigma) + ln(sqrt(2π))`
pub fn nll<S: Scalar>(x: S, mu: f64, sigma: f64) -> Result<S> {
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(Error::Validation(format!("sigma must be finite and > 0, got {}", sigma)));
    }
    let z = (x - S::from_f64(mu)) * S::from_f64(1.0 / sigma);
    Ok(S::from_f64(0.5) * z * z + S::from_f64(sigma.ln() + LN_SQRT_2PI))
}
