//! Log-normal constraint terms.

use hf_ad::Scalar;
use hf_core::{Error, Result};

use crate::math::LN_SQRT_2PI;

/// Negative log-density of a log-normal with median `median` and relative
/// uncertainty `rel`, i.e. `ln x ~ N(ln median, ln(1 + rel))`.
///
/// Returns `+inf` for `x <= 0`.
pub fn nll<S: Scalar>(x: S, median: f64, rel: f64) -> Result<S> {
    if !median.is_finite() || median <= 0.0 {
        return Err(Error::Validation(format!(
            "log-normal median must be finite and > 0, got {}",
            median
        )));
    }
    if !rel.is_finite() || rel <= 0.0 {
        return Err(Error::Validation(format!(
            "log-normal relative uncertainty must be finite and > 0, got {}",
            rel
        )));
    }
    if x.value() <= 0.0 {
        return Ok(S::from_f64(f64::INFINITY));
    }
    let kappa = (1.0 + rel).ln();
    let lx = x.ln();
    let z = (lx - S::from_f64(median.ln())) * S::from_f64(1.0 / kappa);
    Ok(S::from_f64(0.5) * z * z + lx + S::from_f64(kappa.ln() + LN_SQRT_2PI))
}
