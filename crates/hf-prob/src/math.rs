//! Small numeric helpers.

use statrs::function::gamma::ln_gamma;

/// `ln(sqrt(2π))`.
pub const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_7;

/// `ln Γ(n + 1)`, the generalized log-factorial (non-integer `n` allowed).
#[inline]
pub fn ln_factorial(n: f64) -> f64 {
    ln_gamma(n + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ln_factorial_integers() {
        assert_relative_eq!(ln_factorial(0.0), 0.0, epsilon = 1e-12);
        assert_relative_eq!(ln_factorial(5.0), 120.0_f64.ln(), epsilon = 1e-10);
    }

    #[test]
    fn test_ln_sqrt_2pi() {
        assert_relative_eq!(LN_SQRT_2PI, 0.5 * (2.0 * std::f64::consts::PI).ln(), epsilon = 1e-15);
    }
}
