//! Dual numbers for forward-mode differentiation of likelihood code.
//!
//! Only the operations reached by interpolation, expected counts and the
//! probability terms are provided.

use std::iter::Sum;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// `val + dot·ε` with `ε² = 0`; `dot` carries the derivative along one direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dual {
    /// Function value.
    pub val: f64,
    /// Derivative.
    pub dot: f64,
}

impl Dual {
    /// A constant: zero derivative.
    #[inline]
    pub fn constant(val: f64) -> Self {
        Self { val, dot: 0.0 }
    }

    /// The differentiation variable: unit derivative.
    #[inline]
    pub fn var(val: f64) -> Self {
        Self { val, dot: 1.0 }
    }

    /// `ln x`, derivative `x'/x`.
    #[inline]
    pub fn ln(self) -> Self {
        Self { val: self.val.ln(), dot: self.dot / self.val }
    }

    /// `exp x`, derivative `x'·exp x`.
    #[inline]
    pub fn exp(self) -> Self {
        let val = self.val.exp();
        Self { val, dot: self.dot * val }
    }

    /// `|x|`, derivative `x'·sign x`.
    #[inline]
    pub fn abs(self) -> Self {
        if self.val < 0.0 { -self } else { self }
    }

    /// The operand with the larger value, derivative included.
    #[inline]
    pub fn max(self, other: Self) -> Self {
        if other.val > self.val { other } else { self }
    }
}

impl Add for Dual {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self { val: self.val + rhs.val, dot: self.dot + rhs.dot }
    }
}

impl Sub for Dual {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self + (-rhs)
    }
}

impl Mul for Dual {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: Self) -> Self {
        Self { val: self.val * rhs.val, dot: self.val * rhs.dot + self.dot * rhs.val }
    }
}

impl Div for Dual {
    type Output = Self;
    #[inline]
    fn div(self, rhs: Self) -> Self {
        let val = self.val / rhs.val;
        Self { val, dot: (self.dot - val * rhs.dot) / rhs.val }
    }
}

impl Neg for Dual {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        Self { val: -self.val, dot: -self.dot }
    }
}

impl Sum for Dual {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Dual::constant(0.0), Add::add)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_seeds() {
        assert_eq!(Dual::constant(5.0).dot, 0.0);
        assert_eq!(Dual::var(3.0).dot, 1.0);
    }

    #[test]
    fn test_ln_times_x() {
        // d/dx (x ln x) = ln x + 1
        let x = Dual::var(2.0);
        assert_relative_eq!((x * x.ln()).dot, 2.0_f64.ln() + 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_reciprocal() {
        // d/dx (1 / x) = -1 / x²
        let y = Dual::constant(1.0) / Dual::var(4.0);
        assert_relative_eq!(y.val, 0.25);
        assert_relative_eq!(y.dot, -1.0 / 16.0, epsilon = 1e-12);
    }

    #[test]
    fn test_exp_of_abs() {
        // d/dx exp(|x| · k) at x < 0 is -k·exp(-x·k)
        let k = 0.3;
        let y = (Dual::var(-0.5).abs() * Dual::constant(k)).exp();
        assert_relative_eq!(y.val, (0.5 * k).exp(), epsilon = 1e-12);
        assert_relative_eq!(y.dot, -k * (0.5 * k).exp(), epsilon = 1e-12);
    }

    #[test]
    fn test_floor_has_no_derivative() {
        let m = Dual::var(1e-12).max(Dual::constant(1e-10));
        assert_eq!((m.val, m.dot), (1e-10, 0.0));
    }

    #[test]
    fn test_sum() {
        let s: Dual = [Dual::var(1.0), Dual::var(2.0), Dual::constant(3.0)].into_iter().sum();
        assert_eq!((s.val, s.dot), (6.0, 2.0));
    }
}
