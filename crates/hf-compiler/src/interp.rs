//! HistFactory interpolation schemes.
//!
//! All functions are generic over [`Scalar`] so expected counts and their
//! derivatives come from the same code path.

use hf_ad::Scalar;
use serde::{Deserialize, Serialize};

/// Interpolation of an OverallSys yield factor in its nuisance parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallSysInterp {
    /// Piecewise linear (code 0): `1 + θ·(high−1)` above 0, `1 + θ·(1−low)` below.
    #[default]
    Linear,
    /// Piecewise exponential (code 1): `high^θ` above 0, `low^−θ` below.
    Exponential,
    /// 6th-order polynomial inside [−1, 1], exponential outside (code 4).
    PolyExp,
}

/// Interpolation of a HistoSys shape in its nuisance parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoSysInterp {
    /// Piecewise linear (code 0).
    Linear,
    /// 6th-order polynomial inside [−1, 1], linear outside (code 4p).
    #[default]
    PolyLinear,
}

/// Multiplicative yield factor for one OverallSys.
pub fn overall_factor<T: Scalar>(theta: T, low: f64, high: f64, interp: OverallSysInterp) -> T {
    match interp {
        OverallSysInterp::Linear => overall_linear(theta, low, high),
        OverallSysInterp::Exponential => {
            if low <= 0.0 || high <= 0.0 {
                return overall_linear(theta, low, high);
            }
            let base = if theta.value() >= 0.0 { high } else { low };
            (theta.abs() * T::from_f64(base.ln())).exp()
        }
        OverallSysInterp::PolyExp => overall_polyexp(theta, low, high),
    }
}

fn overall_linear<T: Scalar>(theta: T, low: f64, high: f64) -> T {
    if theta.value() >= 0.0 {
        T::from_f64(1.0) + theta * T::from_f64(high - 1.0)
    } else {
        T::from_f64(1.0) + theta * T::from_f64(1.0 - low)
    }
}

fn polyexp_coeffs(high: f64, low: f64) -> [f64; 6] {
    // Matches f(±1), f'(±1), f''(±1) of the exponential branch with θ0 = 1.
    const A_INV: [[f64; 6]; 6] = [
        [15.0 / 16.0, -15.0 / 16.0, -7.0 / 16.0, -7.0 / 16.0, 1.0 / 16.0, -1.0 / 16.0],
        [3.0 / 2.0, 3.0 / 2.0, -9.0 / 16.0, 9.0 / 16.0, 1.0 / 16.0, 1.0 / 16.0],
        [-5.0 / 8.0, 5.0 / 8.0, 5.0 / 8.0, 5.0 / 8.0, -1.0 / 8.0, 1.0 / 8.0],
        [-3.0 / 2.0, -3.0 / 2.0, 7.0 / 8.0, -7.0 / 8.0, -1.0 / 8.0, -1.0 / 8.0],
        [3.0 / 16.0, -3.0 / 16.0, -3.0 / 16.0, -3.0 / 16.0, 1.0 / 16.0, -1.0 / 16.0],
        [1.0 / 2.0, 1.0 / 2.0, -5.0 / 16.0, 5.0 / 16.0, 1.0 / 16.0, 1.0 / 16.0],
    ];

    let ln_hi = high.ln();
    let ln_lo = low.ln();
    let b = [
        high - 1.0,
        low - 1.0,
        high * ln_hi,
        -low * ln_lo,
        high * ln_hi * ln_hi,
        low * ln_lo * ln_lo,
    ];

    let mut a = [0.0; 6];
    for (row, out) in A_INV.iter().zip(a.iter_mut()) {
        *out = row.iter().zip(&b).map(|(m, v)| m * v).sum();
    }
    a
}

fn overall_polyexp<T: Scalar>(theta: T, low: f64, high: f64) -> T {
    if low <= 0.0 || high <= 0.0 {
        return overall_linear(theta, low, high);
    }

    let t = theta.value();
    if t.abs() >= 1.0 {
        let base = if t >= 0.0 { high } else { low };
        return (theta.abs() * T::from_f64(base.ln())).exp();
    }

    let c = polyexp_coeffs(high, low);
    let mut power = theta;
    let mut out = T::from_f64(1.0);
    for coeff in c {
        out = out + T::from_f64(coeff) * power;
        power = power * theta;
    }
    out
}

/// Additive per-bin shift for one HistoSys.
///
/// Zero at θ = 0, `up − nominal` at θ = +1 and `down − nominal` at θ = −1.
pub fn histo_delta<T: Scalar>(theta: T, down: f64, nominal: f64, up: f64, interp: HistoSysInterp) -> T {
    let delta_up = up - nominal;
    let delta_dn = nominal - down;
    let t = theta.value();

    match interp {
        HistoSysInterp::Linear => {
            if t >= 0.0 {
                theta * T::from_f64(delta_up)
            } else {
                theta * T::from_f64(delta_dn)
            }
        }
        HistoSysInterp::PolyLinear => {
            if t > 1.0 {
                return theta * T::from_f64(delta_up);
            }
            if t < -1.0 {
                return theta * T::from_f64(delta_dn);
            }

            let s = T::from_f64(0.5 * (delta_up + delta_dn));
            let a = T::from_f64(0.0625 * (delta_up - delta_dn));

            // 3θ⁶ − 10θ⁴ + 15θ²
            let sq = theta * theta;
            let poly = sq * (sq * (sq * T::from_f64(3.0) - T::from_f64(10.0)) + T::from_f64(15.0));

            theta * s + poly * a
        }
    }
}
