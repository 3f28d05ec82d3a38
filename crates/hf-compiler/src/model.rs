//! Compiled single-channel model.
//!
//! A channel's expected count in bin `i` is
//! `max(Σ_s (nominal_si + Σ δ_si(θ)) · Π f_si(θ) · norm_s(θ), MIN_EXPECTED)`
//! where `δ` are HistoSys shifts and `f` are OverallSys factors and per-bin
//! gammas. All evaluation is generic over [`Scalar`].

use hf_ad::{Dual, Scalar};
use hf_core::traits::{LikelihoodModel, Model};
use hf_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::dataset::BinnedDataset;
use crate::interp::{self, HistoSysInterp, OverallSysInterp};
use crate::normfactor::SampleNormalization;
use crate::observable::Observable;
use crate::registry::{ConstraintTerm, ParamRole, ParameterRegistry, ParameterTable, RegistryId};

/// Floor applied to every channel-total expected count.
pub const MIN_EXPECTED: f64 = 1e-10;

/// A compiled systematic acting on one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Modifier {
    /// Yield factor interpolated in one Alpha parameter.
    OverallSys {
        /// Parameter index.
        param: usize,
        /// Factor at −1σ.
        low: f64,
        /// Factor at +1σ.
        high: f64,
        /// Interpolation scheme.
        interp: OverallSysInterp,
    },
    /// Additive per-bin shift interpolated in one Alpha parameter.
    HistoSys {
        /// Parameter index.
        param: usize,
        /// Down template.
        low: Vec<f64>,
        /// Up template.
        high: Vec<f64>,
        /// Interpolation scheme.
        interp: HistoSysInterp,
    },
    /// One multiplicative parameter per bin (ShapeSys, StatError, ShapeFactor).
    PerBin {
        /// Systematic the parameters belong to.
        source: String,
        /// Parameter index per bin.
        params: Vec<usize>,
    },
}

impl Modifier {
    fn remapped(&self, map: &[usize]) -> Self {
        match self {
            Modifier::OverallSys { param, low, high, interp } => {
                Modifier::OverallSys { param: map[*param], low: *low, high: *high, interp: *interp }
            }
            Modifier::HistoSys { param, low, high, interp } => Modifier::HistoSys {
                param: map[*param],
                low: low.clone(),
                high: high.clone(),
                interp: *interp,
            },
            Modifier::PerBin { source, params } => Modifier::PerBin {
                source: source.clone(),
                params: params.iter().map(|&i| map[i]).collect(),
            },
        }
    }
}

/// One sample after compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledSample {
    /// Sample name.
    pub name: String,
    /// Nominal bin contents.
    pub nominal: Vec<f64>,
    /// Normalization.
    pub normalization: SampleNormalization,
    /// Modifiers in declaration order.
    pub modifiers: Vec<Modifier>,
}

impl CompiledSample {
    /// Unfloored expected counts of this sample.
    pub fn expected<T: Scalar>(&self, params: &[T]) -> Vec<T> {
        let n = self.nominal.len();
        let mut deltas = vec![T::from_f64(0.0); n];
        let mut factors = vec![T::from_f64(1.0); n];

        for modifier in &self.modifiers {
            match modifier {
                Modifier::OverallSys { param, low, high, interp } => {
                    let f = interp::overall_factor(params[*param], *low, *high, *interp);
                    for fac in &mut factors {
                        *fac = *fac * f;
                    }
                }
                Modifier::HistoSys { param, low, high, interp } => {
                    let theta = params[*param];
                    for (i, slot) in deltas.iter_mut().enumerate() {
                        *slot = *slot
                            + interp::histo_delta(theta, low[i], self.nominal[i], high[i], *interp);
                    }
                }
                Modifier::PerBin { params: idx, .. } => {
                    for (fac, &p) in factors.iter_mut().zip(idx) {
                        *fac = *fac * params[p];
                    }
                }
            }
        }

        let norm = self.normalization.value(params);
        self.nominal
            .iter()
            .zip(deltas)
            .zip(factors)
            .map(|((&nom, delta), fac)| (T::from_f64(nom) + delta) * fac * norm)
            .collect()
    }

    /// Copy with all parameter indices remapped through `map`.
    pub fn remapped(&self, map: &[usize]) -> Self {
        Self {
            name: self.name.clone(),
            nominal: self.nominal.clone(),
            normalization: self.normalization.remapped(map),
            modifiers: self.modifiers.iter().map(|m| m.remapped(map)).collect(),
        }
    }
}

/// Sum of sample expectations, floored at [`MIN_EXPECTED`].
pub(crate) fn total_expected<T: Scalar>(samples: &[CompiledSample], n_bins: usize, params: &[T]) -> Vec<T> {
    let mut total = vec![T::from_f64(0.0); n_bins];
    for sample in samples {
        for (t, v) in total.iter_mut().zip(sample.expected(params)) {
            *t = *t + v;
        }
    }
    total.into_iter().map(|v| v.max_s(T::from_f64(MIN_EXPECTED))).collect()
}

/// Σ Poisson NLL of `counts` given `expected`.
pub(crate) fn poisson_nll<T: Scalar>(counts: &[f64], expected: &[T]) -> T {
    counts
        .iter()
        .zip(expected)
        .map(|(&n, &nu)| hf_prob::poisson::nll(n, nu))
        .sum()
}

/// Forward-mode gradient of `f`, one dual pass per parameter.
pub(crate) fn dual_gradient<F>(params: &[f64], i: usize, f: &F) -> Result<f64>
where
    F: Fn(&[Dual]) -> Result<Dual>,
{
    let dual: Vec<Dual> = params
        .iter()
        .enumerate()
        .map(|(j, &v)| if j == i { Dual::var(v) } else { Dual::constant(v) })
        .collect();
    Ok(f(&dual)?.dot)
}

/// Recoverable oddity found while compiling a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompileWarning {
    /// Nominal bin at or below zero; floored at evaluation.
    NonPositiveNominal {
        /// Sample name.
        sample: String,
        /// Bin index.
        bin: usize,
        /// Offending value.
        value: f64,
    },
    /// StatError widths derived from the sample's own statistical errors.
    DerivedStatError {
        /// Sample name.
        sample: String,
    },
    /// Zero-width gamma left free and unconstrained.
    FreeDegenerateGamma {
        /// Parameter name.
        parameter: String,
    },
}

/// One [`CompileWarning::FreeDegenerateGamma`] per free, unconstrained gamma in `table`.
pub(crate) fn free_degenerate_gammas(table: &ParameterTable) -> Vec<CompileWarning> {
    table
        .iter()
        .filter(|p| p.role == ParamRole::Gamma && p.constraint.is_none() && !p.fixed)
        .map(|p| CompileWarning::FreeDegenerateGamma { parameter: p.name.clone() })
        .collect()
}

/// Fully wired model of one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledChannelModel {
    /// Channel name.
    pub name: String,
    /// Registry the parameters came from.
    pub registry_id: RegistryId,
    /// Observables (not namespaced).
    pub observables: Vec<Observable>,
    /// Compiled samples.
    pub samples: Vec<CompiledSample>,
    /// Parameters referenced by this channel, in first-use order.
    pub parameters: ParameterTable,
    /// Observed data.
    pub dataset: BinnedDataset,
    /// Warnings raised during compilation.
    pub warnings: Vec<CompileWarning>,
}

impl CompiledChannelModel {
    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.dataset.n_bins()
    }

    fn check_len(&self, n: usize) -> Result<()> {
        if n != self.parameters.len() {
            return Err(Error::Validation(format!(
                "channel '{}' expects {} parameters, got {}",
                self.name,
                self.parameters.len(),
                n
            )));
        }
        Ok(())
    }

    /// Floored per-bin expected counts.
    pub fn expected_counts<T: Scalar>(&self, params: &[T]) -> Result<Vec<T>> {
        self.check_len(params.len())?;
        Ok(total_expected(&self.samples, self.n_bins(), params))
    }

    /// Replace every parameter with the registry's instance of the same name.
    ///
    /// Used after a channel compiled in a registry scope has been committed:
    /// a name first registered by an earlier channel keeps that channel's settings.
    pub fn refresh_parameters(&mut self, registry: &ParameterRegistry) -> Result<()> {
        if registry.id() != self.registry_id {
            return Err(Error::Computation(format!(
                "channel '{}' was compiled against another registry",
                self.name
            )));
        }
        self.parameters.refresh_from(registry)?;
        self.warnings.retain(|w| !matches!(w, CompileWarning::FreeDegenerateGamma { .. }));
        self.warnings.extend(free_degenerate_gammas(&self.parameters));
        Ok(())
    }

    /// Generic NLL: main-bin Poisson terms plus every constraint term.
    pub fn nll_generic<T: Scalar>(&self, params: &[T]) -> Result<T> {
        let expected = self.expected_counts(params)?;
        let mut nll = poisson_nll(&self.dataset.counts, &expected);
        for (i, term) in self.parameters.constraints() {
            nll = nll + term.nll(params[i])?;
        }
        Ok(nll)
    }

    /// Negative log-likelihood.
    pub fn nll(&self, params: &[f64]) -> Result<f64> {
        self.nll_generic(params)
    }

    /// Gradient of the NLL via forward-mode AD.
    pub fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        self.check_len(params.len())?;
        (0..params.len())
            .map(|i| dual_gradient(params, i, &|p: &[Dual]| self.nll_generic(p)))
            .collect()
    }

    /// Constraint terms introduced or referenced by this channel.
    pub fn constraint_terms(&self) -> Vec<&ConstraintTerm> {
        self.parameters.constraints().map(|(_, c)| c).collect()
    }
}

impl Model for CompiledChannelModel {
    fn n_parameters(&self) -> usize {
        self.parameters.len()
    }

    fn parameter_names(&self) -> Vec<String> {
        self.parameters.names()
    }

    fn parameter_bounds(&self) -> Vec<(f64, f64)> {
        self.parameters.bounds()
    }
}

impl LikelihoodModel for CompiledChannelModel {
    fn parameter_init(&self) -> Vec<f64> {
        self.parameters.inits()
    }

    fn nll(&self, params: &[f64]) -> Result<f64> {
        CompiledChannelModel::nll(self, params)
    }

    fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
        self.gradient(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Normalization;
    use approx::assert_relative_eq;

    fn norm(factors: Vec<usize>) -> SampleNormalization {
        SampleNormalization { convention: Normalization::Absolute, factors, lumi: None, ratio: 1.0 }
    }

    fn sample() -> CompiledSample {
        CompiledSample {
            name: "s".into(),
            nominal: vec![10.0, 20.0],
            normalization: norm(vec![0]),
            modifiers: vec![
                Modifier::OverallSys { param: 1, low: 0.9, high: 1.2, interp: OverallSysInterp::Linear },
                Modifier::HistoSys {
                    param: 2,
                    low: vec![8.0, 18.0],
                    high: vec![13.0, 22.0],
                    interp: HistoSysInterp::PolyLinear,
                },
                Modifier::PerBin { source: "g".into(), params: vec![3, 4] },
            ],
        }
    }

    #[test]
    fn test_neutral_parameters_give_nominal() {
        let out: Vec<f64> = sample().expected(&[1.0, 0.0, 0.0, 1.0, 1.0]);
        assert_eq!(out, vec![10.0, 20.0]);
    }

    #[test]
    fn test_combination_order() {
        // (nominal + delta) * overall * gamma * norm
        let out: Vec<f64> = sample().expected(&[2.0, 1.0, 1.0, 0.5, 1.0]);
        assert_relative_eq!(out[0], 13.0 * 1.2 * 0.5 * 2.0, epsilon = 1e-12);
        assert_relative_eq!(out[1], 22.0 * 1.2 * 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_remapped_indices() {
        let map = vec![7, 6, 5, 4, 3];
        let s = sample().remapped(&map);
        assert_eq!(s.normalization.factors, vec![7]);
        assert!(matches!(s.modifiers[0], Modifier::OverallSys { param: 6, .. }));
        assert!(matches!(&s.modifiers[2], Modifier::PerBin { params, .. } if params == &vec![4, 3]));
    }

    #[test]
    fn test_total_is_floored() {
        let zero = CompiledSample {
            name: "z".into(),
            nominal: vec![0.0, -1.0],
            normalization: norm(vec![]),
            modifiers: vec![],
        };
        let out: Vec<f64> = total_expected(&[zero], 2, &[]);
        assert!(out.iter().all(|&v| v > 0.0 && v < 1e-9));
    }
}
