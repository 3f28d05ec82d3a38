//! Sample normalization: norm factors, luminosity and the ratio convention.

use std::collections::{BTreeSet, HashMap};

use hf_ad::Scalar;
use hf_core::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};

use crate::measurement::{Channel, Normalization, Sample};
use crate::registry::{FreeRequest, ParamRole, ParameterRegistry, ParameterTable};

/// Compiled normalization of one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleNormalization {
    /// Convention the sample was declared with.
    pub convention: Normalization,
    /// Norm-factor parameter indices (channel-local).
    pub factors: Vec<usize>,
    /// Luminosity parameter index, if the sample scales with luminosity.
    pub lumi: Option<usize>,
    /// Constant `Y_s / Σ Y` for the ratio convention, 1 otherwise.
    pub ratio: f64,
}

impl SampleNormalization {
    /// Overall scale at `params`.
    pub fn value<T: Scalar>(&self, params: &[T]) -> T {
        let mut scale = T::from_f64(self.ratio);
        for &i in &self.factors {
            scale = scale * params[i];
        }
        if let Some(i) = self.lumi {
            scale = scale * params[i];
        }
        scale
    }

    /// Copy with parameter indices remapped through `map`.
    pub fn remapped(&self, map: &[usize]) -> Self {
        Self {
            convention: self.convention,
            factors: self.factors.iter().map(|&i| map[i]).collect(),
            lumi: self.lumi.map(|i| map[i]),
            ratio: self.ratio,
        }
    }
}

/// Reject a norm-factor name used with both conventions inside one channel.
pub fn check_conventions(channel: &Channel) -> Result<()> {
    let mut seen: HashMap<&str, (Normalization, &str)> = HashMap::new();
    for sample in &channel.samples {
        for nf in &sample.norm_factors {
            match seen.get(nf.name.as_str()) {
                Some(&(conv, first)) if conv != sample.normalization => {
                    return Err(Error::config(
                        ErrorContext::channel(&channel.name)
                            .with_sample(&sample.name)
                            .with_systematic(&nf.name),
                        format!(
                            "norm factor used with {:?} here but {:?} in sample '{}'",
                            sample.normalization, conv, first
                        ),
                    ));
                }
                Some(_) => {}
                None => {
                    seen.insert(&nf.name, (sample.normalization, &sample.name));
                }
            }
        }
    }
    Ok(())
}

/// Constant ratio term per sample (1 for absolute samples).
///
/// For a ratio sample `s` the term is `Y_s / Σ Y_s'` over the samples that
/// share at least one norm factor with `s`, `s` included.
pub fn ratio_terms(channel: &Channel) -> Result<Vec<f64>> {
    let yields: Vec<f64> = channel
        .samples
        .iter()
        .map(|s| s.nominal.as_ref().map_or(0.0, |h| h.integral()))
        .collect();

    channel
        .samples
        .iter()
        .enumerate()
        .map(|(i, sample)| {
            if sample.normalization != Normalization::Ratio {
                return Ok(1.0);
            }
            let names: BTreeSet<&str> = sample.norm_factors.iter().map(|n| n.name.as_str()).collect();
            let total: f64 = channel
                .samples
                .iter()
                .zip(&yields)
                .enumerate()
                .filter(|(j, (other, _))| {
                    *j == i || other.norm_factors.iter().any(|n| names.contains(n.name.as_str()))
                })
                .map(|(_, (_, y))| *y)
                .sum();
            if total <= 0.0 {
                return Err(Error::config(
                    ErrorContext::channel(&channel.name).with_sample(&sample.name),
                    format!("ratio normalization needs a positive total yield, got {}", total),
                ));
            }
            Ok(yields[i] / total)
        })
        .collect()
}

/// Resolve the norm factors and luminosity of `sample` and record them in `table`.
pub fn build_normalization(
    sample: &Sample,
    ratio: f64,
    registry: &ParameterRegistry,
    table: &mut ParameterTable,
) -> Result<SampleNormalization> {
    let mut factors = Vec::with_capacity(sample.norm_factors.len());
    for nf in &sample.norm_factors {
        let param = registry
            .resolve_free(FreeRequest {
                name: &nf.name,
                role: ParamRole::NormFactor,
                init: nf.val,
                bounds: (nf.low, nf.high),
                constant: nf.constant,
            })
            .map_err(|e| e.locate(None, Some(&sample.name)))?;
        factors.push(table.insert(param));
    }

    let lumi = if sample.normalize_by_theory {
        Some(table.insert(registry.resolve_lumi()?))
    } else {
        None
    };

    Ok(SampleNormalization { convention: sample.normalization, factors, lumi, ratio })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeasurementSettings;
    use crate::histogram::Histogram;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn hist(contents: Vec<f64>) -> Histogram {
        Histogram::uniform_1d("h", 0.0, 1.0, contents).unwrap()
    }

    fn channel() -> Channel {
        Channel::new("SR", hist(vec![0.0, 0.0]))
            .sample(Sample::new("a", hist(vec![10.0, 20.0])).ratio().normfactor("f"))
            .sample(Sample::new("b", hist(vec![30.0, 40.0])).ratio().normfactor("f"))
            .sample(Sample::new("c", hist(vec![100.0, 0.0])))
    }

    #[test]
    fn test_ratio_terms() {
        let r = ratio_terms(&channel()).unwrap();
        assert_relative_eq!(r[0], 0.3, epsilon = 1e-12);
        assert_relative_eq!(r[1], 0.7, epsilon = 1e-12);
        assert_eq!(r[2], 1.0);
    }

    #[test]
    fn test_convention_mismatch() {
        let ch = channel().sample(Sample::new("d", hist(vec![1.0, 1.0])).normfactor("f"));
        let err = check_conventions(&ch).unwrap_err();
        let ctx = err.context().unwrap();
        assert_eq!(ctx.sample.as_deref(), Some("d"));
        assert_eq!(ctx.systematic.as_deref(), Some("f"));
        assert!(check_conventions(&channel()).is_ok());
    }

    #[test]
    fn test_value() {
        let reg = ParameterRegistry::new(Arc::new(MeasurementSettings::default()));
        let mut table = ParameterTable::default();
        let sample = Sample::new("s", hist(vec![1.0, 1.0])).normfactor("mu").normfactor("k");
        let norm = build_normalization(&sample, 1.0, &reg, &mut table).unwrap();
        assert_eq!(norm.factors, vec![0, 1]);
        assert_eq!(norm.lumi, Some(2));
        let v: f64 = norm.value(&[2.0, 3.0, 1.5]);
        assert_relative_eq!(v, 9.0, epsilon = 1e-12);
    }
}
