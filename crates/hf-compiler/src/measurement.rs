//! Declarative measurement description: channels, samples and systematics.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::histogram::Histogram;
use crate::registry::ConstraintKind;

/// How a sample's norm factors enter its yield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Yield is the nominal times the product of its norm factors.
    #[default]
    Absolute,
    /// Yield is a fraction of the total over samples sharing a norm factor.
    Ratio,
}

/// Free-floating normalization factor attached to a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormFactor {
    /// Parameter name.
    pub name: String,
    /// Initial value.
    #[serde(default = "default_norm_val")]
    pub val: f64,
    /// Lower bound.
    #[serde(default)]
    pub low: f64,
    /// Upper bound.
    #[serde(default = "default_norm_high")]
    pub high: f64,
    /// Held constant during fits.
    #[serde(default)]
    pub constant: bool,
}

fn default_norm_val() -> f64 {
    1.0
}

fn default_norm_high() -> f64 {
    10.0
}

impl NormFactor {
    /// Norm factor with value 1 and range [0, 10].
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), val: 1.0, low: 0.0, high: 10.0, constant: false }
    }

    /// Set initial value and range.
    pub fn range(mut self, val: f64, low: f64, high: f64) -> Self {
        self.val = val;
        self.low = low;
        self.high = high;
        self
    }

    /// Mark as constant.
    pub fn constant(mut self) -> Self {
        self.constant = true;
        self
    }
}

/// Systematic uncertainty attached to a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Systematic {
    /// Yield-only variation; `low`/`high` are multiplicative factors at ∓1σ.
    #[serde(rename = "overallsys")]
    OverallSys {
        /// Parameter name.
        name: String,
        /// Factor at −1σ (e.g. 0.92).
        low: f64,
        /// Factor at +1σ (e.g. 1.10).
        high: f64,
    },
    /// Shape variation given as down/up templates.
    #[serde(rename = "histosys")]
    HistoSys {
        /// Parameter name.
        name: String,
        /// Template at −1σ.
        low: Histogram,
        /// Template at +1σ.
        high: Histogram,
    },
    /// Per-bin uncorrelated uncertainty with one gamma per bin.
    #[serde(rename = "shapesys")]
    ShapeSys {
        /// Parameter prefix; bins are `<name>_bin<i>`.
        name: String,
        /// Per-bin relative uncertainties.
        rel_errors: Histogram,
        /// Constraint shape.
        #[serde(default = "default_shapesys_constraint")]
        constraint: ConstraintKind,
    },
    /// Template statistical uncertainty, shared by all samples of a channel.
    #[serde(rename = "staterror")]
    StatError {
        /// Per-bin relative uncertainties; derived from the nominal errors if absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rel_errors: Option<Histogram>,
    },
}

fn default_shapesys_constraint() -> ConstraintKind {
    ConstraintKind::Poisson
}

/// A signal or background process template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Sample name.
    pub name: String,
    /// Nominal expected counts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nominal: Option<Histogram>,
    /// Norm-factor convention.
    #[serde(default)]
    pub normalization: Normalization,
    /// Multiply by the luminosity parameter.
    #[serde(default = "default_true")]
    pub normalize_by_theory: bool,
    /// Free normalization factors.
    #[serde(default)]
    pub norm_factors: Vec<NormFactor>,
    /// Free per-bin shape factors.
    #[serde(default)]
    pub shape_factors: Vec<String>,
    /// Attached systematics, in order.
    #[serde(default)]
    pub systematics: Vec<Systematic>,
}

fn default_true() -> bool {
    true
}

impl Sample {
    /// Create a sample from its nominal template.
    pub fn new(name: impl Into<String>, nominal: Histogram) -> Self {
        Self {
            name: name.into(),
            nominal: Some(nominal),
            normalization: Normalization::Absolute,
            normalize_by_theory: true,
            norm_factors: Vec::new(),
            shape_factors: Vec::new(),
            systematics: Vec::new(),
        }
    }

    /// Use the ratio norm-factor convention.
    pub fn ratio(mut self) -> Self {
        self.normalization = Normalization::Ratio;
        self
    }

    /// Do not scale by luminosity (data-driven samples).
    pub fn without_lumi(mut self) -> Self {
        self.normalize_by_theory = false;
        self
    }

    /// Add a norm factor with default range.
    pub fn normfactor(self, name: impl Into<String>) -> Self {
        self.with_normfactor(NormFactor::new(name))
    }

    /// Add a fully specified norm factor.
    pub fn with_normfactor(mut self, factor: NormFactor) -> Self {
        self.norm_factors.push(factor);
        self
    }

    /// Add a free per-bin shape factor.
    pub fn shapefactor(mut self, name: impl Into<String>) -> Self {
        self.shape_factors.push(name.into());
        self
    }

    /// Add an OverallSys.
    pub fn overallsys(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.systematics.push(Systematic::OverallSys { name: name.into(), low, high });
        self
    }

    /// Add a HistoSys.
    pub fn histosys(mut self, name: impl Into<String>, low: Histogram, high: Histogram) -> Self {
        self.systematics.push(Systematic::HistoSys { name: name.into(), low, high });
        self
    }

    /// Add a ShapeSys with a Poisson constraint.
    pub fn shapesys(self, name: impl Into<String>, rel_errors: Histogram) -> Self {
        self.shapesys_with(name, rel_errors, ConstraintKind::Poisson)
    }

    /// Add a ShapeSys with an explicit constraint shape.
    pub fn shapesys_with(
        mut self,
        name: impl Into<String>,
        rel_errors: Histogram,
        constraint: ConstraintKind,
    ) -> Self {
        self.systematics.push(Systematic::ShapeSys { name: name.into(), rel_errors, constraint });
        self
    }

    /// Add a StatError derived from the nominal's own errors.
    pub fn staterror(mut self) -> Self {
        self.systematics.push(Systematic::StatError { rel_errors: None });
        self
    }

    /// Add a StatError with explicit relative uncertainties.
    pub fn staterror_with(mut self, rel_errors: Histogram) -> Self {
        self.systematics.push(Systematic::StatError { rel_errors: Some(rel_errors) });
        self
    }

    /// Whether this sample carries a StatError.
    pub fn has_staterror(&self) -> bool {
        self.systematics.iter().any(|s| matches!(s, Systematic::StatError { .. }))
    }
}

/// Channel-level StatError settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatErrorConfig {
    /// Bins with a smaller combined relative uncertainty get a fixed gamma.
    #[serde(default = "default_rel_error_threshold")]
    pub rel_error_threshold: f64,
    /// Constraint shape (Gaussian or Poisson).
    #[serde(default)]
    pub constraint: ConstraintKind,
}

fn default_rel_error_threshold() -> f64 {
    0.05
}

impl Default for StatErrorConfig {
    fn default() -> Self {
        Self { rel_error_threshold: default_rel_error_threshold(), constraint: ConstraintKind::Gaussian }
    }
}

/// One analysis region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel name.
    pub name: String,
    /// Observed data.
    pub data: Histogram,
    /// StatError settings.
    #[serde(default)]
    pub stat_error_config: StatErrorConfig,
    /// Observable names per axis (empty entries fall back to defaults).
    #[serde(default)]
    pub observable_names: Vec<String>,
    /// Samples, in order.
    #[serde(default)]
    pub samples: Vec<Sample>,
}

impl Channel {
    /// Create an empty channel with observed data.
    pub fn new(name: impl Into<String>, data: Histogram) -> Self {
        Self {
            name: name.into(),
            data,
            stat_error_config: StatErrorConfig::default(),
            observable_names: Vec::new(),
            samples: Vec::new(),
        }
    }

    /// Add a sample.
    pub fn sample(mut self, sample: Sample) -> Self {
        self.samples.push(sample);
        self
    }

    /// Set StatError settings.
    pub fn stat_error_config(mut self, threshold: f64, constraint: ConstraintKind) -> Self {
        self.stat_error_config = StatErrorConfig { rel_error_threshold: threshold, constraint };
        self
    }

    /// Override observable names.
    pub fn observables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.observable_names = names.into_iter().map(Into::into).collect();
        self
    }
}

/// Replacement constraint shape for a named parameter or systematic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConstraintOverride {
    /// Constraint shape.
    pub kind: ConstraintKind,
    /// Relative uncertainty replacing the requested width, if given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rel_uncertainty: Option<f64>,
}

/// Top-level description of one compilation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Measurement name.
    pub name: String,
    /// Prefix for persisted artifacts; nothing is written when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_prefix: Option<String>,
    /// Parameters of interest.
    #[serde(default)]
    pub pois: Vec<String>,
    /// Nominal luminosity.
    #[serde(default = "default_lumi")]
    pub lumi: f64,
    /// Relative luminosity uncertainty (0 fixes the luminosity parameter).
    #[serde(default)]
    pub lumi_rel_err: f64,
    /// Initial-value overrides by parameter name.
    #[serde(default)]
    pub param_values: BTreeMap<String, f64>,
    /// Parameters held constant.
    #[serde(default)]
    pub const_params: BTreeSet<String>,
    /// Constraint-shape overrides by parameter or systematic name.
    #[serde(default)]
    pub constraint_overrides: BTreeMap<String, ConstraintOverride>,
    /// Opaque preprocessing expressions, passed through to the combined model.
    #[serde(default)]
    pub preprocess_functions: Vec<String>,
    /// Channels, in order.
    #[serde(default)]
    pub channels: Vec<Channel>,
}

fn default_lumi() -> f64 {
    1.0
}

impl Measurement {
    /// Empty measurement with luminosity 1 and no uncertainty.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output_prefix: None,
            pois: Vec::new(),
            lumi: 1.0,
            lumi_rel_err: 0.0,
            param_values: BTreeMap::new(),
            const_params: BTreeSet::new(),
            constraint_overrides: BTreeMap::new(),
            preprocess_functions: Vec::new(),
            channels: Vec::new(),
        }
    }

    /// Set the artifact prefix.
    pub fn output_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.output_prefix = Some(prefix.into());
        self
    }

    /// Add a parameter of interest.
    pub fn poi(mut self, name: impl Into<String>) -> Self {
        self.pois.push(name.into());
        self
    }

    /// Set luminosity and its relative uncertainty.
    pub fn lumi(mut self, lumi: f64, rel_err: f64) -> Self {
        self.lumi = lumi;
        self.lumi_rel_err = rel_err;
        self
    }

    /// Override a parameter's initial value.
    pub fn param_value(mut self, name: impl Into<String>, value: f64) -> Self {
        self.param_values.insert(name.into(), value);
        self
    }

    /// Hold a parameter constant.
    pub fn const_param(mut self, name: impl Into<String>) -> Self {
        self.const_params.insert(name.into());
        self
    }

    /// Replace the constraint shape of a parameter or systematic.
    pub fn constraint_override(
        mut self,
        name: impl Into<String>,
        kind: ConstraintKind,
        rel_uncertainty: Option<f64>,
    ) -> Self {
        self.constraint_overrides.insert(name.into(), ConstraintOverride { kind, rel_uncertainty });
        self
    }

    /// Add a preprocessing expression.
    pub fn preprocess(mut self, expr: impl Into<String>) -> Self {
        self.preprocess_functions.push(expr.into());
        self
    }

    /// Add a channel.
    pub fn channel(mut self, channel: Channel) -> Self {
        self.channels.push(channel);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hist(contents: Vec<f64>) -> Histogram {
        Histogram::uniform_1d("h", 0.0, 1.0, contents).unwrap()
    }

    #[test]
    fn test_builders() {
        let sample = Sample::new("ttbar", hist(vec![1.0, 2.0]))
            .normfactor("mu")
            .overallsys("JES", 0.9, 1.1)
            .staterror();
        assert_eq!(sample.norm_factors[0].high, 10.0);
        assert!(sample.has_staterror());
        assert!(matches!(sample.systematics[1], Systematic::StatError { rel_errors: None }));

        let meas = Measurement::new("meas")
            .poi("mu")
            .lumi(1.0, 0.02)
            .const_param("Lumi")
            .channel(Channel::new("SR", hist(vec![3.0, 4.0])).sample(sample));
        assert_eq!(meas.channels[0].samples.len(), 1);
        assert!(meas.const_params.contains("Lumi"));
    }

    #[test]
    fn test_systematic_json_tag() {
        let json = r#"{"type": "overallsys", "name": "JES", "low": 0.92, "high": 1.1}"#;
        let sys: Systematic = serde_json::from_str(json).unwrap();
        assert_eq!(sys, Systematic::OverallSys { name: "JES".into(), low: 0.92, high: 1.1 });

        let stat: Systematic = serde_json::from_str(r#"{"type": "staterror"}"#).unwrap();
        assert_eq!(stat, Systematic::StatError { rel_errors: None });
    }

    #[test]
    fn test_sample_defaults_from_json() {
        let json = r#"{
            "name": "bkg",
            "nominal": {"name": "n", "axes": [{"edges": [0.0, 1.0]}], "contents": [5.0]}
        }"#;
        let sample: Sample = serde_json::from_str(json).unwrap();
        assert_eq!(sample.normalization, Normalization::Absolute);
        assert!(sample.normalize_by_theory);
        assert!(sample.systematics.is_empty());
    }
}
