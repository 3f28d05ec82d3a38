//! Compiler configuration and measurement-wide settings.

use std::collections::{BTreeMap, BTreeSet};

use hf_core::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};

use crate::interp::{HistoSysInterp, OverallSysInterp};
use crate::measurement::{ConstraintOverride, Measurement};

/// What to do when one channel fails to compile.
///
/// There is no default; callers choose explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelFailurePolicy {
    /// Abort the whole run on the first failed channel.
    Abort,
    /// Drop failed channels and combine the rest.
    SkipFailed,
}

/// Immutable compiler options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Fix zero-width gammas at 1 instead of leaving them free.
    #[serde(default = "default_true")]
    pub binned_fit_optimization: bool,
    /// Persist the combined model.
    #[serde(default = "default_true")]
    pub create_workspace_file: bool,
    /// Persist one model per channel.
    #[serde(default = "default_true")]
    pub create_per_region_workspaces: bool,
    /// Keep per-bin data errors in the binned dataset.
    #[serde(default)]
    pub store_data_error: bool,
    /// OverallSys interpolation.
    #[serde(default)]
    pub overall_sys_interp: OverallSysInterp,
    /// HistoSys interpolation.
    #[serde(default)]
    pub histo_sys_interp: HistoSysInterp,
    /// Channel failure handling.
    pub on_channel_failure: ChannelFailurePolicy,
}

fn default_true() -> bool {
    true
}

impl Configuration {
    /// Configuration with default options and the given failure policy.
    pub fn new(on_channel_failure: ChannelFailurePolicy) -> Self {
        Self {
            binned_fit_optimization: true,
            create_workspace_file: true,
            create_per_region_workspaces: true,
            store_data_error: false,
            overall_sys_interp: OverallSysInterp::default(),
            histo_sys_interp: HistoSysInterp::default(),
            on_channel_failure,
        }
    }

    /// Toggle binned-fit optimization.
    pub fn with_binned_fit_optimization(mut self, on: bool) -> Self {
        self.binned_fit_optimization = on;
        self
    }

    /// Toggle persistence of the combined model and per-channel models.
    pub fn with_persistence(mut self, combined: bool, per_region: bool) -> Self {
        self.create_workspace_file = combined;
        self.create_per_region_workspaces = per_region;
        self
    }

    /// Toggle storing data errors.
    pub fn with_store_data_error(mut self, on: bool) -> Self {
        self.store_data_error = on;
        self
    }

    /// Select interpolation schemes.
    pub fn with_interpolation(mut self, overall: OverallSysInterp, histo: HistoSysInterp) -> Self {
        self.overall_sys_interp = overall;
        self.histo_sys_interp = histo;
        self
    }
}

/// Measurement-wide settings threaded through every compilation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSettings {
    /// Measurement name.
    pub name: String,
    /// Parameters of interest.
    pub pois: Vec<String>,
    /// Nominal luminosity.
    pub lumi: f64,
    /// Relative luminosity uncertainty.
    pub lumi_rel_err: f64,
    /// Initial-value overrides.
    pub param_values: BTreeMap<String, f64>,
    /// Constant parameters.
    pub const_params: BTreeSet<String>,
    /// Constraint-shape overrides.
    pub constraint_overrides: BTreeMap<String, ConstraintOverride>,
    /// Opaque preprocessing expressions.
    pub preprocess_functions: Vec<String>,
}

impl Default for MeasurementSettings {
    fn default() -> Self {
        Self {
            name: "measurement".to_string(),
            pois: Vec::new(),
            lumi: 1.0,
            lumi_rel_err: 0.0,
            param_values: BTreeMap::new(),
            const_params: BTreeSet::new(),
            constraint_overrides: BTreeMap::new(),
            preprocess_functions: Vec::new(),
        }
    }
}

impl MeasurementSettings {
    /// Extract and validate the settings of a measurement.
    pub fn from_measurement(measurement: &Measurement) -> Result<Self> {
        let settings = Self {
            name: measurement.name.clone(),
            pois: measurement.pois.clone(),
            lumi: measurement.lumi,
            lumi_rel_err: measurement.lumi_rel_err,
            param_values: measurement.param_values.clone(),
            const_params: measurement.const_params.clone(),
            constraint_overrides: measurement.constraint_overrides.clone(),
            preprocess_functions: measurement.preprocess_functions.clone(),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Check luminosity and override values.
    pub fn validate(&self) -> Result<()> {
        if !self.lumi.is_finite() || self.lumi <= 0.0 {
            return Err(Error::config(
                ErrorContext::systematic("Lumi"),
                format!("luminosity must be finite and > 0, got {}", self.lumi),
            ));
        }
        if !self.lumi_rel_err.is_finite() || self.lumi_rel_err < 0.0 {
            return Err(Error::config(
                ErrorContext::systematic("Lumi"),
                format!("relative luminosity error must be >= 0, got {}", self.lumi_rel_err),
            ));
        }
        if let Some((name, v)) = self.param_values.iter().find(|(_, v)| !v.is_finite()) {
            return Err(Error::config(
                ErrorContext::systematic(name.clone()),
                format!("parameter value override must be finite, got {}", v),
            ));
        }
        for (name, o) in &self.constraint_overrides {
            if let Some(rel) = o.rel_uncertainty
                && (!rel.is_finite() || rel <= 0.0)
            {
                return Err(Error::config(
                    ErrorContext::systematic(name.clone()),
                    format!("constraint override uncertainty must be > 0, got {}", rel),
                ));
            }
        }
        Ok(())
    }

    /// Whether `name` is a parameter of interest.
    pub fn is_poi(&self, name: &str) -> bool {
        self.pois.iter().any(|p| p == name)
    }
}
