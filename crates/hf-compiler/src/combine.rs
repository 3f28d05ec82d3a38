//! Joining compiled channels into one joint likelihood.

use std::collections::{BTreeMap, HashSet};

use hf_ad::{Dual, Scalar};
use hf_core::traits::{LikelihoodModel, Model};
use hf_core::{Error, ErrorContext, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::MeasurementSettings;
use crate::dataset::{ASIMOV_DATASET, BinnedDataset, CombinedDataset, OBSERVED_DATASET};
use crate::model::{CompiledChannelModel, CompiledSample, dual_gradient, poisson_nll, total_expected};
use crate::observable::Observable;
use crate::registry::{ConstraintTerm, LUMI_NAME, Parameter, ParameterTable, RegistryId};

/// Name of the model configuration record.
pub const MODEL_CONFIG_NAME: &str = "ModelConfig";

/// Roles of the variables of a combined model, as a fitter sees them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Record name.
    pub name: String,
    /// Parameters of interest.
    pub pois: Vec<String>,
    /// Floating parameters that are not POIs.
    pub nuisance_parameters: Vec<String>,
    /// Global observables.
    pub global_observables: Vec<String>,
    /// Channel-namespaced observables.
    pub observables: Vec<String>,
}

/// One channel inside a combined model, re-indexed to combined parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedChannel {
    /// Channel name.
    pub name: String,
    /// Name of the channel's expected-count function, `<channel>_model`.
    pub model_name: String,
    /// Observables renamed `<obs>_<channel>`.
    pub observables: Vec<Observable>,
    /// Samples with combined parameter indices.
    pub samples: Vec<CompiledSample>,
    /// Channel-local parameter index → combined index.
    pub param_map: Vec<usize>,
    /// Observed counts.
    pub counts: Vec<f64>,
}

impl CombinedChannel {
    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.counts.len()
    }
}

/// Joint model over all channels with shared parameters merged by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledCombinedModel {
    /// Measurement name.
    pub name: String,
    /// Registry every channel was compiled against.
    pub registry_id: RegistryId,
    /// Channels in combination order.
    pub channels: Vec<CombinedChannel>,
    /// Parameters: POIs first, then by name.
    pub parameters: ParameterTable,
    /// Constraint terms of nuisance parameters, one per name.
    pub constraints: Vec<(usize, ConstraintTerm)>,
    /// Measurement-wide terms (luminosity).
    pub global_terms: Vec<(usize, ConstraintTerm)>,
    /// Variable roles.
    pub model_config: ModelConfig,
    /// Observed data.
    pub dataset: CombinedDataset,
    /// Opaque preprocessing expressions.
    pub preprocess_functions: Vec<String>,
}

/// Combine independently compiled channels.
///
/// All channels must come from the same registry and have distinct names.
pub fn combine(
    channels: Vec<(String, CompiledChannelModel)>,
    settings: &MeasurementSettings,
) -> Result<CompiledCombinedModel> {
    let Some((_, first)) = channels.first() else {
        return Err(Error::config(ErrorContext::default(), "no channels to combine"));
    };
    let registry_id = first.registry_id;

    let mut seen = HashSet::new();
    let mut by_name: BTreeMap<String, Parameter> = BTreeMap::new();
    for (name, model) in &channels {
        if !seen.insert(name.as_str()) {
            return Err(Error::config(ErrorContext::channel(name), "duplicate channel name"));
        }
        if model.registry_id != registry_id {
            return Err(Error::config(
                ErrorContext::channel(name),
                "channel was compiled against a different parameter registry",
            ));
        }
        for p in model.parameters.iter() {
            match by_name.get(&p.name) {
                Some(existing) if existing != p => {
                    return Err(Error::Computation(format!(
                        "parameter '{}' differs between channels of one registry",
                        p.name
                    )));
                }
                Some(_) => {}
                None => {
                    by_name.insert(p.name.clone(), p.clone());
                }
            }
        }
    }

    let mut parameters = ParameterTable::default();
    let mut pois = Vec::new();
    for poi in &settings.pois {
        match by_name.remove(poi) {
            Some(p) => {
                parameters.insert(p);
                pois.push(poi.clone());
            }
            None => log::warn!("parameter of interest '{}' is not used by any channel", poi),
        }
    }
    for (_, p) in by_name {
        parameters.insert(p);
    }

    let mut constraints = Vec::new();
    let mut global_terms = Vec::new();
    for (i, term) in parameters.constraints() {
        if term.parameter == LUMI_NAME {
            global_terms.push((i, term.clone()));
        } else {
            constraints.push((i, term.clone()));
        }
    }

    let mut combined_channels = Vec::with_capacity(channels.len());
    let mut data = Vec::with_capacity(channels.len());
    for (name, model) in channels {
        let param_map = model
            .parameters
            .iter()
            .map(|p| {
                parameters.index_of(&p.name).ok_or_else(|| {
                    Error::Computation(format!("parameter '{}' missing from combined table", p.name))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let observables: Vec<Observable> = model.observables.iter().map(|o| o.namespaced(&name)).collect();
        data.push((
            name.clone(),
            BinnedDataset { observables: observables.clone(), ..model.dataset.clone() },
        ));
        combined_channels.push(CombinedChannel {
            model_name: format!("{}_model", name),
            observables,
            samples: model.samples.iter().map(|s| s.remapped(&param_map)).collect(),
            param_map,
            counts: model.dataset.counts,
            name,
        });
    }

    let global_observables: BTreeMap<String, f64> = constraints
        .iter()
        .chain(&global_terms)
        .map(|(_, t)| (t.global_observable.clone(), t.global_value))
        .collect();

    let model_config = ModelConfig {
        name: MODEL_CONFIG_NAME.to_string(),
        nuisance_parameters: parameters
            .iter()
            .filter(|p| !p.fixed && !pois.contains(&p.name))
            .map(|p| p.name.clone())
            .collect(),
        pois,
        global_observables: global_observables.keys().cloned().collect(),
        observables: combined_channels
            .iter()
            .flat_map(|c| c.observables.iter().map(|o| o.name.clone()))
            .collect(),
    };

    log::info!(
        "combined {} channels: {} parameters, {} constraint terms",
        combined_channels.len(),
        parameters.len(),
        constraints.len() + global_terms.len()
    );

    Ok(CompiledCombinedModel {
        name: settings.name.clone(),
        registry_id,
        channels: combined_channels,
        parameters,
        constraints,
        global_terms,
        model_config,
        dataset: CombinedDataset { name: OBSERVED_DATASET.to_string(), channels: data, global_observables },
        preprocess_functions: settings.preprocess_functions.clone(),
    })
}

impl CompiledCombinedModel {
    fn check_len(&self, n: usize) -> Result<()> {
        if n != self.parameters.len() {
            return Err(Error::Validation(format!(
                "combined model expects {} parameters, got {}",
                self.parameters.len(),
                n
            )));
        }
        Ok(())
    }

    /// Total number of bins over all channels.
    pub fn n_bins(&self) -> usize {
        self.channels.iter().map(CombinedChannel::n_bins).sum()
    }

    /// Index of a parameter by name.
    pub fn parameter_index(&self, name: &str) -> Option<usize> {
        self.parameters.index_of(name)
    }

    /// Floored expected counts of all channels, concatenated.
    pub fn expected_counts<T: Scalar>(&self, params: &[T]) -> Result<Vec<T>> {
        self.check_len(params.len())?;
        Ok(self
            .channels
            .iter()
            .flat_map(|c| total_expected(&c.samples, c.n_bins(), params))
            .collect())
    }

    /// Floored expected counts of one channel.
    pub fn channel_expected<T: Scalar>(&self, channel: &str, params: &[T]) -> Result<Vec<T>> {
        self.check_len(params.len())?;
        let c = self
            .channels
            .iter()
            .find(|c| c.name == channel)
            .ok_or_else(|| Error::Validation(format!("no channel '{}'", channel)))?;
        Ok(total_expected(&c.samples, c.n_bins(), params))
    }

    /// Generic joint NLL: Poisson terms of every channel, each constraint
    /// term once and the global terms.
    pub fn nll_generic<T: Scalar>(&self, params: &[T]) -> Result<T> {
        self.check_len(params.len())?;
        let mut nll = T::from_f64(0.0);
        for c in &self.channels {
            let expected = total_expected(&c.samples, c.n_bins(), params);
            nll = nll + poisson_nll(&c.counts, &expected);
        }
        for (i, term) in self.constraints.iter().chain(&self.global_terms) {
            nll = nll + term.nll(params[*i])?;
        }
        Ok(nll)
    }

    /// Negative log-likelihood.
    pub fn nll(&self, params: &[f64]) -> Result<f64> {
        self.nll_generic(params)
    }

    /// Gradient of the NLL via forward-mode AD, parallel over parameters.
    pub fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        self.check_len(params.len())?;
        (0..params.len())
            .into_par_iter()
            .map(|i| dual_gradient(params, i, &|p: &[Dual]| self.nll_generic(p)))
            .collect()
    }

    /// Asimov dataset: expected counts at the initial parameter values.
    pub fn asimov_dataset(&self) -> Result<CombinedDataset> {
        let init = self.parameters.inits();
        let channels = self
            .channels
            .iter()
            .map(|c| {
                let counts = total_expected(&c.samples, c.n_bins(), &init);
                let dataset = BinnedDataset {
                    name: ASIMOV_DATASET.to_string(),
                    observables: c.observables.clone(),
                    counts,
                    errors: None,
                };
                (c.name.clone(), dataset)
            })
            .collect();
        Ok(CombinedDataset {
            name: ASIMOV_DATASET.to_string(),
            channels,
            global_observables: self.dataset.global_observables.clone(),
        })
    }

    /// Copy of this model fitted against `dataset` instead of the observed data.
    pub fn with_dataset(&self, dataset: &CombinedDataset) -> Result<Self> {
        let mut out = self.clone();
        for c in &mut out.channels {
            let d = dataset.channel(&c.name)?;
            if d.n_bins() != c.n_bins() {
                return Err(Error::Validation(format!(
                    "dataset for channel '{}' has {} bins, expected {}",
                    c.name,
                    d.n_bins(),
                    c.n_bins()
                )));
            }
            c.counts = d.counts.clone();
        }
        out.dataset = dataset.clone();
        Ok(out)
    }

    /// Unique constraint terms, global terms included.
    pub fn constraint_terms(&self) -> Vec<&ConstraintTerm> {
        self.constraints.iter().chain(&self.global_terms).map(|(_, t)| t).collect()
    }

    /// Variable roles.
    pub fn model_config(&self) -> &ModelConfig {
        &self.model_config
    }
}

impl Model for CompiledCombinedModel {
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

impl LikelihoodModel for CompiledCombinedModel {
    fn parameter_init(&self) -> Vec<f64> {
        self.parameters.inits()
    }

    fn nll(&self, params: &[f64]) -> Result<f64> {
        CompiledCombinedModel::nll(self, params)
    }

    fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
        self.gradient(params)
    }
}
