//! Single-channel compilation.

use hf_core::{Error, ErrorContext, Result};

use crate::config::{Configuration, MeasurementSettings};
use crate::dataset::{BinnedDataset, OBSERVED_DATASET};
use crate::histogram::Histogram;
use crate::measurement::{Channel, Sample, Systematic};
use crate::model::{
    CompileWarning, CompiledChannelModel, CompiledSample, Modifier, free_degenerate_gammas,
};
use crate::normfactor::{build_normalization, check_conventions, ratio_terms};
use crate::observable::derive_observables;
use crate::registry::{
    ConstrainedRequest, ConstraintKind, FreeRequest, ParamRole, Parameter, ParameterRegistry,
    ParameterTable,
};
use crate::uncertainty::{absolute_uncertainty, relative_uncertainty, scale_relative};

/// Range of shape-factor parameters.
const SHAPE_FACTOR_BOUNDS: (f64, f64) = (0.0, 10.0);

/// Everything a channel compilation reads besides the channel itself.
#[derive(Debug, Clone, Copy)]
pub struct CompileContext<'a> {
    /// Compiler options.
    pub config: &'a Configuration,
    /// Run-wide parameter registry.
    pub registry: &'a ParameterRegistry,
}

impl<'a> CompileContext<'a> {
    /// Bundle configuration and registry.
    pub fn new(config: &'a Configuration, registry: &'a ParameterRegistry) -> Self {
        Self { config, registry }
    }

    /// Measurement settings of the registry.
    pub fn settings(&self) -> &MeasurementSettings {
        self.registry.settings()
    }
}

/// Name of the StatError parameter group of `channel`.
pub fn staterror_name(channel: &str) -> String {
    format!("staterror_{}", channel)
}

/// Name of bin `i` of a per-bin parameter group.
pub fn bin_param_name(group: &str, i: usize) -> String {
    format!("{}_bin{}", group, i)
}

/// A systematic's histogram must be well formed and binned like the nominal.
fn check_template(systematic: &str, template: &Histogram, nominal: &Histogram) -> Result<()> {
    let ctx = || ErrorContext::systematic(systematic);
    template
        .validate()
        .map_err(|e| Error::config(ctx(), format!("invalid histogram: {}", e)))?;
    if !template.same_binning(nominal) {
        return Err(Error::config(
            ctx(),
            format!("histogram '{}' binning does not match nominal '{}'", template.name, nominal.name),
        ));
    }
    Ok(())
}

struct ChannelBuilder<'c, 'a> {
    channel: &'c Channel,
    ctx: &'c CompileContext<'a>,
    table: ParameterTable,
    warnings: Vec<CompileWarning>,
}

/// Compile one channel against the shared registry.
pub fn compile_channel(channel: &Channel, ctx: &CompileContext<'_>) -> Result<CompiledChannelModel> {
    let mut builder = ChannelBuilder {
        channel,
        ctx,
        table: ParameterTable::default(),
        warnings: Vec::new(),
    };
    builder.build().map_err(|e| e.locate(Some(&channel.name), None))
}

impl<'c> ChannelBuilder<'c, '_> {
    fn err(&self, sample: Option<&str>, message: impl Into<String>) -> Error {
        let mut context = ErrorContext::channel(&self.channel.name);
        context.sample = sample.map(str::to_string);
        Error::config(context, message)
    }

    fn build(&mut self) -> Result<CompiledChannelModel> {
        let channel = self.channel;
        channel
            .data
            .validate()
            .map_err(|e| self.err(None, format!("invalid data histogram: {}", e)))?;
        if let Some((i, v)) =
            channel.data.contents.iter().enumerate().find(|(_, v)| !v.is_finite() || **v < 0.0)
        {
            return Err(self.err(None, format!("data bin {} has invalid count {}", i, v)));
        }
        if channel.samples.is_empty() {
            return Err(self.err(None, "channel has no samples"));
        }

        let observables = derive_observables(&channel.data, &channel.observable_names)?;
        let nominals = self.check_nominals()?;
        check_conventions(channel)?;
        let ratios = ratio_terms(channel)?;
        let stat_params = self.stat_gammas(&nominals)?;

        let mut samples = Vec::with_capacity(channel.samples.len());
        for ((sample, nominal), ratio) in channel.samples.iter().zip(&nominals).zip(ratios) {
            let compiled = self
                .compile_sample(sample, nominal, ratio, stat_params.as_deref())
                .map_err(|e| e.locate(None, Some(&sample.name)))?;
            samples.push(compiled);
        }

        for warning in free_degenerate_gammas(&self.table) {
            if let CompileWarning::FreeDegenerateGamma { parameter } = &warning {
                log::warn!(
                    "channel '{}': gamma '{}' has zero width and is left free and unconstrained",
                    channel.name,
                    parameter
                );
            }
            self.warnings.push(warning);
        }

        let dataset = BinnedDataset::from_histogram(
            OBSERVED_DATASET,
            &channel.data,
            observables.clone(),
            self.ctx.config.store_data_error,
        );

        log::debug!(
            "compiled channel '{}': {} samples, {} parameters, {} warnings",
            channel.name,
            samples.len(),
            self.table.len(),
            self.warnings.len()
        );

        Ok(CompiledChannelModel {
            name: channel.name.clone(),
            registry_id: self.ctx.registry.id(),
            observables,
            samples,
            parameters: std::mem::take(&mut self.table),
            dataset,
            warnings: std::mem::take(&mut self.warnings),
        })
    }

    /// Every sample must carry a nominal histogram binned like the data.
    fn check_nominals(&self) -> Result<Vec<&'c Histogram>> {
        let channel: &'c Channel = self.channel;
        channel
            .samples
            .iter()
            .map(|sample| {
                let nominal = sample
                    .nominal
                    .as_ref()
                    .ok_or_else(|| self.err(Some(&sample.name), "sample has no nominal histogram"))?;
                nominal.validate().map_err(|e| self.err(Some(&sample.name), e.to_string()))?;
                if !nominal.same_binning(&channel.data) {
                    return Err(self.err(
                        Some(&sample.name),
                        "nominal histogram binning does not match the data",
                    ));
                }
                Ok(nominal)
            })
            .collect()
    }

    /// Resolve the channel's StatError gammas, if any sample asks for them.
    fn stat_gammas(&mut self, nominals: &[&Histogram]) -> Result<Option<Vec<Parameter>>> {
        let channel = self.channel;
        let cfg = channel.stat_error_config;
        if !matches!(cfg.constraint, ConstraintKind::Gaussian | ConstraintKind::Poisson) {
            return Err(self.err(
                None,
                format!("StatError constraint must be Gaussian or Poisson, got {:?}", cfg.constraint),
            ));
        }

        let group = staterror_name(&channel.name);
        let mut abs_errors = Vec::new();
        for (sample, nominal) in channel.samples.iter().zip(nominals) {
            for sys in &sample.systematics {
                let Systematic::StatError { rel_errors } = sys else {
                    continue;
                };
                let abs = match rel_errors {
                    Some(rel) => check_template(&group, rel, nominal)
                        .and_then(|()| scale_relative(&group, nominal, rel))
                        .map_err(|e| e.locate(None, Some(&sample.name)))?,
                    None => {
                        log::info!(
                            "channel '{}': deriving StatError for sample '{}' from its statistical errors",
                            channel.name,
                            sample.name
                        );
                        self.warnings
                            .push(CompileWarning::DerivedStatError { sample: sample.name.clone() });
                        absolute_uncertainty(&group, nominal)
                    }
                };
                abs_errors.push((*nominal, abs));
            }
        }
        if abs_errors.is_empty() {
            return Ok(None);
        }

        let pairs: Vec<(&Histogram, &Histogram)> = abs_errors.iter().map(|(n, a)| (*n, a)).collect();
        let widths = relative_uncertainty(&group, &pairs)?;

        let mut params = Vec::with_capacity(widths.n_bins());
        for (i, &width) in widths.contents.iter().enumerate() {
            let name = bin_param_name(&group, i);
            let req = if width > 0.0 && width < cfg.rel_error_threshold {
                log::debug!(
                    "{}: relative error {:.4} below threshold {}, fixing at 1",
                    name,
                    width,
                    cfg.rel_error_threshold
                );
                ConstrainedRequest::gamma(&name, &group, cfg.constraint, 0.0)
            } else {
                ConstrainedRequest::gamma(&name, &group, cfg.constraint, width)
                    .fix_if_degenerate(self.ctx.config.binned_fit_optimization)
            };
            params.push(self.ctx.registry.resolve_constrained(req)?);
        }
        Ok(Some(params))
    }

    fn compile_sample(
        &mut self,
        sample: &Sample,
        nominal: &Histogram,
        ratio: f64,
        stat_params: Option<&[Parameter]>,
    ) -> Result<CompiledSample> {
        for (bin, &value) in nominal.contents.iter().enumerate() {
            if value <= 0.0 {
                log::warn!(
                    "channel '{}' sample '{}': non-positive nominal {} in bin {}",
                    self.channel.name,
                    sample.name,
                    value,
                    bin
                );
                self.warnings.push(CompileWarning::NonPositiveNominal {
                    sample: sample.name.clone(),
                    bin,
                    value,
                });
            }
        }

        let normalization = build_normalization(sample, ratio, self.ctx.registry, &mut self.table)?;
        let config = self.ctx.config;
        let mut modifiers = Vec::with_capacity(sample.systematics.len() + sample.shape_factors.len());

        for sys in &sample.systematics {
            let modifier = match sys {
                Systematic::OverallSys { name, low, high } => {
                    if !low.is_finite() || !high.is_finite() {
                        return Err(Error::config(
                            ErrorContext::systematic(name.clone()),
                            format!("OverallSys factors must be finite, got low={} high={}", low, high),
                        ));
                    }
                    let param = self.ctx.registry.resolve_constrained(ConstrainedRequest::alpha(name))?;
                    Modifier::OverallSys {
                        param: self.table.insert(param),
                        low: *low,
                        high: *high,
                        interp: config.overall_sys_interp,
                    }
                }
                Systematic::HistoSys { name, low, high } => {
                    check_template(name, low, nominal)?;
                    check_template(name, high, nominal)?;
                    let param = self.ctx.registry.resolve_constrained(ConstrainedRequest::alpha(name))?;
                    Modifier::HistoSys {
                        param: self.table.insert(param),
                        low: low.contents.clone(),
                        high: high.contents.clone(),
                        interp: config.histo_sys_interp,
                    }
                }
                Systematic::ShapeSys { name, rel_errors, constraint } => {
                    check_template(name, rel_errors, nominal)?;
                    let mut params = Vec::with_capacity(rel_errors.n_bins());
                    for (i, &width) in rel_errors.contents.iter().enumerate() {
                        let bin_name = bin_param_name(name, i);
                        let req = ConstrainedRequest::gamma(&bin_name, name, *constraint, width)
                            .fix_if_degenerate(config.binned_fit_optimization);
                        let param = self.ctx.registry.resolve_constrained(req)?;
                        params.push(self.table.insert(param));
                    }
                    Modifier::PerBin { source: name.clone(), params }
                }
                Systematic::StatError { .. } => {
                    let stat = stat_params.ok_or_else(|| {
                        Error::Computation("StatError gammas were not resolved".into())
                    })?;
                    let params = stat.iter().map(|p| self.table.insert(p.clone())).collect();
                    Modifier::PerBin { source: staterror_name(&self.channel.name), params }
                }
            };
            modifiers.push(modifier);
        }

        for name in &sample.shape_factors {
            let mut params = Vec::with_capacity(nominal.n_bins());
            for i in 0..nominal.n_bins() {
                let bin_name = bin_param_name(name, i);
                let param = self.ctx.registry.resolve_free(FreeRequest {
                    name: &bin_name,
                    role: ParamRole::ShapeFactor,
                    init: 1.0,
                    bounds: SHAPE_FACTOR_BOUNDS,
                    constant: false,
                })?;
                params.push(self.table.insert(param));
            }
            modifiers.push(Modifier::PerBin { source: name.clone(), params });
        }

        Ok(CompiledSample {
            name: sample.name.clone(),
            nominal: nominal.contents.clone(),
            normalization,
            modifiers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelFailurePolicy;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn hist(contents: Vec<f64>) -> Histogram {
        Histogram::uniform_1d("h", 0.0, 1.0, contents).unwrap()
    }

    fn registry() -> ParameterRegistry {
        ParameterRegistry::new(Arc::new(MeasurementSettings::default()))
    }

    fn config() -> Configuration {
        Configuration::new(ChannelFailurePolicy::Abort)
    }

    #[test]
    fn test_nominal_only_channel() {
        let (cfg, reg) = (config(), registry());
        let ch = Channel::new("SR", hist(vec![5.0, 6.0]))
            .sample(Sample::new("bkg", hist(vec![4.5, 6.5])).without_lumi());
        let model = compile_channel(&ch, &CompileContext::new(&cfg, &reg)).unwrap();
        assert_eq!(model.parameters.len(), 0);
        assert_eq!(model.expected_counts::<f64>(&[]).unwrap(), vec![4.5, 6.5]);
        assert_eq!(model.observables[0].name, "obs_x");
        assert!(model.warnings.is_empty());
    }

    #[test]
    fn test_missing_nominal_is_configuration_error() {
        let (cfg, reg) = (config(), registry());
        let mut sample = Sample::new("sig", hist(vec![1.0]));
        sample.nominal = None;
        let ch = Channel::new("SR", hist(vec![1.0])).sample(sample);
        let err = compile_channel(&ch, &CompileContext::new(&cfg, &reg)).unwrap_err();
        let ctx = err.context().unwrap();
        assert_eq!(ctx.channel.as_deref(), Some("SR"));
        assert_eq!(ctx.sample.as_deref(), Some("sig"));
    }

    #[test]
    fn test_histosys_binning_mismatch() {
        let (cfg, reg) = (config(), registry());
        let ch = Channel::new("SR", hist(vec![1.0, 1.0])).sample(Sample::new("s", hist(vec![1.0, 1.0])).histosys(
            "shape",
            hist(vec![1.0]),
            hist(vec![1.0, 2.0]),
        ));
        let err = compile_channel(&ch, &CompileContext::new(&cfg, &reg)).unwrap_err();
        let ctx = err.context().unwrap();
        assert_eq!(ctx.systematic.as_deref(), Some("shape"));
        assert_eq!(ctx.sample.as_deref(), Some("s"));
        assert_eq!(ctx.channel.as_deref(), Some("SR"));
    }

    /// Two-bin axis carrying a single content value.
    fn truncated(name: &str) -> Histogram {
        Histogram {
            name: name.into(),
            axes: vec![crate::histogram::Axis::uniform(2, 0.0, 1.0)],
            contents: vec![12.0],
            sumw2: None,
        }
    }

    #[test]
    fn test_malformed_histosys_template_rejected() {
        let (cfg, reg) = (config(), registry());
        let ch = Channel::new("SR", hist(vec![10.0, 10.0])).sample(
            Sample::new("s", hist(vec![10.0, 10.0])).histosys("jes", hist(vec![8.0, 9.0]), truncated("up")),
        );
        let err = compile_channel(&ch, &CompileContext::new(&cfg, &reg)).unwrap_err();
        assert!(err.is_configuration());
        let ctx = err.context().unwrap();
        assert_eq!(ctx.systematic.as_deref(), Some("jes"));
        assert_eq!(ctx.sample.as_deref(), Some("s"));
    }

    #[test]
    fn test_malformed_shapesys_errors_rejected() {
        let (cfg, reg) = (config(), registry());
        let ch = Channel::new("SR", hist(vec![10.0, 10.0]))
            .sample(Sample::new("s", hist(vec![10.0, 10.0])).shapesys("bb", truncated("bb_err")));
        let err = compile_channel(&ch, &CompileContext::new(&cfg, &reg)).unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(err.context().unwrap().systematic.as_deref(), Some("bb"));
        assert!(reg.get("bb_bin0").unwrap().is_none());
    }

    #[test]
    fn test_malformed_staterror_errors_rejected() {
        let (cfg, reg) = (config(), registry());
        let ch = Channel::new("SR", hist(vec![10.0, 10.0]))
            .sample(Sample::new("s", hist(vec![10.0, 10.0])).staterror_with(truncated("stat")));
        let err = compile_channel(&ch, &CompileContext::new(&cfg, &reg)).unwrap_err();
        assert!(err.is_configuration());
        let ctx = err.context().unwrap();
        assert_eq!(ctx.systematic.as_deref(), Some("staterror_SR"));
        assert_eq!(ctx.sample.as_deref(), Some("s"));
    }

    #[test]
    fn test_staterror_widths_and_threshold() {
        let (cfg, reg) = (config(), registry());
        // combined relative errors: bin0 = sqrt(3²+4²)/50 = 0.1, bin1 = 1/100 = 0.01
        let ch = Channel::new("SR", hist(vec![50.0, 100.0]))
            .sample(Sample::new("a", hist(vec![20.0, 50.0])).staterror_with(hist(vec![0.15, 0.02])))
            .sample(Sample::new("b", hist(vec![30.0, 50.0])).staterror_with(hist(vec![4.0 / 30.0, 0.0])));
        let model = compile_channel(&ch, &CompileContext::new(&cfg, &reg)).unwrap();

        let bin0 = model.parameters.by_name("staterror_SR_bin0").unwrap();
        assert_eq!(bin0.role, ParamRole::Gamma);
        assert_relative_eq!(bin0.constraint.as_ref().unwrap().width, 0.1, epsilon = 1e-12);

        let bin1 = model.parameters.by_name("staterror_SR_bin1").unwrap();
        assert!(bin1.fixed);
        assert!(bin1.constraint.is_none());

        // both samples reference the same gammas
        assert_eq!(model.samples[0].modifiers, model.samples[1].modifiers);
        assert_eq!(model.parameters.len(), 3);
    }

    #[test]
    fn test_derived_staterror_warns() {
        let (cfg, reg) = (config(), registry());
        let ch = Channel::new("SR", hist(vec![100.0]))
            .sample(Sample::new("a", hist(vec![100.0])).without_lumi().staterror());
        let model = compile_channel(&ch, &CompileContext::new(&cfg, &reg)).unwrap();
        assert!(model.warnings.contains(&CompileWarning::DerivedStatError { sample: "a".into() }));
        let gamma = model.parameters.by_name("staterror_SR_bin0").unwrap();
        assert_relative_eq!(gamma.constraint.as_ref().unwrap().width, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_width_shapesys_without_optimization_is_free() {
        let cfg = config().with_binned_fit_optimization(false);
        let reg = registry();
        let ch = Channel::new("SR", hist(vec![10.0, 10.0])).sample(
            Sample::new("a", hist(vec![10.0, 10.0])).without_lumi().shapesys("bb", hist(vec![0.0, 0.1])),
        );
        let model = compile_channel(&ch, &CompileContext::new(&cfg, &reg)).unwrap();
        let free = model.parameters.by_name("bb_bin0").unwrap();
        assert!(!free.fixed && free.constraint.is_none());
        assert!(
            model
                .warnings
                .contains(&CompileWarning::FreeDegenerateGamma { parameter: "bb_bin0".into() })
        );
        let constrained = model.parameters.by_name("bb_bin1").unwrap();
        assert_eq!(constrained.constraint.as_ref().unwrap().kind, ConstraintKind::Poisson);
    }

    #[test]
    fn test_non_positive_nominal_warns_and_floors() {
        let (cfg, reg) = (config(), registry());
        let ch = Channel::new("SR", hist(vec![0.0])).sample(Sample::new("a", hist(vec![0.0])).without_lumi());
        let model = compile_channel(&ch, &CompileContext::new(&cfg, &reg)).unwrap();
        assert_eq!(model.warnings.len(), 1);
        let exp = model.expected_counts::<f64>(&[]).unwrap();
        assert!(exp[0] > 0.0 && exp[0] < 1e-9);
    }

    #[test]
    fn test_shape_factor_bins() {
        let (cfg, reg) = (config(), registry());
        let ch = Channel::new("CR", hist(vec![1.0, 2.0, 3.0]))
            .sample(Sample::new("qcd", hist(vec![1.0, 2.0, 3.0])).without_lumi().shapefactor("sf"));
        let model = compile_channel(&ch, &CompileContext::new(&cfg, &reg)).unwrap();
        assert_eq!(model.parameters.names(), vec!["sf_bin0", "sf_bin1", "sf_bin2"]);
        let out = model.expected_counts(&[2.0, 1.0, 0.5]).unwrap();
        assert_eq!(out, vec![2.0, 2.0, 1.5]);
    }

    #[test]
    fn test_negative_data_rejected() {
        let (cfg, reg) = (config(), registry());
        let ch = Channel::new("SR", hist(vec![-1.0])).sample(Sample::new("a", hist(vec![1.0])));
        assert!(compile_channel(&ch, &CompileContext::new(&cfg, &reg)).unwrap_err().is_configuration());
    }
}
