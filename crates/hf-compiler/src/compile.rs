//! Measurement-level driver: channels in parallel, then combination and persistence.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use hf_core::{Error, ErrorContext, Result};
use rayon::prelude::*;

use crate::channel::{CompileContext, compile_channel};
use crate::combine::{CompiledCombinedModel, combine};
use crate::config::{ChannelFailurePolicy, Configuration, MeasurementSettings};
use crate::measurement::Measurement;
use crate::model::CompiledChannelModel;
use crate::persist::{PersistFailure, persist_models};
use crate::registry::ParameterRegistry;

/// A channel dropped under [`ChannelFailurePolicy::SkipFailed`].
#[derive(Debug)]
pub struct ChannelFailure {
    /// Channel name.
    pub channel: String,
    /// Why it failed.
    pub error: Error,
}

/// Result of compiling a measurement.
#[derive(Debug)]
pub struct CompileOutput {
    /// Joint model over all successfully compiled channels.
    pub combined: CompiledCombinedModel,
    /// Per-channel models, in measurement order.
    pub channels: Vec<CompiledChannelModel>,
    /// Channels skipped because they failed.
    pub failed_channels: Vec<ChannelFailure>,
    /// Artifacts written.
    pub persisted: Vec<PathBuf>,
    /// Artifacts that could not be written.
    pub persistence_failures: Vec<PersistFailure>,
}

/// Compile every channel of `measurement`, combine them and persist the result.
pub fn compile_measurement(measurement: &Measurement, config: &Configuration) -> Result<CompileOutput> {
    let settings = Arc::new(MeasurementSettings::from_measurement(measurement)?);
    if measurement.channels.is_empty() {
        return Err(Error::config(ErrorContext::default(), "measurement has no channels"));
    }
    let mut names = HashSet::new();
    for ch in &measurement.channels {
        if !names.insert(ch.name.as_str()) {
            return Err(Error::config(ErrorContext::channel(&ch.name), "duplicate channel name"));
        }
    }

    log::info!(
        "compiling measurement '{}' ({} channels)",
        measurement.name,
        measurement.channels.len()
    );

    // Channels build in parallel against private scopes; scopes are committed in
    // measurement order so the first channel to use a name defines it.
    let registry = ParameterRegistry::new(settings.clone());
    let staged: Vec<(ParameterRegistry, Result<CompiledChannelModel>)> = measurement
        .channels
        .par_iter()
        .map(|ch| {
            let scope = registry.scope();
            let result = compile_channel(ch, &CompileContext::new(config, &scope));
            (scope, result)
        })
        .collect();

    let mut channels = Vec::with_capacity(staged.len());
    let mut failed_channels = Vec::new();
    for (ch, (scope, result)) in measurement.channels.iter().zip(staged) {
        let result = result.and_then(|mut model| {
            registry.commit(scope).map_err(|e| e.locate(Some(&ch.name), None))?;
            model.refresh_parameters(&registry)?;
            Ok(model)
        });
        match result {
            Ok(model) => channels.push(model),
            Err(error) => match config.on_channel_failure {
                ChannelFailurePolicy::Abort => return Err(error),
                ChannelFailurePolicy::SkipFailed => {
                    log::warn!("skipping channel '{}': {}", ch.name, error);
                    failed_channels.push(ChannelFailure { channel: ch.name.clone(), error });
                }
            },
        }
    }
    if channels.is_empty() {
        return Err(Error::config(ErrorContext::default(), "every channel failed to compile"));
    }

    let combined =
        combine(channels.iter().map(|c| (c.name.clone(), c.clone())).collect(), &settings)?;

    let report = persist_models(measurement.output_prefix.as_deref(), config, &combined, &channels);

    Ok(CompileOutput {
        combined,
        channels,
        failed_channels,
        persisted: report.written,
        persistence_failures: report.failures,
    })
}
