//! JSON artifacts for compiled models.

use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use hf_core::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::combine::CompiledCombinedModel;
use crate::config::Configuration;
use crate::model::CompiledChannelModel;

/// `<prefix>_combined_<measurement>_model.json`
pub fn combined_path(prefix: &str, measurement: &str) -> PathBuf {
    PathBuf::from(format!("{}_combined_{}_model.json", prefix, measurement))
}

/// `<prefix>_<channel>_<measurement>_model.json`
pub fn channel_path(prefix: &str, channel: &str, measurement: &str) -> PathBuf {
    PathBuf::from(format!("{}_{}_{}_model.json", prefix, channel, measurement))
}

/// A file that could not be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistFailure {
    /// Target path.
    pub path: PathBuf,
    /// Rendered error.
    pub error: String,
}

/// Outcome of a persistence pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistReport {
    /// Files written.
    pub written: Vec<PathBuf>,
    /// Files that failed.
    pub failures: Vec<PersistFailure>,
}

/// Write a value as pretty JSON, creating parent directories as needed.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let mut w = BufWriter::new(fs::File::create(path)?);
    serde_json::to_writer_pretty(&mut w, value)?;
    w.flush()?;
    Ok(())
}

/// Read a JSON artifact.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let r = BufReader::new(fs::File::open(path)?);
    Ok(serde_json::from_reader(r)?)
}

/// Persist the models the configuration asks for.
///
/// Nothing is written without a prefix. Failures are collected, never raised.
pub fn persist_models(
    prefix: Option<&str>,
    config: &Configuration,
    combined: &CompiledCombinedModel,
    channels: &[CompiledChannelModel],
) -> PersistReport {
    let mut report = PersistReport::default();
    let Some(prefix) = prefix else {
        log::debug!("no output prefix; skipping persistence");
        return report;
    };

    let mut record = |path: PathBuf, outcome: Result<()>| match outcome {
        Ok(()) => {
            log::info!("wrote {}", path.display());
            report.written.push(path);
        }
        Err(e) => {
            log::error!("failed to write {}: {}", path.display(), e);
            report.failures.push(PersistFailure { path, error: e.to_string() });
        }
    };

    if config.create_per_region_workspaces {
        for channel in channels {
            let path = channel_path(prefix, &channel.name, &combined.name);
            let outcome = write_json(&path, channel);
            record(path, outcome);
        }
    }
    if config.create_workspace_file {
        let path = combined_path(prefix, &combined.name);
        let outcome = write_json(&path, combined);
        record(path, outcome);
    }

    report
}
