//! Binned datasets attached to compiled models.

use std::collections::BTreeMap;

use hf_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::histogram::Histogram;
use crate::observable::Observable;

/// Name of the observed dataset.
pub const OBSERVED_DATASET: &str = "obsData";
/// Name of the Asimov dataset.
pub const ASIMOV_DATASET: &str = "asimovData";

/// Observed (or Asimov) counts of one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinnedDataset {
    /// Dataset name.
    pub name: String,
    /// Observables the counts are binned in.
    pub observables: Vec<Observable>,
    /// Per-bin counts.
    pub counts: Vec<f64>,
    /// Per-bin errors, when kept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<f64>>,
}

impl BinnedDataset {
    /// Dataset from a data histogram.
    pub fn from_histogram(
        name: impl Into<String>,
        hist: &Histogram,
        observables: Vec<Observable>,
        store_errors: bool,
    ) -> Self {
        Self {
            name: name.into(),
            observables,
            counts: hist.contents.clone(),
            errors: store_errors.then(|| hist.errors()),
        }
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.counts.len()
    }

    /// Sum of counts.
    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }
}

/// Per-channel datasets joined under a channel index, plus global observables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedDataset {
    /// Dataset name.
    pub name: String,
    /// `(channel name, dataset)` in combination order.
    pub channels: Vec<(String, BinnedDataset)>,
    /// Global observable values by name.
    pub global_observables: BTreeMap<String, f64>,
}

impl CombinedDataset {
    /// Dataset of `channel`.
    pub fn channel(&self, channel: &str) -> Result<&BinnedDataset> {
        self.channels
            .iter()
            .find(|(name, _)| name == channel)
            .map(|(_, d)| d)
            .ok_or_else(|| Error::Validation(format!("no dataset for channel '{}'", channel)))
    }

    /// Counts of all channels, concatenated.
    pub fn flat_counts(&self) -> Vec<f64> {
        self.channels.iter().flat_map(|(_, d)| d.counts.iter().copied()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_only_when_requested() {
        let hist = Histogram::uniform_1d("data", 0.0, 1.0, vec![4.0, 9.0]).unwrap();
        let without = BinnedDataset::from_histogram(OBSERVED_DATASET, &hist, vec![], false);
        assert!(without.errors.is_none());
        let with = BinnedDataset::from_histogram(OBSERVED_DATASET, &hist, vec![], true);
        assert_eq!(with.errors, Some(vec![2.0, 3.0]));
        assert_eq!(with.total(), 13.0);
    }

    #[test]
    fn test_combined_lookup() {
        let hist = Histogram::uniform_1d("data", 0.0, 1.0, vec![1.0]).unwrap();
        let ds = CombinedDataset {
            name: OBSERVED_DATASET.into(),
            channels: vec![
                ("A".into(), BinnedDataset::from_histogram("A", &hist, vec![], false)),
                ("B".into(), BinnedDataset::from_histogram("B", &hist, vec![], false)),
            ],
            global_observables: BTreeMap::new(),
        };
        assert_eq!(ds.flat_counts(), vec![1.0, 1.0]);
        assert!(ds.channel("B").is_ok());
        assert!(ds.channel("C").is_err());
    }
}
