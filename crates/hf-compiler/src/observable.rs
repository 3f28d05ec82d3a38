//! Observables derived from histogram axes.

use hf_core::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};

use crate::histogram::Histogram;

/// Default observable names, one per axis.
pub const DEFAULT_OBSERVABLE_NAMES: [&str; 3] = ["obs_x", "obs_y", "obs_z"];

/// A bounded real-valued observable mirroring one histogram axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observable {
    /// Observable name.
    pub name: String,
    /// Lower bound.
    pub min: f64,
    /// Upper bound.
    pub max: f64,
    /// Bin edges.
    pub edges: Vec<f64>,
}

impl Observable {
    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.edges.len().saturating_sub(1)
    }

    /// Copy of this observable renamed to `<name>_<channel>`.
    pub fn namespaced(&self, channel: &str) -> Self {
        Self { name: format!("{}_{}", self.name, channel), ..self.clone() }
    }
}

/// One observable per axis of `hist`.
///
/// Name resolution per axis: non-empty entry in `overrides`, else the axis
/// name, else [`DEFAULT_OBSERVABLE_NAMES`].
pub fn derive_observables(hist: &Histogram, overrides: &[String]) -> Result<Vec<Observable>> {
    if hist.axes.is_empty() || hist.axes.len() > 3 {
        return Err(Error::config(
            ErrorContext::default(),
            format!(
                "histogram '{}' has {} axes; observables support 1 to 3",
                hist.name,
                hist.axes.len()
            ),
        ));
    }
    if overrides.len() > hist.axes.len() {
        return Err(Error::config(
            ErrorContext::default(),
            format!(
                "{} observable names given for {}-dimensional histogram '{}'",
                overrides.len(),
                hist.axes.len(),
                hist.name
            ),
        ));
    }

    Ok(hist
        .axes
        .iter()
        .enumerate()
        .map(|(i, axis)| {
            let name = overrides
                .get(i)
                .filter(|s| !s.is_empty())
                .cloned()
                .or_else(|| axis.name.clone().filter(|s| !s.is_empty()))
                .unwrap_or_else(|| DEFAULT_OBSERVABLE_NAMES[i].to_string());
            Observable { name, min: axis.min(), max: axis.max(), edges: axis.edges.clone() }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::Axis;

    #[test]
    fn test_naming_precedence() {
        let hist = Histogram::new(
            "data",
            vec![
                Axis::uniform(2, 0.0, 100.0).named("mbb"),
                Axis::uniform(2, 0.0, 1.0),
                Axis::uniform(1, -1.0, 1.0).named("eta"),
            ],
            vec![0.0; 4],
        )
        .unwrap();

        let obs = derive_observables(&hist, &["".to_string(), "".to_string(), "abs_eta".into()])
            .unwrap();
        let names: Vec<_> = obs.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["mbb", "obs_y", "abs_eta"]);
        assert_eq!((obs[0].min, obs[0].max), (0.0, 100.0));
        assert_eq!(obs[2].n_bins(), 1);
    }

    #[test]
    fn test_too_many_overrides() {
        let hist = Histogram::uniform_1d("data", 0.0, 1.0, vec![1.0]).unwrap();
        let err = derive_observables(&hist, &["a".into(), "b".into()]).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_namespaced() {
        let hist = Histogram::uniform_1d("data", 0.0, 1.0, vec![1.0]).unwrap();
        let obs = derive_observables(&hist, &[]).unwrap();
        assert_eq!(obs[0].namespaced("SR").name, "obs_x_SR");
    }
}
