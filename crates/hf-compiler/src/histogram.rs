//! Histogram value type consumed by the compiler.
//!
//! Only what the compiler needs is modelled: 1–3 axes with explicit bin
//! edges, flattened per-cell contents and optional sum of squared weights.
//! Cells are flattened with the x axis running fastest.

use hf_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Relative tolerance used when comparing bin edges.
const EDGE_TOLERANCE: f64 = 1e-9;

/// One histogram axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    /// Axis name (used to name the derived observable).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Axis title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Bin edges (length = n_bins + 1, strictly increasing).
    pub edges: Vec<f64>,
}

impl Axis {
    /// Axis with `n_bins` equal-width bins on `[min, max]`.
    pub fn uniform(n_bins: usize, min: f64, max: f64) -> Self {
        let width = (max - min) / n_bins.max(1) as f64;
        let edges = (0..=n_bins).map(|i| min + width * i as f64).collect();
        Self { name: None, title: None, edges }
    }

    /// Axis with explicit (variable-width) edges.
    pub fn variable(edges: &[f64]) -> Self {
        Self { name: None, title: None, edges: edges.to_vec() }
    }

    /// Set the axis name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.edges.len().saturating_sub(1)
    }

    /// Lower edge of the first bin.
    pub fn min(&self) -> f64 {
        self.edges.first().copied().unwrap_or(0.0)
    }

    /// Upper edge of the last bin.
    pub fn max(&self) -> f64 {
        self.edges.last().copied().unwrap_or(0.0)
    }

    fn validate(&self) -> Result<()> {
        if self.edges.len() < 2 {
            return Err(Error::Validation(format!(
                "axis needs at least 2 edges, got {}",
                self.edges.len()
            )));
        }
        if self.edges.iter().any(|e| !e.is_finite()) {
            return Err(Error::Validation("axis edges must be finite".into()));
        }
        if self.edges.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::Validation("axis edges must be strictly increasing".into()));
        }
        Ok(())
    }

    fn same_edges(&self, other: &Axis) -> bool {
        self.edges.len() == other.edges.len()
            && self
                .edges
                .iter()
                .zip(&other.edges)
                .all(|(a, b)| (a - b).abs() <= EDGE_TOLERANCE * a.abs().max(b.abs()).max(1.0))
    }
}

/// A binned histogram with 1 to 3 axes.
///
/// Deserialized histograms are validated like [`Histogram::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawHistogram")]
pub struct Histogram {
    /// Histogram name.
    pub name: String,
    /// Axes (x, y, z).
    pub axes: Vec<Axis>,
    /// Per-cell contents (x fastest), excluding under/overflow.
    pub contents: Vec<f64>,
    /// Per-cell sum of squared fill weights, if recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sumw2: Option<Vec<f64>>,
}

#[derive(Deserialize)]
struct RawHistogram {
    name: String,
    axes: Vec<Axis>,
    contents: Vec<f64>,
    #[serde(default)]
    sumw2: Option<Vec<f64>>,
}

impl TryFrom<RawHistogram> for Histogram {
    type Error = Error;

    fn try_from(raw: RawHistogram) -> Result<Self> {
        let hist = Histogram { name: raw.name, axes: raw.axes, contents: raw.contents, sumw2: raw.sumw2 };
        hist.validate()?;
        Ok(hist)
    }
}

impl Histogram {
    /// Create a histogram, checking that `contents` matches the axes.
    pub fn new(name: impl Into<String>, axes: Vec<Axis>, contents: Vec<f64>) -> Result<Self> {
        let hist = Self { name: name.into(), axes, contents, sumw2: None };
        hist.validate()?;
        Ok(hist)
    }

    /// One-dimensional histogram with equal-width bins on `[min, max]`.
    pub fn uniform_1d(
        name: impl Into<String>,
        min: f64,
        max: f64,
        contents: Vec<f64>,
    ) -> Result<Self> {
        let axis = Axis::uniform(contents.len(), min, max);
        Self::new(name, vec![axis], contents)
    }

    /// Attach per-cell sum of squared weights.
    pub fn with_sumw2(mut self, sumw2: Vec<f64>) -> Result<Self> {
        if sumw2.len() != self.contents.len() {
            return Err(Error::Validation(format!(
                "histogram '{}': sumw2 length {} != {} cells",
                self.name,
                sumw2.len(),
                self.contents.len()
            )));
        }
        self.sumw2 = Some(sumw2);
        Ok(self)
    }

    /// Check axis/content consistency.
    pub fn validate(&self) -> Result<()> {
        if self.axes.is_empty() || self.axes.len() > 3 {
            return Err(Error::Validation(format!(
                "histogram '{}' must have 1 to 3 axes, got {}",
                self.name,
                self.axes.len()
            )));
        }
        for axis in &self.axes {
            axis.validate()
                .map_err(|e| Error::Validation(format!("histogram '{}': {}", self.name, e)))?;
        }
        let expected: usize = self.axes.iter().map(Axis::n_bins).product();
        if self.contents.len() != expected {
            return Err(Error::Validation(format!(
                "histogram '{}': {} contents for {} cells",
                self.name,
                self.contents.len(),
                expected
            )));
        }
        if let Some(sw2) = &self.sumw2
            && sw2.len() != expected
        {
            return Err(Error::Validation(format!(
                "histogram '{}': sumw2 length {} != {} cells",
                self.name,
                sw2.len(),
                expected
            )));
        }
        Ok(())
    }

    /// Number of axes.
    pub fn n_dims(&self) -> usize {
        self.axes.len()
    }

    /// Total number of cells (product of per-axis bin counts).
    pub fn n_bins(&self) -> usize {
        self.contents.len()
    }

    /// Content of cell `i`.
    pub fn content(&self, i: usize) -> f64 {
        self.contents.get(i).copied().unwrap_or(0.0)
    }

    /// Statistical error of cell `i`: `sqrt(sumw2)` if recorded, else `sqrt(|content|)`.
    pub fn error(&self, i: usize) -> f64 {
        match &self.sumw2 {
            Some(sw2) => sw2.get(i).copied().unwrap_or(0.0).max(0.0).sqrt(),
            None => self.content(i).abs().sqrt(),
        }
    }

    /// All per-cell statistical errors.
    pub fn errors(&self) -> Vec<f64> {
        (0..self.n_bins()).map(|i| self.error(i)).collect()
    }

    /// Sum of all cell contents.
    pub fn integral(&self) -> f64 {
        self.contents.iter().sum()
    }

    /// Whether `other` has the same cell count, number of axes and bin edges.
    pub fn same_binning(&self, other: &Histogram) -> bool {
        self.contents.len() == other.contents.len()
            && self.axes.len() == other.axes.len()
            && self.axes.iter().zip(&other.axes).all(|(a, b)| a.same_edges(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_axis_edges() {
        let a = Axis::uniform(4, 0.0, 2.0);
        assert_eq!(a.edges, vec![0.0, 0.5, 1.0, 1.5, 2.0]);
        assert_eq!(a.n_bins(), 4);
        assert_eq!((a.min(), a.max()), (0.0, 2.0));
    }

    #[test]
    fn test_two_dimensional_cells() {
        let h = Histogram::new(
            "h2",
            vec![Axis::uniform(3, 0.0, 3.0), Axis::uniform(2, 0.0, 1.0)],
            vec![1.0; 6],
        )
        .unwrap();
        assert_eq!(h.n_dims(), 2);
        assert_eq!(h.n_bins(), 6);
        assert_eq!(h.integral(), 6.0);
    }

    #[test]
    fn test_rejects_bad_shapes() {
        assert!(Histogram::new("h", vec![Axis::uniform(3, 0.0, 1.0)], vec![1.0; 2]).is_err());
        assert!(Histogram::new("h", vec![], vec![]).is_err());
        assert!(Histogram::new("h", vec![Axis::variable(&[0.0, 2.0, 1.0])], vec![1.0; 2]).is_err());
        let four = vec![Axis::uniform(1, 0.0, 1.0); 4];
        assert!(Histogram::new("h", four, vec![1.0]).is_err());
    }

    #[test]
    fn test_errors_prefer_sumw2() {
        let h = Histogram::uniform_1d("h", 0.0, 2.0, vec![4.0, 9.0]).unwrap();
        assert_eq!(h.errors(), vec![2.0, 3.0]);

        let w = h.with_sumw2(vec![0.25, 1.0]).unwrap();
        assert_eq!(w.errors(), vec![0.5, 1.0]);
    }

    #[test]
    fn test_same_binning() {
        let a = Histogram::uniform_1d("a", 0.0, 1.0, vec![1.0, 2.0]).unwrap();
        let b = Histogram::uniform_1d("b", 0.0, 1.0, vec![5.0, 6.0]).unwrap();
        let c = Histogram::uniform_1d("c", 0.0, 2.0, vec![5.0, 6.0]).unwrap();
        let d = Histogram::uniform_1d("d", 0.0, 1.0, vec![5.0, 6.0, 7.0]).unwrap();
        assert!(a.same_binning(&b));
        assert!(!a.same_binning(&c));
        assert!(!a.same_binning(&d));

        let short = Histogram { name: "s".into(), axes: a.axes.clone(), contents: vec![1.0], sumw2: None };
        assert!(!a.same_binning(&short));
    }

    #[test]
    fn test_deserialize_validates() {
        let ok = r#"{"name":"h","axes":[{"edges":[0.0,1.0,2.0]}],"contents":[1.0,2.0]}"#;
        let h: Histogram = serde_json::from_str(ok).unwrap();
        assert_eq!(h.n_bins(), 2);

        let short = r#"{"name":"h","axes":[{"edges":[0.0,1.0,2.0]}],"contents":[1.0]}"#;
        assert!(serde_json::from_str::<Histogram>(short).is_err());
        let bad_sumw2 = r#"{"name":"h","axes":[{"edges":[0.0,1.0]}],"contents":[1.0],"sumw2":[1.0,1.0]}"#;
        assert!(serde_json::from_str::<Histogram>(bad_sumw2).is_err());
    }
}
