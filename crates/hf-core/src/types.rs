//! Value types exchanged with external fitters

use serde::{Deserialize, Serialize};

/// Result of an (external) maximum-likelihood fit of a compiled model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Parameter names, in the order of `parameters`.
    pub parameter_names: Vec<String>,

    /// Best-fit parameter values
    pub parameters: Vec<f64>,

    /// Parameter uncertainties (sqrt of covariance diagonal)
    pub uncertainties: Vec<f64>,

    /// Covariance matrix (row-major, N×N). `None` if the fitter could not provide one.
    pub covariance: Option<Vec<f64>>,

    /// Negative log-likelihood at minimum
    pub nll: f64,

    /// Convergence status
    pub converged: bool,
}

impl FitResult {
    /// Create a fit result without covariance.
    pub fn new(
        parameter_names: Vec<String>,
        parameters: Vec<f64>,
        uncertainties: Vec<f64>,
        nll: f64,
        converged: bool,
    ) -> Self {
        Self { parameter_names, parameters, uncertainties, covariance: None, nll, converged }
    }

    /// Attach a row-major covariance matrix.
    pub fn with_covariance(mut self, covariance: Vec<f64>) -> Self {
        self.covariance = Some(covariance);
        self
    }

    /// Index of a parameter by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.parameter_names.iter().position(|n| n == name)
    }

    /// Get correlation matrix element (i, j). Returns `None` if covariance is unavailable.
    pub fn correlation(&self, i: usize, j: usize) -> Option<f64> {
        let cov = self.covariance.as_ref()?;
        let n = self.parameters.len();
        if i >= n || j >= n || cov.len() != n * n {
            return None;
        }
        let sigma_i = self.uncertainties.get(i).copied()?;
        let sigma_j = self.uncertainties.get(j).copied()?;
        if sigma_i <= 0.0 || sigma_j <= 0.0 {
            return None;
        }
        Some(cov[i * n + j] / (sigma_i * sigma_j))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_from_covariance() {
        let result = FitResult::new(
            vec!["mu".into(), "JES".into()],
            vec![1.0, 0.1],
            vec![2.0, 0.5],
            12.5,
            true,
        )
        .with_covariance(vec![4.0, 0.5, 0.5, 0.25]);

        assert_eq!(result.index_of("JES"), Some(1));
        assert!((result.correlation(0, 1).unwrap() - 0.5).abs() < 1e-12);
        assert!((result.correlation(1, 1).unwrap() - 1.0).abs() < 1e-12);
        assert!(result.correlation(0, 2).is_none());
    }

    #[test]
    fn test_no_covariance() {
        let result = FitResult::new(vec!["mu".into()], vec![1.0], vec![0.1], 0.0, false);
        assert!(result.correlation(0, 0).is_none());
    }
}
