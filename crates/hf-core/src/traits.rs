//! Core traits
//!
//! Compiled models implement these so that an external minimizer can drive
//! them without knowing anything about channels, samples or systematics.

use crate::Result;

/// Statistical model trait
pub trait Model: Send + Sync {
    /// Number of parameters
    fn n_parameters(&self) -> usize;

    /// Parameter names
    fn parameter_names(&self) -> Vec<String>;

    /// Parameter bounds (min, max)
    fn parameter_bounds(&self) -> Vec<(f64, f64)>;
}

/// A model exposing a negative log-likelihood and its gradient.
pub trait LikelihoodModel: Model {
    /// Initial (pre-fit) parameter values.
    fn parameter_init(&self) -> Vec<f64>;

    /// Negative log-likelihood at `params`.
    fn nll(&self, params: &[f64]) -> Result<f64>;

    /// Gradient of the negative log-likelihood at `params`.
    fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Quadratic;

    impl Model for Quadratic {
        fn n_parameters(&self) -> usize {
            1
        }

        fn parameter_names(&self) -> Vec<String> {
            vec!["x".to_string()]
        }

        fn parameter_bounds(&self) -> Vec<(f64, f64)> {
            vec![(-10.0, 10.0)]
        }
    }

    impl LikelihoodModel for Quadratic {
        fn parameter_init(&self) -> Vec<f64> {
            vec![0.0]
        }

        fn nll(&self, params: &[f64]) -> Result<f64> {
            Ok(0.5 * params[0] * params[0])
        }

        fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
            Ok(vec![params[0]])
        }
    }

    #[test]
    fn test_trait_objects() {
        let m: Box<dyn LikelihoodModel> = Box::new(Quadratic);
        assert_eq!(m.n_parameters(), 1);
        assert_eq!(m.nll(&[2.0]).unwrap(), 2.0);
        assert_eq!(m.grad_nll(&[2.0]).unwrap(), vec![2.0]);
    }
}
