//! Single-feature regressors used as the payload of componentwise base learners.

use ndarray::{Array1, ArrayView1};
use crate::error::{SurvivalError, Result};

/// A regression estimator on one input column.
///
/// The boosting engine clones a fresh instance for every candidate feature
/// and stage, so `fit` is always called on an unfitted clone. Estimators that
/// cannot use sample weights may return an error when `sample_weight` is
/// `Some`; the caller then refits without weights.
pub trait Regressor: Clone + Send + Sync {
    fn fit(
        &mut self,
        x: ArrayView1<f64>,
        y: ArrayView1<f64>,
        sample_weight: Option<ArrayView1<f64>>,
    ) -> Result<()>;

    fn predict(&self, x: ArrayView1<f64>) -> Array1<f64>;

    /// `(intercept, slope)` for estimators that are linear in `x`
    fn coefficients(&self) -> Option<(f64, f64)> {
        None
    }
}

fn check_fit_inputs(
    x: ArrayView1<f64>,
    y: ArrayView1<f64>,
    sample_weight: Option<ArrayView1<f64>>,
) -> Result<Array1<f64>> {
    if x.len() != y.len() {
        return Err(SurvivalError::invalid_dimensions(
            format!("x len ({}) != y len ({})", x.len(), y.len())
        ));
    }
    if x.is_empty() {
        return Err(SurvivalError::invalid_dimensions("cannot fit on zero samples"));
    }
    if y.iter().any(|v| !v.is_finite()) {
        return Err(SurvivalError::numerical_error("regression target contains non-finite values"));
    }

    let weights = match sample_weight {
        Some(w) => {
            if w.len() != x.len() {
                return Err(SurvivalError::invalid_dimensions("sample_weight len != n_samples"));
            }
            if w.iter().any(|&v| v < 0.0 || !v.is_finite()) {
                return Err(SurvivalError::invalid_parameter("sample_weight", "negative or non-finite"));
            }
            w.to_owned()
        }
        None => Array1::ones(x.len()),
    };
    if weights.sum() <= 0.0 {
        return Err(SurvivalError::invalid_parameter("sample_weight", "sums to zero"));
    }
    Ok(weights)
}

/// weighted simple linear regression `y = intercept + slope * x`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeastSquaresRegressor {
    intercept: f64,
    slope: f64,
}

impl LeastSquaresRegressor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Regressor for LeastSquaresRegressor {
    fn fit(
        &mut self,
        x: ArrayView1<f64>,
        y: ArrayView1<f64>,
        sample_weight: Option<ArrayView1<f64>>,
    ) -> Result<()> {
        let w = check_fit_inputs(x, y, sample_weight)?;
        let total = w.sum();

        let x_mean = w.dot(&x) / total;
        let y_mean = w.dot(&y) / total;

        let mut sxx = 0.0;
        let mut sxy = 0.0;
        for ((&wi, &xi), &yi) in w.iter().zip(x.iter()).zip(y.iter()) {
            sxx += wi * (xi - x_mean) * (xi - x_mean);
            sxy += wi * (xi - x_mean) * (yi - y_mean);
        }

        // constant column (e.g. the intercept) - fit the mean only
        self.slope = if sxx > f64::EPSILON * total { sxy / sxx } else { 0.0 };
        self.intercept = y_mean - self.slope * x_mean;
        Ok(())
    }

    fn predict(&self, x: ArrayView1<f64>) -> Array1<f64> {
        x.mapv(|v| self.intercept + self.slope * v)
    }

    fn coefficients(&self) -> Option<(f64, f64)> {
        Some((self.intercept, self.slope))
    }
}

/// depth-one weighted regression tree on a single feature
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegressionStump {
    threshold: f64,
    left_value: f64,   // x <= threshold
    right_value: f64,
}

impl RegressionStump {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl Regressor for RegressionStump {
    fn fit(
        &mut self,
        x: ArrayView1<f64>,
        y: ArrayView1<f64>,
        sample_weight: Option<ArrayView1<f64>>,
    ) -> Result<()> {
        let w = check_fit_inputs(x, y, sample_weight)?;
        let n = x.len();

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| x[a].total_cmp(&x[b]));

        let total_w = w.sum();
        let total_wy: f64 = order.iter().map(|&i| w[i] * y[i]).sum();
        let mean = total_wy / total_w;

        // no split: constant prediction
        self.threshold = f64::INFINITY;
        self.left_value = mean;
        self.right_value = mean;

        let total_wyy: f64 = order.iter().map(|&i| w[i] * y[i] * y[i]).sum();
        let mut best_sse = total_wyy - total_wy * total_wy / total_w;

        let (mut left_w, mut left_wy, mut left_wyy) = (0.0, 0.0, 0.0);
        for k in 0..n - 1 {
            let i = order[k];
            left_w += w[i];
            left_wy += w[i] * y[i];
            left_wyy += w[i] * y[i] * y[i];

            let next = order[k + 1];
            if x[next] == x[i] {
                continue;
            }
            let right_w = total_w - left_w;
            if left_w <= 0.0 || right_w <= 0.0 {
                continue;
            }
            let right_wy = total_wy - left_wy;
            let right_wyy = total_wyy - left_wyy;
            let sse = (left_wyy - left_wy * left_wy / left_w)
                + (right_wyy - right_wy * right_wy / right_w);

            if sse < best_sse {
                best_sse = sse;
                self.threshold = 0.5 * (x[i] + x[next]);
                self.left_value = left_wy / left_w;
                self.right_value = right_wy / right_w;
            }
        }
        Ok(())
    }

    fn predict(&self, x: ArrayView1<f64>) -> Array1<f64> {
        x.mapv(|v| if v <= self.threshold { self.left_value } else { self.right_value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_least_squares_exact_line() {
        let x = array![0.0, 1.0, 2.0, 3.0];
        let y = array![1.0, 3.0, 5.0, 7.0];
        let mut regr = LeastSquaresRegressor::new();
        regr.fit(x.view(), y.view(), None).unwrap();

        let (intercept, slope) = regr.coefficients().unwrap();
        assert_relative_eq!(intercept, 1.0, epsilon = 1e-12);
        assert_relative_eq!(slope, 2.0, epsilon = 1e-12);
        assert_relative_eq!(regr.predict(array![10.0].view())[0], 21.0, epsilon = 1e-10);
    }

    #[test]
    fn test_least_squares_weights() {
        let x = array![0.0, 1.0, 2.0];
        let y = array![0.0, 1.0, 10.0];
        let w = array![1.0, 1.0, 0.0];
        let mut regr = LeastSquaresRegressor::new();
        regr.fit(x.view(), y.view(), Some(w.view())).unwrap();

        // zero-weight point is ignored
        let (intercept, slope) = regr.coefficients().unwrap();
        assert_relative_eq!(intercept, 0.0, epsilon = 1e-12);
        assert_relative_eq!(slope, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_least_squares_constant_column() {
        let x = array![1.0, 1.0, 1.0];
        let y = array![1.0, 2.0, 6.0];
        let mut regr = LeastSquaresRegressor::new();
        regr.fit(x.view(), y.view(), None).unwrap();

        let (intercept, slope) = regr.coefficients().unwrap();
        assert_eq!(slope, 0.0);
        assert_relative_eq!(intercept, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_bad_weights_rejected() {
        let x = array![0.0, 1.0];
        let y = array![0.0, 1.0];
        let mut regr = LeastSquaresRegressor::new();
        assert!(regr.fit(x.view(), y.view(), Some(array![0.0, 0.0].view())).is_err());
        assert!(regr.fit(x.view(), y.view(), Some(array![-1.0, 2.0].view())).is_err());
        assert!(regr.fit(x.view(), y.view(), Some(array![1.0].view())).is_err());
    }

    #[test]
    fn test_stump_finds_split() {
        let x = array![1.0, 2.0, 3.0, 10.0, 11.0, 12.0];
        let y = array![0.0, 0.0, 0.0, 5.0, 5.0, 5.0];
        let mut stump = RegressionStump::new();
        stump.fit(x.view(), y.view(), None).unwrap();

        assert_relative_eq!(stump.threshold(), 6.5);
        assert_eq!(stump.predict(array![0.0, 7.0].view()), array![0.0, 5.0]);
        assert!(stump.coefficients().is_none());
    }

    #[test]
    fn test_stump_constant_feature() {
        let x = array![2.0, 2.0, 2.0];
        let y = array![1.0, 2.0, 3.0];
        let mut stump = RegressionStump::new();
        stump.fit(x.view(), y.view(), None).unwrap();

        assert_eq!(stump.predict(array![2.0, 100.0].view()), array![2.0, 2.0]);
    }
}
