use ndarray::{Array1, ArrayView1};
use crate::error::{SurvivalError, Result};

/// right-continuous piecewise-constant curve `a * y(t) + b`
///
/// `y[i]` holds from breakpoint `x[i]` up to (not including) `x[i + 1]`.
/// Queries between the domain lower bound (0) and the first breakpoint
/// return the value at the first breakpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFunction {
    x: Array1<f64>,
    y: Array1<f64>,
    a: f64,
    b: f64,
    domain_lower: f64,
}

impl StepFunction {
    pub fn new(x: Array1<f64>, y: Array1<f64>) -> Result<Self> {
        Self::with_scale(x, y, 1.0, 0.0)
    }

    /// step function scaled as `a * y + b`
    pub fn with_scale(x: Array1<f64>, y: Array1<f64>, a: f64, b: f64) -> Result<Self> {
        if x.len() != y.len() {
            return Err(SurvivalError::invalid_dimensions(
                format!("step function x len ({}) != y len ({})", x.len(), y.len())
            ));
        }
        if x.is_empty() {
            return Err(SurvivalError::invalid_dimensions("step function needs at least one breakpoint"));
        }
        if x.windows(2).into_iter().any(|w| w[1] <= w[0]) {
            return Err(SurvivalError::invalid_survival_data(
                "step function breakpoints must be strictly increasing"
            ));
        }

        let domain_lower = x[0].min(0.0);
        Ok(Self { x, y, a, b, domain_lower })
    }

    /// breakpoints
    pub fn x(&self) -> ArrayView1<'_, f64> {
        self.x.view()
    }

    /// scaled values at each breakpoint
    pub fn values(&self) -> Array1<f64> {
        self.y.mapv(|v| self.a * v + self.b)
    }

    pub fn domain(&self) -> (f64, f64) {
        (self.domain_lower, self.x[self.x.len() - 1])
    }

    /// value at a single time point
    pub fn evaluate(&self, t: f64) -> Result<f64> {
        if !t.is_finite() {
            return Err(SurvivalError::invalid_dimensions("step function query must be finite"));
        }
        let (lower, upper) = self.domain();
        if t < lower || t > upper {
            return Err(SurvivalError::invalid_dimensions(
                format!("t = {} must be within [{}; {}]", t, lower, upper)
            ));
        }

        // last breakpoint <= t, clamped to the first one
        let idx = self.x.as_slice()
            .map(|xs| xs.partition_point(|&v| v <= t))
            .unwrap_or_else(|| self.x.iter().filter(|&&v| v <= t).count());
        let idx = idx.saturating_sub(1);

        Ok(self.a * self.y[idx] + self.b)
    }

    /// values at many time points
    pub fn evaluate_many(&self, times: ArrayView1<f64>) -> Result<Array1<f64>> {
        times.iter()
            .map(|&t| self.evaluate(t))
            .collect::<Result<Vec<_>>>()
            .map(Array1::from)
    }
}

/// linear interpolation of `(xp, fp)` at `x`, clamped to the end values
pub fn interp(x: f64, xp: ArrayView1<f64>, fp: ArrayView1<f64>) -> f64 {
    let n = xp.len();
    if n == 0 {
        return f64::NAN;
    }
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[n - 1] {
        return fp[n - 1];
    }

    let hi = (1..n).find(|&i| xp[i] >= x).unwrap_or(n - 1);
    let lo = hi - 1;
    if xp[hi] == x {
        return fp[hi];
    }

    let slope = (fp[hi] - fp[lo]) / (xp[hi] - xp[lo]);
    fp[lo] + slope * (x - xp[lo])
}
