use ndarray::{Array1, Array2, ArrayView1};
use crate::{
    error::{SurvivalError, Result},
    functions::StepFunction,
    nonparametric::compute_counts,
};

/// Breslow's estimator of the baseline cumulative hazard of a Cox-type model
#[derive(Debug, Clone)]
pub struct BreslowEstimator {
    unique_times: Array1<f64>,
    cum_baseline_hazard: StepFunction,
    baseline_survival: StepFunction,
}

impl BreslowEstimator {
    /// fit from linear predictors (log hazard ratios) and observed outcomes
    pub fn fit(
        linear_predictor: ArrayView1<f64>,
        events: &[bool],
        times: ArrayView1<f64>,
    ) -> Result<Self> {
        let n_samples = times.len();
        if linear_predictor.len() != n_samples || events.len() != n_samples {
            return Err(SurvivalError::invalid_dimensions(
                "linear predictor, events, and times must have same length"
            ));
        }
        if n_samples == 0 {
            return Err(SurvivalError::invalid_survival_data("cannot fit baseline on zero samples"));
        }

        let risk_score = linear_predictor.mapv(f64::exp);
        if risk_score.iter().any(|r| !r.is_finite()) {
            return Err(SurvivalError::numerical_error("risk scores overflowed in exp()"));
        }

        let mut order: Vec<usize> = (0..n_samples).collect();
        order.sort_by(|&a, &b| times[a].total_cmp(&times[b]));
        let counts = compute_counts(events, times)?;

        // sum of risk scores over the risk set of every unique time
        let mut divisor = Vec::with_capacity(counts.unique_times.len());
        let mut value: f64 = risk_score.sum();
        let mut k = 0;
        for i in 0..counts.n_at_risk.len() {
            if i > 0 {
                let leaving = counts.n_at_risk[i - 1] - counts.n_at_risk[i];
                value -= order[k..k + leaving].iter().map(|&j| risk_score[j]).sum::<f64>();
                k += leaving;
            }
            divisor.push(value);
        }

        let mut cum_hazard = Vec::with_capacity(divisor.len());
        let mut acc = 0.0;
        for (&d, &div) in counts.n_events.iter().zip(divisor.iter()) {
            if d > 0 {
                acc += d as f64 / div;
            }
            cum_hazard.push(acc);
        }

        let unique_times = Array1::from(counts.unique_times);
        let cum_hazard = Array1::from(cum_hazard);
        let survival = cum_hazard.mapv(|h| (-h).exp());

        Ok(Self {
            cum_baseline_hazard: StepFunction::new(unique_times.clone(), cum_hazard)?,
            baseline_survival: StepFunction::new(unique_times.clone(), survival)?,
            unique_times,
        })
    }

    pub fn unique_times(&self) -> ArrayView1<'_, f64> {
        self.unique_times.view()
    }

    pub fn cum_baseline_hazard(&self) -> &StepFunction {
        &self.cum_baseline_hazard
    }

    pub fn baseline_survival(&self) -> &StepFunction {
        &self.baseline_survival
    }

    /// H(t | x) = exp(f(x)) H0(t), one step function per sample
    pub fn cumulative_hazard_functions(&self, linear_predictor: ArrayView1<f64>) -> Result<Vec<StepFunction>> {
        let h0 = self.cum_baseline_hazard.values();
        linear_predictor.iter()
            .map(|&lp| StepFunction::with_scale(self.unique_times.clone(), h0.clone(), lp.exp(), 0.0))
            .collect()
    }

    /// S(t | x) = S0(t)^exp(f(x)), one step function per sample
    pub fn survival_functions(&self, linear_predictor: ArrayView1<f64>) -> Result<Vec<StepFunction>> {
        let s0 = self.baseline_survival.values();
        linear_predictor.iter()
            .map(|&lp| {
                let risk = lp.exp();
                StepFunction::new(self.unique_times.clone(), s0.mapv(|s| s.powf(risk)))
            })
            .collect()
    }

    /// cumulative hazard at `unique_times`, samples x times
    pub fn cumulative_hazard_array(&self, linear_predictor: ArrayView1<f64>) -> Array2<f64> {
        let h0 = self.cum_baseline_hazard.values();
        let mut out = Array2::zeros((linear_predictor.len(), h0.len()));
        for (mut row, &lp) in out.rows_mut().into_iter().zip(linear_predictor.iter()) {
            let risk = lp.exp();
            row.assign(&h0.mapv(|h| risk * h));
        }
        out
    }

    /// survival probability at `unique_times`, samples x times
    pub fn survival_array(&self, linear_predictor: ArrayView1<f64>) -> Array2<f64> {
        let s0 = self.baseline_survival.values();
        let mut out = Array2::zeros((linear_predictor.len(), s0.len()));
        for (mut row, &lp) in out.rows_mut().into_iter().zip(linear_predictor.iter()) {
            let risk = lp.exp();
            row.assign(&s0.mapv(|s| s.powf(risk)));
        }
        out
    }
}
