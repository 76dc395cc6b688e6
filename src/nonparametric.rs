//! Kaplan-Meier estimators of the survival and censoring distributions.

use ndarray::{Array1, ArrayView1};
use crate::{
    data::SurvivalTarget,
    error::{SurvivalError, Result},
};

/// per-unique-time counts of a survival sample
#[derive(Debug, Clone, PartialEq)]
pub struct EventCounts {
    pub unique_times: Vec<f64>,
    pub n_events: Vec<usize>,
    pub n_at_risk: Vec<usize>,   // samples with time >= unique time
    pub n_censored: Vec<usize>,
}

/// count events, censorings and subjects at risk at every unique time
pub fn compute_counts(events: &[bool], times: ArrayView1<f64>) -> Result<EventCounts> {
    if events.len() != times.len() {
        return Err(SurvivalError::invalid_dimensions(
            format!("events len ({}) != times len ({})", events.len(), times.len())
        ));
    }
    if times.iter().any(|t| t.is_nan()) {
        return Err(SurvivalError::invalid_survival_data("times must not be NaN"));
    }

    let n_samples = times.len();
    let mut order: Vec<usize> = (0..n_samples).collect();
    order.sort_by(|&a, &b| times[a].total_cmp(&times[b]));

    let mut counts = EventCounts {
        unique_times: Vec::new(),
        n_events: Vec::new(),
        n_at_risk: Vec::new(),
        n_censored: Vec::new(),
    };

    let mut i = 0;
    while i < n_samples {
        let t = times[order[i]];
        let mut n_events = 0;
        let mut n_censored = 0;
        let at_risk = n_samples - i;

        while i < n_samples && times[order[i]] == t {
            if events[order[i]] {
                n_events += 1;
            } else {
                n_censored += 1;
            }
            i += 1;
        }

        counts.unique_times.push(t);
        counts.n_events.push(n_events);
        counts.n_at_risk.push(at_risk);
        counts.n_censored.push(n_censored);
    }

    Ok(counts)
}

/// Kaplan-Meier product-limit estimate at every unique time.
///
/// With `reverse` the censoring distribution is estimated instead; censorings
/// tied with events are treated as happening right after them.
pub fn kaplan_meier_estimator(
    events: &[bool],
    times: ArrayView1<f64>,
    reverse: bool,
) -> Result<(Array1<f64>, Array1<f64>)> {
    let counts = compute_counts(events, times)?;

    let mut prob = 1.0;
    let mut values = Vec::with_capacity(counts.unique_times.len());

    for k in 0..counts.unique_times.len() {
        let ratio = if reverse {
            let at_risk = counts.n_at_risk[k] - counts.n_events[k];
            if at_risk == 0 {
                0.0 // 0/0
            } else {
                counts.n_censored[k] as f64 / at_risk as f64
            }
        } else {
            counts.n_events[k] as f64 / counts.n_at_risk[k] as f64
        };
        prob *= 1.0 - ratio;
        values.push(prob);
    }

    Ok((Array1::from(counts.unique_times), Array1::from(values)))
}

/// step-wise lookup shared by both estimators; `unique_time[0]` is -inf
fn lookup_proba(unique_time: &Array1<f64>, prob: &Array1<f64>, times: ArrayView1<f64>) -> Result<Array1<f64>> {
    let last_time = unique_time[unique_time.len() - 1];
    let last_prob = prob[prob.len() - 1];

    let mut out = Array1::zeros(times.len());
    for (slot, &t) in out.iter_mut().zip(times.iter()) {
        if t.is_nan() {
            return Err(SurvivalError::invalid_dimensions("query times must not be NaN"));
        }
        if t > last_time {
            // estimate is undefined beyond the last time unless it already hit zero
            if last_prob > 0.0 {
                return Err(SurvivalError::numerical_error(
                    format!("time must be smaller than largest observed time point: {}", last_time)
                ));
            }
            *slot = 0.0;
            continue;
        }
        let idx = unique_time.as_slice()
            .map(|us| us.partition_point(|&u| u <= t))
            .unwrap_or_else(|| unique_time.iter().take_while(|&&u| u <= t).count());
        *slot = prob[idx.saturating_sub(1)];
    }

    Ok(out)
}

/// Kaplan-Meier estimate of the survival function
#[derive(Debug, Clone, Default)]
pub struct SurvivalFunctionEstimator {
    unique_time: Option<Array1<f64>>,
    prob: Option<Array1<f64>>,
}

impl SurvivalFunctionEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// all-censored data is allowed here
    pub fn fit(&mut self, target: &SurvivalTarget) -> Result<&mut Self> {
        if target.is_empty() {
            return Err(SurvivalError::invalid_survival_data("cannot fit on zero samples"));
        }
        let (unique_time, prob) = kaplan_meier_estimator(target.events(), target.times(), false)?;

        self.unique_time = Some(prepend(f64::NEG_INFINITY, &unique_time));
        self.prob = Some(prepend(1.0, &prob));
        Ok(self)
    }

    /// survival probability at each query time (non-increasing, right-continuous)
    pub fn predict_proba(&self, times: ArrayView1<f64>) -> Result<Array1<f64>> {
        match (&self.unique_time, &self.prob) {
            (Some(unique_time), Some(prob)) => lookup_proba(unique_time, prob, times),
            _ => Err(SurvivalError::ModelNotFitted),
        }
    }
}

/// Kaplan-Meier estimate of the censoring survival function G(t)
#[derive(Debug, Clone, Default)]
pub struct CensoringDistributionEstimator {
    unique_time: Option<Array1<f64>>,
    prob: Option<Array1<f64>>,
}

impl CensoringDistributionEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fit(&mut self, target: &SurvivalTarget) -> Result<&mut Self> {
        self.fit_arrays(target.events(), target.times())
    }

    /// fit on raw arrays; times may be any real (e.g. log-times)
    pub fn fit_arrays(&mut self, events: &[bool], times: ArrayView1<f64>) -> Result<&mut Self> {
        if times.is_empty() {
            return Err(SurvivalError::invalid_survival_data("cannot fit on zero samples"));
        }

        let (unique_time, prob) = if events.iter().all(|&e| e) {
            // nothing censored - G is one everywhere observed
            let counts = compute_counts(events, times)?;
            let n = counts.unique_times.len();
            (Array1::from(counts.unique_times), Array1::ones(n))
        } else {
            kaplan_meier_estimator(events, times, true)?
        };

        self.unique_time = Some(prepend(f64::NEG_INFINITY, &unique_time));
        self.prob = Some(prepend(1.0, &prob));
        Ok(self)
    }

    pub fn predict_proba(&self, times: ArrayView1<f64>) -> Result<Array1<f64>> {
        match (&self.unique_time, &self.prob) {
            (Some(unique_time), Some(prob)) => lookup_proba(unique_time, prob, times),
            _ => Err(SurvivalError::ModelNotFitted),
        }
    }

    /// inverse probability of censoring weights: 1/G(t_i) for events, 0 for censored
    pub fn predict_ipcw(&self, target: &SurvivalTarget) -> Result<Array1<f64>> {
        self.predict_ipcw_arrays(target.events(), target.times())
    }

    pub fn predict_ipcw_arrays(&self, events: &[bool], times: ArrayView1<f64>) -> Result<Array1<f64>> {
        if events.len() != times.len() {
            return Err(SurvivalError::invalid_dimensions(
                format!("events len ({}) != times len ({})", events.len(), times.len())
            ));
        }

        let event_times: Array1<f64> = times.iter()
            .zip(events.iter())
            .filter_map(|(&t, &e)| if e { Some(t) } else { None })
            .collect();
        let g_hat = self.predict_proba(event_times.view())?;

        if g_hat.iter().any(|&g| g == 0.0) {
            return Err(SurvivalError::numerical_error(
                "censoring survival function is zero at one or more time points"
            ));
        }

        let mut weights = Array1::zeros(times.len());
        let mut k = 0;
        for (w, &e) in weights.iter_mut().zip(events.iter()) {
            if e {
                *w = 1.0 / g_hat[k];
                k += 1;
            }
        }
        Ok(weights)
    }
}

fn prepend(value: f64, rest: &Array1<f64>) -> Array1<f64> {
    std::iter::once(value).chain(rest.iter().copied()).collect()
}
