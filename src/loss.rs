//! Survival loss functions optimized by the boosting engine.

use std::{fmt, str::FromStr};

use ndarray::{Array1, ArrayView1};
use crate::{
    error::{SurvivalError, Result},
    nonparametric::CensoringDistributionEstimator,
};

/// The closed set of objectives the boosting engine can optimize.
///
/// Time-domain losses (`CensoredSquared`, `IpcwLeastSquares`) expect
/// log-transformed times and predict on the log scale; their
/// [`scale_raw_prediction`](SurvivalLoss::scale_raw_prediction) maps back to time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SurvivalLoss {
    /// negative log partial likelihood of Cox's proportional hazards model
    #[default]
    CoxPH,
    /// squared error that ignores predictions beyond the time of censoring
    CensoredSquared,
    /// inverse-probability-of-censoring weighted least squares
    IpcwLeastSquares,
}

impl SurvivalLoss {
    pub fn name(&self) -> &'static str {
        match self {
            SurvivalLoss::CoxPH => "coxph",
            SurvivalLoss::CensoredSquared => "squared",
            SurvivalLoss::IpcwLeastSquares => "ipcwls",
        }
    }

    /// does the loss model log(time) rather than a risk score
    pub fn is_time_domain(&self) -> bool {
        !matches!(self, SurvivalLoss::CoxPH)
    }

    /// loss value of `raw_prediction` given observed outcomes
    ///
    /// `IpcwLeastSquares` is NaN for a sample without uncensored observations.
    pub fn loss(
        &self,
        events: &[bool],
        times: ArrayView1<f64>,
        raw_prediction: ArrayView1<f64>,
        sample_weight: Option<ArrayView1<f64>>,
    ) -> Result<f64> {
        check_lengths(events, times, raw_prediction, sample_weight)?;
        let weight = |i: usize| sample_weight.map_or(1.0, |w| w[i]);

        match self {
            SurvivalLoss::CoxPH => {
                let log_risk = log_risk_set_sums(times, raw_prediction);
                let loglik: f64 = (0..events.len())
                    .filter(|&i| events[i])
                    .map(|i| weight(i) * (raw_prediction[i] - log_risk[i]))
                    .sum();
                Ok(-loglik)
            }
            SurvivalLoss::CensoredSquared => {
                let loss: f64 = (0..events.len())
                    .map(|i| {
                        let residual = times[i] - raw_prediction[i];
                        if residual > 0.0 || events[i] {
                            weight(i) * residual * residual
                        } else {
                            0.0
                        }
                    })
                    .sum();
                Ok(0.5 * loss)
            }
            SurvivalLoss::IpcwLeastSquares => {
                let ipcw = ipc_weights(events, times)?;
                let w: Array1<f64> = ipcw.iter()
                    .enumerate()
                    .map(|(i, &v)| v * weight(i))
                    .collect();
                let total = w.sum();
                if total <= 0.0 {
                    // no uncensored observation carries weight
                    return Ok(f64::NAN);
                }
                let sse: f64 = (0..events.len())
                    .map(|i| w[i] * (times[i] - raw_prediction[i]).powi(2))
                    .sum();
                Ok(sse / total)
            }
        }
    }

    /// negative gradient (pseudo-residuals) for the next boosting stage
    pub fn gradient(
        &self,
        events: &[bool],
        times: ArrayView1<f64>,
        raw_prediction: ArrayView1<f64>,
        sample_weight: Option<ArrayView1<f64>>,
    ) -> Result<Array1<f64>> {
        check_lengths(events, times, raw_prediction, sample_weight)?;

        let mut residuals = match self {
            SurvivalLoss::CoxPH => martingale_residuals(events, times, raw_prediction),
            SurvivalLoss::CensoredSquared => (0..events.len())
                .map(|i| {
                    let residual = times[i] - raw_prediction[i];
                    if residual > 0.0 || events[i] { residual } else { 0.0 }
                })
                .collect(),
            SurvivalLoss::IpcwLeastSquares => {
                let ipcw = ipc_weights(events, times)?;
                (0..events.len())
                    .map(|i| ipcw[i] * (times[i] - raw_prediction[i]))
                    .collect()
            }
        };

        if let Some(w) = sample_weight {
            residuals *= &w;
        }
        Ok(residuals)
    }

    /// map raw ensemble output to the prediction scale
    pub fn scale_raw_prediction(&self, raw_prediction: Array1<f64>) -> Array1<f64> {
        match self {
            SurvivalLoss::CoxPH => raw_prediction,
            SurvivalLoss::CensoredSquared | SurvivalLoss::IpcwLeastSquares => {
                raw_prediction.mapv_into(f64::exp)
            }
        }
    }
}

impl FromStr for SurvivalLoss {
    type Err = SurvivalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "coxph" => Ok(SurvivalLoss::CoxPH),
            "squared" => Ok(SurvivalLoss::CensoredSquared),
            "ipcwls" => Ok(SurvivalLoss::IpcwLeastSquares),
            other => Err(SurvivalError::invalid_parameter("loss", other)),
        }
    }
}

impl fmt::Display for SurvivalLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn check_lengths(
    events: &[bool],
    times: ArrayView1<f64>,
    raw_prediction: ArrayView1<f64>,
    sample_weight: Option<ArrayView1<f64>>,
) -> Result<()> {
    let n = events.len();
    if times.len() != n || raw_prediction.len() != n || sample_weight.is_some_and(|w| w.len() != n) {
        return Err(SurvivalError::invalid_dimensions(
            "events, times, predictions, and weights must have same length"
        ));
    }
    Ok(())
}

/// 1/G(t_i) for events, 0 for censored, G estimated from the same sample
fn ipc_weights(events: &[bool], times: ArrayView1<f64>) -> Result<Array1<f64>> {
    if events.iter().all(|&e| e) {
        return Ok(Array1::ones(events.len()));
    }
    let mut cens = CensoringDistributionEstimator::new();
    cens.fit_arrays(events, times)?;
    cens.predict_ipcw_arrays(events, times)
}

/// sample order by ascending time, grouped into runs of tied times
fn time_groups(times: ArrayView1<f64>) -> (Vec<usize>, Vec<(usize, usize)>) {
    let n = times.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| times[a].total_cmp(&times[b]));

    let mut groups = Vec::new();
    let mut start = 0;
    while start < n {
        let mut end = start + 1;
        while end < n && times[order[end]] == times[order[start]] {
            end += 1;
        }
        groups.push((start, end));
        start = end;
    }
    (order, groups)
}

/// log of sum_{j: t_j >= t_i} exp(f_j) for every sample, shifted for stability
fn log_risk_set_sums(times: ArrayView1<f64>, raw_prediction: ArrayView1<f64>) -> Array1<f64> {
    let n = times.len();
    let mut out = Array1::zeros(n);
    if n == 0 {
        return out;
    }
    let max_pred = raw_prediction.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let (order, groups) = time_groups(times);

    let mut risk = 0.0_f64;
    for &(start, end) in groups.iter().rev() {
        risk += order[start..end].iter()
            .map(|&j| (raw_prediction[j] - max_pred).exp())
            .sum::<f64>();
        let log_risk = max_pred + risk.ln();
        for &j in &order[start..end] {
            out[j] = log_risk;
        }
    }
    out
}

/// event_i - exp(f_i) * sum_{j event, t_j <= t_i} 1 / R(t_j)
fn martingale_residuals(events: &[bool], times: ArrayView1<f64>, raw_prediction: ArrayView1<f64>) -> Array1<f64> {
    let n = times.len();
    let mut out = Array1::zeros(n);
    if n == 0 {
        return out;
    }
    let max_pred = raw_prediction.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exp_shift = raw_prediction.mapv(|f| (f - max_pred).exp());
    let (order, groups) = time_groups(times);

    // shifted risk set sums, per group
    let mut risk_sums = vec![0.0; groups.len()];
    let mut risk = 0.0_f64;
    for (g, &(start, end)) in groups.iter().enumerate().rev() {
        risk += order[start..end].iter().map(|&j| exp_shift[j]).sum::<f64>();
        risk_sums[g] = risk;
    }

    let mut hazard = 0.0_f64;
    for (g, &(start, end)) in groups.iter().enumerate() {
        let n_events = order[start..end].iter().filter(|&&j| events[j]).count();
        hazard += n_events as f64 / risk_sums[g];
        for &j in &order[start..end] {
            let event = if events[j] { 1.0 } else { 0.0 };
            out[j] = event - exp_shift[j] * hazard;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    /// O(n^2) partial likelihood straight from the definition
    fn naive_cox_loss(events: &[bool], times: &[f64], f: &[f64]) -> f64 {
        let n = events.len();
        let mut loss = 0.0;
        for i in 0..n {
            let at_risk: f64 = (0..n).filter(|&j| times[j] >= times[i]).map(|j| f[j].exp()).sum();
            if events[i] {
                loss += f[i] - at_risk.ln();
            }
        }
        -loss
    }

    fn naive_cox_gradient(events: &[bool], times: &[f64], f: &[f64]) -> Vec<f64> {
        let n = events.len();
        (0..n).map(|i| {
            let mut s = 0.0;
            for j in 0..n {
                if events[j] && times[i] >= times[j] {
                    let at_risk: f64 = (0..n).filter(|&k| times[k] >= times[j]).map(|k| f[k].exp()).sum();
                    s += 1.0 / at_risk;
                }
            }
            let e = if events[i] { 1.0 } else { 0.0 };
            e - f[i].exp() * s
        }).collect()
    }

    fn sample() -> (Vec<bool>, Array1<f64>, Array1<f64>) {
        let events = vec![true, false, true, true, false, true];
        let times = array![2.0, 3.0, 3.0, 5.0, 6.0, 1.0];
        let f = array![0.3, -0.5, 1.2, 0.0, 0.4, -0.1];
        (events, times, f)
    }

    #[test]
    fn test_cox_loss_matches_definition() {
        let (events, times, f) = sample();
        let loss = SurvivalLoss::CoxPH.loss(&events, times.view(), f.view(), None).unwrap();
        let expected = naive_cox_loss(&events, times.as_slice().unwrap(), f.as_slice().unwrap());
        assert_relative_eq!(loss, expected, epsilon = 1e-10);
    }

    #[test]
    fn test_cox_gradient_matches_definition() {
        let (events, times, f) = sample();
        let grad = SurvivalLoss::CoxPH.gradient(&events, times.view(), f.view(), None).unwrap();
        let expected = naive_cox_gradient(&events, times.as_slice().unwrap(), f.as_slice().unwrap());
        for (g, e) in grad.iter().zip(expected.iter()) {
            assert_relative_eq!(*g, *e, epsilon = 1e-10);
        }
        // martingale residuals sum to zero
        assert_relative_eq!(grad.sum(), 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_cox_loss_large_predictions_stay_finite() {
        let (events, times, _) = sample();
        let f = Array1::from_elem(6, 800.0);
        let loss = SurvivalLoss::CoxPH.loss(&events, times.view(), f.view(), None).unwrap();
        assert!(loss.is_finite());
    }

    #[test]
    fn test_censored_squared_ignores_overshoot() {
        let events = vec![true, false, false];
        let times = array![2.0, 2.0, 2.0];
        let f = array![3.0, 3.0, 1.0];

        let loss = SurvivalLoss::CensoredSquared.loss(&events, times.view(), f.view(), None).unwrap();
        // censored sample predicted past its censoring time contributes nothing
        assert_relative_eq!(loss, 0.5 * (1.0 + 1.0));

        let grad = SurvivalLoss::CensoredSquared.gradient(&events, times.view(), f.view(), None).unwrap();
        assert_eq!(grad, array![-1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_ipcw_least_squares() {
        let events = vec![true, false, true, true];
        let times = array![1.0, 2.0, 3.0, 4.0];
        let f = array![0.0, 0.0, 0.0, 0.0];

        // G(1) = 1, G(3) = G(4) = 2/3
        let loss = SurvivalLoss::IpcwLeastSquares.loss(&events, times.view(), f.view(), None).unwrap();
        let expected = (1.0 * 1.0 + 1.5 * 9.0 + 1.5 * 16.0) / 4.0;
        assert_relative_eq!(loss, expected, epsilon = 1e-12);

        let grad = SurvivalLoss::IpcwLeastSquares.gradient(&events, times.view(), f.view(), None).unwrap();
        assert_relative_eq!(grad[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(grad[1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(grad[2], 4.5, epsilon = 1e-12);
        assert_relative_eq!(grad[3], 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_gradient_weights_scale_residuals() {
        let (events, times, f) = sample();
        let w = array![1.0, 2.0, 0.5, 1.0, 0.0, 3.0];
        let plain = SurvivalLoss::CensoredSquared.gradient(&events, times.view(), f.view(), None).unwrap();
        let weighted = SurvivalLoss::CensoredSquared
            .gradient(&events, times.view(), f.view(), Some(w.view()))
            .unwrap();
        assert_eq!(weighted, &plain * &w);
    }

    #[test]
    fn test_scaling() {
        let raw = array![0.0, 1.0];
        assert_eq!(SurvivalLoss::CoxPH.scale_raw_prediction(raw.clone()), raw);
        let scaled = SurvivalLoss::CensoredSquared.scale_raw_prediction(raw);
        assert_relative_eq!(scaled[1], std::f64::consts::E, epsilon = 1e-12);
    }

    #[test]
    fn test_loss_from_name() {
        assert_eq!("coxph".parse::<SurvivalLoss>().unwrap(), SurvivalLoss::CoxPH);
        assert_eq!("squared".parse::<SurvivalLoss>().unwrap(), SurvivalLoss::CensoredSquared);
        assert_eq!("ipcwls".parse::<SurvivalLoss>().unwrap(), SurvivalLoss::IpcwLeastSquares);
        assert!("hinge".parse::<SurvivalLoss>().is_err());
        assert!(SurvivalLoss::IpcwLeastSquares.is_time_domain());
        assert!(!SurvivalLoss::CoxPH.is_time_domain());
    }

    #[test]
    fn test_length_mismatch() {
        let events = vec![true, false];
        let times = array![1.0, 2.0];
        let f = array![0.0];
        assert!(SurvivalLoss::CoxPH.loss(&events, times.view(), f.view(), None).is_err());
    }
}
