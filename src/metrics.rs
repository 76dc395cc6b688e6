//! Censoring-aware evaluation metrics for survival predictions.

use ndarray::{Array1, ArrayView1, ArrayView2};
use crate::{
    data::SurvivalTarget,
    error::{SurvivalError, Result},
    functions::interp,
    nonparametric::{CensoringDistributionEstimator, SurvivalFunctionEstimator},
};

/// risk scores closer than this count as tied
pub const DEFAULT_TIED_TOL: f64 = 1e-8;

/// concordance index plus the pair counts behind it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConcordanceIndex {
    pub cindex: f64,
    pub concordant: usize,
    pub discordant: usize,
    pub tied_risk: usize,   // comparable pairs with tied estimates
    pub tied_time: usize,   // event/censored pairs sharing a time
}

impl ConcordanceIndex {
    /// comparable pairs, excluding `tied_time`
    pub fn n_comparable(&self) -> usize {
        self.concordant + self.discordant + self.tied_risk
    }
}

/// time-dependent AUC at each query time and its survival-weighted mean
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicAuc {
    pub auc: Array1<f64>,
    pub mean_auc: f64,
}

/// Brier score at every query time ≤ t_max
#[derive(Debug, Clone, PartialEq)]
pub struct BrierScore {
    pub times: Array1<f64>,
    pub scores: Array1<f64>,
}

fn check_estimate(estimate: ArrayView1<f64>, n_samples: usize) -> Result<()> {
    if estimate.len() != n_samples {
        return Err(SurvivalError::invalid_dimensions(
            format!("estimate len ({}) != n_samples ({})", estimate.len(), n_samples)
        ));
    }
    if estimate.iter().any(|v| !v.is_finite()) {
        return Err(SurvivalError::invalid_parameter("estimate", "contains non-finite values"));
    }
    Ok(())
}

/// Weighted concordance over comparable pairs.
///
/// Samples are grouped by tied time. An event is comparable to every sample
/// with a later time and to censored samples at its own time; events tied in
/// time are not compared.
fn estimate_concordance_index(
    events: &[bool],
    times: ArrayView1<f64>,
    estimate: ArrayView1<f64>,
    weights: ArrayView1<f64>,
    tied_tol: f64,
) -> Result<ConcordanceIndex> {
    let n = times.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| times[a].total_cmp(&times[b]));

    let (mut concordant, mut discordant, mut tied_risk, mut tied_time) = (0, 0, 0, 0);
    let mut numerator = 0.0;
    let mut denominator = 0.0;

    let mut start = 0;
    while start + 1 < n {
        let time_i = times[order[start]];
        let mut end = start + 1;
        while end < n && times[order[end]] == time_i {
            end += 1;
        }

        let censored_at_same_time: Vec<usize> = order[start..end].iter()
            .copied()
            .filter(|&k| !events[k])
            .collect();

        for &i in order[start..end].iter().filter(|&&k| events[k]) {
            let est_i = estimate[i];
            let w_i = weights[i];
            let (mut n_con, mut n_ties, mut n_pairs) = (0, 0, 0);

            for &k in censored_at_same_time.iter().chain(order[end..].iter()) {
                n_pairs += 1;
                let est = estimate[k];
                if (est - est_i).abs() <= tied_tol {
                    n_ties += 1;
                } else if est < est_i {
                    // the event should have the higher risk
                    n_con += 1;
                }
            }

            numerator += w_i * n_con as f64 + 0.5 * w_i * n_ties as f64;
            denominator += w_i * n_pairs as f64;

            concordant += n_con;
            tied_risk += n_ties;
            discordant += n_pairs - n_con - n_ties;
            tied_time += censored_at_same_time.len();
        }
        start = end;
    }

    if denominator <= 0.0 {
        return Err(SurvivalError::numerical_error("no comparable pairs - concordance is undefined"));
    }

    Ok(ConcordanceIndex {
        cindex: numerator / denominator,
        concordant,
        discordant,
        tied_risk,
        tied_time,
    })
}

/// Harrell's concordance index for right-censored data
pub fn concordance_index_censored(
    events: &[bool],
    times: ArrayView1<f64>,
    estimate: ArrayView1<f64>,
    tied_tol: f64,
) -> Result<ConcordanceIndex> {
    let target = SurvivalTarget::new(events.to_vec(), times.to_vec())?;
    target.check_for_metrics()?;
    check_estimate(estimate, target.len())?;

    let weights = Array1::ones(target.len());
    estimate_concordance_index(events, times, estimate, weights.view(), tied_tol)
}

/// Uno's concordance index.
///
/// Each event is weighted by the squared inverse probability of censoring,
/// estimated from `train`. With `tau`, test samples at or after `tau` get
/// zero weight.
pub fn concordance_index_ipcw(
    train: &SurvivalTarget,
    test: &SurvivalTarget,
    estimate: ArrayView1<f64>,
    tau: Option<f64>,
    tied_tol: f64,
) -> Result<ConcordanceIndex> {
    train.check_for_metrics()?;
    test.check_for_metrics()?;
    check_estimate(estimate, test.len())?;

    let times = test.times();
    let keep: Vec<usize> = (0..test.len())
        .filter(|&i| tau.map_or(true, |tau| times[i] < tau))
        .collect();

    let mut cens = CensoringDistributionEstimator::new();
    cens.fit(train)?;

    let kept_events: Vec<bool> = keep.iter().map(|&i| test.events()[i]).collect();
    let kept_times: Array1<f64> = keep.iter().map(|&i| times[i]).collect();
    let kept_ipcw = cens.predict_ipcw_arrays(&kept_events, kept_times.view())?;

    let mut weights = Array1::zeros(test.len());
    for (&i, &w) in keep.iter().zip(kept_ipcw.iter()) {
        weights[i] = w * w;
    }

    estimate_concordance_index(test.events(), times, estimate, weights.view(), tied_tol)
}

/// trapezoidal integral of `y` over `x`
fn trapezoid(y: &[f64], x: &[f64]) -> f64 {
    y.windows(2)
        .zip(x.windows(2))
        .map(|(y, x)| 0.5 * (x[1] - x[0]) * (y[0] + y[1]))
        .sum()
}

/// Cumulative/dynamic AUC at each of `times`.
///
/// Cases are events at or before `t`, weighted by their IPCW from `train`;
/// controls are samples still at risk after `t`. `mean_auc` integrates the
/// AUC against the Kaplan-Meier curve of `test`.
pub fn cumulative_dynamic_auc(
    train: &SurvivalTarget,
    test: &SurvivalTarget,
    estimate: ArrayView1<f64>,
    times: ArrayView1<f64>,
    tied_tol: f64,
) -> Result<DynamicAuc> {
    train.check_for_metrics()?;
    test.check_for_metrics()?;
    check_estimate(estimate, test.len())?;

    if times.is_empty() || times.iter().any(|t| !t.is_finite()) {
        return Err(SurvivalError::invalid_parameter("times", "must be non-empty and finite"));
    }
    let mut query: Vec<f64> = times.to_vec();
    query.sort_by(f64::total_cmp);
    query.dedup();

    let test_times = test.times();
    let min_time = test_times.iter().copied().fold(f64::INFINITY, f64::min);
    let max_time = test_times.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if query[0] < min_time || query[query.len() - 1] >= max_time {
        return Err(SurvivalError::invalid_parameter(
            "times",
            format!("all times must be within follow-up time of test data: [{}; {}[", min_time, max_time),
        ));
    }

    // highest risk first
    let mut order: Vec<usize> = (0..test.len()).collect();
    order.sort_by(|&a, &b| estimate[b].total_cmp(&estimate[a]));
    let sorted_events: Vec<bool> = order.iter().map(|&i| test.events()[i]).collect();
    let sorted_times: Array1<f64> = order.iter().map(|&i| test_times[i]).collect();
    let sorted_estimate: Vec<f64> = order.iter().map(|&i| estimate[i]).collect();

    let mut cens = CensoringDistributionEstimator::new();
    cens.fit(train)?;
    let ipcw = cens.predict_ipcw_arrays(&sorted_events, sorted_times.view())?;

    let mut scores = Vec::with_capacity(query.len());
    for &t in query.iter() {
        let is_case: Vec<bool> = sorted_times.iter()
            .zip(sorted_events.iter())
            .map(|(&time, &event)| event && time <= t)
            .collect();
        let is_control: Vec<bool> = sorted_times.iter().map(|&time| time > t).collect();

        let n_controls = is_control.iter().filter(|&&c| c).count();
        let case_weight: f64 = ipcw.iter().zip(is_case.iter()).filter(|&(_, &c)| c).map(|(w, _)| w).sum();
        if n_controls == 0 {
            return Err(SurvivalError::numerical_error(format!("no controls at time {}", t)));
        }
        if case_weight <= 0.0 {
            return Err(SurvivalError::numerical_error(format!("no cases at time {}", t)));
        }

        let mut true_pos = Vec::new();
        let mut false_pos = Vec::new();
        let (mut tp, mut fp) = (0.0, 0.0);
        let mut est_prev = f64::INFINITY;
        for (i, &est) in sorted_estimate.iter().enumerate() {
            // one roc point per block of tied estimates
            if (est - est_prev).abs() > tied_tol {
                true_pos.push(tp);
                false_pos.push(fp);
                est_prev = est;
            }
            if is_case[i] {
                tp += ipcw[i];
            } else if is_control[i] {
                fp += 1.0;
            }
        }
        true_pos.push(tp);
        false_pos.push(fp);

        let sens: Vec<f64> = true_pos.iter().map(|v| v / case_weight).collect();
        let fpr: Vec<f64> = false_pos.iter().map(|v| v / n_controls as f64).collect();
        scores.push(trapezoid(&sens, &fpr));
    }

    let mean_auc = if scores.len() == 1 {
        scores[0]
    } else {
        let mut km = SurvivalFunctionEstimator::new();
        km.fit(test)?;
        let surv = km.predict_proba(Array1::from(query.clone()).view())?;

        let mut previous = 1.0;
        let mut integral = 0.0;
        for (&score, &s) in scores.iter().zip(surv.iter()) {
            integral += score * (previous - s);
            previous = s;
        }
        let drop = 1.0 - previous;
        if drop <= 0.0 {
            return Err(SurvivalError::numerical_error(
                "survival does not drop over the queried times - mean AUC is undefined"
            ));
        }
        integral / drop
    };

    Ok(DynamicAuc {
        auc: Array1::from(scores),
        mean_auc,
    })
}

/// t_max, or the largest test time when unset or non-positive
fn resolve_t_max(t_max: Option<f64>, test: &SurvivalTarget) -> f64 {
    match t_max {
        Some(t) if t > 0.0 => t,
        _ => test.times().iter().copied().fold(f64::NEG_INFINITY, f64::max),
    }
}

/// IPCW Brier score of predicted survival probabilities.
///
/// `estimate` holds one row per test sample and one column per entry of
/// `times` (strictly increasing). Events at or before `t` are weighted by
/// 1/G(T_i), samples still at risk after `t` by 1/G(t); censored samples
/// before `t` contribute zero. Only times ≤ `t_max` are scored.
pub fn brier_score(
    train: &SurvivalTarget,
    test: &SurvivalTarget,
    estimate: ArrayView2<f64>,
    times: ArrayView1<f64>,
    t_max: Option<f64>,
) -> Result<BrierScore> {
    train.check_for_metrics()?;
    test.check_for_metrics()?;

    if times.is_empty() || times.iter().any(|t| !t.is_finite()) {
        return Err(SurvivalError::invalid_parameter("times", "must be non-empty and finite"));
    }
    if times.windows(2).into_iter().any(|w| w[1] <= w[0]) {
        return Err(SurvivalError::invalid_parameter("times", "must be strictly increasing"));
    }
    if estimate.dim() != (test.len(), times.len()) {
        return Err(SurvivalError::invalid_dimensions(
            format!("estimate shape {:?} != (n_samples, n_times) ({}, {})", estimate.dim(), test.len(), times.len())
        ));
    }
    if estimate.iter().any(|v| !v.is_finite()) {
        return Err(SurvivalError::invalid_parameter("estimate", "contains non-finite values"));
    }

    let mut cens = CensoringDistributionEstimator::new();
    cens.fit(train)?;
    let ipcw = cens.predict_ipcw(test)?;

    let t_max = resolve_t_max(t_max, test);
    let test_times = test.times();
    let events = test.events();
    let n = test.len() as f64;

    let mut kept_times = Vec::new();
    let mut scores = Vec::new();
    for &t in times.iter().filter(|&&t| t <= t_max) {
        let g_t = cens.predict_proba(Array1::from(vec![t]).view())?[0];
        if g_t <= 0.0 {
            return Err(SurvivalError::numerical_error(
                format!("censoring survival function is zero at time {}", t)
            ));
        }

        let mut total = 0.0;
        for (i, row) in estimate.outer_iter().enumerate() {
            let surv = interp(t, times, row);
            if events[i] && test_times[i] <= t {
                total += surv * surv * ipcw[i];
            } else if test_times[i] > t {
                total += (1.0 - surv) * (1.0 - surv) / g_t;
            }
        }
        kept_times.push(t);
        scores.push(total / n);
    }

    Ok(BrierScore {
        times: Array1::from(kept_times),
        scores: Array1::from(scores),
    })
}

/// Brier score integrated over the scored times, divided by min(t_max, last time)
pub fn integrated_brier_score(
    train: &SurvivalTarget,
    test: &SurvivalTarget,
    estimate: ArrayView2<f64>,
    times: ArrayView1<f64>,
    t_max: Option<f64>,
) -> Result<f64> {
    let brier = brier_score(train, test, estimate, times, t_max)?;
    if brier.times.is_empty() {
        return Err(SurvivalError::invalid_parameter("times", "no time point is <= t_max"));
    }

    let last_time = brier.times[brier.times.len() - 1];
    let horizon = match t_max {
        Some(t) if t > 0.0 => t.min(last_time),
        _ => last_time,
    };
    if horizon <= 0.0 {
        return Err(SurvivalError::numerical_error("integration horizon must be positive"));
    }

    let scores = brier.scores.to_vec();
    let times = brier.times.to_vec();
    Ok(trapezoid(&scores, &times) / horizon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2};

    fn uncensored_train(n: usize) -> SurvivalTarget {
        SurvivalTarget::new(vec![true; n], (1..=n).map(|t| t as f64).collect()).unwrap()
    }

    #[test]
    fn test_constant_predictor_ties() {
        let times = array![5.0, 5.0, 8.0, 12.0];
        let events = [true, false, true, true];
        let estimate = Array1::from_elem(4, 0.5);

        let c = concordance_index_censored(&events, times.view(), estimate.view(), DEFAULT_TIED_TOL).unwrap();
        assert_relative_eq!(c.cindex, 0.5);
        assert_eq!(c.concordant, 0);
        assert_eq!(c.discordant, 0);
        assert_eq!(c.tied_risk, 4);
        assert_eq!(c.tied_time, 1);
    }

    #[test]
    fn test_perfect_and_inverse_concordance() {
        let times = array![1.0, 2.0, 3.0, 4.0, 5.0];
        let events = [true; 5];

        let perfect = array![5.0, 4.0, 3.0, 2.0, 1.0];
        let c = concordance_index_censored(&events, times.view(), perfect.view(), DEFAULT_TIED_TOL).unwrap();
        assert_relative_eq!(c.cindex, 1.0);
        assert_eq!(c.concordant, 10);

        let inverse = array![1.0, 2.0, 3.0, 4.0, 5.0];
        let c = concordance_index_censored(&events, times.view(), inverse.view(), DEFAULT_TIED_TOL).unwrap();
        assert_relative_eq!(c.cindex, 0.0);
        assert_eq!(c.discordant, 10);
    }

    #[test]
    fn test_concordance_pair_counts() {
        let times = array![2.0, 3.0, 3.0, 5.0, 7.0, 7.0];
        let events = [true, false, true, true, false, true];
        let estimate = array![0.9, 0.1, 0.4, 0.4, 0.2, 0.6];

        let c = concordance_index_censored(&events, times.view(), estimate.view(), DEFAULT_TIED_TOL).unwrap();
        // 5 + 4 + 2 + 1 comparable pairs
        assert_eq!(c.n_comparable(), 12);
        assert_eq!(c.tied_time, 2);
        assert!(c.cindex >= 0.0 && c.cindex <= 1.0);
        assert_relative_eq!(
            c.cindex,
            (c.concordant as f64 + 0.5 * c.tied_risk as f64) / c.n_comparable() as f64
        );
    }

    #[test]
    fn test_concordance_input_checks() {
        let times = array![1.0, 2.0];
        let estimate = array![0.1, 0.2];
        assert!(concordance_index_censored(&[false, false], times.view(), estimate.view(), DEFAULT_TIED_TOL).is_err());
        assert!(concordance_index_censored(&[true], array![1.0].view(), array![0.0].view(), DEFAULT_TIED_TOL).is_err());
        assert!(concordance_index_censored(&[true, true], times.view(), array![0.1].view(), DEFAULT_TIED_TOL).is_err());
        assert!(concordance_index_censored(&[true, true], times.view(), array![0.1, f64::NAN].view(), DEFAULT_TIED_TOL).is_err());
    }

    #[test]
    fn test_no_comparable_pairs() {
        // two events at the same time are never compared
        let times = array![3.0, 3.0];
        let result = concordance_index_censored(&[true, true], times.view(), array![0.1, 0.2].view(), DEFAULT_TIED_TOL);
        assert!(matches!(result, Err(SurvivalError::NumericalError { .. })));
    }

    #[test]
    fn test_ipcw_concordance_without_censoring_in_train() {
        let train = uncensored_train(10);
        let test = SurvivalTarget::new(vec![true, false, true, true], vec![2.0, 3.0, 5.0, 7.0]).unwrap();
        let estimate = array![4.0, 3.0, 1.0, 2.0];

        let plain = concordance_index_censored(test.events(), test.times(), estimate.view(), DEFAULT_TIED_TOL).unwrap();
        let ipcw = concordance_index_ipcw(&train, &test, estimate.view(), None, DEFAULT_TIED_TOL).unwrap();
        assert_relative_eq!(plain.cindex, 0.75);
        assert_relative_eq!(ipcw.cindex, plain.cindex);

        // truncation drops the discordant pair starting at t = 5
        let truncated = concordance_index_ipcw(&train, &test, estimate.view(), Some(4.0), DEFAULT_TIED_TOL).unwrap();
        assert_relative_eq!(truncated.cindex, 1.0);
    }

    #[test]
    fn test_ipcw_concordance_undefined_tail() {
        // test event after the last training time while G > 0
        let train = uncensored_train(3);
        let test = SurvivalTarget::new(vec![true, true], vec![1.0, 5.0]).unwrap();
        let estimate = array![1.0, 0.0];
        assert!(matches!(
            concordance_index_ipcw(&train, &test, estimate.view(), None, DEFAULT_TIED_TOL),
            Err(SurvivalError::NumericalError { .. })
        ));
    }

    #[test]
    fn test_dynamic_auc_perfect_ranking() {
        let train = uncensored_train(10);
        let test = SurvivalTarget::new(vec![true; 6], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let estimate = array![6.0, 5.0, 4.0, 3.0, 2.0, 1.0];

        let single = cumulative_dynamic_auc(&train, &test, estimate.view(), array![3.0].view(), DEFAULT_TIED_TOL).unwrap();
        assert_relative_eq!(single.auc[0], 1.0);
        assert_eq!(single.mean_auc, single.auc[0]);

        let multi = cumulative_dynamic_auc(&train, &test, estimate.view(), array![4.0, 2.0, 4.0].view(), DEFAULT_TIED_TOL)
            .unwrap();
        assert_eq!(multi.auc.len(), 2);
        assert_relative_eq!(multi.mean_auc, 1.0, epsilon = 1e-12);

        let reversed = estimate.mapv(|v| -v);
        let worst = cumulative_dynamic_auc(&train, &test, reversed.view(), array![3.0].view(), DEFAULT_TIED_TOL).unwrap();
        assert_relative_eq!(worst.auc[0], 0.0);
    }

    #[test]
    fn test_dynamic_auc_tied_estimates() {
        let train = uncensored_train(10);
        let test = SurvivalTarget::new(vec![true; 4], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let estimate = Array1::from_elem(4, 0.3);

        let auc = cumulative_dynamic_auc(&train, &test, estimate.view(), array![2.0].view(), DEFAULT_TIED_TOL).unwrap();
        assert_relative_eq!(auc.auc[0], 0.5);
    }

    #[test]
    fn test_dynamic_auc_time_range() {
        let train = uncensored_train(10);
        let test = SurvivalTarget::new(vec![true; 4], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let estimate = array![4.0, 3.0, 2.0, 1.0];

        // upper bound is exclusive
        assert!(cumulative_dynamic_auc(&train, &test, estimate.view(), array![4.0].view(), DEFAULT_TIED_TOL).is_err());
        assert!(cumulative_dynamic_auc(&train, &test, estimate.view(), array![0.5].view(), DEFAULT_TIED_TOL).is_err());
        assert!(cumulative_dynamic_auc(&train, &test, estimate.view(), Array1::zeros(0).view(), DEFAULT_TIED_TOL).is_err());
    }

    #[test]
    fn test_constant_half_survival_ibs() {
        let train = uncensored_train(5);
        let test = uncensored_train(5);
        let times = array![0.0, 1.0, 2.0, 3.0, 4.0];
        let estimate = Array2::from_elem((5, 5), 0.5);

        let brier = brier_score(&train, &test, estimate.view(), times.view(), None).unwrap();
        for &score in brier.scores.iter() {
            assert_relative_eq!(score, 0.25, epsilon = 1e-12);
        }

        let ibs = integrated_brier_score(&train, &test, estimate.view(), times.view(), None).unwrap();
        assert_relative_eq!(ibs, 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_brier_score_with_censoring() {
        // G(1) = 1, G(2) = G(3) = G(4) = 2/3
        let target = SurvivalTarget::new(vec![true, false, true, true], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let times = array![1.5, 2.5];
        let estimate = Array2::from_shape_vec((4, 2), vec![
            0.2, 0.2,
            0.9, 0.9,
            0.4, 0.4,
            0.8, 0.8,
        ]).unwrap();

        let brier = brier_score(&target, &target, estimate.view(), times.view(), None).unwrap();
        assert_eq!(brier.times, times);
        assert_relative_eq!(brier.scores[0], (0.04 + 0.01 + 0.36 + 0.04) / 4.0, epsilon = 1e-12);
        assert_relative_eq!(brier.scores[1], (0.04 + 1.5 * 0.36 + 1.5 * 0.04) / 4.0, epsilon = 1e-12);

        let ibs = integrated_brier_score(&target, &target, estimate.view(), times.view(), None).unwrap();
        let expected = 0.5 * (brier.scores[0] + brier.scores[1]) / 2.5;
        assert_relative_eq!(ibs, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_brier_t_max_filters_times() {
        let train = uncensored_train(5);
        let test = uncensored_train(5);
        let times = array![1.0, 2.0, 3.0];
        let estimate = Array2::from_elem((5, 3), 0.5);

        let brier = brier_score(&train, &test, estimate.view(), times.view(), Some(2.0)).unwrap();
        assert_eq!(brier.times, array![1.0, 2.0]);
        assert_eq!(brier.scores.len(), 2);
    }

    #[test]
    fn test_brier_input_checks() {
        let train = uncensored_train(5);
        let test = uncensored_train(5);
        let estimate = Array2::from_elem((5, 2), 0.5);

        assert!(brier_score(&train, &test, estimate.view(), array![2.0, 1.0].view(), None).is_err());
        assert!(brier_score(&train, &test, estimate.view(), array![1.0, 2.0, 3.0].view(), None).is_err());
        assert!(integrated_brier_score(&train, &test, estimate.view(), array![1.0, 2.0].view(), Some(0.5)).is_err());
    }
}
