use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::{rngs::StdRng, Rng};
use rayon::prelude::*;
use crate::{
    error::{SurvivalError, Result},
    loss::SurvivalLoss,
    regressor::Regressor,
};

/// Hyperparameters of componentwise gradient boosting
#[derive(Debug, Clone, PartialEq)]
pub struct BoostingConfig {
    pub loss: SurvivalLoss,
    pub learning_rate: f64,
    pub n_estimators: usize,
    pub subsample: f64,          // fraction of samples per stage, (0, 1]
    pub warm_start: bool,
    pub dropout_rate: f64,       // fraction of stages dropped, [0, 1)
    pub random_state: Option<u64>,
}

impl Default for BoostingConfig {
    fn default() -> Self {
        Self {
            loss: SurvivalLoss::CoxPH,
            learning_rate: 0.1,
            n_estimators: 100,
            subsample: 1.0,
            warm_start: false,
            dropout_rate: 0.0,
            random_state: None,
        }
    }
}

impl BoostingConfig {
    /// check hyperparameter ranges before any work starts
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate >= 0.0 && self.learning_rate.is_finite()) {
            return Err(SurvivalError::invalid_parameter("learning_rate", self.learning_rate.to_string()));
        }
        if self.n_estimators < 1 {
            return Err(SurvivalError::invalid_parameter("n_estimators", self.n_estimators.to_string()));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(SurvivalError::invalid_parameter("subsample", self.subsample.to_string()));
        }
        if !(self.dropout_rate >= 0.0 && self.dropout_rate < 1.0) {
            return Err(SurvivalError::invalid_parameter("dropout_rate", self.dropout_rate.to_string()));
        }
        Ok(())
    }

    pub fn do_oob(&self) -> bool {
        self.subsample < 1.0
    }

    pub fn do_dropout(&self) -> bool {
        self.dropout_rate > 0.0
    }
}

/// a fitted regressor restricted to a single column of the design matrix
#[derive(Debug, Clone)]
pub struct ComponentwiseLearner<R> {
    component: usize,
    regr: R,
}

impl<R: Regressor> ComponentwiseLearner<R> {
    /// fit a fresh copy of `prototype` on column `component`;
    /// a failing weighted fit is retried without weights
    pub fn fit(
        component: usize,
        prototype: &R,
        x: ArrayView2<f64>,
        residuals: ArrayView1<f64>,
        sample_weight: ArrayView1<f64>,
    ) -> Result<Self> {
        if component >= x.ncols() {
            return Err(SurvivalError::invalid_dimensions(
                format!("component {} out of range for {} columns", component, x.ncols())
            ));
        }
        let column = x.column(component);

        let mut regr = prototype.clone();
        if let Err(err) = regr.fit(column, residuals, Some(sample_weight)) {
            log::debug!("weighted fit on component {component} failed ({err}), refitting unweighted");
            regr = prototype.clone();
            regr.fit(column, residuals, None).map_err(|e| {
                SurvivalError::regressor_failed(format!("component {component}: {e}"))
            })?;
        }

        Ok(Self { component, regr })
    }

    /// prediction from the learner's own column of `x`
    pub fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        self.regr.predict(x.column(self.component))
    }

    /// column index in the design matrix (0 is the intercept column)
    pub fn component(&self) -> usize {
        self.component
    }

    pub fn regressor(&self) -> &R {
        &self.regr
    }
}

/// Fit one candidate per column against the residuals and keep the one with
/// the smallest weighted squared error. Ties go to the lowest column index;
/// NaN errors never win.
pub fn fit_stage_componentwise<R: Regressor>(
    x: ArrayView2<f64>,
    residuals: ArrayView1<f64>,
    sample_weight: ArrayView1<f64>,
    prototype: &R,
) -> Result<(ComponentwiseLearner<R>, f64)> {
    let candidates = (0..x.ncols())
        .into_par_iter()
        .map(|component| {
            let learner = ComponentwiseLearner::fit(component, prototype, x, residuals, sample_weight)?;
            let prediction = learner.predict(x);
            let error: f64 = residuals.iter()
                .zip(prediction.iter())
                .zip(sample_weight.iter())
                .map(|((r, p), w)| w * (r - p) * (r - p))
                .sum();
            Ok((learner, error))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut best: Option<(usize, f64)> = None;
    for (idx, (_, error)) in candidates.iter().enumerate() {
        if error.is_nan() {
            continue;
        }
        match best {
            Some((_, best_error)) if *error >= best_error => {}
            _ => best = Some((idx, *error)),
        }
    }

    let (best_idx, _) = best.ok_or_else(|| {
        SurvivalError::numerical_error("every componentwise candidate produced a NaN error")
    })?;
    candidates.into_iter()
        .nth(best_idx)
        .ok_or_else(|| SurvivalError::numerical_error("selected candidate vanished"))
}

/// in-bag mask with exactly `n_inbag` true entries
pub fn random_sample_mask(n_samples: usize, n_inbag: usize, rng: &mut StdRng) -> Vec<bool> {
    let mut mask = vec![false; n_samples];
    for idx in rand::seq::index::sample(rng, n_samples, n_inbag.min(n_samples)).iter() {
        mask[idx] = true;
    }
    mask
}

/// drop each stage with probability `p`; at least one stage is always dropped
pub fn sample_binomial_plus_one(p: f64, size: usize, rng: &mut StdRng) -> (Vec<bool>, usize) {
    let mut dropped: Vec<bool> = (0..size).map(|_| rng.gen_bool(p)).collect();
    let mut n_dropped = dropped.iter().filter(|&&d| d).count();
    if n_dropped == 0 && size > 0 {
        let idx = rng.gen_range(0..size);
        dropped[idx] = true;
        n_dropped = 1;
    }
    (dropped, n_dropped)
}

/// Drop a random subset of stages `0..=stage` from `raw_predictions` and
/// rescale: dropped stages by `k / (k + 1)`, the next stage by `1 / (k + 1)`.
#[allow(clippy::too_many_arguments)]
pub fn update_with_dropout<R: Regressor>(
    stage: usize,
    x: ArrayView2<f64>,
    raw_predictions: &mut Array1<f64>,
    scale: &mut [f64],
    estimators: &[ComponentwiseLearner<R>],
    learning_rate: f64,
    dropout_rate: f64,
    rng: &mut StdRng,
) -> Result<()> {
    if stage + 1 >= scale.len() || stage >= estimators.len() {
        return Err(SurvivalError::invalid_dimensions(
            format!("dropout stage {} out of range for {} scale entries", stage, scale.len())
        ));
    }

    let (dropped, n_dropped) = sample_binomial_plus_one(dropout_rate, stage + 1, rng);
    let k = n_dropped as f64;

    scale[stage + 1] = 1.0 / (k + 1.0);

    raw_predictions.fill(0.0);
    for (m, estimator) in estimators.iter().enumerate().take(stage + 1) {
        if dropped[m] {
            scale[m] *= k / (k + 1.0);
        } else {
            raw_predictions.scaled_add(learning_rate * scale[m], &estimator.predict(x));
        }
    }
    Ok(())
}

/// loss history of a fit, one entry per stage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingTrace {
    pub train_score: Vec<f64>,
    pub oob: Option<OobTrace>,
}

/// out-of-bag loss history, only kept when subsampling
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OobTrace {
    pub scores: Vec<f64>,
    pub improvement: Vec<f64>,
    pub score: f64,   // last out-of-bag loss, NaN until a stage records one
}

impl TrainingTrace {
    pub fn new(do_oob: bool) -> Self {
        Self {
            train_score: Vec::new(),
            oob: do_oob.then(|| OobTrace { score: f64::NAN, ..OobTrace::default() }),
        }
    }

    /// prepare a fitted trace for more stages; a newly started
    /// out-of-bag history is zero for the stages fitted before
    pub fn prepare_warm_start(&mut self, do_oob: bool) {
        let n_stages = self.train_score.len();
        match &mut self.oob {
            Some(oob) => oob.score = f64::NAN,
            None if do_oob => {
                self.oob = Some(OobTrace {
                    scores: vec![0.0; n_stages],
                    improvement: vec![0.0; n_stages],
                    score: f64::NAN,
                });
            }
            None => {}
        }
    }

    pub fn len(&self) -> usize {
        self.train_score.len()
    }

    pub fn is_empty(&self) -> bool {
        self.train_score.is_empty()
    }
}
