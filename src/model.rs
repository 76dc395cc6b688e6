use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::{rngs::StdRng, SeedableRng};
use crate::{
    boosting::{
        fit_stage_componentwise, random_sample_mask, update_with_dropout,
        BoostingConfig, ComponentwiseLearner, TrainingTrace,
    },
    breslow::BreslowEstimator,
    data::SurvivalData,
    error::{SurvivalError, Result},
    functions::StepFunction,
    loss::SurvivalLoss,
    regressor::{LeastSquaresRegressor, Regressor},
};

/// gradient boosted additive model, one feature per stage
#[derive(Debug, Clone)]
pub struct ComponentwiseGradientBoosting<R: Regressor = LeastSquaresRegressor> {
    config: BoostingConfig,
    base_regressor: R,                 // cloned for every candidate fit
    state: Option<FittedState<R>>,     // None until the first successful fit
}

/// everything a fit produces; replaced wholesale so a failed fit leaves no trace
#[derive(Debug, Clone)]
struct FittedState<R> {
    estimators: Vec<ComponentwiseLearner<R>>,
    trace: TrainingTrace,
    scale: Option<Vec<f64>>,           // per-stage dropout scale
    rng: StdRng,
    loss: SurvivalLoss,
    learning_rate: f64,
    n_features_in: usize,
    feature_names_in: Option<Vec<String>>,
    baseline: Option<BreslowEstimator>, // cox loss only
}

impl<R: Regressor> FittedState<R> {
    fn stage_scale(&self, stage: usize) -> f64 {
        self.scale.as_ref().and_then(|s| s.get(stage)).copied().unwrap_or(1.0)
    }

    /// learning_rate * sum_m scale_m * h_m(x) on a design matrix with intercept
    fn raw_predict(&self, xi: ArrayView2<f64>) -> Array1<f64> {
        let mut raw = Array1::zeros(xi.nrows());
        for (m, estimator) in self.estimators.iter().enumerate() {
            raw.scaled_add(self.learning_rate * self.stage_scale(m), &estimator.predict(xi));
        }
        raw
    }
}

impl Default for ComponentwiseGradientBoosting<LeastSquaresRegressor> {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentwiseGradientBoosting<LeastSquaresRegressor> {
    /// new model with least squares base learners & default config
    pub fn new() -> Self {
        Self::with_base_regressor(LeastSquaresRegressor::new())
    }
}

impl<R: Regressor> ComponentwiseGradientBoosting<R> {
    /// new model that fits clones of `regr` on single columns
    pub fn with_base_regressor(regr: R) -> Self {
        Self {
            config: BoostingConfig::default(),
            base_regressor: regr,
            state: None,
        }
    }

    pub fn with_config(mut self, config: BoostingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_loss(mut self, loss: SurvivalLoss) -> Self {
        self.config.loss = loss;
        self
    }

    /// shrinkage applied to every stage
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.config.learning_rate = learning_rate;
        self
    }

    /// total number of stages after the next fit
    pub fn with_n_estimators(mut self, n_estimators: usize) -> Self {
        self.config.n_estimators = n_estimators;
        self
    }

    /// fraction of samples drawn for each stage, < 1 enables out-of-bag scores
    pub fn with_subsample(mut self, subsample: f64) -> Self {
        self.config.subsample = subsample;
        self
    }

    /// keep fitted stages and add more on the next fit
    pub fn with_warm_start(mut self, warm_start: bool) -> Self {
        self.config.warm_start = warm_start;
        self
    }

    pub fn with_dropout_rate(mut self, dropout_rate: f64) -> Self {
        self.config.dropout_rate = dropout_rate;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.config.random_state = Some(seed);
        self
    }

    pub fn config(&self) -> &BoostingConfig {
        &self.config
    }

    pub fn base_regressor(&self) -> &R {
        &self.base_regressor
    }

    /// fit the ensemble - or extend it when warm starting
    pub fn fit(&mut self, data: &SurvivalData) -> Result<&mut Self> {
        self.config.validate()?;
        let config = self.config.clone();

        let n_samples = data.n_samples();
        if n_samples < 2 {
            return Err(SurvivalError::invalid_survival_data(
                format!("need at least 2 samples, got {}", n_samples)
            ));
        }
        if data.target().n_events() == 0 {
            return Err(SurvivalError::invalid_survival_data("all samples are censored"));
        }

        if !config.warm_start {
            self.state = None;
        }

        let loss = config.loss;
        let events = data.events();
        let times = if loss.is_time_domain() {
            if data.times().iter().any(|&t| t <= 0.0) {
                return Err(SurvivalError::invalid_survival_data(
                    format!("{} loss needs strictly positive times", loss)
                ));
            }
            data.times().mapv(f64::ln)
        } else {
            data.times().to_owned()
        };
        let sample_weight = data.sample_weight();
        let xi = with_intercept(data.covariates());

        let (mut state, mut raw_predictions) = match &self.state {
            Some(previous) => self.resume(previous, data, &xi)?,
            None => {
                let rng = match config.random_state {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };
                let state = FittedState {
                    estimators: Vec::with_capacity(config.n_estimators),
                    trace: TrainingTrace::new(config.do_oob()),
                    scale: config.do_dropout().then(|| vec![1.0; config.n_estimators]),
                    rng,
                    loss,
                    learning_rate: config.learning_rate,
                    n_features_in: data.n_features(),
                    feature_names_in: data.feature_names().map(<[String]>::to_vec),
                    baseline: None,
                };
                (state, Array1::zeros(n_samples))
            }
        };

        let begin_at_stage = state.estimators.len();
        let n_inbag = ((config.subsample * n_samples as f64) as usize).max(1);
        let mut initial_oob_loss = f64::NAN;

        log::info!(
            "fitting stages {}..{} with {} loss on {} samples x {} features",
            begin_at_stage, config.n_estimators, loss, n_samples, data.n_features()
        );

        for stage in begin_at_stage..config.n_estimators {
            let mut stage_weight = sample_weight.to_owned();
            let mut inbag = Vec::new();
            let mut oob = Vec::new();

            if config.do_oob() {
                let mask = random_sample_mask(n_samples, n_inbag, &mut state.rng);
                for (idx, &in_bag) in mask.iter().enumerate() {
                    if in_bag {
                        inbag.push(idx);
                    } else {
                        oob.push(idx);
                        stage_weight[idx] = 0.0;
                    }
                }
                if stage == 0 {
                    initial_oob_loss = subset_loss(loss, events, &times, &raw_predictions, sample_weight, &oob)?;
                }
            }

            let residuals = loss.gradient(events, times.view(), raw_predictions.view(), Some(sample_weight))?;
            let (learner, stage_error) = fit_stage_componentwise(
                xi.view(), residuals.view(), stage_weight.view(), &self.base_regressor,
            )?;
            let component = learner.component();
            state.estimators.push(learner);

            let n_scale = state.scale.as_ref().map_or(0, Vec::len);
            match state.scale.as_mut() {
                Some(scale) if config.do_dropout() && stage + 1 < n_scale => {
                    update_with_dropout(
                        stage, xi.view(), &mut raw_predictions, scale, &state.estimators,
                        config.learning_rate, config.dropout_rate, &mut state.rng,
                    )?;
                }
                _ => {
                    // last stage, or no dropout
                    let factor = config.learning_rate * state.stage_scale(stage);
                    raw_predictions.scaled_add(factor, &state.estimators[stage].predict(xi.view()));
                }
            }

            if config.do_oob() {
                let train_loss = subset_loss(loss, events, &times, &raw_predictions, sample_weight, &inbag)?;
                let oob_loss = subset_loss(loss, events, &times, &raw_predictions, sample_weight, &oob)?;
                state.trace.train_score.push(train_loss);

                if let Some(trace) = state.trace.oob.as_mut() {
                    let previous = if stage == 0 {
                        initial_oob_loss
                    } else {
                        trace.scores.get(stage - 1).copied().unwrap_or(f64::NAN)
                    };
                    trace.improvement.push(previous - oob_loss);
                    trace.scores.push(oob_loss);
                    trace.score = oob_loss;
                }
                log::debug!(
                    "stage {}: component {} (error {:.4e}), train loss {:.6}, oob improvement {:.6}",
                    stage, component, stage_error, train_loss,
                    state.trace.oob.as_ref().and_then(|t| t.improvement.last()).copied().unwrap_or(f64::NAN)
                );
            } else {
                let train_loss = loss.loss(events, times.view(), raw_predictions.view(), Some(sample_weight))?;
                state.trace.train_score.push(train_loss);
                if let Some(trace) = state.trace.oob.as_mut() {
                    // out-of-bag history from an earlier fit keeps one entry per stage
                    trace.scores.push(0.0);
                    trace.improvement.push(0.0);
                }
                log::debug!(
                    "stage {}: component {} (error {:.4e}), train loss {:.6}",
                    stage, component, stage_error, train_loss
                );
            }
        }

        state.baseline = if loss == SurvivalLoss::CoxPH {
            let risk_score = loss.scale_raw_prediction(state.raw_predict(xi.view()));
            Some(BreslowEstimator::fit(risk_score.view(), events, data.times())?)
        } else {
            None
        };

        log::info!(
            "fitted {} stages, final train loss {:.6}",
            state.estimators.len(),
            state.trace.train_score.last().copied().unwrap_or(f64::NAN)
        );

        self.state = Some(state);
        Ok(self)
    }

    /// warm start: copy the fitted state and make room for the new stages
    fn resume(
        &self,
        previous: &FittedState<R>,
        data: &SurvivalData,
        xi: &Array2<f64>,
    ) -> Result<(FittedState<R>, Array1<f64>)> {
        let config = &self.config;
        let n_fitted = previous.estimators.len();

        if config.n_estimators < n_fitted {
            return Err(SurvivalError::invalid_parameter(
                "n_estimators",
                format!("{} must be >= fitted stages ({}) when warm starting", config.n_estimators, n_fitted),
            ));
        }
        if data.n_features() != previous.n_features_in {
            return Err(SurvivalError::invalid_dimensions(
                format!("warm start with {} features, model was fitted on {}", data.n_features(), previous.n_features_in)
            ));
        }
        if config.do_dropout() && previous.scale.is_none() {
            return Err(SurvivalError::invalid_parameter(
                "dropout_rate",
                format!("{} requested but the model was fitted without dropout", config.dropout_rate),
            ));
        }

        let mut state = previous.clone();
        state.loss = config.loss;
        state.learning_rate = config.learning_rate;
        state.baseline = None;
        state.trace.prepare_warm_start(config.do_oob());

        let mut raw_predictions = state.raw_predict(xi.view());

        if let Some(scale) = state.scale.as_mut() {
            scale.resize(config.n_estimators.max(n_fitted), 1.0);
            if config.do_dropout() && n_fitted > 0 && n_fitted < config.n_estimators {
                update_with_dropout(
                    n_fitted - 1, xi.view(), &mut raw_predictions, scale, &state.estimators,
                    config.learning_rate, config.dropout_rate, &mut state.rng,
                )?;
            }
        }

        log::debug!("warm start from {} fitted stages", n_fitted);
        Ok((state, raw_predictions))
    }

    fn fitted_state(&self) -> Result<&FittedState<R>> {
        self.state.as_ref().ok_or(SurvivalError::ModelNotFitted)
    }

    /// raw ensemble output; checks the column count
    fn raw_predict(&self, covariates: ArrayView2<f64>) -> Result<(SurvivalLoss, Array1<f64>)> {
        let state = self.fitted_state()?;
        if covariates.ncols() != state.n_features_in {
            return Err(SurvivalError::invalid_dimensions(
                format!("feature count mismatch: expected {}, got {}", state.n_features_in, covariates.ncols())
            ));
        }
        let xi = with_intercept(covariates);
        Ok((state.loss, state.raw_predict(xi.view())))
    }

    /// log hazard ratio (cox) or predicted time (time-domain losses)
    pub fn predict(&self, covariates: ArrayView2<f64>) -> Result<Array1<f64>> {
        let (loss, raw) = self.raw_predict(covariates)?;
        Ok(loss.scale_raw_prediction(raw))
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    /// breslow baseline, only present after a cox fit
    pub fn baseline_model(&self) -> Result<&BreslowEstimator> {
        self.fitted_state()?
            .baseline
            .as_ref()
            .ok_or(SurvivalError::NoBaselineModel)
    }

    pub fn predict_cumulative_hazard_function(&self, covariates: ArrayView2<f64>) -> Result<Vec<StepFunction>> {
        let baseline = self.baseline_model()?;
        let risk_score = self.predict(covariates)?;
        baseline.cumulative_hazard_functions(risk_score.view())
    }

    /// cumulative hazard at `unique_times()`, samples x times
    pub fn predict_cumulative_hazard_array(&self, covariates: ArrayView2<f64>) -> Result<Array2<f64>> {
        let baseline = self.baseline_model()?;
        let risk_score = self.predict(covariates)?;
        Ok(baseline.cumulative_hazard_array(risk_score.view()))
    }

    pub fn predict_survival_function(&self, covariates: ArrayView2<f64>) -> Result<Vec<StepFunction>> {
        let baseline = self.baseline_model()?;
        let risk_score = self.predict(covariates)?;
        baseline.survival_functions(risk_score.view())
    }

    /// survival probability at `unique_times()`, samples x times
    pub fn predict_survival_array(&self, covariates: ArrayView2<f64>) -> Result<Array2<f64>> {
        let baseline = self.baseline_model()?;
        let risk_score = self.predict(covariates)?;
        Ok(baseline.survival_array(risk_score.view()))
    }

    pub fn unique_times(&self) -> Result<ArrayView1<'_, f64>> {
        Ok(self.baseline_model()?.unique_times())
    }

    /// Aggregated linear coefficients, element 0 is the intercept.
    ///
    /// Needs a base regressor that reports `(intercept, slope)`; the
    /// intercept of every stage is folded into element 0.
    pub fn coef(&self) -> Result<Array1<f64>> {
        let state = self.fitted_state()?;
        let mut coef = Array1::zeros(state.n_features_in + 1);

        for (m, estimator) in state.estimators.iter().enumerate() {
            let (intercept, slope) = estimator.regressor().coefficients().ok_or_else(|| {
                SurvivalError::invalid_parameter("base_regressor", "does not expose linear coefficients")
            })?;
            let factor = state.learning_rate * state.stage_scale(m);
            coef[0] += factor * intercept;
            coef[estimator.component()] += factor * slope;
        }
        Ok(coef)
    }

    /// first (1-based) stage each column was selected at, NaN if never; element 0 is the intercept
    pub fn feature_importances(&self) -> Result<Array1<f64>> {
        let state = self.fitted_state()?;
        let mut importances = Array1::from_elem(state.n_features_in + 1, f64::NAN);
        for (k, estimator) in state.estimators.iter().enumerate() {
            let slot = &mut importances[estimator.component()];
            if slot.is_nan() {
                *slot = (k + 1) as f64;
            }
        }
        Ok(importances)
    }

    pub fn estimators(&self) -> Result<&[ComponentwiseLearner<R>]> {
        Ok(&self.fitted_state()?.estimators)
    }

    pub fn n_estimators_fitted(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.estimators.len())
    }

    /// loss per stage, on the in-bag samples when subsampling
    pub fn train_score(&self) -> Result<&[f64]> {
        Ok(&self.fitted_state()?.trace.train_score)
    }

    pub fn oob_improvement(&self) -> Option<&[f64]> {
        self.state.as_ref()?.trace.oob.as_ref().map(|t| t.improvement.as_slice())
    }

    pub fn oob_scores(&self) -> Option<&[f64]> {
        self.state.as_ref()?.trace.oob.as_ref().map(|t| t.scores.as_slice())
    }

    /// out-of-bag loss after the last stage
    pub fn oob_score(&self) -> Option<f64> {
        self.state.as_ref()?.trace.oob.as_ref().map(|t| t.score)
    }

    pub fn dropout_scale(&self) -> Option<&[f64]> {
        self.state.as_ref()?.scale.as_deref()
    }

    pub fn n_features_in(&self) -> Result<usize> {
        Ok(self.fitted_state()?.n_features_in)
    }

    pub fn feature_names_in(&self) -> Option<&[String]> {
        self.state.as_ref()?.feature_names_in.as_deref()
    }

    /// summary of the fitted ensemble
    pub fn summary(&self) -> Result<BoostingSummary> {
        let state = self.fitted_state()?;
        Ok(BoostingSummary {
            loss: state.loss,
            learning_rate: state.learning_rate,
            n_estimators: state.estimators.len(),
            coefficients: self.coef().ok(),
            first_selected: self.feature_importances()?,
            final_train_loss: state.trace.train_score.last().copied().unwrap_or(f64::NAN),
            oob_score: state.trace.oob.as_ref().map(|t| t.score),
            feature_names: state.feature_names_in.clone(),
        })
    }
}

/// what the ensemble ended up selecting
#[derive(Debug, Clone)]
pub struct BoostingSummary {
    pub loss: SurvivalLoss,
    pub learning_rate: f64,
    pub n_estimators: usize,
    pub coefficients: Option<Array1<f64>>,  // None for non-linear base learners
    pub first_selected: Array1<f64>,        // 1-based stage, NaN if never selected
    pub final_train_loss: f64,
    pub oob_score: Option<f64>,
    pub feature_names: Option<Vec<String>>,
}

impl BoostingSummary {
    /// print out what the ensemble learned
    pub fn print(&self) {
        println!("componentwise gradient boosting summary");
        println!("=======================================");
        println!("loss: {}", self.loss);
        println!("learning rate: {:.4}", self.learning_rate);
        println!("stages: {}", self.n_estimators);
        println!("final train loss: {:.6}", self.final_train_loss);
        if let Some(oob) = self.oob_score {
            println!("oob loss: {:.6}", oob);
        }
        println!();

        println!("{:<20} {:>12} {:>14}", "feature", "coefficient", "first stage");
        println!("{:-<48}", "");

        for (i, &first) in self.first_selected.iter().enumerate() {
            let name = match (i, &self.feature_names) {
                (0, _) => "(intercept)".to_string(),
                (_, Some(names)) => names[i - 1].clone(),
                (_, None) => format!("x{}", i - 1),
            };
            let coef = self.coefficients.as_ref()
                .map_or_else(|| "-".to_string(), |c| format!("{:.6}", c[i]));
            let stage = if first.is_nan() { "-".to_string() } else { format!("{}", first) };
            println!("{:<20} {:>12} {:>14}", name, coef, stage);
        }
    }
}

/// prepend a column of ones
fn with_intercept(covariates: ArrayView2<f64>) -> Array2<f64> {
    let mut xi = Array2::ones((covariates.nrows(), covariates.ncols() + 1));
    xi.slice_mut(s![.., 1..]).assign(&covariates);
    xi
}

/// loss restricted to `indices`
fn subset_loss(
    loss: SurvivalLoss,
    events: &[bool],
    times: &Array1<f64>,
    raw_predictions: &Array1<f64>,
    sample_weight: ArrayView1<f64>,
    indices: &[usize],
) -> Result<f64> {
    let sub_events: Vec<bool> = indices.iter().map(|&i| events[i]).collect();
    let sub_times = times.select(Axis(0), indices);
    let sub_pred = raw_predictions.select(Axis(0), indices);
    let sub_weight = sample_weight.select(Axis(0), indices);
    loss.loss(&sub_events, sub_times.view(), sub_pred.view(), Some(sub_weight.view()))
}
