use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use crate::error::{SurvivalError, Result};

/// (event, time) records - the response of a survival dataset
#[derive(Debug, Clone, PartialEq)]
pub struct SurvivalTarget {
    events: Array1<bool>,   // true = event, false = censored
    times: Array1<f64>,     // time to event/censoring
}

impl SurvivalTarget {
    /// make new survival records from raw vecs
    pub fn new(events: Vec<bool>, times: Vec<f64>) -> Result<Self> {
        if events.len() != times.len() {
            return Err(SurvivalError::invalid_dimensions(
                format!("events len ({}) != times len ({})", events.len(), times.len())
            ));
        }

        if times.iter().any(|&t| t < 0.0 || !t.is_finite()) {
            return Err(SurvivalError::invalid_survival_data(
                "survival times must be non-negative & finite"
            ));
        }

        Ok(Self {
            events: Array1::from(events),
            times: Array1::from(times),
        })
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// event indicators (true = event, false = censored)
    pub fn events(&self) -> &[bool] {
        self.events.as_slice().unwrap_or(&[])
    }

    /// survival/censoring times
    pub fn times(&self) -> ArrayView1<'_, f64> {
        self.times.view()
    }

    pub fn n_events(&self) -> usize {
        self.events.iter().filter(|&&e| e).count()
    }

    /// grab a subset of records by indices
    pub fn select(&self, indices: &[usize]) -> Result<Self> {
        if indices.iter().any(|&i| i >= self.len()) {
            return Err(SurvivalError::invalid_dimensions("subset index out of bounds"));
        }

        Ok(Self {
            events: self.events.select(Axis(0), indices),
            times: self.times.select(Axis(0), indices),
        })
    }

    /// metrics need at least two samples and at least one event
    pub fn check_for_metrics(&self) -> Result<()> {
        if self.len() < 2 {
            return Err(SurvivalError::invalid_survival_data("need a minimum of two samples"));
        }
        if self.n_events() == 0 {
            return Err(SurvivalError::invalid_survival_data("all samples are censored"));
        }
        Ok(())
    }
}

/// survival data - times, events, features and per-sample weights
#[derive(Debug, Clone)]
pub struct SurvivalData {
    target: SurvivalTarget,
    covariates: Array2<f64>,              // n_samples x n_features
    sample_weight: Array1<f64>,           // defaults to all ones
    feature_names: Option<Vec<String>>,
}

impl SurvivalData {
    /// make new survival data from raw vecs/arrays
    pub fn new(
        times: Vec<f64>,         // survival/censoring times
        events: Vec<bool>,       // true = event occurred, false = censored
        covariates: Array2<f64>, // feature matrix
    ) -> Result<Self> {
        let n_samples = times.len();

        if covariates.nrows() != n_samples {
            return Err(SurvivalError::invalid_dimensions(
                format!("covariates rows ({}) != n_samples ({})", covariates.nrows(), n_samples)
            ));
        }

        if covariates.iter().any(|v| !v.is_finite()) {
            return Err(SurvivalError::invalid_survival_data("covariates must be finite"));
        }

        let target = SurvivalTarget::new(events, times)?;

        Ok(Self {
            target,
            covariates,
            sample_weight: Array1::ones(n_samples),
            feature_names: None,
        })
    }

    /// attach per-sample weights
    pub fn with_sample_weight(mut self, weights: Vec<f64>) -> Result<Self> {
        if weights.len() != self.n_samples() {
            return Err(SurvivalError::invalid_dimensions(
                format!("sample_weight len ({}) != n_samples ({})", weights.len(), self.n_samples())
            ));
        }
        if weights.iter().any(|&w| w < 0.0 || !w.is_finite()) {
            return Err(SurvivalError::invalid_survival_data(
                "sample weights must be non-negative & finite"
            ));
        }
        self.sample_weight = Array1::from(weights);
        Ok(self)
    }

    /// give names to the feature columns
    pub fn with_feature_names(mut self, names: Vec<String>) -> Result<Self> {
        if names.len() != self.n_features() {
            return Err(SurvivalError::invalid_dimensions(
                format!("got {} feature names for {} features", names.len(), self.n_features())
            ));
        }
        self.feature_names = Some(names);
        Ok(self)
    }

    pub fn n_samples(&self) -> usize {
        self.target.len()
    }

    pub fn n_features(&self) -> usize {
        self.covariates.ncols()
    }

    pub fn target(&self) -> &SurvivalTarget {
        &self.target
    }

    pub fn times(&self) -> ArrayView1<'_, f64> {
        self.target.times()
    }

    pub fn events(&self) -> &[bool] {
        self.target.events()
    }

    pub fn covariates(&self) -> ArrayView2<'_, f64> {
        self.covariates.view()
    }

    pub fn sample_weight(&self) -> ArrayView1<'_, f64> {
        self.sample_weight.view()
    }

    pub fn feature_names(&self) -> Option<&[String]> {
        self.feature_names.as_deref()
    }

    /// unique event times in order
    pub fn event_times(&self) -> Vec<f64> {
        let mut times: Vec<f64> = self.times()
            .iter()
            .zip(self.events().iter())
            .filter_map(|(time, event)| if *event { Some(*time) } else { None })
            .collect();

        times.sort_by(f64::total_cmp);
        times.dedup();
        times
    }

    /// grab a subset of samples by indices
    pub fn subset(&self, indices: &[usize]) -> Result<Self> {
        let target = self.target.select(indices)?;
        Ok(Self {
            target,
            covariates: self.covariates.select(Axis(0), indices),
            sample_weight: self.sample_weight.select(Axis(0), indices),
            feature_names: self.feature_names.clone(),
        })
    }
}
