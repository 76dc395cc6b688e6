//! # survboost
//!
//! componentwise gradient boosting for right-censored survival data, plus the
//! censoring-aware metrics to evaluate it
//!
//! ## what you get
//!
//! - boosting w/ cox partial likelihood, censored squared error or ipcw least squares
//! - subsampling w/ out-of-bag loss tracking, dropout, warm start
//! - breslow cumulative hazard & survival functions for cox fits
//! - harrell's & uno's concordance, cumulative/dynamic auc, (integrated) brier score
//!
//! ## quick start
//!
//! ```rust
//! use survboost::{ComponentwiseGradientBoosting, SurvivalData, concordance_index_censored, DEFAULT_TIED_TOL};
//! use ndarray::Array2;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let times = vec![1.0, 2.5, 3.2, 4.1, 5.0, 6.3];
//! let events = vec![true, false, true, true, false, true]; // true = event, false = censored
//! let covariates = Array2::from_shape_vec((6, 2), vec![
//!     1.0, 0.5,
//!     2.0, 1.0,
//!     1.5, 0.0,
//!     0.5, 1.5,
//!     0.2, 0.3,
//!     0.1, 1.2,
//! ])?;
//! let data = SurvivalData::new(times, events, covariates)?;
//!
//! let mut model = ComponentwiseGradientBoosting::new()
//!     .with_n_estimators(50)
//!     .with_learning_rate(0.1);
//! model.fit(&data)?;
//!
//! let risk_scores = model.predict(data.covariates())?;
//! let c = concordance_index_censored(data.events(), data.times(), risk_scores.view(), DEFAULT_TIED_TOL)?;
//! assert!(c.cindex >= 0.0 && c.cindex <= 1.0);
//!
//! let survival = model.predict_survival_function(data.covariates())?;
//! assert_eq!(survival.len(), 6);
//! # Ok(())
//! # }
//! ```

pub mod boosting;
pub mod breslow;
pub mod data;
pub mod error;
pub mod functions;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod nonparametric;
pub mod regressor;

pub use boosting::{BoostingConfig, ComponentwiseLearner};
pub use breslow::BreslowEstimator;
pub use data::{SurvivalData, SurvivalTarget};
pub use error::{SurvivalError, Result};
pub use functions::StepFunction;
pub use loss::SurvivalLoss;
pub use metrics::{
    brier_score, concordance_index_censored, concordance_index_ipcw, cumulative_dynamic_auc,
    integrated_brier_score, BrierScore, ConcordanceIndex, DynamicAuc, DEFAULT_TIED_TOL,
};
pub use model::{BoostingSummary, ComponentwiseGradientBoosting};
pub use nonparametric::{CensoringDistributionEstimator, SurvivalFunctionEstimator};
pub use regressor::{LeastSquaresRegressor, RegressionStump, Regressor};
