use survboost::{
    brier_score, concordance_index_censored, concordance_index_ipcw, cumulative_dynamic_auc,
    integrated_brier_score, ComponentwiseGradientBoosting, RegressionStump, SurvivalData,
    SurvivalLoss, DEFAULT_TIED_TOL,
};
use ndarray::{Array1, Array2};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG=debug shows the per-stage trace
    env_logger::init();

    println!("Componentwise Gradient Boosting - Basic Usage Example");
    println!("=====================================================\n");

    let times = vec![1.2, 2.1, 3.5, 4.2, 5.8, 6.1, 7.3, 8.9, 9.2, 10.5,
                     2.3, 3.1, 4.8, 5.2, 6.9, 7.1, 8.3, 9.8, 10.1, 11.2];

    let events = vec![true, false, true, true, false, true, true, false, true, false,
                      true, true, false, true, true, false, true, true, false, true];

    // Covariates: age, treatment (0/1), biomarker_level
    let covariates = Array2::from_shape_vec((20, 3), vec![
        65.0, 0.0, 2.3,
        70.0, 1.0, 1.8,
        55.0, 0.0, 3.1,
        62.0, 1.0, 2.1,
        68.0, 0.0, 2.8,
        72.0, 1.0, 1.5,
        58.0, 0.0, 3.4,
        66.0, 1.0, 1.9,
        71.0, 0.0, 2.6,
        59.0, 1.0, 2.0,
        63.0, 0.0, 2.9,
        69.0, 1.0, 1.7,
        57.0, 0.0, 3.2,
        64.0, 1.0, 2.2,
        67.0, 0.0, 2.7,
        73.0, 1.0, 1.6,
        61.0, 0.0, 3.0,
        65.0, 1.0, 1.8,
        70.0, 0.0, 2.5,
        56.0, 1.0, 2.4,
    ])?;

    let feature_names = vec![
        "Age".to_string(),
        "Treatment".to_string(),
        "Biomarker Level".to_string(),
    ];
    let data = SurvivalData::new(times, events, covariates)?
        .with_feature_names(feature_names)?;

    println!("Dataset Information:");
    println!("  - Number of samples: {}", data.n_samples());
    println!("  - Number of features: {}", data.n_features());
    println!("  - Number of events: {}", data.target().n_events());
    println!("  - Number of censored: {}", data.n_samples() - data.target().n_events());
    println!();

    // Example 1: Cox partial likelihood
    println!("Example 1: Boosting the Cox Partial Likelihood");
    println!("----------------------------------------------");

    let mut cox_model = ComponentwiseGradientBoosting::new()
        .with_n_estimators(100)
        .with_learning_rate(0.1);
    cox_model.fit(&data)?;
    cox_model.summary()?.print();
    println!();

    let risk_scores = cox_model.predict(data.covariates())?;
    let harrell = concordance_index_censored(data.events(), data.times(), risk_scores.view(), DEFAULT_TIED_TOL)?;
    let uno = concordance_index_ipcw(data.target(), data.target(), risk_scores.view(), None, DEFAULT_TIED_TOL)?;
    println!("Harrell's C-index: {:.4} ({} concordant, {} discordant, {} tied)",
             harrell.cindex, harrell.concordant, harrell.discordant, harrell.tied_risk);
    println!("Uno's C-index:     {:.4}", uno.cindex);
    println!("\n");

    // Example 2: subsampling and dropout
    println!("Example 2: Subsampling with Out-of-Bag Tracking + Dropout");
    println!("---------------------------------------------------------");

    let mut oob_model = ComponentwiseGradientBoosting::new()
        .with_n_estimators(50)
        .with_subsample(0.7)
        .with_dropout_rate(0.1)
        .with_random_state(42);
    oob_model.fit(&data)?;

    if let (Some(improvement), Some(score)) = (oob_model.oob_improvement(), oob_model.oob_score()) {
        let total: f64 = improvement.iter().sum();
        println!("  cumulative oob improvement: {:.4}", total);
        println!("  final oob loss: {:.4}", score);
    }
    if let Some(scale) = oob_model.dropout_scale() {
        let min_scale = scale.iter().copied().fold(f64::INFINITY, f64::min);
        println!("  smallest dropout scale: {:.4}", min_scale);
    }
    println!();

    // Example 3: warm start
    println!("Example 3: Warm Start");
    println!("---------------------");

    let mut cox_model = cox_model.with_n_estimators(150).with_warm_start(true);
    cox_model.fit(&data)?;
    let train_score = cox_model.train_score()?;
    println!("  stages fitted: {}", cox_model.n_estimators_fitted());
    println!("  train loss after 100 / 150 stages: {:.4} / {:.4}",
             train_score[99], train_score[149]);
    println!();

    // Example 4: accelerated failure time style losses
    println!("Example 4: Time-Domain Losses");
    println!("-----------------------------");

    for loss in [SurvivalLoss::CensoredSquared, SurvivalLoss::IpcwLeastSquares] {
        let mut model = ComponentwiseGradientBoosting::new()
            .with_loss(loss)
            .with_n_estimators(100);
        model.fit(&data)?;
        let predicted_time = model.predict(data.covariates())?;
        let risk = predicted_time.mapv(|t| -t);
        let c = concordance_index_censored(data.events(), data.times(), risk.view(), DEFAULT_TIED_TOL)?;
        println!("  {:<8} first predicted time = {:.3}, C-index = {:.4}", loss.name(), predicted_time[0], c.cindex);
    }
    println!();

    // Example 5: survival curves for new patients
    println!("Example 5: Survival Probability Predictions");
    println!("-------------------------------------------");

    let new_patients = Array2::from_shape_vec((3, 3), vec![
        60.0, 0.0, 2.5,
        75.0, 1.0, 1.2,
        52.0, 0.0, 3.8,
    ])?;
    let time_points = Array1::from(vec![1.0, 2.0, 3.0, 5.0, 10.0]);
    let survival = cox_model.predict_survival_function(new_patients.view())?;

    println!("Time:       1.0    2.0    3.0    5.0   10.0");
    for (i, curve) in survival.iter().enumerate() {
        print!("Patient {}: ", (b'A' + i as u8) as char);
        for p in curve.evaluate_many(time_points.view())?.iter() {
            print!(" {:.3}", p);
        }
        println!();
    }
    println!();

    // Example 6: time-dependent evaluation
    println!("Example 6: Time-Dependent Evaluation");
    println!("------------------------------------");

    let eval_times = Array1::from(vec![3.0, 5.0, 7.0, 9.0]);
    let auc = cumulative_dynamic_auc(data.target(), data.target(), risk_scores.view(), eval_times.view(), DEFAULT_TIED_TOL)?;

    let curves = cox_model.predict_survival_function(data.covariates())?;
    let mut estimate = Array2::zeros((data.n_samples(), eval_times.len()));
    for (mut row, curve) in estimate.rows_mut().into_iter().zip(curves.iter()) {
        row.assign(&curve.evaluate_many(eval_times.view())?);
    }
    let brier = brier_score(data.target(), data.target(), estimate.view(), eval_times.view(), None)?;
    let ibs = integrated_brier_score(data.target(), data.target(), estimate.view(), eval_times.view(), None)?;

    println!("{:<8} {:>8} {:>8}", "Time", "AUC", "Brier");
    println!("{:-<26}", "");
    for ((t, a), b) in eval_times.iter().zip(auc.auc.iter()).zip(brier.scores.iter()) {
        println!("{:<8.1} {:>8.4} {:>8.4}", t, a, b);
    }
    println!("mean AUC: {:.4}", auc.mean_auc);
    println!("integrated Brier score: {:.4}", ibs);
    println!();

    // Example 7: stumps instead of linear base learners
    println!("Example 7: Regression Stumps as Base Learners");
    println!("---------------------------------------------");

    let mut stump_model = ComponentwiseGradientBoosting::with_base_regressor(RegressionStump::new())
        .with_n_estimators(100);
    stump_model.fit(&data)?;
    let stump_scores = stump_model.predict(data.covariates())?;
    let stump_c = concordance_index_censored(data.events(), data.times(), stump_scores.view(), DEFAULT_TIED_TOL)?;
    println!("  C-index: {:.4}", stump_c.cindex);
    stump_model.summary()?.print();

    println!("\nInterpretation:");
    println!("- C-index / AUC: Higher is better (0.5 = random, 1.0 = perfect)");
    println!("- Brier score: Lower is better (0.25 = constant 0.5 prediction)");

    Ok(())
}
