use bess::{BessConfig, DesignMatrix, Family, FitStatus, IcType, Response, fit_bess};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Deterministic 100x10 Gaussian problem with three strong signal columns.
fn simulated_gaussian(seed: u64, noise_sd: f64) -> (Array2<f64>, Array1<f64>) {
    let n = 100;
    let p = 10;
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, noise_sd).expect("normal params must be valid");
    let mut x = Array2::<f64>::zeros((n, p));
    for i in 0..n {
        for j in 0..p {
            x[[i, j]] = rng.random_range(-1.0..1.0);
        }
    }
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        y[i] = 1.5 + 4.0 * x[[i, 1]] - 3.0 * x[[i, 4]] + 2.5 * x[[i, 8]] + noise.sample(&mut rng);
    }
    (x, y)
}

fn base_config() -> BessConfig {
    let mut config = BessConfig::new(Family::Gaussian);
    config.path.s_min = 1;
    config.path.s_max = 5;
    config.selection.criterion = IcType::Bic;
    config.threads = 1;
    config
}

#[test]
fn ic_path_selects_minimum_score_within_bounds() {
    let (x, y) = simulated_gaussian(2026, 0.1);
    let config = base_config();
    let fit = fit_bess(
        DesignMatrix::from(x),
        Response::Continuous(y),
        None,
        &config,
    )
    .expect("fit should succeed");

    assert!(
        (1..=5).contains(&fit.support.len()),
        "support size {} outside configured bounds",
        fit.support.len()
    );

    // Every size on the sequential path was evaluated.
    let sizes: Vec<usize> = fit.path.iter().map(|r| r.support_size).collect();
    assert_eq!(sizes, vec![1, 2, 3, 4, 5]);

    // The selected position carries the minimum score over the whole path.
    let min_score = fit
        .path
        .iter()
        .map(|r| r.score)
        .fold(f64::INFINITY, f64::min);
    let selected = fit
        .path
        .iter()
        .find(|r| r.support_size == fit.best_support_size)
        .expect("selected size must be on the path");
    assert_eq!(selected.score, min_score);

    // Strong signal columns must be recovered.
    for j in [1usize, 4, 8] {
        assert!(fit.support.contains(&j), "signal column {j} missing");
    }
    assert!(fit.best_support_size >= 3);
}

#[test]
fn repeated_single_thread_runs_are_identical() {
    let (x, y) = simulated_gaussian(7, 0.3);
    let config = base_config();
    let run = || {
        fit_bess(
            DesignMatrix::from(x.clone()),
            Response::Continuous(y.clone()),
            None,
            &config,
        )
        .expect("fit should succeed")
    };
    let a = run();
    let b = run();
    assert_eq!(a.support, b.support);
    assert_eq!(a.beta, b.beta);
    assert_eq!(a.intercept, b.intercept);
    assert_eq!(a.best_support_size, b.best_support_size);
}

#[test]
fn standardized_and_raw_fits_predict_equivalently() {
    let (x, y) = simulated_gaussian(11, 0.2);

    // Pin the support size so both runs compare the same model class.
    let mut config = base_config();
    config.path.s_min = 3;
    config.path.s_max = 3;

    let mut raw_config = config.clone();
    raw_config.standardize = false;
    config.standardize = true;

    let standardized = fit_bess(
        DesignMatrix::from(x.clone()),
        Response::Continuous(y.clone()),
        None,
        &config,
    )
    .expect("standardized fit should succeed");
    let raw = fit_bess(
        DesignMatrix::from(x.clone()),
        Response::Continuous(y.clone()),
        None,
        &raw_config,
    )
    .expect("raw fit should succeed");

    assert_eq!(standardized.support, raw.support);
    let pred_std = standardized.linear_predictor(x.view());
    let pred_raw = raw.linear_predictor(x.view());
    let max_diff = pred_std
        .iter()
        .zip(pred_raw.iter())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0f64, f64::max);
    assert!(
        max_diff < 1e-6,
        "standardization round trip drifted by {max_diff:.3e}"
    );
}

#[test]
fn growing_s_max_never_drops_smaller_sizes_from_the_path() {
    let (x, y) = simulated_gaussian(23, 0.4);
    let mut small = base_config();
    small.path.s_max = 4;
    let mut large = base_config();
    large.path.s_max = 7;

    let fit_small = fit_bess(
        DesignMatrix::from(x.clone()),
        Response::Continuous(y.clone()),
        None,
        &small,
    )
    .expect("fit should succeed");
    let fit_large = fit_bess(
        DesignMatrix::from(x),
        Response::Continuous(y),
        None,
        &large,
    )
    .expect("fit should succeed");

    let sizes_small: Vec<usize> = fit_small.path.iter().map(|r| r.support_size).collect();
    let sizes_large: Vec<usize> = fit_large.path.iter().map(|r| r.support_size).collect();
    for s in &sizes_small {
        assert!(
            sizes_large.contains(s),
            "size {s} evaluated with s_max=4 but missing with s_max=7"
        );
    }
}

#[test]
fn zero_splicing_budget_returns_initial_sets_flagged_nonconverged() {
    let (x, y) = simulated_gaussian(31, 0.2);
    let mut config = base_config();
    config.splicing.max_iter = 0;
    let fit = fit_bess(
        DesignMatrix::from(x),
        Response::Continuous(y),
        None,
        &config,
    )
    .expect("fit should succeed");

    assert_eq!(fit.status, FitStatus::MaxIterationsReached);
    for record in &fit.path {
        assert_eq!(record.status, FitStatus::MaxIterationsReached);
        assert_eq!(record.splicing_iterations, 0);
        assert_eq!(record.active_groups.len(), record.support_size);
    }
}

#[test]
fn ridge_path_evaluates_the_full_grid_and_reports_the_winner() {
    let (x, y) = simulated_gaussian(47, 0.3);
    let mut config = base_config();
    config.path.s_min = 3;
    config.path.s_max = 3;
    config.path.lambda_min = 1e-4;
    config.path.lambda_max = 1.0;
    config.path.n_lambda = 4;
    let fit = fit_bess(
        DesignMatrix::from(x),
        Response::Continuous(y),
        None,
        &config,
    )
    .expect("fit should succeed");

    assert_eq!(fit.path.len(), 4, "one record per ridge grid point");
    assert!(
        fit.path.iter().any(|r| r.lambda == fit.best_lambda),
        "winning lambda must come from the grid"
    );
    // Weak ridge should win on this strong, well-conditioned signal.
    assert!(fit.best_lambda < 1.0);
}
