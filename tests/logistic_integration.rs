use bess::{BessConfig, CvConfig, DesignMatrix, Family, Response, ScreeningConfig, fit_bess};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Logistic data with three strong signal columns out of fifteen.
fn simulated_logistic(seed: u64) -> (Array2<f64>, Array1<f64>) {
    let n = 400;
    let p = 15;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut x = Array2::<f64>::zeros((n, p));
    for i in 0..n {
        for j in 0..p {
            x[[i, j]] = rng.random_range(-1.0..1.0);
        }
    }
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let eta = 3.0 * x[[i, 0]] - 3.0 * x[[i, 5]] + 2.5 * x[[i, 11]];
        let prob = 1.0 / (1.0 + (-eta).exp());
        y[i] = if rng.random_range(0.0..1.0) < prob {
            1.0
        } else {
            0.0
        };
    }
    (x, y)
}

#[test]
fn logistic_path_recovers_the_signal_columns() {
    let (x, y) = simulated_logistic(101);
    let mut config = BessConfig::new(Family::Logistic);
    config.path.s_min = 1;
    config.path.s_max = 6;
    config.threads = 1;
    let fit = fit_bess(DesignMatrix::from(x), Response::Binary(y), None, &config)
        .expect("logistic fit should succeed");

    for j in [0usize, 5, 11] {
        assert!(fit.support.contains(&j), "signal column {j} missing");
    }
    // Sign pattern of the recovered effects.
    assert!(fit.beta[0] > 0.0);
    assert!(fit.beta[5] < 0.0);
    assert!(fit.beta[11] > 0.0);
}

#[test]
fn screening_does_not_lose_strong_logistic_signal() {
    let (x, y) = simulated_logistic(57);
    let mut config = BessConfig::new(Family::Logistic);
    config.path.s_min = 3;
    config.path.s_max = 3;
    config.screening = Some(ScreeningConfig { keep: 8 });
    config.threads = 1;
    let fit = fit_bess(DesignMatrix::from(x), Response::Binary(y), None, &config)
        .expect("screened fit should succeed");

    assert_eq!(fit.support.len(), 3);
    for j in [0usize, 5, 11] {
        assert!(
            fit.support.contains(&j),
            "signal column {j} lost by screening"
        );
    }
}

#[test]
fn cross_validated_logistic_selection_stays_within_path_bounds() {
    let (x, y) = simulated_logistic(29);
    let mut config = BessConfig::new(Family::Logistic);
    config.path.s_min = 1;
    config.path.s_max = 6;
    config.selection.cross_validation = Some(CvConfig { folds: 5, seed: 3 });
    config.threads = 1;
    let fit = fit_bess(DesignMatrix::from(x), Response::Binary(y), None, &config)
        .expect("cross-validated fit should succeed");

    assert!((1..=6).contains(&fit.support.len()));
    // Mean held-out loss of the winner is the path minimum.
    let min_score = fit
        .path
        .iter()
        .map(|r| r.score)
        .fold(f64::INFINITY, f64::min);
    let winner = fit
        .path
        .iter()
        .find(|r| r.support_size == fit.best_support_size)
        .expect("winner on path");
    assert_eq!(winner.score, min_score);
    for j in [0usize, 5, 11] {
        assert!(fit.support.contains(&j), "signal column {j} missing");
    }
}

#[test]
fn approximate_newton_scoring_still_finds_the_signal() {
    let (x, y) = simulated_logistic(83);
    let mut config = BessConfig::new(Family::Logistic);
    config.path.s_min = 3;
    config.path.s_max = 3;
    config.splicing.approximate_newton = true;
    config.threads = 1;
    let fit = fit_bess(DesignMatrix::from(x), Response::Binary(y), None, &config)
        .expect("approximate-Newton fit should succeed");

    assert_eq!(fit.support.len(), 3);
    for j in [0usize, 5, 11] {
        assert!(fit.support.contains(&j), "signal column {j} missing");
    }
}
