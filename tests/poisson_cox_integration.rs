use bess::{BessConfig, DesignMatrix, Family, Response, fit_bess};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Poisson};

#[test]
fn poisson_path_recovers_the_signal_columns() {
    let n = 300;
    let p = 10;
    let mut rng = StdRng::seed_from_u64(13);
    let mut x = Array2::<f64>::zeros((n, p));
    for i in 0..n {
        for j in 0..p {
            x[[i, j]] = rng.random_range(-1.0..1.0);
        }
    }
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let eta = 0.5 + 1.2 * x[[i, 2]] - 1.0 * x[[i, 7]];
        let sampler = Poisson::new(eta.exp()).expect("positive rate");
        y[i] = sampler.sample(&mut rng);
    }

    let mut config = BessConfig::new(Family::Poisson);
    config.path.s_min = 1;
    config.path.s_max = 4;
    config.threads = 1;
    let fit = fit_bess(DesignMatrix::from(x), Response::Counts(y), None, &config)
        .expect("Poisson fit should succeed");

    assert!(fit.support.contains(&2), "signal column 2 missing");
    assert!(fit.support.contains(&7), "signal column 7 missing");
    assert!(fit.beta[2] > 0.0);
    assert!(fit.beta[7] < 0.0);
}

#[test]
fn cox_fit_recovers_risk_factors_at_fixed_support() {
    let n = 250;
    let p = 8;
    let mut rng = StdRng::seed_from_u64(37);
    let mut x = Array2::<f64>::zeros((n, p));
    for i in 0..n {
        for j in 0..p {
            x[[i, j]] = rng.random_range(-1.0..1.0);
        }
    }
    let mut time = Array1::<f64>::zeros(n);
    let mut status = Array1::<f64>::zeros(n);
    for i in 0..n {
        let eta = 1.5 * x[[i, 1]] - 1.5 * x[[i, 6]];
        // Exponential survival time with rate exp(eta), independent censoring.
        let u: f64 = rng.random_range(f64::MIN_POSITIVE..1.0);
        let event_time = -u.ln() / eta.exp();
        let censor_time: f64 = rng.random_range(0.0..4.0);
        if event_time <= censor_time {
            time[i] = event_time;
            status[i] = 1.0;
        } else {
            time[i] = censor_time;
            status[i] = 0.0;
        }
    }

    let mut config = BessConfig::new(Family::CoxPh);
    config.path.s_min = 2;
    config.path.s_max = 2;
    config.threads = 1;
    let fit = fit_bess(
        DesignMatrix::from(x),
        Response::Survival { time, status },
        None,
        &config,
    )
    .expect("Cox fit should succeed");

    assert_eq!(fit.support, vec![1, 6]);
    assert!(fit.beta[1] > 0.0, "risk factor 1 must increase hazard");
    assert!(fit.beta[6] < 0.0, "factor 6 must decrease hazard");
    // No intercept is fitted for proportional hazards.
    assert_eq!(fit.intercept, 0.0);
}

#[test]
fn cox_rejects_survival_data_without_events() {
    let x = Array2::<f64>::ones((5, 2));
    let time = Array1::from_elem(5, 1.0);
    let status = Array1::zeros(5);
    let mut config = BessConfig::new(Family::CoxPh);
    config.path.s_max = 1;
    let err = fit_bess(
        DesignMatrix::from(x),
        Response::Survival { time, status },
        None,
        &config,
    )
    .unwrap_err();
    assert!(matches!(err, bess::EstimationError::InvalidInput(_)));
}
