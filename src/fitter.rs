//! Primary model fitter: coefficients for a fixed active column set.
//!
//! Gaussian models are a single weighted least-squares solve; every other
//! family runs Fisher-scoring iterations, each one a weighted least-squares
//! solve against the family's working response. The Newton system is
//! factorized LLT-first with an LDLT fallback. Budget exhaustion is reported
//! through `FitStatus`, never as an error.

use faer::Side;
use ndarray::{Array1, Array2};

use crate::estimate::EstimationError;
use crate::faer_ndarray::{FaerArrayView, factorize_symmetric_with_fallback, fast_ata, fast_atv};
use crate::family::FamilyModel;
use crate::types::{Coefficients, FitStatus};

const MAX_STEP_HALVINGS: usize = 5;

#[derive(Clone, Copy, Debug)]
pub struct FitterOptions {
    pub max_iter: usize,
    pub epsilon: f64,
    /// Ridge strength on the non-intercept coordinates.
    pub lambda: f64,
}

/// Fit state for one (active set, path position) pair.
#[derive(Clone)]
pub struct ActiveFit {
    /// Coefficients over the active columns, in gather order.
    pub beta: Coefficients,
    pub intercept: f64,
    /// Cached linear predictor (including the intercept).
    pub eta: Array1<f64>,
    /// Unpenalized search loss at the solution.
    pub loss: f64,
    pub status: FitStatus,
    pub iterations: usize,
}

impl ActiveFit {
    /// Ridge-penalized objective; exchanges are compared on this so that a
    /// positive `lambda` influences the search consistently with the fit.
    pub fn objective(&self, lambda: f64, n: usize) -> f64 {
        self.loss + lambda * self.beta.dot(&self.beta.0) / (2.0 * n as f64)
    }
}

/// Warm-start coefficients aligned with the active columns being fitted.
pub struct WarmStart<'a> {
    pub beta: &'a Array1<f64>,
    pub intercept: f64,
}

pub fn fit_active(
    x_active: &Array2<f64>,
    model: &FamilyModel,
    prior_weights: &Array1<f64>,
    opts: &FitterOptions,
    warm: Option<WarmStart<'_>>,
) -> Result<ActiveFit, EstimationError> {
    let n = model.n();
    let k = x_active.ncols();
    debug_assert_eq!(x_active.nrows(), n, "active block must cover all samples");
    let has_intercept = model.family().has_intercept();

    let (mut beta, mut intercept) = match warm {
        Some(w) => {
            debug_assert_eq!(w.beta.len(), k, "warm start must align with active columns");
            (w.beta.to_owned(), w.intercept)
        }
        None => {
            let intercept = if has_intercept {
                model.null_eta(prior_weights)[0]
            } else {
                0.0
            };
            (Array1::zeros(k), intercept)
        }
    };

    let mut eta = x_active.dot(&beta);
    if has_intercept {
        eta += intercept;
    }
    let mut loss = model.loss(&eta, prior_weights)?;

    // Empty model with no intercept to fit: nothing to solve.
    let n_coef = k + usize::from(has_intercept);
    if n_coef == 0 {
        return Ok(ActiveFit {
            beta: Coefficients::new(beta),
            intercept,
            eta,
            loss,
            status: FitStatus::Converged,
            iterations: 0,
        });
    }

    let mut mu = Array1::<f64>::zeros(n);
    let mut w = Array1::<f64>::zeros(n);
    let mut z = Array1::<f64>::zeros(n);

    let max_iter = if model.family().is_iterative() {
        opts.max_iter.max(1)
    } else {
        1
    };

    let mut status = FitStatus::MaxIterationsReached;
    let mut iterations = 0;
    for _ in 0..max_iter {
        iterations += 1;
        model.working_update(&eta, prior_weights, &mut mu, &mut w, &mut z)?;

        // Row-weighted augmented design [1 | X_A] * sqrt(w) and matching
        // right-hand side, so H = Xw' Xw and g = Xw' (sqrt(w) z).
        let mut aug = Array2::<f64>::zeros((n, n_coef));
        let mut zw = Array1::<f64>::zeros(n);
        for i in 0..n {
            let sw = w[i].max(0.0).sqrt();
            let mut col = 0;
            if has_intercept {
                aug[[i, 0]] = sw;
                col = 1;
            }
            for j in 0..k {
                aug[[i, col + j]] = sw * x_active[[i, j]];
            }
            zw[i] = sw * z[i];
        }

        let mut hessian = fast_ata(&aug);
        let ridge_from = usize::from(has_intercept);
        for d in ridge_from..n_coef {
            hessian[[d, d]] += opts.lambda;
        }
        let gradient = fast_atv(&aug, &zw);

        let factor = {
            let view = FaerArrayView::new(&hessian);
            factorize_symmetric_with_fallback(view.as_ref(), Side::Lower)
                .map_err(EstimationError::LinearSystemSolveFailed)?
        };
        let solution = factor.solve_vec(&gradient);

        let mut new_intercept = if has_intercept { solution[0] } else { 0.0 };
        let mut new_beta = Array1::<f64>::zeros(k);
        for j in 0..k {
            new_beta[j] = solution[ridge_from + j];
        }

        // Step halving toward the previous iterate if the penalized objective
        // got worse; keeps Poisson and near-separated logistic fits stable.
        let old_objective =
            loss + opts.lambda * beta.dot(&beta) / (2.0 * n as f64);
        let mut accepted = false;
        for _ in 0..=MAX_STEP_HALVINGS {
            let mut new_eta = x_active.dot(&new_beta);
            if has_intercept {
                new_eta += new_intercept;
            }
            let new_loss = model.loss(&new_eta, prior_weights)?;
            let new_objective =
                new_loss + opts.lambda * new_beta.dot(&new_beta) / (2.0 * n as f64);
            if new_objective <= old_objective + 1e-12 || !model.family().is_iterative() {
                let delta = (old_objective - new_objective).abs();
                beta = new_beta;
                intercept = new_intercept;
                eta = new_eta;
                loss = new_loss;
                accepted = true;
                if !model.family().is_iterative() || delta < opts.epsilon {
                    status = FitStatus::Converged;
                }
                break;
            }
            for j in 0..k {
                new_beta[j] = 0.5 * (new_beta[j] + beta[j]);
            }
            new_intercept = 0.5 * (new_intercept + intercept);
        }
        if !accepted {
            // The full step and every halved step made things worse; the
            // current iterate is already a (local) optimum for our purposes.
            status = FitStatus::Converged;
            break;
        }
        if status.converged() {
            break;
        }
    }

    Ok(ActiveFit {
        beta: Coefficients::new(beta),
        intercept,
        eta,
        loss,
        status,
        iterations,
    })
}
