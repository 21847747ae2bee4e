//! Per-family likelihood state: working (Fisher) updates for the Newton
//! fitter, search losses for splicing, and deviances for the information
//! criteria.

use ndarray::Array1;

use crate::cox::CoxPartialLikelihood;
use crate::data::Response;
use crate::estimate::EstimationError;
use crate::types::Family;

const MIN_WEIGHT: f64 = 1e-12;
const MIN_D_FOR_Z: f64 = 1e-6;
const PROB_EPS: f64 = 1e-8;
const POISSON_ETA_CLAMP: f64 = 30.0;

/// Prepared likelihood state for one data slice (the full data or one
/// cross-validation fold). Owns its response copy so fold slices are
/// self-contained.
#[derive(Debug)]
pub enum FamilyModel {
    Gaussian { y: Array1<f64> },
    Logistic { y: Array1<f64> },
    Poisson { y: Array1<f64> },
    CoxPh(CoxPartialLikelihood),
}

impl FamilyModel {
    pub fn new(
        family: Family,
        response: &Response,
        weights: &Array1<f64>,
    ) -> Result<Self, EstimationError> {
        match (family, response) {
            (Family::Gaussian, Response::Continuous(y)) => Ok(Self::Gaussian { y: y.clone() }),
            (Family::Logistic, Response::Binary(y)) => Ok(Self::Logistic { y: y.clone() }),
            (Family::Poisson, Response::Counts(y)) => Ok(Self::Poisson { y: y.clone() }),
            (Family::CoxPh, Response::Survival { time, status }) => {
                Ok(Self::CoxPh(CoxPartialLikelihood::new(
                    time.clone(),
                    status.clone(),
                    weights.clone(),
                )?))
            }
            _ => Err(EstimationError::InvalidInput(format!(
                "response shape does not match family {family:?}"
            ))),
        }
    }

    pub fn family(&self) -> Family {
        match self {
            Self::Gaussian { .. } => Family::Gaussian,
            Self::Logistic { .. } => Family::Logistic,
            Self::Poisson { .. } => Family::Poisson,
            Self::CoxPh(_) => Family::CoxPh,
        }
    }

    pub fn n(&self) -> usize {
        match self {
            Self::Gaussian { y } | Self::Logistic { y } | Self::Poisson { y } => y.len(),
            Self::CoxPh(model) => model.n(),
        }
    }

    /// One Fisher-scoring working update: fills the fitted mean, the working
    /// weights (prior weights already folded in), and the working response.
    pub fn working_update(
        &self,
        eta: &Array1<f64>,
        prior_weights: &Array1<f64>,
        mu: &mut Array1<f64>,
        weights: &mut Array1<f64>,
        z: &mut Array1<f64>,
    ) -> Result<(), EstimationError> {
        match self {
            Self::Gaussian { y } => {
                for i in 0..y.len() {
                    mu[i] = eta[i];
                    weights[i] = prior_weights[i];
                    z[i] = y[i];
                }
                Ok(())
            }
            Self::Logistic { y } => {
                for i in 0..y.len() {
                    // Clamp eta and compute mu
                    let e = eta[i].clamp(-700.0, 700.0);
                    let mu_i = (1.0 / (1.0 + (-e).exp())).clamp(PROB_EPS, 1.0 - PROB_EPS);
                    mu[i] = mu_i;

                    // dmu/deta = mu(1-mu)
                    let dmu = mu_i * (1.0 - mu_i);

                    // Fisher weight with floor
                    let fisher_w = dmu.max(MIN_WEIGHT);
                    weights[i] = prior_weights[i] * fisher_w;

                    // Working response
                    let denom = dmu.max(MIN_D_FOR_Z);
                    z[i] = e + (y[i] - mu_i) / denom;
                }
                Ok(())
            }
            Self::Poisson { y } => {
                for i in 0..y.len() {
                    let e = eta[i].clamp(-POISSON_ETA_CLAMP, POISSON_ETA_CLAMP);
                    let mu_i = e.exp();
                    mu[i] = mu_i;
                    let fisher_w = mu_i.max(MIN_WEIGHT);
                    weights[i] = prior_weights[i] * fisher_w;
                    z[i] = e + (y[i] - mu_i) / mu_i.max(MIN_D_FOR_Z);
                }
                Ok(())
            }
            Self::CoxPh(model) => model.working_update(eta, mu, weights, z),
        }
    }

    /// Search loss: the (prior-weighted) mean negative log-likelihood at eta,
    /// up to data-only constants. This is the quantity splicing exchanges
    /// must improve.
    pub fn loss(
        &self,
        eta: &Array1<f64>,
        prior_weights: &Array1<f64>,
    ) -> Result<f64, EstimationError> {
        let n = self.n() as f64;
        let value = match self {
            Self::Gaussian { y } => {
                let mut acc = 0.0;
                for i in 0..y.len() {
                    let r = y[i] - eta[i];
                    acc += prior_weights[i] * r * r;
                }
                0.5 * acc / n
            }
            Self::Logistic { y } => {
                let mut acc = 0.0;
                for i in 0..y.len() {
                    let e = eta[i].clamp(-700.0, 700.0);
                    let mu = (1.0 / (1.0 + (-e).exp())).clamp(PROB_EPS, 1.0 - PROB_EPS);
                    acc -= prior_weights[i] * (y[i] * mu.ln() + (1.0 - y[i]) * (1.0 - mu).ln());
                }
                acc / n
            }
            Self::Poisson { y } => {
                let mut acc = 0.0;
                for i in 0..y.len() {
                    let e = eta[i].clamp(-POISSON_ETA_CLAMP, POISSON_ETA_CLAMP);
                    acc -= prior_weights[i] * (y[i] * e - e.exp());
                }
                acc / n
            }
            Self::CoxPh(model) => model.neg_loglik(eta),
        };
        if !value.is_finite() {
            return Err(EstimationError::Numerical(
                "non-finite loss during fitting".to_string(),
            ));
        }
        Ok(value)
    }

    /// Deviance entering the information criteria.
    ///
    /// Gaussian profiles out the error variance: D = n_eff * ln(RSS / n_eff).
    /// All other families use -2 * loglik, dropping data-only constants
    /// (those cancel when comparing path positions on fixed data).
    pub fn ic_deviance(
        &self,
        eta: &Array1<f64>,
        prior_weights: &Array1<f64>,
    ) -> Result<f64, EstimationError> {
        match self {
            Self::Gaussian { y } => {
                let w_sum: f64 = prior_weights.sum();
                let mut rss = 0.0;
                for i in 0..y.len() {
                    let r = y[i] - eta[i];
                    rss += prior_weights[i] * r * r;
                }
                let value = w_sum * (rss / w_sum).max(f64::MIN_POSITIVE).ln();
                if !value.is_finite() {
                    return Err(EstimationError::Numerical(
                        "non-finite Gaussian deviance".to_string(),
                    ));
                }
                Ok(value)
            }
            _ => Ok(2.0 * self.n() as f64 * self.loss(eta, prior_weights)?),
        }
    }

    /// Linear predictor of the empty model, used as the cold-start origin.
    pub fn null_eta(&self, prior_weights: &Array1<f64>) -> Array1<f64> {
        let n = self.n();
        match self {
            Self::Gaussian { y } => {
                let w_sum: f64 = prior_weights.sum();
                let mean = y
                    .iter()
                    .zip(prior_weights.iter())
                    .map(|(&y, &w)| w * y)
                    .sum::<f64>()
                    / w_sum;
                Array1::from_elem(n, mean)
            }
            Self::Logistic { y } => {
                let w_sum: f64 = prior_weights.sum();
                let p = (y
                    .iter()
                    .zip(prior_weights.iter())
                    .map(|(&y, &w)| w * y)
                    .sum::<f64>()
                    / w_sum)
                    .clamp(PROB_EPS, 1.0 - PROB_EPS);
                Array1::from_elem(n, (p / (1.0 - p)).ln())
            }
            Self::Poisson { y } => {
                let w_sum: f64 = prior_weights.sum();
                let mean = (y
                    .iter()
                    .zip(prior_weights.iter())
                    .map(|(&y, &w)| w * y)
                    .sum::<f64>()
                    / w_sum)
                    .max(PROB_EPS);
                Array1::from_elem(n, mean.ln())
            }
            Self::CoxPh(_) => Array1::zeros(n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn logistic_update_produces_bounded_means_and_floored_weights() {
        let model = FamilyModel::Logistic {
            y: array![0.0, 1.0, 1.0],
        };
        let eta = array![-800.0, 0.0, 800.0];
        let prior = Array1::ones(3);
        let mut mu = Array1::zeros(3);
        let mut w = Array1::zeros(3);
        let mut z = Array1::zeros(3);
        model
            .working_update(&eta, &prior, &mut mu, &mut w, &mut z)
            .expect("update succeeds");
        assert!(mu.iter().all(|&m| m > 0.0 && m < 1.0));
        assert!(w.iter().all(|&wi| wi >= MIN_WEIGHT));
        assert!(z.iter().all(|v| v.is_finite()));
        assert_abs_diff_eq!(mu[1], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn gaussian_loss_is_half_mean_squared_error() {
        let model = FamilyModel::Gaussian {
            y: array![1.0, 2.0, 3.0],
        };
        let eta = array![1.0, 1.0, 1.0];
        let prior = Array1::ones(3);
        let loss = model.loss(&eta, &prior).expect("finite loss");
        // residuals 0, 1, 2 -> 0.5 * (0 + 1 + 4) / 3
        assert_abs_diff_eq!(loss, 2.5 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn poisson_null_eta_is_log_mean() {
        let model = FamilyModel::Poisson {
            y: array![1.0, 2.0, 3.0],
        };
        let prior = Array1::ones(3);
        let eta0 = model.null_eta(&prior);
        assert_abs_diff_eq!(eta0[0], 2.0f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn family_response_mismatch_is_rejected() {
        let weights = Array1::ones(2);
        let err = FamilyModel::new(
            Family::Logistic,
            &Response::Continuous(array![0.5, 0.7]),
            &weights,
        )
        .unwrap_err();
        assert!(matches!(err, EstimationError::InvalidInput(_)));
    }
}
