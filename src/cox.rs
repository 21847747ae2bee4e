//! Breslow partial likelihood for proportional-hazards fits.
//!
//! The model exposes the same working-weight/working-response interface as
//! the GLM families: one Newton step on the partial likelihood is a weighted
//! least-squares solve against `z = eta + u / h`, where `u` is the per-sample
//! score and `h` the diagonal of the negative Hessian. Ties are handled with
//! the Breslow convention (all events at a tied time share the risk-set sum
//! taken before any of them is removed).

use ndarray::Array1;

use crate::estimate::EstimationError;

const ETA_CLAMP: f64 = 30.0;
const MIN_HESSIAN_DIAG: f64 = 1e-9;

#[derive(Debug)]
pub struct CoxPartialLikelihood {
    time: Array1<f64>,
    status: Array1<f64>,
    weights: Array1<f64>,
    /// Sample indices sorted by ascending event/censoring time.
    order: Vec<usize>,
}

impl CoxPartialLikelihood {
    pub fn new(
        time: Array1<f64>,
        status: Array1<f64>,
        weights: Array1<f64>,
    ) -> Result<Self, EstimationError> {
        if time.len() != status.len() || time.len() != weights.len() {
            return Err(EstimationError::InvalidInput(
                "survival time, status and weights must have equal length".to_string(),
            ));
        }
        let mut order: Vec<usize> = (0..time.len()).collect();
        order.sort_by(|&a, &b| {
            time[a]
                .partial_cmp(&time[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(Self {
            time,
            status,
            weights,
            order,
        })
    }

    pub fn n(&self) -> usize {
        self.time.len()
    }

    /// Risk-set sums shared by the likelihood and its derivatives.
    ///
    /// Returns, per *sorted* position k, the suffix sum S of `w * exp(eta)`
    /// over all subjects still at risk at that position's time, with tied
    /// times collapsed to the block-start value.
    fn risk_sums(&self, eta: &Array1<f64>) -> (Vec<f64>, Vec<f64>) {
        let n = self.n();
        let mut r = vec![0.0; n];
        for (k, &i) in self.order.iter().enumerate() {
            r[k] = self.weights[i] * eta[i].clamp(-ETA_CLAMP, ETA_CLAMP).exp();
        }
        let mut suffix = vec![0.0; n];
        let mut acc = 0.0;
        for k in (0..n).rev() {
            acc += r[k];
            suffix[k] = acc;
        }
        // Collapse ties: every member of a tied block uses the block-start sum.
        let mut block_sum = vec![0.0; n];
        let mut k = 0;
        while k < n {
            let t = self.time[self.order[k]];
            let mut end = k + 1;
            while end < n && self.time[self.order[end]] == t {
                end += 1;
            }
            for m in k..end {
                block_sum[m] = suffix[k];
            }
            k = end;
        }
        (r, block_sum)
    }

    /// Mean negative Breslow partial log-likelihood.
    pub fn neg_loglik(&self, eta: &Array1<f64>) -> f64 {
        let n = self.n();
        let (_, block_sum) = self.risk_sums(eta);
        let mut loglik = 0.0;
        for (k, &i) in self.order.iter().enumerate() {
            if self.status[i] == 1.0 {
                let e = eta[i].clamp(-ETA_CLAMP, ETA_CLAMP);
                loglik += self.weights[i] * (e - block_sum[k].max(f64::MIN_POSITIVE).ln());
            }
        }
        -loglik / n as f64
    }

    /// Fill the working weights and working response for one Newton step.
    pub fn working_update(
        &self,
        eta: &Array1<f64>,
        mu: &mut Array1<f64>,
        weights_out: &mut Array1<f64>,
        z: &mut Array1<f64>,
    ) -> Result<(), EstimationError> {
        let n = self.n();
        let (r, block_sum) = self.risk_sums(eta);

        // Running event sums over times <= t_i: cum1 uses 1/S, cum2 uses 1/S^2.
        let mut cum1 = vec![0.0; n];
        let mut cum2 = vec![0.0; n];
        let mut ev1 = 0.0;
        let mut ev2 = 0.0;
        let mut k = 0;
        while k < n {
            let t = self.time[self.order[k]];
            let mut end = k + 1;
            while end < n && self.time[self.order[end]] == t {
                end += 1;
            }
            let event_weight: f64 = (k..end)
                .filter(|&m| self.status[self.order[m]] == 1.0)
                .map(|m| self.weights[self.order[m]])
                .sum();
            if event_weight > 0.0 {
                let s = block_sum[k].max(f64::MIN_POSITIVE);
                ev1 += event_weight / s;
                ev2 += event_weight / (s * s);
            }
            for m in k..end {
                cum1[m] = ev1;
                cum2[m] = ev2;
            }
            k = end;
        }

        for (k, &i) in self.order.iter().enumerate() {
            let u = self.weights[i] * self.status[i] - r[k] * cum1[k];
            let h = (r[k] * cum1[k] - r[k] * r[k] * cum2[k]).max(MIN_HESSIAN_DIAG);
            mu[i] = r[k];
            weights_out[i] = h;
            z[i] = eta[i] + u / h;
            if !z[i].is_finite() {
                return Err(EstimationError::Numerical(
                    "non-finite working response in partial-likelihood update".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn toy_model() -> CoxPartialLikelihood {
        // Times 1, 2, 3 with an event at each; unit weights.
        CoxPartialLikelihood::new(
            array![2.0, 1.0, 3.0],
            array![1.0, 1.0, 1.0],
            array![1.0, 1.0, 1.0],
        )
        .expect("valid survival data")
    }

    #[test]
    fn null_model_loglik_matches_hand_computation() {
        let model = toy_model();
        let eta = Array1::zeros(3);
        // -loglik = ln(3) + ln(2) + ln(1), averaged over n = 3.
        let expected = (3.0f64.ln() + 2.0f64.ln()) / 3.0;
        assert_abs_diff_eq!(model.neg_loglik(&eta), expected, epsilon = 1e-12);
    }

    #[test]
    fn score_sums_to_zero_at_null_for_uncensored_data() {
        let model = toy_model();
        let eta = Array1::zeros(3);
        let mut mu = Array1::zeros(3);
        let mut w = Array1::zeros(3);
        let mut z = Array1::zeros(3);
        model
            .working_update(&eta, &mut mu, &mut w, &mut z)
            .expect("update succeeds");
        // u_i = w_i * (z_i - eta_i); the score sums to zero at any eta.
        let score_sum: f64 = (0..3).map(|i| w[i] * (z[i] - eta[i])).sum();
        assert_abs_diff_eq!(score_sum, 0.0, epsilon = 1e-10);
    }

    #[test]
    fn tied_event_times_share_risk_sums() {
        let model = CoxPartialLikelihood::new(
            array![1.0, 1.0, 2.0],
            array![1.0, 1.0, 1.0],
            array![1.0, 1.0, 1.0],
        )
        .expect("valid survival data");
        let eta = Array1::zeros(3);
        // Both events at t=1 use the full risk set of size 3 (Breslow).
        let expected = (2.0 * 3.0f64.ln()) / 3.0;
        assert_abs_diff_eq!(model.neg_loglik(&eta), expected, epsilon = 1e-12);
    }
}
