use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

/// Observation model fitted on each active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Family {
    Gaussian,
    Logistic,
    Poisson,
    CoxPh,
}

impl Family {
    /// Cox partial likelihood is invariant to a constant shift of the linear
    /// predictor, so no intercept is fitted for it.
    pub fn has_intercept(&self) -> bool {
        !matches!(self, Family::CoxPh)
    }

    /// Gaussian fits are a single weighted least-squares solve; every other
    /// family needs Newton iterations.
    pub fn is_iterative(&self) -> bool {
        !matches!(self, Family::Gaussian)
    }
}

/// Information criteria available for path selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IcType {
    Aic,
    Bic,
    Gic,
    Ebic,
}

/// Strategy for walking the support-size path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathType {
    /// Evaluate every support size in `s_min..=s_max` in order.
    Sequential,
    /// Integer golden-section search over `[s_min, s_max]` on the selection
    /// score, with memoized evaluations.
    GoldenSection,
}

/// Outcome of a bounded iteration (splicing loop or Newton fitter).
///
/// Budget exhaustion is reported here, never as an error: the best iterate
/// found so far is always returned alongside this flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitStatus {
    Converged,
    MaxIterationsReached,
}

impl FitStatus {
    pub fn converged(&self) -> bool {
        matches!(self, FitStatus::Converged)
    }
}

/// Coefficient vector over the active columns of one fit.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct Coefficients(pub Array1<f64>);

impl Coefficients {
    pub fn new(values: Array1<f64>) -> Self {
        Self(values)
    }

    pub fn zeros(len: usize) -> Self {
        Self(Array1::zeros(len))
    }
}

impl Deref for Coefficients {
    type Target = Array1<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Coefficients {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
