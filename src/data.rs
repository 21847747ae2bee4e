//! Design-matrix storage and input ingestion.
//!
//! The run owns its data exclusively: the design is validated, optionally
//! standardized, and then treated as immutable by every later stage.

use faer::sparse::{SparseColMat, Triplet};
use ndarray::{Array1, Array2, ArrayView2};

use crate::estimate::EstimationError;
use crate::types::Family;

/// Columns with (weighted) variance below this are left unscaled.
const MIN_COLUMN_SCALE: f64 = 1e-12;

#[inline]
fn dense_transpose_matvec(matrix: &Array2<f64>, vector: &Array1<f64>) -> Array1<f64> {
    let nrows = matrix.nrows();
    let ncols = matrix.ncols();
    let mut out = Array1::<f64>::zeros(ncols);

    if ncols == 0 || nrows == 0 {
        return out;
    }

    if matrix.is_standard_layout()
        && let (Some(ms), Some(vs), Some(os)) = (
            matrix.as_slice_memory_order(),
            vector.as_slice(),
            out.as_slice_mut(),
        )
    {
        for (i, row) in ms.chunks_exact(ncols).enumerate() {
            let vi = vs[i];
            for j in 0..ncols {
                os[j] += row[j] * vi;
            }
        }
        return out;
    }

    for i in 0..nrows {
        let vi = vector[i];
        for j in 0..ncols {
            out[j] += matrix[[i, j]] * vi;
        }
    }
    out
}

/// Unified design matrix representation for dense and sparse workflows.
#[derive(Clone, Debug)]
pub enum DesignMatrix {
    Dense(Array2<f64>),
    Sparse(SparseColMat<usize, f64>),
}

impl DesignMatrix {
    pub fn nrows(&self) -> usize {
        match self {
            Self::Dense(matrix) => matrix.nrows(),
            Self::Sparse(matrix) => matrix.nrows(),
        }
    }

    pub fn ncols(&self) -> usize {
        match self {
            Self::Dense(matrix) => matrix.ncols(),
            Self::Sparse(matrix) => matrix.ncols(),
        }
    }

    /// Dense copy of the selected columns, in the given order.
    pub fn gather_columns(&self, cols: &[usize]) -> Array2<f64> {
        let n = self.nrows();
        let mut out = Array2::<f64>::zeros((n, cols.len()));
        match self {
            Self::Dense(matrix) => {
                for (k, &j) in cols.iter().enumerate() {
                    out.column_mut(k).assign(&matrix.column(j));
                }
            }
            Self::Sparse(matrix) => {
                let (symbolic, values) = matrix.parts();
                let col_ptr = symbolic.col_ptr();
                let row_idx = symbolic.row_idx();
                for (k, &j) in cols.iter().enumerate() {
                    for idx in col_ptr[j]..col_ptr[j + 1] {
                        out[[row_idx[idx], k]] = values[idx];
                    }
                }
            }
        }
        out
    }

    /// X^T v, the workhorse of screening and forward-sacrifice evaluation.
    pub fn transpose_vector_multiply(&self, vector: &Array1<f64>) -> Array1<f64> {
        match self {
            Self::Dense(matrix) => dense_transpose_matvec(matrix, vector),
            Self::Sparse(matrix) => {
                let mut output = Array1::<f64>::zeros(matrix.ncols());
                let (symbolic, values) = matrix.parts();
                let col_ptr = symbolic.col_ptr();
                let row_idx = symbolic.row_idx();
                for col in 0..matrix.ncols() {
                    let mut acc = 0.0;
                    for idx in col_ptr[col]..col_ptr[col + 1] {
                        acc += values[idx] * vector[row_idx[idx]];
                    }
                    output[col] = acc;
                }
                output
            }
        }
    }

    /// Per-column weighted squared norms: h_j = sum_i w_i x_ij^2.
    pub fn weighted_column_sq_norms(&self, weights: &Array1<f64>) -> Array1<f64> {
        match self {
            Self::Dense(matrix) => {
                let mut out = Array1::<f64>::zeros(matrix.ncols());
                for i in 0..matrix.nrows() {
                    let wi = weights[i];
                    for j in 0..matrix.ncols() {
                        let x = matrix[[i, j]];
                        out[j] += wi * x * x;
                    }
                }
                out
            }
            Self::Sparse(matrix) => {
                let mut out = Array1::<f64>::zeros(matrix.ncols());
                let (symbolic, values) = matrix.parts();
                let col_ptr = symbolic.col_ptr();
                let row_idx = symbolic.row_idx();
                for col in 0..matrix.ncols() {
                    let mut acc = 0.0;
                    for idx in col_ptr[col]..col_ptr[col + 1] {
                        let x = values[idx];
                        acc += weights[row_idx[idx]] * x * x;
                    }
                    out[col] = acc;
                }
                out
            }
        }
    }

    /// Row subset in the given order, used for cross-validation slicing.
    pub fn take_rows(&self, rows: &[usize]) -> Result<DesignMatrix, EstimationError> {
        match self {
            Self::Dense(matrix) => {
                let mut out = Array2::<f64>::zeros((rows.len(), matrix.ncols()));
                for (i, &r) in rows.iter().enumerate() {
                    out.row_mut(i).assign(&matrix.row(r));
                }
                Ok(Self::Dense(out))
            }
            Self::Sparse(matrix) => {
                let mut row_map = vec![usize::MAX; matrix.nrows()];
                for (i, &r) in rows.iter().enumerate() {
                    row_map[r] = i;
                }
                let (symbolic, values) = matrix.parts();
                let col_ptr = symbolic.col_ptr();
                let row_idx = symbolic.row_idx();
                let mut triplets = Vec::new();
                for col in 0..matrix.ncols() {
                    for idx in col_ptr[col]..col_ptr[col + 1] {
                        let mapped = row_map[row_idx[idx]];
                        if mapped != usize::MAX {
                            triplets.push(Triplet::new(mapped, col, values[idx]));
                        }
                    }
                }
                let out =
                    SparseColMat::try_new_from_triplets(rows.len(), matrix.ncols(), &triplets)
                        .map_err(|e| {
                            EstimationError::Numerical(format!(
                                "sparse row-subset construction failed: {e:?}"
                            ))
                        })?;
                Ok(Self::Sparse(out))
            }
        }
    }
}

impl<'a> From<ArrayView2<'a, f64>> for DesignMatrix {
    fn from(value: ArrayView2<'a, f64>) -> Self {
        Self::Dense(value.to_owned())
    }
}

impl From<Array2<f64>> for DesignMatrix {
    fn from(value: Array2<f64>) -> Self {
        Self::Dense(value)
    }
}

impl From<SparseColMat<usize, f64>> for DesignMatrix {
    fn from(value: SparseColMat<usize, f64>) -> Self {
        Self::Sparse(value)
    }
}

/// Observed outcomes, shaped by the model family.
#[derive(Clone, Debug)]
pub enum Response {
    Continuous(Array1<f64>),
    Binary(Array1<f64>),
    Counts(Array1<f64>),
    Survival {
        time: Array1<f64>,
        status: Array1<f64>,
    },
}

impl Response {
    pub fn len(&self) -> usize {
        match self {
            Self::Continuous(y) | Self::Binary(y) | Self::Counts(y) => y.len(),
            Self::Survival { time, .. } => time.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn matches_family(&self, family: Family) -> bool {
        matches!(
            (self, family),
            (Self::Continuous(_), Family::Gaussian)
                | (Self::Binary(_), Family::Logistic)
                | (Self::Counts(_), Family::Poisson)
                | (Self::Survival { .. }, Family::CoxPh)
        )
    }

    pub fn take_rows(&self, rows: &[usize]) -> Response {
        let take = |y: &Array1<f64>| {
            let mut out = Array1::<f64>::zeros(rows.len());
            for (i, &r) in rows.iter().enumerate() {
                out[i] = y[r];
            }
            out
        };
        match self {
            Self::Continuous(y) => Self::Continuous(take(y)),
            Self::Binary(y) => Self::Binary(take(y)),
            Self::Counts(y) => Self::Counts(take(y)),
            Self::Survival { time, status } => Self::Survival {
                time: take(time),
                status: take(status),
            },
        }
    }

    fn validate(&self) -> Result<(), EstimationError> {
        let check_finite = |y: &Array1<f64>, what: &str| {
            if y.iter().any(|v| !v.is_finite()) {
                return Err(EstimationError::InvalidInput(format!(
                    "{what} contains non-finite values"
                )));
            }
            Ok(())
        };
        match self {
            Self::Continuous(y) => check_finite(y, "continuous response"),
            Self::Binary(y) => {
                check_finite(y, "binary response")?;
                if y.iter().any(|&v| v != 0.0 && v != 1.0) {
                    return Err(EstimationError::InvalidInput(
                        "binary response values must be 0 or 1".to_string(),
                    ));
                }
                Ok(())
            }
            Self::Counts(y) => {
                check_finite(y, "count response")?;
                if y.iter().any(|&v| v < 0.0) {
                    return Err(EstimationError::InvalidInput(
                        "count response values must be non-negative".to_string(),
                    ));
                }
                Ok(())
            }
            Self::Survival { time, status } => {
                check_finite(time, "survival times")?;
                check_finite(status, "survival status")?;
                if status.iter().any(|&v| v != 0.0 && v != 1.0) {
                    return Err(EstimationError::InvalidInput(
                        "survival status values must be 0 (censored) or 1 (event)".to_string(),
                    ));
                }
                if !status.iter().any(|&v| v == 1.0) {
                    return Err(EstimationError::InvalidInput(
                        "survival response contains no events".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Variable grouping: selection operates on groups of columns, with the
/// default singleton layout making groups and variables coincide.
#[derive(Clone, Debug)]
pub struct GroupLayout {
    starts: Vec<usize>,
    sizes: Vec<usize>,
}

impl GroupLayout {
    pub fn singleton(n_variables: usize) -> Self {
        Self {
            starts: (0..n_variables).collect(),
            sizes: vec![1; n_variables],
        }
    }

    /// Build from a per-variable group index vector. Indices must start at 0,
    /// be non-decreasing, and cover a contiguous id range; each group's
    /// columns are therefore a contiguous block.
    pub fn from_index(index: &[usize], n_variables: usize) -> Result<Self, EstimationError> {
        if index.len() != n_variables {
            return Err(EstimationError::InvalidConfig(format!(
                "group index length {} does not match variable count {}",
                index.len(),
                n_variables
            )));
        }
        let mut starts = Vec::new();
        let mut sizes = Vec::new();
        for (j, &g) in index.iter().enumerate() {
            if g == sizes.len() {
                starts.push(j);
                sizes.push(1);
            } else if g + 1 == sizes.len() {
                sizes[g] += 1;
            } else {
                return Err(EstimationError::InvalidConfig(format!(
                    "group indices must be non-decreasing and contiguous from 0 (found {g} at position {j})"
                )));
            }
        }
        if starts.is_empty() {
            return Err(EstimationError::InvalidConfig(
                "group index vector is empty".to_string(),
            ));
        }
        Ok(Self { starts, sizes })
    }

    pub fn count(&self) -> usize {
        self.starts.len()
    }

    pub fn size(&self, group: usize) -> usize {
        self.sizes[group]
    }

    /// Column range of one group.
    pub fn columns(&self, group: usize) -> std::ops::Range<usize> {
        let start = self.starts[group];
        start..start + self.sizes[group]
    }

    /// Flattened column indices of an ordered set of groups.
    pub fn gather_columns(&self, groups: &[usize]) -> Vec<usize> {
        let mut cols = Vec::with_capacity(groups.iter().map(|&g| self.sizes[g]).sum());
        for &g in groups {
            cols.extend(self.columns(g));
        }
        cols
    }

    pub fn total_columns(&self, groups: &[usize]) -> usize {
        groups.iter().map(|&g| self.sizes[g]).sum()
    }
}

/// Per-column shift/scale recorded during standardization so coefficients can
/// be mapped back to original units on output.
#[derive(Clone, Debug)]
pub struct Standardization {
    pub shift: Array1<f64>,
    pub scale: Array1<f64>,
}

/// Validated, optionally standardized inputs owned by the run.
#[derive(Debug)]
pub struct Ingested {
    pub x: DesignMatrix,
    pub response: Response,
    pub weights: Array1<f64>,
    pub standardization: Option<Standardization>,
}

/// Validate shapes and content, then standardize if requested.
///
/// Dense designs are centered and scaled per column; sparse designs are
/// scaled only, since centering would densify the storage.
pub fn ingest(
    x: DesignMatrix,
    response: Response,
    weights: Option<Array1<f64>>,
    family: Family,
    standardize: bool,
) -> Result<Ingested, EstimationError> {
    let n = x.nrows();
    let p = x.ncols();
    if n == 0 || p == 0 {
        return Err(EstimationError::EmptyDesign {
            n_rows: n,
            n_cols: p,
        });
    }
    if response.len() != n {
        return Err(EstimationError::SampleCountMismatch {
            n_rows: n,
            n_response: response.len(),
        });
    }
    if !response.matches_family(family) {
        return Err(EstimationError::InvalidInput(format!(
            "response shape does not match family {family:?}"
        )));
    }
    response.validate()?;

    let weights = match weights {
        Some(w) => {
            if w.len() != n {
                return Err(EstimationError::SampleCountMismatch {
                    n_rows: n,
                    n_response: w.len(),
                });
            }
            if w.iter().any(|&v| !v.is_finite() || v < 0.0) {
                return Err(EstimationError::InvalidInput(
                    "observation weights must be finite and non-negative".to_string(),
                ));
            }
            if w.sum() <= 0.0 {
                return Err(EstimationError::InvalidInput(
                    "observation weights sum to zero".to_string(),
                ));
            }
            w
        }
        None => Array1::ones(n),
    };

    let (x, standardization) = if standardize {
        let (x, std) = standardize_design(x, &weights)?;
        (x, Some(std))
    } else {
        (x, None)
    };

    Ok(Ingested {
        x,
        response,
        weights,
        standardization,
    })
}

fn standardize_design(
    x: DesignMatrix,
    weights: &Array1<f64>,
) -> Result<(DesignMatrix, Standardization), EstimationError> {
    let p = x.ncols();
    let w_sum: f64 = weights.sum();
    match x {
        DesignMatrix::Dense(mut matrix) => {
            let mut shift = Array1::<f64>::zeros(p);
            let mut scale = Array1::<f64>::ones(p);
            for j in 0..p {
                let col = matrix.column(j);
                let mean = col
                    .iter()
                    .zip(weights.iter())
                    .map(|(&x, &w)| w * x)
                    .sum::<f64>()
                    / w_sum;
                let var = col
                    .iter()
                    .zip(weights.iter())
                    .map(|(&x, &w)| w * (x - mean) * (x - mean))
                    .sum::<f64>()
                    / w_sum;
                shift[j] = mean;
                if var.sqrt() > MIN_COLUMN_SCALE {
                    scale[j] = var.sqrt();
                }
            }
            for j in 0..p {
                let m = shift[j];
                let s = scale[j];
                matrix.column_mut(j).mapv_inplace(|v| (v - m) / s);
            }
            Ok((DesignMatrix::Dense(matrix), Standardization { shift, scale }))
        }
        DesignMatrix::Sparse(matrix) => {
            let shift = Array1::<f64>::zeros(p);
            let mut scale = Array1::<f64>::ones(p);
            let sq_norms = DesignMatrix::Sparse(matrix.clone()).weighted_column_sq_norms(weights);
            for j in 0..p {
                let rms = (sq_norms[j] / w_sum).sqrt();
                if rms > MIN_COLUMN_SCALE {
                    scale[j] = rms;
                }
            }
            let (symbolic, values) = matrix.parts();
            let col_ptr = symbolic.col_ptr();
            let row_idx = symbolic.row_idx();
            let mut triplets = Vec::with_capacity(values.len());
            for col in 0..matrix.ncols() {
                for idx in col_ptr[col]..col_ptr[col + 1] {
                    triplets.push(Triplet::new(row_idx[idx], col, values[idx] / scale[col]));
                }
            }
            let scaled = SparseColMat::try_new_from_triplets(matrix.nrows(), p, &triplets)
                .map_err(|e| {
                    EstimationError::Numerical(format!(
                        "sparse standardization rebuild failed: {e:?}"
                    ))
                })?;
            Ok((DesignMatrix::Sparse(scaled), Standardization { shift, scale }))
        }
    }
}
