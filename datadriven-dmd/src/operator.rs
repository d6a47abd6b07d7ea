use faer::Mat;
use tracing::{debug, warn};

use crate::types::{Diagnostic, DmdError, C64};
use crate::utils::{complex_inverse, mat_vec};

/// Tolerance on |Im λ| for deciding an eigenvalue is on the negative real axis.
const BRANCH_CUT_TOL: f64 = 1e-12;

/// A fitted linear operator and the basis it lives in.
///
/// `k` acts on reduced coordinates `z = Qᵀ x`; `c` lifts them back to the
/// full state. When no reduction took place `q` and `c` are identities.
#[derive(Debug, Clone)]
pub struct LinearOperator {
    /// Operator (r × r).
    pub k: Mat<f64>,
    /// Control influence (r × n_controls), zero columns without control.
    pub b: Mat<f64>,
    /// Output matrix (n_states × r).
    pub c: Mat<f64>,
    /// Projection basis with orthonormal columns (n_states × r).
    pub q: Mat<f64>,
    /// Lifts eigenvectors of `k` to dynamic modes (n_states × r).
    pub mode_basis: Mat<f64>,
    /// Effective rank r.
    pub rank: usize,
    /// Explicitly requested rank, if any.
    pub requested_rank: Option<usize>,
    /// Non-fatal conditions met while estimating.
    pub diagnostics: Vec<Diagnostic>,
}

impl LinearOperator {
    /// Full-space operator: `Q = C = I`.
    pub fn full(k: Mat<f64>, b: Option<Mat<f64>>) -> Self {
        let n = k.nrows();
        let b = b.unwrap_or_else(|| Mat::<f64>::zeros(n, 0));
        Self {
            b,
            c: Mat::<f64>::identity(n, n),
            q: Mat::<f64>::identity(n, n),
            mode_basis: Mat::<f64>::identity(n, n),
            rank: n,
            requested_rank: None,
            diagnostics: Vec::new(),
            k,
        }
    }

    /// Reduced operator living in the span of `q`; `C = Q`.
    pub fn reduced(k: Mat<f64>, b: Option<Mat<f64>>, q: Mat<f64>, mode_basis: Mat<f64>) -> Self {
        let r = k.nrows();
        let b = b.unwrap_or_else(|| Mat::<f64>::zeros(r, 0));
        Self {
            b,
            c: q.clone(),
            q,
            mode_basis,
            rank: r,
            requested_rank: None,
            diagnostics: Vec::new(),
            k,
        }
    }

    pub fn with_requested_rank(mut self, requested: Option<usize>) -> Self {
        self.requested_rank = requested;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Vec<Diagnostic>) -> Self {
        self.diagnostics.extend(diagnostics);
        self
    }

    pub fn n_states(&self) -> usize {
        self.c.nrows()
    }

    pub fn n_controls(&self) -> usize {
        self.b.ncols()
    }

    pub fn has_control(&self) -> bool {
        self.b.ncols() > 0
    }

    /// Whether the operator acts on a strict subspace.
    pub fn is_reduced(&self) -> bool {
        self.rank < self.n_states()
    }

    /// Check the shape invariants between `k`, `b`, `c`, `q`.
    pub fn validate(&self) -> Result<(), DmdError> {
        let r = self.k.nrows();
        if self.k.ncols() != r {
            return Err(DmdError::DimensionMismatch(format!(
                "operator must be square, got {}x{}",
                r,
                self.k.ncols()
            )));
        }
        if self.c.ncols() != r || self.q.ncols() != r || self.mode_basis.ncols() != r {
            return Err(DmdError::DimensionMismatch(format!(
                "basis has {} columns, operator has dimension {r}",
                self.c.ncols()
            )));
        }
        if self.b.nrows() != r {
            return Err(DmdError::DimensionMismatch(format!(
                "control matrix has {} rows, operator has dimension {r}",
                self.b.nrows()
            )));
        }
        if self.q.nrows() != self.c.nrows() {
            return Err(DmdError::DimensionMismatch(format!(
                "basis has {} rows, output matrix has {}",
                self.q.nrows(),
                self.c.nrows()
            )));
        }
        Ok(())
    }

    /// Project a full state onto the reduced basis: `Qᵀ x`.
    pub fn to_reduced(&self, x: &[f64]) -> Result<Vec<f64>, DmdError> {
        if x.len() != self.q.nrows() {
            return Err(DmdError::DimensionMismatch(format!(
                "state has length {}, expected {}",
                x.len(),
                self.q.nrows()
            )));
        }
        let r = self.q.ncols();
        Ok((0..r)
            .map(|j| (0..x.len()).map(|i| self.q[(i, j)] * x[i]).sum())
            .collect())
    }

    /// Lift reduced coordinates back to the full state: `C z`.
    pub fn to_full(&self, z: &[f64]) -> Result<Vec<f64>, DmdError> {
        if z.len() != self.c.ncols() {
            return Err(DmdError::DimensionMismatch(format!(
                "reduced state has length {}, expected {}",
                z.len(),
                self.c.ncols()
            )));
        }
        Ok(mat_vec(&self.c, z))
    }

    /// Full-order operator `C K Qᵀ` (n_states × n_states).
    pub fn full_operator(&self) -> Mat<f64> {
        let ck = &self.c * &self.k;
        let qt = self.q.transpose().to_owned();
        &ck * &qt
    }
}

/// Eigenvalues, eigenvectors and dynamic modes of a fitted operator.
#[derive(Debug, Clone)]
pub struct Eigensystem {
    /// Eigenvalues λ (r).
    pub eigenvalues: Vec<C64>,
    /// Eigenvectors W of `k` (r × r), columns are eigenvectors.
    pub eigenvectors: Vec<Vec<C64>>,
    /// Dynamic modes `mode_basis · W` (n_states × r).
    pub modes: Vec<Vec<C64>>,
}

/// Eigendecomposition of a real square matrix, complex in general.
pub fn eigen_decompose(k: &Mat<f64>) -> Result<(Vec<C64>, Vec<Vec<C64>>), DmdError> {
    let n = k.nrows();
    if k.ncols() != n {
        return Err(DmdError::DimensionMismatch(format!(
            "eigendecomposition needs a square matrix, got {}x{}",
            n,
            k.ncols()
        )));
    }
    if n == 0 {
        return Ok((Vec::new(), Vec::new()));
    }

    let eigen = k
        .as_ref()
        .eigen()
        .map_err(|e| DmdError::EigenFailed(format!("{e:?}")))?;

    let eigenvalues_diag = eigen.S().column_vector();
    let eigenvectors = eigen.U();

    let mut eigenvalues = Vec::with_capacity(n);
    let mut w = vec![vec![C64::zero(); n]; n];
    for j in 0..n {
        let ev = eigenvalues_diag[j];
        eigenvalues.push(C64::new(ev.re, ev.im));
        for (i, row) in w.iter_mut().enumerate() {
            let v = eigenvectors[(i, j)];
            row[j] = C64::new(v.re, v.im);
        }
    }

    Ok((eigenvalues, w))
}

/// Compute the eigensystem of `op.k` and lift eigenvectors to modes.
pub fn eigensystem(op: &LinearOperator) -> Result<Eigensystem, DmdError> {
    let (eigenvalues, eigenvectors) = eigen_decompose(&op.k)?;
    let n = op.mode_basis.nrows();
    let r = eigenvalues.len();

    // Φ = M W with M real (n × r), W complex (r × r)
    let mut modes = vec![vec![C64::zero(); r]; n];
    for (i, mode_row) in modes.iter_mut().enumerate() {
        for (j, entry) in mode_row.iter_mut().enumerate() {
            let mut val = C64::zero();
            for (k, w_row) in eigenvectors.iter().enumerate() {
                val += w_row[j] * op.mode_basis[(i, k)];
            }
            *entry = val;
        }
    }

    Ok(Eigensystem {
        eigenvalues,
        eigenvectors,
        modes,
    })
}

/// Apply a scalar function through the eigendecomposition:
/// `f(K) = W f(Λ) W⁻¹`, real part.
///
/// Fails for defective matrices whose eigenvectors are not independent.
pub fn matrix_function<F>(k: &Mat<f64>, f: F) -> Result<Mat<f64>, DmdError>
where
    F: Fn(C64) -> C64,
{
    let (eigenvalues, w) = eigen_decompose(k)?;
    matrix_function_from(&eigenvalues, &w, f)
}

/// [`matrix_function`] for an already computed eigendecomposition.
pub fn matrix_function_from<F>(
    eigenvalues: &[C64],
    w: &[Vec<C64>],
    f: F,
) -> Result<Mat<f64>, DmdError>
where
    F: Fn(C64) -> C64,
{
    let w_inv = eigenvector_inverse(w)?;
    let f_lambda: Vec<C64> = eigenvalues.iter().map(|&l| f(l)).collect();
    Ok(spectral_compose(w, &w_inv, &f_lambda))
}

fn eigenvector_inverse(w: &[Vec<C64>]) -> Result<Vec<Vec<C64>>, DmdError> {
    complex_inverse(w).map_err(|_| {
        DmdError::EigenFailed("eigenvector matrix is singular (defective operator)".into())
    })
}

/// `W diag(values) W⁻¹`, real part.
fn spectral_compose(w: &[Vec<C64>], w_inv: &[Vec<C64>], values: &[C64]) -> Mat<f64> {
    let n = values.len();
    let mut out = Mat::<f64>::zeros(n, n);
    for i in 0..n {
        for j in 0..n {
            let mut val = C64::zero();
            for k in 0..n {
                val += w[i][k] * values[k] * w_inv[k][j];
            }
            out[(i, j)] = val.re;
        }
    }
    out
}

/// `(W⁻¹ M W)ᵢᵢ`: the eigenvalue of `m` matching eigenvector `i`.
fn rayleigh_entry(w: &[Vec<C64>], w_inv: &[Vec<C64>], m: &Mat<f64>, i: usize) -> C64 {
    let n = w.len();
    let mut val = C64::zero();
    for j in 0..n {
        for k in 0..n {
            val += w_inv[i][j] * w[k][i] * m[(j, k)];
        }
    }
    val
}

/// Eigenvalues sitting on the branch cut of the principal log / sqrt.
pub fn branch_cut_diagnostics(eigenvalues: &[C64]) -> Vec<Diagnostic> {
    eigenvalues
        .iter()
        .enumerate()
        .filter(|(_, l)| l.is_negative_real(BRANCH_CUT_TOL))
        .map(|(index, &eigenvalue)| Diagnostic::BranchCut { index, eigenvalue })
        .collect()
}

/// Square root of a real matrix through its eigendecomposition.
///
/// Without a reference every eigenvalue takes the principal root. With a
/// `reference` sharing the eigenvectors of `k` (e.g. `A` for `k ≈ A²`), each
/// eigenvalue takes the sign of root closest to the matching eigenvalue of
/// the reference, so negative or left-half-plane spectra survive.
pub fn sqrt_matrix(
    k: &Mat<f64>,
    reference: Option<&Mat<f64>>,
) -> Result<(Mat<f64>, Vec<Diagnostic>), DmdError> {
    let (eigenvalues, w) = eigen_decompose(k)?;
    let w_inv = eigenvector_inverse(&w)?;

    let mut flipped = 0;
    let roots: Vec<C64> = eigenvalues
        .iter()
        .enumerate()
        .map(|(i, &l)| {
            let root = l.sqrt();
            match reference {
                Some(m) => {
                    let target = rayleigh_entry(&w, &w_inv, m, i);
                    if (root - target).norm() <= (root + target).norm() {
                        root
                    } else {
                        flipped += 1;
                        root * -1.0
                    }
                }
                None => root,
            }
        })
        .collect();
    if flipped > 0 {
        debug!(flipped, "square root took the negative branch");
    }

    // a guided root has no ambiguity left on the cut
    let diagnostics = match reference {
        Some(_) => Vec::new(),
        None => branch_cut_diagnostics(&eigenvalues),
    };
    Ok((spectral_compose(&w, &w_inv, &roots), diagnostics))
}

/// Continuous-time generator `log(K) / Δt` of a discrete operator.
pub fn log_matrix(k: &Mat<f64>, dt: f64) -> Result<(Mat<f64>, Vec<Diagnostic>), DmdError> {
    let (eigenvalues, w) = eigen_decompose(k)?;
    continuous_from_eigen(&eigenvalues, &w, dt)
}

/// [`log_matrix`] for an already computed eigendecomposition.
pub fn continuous_from_eigen(
    eigenvalues: &[C64],
    w: &[Vec<C64>],
    dt: f64,
) -> Result<(Mat<f64>, Vec<Diagnostic>), DmdError> {
    if dt <= 0.0 || dt.is_nan() {
        return Err(DmdError::NonPositiveTimeStep(dt));
    }
    if eigenvalues.iter().any(|l| l.norm() == 0.0) {
        return Err(DmdError::InvalidInput(
            "operator has a zero eigenvalue, its logarithm is undefined".into(),
        ));
    }
    let diagnostics = branch_cut_diagnostics(eigenvalues);
    let generator = matrix_function_from(eigenvalues, w, |l| l.ln() / dt)?;
    Ok((generator, diagnostics))
}

/// Emit each diagnostic through `tracing`.
pub(crate) fn report(algorithm: &str, diagnostics: &[Diagnostic]) {
    for d in diagnostics {
        if d.is_warning() {
            warn!(algorithm, "{d}");
        } else {
            debug!(algorithm, "{d}");
        }
    }
}
