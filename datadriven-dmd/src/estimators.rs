//! Dynamic Mode Decomposition estimators.
//!
//! Every estimator consumes snapshot pairs `(X0, X1)`, optional controls
//! `U0` and a [`RankSpec`], and returns a [`LinearOperator`]. Composite
//! estimators ([`TotalDmd`]) wrap an inner one.

use faer::Mat;
use tracing::{debug, warn};

use crate::operator::{report, sqrt_matrix, LinearOperator};
use crate::types::{Diagnostic, DmdError, RankSpec};
use crate::utils::{
    invert, pinv, reciprocal_condition, stack_rows, truncated_svd, validate_matrix,
};

/// Reciprocal condition number below which the backward operator counts as singular.
pub const FB_RCOND_EPS: f64 = 1e-12;

/// A linear operator inference algorithm.
pub trait Estimator {
    /// Short algorithm name recorded in results.
    fn name(&self) -> &'static str;

    /// The truncation this estimator is configured with.
    fn truncation(&self) -> RankSpec {
        RankSpec::Full
    }

    /// Fit `X1 ≈ K X0 (+ B U0)`.
    fn estimate(
        &self,
        x0: &Mat<f64>,
        x1: &Mat<f64>,
        u0: Option<&Mat<f64>>,
        rank: RankSpec,
    ) -> Result<LinearOperator, DmdError>;
}

impl<E: Estimator + ?Sized> Estimator for Box<E> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn truncation(&self) -> RankSpec {
        (**self).truncation()
    }

    fn estimate(
        &self,
        x0: &Mat<f64>,
        x1: &Mat<f64>,
        u0: Option<&Mat<f64>>,
        rank: RankSpec,
    ) -> Result<LinearOperator, DmdError> {
        (**self).estimate(x0, x1, u0, rank)
    }
}

/// Direct pseudo-inverse: `[K B] = X1 pinv([X0; U0])`.
///
/// Always full rank. Any truncation passed to [`Estimator::estimate`] is
/// ignored, so the operator is recovered exactly whenever `X0` has full
/// row rank.
#[derive(Debug, Clone, Copy, Default)]
pub struct DmdPinv;

impl Estimator for DmdPinv {
    fn name(&self) -> &'static str {
        "DMDPINV"
    }

    fn estimate(
        &self,
        x0: &Mat<f64>,
        x1: &Mat<f64>,
        u0: Option<&Mat<f64>>,
        _rank: RankSpec,
    ) -> Result<LinearOperator, DmdError> {
        check_pairs(x0, x1, u0)?;
        let n = x0.nrows();

        let omega = match u0 {
            Some(u) => stack_rows(x0, u)?,
            None => x0.clone(),
        };
        let g = x1 * &pinv(&omega, None)?;
        let (k, b) = split_augmented(&g, n);

        debug!(algorithm = self.name(), n_states = n, "fitted full operator");
        Ok(LinearOperator::full(k, b))
    }
}

/// SVD-truncated DMD.
///
/// `X0 ≈ U_r Σ_r V_rᵀ`, reduced operator `K̃ = U_rᵀ X1 V_r Σ_r⁻¹` and exact
/// modes `X1 V_r Σ_r⁻¹ W`. When the retained rank equals the state
/// dimension the operator is returned in the standard basis.
#[derive(Debug, Clone, Copy, Default)]
pub struct DmdSvd {
    pub truncation: RankSpec,
}

impl DmdSvd {
    pub fn new(truncation: RankSpec) -> Self {
        Self { truncation }
    }

    fn estimate_with_control(
        &self,
        x0: &Mat<f64>,
        x1: &Mat<f64>,
        u: &Mat<f64>,
        rank: RankSpec,
    ) -> Result<LinearOperator, DmdError> {
        let n = x0.nrows();
        let n_controls = u.nrows();

        // Input space: the explicit rank counts state directions only
        let omega = stack_rows(x0, u)?;
        let omega_spec = match rank {
            RankSpec::Rank(r) => RankSpec::Rank(r + n_controls),
            other => other,
        };
        let (svd_in, mut diagnostics) = truncated_svd(&omega, omega_spec)?;
        diagnostics.retain(|d| !matches!(d, Diagnostic::RankClamped { .. }));

        let x1_v_sinv = scale_columns(&(x1 * &svd_in.v), &svd_in.s);
        let ut = svd_in.u.transpose().to_owned();
        let g = &x1_v_sinv * &ut;
        let (a, b) = split_augmented(&g, n);

        // Output space
        let (svd_out, out_diagnostics) = truncated_svd(x1, rank)?;
        diagnostics.extend(out_diagnostics);
        report(self.name(), &diagnostics);

        let r = svd_out.s.len();
        let op = if r == n {
            LinearOperator::full(a, b)
        } else {
            let q = svd_out.u;
            let qt = q.transpose().to_owned();
            let k = &(&qt * &a) * &q;
            let b = b.map(|b| &qt * &b);
            LinearOperator::reduced(k, b, q.clone(), q)
        };

        debug!(algorithm = self.name(), rank = r, n_controls, "fitted controlled operator");
        Ok(op
            .with_requested_rank(rank.requested_rank())
            .with_diagnostics(diagnostics))
    }
}

impl Estimator for DmdSvd {
    fn name(&self) -> &'static str {
        "DMDSVD"
    }

    fn truncation(&self) -> RankSpec {
        self.truncation
    }

    fn estimate(
        &self,
        x0: &Mat<f64>,
        x1: &Mat<f64>,
        u0: Option<&Mat<f64>>,
        rank: RankSpec,
    ) -> Result<LinearOperator, DmdError> {
        check_pairs(x0, x1, u0)?;
        if let Some(u) = u0 {
            return self.estimate_with_control(x0, x1, u, rank);
        }

        let n = x0.nrows();
        let (svd, diagnostics) = truncated_svd(x0, rank)?;
        report(self.name(), &diagnostics);
        let r = svd.s.len();

        // X1 V Σ⁻¹ (n × r)
        let x1_v_sinv = scale_columns(&(x1 * &svd.v), &svd.s);
        // K̃ = Uᵀ X1 V Σ⁻¹ (r × r)
        let k_tilde = svd.u.transpose() * &x1_v_sinv;

        let op = if r == n {
            let ut = svd.u.transpose().to_owned();
            let k = &(&svd.u * &k_tilde) * &ut;
            let mut op = LinearOperator::full(k, None);
            // eigenvectors of U K̃ Uᵀ are U W, so X1 V Σ⁻¹ Uᵀ (U W) = X1 V Σ⁻¹ W
            op.mode_basis = &x1_v_sinv * &ut;
            op
        } else {
            LinearOperator::reduced(k_tilde, None, svd.u, x1_v_sinv)
        };

        debug!(algorithm = self.name(), rank = r, n_states = n, "fitted operator");
        Ok(op
            .with_requested_rank(rank.requested_rank())
            .with_diagnostics(diagnostics))
    }
}

/// Total least squares DMD.
///
/// Denoises both `X0` and `X1` by projecting them onto the leading right
/// singular subspace of `[X0; X1]` before handing them to `inner`. The
/// denoising rank is independent of the inner estimator's truncation.
#[derive(Debug, Clone, Copy)]
pub struct TotalDmd<E = DmdPinv> {
    pub truncation: RankSpec,
    pub inner: E,
}

impl Default for TotalDmd<DmdPinv> {
    fn default() -> Self {
        Self {
            truncation: RankSpec::Full,
            inner: DmdPinv,
        }
    }
}

impl<E: Estimator> TotalDmd<E> {
    pub fn new(truncation: RankSpec, inner: E) -> Self {
        Self { truncation, inner }
    }
}

impl<E: Estimator> Estimator for TotalDmd<E> {
    fn name(&self) -> &'static str {
        "TOTALDMD"
    }

    fn truncation(&self) -> RankSpec {
        self.truncation
    }

    fn estimate(
        &self,
        x0: &Mat<f64>,
        x1: &Mat<f64>,
        u0: Option<&Mat<f64>>,
        rank: RankSpec,
    ) -> Result<LinearOperator, DmdError> {
        check_pairs(x0, x1, u0)?;

        let z = stack_rows(x0, x1)?;
        let (svd, mut diagnostics) = truncated_svd(&z, rank)?;
        // dropping numerically null directions is the point of the projection
        diagnostics.retain(|d| !matches!(d, Diagnostic::RankDeficient { .. }));
        report(self.name(), &diagnostics);

        // X ↦ (X V_r) V_rᵀ, never forming the samples × samples projector
        let v = &svd.v;
        let vt = v.transpose().to_owned();
        let project = |a: &Mat<f64>| -> Mat<f64> {
            let av = a * v;
            &av * &vt
        };
        let x0p = project(x0);
        let x1p = project(x1);
        let u0p = u0.map(project);

        debug!(
            algorithm = self.name(),
            denoising_rank = svd.s.len(),
            inner = self.inner.name(),
            "projected snapshots"
        );

        let op = self
            .inner
            .estimate(&x0p, &x1p, u0p.as_ref(), self.inner.truncation())?;
        Ok(op.with_diagnostics(diagnostics))
    }
}

/// Forward-backward DMD.
///
/// Fits forward `K_f: X0 → X1` and backward `K_b: X1 → X0` operators in
/// the POD basis of `X0` and returns `(K_f K_b⁻¹)^{1/2}`, which cancels the
/// first-order noise bias. Each eigenvalue of the root takes the branch
/// closest to the forward estimate, so negative spectra keep their sign.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardBackwardDmd {
    pub truncation: RankSpec,
}

impl ForwardBackwardDmd {
    pub fn new(truncation: RankSpec) -> Self {
        Self { truncation }
    }
}

impl Estimator for ForwardBackwardDmd {
    fn name(&self) -> &'static str {
        "fbDMD"
    }

    fn truncation(&self) -> RankSpec {
        self.truncation
    }

    fn estimate(
        &self,
        x0: &Mat<f64>,
        x1: &Mat<f64>,
        u0: Option<&Mat<f64>>,
        rank: RankSpec,
    ) -> Result<LinearOperator, DmdError> {
        check_pairs(x0, x1, u0)?;
        if u0.is_some() {
            return Err(DmdError::InvalidInput(
                "forward-backward DMD does not support control inputs".into(),
            ));
        }

        let n = x0.nrows();
        let (svd, mut diagnostics) = truncated_svd(x0, rank)?;
        report(self.name(), &diagnostics);
        let r = svd.s.len();
        let q = svd.u;
        let qt = q.transpose().to_owned();

        let x0r = &qt * x0;
        let x1r = &qt * x1;
        let k_f = &x1r * &pinv(&x0r, None)?;
        let k_b = &x0r * &pinv(&x1r, None)?;

        let rcond = reciprocal_condition(&k_b)?;
        let inverted = if rcond < FB_RCOND_EPS {
            Err(DmdError::SingularOperator { rcond })
        } else {
            invert(&k_b)
        };
        let k_b_inv = match inverted {
            Ok(inv) => inv,
            Err(DmdError::SingularOperator { rcond }) => {
                warn!(
                    algorithm = self.name(),
                    rcond, "backward operator is singular, using pseudo-inverse"
                );
                diagnostics.push(Diagnostic::SingularOperator { rcond });
                pinv(&k_b, None)?
            }
            Err(e) => return Err(e),
        };

        let (k_red, root_diagnostics) = sqrt_matrix(&(&k_f * &k_b_inv), Some(&k_f))?;
        report(self.name(), &root_diagnostics);
        diagnostics.extend(root_diagnostics);

        let op = if r == n {
            let k = &(&q * &k_red) * &qt;
            LinearOperator::full(k, None)
        } else {
            LinearOperator::reduced(k_red, None, q.clone(), q)
        };

        debug!(algorithm = self.name(), rank = r, rcond, "fitted operator");
        Ok(op
            .with_requested_rank(rank.requested_rank())
            .with_diagnostics(diagnostics))
    }
}

fn check_pairs(x0: &Mat<f64>, x1: &Mat<f64>, u0: Option<&Mat<f64>>) -> Result<(), DmdError> {
    validate_matrix(x0, 1, 1)?;
    validate_matrix(x1, 1, 1)?;
    if x0.nrows() != x1.nrows() || x0.ncols() != x1.ncols() {
        return Err(DmdError::DimensionMismatch(format!(
            "X0 is {}x{}, X1 is {}x{}",
            x0.nrows(),
            x0.ncols(),
            x1.nrows(),
            x1.ncols()
        )));
    }
    if let Some(u) = u0 {
        validate_matrix(u, 1, 1)?;
        if u.ncols() != x0.ncols() {
            return Err(DmdError::DimensionMismatch(format!(
                "U0 has {} samples, X0 has {}",
                u.ncols(),
                x0.ncols()
            )));
        }
    }
    Ok(())
}

/// Split `[K B]` after the first `n` columns.
fn split_augmented(g: &Mat<f64>, n: usize) -> (Mat<f64>, Option<Mat<f64>>) {
    let k = g.subcols(0, n).to_owned();
    let n_controls = g.ncols() - n;
    let b = (n_controls > 0).then(|| g.subcols(n, n_controls).to_owned());
    (k, b)
}

/// Divide column j by `s[j]`.
fn scale_columns(a: &Mat<f64>, s: &[f64]) -> Mat<f64> {
    let mut out = Mat::<f64>::zeros(a.nrows(), a.ncols());
    for (j, &sj) in s.iter().enumerate() {
        for i in 0..a.nrows() {
            out[(i, j)] = a[(i, j)] / sj;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_near(a: f64, b: f64, eps: f64) {
        assert!(
            (a - b).abs() < eps,
            "expected {a} ≈ {b} (diff = {})",
            (a - b).abs()
        );
    }

    fn assert_mat_near(a: &Mat<f64>, b: &Mat<f64>, eps: f64) {
        assert_eq!((a.nrows(), a.ncols()), (b.nrows(), b.ncols()));
        for i in 0..a.nrows() {
            for j in 0..a.ncols() {
                assert_near(a[(i, j)], b[(i, j)], eps);
            }
        }
    }

    fn system_matrix() -> Mat<f64> {
        let mut a = Mat::<f64>::zeros(2, 2);
        a[(0, 0)] = 0.9;
        a[(0, 1)] = -0.1;
        a[(1, 0)] = 0.2;
        a[(1, 1)] = 0.8;
        a
    }

    /// Trajectory of x_{k+1} = A x_k (+ B u_k) as snapshot pairs.
    fn pairs(
        a: &Mat<f64>,
        b: Option<(&Mat<f64>, &Mat<f64>)>,
        x_init: &[f64],
        n_time: usize,
    ) -> (Mat<f64>, Mat<f64>) {
        let n = a.nrows();
        let mut x = Mat::<f64>::zeros(n, n_time);
        for i in 0..n {
            x[(i, 0)] = x_init[i];
        }
        for k in 1..n_time {
            for i in 0..n {
                let mut val = 0.0;
                for j in 0..n {
                    val += a[(i, j)] * x[(j, k - 1)];
                }
                if let Some((bm, u)) = b {
                    for c in 0..bm.ncols() {
                        val += bm[(i, c)] * u[(c, k - 1)];
                    }
                }
                x[(i, k)] = val;
            }
        }
        (
            x.subcols(0, n_time - 1).to_owned(),
            x.subcols(1, n_time - 1).to_owned(),
        )
    }

    #[test]
    fn test_pinv_recovers_operator() {
        let a = system_matrix();
        let (x0, x1) = pairs(&a, None, &[1.0, 0.5], 20);
        let op = DmdPinv.estimate(&x0, &x1, None, RankSpec::Full).unwrap();
        assert_mat_near(&op.k, &a, 1e-10);
        assert_eq!(op.rank, 2);
        assert!(!op.has_control());
    }

    #[test]
    fn test_pinv_ignores_truncation() {
        let a = system_matrix();
        let (x0, x1) = pairs(&a, None, &[1.0, 0.5], 20);
        let op = DmdPinv.estimate(&x0, &x1, None, RankSpec::Rank(1)).unwrap();
        assert_eq!(op.rank, 2);
        assert_mat_near(&op.k, &a, 1e-10);
    }

    #[test]
    fn test_svd_recovers_operator_in_standard_basis() {
        let a = system_matrix();
        let (x0, x1) = pairs(&a, None, &[1.0, 0.5], 20);
        let op = DmdSvd::default()
            .estimate(&x0, &x1, None, RankSpec::Full)
            .unwrap();
        assert_mat_near(&op.k, &a, 1e-10);
        assert_mat_near(&op.c, &Mat::<f64>::identity(2, 2), 0.0);
        assert!(op.diagnostics.is_empty());
    }

    #[test]
    fn test_svd_clamps_rank() {
        let a = system_matrix();
        let (x0, x1) = pairs(&a, None, &[1.0, 0.5], 20);
        let op = DmdSvd::new(RankSpec::Rank(7))
            .estimate(&x0, &x1, None, RankSpec::Rank(7))
            .unwrap();
        assert_eq!(op.rank, 2);
        assert_eq!(op.requested_rank, Some(7));
        assert!(op.diagnostics.contains(&Diagnostic::RankClamped {
            requested: 7,
            effective: 2
        }));
    }

    #[test]
    fn test_svd_reduced_shapes() {
        let a = system_matrix();
        let (x0, x1) = pairs(&a, None, &[1.0, 0.5], 20);
        let op = DmdSvd::new(RankSpec::Rank(1))
            .estimate(&x0, &x1, None, RankSpec::Rank(1))
            .unwrap();
        assert_eq!(op.rank, 1);
        assert_eq!((op.k.nrows(), op.k.ncols()), (1, 1));
        assert_eq!((op.c.nrows(), op.c.ncols()), (2, 1));
        assert_eq!((op.q.nrows(), op.q.ncols()), (2, 1));
        assert!(op.is_reduced());
        assert!(op.validate().is_ok());
    }

    #[test]
    fn test_scalar_system() {
        let mut a = Mat::<f64>::zeros(1, 1);
        a[(0, 0)] = 0.9;
        let (x0, x1) = pairs(&a, None, &[2.0], 10);
        let estimators: Vec<Box<dyn Estimator>> = vec![
            Box::new(DmdPinv),
            Box::new(DmdSvd::default()),
            Box::new(TotalDmd::default()),
            Box::new(ForwardBackwardDmd::default()),
        ];
        for est in &estimators {
            let op = est.estimate(&x0, &x1, None, est.truncation()).unwrap();
            assert_near(op.k[(0, 0)], 0.9, 1e-10);
        }
    }

    #[test]
    fn test_forward_backward_keeps_negative_eigenvalue() {
        let mut a = Mat::<f64>::zeros(2, 2);
        a[(0, 0)] = -0.5;
        a[(0, 1)] = 0.1;
        a[(1, 1)] = 0.8;
        let (x0, x1) = pairs(&a, None, &[1.0, 1.0], 15);
        let op = ForwardBackwardDmd::default()
            .estimate(&x0, &x1, None, RankSpec::Full)
            .unwrap();
        for i in 0..2 {
            for j in 0..2 {
                assert_near(op.k[(i, j)], a[(i, j)], 1e-8);
            }
        }
        assert!(op.diagnostics.is_empty());
    }

    #[test]
    fn test_control_recovered() {
        let a = system_matrix();
        let mut b = Mat::<f64>::zeros(2, 1);
        b[(0, 0)] = 1.0;
        b[(1, 0)] = -0.5;
        let n_time = 30;
        let mut u = Mat::<f64>::zeros(1, n_time);
        for k in 0..n_time {
            u[(0, k)] = (0.7 * k as f64).sin() + 0.3 * (1.9 * k as f64).cos();
        }
        let (x0, x1) = pairs(&a, Some((&b, &u)), &[1.0, 0.0], n_time);
        let u0 = u.subcols(0, n_time - 1).to_owned();

        let svd = DmdSvd::default();
        let estimators: [&dyn Estimator; 2] = [&DmdPinv, &svd];
        for est in estimators {
            let op = est.estimate(&x0, &x1, Some(&u0), RankSpec::Full).unwrap();
            assert!(op.has_control());
            assert_mat_near(&op.k, &a, 1e-8);
            assert_mat_near(&op.b, &b, 1e-8);
        }
    }

    #[test]
    fn test_forward_backward_rejects_control() {
        let a = system_matrix();
        let (x0, x1) = pairs(&a, None, &[1.0, 0.5], 10);
        let u0 = Mat::<f64>::zeros(1, 9);
        assert!(matches!(
            ForwardBackwardDmd::default().estimate(&x0, &x1, Some(&u0), RankSpec::Full),
            Err(DmdError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_forward_backward_singular_fallback() {
        // X1 = diag(0.5, 0) X0 makes the backward operator singular
        let mut x0 = Mat::<f64>::zeros(2, 3);
        x0[(0, 0)] = 1.0;
        x0[(1, 1)] = 1.0;
        x0[(0, 2)] = 1.0;
        x0[(1, 2)] = 1.0;
        let mut x1 = Mat::<f64>::zeros(2, 3);
        x1[(0, 0)] = 0.5;
        x1[(0, 2)] = 0.5;

        let op = ForwardBackwardDmd::default()
            .estimate(&x0, &x1, None, RankSpec::Full)
            .unwrap();
        assert!(op
            .diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::SingularOperator { .. })));
        for i in 0..2 {
            for j in 0..2 {
                assert!(op.k[(i, j)].is_finite());
            }
        }
    }

    #[test]
    fn test_total_dmd_wraps_inner() {
        let a = system_matrix();
        let (x0, x1) = pairs(&a, None, &[1.0, 0.5], 20);
        let est = TotalDmd::new(RankSpec::Rank(2), DmdSvd::default());
        assert_eq!(est.name(), "TOTALDMD");
        let op = est.estimate(&x0, &x1, None, est.truncation()).unwrap();
        assert_mat_near(&op.k, &a, 1e-8);
    }

    #[test]
    fn test_mismatched_pairs() {
        let x0 = Mat::<f64>::identity(2, 3);
        let x1 = Mat::<f64>::identity(2, 4);
        assert!(matches!(
            DmdPinv.estimate(&x0, &x1, None, RankSpec::Full),
            Err(DmdError::DimensionMismatch(_))
        ));
    }
}
