use faer::prelude::Solve;
use faer::Mat;

use crate::types::{Diagnostic, DmdError, RankSpec, SvdComponents, C64};

/// Validate that a matrix meets minimum dimension requirements and contains no NaN/Inf.
pub fn validate_matrix(x: &Mat<f64>, min_rows: usize, min_cols: usize) -> Result<(), DmdError> {
    let (rows, cols) = (x.nrows(), x.ncols());
    if rows < min_rows {
        return Err(DmdError::InvalidInput(format!(
            "matrix has {rows} rows, need at least {min_rows}"
        )));
    }
    if cols < min_cols {
        return Err(DmdError::InvalidInput(format!(
            "matrix has {cols} columns, need at least {min_cols}"
        )));
    }
    for j in 0..cols {
        for i in 0..rows {
            let val = x[(i, j)];
            if val.is_nan() || val.is_infinite() {
                return Err(DmdError::InvalidInput(
                    "matrix contains NaN or Inf values".to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Determine truncation rank from singular values (sorted descending).
///
/// An explicit rank is clamped to `[1, len]`. An energy threshold selects
/// the smallest rank whose cumulative σ² fraction reaches it.
pub fn determine_rank(singular_values: &[f64], spec: RankSpec) -> usize {
    let n = singular_values.len();
    if n == 0 {
        return 0;
    }

    match spec {
        RankSpec::Full => n,
        RankSpec::Rank(r) => r.min(n).max(1),
        RankSpec::Energy(threshold) => {
            let total: f64 = singular_values.iter().map(|s| s * s).sum();
            if total == 0.0 {
                return 1;
            }
            let mut cumulative = 0.0;
            for (i, &s) in singular_values.iter().enumerate() {
                cumulative += s * s;
                if cumulative / total >= threshold {
                    return i + 1;
                }
            }
            n
        }
    }
}

/// Default tolerance below which singular values count as zero.
pub fn svd_tolerance(singular_values: &[f64], nrows: usize, ncols: usize) -> f64 {
    let max_sv = singular_values.iter().fold(0.0_f64, |m, s| m.max(s.abs()));
    max_sv * nrows.max(ncols) as f64 * f64::EPSILON
}

/// Number of singular values above [`svd_tolerance`].
pub fn numerical_rank(singular_values: &[f64], nrows: usize, ncols: usize) -> usize {
    let tol = svd_tolerance(singular_values, nrows, ncols);
    singular_values.iter().filter(|s| s.abs() > tol).count()
}

/// Singular values of `a`, descending.
pub fn singular_values(a: &Mat<f64>) -> Result<Vec<f64>, DmdError> {
    if a.nrows() == 0 || a.ncols() == 0 {
        return Ok(Vec::new());
    }
    let svd = a
        .thin_svd()
        .map_err(|e| DmdError::SvdFailed(format!("{e:?}")))?;
    let s_col = svd.S().column_vector();
    Ok((0..s_col.nrows()).map(|i| s_col[i]).collect())
}

/// Thin SVD truncated according to `spec`.
///
/// Never truncates below 1 and never keeps numerically zero singular
/// values. Clamping and rank deficiency are reported as diagnostics.
pub fn truncated_svd(
    a: &Mat<f64>,
    spec: RankSpec,
) -> Result<(SvdComponents, Vec<Diagnostic>), DmdError> {
    spec.validate()?;
    validate_matrix(a, 1, 1)?;

    let svd = a
        .thin_svd()
        .map_err(|e| DmdError::SvdFailed(format!("{e:?}")))?;
    let s_col = svd.S().column_vector();
    let n_sv = s_col.nrows();
    let s_vals: Vec<f64> = (0..n_sv).map(|i| s_col[i]).collect();

    let mut diagnostics = Vec::new();
    let mut rank = determine_rank(&s_vals, spec);
    if let Some(requested) = spec.requested_rank() {
        if requested != rank {
            diagnostics.push(Diagnostic::RankClamped {
                requested,
                effective: rank,
            });
        }
    }

    let numerical = numerical_rank(&s_vals, a.nrows(), a.ncols());
    if numerical == 0 {
        return Err(DmdError::InvalidInput(
            "snapshot matrix is numerically zero".into(),
        ));
    }
    if rank > numerical {
        diagnostics.push(Diagnostic::RankDeficient {
            requested: rank,
            numerical,
        });
        rank = numerical;
    }

    let u = svd.U().subcols(0, rank).to_owned();
    let v = svd.V().subcols(0, rank).to_owned();
    let s = s_vals[..rank].to_vec();

    Ok((SvdComponents { u, s, v }, diagnostics))
}

/// Compute the Moore-Penrose pseudo-inverse via SVD.
pub fn pinv(a: &Mat<f64>, tol: Option<f64>) -> Result<Mat<f64>, DmdError> {
    let m = a.nrows();
    let n = a.ncols();
    if m == 0 || n == 0 {
        return Ok(Mat::<f64>::zeros(n, m));
    }

    let svd = a
        .thin_svd()
        .map_err(|e| DmdError::SvdFailed(format!("{e:?}")))?;
    let u = svd.U();
    let s_col = svd.S().column_vector();
    let v = svd.V();

    let k = s_col.nrows();
    let s_vals: Vec<f64> = (0..k).map(|i| s_col[i]).collect();
    let tol = tol.unwrap_or_else(|| svd_tolerance(&s_vals, m, n));

    // pinv(A) = V S⁺ Uᵀ
    let mut v_sinv = Mat::<f64>::zeros(n, k);
    for (idx, &si) in s_vals.iter().enumerate() {
        if si.abs() > tol {
            let si_inv = 1.0 / si;
            for j in 0..n {
                v_sinv[(j, idx)] = v[(j, idx)] * si_inv;
            }
        }
    }
    let ut = u.transpose().to_owned();

    Ok(&v_sinv * &ut)
}

/// Reciprocal 2-norm condition number σ_min / σ_max of a square matrix.
pub fn reciprocal_condition(a: &Mat<f64>) -> Result<f64, DmdError> {
    let s = singular_values(a)?;
    let max_sv = s.first().copied().unwrap_or(0.0);
    let min_sv = s.last().copied().unwrap_or(0.0);
    if max_sv == 0.0 {
        return Ok(0.0);
    }
    Ok(min_sv / max_sv)
}

/// Invert a square matrix through a partial-pivoting LU factorization.
///
/// Matrices with a reciprocal condition number at machine precision are
/// reported as [`DmdError::SingularOperator`].
pub fn invert(a: &Mat<f64>) -> Result<Mat<f64>, DmdError> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(DmdError::DimensionMismatch(format!(
            "cannot invert a {}x{} matrix",
            n,
            a.ncols()
        )));
    }
    if n == 0 {
        return Ok(Mat::<f64>::zeros(0, 0));
    }

    let rcond = reciprocal_condition(a)?;
    if rcond <= n as f64 * f64::EPSILON {
        return Err(DmdError::SingularOperator { rcond });
    }

    let inv = a.partial_piv_lu().solve(&Mat::<f64>::identity(n, n));
    let finite = (0..n).all(|j| (0..n).all(|i| inv[(i, j)].is_finite()));
    if !finite {
        return Err(DmdError::SingularOperator { rcond });
    }
    Ok(inv)
}

/// Solve a complex linear system Ax = b using Gaussian elimination.
pub fn complex_solve(a: &[Vec<C64>], b: &[C64]) -> Result<Vec<C64>, DmdError> {
    let n = b.len();
    let mut aug: Vec<Vec<C64>> = a
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let mut new_row = row.clone();
            new_row.push(b[i]);
            new_row
        })
        .collect();

    for col in 0..n {
        // Partial pivoting
        let mut max_norm = aug[col][col].norm();
        let mut max_row = col;
        for (row, aug_row) in aug.iter().enumerate().skip(col + 1) {
            let norm = aug_row[col].norm();
            if norm > max_norm {
                max_norm = norm;
                max_row = row;
            }
        }
        if max_norm < 1e-14 {
            return Err(DmdError::SolveFailed("singular matrix".into()));
        }
        aug.swap(col, max_row);

        let pivot = aug[col][col];
        for row in (col + 1)..n {
            let factor = aug[row][col] / pivot;
            for j in col..=n {
                let sub = factor * aug[col][j];
                aug[row][j] = aug[row][j] - sub;
            }
        }
    }

    // Back substitution
    let mut x = vec![C64::zero(); n];
    for i in (0..n).rev() {
        let mut sum = aug[i][n];
        for j in (i + 1)..n {
            sum = sum - aug[i][j] * x[j];
        }
        x[i] = sum / aug[i][i];
    }

    Ok(x)
}

/// Invert a complex square matrix column by column.
pub fn complex_inverse(a: &[Vec<C64>]) -> Result<Vec<Vec<C64>>, DmdError> {
    let n = a.len();
    let mut inv = vec![vec![C64::zero(); n]; n];
    for col in 0..n {
        let mut e = vec![C64::zero(); n];
        e[col] = C64::one();
        let x = complex_solve(a, &e)?;
        for (row, val) in x.into_iter().enumerate() {
            inv[row][col] = val;
        }
    }
    Ok(inv)
}

/// Stack `top` over `bottom`; both must have the same number of columns.
pub fn stack_rows(top: &Mat<f64>, bottom: &Mat<f64>) -> Result<Mat<f64>, DmdError> {
    if top.ncols() != bottom.ncols() {
        return Err(DmdError::DimensionMismatch(format!(
            "cannot stack {} columns over {} columns",
            top.ncols(),
            bottom.ncols()
        )));
    }
    let (m1, m2, n) = (top.nrows(), bottom.nrows(), top.ncols());
    let mut out = Mat::<f64>::zeros(m1 + m2, n);
    for j in 0..n {
        for i in 0..m1 {
            out[(i, j)] = top[(i, j)];
        }
        for i in 0..m2 {
            out[(m1 + i, j)] = bottom[(i, j)];
        }
    }
    Ok(out)
}

/// Matrix-vector product A x.
pub fn mat_vec(a: &Mat<f64>, x: &[f64]) -> Vec<f64> {
    let mut y = vec![0.0; a.nrows()];
    for (j, &xj) in x.iter().enumerate().take(a.ncols()) {
        if xj == 0.0 {
            continue;
        }
        for (i, yi) in y.iter_mut().enumerate() {
            *yi += a[(i, j)] * xj;
        }
    }
    y
}

/// Column j of a matrix.
pub fn column(a: &Mat<f64>, j: usize) -> Vec<f64> {
    (0..a.nrows()).map(|i| a[(i, j)]).collect()
}

/// Digits beyond which an f64 carries no further decimal information.
const MAX_ROUND_DIGITS: u32 = 17;

/// Round to `digits` decimal places.
///
/// Values are returned unchanged once `digits` exceeds f64 precision or the
/// scaled value leaves the finite range.
pub fn round_digits(x: f64, digits: u32) -> f64 {
    if digits >= MAX_ROUND_DIGITS {
        return x;
    }
    let scale = 10.0_f64.powi(digits as i32);
    let scaled = x * scale;
    if !scaled.is_finite() {
        return x;
    }
    scaled.round() / scale
}
