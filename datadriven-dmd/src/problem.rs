use faer::Mat;

use crate::types::{DmdError, ProblemKind};
use crate::utils::validate_matrix;

/// A validated data-driven problem.
///
/// Holds states `x` (n_states × n_samples), the time vector, optional
/// derivatives or direct outputs, optional controls (n_controls × n_samples)
/// and known parameters. Shapes are checked when the record is built, so
/// downstream code can rely on them.
#[derive(Debug, Clone)]
pub struct DataProblem {
    kind: ProblemKind,
    x: Mat<f64>,
    t: Vec<f64>,
    dx: Option<Mat<f64>>,
    u: Option<Mat<f64>>,
    p: Vec<f64>,
}

impl DataProblem {
    /// Discrete problem with unit time step: `t = 0, 1, …, n-1`.
    pub fn discrete(x: Mat<f64>) -> Result<Self, DmdError> {
        validate_matrix(&x, 1, 1)?;
        let t = (0..x.ncols()).map(|k| k as f64).collect();
        Ok(Self {
            kind: ProblemKind::Discrete,
            x,
            t,
            dx: None,
            u: None,
            p: Vec::new(),
        })
    }

    /// Continuous problem sampled at times `t`.
    ///
    /// Derivatives are attached with [`with_derivatives`](Self::with_derivatives);
    /// they are not estimated here.
    pub fn continuous(x: Mat<f64>, t: Vec<f64>) -> Result<Self, DmdError> {
        validate_matrix(&x, 1, 1)?;
        validate_time(&t, x.ncols())?;
        Ok(Self {
            kind: ProblemKind::Continuous,
            x,
            t,
            dx: None,
            u: None,
            p: Vec::new(),
        })
    }

    /// Direct problem `y = f(x)` with no time relation.
    pub fn direct(x: Mat<f64>, y: Mat<f64>) -> Result<Self, DmdError> {
        validate_matrix(&x, 1, 1)?;
        validate_matrix(&y, 1, 1)?;
        if y.ncols() != x.ncols() {
            return Err(DmdError::DimensionMismatch(format!(
                "outputs have {} samples, states have {}",
                y.ncols(),
                x.ncols()
            )));
        }
        let t = (0..x.ncols()).map(|k| k as f64).collect();
        Ok(Self {
            kind: ProblemKind::Direct,
            x,
            t,
            dx: Some(y),
            u: None,
            p: Vec::new(),
        })
    }

    /// Attach time derivatives (same shape as `x`).
    pub fn with_derivatives(mut self, dx: Mat<f64>) -> Result<Self, DmdError> {
        validate_matrix(&dx, 1, 1)?;
        if dx.nrows() != self.x.nrows() || dx.ncols() != self.x.ncols() {
            return Err(DmdError::DimensionMismatch(format!(
                "derivatives are {}x{}, states are {}x{}",
                dx.nrows(),
                dx.ncols(),
                self.x.nrows(),
                self.x.ncols()
            )));
        }
        self.dx = Some(dx);
        Ok(self)
    }

    /// Attach control inputs (n_controls × n_samples).
    pub fn with_control(mut self, u: Mat<f64>) -> Result<Self, DmdError> {
        validate_matrix(&u, 1, 1)?;
        if u.ncols() != self.x.ncols() {
            return Err(DmdError::DimensionMismatch(format!(
                "controls have {} samples, states have {}",
                u.ncols(),
                self.x.ncols()
            )));
        }
        self.u = Some(u);
        Ok(self)
    }

    /// Replace the time vector.
    pub fn with_time(mut self, t: Vec<f64>) -> Result<Self, DmdError> {
        validate_time(&t, self.x.ncols())?;
        self.t = t;
        Ok(self)
    }

    /// Attach known parameters.
    pub fn with_parameters(mut self, p: Vec<f64>) -> Self {
        self.p = p;
        self
    }

    pub fn kind(&self) -> ProblemKind {
        self.kind
    }

    pub fn states(&self) -> &Mat<f64> {
        &self.x
    }

    pub fn times(&self) -> &[f64] {
        &self.t
    }

    /// Derivatives (continuous) or outputs (direct), if present.
    pub fn derivatives(&self) -> Option<&Mat<f64>> {
        self.dx.as_ref()
    }

    pub fn controls(&self) -> Option<&Mat<f64>> {
        self.u.as_ref()
    }

    pub fn parameters(&self) -> &[f64] {
        &self.p
    }

    pub fn n_states(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.x.ncols()
    }

    /// Mean sampling interval, 1.0 for a single sample.
    pub fn dt(&self) -> f64 {
        let n = self.t.len();
        if n < 2 {
            return 1.0;
        }
        (self.t[n - 1] - self.t[0]) / (n - 1) as f64
    }
}

fn validate_time(t: &[f64], n_samples: usize) -> Result<(), DmdError> {
    if t.len() != n_samples {
        return Err(DmdError::DimensionMismatch(format!(
            "time vector has {} entries, states have {n_samples} samples",
            t.len()
        )));
    }
    if t.iter().any(|v| !v.is_finite()) {
        return Err(DmdError::InvalidInput(
            "time vector contains NaN or Inf values".into(),
        ));
    }
    if t.windows(2).any(|w| w[1] <= w[0]) {
        return Err(DmdError::InvalidInput(
            "time vector must be strictly increasing".into(),
        ));
    }
    Ok(())
}
