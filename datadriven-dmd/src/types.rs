use std::fmt;

/// Error types for operator inference.
#[derive(Debug, thiserror::Error)]
pub enum DmdError {
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("unsupported problem kind: {0} problems have no causal pairing")]
    UnsupportedProblemKind(ProblemKind),

    #[error("singular operator (reciprocal condition number {rcond:e})")]
    SingularOperator { rcond: f64 },

    #[error("time step must be positive, got {0}")]
    NonPositiveTimeStep(f64),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("SVD computation failed: {0}")]
    SvdFailed(String),

    #[error("eigendecomposition failed: {0}")]
    EigenFailed(String),

    #[error("linear solve failed: {0}")]
    SolveFailed(String),
}

/// Kind tag of a data-driven problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemKind {
    /// Snapshots `x_{k+1} = f(x_k)`.
    Discrete,
    /// States paired with their time derivatives.
    Continuous,
    /// Static input/output map with no time relation.
    Direct,
}

impl fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProblemKind::Discrete => write!(f, "discrete"),
            ProblemKind::Continuous => write!(f, "continuous"),
            ProblemKind::Direct => write!(f, "direct"),
        }
    }
}

/// Time semantics of a fitted operator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeKind {
    /// `K` advances the state by one step of length `dt`.
    Discrete { dt: f64 },
    /// `K` maps the state to its time derivative.
    Continuous,
}

/// Truncation request for the SVD-based estimators.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum RankSpec {
    /// Keep every numerically non-zero singular value.
    #[default]
    Full,
    /// Keep exactly this many singular values (clamped to what the data holds).
    Rank(usize),
    /// Keep the smallest rank capturing this fraction of σ² energy, in (0, 1].
    Energy(f64),
}

impl RankSpec {
    /// Reject energy thresholds outside (0, 1].
    pub fn validate(&self) -> Result<(), DmdError> {
        match *self {
            RankSpec::Energy(tau) if !(tau > 0.0 && tau <= 1.0) => Err(DmdError::InvalidInput(
                format!("energy threshold must lie in (0, 1], got {tau}"),
            )),
            _ => Ok(()),
        }
    }

    /// The explicit rank, if one was requested.
    pub fn requested_rank(&self) -> Option<usize> {
        match *self {
            RankSpec::Rank(r) => Some(r),
            _ => None,
        }
    }
}

/// Options accepted by [`solve`](crate::solve).
#[derive(Debug, Clone, Default)]
pub struct SolveOptions {
    /// Skip trajectory reconstruction, metrics and system construction.
    pub operator_only: bool,
    /// Round reported operator and eigenvalue entries to this many digits.
    pub digits: Option<u32>,
    /// Only meaningful for symbolic solvers; accepted and ignored here.
    pub eval_expression: bool,
}

/// Non-fatal numerical condition recorded alongside a result.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// Requested rank exceeded what the data supports.
    RankClamped { requested: usize, effective: usize },
    /// Singular values below tolerance were dropped.
    RankDeficient { requested: usize, numerical: usize },
    /// An intermediate operator was not invertible; the pseudo-inverse was used.
    SingularOperator { rcond: f64 },
    /// Eigenvalue on the negative real axis; the principal branch was taken.
    BranchCut { index: usize, eigenvalue: C64 },
}

impl Diagnostic {
    /// Whether this diagnostic is reported at warning level.
    pub fn is_warning(&self) -> bool {
        !matches!(self, Diagnostic::RankClamped { .. })
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::RankClamped {
                requested,
                effective,
            } => write!(f, "rank {requested} clamped to {effective}"),
            Diagnostic::RankDeficient {
                requested,
                numerical,
            } => write!(
                f,
                "near-singular SVD: rank {requested} reduced to numerical rank {numerical}"
            ),
            Diagnostic::SingularOperator { rcond } => write!(
                f,
                "singular operator (rcond = {rcond:e}), falling back to pseudo-inverse"
            ),
            Diagnostic::BranchCut { index, eigenvalue } => write!(
                f,
                "eigenvalue {index} = {} lies on the negative real axis, principal branch used",
                eigenvalue.re
            ),
        }
    }
}

/// Components of the truncated SVD.
#[derive(Debug, Clone)]
pub struct SvdComponents {
    /// Left singular vectors (m × r).
    pub u: faer::Mat<f64>,
    /// Singular values (r).
    pub s: Vec<f64>,
    /// Right singular vectors (n × r), columns are right singular vectors.
    pub v: faer::Mat<f64>,
}

/// Complex number type (re, im).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct C64 {
    pub re: f64,
    pub im: f64,
}

impl C64 {
    /// Create a new complex number.
    pub fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    /// Magnitude |z| = sqrt(re² + im²).
    pub fn norm(&self) -> f64 {
        self.re.hypot(self.im)
    }

    /// Squared magnitude re² + im².
    pub fn norm_sqr(&self) -> f64 {
        self.re * self.re + self.im * self.im
    }

    /// Phase angle atan2(im, re).
    pub fn arg(&self) -> f64 {
        self.im.atan2(self.re)
    }

    /// Principal logarithm ln|z| + i arg(z).
    pub fn ln(&self) -> Self {
        Self {
            re: self.norm().ln(),
            im: self.arg(),
        }
    }

    /// Principal square root.
    pub fn sqrt(&self) -> Self {
        self.powf(0.5)
    }

    /// Raise to a real power: (r e^{iθ})^p = r^p e^{ipθ}.
    pub fn powf(&self, p: f64) -> Self {
        let r = self.norm();
        let theta = self.arg();
        let rp = r.powf(p);
        Self {
            re: rp * (p * theta).cos(),
            im: rp * (p * theta).sin(),
        }
    }

    /// Whether z sits on the branch cut of the principal logarithm.
    pub fn is_negative_real(&self, tol: f64) -> bool {
        self.re < 0.0 && self.im.abs() <= tol * self.norm().max(1.0)
    }

    /// Round both parts to `digits` decimal places.
    pub fn round_to(&self, digits: u32) -> Self {
        Self {
            re: crate::utils::round_digits(self.re, digits),
            im: crate::utils::round_digits(self.im, digits),
        }
    }

    /// The zero complex number (0 + 0i).
    pub fn zero() -> Self {
        Self { re: 0.0, im: 0.0 }
    }

    /// The unit complex number (1 + 0i).
    pub fn one() -> Self {
        Self { re: 1.0, im: 0.0 }
    }
}

impl std::ops::Add for C64 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self {
            re: self.re + rhs.re,
            im: self.im + rhs.im,
        }
    }
}

impl std::ops::AddAssign for C64 {
    fn add_assign(&mut self, rhs: Self) {
        self.re += rhs.re;
        self.im += rhs.im;
    }
}

impl std::ops::Sub for C64 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self {
            re: self.re - rhs.re,
            im: self.im - rhs.im,
        }
    }
}

impl std::ops::Mul for C64 {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self {
            re: self.re * rhs.re - self.im * rhs.im,
            im: self.re * rhs.im + self.im * rhs.re,
        }
    }
}

impl std::ops::Mul<f64> for C64 {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        Self {
            re: self.re * rhs,
            im: self.im * rhs,
        }
    }
}

impl std::ops::Div for C64 {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        let denom = rhs.norm_sqr();
        Self {
            re: (self.re * rhs.re + self.im * rhs.im) / denom,
            im: (self.im * rhs.re - self.re * rhs.im) / denom,
        }
    }
}

impl std::ops::Div<f64> for C64 {
    type Output = Self;
    fn div(self, rhs: f64) -> Self {
        Self {
            re: self.re / rhs,
            im: self.im / rhs,
        }
    }
}

/// Stability classification of a mode or system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    Decaying,
    Neutral,
    Growing,
}

impl fmt::Display for Stability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stability::Decaying => write!(f, "decaying"),
            Stability::Neutral => write!(f, "neutral"),
            Stability::Growing => write!(f, "growing"),
        }
    }
}

/// Information about a single mode of the fitted operator.
#[derive(Debug, Clone)]
pub struct ModeInfo {
    /// Mode index.
    pub index: usize,
    /// Complex eigenvalue of the (discrete or continuous) operator.
    pub eigenvalue: C64,
    /// Continuous-time eigenvalue.
    pub continuous_eigenvalue: C64,
    /// Discrete-time magnitude |λ| (|e^{μΔt}| for continuous operators).
    pub magnitude: f64,
    /// Phase arg(λ) in radians.
    pub phase: f64,
    /// Oscillation frequency (cycles per time unit).
    pub frequency: f64,
    /// Oscillation period (time units).
    pub period: f64,
    /// Growth rate Re(μ).
    pub growth_rate: f64,
    /// Half-life for decaying modes (positive), doubling time for growing (negative).
    pub half_life: Option<f64>,
    /// Stability classification.
    pub stability: Stability,
}

/// Result of stability analysis.
#[derive(Debug, Clone)]
pub struct StabilityResult {
    /// Whether all modes are decaying or neutral.
    pub is_stable: bool,
    /// Whether any mode is growing.
    pub is_unstable: bool,
    /// Whether any mode is exactly neutral (within tolerance).
    pub is_marginal: bool,
    /// Maximum discrete-time eigenvalue magnitude.
    pub spectral_radius: f64,
    /// Per-mode stability classification.
    pub mode_stability: Vec<Stability>,
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

    #[test]
    fn test_c64_ln_inverts_exp() {
        let z = C64::new(0.3, -1.2);
        let w = z.ln();
        let back = C64::new(w.re.exp() * w.im.cos(), w.re.exp() * w.im.sin());
        assert_near(back.re, z.re, 1e-12);
        assert_near(back.im, z.im, 1e-12);
    }

    #[test]
    fn test_c64_sqrt_squares_back() {
        let z = C64::new(-4.0, 0.0);
        let s = z.sqrt();
        assert_near(s.re, 0.0, 1e-12);
        assert_near(s.im, 2.0, 1e-12);
        let sq = s * s;
        assert_near(sq.re, -4.0, 1e-12);
    }

    #[test]
    fn test_branch_cut_detection() {
        assert!(C64::new(-0.5, 0.0).is_negative_real(1e-12));
        assert!(!C64::new(-0.5, 0.1).is_negative_real(1e-12));
        assert!(!C64::new(0.5, 0.0).is_negative_real(1e-12));
    }

    #[test]
    fn test_rank_spec_validate() {
        assert!(RankSpec::Energy(0.99).validate().is_ok());
        assert!(RankSpec::Energy(1.0).validate().is_ok());
        assert!(RankSpec::Energy(0.0).validate().is_err());
        assert!(RankSpec::Energy(1.5).validate().is_err());
        assert!(RankSpec::Rank(3).validate().is_ok());
        assert_eq!(RankSpec::Rank(3).requested_rank(), Some(3));
        assert_eq!(RankSpec::Full.requested_rank(), None);
    }

    #[test]
    fn test_diagnostic_levels() {
        let clamp = Diagnostic::RankClamped {
            requested: 5,
            effective: 2,
        };
        assert!(!clamp.is_warning());
        assert!(Diagnostic::SingularOperator { rcond: 1e-20 }.is_warning());
        assert_eq!(clamp.to_string(), "rank 5 clamped to 2");
    }
}
