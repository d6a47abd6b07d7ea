//! # datadriven-dmd
//!
//! Linear operator inference from snapshot data with Dynamic Mode
//! Decomposition.
//!
//! Given states `x_k` (and optionally derivatives or control inputs), the
//! library fits `x_{k+1} ≈ K x_k + B u_k` (or `ẋ ≈ K x + B u`) and exposes
//! the operator, its spectrum and a reconstructed trajectory:
//!
//! - **Problems** ([`DataProblem`]): discrete, continuous and direct
//!   sample records, validated on construction
//! - **Estimators** ([`Estimator`]): [`DmdPinv`], [`DmdSvd`], [`TotalDmd`]
//!   and [`ForwardBackwardDmd`], with [`RankSpec`] truncation
//! - **Results** ([`EstimationResult`]): the decomposition `K, B, C, Q`,
//!   a lazily cached eigensystem, and the continuous-time generator
//! - **Solutions** ([`solve`]): trajectory reconstruction, a fitted
//!   [`System`] and accuracy [`Metrics`]
//! - **Analysis** ([`spectrum`], [`stability`]): per-mode growth rates,
//!   frequencies and stability
//!
//! ## Quick Start
//!
//! ```rust
//! use datadriven_dmd::{solve, DataProblem, DmdSvd, RankSpec, SolveOptions};
//!
//! // Damped rotation sampled at unit steps
//! let (c, s) = (0.95 * 0.2_f64.cos(), 0.95 * 0.2_f64.sin());
//! let n = 50;
//! let mut x = faer::Mat::<f64>::zeros(2, n);
//! x[(0, 0)] = 1.0;
//! for k in 1..n {
//!     x[(0, k)] = c * x[(0, k - 1)] - s * x[(1, k - 1)];
//!     x[(1, k)] = s * x[(0, k - 1)] + c * x[(1, k - 1)];
//! }
//!
//! let problem = DataProblem::discrete(x).unwrap();
//! let solution = solve(&problem, &DmdSvd::new(RankSpec::Full), &SolveOptions::default()).unwrap();
//!
//! let k = solution.result().operator();
//! assert!((k[(0, 0)] - c).abs() < 1e-8);
//! assert!(solution.metrics().scalar("L2").unwrap() < 1e-8);
//! ```
//!
//! Diagnostics (rank clamping, rank deficiency, singular backward operators,
//! branch cuts) are recorded on the result and logged through `tracing`.
//!
//! ## References
//!
//! - Schmid (2010), *J. Fluid Mech.*, 656, 5-28
//! - Proctor, Brunton & Kutz (2016), *SIAM J. Appl. Dyn. Syst.*, 15(1)
//! - Dawson et al. (2016), *Exp. Fluids*, 57, 42
//! - Hemati et al. (2017), *Theor. Comput. Fluid Dyn.*, 31, 349-368

pub mod types;
pub mod utils;

pub mod analysis;
pub mod estimators;
pub mod operator;
pub mod problem;
pub mod result;
pub mod snapshots;
pub mod solution;

pub use analysis::{spectrum, stability};
pub use estimators::{DmdPinv, DmdSvd, Estimator, ForwardBackwardDmd, TotalDmd, FB_RCOND_EPS};
pub use operator::{Eigensystem, LinearOperator};
pub use problem::DataProblem;
pub use result::{ContinuousOperator, EstimationResult};
pub use snapshots::{assemble, SnapshotPairs};
pub use solution::{compute_metrics, solve, Metric, Metrics, Solution, System};
pub use types::{
    Diagnostic, DmdError, ModeInfo, ProblemKind, RankSpec, SolveOptions, Stability,
    StabilityResult, TimeKind, C64,
};
