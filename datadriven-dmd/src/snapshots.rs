use faer::Mat;
use tracing::debug;

use crate::problem::DataProblem;
use crate::types::{DmdError, ProblemKind, TimeKind};
use crate::utils::column;

/// Paired snapshot matrices extracted from a problem.
///
/// Column `i` of `x1` is the successor (discrete) or time derivative
/// (continuous) of column `i` of `x0`. All matrices are owned copies.
#[derive(Debug, Clone)]
pub struct SnapshotPairs {
    /// Current states (n_states × n_samples).
    pub x0: Mat<f64>,
    /// Advanced states or derivatives (n_states × n_samples).
    pub x1: Mat<f64>,
    /// Controls aligned with `x0` (n_controls × n_samples).
    pub u0: Option<Mat<f64>>,
    /// Time semantics of the pairing.
    pub time: TimeKind,
    /// First state of the trajectory.
    pub initial: Vec<f64>,
}

impl SnapshotPairs {
    pub fn n_states(&self) -> usize {
        self.x0.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.x0.ncols()
    }

    pub fn n_controls(&self) -> usize {
        self.u0.as_ref().map_or(0, |u| u.nrows())
    }
}

/// Build snapshot pairs from a validated problem.
///
/// * discrete: `X0 = X[:, 0..n-1]`, `X1 = X[:, 1..n]`, `U0 = U[:, 0..n-1]`
/// * continuous: `X0 = X`, `X1 = DX`, `U0 = U`
/// * direct: rejected
pub fn assemble(problem: &DataProblem) -> Result<SnapshotPairs, DmdError> {
    let x = problem.states();
    let n_time = x.ncols();

    let (x0, x1, u0, time) = match problem.kind() {
        ProblemKind::Direct => {
            return Err(DmdError::UnsupportedProblemKind(ProblemKind::Direct));
        }
        ProblemKind::Discrete => {
            if n_time < 2 {
                return Err(DmdError::DimensionMismatch(format!(
                    "discrete problem needs at least 2 samples to form a pair, got {n_time}"
                )));
            }
            let x0 = x.subcols(0, n_time - 1).to_owned();
            let x1 = x.subcols(1, n_time - 1).to_owned();
            let u0 = problem
                .controls()
                .map(|u| u.subcols(0, n_time - 1).to_owned());
            (x0, x1, u0, TimeKind::Discrete { dt: problem.dt() })
        }
        ProblemKind::Continuous => {
            let dx = problem.derivatives().ok_or_else(|| {
                DmdError::InvalidInput(
                    "continuous problem has no derivative estimates".into(),
                )
            })?;
            (
                x.clone(),
                dx.clone(),
                problem.controls().cloned(),
                TimeKind::Continuous,
            )
        }
    };

    if x0.ncols() != x1.ncols() || x0.nrows() != x1.nrows() {
        return Err(DmdError::DimensionMismatch(format!(
            "X0 is {}x{}, X1 is {}x{}",
            x0.nrows(),
            x0.ncols(),
            x1.nrows(),
            x1.ncols()
        )));
    }
    if let Some(u) = &u0 {
        if u.ncols() != x0.ncols() {
            return Err(DmdError::DimensionMismatch(format!(
                "U0 has {} samples, X0 has {}",
                u.ncols(),
                x0.ncols()
            )));
        }
    }
    if x0.ncols() == 0 {
        return Err(DmdError::DimensionMismatch(
            "no snapshot pairs available".into(),
        ));
    }

    debug!(
        n_states = x0.nrows(),
        n_samples = x0.ncols(),
        n_controls = u0.as_ref().map_or(0, |u| u.nrows()),
        kind = %problem.kind(),
        "assembled snapshot pairs"
    );

    Ok(SnapshotPairs {
        initial: column(x, 0),
        x0,
        x1,
        u0,
        time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting(n_vars: usize, n_time: usize) -> Mat<f64> {
        let mut x = Mat::<f64>::zeros(n_vars, n_time);
        for j in 0..n_time {
            for i in 0..n_vars {
                x[(i, j)] = (10 * i + j) as f64;
            }
        }
        x
    }

    #[test]
    fn test_discrete_shift() {
        let u = counting(1, 6);
        let prob = DataProblem::discrete(counting(2, 6))
            .unwrap()
            .with_control(u)
            .unwrap();
        let pairs = assemble(&prob).unwrap();
        assert_eq!(pairs.n_samples(), 5);
        assert_eq!(pairs.n_controls(), 1);
        for j in 0..5 {
            assert_eq!(pairs.x0[(1, j)], (10 + j) as f64);
            assert_eq!(pairs.x1[(1, j)], (10 + j + 1) as f64);
        }
        assert_eq!(pairs.initial, vec![0.0, 10.0]);
        assert_eq!(pairs.time, TimeKind::Discrete { dt: 1.0 });
    }

    #[test]
    fn test_continuous_uses_derivatives() {
        let t: Vec<f64> = (0..4).map(|k| k as f64 * 0.5).collect();
        let prob = DataProblem::continuous(counting(2, 4), t)
            .unwrap()
            .with_derivatives(Mat::<f64>::identity(2, 4))
            .unwrap();
        let pairs = assemble(&prob).unwrap();
        assert_eq!(pairs.n_samples(), 4);
        assert_eq!(pairs.x1[(0, 0)], 1.0);
        assert_eq!(pairs.x1[(0, 1)], 0.0);
        assert_eq!(pairs.time, TimeKind::Continuous);
    }

    #[test]
    fn test_continuous_without_derivatives() {
        let t = vec![0.0, 1.0, 2.0];
        let prob = DataProblem::continuous(counting(1, 3), t).unwrap();
        assert!(matches!(assemble(&prob), Err(DmdError::InvalidInput(_))));
    }

    #[test]
    fn test_direct_rejected() {
        let prob = DataProblem::direct(counting(2, 4), counting(1, 4)).unwrap();
        assert!(matches!(
            assemble(&prob),
            Err(DmdError::UnsupportedProblemKind(ProblemKind::Direct))
        ));
    }

    #[test]
    fn test_single_sample_rejected() {
        let prob = DataProblem::discrete(counting(2, 1)).unwrap();
        assert!(matches!(
            assemble(&prob),
            Err(DmdError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_pairs_do_not_alias_problem() {
        let prob = DataProblem::discrete(counting(1, 3)).unwrap();
        let mut pairs = assemble(&prob).unwrap();
        pairs.x0[(0, 0)] = -1.0;
        assert_eq!(prob.states()[(0, 0)], 0.0);
    }
}
