use std::collections::BTreeMap;
use std::f64::consts::PI;

use faer::Mat;
use tracing::{debug, info};

use crate::estimators::Estimator;
use crate::problem::DataProblem;
use crate::result::EstimationResult;
use crate::snapshots::{assemble, SnapshotPairs};
use crate::types::{DmdError, SolveOptions, TimeKind};
use crate::utils::{column, mat_vec};

/// RK4 sub-steps taken between consecutive sample times.
const RK4_SUBSTEPS: usize = 10;

/// A fitted linear system as plain data.
///
/// Discrete systems map `x_k ↦ x_{k+1}`, continuous ones `x ↦ ẋ`; in both
/// cases `f(x, u) = C (K Qᵀ x + B u)`.
#[derive(Debug, Clone)]
pub struct System {
    time: TimeKind,
    k: Mat<f64>,
    b: Mat<f64>,
    c: Mat<f64>,
    q: Mat<f64>,
}

impl System {
    pub fn from_result(result: &EstimationResult) -> Self {
        let op = result.decomposition();
        Self {
            time: result.time(),
            k: op.k.clone(),
            b: op.b.clone(),
            c: op.c.clone(),
            q: op.q.clone(),
        }
    }

    pub fn time(&self) -> TimeKind {
        self.time
    }

    pub fn n_states(&self) -> usize {
        self.c.nrows()
    }

    pub fn n_controls(&self) -> usize {
        self.b.ncols()
    }

    /// Next state (discrete) or time derivative (continuous) of a full state.
    pub fn evaluate(&self, x: &[f64], u: Option<&[f64]>) -> Result<Vec<f64>, DmdError> {
        if x.len() != self.n_states() {
            return Err(DmdError::DimensionMismatch(format!(
                "state has length {}, system has {} states",
                x.len(),
                self.n_states()
            )));
        }
        let z = self.project(x);
        let dz = self.reduced_rhs(&z, self.check_control(u)?);
        Ok(mat_vec(&self.c, &dz))
    }

    /// Closure evaluating the uncontrolled system.
    pub fn predictor(&self) -> impl Fn(&[f64]) -> Result<Vec<f64>, DmdError> + '_ {
        move |x: &[f64]| self.evaluate(x, None)
    }

    /// Closure evaluating the system with an explicit control input.
    pub fn controlled_predictor(
        &self,
    ) -> impl Fn(&[f64], &[f64]) -> Result<Vec<f64>, DmdError> + '_ {
        move |x: &[f64], u: &[f64]| self.evaluate(x, Some(u))
    }

    /// Trajectory from `x0` over the sample times `t`.
    ///
    /// Discrete systems iterate once per sample; continuous systems are
    /// integrated with RK4, holding the control constant between samples.
    /// Controls, when present, have one column per sample.
    pub fn simulate(
        &self,
        x0: &[f64],
        t: &[f64],
        u: Option<&Mat<f64>>,
    ) -> Result<Mat<f64>, DmdError> {
        if x0.len() != self.n_states() {
            return Err(DmdError::DimensionMismatch(format!(
                "initial state has length {}, system has {} states",
                x0.len(),
                self.n_states()
            )));
        }
        let n_time = t.len();
        if let Some(u) = u {
            if u.nrows() != self.n_controls() || u.ncols() < n_time {
                return Err(DmdError::DimensionMismatch(format!(
                    "controls are {}x{}, expected {}x{n_time}",
                    u.nrows(),
                    u.ncols(),
                    self.n_controls()
                )));
            }
        } else if self.n_controls() > 0 {
            return Err(DmdError::InvalidInput(format!(
                "system expects {} control inputs",
                self.n_controls()
            )));
        }

        let control_at = |k: usize| -> Vec<f64> {
            match u {
                Some(u) => column(u, k),
                None => Vec::new(),
            }
        };

        let mut out = Mat::<f64>::zeros(self.n_states(), n_time);
        if n_time == 0 {
            return Ok(out);
        }

        let mut z = self.project(x0);
        write_column(&mut out, 0, &mat_vec(&self.c, &z));

        for step in 1..n_time {
            let u_prev = control_at(step - 1);
            z = match self.time {
                TimeKind::Discrete { .. } => self.reduced_rhs(&z, &u_prev),
                TimeKind::Continuous => {
                    let h = (t[step] - t[step - 1]) / RK4_SUBSTEPS as f64;
                    let mut y = z;
                    for _ in 0..RK4_SUBSTEPS {
                        y = self.rk4_step(&y, &u_prev, h);
                    }
                    y
                }
            };
            write_column(&mut out, step, &mat_vec(&self.c, &z));
        }

        Ok(out)
    }

    fn project(&self, x: &[f64]) -> Vec<f64> {
        let r = self.q.ncols();
        (0..r)
            .map(|j| (0..x.len()).map(|i| self.q[(i, j)] * x[i]).sum())
            .collect()
    }

    fn check_control<'a>(&self, u: Option<&'a [f64]>) -> Result<&'a [f64], DmdError> {
        let u = u.unwrap_or(&[]);
        if self.n_controls() > 0 && u.is_empty() {
            return Err(DmdError::InvalidInput(format!(
                "system expects {} control inputs",
                self.n_controls()
            )));
        }
        if u.len() != self.n_controls() {
            return Err(DmdError::DimensionMismatch(format!(
                "control has length {}, system has {} inputs",
                u.len(),
                self.n_controls()
            )));
        }
        Ok(u)
    }

    /// K z + B u
    fn reduced_rhs(&self, z: &[f64], u: &[f64]) -> Vec<f64> {
        let mut out = mat_vec(&self.k, z);
        if !u.is_empty() {
            for (o, bu) in out.iter_mut().zip(mat_vec(&self.b, u)) {
                *o += bu;
            }
        }
        out
    }

    fn rk4_step(&self, y: &[f64], u: &[f64], h: f64) -> Vec<f64> {
        let k1 = self.reduced_rhs(y, u);
        let k2 = self.reduced_rhs(&axpy(y, 0.5 * h, &k1), u);
        let k3 = self.reduced_rhs(&axpy(y, 0.5 * h, &k2), u);
        let k4 = self.reduced_rhs(&axpy(y, h, &k3), u);
        (0..y.len())
            .map(|i| y[i] + h / 6.0 * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]))
            .collect()
    }
}

fn axpy(y: &[f64], a: f64, x: &[f64]) -> Vec<f64> {
    y.iter().zip(x).map(|(yi, xi)| yi + a * xi).collect()
}

fn write_column(m: &mut Mat<f64>, j: usize, v: &[f64]) {
    for (i, &val) in v.iter().enumerate() {
        m[(i, j)] = val;
    }
}

/// A named diagnostic value.
#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    Scalar(f64),
    Vector(Vec<f64>),
}

/// Named accuracy metrics of a solution.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    values: BTreeMap<String, Metric>,
}

impl Metrics {
    fn insert_scalar(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), Metric::Scalar(value));
    }

    fn insert_vector(&mut self, name: &str, value: Vec<f64>) {
        self.values.insert(name.to_string(), Metric::Vector(value));
    }

    pub fn get(&self, name: &str) -> Option<&Metric> {
        self.values.get(name)
    }

    pub fn scalar(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(Metric::Scalar(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn vector(&self, name: &str) -> Option<&[f64]> {
        match self.values.get(name) {
            Some(Metric::Vector(v)) => Some(v),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Metric)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Compare data `x` with its reconstruction `x_hat`.
///
/// `one_step` holds the targets `X1` and their one-step predictions; `dof`
/// is the number of fitted operator entries.
pub fn compute_metrics(
    x: &Mat<f64>,
    x_hat: &Mat<f64>,
    one_step: (&Mat<f64>, &Mat<f64>),
    dof: usize,
) -> Result<Metrics, DmdError> {
    if x.nrows() != x_hat.nrows() || x.ncols() != x_hat.ncols() {
        return Err(DmdError::DimensionMismatch(format!(
            "data is {}x{}, reconstruction is {}x{}",
            x.nrows(),
            x.ncols(),
            x_hat.nrows(),
            x_hat.ncols()
        )));
    }
    let (n_vars, n_time) = (x.nrows(), x.ncols());

    let mut sum_sq = 0.0;
    let mut sum_abs = 0.0;
    let mut max_abs = 0.0_f64;
    let mut orig_norm_sq = 0.0;
    let mut per_var_sq = vec![0.0; n_vars];
    let mut per_sample = vec![0.0; n_time];

    for k in 0..n_time {
        for i in 0..n_vars {
            let diff = x_hat[(i, k)] - x[(i, k)];
            sum_sq += diff * diff;
            sum_abs += diff.abs();
            max_abs = max_abs.max(diff.abs());
            orig_norm_sq += x[(i, k)] * x[(i, k)];
            per_var_sq[i] += diff * diff;
            per_sample[k] += diff * diff;
        }
    }

    let n_total = (n_vars * n_time) as f64;
    let l2 = sum_sq.sqrt();

    // total sum of squares about each state's mean
    let mut tss = 0.0;
    for i in 0..n_vars {
        let mean = (0..n_time).map(|k| x[(i, k)]).sum::<f64>() / n_time as f64;
        tss += (0..n_time).map(|k| (x[(i, k)] - mean).powi(2)).sum::<f64>();
    }
    let r2 = if tss > 0.0 {
        1.0 - sum_sq / tss
    } else if sum_sq == 0.0 {
        1.0
    } else {
        0.0
    };

    // Gaussian log-likelihood with the ML variance estimate
    let sigma_sq = (sum_sq / n_total).max(f64::MIN_POSITIVE);
    let loglikelihood = -0.5 * n_total * ((2.0 * PI * sigma_sq).ln() + 1.0);
    let n_params = dof as f64;
    let aic = 2.0 * n_params - 2.0 * loglikelihood;
    let aicc = if n_total > n_params + 1.0 {
        aic + 2.0 * n_params * (n_params + 1.0) / (n_total - n_params - 1.0)
    } else {
        f64::INFINITY
    };
    let bic = n_params * n_total.ln() - 2.0 * loglikelihood;

    let (x1, x1_hat) = one_step;
    let mut one_step_sq = 0.0;
    for k in 0..x1.ncols() {
        for i in 0..x1.nrows() {
            one_step_sq += (x1[(i, k)] - x1_hat[(i, k)]).powi(2);
        }
    }

    let mut metrics = Metrics::default();
    metrics.insert_scalar("L2", l2);
    metrics.insert_scalar("L2_per_sample", l2 / n_time as f64);
    metrics.insert_scalar("rmse", (sum_sq / n_total).sqrt());
    metrics.insert_scalar("mae", sum_abs / n_total);
    metrics.insert_scalar("max_abs_error", max_abs);
    metrics.insert_scalar(
        "relative_error",
        if orig_norm_sq > 0.0 {
            (sum_sq / orig_norm_sq).sqrt()
        } else {
            0.0
        },
    );
    metrics.insert_vector(
        "per_state_rmse",
        per_var_sq
            .iter()
            .map(|v| (v / n_time as f64).sqrt())
            .collect(),
    );
    metrics.insert_vector("per_sample_error", per_sample.iter().map(|v| v.sqrt()).collect());
    metrics.insert_scalar("one_step_L2", one_step_sq.sqrt());
    metrics.insert_scalar("rss", sum_sq);
    metrics.insert_scalar("r2", r2);
    metrics.insert_scalar("nobs", n_total);
    metrics.insert_scalar("dof", n_params);
    metrics.insert_scalar("loglikelihood", loglikelihood);
    metrics.insert_scalar("aic", aic);
    metrics.insert_scalar("aicc", aicc);
    metrics.insert_scalar("bic", bic);

    Ok(metrics)
}

/// The outcome of [`solve`].
#[derive(Debug, Clone)]
pub struct Solution {
    result: EstimationResult,
    system: Option<System>,
    metrics: Metrics,
    trajectory: Option<Mat<f64>>,
    problem_parameters: Vec<f64>,
}

impl Solution {
    pub fn result(&self) -> &EstimationResult {
        &self.result
    }

    pub fn into_result(self) -> EstimationResult {
        self.result
    }

    /// The fitted system; absent in operator-only mode.
    pub fn system(&self) -> Option<&System> {
        self.system.as_ref()
    }

    /// Accuracy metrics; empty in operator-only mode.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Reconstructed trajectory, same shape as the problem states.
    pub fn trajectory(&self) -> Option<&Mat<f64>> {
        self.trajectory.as_ref()
    }

    pub fn is_operator_only(&self) -> bool {
        self.result.is_operator_only()
    }

    /// Fitted parameters: entries of `K` then `B`, column-major, rounded
    /// like the reported operator.
    pub fn parameters(&self) -> Vec<f64> {
        let k = self.result.operator();
        let b = self.result.control_matrix();
        let mut p = Vec::with_capacity(k.nrows() * (k.ncols() + b.ncols()));
        for m in [&k, &b] {
            for j in 0..m.ncols() {
                for i in 0..m.nrows() {
                    p.push(m[(i, j)]);
                }
            }
        }
        p
    }

    /// Known parameters carried over from the problem.
    pub fn problem_parameters(&self) -> &[f64] {
        &self.problem_parameters
    }
}

/// Infer a linear operator from `problem` with `algorithm`.
pub fn solve<E: Estimator + ?Sized>(
    problem: &DataProblem,
    algorithm: &E,
    options: &SolveOptions,
) -> Result<Solution, DmdError> {
    if options.eval_expression {
        debug!(
            algorithm = algorithm.name(),
            "eval_expression has no effect on linear operator inference"
        );
    }

    let pairs = assemble(problem)?;
    let operator = algorithm.estimate(
        &pairs.x0,
        &pairs.x1,
        pairs.u0.as_ref(),
        algorithm.truncation(),
    )?;
    let result = EstimationResult::new(algorithm.name(), operator, pairs.time, options)?;

    if options.operator_only {
        info!(
            algorithm = result.algorithm(),
            rank = result.rank(),
            "operator-only estimation finished"
        );
        return Ok(Solution {
            result,
            system: None,
            metrics: Metrics::default(),
            trajectory: None,
            problem_parameters: problem.parameters().to_vec(),
        });
    }

    let system = System::from_result(&result);
    let trajectory = system.simulate(&pairs.initial, problem.times(), problem.controls())?;
    let one_step = one_step_predictions(&system, &pairs)?;
    let dof = result.rank() * (result.rank() + result.decomposition().n_controls());
    let metrics = compute_metrics(problem.states(), &trajectory, (&pairs.x1, &one_step), dof)?;

    info!(
        algorithm = result.algorithm(),
        rank = result.rank(),
        l2 = metrics.scalar("L2").unwrap_or(f64::NAN),
        "estimation finished"
    );

    Ok(Solution {
        result,
        system: Some(system),
        metrics,
        trajectory: Some(trajectory),
        problem_parameters: problem.parameters().to_vec(),
    })
}

/// Apply the system to every column of `X0`.
fn one_step_predictions(system: &System, pairs: &SnapshotPairs) -> Result<Mat<f64>, DmdError> {
    let mut out = Mat::<f64>::zeros(pairs.n_states(), pairs.n_samples());
    for k in 0..pairs.n_samples() {
        let x = column(&pairs.x0, k);
        let u = pairs.u0.as_ref().map(|u| column(u, k));
        let next = system.evaluate(&x, u.as_deref())?;
        write_column(&mut out, k, &next);
    }
    Ok(out)
}
