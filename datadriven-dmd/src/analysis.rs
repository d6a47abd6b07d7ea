use std::f64::consts::PI;

use crate::result::EstimationResult;
use crate::types::{DmdError, ModeInfo, Stability, StabilityResult, TimeKind, C64};

/// Analyze the eigenvalue spectrum of a fitted operator.
///
/// Returns per-mode information: magnitude, phase, frequency, growth rate,
/// half-life, and stability classification. Frequencies and rates are in
/// physical time units (per `dt` for discrete operators).
pub fn spectrum(result: &EstimationResult, tol: f64) -> Result<Vec<ModeInfo>, DmdError> {
    let eigenvalues = result.raw_eigenvalues()?;
    let continuous = result.continuous_eigenvalues()?;
    let dt = result.dt().unwrap_or(1.0);

    let info = eigenvalues
        .iter()
        .zip(&continuous)
        .enumerate()
        .map(|(index, (&lambda, &mu))| {
            let magnitude = discrete_magnitude(result.time(), lambda, mu);
            let frequency = mu.im.abs() / (2.0 * PI);
            let period = if frequency > 1e-14 {
                1.0 / frequency
            } else {
                f64::INFINITY
            };
            let growth_rate = mu.re;
            let half_life = if growth_rate.abs() > 1e-12 {
                Some(-(2.0_f64.ln()) / growth_rate)
            } else {
                None
            };

            ModeInfo {
                index,
                eigenvalue: lambda,
                continuous_eigenvalue: mu,
                magnitude,
                phase: lambda.arg(),
                frequency,
                period,
                growth_rate,
                half_life,
                stability: classify(growth_rate * dt, tol),
            }
        })
        .collect();

    Ok(info)
}

/// Analyze system stability.
pub fn stability(result: &EstimationResult, tol: f64) -> Result<StabilityResult, DmdError> {
    let modes = spectrum(result, tol)?;
    let mode_stability: Vec<Stability> = modes.iter().map(|m| m.stability).collect();
    let spectral_radius = modes.iter().map(|m| m.magnitude).fold(0.0_f64, f64::max);

    let is_unstable = mode_stability.contains(&Stability::Growing);
    let is_marginal = mode_stability.contains(&Stability::Neutral);

    Ok(StabilityResult {
        is_stable: !is_unstable,
        is_unstable,
        is_marginal,
        spectral_radius,
        mode_stability,
    })
}

/// |λ| for discrete operators, |e^{μ}| for continuous ones.
fn discrete_magnitude(time: TimeKind, lambda: C64, mu: C64) -> f64 {
    match time {
        TimeKind::Discrete { .. } => lambda.norm(),
        TimeKind::Continuous => mu.re.exp(),
    }
}

/// Classify by log-magnitude per step.
fn classify(log_magnitude: f64, tol: f64) -> Stability {
    if log_magnitude < -tol {
        Stability::Decaying
    } else if log_magnitude > tol {
        Stability::Growing
    } else {
        Stability::Neutral
    }
}
