//! Basic example: infer the operator of a damped oscillator.

use datadriven_dmd::{solve, spectrum, stability, DataProblem, DmdSvd, RankSpec, SolveOptions};

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    // Damped oscillator sampled every 0.05 time units
    let n = 200;
    let dt = 0.05;
    let mut data = faer::Mat::<f64>::zeros(2, n);
    for j in 0..n {
        let t = j as f64 * dt;
        let decay = (-0.2 * t).exp();
        data[(0, j)] = decay * (3.0 * t).cos();
        data[(1, j)] = decay * (3.0 * t).sin();
    }
    let t: Vec<f64> = (0..n).map(|j| j as f64 * dt).collect();
    let problem = DataProblem::discrete(data).unwrap().with_time(t).unwrap();

    let estimator = DmdSvd::new(RankSpec::Energy(0.999));
    let solution = solve(&problem, &estimator, &SolveOptions::default()).unwrap();
    let result = solution.result();

    println!("Operator inference ({})", result.algorithm());
    println!("  Rank: {}", result.rank());
    println!("  K = {:?}", result.operator());

    println!("\nEigenvalue Spectrum:");
    for m in spectrum(result, 1e-6).unwrap() {
        println!(
            "  Mode {}: |λ|={:.4}, freq={:.4}, growth={:.4}, stability={}",
            m.index, m.magnitude, m.frequency, m.growth_rate, m.stability
        );
    }

    let stab = stability(result, 1e-6).unwrap();
    println!("\nStability:");
    println!("  Stable: {}", stab.is_stable);
    println!("  Spectral radius: {:.6}", stab.spectral_radius);

    let generator = result.continuous_operator().unwrap();
    println!("\nContinuous generator: {:?}", generator.matrix);

    println!("\nMetrics:");
    for (name, value) in solution.metrics().iter() {
        println!("  {name}: {value:?}");
    }
}
