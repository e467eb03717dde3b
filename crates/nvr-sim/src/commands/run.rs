use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::Args;
use nvr_core::RatePair;
use nvr_infer::{ForwardModel, Protocol, ProtocolConfig, SimulatedMeasurement};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// YAML protocol configuration.
    #[arg(long)]
    pub config: PathBuf,
    /// True γ₊ of the simulated NV in s⁻¹.
    #[arg(long)]
    pub truth_plus: f64,
    /// True γ₋ of the simulated NV in s⁻¹.
    #[arg(long)]
    pub truth_minus: f64,
    /// Number of protocol iterations.
    #[arg(long, default_value_t = 20)]
    pub iterations: usize,
    /// Seed for the simulated photon counts.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
    /// Output directory for the iteration records.
    #[arg(long)]
    pub out: PathBuf,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    truth: RatePair,
    seed: u64,
    iterations: usize,
    gamma_plus_hat: f64,
    gamma_minus_hat: f64,
    sigma_plus: f64,
    sigma_minus: f64,
    boundary_warnings: usize,
    hessian_fallbacks: usize,
    halted: bool,
}

pub fn run(args: &RunArgs) -> Result<(), Box<dyn Error>> {
    let text = fs::read_to_string(&args.config)?;
    let config = ProtocolConfig::from_yaml_str(&text)?;
    fs::create_dir_all(&args.out)?;

    let truth = RatePair::new(args.truth_plus, args.truth_minus);
    let mut port = SimulatedMeasurement::new(truth, ForwardModel::new(config.constants), args.seed)
        .with_shot_overhead(config.planner.shot_overhead_s);
    let mut protocol = Protocol::new(config)?;
    info!(
        truth_plus = truth.gamma_plus,
        truth_minus = truth.gamma_minus,
        iterations = args.iterations,
        seed = args.seed,
        "starting simulated run"
    );

    let outcome = protocol.run(&mut port, args.iterations).map(|_| ());
    if let Some(halt) = protocol.halted() {
        warn!(iteration = halt.iteration, "run halted, writing diagnostics");
        fs::write(args.out.join("halt.json"), serde_json::to_string_pretty(halt)?)?;
    }

    let records = protocol.records();
    records.write_csv(&args.out.join("records.csv"))?;
    records.write_json(&args.out.join("records.json"))?;

    let estimate = protocol.estimate();
    let summary = RunSummary {
        truth,
        seed: args.seed,
        iterations: records.len(),
        gamma_plus_hat: estimate.gamma_plus,
        gamma_minus_hat: estimate.gamma_minus,
        sigma_plus: estimate.sigma_plus,
        sigma_minus: estimate.sigma_minus,
        boundary_warnings: records.boundary_warnings(),
        hessian_fallbacks: records.hessian_fallbacks(),
        halted: protocol.halted().is_some(),
    };
    fs::write(
        args.out.join("summary.json"),
        serde_json::to_string_pretty(&summary)?,
    )?;
    info!(
        gamma_plus = summary.gamma_plus_hat,
        gamma_minus = summary.gamma_minus_hat,
        sigma_plus = summary.sigma_plus,
        sigma_minus = summary.sigma_minus,
        "run finished"
    );
    outcome?;
    Ok(())
}
