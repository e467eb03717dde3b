use std::error::Error;

use clap::Args;
use nvr_core::{Constants, RatePair, SpinState};
use nvr_infer::ForwardModel;
use serde::Serialize;

#[derive(Args, Debug)]
pub struct ModelArgs {
    /// Relaxation rate on the |0>↔|+1> transition in s⁻¹.
    #[arg(long)]
    pub gamma_plus: f64,
    /// Relaxation rate on the |0>↔|−1> transition in s⁻¹.
    #[arg(long)]
    pub gamma_minus: f64,
    /// Wait time in seconds.
    #[arg(long)]
    pub t: f64,
    /// Bright-state photoluminescence per readout.
    #[arg(long, default_value_t = 0.04)]
    pub pl0: f64,
    /// Fractional contrast of the dark states.
    #[arg(long, default_value_t = 0.1)]
    pub contrast: f64,
}

#[derive(Debug, Serialize)]
struct CurvePoint {
    init: &'static str,
    read: &'static str,
    pl: f64,
}

#[derive(Debug, Serialize)]
struct ModelReport {
    gamma_plus: f64,
    gamma_minus: f64,
    t: f64,
    baseline: f64,
    curves: Vec<CurvePoint>,
}

pub fn run(args: &ModelArgs) -> Result<(), Box<dyn Error>> {
    let report = build_report(args)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn build_report(args: &ModelArgs) -> Result<ModelReport, Box<dyn Error>> {
    if !(args.t.is_finite() && args.t >= 0.0) {
        return Err(format!("wait time must be finite and non-negative, got {}", args.t).into());
    }
    let model = ForwardModel::new(Constants::new(args.pl0, args.contrast)?);
    let rates = RatePair::new(args.gamma_plus, args.gamma_minus);
    let mut curves = Vec::with_capacity(9);
    for init in SpinState::ALL {
        for read in SpinState::ALL {
            curves.push(CurvePoint {
                init: init.label(),
                read: read.label(),
                pl: model.pl(init, read, args.t, &rates),
            });
        }
    }
    Ok(ModelReport {
        gamma_plus: args.gamma_plus,
        gamma_minus: args.gamma_minus,
        t: args.t,
        baseline: model.baseline(),
        curves,
    })
}
